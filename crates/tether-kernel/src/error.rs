//! Typed error contract for the object store and its wire coupling.
//!
//! Every kind is transport independent and carries a stable `code()` string
//! that is written verbatim into error response frames.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::instance_id::InstanceId;
use crate::type_system::TypeKind;

/// Errors surfaced by the object store, the interface closure builder, and
/// the request/response coupling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelError {
    /// `register` was called with a null instance.
    NullArgument,
    /// An operation named an instance ID with no live handle.
    UnknownReference { instance_id: InstanceId },
    /// `del` was requested for a handle whose proxy is still live.
    StillReachable { instance_id: InstanceId },
    /// The type loader resolved an FQN to the wrong kind of type.
    InvalidType {
        fqn: String,
        expected: TypeKind,
        actual: TypeKind,
    },
    /// The type loader has no descriptor for the FQN.
    UnknownType { fqn: String },
    /// A handle's real referent was reclaimed. Unreachable while a handle
    /// exists; fatal if ever observed.
    CollectedReferent { instance_id: InstanceId },
    /// A nested callback to the host completed with an exception.
    HostException { message: String },
    /// A wire frame was malformed or the channel misbehaved.
    Protocol { message: String },
}

impl KernelError {
    /// Stable error code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NullArgument => "NullArgument",
            Self::UnknownReference { .. } => "UnknownReference",
            Self::StillReachable { .. } => "StillReachable",
            Self::InvalidType { .. } => "InvalidType",
            Self::UnknownType { .. } => "UnknownType",
            Self::CollectedReferent { .. } => "CollectedReferent",
            Self::HostException { .. } => "HostException",
            Self::Protocol { .. } => "Protocol",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullArgument => write!(f, "cannot register a null instance"),
            Self::UnknownReference { instance_id } => {
                write!(f, "no object with reference '{instance_id}' exists")
            }
            Self::StillReachable { instance_id } => {
                write!(
                    f,
                    "object '{instance_id}' still has a live proxy and cannot be deleted"
                )
            }
            Self::InvalidType {
                fqn,
                expected,
                actual,
            } => write!(f, "type '{fqn}' is a {actual}, expected a {expected}"),
            Self::UnknownType { fqn } => write!(f, "no type descriptor for '{fqn}'"),
            Self::CollectedReferent { instance_id } => {
                write!(f, "referent of '{instance_id}' was already reclaimed")
            }
            Self::HostException { message } => {
                write!(f, "host callback raised an exception: {message}")
            }
            Self::Protocol { message } => write!(f, "protocol violation: {message}"),
        }
    }
}

impl std::error::Error for KernelError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
