//! Wire frames coupling the store to the host.
//!
//! Every frame is one JSON line. Requests carry an `"api"` discriminator;
//! `del` and `exit` belong to the store itself, anything else is the
//! embedder's business. The `release` notification is never sent out of
//! band: it piggybacks on the response stream, after a request is processed
//! and before that request's response is written.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KernelError;
use crate::instance_id::InstanceId;
use crate::objref::ObjRef;

pub const API_DEL: &str = "del";
pub const API_EXIT: &str = "exit";

// ---------------------------------------------------------------------------
// Greeting
// ---------------------------------------------------------------------------

/// First frame on the output channel: `{"hello": "tether-kernel@x.y.z"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloFrame {
    pub hello: String,
}

impl HelloFrame {
    pub fn for_kernel() -> Self {
        Self {
            hello: concat!("tether-kernel@", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests understood natively by the store
// ---------------------------------------------------------------------------

/// Store-native requests. Other `api` values are delegated to the
/// embedder's request handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "api")]
pub enum KernelRequest {
    #[serde(rename = "del")]
    Del { objref: ObjRef },
    #[serde(rename = "exit")]
    Exit,
}

// ---------------------------------------------------------------------------
// Responses and notifications
// ---------------------------------------------------------------------------

/// Success response: `{"ok": <value>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: Value,
}

impl OkResponse {
    pub fn empty() -> Self {
        Self {
            ok: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Error response: `{"error": "<code>", "message": "…"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<&KernelError> for ErrorResponse {
    fn from(err: &KernelError) -> Self {
        Self {
            error: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// One-way kernel→host notification announcing finalized instance IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseNotification {
    pub release: Vec<InstanceId>,
}

// ---------------------------------------------------------------------------
// Nested callbacks
// ---------------------------------------------------------------------------

/// Kernel→host nested request issued while an outer request is suspended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackFrame {
    pub callback: Value,
}

/// Host's answer to a nested callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallbackResponse {
    Ok { ok: Value },
    Exception { exception: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
