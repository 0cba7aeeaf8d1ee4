//! Instance identity: the `«classFQN»@«n»` naming scheme and the monotonic
//! sequence that mints it.
//!
//! Instance IDs are unique within a session and never reused, even after
//! deletion. The sequence is not thread-safe by contract; callers serialize
//! access through the object store.

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

/// First sequence number handed out by a default sequence. Low numbers are
/// reserved so the host can allocate sentinel IDs without collision.
pub const DEFAULT_ORIGIN: u64 = 10_000;

// ---------------------------------------------------------------------------
// InstanceId — canonical per-object identity
// ---------------------------------------------------------------------------

/// Canonical identity of a managed object, of the form `«classFQN»@«n»`.
///
/// Assigned at first registration and immutable from then on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Compose an ID from a class FQN and a sequence number.
    pub fn new(class_fqn: &str, sequence: u64) -> Self {
        Self(format!("{class_fqn}@{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The class FQN portion, i.e. everything before the final `@`.
    pub fn class_fqn(&self) -> &str {
        match self.0.rsplit_once('@') {
            Some((fqn, _)) => fqn,
            None => &self.0,
        }
    }

    /// The sequence portion, if the ID is well formed.
    pub fn sequence(&self) -> Option<u64> {
        self.0.rsplit_once('@').and_then(|(_, n)| n.parse().ok())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// InstanceSequence — monotonic ID generator
// ---------------------------------------------------------------------------

/// Monotonic generator yielding `origin, origin+stride, origin+2·stride, …`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSequence {
    next: u64,
    stride: NonZeroU64,
}

impl InstanceSequence {
    pub fn new(origin: u64, stride: NonZeroU64) -> Self {
        Self {
            next: origin,
            stride,
        }
    }

    /// The sequence number the next mint will use.
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Mint the next instance ID for the given class FQN.
    pub fn next_id(&mut self, class_fqn: &str) -> InstanceId {
        let sequence = self.next;
        self.next += self.stride.get();
        InstanceId::new(class_fqn, sequence)
    }
}

impl Default for InstanceSequence {
    fn default() -> Self {
        Self::new(DEFAULT_ORIGIN, NonZeroU64::MIN)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_format() {
        let id = InstanceId::new("acme.core.Widget", 10_000);
        assert_eq!(id.as_str(), "acme.core.Widget@10000");
        assert_eq!(id.to_string(), "acme.core.Widget@10000");
        assert_eq!(id.class_fqn(), "acme.core.Widget");
        assert_eq!(id.sequence(), Some(10_000));
    }

    #[test]
    fn instance_id_serde_is_transparent() {
        let id = InstanceId::new("acme.Foo", 10_001);
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"acme.Foo@10001\"");
        let restored: InstanceId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, id);
    }

    #[test]
    fn default_sequence_starts_at_reserved_origin() {
        let mut seq = InstanceSequence::default();
        assert_eq!(seq.peek(), DEFAULT_ORIGIN);
        assert_eq!(seq.next_id("acme.Foo").as_str(), "acme.Foo@10000");
        assert_eq!(seq.next_id("acme.Bar").as_str(), "acme.Bar@10001");
    }

    #[test]
    fn sequence_honors_origin_and_stride() {
        let stride = NonZeroU64::new(5).expect("nonzero");
        let mut seq = InstanceSequence::new(100, stride);
        assert_eq!(seq.next_id("a.B").sequence(), Some(100));
        assert_eq!(seq.next_id("a.B").sequence(), Some(105));
        assert_eq!(seq.next_id("a.B").sequence(), Some(110));
    }

    #[test]
    fn minted_ids_are_strictly_monotonic() {
        let mut seq = InstanceSequence::default();
        let mut last = None;
        for _ in 0..100 {
            let n = seq.next_id("a.B").sequence().expect("sequence");
            if let Some(prev) = last {
                assert!(n > prev);
            }
            last = Some(n);
        }
    }

    #[test]
    fn class_fqn_survives_embedded_at_signs() {
        // An FQN never contains `@`, but a malformed ID must not panic.
        let id = InstanceId::from("weird@name@77");
        assert_eq!(id.class_fqn(), "weird@name");
        assert_eq!(id.sequence(), Some(77));

        let bare = InstanceId::from("no-sequence");
        assert_eq!(bare.class_fqn(), "no-sequence");
        assert_eq!(bare.sequence(), None);
    }
}
