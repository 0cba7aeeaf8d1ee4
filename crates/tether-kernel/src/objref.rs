//! Wire shape of an object reference.
//!
//! References travel as `{"$jsii.byref": "«fqn»@«n»"}` with an optional
//! `"$jsii.interfaces"` list that is present iff the minimised declared
//! interface set is non-empty, sorted lexicographically. Unknown fields are
//! preserved on round-trip through the spill map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::instance_id::InstanceId;

pub const WIRE_KEY_BYREF: &str = "$jsii.byref";
pub const WIRE_KEY_INTERFACES: &str = "$jsii.interfaces";

/// A by-reference pointer to a managed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjRef {
    #[serde(rename = "$jsii.byref")]
    pub instance_id: InstanceId,
    #[serde(
        rename = "$jsii.interfaces",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub interfaces: Option<Vec<String>>,
    /// Fields this crate does not understand, carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ObjRef {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            interfaces: None,
            extra: BTreeMap::new(),
        }
    }

    /// Build a reference carrying a declared interface list. The list is
    /// sorted; an empty list is dropped from the wire entirely.
    pub fn with_interfaces(instance_id: InstanceId, mut interfaces: Vec<String>) -> Self {
        interfaces.sort();
        interfaces.dedup();
        Self {
            instance_id,
            interfaces: if interfaces.is_empty() {
                None
            } else {
                Some(interfaces)
            },
            extra: BTreeMap::new(),
        }
    }

    /// Declared interfaces, or an empty slice when absent.
    pub fn interfaces(&self) -> &[String] {
        self.interfaces.as_deref().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_keys_are_the_byref_vocabulary() {
        let r = ObjRef::new(InstanceId::from("acme.Foo@10000"));
        let json = serde_json::to_string(&r).expect("serialize");
        assert_eq!(json, "{\"$jsii.byref\":\"acme.Foo@10000\"}");
    }

    #[test]
    fn interfaces_absent_when_empty() {
        let r = ObjRef::with_interfaces(InstanceId::from("acme.Foo@10000"), vec![]);
        assert_eq!(r.interfaces, None);
        assert_eq!(r.interfaces(), &[] as &[String]);
    }

    #[test]
    fn interfaces_sorted_and_deduplicated() {
        let r = ObjRef::with_interfaces(
            InstanceId::from("acme.Foo@10000"),
            vec!["b.I".into(), "a.I".into(), "b.I".into()],
        );
        assert_eq!(r.interfaces(), &["a.I".to_string(), "b.I".to_string()]);
        let json = serde_json::to_string(&r).expect("serialize");
        assert!(json.contains("\"$jsii.interfaces\":[\"a.I\",\"b.I\"]"));
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let wire = "{\"$jsii.byref\":\"acme.Foo@10000\",\"$jsii.rtti\":{\"fqn\":\"acme.Foo\"}}";
        let r: ObjRef = serde_json::from_str(wire).expect("deserialize");
        assert_eq!(r.instance_id.as_str(), "acme.Foo@10000");
        assert!(r.extra.contains_key("$jsii.rtti"));

        let back = serde_json::to_string(&r).expect("serialize");
        assert!(back.contains("$jsii.rtti"));
        let again: ObjRef = serde_json::from_str(&back).expect("round trip");
        assert_eq!(again, r);
    }
}
