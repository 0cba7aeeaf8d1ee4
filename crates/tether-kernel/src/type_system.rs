//! Type loader contract and the interface closure builder.
//!
//! The loader itself lives outside this crate; the store only consumes
//! [`TypeResolver::resolve_type`]. [`InterfaceCollection`] computes the
//! transitive set of interfaces granted by a class or interface FQN, which
//! the object handle uses to trim redundant interface declarations.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::KernelError;

/// Class FQN assigned to anonymous instances. Carries no interface closure
/// of its own and is never resolved through the type loader.
pub const EMPTY_OBJECT_FQN: &str = "Object";

// ---------------------------------------------------------------------------
// TypeKind / TypeDescriptor — the resolver's vocabulary
// ---------------------------------------------------------------------------

/// Kind of a resolved type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// Descriptor returned by the type loader for one FQN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub fqn: String,
    pub kind: TypeKind,
    /// Base class for classes; absent for root classes and interfaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Interfaces implemented by a class, or extended by an interface.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
}

impl TypeDescriptor {
    pub fn class(
        fqn: impl Into<String>,
        base: Option<&str>,
        interfaces: &[&str],
    ) -> Self {
        Self {
            fqn: fqn.into(),
            kind: TypeKind::Class,
            base: base.map(str::to_string),
            interfaces: interfaces.iter().map(|i| i.to_string()).collect(),
        }
    }

    pub fn interface(fqn: impl Into<String>, extends: &[&str]) -> Self {
        Self {
            fqn: fqn.into(),
            kind: TypeKind::Interface,
            base: None,
            interfaces: extends.iter().map(|i| i.to_string()).collect(),
        }
    }

    pub fn enumeration(fqn: impl Into<String>) -> Self {
        Self {
            fqn: fqn.into(),
            kind: TypeKind::Enum,
            base: None,
            interfaces: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// TypeResolver — consumed interface of the type loader
// ---------------------------------------------------------------------------

/// Resolves an FQN to its descriptor. A miss fails with
/// [`KernelError::UnknownType`].
pub trait TypeResolver {
    fn resolve_type(&self, fqn: &str) -> Result<TypeDescriptor, KernelError>;
}

/// In-memory resolver backed by a `BTreeMap`, for embedders whose type
/// universe is known up front and for tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticTypeResolver {
    types: BTreeMap<String, TypeDescriptor>,
}

impl StaticTypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, keyed by its FQN. Replaces any previous entry.
    pub fn add(&mut self, descriptor: TypeDescriptor) -> &mut Self {
        self.types.insert(descriptor.fqn.clone(), descriptor);
        self
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl TypeResolver for StaticTypeResolver {
    fn resolve_type(&self, fqn: &str) -> Result<TypeDescriptor, KernelError> {
        self.types
            .get(fqn)
            .cloned()
            .ok_or_else(|| KernelError::UnknownType {
                fqn: fqn.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// InterfaceCollection — transitive interface closure
// ---------------------------------------------------------------------------

/// Accumulates the interfaces granted by classes and interfaces.
///
/// `add_from_class` contributes every interface declared along the base
/// chain (plus their parents); `add_from_interface` contributes only the
/// *parents* of the given interface, never the interface itself. The
/// resulting set is therefore exactly the "provided" closure an interface
/// declaration is redundant against.
pub struct InterfaceCollection<'a> {
    resolver: &'a dyn TypeResolver,
    interfaces: BTreeSet<String>,
}

impl<'a> std::fmt::Debug for InterfaceCollection<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceCollection")
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

impl<'a> InterfaceCollection<'a> {
    pub fn new(resolver: &'a dyn TypeResolver) -> Self {
        Self {
            resolver,
            interfaces: BTreeSet::new(),
        }
    }

    /// Resume accumulation on top of a previously computed closure.
    pub fn from_set(resolver: &'a dyn TypeResolver, interfaces: BTreeSet<String>) -> Self {
        Self {
            resolver,
            interfaces,
        }
    }

    /// Walk the base chain of a class, collecting every interface entry at
    /// each level together with the entries' own parent closures.
    pub fn add_from_class(&mut self, fqn: &str) -> Result<(), KernelError> {
        let descriptor = self.resolver.resolve_type(fqn)?;
        if descriptor.kind != TypeKind::Class {
            return Err(KernelError::InvalidType {
                fqn: fqn.to_string(),
                expected: TypeKind::Class,
                actual: descriptor.kind,
            });
        }
        if let Some(base) = &descriptor.base {
            self.add_from_class(base)?;
        }
        for interface in &descriptor.interfaces {
            if self.interfaces.insert(interface.clone()) {
                self.add_from_interface(interface)?;
            }
        }
        Ok(())
    }

    /// Add the transitive parents of an interface. An interface already in
    /// the set is not re-walked.
    pub fn add_from_interface(&mut self, fqn: &str) -> Result<(), KernelError> {
        let descriptor = self.resolver.resolve_type(fqn)?;
        if descriptor.kind != TypeKind::Interface {
            return Err(KernelError::InvalidType {
                fqn: fqn.to_string(),
                expected: TypeKind::Interface,
                actual: descriptor.kind,
            });
        }
        for parent in &descriptor.interfaces {
            if self.interfaces.insert(parent.clone()) {
                self.add_from_interface(parent)?;
            }
        }
        Ok(())
    }

    pub fn contains(&self, fqn: &str) -> bool {
        self.interfaces.contains(fqn)
    }

    pub fn into_set(self) -> BTreeSet<String> {
        self.interfaces
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
