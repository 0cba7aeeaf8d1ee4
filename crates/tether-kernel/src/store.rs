//! The kernel object store: registry mapping instance IDs, handles, and
//! referents, plus the finalized-ID drain that feeds `release`
//! notifications.
//!
//! The store is per-kernel-instance, never process-global; independent
//! stores coexist freely. All maps are owned by the event loop and mutated
//! only between its suspension points.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::mem;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::handle::ObjectHandle;
use crate::instance_id::{InstanceId, InstanceSequence};
use crate::objref::ObjRef;
use crate::proxy::{real_object, FinalizedSet, Proxy};
use crate::type_system::{TypeResolver, EMPTY_OBJECT_FQN};

// ---------------------------------------------------------------------------
// ReferentKey — allocation identity of a real referent
// ---------------------------------------------------------------------------

/// Map key derived from a referent's allocation address. Stable while the
/// handle pins the referent; removed before the referent can be freed, so a
/// reused address can never alias a live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReferentKey(usize);

impl ReferentKey {
    fn of(referent: &Rc<dyn Any>) -> Self {
        Self(Rc::as_ptr(referent) as *const () as usize)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle events
// ---------------------------------------------------------------------------

/// Kind of a store lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEventKind {
    /// A handle was created.
    Managed,
    /// A dormant handle gained a proxy again.
    Retained,
    /// A finalized proxy was observed at drain time.
    Releasable,
    /// A handle was destroyed by `del`.
    Unmanaged,
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Managed => "managed",
            Self::Retained => "retained",
            Self::Releasable => "releasable",
            Self::Unmanaged => "unmanaged",
        };
        f.write_str(name)
    }
}

/// Structured event recorded by the store. The sequence is monotonic per
/// store, for deterministic ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub sequence: u64,
    pub instance_id: InstanceId,
    pub kind: LifecycleEventKind,
}

// ---------------------------------------------------------------------------
// Operation results
// ---------------------------------------------------------------------------

/// Result of a `register` call: the live proxy plus the wire reference.
#[derive(Debug, Clone)]
pub struct Registration {
    pub proxy: Rc<Proxy>,
    pub reference: ObjRef,
}

/// Result of a `dereference` call: the handoff from the wire back to
/// user-visible values.
#[derive(Debug, Clone)]
pub struct Dereferenced {
    pub class_fqn: String,
    pub proxy: Rc<Proxy>,
    pub interfaces: Vec<String>,
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// Registry of every managed object on the kernel side.
pub struct ObjectStore {
    resolver: Box<dyn TypeResolver>,
    sequence: InstanceSequence,
    handles: BTreeMap<InstanceId, Rc<ObjectHandle>>,
    by_instance: BTreeMap<ReferentKey, InstanceId>,
    finalized: FinalizedSet,
    /// Most-specific FQN marker per concrete referent type. `TypeId` plays
    /// the role of a per-store unique symbol, so stores coexist without
    /// sharing markers.
    type_fqns: BTreeMap<TypeId, String>,
    events: Vec<LifecycleEvent>,
    event_sequence: u64,
}

impl ObjectStore {
    pub fn new(resolver: Box<dyn TypeResolver>) -> Self {
        Self::with_sequence(resolver, InstanceSequence::default())
    }

    pub fn with_sequence(resolver: Box<dyn TypeResolver>, sequence: InstanceSequence) -> Self {
        Self {
            resolver,
            sequence,
            handles: BTreeMap::new(),
            by_instance: BTreeMap::new(),
            finalized: Rc::new(RefCell::new(BTreeSet::new())),
            type_fqns: BTreeMap::new(),
            events: Vec::new(),
            event_sequence: 0,
        }
    }

    /// Register an instance, or fold a repeated registration into the
    /// existing handle. Always returns a live proxy, so `has_proxy()` holds
    /// on return.
    pub fn register(
        &mut self,
        class_fqn: &str,
        instance: Option<Rc<dyn Any>>,
        interfaces: &[String],
    ) -> Result<Registration, KernelError> {
        let instance = instance.ok_or(KernelError::NullArgument)?;
        let real = real_object(&instance);
        let key = ReferentKey::of(&real);

        if let Some(instance_id) = self.by_instance.get(&key).cloned() {
            let handle = self.expect_handle(&instance_id)?;
            handle.merge_interfaces(self.resolver.as_ref(), interfaces)?;
            let had_proxy = handle.has_proxy();
            let proxy = handle.proxy();
            if !had_proxy {
                self.emit(LifecycleEventKind::Retained, instance_id);
            }
            return Ok(Registration {
                proxy,
                reference: handle.object_reference(),
            });
        }

        // Anonymous registrations pick up the most-specific FQN recorded by
        // `register_type`, when one exists for the concrete referent type.
        let class_fqn = if class_fqn == EMPTY_OBJECT_FQN {
            self.type_fqn_of(&real).unwrap_or(EMPTY_OBJECT_FQN).to_string()
        } else {
            class_fqn.to_string()
        };

        let instance_id = self.sequence.next_id(&class_fqn);
        let handle = Rc::new(ObjectHandle::new(
            self.resolver.as_ref(),
            instance_id.clone(),
            &class_fqn,
            Rc::clone(&real),
            interfaces,
            Rc::downgrade(&self.finalized),
        )?);
        let proxy = handle.proxy();
        let reference = handle.object_reference();

        self.handles.insert(instance_id.clone(), handle);
        self.by_instance.insert(key, instance_id.clone());
        self.emit(LifecycleEventKind::Managed, instance_id);

        Ok(Registration { proxy, reference })
    }

    /// Resolve a wire reference back to a live proxy, reanimating a dormant
    /// handle.
    pub fn dereference(&mut self, reference: &ObjRef) -> Result<Dereferenced, KernelError> {
        let handle = self
            .handles
            .get(&reference.instance_id)
            .cloned()
            .ok_or_else(|| KernelError::UnknownReference {
                instance_id: reference.instance_id.clone(),
            })?;

        let had_proxy = handle.has_proxy();
        let proxy = handle.proxy();
        if !had_proxy {
            self.emit(LifecycleEventKind::Retained, handle.instance_id().clone());
        }

        Ok(Dereferenced {
            class_fqn: handle.class_fqn().to_string(),
            proxy,
            interfaces: handle.interfaces(),
        })
    }

    /// The wire reference for an already-managed instance, if any. A hit
    /// reanimates the ID out of the finalized set: the instance is
    /// demonstrably still user-visible.
    pub fn ref_object(&mut self, instance: &Rc<dyn Any>) -> Option<ObjRef> {
        let real = real_object(instance);
        let instance_id = self.by_instance.get(&ReferentKey::of(&real))?.clone();
        self.finalized.borrow_mut().remove(&instance_id);
        self.handles
            .get(&instance_id)
            .map(|handle| handle.object_reference())
    }

    /// Record the most-specific FQN for a concrete Rust type. Used to
    /// recover a declared type when an instance is registered anonymously.
    pub fn register_type<T: Any>(&mut self, fqn: impl Into<String>) {
        self.type_fqns.insert(TypeId::of::<T>(), fqn.into());
    }

    /// The FQN marker for an instance's concrete type, unwrapping proxies.
    pub fn type_fqn(&self, instance: &Rc<dyn Any>) -> Option<&str> {
        let real = real_object(instance);
        self.type_fqn_of(&real)
    }

    fn type_fqn_of(&self, real: &Rc<dyn Any>) -> Option<&str> {
        let type_id = Any::type_id(&**real);
        self.type_fqns.get(&type_id).map(String::as_str)
    }

    /// Destroy a handle. Precondition: no live proxy exists; violating it
    /// fails with `StillReachable` and leaves the store unchanged.
    pub fn delete(&mut self, reference: &ObjRef) -> Result<(), KernelError> {
        let instance_id = reference.instance_id.clone();
        let handle = self
            .handles
            .get(&instance_id)
            .cloned()
            .ok_or_else(|| KernelError::UnknownReference {
                instance_id: instance_id.clone(),
            })?;
        if handle.has_proxy() {
            return Err(KernelError::StillReachable { instance_id });
        }

        self.finalized.borrow_mut().remove(&instance_id);
        self.by_instance.remove(&ReferentKey::of(&handle.referent()));
        self.handles.remove(&instance_id);
        self.emit(LifecycleEventKind::Unmanaged, instance_id);
        // `handle` drops here; if the store held the last strong reference
        // to the referent, the referent is freed outside any borrow.
        Ok(())
    }

    /// Drain the finalized set.
    ///
    /// Returns the IDs whose proxy finalizer has fired and whose handle is
    /// still proxy-dead; reanimated or deleted IDs are discarded. The drain
    /// is take-then-filter: a finalizer insertion racing the drain lands in
    /// this batch or the next, never nowhere.
    pub fn finalized_instance_ids(&mut self) -> Vec<InstanceId> {
        let drained = {
            let mut set = self.finalized.borrow_mut();
            mem::take(&mut *set)
        };
        let mut releasable = Vec::new();
        for instance_id in drained {
            let dormant = self
                .handles
                .get(&instance_id)
                .is_some_and(|handle| !handle.has_proxy());
            if dormant {
                self.emit(LifecycleEventKind::Releasable, instance_id.clone());
                releasable.push(instance_id);
            }
        }
        releasable
    }

    /// The handle for an instance ID, if the object is managed.
    pub fn handle(&self, instance_id: &InstanceId) -> Option<Rc<ObjectHandle>> {
        self.handles.get(instance_id).cloned()
    }

    pub fn contains(&self, instance_id: &InstanceId) -> bool {
        self.handles.contains_key(instance_id)
    }

    /// Number of managed objects.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// All recorded lifecycle events.
    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }

    /// Drain the recorded lifecycle events.
    pub fn take_events(&mut self) -> Vec<LifecycleEvent> {
        mem::take(&mut self.events)
    }

    fn emit(&mut self, kind: LifecycleEventKind, instance_id: InstanceId) {
        self.event_sequence += 1;
        self.events.push(LifecycleEvent {
            sequence: self.event_sequence,
            instance_id,
            kind,
        });
    }

    fn expect_handle(&self, instance_id: &InstanceId) -> Result<Rc<ObjectHandle>, KernelError> {
        self.handles
            .get(instance_id)
            .cloned()
            .ok_or_else(|| KernelError::UnknownReference {
                instance_id: instance_id.clone(),
            })
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("handles", &self.handles.len())
            .field("finalized", &self.finalized.borrow().len())
            .field("event_sequence", &self.event_sequence)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
