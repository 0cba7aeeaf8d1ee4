//! Per-object bookkeeping record on the kernel side.
//!
//! A handle pins the real referent with a strong reference for as long as
//! the handle exists; the proxy is what the store watches weakly. A handle
//! passes through `proxy-live` and `proxy-dead` any number of times (a new
//! proxy is minted on demand after the previous one died) and is destroyed
//! only by an explicit `del`.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::KernelError;
use crate::instance_id::InstanceId;
use crate::objref::ObjRef;
use crate::proxy::Proxy;
use crate::type_system::{InterfaceCollection, TypeResolver, EMPTY_OBJECT_FQN};

/// Kernel-side record for one managed object.
pub struct ObjectHandle {
    instance_id: InstanceId,
    class_fqn: String,
    referent: Rc<dyn Any>,
    proxy: RefCell<Weak<Proxy>>,
    /// Minimal set of interface FQNs that, with the class closure, yields
    /// the full interface closure. Disjoint from `provided` at all times.
    declared: RefCell<BTreeSet<String>>,
    /// Closure implied by the class chain plus the parents of every
    /// declaration ever merged.
    provided: RefCell<BTreeSet<String>>,
    finalized: Weak<RefCell<BTreeSet<InstanceId>>>,
}

impl ObjectHandle {
    /// Build a handle, computing the interface closure for `class_fqn` and
    /// minimising `interfaces` against it. The anonymous class
    /// [`EMPTY_OBJECT_FQN`] contributes no closure and is not resolved.
    pub(crate) fn new(
        resolver: &dyn TypeResolver,
        instance_id: InstanceId,
        class_fqn: &str,
        referent: Rc<dyn Any>,
        interfaces: &[String],
        finalized: Weak<RefCell<BTreeSet<InstanceId>>>,
    ) -> Result<Self, KernelError> {
        let mut collection = InterfaceCollection::new(resolver);
        if class_fqn != EMPTY_OBJECT_FQN {
            collection.add_from_class(class_fqn)?;
        }
        let mut declared = BTreeSet::new();
        for fqn in interfaces {
            collection.add_from_interface(fqn)?;
            declared.insert(fqn.clone());
        }
        let provided = collection.into_set();
        declared.retain(|fqn| !provided.contains(fqn));

        Ok(Self {
            instance_id,
            class_fqn: class_fqn.to_string(),
            referent,
            proxy: RefCell::new(Weak::new()),
            declared: RefCell::new(declared),
            provided: RefCell::new(provided),
            finalized,
        })
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn class_fqn(&self) -> &str {
        &self.class_fqn
    }

    /// The real referent. Strongly held, so always available while the
    /// handle exists.
    pub fn referent(&self) -> Rc<dyn Any> {
        Rc::clone(&self.referent)
    }

    /// The minimised declared interfaces, lexicographically sorted.
    pub fn interfaces(&self) -> Vec<String> {
        self.declared.borrow().iter().cloned().collect()
    }

    /// The transitive interface closure, lexicographically sorted.
    pub fn provided_interfaces(&self) -> Vec<String> {
        self.provided.borrow().iter().cloned().collect()
    }

    /// True iff the weak proxy reference still resolves.
    pub fn has_proxy(&self) -> bool {
        self.proxy.borrow().strong_count() > 0
    }

    /// The live proxy, minting a fresh one over the real referent if the
    /// previous proxy was collected. Minting reanimates the handle: the
    /// instance ID is withdrawn from the finalized set so it cannot appear
    /// in the next release batch.
    pub fn proxy(&self) -> Rc<Proxy> {
        let existing = self.proxy.borrow().upgrade();
        if let Some(proxy) = existing {
            return proxy;
        }
        let minted = Proxy::new(
            Rc::clone(&self.referent),
            self.instance_id.clone(),
            self.finalized.clone(),
        );
        *self.proxy.borrow_mut() = Rc::downgrade(&minted);
        if let Some(finalized) = self.finalized.upgrade() {
            finalized.borrow_mut().remove(&self.instance_id);
        }
        minted
    }

    /// Extend the provided closure with each new FQN's parents, add the raw
    /// FQNs to the declarations, then re-minimise the declarations.
    pub fn merge_interfaces(
        &self,
        resolver: &dyn TypeResolver,
        interfaces: &[String],
    ) -> Result<(), KernelError> {
        if interfaces.is_empty() {
            return Ok(());
        }
        // Work on copies so a resolver failure leaves the handle untouched.
        let mut declared = self.declared.borrow().clone();
        let mut collection = InterfaceCollection::from_set(resolver, self.provided.borrow().clone());
        for fqn in interfaces {
            collection.add_from_interface(fqn)?;
            declared.insert(fqn.clone());
        }
        let provided = collection.into_set();
        declared.retain(|fqn| !provided.contains(fqn));

        *self.declared.borrow_mut() = declared;
        *self.provided.borrow_mut() = provided;
        Ok(())
    }

    /// The wire reference: instance ID plus the sorted declared interfaces,
    /// omitted entirely when empty.
    pub fn object_reference(&self) -> ObjRef {
        ObjRef::with_interfaces(self.instance_id.clone(), self.interfaces())
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("instance_id", &self.instance_id)
            .field("class_fqn", &self.class_fqn)
            .field("has_proxy", &self.has_proxy())
            .field("declared", &self.declared.borrow())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
