//! The user-facing proxy over a real referent.
//!
//! A proxy is the only user-visible form of a managed object. It owns a
//! strong clone of the referent, so a live proxy transitively keeps the
//! referent alive. The store watches proxies weakly; dropping the last
//! strong reference to a proxy runs its finalization hook, whose sole
//! effect is inserting the owning instance ID into the store's finalized
//! set. Referential identity of proxies is not a user-visible guarantee;
//! only identity of the underlying referent is.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::instance_id::InstanceId;

/// Shared set of instance IDs whose proxy finalizer has fired. Owned by the
/// store; proxies hold it weakly so proxies outliving their store are inert.
pub(crate) type FinalizedSet = Rc<RefCell<BTreeSet<InstanceId>>>;

/// Transparent forwarder over the real referent of a managed object.
pub struct Proxy {
    referent: Rc<dyn Any>,
    instance_id: InstanceId,
    finalized: Weak<RefCell<BTreeSet<InstanceId>>>,
}

impl Proxy {
    pub(crate) fn new(
        referent: Rc<dyn Any>,
        instance_id: InstanceId,
        finalized: Weak<RefCell<BTreeSet<InstanceId>>>,
    ) -> Rc<Self> {
        Rc::new(Self {
            referent,
            instance_id,
            finalized,
        })
    }

    /// The hidden slot: the real referent behind this proxy.
    pub fn referent(&self) -> Rc<dyn Any> {
        Rc::clone(&self.referent)
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Forward member access to the referent's concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.referent.downcast_ref()
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        // The finalization hook. Set insertion only; any other mutation is
        // deferred to the store's drain.
        if let Some(finalized) = self.finalized.upgrade() {
            finalized.borrow_mut().insert(self.instance_id.clone());
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

/// Recover the real referent from a value that may itself be a proxy.
///
/// This defeats identity loss when user code hands a proxy back in as an
/// argument: the store keys its instance map by referent identity, never by
/// proxy identity.
pub fn real_object(value: &Rc<dyn Any>) -> Rc<dyn Any> {
    match value.downcast_ref::<Proxy>() {
        Some(proxy) => proxy.referent(),
        None => Rc::clone(value),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget {
        label: String,
    }

    fn finalized_set() -> FinalizedSet {
        Rc::new(RefCell::new(BTreeSet::new()))
    }

    #[test]
    fn proxy_keeps_referent_alive_and_forwards_access() {
        let referent: Rc<dyn Any> = Rc::new(Widget {
            label: "w".to_string(),
        });
        let set = finalized_set();
        let proxy = Proxy::new(
            Rc::clone(&referent),
            InstanceId::from("a.Widget@10000"),
            Rc::downgrade(&set),
        );

        assert_eq!(proxy.downcast_ref::<Widget>().expect("widget").label, "w");
        assert_eq!(Rc::strong_count(&referent), 2);
    }

    #[test]
    fn dropping_last_proxy_reference_marks_finalized() {
        let set = finalized_set();
        let referent: Rc<dyn Any> = Rc::new(Widget {
            label: "w".to_string(),
        });
        let proxy = Proxy::new(
            referent,
            InstanceId::from("a.Widget@10000"),
            Rc::downgrade(&set),
        );
        assert!(set.borrow().is_empty());

        drop(proxy);
        assert!(set.borrow().contains(&InstanceId::from("a.Widget@10000")));
    }

    #[test]
    fn proxy_outliving_its_store_is_inert() {
        let set = finalized_set();
        let referent: Rc<dyn Any> = Rc::new(Widget {
            label: "w".to_string(),
        });
        let proxy = Proxy::new(
            referent,
            InstanceId::from("a.Widget@10000"),
            Rc::downgrade(&set),
        );

        drop(set);
        drop(proxy); // must not panic
    }

    #[test]
    fn real_object_unwraps_proxies_and_passes_plain_values_through() {
        let set = finalized_set();
        let referent: Rc<dyn Any> = Rc::new(Widget {
            label: "w".to_string(),
        });
        let proxy = Proxy::new(
            Rc::clone(&referent),
            InstanceId::from("a.Widget@10000"),
            Rc::downgrade(&set),
        );

        let as_any: Rc<dyn Any> = proxy;
        let unwrapped = real_object(&as_any);
        assert!(Rc::ptr_eq(&unwrapped, &referent));

        let plain = real_object(&referent);
        assert!(Rc::ptr_eq(&plain, &referent));
    }
}
