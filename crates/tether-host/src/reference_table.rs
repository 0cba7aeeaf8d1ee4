//! The host reference table and its proxy lifecycle.
//!
//! For an object the kernel created, the host never needs a strong
//! reference at all: if the host proxy is reclaimed, a fresh proxy can be
//! minted by asking the kernel to dereference the object reference again.
//! Only host-created objects pin their proxy, and only until the kernel
//! declares the kernel side unreachable.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tether_kernel::instance_id::InstanceId;
use tether_kernel::objref::ObjRef;
use tether_kernel::protocol::{KernelRequest, ReleaseNotification};

// ---------------------------------------------------------------------------
// HostProxy — the user-visible wrapper on the host side
// ---------------------------------------------------------------------------

/// Host-side wrapper around a kernel-managed object. Dropping the last
/// strong reference enqueues the instance ID on the table's drop queue,
/// the host analog of a reference queue.
pub struct HostProxy {
    instance_id: InstanceId,
    interfaces: Vec<String>,
    dropped: Weak<RefCell<VecDeque<InstanceId>>>,
}

impl HostProxy {
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }
}

impl Drop for HostProxy {
    fn drop(&mut self) {
        if let Some(queue) = self.dropped.upgrade() {
            queue.borrow_mut().push_back(self.instance_id.clone());
        }
    }
}

impl fmt::Debug for HostProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProxy")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Origins and reachability states
// ---------------------------------------------------------------------------

/// How the host came to know an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyOrigin {
    /// The host created the object via a `create` request; a strong
    /// reference is held until the kernel releases it.
    HostCreated,
    /// The kernel returned the object from an invocation; weak only.
    KernelReturned,
}

/// Host-visible reachability of a managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReachabilityState {
    /// The host still pins the proxy; both sides reach the object.
    BothReachable,
    /// Only the kernel's handle pins the object; the host proxy is a
    /// window that may be reclaimed at any time.
    KernelOnly,
    /// The host proxy is gone and nothing pins it here; a `del` request is
    /// due on the next drain.
    Unreachable,
}

impl fmt::Display for ReachabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BothReachable => "both-reachable",
            Self::KernelOnly => "kernel-only",
            Self::Unreachable => "unreachable",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures in release-notification handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceTableError {
    /// The kernel released an instance the host never tracked. The rest of
    /// the batch has already been applied when this is reported.
    #[error("release notification names unknown instance '{instance_id}'")]
    UnknownInstance { instance_id: InstanceId },
}

// ---------------------------------------------------------------------------
// ReferenceTable
// ---------------------------------------------------------------------------

struct HostRecord {
    interfaces: Vec<String>,
    origin: ProxyOrigin,
    weak: Weak<HostProxy>,
    strong: Option<Rc<HostProxy>>,
    /// The kernel has declared its side unreachable; re-adoption must not
    /// re-pin the proxy.
    released: bool,
}

/// Mirror of the kernel registry on the host side.
pub struct ReferenceTable {
    records: BTreeMap<InstanceId, HostRecord>,
    drop_queue: Rc<RefCell<VecDeque<InstanceId>>>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            drop_queue: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// Take note of an object reference arriving from the kernel, minting
    /// or reviving the host proxy for it.
    ///
    /// Re-adopting a live instance returns the existing proxy and merges
    /// the declared interfaces. A `HostCreated` adoption re-establishes
    /// the strong reference unless the kernel already released the
    /// instance.
    pub fn adopt(&mut self, reference: &ObjRef, origin: ProxyOrigin) -> Rc<HostProxy> {
        let instance_id = reference.instance_id.clone();

        if let Some(record) = self.records.get_mut(&instance_id) {
            if let Some(existing) = record.weak.upgrade() {
                for interface in reference.interfaces() {
                    if !record.interfaces.contains(interface) {
                        record.interfaces.push(interface.clone());
                    }
                }
                record.interfaces.sort();
                if origin == ProxyOrigin::HostCreated
                    && !record.released
                    && record.strong.is_none()
                {
                    record.strong = Some(Rc::clone(&existing));
                }
                return existing;
            }
        }

        // Fresh adoption, or revival after the previous proxy was
        // collected but before its `del` went out.
        let proxy = Rc::new(HostProxy {
            instance_id: instance_id.clone(),
            interfaces: reference.interfaces().to_vec(),
            dropped: Rc::downgrade(&self.drop_queue),
        });
        let strong = (origin == ProxyOrigin::HostCreated).then(|| Rc::clone(&proxy));
        self.records.insert(
            instance_id,
            HostRecord {
                interfaces: reference.interfaces().to_vec(),
                origin,
                weak: Rc::downgrade(&proxy),
                strong,
                released: false,
            },
        );
        proxy
    }

    /// Apply a kernel `release` notification: drop the conditional strong
    /// references for every named instance. The whole batch is applied
    /// before the first unknown instance (if any) is reported.
    pub fn release(&mut self, instance_ids: &[InstanceId]) -> Result<usize, ReferenceTableError> {
        let mut cleared = 0;
        let mut unknown = None;
        for instance_id in instance_ids {
            match self.records.get_mut(instance_id) {
                Some(record) => {
                    if record.strong.take().is_some() {
                        cleared += 1;
                    }
                    record.released = true;
                }
                None => {
                    if unknown.is_none() {
                        unknown = Some(instance_id.clone());
                    }
                }
            }
        }
        match unknown {
            Some(instance_id) => Err(ReferenceTableError::UnknownInstance { instance_id }),
            None => Ok(cleared),
        }
    }

    /// Convenience wrapper over [`ReferenceTable::release`] for a wire
    /// notification frame.
    pub fn apply_notification(
        &mut self,
        notification: &ReleaseNotification,
    ) -> Result<usize, ReferenceTableError> {
        self.release(&notification.release)
    }

    /// Drain host proxies the host runtime has collected into `del`
    /// request frames.
    ///
    /// An instance is emitted only when its weak reference is dead and no
    /// strong reference pins it; instances revived since their proxy died
    /// are skipped and stay tracked.
    pub fn drain_del_requests(&mut self) -> Vec<KernelRequest> {
        let collected: Vec<InstanceId> = {
            let mut queue = self.drop_queue.borrow_mut();
            queue.drain(..).collect()
        };

        let mut requests = Vec::new();
        for instance_id in collected {
            let emit = match self.records.get(&instance_id) {
                Some(record) => record.strong.is_none() && record.weak.upgrade().is_none(),
                None => false,
            };
            if emit {
                self.records.remove(&instance_id);
                requests.push(KernelRequest::Del {
                    objref: ObjRef::new(instance_id),
                });
            }
        }
        requests
    }

    /// Reachability of a tracked instance, from the host's point of view.
    pub fn state(&self, instance_id: &InstanceId) -> Option<ReachabilityState> {
        let record = self.records.get(instance_id)?;
        let state = if record.strong.is_some() {
            ReachabilityState::BothReachable
        } else if record.weak.upgrade().is_some() {
            ReachabilityState::KernelOnly
        } else {
            ReachabilityState::Unreachable
        };
        Some(state)
    }

    /// The live proxy for an instance, if the host runtime still holds one.
    pub fn proxy(&self, instance_id: &InstanceId) -> Option<Rc<HostProxy>> {
        self.records.get(instance_id)?.weak.upgrade()
    }

    pub fn origin(&self, instance_id: &InstanceId) -> Option<ProxyOrigin> {
        self.records.get(instance_id).map(|record| record.origin)
    }

    pub fn contains(&self, instance_id: &InstanceId) -> bool {
        self.records.contains_key(instance_id)
    }

    /// Number of tracked instances.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for ReferenceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReferenceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceTable")
            .field("records", &self.records.len())
            .field("pending_drops", &self.drop_queue.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn objref(id: &str) -> ObjRef {
        ObjRef::new(InstanceId::from(id))
    }

    // -- adoption --

    #[test]
    fn host_created_objects_are_pinned() {
        let mut table = ReferenceTable::new();
        let proxy = table.adopt(&objref("Foo@10000"), ProxyOrigin::HostCreated);
        assert_eq!(
            table.state(proxy.instance_id()),
            Some(ReachabilityState::BothReachable)
        );

        // Even after the caller drops its reference, the pin holds.
        drop(proxy);
        assert_eq!(
            table.state(&InstanceId::from("Foo@10000")),
            Some(ReachabilityState::BothReachable)
        );
        assert!(table.drain_del_requests().is_empty());
    }

    #[test]
    fn kernel_returned_objects_are_weak_only() {
        let mut table = ReferenceTable::new();
        let proxy = table.adopt(&objref("Bar@10001"), ProxyOrigin::KernelReturned);
        assert_eq!(
            table.state(proxy.instance_id()),
            Some(ReachabilityState::KernelOnly)
        );
    }

    #[test]
    fn adopting_a_live_instance_returns_the_same_proxy_and_merges_interfaces() {
        let mut table = ReferenceTable::new();
        let first = table.adopt(
            &ObjRef::with_interfaces(InstanceId::from("Foo@10000"), vec!["IA".into()]),
            ProxyOrigin::KernelReturned,
        );
        let second = table.adopt(
            &ObjRef::with_interfaces(InstanceId::from("Foo@10000"), vec!["IB".into()]),
            ProxyOrigin::KernelReturned,
        );
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(table.len(), 1);
    }

    // -- release --

    #[test]
    fn release_clears_the_strong_reference() {
        let mut table = ReferenceTable::new();
        let proxy = table.adopt(&objref("Foo@10000"), ProxyOrigin::HostCreated);
        let id = proxy.instance_id().clone();

        assert_eq!(table.release(&[id.clone()]), Ok(1));
        assert_eq!(table.state(&id), Some(ReachabilityState::KernelOnly));

        // Releasing again is harmless; nothing left to clear.
        assert_eq!(table.release(&[id]), Ok(0));
        drop(proxy);
    }

    #[test]
    fn release_of_unknown_instance_is_reported_after_applying_the_batch() {
        let mut table = ReferenceTable::new();
        let proxy = table.adopt(&objref("Foo@10000"), ProxyOrigin::HostCreated);
        let known = proxy.instance_id().clone();
        let unknown = InstanceId::from("Ghost@1");

        let err = table
            .release(&[unknown.clone(), known.clone()])
            .expect_err("unknown instance");
        assert_eq!(
            err,
            ReferenceTableError::UnknownInstance {
                instance_id: unknown
            }
        );
        // The known instance was still released.
        assert_eq!(table.state(&known), Some(ReachabilityState::KernelOnly));
        drop(proxy);
    }

    #[test]
    fn apply_notification_is_release_by_frame() {
        let mut table = ReferenceTable::new();
        let proxy = table.adopt(&objref("Foo@10000"), ProxyOrigin::HostCreated);
        let frame = ReleaseNotification {
            release: vec![proxy.instance_id().clone()],
        };
        assert_eq!(table.apply_notification(&frame), Ok(1));
        drop(proxy);
    }

    // -- drain --

    #[test]
    fn dead_unpinned_proxies_drain_into_del_requests() {
        let mut table = ReferenceTable::new();
        let proxy = table.adopt(&objref("Bar@10001"), ProxyOrigin::KernelReturned);
        let id = proxy.instance_id().clone();
        drop(proxy);

        assert_eq!(table.state(&id), Some(ReachabilityState::Unreachable));
        let requests = table.drain_del_requests();
        assert_eq!(requests.len(), 1);
        assert!(matches!(
            &requests[0],
            KernelRequest::Del { objref } if objref.instance_id == id
        ));
        assert!(!table.contains(&id));

        // Nothing queued afterwards.
        assert!(table.drain_del_requests().is_empty());
    }

    #[test]
    fn pinned_instances_never_drain() {
        let mut table = ReferenceTable::new();
        let proxy = table.adopt(&objref("Foo@10000"), ProxyOrigin::HostCreated);
        drop(proxy);

        // The strong reference keeps the proxy alive; its Drop never ran.
        assert!(table.drain_del_requests().is_empty());
        assert_eq!(
            table.state(&InstanceId::from("Foo@10000")),
            Some(ReachabilityState::BothReachable)
        );
    }

    #[test]
    fn release_then_collection_completes_the_lifecycle() {
        let mut table = ReferenceTable::new();
        let proxy = table.adopt(&objref("Foo@10000"), ProxyOrigin::HostCreated);
        let id = proxy.instance_id().clone();

        table.release(&[id.clone()]).expect("release");
        drop(proxy); // host user code lets go; Drop enqueues the ID

        let requests = table.drain_del_requests();
        assert_eq!(requests.len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn revived_instances_are_skipped_by_the_drain() {
        let mut table = ReferenceTable::new();
        let proxy = table.adopt(&objref("Baz@10002"), ProxyOrigin::KernelReturned);
        let id = proxy.instance_id().clone();
        drop(proxy); // enqueued

        // The kernel returns the same object again before the drain runs.
        let revived = table.adopt(&objref("Baz@10002"), ProxyOrigin::KernelReturned);

        assert!(table.drain_del_requests().is_empty());
        assert!(table.contains(&id));
        assert_eq!(table.state(&id), Some(ReachabilityState::KernelOnly));
        drop(revived);
    }

    #[test]
    fn readoption_after_release_does_not_repin() {
        let mut table = ReferenceTable::new();
        let proxy = table.adopt(&objref("Foo@10000"), ProxyOrigin::HostCreated);
        let id = proxy.instance_id().clone();
        table.release(&[id.clone()]).expect("release");

        // The kernel hands the object back; the pin must not come back.
        let again = table.adopt(&objref("Foo@10000"), ProxyOrigin::HostCreated);
        assert!(Rc::ptr_eq(&proxy, &again));
        assert_eq!(table.state(&id), Some(ReachabilityState::KernelOnly));
        drop(again);
        drop(proxy);

        assert_eq!(table.drain_del_requests().len(), 1);
    }

    // -- state table --

    #[test]
    fn state_reflects_the_transition_table() {
        let mut table = ReferenceTable::new();
        assert_eq!(table.state(&InstanceId::from("Foo@10000")), None);

        let proxy = table.adopt(&objref("Foo@10000"), ProxyOrigin::HostCreated);
        let id = proxy.instance_id().clone();
        assert_eq!(table.state(&id), Some(ReachabilityState::BothReachable));

        table.release(&[id.clone()]).expect("release");
        assert_eq!(table.state(&id), Some(ReachabilityState::KernelOnly));

        drop(proxy);
        assert_eq!(table.state(&id), Some(ReachabilityState::Unreachable));
    }

    #[test]
    fn origin_is_recorded() {
        let mut table = ReferenceTable::new();
        let a = table.adopt(&objref("Foo@10000"), ProxyOrigin::HostCreated);
        let b = table.adopt(&objref("Bar@10001"), ProxyOrigin::KernelReturned);
        assert_eq!(
            table.origin(a.instance_id()),
            Some(ProxyOrigin::HostCreated)
        );
        assert_eq!(
            table.origin(b.instance_id()),
            Some(ProxyOrigin::KernelReturned)
        );
    }
}
