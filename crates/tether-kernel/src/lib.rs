#![forbid(unsafe_code)]

//! Kernel-side object store for the tether cross-runtime RPC kernel.
//!
//! Programs in a host runtime invoke, subclass, and hold references to
//! objects whose behavior lives in this kernel process. Each side has its
//! own garbage collector, so a single logical object is kept alive by a
//! weak-reference/finalization handshake: the kernel pins the real referent
//! while its handle exists, watches the user-visible proxy weakly, and
//! announces collected proxies to the host as `release` notifications. The
//! host answers with `del` requests once its own side is unreachable too.
//!
//! The crate is single-threaded by design: the event loop in
//! [`event_loop`] is cooperative, and all store mutation happens between
//! its suspension points.

pub mod error;
pub mod event_loop;
pub mod handle;
pub mod instance_id;
pub mod objref;
pub mod protocol;
pub mod proxy;
pub mod store;
pub mod type_system;
