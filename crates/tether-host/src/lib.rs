#![forbid(unsafe_code)]

//! Host-side half of the tether reference protocol.
//!
//! The host mirrors a subset of the kernel's object registry: for every
//! managed object it knows, it tracks a weak reference to the host proxy,
//! plus (only for objects the host itself created) a conditional strong
//! reference that is dropped when the kernel sends a `release`
//! notification. Host proxies collected by the host runtime drain into
//! `del` requests, closing the distributed collection loop.

pub mod reference_table;
