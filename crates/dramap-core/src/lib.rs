//! # dramap-core
//!
//! `dramap-core` reverse-engineers the address-mapping function of a
//! commercial DRAM memory controller from user space. It issues carefully
//! timed memory accesses and observes microarchitectural side channels
//! (row-buffer-conflict latency, refresh-interval signatures, consecutive
//! read-read latency) to recover:
//!
//! - the linear bit-functions over the physical address that index a bank,
//! - masks identifying row and column bits, and
//! - a decomposition of the bank functions into rank / bank-group /
//!   bank-address components.
//!
//! ## Main components
//!
//! - [`Addressing`] - the discovery engine, owning the memory pool and
//!   running the fixed pipeline from same-bank clustering to function
//!   decomposition.
//! - [`memory`] module - the 1 GiB-hugepage pool and pagemap-based
//!   virtual/physical translation.
//! - [`oracle`] module - the timing oracles, all built from the same
//!   flush / fence / timestamp measurement skeleton.
//! - [`util`] module - GF(2) bit utilities, histograms, thresholds.
//!
//! ## Platform requirements
//!
//! x86_64 Linux, root privileges (`/proc/self/pagemap`), pre-reserved
//! 1 GiB hugepages, and a dedicated core: timing is the primary signal, so
//! the whole engine is single-threaded and expects to be pinned (e.g.
//! `numactl -C <core> -m <node>`) by the driver.

#![warn(missing_docs)]

#[cfg(not(target_arch = "x86_64"))]
compile_error!("dramap-core requires x86_64 (clflush/rdtscp timing primitives)");

pub mod addressing;
pub mod config;
pub mod memory;
pub mod oracle;
pub mod sink;
mod timing;
pub mod util;

pub use crate::addressing::{Addressing, AddressingConfig, Constraints, EnvironmentError};
pub use crate::config::{DdrType, DramConfig, MemoryConfig, Platform, PoolConfig};
pub use crate::memory::{AddrTuple, MemoryPool};
