//! Resource manager for the DLB load-balancing event device.
//!
//! This crate owns the bookkeeping for every hardware object of one DLB
//! device: scheduling domains, load-balanced queues and ports, directed
//! queue/port pairs, credit pools, the contiguous credit, history-list and
//! atomic-inflight ranges, and sequence-number groups. Register access goes
//! through the [`dlb_hw::DlbHw`] traits so the manager runs unchanged
//! against real hardware or [`dlb_hw::sim::SimDlb`].
//!
//! # Responsibilities
//!
//! - Create a scheduling domain with exactly the requested resources, or
//!   reject it with a [`dlb_types::DlbStatus`] and no side effects
//! - Configure pools, queues and ports out of a domain's attached resources
//! - Bind queues to port slots, deferring the work while traffic drains
//! - Quiesce and reset a domain, returning everything to the device
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `registry` | Arena entries, ownership lists and ranges |
//! | `attach` | Domain attach with rollback, and detach |
//! | `mapping` | Per-slot state machine and deferred map/unmap |
//! | `drain` | CQ and queue drains, hardware reset polling |
//! | `domain` | Public domain lifecycle operations |
//! | `worker` | Background sweep of deferred procedures |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dlb_hw::sim::SimDlb;
//! use dlb_resource::{DlbResourceMgr, ResourceMgrConfig};
//!
//! let config = ResourceMgrConfig::default();
//! let mut mgr = DlbResourceMgr::new(config.clone(), Arc::new(SimDlb::new(&config.limits)))?;
//! let domain = mgr.create_sched_domain(&args)?;
//! mgr.reset_domain(domain)?;
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod mapping;
pub mod registry;

mod attach;
mod domain;
mod drain;
mod mgr;
mod worker;

#[cfg(test)]
mod testing;

pub use config::{PortCapPolicy, ResourceMgrConfig};
pub use error::{ResourceError, Result};
pub use mapping::{MapOutcome, SlotState};
pub use mgr::{DlbResourceMgr, ResourceMgrStats};
pub use worker::SweepWorker;
