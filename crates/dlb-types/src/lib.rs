//! Common DLB types shared by the hardware layer and the resource manager.
//!
//! This crate provides plain, dependency-light representations of the
//! values that cross the resource manager's public surface:
//!
//! - [`DeviceLimits`]: hardware inventory sizes for one device instance
//! - [`DeviceRevision`]: silicon stepping, used by the port-cap policy
//! - [`DlbStatus`]: user-facing status codes for rejected requests
//! - [`CreateSchedDomainArgs`] and friends: request arguments
//! - [`NumResources`]: the available-resource snapshot

mod limits;
mod request;
mod revision;
mod status;

pub use limits::{
    ldb_port_allocation_order, DeviceLimits, DEFAULT_SN_PER_QUEUE, MAX_CQ_DEPTH,
    MAX_LDB_SN_ALLOC, MAX_NUM_AQED_ENTRIES, MAX_NUM_DIR_CREDITS, MAX_NUM_DIR_CREDIT_POOLS,
    MAX_NUM_DIR_PORTS, MAX_NUM_DOMAINS, MAX_NUM_HIST_LIST_ENTRIES, MAX_NUM_LDB_CREDITS,
    MAX_NUM_LDB_CREDIT_POOLS, MAX_NUM_LDB_PORTS, MAX_NUM_LDB_QUEUES,
    MAX_NUM_SEQUENCE_NUMBER_GROUPS, MAX_QIDS_PER_LDB_CQ, MAX_QID_INFLIGHTS, NUM_QID_PRIORITIES,
};
pub use request::{
    CreateDirPortArgs, CreateLdbPortArgs, CreateLdbQueueArgs, CreateSchedDomainArgs, NumResources,
};
pub use revision::DeviceRevision;
pub use status::DlbStatus;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid device revision: {0}")]
    InvalidRevision(String),

    #[error("invalid status name: {0}")]
    InvalidStatus(String),

    #[error("invalid device limit: {0}")]
    InvalidLimit(String),
}
