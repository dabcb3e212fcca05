//! Request arguments and the resource snapshot.

use serde::{Deserialize, Serialize};

/// Requested resource counts for a new scheduling domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSchedDomainArgs {
    pub num_ldb_queues: u32,
    pub num_ldb_ports: u32,
    pub num_dir_ports: u32,
    pub num_atomic_inflights: u32,
    pub num_hist_list_entries: u32,
    pub num_ldb_credits: u32,
    pub num_dir_credits: u32,
    pub num_ldb_credit_pools: u32,
    pub num_dir_credit_pools: u32,
}

impl CreateSchedDomainArgs {
    /// Total ports (load-balanced plus directed) this request asks for.
    pub fn num_ports(&self) -> u32 {
        self.num_ldb_ports + self.num_dir_ports
    }
}

/// Arguments for configuring one load-balanced queue inside a domain.
///
/// `num_sequence_numbers == 0` creates an unordered queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateLdbQueueArgs {
    pub num_sequence_numbers: u32,
    pub num_qid_inflights: u32,
    pub num_atomic_inflights: u32,
}

/// Arguments for configuring one load-balanced port inside a domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateLdbPortArgs {
    pub ldb_credit_pool_id: u32,
    pub dir_credit_pool_id: u32,
    pub cq_depth: u32,
    pub cq_history_list_size: u32,
}

/// Arguments for configuring the port half of a directed pair.
///
/// When `queue_id` is set, the port joins an already-configured directed
/// queue instead of taking a fresh pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateDirPortArgs {
    pub ldb_credit_pool_id: u32,
    pub dir_credit_pool_id: u32,
    pub cq_depth: u32,
    pub queue_id: Option<u32>,
}

/// Snapshot of the function-level available resources.
///
/// `max_contiguous_*` fields report the longest free run of the
/// corresponding freelist, which bounds what one domain can receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumResources {
    pub num_sched_domains: u32,
    pub num_ldb_queues: u32,
    pub num_ldb_ports: u32,
    pub num_dir_ports: u32,
    pub num_atomic_inflights: u32,
    pub max_contiguous_atomic_inflights: u32,
    pub num_hist_list_entries: u32,
    pub max_contiguous_hist_list_entries: u32,
    pub num_ldb_credits: u32,
    pub max_contiguous_ldb_credits: u32,
    pub num_dir_credits: u32,
    pub max_contiguous_dir_credits: u32,
    pub num_ldb_credit_pools: u32,
    pub num_dir_credit_pools: u32,
}
