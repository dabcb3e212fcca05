//! Hardware inventory sizes.

use crate::ParseError;
use serde::{Deserialize, Serialize};

/// Scheduling domains per device.
pub const MAX_NUM_DOMAINS: u32 = 32;
/// Load-balanced queues per device.
pub const MAX_NUM_LDB_QUEUES: u32 = 128;
/// Load-balanced ports per device.
pub const MAX_NUM_LDB_PORTS: u32 = 64;
/// Directed port/queue pairs per device.
pub const MAX_NUM_DIR_PORTS: u32 = 128;
pub const MAX_NUM_LDB_CREDIT_POOLS: u32 = 64;
pub const MAX_NUM_DIR_CREDIT_POOLS: u32 = 64;
/// Load-balanced (QED) credit entries.
pub const MAX_NUM_LDB_CREDITS: u32 = 16384;
/// Directed (DQED) credit entries.
pub const MAX_NUM_DIR_CREDITS: u32 = 4096;
pub const MAX_NUM_HIST_LIST_ENTRIES: u32 = 5120;
/// Atomic-inflight (AQED) entries.
pub const MAX_NUM_AQED_ENTRIES: u32 = 2048;
pub const MAX_NUM_SEQUENCE_NUMBER_GROUPS: u32 = 4;

/// Mapping slots per load-balanced consumer queue.
pub const MAX_QIDS_PER_LDB_CQ: usize = 8;
/// Number of QID priority levels a slot can carry.
pub const NUM_QID_PRIORITIES: u8 = 8;

/// Sequence numbers available in one sequence-number group.
pub const MAX_LDB_SN_ALLOC: u32 = 1024;
/// Default sequence numbers per queue for every group after init.
pub const DEFAULT_SN_PER_QUEUE: u32 = 32;

pub const MAX_QID_INFLIGHTS: u32 = 4096;
pub const MAX_CQ_DEPTH: u32 = 1024;

/// Inventory sizes for one device instance.
///
/// Defaults to the hardware maxima. Smaller values describe a partial
/// or simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceLimits {
    pub num_domains: u32,
    pub num_ldb_queues: u32,
    pub num_ldb_ports: u32,
    pub num_dir_ports: u32,
    pub num_ldb_credit_pools: u32,
    pub num_dir_credit_pools: u32,
    pub num_ldb_credits: u32,
    pub num_dir_credits: u32,
    pub num_hist_list_entries: u32,
    pub num_atomic_inflights: u32,
    pub num_sn_groups: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            num_domains: MAX_NUM_DOMAINS,
            num_ldb_queues: MAX_NUM_LDB_QUEUES,
            num_ldb_ports: MAX_NUM_LDB_PORTS,
            num_dir_ports: MAX_NUM_DIR_PORTS,
            num_ldb_credit_pools: MAX_NUM_LDB_CREDIT_POOLS,
            num_dir_credit_pools: MAX_NUM_DIR_CREDIT_POOLS,
            num_ldb_credits: MAX_NUM_LDB_CREDITS,
            num_dir_credits: MAX_NUM_DIR_CREDITS,
            num_hist_list_entries: MAX_NUM_HIST_LIST_ENTRIES,
            num_atomic_inflights: MAX_NUM_AQED_ENTRIES,
            num_sn_groups: MAX_NUM_SEQUENCE_NUMBER_GROUPS,
        }
    }
}

impl DeviceLimits {
    /// Checks every count against the hardware maximum.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidLimit`] naming the first offending field,
    /// or when the device would have no scheduling domains.
    pub fn validate(&self) -> Result<(), ParseError> {
        let checks = [
            ("num_domains", self.num_domains, MAX_NUM_DOMAINS),
            ("num_ldb_queues", self.num_ldb_queues, MAX_NUM_LDB_QUEUES),
            ("num_ldb_ports", self.num_ldb_ports, MAX_NUM_LDB_PORTS),
            ("num_dir_ports", self.num_dir_ports, MAX_NUM_DIR_PORTS),
            (
                "num_ldb_credit_pools",
                self.num_ldb_credit_pools,
                MAX_NUM_LDB_CREDIT_POOLS,
            ),
            (
                "num_dir_credit_pools",
                self.num_dir_credit_pools,
                MAX_NUM_DIR_CREDIT_POOLS,
            ),
            ("num_ldb_credits", self.num_ldb_credits, MAX_NUM_LDB_CREDITS),
            ("num_dir_credits", self.num_dir_credits, MAX_NUM_DIR_CREDITS),
            (
                "num_hist_list_entries",
                self.num_hist_list_entries,
                MAX_NUM_HIST_LIST_ENTRIES,
            ),
            (
                "num_atomic_inflights",
                self.num_atomic_inflights,
                MAX_NUM_AQED_ENTRIES,
            ),
            (
                "num_sn_groups",
                self.num_sn_groups,
                MAX_NUM_SEQUENCE_NUMBER_GROUPS,
            ),
        ];

        for (name, value, max) in checks {
            if value > max {
                return Err(ParseError::InvalidLimit(format!(
                    "{} = {} exceeds hardware maximum {}",
                    name, value, max
                )));
            }
        }

        if self.num_domains == 0 {
            return Err(ParseError::InvalidLimit(
                "num_domains must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Returns the order in which load-balanced port ids are placed on the
/// function's available list.
///
/// Ports are visited with a stride close to half the port count, so that
/// ports handed out back-to-back are physically far apart. For the full
/// 64-port device this yields `0, 31, 62, 29, 60, 27, ...`.
pub fn ldb_port_allocation_order(num_ports: u32) -> Vec<u32> {
    if num_ports == 0 {
        return Vec::new();
    }

    let mut stride = (num_ports / 2).saturating_sub(1).max(1);
    while gcd(stride, num_ports) != 1 {
        stride += 1;
    }

    (0..num_ports)
        .map(|i| ((u64::from(i) * u64::from(stride)) % u64::from(num_ports)) as u32)
        .collect()
}
