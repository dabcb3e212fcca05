//! Register operations.

use std::fmt;

use crate::types::{DirPoolId, DirPortId, DomainId, LdbPoolId, LdbPortId, LdbQueueId, SnGroupId};

/// Value the QID inflight-limit register takes out of reset. Writing it
/// stops the scheduler from handing out new events for the queue.
pub const QID_INFLIGHT_LIMIT_RESET: u32 = 0;

/// Per-queue hardware occupancy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LdbQueueCounter {
    /// Events waiting in the replay list.
    Replay,
    /// Atomic flows with events scheduled.
    AqedActive,
    /// Atomic enqueues not yet scheduled.
    AtqEnqueue,
    /// Non-atomic enqueues not yet scheduled.
    Enqueue,
    /// Events scheduled to a CQ and not yet completed.
    Inflight,
}

impl LdbQueueCounter {
    pub const ALL: [LdbQueueCounter; 5] = [
        LdbQueueCounter::Replay,
        LdbQueueCounter::AqedActive,
        LdbQueueCounter::AtqEnqueue,
        LdbQueueCounter::Enqueue,
        LdbQueueCounter::Inflight,
    ];
}

/// Per-slot scheduler control bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotSchedBit {
    RlistHasWork,
    NalbHasWork,
    InflightOk,
}

/// A freelist ring pointer with its wrap generation bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingPtr {
    pub ptr: u32,
    pub generation: bool,
}

impl RingPtr {
    pub const fn new(ptr: u32, generation: bool) -> Self {
        Self { ptr, generation }
    }
}

/// Push and pop pointers of a credit pool freelist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreelistPtrs {
    pub push: RingPtr,
    pub pop: RingPtr,
}

impl FreelistPtrs {
    /// A ring is full when both pointers meet with opposite generations,
    /// i.e. every credit has been returned to the pool.
    pub fn is_full(&self) -> bool {
        self.push.ptr == self.pop.ptr && self.push.generation != self.pop.generation
    }
}

/// Credit pool programming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub credits: u32,
    pub freelist_base: u32,
    pub freelist_limit: u32,
    pub push: RingPtr,
    pub pop: RingPtr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdbQueueConfig {
    pub num_qid_inflights: u32,
    pub aqed_base: u32,
    pub aqed_limit: u32,
    /// Sequence-number group and slot for ordered queues.
    pub sn: Option<(SnGroupId, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdbPortConfig {
    pub ldb_pool: LdbPoolId,
    pub dir_pool: DirPoolId,
    pub cq_depth: u32,
    pub hist_list_base: u32,
    pub hist_list_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirPortConfig {
    pub ldb_pool: LdbPoolId,
    pub dir_pool: DirPoolId,
    pub cq_depth: u32,
}

/// A hardware object that can be reset through the reset-control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetTarget {
    LdbPool(LdbPoolId),
    DirPool(DirPoolId),
    LdbQueue(LdbQueueId),
    DirQueue(DirPortId),
    LdbCq(LdbPortId),
    DirCq(DirPortId),
}

impl fmt::Display for ResetTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetTarget::LdbPool(id) => write!(f, "{}", id),
            ResetTarget::DirPool(id) => write!(f, "{}", id),
            ResetTarget::LdbQueue(id) => write!(f, "{}", id),
            ResetTarget::DirQueue(id) => write!(f, "dir queue {}", id.as_raw()),
            ResetTarget::LdbCq(id) => write!(f, "ldb cq {}", id.as_raw()),
            ResetTarget::DirCq(id) => write!(f, "dir cq {}", id.as_raw()),
        }
    }
}

/// Semantically named register access for one device.
///
/// Writes are posted; call [`CsrAccess::flush`] where ordering against a
/// following read matters.
pub trait CsrAccess: Send + Sync {
    /// Forces posted writes to reach the device.
    fn flush(&self);

    // ========== Consumer queues ==========

    fn set_ldb_cq_enabled(&self, port: LdbPortId, enabled: bool);
    fn set_dir_cq_enabled(&self, port: DirPortId, enabled: bool);
    fn ldb_cq_inflight_count(&self, port: LdbPortId) -> u32;
    fn ldb_cq_token_count(&self, port: LdbPortId) -> u32;
    fn dir_cq_token_count(&self, port: DirPortId) -> u32;

    // ========== Queues ==========

    fn ldb_queue_counter(&self, queue: LdbQueueId, counter: LdbQueueCounter) -> u32;
    fn dir_queue_depth(&self, port: DirPortId) -> u32;
    fn set_ldb_queue_inflight_limit(&self, queue: LdbQueueId, limit: u32);
    fn configure_ldb_queue(&self, queue: LdbQueueId, config: &LdbQueueConfig);
    fn configure_dir_queue(&self, port: DirPortId);
    fn set_ldb_queue_write_perm(&self, domain: DomainId, queue: LdbQueueId, allowed: bool);
    fn set_dir_queue_write_perm(&self, domain: DomainId, port: DirPortId, allowed: bool);

    // ========== QID to CQ slot routing ==========

    /// Programs a slot's valid bit, priority and QID.
    fn set_cq_slot(&self, port: LdbPortId, slot: usize, queue: LdbQueueId, priority: u8);
    /// Clears a slot's valid bit.
    fn clear_cq_slot(&self, port: LdbPortId, slot: usize);
    /// Programs (or clears) the queue-to-CQ index routing tables.
    fn set_qid_routing(&self, queue: LdbQueueId, port: LdbPortId, slot: usize, enabled: bool);
    fn set_slot_sched_bit(&self, port: LdbPortId, slot: usize, bit: SlotSchedBit, value: bool);

    // ========== Ports ==========

    fn configure_ldb_port(&self, port: LdbPortId, config: &LdbPortConfig);
    fn configure_dir_port(&self, port: DirPortId, config: &DirPortConfig);
    fn set_ldb_pp_enabled(&self, port: LdbPortId, enabled: bool);
    fn set_dir_pp_enabled(&self, port: DirPortId, enabled: bool);
    fn set_ldb_pp_credit_updates(&self, port: LdbPortId, enabled: bool);
    fn set_dir_pp_credit_updates(&self, port: DirPortId, enabled: bool);
    fn set_ldb_cq_interrupts(&self, port: LdbPortId, enabled: bool);
    fn set_dir_cq_interrupts(&self, port: DirPortId, enabled: bool);
    fn set_ldb_seq_check(&self, port: LdbPortId, enabled: bool);

    // ========== Credit pools ==========

    fn configure_ldb_pool(&self, pool: LdbPoolId, config: &PoolConfig);
    fn configure_dir_pool(&self, pool: DirPoolId, config: &PoolConfig);
    fn set_ldb_pool_enabled(&self, pool: LdbPoolId, enabled: bool);
    fn set_dir_pool_enabled(&self, pool: DirPoolId, enabled: bool);
    fn ldb_pool_freelist(&self, pool: LdbPoolId) -> FreelistPtrs;
    fn dir_pool_freelist(&self, pool: DirPoolId) -> FreelistPtrs;

    // ========== Reset ==========

    /// Starts the hardware reset of one resource.
    fn start_resource_reset(&self, target: ResetTarget);
    /// Returns true once the last started reset has completed.
    fn resource_reset_done(&self) -> bool;
    fn reset_ldb_queue_registers(&self, queue: LdbQueueId);
    fn reset_dir_queue_registers(&self, port: DirPortId);
    fn reset_dir_port_registers(&self, port: DirPortId);
    fn reset_ldb_port_registers(&self, port: LdbPortId);
    fn reset_ldb_pool_registers(&self, pool: LdbPoolId);
    fn reset_dir_pool_registers(&self, pool: DirPoolId);
}
