//! Simulated DLB device.
//!
//! [`SimDlb`] implements [`CsrAccess`] and [`Platform`] on plain in-memory
//! state. Occupancy counters are scriptable: a [`SimCounter`] can hold a
//! fixed value or drain by a fixed step on every read, which is how tests
//! model traffic that empties over time (or never does).
//!
//! Control words written through a producer port act on the port's CQ
//! counters: a completion retires one inflight event, a token return
//! gives back `lock_id + 1` tokens.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dlb_types::{DeviceLimits, DeviceRevision, MAX_QIDS_PER_LDB_CQ};
use log::debug;
use parking_lot::Mutex;

use crate::api::{
    CsrAccess, DirPortConfig, FreelistPtrs, Hcw, LdbPortConfig, LdbQueueConfig, LdbQueueCounter,
    Platform, PoolConfig, ProducerPort, ProducerPortMapping, ResetTarget, RingPtr, SlotSchedBit,
    WorkScheduler,
};
use crate::error::{HwError, HwResult};
use crate::types::{DirPoolId, DirPortId, DomainId, LdbPoolId, LdbPortId, LdbQueueId};

/// A scriptable hardware counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounter {
    pub value: u32,
    /// Amount subtracted after every read.
    pub decay_per_read: u32,
}

impl SimCounter {
    /// A counter that holds its value until written by the simulator.
    pub const fn fixed(value: u32) -> Self {
        Self {
            value,
            decay_per_read: 0,
        }
    }

    /// A counter that drops by `step` after each read.
    pub const fn draining(value: u32, step: u32) -> Self {
        Self {
            value,
            decay_per_read: step,
        }
    }

    fn read(&mut self) -> u32 {
        let value = self.value;
        self.value = self.value.saturating_sub(self.decay_per_read);
        value
    }
}

/// Programmed state of one CQ mapping slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimSlot {
    pub valid: bool,
    pub qid: u32,
    pub priority: u8,
    pub rlist_has_work: bool,
    pub nalb_has_work: bool,
    pub inflight_ok: bool,
}

#[derive(Debug, Default)]
struct SimLdbQueue {
    counters: [SimCounter; 5],
    inflight_limit: u32,
    write_perm: bool,
    config: Option<LdbQueueConfig>,
}

#[derive(Debug, Default)]
struct SimLdbPort {
    cq_enabled: bool,
    pp_enabled: bool,
    credit_updates: bool,
    interrupts: bool,
    seq_check: bool,
    slots: [SimSlot; MAX_QIDS_PER_LDB_CQ],
    cq_inflight: SimCounter,
    cq_tokens: SimCounter,
    config: Option<LdbPortConfig>,
    hcws: Vec<Hcw>,
}

#[derive(Debug, Default)]
struct SimDirPort {
    cq_enabled: bool,
    pp_enabled: bool,
    credit_updates: bool,
    interrupts: bool,
    write_perm: bool,
    queue_configured: bool,
    depth: SimCounter,
    cq_tokens: SimCounter,
    config: Option<DirPortConfig>,
    hcws: Vec<Hcw>,
}

#[derive(Debug, Default)]
struct SimPool {
    enabled: bool,
    config: Option<PoolConfig>,
    ptrs: FreelistPtrs,
}

impl SimPool {
    fn refill(&mut self) {
        let base = self.config.map(|c| c.freelist_base).unwrap_or(0);
        self.ptrs = FreelistPtrs {
            push: RingPtr::new(base, true),
            pop: RingPtr::new(base, false),
        };
    }
}

fn counter_index(counter: LdbQueueCounter) -> usize {
    match counter {
        LdbQueueCounter::Replay => 0,
        LdbQueueCounter::AqedActive => 1,
        LdbQueueCounter::AtqEnqueue => 2,
        LdbQueueCounter::Enqueue => 3,
        LdbQueueCounter::Inflight => 4,
    }
}

#[derive(Debug, Default)]
struct SimState {
    ldb_queues: Vec<SimLdbQueue>,
    ldb_ports: Vec<SimLdbPort>,
    dir_ports: Vec<SimDirPort>,
    ldb_pools: Vec<SimPool>,
    dir_pools: Vec<SimPool>,
    qid_routing: HashMap<(u32, u32), usize>,
    reset_stuck: bool,
    resets: Vec<ResetTarget>,
    pp_map_failure: bool,
    open_pp_mappings: u32,
    flushes: u64,
    fences: u64,
    delay_us: u64,
    worker_active: bool,
    schedule_requests: u64,
}

impl SimState {
    fn new(limits: &DeviceLimits) -> Self {
        let mut state = Self::default();
        state
            .ldb_queues
            .resize_with(limits.num_ldb_queues as usize, Default::default);
        state
            .ldb_ports
            .resize_with(limits.num_ldb_ports as usize, Default::default);
        state
            .dir_ports
            .resize_with(limits.num_dir_ports as usize, Default::default);
        state
            .ldb_pools
            .resize_with(limits.num_ldb_credit_pools as usize, Default::default);
        state
            .dir_pools
            .resize_with(limits.num_dir_credit_pools as usize, Default::default);
        state
    }

    fn ldb_queue(&mut self, id: LdbQueueId) -> Option<&mut SimLdbQueue> {
        self.ldb_queues.get_mut(id.index())
    }

    fn ldb_port(&mut self, id: LdbPortId) -> Option<&mut SimLdbPort> {
        self.ldb_ports.get_mut(id.index())
    }

    fn dir_port(&mut self, id: DirPortId) -> Option<&mut SimDirPort> {
        self.dir_ports.get_mut(id.index())
    }

    fn ldb_pool(&mut self, id: LdbPoolId) -> Option<&mut SimPool> {
        self.ldb_pools.get_mut(id.index())
    }

    fn dir_pool(&mut self, id: DirPoolId) -> Option<&mut SimPool> {
        self.dir_pools.get_mut(id.index())
    }

    fn slot(&mut self, port: LdbPortId, slot: usize) -> Option<&mut SimSlot> {
        self.ldb_port(port).and_then(|p| p.slots.get_mut(slot))
    }

    fn apply_reset(&mut self, target: ResetTarget) {
        match target {
            ResetTarget::LdbPool(id) => {
                if let Some(pool) = self.ldb_pool(id) {
                    pool.refill();
                }
            }
            ResetTarget::DirPool(id) => {
                if let Some(pool) = self.dir_pool(id) {
                    pool.refill();
                }
            }
            ResetTarget::LdbQueue(id) => {
                if let Some(queue) = self.ldb_queue(id) {
                    queue.counters = Default::default();
                }
            }
            ResetTarget::DirQueue(id) => {
                if let Some(port) = self.dir_port(id) {
                    port.depth = SimCounter::default();
                }
            }
            ResetTarget::LdbCq(id) => {
                if let Some(port) = self.ldb_port(id) {
                    port.cq_inflight = SimCounter::default();
                    port.cq_tokens = SimCounter::default();
                }
            }
            ResetTarget::DirCq(id) => {
                if let Some(port) = self.dir_port(id) {
                    port.cq_tokens = SimCounter::default();
                }
            }
        }
    }
}

/// In-memory DLB device.
pub struct SimDlb {
    revision: DeviceRevision,
    state: Mutex<SimState>,
    scheduler: Option<Arc<dyn WorkScheduler>>,
}

impl fmt::Debug for SimDlb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimDlb")
            .field("revision", &self.revision)
            .field("has_scheduler", &self.scheduler.is_some())
            .finish()
    }
}

impl SimDlb {
    /// Creates a B0 device sized by `limits` with every counter at zero.
    pub fn new(limits: &DeviceLimits) -> Self {
        Self {
            revision: DeviceRevision::default(),
            state: Mutex::new(SimState::new(limits)),
            scheduler: None,
        }
    }

    pub fn with_revision(mut self, revision: DeviceRevision) -> Self {
        self.revision = revision;
        self
    }

    /// Routes `worker_active`/`schedule_work` to an external worker.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn WorkScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    // ========== Scripting ==========

    pub fn set_ldb_queue_counter(
        &self,
        queue: LdbQueueId,
        counter: LdbQueueCounter,
        value: SimCounter,
    ) {
        if let Some(q) = self.state.lock().ldb_queue(queue) {
            q.counters[counter_index(counter)] = value;
        }
    }

    pub fn set_ldb_cq_inflight(&self, port: LdbPortId, value: SimCounter) {
        if let Some(p) = self.state.lock().ldb_port(port) {
            p.cq_inflight = value;
        }
    }

    pub fn set_ldb_cq_tokens(&self, port: LdbPortId, value: SimCounter) {
        if let Some(p) = self.state.lock().ldb_port(port) {
            p.cq_tokens = value;
        }
    }

    pub fn set_dir_queue_depth(&self, port: DirPortId, value: SimCounter) {
        if let Some(p) = self.state.lock().dir_port(port) {
            p.depth = value;
        }
    }

    pub fn set_dir_cq_tokens(&self, port: DirPortId, value: SimCounter) {
        if let Some(p) = self.state.lock().dir_port(port) {
            p.cq_tokens = value;
        }
    }

    pub fn set_ldb_pool_freelist(&self, pool: LdbPoolId, ptrs: FreelistPtrs) {
        if let Some(p) = self.state.lock().ldb_pool(pool) {
            p.ptrs = ptrs;
        }
    }

    pub fn set_dir_pool_freelist(&self, pool: DirPoolId, ptrs: FreelistPtrs) {
        if let Some(p) = self.state.lock().dir_pool(pool) {
            p.ptrs = ptrs;
        }
    }

    /// When set, resource resets never report completion.
    pub fn set_reset_stuck(&self, stuck: bool) {
        self.state.lock().reset_stuck = stuck;
    }

    /// When set, producer-port mapping fails.
    pub fn set_pp_map_failure(&self, fail: bool) {
        self.state.lock().pp_map_failure = fail;
    }

    /// Sets the worker-active flag reported when no scheduler is attached.
    pub fn set_worker_active(&self, active: bool) {
        self.state.lock().worker_active = active;
    }

    // ========== Observation ==========

    pub fn ldb_cq_enabled(&self, port: LdbPortId) -> bool {
        self.state.lock().ldb_port(port).is_some_and(|p| p.cq_enabled)
    }

    pub fn dir_cq_enabled(&self, port: DirPortId) -> bool {
        self.state.lock().dir_port(port).is_some_and(|p| p.cq_enabled)
    }

    pub fn ldb_pp_enabled(&self, port: LdbPortId) -> bool {
        self.state.lock().ldb_port(port).is_some_and(|p| p.pp_enabled)
    }

    pub fn dir_pp_enabled(&self, port: DirPortId) -> bool {
        self.state.lock().dir_port(port).is_some_and(|p| p.pp_enabled)
    }

    pub fn ldb_port_interrupts(&self, port: LdbPortId) -> bool {
        self.state.lock().ldb_port(port).is_some_and(|p| p.interrupts)
    }

    pub fn ldb_queue_write_perm(&self, queue: LdbQueueId) -> bool {
        self.state.lock().ldb_queue(queue).is_some_and(|q| q.write_perm)
    }

    pub fn dir_queue_write_perm(&self, port: DirPortId) -> bool {
        self.state.lock().dir_port(port).is_some_and(|p| p.write_perm)
    }

    pub fn ldb_pool_enabled(&self, pool: LdbPoolId) -> bool {
        self.state.lock().ldb_pool(pool).is_some_and(|p| p.enabled)
    }

    pub fn dir_pool_enabled(&self, pool: DirPoolId) -> bool {
        self.state.lock().dir_pool(pool).is_some_and(|p| p.enabled)
    }

    pub fn ldb_pool_config(&self, pool: LdbPoolId) -> Option<PoolConfig> {
        self.state.lock().ldb_pool(pool).and_then(|p| p.config)
    }

    pub fn dir_pool_config(&self, pool: DirPoolId) -> Option<PoolConfig> {
        self.state.lock().dir_pool(pool).and_then(|p| p.config)
    }

    pub fn ldb_queue_config(&self, queue: LdbQueueId) -> Option<LdbQueueConfig> {
        self.state.lock().ldb_queue(queue).and_then(|q| q.config)
    }

    pub fn ldb_port_config(&self, port: LdbPortId) -> Option<LdbPortConfig> {
        self.state.lock().ldb_port(port).and_then(|p| p.config)
    }

    pub fn ldb_queue_inflight_limit(&self, queue: LdbQueueId) -> u32 {
        self.state
            .lock()
            .ldb_queue(queue)
            .map(|q| q.inflight_limit)
            .unwrap_or(0)
    }

    /// Returns the programmed slot state.
    pub fn cq_slot(&self, port: LdbPortId, slot: usize) -> Option<SimSlot> {
        self.state.lock().slot(port, slot).copied()
    }

    /// Returns the slot index the queue is routed to on the port, if any.
    pub fn qid_routing(&self, queue: LdbQueueId, port: LdbPortId) -> Option<usize> {
        self.state
            .lock()
            .qid_routing
            .get(&(queue.as_raw(), port.as_raw()))
            .copied()
    }

    pub fn ldb_hcws(&self, port: LdbPortId) -> Vec<Hcw> {
        self.state
            .lock()
            .ldb_port(port)
            .map(|p| p.hcws.clone())
            .unwrap_or_default()
    }

    pub fn dir_hcws(&self, port: DirPortId) -> Vec<Hcw> {
        self.state
            .lock()
            .dir_port(port)
            .map(|p| p.hcws.clone())
            .unwrap_or_default()
    }

    pub fn resets(&self) -> Vec<ResetTarget> {
        self.state.lock().resets.clone()
    }

    pub fn schedule_requests(&self) -> u64 {
        self.state.lock().schedule_requests
    }

    pub fn flush_count(&self) -> u64 {
        self.state.lock().flushes
    }

    pub fn fence_count(&self) -> u64 {
        self.state.lock().fences
    }

    pub fn open_pp_mappings(&self) -> u32 {
        self.state.lock().open_pp_mappings
    }

    pub fn total_delay_us(&self) -> u64 {
        self.state.lock().delay_us
    }
}

impl CsrAccess for SimDlb {
    fn flush(&self) {
        self.state.lock().flushes += 1;
    }

    fn set_ldb_cq_enabled(&self, port: LdbPortId, enabled: bool) {
        if let Some(p) = self.state.lock().ldb_port(port) {
            p.cq_enabled = enabled;
        }
    }

    fn set_dir_cq_enabled(&self, port: DirPortId, enabled: bool) {
        if let Some(p) = self.state.lock().dir_port(port) {
            p.cq_enabled = enabled;
        }
    }

    fn ldb_cq_inflight_count(&self, port: LdbPortId) -> u32 {
        self.state
            .lock()
            .ldb_port(port)
            .map(|p| p.cq_inflight.read())
            .unwrap_or(0)
    }

    fn ldb_cq_token_count(&self, port: LdbPortId) -> u32 {
        self.state
            .lock()
            .ldb_port(port)
            .map(|p| p.cq_tokens.read())
            .unwrap_or(0)
    }

    fn dir_cq_token_count(&self, port: DirPortId) -> u32 {
        self.state
            .lock()
            .dir_port(port)
            .map(|p| p.cq_tokens.read())
            .unwrap_or(0)
    }

    fn ldb_queue_counter(&self, queue: LdbQueueId, counter: LdbQueueCounter) -> u32 {
        self.state
            .lock()
            .ldb_queue(queue)
            .map(|q| q.counters[counter_index(counter)].read())
            .unwrap_or(0)
    }

    fn dir_queue_depth(&self, port: DirPortId) -> u32 {
        self.state
            .lock()
            .dir_port(port)
            .map(|p| p.depth.read())
            .unwrap_or(0)
    }

    fn set_ldb_queue_inflight_limit(&self, queue: LdbQueueId, limit: u32) {
        if let Some(q) = self.state.lock().ldb_queue(queue) {
            q.inflight_limit = limit;
        }
    }

    fn configure_ldb_queue(&self, queue: LdbQueueId, config: &LdbQueueConfig) {
        if let Some(q) = self.state.lock().ldb_queue(queue) {
            q.config = Some(*config);
        }
    }

    fn configure_dir_queue(&self, port: DirPortId) {
        if let Some(p) = self.state.lock().dir_port(port) {
            p.queue_configured = true;
        }
    }

    fn set_ldb_queue_write_perm(&self, _domain: DomainId, queue: LdbQueueId, allowed: bool) {
        if let Some(q) = self.state.lock().ldb_queue(queue) {
            q.write_perm = allowed;
        }
    }

    fn set_dir_queue_write_perm(&self, _domain: DomainId, port: DirPortId, allowed: bool) {
        if let Some(p) = self.state.lock().dir_port(port) {
            p.write_perm = allowed;
        }
    }

    fn set_cq_slot(&self, port: LdbPortId, slot: usize, queue: LdbQueueId, priority: u8) {
        if let Some(s) = self.state.lock().slot(port, slot) {
            s.valid = true;
            s.qid = queue.as_raw();
            s.priority = priority;
        }
    }

    fn clear_cq_slot(&self, port: LdbPortId, slot: usize) {
        if let Some(s) = self.state.lock().slot(port, slot) {
            s.valid = false;
        }
    }

    fn set_qid_routing(&self, queue: LdbQueueId, port: LdbPortId, slot: usize, enabled: bool) {
        let mut state = self.state.lock();
        let key = (queue.as_raw(), port.as_raw());
        if enabled {
            state.qid_routing.insert(key, slot);
        } else {
            state.qid_routing.remove(&key);
        }
    }

    fn set_slot_sched_bit(&self, port: LdbPortId, slot: usize, bit: SlotSchedBit, value: bool) {
        if let Some(s) = self.state.lock().slot(port, slot) {
            match bit {
                SlotSchedBit::RlistHasWork => s.rlist_has_work = value,
                SlotSchedBit::NalbHasWork => s.nalb_has_work = value,
                SlotSchedBit::InflightOk => s.inflight_ok = value,
            }
        }
    }

    fn configure_ldb_port(&self, port: LdbPortId, config: &LdbPortConfig) {
        if let Some(p) = self.state.lock().ldb_port(port) {
            p.config = Some(*config);
        }
    }

    fn configure_dir_port(&self, port: DirPortId, config: &DirPortConfig) {
        if let Some(p) = self.state.lock().dir_port(port) {
            p.config = Some(*config);
        }
    }

    fn set_ldb_pp_enabled(&self, port: LdbPortId, enabled: bool) {
        if let Some(p) = self.state.lock().ldb_port(port) {
            p.pp_enabled = enabled;
        }
    }

    fn set_dir_pp_enabled(&self, port: DirPortId, enabled: bool) {
        if let Some(p) = self.state.lock().dir_port(port) {
            p.pp_enabled = enabled;
        }
    }

    fn set_ldb_pp_credit_updates(&self, port: LdbPortId, enabled: bool) {
        if let Some(p) = self.state.lock().ldb_port(port) {
            p.credit_updates = enabled;
        }
    }

    fn set_dir_pp_credit_updates(&self, port: DirPortId, enabled: bool) {
        if let Some(p) = self.state.lock().dir_port(port) {
            p.credit_updates = enabled;
        }
    }

    fn set_ldb_cq_interrupts(&self, port: LdbPortId, enabled: bool) {
        if let Some(p) = self.state.lock().ldb_port(port) {
            p.interrupts = enabled;
        }
    }

    fn set_dir_cq_interrupts(&self, port: DirPortId, enabled: bool) {
        if let Some(p) = self.state.lock().dir_port(port) {
            p.interrupts = enabled;
        }
    }

    fn set_ldb_seq_check(&self, port: LdbPortId, enabled: bool) {
        if let Some(p) = self.state.lock().ldb_port(port) {
            p.seq_check = enabled;
        }
    }

    fn configure_ldb_pool(&self, pool: LdbPoolId, config: &PoolConfig) {
        if let Some(p) = self.state.lock().ldb_pool(pool) {
            p.config = Some(*config);
            p.ptrs = FreelistPtrs {
                push: config.push,
                pop: config.pop,
            };
        }
    }

    fn configure_dir_pool(&self, pool: DirPoolId, config: &PoolConfig) {
        if let Some(p) = self.state.lock().dir_pool(pool) {
            p.config = Some(*config);
            p.ptrs = FreelistPtrs {
                push: config.push,
                pop: config.pop,
            };
        }
    }

    fn set_ldb_pool_enabled(&self, pool: LdbPoolId, enabled: bool) {
        if let Some(p) = self.state.lock().ldb_pool(pool) {
            p.enabled = enabled;
        }
    }

    fn set_dir_pool_enabled(&self, pool: DirPoolId, enabled: bool) {
        if let Some(p) = self.state.lock().dir_pool(pool) {
            p.enabled = enabled;
        }
    }

    fn ldb_pool_freelist(&self, pool: LdbPoolId) -> FreelistPtrs {
        self.state
            .lock()
            .ldb_pool(pool)
            .map(|p| p.ptrs)
            .unwrap_or_default()
    }

    fn dir_pool_freelist(&self, pool: DirPoolId) -> FreelistPtrs {
        self.state
            .lock()
            .dir_pool(pool)
            .map(|p| p.ptrs)
            .unwrap_or_default()
    }

    fn start_resource_reset(&self, target: ResetTarget) {
        let mut state = self.state.lock();
        state.resets.push(target);
        if !state.reset_stuck {
            debug!("sim: reset {}", target);
            state.apply_reset(target);
        }
    }

    fn resource_reset_done(&self) -> bool {
        !self.state.lock().reset_stuck
    }

    fn reset_ldb_queue_registers(&self, queue: LdbQueueId) {
        if let Some(q) = self.state.lock().ldb_queue(queue) {
            let counters = q.counters;
            *q = SimLdbQueue {
                counters,
                ..Default::default()
            };
        }
    }

    fn reset_dir_queue_registers(&self, port: DirPortId) {
        if let Some(p) = self.state.lock().dir_port(port) {
            p.write_perm = false;
            p.queue_configured = false;
        }
    }

    fn reset_dir_port_registers(&self, port: DirPortId) {
        if let Some(p) = self.state.lock().dir_port(port) {
            let (depth, cq_tokens, hcws) = (p.depth, p.cq_tokens, std::mem::take(&mut p.hcws));
            *p = SimDirPort {
                depth,
                cq_tokens,
                hcws,
                ..Default::default()
            };
        }
    }

    fn reset_ldb_port_registers(&self, port: LdbPortId) {
        let mut state = self.state.lock();
        let raw = port.as_raw();
        state.qid_routing.retain(|&(_, p), _| p != raw);
        if let Some(p) = state.ldb_port(port) {
            let (cq_inflight, cq_tokens, hcws) =
                (p.cq_inflight, p.cq_tokens, std::mem::take(&mut p.hcws));
            *p = SimLdbPort {
                cq_inflight,
                cq_tokens,
                hcws,
                ..Default::default()
            };
        }
    }

    fn reset_ldb_pool_registers(&self, pool: LdbPoolId) {
        if let Some(p) = self.state.lock().ldb_pool(pool) {
            *p = SimPool::default();
        }
    }

    fn reset_dir_pool_registers(&self, pool: DirPoolId) {
        if let Some(p) = self.state.lock().dir_pool(pool) {
            *p = SimPool::default();
        }
    }
}

impl Platform for SimDlb {
    fn udelay(&self, us: u32) {
        self.state.lock().delay_us += u64::from(us);
    }

    fn device_revision(&self) -> DeviceRevision {
        self.revision
    }

    fn map_producer_port(&self, port: ProducerPort) -> HwResult<ProducerPortMapping> {
        let mut state = self.state.lock();
        if state.pp_map_failure {
            return Err(HwError::producer_port_map(port.to_string()));
        }
        state.open_pp_mappings += 1;
        let addr = match port {
            ProducerPort::Ldb(id) => 0x1000_0000 + u64::from(id.as_raw()) * 0x1000,
            ProducerPort::Dir(id) => 0x2000_0000 + u64::from(id.as_raw()) * 0x1000,
        };
        Ok(ProducerPortMapping { port, addr })
    }

    fn unmap_producer_port(&self, _mapping: ProducerPortMapping) {
        let mut state = self.state.lock();
        state.open_pp_mappings = state.open_pp_mappings.saturating_sub(1);
    }

    fn movdir64b(&self, mapping: &ProducerPortMapping, hcws: &[Hcw; 4]) {
        let mut state = self.state.lock();
        match mapping.port {
            ProducerPort::Ldb(id) => {
                if let Some(p) = state.ldb_port(id) {
                    for hcw in hcws.iter().filter(|h| !h.is_noop()) {
                        if hcw.qe_comp {
                            p.cq_inflight.value = p.cq_inflight.value.saturating_sub(1);
                        }
                        p.cq_tokens.value = p.cq_tokens.value.saturating_sub(hcw.tokens_returned());
                        p.hcws.push(*hcw);
                    }
                }
            }
            ProducerPort::Dir(id) => {
                if let Some(p) = state.dir_port(id) {
                    for hcw in hcws.iter().filter(|h| !h.is_noop()) {
                        p.cq_tokens.value = p.cq_tokens.value.saturating_sub(hcw.tokens_returned());
                        p.hcws.push(*hcw);
                    }
                }
            }
        }
    }

    fn fence_hcw(&self, _mapping: &ProducerPortMapping) {
        self.state.lock().fences += 1;
    }

    fn worker_active(&self) -> bool {
        match &self.scheduler {
            Some(scheduler) => scheduler.is_active(),
            None => self.state.lock().worker_active,
        }
    }

    fn schedule_work(&self) {
        self.state.lock().schedule_requests += 1;
        if let Some(scheduler) = &self.scheduler {
            scheduler.schedule();
        }
    }
}
