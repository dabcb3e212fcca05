//! Slot programming and the deferred map/unmap procedures.

use dlb_hw::{
    CsrAccess, DomainId, LdbPortId, LdbQueueCounter, LdbQueueId, Platform, SlotSchedBit,
    QID_INFLIGHT_LIMIT_RESET,
};
use dlb_types::MAX_QIDS_PER_LDB_CQ;
use log::{debug, error, info};

use super::state::{apply_delta, SlotState};
use crate::error::{ResourceError, Result};
use crate::mgr::DlbResourceMgr;

/// Whether a map or unmap request finished immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    Complete,
    /// Left in progress; a later sweep finishes it.
    Pending,
}

impl MapOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, MapOutcome::Pending)
    }
}

impl DlbResourceMgr {
    // ========== CQ control ==========

    /// Enables a load-balanced CQ unless removals are still pending on it.
    pub(crate) fn ldb_port_cq_enable(&self, port: LdbPortId) {
        if self.ldb_ports[port.index()].num_pending_removals > 0 {
            return;
        }
        self.hw.set_ldb_cq_enabled(port, true);
        self.hw.flush();
    }

    pub(crate) fn ldb_port_cq_disable(&self, port: LdbPortId) {
        self.hw.set_ldb_cq_enabled(port, false);
        self.hw.flush();
    }

    /// Used ports of `domain` with a `MAPPED` slot for `queue`.
    fn queue_mapped_ports(&self, domain: DomainId, queue: LdbQueueId) -> Vec<(LdbPortId, usize)> {
        self.domains[domain.index()]
            .used
            .ldb_ports
            .iter()
            .filter_map(|port| {
                self.ldb_ports[port.index()]
                    .find_slot_queue(SlotState::Mapped, queue)
                    .map(|slot| (port, slot))
            })
            .collect()
    }

    fn disable_mapped_cqs(&self, domain: DomainId, queue: LdbQueueId) {
        for (port, _) in self.queue_mapped_ports(domain, queue) {
            if self.ldb_ports[port.index()].enabled {
                self.ldb_port_cq_disable(port);
            }
        }
    }

    fn enable_mapped_cqs(&self, domain: DomainId, queue: LdbQueueId) {
        for (port, _) in self.queue_mapped_ports(domain, queue) {
            if self.ldb_ports[port.index()].enabled {
                self.ldb_port_cq_enable(port);
            }
        }
    }

    /// Launches the completion worker if it is not already running.
    pub(crate) fn ensure_worker(&self) {
        if !self.hw.worker_active() {
            debug!("scheduling completion worker");
            self.hw.schedule_work();
        }
    }

    // ========== Slot scheduler bits ==========

    fn set_has_work_bits(&self, port: LdbPortId, queue: LdbQueueId, slot: usize) {
        let rlist = self.hw.ldb_queue_counter(queue, LdbQueueCounter::AqedActive) > 0;
        let nalb = self.hw.ldb_queue_counter(queue, LdbQueueCounter::Enqueue) > 0;
        self.hw
            .set_slot_sched_bit(port, slot, SlotSchedBit::RlistHasWork, rlist);
        self.hw
            .set_slot_sched_bit(port, slot, SlotSchedBit::NalbHasWork, nalb);
    }

    fn clear_has_work_bits(&self, port: LdbPortId, slot: usize) {
        self.hw
            .set_slot_sched_bit(port, slot, SlotSchedBit::RlistHasWork, false);
        self.hw
            .set_slot_sched_bit(port, slot, SlotSchedBit::NalbHasWork, false);
    }

    fn set_queue_if_status(&self, port: LdbPortId, slot: usize) {
        self.hw
            .set_slot_sched_bit(port, slot, SlotSchedBit::InflightOk, true);
    }

    fn clear_queue_if_status(&self, port: LdbPortId, slot: usize) {
        self.hw
            .set_slot_sched_bit(port, slot, SlotSchedBit::InflightOk, false);
    }

    pub(crate) fn set_inflight_limit(&self, queue: LdbQueueId) {
        let limit = self.ldb_queues[queue.index()].num_qid_inflights;
        self.hw.set_ldb_queue_inflight_limit(queue, limit);
    }

    pub(crate) fn clear_inflight_limit(&self, queue: LdbQueueId) {
        self.hw
            .set_ldb_queue_inflight_limit(queue, QID_INFLIGHT_LIMIT_RESET);
    }

    // ========== Slot transitions ==========

    /// Moves one slot to `new_state`, applying the transition's counter
    /// effects to the queue, the port and the owning domain.
    pub(crate) fn slot_state_transition(
        &mut self,
        port: LdbPortId,
        queue: LdbQueueId,
        slot: usize,
        new_state: SlotState,
    ) -> Result<()> {
        const OP: &str = "slot_state_transition";

        let domain = self.owning_domain(port, OP)?;
        let cur = self.ldb_ports[port.index()].slots[slot].state;
        let effect = cur.transition_effect(new_state).ok_or_else(|| {
            ResourceError::fault(
                OP,
                format!(
                    "invalid transition {} -> {} ({}, {}, slot {})",
                    cur, new_state, queue, port, slot
                ),
            )
        })?;

        let q = &self.ldb_queues[queue.index()];
        let p = &self.ldb_ports[port.index()];
        let d = &self.domains[domain.index()];
        let updated = (
            apply_delta(q.num_mappings, effect.mappings),
            apply_delta(p.num_mappings, effect.mappings),
            apply_delta(q.num_pending_additions, effect.pending_additions),
            apply_delta(d.num_pending_additions, effect.pending_additions),
            apply_delta(p.num_pending_removals, effect.pending_removals),
            apply_delta(d.num_pending_removals, effect.pending_removals),
        );
        let (Some(qm), Some(pm), Some(qa), Some(da), Some(pr), Some(dr)) = updated else {
            return Err(ResourceError::fault(
                OP,
                format!(
                    "counter underflow on {} -> {} ({}, {}, slot {})",
                    cur, new_state, queue, port, slot
                ),
            ));
        };

        let q = &mut self.ldb_queues[queue.index()];
        q.num_mappings = qm;
        q.num_pending_additions = qa;

        let d = &mut self.domains[domain.index()];
        d.num_pending_additions = da;
        d.num_pending_removals = dr;

        let p = &mut self.ldb_ports[port.index()];
        p.num_mappings = pm;
        p.num_pending_removals = pr;
        let entry = &mut p.slots[slot];
        entry.state = new_state;
        if new_state == SlotState::Unmapped {
            entry.qid = None;
        }

        info!(
            "[{}()] {} {} slot {}: {} -> {}",
            OP, port, queue, slot, cur, new_state
        );
        Ok(())
    }

    // ========== Mapping ==========

    /// Binds `queue` to a slot of `port` right away. Only safe while the
    /// domain carries no traffic.
    pub(crate) fn map_qid_static(
        &mut self,
        port: LdbPortId,
        queue: LdbQueueId,
        priority: u8,
    ) -> Result<()> {
        let p = &self.ldb_ports[port.index()];
        let slot = p
            .find_slot_queue(SlotState::MapInProgress, queue)
            .or_else(|| p.find_slot_queue(SlotState::Mapped, queue))
            .or_else(|| p.find_slot(SlotState::Unmapped))
            .ok_or_else(|| {
                ResourceError::fault(
                    "map_qid_static",
                    format!("no slot on {} for {}", port, queue),
                )
            })?;

        self.hw.set_cq_slot(port, slot, queue, priority);
        self.hw.set_qid_routing(queue, port, slot, true);
        self.hw.flush();

        let entry = &mut self.ldb_ports[port.index()].slots[slot];
        entry.qid = Some(queue);
        entry.priority = priority;

        self.slot_state_transition(port, queue, slot, SlotState::Mapped)?;
        self.stats.maps_completed += 1;
        Ok(())
    }

    /// Completes a `MAP_IN_PROGRESS` slot once the queue has no inflights.
    pub(crate) fn finish_map_qid_dynamic(
        &mut self,
        domain: DomainId,
        port: LdbPortId,
        queue: LdbQueueId,
    ) -> Result<()> {
        const OP: &str = "finish_map_qid_dynamic";

        let infl = self.hw.ldb_queue_counter(queue, LdbQueueCounter::Inflight);
        if infl != 0 {
            return Err(ResourceError::fault(
                OP,
                format!("{} still has {} inflights", queue, infl),
            ));
        }

        let slot = self.ldb_ports[port.index()]
            .find_slot_queue(SlotState::MapInProgress, queue)
            .ok_or_else(|| {
                ResourceError::fault(OP, format!("{} has no map in progress for {}", port, queue))
            })?;
        let priority = self.ldb_ports[port.index()].slots[slot].priority;

        self.map_qid_static(port, queue, priority)?;

        self.set_has_work_bits(port, queue, slot);
        self.clear_queue_if_status(port, slot);
        for (mapped_port, mapped_slot) in self.queue_mapped_ports(domain, queue) {
            self.set_queue_if_status(mapped_port, mapped_slot);
        }

        self.set_inflight_limit(queue);
        self.enable_mapped_cqs(domain, queue);

        // Other additions still in flight keep the queue throttled.
        if self.ldb_queues[queue.index()].num_pending_additions > 0 {
            self.clear_inflight_limit(queue);
        }
        Ok(())
    }

    /// Starts binding `queue` to `port` while traffic may be flowing.
    pub(crate) fn map_qid_dynamic(
        &mut self,
        domain: DomainId,
        port: LdbPortId,
        queue: LdbQueueId,
        priority: u8,
    ) -> Result<MapOutcome> {
        self.clear_inflight_limit(queue);

        let slot = self.ldb_ports[port.index()]
            .find_slot(SlotState::Unmapped)
            .ok_or_else(|| {
                ResourceError::fault("map_qid_dynamic", format!("no unmapped slot on {}", port))
            })?;
        let entry = &mut self.ldb_ports[port.index()].slots[slot];
        entry.qid = Some(queue);
        entry.priority = priority;
        self.slot_state_transition(port, queue, slot, SlotState::MapInProgress)?;

        if self.hw.ldb_queue_counter(queue, LdbQueueCounter::Inflight) != 0 {
            self.ensure_worker();
            self.stats.maps_deferred += 1;
            return Ok(MapOutcome::Pending);
        }

        let enabled = self.ldb_ports[port.index()].enabled;
        if enabled {
            self.ldb_port_cq_disable(port);
        }
        self.disable_mapped_cqs(domain, queue);

        if self.hw.ldb_queue_counter(queue, LdbQueueCounter::Inflight) != 0 {
            if enabled {
                self.ldb_port_cq_enable(port);
            }
            self.enable_mapped_cqs(domain, queue);
            self.ensure_worker();
            self.stats.maps_deferred += 1;
            return Ok(MapOutcome::Pending);
        }

        self.finish_map_qid_dynamic(domain, port, queue)?;
        Ok(MapOutcome::Complete)
    }

    /// Maps dynamically once the domain is started, statically before.
    pub(crate) fn map_qid_internal(
        &mut self,
        domain: DomainId,
        port: LdbPortId,
        queue: LdbQueueId,
        priority: u8,
    ) -> Result<MapOutcome> {
        if self.domains[domain.index()].started {
            self.map_qid_dynamic(domain, port, queue, priority)
        } else {
            self.map_qid_static(port, queue, priority)?;
            Ok(MapOutcome::Complete)
        }
    }

    // ========== Unmapping ==========

    /// Clears the routing for `queue` on `port` and frees its slot.
    pub(crate) fn unmap_qid_slot(&mut self, port: LdbPortId, queue: LdbQueueId) -> Result<()> {
        let p = &self.ldb_ports[port.index()];
        let slot = [
            SlotState::Mapped,
            SlotState::UnmapInProgress,
            SlotState::UnmapInProgressPendingMap,
        ]
        .into_iter()
        .find_map(|state| p.find_slot_queue(state, queue))
        .ok_or_else(|| {
            ResourceError::fault(
                "ldb_port_unmap_qid",
                format!("{} is not mapped to {}", queue, port),
            )
        })?;

        self.hw.clear_cq_slot(port, slot);
        self.hw.set_qid_routing(queue, port, slot, false);
        self.hw.flush();

        self.slot_state_transition(port, queue, slot, SlotState::Unmapped)?;
        self.stats.unmaps_completed += 1;
        Ok(())
    }

    fn finish_unmap_port_slot(
        &mut self,
        domain: DomainId,
        port: LdbPortId,
        slot: usize,
    ) -> Result<()> {
        let entry = self.ldb_ports[port.index()].slots[slot];
        let queue = entry.qid.ok_or_else(|| {
            ResourceError::fault(
                "finish_unmap_port_slot",
                format!("{} slot {} is unmapping without a queue", port, slot),
            )
        })?;

        self.unmap_qid_slot(port, queue)?;

        self.clear_has_work_bits(port, slot);
        // Restore the slot's default inflight-ok state.
        self.set_queue_if_status(port, slot);

        if self.ldb_ports[port.index()].enabled {
            self.ldb_port_cq_enable(port);
        }

        if entry.state == SlotState::UnmapInProgressPendingMap {
            let next = entry.pending_qid.ok_or_else(|| {
                ResourceError::fault(
                    "finish_unmap_port_slot",
                    format!("{} slot {} has a pending map without a queue", port, slot),
                )
            })?;
            let cleared = &mut self.ldb_ports[port.index()].slots[slot];
            cleared.pending_qid = None;
            cleared.pending_priority = 0;
            self.map_qid_internal(domain, port, next, entry.pending_priority)?;
        }
        Ok(())
    }

    /// Completes every unmap on `port` once its CQ has no inflights.
    /// Returns false if nothing was pending or the CQ is still busy.
    pub(crate) fn finish_unmap_port(&mut self, domain: DomainId, port: LdbPortId) -> Result<bool> {
        if self.ldb_ports[port.index()].num_pending_removals == 0 {
            return Ok(false);
        }
        if self.hw.ldb_cq_inflight_count(port) > 0 {
            return Ok(false);
        }

        for slot in 0..MAX_QIDS_PER_LDB_CQ {
            if self.ldb_ports[port.index()].slots[slot].state.is_unmapping() {
                self.finish_unmap_port_slot(domain, port, slot)?;
            }
        }
        Ok(true)
    }

    /// Attempts every `MAP_IN_PROGRESS` slot on `port`.
    fn finish_map_port(&mut self, domain: DomainId, port: LdbPortId) -> Result<()> {
        for slot in 0..MAX_QIDS_PER_LDB_CQ {
            let entry = self.ldb_ports[port.index()].slots[slot];
            if entry.state != SlotState::MapInProgress {
                continue;
            }
            let queue = entry.qid.ok_or_else(|| {
                ResourceError::fault(
                    "finish_map_port",
                    format!("{} slot {} is mapping without a queue", port, slot),
                )
            })?;

            if self.hw.ldb_queue_counter(queue, LdbQueueCounter::Inflight) != 0 {
                continue;
            }

            let enabled = self.ldb_ports[port.index()].enabled;
            if enabled {
                self.ldb_port_cq_disable(port);
            }
            self.disable_mapped_cqs(domain, queue);

            if self.hw.ldb_queue_counter(queue, LdbQueueCounter::Inflight) != 0 {
                if enabled {
                    self.ldb_port_cq_enable(port);
                }
                self.enable_mapped_cqs(domain, queue);
                continue;
            }

            self.finish_map_qid_dynamic(domain, port, queue)?;
        }
        Ok(())
    }

    // ========== Sweeps ==========

    /// Advances pending maps in one domain, returning those still pending.
    pub(crate) fn domain_finish_map_qid_procedures(&mut self, domain: DomainId) -> Result<u32> {
        let d = &self.domains[domain.index()];
        if !d.configured || d.num_pending_additions == 0 {
            return Ok(0);
        }

        for port in d.used.ldb_ports.to_vec() {
            self.finish_map_port(domain, port)?;
        }
        Ok(self.domains[domain.index()].num_pending_additions)
    }

    /// Advances pending unmaps in one domain, returning those still pending.
    pub(crate) fn domain_finish_unmap_qid_procedures(&mut self, domain: DomainId) -> Result<u32> {
        let d = &self.domains[domain.index()];
        if !d.configured || d.num_pending_removals == 0 {
            return Ok(0);
        }

        for port in d.used.ldb_ports.to_vec() {
            self.finish_unmap_port(domain, port)?;
        }
        Ok(self.domains[domain.index()].num_pending_removals)
    }

    /// Finishes dynamic maps whose queues have drained.
    ///
    /// Returns the number of additions still pending across all domains.
    /// A domain that faults is logged, counted in the stats and left out
    /// of the total; the sweep carries on with the remaining domains.
    pub fn finish_map_qid_procedures(&mut self) -> u32 {
        let mut remaining = 0;
        for domain in self.rsrcs.used_domains.to_vec() {
            match self.domain_finish_map_qid_procedures(domain) {
                Ok(n) => remaining += n,
                Err(err) => self.note_sweep_fault("finish_map_qid_procedures", domain, &err),
            }
        }
        remaining
    }

    /// Finishes unmaps whose CQs have drained.
    ///
    /// Returns the number of removals still pending across all domains,
    /// skipping domains that fault.
    pub fn finish_unmap_qid_procedures(&mut self) -> u32 {
        let mut remaining = 0;
        for domain in self.rsrcs.used_domains.to_vec() {
            match self.domain_finish_unmap_qid_procedures(domain) {
                Ok(n) => remaining += n,
                Err(err) => self.note_sweep_fault("finish_unmap_qid_procedures", domain, &err),
            }
        }
        remaining
    }

    fn note_sweep_fault(&mut self, action: &'static str, domain: DomainId, err: &ResourceError) {
        error!("[{}()] {} is unusable: {}", action, domain, err);
        self.note_fault(action, Some(domain), err);
    }
}
