//! Drain/Quiesce Engine
//!
//! Flushes in-flight and queued events out of a domain before its
//! resources are reset and reclaimed. Every wait on hardware state is a
//! bounded loop; running out of iterations is a fault, never a silent
//! success.
//!
//! # Architecture
//!
//! ```text
//! drain_mapped_queues ──▶ drain_ldb_cqs ──▶ drain_ldb_cq ──▶ producer port HCWs
//!        ▲
//! drain_unmapped_queues (borrow the first used port, map, drain)
//!
//! drain_dir_queues ─────▶ drain_dir_cqs ──▶ drain_dir_cq ──▶ token return HCW
//!
//! reset_hw_resources ─▶ verify_reset_success ─▶ reset_registers
//! ```

use dlb_hw::{
    CsrAccess, DirPortId, DomainId, Hcw, HwError, LdbPortId, LdbQueueCounter, LdbQueueId,
    Platform, ProducerPort, ResetTarget,
};
use dlb_types::MAX_QIDS_PER_LDB_CQ;
use log::{debug, error, warn};

use crate::error::{ResourceError, Result};
use crate::mapping::MapOutcome;
use crate::mgr::DlbResourceMgr;

const NOOP: Hcw = Hcw {
    qe_comp: false,
    cq_token: false,
    lock_id: 0,
};

impl DlbResourceMgr {
    /// Polls `done` up to `loops` times with the configured delay between
    /// polls. Returns true once `done` holds.
    fn poll_until(&self, loops: u32, mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..loops {
            if done() {
                return true;
            }
            self.poll_delay();
        }
        false
    }

    fn domain_started(&self, domain: DomainId) -> bool {
        self.domains[domain.index()].started
    }

    // ========== Load-balanced CQs ==========

    /// Completes every event scheduled to `port` and returns its tokens.
    pub(crate) fn drain_ldb_cq(&self, port: LdbPortId) -> Result<()> {
        let infl = self.hw.ldb_cq_inflight_count(port);
        let tkn = self
            .hw
            .ldb_cq_token_count(port)
            .saturating_sub(self.ldb_ports[port.index()].init_tkn_cnt);
        if infl == 0 && tkn == 0 {
            return Ok(());
        }

        debug!("draining {}: {} inflights, {} tokens", port, infl, tkn);
        let mapping = self.hw.map_producer_port(ProducerPort::Ldb(port))?;

        // First word: one completion and every outstanding token.
        let first = Hcw {
            qe_comp: infl > 0,
            cq_token: tkn > 0,
            lock_id: tkn.saturating_sub(1) as u16,
        };
        self.hw.movdir64b(&mapping, &[first, NOOP, NOOP, NOOP]);

        let completion = [Hcw::completion(), NOOP, NOOP, NOOP];
        for _ in 1..infl {
            self.hw.movdir64b(&mapping, &completion);
        }

        self.hw.fence_hcw(&mapping);
        self.hw.unmap_producer_port(mapping);
        Ok(())
    }

    pub(crate) fn drain_ldb_cqs(&self, domain: DomainId, toggle_port: bool) -> Result<()> {
        if !self.domain_started(domain) {
            return Ok(());
        }

        for port in self.domains[domain.index()].used.ldb_ports.iter() {
            if toggle_port {
                self.ldb_port_cq_disable(port);
            }
            self.drain_ldb_cq(port)?;
            if toggle_port {
                self.ldb_port_cq_enable(port);
            }
        }
        Ok(())
    }

    /// Waits for every used port's CQ inflight count to reach zero.
    pub(crate) fn wait_for_ldb_cqs_to_empty(&self, domain: DomainId) -> Result<()> {
        for port in self.domains[domain.index()].used.ldb_ports.iter() {
            let loops = self.config.cq_comp_check_loops;
            if !self.poll_until(loops, || self.hw.ldb_cq_inflight_count(port) == 0) {
                return Err(ResourceError::fault(
                    "domain_wait_for_ldb_cqs_to_empty",
                    format!("{} failed to empty after {} polls", port, loops),
                ));
            }
        }
        Ok(())
    }

    // ========== Load-balanced queues ==========

    pub(crate) fn ldb_queue_is_empty(&self, queue: LdbQueueId) -> bool {
        LdbQueueCounter::ALL
            .iter()
            .all(|counter| self.hw.ldb_queue_counter(queue, *counter) == 0)
    }

    fn mapped_queues_empty(&self, domain: DomainId) -> bool {
        self.domains[domain.index()]
            .used
            .ldb_queues
            .iter()
            .filter(|queue| self.ldb_queues[queue.index()].num_mappings > 0)
            .all(|queue| self.ldb_queue_is_empty(queue))
    }

    /// Drains CQs until every mapped queue reports empty.
    pub(crate) fn drain_mapped_queues(&self, domain: DomainId) -> Result<()> {
        const OP: &str = "domain_drain_mapped_queues";

        if !self.domain_started(domain) {
            return Ok(());
        }

        let pending = self.domains[domain.index()].num_pending_removals;
        if pending > 0 {
            return Err(ResourceError::fault(
                OP,
                format!("{} has {} pending removals", domain, pending),
            ));
        }

        let mut drained = false;
        for _ in 0..self.config.qid_empty_check_loops {
            self.drain_ldb_cqs(domain, true)?;
            if self.mapped_queues_empty(domain) {
                drained = true;
                break;
            }
        }
        if !drained {
            return Err(ResourceError::fault(
                OP,
                format!(
                    "mapped queues of {} failed to empty after {} passes",
                    domain, self.config.qid_empty_check_loops
                ),
            ));
        }

        // Events may have landed in the CQs during the last pass.
        self.drain_ldb_cqs(domain, true)
    }

    /// Temporarily maps an unmapped queue to the first used port so its
    /// events can be drained.
    pub(crate) fn drain_unmapped_queue(&mut self, domain: DomainId, queue: LdbQueueId) -> Result<()> {
        const OP: &str = "domain_drain_unmapped_queue";

        let port = self.domains[domain.index()]
            .used
            .ldb_ports
            .head()
            .ok_or_else(|| {
                ResourceError::fault(OP, format!("{} has no used ldb ports to drain {}", domain, queue))
            })?;

        if self.ldb_ports[port.index()].num_mappings as usize == MAX_QIDS_PER_LDB_CQ {
            let evicted = self.ldb_ports[port.index()].slots[0].qid.ok_or_else(|| {
                ResourceError::fault(OP, format!("{} slot 0 has no queue", port))
            })?;
            self.unmap_qid_slot(port, evicted)?;
        }

        if self.map_qid_dynamic(domain, port, queue, 0)? == MapOutcome::Pending {
            warn!("[{}()] map of {} to {} is still pending", OP, queue, port);
        }

        self.drain_mapped_queues(domain)
    }

    pub(crate) fn drain_unmapped_queues(&mut self, domain: DomainId) -> Result<()> {
        if !self.domain_started(domain) {
            return Ok(());
        }

        for queue in self.domains[domain.index()].used.ldb_queues.to_vec() {
            if self.ldb_queues[queue.index()].num_mappings > 0 || self.ldb_queue_is_empty(queue) {
                continue;
            }
            self.drain_unmapped_queue(domain, queue)?;
        }
        Ok(())
    }

    // ========== Directed ports ==========

    /// Returns every token outstanding on a directed CQ in one batch.
    pub(crate) fn drain_dir_cq(&self, port: DirPortId) -> Result<()> {
        let cnt = self.hw.dir_cq_token_count(port);
        if cnt == 0 {
            return Ok(());
        }

        let mapping = self.hw.map_producer_port(ProducerPort::Dir(port))?;
        self.hw
            .movdir64b(&mapping, &[Hcw::token_return(cnt), NOOP, NOOP, NOOP]);
        self.hw.fence_hcw(&mapping);
        self.hw.unmap_producer_port(mapping);
        Ok(())
    }

    pub(crate) fn drain_dir_cqs(&self, domain: DomainId, toggle_port: bool) -> Result<()> {
        for port in self.domains[domain.index()].used.dir_pq_pairs.iter() {
            let pair = &self.dir_pq_pairs[port.index()];
            // A half-configured pair has nothing to drain.
            if !pair.port_configured || !pair.queue_configured {
                continue;
            }

            if toggle_port {
                self.hw.set_dir_cq_enabled(port, false);
                self.hw.flush();
            }
            self.drain_dir_cq(port)?;
            if toggle_port {
                self.hw.set_dir_cq_enabled(port, true);
                self.hw.flush();
            }
        }
        Ok(())
    }

    fn dir_queues_empty(&self, domain: DomainId) -> bool {
        self.domains[domain.index()]
            .used
            .dir_pq_pairs
            .iter()
            .all(|port| self.hw.dir_queue_depth(port) == 0)
    }

    pub(crate) fn drain_dir_queues(&self, domain: DomainId) -> Result<()> {
        if !self.domain_started(domain) {
            return Ok(());
        }

        let mut drained = false;
        for _ in 0..self.config.qid_empty_check_loops {
            self.drain_dir_cqs(domain, true)?;
            if self.dir_queues_empty(domain) {
                drained = true;
                break;
            }
        }
        if !drained {
            return Err(ResourceError::fault(
                "domain_drain_dir_queues",
                format!("directed queues of {} failed to empty", domain),
            ));
        }

        self.drain_dir_cqs(domain, true)
    }

    // ========== Credit pools ==========

    pub(crate) fn wait_for_ldb_pool_refill(&self, domain: DomainId) -> Result<()> {
        let loops = self.config.qid_empty_check_loops;
        for pool in self.domains[domain.index()].used.ldb_pools.iter() {
            if !self.poll_until(loops, || self.hw.ldb_pool_freelist(pool).is_full()) {
                return Err(ResourceError::fault(
                    "domain_wait_for_ldb_pool_refill",
                    format!("{} credits were not returned", pool),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn wait_for_dir_pool_refill(&self, domain: DomainId) -> Result<()> {
        let loops = self.config.qid_empty_check_loops;
        for pool in self.domains[domain.index()].used.dir_pools.iter() {
            if !self.poll_until(loops, || self.hw.dir_pool_freelist(pool).is_full()) {
                return Err(ResourceError::fault(
                    "domain_wait_for_dir_pool_refill",
                    format!("{} credits were not returned", pool),
                ));
            }
        }
        Ok(())
    }

    // ========== Hardware reset ==========

    pub(crate) fn reset_hw_resource(&self, target: ResetTarget) -> Result<()> {
        self.hw.start_resource_reset(target);

        let loops = self.config.reset_poll_loops;
        if self.poll_until(loops, || self.hw.resource_reset_done()) {
            return Ok(());
        }
        error!("reset of {} did not complete", target);
        Err(HwError::reset_timeout(target.to_string(), loops).into())
    }

    pub(crate) fn reset_hw_resources(&self, domain: DomainId) -> Result<()> {
        let used = &self.domains[domain.index()].used;

        for pool in used.ldb_pools.iter() {
            self.reset_hw_resource(ResetTarget::LdbPool(pool))?;
        }
        for pool in used.dir_pools.iter() {
            self.reset_hw_resource(ResetTarget::DirPool(pool))?;
        }
        for queue in used.ldb_queues.iter() {
            self.reset_hw_resource(ResetTarget::LdbQueue(queue))?;
        }
        for port in used.dir_pq_pairs.iter() {
            self.reset_hw_resource(ResetTarget::DirQueue(port))?;
        }
        for port in used.ldb_ports.iter() {
            self.reset_hw_resource(ResetTarget::LdbCq(port))?;
        }
        for port in used.dir_pq_pairs.iter() {
            self.reset_hw_resource(ResetTarget::DirCq(port))?;
        }
        Ok(())
    }

    /// Confirms the hardware reached quiescence after the resets.
    pub(crate) fn verify_reset_success(&self, domain: DomainId) -> Result<()> {
        const OP: &str = "domain_verify_reset_success";
        let used = &self.domains[domain.index()].used;

        for pool in used.dir_pools.iter() {
            if !self.hw.dir_pool_freelist(pool).is_full() {
                return Err(ResourceError::fault(OP, format!("{} is not full", pool)));
            }
        }
        for queue in used.ldb_queues.iter() {
            if !self.ldb_queue_is_empty(queue) {
                return Err(ResourceError::fault(OP, format!("{} is not empty", queue)));
            }
        }
        for port in used.ldb_ports.iter() {
            let infl = self.hw.ldb_cq_inflight_count(port);
            let tkn = self.hw.ldb_cq_token_count(port);
            if infl != 0 || tkn != 0 {
                return Err(ResourceError::fault(
                    OP,
                    format!("{} has {} inflights and {} tokens", port, infl, tkn),
                ));
            }
        }
        for port in used.dir_pq_pairs.iter() {
            if self.hw.dir_queue_depth(port) != 0 {
                return Err(ResourceError::fault(OP, format!("dir queue {} is not empty", port)));
            }
            if self.hw.dir_cq_token_count(port) != 0 {
                return Err(ResourceError::fault(OP, format!("{} holds tokens", port)));
            }
        }
        Ok(())
    }

    /// Returns every register the domain programmed to its reset value.
    pub(crate) fn reset_registers(&self, domain: DomainId) {
        let used = &self.domains[domain.index()].used;

        for port in used.ldb_ports.iter() {
            self.hw.reset_ldb_port_registers(port);
        }
        for port in used.dir_pq_pairs.iter() {
            self.hw.reset_dir_port_registers(port);
        }
        for queue in used.ldb_queues.iter() {
            self.hw.reset_ldb_queue_registers(queue);
        }
        for port in used.dir_pq_pairs.iter() {
            self.hw.reset_dir_queue_registers(port);
        }
        for pool in used.ldb_pools.iter() {
            self.hw.reset_ldb_pool_registers(pool);
        }
        for pool in used.dir_pools.iter() {
            self.hw.reset_dir_pool_registers(pool);
        }
        self.hw.flush();
    }
}
