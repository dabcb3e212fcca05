//! Domain Lifecycle Manager
//!
//! Public operations that create, configure, start and reset scheduling
//! domains. Creation moves resources from the function into a domain's
//! avail lists; the per-resource `create_*` calls move them into the
//! domain's used lists and program the hardware; `reset_domain` quiesces
//! everything and hands it all back.
//!
//! # Architecture
//!
//! ```text
//! create_sched_domain ──▶ verify ──▶ attach (journal / rollback)
//!        │
//!        ▼
//! create_{ldb,dir}_pool ─┐
//! create_ldb_queue ──────┼──▶ domain avail list ──▶ domain used list
//! create_{ldb,dir}_port ─┘
//!        │
//!        ▼
//! start_domain ──▶ map_qid / unmap_qid (static or dynamic)
//!        │
//!        ▼
//! reset_domain ──▶ drain ──▶ hw reset ──▶ verify ──▶ detach_all
//! ```

use dlb_hw::{
    CsrAccess, DirPoolId, DirPortConfig, DirPortId, DomainId, LdbPoolId, LdbPortConfig, LdbPortId,
    LdbQueueConfig, LdbQueueId, PoolConfig, RingPtr, SnGroupId,
};
use dlb_types::{
    CreateDirPortArgs, CreateLdbPortArgs, CreateLdbQueueArgs, CreateSchedDomainArgs, DlbStatus,
    MAX_CQ_DEPTH, MAX_LDB_SN_ALLOC, MAX_QID_INFLIGHTS, NUM_QID_PRIORITIES,
};
use log::{debug, info};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::error::{ResourceError, Result};
use crate::mapping::{MapOutcome, SlotState};
use crate::mgr::DlbResourceMgr;
use crate::registry::{Freelist, Owner};

/// Sequence-number allocations a group can be configured with.
const VALID_SN_ALLOCATIONS: [u32; 6] = [32, 64, 128, 256, 512, 1024];

fn rejected<T>(status: DlbStatus) -> Result<T> {
    Err(ResourceError::Rejected(status))
}

fn valid_cq_depth(depth: u32) -> bool {
    depth.is_power_of_two() && depth <= MAX_CQ_DEPTH
}

/// Tokens a CQ starts with. Shallow CQs are padded to eight entries.
fn initial_token_count(cq_depth: u32) -> u32 {
    8u32.saturating_sub(cq_depth)
}

/// Freelist programming for a pool of `credits` starting at `base`.
fn pool_config(base: u32, credits: u32) -> PoolConfig {
    PoolConfig {
        credits,
        freelist_base: base,
        freelist_limit: base + credits.saturating_sub(1),
        push: RingPtr::new(base, true),
        pop: RingPtr::new(base, false),
    }
}

impl DlbResourceMgr {
    // ========== Request bookkeeping ==========

    /// Audits the result of a public request. Faults also bump the fault
    /// counter.
    fn record_outcome<T>(
        &mut self,
        category: AuditCategory,
        action: &'static str,
        domain: DomainId,
        result: &Result<T>,
    ) {
        let record = AuditRecord::new(category, "DlbResourceMgr", action)
            .with_object_id(domain.to_string())
            .with_object_type("sched_domain");
        match result {
            Ok(_) => audit_log!(record.with_outcome(AuditOutcome::Success)),
            Err(ResourceError::Rejected(status)) => audit_log!(record.with_status(*status)),
            Err(err) => self.note_fault(action, Some(domain), err),
        }
    }

    /// Rejects requests against a started domain.
    fn verify_not_started(&self, domain: DomainId) -> Result<()> {
        if self.domains[domain.index()].started {
            return rejected(DlbStatus::DomainStarted);
        }
        Ok(())
    }

    fn verify_used_ldb_port(&self, domain: DomainId, port: LdbPortId) -> Result<()> {
        match self.ldb_ports.get(port.index()) {
            Some(p) if p.owner.is_used_by(domain) && p.configured => Ok(()),
            _ => rejected(DlbStatus::InvalidPortId),
        }
    }

    fn verify_used_ldb_queue(&self, domain: DomainId, queue: LdbQueueId) -> Result<()> {
        match self.ldb_queues.get(queue.index()) {
            Some(q) if q.owner.is_used_by(domain) && q.configured => Ok(()),
            _ => rejected(DlbStatus::InvalidQid),
        }
    }

    fn verify_port_pools(&self, domain: DomainId, ldb_pool: u32, dir_pool: u32) -> Result<()> {
        let d = &self.domains[domain.index()];
        if !d.used.ldb_pools.contains(LdbPoolId::new(ldb_pool)) {
            return rejected(DlbStatus::InvalidLdbCreditPoolId);
        }
        if !d.used.dir_pools.contains(DirPoolId::new(dir_pool)) {
            return rejected(DlbStatus::InvalidDirCreditPoolId);
        }
        Ok(())
    }

    // ========== Domains ==========

    /// Creates a scheduling domain holding exactly the requested resources.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Rejected`] with the first insufficient
    /// resource class, leaving every count untouched.
    pub fn create_sched_domain(&mut self, args: &CreateSchedDomainArgs) -> Result<DomainId> {
        const OP: &str = "create_sched_domain";

        debug!("DLB create sched domain arguments: {:?}", args);

        if let Err(status) = self.verify_create_sched_domain_args(args) {
            self.stats.domain_create_rejections += 1;
            info!("[{}()] request rejected: {}", OP, status);
            audit_log!(AuditRecord::new(AuditCategory::DomainCreate, "DlbResourceMgr", OP)
                .with_status(status)
                .with_details(serde_json::json!({ "args": args })));
            return rejected(status);
        }

        let Some(domain) = self.rsrcs.avail_domains.head() else {
            let err = ResourceError::fault(OP, "validation passed with no domain available");
            self.note_fault(OP, None, &err);
            return Err(err);
        };

        if self.domains[domain.index()].configured {
            let err = ResourceError::fault(OP, format!("{} is already configured", domain));
            self.note_fault(OP, Some(domain), &err);
            return Err(err);
        }

        self.domains[domain.index()].clear();

        if let Err(err) = self.attach_domain_resources(domain, args) {
            let err = match err {
                ResourceError::Rejected(status) => ResourceError::fault(
                    OP,
                    format!("attach failed after validation: {}", status),
                ),
                other => other,
            };
            self.note_fault(OP, Some(domain), &err);
            return Err(err);
        }

        self.rsrcs.avail_domains.remove(domain);
        self.rsrcs.used_domains.push_back(domain);
        self.stats.domains_created += 1;

        info!("[{}()] created {}", OP, domain);
        audit_log!(AuditRecord::new(AuditCategory::DomainCreate, "DlbResourceMgr", OP)
            .with_outcome(AuditOutcome::Success)
            .with_object_id(domain.to_string())
            .with_object_type("sched_domain")
            .with_details(serde_json::json!({ "args": args })));
        Ok(domain)
    }

    /// Grants the domain's queues write permission and lets traffic flow.
    /// Mappings made afterwards go through the dynamic procedure.
    pub fn start_domain(&mut self, domain: DomainId) -> Result<()> {
        let result = self.start_domain_inner(domain);
        self.record_outcome(AuditCategory::DomainStart, "start_domain", domain, &result);
        result
    }

    fn start_domain_inner(&mut self, domain: DomainId) -> Result<()> {
        self.verify_domain(domain)?;
        self.verify_not_started(domain)?;

        let d = &self.domains[domain.index()];
        for queue in d.used.ldb_queues.iter() {
            self.hw.set_ldb_queue_write_perm(domain, queue, true);
        }
        for pair in d.used.dir_pq_pairs.iter() {
            self.hw.set_dir_queue_write_perm(domain, pair, true);
        }
        self.hw.flush();

        self.domains[domain.index()].started = true;
        info!("DLB start domain: {} started", domain);
        Ok(())
    }

    // ========== Credit pools ==========

    /// Configures the next load-balanced credit pool of `domain` with
    /// `num_credits` credits carved from the domain's QED range.
    pub fn create_ldb_pool(&mut self, domain: DomainId, num_credits: u32) -> Result<LdbPoolId> {
        let result = self.create_ldb_pool_inner(domain, num_credits);
        self.record_outcome(AuditCategory::PoolCreate, "create_ldb_pool", domain, &result);
        result
    }

    fn create_ldb_pool_inner(&mut self, domain: DomainId, num_credits: u32) -> Result<LdbPoolId> {
        const OP: &str = "create_ldb_pool";

        self.verify_domain(domain)?;
        let d = &self.domains[domain.index()];
        if d.qed_freelist.remaining() < num_credits {
            return rejected(DlbStatus::LdbCreditsUnavailable);
        }
        let Some(pool) = d.avail.ldb_pools.head() else {
            return rejected(DlbStatus::LdbCreditPoolsUnavailable);
        };
        self.verify_not_started(domain)?;

        let d = &mut self.domains[domain.index()];
        let base = d.qed_freelist.carve(num_credits).ok_or_else(|| {
            ResourceError::fault(OP, format!("{} QED range shrank under us", domain))
        })?;
        d.avail.ldb_pools.remove(pool);
        d.used.ldb_pools.push_back(pool);

        self.hw.configure_ldb_pool(pool, &pool_config(base, num_credits));
        self.hw.set_ldb_pool_enabled(pool, true);
        self.hw.flush();

        let entry = &mut self.ldb_pools[pool.index()];
        entry.owner = Owner::DomainUsed(domain);
        entry.configured = true;
        entry.avail_credits = num_credits;
        entry.total_credits = num_credits;
        self.stats.pools_created += 1;

        info!(
            "[{}()] {}: {} with {} credits at base {}",
            OP, domain, pool, num_credits, base
        );
        Ok(pool)
    }

    /// Configures the next directed credit pool of `domain` with
    /// `num_credits` credits carved from the domain's DQED range.
    pub fn create_dir_pool(&mut self, domain: DomainId, num_credits: u32) -> Result<DirPoolId> {
        let result = self.create_dir_pool_inner(domain, num_credits);
        self.record_outcome(AuditCategory::PoolCreate, "create_dir_pool", domain, &result);
        result
    }

    fn create_dir_pool_inner(&mut self, domain: DomainId, num_credits: u32) -> Result<DirPoolId> {
        const OP: &str = "create_dir_pool";

        self.verify_domain(domain)?;
        let d = &self.domains[domain.index()];
        if d.dqed_freelist.remaining() < num_credits {
            return rejected(DlbStatus::DirCreditsUnavailable);
        }
        let Some(pool) = d.avail.dir_pools.head() else {
            return rejected(DlbStatus::DirCreditPoolsUnavailable);
        };
        self.verify_not_started(domain)?;

        let d = &mut self.domains[domain.index()];
        let base = d.dqed_freelist.carve(num_credits).ok_or_else(|| {
            ResourceError::fault(OP, format!("{} DQED range shrank under us", domain))
        })?;
        d.avail.dir_pools.remove(pool);
        d.used.dir_pools.push_back(pool);

        self.hw.configure_dir_pool(pool, &pool_config(base, num_credits));
        self.hw.set_dir_pool_enabled(pool, true);
        self.hw.flush();

        let entry = &mut self.dir_pools[pool.index()];
        entry.owner = Owner::DomainUsed(domain);
        entry.configured = true;
        entry.avail_credits = num_credits;
        entry.total_credits = num_credits;
        self.stats.pools_created += 1;

        info!(
            "[{}()] {}: {} with {} credits at base {}",
            OP, domain, pool, num_credits, base
        );
        Ok(pool)
    }

    // ========== Queues ==========

    /// Configures the next load-balanced queue of `domain`.
    ///
    /// A non-zero `num_sequence_numbers` makes the queue ordered; it then
    /// takes a slot in a sequence-number group configured for exactly that
    /// many sequence numbers per queue.
    pub fn create_ldb_queue(
        &mut self,
        domain: DomainId,
        args: &CreateLdbQueueArgs,
    ) -> Result<LdbQueueId> {
        let result = self.create_ldb_queue_inner(domain, args);
        self.record_outcome(AuditCategory::QueueCreate, "create_ldb_queue", domain, &result);
        result
    }

    fn create_ldb_queue_inner(
        &mut self,
        domain: DomainId,
        args: &CreateLdbQueueArgs,
    ) -> Result<LdbQueueId> {
        const OP: &str = "create_ldb_queue";

        debug!("DLB create load-balanced queue arguments: {:?}", args);

        self.verify_domain(domain)?;
        let Some(queue) = self.domains[domain.index()].avail.ldb_queues.head() else {
            return rejected(DlbStatus::LdbQueuesUnavailable);
        };
        self.verify_not_started(domain)?;

        let ordered = args.num_sequence_numbers > 0;
        let group = if ordered {
            let found = self.sn_groups.iter().find(|g| {
                g.sequence_numbers_per_queue == args.num_sequence_numbers && !g.is_full()
            });
            match found {
                Some(g) => Some(g.id()),
                None => return rejected(DlbStatus::SequenceNumbersUnavailable),
            }
        } else {
            None
        };

        if args.num_qid_inflights == 0
            || args.num_qid_inflights > MAX_QID_INFLIGHTS
            || (ordered && args.num_qid_inflights > args.num_sequence_numbers)
        {
            return rejected(DlbStatus::InvalidQidInflightAllocation);
        }

        if self.domains[domain.index()].aqed_freelist.remaining() < args.num_atomic_inflights {
            return rejected(DlbStatus::AtomicInflightsUnavailable);
        }

        let aqed_base = self.domains[domain.index()]
            .aqed_freelist
            .carve(args.num_atomic_inflights)
            .ok_or_else(|| ResourceError::fault(OP, format!("{} AQED range shrank", domain)))?;

        let sn = match group {
            Some(group) => {
                let slot = self.sn_groups[group.index()].alloc_slot().ok_or_else(|| {
                    ResourceError::fault(OP, format!("{} filled up under us", group))
                })?;
                Some((group, slot))
            }
            None => None,
        };

        let config = LdbQueueConfig {
            num_qid_inflights: args.num_qid_inflights,
            aqed_base,
            aqed_limit: aqed_base + args.num_atomic_inflights.saturating_sub(1),
            sn,
        };
        self.hw.configure_ldb_queue(queue, &config);

        let d = &mut self.domains[domain.index()];
        d.avail.ldb_queues.remove(queue);
        d.used.ldb_queues.push_back(queue);

        let entry = &mut self.ldb_queues[queue.index()];
        entry.owner = Owner::DomainUsed(domain);
        entry.configured = true;
        entry.num_qid_inflights = args.num_qid_inflights;
        entry.aqed = Freelist::new(aqed_base, args.num_atomic_inflights);
        entry.sn = sn;

        self.set_inflight_limit(queue);
        self.hw.flush();
        self.stats.queues_created += 1;

        info!("[{}()] {}: configured {} (sn {:?})", OP, domain, queue, sn);
        Ok(queue)
    }

    /// Configures a directed queue. Without `port`, the next directed
    /// pair of the domain is taken; with it, the queue joins an already
    /// configured port.
    pub fn create_dir_queue(
        &mut self,
        domain: DomainId,
        port: Option<DirPortId>,
    ) -> Result<DirPortId> {
        let result = self.create_dir_queue_inner(domain, port);
        self.record_outcome(AuditCategory::QueueCreate, "create_dir_queue", domain, &result);
        result
    }

    fn create_dir_queue_inner(
        &mut self,
        domain: DomainId,
        port: Option<DirPortId>,
    ) -> Result<DirPortId> {
        self.verify_domain(domain)?;

        let pair = match port {
            Some(id) => match self.dir_pq_pairs.get(id.index()) {
                Some(p) if p.owner.is_used_by(domain) && p.port_configured && !p.queue_configured => {
                    id
                }
                _ => return rejected(DlbStatus::InvalidPortId),
            },
            None => match self.domains[domain.index()].avail.dir_pq_pairs.head() {
                Some(id) => id,
                None => return rejected(DlbStatus::DirPortsUnavailable),
            },
        };
        self.verify_not_started(domain)?;

        self.hw.configure_dir_queue(pair);
        self.hw.flush();

        if port.is_none() {
            let d = &mut self.domains[domain.index()];
            d.avail.dir_pq_pairs.remove(pair);
            d.used.dir_pq_pairs.push_back(pair);
        }
        let entry = &mut self.dir_pq_pairs[pair.index()];
        entry.owner = Owner::DomainUsed(domain);
        entry.queue_configured = true;
        self.stats.queues_created += 1;

        info!("[create_dir_queue()] {}: configured dir queue {}", domain, pair.as_raw());
        Ok(pair)
    }

    // ========== Ports ==========

    /// Configures the next load-balanced port of `domain`. The port comes
    /// up enabled with every slot unmapped.
    pub fn create_ldb_port(
        &mut self,
        domain: DomainId,
        args: &CreateLdbPortArgs,
    ) -> Result<LdbPortId> {
        let result = self.create_ldb_port_inner(domain, args);
        self.record_outcome(AuditCategory::PortCreate, "create_ldb_port", domain, &result);
        result
    }

    fn create_ldb_port_inner(
        &mut self,
        domain: DomainId,
        args: &CreateLdbPortArgs,
    ) -> Result<LdbPortId> {
        const OP: &str = "create_ldb_port";

        debug!("DLB create load-balanced port arguments: {:?}", args);

        self.verify_domain(domain)?;
        let Some(port) = self.domains[domain.index()].avail.ldb_ports.head() else {
            return rejected(DlbStatus::LdbPortsUnavailable);
        };
        self.verify_not_started(domain)?;
        self.verify_port_pools(domain, args.ldb_credit_pool_id, args.dir_credit_pool_id)?;

        if !valid_cq_depth(args.cq_depth) {
            return rejected(DlbStatus::InvalidCqDepth);
        }
        if args.cq_history_list_size == 0 {
            return rejected(DlbStatus::InvalidHistListDepth);
        }
        if self.domains[domain.index()].hist_list.remaining() < args.cq_history_list_size {
            return rejected(DlbStatus::HistListEntriesUnavailable);
        }

        let d = &mut self.domains[domain.index()];
        let hist_base = d
            .hist_list
            .carve(args.cq_history_list_size)
            .ok_or_else(|| ResourceError::fault(OP, format!("{} history list shrank", domain)))?;
        d.avail.ldb_ports.remove(port);
        d.used.ldb_ports.push_back(port);

        let config = LdbPortConfig {
            ldb_pool: LdbPoolId::new(args.ldb_credit_pool_id),
            dir_pool: DirPoolId::new(args.dir_credit_pool_id),
            cq_depth: args.cq_depth,
            hist_list_base: hist_base,
            hist_list_limit: hist_base + args.cq_history_list_size - 1,
        };
        self.hw.configure_ldb_port(port, &config);
        self.hw.set_ldb_pp_enabled(port, true);
        self.hw.set_ldb_cq_enabled(port, true);
        self.hw.flush();

        let entry = &mut self.ldb_ports[port.index()];
        entry.owner = Owner::DomainUsed(domain);
        entry.configured = true;
        entry.enabled = true;
        entry.cq_depth = args.cq_depth;
        entry.init_tkn_cnt = initial_token_count(args.cq_depth);
        entry.hist_list = Freelist::new(hist_base, args.cq_history_list_size);
        entry.reset_slots();
        self.stats.ports_created += 1;

        info!(
            "[{}()] {}: configured {} (cq depth {}, history list {}..{})",
            OP,
            domain,
            port,
            args.cq_depth,
            hist_base,
            hist_base + args.cq_history_list_size
        );
        Ok(port)
    }

    /// Configures a directed port. Without `args.queue_id`, the next
    /// directed pair of the domain is taken; with it, the port joins an
    /// already configured directed queue.
    pub fn create_dir_port(
        &mut self,
        domain: DomainId,
        args: &CreateDirPortArgs,
    ) -> Result<DirPortId> {
        let result = self.create_dir_port_inner(domain, args);
        self.record_outcome(AuditCategory::PortCreate, "create_dir_port", domain, &result);
        result
    }

    fn create_dir_port_inner(
        &mut self,
        domain: DomainId,
        args: &CreateDirPortArgs,
    ) -> Result<DirPortId> {
        debug!("DLB create directed port arguments: {:?}", args);

        self.verify_domain(domain)?;

        let pair = match args.queue_id {
            Some(raw) => {
                let id = DirPortId::new(raw);
                match self.dir_pq_pairs.get(id.index()) {
                    Some(p)
                        if p.owner.is_used_by(domain)
                            && p.queue_configured
                            && !p.port_configured =>
                    {
                        id
                    }
                    _ => return rejected(DlbStatus::InvalidDirQueueId),
                }
            }
            None => match self.domains[domain.index()].avail.dir_pq_pairs.head() {
                Some(id) => id,
                None => return rejected(DlbStatus::DirPortsUnavailable),
            },
        };
        self.verify_not_started(domain)?;
        self.verify_port_pools(domain, args.ldb_credit_pool_id, args.dir_credit_pool_id)?;

        if !valid_cq_depth(args.cq_depth) {
            return rejected(DlbStatus::InvalidCqDepth);
        }

        let config = DirPortConfig {
            ldb_pool: LdbPoolId::new(args.ldb_credit_pool_id),
            dir_pool: DirPoolId::new(args.dir_credit_pool_id),
            cq_depth: args.cq_depth,
        };
        self.hw.configure_dir_port(pair, &config);
        self.hw.set_dir_pp_enabled(pair, true);
        self.hw.set_dir_cq_enabled(pair, true);
        self.hw.flush();

        if args.queue_id.is_none() {
            let d = &mut self.domains[domain.index()];
            d.avail.dir_pq_pairs.remove(pair);
            d.used.dir_pq_pairs.push_back(pair);
        }
        let entry = &mut self.dir_pq_pairs[pair.index()];
        entry.owner = Owner::DomainUsed(domain);
        entry.port_configured = true;
        entry.enabled = true;
        entry.init_tkn_cnt = initial_token_count(args.cq_depth);
        self.stats.ports_created += 1;

        info!(
            "[create_dir_port()] {}: configured {} (cq depth {})",
            domain, pair, args.cq_depth
        );
        Ok(pair)
    }

    /// Re-enables a load-balanced port's CQ. While unmaps are pending the
    /// hardware CQ stays off until they finish.
    pub fn enable_ldb_port(&mut self, domain: DomainId, port: LdbPortId) -> Result<()> {
        self.verify_domain(domain)?;
        self.verify_used_ldb_port(domain, port)?;

        if !self.ldb_ports[port.index()].enabled {
            self.ldb_port_cq_enable(port);
            self.ldb_ports[port.index()].enabled = true;
        }
        Ok(())
    }

    pub fn disable_ldb_port(&mut self, domain: DomainId, port: LdbPortId) -> Result<()> {
        self.verify_domain(domain)?;
        self.verify_used_ldb_port(domain, port)?;

        if self.ldb_ports[port.index()].enabled {
            self.ldb_port_cq_disable(port);
            self.ldb_ports[port.index()].enabled = false;
        }
        Ok(())
    }

    fn verify_used_dir_port(&self, domain: DomainId, port: DirPortId) -> Result<()> {
        match self.dir_pq_pairs.get(port.index()) {
            Some(p) if p.owner.is_used_by(domain) && p.port_configured => Ok(()),
            _ => rejected(DlbStatus::InvalidPortId),
        }
    }

    pub fn enable_dir_port(&mut self, domain: DomainId, port: DirPortId) -> Result<()> {
        self.verify_domain(domain)?;
        self.verify_used_dir_port(domain, port)?;

        if !self.dir_pq_pairs[port.index()].enabled {
            self.hw.set_dir_cq_enabled(port, true);
            self.hw.flush();
            self.dir_pq_pairs[port.index()].enabled = true;
        }
        Ok(())
    }

    pub fn disable_dir_port(&mut self, domain: DomainId, port: DirPortId) -> Result<()> {
        self.verify_domain(domain)?;
        self.verify_used_dir_port(domain, port)?;

        if self.dir_pq_pairs[port.index()].enabled {
            self.hw.set_dir_cq_enabled(port, false);
            self.hw.flush();
            self.dir_pq_pairs[port.index()].enabled = false;
        }
        Ok(())
    }

    /// Unmaps still outstanding on `port`.
    pub fn pending_port_unmaps(&self, domain: DomainId, port: LdbPortId) -> Result<u32> {
        self.verify_domain(domain)?;
        self.verify_used_ldb_port(domain, port)?;
        Ok(self.ldb_ports[port.index()].num_pending_removals)
    }

    // ========== Queue mapping ==========

    /// Binds `queue` to `port` at `priority`, or changes the priority of
    /// an existing binding.
    ///
    /// Returns [`MapOutcome::Pending`] when the binding has to wait for
    /// traffic to drain; a later sweep completes it.
    pub fn map_qid(
        &mut self,
        domain: DomainId,
        port: LdbPortId,
        queue: LdbQueueId,
        priority: u8,
    ) -> Result<MapOutcome> {
        let result = self.map_qid_request(domain, port, queue, priority);
        self.record_outcome(AuditCategory::QueueMap, "map_qid", domain, &result);
        result
    }

    fn map_qid_request(
        &mut self,
        domain: DomainId,
        port: LdbPortId,
        queue: LdbQueueId,
        priority: u8,
    ) -> Result<MapOutcome> {
        const OP: &str = "map_qid";

        self.verify_domain(domain)?;
        self.verify_used_ldb_port(domain, port)?;
        self.verify_used_ldb_queue(domain, queue)?;
        if priority >= NUM_QID_PRIORITIES {
            return rejected(DlbStatus::InvalidPriority);
        }

        // Completing an outstanding unmap may free a slot for this request.
        if self.ldb_ports[port.index()].num_pending_removals > 0 {
            self.finish_unmap_port(domain, port)?;
        }

        let p = &self.ldb_ports[port.index()];
        if p.find_slot(SlotState::Unmapped).is_none()
            && p.find_slot(SlotState::UnmapInProgress).is_none()
            && !p.tracks_queue(queue)
        {
            return rejected(DlbStatus::NoQidSlotsAvailable);
        }

        let enabled = p.enabled;
        if enabled {
            self.ldb_port_cq_disable(port);
        }

        let outcome = self.resolve_map(domain, port, queue, priority)?;

        if self.ldb_ports[port.index()].enabled {
            self.ldb_port_cq_enable(port);
        }
        debug!("[{}()] {} -> {}: {:?}", OP, queue, port, outcome);
        Ok(outcome)
    }

    fn resolve_map(
        &mut self,
        domain: DomainId,
        port: LdbPortId,
        queue: LdbQueueId,
        priority: u8,
    ) -> Result<MapOutcome> {
        let p = &self.ldb_ports[port.index()];

        if let Some(slot) = p.find_slot_queue(SlotState::Mapped, queue) {
            info!("DLB map: priority change only for {} on {}", queue, port);
            self.hw.set_cq_slot(port, slot, queue, priority);
            self.hw.flush();
            self.ldb_ports[port.index()].slots[slot].priority = priority;
            self.slot_state_transition(port, queue, slot, SlotState::Mapped)?;
            return Ok(MapOutcome::Complete);
        }

        if let Some(slot) = p.find_slot_queue(SlotState::UnmapInProgress, queue) {
            // The routing was never torn down, so cancelling is enough.
            self.hw.set_cq_slot(port, slot, queue, priority);
            self.hw.flush();
            self.ldb_ports[port.index()].slots[slot].priority = priority;
            self.slot_state_transition(port, queue, slot, SlotState::Mapped)?;
            return Ok(MapOutcome::Complete);
        }

        if let Some(slot) = p.find_slot_queue(SlotState::MapInProgress, queue) {
            self.ldb_ports[port.index()].slots[slot].priority = priority;
            return Ok(MapOutcome::Pending);
        }

        if let Some(slot) = p.find_pending_map_slot(queue) {
            self.ldb_ports[port.index()].slots[slot].pending_priority = priority;
            return Ok(MapOutcome::Pending);
        }

        if p.find_slot(SlotState::Unmapped).is_none() {
            let slot = p.find_slot(SlotState::UnmapInProgress).ok_or_else(|| {
                ResourceError::fault("map_qid", format!("{} has no slot to queue behind", port))
            })?;
            let entry = &mut self.ldb_ports[port.index()].slots[slot];
            entry.pending_qid = Some(queue);
            entry.pending_priority = priority;
            let current = entry.qid.unwrap_or(queue);
            self.slot_state_transition(port, current, slot, SlotState::UnmapInProgressPendingMap)?;
            return Ok(MapOutcome::Pending);
        }

        self.map_qid_internal(domain, port, queue, priority)
    }

    /// Unbinds `queue` from `port`.
    ///
    /// Returns [`MapOutcome::Pending`] when the port's CQ still holds
    /// events from the queue; a later sweep completes the unmap.
    pub fn unmap_qid(
        &mut self,
        domain: DomainId,
        port: LdbPortId,
        queue: LdbQueueId,
    ) -> Result<MapOutcome> {
        let result = self.unmap_qid_request(domain, port, queue);
        self.record_outcome(AuditCategory::QueueUnmap, "unmap_qid", domain, &result);
        result
    }

    fn unmap_qid_request(
        &mut self,
        domain: DomainId,
        port: LdbPortId,
        queue: LdbQueueId,
    ) -> Result<MapOutcome> {
        const OP: &str = "unmap_qid";

        self.verify_domain(domain)?;
        self.verify_used_ldb_port(domain, port)?;
        self.verify_used_ldb_queue(domain, queue)?;

        let p = &self.ldb_ports[port.index()];
        let mapped = p.find_slot_queue(SlotState::Mapped, queue);
        let map_in_progress = p.find_slot_queue(SlotState::MapInProgress, queue);
        let pending_map = p.find_pending_map_slot(queue);
        if mapped.is_none() && map_in_progress.is_none() && pending_map.is_none() {
            return rejected(DlbStatus::InvalidQid);
        }

        if !self.domains[domain.index()].started {
            self.unmap_qid_slot(port, queue)?;
            return Ok(MapOutcome::Complete);
        }

        if let Some(slot) = map_in_progress {
            self.slot_state_transition(port, queue, slot, SlotState::Unmapped)?;
            if self.ldb_queues[queue.index()].num_pending_additions == 0 {
                self.set_inflight_limit(queue);
            }
            info!("[{}()] aborted map of {} on {}", OP, queue, port);
            return Ok(MapOutcome::Complete);
        }

        if let Some(slot) = pending_map {
            let entry = &mut self.ldb_ports[port.index()].slots[slot];
            entry.pending_qid = None;
            entry.pending_priority = 0;
            let current = entry.qid.unwrap_or(queue);
            self.slot_state_transition(port, current, slot, SlotState::UnmapInProgress)?;
            info!("[{}()] dropped queued map of {} on {}", OP, queue, port);
            return Ok(MapOutcome::Complete);
        }

        let slot = mapped.ok_or_else(|| {
            ResourceError::fault(OP, format!("{} lost its slot for {}", port, queue))
        })?;
        self.ldb_port_cq_disable(port);
        self.slot_state_transition(port, queue, slot, SlotState::UnmapInProgress)?;

        if self.finish_unmap_port(domain, port)? {
            return Ok(MapOutcome::Complete);
        }

        self.ensure_worker();
        self.stats.unmaps_deferred += 1;
        Ok(MapOutcome::Pending)
    }

    // ========== Sequence numbers ==========

    /// Sets how many sequence numbers each ordered queue in `group` gets.
    /// Allowed only while no queue holds a slot in the group.
    pub fn set_sn_allocation(
        &mut self,
        group: SnGroupId,
        sequence_numbers_per_queue: u32,
    ) -> Result<()> {
        const OP: &str = "set_sn_allocation";

        let result = match self.sn_groups.get(group.index()) {
            None => rejected(DlbStatus::InvalidSnGroup),
            Some(g) if g.slot_use_bitmap != 0 => rejected(DlbStatus::SnGroupInUse),
            Some(_) if !VALID_SN_ALLOCATIONS.contains(&sequence_numbers_per_queue) => {
                rejected(DlbStatus::InvalidSnGroup)
            }
            Some(_) => Ok(()),
        };

        let mut record = AuditRecord::new(AuditCategory::SnConfig, "DlbResourceMgr", OP)
            .with_object_id(group.to_string())
            .with_details(serde_json::json!({
                "sequence_numbers_per_queue": sequence_numbers_per_queue,
            }));
        match &result {
            Ok(()) => {
                self.sn_groups[group.index()].sequence_numbers_per_queue =
                    sequence_numbers_per_queue;
                info!(
                    "[{}()] {}: {} sequence numbers per queue, {} slots",
                    OP,
                    group,
                    sequence_numbers_per_queue,
                    MAX_LDB_SN_ALLOC / sequence_numbers_per_queue
                );
                record = record.with_outcome(AuditOutcome::Success);
            }
            Err(err) => {
                if let Some(status) = err.status() {
                    record = record.with_status(status);
                }
            }
        }
        audit_log!(record);
        result
    }

    /// Slots of `group` currently held by ordered queues.
    pub fn sn_group_occupancy(&self, group: SnGroupId) -> Result<u32> {
        self.sn_groups
            .get(group.index())
            .map(|g| g.used_slots())
            .ok_or(ResourceError::Rejected(DlbStatus::InvalidSnGroup))
    }

    // ========== Reset ==========

    /// Quiesces `domain`, resets its hardware and returns every resource
    /// it held to the function.
    ///
    /// # Errors
    ///
    /// Rejects unknown or unconfigured domains. Any later failure is a
    /// fault and leaves the domain unusable.
    pub fn reset_domain(&mut self, domain: DomainId) -> Result<()> {
        info!("DLB reset domain: {}", domain);
        let result = self.reset_domain_inner(domain);
        if result.is_ok() {
            self.stats.domains_reset += 1;
        }
        self.record_outcome(AuditCategory::DomainReset, "reset_domain", domain, &result);
        result
    }

    fn reset_domain_inner(&mut self, domain: DomainId) -> Result<()> {
        self.verify_domain(domain)?;

        self.disable_queue_write_perms(domain);
        self.disable_port_traffic_hooks(domain);
        self.disable_ldb_cqs(domain);

        self.drain_ldb_cqs(domain, false)?;
        self.wait_for_ldb_cqs_to_empty(domain)?;
        self.domain_finish_unmap_qid_procedures(domain)?;
        self.domain_finish_map_qid_procedures(domain)?;

        self.enable_ldb_cqs(domain);
        self.drain_mapped_queues(domain)?;
        self.drain_unmapped_queues(domain)?;
        self.wait_for_ldb_pool_refill(domain)?;
        self.disable_ldb_cqs(domain);

        self.drain_dir_queues(domain)?;
        self.wait_for_dir_pool_refill(domain)?;
        self.disable_dir_cqs(domain);

        self.disable_producer_ports(domain);
        self.disable_pools(domain);

        self.reset_hw_resources(domain)?;
        self.verify_reset_success(domain)?;
        self.reset_registers(domain);

        self.detach_all(domain)?;
        info!("DLB reset domain: {} returned to the function", domain);
        Ok(())
    }

    fn disable_queue_write_perms(&self, domain: DomainId) {
        let d = &self.domains[domain.index()];
        for queue in d.used.ldb_queues.iter() {
            self.hw.set_ldb_queue_write_perm(domain, queue, false);
        }
        for pair in d.used.dir_pq_pairs.iter() {
            self.hw.set_dir_queue_write_perm(domain, pair, false);
        }
        self.hw.flush();
    }

    /// Stops credit updates, CQ interrupts and sequence checks.
    fn disable_port_traffic_hooks(&self, domain: DomainId) {
        let d = &self.domains[domain.index()];
        for pair in d.used.dir_pq_pairs.iter() {
            self.hw.set_dir_pp_credit_updates(pair, false);
            self.hw.set_dir_cq_interrupts(pair, false);
        }
        for port in d.used.ldb_ports.iter() {
            self.hw.set_ldb_pp_credit_updates(port, false);
            self.hw.set_ldb_cq_interrupts(port, false);
            self.hw.set_ldb_seq_check(port, false);
        }
        self.hw.flush();
    }

    fn disable_ldb_cqs(&mut self, domain: DomainId) {
        for port in self.domains[domain.index()].used.ldb_ports.to_vec() {
            self.ldb_ports[port.index()].enabled = false;
            self.ldb_port_cq_disable(port);
        }
    }

    fn enable_ldb_cqs(&mut self, domain: DomainId) {
        for port in self.domains[domain.index()].used.ldb_ports.to_vec() {
            self.ldb_ports[port.index()].enabled = true;
            self.ldb_port_cq_enable(port);
        }
    }

    fn disable_dir_cqs(&mut self, domain: DomainId) {
        for pair in self.domains[domain.index()].used.dir_pq_pairs.to_vec() {
            self.dir_pq_pairs[pair.index()].enabled = false;
            self.hw.set_dir_cq_enabled(pair, false);
        }
        self.hw.flush();
    }

    fn disable_producer_ports(&self, domain: DomainId) {
        let d = &self.domains[domain.index()];
        for pair in d.used.dir_pq_pairs.iter() {
            self.hw.set_dir_pp_enabled(pair, false);
        }
        for port in d.used.ldb_ports.iter() {
            self.hw.set_ldb_pp_enabled(port, false);
        }
        self.hw.flush();
    }

    fn disable_pools(&self, domain: DomainId) {
        let d = &self.domains[domain.index()];
        for pool in d.used.ldb_pools.iter() {
            self.hw.set_ldb_pool_enabled(pool, false);
        }
        for pool in d.used.dir_pools.iter() {
            self.hw.set_dir_pool_enabled(pool, false);
        }
        self.hw.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use dlb_hw::sim::SimCounter;
    use dlb_hw::LdbQueueCounter;
    use pretty_assertions::assert_eq;

    fn queue_args(num_sequence_numbers: u32, num_qid_inflights: u32) -> CreateLdbQueueArgs {
        CreateLdbQueueArgs {
            num_sequence_numbers,
            num_qid_inflights,
            num_atomic_inflights: 16,
        }
    }

    #[test]
    fn test_create_domain_moves_domain_to_used() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, queues, ports) = fx.domain(&mut mgr, 2, 2);

        assert_eq!(domain, DomainId::new(0));
        assert_eq!(mgr.function_resources().used_domains.head(), Some(domain));
        assert!(!mgr.function_resources().avail_domains.contains(domain));
        assert_eq!(mgr.get_num_resources().num_sched_domains, 31);
        assert_eq!(queues.len(), 2);
        assert_eq!(ports.len(), 2);
        assert_eq!(mgr.stats().domains_created, 1);
        assert_eq!(mgr.stats().pools_created, 2);
        assert_eq!(mgr.stats().queues_created, 2);
        assert_eq!(mgr.stats().ports_created, 2);
    }

    #[test]
    fn test_create_domain_rejection_counts() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let err = mgr
            .create_sched_domain(&CreateSchedDomainArgs {
                num_ldb_queues: 1,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.status(), Some(DlbStatus::LdbPortRequiredForLdbQueues));
        assert_eq!(mgr.stats().domain_create_rejections, 1);
        assert_eq!(mgr.stats().domains_created, 0);
        assert_eq!(mgr.get_num_resources().num_sched_domains, 32);
    }

    #[test]
    fn test_pool_programming() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, _, _) = fx.domain(&mut mgr, 1, 1);
        let pool = mgr.domain(domain).unwrap().used.ldb_pools.head().unwrap();
        let base = mgr.domain(domain).unwrap().qed_freelist.base;

        let config = fx.sim.ldb_pool_config(pool).unwrap();
        assert_eq!(config.credits, 512);
        assert_eq!(config.freelist_base, base);
        assert_eq!(config.freelist_limit, base + 511);
        assert_eq!(config.push, RingPtr::new(base, true));
        assert_eq!(config.pop, RingPtr::new(base, false));
        assert!(fx.sim.ldb_pool_enabled(pool));

        let entry = mgr.ldb_pool(pool).unwrap();
        assert_eq!(entry.avail_credits, 512);
        assert_eq!(entry.total_credits, 512);
        assert_eq!(entry.owner, Owner::DomainUsed(domain));
        assert_eq!(mgr.domain(domain).unwrap().qed_freelist.offset, 512);
    }

    #[test]
    fn test_pool_credit_boundary() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let domain = mgr
            .create_sched_domain(&CreateSchedDomainArgs {
                num_ldb_credits: 100,
                num_ldb_credit_pools: 2,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            mgr.create_ldb_pool(domain, 101).unwrap_err().status(),
            Some(DlbStatus::LdbCreditsUnavailable)
        );
        mgr.create_ldb_pool(domain, 60).unwrap();
        assert_eq!(
            mgr.create_ldb_pool(domain, 41).unwrap_err().status(),
            Some(DlbStatus::LdbCreditsUnavailable)
        );
        mgr.create_ldb_pool(domain, 40).unwrap();
        assert_eq!(
            mgr.create_ldb_pool(domain, 0).unwrap_err().status(),
            Some(DlbStatus::LdbCreditPoolsUnavailable)
        );
    }

    #[test]
    fn test_pool_checks_order() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        assert_eq!(
            mgr.create_dir_pool(DomainId::new(40), 1).unwrap_err().status(),
            Some(DlbStatus::InvalidDomainId)
        );
        assert_eq!(
            mgr.create_dir_pool(DomainId::new(3), 1).unwrap_err().status(),
            Some(DlbStatus::DomainNotConfigured)
        );

        let domain = mgr
            .create_sched_domain(&CreateSchedDomainArgs {
                num_dir_credits: 8,
                num_dir_credit_pools: 2,
                ..Default::default()
            })
            .unwrap();
        mgr.start_domain(domain).unwrap();
        assert_eq!(
            mgr.create_dir_pool(domain, 9).unwrap_err().status(),
            Some(DlbStatus::DirCreditsUnavailable)
        );
        assert_eq!(
            mgr.create_dir_pool(domain, 8).unwrap_err().status(),
            Some(DlbStatus::DomainStarted)
        );
    }

    #[test]
    fn test_queue_validation_order() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let domain = mgr
            .create_sched_domain(&CreateSchedDomainArgs {
                num_ldb_queues: 2,
                num_ldb_ports: 1,
                num_atomic_inflights: 16,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            mgr.create_ldb_queue(domain, &queue_args(48, 16)).unwrap_err().status(),
            Some(DlbStatus::SequenceNumbersUnavailable)
        );
        assert_eq!(
            mgr.create_ldb_queue(domain, &queue_args(0, 0)).unwrap_err().status(),
            Some(DlbStatus::InvalidQidInflightAllocation)
        );
        assert_eq!(
            mgr.create_ldb_queue(domain, &queue_args(0, 4097))
                .unwrap_err()
                .status(),
            Some(DlbStatus::InvalidQidInflightAllocation)
        );
        assert_eq!(
            mgr.create_ldb_queue(domain, &queue_args(32, 33)).unwrap_err().status(),
            Some(DlbStatus::InvalidQidInflightAllocation)
        );

        mgr.create_ldb_queue(domain, &queue_args(0, 64)).unwrap();
        assert_eq!(
            mgr.create_ldb_queue(domain, &queue_args(0, 64)).unwrap_err().status(),
            Some(DlbStatus::AtomicInflightsUnavailable)
        );
        assert_eq!(mgr.stats().queues_created, 1);
    }

    #[test]
    fn test_ordered_queue_takes_sn_slot() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        mgr.set_sn_allocation(SnGroupId::new(1), 512).unwrap();
        let domain = mgr
            .create_sched_domain(&CreateSchedDomainArgs {
                num_ldb_queues: 3,
                num_ldb_ports: 1,
                ..Default::default()
            })
            .unwrap();

        let args = CreateLdbQueueArgs {
            num_sequence_numbers: 512,
            num_qid_inflights: 256,
            num_atomic_inflights: 0,
        };
        let first = mgr.create_ldb_queue(domain, &args).unwrap();
        mgr.create_ldb_queue(domain, &args).unwrap();
        assert_eq!(
            mgr.create_ldb_queue(domain, &args).unwrap_err().status(),
            Some(DlbStatus::SequenceNumbersUnavailable)
        );

        assert_eq!(mgr.ldb_queue(first).unwrap().sn, Some((SnGroupId::new(1), 0)));
        assert_eq!(fx.sim.ldb_queue_config(first).unwrap().sn, Some((SnGroupId::new(1), 0)));
        assert_eq!(fx.sim.ldb_queue_inflight_limit(first), 256);
        assert_eq!(mgr.sn_group_occupancy(SnGroupId::new(1)).unwrap(), 2);
        assert_eq!(
            mgr.set_sn_allocation(SnGroupId::new(1), 1024).unwrap_err().status(),
            Some(DlbStatus::SnGroupInUse)
        );
    }

    #[test]
    fn test_rejected_ordered_queue_keeps_sn_slots() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        mgr.set_sn_allocation(SnGroupId::new(2), 256).unwrap();
        let domain = mgr
            .create_sched_domain(&CreateSchedDomainArgs {
                num_ldb_queues: 2,
                num_ldb_ports: 1,
                num_atomic_inflights: 32,
                ..Default::default()
            })
            .unwrap();

        let too_many_atomics = CreateLdbQueueArgs {
            num_sequence_numbers: 256,
            num_qid_inflights: 128,
            num_atomic_inflights: 64,
        };
        assert_eq!(
            mgr.create_ldb_queue(domain, &too_many_atomics).unwrap_err().status(),
            Some(DlbStatus::AtomicInflightsUnavailable)
        );
        let too_many_inflights = CreateLdbQueueArgs {
            num_qid_inflights: 512,
            num_atomic_inflights: 0,
            ..too_many_atomics
        };
        assert_eq!(
            mgr.create_ldb_queue(domain, &too_many_inflights).unwrap_err().status(),
            Some(DlbStatus::InvalidQidInflightAllocation)
        );
        assert_eq!(mgr.sn_group_occupancy(SnGroupId::new(2)).unwrap(), 0);
        assert_eq!(mgr.domain(domain).unwrap().avail.ldb_queues.count(), 2);

        mgr.create_ldb_queue(
            domain,
            &CreateLdbQueueArgs {
                num_atomic_inflights: 32,
                ..too_many_atomics
            },
        )
        .unwrap();
        assert_eq!(mgr.sn_group_occupancy(SnGroupId::new(2)).unwrap(), 1);

        mgr.reset_domain(domain).unwrap();
        assert_eq!(mgr.sn_group_occupancy(SnGroupId::new(2)).unwrap(), 0);
    }

    #[test]
    fn test_sn_allocation_checks() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        assert_eq!(
            mgr.set_sn_allocation(SnGroupId::new(4), 64).unwrap_err().status(),
            Some(DlbStatus::InvalidSnGroup)
        );
        assert_eq!(
            mgr.set_sn_allocation(SnGroupId::new(0), 48).unwrap_err().status(),
            Some(DlbStatus::InvalidSnGroup)
        );
        assert_eq!(
            mgr.sn_group_occupancy(SnGroupId::new(9)).unwrap_err().status(),
            Some(DlbStatus::InvalidSnGroup)
        );
        mgr.set_sn_allocation(SnGroupId::new(0), 64).unwrap();
        assert_eq!(mgr.sn_group(SnGroupId::new(0)).unwrap().num_slots(), 16);
    }

    #[test]
    fn test_port_creation() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, _, ports) = fx.domain(&mut mgr, 1, 1);
        let port = mgr.ldb_port(ports[0]).unwrap();
        assert!(port.configured);
        assert!(port.enabled);
        assert_eq!(port.init_tkn_cnt, 0);
        assert_eq!(port.hist_list.len(), 32);
        assert!(fx.sim.ldb_cq_enabled(ports[0]));
        assert!(fx.sim.ldb_pp_enabled(ports[0]));
        assert_eq!(fx.sim.ldb_port_config(ports[0]).unwrap().cq_depth, 32);
        assert!(mgr.domain(domain).unwrap().avail.ldb_ports.is_empty());
    }

    #[test]
    fn test_port_argument_checks() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let domain = mgr
            .create_sched_domain(&CreateSchedDomainArgs {
                num_ldb_ports: 1,
                num_hist_list_entries: 16,
                num_ldb_credits: 8,
                num_dir_credits: 8,
                num_ldb_credit_pools: 1,
                num_dir_credit_pools: 1,
                ..Default::default()
            })
            .unwrap();
        let ldb_pool = mgr.create_ldb_pool(domain, 8).unwrap();
        let dir_pool = mgr.create_dir_pool(domain, 8).unwrap();
        let args = |cq_depth, cq_history_list_size| CreateLdbPortArgs {
            ldb_credit_pool_id: ldb_pool.as_raw(),
            dir_credit_pool_id: dir_pool.as_raw(),
            cq_depth,
            cq_history_list_size,
        };

        let bad_pool = CreateLdbPortArgs {
            ldb_credit_pool_id: ldb_pool.as_raw() + 1,
            ..args(8, 8)
        };
        assert_eq!(
            mgr.create_ldb_port(domain, &bad_pool).unwrap_err().status(),
            Some(DlbStatus::InvalidLdbCreditPoolId)
        );
        let bad_pool = CreateLdbPortArgs {
            dir_credit_pool_id: dir_pool.as_raw() + 1,
            ..args(8, 8)
        };
        assert_eq!(
            mgr.create_ldb_port(domain, &bad_pool).unwrap_err().status(),
            Some(DlbStatus::InvalidDirCreditPoolId)
        );
        for depth in [0, 12, 2048] {
            assert_eq!(
                mgr.create_ldb_port(domain, &args(depth, 8)).unwrap_err().status(),
                Some(DlbStatus::InvalidCqDepth)
            );
        }
        assert_eq!(
            mgr.create_ldb_port(domain, &args(8, 0)).unwrap_err().status(),
            Some(DlbStatus::InvalidHistListDepth)
        );
        assert_eq!(
            mgr.create_ldb_port(domain, &args(8, 17)).unwrap_err().status(),
            Some(DlbStatus::HistListEntriesUnavailable)
        );

        let port = mgr.create_ldb_port(domain, &args(4, 16)).unwrap();
        assert_eq!(mgr.ldb_port(port).unwrap().init_tkn_cnt, 4);
        assert_eq!(
            mgr.create_ldb_port(domain, &args(4, 16)).unwrap_err().status(),
            Some(DlbStatus::LdbPortsUnavailable)
        );
    }

    #[test]
    fn test_dir_pair_halves() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, _, _) = fx.domain(&mut mgr, 1, 1);
        let d = mgr.domain(domain).unwrap();
        let ldb_pool = d.used.ldb_pools.head().unwrap();
        let dir_pool = d.used.dir_pools.head().unwrap();

        let pair = mgr.create_dir_queue(domain, None).unwrap();
        assert!(mgr.dir_pq_pair(pair).unwrap().queue_configured);
        assert_eq!(
            mgr.create_dir_queue(domain, Some(pair)).unwrap_err().status(),
            Some(DlbStatus::InvalidPortId)
        );

        let args = CreateDirPortArgs {
            ldb_credit_pool_id: ldb_pool.as_raw(),
            dir_credit_pool_id: dir_pool.as_raw(),
            cq_depth: 8,
            queue_id: Some(pair.as_raw()),
        };
        assert_eq!(mgr.create_dir_port(domain, &args).unwrap(), pair);
        assert_eq!(
            mgr.create_dir_port(domain, &args).unwrap_err().status(),
            Some(DlbStatus::InvalidDirQueueId)
        );
        assert!(fx.sim.dir_cq_enabled(pair));

        let other = mgr
            .create_dir_port(domain, &CreateDirPortArgs { queue_id: None, ..args })
            .unwrap();
        assert_ne!(other, pair);
        assert_eq!(
            mgr.create_dir_port(domain, &CreateDirPortArgs { queue_id: None, ..args })
                .unwrap_err()
                .status(),
            Some(DlbStatus::DirPortsUnavailable)
        );
    }

    #[test]
    fn test_start_grants_write_permission() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, queues, _) = fx.domain(&mut mgr, 2, 1);
        let pair = mgr.create_dir_queue(domain, None).unwrap();
        assert!(!fx.sim.ldb_queue_write_perm(queues[0]));

        mgr.start_domain(domain).unwrap();
        assert!(fx.sim.ldb_queue_write_perm(queues[0]));
        assert!(fx.sim.ldb_queue_write_perm(queues[1]));
        assert!(fx.sim.dir_queue_write_perm(pair));
        assert_eq!(
            mgr.start_domain(domain).unwrap_err().status(),
            Some(DlbStatus::DomainStarted)
        );
    }

    #[test]
    fn test_map_validation() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, queues, ports) = fx.domain(&mut mgr, 1, 1);
        let (other, other_queues, other_ports) = fx.domain(&mut mgr, 1, 1);

        assert_eq!(
            mgr.map_qid(domain, other_ports[0], queues[0], 0).unwrap_err().status(),
            Some(DlbStatus::InvalidPortId)
        );
        assert_eq!(
            mgr.map_qid(domain, ports[0], other_queues[0], 0).unwrap_err().status(),
            Some(DlbStatus::InvalidQid)
        );
        assert_eq!(
            mgr.map_qid(domain, ports[0], queues[0], 8).unwrap_err().status(),
            Some(DlbStatus::InvalidPriority)
        );
        assert_eq!(
            mgr.unmap_qid(other, other_ports[0], other_queues[0])
                .unwrap_err()
                .status(),
            Some(DlbStatus::InvalidQid)
        );
    }

    #[test]
    fn test_map_slots_exhausted() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, queues, ports) = fx.domain(&mut mgr, 9, 1);
        for queue in queues.iter().take(8) {
            mgr.map_qid(domain, ports[0], *queue, 0).unwrap();
        }
        assert_eq!(
            mgr.map_qid(domain, ports[0], queues[8], 0).unwrap_err().status(),
            Some(DlbStatus::NoQidSlotsAvailable)
        );
        // Remapping an already mapped queue needs no free slot.
        assert_eq!(
            mgr.map_qid(domain, ports[0], queues[3], 6).unwrap(),
            MapOutcome::Complete
        );
    }

    #[test]
    fn test_priority_change_reprograms_slot() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, queues, ports) = fx.domain(&mut mgr, 1, 1);
        mgr.map_qid(domain, ports[0], queues[0], 1).unwrap();
        mgr.map_qid(domain, ports[0], queues[0], 7).unwrap();

        assert_eq!(fx.sim.cq_slot(ports[0], 0).unwrap().priority, 7);
        assert_eq!(mgr.ldb_port(ports[0]).unwrap().slots[0].priority, 7);
        assert_eq!(mgr.ldb_queue(queues[0]).unwrap().num_mappings, 1);
        assert_eq!(mgr.stats().maps_completed, 1);
    }

    #[test]
    fn test_static_unmap() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, queues, ports) = fx.domain(&mut mgr, 1, 1);
        mgr.map_qid(domain, ports[0], queues[0], 0).unwrap();
        assert_eq!(
            mgr.unmap_qid(domain, ports[0], queues[0]).unwrap(),
            MapOutcome::Complete
        );
        assert_eq!(mgr.ldb_port(ports[0]).unwrap().num_mappings, 0);
        assert!(!fx.sim.cq_slot(ports[0], 0).unwrap().valid);
        assert_eq!(mgr.stats().unmaps_completed, 1);
    }

    #[test]
    fn test_unmap_aborts_map_in_progress() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, queues, ports) = fx.domain(&mut mgr, 1, 1);
        mgr.start_domain(domain).unwrap();

        fx.sim
            .set_ldb_queue_counter(queues[0], LdbQueueCounter::Inflight, SimCounter::fixed(3));
        mgr.map_qid(domain, ports[0], queues[0], 0).unwrap();
        assert_eq!(fx.sim.ldb_queue_inflight_limit(queues[0]), 0);

        assert_eq!(
            mgr.unmap_qid(domain, ports[0], queues[0]).unwrap(),
            MapOutcome::Complete
        );
        let port = mgr.ldb_port(ports[0]).unwrap();
        assert_eq!(port.slots[0].state, SlotState::Unmapped);
        assert_eq!(mgr.domain(domain).unwrap().num_pending_additions, 0);
        assert_eq!(fx.sim.ldb_queue_inflight_limit(queues[0]), 32);
    }

    #[test]
    fn test_map_cancels_unmap_in_progress() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, queues, ports) = fx.domain(&mut mgr, 1, 1);
        mgr.map_qid(domain, ports[0], queues[0], 2).unwrap();
        mgr.start_domain(domain).unwrap();

        fx.sim.set_ldb_cq_inflight(ports[0], SimCounter::fixed(1));
        assert!(mgr.unmap_qid(domain, ports[0], queues[0]).unwrap().is_pending());
        assert!(!fx.sim.ldb_cq_enabled(ports[0]));

        assert_eq!(
            mgr.map_qid(domain, ports[0], queues[0], 4).unwrap(),
            MapOutcome::Complete
        );
        let port = mgr.ldb_port(ports[0]).unwrap();
        assert_eq!(port.slots[0].state, SlotState::Mapped);
        assert_eq!(port.slots[0].priority, 4);
        assert_eq!(port.num_pending_removals, 0);
        assert!(fx.sim.ldb_cq_enabled(ports[0]));
    }

    #[test]
    fn test_unmap_drops_pending_map() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, queues, ports) = fx.domain(&mut mgr, 9, 1);
        for queue in queues.iter().take(8) {
            mgr.map_qid(domain, ports[0], *queue, 0).unwrap();
        }
        mgr.start_domain(domain).unwrap();

        fx.sim.set_ldb_cq_inflight(ports[0], SimCounter::fixed(1));
        mgr.unmap_qid(domain, ports[0], queues[0]).unwrap();
        mgr.map_qid(domain, ports[0], queues[8], 3).unwrap();
        // A second request for the same queue only updates the priority.
        assert!(mgr.map_qid(domain, ports[0], queues[8], 6).unwrap().is_pending());
        assert_eq!(mgr.ldb_port(ports[0]).unwrap().slots[0].pending_priority, 6);

        assert_eq!(
            mgr.unmap_qid(domain, ports[0], queues[8]).unwrap(),
            MapOutcome::Complete
        );
        let slot = mgr.ldb_port(ports[0]).unwrap().slots[0];
        assert_eq!(slot.state, SlotState::UnmapInProgress);
        assert_eq!(slot.pending_qid, None);

        fx.sim.set_ldb_cq_inflight(ports[0], SimCounter::fixed(0));
        assert_eq!(mgr.finish_unmap_qid_procedures(), 0);
        assert_eq!(mgr.ldb_queue(queues[8]).unwrap().num_mappings, 0);
        assert_eq!(
            mgr.ldb_port(ports[0]).unwrap().slots[0].state,
            SlotState::Unmapped
        );
    }

    #[test]
    fn test_remap_behind_pending_map_has_no_slot() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, queues, ports) = fx.domain(&mut mgr, 9, 1);
        for queue in queues.iter().take(8) {
            mgr.map_qid(domain, ports[0], *queue, 0).unwrap();
        }
        mgr.start_domain(domain).unwrap();

        fx.sim.set_ldb_cq_inflight(ports[0], SimCounter::fixed(1));
        assert!(mgr.unmap_qid(domain, ports[0], queues[0]).unwrap().is_pending());
        assert!(mgr.map_qid(domain, ports[0], queues[8], 0).unwrap().is_pending());
        assert_eq!(
            mgr.ldb_port(ports[0]).unwrap().slots[0].state,
            SlotState::UnmapInProgressPendingMap
        );

        // The outgoing queue cannot take back a slot promised to another.
        let err = mgr.map_qid(domain, ports[0], queues[0], 2).unwrap_err();
        assert_eq!(err.status(), Some(DlbStatus::NoQidSlotsAvailable));
        assert_eq!(mgr.stats().faults, 0);
        let slot = mgr.ldb_port(ports[0]).unwrap().slots[0];
        assert_eq!(slot.state, SlotState::UnmapInProgressPendingMap);
        assert_eq!(slot.qid, Some(queues[0]));
        assert_eq!(slot.pending_qid, Some(queues[8]));
    }

    #[test]
    fn test_port_enable_disable() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, _, ports) = fx.domain(&mut mgr, 1, 1);
        let pair = mgr.create_dir_queue(domain, None).unwrap();

        mgr.disable_ldb_port(domain, ports[0]).unwrap();
        assert!(!fx.sim.ldb_cq_enabled(ports[0]));
        assert!(!mgr.ldb_port(ports[0]).unwrap().enabled);
        mgr.enable_ldb_port(domain, ports[0]).unwrap();
        assert!(fx.sim.ldb_cq_enabled(ports[0]));

        // Only the queue half of the pair is configured.
        assert_eq!(
            mgr.disable_dir_port(domain, pair).unwrap_err().status(),
            Some(DlbStatus::InvalidPortId)
        );
        assert_eq!(
            mgr.pending_port_unmaps(domain, LdbPortId::new(63)).unwrap_err().status(),
            Some(DlbStatus::InvalidPortId)
        );
    }

    #[test]
    fn test_dir_port_enable_disable() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, _, _) = fx.domain(&mut mgr, 1, 1);
        let d = mgr.domain(domain).unwrap();
        let args = CreateDirPortArgs {
            ldb_credit_pool_id: d.used.ldb_pools.head().unwrap().as_raw(),
            dir_credit_pool_id: d.used.dir_pools.head().unwrap().as_raw(),
            cq_depth: 8,
            queue_id: None,
        };
        let pair = mgr.create_dir_port(domain, &args).unwrap();

        mgr.disable_dir_port(domain, pair).unwrap();
        assert!(!fx.sim.dir_cq_enabled(pair));
        mgr.enable_dir_port(domain, pair).unwrap();
        assert!(fx.sim.dir_cq_enabled(pair));
        assert!(mgr.dir_pq_pair(pair).unwrap().enabled);
    }

    #[test]
    fn test_reset_returns_everything() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let before = mgr.get_num_resources();

        let (domain, queues, ports) = fx.domain(&mut mgr, 2, 2);
        mgr.map_qid(domain, ports[0], queues[0], 0).unwrap();
        mgr.map_qid(domain, ports[1], queues[1], 0).unwrap();
        mgr.create_dir_queue(domain, None).unwrap();
        mgr.start_domain(domain).unwrap();

        mgr.reset_domain(domain).unwrap();

        assert_eq!(mgr.get_num_resources(), before);
        assert_eq!(mgr.num_ports_in_use(), 0);
        assert!(!mgr.domain(domain).unwrap().configured);
        assert!(!fx.sim.ldb_cq_enabled(ports[0]));
        assert!(!fx.sim.ldb_pp_enabled(ports[0]));
        assert!(!fx.sim.ldb_queue_write_perm(queues[0]));
        assert!(!fx.sim.resets().is_empty());
        assert_eq!(mgr.stats().domains_reset, 1);
        assert_eq!(
            mgr.map_qid(domain, ports[0], queues[0], 0).unwrap_err().status(),
            Some(DlbStatus::DomainNotConfigured)
        );
    }

    #[test]
    fn test_reset_drains_cq_backlog() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (domain, queues, ports) = fx.domain(&mut mgr, 1, 1);
        mgr.map_qid(domain, ports[0], queues[0], 0).unwrap();
        mgr.start_domain(domain).unwrap();

        fx.sim.set_ldb_cq_inflight(ports[0], SimCounter::fixed(3));
        fx.sim.set_ldb_cq_tokens(ports[0], SimCounter::fixed(5));
        mgr.reset_domain(domain).unwrap();

        assert!(!fx.sim.ldb_hcws(ports[0]).is_empty());
        assert_eq!(fx.sim.open_pp_mappings(), 0);
    }

    #[test]
    fn test_reset_rejections_and_faults() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        assert_eq!(
            mgr.reset_domain(DomainId::new(0)).unwrap_err().status(),
            Some(DlbStatus::DomainNotConfigured)
        );
        assert_eq!(mgr.stats().faults, 0);

        let (domain, _, _) = fx.domain(&mut mgr, 1, 1);
        fx.sim.set_reset_stuck(true);
        let err = mgr.reset_domain(domain).unwrap_err();
        assert!(err.is_fault());
        assert_eq!(mgr.stats().faults, 1);
        assert_eq!(mgr.stats().domains_reset, 0);
    }

    #[test]
    fn test_domain_reusable_after_reset() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let (first, _, _) = fx.domain(&mut mgr, 4, 4);
        mgr.reset_domain(first).unwrap();

        let (second, queues, ports) = fx.domain(&mut mgr, 4, 4);
        assert_ne!(second, first);
        assert_eq!(queues.len(), 4);
        assert_eq!(ports.len(), 4);
        assert_eq!(
            mgr.function_resources().avail_domains.iter().last(),
            Some(first)
        );
    }
}
