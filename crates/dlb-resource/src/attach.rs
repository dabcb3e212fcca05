//! Domain Attach/Detach Transactions
//!
//! `attach_domain_resources` moves the requested resources from the
//! function pools into a domain's avail lists in a fixed order. Every
//! completed step is journaled, so a failing step rolls back all earlier
//! ones and the function pools end up exactly as they started.
//!
//! # Architecture
//!
//! ```text
//! verify_create_sched_domain_args  (pure precheck, first failing status)
//!          │
//!          ▼
//! attach: queues → ldb ports → dir ports → ldb credits → dir credits
//!         → ldb pools → dir pools → hist list → atomic inflights
//!          │ error at step k
//!          ▼
//! rollback: undo steps k-1 .. 0 in reverse
//! ```

use dlb_hw::{
    DirPoolId, DirPortId, DlbBitmap, DomainId, IntervalAllocator, LdbPoolId, LdbPortId,
    LdbQueueId, Platform, ResourceId, ResourceKind,
};
use dlb_types::{CreateSchedDomainArgs, DlbStatus};
use log::{debug, warn};

use crate::error::{ResourceError, Result};
use crate::mgr::DlbResourceMgr;
use crate::registry::{Freelist, MemberList, Owner};

/// Which function bitmap a carved range came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeClass {
    LdbCredits,
    DirCredits,
    HistList,
    AtomicInflights,
}

impl RangeClass {
    fn name(&self) -> &'static str {
        match self {
            RangeClass::LdbCredits => "ldb credits",
            RangeClass::DirCredits => "dir credits",
            RangeClass::HistList => "history list entries",
            RangeClass::AtomicInflights => "atomic inflights",
        }
    }
}

/// Undo record for one completed attach step.
#[derive(Debug)]
enum AttachStep {
    LdbQueues(Vec<LdbQueueId>),
    /// Each port with the function-list member it preceded.
    LdbPorts(Vec<(LdbPortId, Option<LdbPortId>)>),
    DirPorts(Vec<DirPortId>),
    LdbPools(Vec<LdbPoolId>),
    DirPools(Vec<DirPoolId>),
    Range(RangeClass),
}

/// Moves `n` ids from the head of `from` to the tail of `to`.
///
/// Returns `None`, with `from` untouched, if `from` runs dry.
fn move_heads<K: ResourceKind>(
    from: &mut MemberList<K>,
    to: &mut MemberList<K>,
    n: u32,
) -> Option<Vec<ResourceId<K>>> {
    let mut moved = Vec::with_capacity(n as usize);
    for _ in 0..n {
        match from.pop_front() {
            Some(id) => {
                to.push_back(id);
                moved.push(id);
            }
            None => {
                for id in moved.iter().rev() {
                    to.remove(*id);
                    from.push_front(*id);
                }
                return None;
            }
        }
    }
    Some(moved)
}

/// Returns `moved` from `from` back to the front of `to`, restoring its
/// original head order.
fn return_heads<K: ResourceKind>(
    from: &mut MemberList<K>,
    to: &mut MemberList<K>,
    moved: &[ResourceId<K>],
) {
    for id in moved.iter().rev() {
        from.remove(*id);
        to.push_front(*id);
    }
}

impl DlbResourceMgr {
    // ========== Validation ==========

    /// Checks `args` against the function pools without changing anything.
    ///
    /// Returns the first failing status in evaluation order; the port cap
    /// is evaluated last and overrides any earlier status.
    pub fn verify_create_sched_domain_args(
        &self,
        args: &CreateSchedDomainArgs,
    ) -> std::result::Result<(), DlbStatus> {
        let r = &self.rsrcs;

        let mut status = if r.num_avail_domains() < 1 {
            Some(DlbStatus::DomainUnavailable)
        } else if r.num_avail_ldb_queues() < args.num_ldb_queues {
            Some(DlbStatus::LdbQueuesUnavailable)
        } else if r.num_avail_ldb_ports() < args.num_ldb_ports {
            Some(DlbStatus::LdbPortsUnavailable)
        } else if args.num_ldb_queues > 0 && args.num_ldb_ports == 0 {
            Some(DlbStatus::LdbPortRequiredForLdbQueues)
        } else if r.num_avail_dir_pq_pairs() < args.num_dir_ports {
            Some(DlbStatus::DirPortsUnavailable)
        } else if r.avail_qed_freelist_entries.count_free() < args.num_ldb_credits {
            Some(DlbStatus::LdbCreditsUnavailable)
        } else if r.avail_dqed_freelist_entries.count_free() < args.num_dir_credits {
            Some(DlbStatus::DirCreditsUnavailable)
        } else if r.num_avail_ldb_credit_pools() < args.num_ldb_credit_pools {
            Some(DlbStatus::LdbCreditPoolsUnavailable)
        } else if r.num_avail_dir_credit_pools() < args.num_dir_credit_pools {
            Some(DlbStatus::DirCreditPoolsUnavailable)
        } else if r.avail_hist_list_entries.longest_free_run() < args.num_hist_list_entries {
            Some(DlbStatus::HistListEntriesUnavailable)
        } else if r.avail_aqed_freelist_entries.longest_free_run() < args.num_atomic_inflights {
            Some(DlbStatus::AtomicInflightsUnavailable)
        } else if r.avail_qed_freelist_entries.longest_free_run() < args.num_ldb_credits {
            Some(DlbStatus::QedFreelistEntriesUnavailable)
        } else if r.avail_dqed_freelist_entries.longest_free_run() < args.num_dir_credits {
            Some(DlbStatus::DqedFreelistEntriesUnavailable)
        } else {
            None
        };

        if let Some(cap) = self.config.port_cap {
            if cap.applies_to(self.hw.device_revision()) {
                let ports = self
                    .num_ports_in_use()
                    .saturating_add(args.num_ldb_ports)
                    .saturating_add(args.num_dir_ports);
                if ports >= cap.max_ports {
                    status = Some(if args.num_ldb_ports > 0 {
                        DlbStatus::LdbPortsUnavailable
                    } else {
                        DlbStatus::DirPortsUnavailable
                    });
                }
            }
        }

        match status {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    // ========== Port selection ==========

    /// Picks the next load-balanced port for `domain`, spreading domains
    /// across the port id space.
    pub(crate) fn next_ldb_port(&self, domain: DomainId) -> Option<LdbPortId> {
        let n = self.ldb_ports.len() as u32;
        if n == 0 {
            return None;
        }

        let owned_by_other = |raw: u32| {
            let owner = self.ldb_ports[raw as usize].owner;
            owner.is_owned() && owner.domain() != Some(domain)
        };
        let free = |raw: u32| !self.ldb_ports[raw as usize].owner.is_owned();
        let neighbors = |port: LdbPortId| {
            let id = port.as_raw();
            ((id + n - 1) % n, (id + 1) % n)
        };
        let avail = &self.rsrcs.avail.ldb_ports;

        avail
            .iter()
            .find(|port| {
                let (prev, next) = neighbors(*port);
                owned_by_other(prev) && owned_by_other(next)
            })
            .or_else(|| {
                avail.iter().find(|port| {
                    let (prev, next) = neighbors(*port);
                    (owned_by_other(prev) && free(next)) || (free(prev) && owned_by_other(next))
                })
            })
            .or_else(|| {
                avail.iter().find(|port| {
                    let (prev, next) = neighbors(*port);
                    free(prev) && free(next)
                })
            })
            .or_else(|| avail.head())
    }

    // ========== Attach ==========

    /// Moves the resources named by `args` into `domain`'s avail lists and
    /// marks the domain configured.
    ///
    /// # Errors
    ///
    /// A step that cannot be satisfied returns its `*_UNAVAILABLE` status
    /// after every earlier step has been undone; `domain` stays
    /// unconfigured.
    pub(crate) fn attach_domain_resources(
        &mut self,
        domain: DomainId,
        args: &CreateSchedDomainArgs,
    ) -> Result<()> {
        let mut journal = Vec::new();
        if let Err(err) = self.attach_steps(domain, args, &mut journal) {
            warn!(
                "attach to {} failed after {} steps: {}",
                domain,
                journal.len(),
                err
            );
            self.rollback_attach(domain, journal)?;
            return Err(err);
        }

        let d = &mut self.domains[domain.index()];
        d.configured = true;
        d.started = false;
        Ok(())
    }

    fn attach_steps(
        &mut self,
        domain: DomainId,
        args: &CreateSchedDomainArgs,
        journal: &mut Vec<AttachStep>,
    ) -> Result<()> {
        journal.push(AttachStep::LdbQueues(
            self.attach_ldb_queues(domain, args.num_ldb_queues)?,
        ));
        journal.push(AttachStep::LdbPorts(
            self.attach_ldb_ports(domain, args.num_ldb_ports)?,
        ));
        journal.push(AttachStep::DirPorts(
            self.attach_dir_ports(domain, args.num_dir_ports)?,
        ));
        self.attach_range(domain, RangeClass::LdbCredits, args.num_ldb_credits)?;
        journal.push(AttachStep::Range(RangeClass::LdbCredits));
        self.attach_range(domain, RangeClass::DirCredits, args.num_dir_credits)?;
        journal.push(AttachStep::Range(RangeClass::DirCredits));
        journal.push(AttachStep::LdbPools(
            self.attach_ldb_pools(domain, args.num_ldb_credit_pools)?,
        ));
        journal.push(AttachStep::DirPools(
            self.attach_dir_pools(domain, args.num_dir_credit_pools)?,
        ));
        self.attach_range(domain, RangeClass::HistList, args.num_hist_list_entries)?;
        journal.push(AttachStep::Range(RangeClass::HistList));
        self.attach_range(
            domain,
            RangeClass::AtomicInflights,
            args.num_atomic_inflights,
        )?;
        journal.push(AttachStep::Range(RangeClass::AtomicInflights));
        Ok(())
    }

    fn attach_ldb_queues(&mut self, domain: DomainId, n: u32) -> Result<Vec<LdbQueueId>> {
        if self.rsrcs.num_avail_ldb_queues() < n {
            return Err(DlbStatus::LdbQueuesUnavailable.into());
        }
        let moved = move_heads(
            &mut self.rsrcs.avail.ldb_queues,
            &mut self.domains[domain.index()].avail.ldb_queues,
            n,
        )
        .ok_or_else(|| ResourceError::fault("attach_ldb_queues", "avail list ran dry"))?;
        for id in &moved {
            self.ldb_queues[id.index()].owner = Owner::DomainAvail(domain);
        }
        Ok(moved)
    }

    fn attach_ldb_ports(
        &mut self,
        domain: DomainId,
        n: u32,
    ) -> Result<Vec<(LdbPortId, Option<LdbPortId>)>> {
        if self.rsrcs.num_avail_ldb_ports() < n {
            return Err(DlbStatus::LdbPortsUnavailable.into());
        }

        let mut moved = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let Some(port) = self.next_ldb_port(domain) else {
                self.return_ldb_ports(domain, &moved);
                return Err(ResourceError::fault(
                    "attach_ldb_ports",
                    "avail list ran dry",
                ));
            };
            let next = self.rsrcs.avail.ldb_ports.next_of(port);
            self.rsrcs.avail.ldb_ports.remove(port);
            self.ldb_ports[port.index()].owner = Owner::DomainAvail(domain);
            self.domains[domain.index()].avail.ldb_ports.push_back(port);
            debug!("{} attached to {}", port, domain);
            moved.push((port, next));
        }
        Ok(moved)
    }

    fn attach_dir_ports(&mut self, domain: DomainId, n: u32) -> Result<Vec<DirPortId>> {
        if self.rsrcs.num_avail_dir_pq_pairs() < n {
            return Err(DlbStatus::DirPortsUnavailable.into());
        }
        let moved = move_heads(
            &mut self.rsrcs.avail.dir_pq_pairs,
            &mut self.domains[domain.index()].avail.dir_pq_pairs,
            n,
        )
        .ok_or_else(|| ResourceError::fault("attach_dir_ports", "avail list ran dry"))?;
        for id in &moved {
            self.dir_pq_pairs[id.index()].owner = Owner::DomainAvail(domain);
        }
        Ok(moved)
    }

    fn attach_ldb_pools(&mut self, domain: DomainId, n: u32) -> Result<Vec<LdbPoolId>> {
        if self.rsrcs.num_avail_ldb_credit_pools() < n {
            return Err(DlbStatus::LdbCreditPoolsUnavailable.into());
        }
        let moved = move_heads(
            &mut self.rsrcs.avail.ldb_pools,
            &mut self.domains[domain.index()].avail.ldb_pools,
            n,
        )
        .ok_or_else(|| ResourceError::fault("attach_ldb_pools", "avail list ran dry"))?;
        for id in &moved {
            self.ldb_pools[id.index()].owner = Owner::DomainAvail(domain);
        }
        Ok(moved)
    }

    fn attach_dir_pools(&mut self, domain: DomainId, n: u32) -> Result<Vec<DirPoolId>> {
        if self.rsrcs.num_avail_dir_credit_pools() < n {
            return Err(DlbStatus::DirCreditPoolsUnavailable.into());
        }
        let moved = move_heads(
            &mut self.rsrcs.avail.dir_pools,
            &mut self.domains[domain.index()].avail.dir_pools,
            n,
        )
        .ok_or_else(|| ResourceError::fault("attach_dir_pools", "avail list ran dry"))?;
        for id in &moved {
            self.dir_pools[id.index()].owner = Owner::DomainAvail(domain);
        }
        Ok(moved)
    }

    /// Splits the function bitmap and the domain range for `class`.
    fn range_slot(&mut self, domain: DomainId, class: RangeClass) -> (&mut DlbBitmap, &mut Freelist) {
        let d = &mut self.domains[domain.index()];
        let r = &mut self.rsrcs;
        match class {
            RangeClass::LdbCredits => (&mut r.avail_qed_freelist_entries, &mut d.qed_freelist),
            RangeClass::DirCredits => (&mut r.avail_dqed_freelist_entries, &mut d.dqed_freelist),
            RangeClass::HistList => (&mut r.avail_hist_list_entries, &mut d.hist_list),
            RangeClass::AtomicInflights => {
                (&mut r.avail_aqed_freelist_entries, &mut d.aqed_freelist)
            }
        }
    }

    /// Carves `n` contiguous entries of `class` for `domain`.
    fn attach_range(&mut self, domain: DomainId, class: RangeClass, n: u32) -> Result<()> {
        let (bitmap, range) = self.range_slot(domain, class);

        // Credits distinguish exhaustion from fragmentation.
        let (exhausted, fragmented) = match class {
            RangeClass::LdbCredits => (
                Some(DlbStatus::LdbCreditsUnavailable),
                DlbStatus::QedFreelistEntriesUnavailable,
            ),
            RangeClass::DirCredits => (
                Some(DlbStatus::DirCreditsUnavailable),
                DlbStatus::DqedFreelistEntriesUnavailable,
            ),
            RangeClass::HistList => (None, DlbStatus::HistListEntriesUnavailable),
            RangeClass::AtomicInflights => (None, DlbStatus::AtomicInflightsUnavailable),
        };

        if let Some(status) = exhausted {
            if bitmap.count_free() < n {
                return Err(status.into());
            }
        }
        if n == 0 {
            return Ok(());
        }

        let base = bitmap.find_free_run(n).ok_or(ResourceError::Rejected(fragmented))?;
        bitmap.clear_range(base, n)?;
        *range = Freelist::new(base, n);
        debug!("{}: {} {} at {}", domain, n, class.name(), base);
        Ok(())
    }

    // ========== Rollback ==========

    /// Relinks ports in front of the members they preceded, newest first,
    /// so the function list regains its original order.
    fn return_ldb_ports(&mut self, domain: DomainId, moved: &[(LdbPortId, Option<LdbPortId>)]) {
        for &(port, next) in moved.iter().rev() {
            self.ldb_ports[port.index()].owner = Owner::FunctionAvail;
            self.domains[domain.index()].avail.ldb_ports.remove(port);
            self.rsrcs.avail.ldb_ports.insert_before(port, next);
        }
    }

    /// Returns a carved range to its bitmap and zeroes the domain range.
    fn return_range(&mut self, domain: DomainId, class: RangeClass) -> Result<()> {
        let (bitmap, range) = self.range_slot(domain, class);
        if !range.is_empty() {
            bitmap.set_range(range.base, range.len()).map_err(|err| {
                ResourceError::fault(
                    "return_range",
                    format!("cannot return {} of {}: {}", class.name(), domain, err),
                )
            })?;
        }
        *range = Freelist::default();
        Ok(())
    }

    fn rollback_attach(&mut self, domain: DomainId, journal: Vec<AttachStep>) -> Result<()> {
        for step in journal.into_iter().rev() {
            let d = domain.index();
            match step {
                AttachStep::LdbQueues(ids) => {
                    for id in &ids {
                        self.ldb_queues[id.index()].owner = Owner::FunctionAvail;
                    }
                    return_heads(
                        &mut self.domains[d].avail.ldb_queues,
                        &mut self.rsrcs.avail.ldb_queues,
                        &ids,
                    );
                }
                AttachStep::LdbPorts(ids) => self.return_ldb_ports(domain, &ids),
                AttachStep::DirPorts(ids) => {
                    for id in &ids {
                        self.dir_pq_pairs[id.index()].owner = Owner::FunctionAvail;
                    }
                    return_heads(
                        &mut self.domains[d].avail.dir_pq_pairs,
                        &mut self.rsrcs.avail.dir_pq_pairs,
                        &ids,
                    );
                }
                AttachStep::LdbPools(ids) => {
                    for id in &ids {
                        self.ldb_pools[id.index()].owner = Owner::FunctionAvail;
                    }
                    return_heads(
                        &mut self.domains[d].avail.ldb_pools,
                        &mut self.rsrcs.avail.ldb_pools,
                        &ids,
                    );
                }
                AttachStep::DirPools(ids) => {
                    for id in &ids {
                        self.dir_pools[id.index()].owner = Owner::FunctionAvail;
                    }
                    return_heads(
                        &mut self.domains[d].avail.dir_pools,
                        &mut self.rsrcs.avail.dir_pools,
                        &ids,
                    );
                }
                AttachStep::Range(class) => self.return_range(domain, class)?,
            }
        }
        Ok(())
    }

    // ========== Detach ==========

    /// Returns everything `domain` owns to the function pools and moves
    /// the domain back to the avail list.
    ///
    /// # Errors
    ///
    /// A recorded range the function bitmap refuses to take back, or a
    /// sequence-number slot that was not allocated, is a fault.
    pub(crate) fn detach_all(&mut self, domain: DomainId) -> Result<()> {
        const OP: &str = "reset_software_state";
        let d = domain.index();

        for id in self.domains[d].used.ldb_queues.to_vec() {
            let queue = &mut self.ldb_queues[id.index()];
            if let Some((group, slot)) = queue.sn.take() {
                if !self.sn_groups[group.index()].free_slot(slot) {
                    return Err(ResourceError::fault(
                        OP,
                        format!("{} slot {} of {} was not allocated", group, slot, id),
                    ));
                }
            }
            *queue = Default::default();
            queue.id = id.as_raw();
        }
        let queues = [
            std::mem::take(&mut self.domains[d].used.ldb_queues),
            std::mem::take(&mut self.domains[d].avail.ldb_queues),
        ];
        for id in queues.iter().flat_map(|list| list.iter()) {
            self.ldb_queues[id.index()].owner = Owner::FunctionAvail;
            self.rsrcs.avail.ldb_queues.push_back(id);
        }

        let ports = [
            std::mem::take(&mut self.domains[d].used.ldb_ports),
            std::mem::take(&mut self.domains[d].avail.ldb_ports),
        ];
        for id in ports.iter().flat_map(|list| list.iter()) {
            let port = &mut self.ldb_ports[id.index()];
            *port = Default::default();
            port.id = id.as_raw();
            self.rsrcs.avail.ldb_ports.push_back(id);
        }

        let pairs = [
            std::mem::take(&mut self.domains[d].used.dir_pq_pairs),
            std::mem::take(&mut self.domains[d].avail.dir_pq_pairs),
        ];
        for id in pairs.iter().flat_map(|list| list.iter()) {
            let pair = &mut self.dir_pq_pairs[id.index()];
            *pair = Default::default();
            pair.id = id.as_raw();
            self.rsrcs.avail.dir_pq_pairs.push_back(id);
        }

        for class in [
            RangeClass::HistList,
            RangeClass::LdbCredits,
            RangeClass::DirCredits,
            RangeClass::AtomicInflights,
        ] {
            self.return_range(domain, class)?;
        }

        let ldb_pools = [
            std::mem::take(&mut self.domains[d].used.ldb_pools),
            std::mem::take(&mut self.domains[d].avail.ldb_pools),
        ];
        for id in ldb_pools.iter().flat_map(|list| list.iter()) {
            let pool = &mut self.ldb_pools[id.index()];
            *pool = Default::default();
            pool.id = id.as_raw();
            self.rsrcs.avail.ldb_pools.push_back(id);
        }

        let dir_pools = [
            std::mem::take(&mut self.domains[d].used.dir_pools),
            std::mem::take(&mut self.domains[d].avail.dir_pools),
        ];
        for id in dir_pools.iter().flat_map(|list| list.iter()) {
            let pool = &mut self.dir_pools[id.index()];
            *pool = Default::default();
            pool.id = id.as_raw();
            self.rsrcs.avail.dir_pools.push_back(id);
        }

        self.domains[d].clear();
        self.rsrcs.used_domains.remove(domain);
        self.rsrcs.avail_domains.push_back(domain);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortCapPolicy;
    use crate::testing::Fixture;
    use dlb_types::{DeviceLimits, DeviceRevision, NumResources};
    use pretty_assertions::assert_eq;

    fn args() -> CreateSchedDomainArgs {
        CreateSchedDomainArgs {
            num_ldb_queues: 2,
            num_ldb_ports: 2,
            num_dir_ports: 2,
            num_atomic_inflights: 64,
            num_hist_list_entries: 128,
            num_ldb_credits: 512,
            num_dir_credits: 256,
            num_ldb_credit_pools: 1,
            num_dir_credit_pools: 1,
        }
    }

    fn head_domain(mgr: &DlbResourceMgr) -> DomainId {
        mgr.rsrcs.avail_domains.head().unwrap()
    }

    #[test]
    fn test_validate_first_failure_order() {
        let fx = Fixture::new();
        let mgr = fx.mgr();

        let too_many = CreateSchedDomainArgs {
            num_ldb_queues: 1000,
            num_ldb_ports: 1000,
            ..args()
        };
        assert_eq!(
            mgr.verify_create_sched_domain_args(&too_many),
            Err(DlbStatus::LdbQueuesUnavailable)
        );

        let no_ports = CreateSchedDomainArgs {
            num_ldb_ports: 0,
            ..args()
        };
        assert_eq!(
            mgr.verify_create_sched_domain_args(&no_ports),
            Err(DlbStatus::LdbPortRequiredForLdbQueues)
        );

        let credits = CreateSchedDomainArgs {
            num_dir_credits: 5000,
            num_hist_list_entries: 6000,
            ..args()
        };
        assert_eq!(
            mgr.verify_create_sched_domain_args(&credits),
            Err(DlbStatus::DirCreditsUnavailable)
        );

        assert_eq!(mgr.verify_create_sched_domain_args(&args()), Ok(()));
    }

    #[test]
    fn test_validate_port_cap_overrides() {
        let limits = DeviceLimits::default();
        let fx = Fixture::with_revision(limits, DeviceRevision::A2);
        let mgr = fx.mgr_with(|config| {
            config.with_port_cap(Some(PortCapPolicy {
                min_revision: DeviceRevision::B0,
                max_ports: 4,
            }))
        });

        // The cap wins over the earlier queue shortage.
        let request = CreateSchedDomainArgs {
            num_ldb_queues: 1000,
            ..args()
        };
        assert_eq!(
            mgr.verify_create_sched_domain_args(&request),
            Err(DlbStatus::LdbPortsUnavailable)
        );

        let dir_only = CreateSchedDomainArgs {
            num_dir_ports: 4,
            ..Default::default()
        };
        assert_eq!(
            mgr.verify_create_sched_domain_args(&dir_only),
            Err(DlbStatus::DirPortsUnavailable)
        );

        let small = CreateSchedDomainArgs {
            num_dir_ports: 3,
            ..Default::default()
        };
        assert_eq!(mgr.verify_create_sched_domain_args(&small), Ok(()));
    }

    #[test]
    fn test_attach_moves_exact_counts() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let before = mgr.get_num_resources();
        let domain = head_domain(&mgr);

        mgr.attach_domain_resources(domain, &args()).unwrap();

        let after = mgr.get_num_resources();
        assert_eq!(after.num_ldb_queues, before.num_ldb_queues - 2);
        assert_eq!(after.num_ldb_ports, before.num_ldb_ports - 2);
        assert_eq!(after.num_dir_ports, before.num_dir_ports - 2);
        assert_eq!(after.num_ldb_credits, before.num_ldb_credits - 512);
        assert_eq!(after.num_dir_credits, before.num_dir_credits - 256);
        assert_eq!(after.num_hist_list_entries, before.num_hist_list_entries - 128);
        assert_eq!(after.num_atomic_inflights, before.num_atomic_inflights - 64);

        let d = mgr.domain(domain).unwrap();
        assert!(d.configured);
        assert_eq!(d.avail.ldb_queues.len(), 2);
        assert_eq!(d.avail.ldb_ports.len(), 2);
        assert_eq!(d.qed_freelist.len(), 512);
        assert_eq!(d.hist_list.len(), 128);
        for port in d.avail.ldb_ports.iter() {
            assert_eq!(mgr.ldb_ports[port.index()].owner, Owner::DomainAvail(domain));
        }
    }

    #[test]
    fn test_attach_failure_rolls_back_everything() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let before: NumResources = mgr.get_num_resources();
        let domain = head_domain(&mgr);

        // Fails at the last step, after everything else moved.
        let request = CreateSchedDomainArgs {
            num_atomic_inflights: 4096,
            ..args()
        };
        let err = mgr.attach_domain_resources(domain, &request).unwrap_err();
        assert_eq!(err.status(), Some(DlbStatus::AtomicInflightsUnavailable));

        assert_eq!(mgr.get_num_resources(), before);
        let d = mgr.domain(domain).unwrap();
        assert!(!d.configured);
        assert!(d.avail.is_empty());
        assert_eq!(d.qed_freelist, Freelist::default());
        assert!(mgr.ldb_ports.iter().all(|p| p.owner == Owner::FunctionAvail));
        let order: Vec<u32> = mgr.rsrcs.avail.ldb_queues.iter().take(3).map(|q| q.as_raw()).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_rollback_at_each_step_restores_function_lists() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        // A first domain leaves gaps so the next one takes ports from the
        // middle of the function list.
        let first = head_domain(&mgr);
        mgr.attach_domain_resources(
            first,
            &CreateSchedDomainArgs {
                num_ldb_ports: 3,
                ..Default::default()
            },
        )
        .unwrap();

        let failures = [
            (
                CreateSchedDomainArgs {
                    num_ldb_ports: 1000,
                    ..args()
                },
                DlbStatus::LdbPortsUnavailable,
            ),
            (
                CreateSchedDomainArgs {
                    num_dir_ports: 1000,
                    ..args()
                },
                DlbStatus::DirPortsUnavailable,
            ),
            (
                CreateSchedDomainArgs {
                    num_dir_credits: 5000,
                    ..args()
                },
                DlbStatus::DirCreditsUnavailable,
            ),
            (
                CreateSchedDomainArgs {
                    num_ldb_credit_pools: 1000,
                    ..args()
                },
                DlbStatus::LdbCreditPoolsUnavailable,
            ),
            (
                CreateSchedDomainArgs {
                    num_dir_credit_pools: 1000,
                    ..args()
                },
                DlbStatus::DirCreditPoolsUnavailable,
            ),
            (
                CreateSchedDomainArgs {
                    num_hist_list_entries: 6000,
                    ..args()
                },
                DlbStatus::HistListEntriesUnavailable,
            ),
        ];

        let domain = DomainId::new(first.as_raw() + 1);
        for (request, status) in failures {
            let counts = mgr.get_num_resources();
            let lists = mgr.rsrcs.avail.clone();
            let bitmaps = (
                mgr.rsrcs.avail_qed_freelist_entries.clone(),
                mgr.rsrcs.avail_dqed_freelist_entries.clone(),
                mgr.rsrcs.avail_hist_list_entries.clone(),
            );

            let err = mgr.attach_domain_resources(domain, &request).unwrap_err();
            assert_eq!(err.status(), Some(status));

            assert_eq!(mgr.get_num_resources(), counts);
            assert_eq!(mgr.rsrcs.avail, lists);
            assert_eq!(mgr.rsrcs.avail_qed_freelist_entries, bitmaps.0);
            assert_eq!(mgr.rsrcs.avail_dqed_freelist_entries, bitmaps.1);
            assert_eq!(mgr.rsrcs.avail_hist_list_entries, bitmaps.2);
            let d = mgr.domain(domain).unwrap();
            assert!(!d.configured);
            assert!(d.avail.is_empty());
        }

        // The restored order still drives the same port choice.
        let expected = mgr.next_ldb_port(domain);
        mgr.attach_domain_resources(domain, &args()).unwrap();
        assert_eq!(mgr.domain(domain).unwrap().avail.ldb_ports.head(), expected);
    }

    #[test]
    fn test_credit_fragmentation_is_distinct() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        // Punch a hole in the middle of the ldb credit bitmap.
        mgr.rsrcs
            .avail_qed_freelist_entries
            .clear_range(8000, 1)
            .unwrap();
        let domain = head_domain(&mgr);

        let request = CreateSchedDomainArgs {
            num_ldb_credits: 9000,
            ..Default::default()
        };
        let err = mgr.attach_domain_resources(domain, &request).unwrap_err();
        assert_eq!(err.status(), Some(DlbStatus::QedFreelistEntriesUnavailable));
    }

    #[test]
    fn test_next_ldb_port_spreads_domains() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let first = head_domain(&mgr);
        mgr.attach_domain_resources(
            first,
            &CreateSchedDomainArgs {
                num_ldb_ports: 2,
                ..Default::default()
            },
        )
        .unwrap();

        let ports: Vec<u32> = mgr
            .domain(first)
            .unwrap()
            .avail
            .ldb_ports
            .iter()
            .map(|p| p.as_raw())
            .collect();
        assert_eq!(ports.len(), 2);
        let gap = ports[0].abs_diff(ports[1]);
        assert!(gap != 1 && gap != 63, "adjacent ports {:?}", ports);
    }

    #[test]
    fn test_next_ldb_port_prefers_boxed_in_port() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let other = DomainId::new(5);
        let me = DomainId::new(6);
        mgr.ldb_ports[9].owner = Owner::DomainAvail(other);
        mgr.ldb_ports[11].owner = Owner::DomainUsed(other);
        mgr.rsrcs.avail.ldb_ports.remove(LdbPortId::new(9));
        mgr.rsrcs.avail.ldb_ports.remove(LdbPortId::new(11));

        assert_eq!(mgr.next_ldb_port(me), Some(LdbPortId::new(10)));
        // Ports owned by the requesting domain do not count as "other".
        assert_ne!(mgr.next_ldb_port(other), Some(LdbPortId::new(10)));
    }

    #[test]
    fn test_detach_restores_function_pools() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let before = mgr.get_num_resources();
        let domain = head_domain(&mgr);
        mgr.attach_domain_resources(domain, &args()).unwrap();
        mgr.rsrcs.avail_domains.remove(domain);
        mgr.rsrcs.used_domains.push_back(domain);

        mgr.detach_all(domain).unwrap();

        assert_eq!(mgr.get_num_resources(), before);
        assert!(!mgr.domain(domain).unwrap().configured);
        assert!(mgr.rsrcs.used_domains.is_empty());
    }

    #[test]
    fn test_detach_range_mismatch_is_fault() {
        let fx = Fixture::new();
        let mut mgr = fx.mgr();
        let domain = head_domain(&mgr);
        mgr.attach_domain_resources(domain, &args()).unwrap();

        // Pretend the bitmap already got the history list back.
        let range = mgr.domain(domain).unwrap().hist_list;
        mgr.rsrcs
            .avail_hist_list_entries
            .set_range(range.base, range.len())
            .unwrap();

        assert!(mgr.detach_all(domain).unwrap_err().is_fault());
    }
}
