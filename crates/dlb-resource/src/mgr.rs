//! The device-wide resource manager context.

use std::fmt;
use std::sync::Arc;

use dlb_hw::{
    DirPoolId, DirPortId, DlbHw, DomainId, LdbPoolId, LdbPortId, LdbQueueId, Platform, SnGroupId,
};
use dlb_types::{
    ldb_port_allocation_order, DeviceRevision, DlbStatus, NumResources, DEFAULT_SN_PER_QUEUE,
};
use log::info;

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::ResourceMgrConfig;
use crate::error::{ResourceError, Result};
use crate::registry::{
    CreditPool, DirPqPair, Domain, FunctionResources, LdbPort, LdbQueue, Owner, SnGroup,
};

/// Counters kept by the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceMgrStats {
    pub domains_created: u64,
    pub domain_create_rejections: u64,
    pub domains_reset: u64,
    pub pools_created: u64,
    pub queues_created: u64,
    pub ports_created: u64,
    pub maps_completed: u64,
    pub maps_deferred: u64,
    pub unmaps_completed: u64,
    pub unmaps_deferred: u64,
    pub faults: u64,
}

/// Resource manager for one DLB device.
///
/// Owns every arena and list describing the device's resources and talks
/// to the hardware through an injected [`DlbHw`]. All mutating operations
/// take `&mut self`; a multi-threaded caller wraps the manager in a mutex.
pub struct DlbResourceMgr {
    pub(crate) config: ResourceMgrConfig,
    pub(crate) hw: Arc<dyn DlbHw>,
    pub(crate) rsrcs: FunctionResources,
    pub(crate) domains: Vec<Domain>,
    pub(crate) ldb_queues: Vec<LdbQueue>,
    pub(crate) ldb_ports: Vec<LdbPort>,
    pub(crate) dir_pq_pairs: Vec<DirPqPair>,
    pub(crate) ldb_pools: Vec<CreditPool>,
    pub(crate) dir_pools: Vec<CreditPool>,
    pub(crate) sn_groups: Vec<SnGroup>,
    pub(crate) stats: ResourceMgrStats,
}

impl fmt::Debug for DlbResourceMgr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DlbResourceMgr")
            .field("config", &self.config)
            .field("used_domains", &self.rsrcs.used_domains)
            .field("stats", &self.stats)
            .finish()
    }
}

impl DlbResourceMgr {
    /// Builds the registry: every object starts in the function avail
    /// lists, every freelist bitmap starts full and every sequence-number
    /// group starts at 32 sequence numbers per queue.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Config`] for invalid limits and
    /// [`ResourceError::Hw`] if a freelist bitmap cannot be allocated.
    pub fn new(config: ResourceMgrConfig, hw: Arc<dyn DlbHw>) -> Result<Self> {
        config.validate()?;
        let limits = config.limits;

        let mut rsrcs = FunctionResources::new(&limits)?;

        let domains: Vec<Domain> = (0..limits.num_domains).map(Domain::new).collect();
        for domain in &domains {
            rsrcs.avail_domains.push_back(domain.id());
        }

        let ldb_queues: Vec<LdbQueue> = (0..limits.num_ldb_queues)
            .map(|id| LdbQueue {
                id,
                ..Default::default()
            })
            .collect();
        for queue in &ldb_queues {
            rsrcs.avail.ldb_queues.push_back(queue.id());
        }

        let ldb_ports: Vec<LdbPort> = (0..limits.num_ldb_ports)
            .map(|id| LdbPort {
                id,
                ..Default::default()
            })
            .collect();
        for raw in ldb_port_allocation_order(limits.num_ldb_ports) {
            rsrcs.avail.ldb_ports.push_back(LdbPortId::new(raw));
        }

        let dir_pq_pairs: Vec<DirPqPair> = (0..limits.num_dir_ports)
            .map(|id| DirPqPair {
                id,
                ..Default::default()
            })
            .collect();
        for pair in &dir_pq_pairs {
            rsrcs.avail.dir_pq_pairs.push_back(pair.id());
        }

        let pool = |id| CreditPool {
            id,
            ..Default::default()
        };
        let ldb_pools: Vec<CreditPool> = (0..limits.num_ldb_credit_pools).map(pool).collect();
        for p in &ldb_pools {
            rsrcs.avail.ldb_pools.push_back(p.ldb_id());
        }
        let dir_pools: Vec<CreditPool> = (0..limits.num_dir_credit_pools).map(pool).collect();
        for p in &dir_pools {
            rsrcs.avail.dir_pools.push_back(p.dir_id());
        }

        let sn_groups = (0..limits.num_sn_groups)
            .map(|id| SnGroup::new(id, DEFAULT_SN_PER_QUEUE))
            .collect();

        info!(
            "DLB resource manager initialized: {} domains, {} ldb queues, {} ldb ports, {} dir ports",
            limits.num_domains, limits.num_ldb_queues, limits.num_ldb_ports, limits.num_dir_ports
        );
        audit_log!(AuditRecord::new(
            AuditCategory::SystemLifecycle,
            "DlbResourceMgr",
            "resource_init"
        )
        .with_outcome(AuditOutcome::Success)
        .with_details(serde_json::json!({ "limits": limits })));

        Ok(Self {
            config,
            hw,
            rsrcs,
            domains,
            ldb_queues,
            ldb_ports,
            dir_pq_pairs,
            ldb_pools,
            dir_pools,
            sn_groups,
            stats: ResourceMgrStats::default(),
        })
    }

    /// Tears the registry down, releasing the freelist bitmaps.
    pub fn free(self) {
        info!(
            "DLB resource manager released with {} domains in use",
            self.rsrcs.used_domains.len()
        );
    }

    // ========== Accessors ==========

    pub fn config(&self) -> &ResourceMgrConfig {
        &self.config
    }

    pub fn stats(&self) -> &ResourceMgrStats {
        &self.stats
    }

    pub fn hw(&self) -> &Arc<dyn DlbHw> {
        &self.hw
    }

    pub fn function_resources(&self) -> &FunctionResources {
        &self.rsrcs
    }

    pub fn domain(&self, id: DomainId) -> Option<&Domain> {
        self.domains.get(id.index())
    }

    pub fn ldb_queue(&self, id: LdbQueueId) -> Option<&LdbQueue> {
        self.ldb_queues.get(id.index())
    }

    pub fn ldb_port(&self, id: LdbPortId) -> Option<&LdbPort> {
        self.ldb_ports.get(id.index())
    }

    pub fn dir_pq_pair(&self, id: DirPortId) -> Option<&DirPqPair> {
        self.dir_pq_pairs.get(id.index())
    }

    pub fn ldb_pool(&self, id: LdbPoolId) -> Option<&CreditPool> {
        self.ldb_pools.get(id.index())
    }

    pub fn dir_pool(&self, id: DirPoolId) -> Option<&CreditPool> {
        self.dir_pools.get(id.index())
    }

    pub fn sn_group(&self, id: SnGroupId) -> Option<&SnGroup> {
        self.sn_groups.get(id.index())
    }

    /// Available resource counts, including longest contiguous runs.
    pub fn get_num_resources(&self) -> NumResources {
        self.rsrcs.snapshot()
    }

    /// Ports of either kind currently owned by some domain.
    pub fn num_ports_in_use(&self) -> u32 {
        let ldb = self.ldb_ports.iter().filter(|p| p.owner.is_owned()).count();
        let dir = self
            .dir_pq_pairs
            .iter()
            .filter(|p| p.owner.is_owned())
            .count();
        (ldb + dir) as u32
    }

    pub fn device_revision(&self) -> DeviceRevision {
        self.hw.device_revision()
    }

    // ========== Internal helpers ==========

    /// Checks a caller-supplied domain id: out of range is
    /// `INVALID_DOMAIN_ID`, unconfigured is `DOMAIN_NOT_CONFIGURED`.
    pub(crate) fn verify_domain(&self, id: DomainId) -> Result<()> {
        let domain = self
            .domains
            .get(id.index())
            .ok_or(ResourceError::Rejected(DlbStatus::InvalidDomainId))?;
        if !domain.configured {
            return Err(ResourceError::Rejected(DlbStatus::DomainNotConfigured));
        }
        Ok(())
    }

    pub(crate) fn owning_domain(&self, port: LdbPortId, op: &'static str) -> Result<DomainId> {
        match self.ldb_ports[port.index()].owner {
            Owner::DomainUsed(domain) | Owner::DomainAvail(domain) => Ok(domain),
            Owner::FunctionAvail => Err(ResourceError::fault(
                op,
                format!("{} is not owned by any domain", port),
            )),
        }
    }

    /// Counts `err` in the stats and emits a fault record for it.
    pub(crate) fn note_fault(
        &mut self,
        action: &'static str,
        domain: Option<DomainId>,
        err: &ResourceError,
    ) {
        if !err.is_fault() {
            return;
        }
        self.stats.faults += 1;
        let mut record = AuditRecord::new(AuditCategory::ConsistencyFault, "DlbResourceMgr", action)
            .with_error(err.to_string());
        if let Some(domain) = domain {
            record = record.with_object_id(domain.to_string());
        }
        audit_log!(record);
    }

    /// Busy-waits one poll interval.
    pub(crate) fn poll_delay(&self) {
        if self.config.poll_delay_us > 0 {
            self.hw.udelay(self.config.poll_delay_us);
        }
    }
}
