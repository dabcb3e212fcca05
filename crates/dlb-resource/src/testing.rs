//! Shared fixtures for unit tests.

use std::sync::Arc;

use dlb_hw::sim::SimDlb;
use dlb_hw::{DomainId, LdbPortId, LdbQueueId};
use dlb_types::{
    CreateLdbPortArgs, CreateLdbQueueArgs, CreateSchedDomainArgs, DeviceLimits, DeviceRevision,
};

use crate::config::ResourceMgrConfig;
use crate::mgr::DlbResourceMgr;

/// A simulated device plus the limits it was built with.
pub(crate) struct Fixture {
    pub sim: Arc<SimDlb>,
    pub limits: DeviceLimits,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_revision(DeviceLimits::default(), DeviceRevision::default())
    }

    pub fn with_revision(limits: DeviceLimits, revision: DeviceRevision) -> Self {
        Self {
            sim: Arc::new(SimDlb::new(&limits).with_revision(revision)),
            limits,
        }
    }

    /// Manager with short poll loops so failing drains finish quickly.
    pub fn mgr(&self) -> DlbResourceMgr {
        self.mgr_with(|config| config)
    }

    pub fn mgr_with(
        &self,
        tweak: impl FnOnce(ResourceMgrConfig) -> ResourceMgrConfig,
    ) -> DlbResourceMgr {
        let config = ResourceMgrConfig::default()
            .with_limits(self.limits)
            .with_cq_comp_check_loops(64)
            .with_qid_empty_check_loops(64)
            .with_reset_poll_loops(64);
        DlbResourceMgr::new(tweak(config), self.sim.clone()).unwrap()
    }

    /// Creates a domain with one ldb pool, one dir pool, `num_queues`
    /// configured queues and `num_ports` configured ports.
    pub fn domain(
        &self,
        mgr: &mut DlbResourceMgr,
        num_queues: u32,
        num_ports: u32,
    ) -> (DomainId, Vec<LdbQueueId>, Vec<LdbPortId>) {
        let domain = mgr
            .create_sched_domain(&CreateSchedDomainArgs {
                num_ldb_queues: num_queues,
                num_ldb_ports: num_ports,
                num_dir_ports: 2,
                num_atomic_inflights: 16 * num_queues,
                num_hist_list_entries: 32 * num_ports,
                num_ldb_credits: 1024,
                num_dir_credits: 256,
                num_ldb_credit_pools: 1,
                num_dir_credit_pools: 1,
            })
            .unwrap();
        let ldb_pool = mgr.create_ldb_pool(domain, 512).unwrap();
        let dir_pool = mgr.create_dir_pool(domain, 128).unwrap();

        let queues = (0..num_queues)
            .map(|_| {
                mgr.create_ldb_queue(
                    domain,
                    &CreateLdbQueueArgs {
                        num_sequence_numbers: 0,
                        num_qid_inflights: 32,
                        num_atomic_inflights: 16,
                    },
                )
                .unwrap()
            })
            .collect();
        let ports = (0..num_ports)
            .map(|_| {
                mgr.create_ldb_port(
                    domain,
                    &CreateLdbPortArgs {
                        ldb_credit_pool_id: ldb_pool.as_raw(),
                        dir_credit_pool_id: dir_pool.as_raw(),
                        cq_depth: 32,
                        cq_history_list_size: 32,
                    },
                )
                .unwrap()
            })
            .collect();
        (domain, queues, ports)
    }
}
