//! Function-level pools: what has not been handed to any domain.

use dlb_hw::{DlbBitmap, DomainKind, HwResult, IntervalAllocator};
use dlb_types::{DeviceLimits, NumResources};

use super::types::{MemberList, ResourceLists};

/// Resources owned by the physical function.
///
/// Counts are derived from list lengths and bitmap population, so they
/// can never disagree with the lists themselves.
#[derive(Debug, Clone)]
pub struct FunctionResources {
    pub avail_domains: MemberList<DomainKind>,
    pub used_domains: MemberList<DomainKind>,
    pub avail: ResourceLists,
    pub avail_hist_list_entries: DlbBitmap,
    pub avail_qed_freelist_entries: DlbBitmap,
    pub avail_dqed_freelist_entries: DlbBitmap,
    pub avail_aqed_freelist_entries: DlbBitmap,
}

impl FunctionResources {
    /// Allocates the four freelist bitmaps sized by `limits`, all free.
    pub fn new(limits: &DeviceLimits) -> HwResult<Self> {
        let filled = |nbits: u32| -> HwResult<DlbBitmap> {
            let mut bitmap = DlbBitmap::alloc(nbits)?;
            bitmap.fill();
            Ok(bitmap)
        };

        Ok(Self {
            avail_domains: MemberList::default(),
            used_domains: MemberList::default(),
            avail: ResourceLists::default(),
            avail_hist_list_entries: filled(limits.num_hist_list_entries)?,
            avail_qed_freelist_entries: filled(limits.num_ldb_credits)?,
            avail_dqed_freelist_entries: filled(limits.num_dir_credits)?,
            avail_aqed_freelist_entries: filled(limits.num_atomic_inflights)?,
        })
    }

    pub fn num_avail_domains(&self) -> u32 {
        self.avail_domains.count()
    }

    pub fn num_avail_ldb_queues(&self) -> u32 {
        self.avail.ldb_queues.count()
    }

    pub fn num_avail_ldb_ports(&self) -> u32 {
        self.avail.ldb_ports.count()
    }

    pub fn num_avail_dir_pq_pairs(&self) -> u32 {
        self.avail.dir_pq_pairs.count()
    }

    pub fn num_avail_ldb_credit_pools(&self) -> u32 {
        self.avail.ldb_pools.count()
    }

    pub fn num_avail_dir_credit_pools(&self) -> u32 {
        self.avail.dir_pools.count()
    }

    /// Snapshot of the available counts and longest contiguous runs.
    pub fn snapshot(&self) -> NumResources {
        NumResources {
            num_sched_domains: self.num_avail_domains(),
            num_ldb_queues: self.num_avail_ldb_queues(),
            num_ldb_ports: self.num_avail_ldb_ports(),
            num_dir_ports: self.num_avail_dir_pq_pairs(),
            num_atomic_inflights: self.avail_aqed_freelist_entries.count_free(),
            max_contiguous_atomic_inflights: self.avail_aqed_freelist_entries.longest_free_run(),
            num_hist_list_entries: self.avail_hist_list_entries.count_free(),
            max_contiguous_hist_list_entries: self.avail_hist_list_entries.longest_free_run(),
            num_ldb_credits: self.avail_qed_freelist_entries.count_free(),
            max_contiguous_ldb_credits: self.avail_qed_freelist_entries.longest_free_run(),
            num_dir_credits: self.avail_dqed_freelist_entries.count_free(),
            max_contiguous_dir_credits: self.avail_dqed_freelist_entries.longest_free_run(),
            num_ldb_credit_pools: self.num_avail_ldb_credit_pools(),
            num_dir_credit_pools: self.num_avail_dir_credit_pools(),
        }
    }
}
