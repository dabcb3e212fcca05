//! Arena entries and the ordered membership lists that tie them together.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use dlb_hw::{
    DirPoolId, DirPoolKind, DirPortId, DirPortKind, DomainId, LdbPoolId, LdbPoolKind, LdbPortId,
    LdbPortKind, LdbQueueId, LdbQueueKind, ResourceId, ResourceKind, SnGroupId,
};
use dlb_types::{MAX_LDB_SN_ALLOC, MAX_QIDS_PER_LDB_CQ};

use crate::mapping::SlotState;

// ========== Ownership ==========

/// Which list currently holds an arena entry.
///
/// Every entry is in exactly one list at all times; the tag mirrors that
/// membership so lookups never have to scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Owner {
    /// Function-level avail list.
    #[default]
    FunctionAvail,
    /// A domain's avail sub-list (attached, not yet configured).
    DomainAvail(DomainId),
    /// A domain's used sub-list (configured).
    DomainUsed(DomainId),
}

impl Owner {
    pub fn domain(&self) -> Option<DomainId> {
        match self {
            Owner::FunctionAvail => None,
            Owner::DomainAvail(id) | Owner::DomainUsed(id) => Some(*id),
        }
    }

    pub fn is_owned(&self) -> bool {
        !matches!(self, Owner::FunctionAvail)
    }

    /// Returns true if the entry is in `domain`'s used list.
    pub fn is_used_by(&self, domain: DomainId) -> bool {
        *self == Owner::DomainUsed(domain)
    }
}

// ========== Membership lists ==========

/// Neighbours of one list member, by raw id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    prev: Option<u32>,
    next: Option<u32>,
}

/// Ordered list of resource ids.
///
/// A doubly linked list threaded through a map keyed by raw id, so any
/// member can be unlinked or relinked next to a neighbour in constant
/// time. Membership is also recorded in each entry's `Owner` tag.
pub struct MemberList<K: ResourceKind> {
    links: HashMap<u32, Link>,
    head: Option<u32>,
    tail: Option<u32>,
    _kind: PhantomData<K>,
}

impl<K: ResourceKind> Default for MemberList<K> {
    fn default() -> Self {
        Self {
            links: HashMap::new(),
            head: None,
            tail: None,
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> Clone for MemberList<K> {
    fn clone(&self) -> Self {
        Self {
            links: self.links.clone(),
            head: self.head,
            tail: self.tail,
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> fmt::Debug for MemberList<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|id| id.as_raw()))
            .finish()
    }
}

impl<K: ResourceKind> PartialEq for MemberList<K> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<K: ResourceKind> MemberList<K> {
    pub fn push_back(&mut self, id: ResourceId<K>) {
        self.insert_before(id, None);
    }

    pub fn push_front(&mut self, id: ResourceId<K>) {
        let head = self.head();
        self.insert_before(id, head);
    }

    /// Links `id` in front of `before`, or at the tail when `before` is
    /// `None` or not a member. Already-present ids are left in place.
    pub fn insert_before(&mut self, id: ResourceId<K>, before: Option<ResourceId<K>>) {
        let raw = id.as_raw();
        if self.links.contains_key(&raw) {
            return;
        }
        let next = before
            .map(|b| b.as_raw())
            .filter(|b| self.links.contains_key(b));
        let prev = match next {
            Some(next) => self.links.get(&next).and_then(|link| link.prev),
            None => self.tail,
        };

        match prev {
            Some(p) => {
                if let Some(link) = self.links.get_mut(&p) {
                    link.next = Some(raw);
                }
            }
            None => self.head = Some(raw),
        }
        match next {
            Some(n) => {
                if let Some(link) = self.links.get_mut(&n) {
                    link.prev = Some(raw);
                }
            }
            None => self.tail = Some(raw),
        }
        self.links.insert(raw, Link { prev, next });
    }

    pub fn pop_front(&mut self) -> Option<ResourceId<K>> {
        let head = self.head()?;
        self.remove(head);
        Some(head)
    }

    pub fn head(&self) -> Option<ResourceId<K>> {
        self.head.map(ResourceId::new)
    }

    /// Member following `id`, or `None` at the tail or for non-members.
    pub fn next_of(&self, id: ResourceId<K>) -> Option<ResourceId<K>> {
        self.links
            .get(&id.as_raw())
            .and_then(|link| link.next)
            .map(ResourceId::new)
    }

    /// Removes `id`, returning false if it was not a member.
    pub fn remove(&mut self, id: ResourceId<K>) -> bool {
        let Some(link) = self.links.remove(&id.as_raw()) else {
            return false;
        };
        match link.prev {
            Some(p) => {
                if let Some(prev) = self.links.get_mut(&p) {
                    prev.next = link.next;
                }
            }
            None => self.head = link.next,
        }
        match link.next {
            Some(n) => {
                if let Some(next) = self.links.get_mut(&n) {
                    next.prev = link.prev;
                }
            }
            None => self.tail = link.prev,
        }
        true
    }

    pub fn contains(&self, id: ResourceId<K>) -> bool {
        self.links.contains_key(&id.as_raw())
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Members from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = ResourceId<K>> + '_ {
        std::iter::successors(self.head, move |raw| {
            self.links.get(raw).and_then(|link| link.next)
        })
        .map(ResourceId::new)
    }

    /// Snapshot of the members, for loops that mutate the arenas.
    pub fn to_vec(&self) -> Vec<ResourceId<K>> {
        self.iter().collect()
    }

    pub fn count(&self) -> u32 {
        self.links.len() as u32
    }
}

/// One list per resource class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLists {
    pub ldb_queues: MemberList<LdbQueueKind>,
    pub ldb_ports: MemberList<LdbPortKind>,
    pub dir_pq_pairs: MemberList<DirPortKind>,
    pub ldb_pools: MemberList<LdbPoolKind>,
    pub dir_pools: MemberList<DirPoolKind>,
}

impl ResourceLists {
    pub fn is_empty(&self) -> bool {
        self.ldb_queues.is_empty()
            && self.ldb_ports.is_empty()
            && self.dir_pq_pairs.is_empty()
            && self.ldb_pools.is_empty()
            && self.dir_pools.is_empty()
    }
}

// ========== Ranges ==========

/// A contiguous range carved from a function-level bitmap.
///
/// Sub-allocations advance `offset` from `base` towards `bound`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Freelist {
    pub base: u32,
    pub bound: u32,
    pub offset: u32,
}

impl Freelist {
    pub fn new(base: u32, len: u32) -> Self {
        Self {
            base,
            bound: base + len,
            offset: 0,
        }
    }

    pub fn len(&self) -> u32 {
        self.bound - self.base
    }

    pub fn is_empty(&self) -> bool {
        self.bound == self.base
    }

    pub fn remaining(&self) -> u32 {
        self.bound.saturating_sub(self.base + self.offset)
    }

    /// Takes `len` units from the front of the remainder.
    pub fn carve(&mut self, len: u32) -> Option<u32> {
        if len > self.remaining() {
            return None;
        }
        let start = self.base + self.offset;
        self.offset += len;
        Some(start)
    }
}

// ========== Arena entries ==========

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LdbQueue {
    pub id: u32,
    pub owner: Owner,
    pub configured: bool,
    pub num_mappings: u32,
    pub num_pending_additions: u32,
    pub num_qid_inflights: u32,
    /// Atomic-inflight range carved from the domain's range.
    pub aqed: Freelist,
    /// Sequence-number group and slot of an ordered queue.
    pub sn: Option<(SnGroupId, u32)>,
}

impl LdbQueue {
    pub fn id(&self) -> LdbQueueId {
        LdbQueueId::new(self.id)
    }
}

/// One of a port's queue mapping slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QidMapSlot {
    pub state: SlotState,
    pub qid: Option<LdbQueueId>,
    pub priority: u8,
    /// Replacement queued behind an unmap in progress.
    pub pending_qid: Option<LdbQueueId>,
    pub pending_priority: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LdbPort {
    pub id: u32,
    pub owner: Owner,
    pub configured: bool,
    /// User-enabled flag; the CQ may still be disabled while an unmap runs.
    pub enabled: bool,
    pub num_mappings: u32,
    pub num_pending_removals: u32,
    /// Tokens the CQ starts with; drains return only tokens beyond these.
    pub init_tkn_cnt: u32,
    pub cq_depth: u32,
    pub hist_list: Freelist,
    pub slots: [QidMapSlot; MAX_QIDS_PER_LDB_CQ],
}

impl LdbPort {
    pub fn id(&self) -> LdbPortId {
        LdbPortId::new(self.id)
    }

    /// First slot in `state`.
    pub fn find_slot(&self, state: SlotState) -> Option<usize> {
        self.slots.iter().position(|slot| slot.state == state)
    }

    /// First slot in `state` holding `queue`.
    pub fn find_slot_queue(&self, state: SlotState, queue: LdbQueueId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.state == state && slot.qid == Some(queue))
    }

    /// Slot with a pending map of `queue` queued behind an unmap.
    pub fn find_pending_map_slot(&self, queue: LdbQueueId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.state == SlotState::UnmapInProgressPendingMap && slot.pending_qid == Some(queue)
        })
    }

    /// Returns true if a map of `queue` can reuse an existing slot: one
    /// mapped, mapping or unmapping it, or one with `queue` queued behind
    /// an unmap. The outgoing queue of a pending-map slot does not count.
    pub fn tracks_queue(&self, queue: LdbQueueId) -> bool {
        self.slots.iter().any(|slot| match slot.state {
            SlotState::Mapped | SlotState::MapInProgress | SlotState::UnmapInProgress => {
                slot.qid == Some(queue)
            }
            SlotState::UnmapInProgressPendingMap => slot.pending_qid == Some(queue),
            SlotState::Unmapped => false,
        })
    }

    pub fn reset_slots(&mut self) {
        self.slots = Default::default();
        self.num_mappings = 0;
        self.num_pending_removals = 0;
    }
}

/// A directed port and its same-numbered directed queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirPqPair {
    pub id: u32,
    pub owner: Owner,
    pub port_configured: bool,
    pub queue_configured: bool,
    pub enabled: bool,
    pub init_tkn_cnt: u32,
}

impl DirPqPair {
    pub fn id(&self) -> DirPortId {
        DirPortId::new(self.id)
    }
}

/// Credit pool entry; load-balanced and directed pools share the layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreditPool {
    pub id: u32,
    pub owner: Owner,
    pub configured: bool,
    pub avail_credits: u32,
    pub total_credits: u32,
}

impl CreditPool {
    pub fn ldb_id(&self) -> LdbPoolId {
        LdbPoolId::new(self.id)
    }

    pub fn dir_id(&self) -> DirPoolId {
        DirPoolId::new(self.id)
    }
}

/// Sequence-number group: 1024 sequence numbers split into equal slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnGroup {
    pub id: u32,
    pub sequence_numbers_per_queue: u32,
    /// Bit `n` set means slot `n` is allocated.
    pub slot_use_bitmap: u32,
}

impl SnGroup {
    pub fn new(id: u32, sequence_numbers_per_queue: u32) -> Self {
        Self {
            id,
            sequence_numbers_per_queue,
            slot_use_bitmap: 0,
        }
    }

    pub fn id(&self) -> SnGroupId {
        SnGroupId::new(self.id)
    }

    pub fn num_slots(&self) -> u32 {
        MAX_LDB_SN_ALLOC / self.sequence_numbers_per_queue
    }

    /// Hardware mode encoding: 0 for 32 per queue up to 5 for 1024.
    pub fn mode(&self) -> u32 {
        (self.sequence_numbers_per_queue / 32).trailing_zeros()
    }

    pub fn used_slots(&self) -> u32 {
        self.slot_use_bitmap.count_ones()
    }

    pub fn is_full(&self) -> bool {
        self.used_slots() >= self.num_slots()
    }

    pub fn alloc_slot(&mut self) -> Option<u32> {
        let slot = (0..self.num_slots()).find(|&s| self.slot_use_bitmap & (1 << s) == 0)?;
        self.slot_use_bitmap |= 1 << slot;
        Some(slot)
    }

    /// Releases `slot`, returning false if it was not allocated.
    pub fn free_slot(&mut self, slot: u32) -> bool {
        if slot >= self.num_slots() || self.slot_use_bitmap & (1 << slot) == 0 {
            return false;
        }
        self.slot_use_bitmap &= !(1 << slot);
        true
    }
}

/// A scheduling domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Domain {
    pub id: u32,
    pub configured: bool,
    pub started: bool,
    pub num_pending_additions: u32,
    pub num_pending_removals: u32,
    /// Attached but not yet configured.
    pub avail: ResourceLists,
    /// Configured.
    pub used: ResourceLists,
    pub qed_freelist: Freelist,
    pub dqed_freelist: Freelist,
    pub aqed_freelist: Freelist,
    pub hist_list: Freelist,
}

impl Domain {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn id(&self) -> DomainId {
        DomainId::new(self.id)
    }

    /// Clears counters, ranges and lists, keeping the id.
    pub fn clear(&mut self) {
        *self = Self::new(self.id);
    }
}
