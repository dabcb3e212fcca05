//! Per-slot mapping state and the counter effects of each transition.

use std::fmt;

/// State of one port slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SlotState {
    #[default]
    Unmapped,
    /// Waiting for the queue's inflight count to drain before binding.
    MapInProgress,
    Mapped,
    /// Waiting for the port's CQ to drain before unbinding.
    UnmapInProgress,
    /// Unmap in progress with a replacement mapping queued behind it.
    UnmapInProgressPendingMap,
}

impl SlotState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SlotState::Unmapped => "UNMAPPED",
            SlotState::MapInProgress => "MAP_IN_PROGRESS",
            SlotState::Mapped => "MAPPED",
            SlotState::UnmapInProgress => "UNMAP_IN_PROGRESS",
            SlotState::UnmapInProgressPendingMap => "UNMAP_IN_PROGRESS_PENDING_MAP",
        }
    }

    /// Returns true while an unmap is outstanding on the slot.
    pub fn is_unmapping(&self) -> bool {
        matches!(
            self,
            SlotState::UnmapInProgress | SlotState::UnmapInProgressPendingMap
        )
    }

    /// Counter adjustments for moving from `self` to `to`, or `None` if
    /// the transition is not allowed.
    pub fn transition_effect(self, to: SlotState) -> Option<TransitionEffect> {
        use SlotState::*;

        let effect = match (self, to) {
            (Unmapped, Mapped) => TransitionEffect::new(1, 0, 0),
            (Unmapped, MapInProgress) => TransitionEffect::new(0, 1, 0),
            (Mapped, Unmapped) => TransitionEffect::new(-1, 0, 0),
            (Mapped, UnmapInProgress) => TransitionEffect::new(0, 0, 1),
            (Mapped, Mapped) => TransitionEffect::NONE,
            (MapInProgress, Unmapped) => TransitionEffect::new(0, -1, 0),
            (MapInProgress, Mapped) => TransitionEffect::new(1, -1, 0),
            (UnmapInProgress, Unmapped) => TransitionEffect::new(-1, 0, -1),
            (UnmapInProgress, Mapped) => TransitionEffect::new(0, 0, -1),
            (UnmapInProgress, UnmapInProgressPendingMap) => TransitionEffect::NONE,
            (UnmapInProgressPendingMap, UnmapInProgress) => TransitionEffect::NONE,
            (UnmapInProgressPendingMap, Unmapped) => TransitionEffect::new(-1, 0, -1),
            _ => return None,
        };
        Some(effect)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter deltas applied by a slot transition.
///
/// `mappings` applies to both the queue and the port, `pending_additions`
/// to the queue and its domain, `pending_removals` to the port and its
/// domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionEffect {
    pub mappings: i32,
    pub pending_additions: i32,
    pub pending_removals: i32,
}

impl TransitionEffect {
    pub const NONE: TransitionEffect = TransitionEffect::new(0, 0, 0);

    pub const fn new(mappings: i32, pending_additions: i32, pending_removals: i32) -> Self {
        Self {
            mappings,
            pending_additions,
            pending_removals,
        }
    }
}

/// Applies `delta` to `value`, failing on underflow or overflow.
pub(crate) fn apply_delta(value: u32, delta: i32) -> Option<u32> {
    value.checked_add_signed(delta)
}
