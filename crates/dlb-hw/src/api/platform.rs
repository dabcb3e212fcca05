//! Platform services: delays, revision, producer-port writes and the
//! deferred-work hook.

use std::fmt;

use dlb_types::DeviceRevision;

use crate::error::HwResult;
use crate::types::{DirPortId, LdbPortId};

/// A producer port whose doorbell region can be mapped for direct writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProducerPort {
    Ldb(LdbPortId),
    Dir(DirPortId),
}

impl fmt::Display for ProducerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProducerPort::Ldb(id) => write!(f, "ldb pp {}", id.as_raw()),
            ProducerPort::Dir(id) => write!(f, "dir pp {}", id.as_raw()),
        }
    }
}

/// Handle to a mapped producer-port doorbell region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerPortMapping {
    pub port: ProducerPort,
    pub addr: u64,
}

/// Hardware control word, reduced to the fields the drain path sets.
///
/// An all-zero word is a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hcw {
    /// Completes one scheduled event.
    pub qe_comp: bool,
    /// Returns `lock_id + 1` CQ tokens.
    pub cq_token: bool,
    pub lock_id: u16,
}

impl Hcw {
    /// A completion-only word.
    pub const fn completion() -> Self {
        Self {
            qe_comp: true,
            cq_token: false,
            lock_id: 0,
        }
    }

    /// A word returning `count` tokens in one batch. `count` must be nonzero.
    pub fn token_return(count: u32) -> Self {
        Self {
            qe_comp: false,
            cq_token: true,
            lock_id: count.saturating_sub(1) as u16,
        }
    }

    /// Number of tokens this word returns.
    pub fn tokens_returned(&self) -> u32 {
        if self.cq_token {
            u32::from(self.lock_id) + 1
        } else {
            0
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.qe_comp && !self.cq_token
    }
}

/// Hook for the background worker that finishes deferred map/unmap work.
pub trait WorkScheduler: Send + Sync {
    fn is_active(&self) -> bool;
    fn schedule(&self);
}

/// Operating-system and platform glue.
pub trait Platform: Send + Sync {
    /// Busy-waits for `us` microseconds.
    fn udelay(&self, us: u32);

    fn device_revision(&self) -> DeviceRevision;

    fn map_producer_port(&self, port: ProducerPort) -> HwResult<ProducerPortMapping>;
    fn unmap_producer_port(&self, mapping: ProducerPortMapping);

    /// Issues one 64-byte direct write of four control words.
    fn movdir64b(&self, mapping: &ProducerPortMapping, hcws: &[Hcw; 4]);

    /// Orders preceding direct writes before anything that follows.
    fn fence_hcw(&self, mapping: &ProducerPortMapping);

    /// Returns true while the deferred-work worker is running.
    fn worker_active(&self) -> bool;

    /// Launches the deferred-work worker.
    fn schedule_work(&self);
}
