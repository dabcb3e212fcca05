//! Hardware-facing interfaces for the DLB load-balancing event device.
//!
//! The resource manager never touches registers directly. It talks to the
//! device through the traits in this crate, which keeps the core testable
//! against [`sim::SimDlb`] and lets several simulated devices coexist in
//! one process.
//!
//! # Architecture
//!
//! - [`types`]: type-safe resource ids (a port id cannot be passed as a queue id)
//! - [`error`]: [`HwError`] and [`HwResult`]
//! - [`api`]: [`CsrAccess`] (semantically named register operations) and
//!   [`Platform`] (delay, producer-port writes, worker scheduling)
//! - [`bitmap`]: the [`IntervalAllocator`] contract and [`DlbBitmap`]
//! - [`sim`]: a simulated device with scriptable counters
//!
//! # Example
//!
//! ```ignore
//! use dlb_hw::{CsrAccess, LdbPortId};
//!
//! fn quiesce(hw: &dyn CsrAccess, port: LdbPortId) {
//!     hw.set_ldb_cq_enabled(port, false);
//!     hw.flush();
//! }
//! ```

pub mod api;
pub mod bitmap;
pub mod error;
pub mod sim;
pub mod types;

pub use api::{
    CsrAccess, DirPortConfig, DlbHw, FreelistPtrs, Hcw, LdbPortConfig, LdbQueueConfig,
    LdbQueueCounter, Platform, PoolConfig, ProducerPort, ProducerPortMapping, ResetTarget,
    RingPtr, SlotSchedBit, WorkScheduler, QID_INFLIGHT_LIMIT_RESET,
};
pub use bitmap::{DlbBitmap, IntervalAllocator};
pub use error::{HwError, HwResult};
pub use types::{
    DirPoolId, DirPoolKind, DirPortId, DirPortKind, DomainId, DomainKind, LdbPoolId, LdbPoolKind,
    LdbPortId, LdbPortKind, LdbQueueId, LdbQueueKind, ResourceId, ResourceKind, SnGroupId,
    SnGroupKind,
};
