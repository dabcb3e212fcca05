//! Device access interfaces.
//!
//! The register layer is expressed as semantically named operations rather
//! than raw offsets. Implementations translate them into CSR writes on real
//! hardware, or into state changes on [`crate::sim::SimDlb`].
//!
//! - [`csr`]: register reads and writes ([`CsrAccess`])
//! - [`platform`]: delay, revision, producer-port writes, worker scheduling ([`Platform`])

pub mod csr;
pub mod platform;

pub use csr::{
    CsrAccess, DirPortConfig, FreelistPtrs, LdbPortConfig, LdbQueueConfig, LdbQueueCounter,
    PoolConfig, ResetTarget, RingPtr, SlotSchedBit, QID_INFLIGHT_LIMIT_RESET,
};
pub use platform::{Hcw, Platform, ProducerPort, ProducerPortMapping, WorkScheduler};

/// Everything the resource manager needs from one device.
pub trait DlbHw: CsrAccess + Platform {}

impl<T: CsrAccess + Platform> DlbHw for T {}
