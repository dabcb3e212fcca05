//! Queue-Port Mapping State Machine
//!
//! Every load-balanced port has eight slots, each binding at most one
//! queue. Once a domain is started, binding and unbinding a slot must wait
//! for live traffic to drain, so a slot can sit in an in-progress state
//! until one of the `finish_*_qid_procedures` sweeps completes it.
//!
//! # Architecture
//!
//! ```text
//!            map (stopped)                 unmap (stopped)
//!   UNMAPPED ─────────────────▶ MAPPED ─────────────────▶ UNMAPPED
//!      │ map (started)            ▲ │ unmap (started)
//!      ▼                          │ ▼
//!   MAP_IN_PROGRESS ──sweep──────┘ UNMAP_IN_PROGRESS ──sweep──▶ UNMAPPED
//!                                   │ ▲
//!                          map      ▼ │ unmap
//!                       UNMAP_IN_PROGRESS_PENDING_MAP ──sweep──▶ (map queued queue)
//! ```

mod engine;
mod state;

pub use engine::MapOutcome;
pub use state::{SlotState, TransitionEffect};
