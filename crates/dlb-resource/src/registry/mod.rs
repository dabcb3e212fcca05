//! Resource Pool Registry
//!
//! Arena storage for every hardware object plus the ordered lists that
//! express ownership. Each object lives in exactly one list at a time and
//! carries an [`Owner`] tag naming that list.
//!
//! # Architecture
//!
//! ```text
//! FunctionResources            Domain (one per scheduling domain)
//! ├─ avail_domains  ─────────▶ ├─ avail: ResourceLists  (attached)
//! ├─ used_domains              ├─ used:  ResourceLists  (configured)
//! ├─ avail: ResourceLists      └─ qed / dqed / aqed / hist_list ranges
//! └─ 4 x DlbBitmap freelists
//! ```

mod function;
mod types;

pub use function::FunctionResources;
pub use types::{
    CreditPool, DirPqPair, Domain, Freelist, LdbPort, LdbQueue, MemberList, Owner, QidMapSlot,
    ResourceLists, SnGroup,
};
