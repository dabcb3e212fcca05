//! Status codes returned to callers whose request was rejected.
//!
//! A status identifies exactly which resource class was insufficient or
//! which argument was invalid. Rejections leave device state unchanged.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! define_statuses {
    ($($variant:ident = $raw:literal => $name:literal,)+) => {
        /// DLB request status codes.
        #[repr(i32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum DlbStatus {
            $($variant = $raw,)+
        }

        impl DlbStatus {
            /// Every status, in numeric order.
            pub const ALL: &'static [DlbStatus] = &[$(DlbStatus::$variant,)+];

            /// Creates a status from its raw value. Unknown values map to `None`.
            pub fn from_raw(raw: i32) -> Option<Self> {
                match raw {
                    $($raw => Some(DlbStatus::$variant),)+
                    _ => None,
                }
            }

            /// Returns the canonical upper-case name.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(DlbStatus::$variant => $name,)+
                }
            }
        }
    };
}

define_statuses! {
    Success = 0 => "SUCCESS",
    DomainUnavailable = 1 => "DOMAIN_UNAVAILABLE",
    LdbQueuesUnavailable = 2 => "LDB_QUEUES_UNAVAILABLE",
    LdbPortsUnavailable = 3 => "LDB_PORTS_UNAVAILABLE",
    LdbPortRequiredForLdbQueues = 4 => "LDB_PORT_REQUIRED_FOR_LDB_QUEUES",
    DirPortsUnavailable = 5 => "DIR_PORTS_UNAVAILABLE",
    LdbCreditsUnavailable = 6 => "LDB_CREDITS_UNAVAILABLE",
    DirCreditsUnavailable = 7 => "DIR_CREDITS_UNAVAILABLE",
    LdbCreditPoolsUnavailable = 8 => "LDB_CREDIT_POOLS_UNAVAILABLE",
    DirCreditPoolsUnavailable = 9 => "DIR_CREDIT_POOLS_UNAVAILABLE",
    HistListEntriesUnavailable = 10 => "HIST_LIST_ENTRIES_UNAVAILABLE",
    AtomicInflightsUnavailable = 11 => "ATOMIC_INFLIGHTS_UNAVAILABLE",
    QedFreelistEntriesUnavailable = 12 => "QED_FREELIST_ENTRIES_UNAVAILABLE",
    DqedFreelistEntriesUnavailable = 13 => "DQED_FREELIST_ENTRIES_UNAVAILABLE",
    SequenceNumbersUnavailable = 14 => "SEQUENCE_NUMBERS_UNAVAILABLE",
    InvalidDomainId = 15 => "INVALID_DOMAIN_ID",
    DomainNotConfigured = 16 => "DOMAIN_NOT_CONFIGURED",
    DomainStarted = 17 => "DOMAIN_STARTED",
    InvalidQidInflightAllocation = 18 => "INVALID_QID_INFLIGHT_ALLOCATION",
    InvalidLdbCreditPoolId = 19 => "INVALID_LDB_CREDIT_POOL_ID",
    InvalidDirCreditPoolId = 20 => "INVALID_DIR_CREDIT_POOL_ID",
    InvalidCqDepth = 21 => "INVALID_CQ_DEPTH",
    InvalidHistListDepth = 22 => "INVALID_HIST_LIST_DEPTH",
    InvalidPortId = 23 => "INVALID_PORT_ID",
    InvalidQid = 24 => "INVALID_QID",
    InvalidDirQueueId = 25 => "INVALID_DIR_QUEUE_ID",
    InvalidPriority = 26 => "INVALID_PRIORITY",
    NoQidSlotsAvailable = 27 => "NO_QID_SLOTS_AVAILABLE",
    InvalidSnGroup = 28 => "INVALID_SN_GROUP",
    SnGroupInUse = 29 => "SN_GROUP_IN_USE",
}

impl DlbStatus {
    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        *self == DlbStatus::Success
    }

    /// Returns true for statuses caused by an exhausted resource class, as
    /// opposed to a malformed request. Such requests may succeed after
    /// another domain is reset.
    pub fn is_resource_shortage(&self) -> bool {
        matches!(
            self,
            DlbStatus::DomainUnavailable
                | DlbStatus::LdbQueuesUnavailable
                | DlbStatus::LdbPortsUnavailable
                | DlbStatus::DirPortsUnavailable
                | DlbStatus::LdbCreditsUnavailable
                | DlbStatus::DirCreditsUnavailable
                | DlbStatus::LdbCreditPoolsUnavailable
                | DlbStatus::DirCreditPoolsUnavailable
                | DlbStatus::HistListEntriesUnavailable
                | DlbStatus::AtomicInflightsUnavailable
                | DlbStatus::QedFreelistEntriesUnavailable
                | DlbStatus::DqedFreelistEntriesUnavailable
                | DlbStatus::SequenceNumbersUnavailable
                | DlbStatus::NoQidSlotsAvailable
        )
    }
}

impl fmt::Display for DlbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DlbStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        DlbStatus::ALL
            .iter()
            .copied()
            .find(|status| status.name() == upper)
            .ok_or_else(|| ParseError::InvalidStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_success() {
        assert!(DlbStatus::Success.is_success());
        assert!(!DlbStatus::DomainUnavailable.is_success());
    }

    #[test]
    fn test_status_from_raw() {
        assert_eq!(DlbStatus::from_raw(0), Some(DlbStatus::Success));
        assert_eq!(DlbStatus::from_raw(12), Some(DlbStatus::QedFreelistEntriesUnavailable));
        assert_eq!(DlbStatus::from_raw(-1), None);
        for status in DlbStatus::ALL {
            assert_eq!(DlbStatus::from_raw(*status as i32), Some(*status));
        }
    }

    #[test]
    fn test_status_display_and_parse() {
        assert_eq!(
            DlbStatus::LdbPortRequiredForLdbQueues.to_string(),
            "LDB_PORT_REQUIRED_FOR_LDB_QUEUES"
        );
        assert_eq!(
            "hist_list_entries_unavailable".parse::<DlbStatus>().unwrap(),
            DlbStatus::HistListEntriesUnavailable
        );
        assert!("NOT_A_STATUS".parse::<DlbStatus>().is_err());
    }

    #[test]
    fn test_status_shortage_classification() {
        assert!(DlbStatus::DqedFreelistEntriesUnavailable.is_resource_shortage());
        assert!(!DlbStatus::InvalidPriority.is_resource_shortage());
        assert!(!DlbStatus::DomainStarted.is_resource_shortage());
    }

    #[test]
    fn test_status_serde_name() {
        let json = serde_json::to_string(&DlbStatus::DirPortsUnavailable).unwrap();
        assert_eq!(json, "\"DIR_PORTS_UNAVAILABLE\"");
    }
}
