//! Device silicon revision.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Silicon stepping reported by the device.
///
/// Ordered oldest first, so `rev < DeviceRevision::B0` selects the A steppings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceRevision {
    A0,
    A1,
    A2,
    A3,
    #[default]
    B0,
}

impl DeviceRevision {
    /// Returns true for the A steppings.
    pub const fn is_a_stepping(&self) -> bool {
        matches!(
            self,
            DeviceRevision::A0 | DeviceRevision::A1 | DeviceRevision::A2 | DeviceRevision::A3
        )
    }
}

impl fmt::Display for DeviceRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceRevision::A0 => "A0",
            DeviceRevision::A1 => "A1",
            DeviceRevision::A2 => "A2",
            DeviceRevision::A3 => "A3",
            DeviceRevision::B0 => "B0",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DeviceRevision {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A0" => Ok(DeviceRevision::A0),
            "A1" => Ok(DeviceRevision::A1),
            "A2" => Ok(DeviceRevision::A2),
            "A3" => Ok(DeviceRevision::A3),
            "B0" => Ok(DeviceRevision::B0),
            _ => Err(ParseError::InvalidRevision(s.to_string())),
        }
    }
}
