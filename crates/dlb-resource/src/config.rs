//! Resource manager configuration.
//!
//! Every field has a default matching the hardware driver, so an empty JSON
//! object is a valid configuration.

use std::path::Path;

use dlb_types::{DeviceLimits, DeviceRevision};
use serde::{Deserialize, Serialize};

use crate::error::{ResourceError, Result};

/// Ports that may be in use at once on early silicon.
pub const A_STEP_MAX_PORTS: u32 = 128;

/// Caps the number of ports in use on devices older than `min_revision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortCapPolicy {
    /// Devices at or above this revision are not capped.
    pub min_revision: DeviceRevision,
    /// A request is refused once ports in use would reach this count.
    pub max_ports: u32,
}

impl Default for PortCapPolicy {
    fn default() -> Self {
        Self {
            min_revision: DeviceRevision::B0,
            max_ports: A_STEP_MAX_PORTS,
        }
    }
}

impl PortCapPolicy {
    /// Returns true if the cap applies to a device of `revision`.
    pub fn applies_to(&self, revision: DeviceRevision) -> bool {
        revision < self.min_revision
    }
}

/// Configuration for [`crate::DlbResourceMgr`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceMgrConfig {
    /// Inventory of the device being managed.
    pub limits: DeviceLimits,

    /// Revision-dependent port cap. `None` disables it.
    pub port_cap: Option<PortCapPolicy>,

    /// Polls allowed while waiting for a CQ's inflight count to reach zero.
    pub cq_comp_check_loops: u32,

    /// Iterations allowed for the queue drain loops and pool refill polls.
    pub qid_empty_check_loops: u32,

    /// Polls allowed while waiting for a hardware resource reset.
    pub reset_poll_loops: u32,

    /// Delay between polls, in microseconds.
    pub poll_delay_us: u32,

    /// Pause between sweep passes of the background worker, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for ResourceMgrConfig {
    fn default() -> Self {
        Self {
            limits: DeviceLimits::default(),
            port_cap: Some(PortCapPolicy::default()),
            cq_comp_check_loops: 409_600,
            qid_empty_check_loops: 32 * 64 * 1024 * (800 / 30),
            reset_poll_loops: 1024 * 1024,
            poll_delay_us: 1,
            sweep_interval_ms: 1,
        }
    }
}

impl ResourceMgrConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_port_cap(mut self, port_cap: Option<PortCapPolicy>) -> Self {
        self.port_cap = port_cap;
        self
    }

    pub fn with_cq_comp_check_loops(mut self, loops: u32) -> Self {
        self.cq_comp_check_loops = loops;
        self
    }

    pub fn with_qid_empty_check_loops(mut self, loops: u32) -> Self {
        self.qid_empty_check_loops = loops;
        self
    }

    pub fn with_reset_poll_loops(mut self, loops: u32) -> Self {
        self.reset_poll_loops = loops;
        self
    }

    pub fn with_poll_delay_us(mut self, delay_us: u32) -> Self {
        self.poll_delay_us = delay_us;
        self
    }

    pub fn with_sweep_interval_ms(mut self, interval_ms: u64) -> Self {
        self.sweep_interval_ms = interval_ms;
        self
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ResourceError::config(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ResourceError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Checks device limits and loop caps.
    pub fn validate(&self) -> Result<()> {
        self.limits
            .validate()
            .map_err(|e| ResourceError::config(e.to_string()))?;

        let caps = [
            ("cq_comp_check_loops", self.cq_comp_check_loops),
            ("qid_empty_check_loops", self.qid_empty_check_loops),
            ("reset_poll_loops", self.reset_poll_loops),
        ];
        for (name, value) in caps {
            if value == 0 {
                return Err(ResourceError::config(format!("{} must be nonzero", name)));
            }
        }

        if let Some(cap) = &self.port_cap {
            if cap.max_ports == 0 {
                return Err(ResourceError::config("port_cap.max_ports must be nonzero"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ResourceMgrConfig::default();
        assert_eq!(config.limits, DeviceLimits::default());
        assert_eq!(config.port_cap, Some(PortCapPolicy::default()));
        assert_eq!(config.cq_comp_check_loops, 409_600);
        assert_eq!(config.qid_empty_check_loops, 54_525_952);
        assert_eq!(config.reset_poll_loops, 1_048_576);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_cap_applies_below_min_revision() {
        let cap = PortCapPolicy::default();
        assert!(cap.applies_to(DeviceRevision::A2));
        assert!(!cap.applies_to(DeviceRevision::B0));
    }

    #[test]
    fn test_builder() {
        let config = ResourceMgrConfig::new()
            .with_port_cap(None)
            .with_qid_empty_check_loops(10)
            .with_poll_delay_us(0)
            .with_sweep_interval_ms(5);
        assert_eq!(config.port_cap, None);
        assert_eq!(config.qid_empty_check_loops, 10);
        assert_eq!(config.poll_delay_us, 0);
        assert_eq!(config.sweep_interval_ms, 5);
    }

    #[test]
    fn test_from_partial_json() {
        let config = ResourceMgrConfig::from_json_str(
            r#"{"limits": {"num_domains": 4}, "port_cap": null, "reset_poll_loops": 8}"#,
        )
        .unwrap();
        assert_eq!(config.limits.num_domains, 4);
        assert_eq!(config.limits.num_ldb_ports, 64);
        assert_eq!(config.port_cap, None);
        assert_eq!(config.reset_poll_loops, 8);
    }

    #[test]
    fn test_invalid_json_rejected() {
        let err = ResourceMgrConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ResourceError::Config(_)));
    }

    #[test]
    fn test_zero_cap_rejected() {
        let err = ResourceMgrConfig::from_json_str(r#"{"cq_comp_check_loops": 0}"#).unwrap_err();
        assert_eq!(
            err,
            ResourceError::Config("cq_comp_check_loops must be nonzero".to_string())
        );
    }

    #[test]
    fn test_limits_above_hardware_rejected() {
        let err =
            ResourceMgrConfig::from_json_str(r#"{"limits": {"num_ldb_ports": 65}}"#).unwrap_err();
        assert!(matches!(err, ResourceError::Config(_)));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"port_cap": {{"min_revision": "B0", "max_ports": 16}}}}"#
        )
        .unwrap();

        let config = ResourceMgrConfig::from_json_file(file.path()).unwrap();
        assert_eq!(
            config.port_cap,
            Some(PortCapPolicy {
                min_revision: DeviceRevision::B0,
                max_ports: 16,
            })
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ResourceMgrConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ResourceError::Config(_)));
    }
}
