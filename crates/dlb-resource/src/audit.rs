//! Structured audit records for resource manager actions.
//!
//! Domain creation and reset, credit pool creation and internal faults are
//! emitted as [`AuditRecord`]s on the `dlb_audit` tracing target, alongside
//! the plain `log` output of the core. Each record serializes to one JSON
//! object so a collector can index it without parsing free text.
//!
//! # Example
//!
//! ```ignore
//! use dlb_resource::audit::{AuditCategory, AuditOutcome, AuditRecord};
//! use dlb_resource::audit_log;
//!
//! audit_log!(AuditRecord::new(AuditCategory::DomainCreate, "DlbResourceMgr", "create_sched_domain")
//!     .with_outcome(AuditOutcome::Success)
//!     .with_object_id("domain 3"));
//! ```

use chrono::{DateTime, Utc};
use dlb_types::DlbStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of action a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    DomainCreate,
    DomainStart,
    DomainReset,
    PoolCreate,
    QueueCreate,
    PortCreate,
    QueueMap,
    QueueUnmap,
    SnConfig,
    /// An internal invariant was violated.
    ConsistencyFault,
    /// Manager construction and teardown.
    SystemLifecycle,
}

impl AuditCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::DomainCreate => "DOMAIN_CREATE",
            AuditCategory::DomainStart => "DOMAIN_START",
            AuditCategory::DomainReset => "DOMAIN_RESET",
            AuditCategory::PoolCreate => "POOL_CREATE",
            AuditCategory::QueueCreate => "QUEUE_CREATE",
            AuditCategory::PortCreate => "PORT_CREATE",
            AuditCategory::QueueMap => "QUEUE_MAP",
            AuditCategory::QueueUnmap => "QUEUE_UNMAP",
            AuditCategory::SnConfig => "SN_CONFIG",
            AuditCategory::ConsistencyFault => "CONSISTENCY_FAULT",
            AuditCategory::SystemLifecycle => "SYSTEM_LIFECYCLE",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    /// Accepted but finished later by the sweep worker.
    InProgress,
    /// Refused with a status code; nothing changed.
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
            AuditOutcome::Denied => write!(f, "denied"),
        }
    }
}

/// One audited action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Component that performed the action.
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DlbStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Starts an in-progress record stamped with the current UTC time.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            status: None,
            details: None,
            error: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Records a rejection and marks the record denied.
    pub fn with_status(mut self, status: DlbStatus) -> Self {
        self.status = Some(status);
        self.outcome = AuditOutcome::Denied;
        self
    }

    /// Records an error message and marks the record failed.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits `record` on the `dlb_audit` target at a level chosen by its outcome.
pub fn emit(record: &AuditRecord) {
    let json = record.to_json();
    macro_rules! at {
        ($level:ident, $($msg:tt)+) => {
            tracing::$level!(
                target: "dlb_audit",
                category = %record.category,
                action = %record.action,
                object = record.object_id.as_deref().unwrap_or("-"),
                audit_json = %json,
                $($msg)+
            )
        };
    }
    match record.outcome {
        AuditOutcome::Success => at!(info, "{} {} ok", record.category, record.action),
        AuditOutcome::InProgress => at!(debug, "{} {} pending", record.category, record.action),
        AuditOutcome::Denied => at!(
            warn,
            "{} {} denied: {}",
            record.category,
            record.action,
            record.status.map_or("-", |s| s.name())
        ),
        AuditOutcome::Failure => at!(
            error,
            "{} {} failed: {}",
            record.category,
            record.action,
            record.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Emits an [`AuditRecord`].
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        $crate::audit::emit(&$record)
    };
}

/// Installs a JSON `tracing` subscriber filtered by `RUST_LOG`, falling
/// back to `level`. Used by the binary's `--log-format json` mode.
pub fn init_logging(level: &str) -> Result<(), String> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("invalid log level {}: {}", level, e))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true))
        .try_init()
        .map_err(|e| format!("logging already initialized: {}", e))
}
