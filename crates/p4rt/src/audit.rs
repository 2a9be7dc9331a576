//! Structured logging and audit trail.
//!
//! Every log line carries a `source` field naming the component that
//! emitted it (`"BackendRegistry"`, `"DeviceRegistry"`, `"PortTable"`, ...).
//! Lines that can repeat on every poll iteration go through the
//! rate-limited variants [`warn_rl!`](crate::warn_rl) and
//! [`error_rl!`](crate::error_rl), which consult a shared
//! [`LogRateLimiter`](p4rt_common::LogRateLimiter).
//!
//! State changes to backends, devices, ports and programs are recorded as
//! [`AuditRecord`]s on the `audit` target, serialized as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Backend registration and type-level configuration
    ConfigurationChange,
    /// Device or port creation
    ResourceCreate,
    /// Program install and schema assignment
    ResourceModify,
    /// Device, port or program removal
    ResourceDelete,
    /// Daemon startup and shutdown
    SystemLifecycle,
    /// Out-of-band backend operations
    BackendOperation,
    /// Failures that left state unchanged
    ErrorCondition,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::ConfigurationChange => write!(f, "CONFIGURATION_CHANGE"),
            AuditCategory::ResourceCreate => write!(f, "RESOURCE_CREATE"),
            AuditCategory::ResourceModify => write!(f, "RESOURCE_MODIFY"),
            AuditCategory::ResourceDelete => write!(f, "RESOURCE_DELETE"),
            AuditCategory::SystemLifecycle => write!(f, "SYSTEM_LIFECYCLE"),
            AuditCategory::BackendOperation => write!(f, "BACKEND_OPERATION"),
            AuditCategory::ErrorCondition => write!(f, "ERROR_CONDITION"),
        }
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// Action completed successfully
    Success,
    /// Action failed
    Failure,
    /// Action is in progress
    InProgress,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
        }
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// UTC time the record was created
    pub timestamp: DateTime<Utc>,

    /// Event category
    pub category: AuditCategory,

    /// Component that emitted the record
    pub source: String,

    /// Action performed
    pub action: String,

    /// Outcome of the action
    pub outcome: AuditOutcome,

    /// Affected object, e.g. a device name or `br0:eth0`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    /// Affected object kind: "backend", "device", "port", "program"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    /// Free-form context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped with the current time.
    ///
    /// The outcome starts as `InProgress` until set.
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
            details: None,
            error: None,
        }
    }

    /// Sets the outcome.
    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Sets the affected object identifier.
    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    /// Sets the affected object kind.
    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    /// Attaches JSON context.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the failure reason and marks the outcome as `Failure`.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    /// Serializes the record to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Debug-level log line with a `source` field.
///
/// ```ignore
/// debug_log!("PortTable", device = %name, "port unchanged");
/// ```
#[macro_export]
macro_rules! debug_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::debug!(
            source = $source,
            $($arg)*
        )
    };
}

/// Info-level log line with a `source` field.
#[macro_export]
macro_rules! info_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::info!(
            source = $source,
            $($arg)*
        )
    };
}

/// Warn-level log line with a `source` field.
#[macro_export]
macro_rules! warn_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::warn!(
            source = $source,
            $($arg)*
        )
    };
}

/// Error-level log line with a `source` field.
#[macro_export]
macro_rules! error_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::error!(
            source = $source,
            $($arg)*
        )
    };
}

/// Rate-limited warning.
///
/// Dropped lines are counted by the limiter; the next admitted line
/// carries the count in its `suppressed` field.
///
/// ```ignore
/// warn_rl!(limiter, "PortTable", port = %name, "ignoring port");
/// ```
#[macro_export]
macro_rules! warn_rl {
    ($limiter:expr, $source:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $limiter.admit() {
            tracing::warn!(
                source = $source,
                suppressed,
                $($arg)*
            )
        }
    };
}

/// Rate-limited error.
#[macro_export]
macro_rules! error_rl {
    ($limiter:expr, $source:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $limiter.admit() {
            tracing::error!(
                source = $source,
                suppressed,
                $($arg)*
            )
        }
    };
}

/// Emits an [`AuditRecord`] on the `audit` target.
///
/// Success is logged at info, in-progress at debug, failure at warn.
///
/// ```ignore
/// let record = AuditRecord::new(AuditCategory::ResourceCreate, "LifecycleManager", "create_device")
///     .with_outcome(AuditOutcome::Success)
///     .with_object_id("br0")
///     .with_object_type("device");
/// audit_log!(record);
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Failure => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}

/// Installs a JSON subscriber.
///
/// `RUST_LOG` takes precedence over `log_level`.
pub fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .json(),
        )
        .init();
}

/// Installs a human-readable subscriber for interactive use.
pub fn init_logging_pretty(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_audit_record_creation() {
        let record = AuditRecord::new(
            AuditCategory::ResourceCreate,
            "LifecycleManager",
            "create_device",
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id("br0")
        .with_object_type("device");

        assert_eq!(record.category, AuditCategory::ResourceCreate);
        assert_eq!(record.source, "LifecycleManager");
        assert_eq!(record.action, "create_device");
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.object_id, Some("br0".to_string()));
        assert_eq!(record.object_type, Some("device".to_string()));
    }

    #[test]
    fn test_audit_record_with_error() {
        let record = AuditRecord::new(AuditCategory::ErrorCondition, "PortTable", "add_port")
            .with_error("port_construct failed");

        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error, Some("port_construct failed".to_string()));
    }

    #[test]
    fn test_audit_record_json_serialization() {
        let record = AuditRecord::new(
            AuditCategory::ResourceModify,
            "ProgramSlot",
            "install_program",
        )
        .with_outcome(AuditOutcome::Success)
        .with_details(serde_json::json!({
            "device": "br0",
            "length": 10
        }));

        let json = record.to_json();
        assert!(json.contains("RESOURCE_MODIFY"));
        assert!(json.contains("ProgramSlot"));
        assert!(json.contains("\"length\":10"));
    }

    #[test]
    fn test_audit_category_display() {
        assert_eq!(
            AuditCategory::BackendOperation.to_string(),
            "BACKEND_OPERATION"
        );
        assert_eq!(AuditCategory::ResourceDelete.to_string(), "RESOURCE_DELETE");
    }

    #[test]
    fn test_audit_outcome_display() {
        assert_eq!(AuditOutcome::Success.to_string(), "success");
        assert_eq!(AuditOutcome::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn test_rate_limited_macros_consume_tokens() {
        let limiter = p4rt_common::LogRateLimiter::new(p4rt_common::RateLimitConfig {
            per_second: 1,
            burst: 1,
        });
        warn_rl!(limiter, "Test", "first");
        error_rl!(limiter, "Test", "second");
        assert_eq!(limiter.suppressed(), 1);
    }
}
