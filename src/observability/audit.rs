/// Sandbox event logging for clipy
/// Structured records of security-relevant and session-breaking events
///
/// Every event goes through the `log` facade. When an audit file is
/// configured each event is also appended to it as one JSON line.
use crate::config::types::{Result, SandboxError};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;

/// Security event severity levels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Types of sandbox events we track
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SecurityEventType {
    // Session lifecycle
    SessionStart,
    SessionTeardown,
    RuntimeLoadFailure,
    TransportFailure,

    // Run limits
    RunTimeout,
    OutputLimitViolation,

    // Filesystem
    PathTraversalAttempt,
    StorageFailure,
}

impl SecurityEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> SecuritySeverity {
        match self {
            SecurityEventType::SessionStart => SecuritySeverity::Low,
            SecurityEventType::SessionTeardown => SecuritySeverity::Low,
            SecurityEventType::RuntimeLoadFailure => SecuritySeverity::High,
            SecurityEventType::TransportFailure => SecuritySeverity::High,
            SecurityEventType::RunTimeout => SecuritySeverity::Medium,
            SecurityEventType::OutputLimitViolation => SecuritySeverity::Medium,
            SecurityEventType::PathTraversalAttempt => SecuritySeverity::Critical,
            SecurityEventType::StorageFailure => SecuritySeverity::High,
        }
    }
}

/// Individual sandbox event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub timestamp: SystemTime,
    pub details: String,
    /// Worker session the event belongs to
    pub session_id: Option<String>,
    /// Test case being graded, if any
    pub test_id: Option<String>,
    pub file_path: Option<String>,
}

impl SecurityEvent {
    /// Create a new event with default severity
    pub fn new(event_type: SecurityEventType, details: String) -> Self {
        let severity = event_type.default_severity();
        Self {
            event_type,
            severity,
            timestamp: SystemTime::now(),
            details,
            session_id: None,
            test_id: None,
            file_path: None,
        }
    }

    pub fn with_session_id(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_test_id(mut self, test_id: &str) -> Self {
        self.test_id = Some(test_id.to_string());
        self
    }

    pub fn with_file_path(mut self, file_path: String) -> Self {
        self.file_path = Some(file_path);
        self
    }

    pub fn with_severity(mut self, severity: SecuritySeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Structured JSON line for the audit trail
    pub fn to_log_entry(&self) -> serde_json::Value {
        let mut log_entry = serde_json::json!({
            "timestamp": self.timestamp
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            "event_type": self.event_type,
            "severity": self.severity,
            "details": self.details,
            "process_id": std::process::id(),
        });

        if let Some(session_id) = &self.session_id {
            log_entry["session_id"] = serde_json::json!(session_id);
        }
        if let Some(test_id) = &self.test_id {
            log_entry["test_id"] = serde_json::json!(test_id);
        }
        if let Some(file_path) = &self.file_path {
            log_entry["file_path"] = serde_json::json!(file_path);
        }
        log_entry
    }
}

/// Audit logger that writes to both the log facade and an audit file
pub struct SecurityLogger {
    audit_file: Arc<Mutex<File>>,
    audit_path: PathBuf,
}

impl SecurityLogger {
    pub fn new(audit_path: PathBuf) -> Result<Self> {
        if let Some(parent) = audit_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SandboxError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)
            .map_err(|e| SandboxError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Arc::new(Mutex::new(audit_file)),
            audit_path,
        })
    }

    pub fn log_security_event(&self, event: SecurityEvent) {
        let log_entry = event.to_log_entry();
        emit(&event);

        if let Ok(mut file) = self.audit_file.lock() {
            if let Err(e) = writeln!(file, "{}", log_entry) {
                error!("Failed to write to audit log: {}", e);
            }
            if let Err(e) = file.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        } else {
            error!("Failed to acquire lock on audit file");
        }
    }

    pub fn audit_path(&self) -> &PathBuf {
        &self.audit_path
    }
}

fn emit(event: &SecurityEvent) {
    match event.severity {
        SecuritySeverity::Critical | SecuritySeverity::High => {
            error!("SECURITY {:?}: {:?} - {}", event.severity, event.event_type, event.details);
        }
        SecuritySeverity::Medium => {
            warn!("SECURITY {:?}: {:?} - {}", event.severity, event.event_type, event.details);
        }
        SecuritySeverity::Low => {
            info!("SECURITY {:?}: {:?} - {}", event.severity, event.event_type, event.details);
        }
    }
}

/// Global audit logger instance
static SECURITY_LOGGER: OnceLock<SecurityLogger> = OnceLock::new();

/// Initialize the global audit logger. Without a path, events only go to `log`.
pub fn init_security_logger(audit_path: Option<PathBuf>) -> Result<()> {
    let Some(path) = audit_path else {
        return Ok(());
    };
    let logger = SecurityLogger::new(path)?;
    if SECURITY_LOGGER.set(logger).is_err() {
        warn!("Audit logger already initialized");
    } else {
        info!("Audit logger initialized");
    }
    Ok(())
}

/// Log an event using the global logger
pub fn log_security_event(event: SecurityEvent) {
    if let Some(logger) = SECURITY_LOGGER.get() {
        logger.log_security_event(event);
    } else {
        emit(&event);
    }
}

/// Convenience functions for common events
pub mod events {
    use super::*;

    pub fn path_traversal_attempt(path: String) {
        let event = SecurityEvent::new(
            SecurityEventType::PathTraversalAttempt,
            format!("Blocked path traversal attempt: {}", path),
        )
        .with_file_path(path);
        log_security_event(event);
    }

    pub fn storage_failure(key: &str, error: String) {
        log_security_event(SecurityEvent::new(
            SecurityEventType::StorageFailure,
            format!("Persisting '{}' failed: {}", key, error),
        ));
    }

    pub fn session_start(session_id: &str, mode: &str) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::SessionStart,
                format!("Worker session started ({} input)", mode),
            )
            .with_session_id(session_id),
        );
    }

    pub fn session_teardown(session_id: &str) {
        log_security_event(
            SecurityEvent::new(SecurityEventType::SessionTeardown, "Worker session torn down".to_string())
                .with_session_id(session_id),
        );
    }

    pub fn runtime_load_failure(session_id: &str, error: String) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::RuntimeLoadFailure,
                format!("Interpreter failed to load: {}", error),
            )
            .with_session_id(session_id),
        );
    }

    pub fn transport_failure(session_id: &str, error: String) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::TransportFailure,
                format!("Worker transport failed: {}", error),
            )
            .with_session_id(session_id),
        );
    }

    pub fn run_timeout(test_id: &str, limit_ms: u64) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::RunTimeout,
                format!("Run exceeded {}ms and was torn down", limit_ms),
            )
            .with_test_id(test_id),
        );
    }

    pub fn output_limit_violation(test_id: &str, stream: &str, limit: usize) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::OutputLimitViolation,
                format!("{} exceeded {} bytes and was truncated", stream, limit),
            )
            .with_test_id(test_id),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_severity() {
        assert_eq!(
            SecurityEventType::PathTraversalAttempt.default_severity(),
            SecuritySeverity::Critical
        );
        assert_eq!(
            SecurityEventType::SessionStart.default_severity(),
            SecuritySeverity::Low
        );
        assert_eq!(
            SecurityEventType::RunTimeout.default_severity(),
            SecuritySeverity::Medium
        );
    }

    #[test]
    fn test_log_entry_fields() {
        let event = SecurityEvent::new(SecurityEventType::RunTimeout, "slow".to_string())
            .with_session_id("s-1")
            .with_test_id("t-1");
        let entry = event.to_log_entry();
        assert_eq!(entry["session_id"], "s-1");
        assert_eq!(entry["test_id"], "t-1");
        assert_eq!(entry["event_type"], "RunTimeout");
        assert!(entry.get("file_path").is_none());
    }

    #[test]
    fn test_security_logger_appends_json_lines() {
        let audit_path =
            std::env::temp_dir().join(format!("clipy-test-audit-{}.log", uuid::Uuid::new_v4()));
        let logger = SecurityLogger::new(audit_path.clone()).unwrap();
        logger.log_security_event(
            SecurityEvent::new(SecurityEventType::PathTraversalAttempt, "../x".to_string())
                .with_file_path("../x".to_string()),
        );

        let content = std::fs::read_to_string(&audit_path).unwrap();
        let line: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(line["file_path"], "../x");

        let _ = std::fs::remove_file(audit_path);
    }

    #[test]
    fn test_security_event_serialization() {
        let event = SecurityEvent::new(SecurityEventType::SessionStart, "start".to_string());
        assert!(serde_json::to_string(&event).is_ok());
    }
}
