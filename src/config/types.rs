/// Core types and error taxonomy shared across the clipy crates modules
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Flat path -> content mapping. Keys are absolute normalized paths.
pub type FileTree = BTreeMap<String, String>;

/// Lifecycle state of one worker session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    #[serde(rename = "uninitialized")]
    Uninitialized,
    #[serde(rename = "initializing")]
    Initializing,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "running")]
    Running,
    /// Interpreter failed to load. Terminal for the session.
    #[serde(rename = "failed")]
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Running => write!(f, "running"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Uninitialized
    }
}

/// How the worker delivers stdin when its queue runs dry
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum InputMode {
    /// Park the interpreter thread on a shared flag until the host sends input
    #[serde(rename = "blocking")]
    Blocking,
    /// Report "no input available" immediately
    #[serde(rename = "non_blocking")]
    NonBlocking,
}

impl Default for InputMode {
    fn default() -> Self {
        InputMode::Blocking
    }
}

/// Output integrity classification for captured program output
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum OutputIntegrity {
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "truncated_by_limit")]
    TruncatedByLimit,
    /// Run was torn down before it reported completion
    #[serde(rename = "interrupted")]
    Interrupted,
}

impl std::fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
            OutputIntegrity::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl Default for OutputIntegrity {
    fn default() -> Self {
        OutputIntegrity::Complete
    }
}

/// Error types for clipy
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Target path resolves outside the logical root
    #[error("Path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Interpreter could not be loaded. Terminal for the session.
    #[error("Runtime load failure: {0}")]
    RuntimeLoad(String),

    /// Error raised inside learner code
    #[error("Runtime execution error: {0}")]
    RuntimeExecution(String),

    /// Worker unreachable or crashed
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Structural analyzer rejected the query or the source
    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    /// Session-breaking conditions the host must react to by recreating the session
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, SandboxError::RuntimeLoad(_) | SandboxError::Transport(_))
    }
}

/// Result type alias for clipy operations
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Ready.to_string(), "ready");
        assert_eq!(SessionState::Failed.to_string(), "failed");
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Running.is_terminal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(SandboxError::RuntimeLoad("x".into()).is_session_fatal());
        assert!(SandboxError::Transport("x".into()).is_session_fatal());
        assert!(!SandboxError::PathTraversal("../x".into()).is_session_fatal());
        assert!(!SandboxError::RuntimeExecution("boom".into()).is_session_fatal());
    }

    #[test]
    fn test_input_mode_serde() {
        let json = serde_json::to_string(&InputMode::NonBlocking).unwrap();
        assert_eq!(json, "\"non_blocking\"");
        let back: InputMode = serde_json::from_str("\"blocking\"").unwrap();
        assert_eq!(back, InputMode::Blocking);
    }
}
