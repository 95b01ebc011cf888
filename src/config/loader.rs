/// Configuration loading from clipy.json
use crate::config::types::{InputMode, Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage key holding the serialized file tree
pub const DEFAULT_STORAGE_KEY: &str = "ssg_files_v1";

/// Protected entry-point path
pub const DEFAULT_MAIN_FILE: &str = "/main.py";

/// Runtime command used by the subprocess interpreter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Interpreter executable
    pub executable: PathBuf,
    /// Arguments placed before `-c <code>`
    pub args: Vec<String>,
    /// Base directory for per-session interpreter filesystems
    pub workspace_base: PathBuf,
    /// Environment variables passed to the interpreter
    pub environment: Vec<(String, String)>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/usr/bin/python3"),
            args: vec!["-B".to_string(), "-u".to_string()],
            workspace_base: std::env::temp_dir().join("clipy-sessions"),
            environment: Vec::new(),
        }
    }
}

/// Output capture limits for graded runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Per-stream stdout limit (bytes)
    pub stdout_limit: usize,
    /// Per-stream stderr limit (bytes)
    pub stderr_limit: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            stdout_limit: 1024 * 1024,
            stderr_limit: 256 * 1024,
        }
    }
}

/// Full clipy.json structure. Every field is optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Protected entry-point path
    pub main_file: String,
    /// Storage key for the persisted file tree
    pub storage_key: String,
    /// Directory holding persisted blobs
    pub storage_dir: PathBuf,
    /// Stdin strategy selected at session creation
    pub input_mode: InputMode,
    /// Default per-test timeout in milliseconds
    pub test_timeout_ms: u64,
    /// Time allowed for interpreter startup in milliseconds
    pub init_timeout_ms: u64,
    pub runtime: RuntimeSettings,
    pub output: OutputSettings,
    /// Append-only audit log (optional)
    pub audit_log: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            main_file: DEFAULT_MAIN_FILE.to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            storage_dir: default_storage_dir(),
            input_mode: InputMode::Blocking,
            test_timeout_ms: 20_000,
            init_timeout_ms: 10_000,
            runtime: RuntimeSettings::default(),
            output: OutputSettings::default(),
            audit_log: None,
        }
    }
}

fn default_storage_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".clipy")
}

impl SandboxConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SandboxError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: SandboxConfig = serde_json::from_str(&content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config)
    }

    /// Load ./clipy.json when present, otherwise defaults
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| SandboxError::Config(format!("Failed to get current directory: {}", e)))?
            .join("clipy.json");

        if !config_path.exists() {
            log::debug!("clipy.json not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from_file(config_path)
    }
}
