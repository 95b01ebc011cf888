// Config validation
// Startup validation fails fast with actionable errors; soft issues become warnings

use crate::config::loader::SandboxConfig;
use crate::config::types::{Result, SandboxError};
use crate::vfs::path::normalize_path;

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate config at startup. Errors are fatal, warnings are logged.
pub fn validate_config(config: &SandboxConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_paths(config, &mut result);
    validate_timeouts(config, &mut result);
    validate_limits(config, &mut result);
    validate_runtime(config, &mut result);

    for warning in &result.warnings {
        log::warn!("config: {}", warning);
    }

    if !result.is_valid() {
        return Err(SandboxError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_paths(config: &SandboxConfig, result: &mut ValidationResult) {
    match normalize_path(&config.main_file) {
        Ok(normalized) if normalized != config.main_file => {
            result.add_warning(format!(
                "main_file '{}' is not normalized; it resolves to '{}'",
                config.main_file, normalized
            ));
        }
        Ok(_) => {}
        Err(e) => result.add_error(format!("main_file is invalid: {}", e)),
    }

    if config.storage_key.trim().is_empty() {
        result.add_error("storage_key cannot be empty".to_string());
    }
    if config.storage_key.contains('/') || config.storage_key.contains('\\') {
        result.add_error(format!(
            "storage_key '{}' must not contain path separators",
            config.storage_key
        ));
    }
}

fn validate_timeouts(config: &SandboxConfig, result: &mut ValidationResult) {
    if config.test_timeout_ms == 0 {
        result.add_error("test_timeout_ms cannot be zero".to_string());
    }
    if config.init_timeout_ms == 0 {
        result.add_error("init_timeout_ms cannot be zero".to_string());
    }
    if config.test_timeout_ms > 10 * 60 * 1000 {
        result.add_warning(format!(
            "test_timeout_ms {} is very high (> 10 minutes)",
            config.test_timeout_ms
        ));
    }
}

fn validate_limits(config: &SandboxConfig, result: &mut ValidationResult) {
    if config.output.stdout_limit == 0 {
        result.add_error("output.stdout_limit cannot be zero".to_string());
    }
    if config.output.stderr_limit == 0 {
        result.add_error("output.stderr_limit cannot be zero".to_string());
    }
}

fn validate_runtime(config: &SandboxConfig, result: &mut ValidationResult) {
    if config.runtime.executable.as_os_str().is_empty() {
        result.add_error("runtime.executable cannot be empty".to_string());
    } else if !config.runtime.executable.exists() {
        // Missing interpreter surfaces later as a per-session load failure
        result.add_warning(format!(
            "runtime.executable {} does not exist",
            config.runtime.executable.display()
        ));
    }
}
