/// Test case and result records
use crate::config::types::{FileTree, OutputIntegrity};
use crate::judge::matcher::{Expectation, MatchOutcome, ResultMatcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    /// Run the program and check its output
    #[default]
    Execution,
    /// Inspect the source with the structural analyzer
    Ast,
}

/// Structural check: analyzer query plus pass criterion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstRule {
    /// Analyzer query, e.g. `function_exists:main`
    pub expression: String,
    #[serde(default)]
    pub matcher: ResultMatcher,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: TestKind,
    #[serde(default)]
    pub rule: Option<AstRule>,
    /// Grade this code instead of the workspace main file
    #[serde(default, alias = "main")]
    pub code: Option<String>,
    /// Grade the construction-time snapshot instead of the live workspace
    #[serde(default)]
    pub use_snapshot: bool,
    /// Extra files written into the session before the run
    #[serde(default, alias = "files")]
    pub setup: Option<FileTree>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub expected_stdout: Option<Expectation>,
    #[serde(default)]
    pub expected_stderr: Option<Expectation>,
    #[serde(default, alias = "timeoutMs")]
    pub timeout_ms: Option<u64>,
}

impl TestCase {
    pub fn execution(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn ast(id: &str, expression: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: TestKind::Ast,
            rule: Some(AstRule {
                expression: expression.to_string(),
                matcher: ResultMatcher::default(),
            }),
            ..Self::default()
        }
    }

    pub fn with_stdout(mut self, expected: Expectation) -> Self {
        self.expected_stdout = Some(expected);
        self
    }

    pub fn with_stderr(mut self, expected: Expectation) -> Self {
        self.expected_stderr = Some(expected);
        self
    }

    pub fn with_stdin(mut self, stdin: &str) -> Self {
        self.stdin = Some(stdin.to_string());
        self
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn with_snapshot(mut self) -> Self {
        self.use_snapshot = true;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Which workspace state a result was graded against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Live,
    Snapshot,
    Pinned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Output did not satisfy an expectation
    Mismatch,
    Timeout,
    SetupFailed,
    /// Session or analyzer failure; see `error`
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<MatchOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<MatchOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPayload {
    Ast {
        ast_passed: bool,
        ast_result: Value,
    },
    Execution {
        stdout: String,
        /// Mapped to learner line numbers
        stderr: String,
        return_value: Option<String>,
        duration_ms: u64,
        integrity: OutputIntegrity,
        details: MatchDetails,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub description: String,
    pub passed: bool,
    pub reason: Option<FailureReason>,
    pub error: Option<String>,
    pub source: SourceKind,
    /// SHA-256 of the graded code
    pub source_fingerprint: String,
    pub payload: ResultPayload,
}
