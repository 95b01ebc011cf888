/// Sandboxed test runner
///
/// Each execution test gets a brand-new worker session: the selected files
/// are mounted, stdin is queued, the transformed code runs, and output is
/// captured until the run reports completion or the timeout expires. A
/// timed-out session is torn down, never reused. Results never flow back
/// into the workspace.
use crate::config::loader::SandboxConfig;
use crate::config::types::{FileTree, InputMode, SandboxError, SessionState};
use crate::exec::bridge::WorkerBridge;
use crate::exec::protocol::WorkerEvent;
use crate::judge::analyzer::{SourceAnalyzer, StructuralAnalyzer};
use crate::judge::case::{
    FailureReason, MatchDetails, ResultPayload, SourceKind, TestCase, TestKind, TestResult,
};
use crate::judge::matcher::match_expectation;
use crate::judge::source::{select_source, SelectedSource};
use crate::observability::audit::events;
use crate::runtime::RuntimeFactory;
use crate::traceback::transform::{CodeTransformer, Identity, TransformOutput};
use crate::traceback::TracebackMapper;
use crate::utils::fingerprint::source_fingerprint;
use crate::utils::output::{BoundedCapture, OutputLimits};
use crate::vfs::VirtualFs;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub input_mode: InputMode,
    pub init_timeout: Duration,
    /// Applied when a test sets no timeout of its own
    pub default_timeout: Duration,
    pub limits: OutputLimits,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

impl From<&SandboxConfig> for RunnerOptions {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            input_mode: config.input_mode,
            init_timeout: Duration::from_millis(config.init_timeout_ms),
            default_timeout: Duration::from_millis(config.test_timeout_ms),
            limits: config.output.clone().into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// What happened to an execution run
enum RunEnd {
    Finished {
        success: bool,
        value: Option<String>,
    },
    TimedOut,
    /// Session broke before the run completed
    Broken(String),
}

pub struct SandboxedRunner {
    factory: Box<dyn RuntimeFactory>,
    analyzer: Box<dyn StructuralAnalyzer>,
    transformer: Box<dyn CodeTransformer>,
    options: RunnerOptions,
    snapshot: Option<FileTree>,
}

impl SandboxedRunner {
    pub fn new(factory: Box<dyn RuntimeFactory>) -> Self {
        Self {
            factory,
            analyzer: Box::new(SourceAnalyzer),
            transformer: Box::new(Identity),
            options: RunnerOptions::default(),
            snapshot: None,
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Box<dyn StructuralAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_transformer(mut self, transformer: Box<dyn CodeTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    /// Workspace state captured when the runner was built. Only graded by
    /// tests that set `use_snapshot`.
    pub fn with_snapshot(mut self, snapshot: FileTree) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Run one test against the live workspace `live`
    pub fn run(&self, test: &TestCase, live: &VirtualFs) -> TestResult {
        let selected = match select_source(test, live, self.snapshot.as_ref()) {
            Ok(selected) => selected,
            Err(e) => {
                log::warn!("judge: test {} setup rejected: {}", test.id, e);
                return failure(test, SourceKind::Live, "", FailureReason::SetupFailed, e.to_string());
            }
        };
        let fingerprint = source_fingerprint(&selected.code);
        log::info!(
            "judge: test {} grading {:?} source {}",
            test.id,
            selected.kind,
            &fingerprint[..12]
        );

        match test.kind {
            TestKind::Ast => self.run_structural(test, &selected, fingerprint),
            TestKind::Execution => self.run_execution(test, selected, fingerprint, live.main_file()),
        }
    }

    /// Run a suite in order. One result per test, failures included.
    pub fn run_tests(
        &self,
        tests: &[TestCase],
        live: &VirtualFs,
    ) -> (Vec<TestResult>, SuiteSummary) {
        let results: Vec<TestResult> = tests.iter().map(|test| self.run(test, live)).collect();
        let passed = results.iter().filter(|r| r.passed).count();
        let summary = SuiteSummary {
            total: results.len(),
            passed,
            failed: results.len() - passed,
        };
        log::info!(
            "judge: suite finished, {}/{} passed",
            summary.passed,
            summary.total
        );
        (results, summary)
    }

    fn run_structural(&self, test: &TestCase, selected: &SelectedSource, fingerprint: String) -> TestResult {
        let Some(rule) = &test.rule else {
            return failure(
                test,
                selected.kind,
                &fingerprint,
                FailureReason::Error,
                "structural test has no rule".to_string(),
            );
        };

        match self.analyzer.analyze(&selected.code, &rule.expression) {
            Ok(result) => {
                let ast_passed = rule.matcher.evaluate(&result);
                TestResult {
                    id: test.id.clone(),
                    description: test.description.clone(),
                    passed: ast_passed,
                    reason: (!ast_passed).then_some(FailureReason::Mismatch),
                    error: None,
                    source: selected.kind,
                    source_fingerprint: fingerprint,
                    payload: ResultPayload::Ast {
                        ast_passed,
                        ast_result: result,
                    },
                }
            }
            Err(e) => failure(test, selected.kind, &fingerprint, FailureReason::Error, e.to_string()),
        }
    }

    fn run_execution(
        &self,
        test: &TestCase,
        selected: SelectedSource,
        fingerprint: String,
        display_name: &str,
    ) -> TestResult {
        let transformed = match self.transformer.transform(&selected.code) {
            Ok(output) => output,
            Err(e) => {
                return failure(test, selected.kind, &fingerprint, FailureReason::Error, e.to_string())
            }
        };
        let mapper = TracebackMapper::for_transform(&transformed).with_display_name(display_name);

        let mut bridge = match WorkerBridge::spawn(self.factory.loader()) {
            Ok(bridge) => bridge,
            Err(e) => {
                return failure(test, selected.kind, &fingerprint, FailureReason::Error, e.to_string())
            }
        };

        let mut capture = BoundedCapture::new(self.options.limits.clone());
        let started = Instant::now();
        let end = self
            .prepare_session(&mut bridge, test, selected.files)
            .and_then(|()| self.drive_run(&mut bridge, test, &transformed, &mut capture));
        let duration_ms = started.elapsed().as_millis() as u64;
        bridge.terminate();

        let (reason, error, return_value) = match end {
            Ok(RunEnd::Finished { success, value }) => {
                if !success {
                    log::debug!("judge: test {} program ended with an uncaught error", test.id);
                }
                (None, None, value)
            }
            Ok(RunEnd::TimedOut) => {
                capture.mark_interrupted();
                (Some(FailureReason::Timeout), None, None)
            }
            Ok(RunEnd::Broken(message)) => {
                capture.mark_interrupted();
                (Some(FailureReason::Error), Some(message), None)
            }
            Err(SessionSetup::Mount(message)) => (Some(FailureReason::SetupFailed), Some(message), None),
            Err(SessionSetup::Session(message)) => (Some(FailureReason::Error), Some(message), None),
        };

        if capture.stdout_truncated() {
            events::output_limit_violation(&test.id, "stdout", self.options.limits.stdout_limit);
        }
        if capture.stderr_truncated() {
            events::output_limit_violation(&test.id, "stderr", self.options.limits.stderr_limit);
        }

        let output = capture.finish();
        let stderr = mapper.map(&output.stderr);
        let stdout_match = test
            .expected_stdout
            .as_ref()
            .map(|expected| match_expectation(&output.stdout, Some(expected)));
        let stderr_match = test
            .expected_stderr
            .as_ref()
            .map(|expected| match_expectation(&stderr, Some(expected)));
        let matched = stdout_match.as_ref().map(|m| m.matched).unwrap_or(true)
            && stderr_match.as_ref().map(|m| m.matched).unwrap_or(true);

        let reason = reason.or((!matched).then_some(FailureReason::Mismatch));
        let passed = reason.is_none();
        log::info!(
            "judge: test {} {} in {}ms",
            test.id,
            if passed { "passed" } else { "failed" },
            duration_ms
        );

        TestResult {
            id: test.id.clone(),
            description: test.description.clone(),
            passed,
            reason,
            error,
            source: selected.kind,
            source_fingerprint: fingerprint,
            payload: ResultPayload::Execution {
                stdout: output.stdout,
                stderr,
                return_value,
                duration_ms,
                integrity: output.combined_integrity,
                details: MatchDetails {
                    stdout: stdout_match,
                    stderr: stderr_match,
                },
            },
        }
    }

    /// Load the interpreter and mount the test's files
    fn prepare_session(
        &self,
        bridge: &mut WorkerBridge,
        test: &TestCase,
        files: FileTree,
    ) -> std::result::Result<(), SessionSetup> {
        bridge
            .init_with_mode(self.options.input_mode)
            .map_err(SessionSetup::from)?;
        let mut load_error = None;
        let state = bridge
            .wait_until_settled(self.options.init_timeout, |event| {
                if let WorkerEvent::Status { text } = event {
                    if let Some(error) = text.strip_prefix("worker: init failed: ") {
                        load_error = Some(error.to_string());
                    }
                }
            })
            .map_err(SessionSetup::from)?;
        match state {
            SessionState::Ready => {}
            SessionState::Failed => {
                return Err(SessionSetup::Session(format!(
                    "runtime failed to load: {}",
                    load_error.unwrap_or_else(|| "unknown error".to_string())
                )))
            }
            other => {
                return Err(SessionSetup::Session(format!(
                    "runtime not ready after {}ms ({})",
                    self.options.init_timeout.as_millis(),
                    other
                )))
            }
        }

        bridge.mount(files).map_err(SessionSetup::from)?;
        let deadline = Instant::now() + self.options.init_timeout;
        let mut failures = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionSetup::Session("mount was not acknowledged".to_string()));
            }
            let Some(event) = bridge
                .recv_timeout(remaining.min(POLL_INTERVAL))
                .map_err(SessionSetup::from)?
            else {
                continue;
            };
            if let WorkerEvent::Status { text } = event {
                if let Some(failure) = text.strip_prefix("worker: mount failed for ") {
                    failures.push(failure.to_string());
                } else if text.starts_with("worker: mounted ") {
                    break;
                }
            }
        }
        if !failures.is_empty() {
            log::warn!("judge: test {} setup failed: {}", test.id, failures.join("; "));
            return Err(SessionSetup::Mount(format!(
                "could not write {}",
                failures.join("; ")
            )));
        }
        Ok(())
    }

    /// Queue stdin, start the run and collect output until it ends
    fn drive_run(
        &self,
        bridge: &mut WorkerBridge,
        test: &TestCase,
        transformed: &TransformOutput,
        capture: &mut BoundedCapture,
    ) -> std::result::Result<RunEnd, SessionSetup> {
        if let Some(stdin) = &test.stdin {
            bridge.send(stdin).map_err(SessionSetup::from)?;
        }
        bridge.run(&transformed.code).map_err(SessionSetup::from)?;

        let limit = test
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.options.default_timeout);
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::warn!("judge: test {} timed out after {}ms", test.id, limit.as_millis());
                events::run_timeout(&test.id, limit.as_millis() as u64);
                return Ok(RunEnd::TimedOut);
            }
            let event = match bridge.recv_timeout(remaining.min(POLL_INTERVAL)) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => return Ok(RunEnd::Broken(e.to_string())),
            };
            match event {
                WorkerEvent::Stdout { text } => capture.push_stdout(&text),
                WorkerEvent::Stderr { text } => capture.push_stderr(&text),
                WorkerEvent::Done { success, value } => return Ok(RunEnd::Finished { success, value }),
                WorkerEvent::Status { text } => log::debug!("judge: {}: {}", test.id, text),
                WorkerEvent::Ready | WorkerEvent::Files { .. } => {}
            }
        }
    }
}

/// Why a session never got to run the program
enum SessionSetup {
    Mount(String),
    Session(String),
}

impl From<SandboxError> for SessionSetup {
    fn from(error: SandboxError) -> Self {
        SessionSetup::Session(error.to_string())
    }
}

fn failure(
    test: &TestCase,
    source: SourceKind,
    fingerprint: &str,
    reason: FailureReason,
    error: String,
) -> TestResult {
    let payload = match test.kind {
        TestKind::Ast => ResultPayload::Ast {
            ast_passed: false,
            ast_result: serde_json::Value::Null,
        },
        TestKind::Execution => ResultPayload::Execution {
            stdout: String::new(),
            stderr: String::new(),
            return_value: None,
            duration_ms: 0,
            integrity: Default::default(),
            details: MatchDetails::default(),
        },
    };
    TestResult {
        id: test.id.clone(),
        description: test.description.clone(),
        passed: false,
        reason: Some(reason),
        error: Some(error),
        source,
        source_fingerprint: fingerprint.to_string(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::OutputIntegrity;
    use crate::judge::matcher::Expectation;
    use crate::testing::scripted::ScriptedFactory;
    use crate::traceback::transform::Prelude;

    fn quick_options() -> RunnerOptions {
        RunnerOptions {
            init_timeout: Duration::from_secs(5),
            default_timeout: Duration::from_secs(5),
            ..RunnerOptions::default()
        }
    }

    fn runner(factory: &ScriptedFactory) -> SandboxedRunner {
        SandboxedRunner::new(Box::new(factory.clone())).with_options(quick_options())
    }

    fn workspace(main: &str) -> VirtualFs {
        let mut vfs = VirtualFs::in_memory();
        vfs.write("/main.py", main).unwrap();
        vfs
    }

    #[test]
    fn test_execution_pass_and_mismatch() {
        let factory = ScriptedFactory::new();
        let live = workspace("print Hello, world");

        let pass = runner(&factory).run(
            &TestCase::execution("t1").with_stdout(Expectation::Contains("Hello".into())),
            &live,
        );
        assert!(pass.passed, "{:?}", pass);
        assert_eq!(pass.reason, None);

        let miss = runner(&factory).run(
            &TestCase::execution("t2").with_stdout(Expectation::Contains("Goodbye".into())),
            &live,
        );
        assert!(!miss.passed);
        assert_eq!(miss.reason, Some(FailureReason::Mismatch));
    }

    #[test]
    fn test_stdin_is_delivered() {
        let factory = ScriptedFactory::new();
        let live = workspace("input");
        let result = runner(&factory).run(
            &TestCase::execution("echo")
                .with_stdin("ab\n")
                .with_stdout(Expectation::Contains("ab".into())),
            &live,
        );
        assert!(result.passed, "{:?}", result);
    }

    #[test]
    fn test_timeout_tears_down() {
        let factory = ScriptedFactory::new();
        let live = workspace("print started\nspin");
        let result = runner(&factory).run(&TestCase::execution("slow").with_timeout_ms(200), &live);
        assert!(!result.passed);
        assert_eq!(result.reason, Some(FailureReason::Timeout));
        match result.payload {
            ResultPayload::Execution { integrity, stdout, .. } => {
                assert_eq!(integrity, OutputIntegrity::Interrupted);
                assert_eq!(stdout, "started\n");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_stderr_is_mapped_through_prelude() {
        let factory = ScriptedFactory::new();
        let live = workspace("print ok\nfail boom");
        let result = runner(&factory)
            .with_transformer(Box::new(Prelude::new("# one\n# two\n# three")))
            .run(
                &TestCase::execution("tb").with_stderr(Expectation::Contains("line 2".into())),
                &live,
            );
        assert!(result.passed, "{:?}", result);
        match result.payload {
            ResultPayload::Execution { stderr, .. } => {
                assert!(stderr.contains("File \"/main.py\", line 2"), "{}", stderr);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_load_failure_reports_error() {
        let factory = ScriptedFactory::from_loader(
            crate::testing::scripted::ScriptedLoader::new().failing("no runtime"),
        );
        let result = runner(&factory).run(&TestCase::execution("t"), &workspace("print x"));
        assert_eq!(result.reason, Some(FailureReason::Error));
        assert!(result.error.unwrap().contains("no runtime"));
    }

    #[test]
    fn test_structural_rule() {
        let factory = ScriptedFactory::new();
        let live = workspace("def main():\n    pass\n");
        let result = runner(&factory).run(&TestCase::ast("has-main", "function_exists:main"), &live);
        assert!(result.passed);
        assert_eq!(factory.sessions_created(), 0);

        let missing = runner(&factory).run(&TestCase::ast("has-solve", "function_exists:solve"), &live);
        assert_eq!(missing.reason, Some(FailureReason::Mismatch));
    }

    #[test]
    fn test_suite_summary() {
        let factory = ScriptedFactory::new();
        let live = workspace("print 1");
        let tests = vec![
            TestCase::execution("a").with_stdout(Expectation::Contains("1".into())),
            TestCase::execution("b").with_stdout(Expectation::Contains("2".into())),
        ];
        let (results, summary) = runner(&factory).run_tests(&tests, &live);
        assert_eq!(results.len(), 2);
        assert_eq!(summary, SuiteSummary { total: 2, passed: 1, failed: 1 });
        assert_eq!(factory.sessions_created(), 2);
    }
}
