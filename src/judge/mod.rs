//! Test grading.
//!
//! A `TestCase` is graded either structurally, by querying a
//! `StructuralAnalyzer` over the source, or by executing it in a fresh
//! worker session and matching its output. Grading reads the live workspace
//! unless a test pins its own code or asks for the runner's snapshot.

pub mod analyzer;
pub mod case;
pub mod matcher;
pub mod runner;
pub mod source;

pub use analyzer::{SourceAnalyzer, StructuralAnalyzer};
pub use case::{FailureReason, ResultPayload, SourceKind, TestCase, TestKind, TestResult};
pub use matcher::{match_expectation, Expectation, MatchOutcome, ResultMatcher};
pub use runner::{RunnerOptions, SandboxedRunner, SuiteSummary};
