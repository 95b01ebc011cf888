//! clipy: sandbox core for running and grading learner programs
//! Learner code runs off the host thread, against a persistent workspace, with
//! error locations reported in the learner's own line numbers.
//!
//! # Architecture
//!
//! ## Workspace ([`vfs`])
//! - [`vfs::path`]: Logical path normalization and traversal rejection
//! - [`vfs::storage`]: Key/value persistence backends (memory, directory)
//! - [`vfs::store`]: Flat path -> content store with a protected main file
//! - [`vfs::host`]: Hierarchical interpreter filesystems
//! - [`vfs::mirror`]: Mount into and sync back from an interpreter filesystem
//!
//! ## Execution Control ([`exec`])
//! - [`exec::bridge`]: Host handle to one worker session
//! - [`exec::protocol`]: Host -> worker messages and worker -> host events
//! - [`exec::flag`]: Shared wake flag for blocking stdin
//! - [`exec::input`]: Stdin queue and the two reader strategies
//!
//! ## Interpreters ([`runtime`])
//! - [`runtime::process`]: Subprocess-backed interpreter
//!
//! ## Traceback Mapping ([`traceback`])
//! - [`traceback::transform`]: Code transform contract (header offset, line map)
//!
//! ## Grading ([`judge`])
//! - [`judge::case`]: Test case and result records
//! - [`judge::matcher`]: Output expectations and analyzer result matchers
//! - [`judge::analyzer`]: Structural source queries
//! - [`judge::source`]: Live / snapshot / pinned source selection
//! - [`judge::runner`]: Fresh-session test execution
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events
//!
//! ## Configuration ([`config`])
//! - [`config::loader`]: `clipy.json` loading
//! - [`config::validator`]: Startup validation
//! - [`config::types`]: Shared types and the error taxonomy
//!
//! ## Utilities ([`utils`])
//! - [`utils::output`]: Bounded output capture
//! - [`utils::fingerprint`]: Source fingerprints
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::scripted`]: Deterministic scripted interpreter

// Workspace
pub mod vfs;

// Execution Control
pub mod exec;

// Interpreters
pub mod runtime;

// Traceback Mapping
pub mod traceback;

// Grading
pub mod judge;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the clipy binary
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
