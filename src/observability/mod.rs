//! Observability
//!
//! Structured audit events for session lifecycle and filesystem safety.

pub mod audit;
