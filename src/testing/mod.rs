//! Testing infrastructure
//!
//! A deterministic scripted runtime for exercising sessions without a real
//! interpreter.

pub mod scripted;

pub use scripted::{ScriptedFactory, ScriptedLoader};
