//! Configuration
//!
//! Shared types, `clipy.json` loading, and startup validation.

pub mod loader;
pub mod types;
pub mod validator;
