//! Utilities
//!
//! Bounded output collection and source fingerprinting.

pub mod fingerprint;
pub mod output;
