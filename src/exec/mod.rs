//! Execution control
//!
//! Runs the interpreter behind a message boundary and delivers stdin to it.

pub mod bridge;
pub mod flag;
pub mod input;
pub mod protocol;
pub(crate) mod worker;

pub use bridge::WorkerBridge;
pub use flag::SharedFlag;
pub use protocol::{HostMessage, WorkerEvent};
