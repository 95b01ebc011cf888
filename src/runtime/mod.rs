//! Interpreter runtimes
//!
//! The executor thread owns one `Interpreter` per session. A `RuntimeLoader`
//! builds it on that thread from the session's I/O handles; a
//! `RuntimeFactory` hands out a fresh loader for every new session.

pub mod process;

use crate::config::types::Result;
use crate::exec::input::InputReader;
use crate::exec::protocol::WorkerEvent;
use crate::vfs::host::HostFs;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of one completed run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    /// False when the program ended with an uncaught error
    pub success: bool,
    /// Result of the final expression, when the runtime reports one
    pub value: Option<String>,
}

impl RunOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            value: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            value: None,
        }
    }
}

/// Loaded interpreter, confined to the executor thread
pub trait Interpreter: Send {
    /// Run source to completion. An `Err` is an interpreter-level failure;
    /// learner exceptions are reported on stderr with `success = false`.
    fn run(&mut self, code: &str) -> Result<RunOutcome>;

    /// The interpreter's own hierarchical filesystem
    fn filesystem(&mut self) -> &mut dyn HostFs;
}

pub trait RuntimeLoader: Send {
    fn load(self: Box<Self>, io: RuntimeIo) -> Result<Box<dyn Interpreter>>;
}

pub trait RuntimeFactory: Send + Sync {
    fn loader(&self) -> Box<dyn RuntimeLoader>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Forwards interpreter output to the host as worker events
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: Sender<WorkerEvent>,
    stream: Stream,
}

impl OutputSink {
    pub fn new(tx: Sender<WorkerEvent>, stream: Stream) -> Self {
        Self { tx, stream }
    }

    pub fn write(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let text = text.to_string();
        let event = match self.stream {
            Stream::Stdout => WorkerEvent::Stdout { text },
            Stream::Stderr => WorkerEvent::Stderr { text },
        };
        // Host gone means teardown; output is dropped
        let _ = self.tx.send(event);
    }
}

/// Set by teardown; runtimes poll it to abandon a run
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// I/O handles for one session
#[derive(Clone)]
pub struct RuntimeIo {
    pub stdin: Arc<dyn InputReader>,
    pub stdout: OutputSink,
    pub stderr: OutputSink,
    pub cancel: CancelToken,
}
