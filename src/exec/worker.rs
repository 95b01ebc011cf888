//! Worker side of a session.
//!
//! Two threads sit behind the channel boundary. The dispatcher owns the
//! message loop and the session state, so `send` is processed even while a
//! run is parked on stdin. The executor owns the interpreter and performs
//! load, run, mount and sync strictly in arrival order.

use crate::config::types::{FileTree, SessionState};
use crate::exec::flag::SharedFlag;
use crate::exec::input::{select_reader, InputQueue, InputReader};
use crate::exec::protocol::{HostMessage, WorkerEvent};
use crate::observability::audit::events;
use crate::runtime::{CancelToken, Interpreter, OutputSink, RuntimeIo, RuntimeLoader, Stream};
use crate::vfs::mirror::{collect_tree, mount_tree};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Session state shared read-only with the host handle
#[derive(Debug, Clone, Default)]
pub struct StateCell {
    inner: Arc<Mutex<SessionState>>,
}

impl StateCell {
    pub fn get(&self) -> SessionState {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: SessionState) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Move `from -> to` only if the session is currently in `from`
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return false;
        }
        *state = to;
        true
    }
}

enum ExecCommand {
    Load {
        loader: Box<dyn RuntimeLoader>,
        stdin: Arc<dyn InputReader>,
    },
    Run { code: String },
    Mount { files: FileTree },
    Sync,
}

impl ExecCommand {
    fn kind(&self) -> &'static str {
        match self {
            ExecCommand::Load { .. } => "load",
            ExecCommand::Run { .. } => "run",
            ExecCommand::Mount { .. } => "mount",
            ExecCommand::Sync => "sync",
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub(crate) struct WorkerHandles {
    pub tx: Sender<HostMessage>,
    pub rx: Receiver<WorkerEvent>,
    pub state: StateCell,
    pub dispatcher: JoinHandle<()>,
    pub executor: JoinHandle<()>,
}

/// Start the dispatcher and executor threads for one session
pub(crate) fn spawn_worker(
    session_id: &str,
    loader: Box<dyn RuntimeLoader>,
    cancel: CancelToken,
) -> std::io::Result<WorkerHandles> {
    let (host_tx, host_rx) = unbounded::<HostMessage>();
    let (event_tx, event_rx) = unbounded::<WorkerEvent>();
    let (exec_tx, exec_rx) = unbounded::<ExecCommand>();
    let state = StateCell::default();

    let executor = Executor {
        session_id: session_id.to_string(),
        events: event_tx.clone(),
        state: state.clone(),
        cancel,
        interpreter: None,
    };
    let executor = thread::Builder::new()
        .name(format!("clipy-exec-{}", short_id(session_id)))
        .spawn(move || executor.serve(exec_rx))?;

    let dispatcher = Dispatcher {
        events: event_tx,
        state: state.clone(),
        queue: Arc::new(InputQueue::new()),
        loader: Some(loader),
        exec: exec_tx,
    };
    let dispatcher = thread::Builder::new()
        .name(format!("clipy-worker-{}", short_id(session_id)))
        .spawn(move || dispatcher.serve(host_rx))?;

    Ok(WorkerHandles {
        tx: host_tx,
        rx: event_rx,
        state,
        dispatcher,
        executor,
    })
}

fn short_id(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

struct Dispatcher {
    events: Sender<WorkerEvent>,
    state: StateCell,
    queue: Arc<InputQueue>,
    loader: Option<Box<dyn RuntimeLoader>>,
    exec: Sender<ExecCommand>,
}

impl Dispatcher {
    fn serve(mut self, rx: Receiver<HostMessage>) {
        for message in rx.iter() {
            log::trace!("worker: received {}", message.kind());
            let keep_going = match message {
                HostMessage::Init { shared_flag } => self.on_init(shared_flag),
                HostMessage::Send { text } => {
                    self.on_send(&text);
                    true
                }
                HostMessage::CloseInput => {
                    self.queue.close();
                    self.status("worker: input closed".to_string());
                    true
                }
                HostMessage::Run { code } => self.forward_when_ready(ExecCommand::Run { code }, true),
                HostMessage::Mount { files } => {
                    self.forward_when_ready(ExecCommand::Mount { files }, false)
                }
                HostMessage::Sync => self.forward_when_ready(ExecCommand::Sync, false),
                HostMessage::Shutdown => false,
            };
            if !keep_going {
                break;
            }
        }
        log::debug!("worker: dispatcher stopped");
    }

    fn status(&self, text: String) {
        log::debug!("{}", text);
        let _ = self.events.send(WorkerEvent::Status { text });
    }

    fn on_init(&mut self, shared_flag: Option<SharedFlag>) -> bool {
        let Some(loader) = self.loader.take() else {
            self.status("worker: already initialized".to_string());
            return true;
        };
        if !self
            .state
            .transition(SessionState::Uninitialized, SessionState::Initializing)
        {
            self.status(format!("worker: cannot init from {}", self.state.get()));
            return true;
        }

        self.status("worker: init".to_string());
        let stdin = select_reader(self.queue.clone(), shared_flag);
        self.exec.send(ExecCommand::Load { loader, stdin }).is_ok()
    }

    fn on_send(&self, text: &str) {
        self.queue.push_text(text);
        let quoted = serde_json::to_string(text).unwrap_or_else(|_| text.to_string());
        self.status(format!("worker: queued {}", quoted));
    }

    /// Forward to the executor if the interpreter is usable. A run also
    /// claims the session: Ready -> Running.
    fn forward_when_ready(&self, command: ExecCommand, is_run: bool) -> bool {
        let accepted = if is_run {
            self.state
                .transition(SessionState::Ready, SessionState::Running)
        } else {
            matches!(self.state.get(), SessionState::Ready | SessionState::Running)
        };
        if !accepted {
            self.status("worker: runtime not ready".to_string());
            return true;
        }
        // Executor gone means it panicked; stop so the host sees the failure
        self.exec.send(command).is_ok()
    }
}

struct Executor {
    session_id: String,
    events: Sender<WorkerEvent>,
    state: StateCell,
    cancel: CancelToken,
    interpreter: Option<Box<dyn Interpreter>>,
}

impl Executor {
    fn serve(mut self, rx: Receiver<ExecCommand>) {
        for command in rx.iter() {
            let kind = command.kind();
            let handled = panic::catch_unwind(AssertUnwindSafe(|| match command {
                ExecCommand::Load { loader, stdin } => self.load(loader, stdin),
                ExecCommand::Run { code } => self.run(&code),
                ExecCommand::Mount { files } => self.mount(&files),
                ExecCommand::Sync => self.sync(),
            }));
            if let Err(payload) = handled {
                let reason = panic_message(payload.as_ref());
                log::error!("worker: executor crashed during {}: {}", kind, reason);
                self.status(format!("worker: executor crashed: {}", reason));
                // The host sees the exited thread as a transport failure
                return;
            }
        }
        log::debug!("worker: executor stopped");
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    fn status(&self, text: String) {
        log::debug!("{}", text);
        self.emit(WorkerEvent::Status { text });
    }

    fn load(&mut self, loader: Box<dyn RuntimeLoader>, stdin: Arc<dyn InputReader>) {
        let io = RuntimeIo {
            stdin,
            stdout: OutputSink::new(self.events.clone(), Stream::Stdout),
            stderr: OutputSink::new(self.events.clone(), Stream::Stderr),
            cancel: self.cancel.clone(),
        };
        match loader.load(io) {
            Ok(interpreter) => {
                self.interpreter = Some(interpreter);
                self.state.set(SessionState::Ready);
                self.status("worker: runtime initialized".to_string());
                self.emit(WorkerEvent::Ready);
            }
            Err(e) => {
                events::runtime_load_failure(&self.session_id, e.to_string());
                self.status(format!("worker: init failed: {}", e));
                self.state.set(SessionState::Failed);
            }
        }
    }

    fn run(&mut self, code: &str) {
        let Some(mut interpreter) = self.interpreter.take() else {
            self.status("worker: runtime not ready".to_string());
            return;
        };

        self.status("worker: running program".to_string());
        let result = interpreter.run(code);
        self.interpreter = Some(interpreter);

        let done = match result {
            Ok(outcome) => {
                self.status("worker: finished".to_string());
                WorkerEvent::Done {
                    success: outcome.success,
                    value: outcome.value,
                }
            }
            Err(e) => {
                self.emit(WorkerEvent::Stderr {
                    text: format!("worker runtime error: {}", e),
                });
                WorkerEvent::Done {
                    success: false,
                    value: None,
                }
            }
        };
        self.state
            .transition(SessionState::Running, SessionState::Ready);
        self.emit(done);
    }

    fn mount(&mut self, files: &FileTree) {
        let Some(interpreter) = self.interpreter.as_mut() else {
            return;
        };
        let report = mount_tree(files, interpreter.filesystem());
        for (path, error) in &report.failed {
            self.status(format!("worker: mount failed for {}: {}", path, error));
        }
        self.status(format!("worker: mounted {} files", report.written.len()));
    }

    fn sync(&mut self) {
        let Some(interpreter) = self.interpreter.as_mut() else {
            return;
        };
        let (files, report) = collect_tree(interpreter.filesystem());
        for (path, reason) in &report.skipped {
            self.status(format!("worker: sync skipped {}: {}", path, reason));
        }
        self.emit(WorkerEvent::Files { files });
    }
}
