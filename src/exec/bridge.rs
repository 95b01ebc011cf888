//! Host handle to one worker session.
//!
//! Every call returns immediately; the host only waits when it chooses to,
//! through `recv_timeout`. A session ends only through `terminate` (or drop),
//! which cancels the in-flight run, releases a parked stdin read and stops
//! the worker threads.

use crate::config::types::{FileTree, InputMode, Result, SandboxError, SessionState};
use crate::exec::flag::SharedFlag;
use crate::exec::protocol::{HostMessage, WorkerEvent};
use crate::exec::worker::{spawn_worker, StateCell};
use crate::observability::audit::events;
use crate::runtime::{CancelToken, RuntimeLoader};
use crossbeam_channel::{RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct WorkerBridge {
    session_id: String,
    tx: Option<Sender<HostMessage>>,
    rx: crossbeam_channel::Receiver<WorkerEvent>,
    state: StateCell,
    cancel: CancelToken,
    flag: Option<SharedFlag>,
    dispatcher: Option<JoinHandle<()>>,
    executor: Option<JoinHandle<()>>,
    ready_seen: bool,
    transport_failed: bool,
    terminated: bool,
}

impl WorkerBridge {
    /// Start a session around `loader`. The interpreter is not loaded until `init`.
    pub fn spawn(loader: Box<dyn RuntimeLoader>) -> Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        let cancel = CancelToken::new();
        let handles = spawn_worker(&session_id, loader, cancel.clone())
            .map_err(|e| SandboxError::Transport(format!("Failed to start worker: {}", e)))?;

        log::debug!("bridge: session {} spawned", session_id);
        Ok(Self {
            session_id,
            tx: Some(handles.tx),
            rx: handles.rx,
            state: handles.state,
            cancel,
            flag: None,
            dispatcher: Some(handles.dispatcher),
            executor: Some(handles.executor),
            ready_seen: false,
            transport_failed: false,
            terminated: false,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Worker crashed or became unreachable. Distinct from `Failed`.
    pub fn transport_failed(&self) -> bool {
        self.transport_failed
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Load the interpreter. With a flag, stdin reads block the worker
    /// until input arrives; without one they report no input available.
    pub fn init(&mut self, shared_flag: Option<SharedFlag>) -> Result<()> {
        let mode = if shared_flag.is_some() { "blocking" } else { "non-blocking" };
        events::session_start(&self.session_id, mode);
        self.flag = shared_flag.clone();
        self.post(HostMessage::Init { shared_flag })
    }

    /// `init` with a flag created for the blocking mode
    pub fn init_with_mode(&mut self, mode: InputMode) -> Result<()> {
        let flag = match mode {
            InputMode::Blocking => Some(SharedFlag::new()),
            InputMode::NonBlocking => None,
        };
        self.init(flag)
    }

    pub fn run(&mut self, code: &str) -> Result<()> {
        self.post(HostMessage::Run {
            code: code.to_string(),
        })
    }

    pub fn send(&mut self, text: &str) -> Result<()> {
        self.post(HostMessage::Send {
            text: text.to_string(),
        })
    }

    /// Signal end of input after everything already sent
    pub fn close_input(&mut self) -> Result<()> {
        self.post(HostMessage::CloseInput)
    }

    pub fn mount(&mut self, files: FileTree) -> Result<()> {
        self.post(HostMessage::Mount { files })
    }

    /// Ask for the interpreter filesystem; answered with `WorkerEvent::Files`
    pub fn request_sync(&mut self) -> Result<()> {
        self.post(HostMessage::Sync)
    }

    fn post(&mut self, message: HostMessage) -> Result<()> {
        if self.terminated {
            return Err(SandboxError::Transport(format!(
                "session {} is terminated",
                self.session_id
            )));
        }
        if self.transport_failed {
            return Err(SandboxError::Transport(format!(
                "session {} lost its worker",
                self.session_id
            )));
        }
        let kind = message.kind();
        let sent = match &self.tx {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        };
        if !sent {
            return Err(self.fail_transport(format!("worker unreachable while sending {}", kind)));
        }
        Ok(())
    }

    /// Next pending event without waiting
    pub fn try_recv(&mut self) -> Result<Option<WorkerEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(self.observe(event))),
            Err(TryRecvError::Empty) => {
                self.check_alive()?;
                Ok(None)
            }
            Err(TryRecvError::Disconnected) => Err(self.disconnected()),
        }
    }

    /// Next event, waiting at most `timeout`
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<WorkerEvent>> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(self.observe(event))),
            Err(RecvTimeoutError::Timeout) => {
                self.check_alive()?;
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.disconnected()),
        }
    }

    /// Wait until the session is Ready or Failed, passing every event seen to
    /// `on_event`. Returns the state reached, or the current state on timeout.
    pub fn wait_until_settled<F>(&mut self, timeout: Duration, mut on_event: F) -> Result<SessionState>
    where
        F: FnMut(&WorkerEvent),
    {
        let deadline = Instant::now() + timeout;
        loop {
            if self.ready_seen || self.state() == SessionState::Failed {
                // Failure status is emitted before the state flips
                while let Some(event) = self.try_recv()? {
                    on_event(&event);
                }
                return Ok(self.state());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(self.state());
            }
            if let Some(event) = self.recv_timeout(remaining.min(Duration::from_millis(50)))? {
                on_event(&event);
            }
        }
    }

    fn observe(&mut self, event: WorkerEvent) -> WorkerEvent {
        if event == WorkerEvent::Ready {
            self.ready_seen = true;
        }
        event
    }

    fn check_alive(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        // Events already emitted are delivered before the failure
        if !self.rx.is_empty() {
            return Ok(());
        }
        if thread_exited(&self.executor) {
            return Err(self.fail_transport("worker executor crashed".to_string()));
        }
        if thread_exited(&self.dispatcher) {
            return Err(self.fail_transport("worker stopped unexpectedly".to_string()));
        }
        Ok(())
    }

    fn disconnected(&mut self) -> SandboxError {
        if self.terminated {
            return SandboxError::Transport(format!("session {} is terminated", self.session_id));
        }
        self.fail_transport("worker channel disconnected".to_string())
    }

    fn fail_transport(&mut self, reason: String) -> SandboxError {
        if !self.transport_failed {
            self.transport_failed = true;
            events::transport_failure(&self.session_id, reason.clone());
        }
        SandboxError::Transport(reason)
    }

    /// Tear the session down. Idempotent.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.cancel.cancel();
        if let Some(flag) = &self.flag {
            flag.release();
        }
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(HostMessage::Shutdown);
        }
        // Worker threads exit on their own once the run observes the cancel
        self.dispatcher.take();
        self.executor.take();
        events::session_teardown(&self.session_id);
    }
}

fn thread_exited(handle: &Option<JoinHandle<()>>) -> bool {
    handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        self.terminate();
    }
}
