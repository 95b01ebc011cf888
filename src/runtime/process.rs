/// Subprocess-backed Python runtime
///
/// Each session gets a run-scoped directory that serves as the interpreter
/// filesystem. Each run spawns `<executable> <args> -c <code>` inside it,
/// streams output as it arrives and pumps queued stdin into the child.
use crate::config::loader::RuntimeSettings;
use crate::config::types::{Result, SandboxError};
use crate::exec::input::StdinRead;
use crate::runtime::{
    Interpreter, OutputSink, RunOutcome, RuntimeFactory, RuntimeIo, RuntimeLoader,
};
use crate::vfs::host::{DirFs, HostFs};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default)]
pub struct ProcessRuntimeFactory {
    settings: RuntimeSettings,
}

impl ProcessRuntimeFactory {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self { settings }
    }
}

impl RuntimeFactory for ProcessRuntimeFactory {
    fn loader(&self) -> Box<dyn RuntimeLoader> {
        Box::new(ProcessLoader::new(self.settings.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct ProcessLoader {
    settings: RuntimeSettings,
}

impl ProcessLoader {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self { settings }
    }
}

/// Resolve a bare command name through PATH
fn resolve_executable(executable: &Path) -> Option<PathBuf> {
    if executable.components().count() > 1 {
        return executable.is_file().then(|| executable.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}

impl RuntimeLoader for ProcessLoader {
    fn load(self: Box<Self>, io: RuntimeIo) -> Result<Box<dyn Interpreter>> {
        let executable = resolve_executable(&self.settings.executable).ok_or_else(|| {
            SandboxError::RuntimeLoad(format!(
                "interpreter {} not found",
                self.settings.executable.display()
            ))
        })?;

        let run_dir = self
            .settings
            .workspace_base
            .join(format!("session-{}", Uuid::new_v4()));
        let fs = DirFs::new(run_dir.clone()).map_err(|e| {
            SandboxError::RuntimeLoad(format!(
                "Failed to create interpreter filesystem {}: {}",
                run_dir.display(),
                e
            ))
        })?;

        log::debug!(
            "process runtime: {} rooted at {}",
            executable.display(),
            run_dir.display()
        );
        Ok(Box::new(ProcessInterpreter {
            executable,
            settings: self.settings,
            fs,
            io,
        }))
    }
}

pub struct ProcessInterpreter {
    executable: PathBuf,
    settings: RuntimeSettings,
    fs: DirFs,
    io: RuntimeIo,
}

impl ProcessInterpreter {
    fn command(&self, code: &str) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.settings.args)
            .arg("-c")
            .arg(code)
            .current_dir(self.fs.root())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Minimal environment; the learner program sees only what is configured
        cmd.env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("HOME", self.fs.root())
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1");
        for (key, value) in &self.settings.environment {
            cmd.env(key, value);
        }
        cmd
    }

    fn wait_or_cancel(&self, child: &mut Child) -> Result<Option<std::process::ExitStatus>> {
        loop {
            if self.io.cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            match child.try_wait()? {
                Some(status) => return Ok(Some(status)),
                None => thread::sleep(POLL_INTERVAL),
            }
        }
    }
}

impl Interpreter for ProcessInterpreter {
    fn run(&mut self, code: &str) -> Result<RunOutcome> {
        let mut child = self.command(code).spawn().map_err(|e| {
            SandboxError::RuntimeExecution(format!(
                "Failed to start {}: {}",
                self.executable.display(),
                e
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .map(|s| forward_stream(s, self.io.stdout.clone()));
        let stderr = child
            .stderr
            .take()
            .map(|s| forward_stream(s, self.io.stderr.clone()));

        let stop = Arc::new(AtomicBool::new(false));
        let pump = child
            .stdin
            .take()
            .map(|s| pump_stdin(s, self.io.clone(), stop.clone()));

        let status = self.wait_or_cancel(&mut child);

        // Wake a pump parked on an empty queue, then let the next run read again
        stop.store(true, Ordering::SeqCst);
        self.io.stdin.interrupt();
        if let Some(handle) = pump {
            let _ = handle.join();
        }
        self.io.stdin.resume();

        for handle in [stdout, stderr].into_iter().flatten() {
            let _ = handle.join();
        }

        match status? {
            Some(status) => Ok(RunOutcome {
                success: status.success(),
                value: None,
            }),
            None => Err(SandboxError::RuntimeExecution("run cancelled".to_string())),
        }
    }

    fn filesystem(&mut self) -> &mut dyn HostFs {
        &mut self.fs
    }
}

impl Drop for ProcessInterpreter {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(self.fs.root()) {
            log::debug!(
                "process runtime: failed to remove {}: {}",
                self.fs.root().display(),
                e
            );
        }
    }
}

/// Forward a child stream chunk by chunk without splitting UTF-8 sequences.
/// Forwarding by chunk keeps prompts without a trailing newline visible.
fn forward_stream<R: Read + Send + 'static>(mut stream: R, sink: OutputSink) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    let complete = complete_utf8_prefix(&pending);
                    if complete > 0 {
                        sink.write(&String::from_utf8_lossy(&pending[..complete]));
                        pending.drain(..complete);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        if !pending.is_empty() {
            sink.write(&String::from_utf8_lossy(&pending));
        }
    })
}

/// Length of the prefix of `bytes` that does not end inside a UTF-8 sequence
fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        // Invalid bytes are replaced by the lossy decode
        Err(_) => bytes.len(),
    }
}

/// Move queued characters into the child's stdin until input ends.
/// Closing the pipe gives the program end-of-file.
fn pump_stdin(mut stdin: ChildStdin, io: RuntimeIo, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 4];
        while !stop.load(Ordering::SeqCst) {
            match io.stdin.read_char() {
                StdinRead::Char(c) => {
                    if stop.load(Ordering::SeqCst) {
                        // The program is gone; keep the character for the next run
                        io.stdin.unread(c);
                        break;
                    }
                    if stdin.write_all(c.encode_utf8(&mut buf).as_bytes()).is_err() {
                        break;
                    }
                    let _ = stdin.flush();
                }
                StdinRead::Exhausted | StdinRead::Unavailable => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::input::{select_reader, InputQueue};
    use crate::exec::protocol::WorkerEvent;
    use crate::runtime::{CancelToken, Stream};
    use crossbeam_channel::{unbounded, Receiver};

    fn io_with_input(text: &str) -> (RuntimeIo, Receiver<WorkerEvent>) {
        let (tx, rx) = unbounded();
        let queue = Arc::new(InputQueue::new());
        queue.push_text(text);
        let io = RuntimeIo {
            stdin: select_reader(queue, None),
            stdout: OutputSink::new(tx.clone(), Stream::Stdout),
            stderr: OutputSink::new(tx, Stream::Stderr),
            cancel: CancelToken::new(),
        };
        (io, rx)
    }

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            executable: PathBuf::from("python3"),
            workspace_base: std::env::temp_dir().join(format!("clipy-test-{}", Uuid::new_v4())),
            ..RuntimeSettings::default()
        }
    }

    fn python_available() -> bool {
        resolve_executable(Path::new("python3")).is_some()
    }

    fn stream_text(rx: &Receiver<WorkerEvent>, stream: Stream) -> String {
        rx.try_iter()
            .filter_map(|event| match (event, stream) {
                (WorkerEvent::Stdout { text }, Stream::Stdout) => Some(text),
                (WorkerEvent::Stderr { text }, Stream::Stderr) => Some(text),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_complete_utf8_prefix() {
        assert_eq!(complete_utf8_prefix(b"abc"), 3);
        let e_acute = "é".as_bytes();
        assert_eq!(complete_utf8_prefix(&[b'a', e_acute[0]]), 1);
    }

    #[test]
    fn test_missing_executable_fails_load() {
        let (io, _rx) = io_with_input("");
        let loader = Box::new(ProcessLoader::new(RuntimeSettings {
            executable: PathBuf::from("/nonexistent/python-clipy"),
            ..settings()
        }));
        let err = loader.load(io).err().unwrap();
        assert!(matches!(err, SandboxError::RuntimeLoad(_)));
    }

    #[test]
    fn test_run_reads_stdin_and_files() {
        if !python_available() {
            eprintln!("Skipping: python3 not available");
            return;
        }
        let (io, rx) = io_with_input("Ada\n");
        let mut interpreter = Box::new(ProcessLoader::new(settings())).load(io).unwrap();
        interpreter
            .filesystem()
            .write_file("/data.txt", "42")
            .unwrap();

        let outcome = interpreter
            .run("name = input()\nprint('hi', name, open('data.txt').read())")
            .unwrap();
        assert!(outcome.success);
        assert_eq!(stream_text(&rx, Stream::Stdout), "hi Ada 42\n");
    }

    #[test]
    fn test_uncaught_exception_reports_failure() {
        if !python_available() {
            eprintln!("Skipping: python3 not available");
            return;
        }
        let (io, rx) = io_with_input("");
        let mut interpreter = Box::new(ProcessLoader::new(settings())).load(io).unwrap();
        let outcome = interpreter.run("x = 1\nraise ValueError('bad')").unwrap();
        assert!(!outcome.success);
        let stderr = stream_text(&rx, Stream::Stderr);
        assert!(stderr.contains("File \"<string>\", line 2"));
        assert!(stderr.contains("ValueError: bad"));
    }
}
