/// Line-oriented scripted interpreter
///
/// A deterministic stand-in for a real runtime. Each source line is one
/// command; error tracebacks use the MicroPython shape so they flow through
/// the line mapper like real ones.
///
/// | line              | effect                                              |
/// |-------------------|-----------------------------------------------------|
/// | `print <text>`    | `<text>\n` on stdout                                |
/// | `prompt <text>`   | `<text>` on stdout, no newline                      |
/// | `eprint <text>`   | `<text>\n` on stderr                                |
/// | `input`           | read one line from stdin and echo it to stdout      |
/// | `getc`            | read one char: `char:<c>`, `eof` or `unavailable`   |
/// | `write <p> <txt>` | create file `<p>` containing `<txt>`                |
/// | `cat <p>`         | print the content of `<p>`                          |
/// | `fail <msg>`      | traceback pointing at this line, run unsuccessful   |
/// | `raise <msg>`     | interpreter-level error                             |
/// | `return <value>`  | stop with a return value                            |
/// | `sleep <ms>`      | sleep, honouring cancellation                       |
/// | `spin`            | loop until cancelled                                |
/// | `crash <msg>`     | panic on the executor thread                        |
///
/// Blank lines and `#` comments are ignored.
use crate::config::types::{FileTree, Result, SandboxError};
use crate::exec::input::StdinRead;
use crate::runtime::{
    Interpreter, RunOutcome, RuntimeFactory, RuntimeIo, RuntimeLoader,
};
use crate::vfs::host::{HostFs, MemFs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// File name the scripted runtime reports in tracebacks
pub const SCRIPT_FILENAME: &str = "<stdin>";

#[derive(Debug, Clone, Default)]
pub struct ScriptedLoader {
    load_error: Option<String>,
    seed: FileTree,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loading fails with `message`
    pub fn failing(mut self, message: &str) -> Self {
        self.load_error = Some(message.to_string());
        self
    }

    /// Pre-populate the interpreter filesystem
    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.seed.insert(path.to_string(), content.to_string());
        self
    }
}

impl RuntimeLoader for ScriptedLoader {
    fn load(self: Box<Self>, io: RuntimeIo) -> Result<Box<dyn Interpreter>> {
        if let Some(message) = self.load_error {
            return Err(SandboxError::RuntimeLoad(message));
        }
        let mut fs = MemFs::new();
        for (path, content) in &self.seed {
            fs.insert_file(path, content)
                .map_err(|e| SandboxError::RuntimeLoad(e.to_string()))?;
        }
        Ok(Box::new(ScriptedInterpreter { io, fs }))
    }
}

/// Factory that counts the sessions it created
#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    template: ScriptedLoader,
    loads: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_loader(template: ScriptedLoader) -> Self {
        Self {
            template,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn sessions_created(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl RuntimeFactory for ScriptedFactory {
    fn loader(&self) -> Box<dyn RuntimeLoader> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Box::new(self.template.clone())
    }
}

pub struct ScriptedInterpreter {
    io: RuntimeIo,
    fs: MemFs,
}

enum Step {
    Continue,
    Stop(RunOutcome),
}

impl ScriptedInterpreter {
    fn traceback(&self, line: usize, error: &str) {
        self.io.stderr.write(&format!(
            "Traceback (most recent call last):\n  File \"{}\", line {}, in <module>\n{}\n",
            SCRIPT_FILENAME, line, error
        ));
    }

    fn read_line(&self) -> Option<String> {
        let mut line = String::new();
        loop {
            match self.io.stdin.read_char() {
                StdinRead::Char('\n') => return Some(line),
                StdinRead::Char(c) => line.push(c),
                StdinRead::Exhausted | StdinRead::Unavailable => {
                    return if line.is_empty() { None } else { Some(line) };
                }
            }
        }
    }

    fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.io.cancel.is_cancelled() {
                return Err(SandboxError::RuntimeExecution("run cancelled".to_string()));
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    fn step(&mut self, lineno: usize, line: &str) -> Result<Step> {
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "print" => self.io.stdout.write(&format!("{}\n", rest)),
            "prompt" => self.io.stdout.write(rest),
            "eprint" => self.io.stderr.write(&format!("{}\n", rest)),
            "input" => match self.read_line() {
                Some(text) => self.io.stdout.write(&format!("{}\n", text)),
                None => {
                    self.traceback(lineno, "EOFError: ");
                    return Ok(Step::Stop(RunOutcome::failed()));
                }
            },
            "getc" => {
                let shown = match self.io.stdin.read_char() {
                    StdinRead::Char(c) => format!("char:{}", c),
                    StdinRead::Exhausted => "eof".to_string(),
                    StdinRead::Unavailable => "unavailable".to_string(),
                };
                self.io.stdout.write(&format!("{}\n", shown));
            }
            "write" => {
                let (path, content) = rest.split_once(' ').unwrap_or((rest, ""));
                if let Err(e) = self.fs.insert_file(path, content) {
                    self.traceback(lineno, &format!("OSError: {}", e));
                    return Ok(Step::Stop(RunOutcome::failed()));
                }
            }
            "cat" => match self.fs.read_file(rest) {
                Ok(content) => self.io.stdout.write(&format!("{}\n", content)),
                Err(_) => {
                    self.traceback(lineno, &format!("OSError: [Errno 2] ENOENT: {}", rest));
                    return Ok(Step::Stop(RunOutcome::failed()));
                }
            },
            "fail" => {
                self.traceback(lineno, &format!("Exception: {}", rest));
                return Ok(Step::Stop(RunOutcome::failed()));
            }
            "raise" => return Err(SandboxError::RuntimeExecution(rest.to_string())),
            "return" => {
                return Ok(Step::Stop(RunOutcome {
                    success: true,
                    value: Some(rest.to_string()),
                }))
            }
            "sleep" => {
                let ms = rest.trim().parse::<u64>().unwrap_or(0);
                self.sleep(Duration::from_millis(ms))?;
            }
            "crash" => panic!("{}", rest),
            "spin" => loop {
                self.sleep(Duration::from_millis(20))?;
            },
            other => {
                self.traceback(lineno, &format!("NameError: name '{}' isn't defined", other));
                return Ok(Step::Stop(RunOutcome::failed()));
            }
        }
        Ok(Step::Continue)
    }
}

impl Interpreter for ScriptedInterpreter {
    fn run(&mut self, code: &str) -> Result<RunOutcome> {
        for (index, raw) in code.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Step::Stop(outcome) = self.step(index + 1, line)? {
                return Ok(outcome);
            }
        }
        Ok(RunOutcome::ok())
    }

    fn filesystem(&mut self) -> &mut dyn HostFs {
        &mut self.fs
    }
}
