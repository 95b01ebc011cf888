use crate::config::loader::SandboxConfig;
use crate::config::types::{FileTree, InputMode, SessionState};
use crate::config::validator::validate_config;
use crate::exec::bridge::WorkerBridge;
use crate::exec::protocol::WorkerEvent;
use crate::judge::case::TestCase;
use crate::judge::runner::{RunnerOptions, SandboxedRunner};
use crate::runtime::process::ProcessRuntimeFactory;
use crate::runtime::RuntimeFactory;
use crate::traceback::{source_context, TracebackMapper};
use crate::vfs::VirtualFs;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ./clipy.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file in the workspace
    Write {
        /// Workspace path
        path: String,
        /// Inline content
        #[arg(long, conflicts_with = "from")]
        content: Option<String>,
        /// Read content from a host file
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Print a workspace file
    Read { path: String },
    /// List workspace files
    Ls {
        /// List derived directories instead of files
        #[arg(long)]
        dirs: bool,
    },
    /// Delete a workspace file
    Rm { path: String },
    /// Replace the whole workspace from a JSON object of path -> content
    Restore { file: PathBuf },
    /// Run the main file
    Run {
        /// Text queued on stdin before the run starts
        #[arg(long)]
        stdin: Option<String>,
        /// Report "no input" instead of waiting for stdin
        #[arg(long)]
        non_blocking: bool,
        /// Do not copy interpreter files back into the workspace
        #[arg(long)]
        no_sync: bool,
    },
    /// Grade a JSON test suite against the workspace
    Test {
        suite: PathBuf,
        /// Print full results as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn command_name(&self) -> &'static str {
        match self {
            Commands::Write { .. } => "write",
            Commands::Read { .. } => "read",
            Commands::Ls { .. } => "ls",
            Commands::Rm { .. } => "rm",
            Commands::Restore { .. } => "restore",
            Commands::Run { .. } => "run",
            Commands::Test { .. } => "test",
        }
    }
}

/// Suite file: a bare array or `{"tests": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum SuiteFile {
    List(Vec<TestCase>),
    Wrapped { tests: Vec<TestCase> },
}

impl SuiteFile {
    fn into_tests(self) -> Vec<TestCase> {
        match self {
            SuiteFile::List(tests) | SuiteFile::Wrapped { tests } => tests,
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    let config = match path {
        Some(path) => SandboxConfig::load_from_file(path)?,
        None => SandboxConfig::load_default()?,
    };
    validate_config(&config)?;
    Ok(config)
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    if let Err(e) = crate::observability::audit::init_security_logger(config.audit_log.clone()) {
        eprintln!("Failed to initialize audit log: {}", e);
        std::process::exit(1);
    }

    log::debug!("cli: {}", cli.command.command_name());
    let mut vfs = VirtualFs::from_config(&config)?;

    match cli.command {
        Commands::Write {
            path,
            content,
            from,
        } => {
            let content = match (content, from) {
                (Some(content), _) => content,
                (None, Some(from)) => std::fs::read_to_string(&from)
                    .with_context(|| format!("reading {}", from.display()))?,
                (None, None) => {
                    let mut buf = String::new();
                    std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)?;
                    buf
                }
            };
            let key = vfs.write(&path, &content)?;
            eprintln!("wrote {} ({} bytes)", key, content.len());
            Ok(())
        }
        Commands::Read { path } => match vfs.read(&path) {
            Some(content) => {
                print!("{}", content);
                Ok(())
            }
            None => bail!("{}: no such file", path),
        },
        Commands::Ls { dirs } => {
            let entries = if dirs { vfs.directories() } else { vfs.list() };
            for entry in entries {
                println!("{}", entry);
            }
            Ok(())
        }
        Commands::Rm { path } => {
            if vfs.delete(&path)? {
                eprintln!("removed {}", path);
            } else if vfs.read(&path).is_some() {
                eprintln!("{} is protected", path);
            } else {
                eprintln!("{}: no such file", path);
            }
            Ok(())
        }
        Commands::Restore { file } => {
            let blob = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let tree: FileTree = serde_json::from_str(&blob)
                .with_context(|| format!("{} is not a JSON object of path -> content", file.display()))?;
            let count = tree.len();
            vfs.replace_all(tree)?;
            eprintln!("restored {} files", count);
            Ok(())
        }
        Commands::Run {
            stdin,
            non_blocking,
            no_sync,
        } => {
            let mode = if non_blocking {
                InputMode::NonBlocking
            } else {
                config.input_mode
            };
            let factory = ProcessRuntimeFactory::new(config.runtime.clone());
            let success = run_main(&config, &factory, &mut vfs, mode, stdin, !no_sync)?;
            if !success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Test { suite, json } => {
            let blob = std::fs::read_to_string(&suite)
                .with_context(|| format!("reading {}", suite.display()))?;
            let tests = serde_json::from_str::<SuiteFile>(&blob)
                .with_context(|| format!("parsing suite {}", suite.display()))?
                .into_tests();

            let factory = ProcessRuntimeFactory::new(config.runtime.clone());
            let runner = SandboxedRunner::new(Box::new(factory))
                .with_options(RunnerOptions::from(&config))
                .with_snapshot(vfs.snapshot());
            let (results, summary) = runner.run_tests(&tests, &vfs);

            if json {
                let json_result = serde_json::json!({
                    "results": results,
                    "summary": summary,
                });
                println!("{}", serde_json::to_string_pretty(&json_result)?);
            } else {
                for result in &results {
                    let mark = if result.passed { "PASS" } else { "FAIL" };
                    match (&result.reason, &result.error) {
                        (Some(reason), Some(error)) => {
                            println!("{} {} ({:?}: {})", mark, result.id, reason, error)
                        }
                        (Some(reason), None) => println!("{} {} ({:?})", mark, result.id, reason),
                        _ => println!("{} {}", mark, result.id),
                    }
                }
                println!("{}/{} passed", summary.passed, summary.total);
            }
            if summary.failed > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Run the workspace main file in one session, streaming stdout, then
/// optionally copy the interpreter's files back into the workspace.
fn run_main(
    config: &SandboxConfig,
    factory: &dyn RuntimeFactory,
    vfs: &mut VirtualFs,
    mode: InputMode,
    stdin: Option<String>,
    sync_back: bool,
) -> Result<bool> {
    let code = vfs.read(vfs.main_file()).unwrap_or_default().to_string();
    let mut bridge = WorkerBridge::spawn(factory.loader())?;
    bridge.init_with_mode(mode)?;

    let state = bridge.wait_until_settled(Duration::from_millis(config.init_timeout_ms), |event| {
        if let WorkerEvent::Status { text } = event {
            log::info!("{}", text);
        }
    })?;
    if state != SessionState::Ready {
        bail!("runtime did not start ({})", state);
    }

    bridge.mount(vfs.snapshot())?;
    let mut terminal_input = match stdin {
        Some(text) => {
            bridge.send(&text)?;
            None
        }
        None if mode == InputMode::Blocking => Some(forward_terminal_stdin()),
        None => None,
    };
    bridge.run(&code)?;

    let mut stderr = String::new();
    let deadline = Instant::now() + Duration::from_millis(config.test_timeout_ms);
    let success = loop {
        if Instant::now() >= deadline {
            bridge.terminate();
            bail!("run exceeded {}ms", config.test_timeout_ms);
        }
        if let Some(lines) = &terminal_input {
            if forward_lines(&mut bridge, lines)? {
                terminal_input = None;
            }
        }
        match bridge.recv_timeout(Duration::from_millis(20))? {
            Some(WorkerEvent::Stdout { text }) => {
                print!("{}", text);
                std::io::stdout().flush()?;
            }
            Some(WorkerEvent::Stderr { text }) => stderr.push_str(&text),
            Some(WorkerEvent::Done { success, value }) => {
                if let Some(value) = value {
                    println!("{}", value);
                }
                break success;
            }
            Some(WorkerEvent::Status { text }) => log::debug!("{}", text),
            Some(_) | None => {}
        }
    };

    if !stderr.is_empty() {
        let mapped = TracebackMapper::new(0)
            .with_display_name(vfs.main_file())
            .map(&stderr);
        eprint!("{}", mapped);
        if let Some(context) = source_context(&mapped, &code) {
            eprintln!("{}", context);
        }
    }

    if sync_back {
        let files = request_files(&mut bridge, Duration::from_millis(config.init_timeout_ms))?;
        let report = vfs.apply_synced(files)?;
        log::info!(
            "cli: synced {} files ({} skipped)",
            report.collected.len(),
            report.skipped.len()
        );
    }
    bridge.terminate();
    Ok(success)
}

fn request_files(bridge: &mut WorkerBridge, timeout: Duration) -> Result<FileTree> {
    bridge.request_sync()?;
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(WorkerEvent::Files { files }) = bridge.recv_timeout(Duration::from_millis(20))? {
            return Ok(files);
        }
    }
    Err(anyhow!("worker did not report its files within {}ms", timeout.as_millis()))
}

/// Send pending terminal lines. Returns true once the terminal reached
/// end of input, which is passed on to the program.
fn forward_lines(
    bridge: &mut WorkerBridge,
    lines: &crossbeam_channel::Receiver<String>,
) -> Result<bool> {
    loop {
        match lines.try_recv() {
            Ok(line) => bridge.send(&line)?,
            Err(crossbeam_channel::TryRecvError::Empty) => return Ok(false),
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                bridge.close_input()?;
                return Ok(true);
            }
        }
    }
}

/// Lines typed on the terminal, delivered as they arrive. The channel
/// disconnects at end of input.
fn forward_terminal_stdin() -> crossbeam_channel::Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(format!("{}\n", line)).is_err() {
                break;
            }
        }
    });
    rx
}
