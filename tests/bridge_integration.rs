//! Integration tests for worker sessions
//!
//! Drives the bridge end to end with the scripted interpreter: stdin
//! ordering in both input modes, input arriving while a read is parked,
//! and the mount -> run -> sync cycle over the message boundary.

use clipy::exec::{SharedFlag, WorkerBridge, WorkerEvent};
use clipy::testing::ScriptedLoader;
use clipy::{FileTree, InputMode, SandboxError, SessionState};
use std::time::{Duration, Instant};

fn ready_bridge(mode: InputMode) -> WorkerBridge {
    let mut bridge = WorkerBridge::spawn(Box::new(ScriptedLoader::new())).unwrap();
    bridge.init_with_mode(mode).unwrap();
    let state = bridge.wait_until_settled(Duration::from_secs(5), |_| {}).unwrap();
    assert_eq!(state, SessionState::Ready);
    bridge
}

/// Stdout text up to and including the next `Done`
fn stdout_until_done(bridge: &mut WorkerBridge) -> (String, bool) {
    let mut stdout = String::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match bridge.recv_timeout(Duration::from_millis(50)).unwrap() {
            Some(WorkerEvent::Stdout { text }) => stdout.push_str(&text),
            Some(WorkerEvent::Done { success, .. }) => return (stdout, success),
            _ => {}
        }
    }
    panic!("run did not finish; stdout so far: {:?}", stdout);
}

#[test]
fn test_two_chars_read_in_order_blocking() {
    let mut bridge = ready_bridge(InputMode::Blocking);
    bridge.send("ab").unwrap();
    bridge.run("getc\ngetc").unwrap();
    let (stdout, success) = stdout_until_done(&mut bridge);
    assert!(success);
    assert_eq!(stdout, "char:a\nchar:b\n");
}

#[test]
fn test_two_chars_read_in_order_non_blocking() {
    let mut bridge = ready_bridge(InputMode::NonBlocking);
    bridge.send("xy").unwrap();
    bridge.run("getc\ngetc\ngetc").unwrap();
    let (stdout, _) = stdout_until_done(&mut bridge);
    assert_eq!(stdout, "char:x\nchar:y\nunavailable\n");
}

#[test]
fn test_input_sent_while_read_is_parked() {
    let mut bridge = ready_bridge(InputMode::Blocking);
    bridge.run("prompt name?\ninput\nprint done").unwrap();

    // Wait for the prompt so the read is definitely parked
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        assert!(Instant::now() < deadline, "prompt never arrived");
        if let Some(WorkerEvent::Stdout { text }) = bridge.recv_timeout(Duration::from_millis(50)).unwrap() {
            assert_eq!(text, "name?");
            break;
        }
    }
    assert_eq!(bridge.state(), SessionState::Running);

    bridge.send("ada\n").unwrap();
    let (stdout, success) = stdout_until_done(&mut bridge);
    assert!(success);
    assert_eq!(stdout, "ada\ndone\n");
    assert_eq!(bridge.state(), SessionState::Ready);
}

#[test]
fn test_caller_supplied_flag() {
    let flag = SharedFlag::new();
    let mut bridge = WorkerBridge::spawn(Box::new(ScriptedLoader::new())).unwrap();
    bridge.init(Some(flag.clone())).unwrap();
    bridge.wait_until_settled(Duration::from_secs(5), |_| {}).unwrap();

    bridge.send("q").unwrap();
    bridge.run("getc").unwrap();
    let (stdout, _) = stdout_until_done(&mut bridge);
    assert_eq!(stdout, "char:q\n");
    // Queue drained, flag cleared for the next wait
    assert!(!flag.is_set());
}

#[test]
fn test_terminate_releases_parked_reader() {
    let mut bridge = ready_bridge(InputMode::Blocking);
    bridge.run("input").unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    bridge.terminate();
    assert!(bridge.is_terminated());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(bridge.run("print again").is_err());
}

#[test]
fn test_mount_run_sync_over_bridge() {
    let mut bridge = ready_bridge(InputMode::NonBlocking);
    let files: FileTree = [
        ("/main.py".to_string(), "unused".to_string()),
        ("/data/in.txt".to_string(), "payload".to_string()),
    ]
    .into();
    bridge.mount(files).unwrap();
    bridge.run("cat /data/in.txt\nwrite /data/out.txt written").unwrap();
    let (stdout, success) = stdout_until_done(&mut bridge);
    assert!(success);
    assert_eq!(stdout, "payload\n");

    bridge.request_sync().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let synced = loop {
        assert!(Instant::now() < deadline, "no files reported");
        if let Some(WorkerEvent::Files { files }) = bridge.recv_timeout(Duration::from_millis(50)).unwrap() {
            break files;
        }
    };
    assert_eq!(synced.get("/data/out.txt").map(String::as_str), Some("written"));
    assert_eq!(synced.get("/data/in.txt").map(String::as_str), Some("payload"));
}

#[test]
fn test_crashed_executor_surfaces_as_transport_failure() {
    let mut bridge = ready_bridge(InputMode::NonBlocking);
    bridge.run("print partial\ncrash runtime bug").unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut stdout = String::new();
    let error = loop {
        assert!(Instant::now() < deadline, "crash went unnoticed; state={}", bridge.state());
        match bridge.recv_timeout(Duration::from_millis(50)) {
            Ok(Some(WorkerEvent::Stdout { text })) => stdout.push_str(&text),
            Ok(Some(WorkerEvent::Done { .. })) => panic!("a crashed run must not report Done"),
            Ok(_) => {}
            Err(e) => break e,
        }
    };
    assert!(matches!(error, SandboxError::Transport(_)), "{:?}", error);
    assert!(bridge.transport_failed());
    // Output produced before the crash is still delivered
    assert_eq!(stdout, "partial\n");

    // Later calls keep failing instead of pretending the runtime is busy
    assert!(matches!(bridge.run("print again"), Err(SandboxError::Transport(_))));
}

#[test]
fn test_close_input_ends_parked_read() {
    let mut bridge = ready_bridge(InputMode::Blocking);
    bridge.run("input\ninput").unwrap();
    bridge.send("only line\n").unwrap();
    bridge.close_input().unwrap();
    let (stdout, success) = stdout_until_done(&mut bridge);
    assert_eq!(stdout, "only line\n");
    assert!(!success);
}

#[test]
fn test_worker_events_serialize_as_tagged_json() {
    let event = WorkerEvent::Stdout {
        text: "hi".to_string(),
    };
    assert_eq!(
        serde_json::to_value(&event).unwrap(),
        serde_json::json!({"type": "stdout", "text": "hi"})
    );
}
