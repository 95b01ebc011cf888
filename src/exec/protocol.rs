/// Messages exchanged between the host and a worker session
use crate::config::types::FileTree;
use crate::exec::flag::SharedFlag;
use serde::{Deserialize, Serialize};

/// Host -> worker
#[derive(Debug, Clone)]
pub enum HostMessage {
    /// Load the interpreter. A flag selects blocking stdin.
    Init { shared_flag: Option<SharedFlag> },
    Run { code: String },
    Send { text: String },
    /// No more input will be sent; parked and later reads see end of input
    CloseInput,
    /// Mirror a tree into the interpreter filesystem
    Mount { files: FileTree },
    /// Walk the interpreter filesystem and report it as `Files`
    Sync,
    Shutdown,
}

impl HostMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            HostMessage::Init { .. } => "init",
            HostMessage::Run { .. } => "run",
            HostMessage::Send { .. } => "send",
            HostMessage::CloseInput => "close_input",
            HostMessage::Mount { .. } => "mount",
            HostMessage::Sync => "sync",
            HostMessage::Shutdown => "shutdown",
        }
    }
}

/// Worker -> host. Serialized as a JSON object tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerEvent {
    Ready,
    Status { text: String },
    Stdout { text: String },
    Stderr { text: String },
    /// A run finished
    Done {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    Files { files: FileTree },
}

impl WorkerEvent {
    pub fn status(text: impl Into<String>) -> Self {
        WorkerEvent::Status { text: text.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(WorkerEvent::Stdout {
            text: "hi\n".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "stdout", "text": "hi\n"}));

        let ready = serde_json::to_value(WorkerEvent::Ready).unwrap();
        assert_eq!(ready, serde_json::json!({"type": "ready"}));

        let done = serde_json::to_value(WorkerEvent::Done {
            success: true,
            value: None,
        })
        .unwrap();
        assert_eq!(done, serde_json::json!({"type": "done", "success": true}));
    }

    #[test]
    fn test_event_parse() {
        let event: WorkerEvent =
            serde_json::from_str(r#"{"type":"status","text":"worker: init"}"#).unwrap();
        assert_eq!(event, WorkerEvent::status("worker: init"));
    }
}
