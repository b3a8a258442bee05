//! Golden vector compatibility test for the v1 protocol.
//!
//! Ensures the protocol crate types can deserialize the frozen golden
//! vectors in `tests/golden/*.jsonl`.
//!
//! **Rule**: The golden vectors MUST NOT change. If a test fails, fix the
//! types, not the vectors.

use std::fs;
use std::path::PathBuf;

use serde_json::Value;

use scenewire_protocol::{ErrorCode, Request, RequestId, Response, ServerMessage, PROTOCOL_VERSION};

fn golden_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/golden")
}

/// Load all non-empty lines from a golden vector file.
fn load_golden_lines(filename: &str) -> Vec<String> {
    let path = golden_dir().join(filename);
    let contents = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(String::from)
        .collect()
}

/// Re-serializing a parsed envelope must produce the same JSON value.
fn assert_reserializes(line: &str) {
    let resp: Response = serde_json::from_str(line).expect("envelope");
    let original: Value = serde_json::from_str(line).unwrap();
    let again = serde_json::to_value(&resp).unwrap();
    assert_eq!(original, again, "re-serialized envelope drifted: {}", line);
}

#[test]
fn test_handshake() {
    let lines = load_golden_lines("handshake.jsonl");
    assert_eq!(lines.len(), 3);

    match ServerMessage::parse(&lines[0]).expect("welcome") {
        ServerMessage::Welcome(w) => {
            assert_eq!(w.protocol_version, PROTOCOL_VERSION);
            assert_eq!(w.host_version.string, "0.1.0");
            assert_eq!(w.app_name, "SceneWire Host");
        }
        other => panic!("Expected Welcome, got {:?}", other),
    }

    let req: Request = serde_json::from_str(&lines[1]).expect("ping request");
    assert_eq!(req.command, "ping");
    assert_eq!(req.id, Some(RequestId::from(1)));

    match ServerMessage::parse(&lines[2]).expect("pong") {
        ServerMessage::Response(resp) => {
            assert_eq!(resp.kind, "pong");
            assert_eq!(resp.id, Some(RequestId::from(1)));
            assert!(resp.fields["timestamp"].is_string());
        }
        other => panic!("Expected pong, got {:?}", other),
    }
}

#[test]
fn test_live_commands() {
    let lines = load_golden_lines("live_commands.jsonl");
    assert_eq!(lines.len(), 7);

    let get_node: Request = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(get_node.params["path"], "Player");
    assert_eq!(get_node.id, Some(RequestId::from("n1")));

    let node: Response = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(node.kind, "node");
    assert_eq!(node.fields["properties"]["position"]["type"], "Vector2");

    let set: Request = serde_json::from_str(&lines[2]).unwrap();
    assert_eq!(set.params["value"]["type"], "Color");

    match ServerMessage::parse(&lines[6]).unwrap() {
        ServerMessage::Event(event) => {
            assert_eq!(event.address, "Timer");
            assert_eq!(event.channel, "timeout");
            assert!(event.args.is_empty());
        }
        other => panic!("Expected event, got {:?}", other),
    }

    for i in [1, 3, 5, 6] {
        assert_reserializes(&lines[i]);
    }
}

#[test]
fn test_scene_commands() {
    let lines = load_golden_lines("scene_commands.jsonl");
    assert_eq!(lines.len(), 4);

    let add: Request = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(add.command, "add_node");
    assert_eq!(add.params["nodeType"], "Sprite2D");

    let ok: Response = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(ok.kind, "add_node_result");
    assert_eq!(ok.fields["ok"], true);

    match ServerMessage::parse(&lines[3]).unwrap() {
        ServerMessage::Error { id, error } => {
            assert_eq!(id, Some(RequestId::from(11)));
            assert_eq!(error.error_code(), Some(ErrorCode::CannotDeleteRoot));
            assert_eq!(error.ok, Some(false));
            assert_eq!(error.error.as_deref(), Some(error.message.as_str()));
        }
        other => panic!("Expected error, got {:?}", other),
    }

    assert_reserializes(&lines[1]);
    assert_reserializes(&lines[3]);
}

#[test]
fn test_errors() {
    let lines = load_golden_lines("errors.jsonl");
    let codes: Vec<ErrorCode> = lines
        .iter()
        .map(|line| match ServerMessage::parse(line).unwrap() {
            ServerMessage::Error { error, .. } => error.error_code().expect("known code"),
            other => panic!("Expected error, got {:?}", other),
        })
        .collect();
    assert_eq!(
        codes,
        vec![ErrorCode::ProtocolError, ErrorCode::UnknownCommand, ErrorCode::ValidationError]
    );

    // Protocol errors are not correlated.
    let first = ServerMessage::parse(&lines[0]).unwrap();
    assert!(first.id().is_none());
}
