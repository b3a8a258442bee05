//! Session server over real TCP.
//!
//! Each test starts a host on a free port with discovery disabled and a
//! scratch project containing `main.tscn`:
//!
//! ```text
//! Main (Node2D)
//! ├── Player (Node2D)
//! ├── Sprite (Sprite2D)
//! └── Timer (Timer, autostart, 0.05 s)
//! ```

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use scenewire_config::Settings;
use scenewire_engine::TypeRegistry;
use scenewire_host::{SessionServer, SessionServerConfig};
use scenewire_io::{Project, SceneEditor};
use serde_json::{json, Value as Json};
use tempfile::TempDir;

fn project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let mut editor = SceneEditor::new(Project::new(dir.path()), Arc::new(TypeRegistry::builtin()));
    editor.create_scene("main.tscn", "Node2D", Some("Main")).unwrap();
    editor.add_node("main.tscn", ".", "Node2D", "Player", None, true).unwrap();
    editor.add_node("main.tscn", ".", "Sprite2D", "Sprite", None, true).unwrap();
    let timer = json!({"wait_time": 0.05, "autostart": true});
    editor
        .add_node("main.tscn", ".", "Timer", "Timer", timer.as_object(), true)
        .unwrap();
    dir
}

fn start(project: &TempDir) -> SessionServer {
    let mut settings = Settings::default();
    settings.server.port = 0;
    settings.server.discovery = false;
    settings.server.max_connections = 4;
    settings.host.project_root = project.path().to_path_buf();
    settings.host.main_scene = Some("main.tscn".into());
    settings.host.frame_rate = 120;
    let mut server = SessionServer::new();
    server
        .start(SessionServerConfig {
            settings,
            ..Default::default()
        })
        .unwrap();
    server
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    /// Events read while waiting for a response.
    events: Vec<Json>,
}

impl Client {
    /// Connect and consume the welcome line.
    fn connect(server: &SessionServer) -> (Client, Json) {
        let stream = TcpStream::connect(server.bound_addr().unwrap()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut client = Client {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
            events: Vec::new(),
        };
        let welcome = client.read().expect("welcome");
        (client, welcome)
    }

    fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).unwrap();
        self.writer.write_all(b"\n").unwrap();
        self.writer.flush().unwrap();
    }

    /// Next line, or `None` on EOF.
    fn read(&mut self) -> Option<Json> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(serde_json::from_str(line.trim_end()).unwrap()),
            Err(e) => panic!("read failed: {}", e),
        }
    }

    /// Next non-event line.
    fn response(&mut self) -> Json {
        loop {
            let msg = self.read().expect("connection closed");
            if msg["type"] == "event" {
                self.events.push(msg);
            } else {
                return msg;
            }
        }
    }

    fn request(&mut self, request: Json) -> Json {
        self.send_line(&request.to_string());
        self.response()
    }

    fn command(&mut self, command: &str, params: Json) -> Json {
        self.request(json!({"command": command, "params": params}))
    }

    /// Read until an event for `address`/`channel` arrives.
    fn wait_event(&mut self, address: &str, channel: &str) -> Json {
        if let Some(pos) = self
            .events
            .iter()
            .position(|e| e["address"] == address && e["channel"] == channel)
        {
            return self.events.remove(pos);
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let msg = self.read().expect("connection closed");
            if msg["type"] == "event" && msg["address"] == address && msg["channel"] == channel {
                return msg;
            }
        }
        panic!("no {} event from {}", channel, address);
    }

    fn count_events(&self, address: &str, channel: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e["address"] == address && e["channel"] == channel)
            .count()
    }
}

#[test]
fn test_welcome_and_ping() {
    let dir = project();
    let server = start(&dir);
    let (mut client, welcome) = Client::connect(&server);

    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["protocolVersion"], "1.0");
    assert_eq!(welcome["appName"], "SceneWire Host");
    assert!(welcome["hostVersion"]["string"].is_string());

    let pong = client.request(json!({"command": "ping", "id": 1}));
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["id"], 1);
    let ts = pong["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());

    let pong = client.request(json!({"command": "ping", "id": "abc"}));
    assert_eq!(pong["id"], "abc");

    let pong = client.request(json!({"command": "ping"}));
    assert!(pong.get("id").is_none());
}

#[test]
fn test_get_tree_and_node() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    let tree = client.command("get_tree", json!({}));
    assert_eq!(tree["type"], "tree");
    assert_eq!(tree["tree"]["name"], "Main");
    assert_eq!(tree["tree"]["path"], ".");
    let names: Vec<&str> = tree["tree"]["children"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Player", "Sprite", "Timer"]);

    let shallow = client.command("get_tree", json!({"depth": 0}));
    assert_eq!(shallow["tree"]["childCount"], 3);
    assert_eq!(shallow["tree"]["children"], json!([]));

    let node = client.command("get_node", json!({"path": "Player"}));
    assert_eq!(node["type"], "node");
    assert_eq!(node["nodeType"], "Node2D");
    assert_eq!(node["path"], "Player");
    assert!(node["signals"].as_array().unwrap().contains(&json!("ready")));

    let missing = client.command("get_node", json!({"path": "Nobody"}));
    assert_eq!(missing["type"], "error");
    assert_eq!(missing["code"], "node_not_found");
}

#[test]
fn test_set_property_and_call_method() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    let set = client.command(
        "set_property",
        json!({"path": "Player", "property": "position", "value": {"type": "Vector2", "x": 3.0, "y": 4.0}}),
    );
    assert_eq!(set["type"], "property_set");
    assert_eq!(set["path"], "Player");
    assert_eq!(set["value"]["x"], 3.0);

    let node = client.command("get_node", json!({"path": "Player"}));
    assert_eq!(node["properties"]["position"]["y"], 4.0);

    let unresolved = client.command(
        "set_property",
        json!({"path": "Sprite", "property": "texture",
               "value": {"type": "Resource", "path": "res://missing.png", "class": "Texture2D"}}),
    );
    assert_eq!(unresolved["code"], "value_resolution_error");

    let mismatch = client.command(
        "set_property",
        json!({"path": "Player", "property": "position", "value": "left"}),
    );
    assert_eq!(mismatch["code"], "validation_error");

    let result = client.command("call_method", json!({"path": "Player", "method": "get_class"}));
    assert_eq!(result["type"], "method_result");
    assert_eq!(result["result"], "Node2D");

    let unknown = client.command("call_method", json!({"path": "Player", "method": "fly"}));
    assert_eq!(unknown["code"], "unknown_method");
}

#[test]
fn test_watch_unwatch_lifecycle() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    let watched = client.command("watch_signal", json!({"path": "Timer", "signal": "timeout"}));
    assert_eq!(watched["type"], "signal_watched");
    assert_eq!(watched["path"], "Timer");

    let again = client.command("watch_signal", json!({"path": "Timer", "signal": "timeout"}));
    assert_eq!(again["code"], "already_subscribed");

    let event = client.wait_event("Timer", "timeout");
    assert_eq!(event["args"], json!([]));

    let unknown = client.command("watch_signal", json!({"path": "Timer", "signal": "exploded"}));
    assert_eq!(unknown["code"], "unknown_channel");

    let unwatched = client.command("unwatch_signal", json!({"path": "Timer", "signal": "timeout"}));
    assert_eq!(unwatched["type"], "signal_unwatched");
    let twice = client.command("unwatch_signal", json!({"path": "Timer", "signal": "timeout"}));
    assert_eq!(twice["code"], "not_subscribed");

    let rewatched = client.command("watch_signal", json!({"path": "Timer", "signal": "timeout"}));
    assert_eq!(rewatched["type"], "signal_watched");
}

#[test]
fn test_unwatch_after_live_rename() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    client.command("watch_signal", json!({"path": "Player", "signal": "renamed"}));
    let call = client.command(
        "call_method",
        json!({"path": "Player", "method": "set_name", "args": ["Hero"]}),
    );
    assert_eq!(call["type"], "method_result");
    client.wait_event("Hero", "renamed");

    let again = client.command("watch_signal", json!({"path": "Hero", "signal": "renamed"}));
    assert_eq!(again["code"], "already_subscribed");

    let unwatched = client.command("unwatch_signal", json!({"path": "Hero", "signal": "renamed"}));
    assert_eq!(unwatched["type"], "signal_unwatched");
    assert_eq!(unwatched["path"], "Hero");
    let twice = client.command("unwatch_signal", json!({"path": "Hero", "signal": "renamed"}));
    assert_eq!(twice["code"], "not_subscribed");
}

#[test]
fn test_one_emission_reaches_every_connection_once() {
    let dir = project();
    let server = start(&dir);
    let (mut a, _) = Client::connect(&server);
    let (mut b, _) = Client::connect(&server);

    // Both watch; the event is still written once per connection.
    a.command("watch_signal", json!({"path": "Player", "signal": "renamed"}));
    b.command("watch_signal", json!({"path": "Player", "signal": "renamed"}));

    let call = a.command(
        "call_method",
        json!({"path": "Player", "method": "emit_signal", "args": ["renamed"]}),
    );
    assert_eq!(call["type"], "method_result");

    a.wait_event("Player", "renamed");
    b.wait_event("Player", "renamed");
    // A later round trip flushes anything else already queued.
    a.command("ping", json!({}));
    b.command("ping", json!({}));
    assert_eq!(a.count_events("Player", "renamed"), 0);
    assert_eq!(b.count_events("Player", "renamed"), 0);
}

#[test]
fn test_unwatched_signal_is_not_pushed() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    client.command(
        "call_method",
        json!({"path": "Player", "method": "emit_signal", "args": ["renamed"]}),
    );
    client.command("ping", json!({}));
    client.command("ping", json!({}));
    assert_eq!(client.count_events("Player", "renamed"), 0);
}

#[test]
fn test_scene_commands() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    let created = client.command(
        "create_scene",
        json!({"scenePath": "res://scenes/a.tscn", "rootType": "Node2D"}),
    );
    assert_eq!(created["type"], "create_scene_result");
    assert_eq!(created["ok"], true);
    assert!(dir.path().join("scenes/a.tscn").exists());

    let added = client.request(json!({
        "command": "add_node",
        "params": {"scenePath": "res://scenes/a.tscn", "parentPath": ".", "nodeType": "Sprite2D", "nodeName": "X"},
        "id": 10
    }));
    assert_eq!(added["type"], "add_node_result");
    assert_eq!(added["ok"], true);
    assert_eq!(added["scenePath"], "res://scenes/a.tscn");
    assert_eq!(added["nodePath"], "X");
    assert_eq!(added["id"], 10);

    let props = client.command(
        "get_node_properties",
        json!({"scenePath": "scenes/a.tscn", "nodePath": "X"}),
    );
    assert_eq!(props["properties"], json!({}));
    assert_eq!(props["nodeType"], "Sprite2D");

    let listed = client.command("list_scene_nodes", json!({"scenePath": "res://scenes/a.tscn"}));
    let paths: Vec<&str> = listed["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec![".", "X"]);

    let root = client.request(json!({
        "command": "delete_node",
        "params": {"scenePath": "res://scenes/a.tscn", "nodePath": "."},
        "id": 11
    }));
    assert_eq!(root["type"], "error");
    assert_eq!(root["code"], "cannot_delete_root");
    assert_eq!(root["ok"], false);
    assert_eq!(root["error"], "Cannot delete the scene root");
    assert_eq!(root["id"], 11);

    let missing = client.command("list_scene_nodes", json!({"scenePath": "res://nope.tscn"}));
    assert_eq!(missing["code"], "not_found");
    assert_eq!(missing["ok"], false);
}

#[test]
fn test_editing_open_scene_reloads_live_tree() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    client.command("watch_signal", json!({"path": "Timer", "signal": "timeout"}));
    let edited = client.command(
        "set_node_properties",
        json!({"scenePath": "res://main.tscn", "nodePath": "Player",
               "properties": {"position": {"type": "Vector2", "x": 7.0, "y": 8.0}}}),
    );
    assert_eq!(edited["ok"], true);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let node = client.command("get_node", json!({"path": "Player"}));
        if node["properties"]["position"]["x"] == 7.0 {
            break;
        }
        assert!(Instant::now() < deadline, "live tree was not reloaded");
        std::thread::sleep(Duration::from_millis(10));
    }

    // The subscription follows the reloaded node.
    client.events.clear();
    client.wait_event("Timer", "timeout");
}

#[test]
fn test_error_envelopes() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    let unknown = client.request(json!({"command": "fly", "id": 4}));
    assert_eq!(unknown["code"], "unknown_command");
    assert_eq!(unknown["message"], "Unknown command: fly");
    assert_eq!(unknown["id"], 4);

    let missing = client.request(json!({"command": "get_node", "id": 5}));
    assert_eq!(missing["code"], "validation_error");
    assert_eq!(missing["message"], "Missing required parameter: path");

    client.send_line("not json");
    let malformed = client.response();
    assert_eq!(malformed["code"], "protocol_error");
    assert!(malformed.get("id").is_none());

    // A good line resets the failure counter.
    let pong = client.command("ping", json!({}));
    assert_eq!(pong["type"], "pong");
}

#[test]
fn test_repeated_malformed_lines_close_connection() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    for _ in 0..3 {
        client.send_line("{oops");
    }
    for _ in 0..3 {
        assert_eq!(client.response()["code"], "protocol_error");
    }
    assert!(client.read().is_none());
}

#[test]
fn test_close_command() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    let closing = client.request(json!({"command": "close", "id": 9}));
    assert_eq!(closing["type"], "closing");
    assert_eq!(closing["id"], 9);
    assert!(client.read().is_none());
}

#[test]
fn test_capture_raw() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    let shot = client.command("capture_screenshot", json!({"width": 32, "height": 16, "format": "raw"}));
    assert_eq!(shot["type"], "screenshot");
    assert_eq!(shot["format"], "raw");
    let bytes = STANDARD.decode(shot["data"].as_str().unwrap()).unwrap();
    assert_eq!(bytes.len(), 32 * 16 * 4);

    let png = client.command("capture_viewport", json!({"width": 8, "height": 8}));
    let bytes = STANDARD.decode(png["data"].as_str().unwrap()).unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");

    let too_big = client.command("capture_screenshot", json!({"width": 100000}));
    assert_eq!(too_big["code"], "validation_error");
}

#[test]
fn test_inject_action_and_introspection() {
    let dir = project();
    let server = start(&dir);
    let (mut client, _) = Client::connect(&server);

    let ack = client.command("inject_action", json!({"action": "jump"}));
    assert_eq!(ack["type"], "input_ack");
    assert_eq!(ack["queued"], true);
    assert_eq!(ack["event"]["type"], "action");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let info = client.command("get_scene_info", json!({}));
        if info["input"]["actions"]["jump"] == 1.0 {
            assert_eq!(info["scenePath"], "res://main.tscn");
            break;
        }
        assert!(Instant::now() < deadline, "action never applied");
        std::thread::sleep(Duration::from_millis(10));
    }

    let metrics = client.command("get_metrics", json!({"metrics": ["commandsProcessed", "nodeCount"]}));
    assert_eq!(metrics["metrics"]["nodeCount"], 4);
    assert!(metrics["metrics"]["commandsProcessed"].as_u64().unwrap() >= 2);
    let unknown = client.command("get_metrics", json!({"metrics": ["bogus"]}));
    assert_eq!(unknown["message"], "Unknown metric: bogus");

    let button = client.command("get_type_info", json!({"typeName": "Button"}));
    let signals: Vec<&str> = button["signals"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert!(signals.contains(&"pressed"));
    let nope = client.command("get_type_info", json!({"typeName": "Spaceship"}));
    assert_eq!(nope["code"], "unknown_type");
}

#[test]
fn test_stop_closes_connections() {
    let dir = project();
    let mut server = start(&dir);
    let (mut client, _) = Client::connect(&server);
    assert!(server.is_running());
    server.stop();
    assert!(!server.is_running());
    assert!(client.read().is_none());
}
