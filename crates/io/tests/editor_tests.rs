//! End-to-end tests for the scene editor against a scratch project.

use std::fs;
use std::sync::Arc;

use serde_json::{json, Map, Value as Json};
use tempfile::TempDir;

use scenewire_engine::error::{DecodeError, EngineError};
use scenewire_engine::value::{Value, Vector2};
use scenewire_engine::TypeRegistry;
use scenewire_io::{ChangeQueue, EditError, Project, SceneEditor};

fn setup() -> (TempDir, SceneEditor) {
    let dir = tempfile::tempdir().unwrap();
    let editor = SceneEditor::new(Project::new(dir.path()), Arc::new(TypeRegistry::builtin()));
    (dir, editor)
}

fn props(value: Json) -> Map<String, Json> {
    match value {
        Json::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[test]
fn test_create_add_reload() {
    let (dir, mut editor) = setup();
    editor.create_scene("res://main.tscn", "Node2D", Some("Main")).unwrap();
    let outcome = editor
        .add_node("res://main.tscn", ".", "Node2D", "X", None, true)
        .unwrap();
    assert!(outcome.saved);
    assert_eq!(outcome.node.as_deref(), Some("X"));

    let fresh = SceneEditor::new(Project::new(dir.path()), Arc::new(TypeRegistry::builtin()));
    let nodes = fresh.list_scene_nodes("main.tscn", None, None).unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].path, ".");
    assert_eq!(nodes[0].child_count, 1);
    assert_eq!(nodes[1].name, "X");

    let got = fresh.get_node_properties("main.tscn", "X", false).unwrap();
    assert!(got.properties.is_empty());
}

#[test]
fn test_include_defaults_false_reports_only_changes() {
    let (_dir, mut editor) = setup();
    editor.create_scene("main.tscn", "Node2D", None).unwrap();
    editor.add_node("main.tscn", ".", "Node2D", "X", None, true).unwrap();
    editor
        .set_node_properties("main.tscn", "X", &props(json!({"rotation": 5})), true)
        .unwrap();

    let got = editor.get_node_properties("main.tscn", "X", false).unwrap();
    assert_eq!(got.properties.len(), 1);
    assert_eq!(got.properties["rotation"], Value::Float(5.0));

    let all = editor.get_node_properties("main.tscn", "X", true).unwrap();
    assert!(all.properties.contains_key("position"));
}

#[test]
fn test_create_scene_twice_fails() {
    let (_dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node", None).unwrap();
    assert!(matches!(
        editor.create_scene("res://a.tscn", "Node", None),
        Err(EditError::AlreadyExists(_))
    ));
    assert!(matches!(
        editor.create_scene("b.tscn", "Spaceship", None),
        Err(EditError::Engine(EngineError::UnknownType(_)))
    ));
}

#[test]
fn test_root_cannot_be_deleted_or_reparented() {
    let (_dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node", None).unwrap();
    editor.add_node("a.tscn", ".", "Node", "Child", None, true).unwrap();
    assert!(matches!(
        editor.delete_node("a.tscn", ".", true),
        Err(EditError::Engine(EngineError::CannotDeleteRoot))
    ));
    assert!(matches!(
        editor.reparent_node("a.tscn", ".", "Child", true),
        Err(EditError::Engine(EngineError::CannotReparentRoot))
    ));
}

#[test]
fn test_failed_set_leaves_file_identical() {
    let (dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node2D", None).unwrap();
    editor.add_node("a.tscn", ".", "Sprite2D", "S", None, true).unwrap();
    let path = dir.path().join("a.tscn");
    let before = fs::read(&path).unwrap();

    // One good value, one bad kind.
    let err = editor
        .set_node_properties(
            "a.tscn",
            "S",
            &props(json!({"rotation": 1.0, "position": "nowhere"})),
            true,
        )
        .unwrap_err();
    assert!(matches!(err, EditError::Engine(EngineError::TypeMismatch { .. })));
    assert_eq!(fs::read(&path).unwrap(), before);

    // Undecodable value.
    let err = editor
        .set_node_properties("a.tscn", "S", &props(json!({"position": {"type": "Bogus"}})), true)
        .unwrap_err();
    assert!(matches!(err, EditError::Property { .. }));
    assert_eq!(fs::read(&path).unwrap(), before);

    // Unknown property.
    let err = editor
        .set_node_properties("a.tscn", "S", &props(json!({"speed": 3})), true)
        .unwrap_err();
    assert!(matches!(err, EditError::Engine(EngineError::UnknownProperty { .. })));
    assert_eq!(fs::read(&path).unwrap(), before);
}

const SHIP_SCENE: &str = "[gd_scene format=3]

[node name=\"Root\" type=\"Node2D\"]

[node name=\"Ship\" type=\"Spaceship\" parent=\".\"]
thrust = 2.5
";

#[test]
fn test_placeholder_edit_round_trip() {
    let (dir, mut editor) = setup();
    let path = dir.path().join("p.tscn");
    fs::write(&path, SHIP_SCENE).unwrap();

    let outcome = editor
        .set_node_properties("p.tscn", "Ship", &props(json!({"shield": 3, "metadata/tag": "x"})), true)
        .unwrap();
    assert!(outcome.saved);
    let before = fs::read(&path).unwrap();

    // Keys the scene text cannot hold are refused, file untouched.
    for key in ["bad key", "a=b", "two\nlines", "[x", ""] {
        let mut values = Map::new();
        values.insert(key.to_string(), json!(1));
        let err = editor.set_node_properties("p.tscn", "Ship", &values, true).unwrap_err();
        assert!(
            matches!(err, EditError::Engine(EngineError::InvalidPropertyName(ref k)) if k == key),
            "{:?}",
            err
        );
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    let fresh = SceneEditor::new(Project::new(dir.path()), Arc::new(TypeRegistry::builtin()));
    let nodes = fresh.list_scene_nodes("p.tscn", None, None).unwrap();
    let ship = nodes.iter().find(|n| n.name == "Ship").unwrap();
    assert!(ship.placeholder);
    assert_eq!(ship.type_name, "Spaceship");

    let stored = fresh.get_node_properties("p.tscn", "Ship", true).unwrap().properties;
    assert_eq!(stored.get("thrust"), Some(&Value::Float(2.5)));
    assert_eq!(stored.get("shield"), Some(&Value::Int(3)));
    assert_eq!(stored.get("metadata/tag"), Some(&Value::String("x".into())));
}

#[test]
fn test_same_name_siblings_keep_structure() {
    let (dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node2D", None).unwrap();
    editor.add_node("a.tscn", ".", "Node2D", "A", None, true).unwrap();
    editor.add_node("a.tscn", "A", "Node", "Kid", None, true).unwrap();
    editor.duplicate_node("a.tscn", "A", "A", None, true).unwrap();

    let fresh = SceneEditor::new(Project::new(dir.path()), Arc::new(TypeRegistry::builtin()));
    let nodes = fresh.list_scene_nodes("a.tscn", None, None).unwrap();
    let a_children: Vec<usize> = nodes.iter().filter(|n| n.name == "A").map(|n| n.child_count).collect();
    assert_eq!(a_children, vec![1, 1]);
    let kids: Vec<usize> = nodes.iter().filter(|n| n.name == "Kid").map(|n| n.depth).collect();
    assert_eq!(kids, vec![2, 2]);

    // Saving again does not drift.
    let path = dir.path().join("a.tscn");
    let first = fs::read_to_string(&path).unwrap();
    let mut again = SceneEditor::new(Project::new(dir.path()), Arc::new(TypeRegistry::builtin()));
    again.save_scene("a.tscn", None).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), first);
}

#[test]
fn test_missing_parent_reports_section_line() {
    let (dir, editor) = setup();
    fs::write(
        dir.path().join("lost.tscn"),
        "[gd_scene format=3]\n\n[node name=\"Root\" type=\"Node\"]\n\n[node name=\"Lost\" type=\"Node\" parent=\"Nowhere\"]\n",
    )
    .unwrap();
    match editor.list_scene_nodes("lost.tscn", None, None) {
        Err(EditError::Parse { source, .. }) => {
            assert_eq!(source.line, 5);
            assert!(source.message.contains("Nowhere"), "{}", source.message);
        }
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn test_deferred_edits_do_not_keep_freed_ids() {
    let (_dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node", None).unwrap();
    editor.add_node("a.tscn", ".", "Node", "Gone", None, true).unwrap();
    editor.delete_node("a.tscn", "Gone", false).unwrap();

    let (_, mut pending) = editor.load("a.tscn").unwrap();
    assert!(pending.take_freed().is_empty());
}

#[test]
fn test_deferred_save() {
    let (dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node", None).unwrap();
    let path = dir.path().join("a.tscn");
    let before = fs::read_to_string(&path).unwrap();

    let outcome = editor.add_node("a.tscn", ".", "Node", "Later", None, false).unwrap();
    assert!(!outcome.saved);
    assert!(editor.has_pending("a.tscn"));
    assert_eq!(fs::read_to_string(&path).unwrap(), before);

    // Reads see the pending copy.
    assert_eq!(editor.list_scene_nodes("a.tscn", None, None).unwrap().len(), 2);

    editor.save_scene("a.tscn", None).unwrap();
    assert!(!editor.has_pending("a.tscn"));
    assert!(fs::read_to_string(&path).unwrap().contains("name=\"Later\""));
}

#[test]
fn test_save_scene_to_new_path() {
    let (dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node", None).unwrap();
    editor.add_node("a.tscn", ".", "Node", "Copy", None, false).unwrap();
    let outcome = editor.save_scene("a.tscn", Some("levels/b.tscn")).unwrap();
    assert_eq!(outcome.scene, "res://levels/b.tscn");
    assert!(fs::read_to_string(dir.path().join("levels/b.tscn"))
        .unwrap()
        .contains("Copy"));
    assert!(!fs::read_to_string(dir.path().join("a.tscn")).unwrap().contains("Copy"));
}

#[test]
fn test_duplicate_and_reparent() {
    let (_dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node2D", None).unwrap();
    editor
        .add_node(
            "a.tscn",
            ".",
            "Node2D",
            "Enemy",
            Some(&props(json!({"position": {"type": "Vector2", "x": 3, "y": 4}}))),
            true,
        )
        .unwrap();
    editor.add_node("a.tscn", "Enemy", "Sprite2D", "Body", None, true).unwrap();
    editor.add_node("a.tscn", ".", "Node2D", "Group", None, true).unwrap();

    let dup = editor
        .duplicate_node("a.tscn", "Enemy", "Enemy2", Some("Group"), true)
        .unwrap();
    assert_eq!(dup.node.as_deref(), Some("Group/Enemy2"));
    let got = editor.get_node_properties("a.tscn", "Group/Enemy2", false).unwrap();
    assert_eq!(got.properties["position"], Value::Vector2(Vector2::new(3.0, 4.0)));
    assert!(editor.get_node_properties("a.tscn", "Group/Enemy2/Body", true).is_ok());

    assert!(matches!(
        editor.reparent_node("a.tscn", "Enemy", "Enemy/Body", true),
        Err(EditError::Engine(EngineError::InvalidReparent(_)))
    ));
    let moved = editor.reparent_node("a.tscn", "Enemy", "Group", true).unwrap();
    assert_eq!(moved.node.as_deref(), Some("Group/Enemy"));

    assert!(matches!(
        editor.duplicate_node("a.tscn", ".", "Again", None, true),
        Err(EditError::Engine(EngineError::CannotDuplicateRoot))
    ));
}

#[test]
fn test_delete_drops_connections() {
    let (_dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node", None).unwrap();
    editor.add_node("a.tscn", ".", "Timer", "Timer", None, true).unwrap();
    editor.add_node("a.tscn", ".", "Button", "Button", None, true).unwrap();
    editor
        .connect_signal("a.tscn", "Timer", "timeout", "Button", "press", 0, true)
        .unwrap();
    editor
        .connect_signal("a.tscn", "Button", "pressed", ".", "_on_pressed", 0, true)
        .unwrap();
    assert_eq!(editor.list_connections("a.tscn", None).unwrap().len(), 2);
    assert_eq!(editor.list_connections("a.tscn", Some("Timer")).unwrap().len(), 1);

    editor.delete_node("a.tscn", "Button", true).unwrap();
    assert!(editor.list_connections("a.tscn", None).unwrap().is_empty());
}

#[test]
fn test_connection_rules() {
    let (_dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node", None).unwrap();
    editor.add_node("a.tscn", ".", "Timer", "Timer", None, true).unwrap();
    editor
        .connect_signal("a.tscn", "Timer", "timeout", ".", "_tick", 0, true)
        .unwrap();
    assert!(matches!(
        editor.connect_signal("a.tscn", "Timer", "timeout", ".", "_tick", 0, true),
        Err(EditError::Engine(EngineError::AlreadyConnected { .. }))
    ));
    assert!(matches!(
        editor.connect_signal("a.tscn", "Timer", "pressed", ".", "_tick", 0, true),
        Err(EditError::Engine(EngineError::UnknownChannel { .. }))
    ));
    editor
        .disconnect_signal("a.tscn", "Timer", "timeout", ".", "_tick", true)
        .unwrap();
    assert!(matches!(
        editor.disconnect_signal("a.tscn", "Timer", "timeout", ".", "_tick", true),
        Err(EditError::Engine(EngineError::NotConnected { .. }))
    ));
}

#[test]
fn test_load_sprite_checks_texture() {
    let (dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node2D", None).unwrap();
    editor.add_node("a.tscn", ".", "Sprite2D", "S", None, true).unwrap();

    let err = editor.load_sprite("a.tscn", "S", "res://art/hero.png", true).unwrap_err();
    assert!(matches!(err.decode_error(), Some(DecodeError::Unresolved { .. })));

    fs::create_dir_all(dir.path().join("art")).unwrap();
    fs::write(dir.path().join("art/hero.png"), b"png").unwrap();
    editor.load_sprite("a.tscn", "S", "art/hero.png", true).unwrap();

    let text = fs::read_to_string(dir.path().join("a.tscn")).unwrap();
    assert!(text.contains("path=\"res://art/hero.png\""));
    assert!(text.contains("texture = ExtResource(\"1\")"));
}

#[test]
fn test_resource_property_must_exist() {
    let (_dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node2D", None).unwrap();
    editor.add_node("a.tscn", ".", "Sprite2D", "S", None, true).unwrap();
    let err = editor
        .set_node_properties(
            "a.tscn",
            "S",
            &props(json!({"texture": {"type": "Resource", "path": "res://none.png", "class": "Texture2D"}})),
            true,
        )
        .unwrap_err();
    assert!(matches!(err.decode_error(), Some(DecodeError::Unresolved { .. })));
}

#[test]
fn test_missing_and_malformed_scenes() {
    let (dir, mut editor) = setup();
    assert!(matches!(
        editor.add_node("nope.tscn", ".", "Node", "A", None, true),
        Err(EditError::NotFound(_))
    ));
    assert!(matches!(
        editor.list_scene_nodes("../outside.tscn", None, None),
        Err(EditError::InvalidLocator(_))
    ));

    fs::write(dir.path().join("bad.tscn"), "[gd_scene format=3]\n[node name=\"A\"\n").unwrap();
    match editor.list_scene_nodes("bad.tscn", None, None) {
        Err(EditError::Parse { source, .. }) => assert_eq!(source.line, 2),
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn test_list_depth_limit() {
    let (_dir, mut editor) = setup();
    editor.create_scene("a.tscn", "Node", None).unwrap();
    editor.add_node("a.tscn", ".", "Node", "A", None, true).unwrap();
    editor.add_node("a.tscn", "A", "Node", "B", None, true).unwrap();
    editor.add_node("a.tscn", "A/B", "Node", "C", None, true).unwrap();

    assert_eq!(editor.list_scene_nodes("a.tscn", None, Some(0)).unwrap().len(), 1);
    assert_eq!(editor.list_scene_nodes("a.tscn", None, Some(1)).unwrap().len(), 2);
    let from_a = editor.list_scene_nodes("a.tscn", Some("A"), Some(1)).unwrap();
    let paths: Vec<&str> = from_a.iter().map(|n| n.path.as_str()).collect();
    assert_eq!(paths, vec!["A", "A/B"]);
}

#[test]
fn test_notifier_receives_saves() {
    let dir = tempfile::tempdir().unwrap();
    let queue = ChangeQueue::new();
    let mut editor = SceneEditor::new(Project::new(dir.path()), Arc::new(TypeRegistry::builtin()))
        .with_notifier(queue.clone());
    editor.create_scene("a.tscn", "Node", None).unwrap();
    editor.add_node("a.tscn", ".", "Node", "A", None, false).unwrap();
    assert_eq!(queue.drain().len(), 1);

    editor.save_scene("a.tscn", None).unwrap();
    let changes = queue.drain();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].locator, "res://a.tscn");
}
