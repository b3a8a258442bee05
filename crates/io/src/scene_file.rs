//! Conversion between scene documents and trees, and atomic file I/O.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use rustc_hash::FxHashMap;
use scenewire_engine::path::child_address;
use scenewire_engine::registry::TypeRegistry;
use scenewire_engine::signal::SignalConnection;
use scenewire_engine::tree::{Node, NodeId, SceneTree};
use scenewire_engine::value::Value;

use crate::error::{EditError, EditResult};
use crate::scene_text::{self, ConnectionSection, ExtResource, NodeSection, ParseError, SceneDocument};

/// Build a tree from a parsed document.
///
/// Unknown node types become placeholders. Every loaded node is owned by
/// the root. Wiring whose endpoints do not exist is dropped.
pub fn document_to_tree(doc: &SceneDocument, registry: &TypeRegistry) -> Result<SceneTree, ParseError> {
    let mut sections = doc.nodes.iter();
    let root_section = sections.next().ok_or_else(|| ParseError {
        line: 1,
        message: "scene has no nodes".into(),
    })?;
    let mut tree = SceneTree::new(node_from_section(root_section, registry));

    // Sections are written parent first, so the most recent node loaded at
    // an address is the parent meant by later sections. This keeps
    // same-named siblings apart.
    let mut latest: FxHashMap<String, NodeId> = FxHashMap::default();
    latest.insert(".".to_string(), tree.root());

    for section in sections {
        let parent_addr = section.parent.as_deref().unwrap_or(".");
        let parent = match latest.get(parent_addr) {
            Some(id) => *id,
            None => tree.resolve(parent_addr).map_err(|_| ParseError {
                line: section.line,
                message: format!("parent '{}' of node '{}' does not exist", parent_addr, section.name),
            })?,
        };
        let id = tree
            .add_child(parent, node_from_section(section, registry))
            .map_err(|e| ParseError {
                line: section.line,
                message: e.to_string(),
            })?;
        let address = tree.address_of(parent).map_err(|e| ParseError {
            line: section.line,
            message: e.to_string(),
        })?;
        latest.insert(child_address(&address, &section.name), id);
    }
    tree.propagate_owner();

    for conn in &doc.connections {
        match (tree.resolve(&conn.from), tree.resolve(&conn.to)) {
            (Ok(source), Ok(target)) => tree.push_connection(SignalConnection {
                source,
                signal: conn.signal.clone(),
                target,
                method: conn.method.clone(),
                flags: conn.flags,
            }),
            _ => log::warn!(
                "dropping connection {} from '{}' to '{}': endpoint missing",
                conn.signal,
                conn.from,
                conn.to
            ),
        }
    }
    Ok(tree)
}

fn node_from_section(section: &NodeSection, registry: &TypeRegistry) -> Node {
    let mut node = if registry.is_instantiable(&section.type_name) {
        let mut node = Node::new(section.name.clone(), section.type_name.clone());
        node.properties = registry.default_properties(&section.type_name);
        node
    } else {
        log::warn!(
            "unknown type '{}' for node '{}', loading as placeholder",
            section.type_name,
            section.name
        );
        Node::placeholder(section.name.clone(), section.type_name.clone())
    };
    for (key, value) in &section.properties {
        let value = match registry.property(&section.type_name, key) {
            Some(info) => value.clone().coerce_to(info.kind).unwrap_or_else(|| value.clone()),
            None => value.clone(),
        };
        node.properties.insert(key.clone(), value);
    }
    for group in &section.groups {
        node.add_group(group);
    }
    node
}

/// Build a document from a tree. Only the root and nodes owned by it are
/// written, and only properties that differ from the type default.
pub fn tree_to_document(tree: &SceneTree, registry: &TypeRegistry) -> SceneDocument {
    let mut doc = SceneDocument::default();
    let owned = tree.owned_nodes();
    let mut resources: BTreeMap<String, String> = BTreeMap::new();

    for id in &owned {
        let Some(node) = tree.get(*id) else { continue };
        let parent = if *id == tree.root() {
            None
        } else {
            node.parent().and_then(|p| tree.address_of(p).ok())
        };
        let mut properties = Vec::new();
        for (key, value) in &node.properties {
            let is_default = !node.placeholder && registry.default_value(&node.type_name, key) == Some(value);
            if is_default {
                continue;
            }
            collect_resources(value, &mut doc.ext_resources, &mut resources);
            properties.push((key.clone(), value.clone()));
        }
        doc.nodes.push(NodeSection {
            name: node.name.clone(),
            type_name: node.type_name.clone(),
            parent,
            groups: node.groups.clone(),
            properties,
            line: 0,
        });
    }

    for conn in tree.connections() {
        if !owned.contains(&conn.source) || !owned.contains(&conn.target) {
            continue;
        }
        let (Ok(from), Ok(to)) = (tree.address_of(conn.source), tree.address_of(conn.target)) else {
            continue;
        };
        doc.connections.push(ConnectionSection {
            signal: conn.signal.clone(),
            from,
            to,
            method: conn.method.clone(),
            flags: conn.flags,
        });
    }
    doc
}

fn collect_resources(value: &Value, ext: &mut Vec<ExtResource>, seen: &mut BTreeMap<String, String>) {
    match value {
        Value::Resource(r) => {
            if !seen.contains_key(&r.path) {
                let id = (ext.len() + 1).to_string();
                seen.insert(r.path.clone(), id.clone());
                ext.push(ExtResource {
                    id,
                    class: r.class.clone(),
                    path: r.path.clone(),
                });
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_resources(v, ext, seen)),
        Value::Dictionary(map) => map.values().for_each(|v| collect_resources(v, ext, seen)),
        _ => {}
    }
}

/// Read and parse a scene file.
pub fn load_scene(path: &Path, locator: &str, registry: &TypeRegistry) -> EditResult<SceneTree> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(EditError::NotFound(locator.to_string()))
        }
        Err(e) => {
            return Err(EditError::Persist {
                path: locator.to_string(),
                source: e,
            })
        }
    };
    let parse_err = |source: ParseError| EditError::Parse {
        path: locator.to_string(),
        source,
    };
    let doc = scene_text::parse(&text).map_err(parse_err)?;
    document_to_tree(&doc, registry).map_err(parse_err)
}

/// Serialize a tree to scene text.
pub fn render_scene(tree: &SceneTree, registry: &TypeRegistry) -> String {
    scene_text::write(&tree_to_document(tree, registry))
}

/// Write a tree to `path` atomically (temp file, then rename).
pub fn save_scene(path: &Path, locator: &str, tree: &SceneTree, registry: &TypeRegistry) -> EditResult<()> {
    let text = render_scene(tree, registry);
    write_atomic(path, text.as_bytes()).map_err(|source| EditError::Persist {
        path: locator.to_string(),
        source,
    })
}

/// Write to a temp file beside `path`, sync, then rename over it.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenewire_engine::value::{ResourceRef, Vector2};

    fn registry() -> TypeRegistry {
        TypeRegistry::builtin()
    }

    #[test]
    fn test_tree_round_trip() {
        let reg = registry();
        let mut tree = SceneTree::new(Node::instantiate(&reg, "Node2D", "Main").unwrap());
        let root = tree.root();
        let sprite = tree
            .add_child(root, Node::instantiate(&reg, "Sprite2D", "Sprite").unwrap())
            .unwrap();
        let timer = tree
            .add_child(root, Node::instantiate(&reg, "Timer", "Timer").unwrap())
            .unwrap();
        tree.propagate_owner();
        tree.set_property(&reg, sprite, "position", Value::Vector2(Vector2::new(1.0, 2.0)))
            .unwrap();
        tree.set_property(
            &reg,
            sprite,
            "texture",
            Value::Resource(ResourceRef::new("res://icon.png", "Texture2D")),
        )
        .unwrap();
        tree.get_mut(sprite).unwrap().add_group("actors");
        tree.connect(
            &reg,
            SignalConnection {
                source: timer,
                signal: "timeout".into(),
                target: sprite,
                method: "hide".into(),
                flags: 0,
            },
        )
        .unwrap();

        let text = render_scene(&tree, &reg);
        assert!(text.contains("[ext_resource type=\"Texture2D\" path=\"res://icon.png\" id=\"1\"]"));
        assert!(text.contains("position = Vector2(1.0, 2.0)"));
        assert!(!text.contains("rotation"));

        let doc = scene_text::parse(&text).unwrap();
        let loaded = document_to_tree(&doc, &reg).unwrap();
        let loaded_sprite = loaded.resolve("Sprite").unwrap();
        assert_eq!(loaded.get(loaded_sprite).unwrap(), tree.get(sprite).unwrap());
        assert_eq!(loaded.connections().len(), 1);
        assert_eq!(render_scene(&loaded, &reg), text);
    }

    #[test]
    fn test_serializer_skips_unowned_nodes() {
        let reg = registry();
        let mut tree = SceneTree::new(Node::instantiate(&reg, "Node", "Root").unwrap());
        let root = tree.root();
        let kept = tree
            .add_child(root, Node::instantiate(&reg, "Node", "Kept").unwrap())
            .unwrap();
        tree.propagate_owner();
        let orphan = tree
            .add_child(kept, Node::instantiate(&reg, "Node", "Orphan").unwrap())
            .unwrap();
        tree.add_child(orphan, Node::instantiate(&reg, "Node", "Below").unwrap())
            .unwrap();

        let text = render_scene(&tree, &reg);
        assert!(text.contains("name=\"Kept\""));
        assert!(!text.contains("Orphan"));
        assert!(!text.contains("Below"));
    }

    #[test]
    fn test_unknown_type_loads_as_placeholder() {
        let reg = registry();
        let text = "[gd_scene format=3]\n\n[node name=\"Root\" type=\"Node\"]\n\n\
                    [node name=\"Ship\" type=\"Spaceship\" parent=\".\"]\nthrust = 4.5\n";
        let doc = scene_text::parse(text).unwrap();
        let tree = document_to_tree(&doc, &reg).unwrap();
        let ship = tree.get(tree.resolve("Ship").unwrap()).unwrap();
        assert!(ship.placeholder);
        assert_eq!(ship.properties["thrust"], Value::Float(4.5));

        // Placeholders survive a save.
        assert!(render_scene(&tree, &reg).contains("thrust = 4.5"));
    }

    #[test]
    fn test_missing_parent_is_parse_error() {
        let reg = registry();
        let text = "[gd_scene format=3]\n[node name=\"Root\" type=\"Node\"]\n[node name=\"A\" type=\"Node\" parent=\"Nope\"]\n";
        let doc = scene_text::parse(text).unwrap();
        assert!(document_to_tree(&doc, &reg).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let reg = registry();
        let dir = tempfile::tempdir().unwrap();
        let err = load_scene(&dir.path().join("nope.tscn"), "res://nope.tscn", &reg).unwrap_err();
        assert!(matches!(err, EditError::NotFound(_)));
    }

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/scene.tscn");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
