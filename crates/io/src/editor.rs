//! Scene mutation engine.
//!
//! Every operation loads the scene (or the pending copy left by an earlier
//! `save: false` edit), applies the change to that private copy and only
//! then persists it. A failed operation leaves both the file and the
//! pending copy untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use scenewire_engine::codec;
use scenewire_engine::error::{DecodeError, EngineError};
use scenewire_engine::registry::TypeRegistry;
use scenewire_engine::signal::SignalConnection;
use scenewire_engine::tree::{Node, NodeId, SceneTree};
use scenewire_engine::value::{ResourceRef, Value};
use serde_json::{Map, Value as Json};

use crate::error::{EditError, EditResult};
use crate::notify::{ChangeNotifier, NoopNotifier, SceneChange};
use crate::project::{class_for_extension, Project, ProjectResources};
use crate::scene_file;

/// Result of a mutating operation.
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    /// Canonical locator of the scene that was edited.
    pub scene: String,
    /// Whether the change was written to disk (false for deferred saves).
    pub saved: bool,
    /// Address of the node the operation produced or touched.
    pub node: Option<String>,
}

/// One entry of a node listing.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntry {
    pub path: String,
    pub name: String,
    pub type_name: String,
    pub parent: Option<String>,
    pub depth: usize,
    pub child_count: usize,
    pub groups: Vec<String>,
    pub placeholder: bool,
}

/// One persisted signal connection, with endpoints as addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEntry {
    pub source: String,
    pub signal: String,
    pub target: String,
    pub method: String,
    pub flags: u32,
}

/// Property snapshot of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeProperties {
    pub path: String,
    pub type_name: String,
    pub properties: BTreeMap<String, Value>,
}

/// Edits persisted scenes inside one project.
pub struct SceneEditor {
    project: Project,
    registry: Arc<TypeRegistry>,
    pending: BTreeMap<String, SceneTree>,
    notifier: Box<dyn ChangeNotifier>,
}

impl SceneEditor {
    pub fn new(project: Project, registry: Arc<TypeRegistry>) -> Self {
        Self {
            project,
            registry,
            pending: BTreeMap::new(),
            notifier: Box::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: impl ChangeNotifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Locators with unsaved edits.
    pub fn pending_scenes(&self) -> Vec<&str> {
        self.pending.keys().map(String::as_str).collect()
    }

    pub fn has_pending(&self, scene_path: &str) -> bool {
        self.project
            .normalize(scene_path)
            .map(|l| self.pending.contains_key(&l))
            .unwrap_or(false)
    }

    /// Drop unsaved edits for a scene. Returns whether there were any.
    pub fn discard_pending(&mut self, scene_path: &str) -> EditResult<bool> {
        let locator = self.project.normalize(scene_path)?;
        Ok(self.pending.remove(&locator).is_some())
    }

    /// Load a scene: the pending copy if there is one, otherwise from disk.
    pub fn load(&self, scene_path: &str) -> EditResult<(String, SceneTree)> {
        let locator = self.project.normalize(scene_path)?;
        if let Some(tree) = self.pending.get(&locator) {
            return Ok((locator, tree.clone()));
        }
        let path = self.project.resolve(&locator)?;
        let tree = scene_file::load_scene(&path, &locator, &self.registry)?;
        Ok((locator, tree))
    }

    fn commit(&mut self, locator: String, mut tree: SceneTree, save: bool) -> EditResult<bool> {
        // Freed ids only matter to a live tree.
        tree.take_freed();
        if !save {
            log::debug!("deferring save of {}", locator);
            self.pending.insert(locator, tree);
            return Ok(false);
        }
        self.persist(&locator, &tree)?;
        self.pending.remove(&locator);
        Ok(true)
    }

    fn persist(&self, locator: &str, tree: &SceneTree) -> EditResult<()> {
        let path = self.project.resolve(locator)?;
        scene_file::save_scene(&path, locator, tree, &self.registry)?;
        log::info!("saved scene {}", locator);
        self.notifier.scene_saved(&SceneChange {
            locator: locator.to_string(),
            path,
        });
        Ok(())
    }

    fn decode_properties(&self, properties: &Map<String, Json>) -> EditResult<BTreeMap<String, Value>> {
        let resolver = ProjectResources::new(&self.project);
        properties
            .iter()
            .map(|(key, wire)| {
                codec::decode(wire, &resolver)
                    .map(|v| (key.clone(), v))
                    .map_err(|source| EditError::Property {
                        property: key.clone(),
                        source,
                    })
            })
            .collect()
    }

    /// Commit an edited tree and describe the result.
    fn finish(&mut self, locator: String, tree: SceneTree, save: bool, node: Option<NodeId>) -> EditResult<EditOutcome> {
        let node = node.and_then(|id| tree.address_of(id).ok());
        let saved = self.commit(locator.clone(), tree, save)?;
        Ok(EditOutcome {
            scene: locator,
            saved,
            node,
        })
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Create a new scene file whose root is a fresh `root_type` node.
    pub fn create_scene(&mut self, scene_path: &str, root_type: &str, root_name: Option<&str>) -> EditResult<EditOutcome> {
        let locator = self.project.normalize(scene_path)?;
        if self.project.exists(&locator) || self.pending.contains_key(&locator) {
            return Err(EditError::AlreadyExists(locator));
        }
        let name = root_name.unwrap_or(root_type);
        let root = Node::instantiate(&self.registry, root_type, name)?;
        let tree = SceneTree::new(root);
        self.persist(&locator, &tree)?;
        Ok(EditOutcome {
            scene: locator,
            saved: true,
            node: Some(".".to_string()),
        })
    }

    pub fn add_node(
        &mut self,
        scene_path: &str,
        parent_path: &str,
        node_type: &str,
        node_name: &str,
        properties: Option<&Map<String, Json>>,
        save: bool,
    ) -> EditResult<EditOutcome> {
        let (locator, mut tree) = self.load(scene_path)?;
        let values = match properties {
            Some(p) => self.decode_properties(p)?,
            None => BTreeMap::new(),
        };
        let parent = tree.resolve(parent_path)?;
        let node = Node::instantiate(&self.registry, node_type, node_name)?;
        let id = tree.add_child(parent, node)?;
        tree.set_properties(&self.registry, id, values)?;
        tree.propagate_owner();
        self.finish(locator, tree, save, Some(id))
    }

    pub fn delete_node(&mut self, scene_path: &str, node_path: &str, save: bool) -> EditResult<EditOutcome> {
        let (locator, mut tree) = self.load(scene_path)?;
        let id = tree.resolve(node_path)?;
        let address = tree.address_of(id)?;
        let removed = tree.remove(id)?;
        log::debug!("deleted {} ({} nodes) from {}", address, removed.len(), locator);
        let saved = self.commit(locator.clone(), tree, save)?;
        Ok(EditOutcome {
            scene: locator,
            saved,
            node: Some(address),
        })
    }

    pub fn duplicate_node(
        &mut self,
        scene_path: &str,
        node_path: &str,
        new_name: &str,
        new_parent_path: Option<&str>,
        save: bool,
    ) -> EditResult<EditOutcome> {
        let (locator, mut tree) = self.load(scene_path)?;
        let id = tree.resolve(node_path)?;
        let new_parent = new_parent_path.map(|p| tree.resolve(p)).transpose()?;
        let copy = tree.duplicate(id, new_name, new_parent)?;
        tree.propagate_owner();
        self.finish(locator, tree, save, Some(copy))
    }

    pub fn reparent_node(
        &mut self,
        scene_path: &str,
        node_path: &str,
        new_parent_path: &str,
        save: bool,
    ) -> EditResult<EditOutcome> {
        let (locator, mut tree) = self.load(scene_path)?;
        let id = tree.resolve(node_path)?;
        let new_parent = tree.resolve(new_parent_path)?;
        tree.reparent(id, new_parent)?;
        tree.propagate_owner();
        self.finish(locator, tree, save, Some(id))
    }

    /// Decode, validate and apply every property, or none of them.
    pub fn set_node_properties(
        &mut self,
        scene_path: &str,
        node_path: &str,
        properties: &Map<String, Json>,
        save: bool,
    ) -> EditResult<EditOutcome> {
        let (locator, mut tree) = self.load(scene_path)?;
        let values = self.decode_properties(properties)?;
        let id = tree.resolve(node_path)?;
        tree.set_properties(&self.registry, id, values)?;
        self.finish(locator, tree, save, Some(id))
    }

    pub fn get_node_properties(
        &self,
        scene_path: &str,
        node_path: &str,
        include_defaults: bool,
    ) -> EditResult<NodeProperties> {
        let (_, tree) = self.load(scene_path)?;
        let id = tree.resolve(node_path)?;
        let node = tree.node(id)?;
        Ok(NodeProperties {
            path: tree.address_of(id)?,
            type_name: node.type_name.clone(),
            properties: tree.properties(&self.registry, id, include_defaults)?,
        })
    }

    /// Nodes in the subtree of `node_path` (default: root), pre-order.
    /// `depth` limits how many levels below the start node are listed.
    pub fn list_scene_nodes(
        &self,
        scene_path: &str,
        node_path: Option<&str>,
        depth: Option<usize>,
    ) -> EditResult<Vec<NodeEntry>> {
        let (_, tree) = self.load(scene_path)?;
        let start = tree.resolve(node_path.unwrap_or("."))?;
        let base = tree.depth_of(start);
        let mut entries = Vec::new();
        for id in tree.subtree(start) {
            let level = tree.depth_of(id) - base;
            if depth.map(|d| level > d).unwrap_or(false) {
                continue;
            }
            let node = tree.node(id)?;
            entries.push(NodeEntry {
                path: tree.address_of(id)?,
                name: node.name.clone(),
                type_name: node.type_name.clone(),
                parent: node.parent().and_then(|p| tree.address_of(p).ok()),
                depth: tree.depth_of(id),
                child_count: node.children().len(),
                groups: node.groups.clone(),
                placeholder: node.placeholder,
            });
        }
        Ok(entries)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn connect_signal(
        &mut self,
        scene_path: &str,
        node_path: &str,
        signal: &str,
        target_path: &str,
        method: &str,
        flags: u32,
        save: bool,
    ) -> EditResult<EditOutcome> {
        let (locator, mut tree) = self.load(scene_path)?;
        let source = tree.resolve(node_path)?;
        let target = tree.resolve(target_path)?;
        tree.connect(
            &self.registry,
            SignalConnection {
                source,
                signal: signal.to_string(),
                target,
                method: method.to_string(),
                flags,
            },
        )?;
        self.finish(locator, tree, save, Some(source))
    }

    pub fn disconnect_signal(
        &mut self,
        scene_path: &str,
        node_path: &str,
        signal: &str,
        target_path: &str,
        method: &str,
        save: bool,
    ) -> EditResult<EditOutcome> {
        let (locator, mut tree) = self.load(scene_path)?;
        let source = tree.resolve(node_path)?;
        let target = tree.resolve(target_path)?;
        tree.disconnect(source, signal, target, method)?;
        self.finish(locator, tree, save, Some(source))
    }

    /// Wiring whose source lies in the subtree of `node_path` (default: root).
    pub fn list_connections(&self, scene_path: &str, node_path: Option<&str>) -> EditResult<Vec<ConnectionEntry>> {
        let (_, tree) = self.load(scene_path)?;
        let start = tree.resolve(node_path.unwrap_or("."))?;
        tree.connections_in_subtree(start)
            .into_iter()
            .map(|c| {
                Ok(ConnectionEntry {
                    source: tree.address_of(c.source)?,
                    signal: c.signal.clone(),
                    target: tree.address_of(c.target)?,
                    method: c.method.clone(),
                    flags: c.flags,
                })
            })
            .collect()
    }

    /// Write a scene (including pending edits), optionally to a new locator.
    pub fn save_scene(&mut self, scene_path: &str, new_path: Option<&str>) -> EditResult<EditOutcome> {
        let (locator, tree) = self.load(scene_path)?;
        let target = match new_path {
            Some(p) => self.project.normalize(p)?,
            None => locator.clone(),
        };
        self.persist(&target, &tree)?;
        self.pending.remove(&locator);
        self.pending.remove(&target);
        Ok(EditOutcome {
            scene: target,
            saved: true,
            node: None,
        })
    }

    /// Point a node's `texture` at an image file in the project.
    pub fn load_sprite(
        &mut self,
        scene_path: &str,
        node_path: &str,
        texture_path: &str,
        save: bool,
    ) -> EditResult<EditOutcome> {
        let (locator, mut tree) = self.load(scene_path)?;
        let id = tree.resolve(node_path)?;
        let texture = self.project.normalize(texture_path)?;
        if !self.project.exists(&texture) {
            return Err(EngineError::Decode(DecodeError::Unresolved {
                path: texture,
                class: "Texture2D".to_string(),
            })
            .into());
        }
        let class = class_for_extension(&texture);
        tree.set_property(
            &self.registry,
            id,
            "texture",
            Value::Resource(ResourceRef::new(texture, class)),
        )?;
        self.finish(locator, tree, save, Some(id))
    }
}
