//! Scene tree: an arena of nodes with a designated root.
//!
//! Node ids are stable for the lifetime of a tree and never reused, so
//! subscriptions and wiring can hold them across structural edits.
//!
//! The same structure backs the host's live tree and the copies the scene
//! editor loads from disk. Persistence only writes nodes whose `owner` is
//! the root; call [`SceneTree::propagate_owner`] after structural edits.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::error::{EngineError, EngineResult};
use crate::path::{validate_name, validate_property_name, NodeAddress, Segment};
use crate::registry::TypeRegistry;
use crate::signal::{EmittedSignal, SignalConnection};
use crate::value::Value;

/// Stable node identity within one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One element of the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub type_name: String,
    /// Loaded from a type the registry does not know. Properties on a
    /// placeholder are stored verbatim and never validated.
    pub placeholder: bool,
    pub properties: BTreeMap<String, Value>,
    pub groups: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    owner: Option<NodeId>,
}

impl Node {
    /// A detached node with no properties.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            placeholder: false,
            properties: BTreeMap::new(),
            groups: Vec::new(),
            parent: None,
            children: Vec::new(),
            owner: None,
        }
    }

    /// Instantiate a registered type with its default properties.
    pub fn instantiate(registry: &TypeRegistry, type_name: &str, name: &str) -> EngineResult<Self> {
        if !registry.is_instantiable(type_name) {
            return Err(EngineError::UnknownType(type_name.to_string()));
        }
        validate_name(name)?;
        let mut node = Node::new(name, type_name);
        node.properties = registry.default_properties(type_name);
        Ok(node)
    }

    /// A stand-in for a node whose type is unknown.
    pub fn placeholder(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let mut node = Node::new(name, type_name);
        node.placeholder = true;
        node
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    pub fn add_group(&mut self, group: &str) {
        if !self.in_group(group) {
            self.groups.push(group.to_string());
        }
    }

    pub fn remove_group(&mut self, group: &str) {
        self.groups.retain(|g| g != group);
    }
}

/// Arena-backed node tree.
#[derive(Debug, Clone)]
pub struct SceneTree {
    nodes: FxHashMap<NodeId, Node>,
    root: NodeId,
    next_id: u32,
    connections: Vec<SignalConnection>,
    emitted: Vec<EmittedSignal>,
    pending_free: Vec<NodeId>,
    freed: Vec<NodeId>,
}

impl SceneTree {
    /// A tree containing only `root`.
    pub fn new(mut root: Node) -> Self {
        root.parent = None;
        root.owner = None;
        root.children.clear();
        let id = NodeId(0);
        let mut nodes = FxHashMap::default();
        nodes.insert(id, root);
        Self {
            nodes,
            root: id,
            next_id: 1,
            connections: Vec::new(),
            emitted: Vec::new(),
            pending_free: Vec::new(),
            freed: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Like [`get`](Self::get), but a missing id is a `NodeNotFound` error.
    pub fn node(&self, id: NodeId) -> EngineResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))
    }

    fn node_mut(&mut self, id: NodeId) -> EngineResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))
    }

    // -------------------------------------------------------------------------
    // Addressing
    // -------------------------------------------------------------------------

    /// Resolve an address relative to the root.
    pub fn resolve(&self, address: &str) -> EngineResult<NodeId> {
        self.resolve_from(self.root, address)
    }

    /// Resolve an address relative to `base`.
    pub fn resolve_from(&self, base: NodeId, address: &str) -> EngineResult<NodeId> {
        let parsed = NodeAddress::parse(address);
        let mut current = base;
        for seg in parsed.segments() {
            let node = self.node(current)?;
            current = match seg {
                Segment::Parent => node
                    .parent
                    .ok_or_else(|| EngineError::NodeNotFound(address.to_string()))?,
                Segment::Child(name) => self
                    .find_child(current, name)
                    .ok_or_else(|| EngineError::NodeNotFound(address.to_string()))?,
            };
        }
        Ok(current)
    }

    /// First child of `parent` named `name`.
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let node = self.nodes.get(&parent)?;
        node.children
            .iter()
            .copied()
            .find(|c| self.nodes.get(c).map(|n| n.name == name).unwrap_or(false))
    }

    /// Canonical address of a node: `"."` for the root, otherwise the
    /// slash-joined names below the root.
    pub fn address_of(&self, id: NodeId) -> EngineResult<String> {
        let mut names = Vec::new();
        let mut current = id;
        while current != self.root {
            let node = self.node(current)?;
            names.push(node.name.as_str());
            current = node
                .parent
                .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))?;
        }
        if names.is_empty() {
            return Ok(".".to_string());
        }
        names.reverse();
        Ok(names.join("/"))
    }

    /// Address of `id` relative to `from`, using `..` steps where needed.
    pub fn relative_address(&self, from: NodeId, id: NodeId) -> EngineResult<String> {
        let from_chain = self.ancestors_inclusive(from)?;
        let to_chain = self.ancestors_inclusive(id)?;
        let common = from_chain
            .iter()
            .find(|a| to_chain.contains(a))
            .copied()
            .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))?;

        let mut parts: Vec<String> = Vec::new();
        for a in &from_chain {
            if *a == common {
                break;
            }
            parts.push("..".to_string());
        }
        let mut down: Vec<String> = Vec::new();
        for a in &to_chain {
            if *a == common {
                break;
            }
            down.push(self.node(*a)?.name.clone());
        }
        down.reverse();
        parts.extend(down);
        if parts.is_empty() {
            Ok(".".to_string())
        } else {
            Ok(parts.join("/"))
        }
    }

    fn ancestors_inclusive(&self, id: NodeId) -> EngineResult<Vec<NodeId>> {
        let mut chain = vec![id];
        let mut current = self.node(id)?.parent;
        while let Some(p) = current {
            chain.push(p);
            current = self.node(p)?.parent;
        }
        Ok(chain)
    }

    /// True if `node` is `ancestor` or lies below it.
    pub fn is_in_subtree(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    /// Pre-order list of `id` and its descendants.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                out.push(current);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Depth of `id` below the root (root is 0).
    pub fn depth_of(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(p) = current {
            depth += 1;
            current = self.nodes.get(&p).and_then(|n| n.parent);
        }
        depth
    }

    pub fn nodes_in_group(&self, group: &str) -> Vec<NodeId> {
        self.subtree(self.root)
            .into_iter()
            .filter(|id| self.nodes.get(id).map(|n| n.in_group(group)).unwrap_or(false))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Structure
    // -------------------------------------------------------------------------

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    /// Append `node` as the last child of `parent`. The new node is
    /// unowned until [`propagate_owner`](Self::propagate_owner) runs.
    pub fn add_child(&mut self, parent: NodeId, mut node: Node) -> EngineResult<NodeId> {
        validate_name(&node.name)?;
        self.node(parent)?;
        node.parent = Some(parent);
        node.children.clear();
        node.owner = None;
        let id = self.alloc(node);
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Detach and free `id` with its subtree. Wiring that touches any freed
    /// node is dropped. Returns the freed ids.
    pub fn remove(&mut self, id: NodeId) -> EngineResult<Vec<NodeId>> {
        if id == self.root {
            return Err(EngineError::CannotDeleteRoot);
        }
        let parent = self.node(id)?.parent;
        if let Some(parent) = parent {
            self.node_mut(parent)?.children.retain(|c| *c != id);
        }
        let removed = self.subtree(id);
        for r in &removed {
            self.nodes.remove(r);
        }
        self.connections
            .retain(|c| !removed.contains(&c.source) && !removed.contains(&c.target));
        self.pending_free.retain(|p| !removed.contains(p));
        self.freed.extend(removed.iter().copied());
        Ok(removed)
    }

    /// Move `id` (with its subtree) to the end of `new_parent`'s children.
    pub fn reparent(&mut self, id: NodeId, new_parent: NodeId) -> EngineResult<()> {
        if id == self.root {
            return Err(EngineError::CannotReparentRoot);
        }
        self.node(new_parent)?;
        if self.is_in_subtree(id, new_parent) {
            return Err(EngineError::InvalidReparent(self.address_of(id)?));
        }
        let old_parent = self.node(id)?.parent;
        if let Some(old) = old_parent {
            self.node_mut(old)?.children.retain(|c| *c != id);
        }
        self.node_mut(id)?.parent = Some(new_parent);
        self.node_mut(new_parent)?.children.push(id);
        Ok(())
    }

    /// Deep-copy `id`, name the copy `new_name` and attach it under
    /// `new_parent` (or the original's parent). Wiring between nodes inside
    /// the copied subtree is duplicated too.
    pub fn duplicate(&mut self, id: NodeId, new_name: &str, new_parent: Option<NodeId>) -> EngineResult<NodeId> {
        validate_name(new_name)?;
        let parent = match new_parent {
            Some(p) => p,
            None => self.node(id)?.parent.ok_or(EngineError::CannotDuplicateRoot)?,
        };
        self.node(parent)?;

        // Snapshot first: the destination may lie inside the copied subtree.
        let originals = self.subtree(id);
        let mut snapshot = Vec::with_capacity(originals.len());
        for orig in &originals {
            snapshot.push((*orig, self.node(*orig)?.clone()));
        }

        let mut mapping: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        for (orig, node) in snapshot {
            let mut copy = node;
            let copy_parent = if orig == id {
                copy.name = new_name.to_string();
                parent
            } else {
                let orig_parent = copy
                    .parent
                    .ok_or_else(|| EngineError::NodeNotFound(orig.to_string()))?;
                *mapping
                    .get(&orig_parent)
                    .ok_or_else(|| EngineError::NodeNotFound(orig_parent.to_string()))?
            };
            let new_id = self.add_child(copy_parent, copy)?;
            mapping.insert(orig, new_id);
        }

        let copied_wiring: Vec<SignalConnection> = self
            .connections
            .iter()
            .filter_map(|c| {
                let source = mapping.get(&c.source)?;
                let target = mapping.get(&c.target)?;
                Some(SignalConnection {
                    source: *source,
                    target: *target,
                    ..c.clone()
                })
            })
            .collect();
        self.connections.extend(copied_wiring);

        mapping
            .get(&id)
            .copied()
            .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))
    }

    pub fn rename(&mut self, id: NodeId, name: &str) -> EngineResult<()> {
        validate_name(name)?;
        self.node_mut(id)?.name = name.to_string();
        Ok(())
    }

    /// Set every non-root node's owner to the root.
    pub fn propagate_owner(&mut self) {
        let root = self.root;
        for (id, node) in self.nodes.iter_mut() {
            node.owner = if *id == root { None } else { Some(root) };
        }
    }

    /// Set a single node's owner. Used when loading persisted scenes and
    /// to model nodes added at runtime that should not be saved.
    pub fn set_owner(&mut self, id: NodeId, owner: Option<NodeId>) -> EngineResult<()> {
        self.node_mut(id)?.owner = owner;
        Ok(())
    }

    /// Root plus every node owned by the root, in pre-order, skipping any
    /// subtree hanging off an unowned node.
    pub fn owned_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            if current != self.root && node.owner != Some(self.root) {
                continue;
            }
            out.push(current);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Schedule `id` to be removed by [`flush_free`](Self::flush_free).
    pub fn queue_free(&mut self, id: NodeId) -> EngineResult<()> {
        if id == self.root {
            return Err(EngineError::CannotDeleteRoot);
        }
        self.node(id)?;
        if !self.pending_free.contains(&id) {
            self.pending_free.push(id);
        }
        Ok(())
    }

    /// Remove nodes queued with `queue_free`.
    pub fn flush_free(&mut self) {
        for id in std::mem::take(&mut self.pending_free) {
            if self.contains(id) {
                // Already-removed ancestors make this a no-op.
                let _ = self.remove(id);
            }
        }
    }

    /// Drain ids freed since the last call.
    pub fn take_freed(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.freed)
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    pub fn get_property(&self, id: NodeId, name: &str) -> EngineResult<Option<&Value>> {
        Ok(self.node(id)?.properties.get(name))
    }

    /// Check a value against a node's declared property and coerce it.
    pub fn validate_property(
        &self,
        registry: &TypeRegistry,
        id: NodeId,
        name: &str,
        value: Value,
    ) -> EngineResult<Value> {
        let node = self.node(id)?;
        if node.placeholder {
            // Unknown type: any key goes, as long as it can be written back
            validate_property_name(name)?;
            return Ok(value);
        }
        let info = registry
            .property(&node.type_name, name)
            .ok_or_else(|| EngineError::UnknownProperty {
                type_name: node.type_name.clone(),
                property: name.to_string(),
            })?;
        let actual = value.kind();
        value.coerce_to(info.kind).ok_or(EngineError::TypeMismatch {
            property: name.to_string(),
            expected: info.kind,
            actual,
        })
    }

    /// Validate and store a property. Returns the previous value.
    pub fn set_property(
        &mut self,
        registry: &TypeRegistry,
        id: NodeId,
        name: &str,
        value: Value,
    ) -> EngineResult<Option<Value>> {
        let value = self.validate_property(registry, id, name, value)?;
        Ok(self.node_mut(id)?.properties.insert(name.to_string(), value))
    }

    /// Validate every entry first, then apply them all.
    pub fn set_properties(
        &mut self,
        registry: &TypeRegistry,
        id: NodeId,
        values: BTreeMap<String, Value>,
    ) -> EngineResult<()> {
        let mut checked = Vec::with_capacity(values.len());
        for (name, value) in values {
            let value = self.validate_property(registry, id, &name, value)?;
            checked.push((name, value));
        }
        let node = self.node_mut(id)?;
        for (name, value) in checked {
            node.properties.insert(name, value);
        }
        Ok(())
    }

    /// Properties of `id`, dropping those equal to the type default when
    /// `include_defaults` is false.
    pub fn properties(
        &self,
        registry: &TypeRegistry,
        id: NodeId,
        include_defaults: bool,
    ) -> EngineResult<BTreeMap<String, Value>> {
        let node = self.node(id)?;
        Ok(node
            .properties
            .iter()
            .filter(|(name, value)| {
                include_defaults || registry.default_value(&node.type_name, name) != Some(*value)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    // -------------------------------------------------------------------------
    // Signals
    // -------------------------------------------------------------------------

    fn check_signal(&self, registry: &TypeRegistry, id: NodeId, signal: &str) -> EngineResult<()> {
        let node = self.node(id)?;
        if node.placeholder || registry.signal(&node.type_name, signal).is_some() {
            Ok(())
        } else {
            Err(EngineError::UnknownChannel {
                type_name: node.type_name.clone(),
                signal: signal.to_string(),
            })
        }
    }

    /// True if the node's type declares `signal`.
    pub fn has_signal(&self, registry: &TypeRegistry, id: NodeId, signal: &str) -> bool {
        self.check_signal(registry, id, signal).is_ok()
    }

    pub fn connect(
        &mut self,
        registry: &TypeRegistry,
        connection: SignalConnection,
    ) -> EngineResult<()> {
        self.check_signal(registry, connection.source, &connection.signal)?;
        self.node(connection.target)?;
        let exists = self.connections.iter().any(|c| {
            c.matches(connection.source, &connection.signal, connection.target, &connection.method)
        });
        if exists {
            return Err(EngineError::AlreadyConnected {
                signal: connection.signal,
                target: self.address_of(connection.target)?,
                method: connection.method,
            });
        }
        self.connections.push(connection);
        Ok(())
    }

    pub fn disconnect(&mut self, source: NodeId, signal: &str, target: NodeId, method: &str) -> EngineResult<()> {
        let before = self.connections.len();
        self.connections
            .retain(|c| !c.matches(source, signal, target, method));
        if self.connections.len() == before {
            return Err(EngineError::NotConnected {
                signal: signal.to_string(),
                target: self.address_of(target)?,
                method: method.to_string(),
            });
        }
        Ok(())
    }

    /// Insert wiring without validation (used by the scene loader).
    pub fn push_connection(&mut self, connection: SignalConnection) {
        self.connections.push(connection);
    }

    pub fn connections(&self) -> &[SignalConnection] {
        &self.connections
    }

    /// Wiring whose source lies in the subtree of `id`.
    pub fn connections_in_subtree(&self, id: NodeId) -> Vec<&SignalConnection> {
        self.connections
            .iter()
            .filter(|c| self.is_in_subtree(id, c.source))
            .collect()
    }

    /// Wiring triggered by `(source, signal)`. One-shot records are removed.
    pub fn take_triggered(&mut self, source: NodeId, signal: &str) -> Vec<SignalConnection> {
        let triggered: Vec<SignalConnection> = self
            .connections
            .iter()
            .filter(|c| c.source == source && c.signal == signal)
            .cloned()
            .collect();
        self.connections
            .retain(|c| !(c.source == source && c.signal == signal && c.is_one_shot()));
        triggered
    }

    /// Queue a signal emission. The host drains the queue each frame.
    pub fn emit_signal(
        &mut self,
        registry: &TypeRegistry,
        id: NodeId,
        signal: &str,
        args: Vec<Value>,
    ) -> EngineResult<()> {
        self.check_signal(registry, id, signal)?;
        log::trace!("emit {} {}", id, signal);
        self.emitted.push(EmittedSignal {
            node: id,
            signal: signal.to_string(),
            args,
        });
        Ok(())
    }

    pub fn take_emitted(&mut self) -> Vec<EmittedSignal> {
        std::mem::take(&mut self.emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ValueKind, Vector2};

    fn sample() -> (TypeRegistry, SceneTree) {
        let reg = TypeRegistry::builtin();
        let mut tree = SceneTree::new(Node::instantiate(&reg, "Node2D", "Main").unwrap());
        let root = tree.root();
        let player = tree
            .add_child(root, Node::instantiate(&reg, "Node2D", "Player").unwrap())
            .unwrap();
        tree.add_child(player, Node::instantiate(&reg, "Sprite2D", "Sprite").unwrap())
            .unwrap();
        tree.add_child(root, Node::instantiate(&reg, "Timer", "Timer").unwrap())
            .unwrap();
        tree.propagate_owner();
        (reg, tree)
    }

    #[test]
    fn test_resolve_and_address() {
        let (_, tree) = sample();
        assert_eq!(tree.resolve(".").unwrap(), tree.root());
        let player = tree.resolve("Player").unwrap();
        let sprite = tree.resolve("Player/Sprite").unwrap();
        assert_eq!(tree.get(sprite).unwrap().parent(), Some(player));
        assert_eq!(tree.resolve("./Player/Sprite/..").unwrap(), player);
        assert_eq!(tree.address_of(sprite).unwrap(), "Player/Sprite");
        assert_eq!(tree.address_of(tree.root()).unwrap(), ".");
        assert!(matches!(tree.resolve("Player/Nope"), Err(EngineError::NodeNotFound(_))));
        assert!(matches!(tree.resolve(".."), Err(EngineError::NodeNotFound(_))));
    }

    #[test]
    fn test_relative_address() {
        let (_, tree) = sample();
        let sprite = tree.resolve("Player/Sprite").unwrap();
        let timer = tree.resolve("Timer").unwrap();
        assert_eq!(tree.relative_address(sprite, timer).unwrap(), "../../Timer");
        assert_eq!(tree.relative_address(tree.root(), sprite).unwrap(), "Player/Sprite");
        assert_eq!(tree.relative_address(timer, timer).unwrap(), ".");
    }

    #[test]
    fn test_root_cannot_be_removed_or_moved() {
        let (_, mut tree) = sample();
        let root = tree.root();
        let player = tree.resolve("Player").unwrap();
        assert_eq!(tree.remove(root), Err(EngineError::CannotDeleteRoot));
        assert_eq!(tree.reparent(root, player), Err(EngineError::CannotReparentRoot));
        assert_eq!(tree.queue_free(root), Err(EngineError::CannotDeleteRoot));
    }

    #[test]
    fn test_remove_drops_subtree_and_wiring() {
        let (reg, mut tree) = sample();
        let player = tree.resolve("Player").unwrap();
        let sprite = tree.resolve("Player/Sprite").unwrap();
        let timer = tree.resolve("Timer").unwrap();
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

        let removed = tree.remove(player).unwrap();
        assert_eq!(removed, vec![player, sprite]);
        assert!(!tree.contains(sprite));
        assert!(tree.connections().is_empty());
        assert_eq!(tree.take_freed(), vec![player, sprite]);
    }

    #[test]
    fn test_reparent_into_own_subtree_rejected() {
        let (_, mut tree) = sample();
        let player = tree.resolve("Player").unwrap();
        let sprite = tree.resolve("Player/Sprite").unwrap();
        assert!(matches!(tree.reparent(player, sprite), Err(EngineError::InvalidReparent(_))));
        assert!(matches!(tree.reparent(player, player), Err(EngineError::InvalidReparent(_))));

        let timer = tree.resolve("Timer").unwrap();
        tree.reparent(sprite, timer).unwrap();
        assert_eq!(tree.address_of(sprite).unwrap(), "Timer/Sprite");
    }

    #[test]
    fn test_duplicate_subtree() {
        let (reg, mut tree) = sample();
        let player = tree.resolve("Player").unwrap();
        tree.set_property(&reg, player, "position", Value::Vector2(Vector2::new(4.0, 2.0)))
            .unwrap();

        let copy = tree.duplicate(player, "Player2", None).unwrap();
        assert_eq!(tree.address_of(copy).unwrap(), "Player2");
        let copy_sprite = tree.resolve("Player2/Sprite").unwrap();
        assert_ne!(copy_sprite, tree.resolve("Player/Sprite").unwrap());
        assert_eq!(
            tree.get(copy).unwrap().properties["position"],
            Value::Vector2(Vector2::new(4.0, 2.0))
        );
    }

    #[test]
    fn test_duplicate_root_needs_parent() {
        let (_, mut tree) = sample();
        let root = tree.root();
        assert_eq!(tree.duplicate(root, "Copy", None), Err(EngineError::CannotDuplicateRoot));

        let timer = tree.resolve("Timer").unwrap();
        let before = tree.len();
        tree.duplicate(root, "Copy", Some(timer)).unwrap();
        assert_eq!(tree.len(), before * 2);
        assert!(tree.resolve("Timer/Copy/Timer").is_ok());
    }

    #[test]
    fn test_owned_nodes_skip_unowned() {
        let (reg, mut tree) = sample();
        let root = tree.root();
        let runtime = tree
            .add_child(root, Node::instantiate(&reg, "Node", "Runtime").unwrap())
            .unwrap();
        let owned = tree.owned_nodes();
        assert!(!owned.contains(&runtime));
        assert_eq!(owned.len(), 4);

        tree.propagate_owner();
        assert!(tree.owned_nodes().contains(&runtime));
    }

    #[test]
    fn test_set_property_validation() {
        let (reg, mut tree) = sample();
        let player = tree.resolve("Player").unwrap();

        assert!(matches!(
            tree.set_property(&reg, player, "speed", Value::Int(1)),
            Err(EngineError::UnknownProperty { .. })
        ));
        assert_eq!(
            tree.set_property(&reg, player, "position", Value::Int(1)),
            Err(EngineError::TypeMismatch {
                property: "position".into(),
                expected: ValueKind::Vector2,
                actual: ValueKind::Int,
            })
        );
        tree.set_property(&reg, player, "rotation", Value::Int(2)).unwrap();
        assert_eq!(tree.get(player).unwrap().properties["rotation"], Value::Float(2.0));
    }

    #[test]
    fn test_set_properties_all_or_nothing() {
        let (reg, mut tree) = sample();
        let player = tree.resolve("Player").unwrap();
        let mut values = BTreeMap::new();
        values.insert("rotation".to_string(), Value::Float(1.5));
        values.insert("visible".to_string(), Value::String("yes".into()));
        assert!(tree.set_properties(&reg, player, values).is_err());
        assert_eq!(tree.get(player).unwrap().properties["rotation"], Value::Float(0.0));
    }

    #[test]
    fn test_properties_without_defaults() {
        let (reg, mut tree) = sample();
        let player = tree.resolve("Player").unwrap();
        assert!(tree.properties(&reg, player, false).unwrap().is_empty());

        tree.set_property(&reg, player, "rotation", Value::Float(5.0)).unwrap();
        let props = tree.properties(&reg, player, false).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props["rotation"], Value::Float(5.0));
    }

    #[test]
    fn test_connect_rules() {
        let (reg, mut tree) = sample();
        let timer = tree.resolve("Timer").unwrap();
        let player = tree.resolve("Player").unwrap();
        let wiring = SignalConnection {
            source: timer,
            signal: "timeout".into(),
            target: player,
            method: "hide".into(),
            flags: 0,
        };
        tree.connect(&reg, wiring.clone()).unwrap();
        assert!(matches!(
            tree.connect(&reg, wiring.clone()),
            Err(EngineError::AlreadyConnected { .. })
        ));
        assert!(matches!(
            tree.connect(
                &reg,
                SignalConnection {
                    signal: "pressed".into(),
                    ..wiring
                }
            ),
            Err(EngineError::UnknownChannel { .. })
        ));

        tree.disconnect(timer, "timeout", player, "hide").unwrap();
        assert!(matches!(
            tree.disconnect(timer, "timeout", player, "hide"),
            Err(EngineError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_emit_requires_declared_signal() {
        let (reg, mut tree) = sample();
        let timer = tree.resolve("Timer").unwrap();
        tree.emit_signal(&reg, timer, "timeout", vec![]).unwrap();
        assert!(tree.emit_signal(&reg, timer, "pressed", vec![]).is_err());
        let emitted = tree.take_emitted();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].signal, "timeout");
        assert!(tree.take_emitted().is_empty());
    }

    #[test]
    fn test_queue_free_deferred() {
        let (_, mut tree) = sample();
        let timer = tree.resolve("Timer").unwrap();
        tree.queue_free(timer).unwrap();
        assert!(tree.contains(timer));
        tree.flush_free();
        assert!(!tree.contains(timer));
    }
}
