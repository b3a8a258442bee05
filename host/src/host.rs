//! Headless scene runtime.
//!
//! Owns the live scene tree and advances it one frame at a time: queued
//! input first, then timers and audio players, then signal wiring. Signals
//! emitted during a frame are kept for the session server to broadcast.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use scenewire_config::HostSettings;
use scenewire_engine::error::EngineResult;
use scenewire_engine::methods::check_call;
use scenewire_engine::registry::TypeRegistry;
use scenewire_engine::signal::EmittedSignal;
use scenewire_engine::tree::{Node, NodeId, SceneTree};
use scenewire_engine::value::{Rect2, Value, Vector2};
use scenewire_io::notify::SceneChange;
use scenewire_io::{scene_file, EditResult, Project, ProjectResources};
use serde::Serialize;

use crate::input::{InputEvent, MouseButton};
use crate::render::{self, Frame, Layers};

/// Wiring can trigger further emissions; stop after this many passes per
/// frame so a signal cycle cannot stall the loop.
const MAX_SIGNAL_PASSES: usize = 16;

/// Held-down input as seen by the scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputState {
    /// Pressed actions and their strength.
    pub actions: BTreeMap<String, f64>,
    pub keys: BTreeSet<String>,
    pub mouse: Vector2Json,
    #[serde(skip)]
    armed: Option<NodeId>,
    #[serde(skip)]
    hovered: Option<NodeId>,
}

/// `{x, y}` pair for JSON output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Vector2Json {
    pub x: f64,
    pub y: f64,
}

/// Frame timing and counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
    pub frames: u64,
    pub fps: f64,
    pub frame_time_ms: f64,
    pub uptime_secs: f64,
    pub node_count: usize,
    pub running_timers: usize,
    pub queued_input: usize,
    pub signals_emitted: u64,
}

pub struct Host {
    registry: Arc<TypeRegistry>,
    project: Project,
    window: (u32, u32),
    tree: SceneTree,
    scene: Option<String>,
    /// Running timers and their time left, in seconds.
    timers: FxHashMap<NodeId, f64>,
    /// Audio players currently playing.
    playing: BTreeSet<NodeId>,
    input_queue: VecDeque<InputEvent>,
    input: InputState,
    events: Vec<EmittedSignal>,
    freed: Vec<NodeId>,
    started: Instant,
    frames: u64,
    last_frame: Duration,
    fps: f64,
    signals_emitted: u64,
}

impl Host {
    /// A host with an empty scene (a lone `Node` root).
    pub fn new(settings: &HostSettings, registry: Arc<TypeRegistry>) -> Self {
        let mut root = Node::new("Root", "Node");
        root.properties = registry.default_properties("Node");
        Self {
            project: Project::new(settings.project_root.clone()),
            window: (settings.window_width, settings.window_height),
            tree: SceneTree::new(root),
            registry,
            scene: None,
            timers: FxHashMap::default(),
            playing: BTreeSet::new(),
            input_queue: VecDeque::new(),
            input: InputState::default(),
            events: Vec::new(),
            freed: Vec::new(),
            started: Instant::now(),
            frames: 0,
            last_frame: Duration::ZERO,
            fps: 0.0,
            signals_emitted: 0,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn shared_registry(&self) -> Arc<TypeRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Resolver for typed references in decoded values.
    pub fn resources(&self) -> ProjectResources<'_> {
        ProjectResources::new(&self.project)
    }

    pub fn tree(&self) -> &SceneTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut SceneTree {
        &mut self.tree
    }

    /// Locator of the scene open in the live tree.
    pub fn scene(&self) -> Option<&str> {
        self.scene.as_deref()
    }

    pub fn window_size(&self) -> (u32, u32) {
        self.window
    }

    pub fn input_state(&self) -> &InputState {
        &self.input
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    // -------------------------------------------------------------------------
    // Scene lifecycle
    // -------------------------------------------------------------------------

    /// Replace the live tree with the scene at `locator`.
    pub fn open_scene(&mut self, locator: &str) -> EditResult<()> {
        let locator = self.project.normalize(locator)?;
        let path = self.project.resolve(&locator)?;
        let tree = scene_file::load_scene(&path, &locator, &self.registry)?;
        log::info!("opened scene {} ({} nodes)", locator, tree.len());
        self.install(tree);
        self.scene = Some(locator);
        Ok(())
    }

    /// Reload the open scene if `change` touched it. Returns whether the
    /// live tree was replaced.
    pub fn apply_change(&mut self, change: &SceneChange) -> EditResult<bool> {
        match &self.scene {
            Some(open) if *open == change.locator => {
                let locator = open.clone();
                self.open_scene(&locator)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn install(&mut self, tree: SceneTree) {
        self.tree = tree;
        self.timers.clear();
        self.playing.clear();
        self.events.clear();
        self.input.armed = None;
        self.input.hovered = None;

        let registry = Arc::clone(&self.registry);
        let order = self.tree.subtree(self.tree.root());
        // Children are ready before their parents.
        for id in order.iter().rev() {
            let _ = self.tree.emit_signal(&registry, *id, "ready", vec![]);
        }
        for id in order {
            let Some(node) = self.tree.get(id) else { continue };
            let flag = |name: &str| node.properties.get(name) == Some(&Value::Bool(true));
            let autostart = flag("autostart") && registry.is_a(&node.type_name, "Timer");
            let autoplay = flag("autoplay") && registry.is_a(&node.type_name, "AudioStreamPlayer");
            if autostart {
                self.start_timer(id);
            }
            if autoplay {
                self.playing.insert(id);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Node operations
    // -------------------------------------------------------------------------

    /// Set a property on a live node. Returns the stored (coerced) value.
    pub fn set_property(&mut self, id: NodeId, name: &str, value: Value) -> EngineResult<Value> {
        let old = self.tree.set_property(&self.registry, id, name, value)?;
        let stored = self.tree.get_property(id, name)?.cloned().unwrap_or_default();
        if name == "visible"
            && old.as_ref() != Some(&stored)
            && self.tree.has_signal(&self.registry, id, "visibility_changed")
        {
            self.tree.emit_signal(&self.registry, id, "visibility_changed", vec![])?;
        }
        Ok(stored)
    }

    /// Call a method on a live node. Timer and audio methods use host
    /// state; everything else is handled by the tree.
    pub fn call_method(&mut self, id: NodeId, method: &str, args: Vec<Value>) -> EngineResult<Value> {
        check_call(&self.registry, &self.tree, id, method, &args)?;
        let type_name = self.tree.node(id)?.type_name.clone();

        if self.registry.is_a(&type_name, "Timer") {
            match method {
                "start" => {
                    self.start_timer(id);
                    return Ok(Value::Nil);
                }
                "stop" => {
                    self.timers.remove(&id);
                    return Ok(Value::Nil);
                }
                "is_stopped" => return Ok(Value::Bool(!self.timers.contains_key(&id))),
                "get_time_left" => {
                    return Ok(Value::Float(self.timers.get(&id).copied().unwrap_or(0.0)))
                }
                _ => {}
            }
        }
        if self.registry.is_a(&type_name, "AudioStreamPlayer") {
            match method {
                "play" => {
                    self.playing.insert(id);
                    return Ok(Value::Nil);
                }
                "stop" => {
                    self.playing.remove(&id);
                    return Ok(Value::Nil);
                }
                _ => {}
            }
        }
        self.tree.call_method(&self.registry, id, method, args)
    }

    fn start_timer(&mut self, id: NodeId) {
        let wait = self
            .tree
            .get(id)
            .and_then(|n| n.properties.get("wait_time"))
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
            .max(0.0);
        self.timers.insert(id, wait);
    }

    pub fn is_playing(&self, id: NodeId) -> bool {
        self.playing.contains(&id)
    }

    /// Queue an input event for the next frame.
    pub fn queue_input(&mut self, event: InputEvent) {
        log::debug!("queued {} input", event.kind());
        self.input_queue.push_back(event);
    }

    /// Render the live tree at window size.
    pub fn render(&self, layers: Layers) -> Frame {
        render::render_tree(&self.tree, &self.registry, self.window.0, self.window.1, layers)
    }

    // -------------------------------------------------------------------------
    // Frame
    // -------------------------------------------------------------------------

    /// Advance the scene by `delta`.
    pub fn frame(&mut self, delta: Duration) {
        let started = Instant::now();
        self.process_input();
        self.process_timers(delta.as_secs_f64());
        self.process_audio();
        self.process_signals();

        self.tree.flush_free();
        let freed = self.tree.take_freed();
        for id in &freed {
            self.timers.remove(id);
            self.playing.remove(id);
            if self.input.armed == Some(*id) {
                self.input.armed = None;
            }
            if self.input.hovered == Some(*id) {
                self.input.hovered = None;
            }
        }
        self.freed.extend(freed);

        self.frames += 1;
        self.last_frame = started.elapsed();
        if !delta.is_zero() {
            let instant = 1.0 / delta.as_secs_f64();
            self.fps = if self.fps == 0.0 { instant } else { self.fps * 0.9 + instant * 0.1 };
        }
    }

    /// Signals emitted since the last call, in emission order.
    pub fn take_events(&mut self) -> Vec<EmittedSignal> {
        std::mem::take(&mut self.events)
    }

    /// Nodes freed since the last call.
    pub fn take_freed(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.freed)
    }

    pub fn stats(&self) -> HostStats {
        HostStats {
            frames: self.frames,
            fps: self.fps,
            frame_time_ms: self.last_frame.as_secs_f64() * 1000.0,
            uptime_secs: self.started.elapsed().as_secs_f64(),
            node_count: self.tree.len(),
            running_timers: self.timers.len(),
            queued_input: self.input_queue.len(),
            signals_emitted: self.signals_emitted,
        }
    }

    fn process_input(&mut self) {
        while let Some(event) = self.input_queue.pop_front() {
            match event {
                InputEvent::Action { action, pressed, strength } => {
                    if pressed {
                        self.input.actions.insert(action, strength);
                    } else {
                        self.input.actions.remove(&action);
                    }
                }
                InputEvent::Key { keycode, pressed, .. } => {
                    if pressed {
                        self.input.keys.insert(keycode);
                    } else {
                        self.input.keys.remove(&keycode);
                    }
                }
                InputEvent::MouseMotion { x, y, .. } => {
                    self.input.mouse = Vector2Json { x, y };
                    self.update_hover(Vector2::new(x, y));
                }
                InputEvent::MouseButton { x, y, button, pressed, .. } => {
                    self.input.mouse = Vector2Json { x, y };
                    let point = Vector2::new(x, y);
                    self.update_hover(point);
                    if button != MouseButton::Left {
                        continue;
                    }
                    let hit = self.control_at(point, "Button");
                    if pressed {
                        self.input.armed = hit;
                    } else if let Some(armed) = self.input.armed.take() {
                        if hit == Some(armed) {
                            if let Err(e) = self.tree.press_button(&self.registry, armed) {
                                log::warn!("button press failed: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }

    fn update_hover(&mut self, point: Vector2) {
        let hit = self.control_at(point, "Control");
        if hit == self.input.hovered {
            return;
        }
        let registry = Arc::clone(&self.registry);
        if let Some(old) = self.input.hovered.take() {
            if self.tree.contains(old) {
                let _ = self.tree.emit_signal(&registry, old, "mouse_exited", vec![]);
            }
        }
        if let Some(new) = hit {
            let _ = self.tree.emit_signal(&registry, new, "mouse_entered", vec![]);
        }
        self.input.hovered = hit;
    }

    /// Topmost visible node of type `class` whose rect contains `point`.
    fn control_at(&self, point: Vector2, class: &str) -> Option<NodeId> {
        self.tree
            .subtree(self.tree.root())
            .into_iter()
            .filter(|id| {
                self.tree
                    .get(*id)
                    .map(|n| self.registry.is_a(&n.type_name, class))
                    .unwrap_or(false)
            })
            .filter(|id| self.visible_in_tree(*id))
            .filter(|id| {
                let pos = self.tree.global_position(&self.registry, *id);
                let size = self
                    .tree
                    .get(*id)
                    .and_then(|n| n.properties.get("size"))
                    .and_then(Value::as_vector2)
                    .unwrap_or(Vector2::ZERO);
                Rect2::new(pos.x, pos.y, size.x, size.y).contains(point)
            })
            .last()
    }

    fn visible_in_tree(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(nid) = current {
            let Some(node) = self.tree.get(nid) else { return false };
            if node.properties.get("visible") == Some(&Value::Bool(false)) {
                return false;
            }
            current = node.parent();
        }
        true
    }

    fn process_timers(&mut self, delta: f64) {
        let mut ids: Vec<NodeId> = self.timers.keys().copied().collect();
        ids.sort();
        let registry = Arc::clone(&self.registry);
        for id in ids {
            if !self.tree.contains(id) {
                self.timers.remove(&id);
                continue;
            }
            let Some(left) = self.timers.get_mut(&id) else { continue };
            *left -= delta;
            if *left > 0.0 {
                continue;
            }
            let node = self.tree.get(id);
            let one_shot = node.and_then(|n| n.properties.get("one_shot")) == Some(&Value::Bool(true));
            let wait = node
                .and_then(|n| n.properties.get("wait_time"))
                .and_then(Value::as_f64)
                .unwrap_or(1.0);
            if one_shot {
                self.timers.remove(&id);
            } else if let Some(left) = self.timers.get_mut(&id) {
                *left = if *left + wait > 0.0 { *left + wait } else { wait };
            }
            if let Err(e) = self.tree.emit_signal(&registry, id, "timeout", vec![]) {
                log::warn!("timer {} could not emit timeout: {}", id, e);
            }
        }
    }

    /// Players without a stream finish immediately.
    fn process_audio(&mut self) {
        let finished: Vec<NodeId> = self
            .playing
            .iter()
            .copied()
            .filter(|id| {
                self.tree
                    .get(*id)
                    .map(|n| n.properties.get("stream").map_or(true, Value::is_nil))
                    .unwrap_or(true)
            })
            .collect();
        let registry = Arc::clone(&self.registry);
        for id in finished {
            self.playing.remove(&id);
            if self.tree.contains(id) {
                let _ = self.tree.emit_signal(&registry, id, "finished", vec![]);
            }
        }
    }

    /// Record emitted signals and run their wiring.
    fn process_signals(&mut self) {
        for _ in 0..MAX_SIGNAL_PASSES {
            let emitted = self.tree.take_emitted();
            if emitted.is_empty() {
                return;
            }
            for signal in emitted {
                self.signals_emitted += 1;
                for wiring in self.tree.take_triggered(signal.node, &signal.signal) {
                    if !self.tree.contains(wiring.target) {
                        continue;
                    }
                    if let Err(e) = self.call_method(wiring.target, &wiring.method, signal.args.clone()) {
                        log::warn!(
                            "{} -> {}::{} failed: {}",
                            signal.signal,
                            wiring.target,
                            wiring.method,
                            e
                        );
                    }
                }
                self.events.push(signal);
            }
        }
        let dropped = self.tree.take_emitted();
        if !dropped.is_empty() {
            log::warn!("signal cascade cut off; {} emission(s) dropped", dropped.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenewire_engine::signal::SignalConnection;

    const FRAME: Duration = Duration::from_millis(100);

    fn host() -> Host {
        Host::new(&HostSettings::default(), Arc::new(TypeRegistry::builtin()))
    }

    fn add(host: &mut Host, parent: NodeId, type_name: &str, name: &str) -> NodeId {
        let node = Node::instantiate(host.registry(), type_name, name).unwrap();
        host.tree_mut().add_child(parent, node).unwrap()
    }

    fn signal_names(events: &[EmittedSignal]) -> Vec<&str> {
        events.iter().map(|e| e.signal.as_str()).collect()
    }

    #[test]
    fn test_timer_fires_and_repeats() {
        let mut host = host();
        let root = host.tree().root();
        let timer = add(&mut host, root, "Timer", "Tick");
        host.set_property(timer, "wait_time", Value::Float(0.25)).unwrap();
        host.call_method(timer, "start", vec![]).unwrap();
        assert_eq!(host.call_method(timer, "is_stopped", vec![]).unwrap(), Value::Bool(false));

        host.frame(FRAME);
        host.frame(FRAME);
        assert!(host.take_events().is_empty());
        host.frame(FRAME);
        assert_eq!(signal_names(&host.take_events()), vec!["timeout"]);

        // Still running after firing.
        assert_eq!(host.call_method(timer, "is_stopped", vec![]).unwrap(), Value::Bool(false));
        host.call_method(timer, "stop", vec![]).unwrap();
        assert_eq!(host.call_method(timer, "get_time_left", vec![]).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_one_shot_timer_stops() {
        let mut host = host();
        let root = host.tree().root();
        let timer = add(&mut host, root, "Timer", "Once");
        host.set_property(timer, "wait_time", Value::Float(0.05)).unwrap();
        host.set_property(timer, "one_shot", Value::Bool(true)).unwrap();
        host.call_method(timer, "start", vec![]).unwrap();
        host.frame(FRAME);
        assert_eq!(signal_names(&host.take_events()), vec!["timeout"]);
        assert_eq!(host.call_method(timer, "is_stopped", vec![]).unwrap(), Value::Bool(true));
        host.frame(FRAME);
        assert!(host.take_events().is_empty());
    }

    #[test]
    fn test_wiring_calls_target_method() {
        let mut host = host();
        let root = host.tree().root();
        let button = add(&mut host, root, "Button", "Go");
        let timer = add(&mut host, root, "Timer", "Delay");
        let registry = host.shared_registry();
        host.tree_mut()
            .connect(
                &registry,
                SignalConnection {
                    source: button,
                    signal: "pressed".into(),
                    target: timer,
                    method: "start".into(),
                    flags: 0,
                },
            )
            .unwrap();

        host.call_method(button, "press", vec![]).unwrap();
        host.frame(FRAME);
        assert_eq!(
            signal_names(&host.take_events()),
            vec!["button_down", "button_up", "pressed"]
        );
        assert_eq!(host.call_method(timer, "is_stopped", vec![]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_click_presses_button_under_pointer() {
        let mut host = host();
        let root = host.tree().root();
        let button = add(&mut host, root, "Button", "Ok");
        host.set_property(button, "position", Value::Vector2(Vector2::new(10.0, 10.0)))
            .unwrap();
        host.set_property(button, "size", Value::Vector2(Vector2::new(50.0, 20.0)))
            .unwrap();

        host.queue_input(InputEvent::click(20.0, 15.0, MouseButton::Left, true));
        host.queue_input(InputEvent::click(20.0, 15.0, MouseButton::Left, false));
        host.frame(FRAME);
        let events = host.take_events();
        assert!(signal_names(&events).contains(&"pressed"));
        assert!(signal_names(&events).contains(&"mouse_entered"));

        // Releasing outside the button cancels the press.
        host.queue_input(InputEvent::click(20.0, 15.0, MouseButton::Left, true));
        host.queue_input(InputEvent::click(200.0, 150.0, MouseButton::Left, false));
        host.frame(FRAME);
        let events = host.take_events();
        assert!(!signal_names(&events).contains(&"pressed"));
        assert!(signal_names(&events).contains(&"mouse_exited"));
    }

    #[test]
    fn test_actions_and_keys_tracked() {
        let mut host = host();
        host.queue_input(InputEvent::action("jump", true, 0.5));
        host.queue_input(InputEvent::key("Space", true));
        host.frame(FRAME);
        assert_eq!(host.input_state().actions.get("jump"), Some(&0.5));
        assert!(host.input_state().keys.contains("Space"));

        host.queue_input(InputEvent::action("jump", false, 0.0));
        host.frame(FRAME);
        assert!(host.input_state().actions.is_empty());
    }

    #[test]
    fn test_queue_free_reports_freed_nodes() {
        let mut host = host();
        let root = host.tree().root();
        let parent = add(&mut host, root, "Node2D", "Parent");
        let child = add(&mut host, parent, "Timer", "Child");
        host.call_method(child, "start", vec![]).unwrap();
        host.call_method(parent, "queue_free", vec![]).unwrap();
        assert!(host.tree().contains(parent));
        host.frame(FRAME);
        let freed = host.take_freed();
        assert!(freed.contains(&parent));
        assert!(freed.contains(&child));
        assert_eq!(host.stats().running_timers, 0);
    }

    #[test]
    fn test_visibility_change_emits_once() {
        let mut host = host();
        let root = host.tree().root();
        let sprite = add(&mut host, root, "Sprite2D", "S");
        host.set_property(sprite, "visible", Value::Bool(true)).unwrap();
        host.frame(FRAME);
        assert!(host.take_events().is_empty());
        host.set_property(sprite, "visible", Value::Bool(false)).unwrap();
        host.frame(FRAME);
        assert_eq!(signal_names(&host.take_events()), vec!["visibility_changed"]);
    }

    #[test]
    fn test_audio_without_stream_finishes() {
        let mut host = host();
        let root = host.tree().root();
        let player = add(&mut host, root, "AudioStreamPlayer", "Sfx");
        host.call_method(player, "play", vec![]).unwrap();
        assert!(host.is_playing(player));
        host.frame(FRAME);
        assert_eq!(signal_names(&host.take_events()), vec!["finished"]);
        assert!(!host.is_playing(player));
    }

    #[test]
    fn test_open_and_reload_scene() {
        let dir = tempfile::tempdir().unwrap();
        let settings = HostSettings {
            project_root: dir.path().to_path_buf(),
            ..HostSettings::default()
        };
        std::fs::write(
            dir.path().join("main.tscn"),
            "[gd_scene format=3]\n\n[node name=\"Main\" type=\"Node2D\"]\n\n[node name=\"Clock\" type=\"Timer\" parent=\".\"]\nautostart = true\nwait_time = 0.05\n",
        )
        .unwrap();

        let mut host = Host::new(&settings, Arc::new(TypeRegistry::builtin()));
        host.open_scene("main.tscn").unwrap();
        assert_eq!(host.scene(), Some("res://main.tscn"));
        assert_eq!(host.tree().len(), 2);
        host.frame(FRAME);
        let events = host.take_events();
        assert_eq!(signal_names(&events).iter().filter(|s| **s == "ready").count(), 2);
        assert!(signal_names(&events).contains(&"timeout"));

        let other = SceneChange {
            locator: "res://other.tscn".into(),
            path: dir.path().join("other.tscn"),
        };
        assert!(!host.apply_change(&other).unwrap());
        let same = SceneChange {
            locator: "res://main.tscn".into(),
            path: dir.path().join("main.tscn"),
        };
        assert!(host.apply_change(&same).unwrap());
    }
}
