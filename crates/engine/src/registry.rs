//! Node type registry.
//!
//! Every node type declares its properties (with defaults), signals and
//! methods, and may inherit from a parent type. Lookups walk the chain
//! from the most derived type up to `Node`.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::value::{Color, Value, ValueKind, Vector2, Vector3};

/// Declared property of a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyInfo {
    pub name: String,
    pub kind: ValueKind,
    pub default: Value,
}

/// Declared signal of a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalInfo {
    pub name: String,
    pub args: Vec<String>,
}

/// Declared method of a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub name: String,
    pub params: Vec<(String, ValueKind)>,
    /// Accepts extra trailing arguments.
    pub vararg: bool,
    pub returns: ValueKind,
}

/// A registered node type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub name: String,
    pub parent: Option<String>,
    pub instantiable: bool,
    pub properties: Vec<PropertyInfo>,
    pub signals: Vec<SignalInfo>,
    pub methods: Vec<MethodInfo>,
}

impl TypeInfo {
    pub fn new(name: &str, parent: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            instantiable: true,
            properties: Vec::new(),
            signals: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn abstract_type(mut self) -> Self {
        self.instantiable = false;
        self
    }

    pub fn property(mut self, name: &str, default: Value) -> Self {
        let kind = default.kind();
        self.properties.push(PropertyInfo {
            name: name.to_string(),
            kind,
            default,
        });
        self
    }

    /// Property whose default is `Nil` but whose declared kind is `kind`.
    pub fn slot(mut self, name: &str, kind: ValueKind) -> Self {
        self.properties.push(PropertyInfo {
            name: name.to_string(),
            kind,
            default: Value::Nil,
        });
        self
    }

    pub fn signal(mut self, name: &str, args: &[&str]) -> Self {
        self.signals.push(SignalInfo {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    pub fn method(mut self, name: &str, params: &[(&str, ValueKind)], returns: ValueKind) -> Self {
        self.methods.push(MethodInfo {
            name: name.to_string(),
            params: params.iter().map(|(n, k)| (n.to_string(), *k)).collect(),
            vararg: false,
            returns,
        });
        self
    }

    pub fn vararg_method(mut self, name: &str, params: &[(&str, ValueKind)], returns: ValueKind) -> Self {
        self = self.method(name, params, returns);
        if let Some(last) = self.methods.last_mut() {
            last.vararg = true;
        }
        self
    }
}

/// Registry of node types, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: FxHashMap<String, TypeInfo>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with the built-in node types.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        for info in builtin_types() {
            reg.register(info);
        }
        reg
    }

    pub fn register(&mut self, info: TypeInfo) {
        self.types.insert(info.name.clone(), info);
    }

    pub fn get(&self, name: &str) -> Option<&TypeInfo> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn is_instantiable(&self, name: &str) -> bool {
        self.get(name).map(|t| t.instantiable).unwrap_or(false)
    }

    /// Sorted list of type names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The type followed by its ancestors, most derived first.
    pub fn ancestry(&self, name: &str) -> Vec<&TypeInfo> {
        let mut chain = Vec::new();
        let mut current = self.get(name);
        while let Some(info) = current {
            // Guard against accidental cycles from user registrations.
            if chain.iter().any(|t: &&TypeInfo| t.name == info.name) {
                break;
            }
            chain.push(info);
            current = info.parent.as_deref().and_then(|p| self.get(p));
        }
        chain
    }

    /// True if `name` is `ancestor` or inherits from it.
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        self.ancestry(name).iter().any(|t| t.name == ancestor)
    }

    pub fn property(&self, type_name: &str, property: &str) -> Option<&PropertyInfo> {
        self.ancestry(type_name)
            .into_iter()
            .find_map(|t| t.properties.iter().find(|p| p.name == property))
    }

    /// All properties of a type, ancestors first, derived overrides last.
    pub fn properties(&self, type_name: &str) -> Vec<&PropertyInfo> {
        let mut by_name: BTreeMap<&str, &PropertyInfo> = BTreeMap::new();
        for info in self.ancestry(type_name).into_iter().rev() {
            for prop in &info.properties {
                by_name.insert(prop.name.as_str(), prop);
            }
        }
        by_name.into_values().collect()
    }

    /// Default property values for a fresh instance.
    pub fn default_properties(&self, type_name: &str) -> BTreeMap<String, Value> {
        self.properties(type_name)
            .into_iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect()
    }

    pub fn default_value(&self, type_name: &str, property: &str) -> Option<&Value> {
        self.property(type_name, property).map(|p| &p.default)
    }

    pub fn signal(&self, type_name: &str, signal: &str) -> Option<&SignalInfo> {
        self.ancestry(type_name)
            .into_iter()
            .find_map(|t| t.signals.iter().find(|s| s.name == signal))
    }

    pub fn signals(&self, type_name: &str) -> Vec<&SignalInfo> {
        self.ancestry(type_name)
            .into_iter()
            .flat_map(|t| t.signals.iter())
            .collect()
    }

    pub fn method(&self, type_name: &str, method: &str) -> Option<&MethodInfo> {
        self.ancestry(type_name)
            .into_iter()
            .find_map(|t| t.methods.iter().find(|m| m.name == method))
    }

    pub fn methods(&self, type_name: &str) -> Vec<&MethodInfo> {
        self.ancestry(type_name)
            .into_iter()
            .flat_map(|t| t.methods.iter())
            .collect()
    }
}

fn builtin_types() -> Vec<TypeInfo> {
    use ValueKind as K;

    let one2 = Value::Vector2(Vector2::new(1.0, 1.0));
    let zero2 = Value::Vector2(Vector2::ZERO);

    vec![
        TypeInfo::new("Node", None)
            .property("process_mode", Value::Int(0))
            .property("editor_description", Value::String(String::new()))
            .signal("ready", &[])
            .signal("tree_entered", &[])
            .signal("tree_exiting", &[])
            .signal("renamed", &[])
            .signal("child_entered_tree", &["node"])
            .method("get_name", &[], K::String)
            .method("set_name", &[("name", K::String)], K::Nil)
            .method("get_class", &[], K::String)
            .method("is_class", &[("class", K::String)], K::Bool)
            .method("get_path", &[], K::NodePath)
            .method("get_child_count", &[], K::Int)
            .method("get", &[("property", K::String)], K::Nil)
            .method("set", &[("property", K::String), ("value", K::Nil)], K::Nil)
            .method("add_to_group", &[("group", K::String)], K::Nil)
            .method("remove_from_group", &[("group", K::String)], K::Nil)
            .method("is_in_group", &[("group", K::String)], K::Bool)
            .method("queue_free", &[], K::Nil)
            .vararg_method("emit_signal", &[("signal", K::String)], K::Nil),
        TypeInfo::new("CanvasItem", Some("Node"))
            .abstract_type()
            .property("visible", Value::Bool(true))
            .property("modulate", Value::Color(Color::WHITE))
            .property("z_index", Value::Int(0))
            .signal("visibility_changed", &[])
            .signal("draw", &[])
            .method("show", &[], K::Nil)
            .method("hide", &[], K::Nil)
            .method("is_visible", &[], K::Bool),
        TypeInfo::new("Node2D", Some("CanvasItem"))
            .property("position", zero2.clone())
            .property("rotation", Value::Float(0.0))
            .property("scale", one2.clone())
            .method("translate", &[("offset", K::Vector2)], K::Nil)
            .method("rotate", &[("radians", K::Float)], K::Nil)
            .method("get_global_position", &[], K::Vector2),
        TypeInfo::new("Sprite2D", Some("Node2D"))
            .slot("texture", K::Resource)
            .property("centered", Value::Bool(true))
            .property("offset", zero2.clone())
            .property("flip_h", Value::Bool(false))
            .property("flip_v", Value::Bool(false))
            .signal("texture_changed", &[]),
        TypeInfo::new("Camera2D", Some("Node2D"))
            .property("zoom", one2)
            .property("enabled", Value::Bool(true))
            .property("offset", zero2.clone()),
        TypeInfo::new("Area2D", Some("Node2D"))
            .property("monitoring", Value::Bool(true))
            .signal("body_entered", &["body"])
            .signal("area_entered", &["area"]),
        TypeInfo::new("Control", Some("CanvasItem"))
            .property("position", zero2.clone())
            .property("size", zero2)
            .property("tooltip_text", Value::String(String::new()))
            .signal("resized", &[])
            .signal("mouse_entered", &[])
            .signal("mouse_exited", &[])
            .signal("focus_entered", &[])
            .method("get_rect", &[], K::Rect2),
        TypeInfo::new("ColorRect", Some("Control")).property("color", Value::Color(Color::WHITE)),
        TypeInfo::new("Label", Some("Control"))
            .property("text", Value::String(String::new()))
            .property("horizontal_alignment", Value::Int(0)),
        TypeInfo::new("Button", Some("Control"))
            .property("text", Value::String(String::new()))
            .property("disabled", Value::Bool(false))
            .property("toggle_mode", Value::Bool(false))
            .property("button_pressed", Value::Bool(false))
            .signal("pressed", &[])
            .signal("button_down", &[])
            .signal("button_up", &[])
            .signal("toggled", &["toggled_on"])
            .method("press", &[], K::Nil),
        TypeInfo::new("Timer", Some("Node"))
            .property("wait_time", Value::Float(1.0))
            .property("one_shot", Value::Bool(false))
            .property("autostart", Value::Bool(false))
            .signal("timeout", &[])
            .method("start", &[], K::Nil)
            .method("stop", &[], K::Nil)
            .method("is_stopped", &[], K::Bool)
            .method("get_time_left", &[], K::Float),
        TypeInfo::new("AudioStreamPlayer", Some("Node"))
            .slot("stream", K::Resource)
            .property("volume_db", Value::Float(0.0))
            .property("autoplay", Value::Bool(false))
            .signal("finished", &[])
            .method("play", &[], K::Nil)
            .method("stop", &[], K::Nil),
        TypeInfo::new("Node3D", Some("Node"))
            .property("position", Value::Vector3(Vector3::ZERO))
            .property("rotation", Value::Vector3(Vector3::ZERO))
            .property("scale", Value::Vector3(Vector3::new(1.0, 1.0, 1.0)))
            .property("visible", Value::Bool(true))
            .signal("visibility_changed", &[])
            .method("show", &[], K::Nil)
            .method("hide", &[], K::Nil),
        TypeInfo::new("Camera3D", Some("Node3D"))
            .property("fov", Value::Float(75.0))
            .property("current", Value::Bool(false)),
    ]
}
