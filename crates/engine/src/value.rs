//! Structured value model.
//!
//! `Value` is the single currency for node properties, method arguments and
//! signal payloads. Every variant has a wire form (see `codec`) and a text
//! literal form (see the io crate's scene format).

use std::collections::BTreeMap;
use std::fmt;

/// 2D float vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 3D float vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// 2D integer vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Vector2i {
    pub x: i64,
    pub y: i64,
}

impl Vector2i {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// 3D integer vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Vector3i {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl Vector3i {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }
}

/// RGBA color, components nominally in 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Color {
    pub const WHITE: Self = Self::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);

    pub const fn rgba(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    /// Convert to 8-bit RGBA, clamping out-of-range components.
    pub fn to_rgba8(&self) -> [u8; 4] {
        fn channel(v: f64) -> u8 {
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        [channel(self.r), channel(self.g), channel(self.b), channel(self.a)]
    }

    /// Component-wise product (used for modulate chains).
    pub fn multiply(&self, other: &Color) -> Color {
        Color::rgba(self.r * other.r, self.g * other.g, self.b * other.b, self.a * other.a)
    }
}

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect2 {
    pub position: Vector2,
    pub size: Vector2,
}

impl Rect2 {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            position: Vector2::new(x, y),
            size: Vector2::new(width, height),
        }
    }

    pub fn contains(&self, point: Vector2) -> bool {
        point.x >= self.position.x
            && point.y >= self.position.y
            && point.x < self.position.x + self.size.x
            && point.y < self.position.y + self.size.y
    }
}

/// 2D affine transform: two basis columns plus an origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    pub x: Vector2,
    pub y: Vector2,
    pub origin: Vector2,
}

impl Transform2D {
    pub const IDENTITY: Self = Self {
        x: Vector2::new(1.0, 0.0),
        y: Vector2::new(0.0, 1.0),
        origin: Vector2::ZERO,
    };

    pub fn xform(&self, v: Vector2) -> Vector2 {
        Vector2::new(
            self.x.x * v.x + self.y.x * v.y + self.origin.x,
            self.x.y * v.x + self.y.y * v.y + self.origin.y,
        )
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// 3x3 basis stored as three column vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    pub x: Vector3,
    pub y: Vector3,
    pub z: Vector3,
}

impl Basis {
    pub const IDENTITY: Self = Self {
        x: Vector3::new(1.0, 0.0, 0.0),
        y: Vector3::new(0.0, 1.0, 0.0),
        z: Vector3::new(0.0, 0.0, 1.0),
    };
}

impl Default for Basis {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// 3D affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform3D {
    pub basis: Basis,
    pub origin: Vector3,
}

impl Transform3D {
    pub const IDENTITY: Self = Self {
        basis: Basis::IDENTITY,
        origin: Vector3::ZERO,
    };
}

/// Reference to a typed resource by locator, e.g. `res://icon.png` of
/// class `Texture2D`. Resolution happens at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub path: String,
    pub class: String,
}

impl ResourceRef {
    pub fn new(path: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            class: class.into(),
        }
    }
}

/// Discriminant of a [`Value`], used for property type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Nil,
    Bool,
    Int,
    Float,
    String,
    Vector2,
    Vector3,
    Vector2i,
    Vector3i,
    Color,
    Rect2,
    Transform2D,
    Transform3D,
    NodePath,
    Resource,
    Object,
    Array,
    Dictionary,
}

impl ValueKind {
    /// Wire tag / type name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nil => "Nil",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "String",
            Self::Vector2 => "Vector2",
            Self::Vector3 => "Vector3",
            Self::Vector2i => "Vector2i",
            Self::Vector3i => "Vector3i",
            Self::Color => "Color",
            Self::Rect2 => "Rect2",
            Self::Transform2D => "Transform2D",
            Self::Transform3D => "Transform3D",
            Self::NodePath => "NodePath",
            Self::Resource => "Resource",
            Self::Object => "Object",
            Self::Array => "Array",
            Self::Dictionary => "Dictionary",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A structured, wire-safe value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector2(Vector2),
    Vector3(Vector3),
    Vector2i(Vector2i),
    Vector3i(Vector3i),
    Color(Color),
    Rect2(Rect2),
    Transform2D(Transform2D),
    Transform3D(Transform3D),
    NodePath(String),
    Resource(ResourceRef),
    /// Opaque marker for objects the codec cannot serialize; carries only
    /// the class name.
    Object { class: String },
    Array(Vec<Value>),
    Dictionary(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Vector2(_) => ValueKind::Vector2,
            Value::Vector3(_) => ValueKind::Vector3,
            Value::Vector2i(_) => ValueKind::Vector2i,
            Value::Vector3i(_) => ValueKind::Vector3i,
            Value::Color(_) => ValueKind::Color,
            Value::Rect2(_) => ValueKind::Rect2,
            Value::Transform2D(_) => ValueKind::Transform2D,
            Value::Transform3D(_) => ValueKind::Transform3D,
            Value::NodePath(_) => ValueKind::NodePath,
            Value::Resource(_) => ValueKind::Resource,
            Value::Object { .. } => ValueKind::Object,
            Value::Array(_) => ValueKind::Array,
            Value::Dictionary(_) => ValueKind::Dictionary,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view; ints widen to float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::NodePath(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vector2(&self) -> Option<Vector2> {
        match self {
            Value::Vector2(v) => Some(*v),
            Value::Vector2i(v) => Some(Vector2::new(v.x as f64, v.y as f64)),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Color> {
        match self {
            Value::Color(c) => Some(*c),
            _ => None,
        }
    }

    /// Coerce `self` so it can be stored where `expected` is the declared
    /// kind. Returns `None` if the kinds are incompatible.
    ///
    /// `Nil` is accepted for object-like kinds (resources, paths, objects)
    /// and an int is widened when a float is expected.
    pub fn coerce_to(self, expected: ValueKind) -> Option<Value> {
        let actual = self.kind();
        if actual == expected {
            return Some(self);
        }
        match (self, expected) {
            (Value::Int(i), ValueKind::Float) => Some(Value::Float(i as f64)),
            (Value::Nil, ValueKind::Resource | ValueKind::Object | ValueKind::NodePath) => Some(Value::Nil),
            (Value::String(s), ValueKind::NodePath) => Some(Value::NodePath(s)),
            (v, ValueKind::Nil) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vector2> for Value {
    fn from(v: Vector2) -> Self {
        Value::Vector2(v)
    }
}

impl From<Vector3> for Value {
    fn from(v: Vector3) -> Self {
        Value::Vector3(v)
    }
}

impl From<Color> for Value {
    fn from(v: Color) -> Self {
        Value::Color(v)
    }
}

impl From<Rect2> for Value {
    fn from(v: Rect2) -> Self {
        Value::Rect2(v)
    }
}
