//! Scene text format.
//!
//! A scene file is a list of bracketed sections, each optionally followed
//! by `key = value` property lines:
//!
//! ```text
//! [gd_scene load_steps=2 format=3]
//!
//! [ext_resource type="Texture2D" path="res://icon.png" id="1"]
//!
//! [node name="Main" type="Node2D"]
//! position = Vector2(16.0, 8.0)
//!
//! [node name="Sprite" type="Sprite2D" parent="." groups=["actors"]]
//! texture = ExtResource("1")
//!
//! [connection signal="timeout" from="Timer" to="." method="_on_timeout"]
//! ```
//!
//! Values use constructor literals. Floats are always written with a
//! decimal point or exponent so that ints and floats survive a round trip.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use scenewire_engine::path::is_key_char;
use scenewire_engine::value::{
    Basis, Color, Rect2, ResourceRef, Transform2D, Transform3D, Value, Vector2, Vector2i, Vector3,
    Vector3i,
};
use thiserror::Error;

/// Current scene format number written in the header.
pub const SCENE_FORMAT: i64 = 3;

/// Parse failure with the 1-based line it occurred on.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

/// An external resource declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtResource {
    pub id: String,
    pub class: String,
    pub path: String,
}

/// A `[node]` section and its property lines.
#[derive(Debug, Clone)]
pub struct NodeSection {
    pub name: String,
    pub type_name: String,
    /// Address of the parent relative to the root; `None` for the root.
    pub parent: Option<String>,
    pub groups: Vec<String>,
    pub properties: Vec<(String, Value)>,
    /// Line of the section header, 0 when not parsed from text.
    pub line: usize,
}

// Source position is not content.
impl PartialEq for NodeSection {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.type_name == other.type_name
            && self.parent == other.parent
            && self.groups == other.groups
            && self.properties == other.properties
    }
}

/// A `[connection]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSection {
    pub signal: String,
    pub from: String,
    pub to: String,
    pub method: String,
    pub flags: u32,
}

/// Parsed form of a scene file.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneDocument {
    pub format: i64,
    pub ext_resources: Vec<ExtResource>,
    pub nodes: Vec<NodeSection>,
    pub connections: Vec<ConnectionSection>,
}

impl Default for SceneDocument {
    fn default() -> Self {
        Self {
            format: SCENE_FORMAT,
            ext_resources: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse a scene file.
pub fn parse(text: &str) -> Result<SceneDocument, ParseError> {
    let mut p = Parser::new(text);
    let mut doc = SceneDocument::default();
    let mut saw_header = false;
    // Where property lines currently go.
    enum Target {
        None,
        Node(usize),
        Skip,
    }
    let mut target = Target::None;

    loop {
        p.skip_blank();
        let Some(c) = p.peek() else { break };
        if c == '[' {
            let line = p.line;
            let (tag, attrs) = p.section_header()?;
            let err = |message: String| ParseError { line, message };
            match tag.as_str() {
                "gd_scene" => {
                    if saw_header {
                        return Err(err("duplicate gd_scene header".into()));
                    }
                    saw_header = true;
                    if let Some(Value::Int(f)) = attrs.get("format") {
                        doc.format = *f;
                    }
                    target = Target::None;
                }
                "ext_resource" => {
                    let id = match attrs.get("id") {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Int(i)) => i.to_string(),
                        _ => return Err(err("ext_resource is missing id".into())),
                    };
                    doc.ext_resources.push(ExtResource {
                        id,
                        class: str_attr(&attrs, "type").unwrap_or_default(),
                        path: str_attr(&attrs, "path")
                            .ok_or_else(|| err("ext_resource is missing path".into()))?,
                    });
                    p.ext_resources = doc.ext_resources.clone();
                    target = Target::None;
                }
                "node" => {
                    let name = str_attr(&attrs, "name").ok_or_else(|| err("node is missing name".into()))?;
                    let type_name =
                        str_attr(&attrs, "type").ok_or_else(|| err(format!("node '{}' is missing type", name)))?;
                    let parent = str_attr(&attrs, "parent");
                    if doc.nodes.is_empty() && parent.is_some() {
                        return Err(err("first node must be the root (no parent)".into()));
                    }
                    if !doc.nodes.is_empty() && parent.is_none() {
                        return Err(err(format!("node '{}' has no parent", name)));
                    }
                    let groups = match attrs.get("groups") {
                        None => Vec::new(),
                        Some(Value::Array(items)) => items
                            .iter()
                            .map(|g| g.as_str().map(str::to_string))
                            .collect::<Option<Vec<_>>>()
                            .ok_or_else(|| err("groups must be strings".into()))?,
                        Some(_) => return Err(err("groups must be an array".into())),
                    };
                    doc.nodes.push(NodeSection {
                        name,
                        type_name,
                        parent,
                        groups,
                        properties: Vec::new(),
                        line,
                    });
                    target = Target::Node(doc.nodes.len() - 1);
                }
                "connection" => {
                    let field = |key: &str| {
                        str_attr(&attrs, key).ok_or_else(|| err(format!("connection is missing {}", key)))
                    };
                    let flags = match attrs.get("flags") {
                        None => 0,
                        Some(Value::Int(f)) if *f >= 0 => *f as u32,
                        Some(_) => return Err(err("connection flags must be a non-negative int".into())),
                    };
                    doc.connections.push(ConnectionSection {
                        signal: field("signal")?,
                        from: field("from")?,
                        to: field("to")?,
                        method: field("method")?,
                        flags,
                    });
                    target = Target::None;
                }
                other => {
                    log::warn!("skipping unsupported section [{}] at line {}", other, line);
                    target = Target::Skip;
                }
            }
        } else {
            let line = p.line;
            let (key, value) = p.property()?;
            match target {
                Target::Node(index) => doc.nodes[index].properties.push((key, value)),
                Target::Skip => {}
                Target::None => {
                    return Err(ParseError {
                        line,
                        message: format!("property '{}' outside of a node section", key),
                    })
                }
            }
        }
    }

    if doc.nodes.is_empty() {
        return Err(ParseError {
            line: p.line,
            message: "scene has no nodes".into(),
        });
    }
    Ok(doc)
}

/// Parse a single value literal.
pub fn parse_value(text: &str) -> Result<Value, ParseError> {
    let mut p = Parser::new(text);
    p.skip_ws();
    let value = p.value()?;
    p.skip_ws();
    if p.peek().is_some() {
        return Err(p.error("trailing characters after value"));
    }
    Ok(value)
}

fn str_attr(attrs: &BTreeMap<String, Value>, key: &str) -> Option<String> {
    match attrs.get(key) {
        Some(Value::String(s)) | Some(Value::NodePath(s)) => Some(s.clone()),
        _ => None,
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    ext_resources: Vec<ExtResource>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            ext_resources: Vec::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn expect(&mut self, want: char) -> Result<(), ParseError> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", want, c))),
            None => Err(self.error(format!("expected '{}', found end of file", want))),
        }
    }

    /// Skip whitespace, newlines and `;` comment lines.
    fn skip_blank(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == ';' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Skip spaces and tabs only.
    fn skip_inline(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t') | Some('\r')) {
            self.bump();
        }
    }

    /// Skip all whitespace including newlines (inside brackets).
    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_key_char(c)) {
            self.bump();
        }
        if self.pos == start {
            return Err(self.error("expected identifier"));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn section_header(&mut self) -> Result<(String, BTreeMap<String, Value>), ParseError> {
        self.expect('[')?;
        let tag = self.ident()?;
        let mut attrs = BTreeMap::new();
        loop {
            self.skip_inline();
            match self.peek() {
                Some(']') => {
                    self.bump();
                    break;
                }
                Some('\n') | None => return Err(self.error(format!("unterminated [{}] header", tag))),
                _ => {
                    let key = self.ident()?;
                    self.skip_inline();
                    self.expect('=')?;
                    self.skip_inline();
                    let value = self.value()?;
                    attrs.insert(key, value);
                }
            }
        }
        self.end_of_line()?;
        Ok((tag, attrs))
    }

    fn property(&mut self) -> Result<(String, Value), ParseError> {
        let key = self.ident()?;
        self.skip_inline();
        self.expect('=')?;
        self.skip_inline();
        let value = self.value()?;
        self.end_of_line()?;
        Ok((key, value))
    }

    fn end_of_line(&mut self) -> Result<(), ParseError> {
        self.skip_inline();
        match self.peek() {
            None => Ok(()),
            Some('\n') => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("unexpected '{}' at end of line", c))),
        }
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        match self.peek() {
            None => Err(self.error("expected value, found end of file")),
            Some('"') => Ok(Value::String(self.string()?)),
            Some('[') => {
                self.bump();
                let items = self.list(']')?;
                Ok(Value::Array(items))
            }
            Some('{') => self.dictionary(),
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_alphabetic() => {
                let word = self.word();
                match word.as_str() {
                    "null" => Ok(Value::Nil),
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "nan" => Ok(Value::Float(f64::NAN)),
                    "inf" => Ok(Value::Float(f64::INFINITY)),
                    _ => self.constructor(&word),
                }
            }
            Some(c) => Err(self.error(format!("unexpected '{}'", c))),
        }
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn string(&mut self) -> Result<String, ParseError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(c) => return Err(self.error(format!("invalid escape '\\{}'", c))),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        if self.peek().map(|c| c.is_alphabetic()).unwrap_or(false) {
            let word = self.word();
            let negative = self.src[start..].starts_with('-');
            return match word.as_str() {
                "inf" if negative => Ok(Value::Float(f64::NEG_INFINITY)),
                "inf" => Ok(Value::Float(f64::INFINITY)),
                "nan" => Ok(Value::Float(f64::NAN)),
                _ => Err(self.error(format!("invalid number '{}'", &self.src[start..self.pos]))),
            };
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else if c == '.' || c == 'e' || c == 'E' {
                is_float = true;
                self.bump();
                if (c == 'e' || c == 'E') && matches!(self.peek(), Some('-') | Some('+')) {
                    self.bump();
                }
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(Value::Float)
                .map_err(|_| self.error(format!("invalid float '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(Value::Int)
                .map_err(|_| self.error(format!("invalid integer '{}'", text)))
        }
    }

    /// Comma-separated values up to `close` (already past the opener).
    fn list(&mut self, close: char) -> Result<Vec<Value>, ParseError> {
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(close) {
            self.bump();
            return Ok(items);
        }
        loop {
            self.skip_ws();
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => {
                    self.skip_ws();
                    if self.peek() == Some(close) {
                        self.bump();
                        return Ok(items);
                    }
                }
                Some(c) if c == close => return Ok(items),
                Some(c) => return Err(self.error(format!("expected ',' or '{}', found '{}'", close, c))),
                None => return Err(self.error(format!("expected '{}', found end of file", close))),
            }
        }
    }

    fn dictionary(&mut self) -> Result<Value, ParseError> {
        self.expect('{')?;
        let mut map = BTreeMap::new();
        self.skip_ws();
        if self.peek() == Some('}') {
            self.bump();
            return Ok(Value::Dictionary(map));
        }
        loop {
            self.skip_ws();
            let key = self.string()?;
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.bump() {
                Some(',') => {
                    self.skip_ws();
                    if self.peek() == Some('}') {
                        self.bump();
                        return Ok(Value::Dictionary(map));
                    }
                }
                Some('}') => return Ok(Value::Dictionary(map)),
                _ => return Err(self.error("expected ',' or '}' in dictionary")),
            }
        }
    }

    fn constructor(&mut self, name: &str) -> Result<Value, ParseError> {
        self.skip_inline();
        self.expect('(')?;
        let args = self.list(')')?;
        let value = match name {
            "Vector2" => {
                let [x, y] = self.floats::<2>(name, &args)?;
                Value::Vector2(Vector2::new(x, y))
            }
            "Vector3" => {
                let [x, y, z] = self.floats::<3>(name, &args)?;
                Value::Vector3(Vector3::new(x, y, z))
            }
            "Vector2i" => {
                let [x, y] = self.ints::<2>(name, &args)?;
                Value::Vector2i(Vector2i::new(x, y))
            }
            "Vector3i" => {
                let [x, y, z] = self.ints::<3>(name, &args)?;
                Value::Vector3i(Vector3i::new(x, y, z))
            }
            "Color" => {
                let c = match args.len() {
                    3 => {
                        let [r, g, b] = self.floats::<3>(name, &args)?;
                        Color::rgba(r, g, b, 1.0)
                    }
                    _ => {
                        let [r, g, b, a] = self.floats::<4>(name, &args)?;
                        Color::rgba(r, g, b, a)
                    }
                };
                Value::Color(c)
            }
            "Rect2" => {
                let [x, y, w, h] = self.floats::<4>(name, &args)?;
                Value::Rect2(Rect2::new(x, y, w, h))
            }
            "Transform2D" => {
                let [xx, xy, yx, yy, ox, oy] = self.floats::<6>(name, &args)?;
                Value::Transform2D(Transform2D {
                    x: Vector2::new(xx, xy),
                    y: Vector2::new(yx, yy),
                    origin: Vector2::new(ox, oy),
                })
            }
            "Transform3D" => {
                let f = self.floats::<12>(name, &args)?;
                Value::Transform3D(Transform3D {
                    basis: Basis {
                        x: Vector3::new(f[0], f[1], f[2]),
                        y: Vector3::new(f[3], f[4], f[5]),
                        z: Vector3::new(f[6], f[7], f[8]),
                    },
                    origin: Vector3::new(f[9], f[10], f[11]),
                })
            }
            "NodePath" => Value::NodePath(self.strings::<1>(name, &args)?[0].clone()),
            "Object" => Value::Object {
                class: self.strings::<1>(name, &args)?[0].clone(),
            },
            "Resource" => {
                let [path, class] = self.strings::<2>(name, &args)?;
                Value::Resource(ResourceRef::new(path, class))
            }
            "ExtResource" => {
                let id = match args.as_slice() {
                    [Value::String(s)] => s.clone(),
                    [Value::Int(i)] => i.to_string(),
                    _ => return Err(self.error("ExtResource expects one id")),
                };
                let ext = self
                    .ext_resources
                    .iter()
                    .find(|e| e.id == id)
                    .ok_or_else(|| self.error(format!("unknown ext_resource id '{}'", id)))?;
                Value::Resource(ResourceRef::new(ext.path.clone(), ext.class.clone()))
            }
            other => return Err(self.error(format!("unknown constructor '{}'", other))),
        };
        Ok(value)
    }

    fn floats<const N: usize>(&self, name: &str, args: &[Value]) -> Result<[f64; N], ParseError> {
        if args.len() != N {
            return Err(self.error(format!("{} expects {} arguments, got {}", name, N, args.len())));
        }
        let mut out = [0.0; N];
        for (slot, arg) in out.iter_mut().zip(args) {
            *slot = arg
                .as_f64()
                .ok_or_else(|| self.error(format!("{} arguments must be numbers", name)))?;
        }
        Ok(out)
    }

    fn ints<const N: usize>(&self, name: &str, args: &[Value]) -> Result<[i64; N], ParseError> {
        if args.len() != N {
            return Err(self.error(format!("{} expects {} arguments, got {}", name, N, args.len())));
        }
        let mut out = [0; N];
        for (slot, arg) in out.iter_mut().zip(args) {
            *slot = arg
                .as_i64()
                .ok_or_else(|| self.error(format!("{} arguments must be integers", name)))?;
        }
        Ok(out)
    }

    fn strings<const N: usize>(&self, name: &str, args: &[Value]) -> Result<[String; N], ParseError> {
        if args.len() != N {
            return Err(self.error(format!("{} expects {} arguments, got {}", name, N, args.len())));
        }
        let mut out: [String; N] = std::array::from_fn(|_| String::new());
        for (slot, arg) in out.iter_mut().zip(args) {
            *slot = match arg {
                Value::String(s) => s.clone(),
                _ => return Err(self.error(format!("{} arguments must be strings", name))),
            };
        }
        Ok(out)
    }
}

// =============================================================================
// Writing
// =============================================================================

/// Render a document as scene text.
pub fn write(doc: &SceneDocument) -> String {
    let mut out = String::new();
    let steps = doc.ext_resources.len() + 1;
    if steps > 1 {
        let _ = writeln!(out, "[gd_scene load_steps={} format={}]", steps, doc.format);
    } else {
        let _ = writeln!(out, "[gd_scene format={}]", doc.format);
    }

    for ext in &doc.ext_resources {
        let _ = write!(
            out,
            "\n[ext_resource type={} path={} id={}]\n",
            quote(&ext.class),
            quote(&ext.path),
            quote(&ext.id)
        );
    }

    let ids: BTreeMap<&str, &str> = doc
        .ext_resources
        .iter()
        .map(|e| (e.path.as_str(), e.id.as_str()))
        .collect();

    for node in &doc.nodes {
        let _ = write!(out, "\n[node name={} type={}", quote(&node.name), quote(&node.type_name));
        if let Some(parent) = &node.parent {
            let _ = write!(out, " parent={}", quote(parent));
        }
        if !node.groups.is_empty() {
            let groups: Vec<String> = node.groups.iter().map(|g| quote(g)).collect();
            let _ = write!(out, " groups=[{}]", groups.join(", "));
        }
        out.push_str("]\n");
        for (key, value) in &node.properties {
            let _ = writeln!(out, "{} = {}", key, format_value_with(value, &ids));
        }
    }

    if !doc.connections.is_empty() {
        out.push('\n');
    }
    for conn in &doc.connections {
        let _ = write!(
            out,
            "[connection signal={} from={} to={} method={}",
            quote(&conn.signal),
            quote(&conn.from),
            quote(&conn.to),
            quote(&conn.method)
        );
        if conn.flags != 0 {
            let _ = write!(out, " flags={}", conn.flags);
        }
        out.push_str("]\n");
    }
    out
}

/// Format a value literal. Resources are written inline.
pub fn format_value(value: &Value) -> String {
    format_value_with(value, &BTreeMap::new())
}

fn format_value_with(value: &Value, ext_ids: &BTreeMap<&str, &str>) -> String {
    match value {
        Value::Nil => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float(*f),
        Value::String(s) => quote(s),
        Value::Vector2(v) => format!("Vector2({}, {})", float(v.x), float(v.y)),
        Value::Vector3(v) => format!("Vector3({}, {}, {})", float(v.x), float(v.y), float(v.z)),
        Value::Vector2i(v) => format!("Vector2i({}, {})", v.x, v.y),
        Value::Vector3i(v) => format!("Vector3i({}, {}, {})", v.x, v.y, v.z),
        Value::Color(c) => format!("Color({}, {}, {}, {})", float(c.r), float(c.g), float(c.b), float(c.a)),
        Value::Rect2(r) => format!(
            "Rect2({}, {}, {}, {})",
            float(r.position.x),
            float(r.position.y),
            float(r.size.x),
            float(r.size.y)
        ),
        Value::Transform2D(t) => format!(
            "Transform2D({}, {}, {}, {}, {}, {})",
            float(t.x.x),
            float(t.x.y),
            float(t.y.x),
            float(t.y.y),
            float(t.origin.x),
            float(t.origin.y)
        ),
        Value::Transform3D(t) => {
            let parts: Vec<String> = [t.basis.x, t.basis.y, t.basis.z, t.origin]
                .iter()
                .flat_map(|v| [float(v.x), float(v.y), float(v.z)])
                .collect();
            format!("Transform3D({})", parts.join(", "))
        }
        Value::NodePath(p) => format!("NodePath({})", quote(p)),
        Value::Resource(r) => match ext_ids.get(r.path.as_str()) {
            Some(id) => format!("ExtResource({})", quote(id)),
            None => format!("Resource({}, {})", quote(&r.path), quote(&r.class)),
        },
        Value::Object { class } => format!("Object({})", quote(class)),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(|v| format_value_with(v, ext_ids)).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Dictionary(map) => {
            if map.is_empty() {
                return "{}".to_string();
            }
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", quote(k), format_value_with(v, ext_ids)))
                .collect();
            format!("{{ {} }}", parts.join(", "))
        }
    }
}

fn float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    // Debug keeps a '.' or exponent and round-trips exactly.
    format!("{:?}", f)
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
