//! JSON wire codec for [`Value`].
//!
//! Structured kinds are tagged objects (`{"type": "Vector2", "x": 1.0, "y": 2.0}`),
//! primitives map to their JSON counterparts. A JSON object without a `type`
//! key decodes as a dictionary.
//!
//! Decoding is strict: [`decode`] reports the first problem it finds.
//! [`decode_lossy`] never fails and replaces undecodable parts with `Nil`.

use std::collections::BTreeMap;

use serde_json::{json, Map, Number, Value as Json};

use crate::error::DecodeError;
use crate::resource::ResourceResolver;
use crate::value::{
    Basis, Color, Rect2, Transform2D, Transform3D, Value, Vector2, Vector2i, Vector3, Vector3i,
};

/// Encode a value to its wire form. Non-finite floats become `null`.
pub fn encode(value: &Value) -> Json {
    match value {
        Value::Nil => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => float(*f),
        Value::String(s) => Json::String(s.clone()),
        Value::Vector2(v) => json!({"type": "Vector2", "x": float(v.x), "y": float(v.y)}),
        Value::Vector3(v) => {
            json!({"type": "Vector3", "x": float(v.x), "y": float(v.y), "z": float(v.z)})
        }
        Value::Vector2i(v) => json!({"type": "Vector2i", "x": v.x, "y": v.y}),
        Value::Vector3i(v) => json!({"type": "Vector3i", "x": v.x, "y": v.y, "z": v.z}),
        Value::Color(c) => json!({
            "type": "Color",
            "r": float(c.r),
            "g": float(c.g),
            "b": float(c.b),
            "a": float(c.a),
        }),
        Value::Rect2(r) => json!({
            "type": "Rect2",
            "x": float(r.position.x),
            "y": float(r.position.y),
            "width": float(r.size.x),
            "height": float(r.size.y),
        }),
        Value::Transform2D(t) => json!({
            "type": "Transform2D",
            "x": vec2(t.x),
            "y": vec2(t.y),
            "origin": vec2(t.origin),
        }),
        Value::Transform3D(t) => json!({
            "type": "Transform3D",
            "basis": {
                "x": vec3(t.basis.x),
                "y": vec3(t.basis.y),
                "z": vec3(t.basis.z),
            },
            "origin": vec3(t.origin),
        }),
        Value::NodePath(p) => json!({"type": "NodePath", "path": p}),
        Value::Resource(r) => json!({"type": "Resource", "path": r.path, "class": r.class}),
        Value::Object { class } => json!({"type": "Object", "class": class}),
        Value::Array(items) => Json::Array(items.iter().map(encode).collect()),
        Value::Dictionary(entries) => json!({"type": "Dictionary", "entries": encode_map(entries)}),
    }
}

/// Encode a property map as a plain JSON object.
pub fn encode_map(entries: &BTreeMap<String, Value>) -> Map<String, Json> {
    entries.iter().map(|(k, v)| (k.clone(), encode(v))).collect()
}

fn float(f: f64) -> Json {
    Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null)
}

fn vec2(v: Vector2) -> Json {
    json!({"x": float(v.x), "y": float(v.y)})
}

fn vec3(v: Vector3) -> Json {
    json!({"x": float(v.x), "y": float(v.y), "z": float(v.z)})
}

/// Decode a wire value, resolving resource references through `resolver`.
pub fn decode(json: &Json, resolver: &dyn ResourceResolver) -> Result<Value, DecodeError> {
    match json {
        Json::Null => Ok(Value::Nil),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => Ok(number(n)),
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => items
            .iter()
            .map(|item| decode(item, resolver))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Json::Object(obj) => match obj.get("type").and_then(Json::as_str) {
            Some(tag) => decode_tagged(tag, obj, resolver, false),
            None => decode_map(obj, resolver).map(Value::Dictionary),
        },
    }
}

/// Decode a JSON object of named values (property maps, dictionary entries).
pub fn decode_map(
    obj: &Map<String, Json>,
    resolver: &dyn ResourceResolver,
) -> Result<BTreeMap<String, Value>, DecodeError> {
    obj.iter()
        .map(|(k, v)| Ok((k.clone(), decode(v, resolver)?)))
        .collect()
}

/// Decode without failing: undecodable parts become `Nil`.
pub fn decode_lossy(json: &Json, resolver: &dyn ResourceResolver) -> Value {
    match json {
        Json::Array(items) => Value::Array(items.iter().map(|i| decode_lossy(i, resolver)).collect()),
        Json::Object(obj) => match obj.get("type").and_then(Json::as_str) {
            Some(tag) => decode_tagged(tag, obj, resolver, true).unwrap_or(Value::Nil),
            None => Value::Dictionary(lossy_map(obj, resolver)),
        },
        other => decode(other, resolver).unwrap_or(Value::Nil),
    }
}

fn lossy_map(obj: &Map<String, Json>, resolver: &dyn ResourceResolver) -> BTreeMap<String, Value> {
    obj.iter()
        .map(|(k, v)| (k.clone(), decode_lossy(v, resolver)))
        .collect()
}

fn number(n: &Number) -> Value {
    match n.as_i64() {
        Some(i) => Value::Int(i),
        None => Value::Float(n.as_f64().unwrap_or(0.0)),
    }
}

fn decode_tagged(
    tag: &str,
    obj: &Map<String, Json>,
    resolver: &dyn ResourceResolver,
    lossy: bool,
) -> Result<Value, DecodeError> {
    Ok(match tag {
        "Vector2" => Value::Vector2(read_vec2("Vector2", obj)?),
        "Vector3" => Value::Vector3(read_vec3("Vector3", obj)?),
        "Vector2i" => Value::Vector2i(Vector2i::new(
            int_field("Vector2i", obj, "x")?,
            int_field("Vector2i", obj, "y")?,
        )),
        "Vector3i" => Value::Vector3i(Vector3i::new(
            int_field("Vector3i", obj, "x")?,
            int_field("Vector3i", obj, "y")?,
            int_field("Vector3i", obj, "z")?,
        )),
        "Color" => Value::Color(Color::rgba(
            float_field("Color", obj, "r")?,
            float_field("Color", obj, "g")?,
            float_field("Color", obj, "b")?,
            float_field("Color", obj, "a")?,
        )),
        "Rect2" => Value::Rect2(Rect2::new(
            float_field("Rect2", obj, "x")?,
            float_field("Rect2", obj, "y")?,
            float_field("Rect2", obj, "width")?,
            float_field("Rect2", obj, "height")?,
        )),
        "Transform2D" => {
            const KIND: &str = "Transform2D";
            Value::Transform2D(Transform2D {
                x: read_vec2(KIND, part(KIND, obj, "x")?)?,
                y: read_vec2(KIND, part(KIND, obj, "y")?)?,
                origin: read_vec2(KIND, part(KIND, obj, "origin")?)?,
            })
        }
        "Transform3D" => {
            const KIND: &str = "Transform3D";
            let basis = part(KIND, obj, "basis")?;
            Value::Transform3D(Transform3D {
                basis: Basis {
                    x: read_vec3(KIND, part(KIND, basis, "x")?)?,
                    y: read_vec3(KIND, part(KIND, basis, "y")?)?,
                    z: read_vec3(KIND, part(KIND, basis, "z")?)?,
                },
                origin: read_vec3(KIND, part(KIND, obj, "origin")?)?,
            })
        }
        "NodePath" => Value::NodePath(string_field("NodePath", obj, "path")?),
        "Resource" => {
            let path = string_field("Resource", obj, "path")?;
            let class = string_field("Resource", obj, "class")?;
            match resolver.resolve(&path, &class) {
                Some(reference) => Value::Resource(reference),
                None => return Err(DecodeError::Unresolved { path, class }),
            }
        }
        "Object" => Value::Object {
            class: string_field("Object", obj, "class")?,
        },
        "Dictionary" => {
            let entries = match obj.get("entries") {
                None | Some(Json::Null) => Map::new(),
                Some(Json::Object(entries)) => entries.clone(),
                Some(_) => {
                    return Err(DecodeError::InvalidField {
                        kind: "Dictionary",
                        field: "entries".to_string(),
                    })
                }
            };
            if lossy {
                Value::Dictionary(lossy_map(&entries, resolver))
            } else {
                Value::Dictionary(decode_map(&entries, resolver)?)
            }
        }
        other => return Err(DecodeError::UnknownKind(other.to_string())),
    })
}

fn read_vec2(kind: &'static str, obj: &Map<String, Json>) -> Result<Vector2, DecodeError> {
    Ok(Vector2::new(float_field(kind, obj, "x")?, float_field(kind, obj, "y")?))
}

fn read_vec3(kind: &'static str, obj: &Map<String, Json>) -> Result<Vector3, DecodeError> {
    Ok(Vector3::new(
        float_field(kind, obj, "x")?,
        float_field(kind, obj, "y")?,
        float_field(kind, obj, "z")?,
    ))
}

fn part<'a>(
    kind: &'static str,
    obj: &'a Map<String, Json>,
    name: &str,
) -> Result<&'a Map<String, Json>, DecodeError> {
    match obj.get(name) {
        Some(Json::Object(inner)) => Ok(inner),
        None | Some(Json::Null) => Err(DecodeError::PartialTransform {
            kind,
            part: name.to_string(),
        }),
        Some(_) => Err(invalid(kind, name)),
    }
}

fn invalid(kind: &'static str, field: &str) -> DecodeError {
    DecodeError::InvalidField {
        kind,
        field: field.to_string(),
    }
}

fn float_field(kind: &'static str, obj: &Map<String, Json>, name: &str) -> Result<f64, DecodeError> {
    match obj.get(name) {
        None | Some(Json::Null) => Ok(0.0),
        Some(Json::Number(n)) => n.as_f64().ok_or_else(|| invalid(kind, name)),
        Some(_) => Err(invalid(kind, name)),
    }
}

fn int_field(kind: &'static str, obj: &Map<String, Json>, name: &str) -> Result<i64, DecodeError> {
    match obj.get(name) {
        None | Some(Json::Null) => Ok(0),
        Some(Json::Number(n)) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                _ => Err(invalid(kind, name)),
            }
        }
        Some(_) => Err(invalid(kind, name)),
    }
}

fn string_field(kind: &'static str, obj: &Map<String, Json>, name: &str) -> Result<String, DecodeError> {
    match obj.get(name) {
        None | Some(Json::Null) => Ok(String::new()),
        Some(Json::String(s)) => Ok(s.clone()),
        Some(_) => Err(invalid(kind, name)),
    }
}
