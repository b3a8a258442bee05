//! Built-in method implementations that only touch tree state.
//!
//! Methods with runtime state outside the tree (timers, audio) are handled
//! by the host before falling back here.

use crate::error::{EngineError, EngineResult};
use crate::registry::{MethodInfo, TypeRegistry};
use crate::tree::{NodeId, SceneTree};
use crate::value::{Rect2, Value, Vector2};

/// Look up `method` on the node's type and check the argument count.
pub fn check_call<'r>(
    registry: &'r TypeRegistry,
    tree: &SceneTree,
    id: NodeId,
    method: &str,
    args: &[Value],
) -> EngineResult<&'r MethodInfo> {
    let node = tree.node(id)?;
    let info = registry
        .method(&node.type_name, method)
        .ok_or_else(|| EngineError::UnknownMethod {
            type_name: node.type_name.clone(),
            method: method.to_string(),
        })?;
    let expected = info.params.len();
    let ok = if info.vararg {
        args.len() >= expected
    } else {
        args.len() == expected
    };
    if !ok {
        return Err(EngineError::BadArguments {
            method: method.to_string(),
            reason: format!("expects {} argument(s), got {}", expected, args.len()),
        });
    }
    Ok(info)
}

fn string_arg(method: &str, args: &[Value], index: usize) -> EngineResult<String> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| EngineError::BadArguments {
            method: method.to_string(),
            reason: format!("argument {} must be a string", index),
        })
}

fn vector_prop(tree: &SceneTree, id: NodeId, name: &str) -> Vector2 {
    tree.get(id)
        .and_then(|n| n.properties.get(name))
        .and_then(Value::as_vector2)
        .unwrap_or(Vector2::ZERO)
}

impl SceneTree {
    /// Invoke a built-in method on a node.
    pub fn call_method(
        &mut self,
        registry: &TypeRegistry,
        id: NodeId,
        method: &str,
        args: Vec<Value>,
    ) -> EngineResult<Value> {
        check_call(registry, self, id, method, &args)?;
        let type_name = self.node(id)?.type_name.clone();

        match method {
            "get_name" => Ok(Value::String(self.node(id)?.name.clone())),
            "set_name" => {
                let name = string_arg(method, &args, 0)?;
                if self.node(id)?.name != name {
                    self.rename(id, &name)?;
                    self.emit_signal(registry, id, "renamed", Vec::new())?;
                }
                Ok(Value::Nil)
            }
            "get_class" => Ok(Value::String(type_name)),
            "is_class" => {
                let class = string_arg(method, &args, 0)?;
                Ok(Value::Bool(registry.is_a(&type_name, &class)))
            }
            "get_path" => Ok(Value::NodePath(self.address_of(id)?)),
            "get_child_count" => Ok(Value::Int(self.node(id)?.children().len() as i64)),
            "get" => {
                let name = string_arg(method, &args, 0)?;
                Ok(self.get_property(id, &name)?.cloned().unwrap_or(Value::Nil))
            }
            "set" => {
                let name = string_arg(method, &args, 0)?;
                let value = args.into_iter().nth(1).unwrap_or(Value::Nil);
                self.set_property(registry, id, &name, value)?;
                Ok(Value::Nil)
            }
            "add_to_group" => {
                let group = string_arg(method, &args, 0)?;
                if let Some(node) = self.get_mut(id) {
                    node.add_group(&group);
                }
                Ok(Value::Nil)
            }
            "remove_from_group" => {
                let group = string_arg(method, &args, 0)?;
                if let Some(node) = self.get_mut(id) {
                    node.remove_group(&group);
                }
                Ok(Value::Nil)
            }
            "is_in_group" => {
                let group = string_arg(method, &args, 0)?;
                Ok(Value::Bool(self.node(id)?.in_group(&group)))
            }
            "queue_free" => {
                self.queue_free(id)?;
                Ok(Value::Nil)
            }
            "emit_signal" => {
                let signal = string_arg(method, &args, 0)?;
                let rest = args.into_iter().skip(1).collect();
                self.emit_signal(registry, id, &signal, rest)?;
                Ok(Value::Nil)
            }
            "show" | "hide" => {
                let visible = method == "show";
                let old = self.set_property(registry, id, "visible", Value::Bool(visible))?;
                if old != Some(Value::Bool(visible)) {
                    self.emit_signal(registry, id, "visibility_changed", vec![])?;
                }
                Ok(Value::Nil)
            }
            "is_visible" => Ok(self
                .get_property(id, "visible")?
                .cloned()
                .unwrap_or(Value::Bool(true))),
            "translate" => {
                let offset = args
                    .first()
                    .and_then(Value::as_vector2)
                    .ok_or_else(|| EngineError::BadArguments {
                        method: method.to_string(),
                        reason: "argument 0 must be a Vector2".to_string(),
                    })?;
                let pos = vector_prop(self, id, "position");
                let moved = Vector2::new(pos.x + offset.x, pos.y + offset.y);
                self.set_property(registry, id, "position", Value::Vector2(moved))?;
                Ok(Value::Nil)
            }
            "rotate" => {
                let radians = args
                    .first()
                    .and_then(Value::as_f64)
                    .ok_or_else(|| EngineError::BadArguments {
                        method: method.to_string(),
                        reason: "argument 0 must be a number".to_string(),
                    })?;
                let current = self
                    .get_property(id, "rotation")?
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                self.set_property(registry, id, "rotation", Value::Float(current + radians))?;
                Ok(Value::Nil)
            }
            "get_global_position" => Ok(Value::Vector2(self.global_position(registry, id))),
            "get_rect" => {
                let pos = vector_prop(self, id, "position");
                let size = vector_prop(self, id, "size");
                Ok(Value::Rect2(Rect2::new(pos.x, pos.y, size.x, size.y)))
            }
            "press" => {
                self.press_button(registry, id)?;
                Ok(Value::Nil)
            }
            other => Err(EngineError::UnknownMethod {
                type_name,
                method: other.to_string(),
            }),
        }
    }

    /// Sum of `position` offsets along the canvas ancestry of `id`.
    /// Rotation and scale are not applied.
    pub fn global_position(&self, registry: &TypeRegistry, id: NodeId) -> Vector2 {
        let mut total = Vector2::ZERO;
        let mut current = Some(id);
        while let Some(nid) = current {
            let Some(node) = self.get(nid) else { break };
            if registry.is_a(&node.type_name, "CanvasItem") {
                let p = vector_prop(self, nid, "position");
                total.x += p.x;
                total.y += p.y;
            }
            current = node.parent();
        }
        total
    }

    /// Simulate a click on a button: emits `button_down`, `button_up`,
    /// `pressed` and, in toggle mode, flips `button_pressed` and emits
    /// `toggled`. Disabled buttons ignore the press.
    pub fn press_button(&mut self, registry: &TypeRegistry, id: NodeId) -> EngineResult<bool> {
        let node = self.node(id)?;
        if node.properties.get("disabled") == Some(&Value::Bool(true)) {
            return Ok(false);
        }
        let toggle = node.properties.get("toggle_mode") == Some(&Value::Bool(true));
        self.emit_signal(registry, id, "button_down", vec![])?;
        self.emit_signal(registry, id, "button_up", vec![])?;
        if toggle {
            let was = self.get_property(id, "button_pressed")?.and_then(Value::as_bool).unwrap_or(false);
            self.set_property(registry, id, "button_pressed", Value::Bool(!was))?;
            self.emit_signal(registry, id, "toggled", vec![Value::Bool(!was)])?;
        }
        self.emit_signal(registry, id, "pressed", vec![])?;
        Ok(true)
    }
}
