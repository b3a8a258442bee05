//! Synthetic input. Events are queued and take effect on the next frame.

use serde_json::{json, Map, Value as Json};

use super::fields;
use crate::input::{InputEvent, MouseButton};
use crate::session_server::dispatcher::{CommandContext, CommandError, CommandResult, Params};

type Fields = CommandResult<Map<String, Json>>;

fn queue(ctx: &mut CommandContext<'_>, event: InputEvent) -> Fields {
    let encoded = serde_json::to_value(&event).unwrap_or(Json::Null);
    ctx.host.queue_input(event);
    Ok(fields(json!({ "queued": true, "event": encoded })))
}

pub(super) fn inject_action(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let action = params.str("action")?;
    if action.is_empty() {
        return Err(CommandError::validation("Parameter 'action' must not be empty"));
    }
    let pressed = params.bool_or("pressed", true)?;
    let strength = params.opt_f64("strength")?.unwrap_or(1.0);
    queue(ctx, InputEvent::action(action, pressed, strength))
}

pub(super) fn inject_key(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let keycode = match params.value("keycode")? {
        Json::String(s) if !s.is_empty() => s.clone(),
        Json::Number(n) => n.to_string(),
        _ => return Err(CommandError::validation("Parameter 'keycode' must be a key name or code")),
    };
    let event = InputEvent::Key {
        keycode,
        pressed: params.bool_or("pressed", true)?,
        shift: params.bool_or("shift", false)?,
        ctrl: params.bool_or("ctrl", false)?,
        alt: params.bool_or("alt", false)?,
    };
    queue(ctx, event)
}

pub(super) fn inject_mouse_click(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let button = match params.get("button") {
        None => Some(MouseButton::Left),
        Some(Json::String(s)) => MouseButton::parse(s),
        Some(Json::Number(n)) => n.as_i64().and_then(MouseButton::from_index),
        Some(_) => None,
    }
    .ok_or_else(|| CommandError::validation("Parameter 'button' must be left, right or middle"))?;

    let event = InputEvent::MouseButton {
        x: params.f64("x")?,
        y: params.f64("y")?,
        button,
        pressed: params.bool_or("pressed", true)?,
        double_click: params.bool_or("doubleClick", false)?,
    };
    queue(ctx, event)
}

pub(super) fn inject_mouse_motion(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let event = InputEvent::motion(
        params.f64("x")?,
        params.f64("y")?,
        params.opt_f64("relativeX")?.unwrap_or(0.0),
        params.opt_f64("relativeY")?.unwrap_or(0.0),
    );
    queue(ctx, event)
}
