//! Synthetic input events.
//!
//! Controllers build these with the `inject_*` commands; the host queues
//! them and consumes the queue at the start of the next frame.

use serde::{Deserialize, Serialize};

/// Pointer button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Accepts `left`/`right`/`middle` or the button index 1/2/3.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left" | "1" => Some(MouseButton::Left),
            "right" | "2" => Some(MouseButton::Right),
            "middle" | "3" => Some(MouseButton::Middle),
            _ => None,
        }
    }

    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            1 => Some(MouseButton::Left),
            2 => Some(MouseButton::Right),
            3 => Some(MouseButton::Middle),
            _ => None,
        }
    }
}

/// One synthetic input event, serialized as `{"type": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    Action {
        action: String,
        pressed: bool,
        strength: f64,
    },
    Key {
        keycode: String,
        pressed: bool,
        shift: bool,
        ctrl: bool,
        alt: bool,
    },
    MouseButton {
        x: f64,
        y: f64,
        button: MouseButton,
        pressed: bool,
        #[serde(rename = "doubleClick")]
        double_click: bool,
    },
    MouseMotion {
        x: f64,
        y: f64,
        #[serde(rename = "relativeX")]
        relative_x: f64,
        #[serde(rename = "relativeY")]
        relative_y: f64,
    },
}

impl InputEvent {
    pub fn action(action: impl Into<String>, pressed: bool, strength: f64) -> Self {
        InputEvent::Action {
            action: action.into(),
            pressed,
            strength: strength.clamp(0.0, 1.0),
        }
    }

    pub fn key(keycode: impl Into<String>, pressed: bool) -> Self {
        InputEvent::Key {
            keycode: keycode.into(),
            pressed,
            shift: false,
            ctrl: false,
            alt: false,
        }
    }

    pub fn click(x: f64, y: f64, button: MouseButton, pressed: bool) -> Self {
        InputEvent::MouseButton {
            x,
            y,
            button,
            pressed,
            double_click: false,
        }
    }

    pub fn motion(x: f64, y: f64, relative_x: f64, relative_y: f64) -> Self {
        InputEvent::MouseMotion {
            x,
            y,
            relative_x,
            relative_y,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InputEvent::Action { .. } => "action",
            InputEvent::Key { .. } => "key",
            InputEvent::MouseButton { .. } => "mouse_button",
            InputEvent::MouseMotion { .. } => "mouse_motion",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_wire_shape() {
        let event = InputEvent::action("jump", true, 2.0);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "action", "action": "jump", "pressed": true, "strength": 1.0})
        );
    }

    #[test]
    fn test_mouse_fields_are_camel_case() {
        let event = InputEvent::MouseButton {
            x: 4.0,
            y: 8.0,
            button: MouseButton::Right,
            pressed: false,
            double_click: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "mouse_button");
        assert_eq!(json["button"], "right");
        assert_eq!(json["doubleClick"], true);

        let motion = serde_json::to_value(InputEvent::motion(1.0, 2.0, -3.0, 0.5)).unwrap();
        assert_eq!(motion["relativeX"], -3.0);
    }

    #[test]
    fn test_button_parse() {
        assert_eq!(MouseButton::parse("LEFT"), Some(MouseButton::Left));
        assert_eq!(MouseButton::parse("3"), Some(MouseButton::Middle));
        assert_eq!(MouseButton::parse("wheel"), None);
        assert_eq!(MouseButton::from_index(2), Some(MouseButton::Right));
        assert_eq!(MouseButton::from_index(9), None);
    }
}
