//! Command handlers and the command table.

mod capture;
mod input;
mod live;
mod scene;
mod signals;

use serde_json::{Map, Value as Json};

use super::dispatcher::{CommandKind, CommandSpec};

use CommandKind::{Live, Scene};

/// Every command the session server understands.
pub static COMMANDS: &[CommandSpec] = &[
    // Live tree
    CommandSpec { name: "ping", required: &[], optional: &[], response_type: "pong", kind: Live, handler: live::ping },
    CommandSpec {
        name: "get_tree",
        required: &[],
        optional: &["rootAddress", "depth", "includeProperties"],
        response_type: "tree",
        kind: Live,
        handler: live::get_tree,
    },
    CommandSpec { name: "get_node", required: &["path"], optional: &[], response_type: "node", kind: Live, handler: live::get_node },
    CommandSpec {
        name: "set_property",
        required: &["path", "property", "value"],
        optional: &[],
        response_type: "property_set",
        kind: Live,
        handler: live::set_property,
    },
    CommandSpec {
        name: "call_method",
        required: &["path", "method"],
        optional: &["args"],
        response_type: "method_result",
        kind: Live,
        handler: live::call_method,
    },
    CommandSpec {
        name: "get_metrics",
        required: &[],
        optional: &["metrics"],
        response_type: "metrics",
        kind: Live,
        handler: live::get_metrics,
    },
    CommandSpec {
        name: "get_scene_info",
        required: &[],
        optional: &[],
        response_type: "scene_info",
        kind: Live,
        handler: live::get_scene_info,
    },
    CommandSpec { name: "list_types", required: &[], optional: &[], response_type: "types", kind: Live, handler: live::list_types },
    CommandSpec {
        name: "get_type_info",
        required: &["typeName"],
        optional: &[],
        response_type: "type_info",
        kind: Live,
        handler: live::get_type_info,
    },
    CommandSpec { name: "close", required: &[], optional: &[], response_type: "closing", kind: Live, handler: live::close },
    // Capture
    CommandSpec {
        name: "capture_screenshot",
        required: &[],
        optional: &["width", "height", "format"],
        response_type: "screenshot",
        kind: Live,
        handler: capture::capture_screenshot,
    },
    CommandSpec {
        name: "capture_viewport",
        required: &[],
        optional: &["width", "height", "format"],
        response_type: "screenshot",
        kind: Live,
        handler: capture::capture_viewport,
    },
    // Input
    CommandSpec {
        name: "inject_action",
        required: &["action"],
        optional: &["pressed", "strength"],
        response_type: "input_ack",
        kind: Live,
        handler: input::inject_action,
    },
    CommandSpec {
        name: "inject_key",
        required: &["keycode"],
        optional: &["pressed", "shift", "ctrl", "alt"],
        response_type: "input_ack",
        kind: Live,
        handler: input::inject_key,
    },
    CommandSpec {
        name: "inject_mouse_click",
        required: &["x", "y"],
        optional: &["button", "pressed", "doubleClick"],
        response_type: "input_ack",
        kind: Live,
        handler: input::inject_mouse_click,
    },
    CommandSpec {
        name: "inject_mouse_motion",
        required: &["x", "y"],
        optional: &["relativeX", "relativeY"],
        response_type: "input_ack",
        kind: Live,
        handler: input::inject_mouse_motion,
    },
    // Subscriptions
    CommandSpec {
        name: "watch_signal",
        required: &["path", "signal"],
        optional: &[],
        response_type: "signal_watched",
        kind: Live,
        handler: signals::watch_signal,
    },
    CommandSpec {
        name: "unwatch_signal",
        required: &["path", "signal"],
        optional: &[],
        response_type: "signal_unwatched",
        kind: Live,
        handler: signals::unwatch_signal,
    },
    // Persisted scenes
    CommandSpec {
        name: "create_scene",
        required: &["scenePath", "rootType"],
        optional: &["rootName"],
        response_type: "create_scene_result",
        kind: Scene,
        handler: scene::create_scene,
    },
    CommandSpec {
        name: "add_node",
        required: &["scenePath", "parentPath", "nodeType", "nodeName"],
        optional: &["properties", "save"],
        response_type: "add_node_result",
        kind: Scene,
        handler: scene::add_node,
    },
    CommandSpec {
        name: "delete_node",
        required: &["scenePath", "nodePath"],
        optional: &["save"],
        response_type: "delete_node_result",
        kind: Scene,
        handler: scene::delete_node,
    },
    CommandSpec {
        name: "duplicate_node",
        required: &["scenePath", "nodePath", "newName"],
        optional: &["newParentPath", "save"],
        response_type: "duplicate_node_result",
        kind: Scene,
        handler: scene::duplicate_node,
    },
    CommandSpec {
        name: "reparent_node",
        required: &["scenePath", "nodePath", "newParentPath"],
        optional: &["save"],
        response_type: "reparent_node_result",
        kind: Scene,
        handler: scene::reparent_node,
    },
    CommandSpec {
        name: "set_node_properties",
        required: &["scenePath", "nodePath", "properties"],
        optional: &["save"],
        response_type: "set_node_properties_result",
        kind: Scene,
        handler: scene::set_node_properties,
    },
    CommandSpec {
        name: "get_node_properties",
        required: &["scenePath", "nodePath"],
        optional: &["includeDefaults"],
        response_type: "get_node_properties_result",
        kind: Scene,
        handler: scene::get_node_properties,
    },
    CommandSpec {
        name: "list_scene_nodes",
        required: &["scenePath"],
        optional: &["nodePath", "depth"],
        response_type: "list_scene_nodes_result",
        kind: Scene,
        handler: scene::list_scene_nodes,
    },
    CommandSpec {
        name: "connect_signal",
        required: &["scenePath", "nodePath", "signal", "targetPath", "method"],
        optional: &["flags", "save"],
        response_type: "connect_signal_result",
        kind: Scene,
        handler: scene::connect_signal,
    },
    CommandSpec {
        name: "disconnect_signal",
        required: &["scenePath", "nodePath", "signal", "targetPath", "method"],
        optional: &["save"],
        response_type: "disconnect_signal_result",
        kind: Scene,
        handler: scene::disconnect_signal,
    },
    CommandSpec {
        name: "list_connections",
        required: &["scenePath"],
        optional: &["nodePath"],
        response_type: "list_connections_result",
        kind: Scene,
        handler: scene::list_connections,
    },
    CommandSpec {
        name: "save_scene",
        required: &["scenePath"],
        optional: &["newPath"],
        response_type: "save_scene_result",
        kind: Scene,
        handler: scene::save_scene,
    },
    CommandSpec {
        name: "load_sprite",
        required: &["scenePath", "nodePath", "texturePath"],
        optional: &["save"],
        response_type: "load_sprite_result",
        kind: Scene,
        handler: scene::load_sprite,
    },
];

/// Unwrap a `json!({...})` literal into response fields.
fn fields(value: Json) -> Map<String, Json> {
    match value {
        Json::Object(map) => map,
        _ => Map::new(),
    }
}
