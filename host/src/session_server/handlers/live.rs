//! Live tree commands: inspection, property writes, method calls and
//! host introspection.

use chrono::{SecondsFormat, Utc};
use scenewire_engine::codec;
use scenewire_engine::tree::NodeId;
use scenewire_engine::value::Value;
use scenewire_protocol::ErrorCode;
use serde_json::{json, Map, Value as Json};

use super::fields;
use crate::session_server::dispatcher::{CommandContext, CommandError, CommandResult, Params};

type Fields = CommandResult<Map<String, Json>>;

pub(super) fn ping(_ctx: &mut CommandContext<'_>, _params: &Params<'_>) -> Fields {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    Ok(fields(json!({ "timestamp": timestamp })))
}

pub(super) fn get_tree(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let tree = ctx.host.tree();
    let start = match params.opt_str("rootAddress")? {
        Some(address) => tree.resolve(address)?,
        None => tree.root(),
    };
    let depth = params.opt_u64("depth")?.map(|d| d as usize);
    let include_properties = params.bool_or("includeProperties", false)?;
    let node = describe_subtree(ctx, start, depth, include_properties)?;
    Ok(fields(json!({ "tree": node })))
}

/// Nested `{name, nodeType, path, childCount, children}`. Children beyond
/// `depth` levels are omitted but still counted.
fn describe_subtree(
    ctx: &CommandContext<'_>,
    id: NodeId,
    depth: Option<usize>,
    include_properties: bool,
) -> CommandResult<Json> {
    let tree = ctx.host.tree();
    let node = tree.node(id)?;
    let mut out = fields(json!({
        "name": node.name,
        "nodeType": node.type_name,
        "path": tree.address_of(id)?,
        "childCount": node.children().len(),
    }));
    if include_properties {
        out.insert("properties".into(), Json::Object(codec::encode_map(&node.properties)));
    }
    let children = match depth {
        Some(0) => Vec::new(),
        _ => {
            let next = depth.map(|d| d - 1);
            node.children()
                .iter()
                .map(|child| describe_subtree(ctx, *child, next, include_properties))
                .collect::<CommandResult<Vec<_>>>()?
        }
    };
    out.insert("children".into(), Json::Array(children));
    Ok(Json::Object(out))
}

pub(super) fn get_node(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let tree = ctx.host.tree();
    let registry = ctx.host.registry();
    let id = tree.resolve(params.str("path")?)?;
    let node = tree.node(id)?;

    let children: Vec<&str> = node
        .children()
        .iter()
        .filter_map(|c| tree.get(*c))
        .map(|c| c.name.as_str())
        .collect();
    let signals: Vec<&str> = registry
        .signals(&node.type_name)
        .into_iter()
        .map(|s| s.name.as_str())
        .collect();

    Ok(fields(json!({
        "name": node.name,
        "nodeType": node.type_name,
        "path": tree.address_of(id)?,
        "children": children,
        "properties": codec::encode_map(&node.properties),
        "signals": signals,
        "groups": node.groups,
    })))
}

pub(super) fn set_property(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let property = params.str("property")?;
    let id = ctx.host.tree().resolve(params.str("path")?)?;
    let value = codec::decode(params.value("value")?, &ctx.host.resources())?;
    let stored = ctx.host.set_property(id, property, value)?;
    Ok(fields(json!({
        "path": ctx.host.tree().address_of(id)?,
        "property": property,
        "value": codec::encode(&stored),
    })))
}

pub(super) fn call_method(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let method = params.str("method")?;
    let id = ctx.host.tree().resolve(params.str("path")?)?;
    let args = match params.opt_array("args")? {
        Some(items) => {
            let resources = ctx.host.resources();
            items
                .iter()
                .map(|item| codec::decode(item, &resources))
                .collect::<Result<Vec<Value>, _>>()?
        }
        None => Vec::new(),
    };
    // The node may free itself; capture the address first.
    let path = ctx.host.tree().address_of(id)?;
    let result = ctx.host.call_method(id, method, args)?;
    Ok(fields(json!({
        "path": path,
        "method": method,
        "result": codec::encode(&result),
    })))
}

pub(super) fn get_metrics(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let mut all = match serde_json::to_value(ctx.host.stats()) {
        Ok(Json::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => return Err(CommandError::new(ErrorCode::InternalError, e.to_string())),
    };
    for (name, value) in ctx.metrics.snapshot() {
        all.insert(name.to_string(), json!(value));
    }
    all.insert("activeConnections".into(), json!(ctx.active_connections));
    all.insert("subscriptions".into(), json!(ctx.subscriptions.len()));

    let metrics = match params.opt_array("metrics")? {
        None => all,
        Some(names) => {
            let mut picked = Map::new();
            for name in names {
                let name = name
                    .as_str()
                    .ok_or_else(|| CommandError::validation("Parameter 'metrics' must be an array of strings"))?;
                let value = all
                    .get(name)
                    .ok_or_else(|| CommandError::validation(format!("Unknown metric: {}", name)))?;
                picked.insert(name.to_string(), value.clone());
            }
            picked
        }
    };
    Ok(fields(json!({ "metrics": metrics })))
}

pub(super) fn get_scene_info(ctx: &mut CommandContext<'_>, _params: &Params<'_>) -> Fields {
    let tree = ctx.host.tree();
    let root = tree.node(tree.root())?;
    let (width, height) = ctx.host.window_size();
    Ok(fields(json!({
        "scenePath": ctx.host.scene(),
        "root": { "name": root.name, "type": root.type_name },
        "nodeCount": tree.len(),
        "frame": ctx.host.frames(),
        "pendingScenes": ctx.editor.pending_scenes(),
        "input": ctx.host.input_state(),
        "window": { "width": width, "height": height },
    })))
}

pub(super) fn list_types(ctx: &mut CommandContext<'_>, _params: &Params<'_>) -> Fields {
    let registry = ctx.host.registry();
    let types: Vec<Json> = registry
        .names()
        .into_iter()
        .filter_map(|name| registry.get(name))
        .map(|info| {
            json!({
                "name": info.name,
                "parent": info.parent,
                "instantiable": info.instantiable,
            })
        })
        .collect();
    Ok(fields(json!({ "types": types })))
}

pub(super) fn get_type_info(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let registry = ctx.host.registry();
    let name = params.str("typeName")?;
    let info = registry
        .get(name)
        .ok_or_else(|| CommandError::new(ErrorCode::UnknownType, format!("Unknown type: {}", name)))?;

    let ancestry: Vec<&str> = registry.ancestry(name).iter().map(|t| t.name.as_str()).collect();
    let properties: Vec<Json> = registry
        .properties(name)
        .into_iter()
        .map(|p| json!({ "name": p.name, "type": p.kind.name(), "default": codec::encode(&p.default) }))
        .collect();
    let signals: Vec<Json> = registry
        .signals(name)
        .into_iter()
        .map(|s| json!({ "name": s.name, "args": s.args }))
        .collect();
    let methods: Vec<Json> = registry
        .methods(name)
        .into_iter()
        .map(|m| {
            let params: Vec<Json> = m
                .params
                .iter()
                .map(|(param, kind)| json!({ "name": param, "type": kind.name() }))
                .collect();
            json!({
                "name": m.name,
                "params": params,
                "vararg": m.vararg,
                "returns": m.returns.name(),
            })
        })
        .collect();

    Ok(fields(json!({
        "name": info.name,
        "parent": info.parent,
        "instantiable": info.instantiable,
        "ancestry": ancestry,
        "properties": properties,
        "signals": signals,
        "methods": methods,
    })))
}

pub(super) fn close(ctx: &mut CommandContext<'_>, _params: &Params<'_>) -> Fields {
    ctx.close = true;
    Ok(Map::new())
}
