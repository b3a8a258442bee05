//! Persisted scene commands. Each one loads the scene file, edits it and
//! writes it back (or keeps it pending when `save` is false) without
//! touching the live tree.

use scenewire_engine::codec;
use scenewire_io::EditOutcome;
use serde_json::{json, Map, Value as Json};

use super::fields;
use crate::session_server::dispatcher::{CommandContext, CommandError, CommandResult, Params};

type Fields = CommandResult<Map<String, Json>>;

fn outcome(outcome: EditOutcome) -> Map<String, Json> {
    let mut out = fields(json!({ "scenePath": outcome.scene }));
    if let Some(node) = outcome.node {
        out.insert("nodePath".into(), Json::String(node));
    }
    if !outcome.saved {
        out.insert("pending".into(), Json::Bool(true));
    }
    out
}

fn save(params: &Params<'_>) -> CommandResult<bool> {
    params.bool_or("save", true)
}

pub(super) fn create_scene(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let done = ctx.editor.create_scene(
        params.str("scenePath")?,
        params.str("rootType")?,
        params.opt_str("rootName")?,
    )?;
    Ok(outcome(done))
}

pub(super) fn add_node(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let done = ctx.editor.add_node(
        params.str("scenePath")?,
        params.str("parentPath")?,
        params.str("nodeType")?,
        params.str("nodeName")?,
        params.opt_object("properties")?,
        save(params)?,
    )?;
    Ok(outcome(done))
}

pub(super) fn delete_node(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let done = ctx
        .editor
        .delete_node(params.str("scenePath")?, params.str("nodePath")?, save(params)?)?;
    Ok(outcome(done))
}

pub(super) fn duplicate_node(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let done = ctx.editor.duplicate_node(
        params.str("scenePath")?,
        params.str("nodePath")?,
        params.str("newName")?,
        params.opt_str("newParentPath")?,
        save(params)?,
    )?;
    Ok(outcome(done))
}

pub(super) fn reparent_node(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let done = ctx.editor.reparent_node(
        params.str("scenePath")?,
        params.str("nodePath")?,
        params.str("newParentPath")?,
        save(params)?,
    )?;
    Ok(outcome(done))
}

pub(super) fn set_node_properties(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let done = ctx.editor.set_node_properties(
        params.str("scenePath")?,
        params.str("nodePath")?,
        params.object("properties")?,
        save(params)?,
    )?;
    Ok(outcome(done))
}

pub(super) fn get_node_properties(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let scene_path = params.str("scenePath")?;
    let props = ctx.editor.get_node_properties(
        scene_path,
        params.str("nodePath")?,
        params.bool_or("includeDefaults", false)?,
    )?;
    let locator = ctx.editor.project().normalize(scene_path)?;
    Ok(fields(json!({
        "scenePath": locator,
        "nodePath": props.path,
        "nodeType": props.type_name,
        "properties": codec::encode_map(&props.properties),
    })))
}

pub(super) fn list_scene_nodes(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let scene_path = params.str("scenePath")?;
    let depth = params.opt_u64("depth")?.map(|d| d as usize);
    let entries = ctx
        .editor
        .list_scene_nodes(scene_path, params.opt_str("nodePath")?, depth)?;
    let nodes: Vec<Json> = entries
        .into_iter()
        .map(|e| {
            json!({
                "path": e.path,
                "name": e.name,
                "type": e.type_name,
                "parent": e.parent,
                "depth": e.depth,
                "childCount": e.child_count,
                "groups": e.groups,
                "placeholder": e.placeholder,
            })
        })
        .collect();
    let locator = ctx.editor.project().normalize(scene_path)?;
    Ok(fields(json!({ "scenePath": locator, "nodes": nodes })))
}

pub(super) fn connect_signal(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let flags = match params.opt_u64("flags")? {
        None => 0,
        Some(f) => u32::try_from(f).map_err(|_| CommandError::validation("Parameter 'flags' is out of range"))?,
    };
    let done = ctx.editor.connect_signal(
        params.str("scenePath")?,
        params.str("nodePath")?,
        params.str("signal")?,
        params.str("targetPath")?,
        params.str("method")?,
        flags,
        save(params)?,
    )?;
    Ok(outcome(done))
}

pub(super) fn disconnect_signal(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let done = ctx.editor.disconnect_signal(
        params.str("scenePath")?,
        params.str("nodePath")?,
        params.str("signal")?,
        params.str("targetPath")?,
        params.str("method")?,
        save(params)?,
    )?;
    Ok(outcome(done))
}

pub(super) fn list_connections(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let scene_path = params.str("scenePath")?;
    let entries = ctx
        .editor
        .list_connections(scene_path, params.opt_str("nodePath")?)?;
    let connections: Vec<Json> = entries
        .into_iter()
        .map(|c| {
            json!({
                "source": c.source,
                "signal": c.signal,
                "target": c.target,
                "method": c.method,
                "flags": c.flags,
            })
        })
        .collect();
    let locator = ctx.editor.project().normalize(scene_path)?;
    Ok(fields(json!({ "scenePath": locator, "connections": connections })))
}

pub(super) fn save_scene(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let done = ctx
        .editor
        .save_scene(params.str("scenePath")?, params.opt_str("newPath")?)?;
    Ok(outcome(done))
}

pub(super) fn load_sprite(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let done = ctx.editor.load_sprite(
        params.str("scenePath")?,
        params.str("nodePath")?,
        params.str("texturePath")?,
        save(params)?,
    )?;
    Ok(outcome(done))
}
