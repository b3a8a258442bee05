use scenewire_engine::EngineError;
use scenewire_protocol::ErrorCode;
use serde_json::{json, Map, Value as Json};

use super::fields;
use crate::session_server::dispatcher::{CommandContext, CommandError, CommandResult, Params};

type Fields = CommandResult<Map<String, Json>>;

pub(super) fn watch_signal(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let signal = params.str("signal")?;
    let tree = ctx.host.tree();
    let id = tree.resolve(params.str("path")?)?;
    if !tree.has_signal(ctx.host.registry(), id, signal) {
        let type_name = tree.node(id)?.type_name.clone();
        return Err(EngineError::UnknownChannel {
            type_name,
            signal: signal.to_string(),
        }
        .into());
    }
    let address = tree.address_of(id)?;
    if !ctx.subscriptions.subscribe(ctx.connection, id, &address, signal) {
        return Err(CommandError::new(
            ErrorCode::AlreadySubscribed,
            format!("Already watching {} on {}", signal, address),
        ));
    }
    Ok(fields(json!({ "path": address, "signal": signal })))
}

/// Looked up by node first so a renamed node can be unwatched at its
/// current address; falls back to the raw path when the node is gone.
pub(super) fn unwatch_signal(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    let path = params.str("path")?;
    let signal = params.str("signal")?;
    let tree = ctx.host.tree();
    let removed = match tree.resolve(path) {
        Ok(id) => {
            let address = tree.address_of(id)?;
            let removed = ctx.subscriptions.unsubscribe_node(ctx.connection, id, signal)
                || ctx.subscriptions.unsubscribe(ctx.connection, &address, signal);
            removed.then_some(address)
        }
        Err(_) => ctx
            .subscriptions
            .unsubscribe(ctx.connection, path, signal)
            .then(|| path.to_string()),
    };
    match removed {
        Some(address) => Ok(fields(json!({ "path": address, "signal": signal }))),
        None => Err(CommandError::new(
            ErrorCode::NotSubscribed,
            format!("Not watching {} on {}", signal, path),
        )),
    }
}
