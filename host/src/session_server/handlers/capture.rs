use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use scenewire_config::CaptureFormat;
use scenewire_protocol::ErrorCode;
use serde_json::{json, Map, Value as Json};

use super::fields;
use crate::render::Layers;
use crate::session_server::dispatcher::{CommandContext, CommandError, CommandResult, Params};

type Fields = CommandResult<Map<String, Json>>;

pub(super) fn capture_screenshot(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    capture(ctx, params, Layers::WINDOW)
}

/// Scene viewport only; UI controls are not drawn.
pub(super) fn capture_viewport(ctx: &mut CommandContext<'_>, params: &Params<'_>) -> Fields {
    capture(ctx, params, Layers::VIEWPORT)
}

fn capture(ctx: &mut CommandContext<'_>, params: &Params<'_>, layers: Layers) -> Fields {
    let (window_w, window_h) = ctx.host.window_size();
    let width = dimension(params, "width", window_w, ctx.capture.max_dimension)?;
    let height = dimension(params, "height", window_h, ctx.capture.max_dimension)?;
    let format = match params.opt_str("format")? {
        Some(name) => CaptureFormat::parse(name)
            .ok_or_else(|| CommandError::validation(format!("Unsupported capture format: {}", name)))?,
        None => ctx.capture.default_format,
    };

    let mut frame = ctx.host.render(layers);
    if (width, height) != (frame.width(), frame.height()) {
        frame = frame.resize(width, height);
    }
    let bytes = match format {
        CaptureFormat::Png => frame
            .encode_png()
            .map_err(|e| CommandError::new(ErrorCode::CaptureError, format!("PNG encoding failed: {}", e)))?,
        CaptureFormat::Raw => frame.into_pixels(),
    };
    log::debug!("captured {}x{} {} ({} bytes)", width, height, format.as_str(), bytes.len());

    Ok(fields(json!({
        "format": format.as_str(),
        "width": width,
        "height": height,
        "data": STANDARD.encode(&bytes),
    })))
}

fn dimension(params: &Params<'_>, name: &str, default: u32, max: u32) -> CommandResult<u32> {
    let Some(value) = params.opt_u64(name)? else {
        return Ok(default);
    };
    if value == 0 || value > u64::from(max) {
        return Err(CommandError::validation(format!(
            "Parameter '{}' must be between 1 and {}",
            name, max
        )));
    }
    Ok(value as u32)
}
