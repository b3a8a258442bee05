//! Command dispatch.
//!
//! A fixed table maps command names to their declared parameters and a
//! handler. The dispatcher checks required parameters, runs the handler
//! and wraps the result (or the error) in a response envelope that echoes
//! the request id.

use std::sync::atomic::Ordering;

use rustc_hash::FxHashMap;
use scenewire_config::CaptureSettings;
use scenewire_engine::error::{DecodeError, EngineError};
use scenewire_io::{EditError, SceneEditor};
use scenewire_protocol::{ErrorCode, ErrorMessage, Request, Response};
use serde_json::{Map, Value as Json};
use thiserror::Error;

use super::connection::ConnectionId;
use super::events::SubscriptionRegistry;
use super::server::ServerMetrics;
use crate::host::Host;

/// Whether a command targets the live tree or a persisted scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Live,
    /// Success carries `ok: true`; failure carries `ok: false` and `error`.
    Scene,
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Handler body: returns the response fields.
pub type Handler = fn(&mut CommandContext<'_>, &Params<'_>) -> CommandResult<Map<String, Json>>;

pub struct CommandSpec {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub response_type: &'static str,
    pub kind: CommandKind,
    pub handler: Handler,
}

/// Failure of a single command, reported on the wire as an error envelope.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn missing(param: &str) -> Self {
        Self::validation(format!("Missing required parameter: {}", param))
    }

    pub fn unknown_command(command: &str) -> Self {
        Self::new(ErrorCode::UnknownCommand, format!("Unknown command: {}", command))
    }
}

impl From<DecodeError> for CommandError {
    fn from(e: DecodeError) -> Self {
        let code = match e {
            DecodeError::Unresolved { .. } => ErrorCode::ValueResolutionError,
            _ => ErrorCode::ValidationError,
        };
        Self::new(code, format!("Invalid value: {}", e))
    }
}

impl From<EngineError> for CommandError {
    fn from(e: EngineError) -> Self {
        let code = match &e {
            EngineError::NodeNotFound(_) => ErrorCode::NodeNotFound,
            EngineError::UnknownType(_) => ErrorCode::UnknownType,
            EngineError::UnknownChannel { .. } => ErrorCode::UnknownChannel,
            EngineError::UnknownMethod { .. } => ErrorCode::UnknownMethod,
            EngineError::CannotDeleteRoot => ErrorCode::CannotDeleteRoot,
            EngineError::CannotReparentRoot => ErrorCode::CannotReparentRoot,
            EngineError::AlreadyConnected { .. } => ErrorCode::AlreadyConnected,
            EngineError::NotConnected { .. } => ErrorCode::NotConnected,
            EngineError::Decode(inner) => return inner.clone().into(),
            EngineError::UnknownProperty { .. }
            | EngineError::TypeMismatch { .. }
            | EngineError::BadArguments { .. }
            | EngineError::CannotDuplicateRoot
            | EngineError::InvalidReparent(_)
            | EngineError::InvalidName(_)
            | EngineError::InvalidPropertyName(_) => ErrorCode::ValidationError,
        };
        match code {
            ErrorCode::CannotDeleteRoot | ErrorCode::CannotReparentRoot => Self::new(code, code.message()),
            _ => Self::new(code, e.to_string()),
        }
    }
}

impl From<EditError> for CommandError {
    fn from(e: EditError) -> Self {
        match e {
            EditError::Engine(inner) => inner.into(),
            EditError::Property { property, source } => {
                let inner: CommandError = source.into();
                Self::new(inner.code, format!("Property '{}': {}", property, inner.message))
            }
            EditError::NotFound(_) => Self::new(ErrorCode::NotFound, e.to_string()),
            EditError::AlreadyExists(_) | EditError::InvalidLocator(_) => Self::validation(e.to_string()),
            EditError::Parse { .. } => Self::new(ErrorCode::ParseError, e.to_string()),
            EditError::Persist { .. } => Self::new(ErrorCode::PersistError, e.to_string()),
        }
    }
}

/// Everything a handler may touch. Borrowed from the host loop for the
/// duration of one request.
pub struct CommandContext<'a> {
    pub connection: ConnectionId,
    pub host: &'a mut Host,
    pub editor: &'a mut SceneEditor,
    pub subscriptions: &'a mut SubscriptionRegistry,
    pub capture: &'a CaptureSettings,
    pub metrics: &'a ServerMetrics,
    /// Active connections when this tick started.
    pub active_connections: usize,
    /// Set by the `close` command.
    pub close: bool,
}

/// Typed access to request parameters. Mistyped values are validation
/// errors; `null` counts as absent.
pub struct Params<'a> {
    map: &'a Map<String, Json>,
}

impl<'a> Params<'a> {
    pub fn new(map: &'a Map<String, Json>) -> Self {
        Self { map }
    }

    /// Raw value, with `null` treated as missing.
    pub fn get(&self, name: &str) -> Option<&'a Json> {
        self.map.get(name).filter(|v| !v.is_null())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn value(&self, name: &str) -> CommandResult<&'a Json> {
        self.get(name).ok_or_else(|| CommandError::missing(name))
    }

    pub fn str(&self, name: &str) -> CommandResult<&'a str> {
        self.opt_str(name)?.ok_or_else(|| CommandError::missing(name))
    }

    pub fn opt_str(&self, name: &str) -> CommandResult<Option<&'a str>> {
        match self.get(name) {
            None => Ok(None),
            Some(Json::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(mistyped(name, "a string")),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> CommandResult<bool> {
        match self.get(name) {
            None => Ok(default),
            Some(Json::Bool(b)) => Ok(*b),
            Some(_) => Err(mistyped(name, "a boolean")),
        }
    }

    pub fn f64(&self, name: &str) -> CommandResult<f64> {
        self.opt_f64(name)?.ok_or_else(|| CommandError::missing(name))
    }

    pub fn opt_f64(&self, name: &str) -> CommandResult<Option<f64>> {
        match self.get(name) {
            None => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| mistyped(name, "a number")),
        }
    }

    pub fn opt_u64(&self, name: &str) -> CommandResult<Option<u64>> {
        match self.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| mistyped(name, "a non-negative integer")),
        }
    }

    pub fn object(&self, name: &str) -> CommandResult<&'a Map<String, Json>> {
        self.opt_object(name)?.ok_or_else(|| CommandError::missing(name))
    }

    pub fn opt_object(&self, name: &str) -> CommandResult<Option<&'a Map<String, Json>>> {
        match self.get(name) {
            None => Ok(None),
            Some(Json::Object(map)) => Ok(Some(map)),
            Some(_) => Err(mistyped(name, "an object")),
        }
    }

    pub fn opt_array(&self, name: &str) -> CommandResult<Option<&'a Vec<Json>>> {
        match self.get(name) {
            None => Ok(None),
            Some(Json::Array(items)) => Ok(Some(items)),
            Some(_) => Err(mistyped(name, "an array")),
        }
    }
}

fn mistyped(name: &str, expected: &str) -> CommandError {
    CommandError::validation(format!("Parameter '{}' must be {}", name, expected))
}

/// Routes requests to handlers.
pub struct Dispatcher {
    commands: FxHashMap<&'static str, &'static CommandSpec>,
}

impl Dispatcher {
    pub fn new(table: &'static [CommandSpec]) -> Self {
        let commands = table.iter().map(|spec| (spec.name, spec)).collect();
        Self { commands }
    }

    pub fn spec(&self, command: &str) -> Option<&'static CommandSpec> {
        self.commands.get(command).copied()
    }

    /// Sorted command names.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run one request and build its response envelope.
    pub fn dispatch(&self, ctx: &mut CommandContext<'_>, request: Request) -> Response {
        ctx.metrics.commands_processed.fetch_add(1, Ordering::Relaxed);

        let Some(spec) = self.spec(&request.command) else {
            log::debug!("unknown command '{}'", request.command);
            let err = CommandError::unknown_command(&request.command);
            return ErrorMessage::new(err.code, err.message).to_response(request.id);
        };

        let params = Params::new(&request.params);
        let result = match spec.required.iter().find(|name| !params.has(name)) {
            Some(name) => Err(CommandError::missing(name)),
            None => (spec.handler)(ctx, &params),
        };

        match result {
            Ok(fields) => {
                let mut resp = Response::new(spec.response_type);
                if spec.kind == CommandKind::Scene {
                    resp = resp.field("ok", true);
                }
                resp.fields.extend(fields);
                resp.with_id(request.id)
            }
            Err(err) => {
                log::debug!("{} failed: {}", spec.name, err);
                let mut msg = ErrorMessage::new(err.code, err.message);
                if spec.kind == CommandKind::Scene {
                    msg = msg.with_scene_fields();
                }
                msg.to_response(request.id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_error_codes() {
        let err: CommandError = EngineError::CannotDeleteRoot.into();
        assert_eq!(err.code, ErrorCode::CannotDeleteRoot);
        assert_eq!(err.message, "Cannot delete the scene root");

        let err: CommandError = EngineError::NodeNotFound("A/B".into()).into();
        assert_eq!(err.code, ErrorCode::NodeNotFound);

        let err: CommandError = EngineError::InvalidReparent("A".into()).into();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_decode_error_codes() {
        let unresolved = DecodeError::Unresolved {
            path: "res://gone.png".into(),
            class: "Texture2D".into(),
        };
        let err: CommandError = EngineError::Decode(unresolved.clone()).into();
        assert_eq!(err.code, ErrorCode::ValueResolutionError);

        let err: CommandError = EditError::Property {
            property: "texture".into(),
            source: unresolved,
        }
        .into();
        assert_eq!(err.code, ErrorCode::ValueResolutionError);
        assert!(err.message.starts_with("Property 'texture'"));

        let err: CommandError = DecodeError::UnknownKind("Quat".into()).into();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_edit_error_codes() {
        let err: CommandError = EditError::NotFound("res://a.tscn".into()).into();
        assert_eq!(err.code, ErrorCode::NotFound);
        let err: CommandError = EditError::InvalidLocator("/etc/passwd".into()).into();
        assert_eq!(err.code, ErrorCode::ValidationError);
        let err: CommandError = EditError::AlreadyExists("res://a.tscn".into()).into();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_params_typed_access() {
        let map = json!({"path": "A", "n": 3, "flag": true, "nothing": null, "bad": "x"});
        let map = map.as_object().unwrap();
        let params = Params::new(map);
        assert_eq!(params.str("path").unwrap(), "A");
        assert_eq!(params.opt_u64("n").unwrap(), Some(3));
        assert!(params.bool_or("flag", false).unwrap());
        assert!(!params.bool_or("absent", false).unwrap());
        assert!(!params.has("nothing"));
        assert_eq!(
            params.str("nothing").unwrap_err().message,
            "Missing required parameter: nothing"
        );
        assert_eq!(params.f64("bad").unwrap_err().code, ErrorCode::ValidationError);
    }
}
