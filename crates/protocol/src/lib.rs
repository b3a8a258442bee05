//! SceneWire Remote Control Protocol - v1 Wire Format
//!
//! This crate defines the canonical message types shared by the host's
//! session server and controller clients. The wire format is JSONL
//! (newline-delimited JSON) over TCP localhost, one object per line in
//! both directions.
//!
//! # Protocol Version
//!
//! This is **protocol 1.0**. Changes to the envelope shapes require:
//! 1. A bump of [`PROTOCOL_VERSION`]
//! 2. New golden vectors in `crates/protocol/tests/golden/`
//!
//! # Usage
//!
//! ```ignore
//! use scenewire_protocol::{Request, ServerMessage};
//!
//! let req = Request::new("get_node").param("path", "Player").with_id(7);
//! let line = serde_json::to_string(&req)?;
//!
//! match ServerMessage::parse(&reply_line)? {
//!     ServerMessage::Response(resp) => println!("{}", resp.kind),
//!     ServerMessage::Error { error, .. } => eprintln!("{}", error.message),
//!     _ => {}
//! }
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Current protocol version, sent in the welcome message.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Maximum size of a single framed message (10 MB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Response type of the greeting sent on every new connection.
pub const TYPE_WELCOME: &str = "welcome";

/// Response type of unsolicited signal pushes.
pub const TYPE_EVENT: &str = "event";

/// Response type of every failure envelope.
pub const TYPE_ERROR: &str = "error";

// =============================================================================
// Request
// =============================================================================

/// Correlation id of a request. Echoed verbatim on the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    Text(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n.into())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::Text(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::Text(s)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A controller request: `{command, params?, id?}`.
///
/// Requests without an `id` are fire-and-forget from the client's point of
/// view; the server still answers them, without correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

fn null_as_empty_map<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Map::new(),
            id: None,
        }
    }

    /// Builder: add a parameter.
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Builder: set the correlation id.
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

// =============================================================================
// Response envelope
// =============================================================================

/// Generic server → client envelope: `{type, ...fields, id?}`.
///
/// Every message the server writes (responses, welcome, events, errors)
/// has this shape; typed views are obtained with [`Response::parse_body`]
/// or [`ServerMessage::parse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Response {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
            id: None,
        }
    }

    /// Build an envelope from a serializable body. Non-object bodies are
    /// stored under a `value` field.
    pub fn from_body<T: Serialize>(kind: impl Into<String>, body: &T) -> Result<Self, serde_json::Error> {
        let fields = match serde_json::to_value(body)? {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Ok(Self {
            kind: kind.into(),
            fields,
            id: None,
        })
    }

    /// Builder: add a field.
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Builder: attach a correlation id (or none).
    pub fn with_id(mut self, id: Option<RequestId>) -> Self {
        self.id = id;
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == TYPE_ERROR
    }

    /// Deserialize the envelope fields into a typed body.
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }

    /// Serialize to a single wire line (no trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Typed server messages
// =============================================================================

/// Host build version carried in the welcome message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub string: String,
}

impl HostVersion {
    /// Parse a `major.minor.patch` string (missing parts are zero).
    pub fn parse(version: &str) -> Self {
        let mut parts = version
            .split(|c: char| c == '.' || c == '-' || c == '+')
            .map(|p| p.parse::<u32>().unwrap_or(0));
        Self {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
            string: version.to_string(),
        }
    }
}

/// Greeting sent once per new connection, before any request is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMessage {
    pub protocol_version: String,
    pub host_version: HostVersion,
    pub app_name: String,
}

impl WelcomeMessage {
    pub fn to_response(&self) -> Result<Response, serde_json::Error> {
        Response::from_body(TYPE_WELCOME, self)
    }
}

/// Unsolicited signal push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Address of the emitting node ("." for the scene root).
    pub address: String,
    /// Signal name.
    pub channel: String,
    /// Codec-encoded signal arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl EventMessage {
    pub fn to_response(&self) -> Result<Response, serde_json::Error> {
        Response::from_body(TYPE_EVENT, self)
    }
}

/// Failure envelope body.
///
/// Persisted-scene commands additionally carry `ok: false` and `error`
/// (a copy of `message`) so their success and failure shapes line up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorMessage {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code().to_string(),
            message: message.into(),
            ok: None,
            error: None,
        }
    }

    /// Add the `{ok: false, error}` fields used by scene commands.
    pub fn with_scene_fields(mut self) -> Self {
        self.ok = Some(false);
        self.error = Some(self.message.clone());
        self
    }

    pub fn to_response(&self, id: Option<RequestId>) -> Response {
        let mut resp = Response::new(TYPE_ERROR)
            .field("code", self.code.clone())
            .field("message", self.message.clone());
        if let Some(ok) = self.ok {
            resp = resp.field("ok", ok);
        }
        if let Some(error) = &self.error {
            resp = resp.field("error", error.clone());
        }
        resp.with_id(id)
    }

    /// Parsed error code, if it is one this protocol version knows.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(&self.code)
    }
}

/// A classified server line.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Welcome(WelcomeMessage),
    Event(EventMessage),
    Error {
        id: Option<RequestId>,
        error: ErrorMessage,
    },
    Response(Response),
}

impl ServerMessage {
    /// Parse one wire line into a classified message.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let resp: Response = serde_json::from_str(line)?;
        Self::classify(resp)
    }

    pub fn classify(resp: Response) -> Result<Self, serde_json::Error> {
        Ok(match resp.kind.as_str() {
            TYPE_WELCOME => ServerMessage::Welcome(resp.parse_body()?),
            TYPE_EVENT => ServerMessage::Event(resp.parse_body()?),
            TYPE_ERROR => ServerMessage::Error {
                error: resp.parse_body()?,
                id: resp.id,
            },
            _ => ServerMessage::Response(resp),
        })
    }

    /// Correlation id, when the message answers a request.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            ServerMessage::Error { id, .. } => id.as_ref(),
            ServerMessage::Response(resp) => resp.id.as_ref(),
            _ => None,
        }
    }
}

// =============================================================================
// Error codes
// =============================================================================

/// Protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Framing or JSON failure.
    ProtocolError,
    /// Line exceeded MAX_MESSAGE_SIZE.
    MessageTooLarge,
    /// No handler registered for the command.
    UnknownCommand,
    /// Missing or mistyped parameter, or a semantically invalid argument.
    ValidationError,
    /// Address does not resolve to a node.
    NodeNotFound,
    /// File does not exist.
    NotFound,
    /// Type name is not instantiable.
    UnknownType,
    /// Node does not declare the signal.
    UnknownChannel,
    /// Node does not expose the method.
    UnknownMethod,
    CannotDeleteRoot,
    CannotReparentRoot,
    AlreadySubscribed,
    NotSubscribed,
    AlreadyConnected,
    NotConnected,
    /// Persisted scene is malformed.
    ParseError,
    /// Serialize or write failure.
    PersistError,
    /// A typed reference could not be resolved.
    ValueResolutionError,
    /// Rendering or image encoding failed.
    CaptureError,
    InternalError,
}

impl ErrorCode {
    pub const ALL: &'static [ErrorCode] = &[
        Self::ProtocolError,
        Self::MessageTooLarge,
        Self::UnknownCommand,
        Self::ValidationError,
        Self::NodeNotFound,
        Self::NotFound,
        Self::UnknownType,
        Self::UnknownChannel,
        Self::UnknownMethod,
        Self::CannotDeleteRoot,
        Self::CannotReparentRoot,
        Self::AlreadySubscribed,
        Self::NotSubscribed,
        Self::AlreadyConnected,
        Self::NotConnected,
        Self::ParseError,
        Self::PersistError,
        Self::ValueResolutionError,
        Self::CaptureError,
        Self::InternalError,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::ProtocolError => "protocol_error",
            Self::MessageTooLarge => "message_too_large",
            Self::UnknownCommand => "unknown_command",
            Self::ValidationError => "validation_error",
            Self::NodeNotFound => "node_not_found",
            Self::NotFound => "not_found",
            Self::UnknownType => "unknown_type",
            Self::UnknownChannel => "unknown_channel",
            Self::UnknownMethod => "unknown_method",
            Self::CannotDeleteRoot => "cannot_delete_root",
            Self::CannotReparentRoot => "cannot_reparent_root",
            Self::AlreadySubscribed => "already_subscribed",
            Self::NotSubscribed => "not_subscribed",
            Self::AlreadyConnected => "already_connected",
            Self::NotConnected => "not_connected",
            Self::ParseError => "parse_error",
            Self::PersistError => "persist_error",
            Self::ValueResolutionError => "value_resolution_error",
            Self::CaptureError => "capture_error",
            Self::InternalError => "internal_error",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::ProtocolError => "Malformed JSON message",
            Self::MessageTooLarge => "Message exceeds maximum size",
            Self::UnknownCommand => "Unknown command",
            Self::ValidationError => "Invalid parameters",
            Self::NodeNotFound => "Node not found",
            Self::NotFound => "File not found",
            Self::UnknownType => "Unknown type",
            Self::UnknownChannel => "Unknown signal",
            Self::UnknownMethod => "Unknown method",
            Self::CannotDeleteRoot => "Cannot delete the scene root",
            Self::CannotReparentRoot => "Cannot reparent the scene root",
            Self::AlreadySubscribed => "Already subscribed",
            Self::NotSubscribed => "Not subscribed",
            Self::AlreadyConnected => "Signal connection already exists",
            Self::NotConnected => "Signal connection does not exist",
            Self::ParseError => "Scene file is malformed",
            Self::PersistError => "Failed to save scene",
            Self::ValueResolutionError => "Value could not be resolved",
            Self::CaptureError => "Capture failed",
            Self::InternalError => "Internal server error",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// Discovery File Format
// =============================================================================

/// Discovery file written by a running host, read by controllers to find
/// sessions. Timestamps are ISO 8601 strings on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryFile {
    pub session_id: String,
    pub port: u16,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<std::path::PathBuf>,
    pub app_name: String,
    pub created_at: String,
    pub protocol_version: String,
}
