//! Scene graph engine: structured values, their wire codec, node trees,
//! the type registry and signal wiring.

pub mod codec;
pub mod error;
pub mod methods;
pub mod path;
pub mod registry;
pub mod resource;
pub mod signal;
pub mod tree;
pub mod value;

pub use error::{DecodeError, EngineError, EngineResult};
pub use registry::TypeRegistry;
pub use resource::{AcceptAll, ResourceResolver, ResourceTable};
pub use tree::{Node, NodeId, SceneTree};
pub use value::{Value, ValueKind};
