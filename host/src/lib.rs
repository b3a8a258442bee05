//! SceneWire reference host: a headless scene runtime driven by the
//! session server.

pub mod host;
pub mod input;
pub mod render;
pub mod session_server;

pub use host::{Host, HostStats};
pub use session_server::{SessionServer, SessionServerConfig};
