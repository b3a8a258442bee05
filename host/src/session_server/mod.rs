//! Session server for remote control of a running host.
//!
//! Exposes a local TCP endpoint speaking newline-delimited JSON so external
//! controllers (CLI, agents, test harnesses) can:
//!
//! - Discover running hosts via discovery files
//! - Inspect and mutate the live scene tree
//! - Edit persisted scene files
//! - Watch live signals as pushed events

mod connection;
mod discovery;
mod dispatcher;
mod events;
mod handlers;
mod server;

pub use connection::{ConnectionId, ConnectionManager, ConnectionState, Reply, MAX_PARSE_FAILURES};
pub use discovery::{discovery_dir, new_discovery, DiscoveryManager};
pub use dispatcher::{CommandContext, CommandError, CommandKind, CommandResult, CommandSpec, Dispatcher, Params};
pub use events::{event_message, Subscription, SubscriptionRegistry};
pub use handlers::COMMANDS;
pub use server::{ServerError, ServerMetrics, SessionServer, SessionServerConfig};
