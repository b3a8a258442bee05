//! Signal wiring and emission records.

use crate::tree::NodeId;
use crate::value::Value;

/// Connection flag: call the target method at the end of the frame.
pub const CONNECT_DEFERRED: u32 = 1;
/// Connection flag: the connection is saved with the scene.
pub const CONNECT_PERSIST: u32 = 2;
/// Connection flag: disconnect after the first emission.
pub const CONNECT_ONE_SHOT: u32 = 4;

/// Static wiring from a node's signal to a method on another node.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalConnection {
    pub source: NodeId,
    pub signal: String,
    pub target: NodeId,
    pub method: String,
    pub flags: u32,
}

impl SignalConnection {
    pub fn matches(&self, source: NodeId, signal: &str, target: NodeId, method: &str) -> bool {
        self.source == source && self.signal == signal && self.target == target && self.method == method
    }

    pub fn is_one_shot(&self) -> bool {
        self.flags & CONNECT_ONE_SHOT != 0
    }
}

/// A signal emitted by a live node, queued until the host drains it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedSignal {
    pub node: NodeId,
    pub signal: String,
    pub args: Vec<Value>,
}
