//! Signal subscriptions and event push.
//!
//! A subscription binds one connection to one `(node, signal)` pair. When a
//! live signal fires and any subscription matches it, one event line is
//! written to every active connection, not only the subscribers.
//!
//! Subscriptions keep the canonical address they were created with so they
//! can be re-resolved after the live scene is reloaded. Within one tree they
//! are found by node, so a renamed node can still be unwatched.

use scenewire_engine::codec;
use scenewire_engine::signal::EmittedSignal;
use scenewire_engine::tree::{NodeId, SceneTree};
use scenewire_protocol::EventMessage;

use super::connection::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub connection: ConnectionId,
    pub node: NodeId,
    /// Canonical address of `node` at subscribe time.
    pub address: String,
    pub channel: String,
}

/// All live subscriptions of the session server.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. Returns false if the connection already watches
    /// this node (or address) and channel.
    pub fn subscribe(&mut self, connection: ConnectionId, node: NodeId, address: &str, channel: &str) -> bool {
        if self.is_subscribed(connection, address, channel) || self.watches_node(connection, node, channel) {
            return false;
        }
        self.subscriptions.push(Subscription {
            connection,
            node,
            address: address.to_string(),
            channel: channel.to_string(),
        });
        log::debug!("connection {} watching {}:{}", connection, address, channel);
        true
    }

    /// Remove a subscription. Returns false if there was none.
    pub fn unsubscribe(&mut self, connection: ConnectionId, address: &str, channel: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|s| !(s.connection == connection && s.address == address && s.channel == channel));
        self.subscriptions.len() != before
    }

    /// Remove the subscription on `node`, whatever address it was made with.
    pub fn unsubscribe_node(&mut self, connection: ConnectionId, node: NodeId, channel: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|s| !(s.connection == connection && s.node == node && s.channel == channel));
        self.subscriptions.len() != before
    }

    pub fn watches_node(&self, connection: ConnectionId, node: NodeId, channel: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.connection == connection && s.node == node && s.channel == channel)
    }

    pub fn is_subscribed(&self, connection: ConnectionId, address: &str, channel: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.connection == connection && s.address == address && s.channel == channel)
    }

    /// True if any connection watches `channel` on `node`.
    pub fn matches(&self, node: NodeId, channel: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.node == node && s.channel == channel)
    }

    /// Drop every subscription of a closed connection.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.connection != connection);
        before - self.subscriptions.len()
    }

    /// Drop subscriptions on freed nodes.
    pub fn remove_nodes(&mut self, freed: &[NodeId]) -> usize {
        if freed.is_empty() {
            return 0;
        }
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| !freed.contains(&s.node));
        before - self.subscriptions.len()
    }

    /// Rebind every subscription to the node now at its address. Those
    /// whose address no longer resolves, or whose node lost the signal,
    /// are dropped. Returns how many were dropped.
    pub fn reresolve(&mut self, tree: &SceneTree, has_signal: impl Fn(NodeId, &str) -> bool) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain_mut(|s| match tree.resolve(&s.address) {
            Ok(id) if has_signal(id, &s.channel) => {
                s.node = id;
                true
            }
            _ => {
                log::debug!("dropping subscription {}:{} after reload", s.address, s.channel);
                false
            }
        });
        before - self.subscriptions.len()
    }

    pub fn for_connection(&self, connection: ConnectionId) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter().filter(move |s| s.connection == connection)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

/// Build the push message for an emitted signal. `None` if the emitting
/// node is gone.
pub fn event_message(tree: &SceneTree, signal: &EmittedSignal) -> Option<EventMessage> {
    let address = tree.address_of(signal.node).ok()?;
    Some(EventMessage {
        address,
        channel: signal.signal.clone(),
        args: signal.args.iter().map(codec::encode).collect(),
    })
}
