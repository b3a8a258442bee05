//! Change notification after a scene is persisted.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// A scene file that was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneChange {
    /// Canonical `res://` locator.
    pub locator: String,
    pub path: PathBuf,
}

/// Receives a callback after every successful persist. Implementations
/// must not fail the edit that triggered them.
pub trait ChangeNotifier: Send {
    fn scene_saved(&self, change: &SceneChange);
}

/// Notifier that drops every change.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn scene_saved(&self, _change: &SceneChange) {}
}

/// Notifier that queues changes for the owner to drain later.
///
/// Clones share the same queue.
#[derive(Debug, Default, Clone)]
pub struct ChangeQueue {
    pending: Arc<Mutex<Vec<SceneChange>>>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued change, oldest first, with duplicates collapsed.
    pub fn drain(&self) -> Vec<SceneChange> {
        let taken = match self.pending.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let mut out: Vec<SceneChange> = Vec::with_capacity(taken.len());
        for change in taken {
            if !out.contains(&change) {
                out.push(change);
            }
        }
        out
    }
}

impl ChangeNotifier for ChangeQueue {
    fn scene_saved(&self, change: &SceneChange) {
        match self.pending.lock() {
            Ok(mut guard) => guard.push(change.clone()),
            Err(poisoned) => poisoned.into_inner().push(change.clone()),
        }
    }
}
