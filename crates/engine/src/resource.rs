//! Typed resource references and their resolution.

use rustc_hash::FxHashMap;

use crate::value::ResourceRef;

/// Resolves `(path, class)` references found while decoding values.
///
/// Returning `None` makes the decode fail with `DecodeError::Unresolved`.
pub trait ResourceResolver {
    fn resolve(&self, path: &str, class: &str) -> Option<ResourceRef>;
}

/// Resolver that accepts every reference as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ResourceResolver for AcceptAll {
    fn resolve(&self, path: &str, class: &str) -> Option<ResourceRef> {
        Some(ResourceRef::new(path, class))
    }
}

/// Resolver that rejects every reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl ResourceResolver for RejectAll {
    fn resolve(&self, _path: &str, _class: &str) -> Option<ResourceRef> {
        None
    }
}

/// In-memory table of known resources keyed by locator.
///
/// An empty requested class matches any entry and picks up the stored
/// class; otherwise the classes must agree.
#[derive(Debug, Clone, Default)]
pub struct ResourceTable {
    entries: FxHashMap<String, String>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, class: impl Into<String>) {
        self.entries.insert(path.into(), class.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceResolver for ResourceTable {
    fn resolve(&self, path: &str, class: &str) -> Option<ResourceRef> {
        let stored = self.entries.get(path)?;
        if class.is_empty() || class == stored {
            Some(ResourceRef::new(path, stored.clone()))
        } else {
            None
        }
    }
}
