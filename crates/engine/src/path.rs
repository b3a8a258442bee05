//! Node addresses.
//!
//! An address is a slash-joined list of child names walked from the scene
//! root. `"."` (or the empty string) names the root itself, `".."` steps to
//! the parent and a leading `"./"` or `"/"` is ignored.

use std::fmt;

use crate::error::EngineError;

/// Characters that can never appear in a node name.
const RESERVED: &[char] = &['/', ':', '@', '"', '%', '\n', '\r'];

/// One step of an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Child(String),
    Parent,
}

/// A parsed node address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeAddress {
    segments: Vec<Segment>,
}

impl NodeAddress {
    /// The root address `"."`.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(address: &str) -> Self {
        let segments = address
            .trim()
            .split('/')
            .filter_map(|part| match part {
                "" | "." => None,
                ".." => Some(Segment::Parent),
                name => Some(Segment::Child(name.to_string())),
            })
            .collect();
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Append a child name.
    pub fn join(mut self, name: &str) -> Self {
        self.segments.push(Segment::Child(name.to_string()));
        self
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str(".");
        }
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match seg {
                Segment::Child(name) => f.write_str(name)?,
                Segment::Parent => f.write_str("..")?,
            }
        }
        Ok(())
    }
}

/// Check that `name` is usable as a node name.
pub fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(RESERVED) {
        return Err(EngineError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Characters allowed in a property key of the scene text format.
pub fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '/' | ':' | '.')
}

/// Check that `name` can be written as a property key.
pub fn validate_property_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() || !name.chars().all(is_key_char) {
        return Err(EngineError::InvalidPropertyName(name.to_string()));
    }
    Ok(())
}

/// Join a parent address and a child name into a canonical address.
pub fn child_address(parent: &str, name: &str) -> String {
    if parent == "." || parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}
