//! Project file locators.
//!
//! Scenes and resources are named by locators that are either
//! `res://`-prefixed or relative to the project root. Locators never
//! escape the project: absolute paths and `..` components are rejected.

use std::path::{Component, Path, PathBuf};

use scenewire_engine::resource::ResourceResolver;
use scenewire_engine::value::ResourceRef;

use crate::error::{EditError, EditResult};

pub const RES_PREFIX: &str = "res://";

/// Root directory of a project on disk.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical `res://` form of a locator.
    pub fn normalize(&self, locator: &str) -> EditResult<String> {
        let rel = relative_part(locator)?;
        Ok(format!("{}{}", RES_PREFIX, rel))
    }

    /// Filesystem path for a locator.
    pub fn resolve(&self, locator: &str) -> EditResult<PathBuf> {
        let rel = relative_part(locator)?;
        Ok(self.root.join(rel))
    }

    pub fn exists(&self, locator: &str) -> bool {
        self.resolve(locator).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// Validate a locator and return its project-relative part with `/`
/// separators.
fn relative_part(locator: &str) -> EditResult<String> {
    let trimmed = locator.trim();
    let rel = trimmed.strip_prefix(RES_PREFIX).unwrap_or(trimmed);
    if rel.is_empty() {
        return Err(EditError::InvalidLocator(locator.to_string()));
    }
    let path = Path::new(rel);
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(s) => parts.push(s),
                None => return Err(EditError::InvalidLocator(locator.to_string())),
            },
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(EditError::InvalidLocator(locator.to_string()))
            }
        }
    }
    if parts.is_empty() {
        return Err(EditError::InvalidLocator(locator.to_string()));
    }
    Ok(parts.join("/"))
}

/// Guess a resource class from a file extension.
pub fn class_for_extension(locator: &str) -> &'static str {
    let ext = Path::new(locator)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "svg" | "webp" | "bmp" => "Texture2D",
        "wav" | "ogg" | "mp3" => "AudioStream",
        "tscn" => "PackedScene",
        "ttf" | "otf" => "FontFile",
        _ => "Resource",
    }
}

/// Resolves resource references against files in the project.
///
/// A reference resolves when its locator is valid and the file exists. An
/// empty class is filled in from the file extension.
#[derive(Debug, Clone)]
pub struct ProjectResources<'a> {
    project: &'a Project,
}

impl<'a> ProjectResources<'a> {
    pub fn new(project: &'a Project) -> Self {
        Self { project }
    }
}

impl ResourceResolver for ProjectResources<'_> {
    fn resolve(&self, path: &str, class: &str) -> Option<ResourceRef> {
        let locator = self.project.normalize(path).ok()?;
        if !self.project.exists(&locator) {
            return None;
        }
        let class = if class.is_empty() {
            class_for_extension(&locator).to_string()
        } else {
            class.to_string()
        };
        Some(ResourceRef::new(locator, class))
    }
}
