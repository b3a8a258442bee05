//! Scene file I/O and persisted-scene editing.

pub mod editor;
pub mod error;
pub mod notify;
pub mod project;
pub mod scene_file;
pub mod scene_text;

pub use editor::{ConnectionEntry, EditOutcome, NodeEntry, NodeProperties, SceneEditor};
pub use error::{EditError, EditResult};
pub use notify::{ChangeNotifier, ChangeQueue, SceneChange};
pub use project::{Project, ProjectResources};

/// File extension of scene files.
pub const SCENE_EXTENSION: &str = "tscn";
