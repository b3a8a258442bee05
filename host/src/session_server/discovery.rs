//! Discovery file management for the session server.
//!
//! Each running host writes a JSON file with its connection info so
//! controllers can find it without being told the port.
//!
//! Platform paths:
//! - Linux: $XDG_STATE_HOME/scenewire/sessions/<id>.json
//! - macOS: ~/Library/Application Support/SceneWire/sessions/<id>.json
//! - Windows: %LOCALAPPDATA%\SceneWire\sessions\<id>.json

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use scenewire_protocol::{DiscoveryFile, PROTOCOL_VERSION};
use uuid::Uuid;

/// Build the discovery record for this process.
pub fn new_discovery(port: u16, project_root: Option<PathBuf>, app_name: String) -> DiscoveryFile {
    DiscoveryFile {
        session_id: Uuid::new_v4().to_string(),
        port,
        pid: std::process::id(),
        project_root,
        app_name,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        protocol_version: PROTOCOL_VERSION.to_string(),
    }
}

/// Owns this session's discovery file and removes it on drop.
pub struct DiscoveryManager {
    path: PathBuf,
    discovery: DiscoveryFile,
}

impl DiscoveryManager {
    /// Write a discovery file into the platform discovery directory.
    pub fn new(port: u16, project_root: Option<PathBuf>, app_name: String) -> std::io::Result<Self> {
        Self::in_dir(&discovery_dir()?, port, project_root, app_name)
    }

    /// Write a discovery file into `dir`.
    pub fn in_dir(
        dir: &Path,
        port: u16,
        project_root: Option<PathBuf>,
        app_name: String,
    ) -> std::io::Result<Self> {
        let discovery = new_discovery(port, project_root, app_name);
        let path = dir.join(format!("{}.json", discovery.session_id));
        let manager = Self { path, discovery };
        manager.write()?;
        Ok(manager)
    }

    pub fn discovery(&self) -> &DiscoveryFile {
        &self.discovery
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.discovery.session_id
    }

    /// Write the discovery file atomically (temp file, then rename).
    fn write(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            let json = serde_json::to_string_pretty(&self.discovery)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    /// Remove the discovery file (called on shutdown).
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Drop for DiscoveryManager {
    fn drop(&mut self) {
        // Best-effort cleanup on drop
        let _ = self.cleanup();
    }
}

/// Platform-specific directory for discovery files.
pub fn discovery_dir() -> std::io::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        // $XDG_STATE_HOME/scenewire/sessions or ~/.local/state/scenewire/sessions
        let base = std::env::var("XDG_STATE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local/state")
            });
        Ok(base.join("scenewire/sessions"))
    }

    #[cfg(target_os = "macos")]
    {
        let base = dirs::data_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("Library/Application Support")
        });
        Ok(base.join("SceneWire/sessions"))
    }

    #[cfg(target_os = "windows")]
    {
        let base = dirs::data_local_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("C:\\"))
                .join("AppData\\Local")
        });
        Ok(base.join("SceneWire\\sessions"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Ok(std::env::temp_dir().join("scenewire/sessions"))
    }
}
