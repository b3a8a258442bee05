// Host and controller settings
// Loaded from ~/.config/scenewire/settings.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ConfigError;

/// Default TCP port of the session server.
pub const DEFAULT_PORT: u16 = 6505;

/// Image format for captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    /// Lossless PNG (default)
    #[default]
    Png,
    /// Raw RGBA8 bytes, row-major
    Raw,
}

impl CaptureFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Some(CaptureFormat::Png),
            "raw" => Some(CaptureFormat::Raw),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureFormat::Png => "png",
            CaptureFormat::Raw => "raw",
        }
    }
}

/// `[server]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address. Loopback only unless changed explicitly.
    pub bind: String,
    /// Listen port; 0 picks a free port.
    pub port: u16,
    /// Connections beyond this are refused at accept time
    pub max_connections: usize,
    /// Write a discovery file while running
    pub discovery: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_connections: 16,
            discovery: true,
        }
    }
}

/// `[host]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub app_name: String,
    /// Project directory; `res://` locators resolve against it
    pub project_root: PathBuf,
    /// Scene opened in the live tree at startup
    pub main_scene: Option<String>,
    /// Target frames per second of the host loop
    pub frame_rate: u32,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            app_name: "SceneWire Host".to_string(),
            project_root: PathBuf::from("."),
            main_scene: None,
            frame_rate: 60,
            window_width: 640,
            window_height: 360,
        }
    }
}

/// `[capture]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub default_format: CaptureFormat,
    /// Largest width or height a capture may be resized to
    pub max_dimension: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            default_format: CaptureFormat::Png,
            max_dimension: 4096,
        }
    }
}

/// `[client]` section, used by `swctl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Read timeout for a single response, in milliseconds
    pub timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub host: HostSettings,
    pub capture: CaptureSettings,
    pub client: ClientSettings,
}

impl Settings {
    /// Default settings file location
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scenewire")
            .join("settings.toml")
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load_from(p),
            None => {
                let default = Self::path();
                if default.exists() {
                    Self::load_from(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                source_name: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text).map_err(|e| ConfigError::Parse {
            source_name: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_toml()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values the host cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid("server.max_connections must be at least 1".into()));
        }
        if self.host.frame_rate == 0 || self.host.frame_rate > 1000 {
            return Err(ConfigError::Invalid("host.frame_rate must be between 1 and 1000".into()));
        }
        if self.host.window_width == 0 || self.host.window_height == 0 {
            return Err(ConfigError::Invalid("host window size must be non-zero".into()));
        }
        if self.capture.max_dimension == 0 {
            return Err(ConfigError::Invalid("capture.max_dimension must be non-zero".into()));
        }
        Ok(())
    }

    /// `bind:port` listen address.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}
