//! Configuration management for Flux
//!
//! Settings are read from a TOML file. Every section and every field has a
//! default, so an empty or missing file yields a working compositor.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ipc::IpcOptions;
use crate::present::PresentOptions;
use crate::scene::{Color, SceneLimits};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/flux/flux.toml";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_ENV: &str = "FLUX_CONFIG";

/// Main configuration struct containing all Flux settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FluxConfig {
    /// Display device and presentation timing
    #[serde(default)]
    pub display: DisplayConfig,

    /// Control socket
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Capacity limits of the scene
    #[serde(default)]
    pub scene: SceneLimits,

    /// Built-in shell windows
    #[serde(default)]
    pub shell: ShellConfig,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    /// DRM card node
    pub device: PathBuf,

    /// Swap-chain buffers (at least 2)
    pub buffers: usize,

    /// Single page-flip wait timeout (milliseconds)
    pub flip_timeout_ms: u64,

    /// Wait cycles before a flip is reported as timed out
    pub flip_timeout_cycles: u32,

    /// Ticks a timed-out flip may be waited on again before the loop stops
    pub flip_retries: u32,

    /// Upper bound on one event loop wait (milliseconds)
    pub frame_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IpcConfig {
    pub socket_path: PathBuf,

    /// Concurrent client connections
    pub max_clients: usize,

    /// Largest accepted request body (bytes)
    pub max_request_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Baked font manifest used for the clock and menu title
    pub font: Option<PathBuf>,

    /// Menu title size
    pub body_size: f32,
    /// Clock size
    pub heading_size: f32,

    /// PNG shown on the home window at (100, 500), 200x200
    pub home_image: Option<PathBuf>,

    /// Heading drawn at the top of the menu panel
    pub menu_title: String,

    /// PNG cursor image. A plain square is drawn when unset.
    pub cursor_image: Option<PathBuf>,
    pub cursor_size: f32,

    /// Colors as `#RRGGBBAA`
    pub background_color: String,
    pub menu_color: String,
    pub menu_scrim_color: String,

    /// Key code toggling the menu overlay (KEY_LEFTMETA)
    pub menu_key: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    /// Read input devices through libinput
    pub enabled: bool,

    /// udev seat
    pub seat: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log filter, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/dri/card0"),
            buffers: 3,
            flip_timeout_ms: 100,
            flip_timeout_cycles: 10,
            flip_retries: 2,
            frame_interval_ms: 16,
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/flux_comp.sock"),
            max_clients: 8,
            max_request_bytes: crate::protocol::DEFAULT_MAX_REQUEST,
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            font: None,
            body_size: 24.0,
            heading_size: 48.0,
            home_image: None,
            menu_title: "Menu".to_string(),
            cursor_image: None,
            cursor_size: 24.0,
            background_color: "#1c1c1cff".to_string(),
            menu_color: "#1c1c1cff".to_string(),
            menu_scrim_color: "#000000b2".to_string(),
            menu_key: crate::input::keys::KEY_LEFTMETA,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seat: "seat0".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl DisplayConfig {
    pub fn present_options(&self) -> PresentOptions {
        PresentOptions {
            buffers: self.buffers,
            flip_timeout: Duration::from_millis(self.flip_timeout_ms),
            flip_timeout_cycles: self.flip_timeout_cycles,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl IpcConfig {
    pub fn options(&self) -> IpcOptions {
        IpcOptions {
            max_clients: self.max_clients,
            max_request_bytes: self.max_request_bytes,
        }
    }
}

impl FluxConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = match path.strip_prefix("~") {
            Ok(rest) => {
                let home =
                    std::env::var("HOME").context("Failed to get HOME environment variable")?;
                Path::new(&home).join(rest)
            }
            Err(_) => path.to_path_buf(),
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: FluxConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Path named by `FLUX_CONFIG`, or the default location.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load from `path`, falling back to defaults when the file does not
    /// exist. A file that exists but does not parse is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.display.buffers < 2 {
            anyhow::bail!("Invalid display.buffers: need at least 2");
        }
        if self.display.flip_timeout_cycles == 0 {
            anyhow::bail!("Invalid display.flip_timeout_cycles: must be at least 1");
        }
        if self.display.frame_interval_ms == 0 || self.display.frame_interval_ms > 1000 {
            anyhow::bail!("Invalid display.frame_interval_ms: must be between 1 and 1000");
        }

        if self.ipc.max_clients == 0 {
            anyhow::bail!("Invalid ipc.max_clients: must be at least 1");
        }
        // Window id header plus at least a one-byte command.
        if self.ipc.max_request_bytes < 5 {
            anyhow::bail!("Invalid ipc.max_request_bytes: must be at least 5");
        }

        if self.scene.max_windows == 0 || self.scene.max_widgets == 0 {
            anyhow::bail!("Invalid scene limits: capacities must be non-zero");
        }

        for (name, size) in [
            ("body_size", self.shell.body_size),
            ("heading_size", self.shell.heading_size),
            ("cursor_size", self.shell.cursor_size),
        ] {
            if !(size > 0.0 && size <= 512.0) {
                anyhow::bail!("Invalid shell.{}: must be between 0 and 512", name);
            }
        }
        for (name, hex) in [
            ("background_color", &self.shell.background_color),
            ("menu_color", &self.shell.menu_color),
            ("menu_scrim_color", &self.shell.menu_scrim_color),
        ] {
            Color::parse_hex(hex).with_context(|| format!("Invalid shell.{}", name))?;
        }

        if self.logging.level.trim().is_empty() {
            anyhow::bail!("Invalid logging.level: must not be empty");
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests;
