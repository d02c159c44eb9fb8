//! Renderer configuration
//!
//! Settings can be loaded from a TOML file, from environment variables, or
//! created programmatically with the `with_*` builders.

use crate::error::ConfigError;
use notecanvas_cache::TILE_SIZE;
use notecanvas_scheduler::DEFAULT_WORKER_NAME;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const ENV_TILE_SIZE: &str = "NOTECANVAS_TILE_SIZE";
const ENV_RETENTION_RADIUS: &str = "NOTECANVAS_RETENTION_RADIUS";
const ENV_DIRTY_PADDING: &str = "NOTECANVAS_DIRTY_PADDING";
const ENV_PARALLEL_TILES: &str = "NOTECANVAS_PARALLEL_TILES";
const ENV_THUMBNAIL_WIDTH: &str = "NOTECANVAS_THUMBNAIL_WIDTH";
const ENV_WORKER_NAME: &str = "NOTECANVAS_WORKER_NAME";

/// Configuration for the background renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Tile edge length in device pixels
    pub tile_size: u32,

    /// Margin kept cached around the visible area, in device pixels
    pub retention_radius: u32,

    /// Padding added around each dirty rectangle, in document units
    pub dirty_padding: f64,

    /// Render missing tiles on the rayon pool instead of one by one
    pub parallel_tiles: bool,

    /// Thumbnail width in pixels
    pub thumbnail_width: u32,

    /// Name of the scheduler's worker thread
    pub worker_thread_name: String,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            tile_size: TILE_SIZE,
            retention_radius: TILE_SIZE,
            dirty_padding: 2.0,
            parallel_tiles: true,
            thumbnail_width: 160,
            worker_thread_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }
}

impl CanvasConfig {
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_retention_radius(mut self, radius: u32) -> Self {
        self.retention_radius = radius;
        self
    }

    pub fn with_dirty_padding(mut self, padding: f64) -> Self {
        self.dirty_padding = padding;
        self
    }

    pub fn with_parallel_tiles(mut self, parallel: bool) -> Self {
        self.parallel_tiles = parallel;
        self
    }

    pub fn with_thumbnail_width(mut self, width: u32) -> Self {
        self.thumbnail_width = width;
        self
    }

    pub fn with_worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = name.into();
        self
    }

    /// Default location of the configuration file
    ///
    /// - macOS: ~/Library/Application Support/notecanvas/render.toml
    /// - Linux: ~/.config/notecanvas/render.toml
    /// - Windows: %APPDATA%\notecanvas\render.toml
    pub fn default_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("notecanvas").join("render.toml")
        } else {
            PathBuf::from("notecanvas-render.toml")
        }
    }

    /// Loads configuration from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `NOTECANVAS_TILE_SIZE`: tile size in pixels (default: 256)
    /// - `NOTECANVAS_RETENTION_RADIUS`: retention margin in pixels (default: 256)
    /// - `NOTECANVAS_DIRTY_PADDING`: dirty rect padding (default: 2.0)
    /// - `NOTECANVAS_PARALLEL_TILES`: `true` or `false` (default: true)
    /// - `NOTECANVAS_THUMBNAIL_WIDTH`: thumbnail width in pixels (default: 160)
    /// - `NOTECANVAS_WORKER_NAME`: worker thread name
    ///
    /// # Errors
    /// Returns an error if any variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = env_parse(ENV_TILE_SIZE)? {
            config.tile_size = val;
        }
        if let Some(val) = env_parse(ENV_RETENTION_RADIUS)? {
            config.retention_radius = val;
        }
        if let Some(val) = env_parse(ENV_DIRTY_PADDING)? {
            config.dirty_padding = val;
        }
        if let Some(val) = env_parse(ENV_PARALLEL_TILES)? {
            config.parallel_tiles = val;
        }
        if let Some(val) = env_parse(ENV_THUMBNAIL_WIDTH)? {
            config.thumbnail_width = val;
        }
        if let Ok(val) = std::env::var(ENV_WORKER_NAME) {
            config.worker_thread_name = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Missing keys keep their defaults:
    /// ```toml
    /// tile_size = 256
    /// retention_radius = 512
    /// dirty_padding = 2.0
    /// parallel_tiles = true
    /// thumbnail_width = 160
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(io_err)
    }

    /// Check values that would make rendering impossible
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_size == 0 {
            return Err(ConfigError::InvalidValue("tile_size".to_string()));
        }
        if self.thumbnail_width == 0 {
            return Err(ConfigError::InvalidValue("thumbnail_width".to_string()));
        }
        if !self.dirty_padding.is_finite() || self.dirty_padding < 0.0 {
            return Err(ConfigError::InvalidValue("dirty_padding".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}
