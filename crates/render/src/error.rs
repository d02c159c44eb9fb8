//! Error types for rendering and configuration

use notecanvas_cache::SurfaceError;
use std::io;
use std::path::PathBuf;

/// Errors that can occur while rendering a page region
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Offscreen surface could not be created
    #[error("surface error: {0}")]
    Surface(#[from] SurfaceError),

    /// The painter reported a failure
    #[error("painter failed on page {page}: {message}")]
    Painter { page: usize, message: String },

    /// Page index outside the document
    #[error("invalid page index: {0}")]
    InvalidPage(usize),
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur during configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// I/O error reading or writing the configuration file
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration file is not valid TOML
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}
