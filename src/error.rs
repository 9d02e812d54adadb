//! Error types for the zwave-manager library.

use thiserror::Error;

use crate::types::HomeId;

/// The main error type for manager operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A driver is already registered for this controller path.
    #[error("driver already exists for {path}")]
    AlreadyExists { path: String },

    /// No driver is registered for this controller path.
    #[error("no driver found for {path}")]
    NotFound { path: String },

    /// No driver is registered for this home id.
    #[error("unknown home {home_id}")]
    UnknownHome { home_id: HomeId },

    /// The controller link could not be opened.
    #[error("failed to open controller at {path}: {source}")]
    ConnectionFailed {
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// Poll intensity must be at least 1 when enabling polling.
    #[error("poll intensity must be at least 1")]
    InvalidIntensity,

    /// A manager instance is already active in this process.
    #[error("a manager instance is already active")]
    AlreadyInitialized,

    /// The manager has been destroyed.
    #[error("manager is not initialized")]
    NotInitialized,

    /// The controller link is closed.
    #[error("controller link closed")]
    LinkClosed,
}

/// Result type alias for manager operations.
pub type Result<T> = std::result::Result<T, Error>;
