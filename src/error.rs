//! Error types for the bridge.
//!
//! Errors stay inside the crate's control path. The host-facing callbacks in
//! [`crate::plugin`] log them and fall back to sentinel values, so nothing
//! here ever reaches the render thread.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the engine, catalog and configuration layers.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A bank directory could not be listed.
    #[error("failed to read bank directory {}: {source}", path.display())]
    BankIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An instrument file could not be opened or parsed.
    #[error("failed to load instrument {}: {reason}", path.display())]
    InstrumentLoad { path: PathBuf, reason: String },

    /// The synthesizer rejected its settings or SoundFont.
    #[error("failed to create synthesizer: {0}")]
    Synthesizer(String),

    /// A state chunk could not be encoded or decoded.
    #[error("invalid state chunk: {0}")]
    State(#[from] bincode::Error),

    /// A state chunk was written by an incompatible version.
    #[error("unsupported state chunk version {0}")]
    StateVersion(u32),

    /// The configuration file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed.
    #[error("invalid config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The instance was not yet activated or is being torn down.
    #[error("instance is not active")]
    NotActive,

    /// A previous holder of the render lock panicked.
    #[error("engine lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
