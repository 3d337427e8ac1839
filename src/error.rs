// Error types for chime
// Every failure a caller can observe maps onto one of these variants

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Sound file or resource missing or unreadable
    #[error("Failed to load sound from {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unsupported or corrupt audio data
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// No output line matching the stream format could be opened
    #[error("Output line unavailable: {0}")]
    LineUnavailable(String),

    /// Read or write failure while a session was streaming
    #[error("Stream I/O error: {0}")]
    StreamIo(String),

    /// The active line does not offer the requested control
    #[error("Unsupported control: {0}")]
    UnsupportedControl(String),

    /// No sound loaded under this key
    #[error("No sound loaded for key '{0}'")]
    UnknownKey(String),

    /// Operation not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Settings could not be read, parsed or written
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
