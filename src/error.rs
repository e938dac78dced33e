//! Error types for the replay recorder

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler is already running")]
    AlreadyRunning,
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Per-stream errors
///
/// None of these are fatal to the scheduler; they are contained at the
/// stream boundary and only reported to whoever fed the packet.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Packet has no stream identity")]
    MissingIdentity,

    #[error("Decoder unavailable for stream {0}: {1}")]
    DecoderUnavailable(u64, CodecError),

    #[error("Frame dropped on stream {0}: {1}")]
    FrameDropped(u64, CodecError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
