//! Error types for the audio graph engine.

use thiserror::Error;

/// Main error type for the audio engine.
#[derive(Debug, Error)]
pub enum Error {
    /// IO errors from stream operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A source file could not be opened
    #[error("Failed to open audio file: {path}")]
    FileOpen { path: String },

    /// Unknown file extension or incompatible port formats
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The compressed stream could not be probed or decoded
    #[error("Failed to open decoder: {0}")]
    DecoderOpen(String),

    /// Cycle, dangling link or missing sink in a graph
    #[error("Invalid audio graph: {0}")]
    InvalidGraph(String),

    /// The allocator could not satisfy a request
    #[error("Out of memory: failed to allocate {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Resampler initialisation or processing failure
    #[error("Resampling error: {0}")]
    Resample(String),

    /// Missing or ill-typed element construction argument
    #[error("Bad element argument: {element}.{arg}: {reason}")]
    BadArgument {
        element: String,
        arg: String,
        reason: String,
    },

    /// Device sink failure
    #[error("Audio device error: {0}")]
    Device(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;
