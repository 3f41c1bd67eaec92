//! Error types for the stream inlet

use thiserror::Error;

use crate::protocol::{ChannelFormat, PropertyKey};

/// Configuration errors, raised before any state changes
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid output channel count {0} (must be 1, 2, 4, 8, 16, or 32)")]
    InvalidOutputChannels(u32),

    #[error("Block size must be non-zero")]
    ZeroBlockSize,

    #[error("Local sample rate must be positive, got {0}")]
    InvalidSampleRate(f64),

    #[error("Ring buffer length must be at least one block")]
    ZeroBufferLength,

    #[error("Lag of {lag_blocks} blocks does not fit a {buffer_blocks}-block ring buffer")]
    LagExceedsBuffer { lag_blocks: usize, buffer_blocks: usize },

    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors reported by the external stream service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Failed to open stream: {0}")]
    OpenFailed(String),

    #[error("Stream lost")]
    StreamLost,

    #[error("Stream handle closed")]
    Closed,
}

/// Stream directory errors. All of these are retryable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("Streams cannot be resolved at this time, another resolution is in flight")]
    Busy,

    #[error("No streams with {key} matching {value:?}")]
    NoMatch { key: PropertyKey, value: String },

    #[error("Discovery failed: {0}")]
    Discovery(#[from] NetworkError),

    #[error("Failed to launch resolver thread: {0}")]
    LaunchFailed(String),
}

/// Connection manager errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    #[error("No stream descriptors available, resolve streams first")]
    NoCandidates,

    #[error("Invalid selection {index} from {available} available streams")]
    IndexOutOfRange { index: usize, available: usize },

    #[error("Unsupported channel format {0}, only float32, double64 and int32 are allowed")]
    UnsupportedFormat(ChannelFormat),

    #[error("Stream has no nominal sampling rate")]
    IrregularRate,

    #[error("Stream has {requested} channels but only {available} outputs are configured")]
    TooManyChannels { requested: usize, available: usize },

    #[error("Ring buffer of {capacity} samples cannot hold {required} samples at this rate ratio")]
    BufferTooSmall { required: usize, capacity: usize },

    #[error("Failed to open stream: {0}")]
    OpenFailed(NetworkError),

    #[error("Failed to launch acquisition thread: {0}")]
    LaunchFailed(String),

    #[error(transparent)]
    Resolution(#[from] DirectoryError),
}

/// Audio device errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported device configuration: {0}")]
    UnsupportedConfig(String),
}

/// Control command parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid stream index: {0}")]
    InvalidIndex(String),

    #[error("Invalid property: {0}")]
    InvalidProperty(String),
}
