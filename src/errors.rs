// SPDX-License-Identifier: MPL-2.0

//! Error types for the capture daemon
//!
//! Fatal errors travel up to `main` as [`AppError`]. The two recoverable kinds,
//! [`CommandParseError`] and [`PersistenceWarning`], are handled where they are
//! detected and only ever logged.

use crate::backends::camera::{Size, StreamRole};
use std::path::PathBuf;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Camera cannot produce the requested stream layout
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    /// Missing or unmapped buffer at encode or save time
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),
    /// Encoder completion callbacks out of step with submissions
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Camera driver errors
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    /// Illegal state machine transition
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    /// Encoder resource errors
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),
    /// Output sink errors
    #[error("Output error: {0}")]
    Output(#[from] OutputError),
    /// Still image errors
    #[error("Photo error: {0}")]
    Photo(#[from] PhotoError),
    /// Filesystem errors outside the more specific kinds above
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream layout and option errors (fatal, abort startup)
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// Driver returned no configuration for the requested roles
    #[error("failed to generate {0} configuration")]
    GenerateFailed(&'static str),
    /// Driver rejected the configuration after adjustment
    #[error("invalid camera configuration: {0}")]
    Invalid(String),
    /// Lores dimensions exceed the video stream
    #[error("low resolution stream {lores} larger than video {video}")]
    LoresLargerThanVideo { lores: Size, video: Size },
    /// The still path is bound to a stream that is not part of the layout
    #[error("still source {0} is not part of the active stream layout")]
    StillSourceUnavailable(StreamRole),
    /// The live layout has no stream for this role
    #[error("{0} stream is not configured")]
    StreamNotConfigured(StreamRole),
    /// A single option value failed validation
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    /// Config file could not be read or parsed
    #[error("config file {path}: {message}")]
    File { path: PathBuf, message: String },
}

/// Buffer precondition violations
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// Request completed without a buffer for the stream
    #[error("no buffer for {0} stream in completed request")]
    Missing(StreamRole),
    /// Buffer present but carries no mapped memory
    #[error("{0} buffer has no mapped memory")]
    Unmapped(StreamRole),
}

/// Encoder/adapter contract violations
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// An input-done callback fired with nothing outstanding
    #[error("no buffer available to return on {0} path")]
    QueueUnderflow(&'static str),
    /// Driver delivered a message the dispatcher does not understand
    #[error("unrecognised message from camera")]
    UnrecognisedMessage,
}

/// Camera driver errors
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// The driver stalled (recovered by stop + start)
    #[error("device timeout")]
    HardwareTimeout,
    /// Operation needs a committed configuration
    #[error("camera is not configured")]
    NotConfigured,
    /// Operation needs a running camera
    #[error("camera is not running")]
    NotRunning,
    /// Camera started twice
    #[error("camera already running")]
    AlreadyRunning,
    /// Capture thread is gone
    #[error("camera capture thread exited")]
    Disconnected,
    /// Driver-specific failure
    #[error("{0}")]
    Backend(String),
}

/// Capture session state machine errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Operation not allowed in the current state
    #[error("cannot {operation}: {reason}")]
    InvalidTransition {
        operation: &'static str,
        reason: String,
    },
    /// Stop on a path that is not running
    #[error("{0} path is not running")]
    NotRunning(&'static str),
}

/// Encoder resource errors
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    /// Codec name not known or not compiled in
    #[error("unsupported codec {0}")]
    UnsupportedCodec(String),
    /// Encoder could not be created for the stream
    #[error("encoder initialization failed: {0}")]
    InitializationFailed(String),
    /// Frame could not be encoded
    #[error("encoding failed: {0}")]
    EncodeFailed(String),
    /// Worker thread stopped accepting input
    #[error("encoder worker has exited")]
    WorkerGone,
}

/// Output sink errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// File could not be opened or written
    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Network peer failure
    #[error("network output {target}: {source}")]
    Network {
        target: String,
        #[source]
        source: std::io::Error,
    },
    /// Malformed output target
    #[error("invalid output target {0}")]
    InvalidTarget(String),
    /// Metadata serialization failure
    #[error("metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Still image errors
#[derive(Debug, thiserror::Error)]
pub enum PhotoError {
    /// Encoding library failure
    #[error("encoding failed: {0}")]
    EncodingFailed(String),
    /// Pixel format cannot be saved with the requested encoding
    #[error("cannot save {format} frame as {encoding}")]
    UnsupportedFormat {
        format: String,
        encoding: &'static str,
    },
    /// Writing the image file failed
    #[error("save to {path} failed: {source}")]
    SaveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Malformed or unknown control command (logged and ignored)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandParseError {
    /// Blank line
    #[error("empty command")]
    Empty,
    /// Command token not in the table
    #[error("unknown command {0}")]
    UnknownCommand(String),
    /// Required argument absent
    #[error("{0} requires an argument")]
    MissingArgument(&'static str),
    /// Argument not parseable as the expected type
    #[error("{command}: invalid argument {argument}")]
    InvalidArgument {
        command: &'static str,
        argument: String,
    },
    /// Argument parsed but outside the accepted domain
    #[error("{command}: {argument} outside {domain}")]
    OutOfRange {
        command: &'static str,
        argument: String,
        domain: &'static str,
    },
}

/// Counter file or symlink update failure (logged, never aborts the caller)
#[derive(Debug, thiserror::Error)]
#[error("could not update {what} at {path}: {source}")]
pub struct PersistenceWarning {
    pub what: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl PersistenceWarning {
    pub fn new(what: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            what,
            path: path.into(),
            source,
        }
    }
}

impl AppError {
    /// Whether the dispatcher may continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AppError::Camera(CameraError::HardwareTimeout))
    }
}
