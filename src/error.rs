use std::sync::{Mutex, PoisonError};
use log::warn;
use thiserror::Error;

/// Main player error type
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("System error: {0}")]
    System(String),

    #[error("CLI parse error: {0}")]
    Parse(#[from] crate::cli::ParseError),
}

impl PlayerError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Device(err) => err.user_message(),
            PlayerError::Decode(err) => err.user_message(),
            PlayerError::Config(err) => err.user_message(),
            PlayerError::Queue(err) => err.user_message(),
            PlayerError::File(err) => format!("File system error: {}", err),
            PlayerError::System(msg) => format!("System error: {}", msg),
            PlayerError::Parse(err) => format!("Command error: {}", err),
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlayerError::Device(DeviceError::NotFound { .. }) => ErrorSeverity::Error,
            PlayerError::Device(_) => ErrorSeverity::Critical,
            PlayerError::Decode(DecodeError::UnknownFileType { .. }) => ErrorSeverity::Warning,
            PlayerError::Decode(_) => ErrorSeverity::Error,
            PlayerError::Config(_) => ErrorSeverity::Warning,
            PlayerError::Queue(QueueError::EmptyQueue) => ErrorSeverity::Info,
            PlayerError::Queue(_) => ErrorSeverity::Warning,
            PlayerError::File(_) => ErrorSeverity::Error,
            PlayerError::System(_) => ErrorSeverity::Critical,
            PlayerError::Parse(_) => ErrorSeverity::Info,
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error | ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Audio device errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device not found: {device}")]
    NotFound { device: String },

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Failed to open device: {0}")]
    Open(String),

    #[error("Failed to write to device: {0}")]
    Write(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl DeviceError {
    pub fn user_message(&self) -> String {
        match self {
            DeviceError::NotFound { device } => {
                format!("Audio device '{}' is not available or has been disconnected", device)
            }
            DeviceError::UnsupportedFormat { format } => {
                format!("The audio device cannot play {}", format)
            }
            DeviceError::Open(msg) => format!("Failed to open audio device: {}", msg),
            DeviceError::Write(msg) => format!("Audio playback interrupted: {}", msg),
            DeviceError::Stream(msg) => format!("Audio stream failed: {}", msg),
        }
    }
}

/// Audio decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Unknown file type: {path}")]
    UnknownFileType { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed stream: {0}")]
    Malformed(String),

    #[error("Unsupported stream: {0}")]
    Unsupported(String),
}

impl DecodeError {
    pub fn user_message(&self) -> String {
        match self {
            DecodeError::FileNotFound { path } => format!("Cannot find audio file: {}", path),
            DecodeError::UnknownFileType { path } => {
                format!("File '{}' is not a supported audio format", path)
            }
            DecodeError::Io(err) => format!("Cannot read audio file: {}", err),
            DecodeError::Malformed(msg) => {
                format!("Audio file appears to be corrupted or damaged: {}", msg)
            }
            DecodeError::Unsupported(msg) => format!("Audio stream is not supported: {}", msg),
        }
    }

    /// The latched error kind this failure is reported as
    pub fn kind(&self) -> PlayerErrorKind {
        match self {
            DecodeError::FileNotFound { .. } => PlayerErrorKind::FileNotFound,
            DecodeError::UnknownFileType { .. } => PlayerErrorKind::UnknownFileType,
            DecodeError::Io(_) | DecodeError::Malformed(_) | DecodeError::Unsupported(_) => {
                PlayerErrorKind::FileError
            }
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => format!("Cannot access configuration file: {}", err),
            ConfigError::SerializationError(_) => "Failed to save configuration settings".to_string(),
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
        }
    }
}

/// Queue management errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Queue is empty")]
    EmptyQueue,

    #[error("Invalid index: {index}")]
    InvalidIndex { index: usize },
}

impl QueueError {
    pub fn user_message(&self) -> String {
        match self {
            QueueError::FileNotFound { path } => format!("Cannot find audio file: {}", path),
            QueueError::EmptyQueue => "No songs in queue - add some files first".to_string(),
            QueueError::InvalidIndex { index } => {
                format!("Song number {} is not valid for current queue", index + 1)
            }
        }
    }
}

/// Kinds of errors the worker threads latch for the command layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerErrorKind {
    FileError,
    AudioDeviceError,
    SystemError,
    UnknownFileType,
    FileNotFound,
}

impl PlayerErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerErrorKind::FileError => "file error",
            PlayerErrorKind::AudioDeviceError => "audio device error",
            PlayerErrorKind::SystemError => "system error",
            PlayerErrorKind::UnknownFileType => "unknown file type",
            PlayerErrorKind::FileNotFound => "file not found",
        }
    }
}

/// An error waiting to be acknowledged by the command layer
#[derive(Debug, Clone, PartialEq)]
pub struct LatchedError {
    pub kind: PlayerErrorKind,
    pub message: String,
}

impl std::fmt::Display for LatchedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Process-wide slot holding at most one pending player error
#[derive(Debug, Default)]
pub struct ErrorLatch {
    slot: Mutex<Option<LatchedError>>,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an error, replacing any unacknowledged one
    pub fn latch(&self, kind: PlayerErrorKind, message: impl Into<String>) {
        let error = LatchedError {
            kind,
            message: message.into(),
        };
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.as_ref() {
            warn!("Clobbering unacknowledged player error ({}) with ({})", previous, error);
        }
        *slot = Some(error);
    }

    /// Look at the pending error without acknowledging it
    pub fn peek(&self) -> Option<LatchedError> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Acknowledge and return the pending error
    pub fn take(&self) -> Option<LatchedError> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn clear(&self) {
        self.take();
    }
}

/// Text of a panic payload caught from a worker thread
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
