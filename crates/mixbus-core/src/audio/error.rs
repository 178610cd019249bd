//! Audio device error types

use thiserror::Error;

/// Errors that can occur while opening or driving an output device
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio devices available
    #[error("No audio output devices found")]
    NoDevices,

    /// Failed to get default device
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// Device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to negotiate a stream configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Unsupported sample format
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start the stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Failed to pause the stream
    #[error("Failed to pause audio stream: {0}")]
    StreamPauseError(String),

    /// Start/stop called before a successful open
    #[error("Audio device is not open")]
    NotOpen,
}

/// Result type for audio device operations
pub type AudioResult<T> = Result<T, AudioError>;
