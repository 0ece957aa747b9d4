//! Error types for avfeed
//!
//! This module defines the error type used throughout the crate. We use
//! thiserror for the library error and leave anyhow to the binary.
//!
//! Only open-time failures are ever returned to the caller. Once the worker
//! threads are running, stream-level failures are logged and surface as
//! end-of-stream through the pull API.

use thiserror::Error;

/// Main error type for avfeed
#[derive(Error, Debug)]
pub enum AvFeedError {
    /// The media source could not be opened or probed
    #[error("Open error: {0}")]
    Open(String),

    /// Decoder setup or decoding errors
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Filter graph errors
    #[error("Filter error: {0}")]
    Filter(String),

    /// Video scaler errors
    #[error("Scaler error: {0}")]
    Scaler(String),

    /// Audio resampler errors
    #[error("Resampler error: {0}")]
    Resampler(String),

    /// Subtitle decoding errors
    #[error("Subtitle error: {0}")]
    Subtitle(String),

    /// Output buffer allocation failed
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// A worker thread could not be started
    #[error("Thread error: {0}")]
    Thread(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Neither a video nor an audio stream is available
    #[error("No video or audio streams found")]
    NoStreams,

}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for AvFeedError {
    fn from(err: ffmpeg_next::Error) -> Self {
        AvFeedError::Decoder(format!("FFmpeg error: {}", err))
    }
}

impl From<std::ffi::NulError> for AvFeedError {
    fn from(err: std::ffi::NulError) -> Self {
        AvFeedError::InvalidInput(format!("FFI string error: {}", err))
    }
}

impl From<std::collections::TryReserveError> for AvFeedError {
    fn from(err: std::collections::TryReserveError) -> Self {
        AvFeedError::Allocation(err.to_string())
    }
}

/// Convenience type alias for Results in avfeed
pub type Result<T> = std::result::Result<T, AvFeedError>;

/// Extension trait for converting other errors to AvFeedError
pub trait IntoFeedError<T> {
    /// Convert this error into an AvFeedError with the given context
    fn open_err(self, context: &str) -> Result<T>;
    fn decoder_err(self, context: &str) -> Result<T>;
    fn filter_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoFeedError<T> for std::result::Result<T, E> {
    fn open_err(self, context: &str) -> Result<T> {
        self.map_err(|e| AvFeedError::Open(format!("{}: {}", context, e)))
    }

    fn decoder_err(self, context: &str) -> Result<T> {
        self.map_err(|e| AvFeedError::Decoder(format!("{}: {}", context, e)))
    }

    fn filter_err(self, context: &str) -> Result<T> {
        self.map_err(|e| AvFeedError::Filter(format!("{}: {}", context, e)))
    }
}
