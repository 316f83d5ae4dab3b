//! Error types for palette extraction

use std::collections::TryReserveError;

use thiserror::Error;

/// Result type alias for palette extraction
pub type Result<T> = std::result::Result<T, PaletteError>;

/// Everything that can stop an extraction call
#[derive(Error, Debug)]
pub enum PaletteError {
    /// The bitmap has no usable pixel representation
    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    /// The working pixel buffer could not be reserved
    #[error("Failed to allocate {bytes} bytes for the working pixel buffer")]
    AllocationFailure {
        bytes: usize,
        #[source]
        source: TryReserveError,
    },

    /// A tuning parameter is out of range
    #[error("Invalid parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },

    /// An encoded image could not be decoded (host-side helpers only)
    #[error("Failed to decode image")]
    Decode {
        #[from]
        source: image::ImageError,
    },

    /// A configuration document could not be parsed or written
    #[error("Configuration error")]
    Config {
        #[from]
        source: serde_json::Error,
    },

    #[error("I/O error")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The host cancelled the call at a checkpoint
    #[error("Extraction cancelled")]
    Cancelled,
}

impl PaletteError {
    pub fn invalid_image(reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            reason: reason.into(),
        }
    }

    pub fn invalid_parameter(parameter: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }

    /// Cancellation unwinds through `?` like an error but is not a failure.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PaletteError::Cancelled)
    }
}
