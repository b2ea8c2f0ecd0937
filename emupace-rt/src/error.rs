//! Error types for emupace-rt
//!
//! Pacing itself has no fatal conditions. Errors only come from
//! configuration and from audio device setup.

use thiserror::Error;

/// Main error type for emupace-rt
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Errors from the common crate
    #[error(transparent)]
    Common(#[from] emupace_common::Error),
}

/// Convenience Result type using emupace-rt Error
pub type Result<T> = std::result::Result<T, Error>;
