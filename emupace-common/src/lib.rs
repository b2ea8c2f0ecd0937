//! # emupace common library
//!
//! Shared code for the emupace crates:
//! - Settings file model and discovery
//! - Fixed-point tick rate arithmetic
//! - Emulated machine calendar date
//! - Error types

pub mod config;
pub mod error;
pub mod timing;

pub use config::Settings;
pub use error::{Error, Result};
pub use timing::TickRate;
