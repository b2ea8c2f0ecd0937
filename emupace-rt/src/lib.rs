//! # emupace-rt
//!
//! Real-time pacing core for a desktop hardware emulator.
//!
//! **Purpose:** Keep an emulated machine's tick clock in step with wall-clock
//! time, decide how many ticks to run per frame, and feed a host audio device
//! from a lock-free ring the emulation writes into, correcting drift between
//! the two clocks.
//!
//! **Architecture:** `pacing` owns the clocks and the frame loop; `sound` owns
//! the SPSC ring, the cpal output stream that drains it and the callback
//! monitor. The emulated machine and the presenter are reached only through
//! the traits in `machine`.

pub mod config;
pub mod demo;
pub mod error;
pub mod machine;
pub mod pacing;
pub mod sound;
pub mod stats;
pub mod timebase;

pub use error::{Error, Result};
pub use machine::{DirtyRect, Machine, Presenter, TickContext, VideoDamage};
pub use pacing::{FramePacer, RunControl};
pub use stats::PacerStats;
pub use timebase::{SimulatedClock, SystemClock, TimeSource};
