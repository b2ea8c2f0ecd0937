//! Tick pacing: clock sampling, scheduling, drift correction and the frame loop

pub mod clock;
pub mod drift;
pub mod pacer;
pub mod scheduler;

pub use clock::{
    ClockAnomalies, EmulatedClock, SampleOutcome, SamplerConfig, Timekeeper, WallClockSampler,
};
pub use drift::{DriftCorrector, DriftDecision, DriftStats};
pub use pacer::{FramePacer, RunControl};
pub use scheduler::{PassReport, SchedulerStats, TickScheduler};
