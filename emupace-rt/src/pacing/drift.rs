//! Audio drift corrector
//!
//! The audio device and the emulation run off different clocks. Once per
//! wall-clock second the corrector reads the lowest ring occupancy the
//! consumer saw during that second and nudges the emulated clock by one
//! tick: credit a tick without running it when the ring is fuller than
//! desired, owe an extra tick when it is emptier. One tick per second keeps
//! the correction below audible pitch change.

use crate::pacing::clock::EmulatedClock;
use crate::sound::RingHandle;
use serde::Serialize;
use tracing::{debug, trace};

/// What the corrector did on a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftDecision {
    /// Still the same wall-clock second; nothing evaluated
    SameSecond,
    /// No consumer invocation completed during the second
    NoData,
    /// Occupancy at target
    OnTarget { min_filled: u32 },
    /// Emulation ahead of audio. `applied` is false if no tick was owed to
    /// credit; the correction is then discarded for that second, not carried
    /// into the next one.
    Ahead { min_filled: u32, applied: bool },
    /// Emulation behind audio; one extra tick is owed
    Behind { min_filled: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriftStats {
    pub seconds: u64,
    pub ahead: u64,
    pub behind: u64,
    pub on_target: u64,
    pub skipped: u64,
}

pub struct DriftCorrector {
    ring: RingHandle,
    desired_min_filled: u32,
    last_second: u32,
    stats: DriftStats,
}

impl DriftCorrector {
    /// The first evaluation happens once `wall_second` moves past
    /// `start_second`.
    pub fn new(ring: RingHandle, desired_min_filled: u32, start_second: u32) -> Self {
        Self {
            ring,
            desired_min_filled,
            last_second: start_second,
            stats: DriftStats::default(),
        }
    }

    /// Evaluate at most once per distinct `wall_second`.
    pub fn on_pass(&mut self, wall_second: u32, clock: &mut EmulatedClock) -> DriftDecision {
        if wall_second == self.last_second {
            return DriftDecision::SameSecond;
        }
        self.last_second = wall_second;
        self.stats.seconds += 1;

        let Some(min_filled) = self.ring.take_occupancy_min() else {
            self.stats.skipped += 1;
            trace!("Drift: no audio callbacks in second {}", wall_second);
            return DriftDecision::NoData;
        };

        if min_filled > self.desired_min_filled {
            let applied = clock.credit_tick();
            if applied {
                self.stats.ahead += 1;
            }
            debug!(
                "Drift: min occupancy {} > {}, crediting one tick (applied: {})",
                min_filled, self.desired_min_filled, applied
            );
            DriftDecision::Ahead {
                min_filled,
                applied,
            }
        } else if min_filled < self.desired_min_filled {
            clock.grant_tick();
            self.stats.behind += 1;
            debug!(
                "Drift: min occupancy {} < {}, granting one extra tick",
                min_filled, self.desired_min_filled
            );
            DriftDecision::Behind { min_filled }
        } else {
            self.stats.on_target += 1;
            DriftDecision::OnTarget { min_filled }
        }
    }

    /// Restart the one-second window, e.g. after playback restarts.
    pub fn reset_window(&mut self, wall_second: u32) {
        self.last_second = wall_second;
        self.ring.take_occupancy_min();
    }

    pub fn desired_min_filled(&self) -> u32 {
        self.desired_min_filled
    }

    pub fn stats(&self) -> DriftStats {
        self.stats
    }
}
