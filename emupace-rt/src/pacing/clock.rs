//! Emulated clock and wall-clock sampler
//!
//! `EmulatedClock` holds the two tick counters: how many ticks the wall clock
//! entitles the machine to (`true_time`) and how many it has actually run
//! (`cur_time`). `WallClockSampler` is the only writer of `true_time` apart
//! from the drift corrector's one-tick grants.
//!
//! Sampling walks a fixed-point deadline forward one interval at a time, so
//! the number of ticks credited for a span of wall time is the same whether
//! the span is sampled once or a thousand times.

use crate::timebase::TimeSource;
use emupace_common::timing::{TickDeadline, TickRate};
use serde::Serialize;
use tracing::{debug, trace};

/// Tick counters of the emulated machine.
///
/// Both counters wrap; `cur_time` never runs ahead of `true_time`, so the
/// wrapping difference is always the real deficit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmulatedClock {
    true_time: u32,
    cur_time: u32,
}

impl EmulatedClock {
    /// Clock with explicit counters. `cur_time` must not be ahead of `true_time`.
    pub fn new(true_time: u32, cur_time: u32) -> Self {
        debug_assert!(true_time.wrapping_sub(cur_time) <= i32::MAX as u32);
        Self {
            true_time,
            cur_time,
        }
    }

    /// Ticks the wall clock entitles the machine to
    pub fn true_time(&self) -> u32 {
        self.true_time
    }

    /// Ticks actually executed (or credited)
    pub fn cur_time(&self) -> u32 {
        self.cur_time
    }

    /// Ticks owed
    pub fn deficit(&self) -> u32 {
        self.true_time.wrapping_sub(self.cur_time)
    }

    pub(crate) fn entitle(&mut self, ticks: u32) {
        self.true_time = self.true_time.wrapping_add(ticks);
    }

    pub(crate) fn complete_tick(&mut self) {
        self.cur_time = self.cur_time.wrapping_add(1);
    }

    /// Drop backlog beyond `cap` ticks relative to `target`. Returns the
    /// number of ticks forgiven.
    pub(crate) fn trim_to(&mut self, target: u32, cap: u32) -> u32 {
        let behind = target.wrapping_sub(self.cur_time);
        if behind > cap {
            self.cur_time = target.wrapping_sub(cap);
            behind - cap
        } else {
            0
        }
    }

    /// Count one tick as done without running it. No-op when nothing is owed.
    pub(crate) fn credit_tick(&mut self) -> bool {
        if self.deficit() > 0 {
            self.cur_time = self.cur_time.wrapping_add(1);
            true
        } else {
            false
        }
    }

    /// Owe one extra tick.
    pub(crate) fn grant_tick(&mut self) {
        self.true_time = self.true_time.wrapping_add(1);
    }
}

/// Sampler tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    pub rate: TickRate,

    /// Overdue time past which the gap is treated as a suspension
    pub suspend_threshold_ms: u32,

    /// Backward movement from the previous reading tolerated before
    /// resynchronising
    pub backward_tolerance_ms: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            rate: TickRate::mac_plus(),
            suspend_threshold_ms: 64,
            backward_tolerance_ms: 20,
        }
    }
}

/// Result of one clock sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Counter has not moved since the last sample
    Unchanged,
    /// Time moved but the next deadline is still ahead
    Waiting,
    /// `n` tick boundaries were crossed
    Advanced(u32),
    /// Gap too large; one tick credited and the base reset to now
    Suspended,
    /// Time went backwards past tolerance; the base was reset to now
    Resynced,
}

impl SampleOutcome {
    pub fn crossed_boundary(&self) -> bool {
        matches!(self, SampleOutcome::Advanced(_) | SampleOutcome::Suspended)
    }
}

/// Counts of recovered clock anomalies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClockAnomalies {
    pub suspensions: u64,
    pub backward_resyncs: u64,
}

/// Converts elapsed monotonic time into ticks owed.
#[derive(Debug, Clone)]
pub struct WallClockSampler {
    config: SamplerConfig,
    last_ms: u32,
    deadline: TickDeadline,
    anomalies: ClockAnomalies,
}

impl WallClockSampler {
    pub fn new(config: SamplerConfig, now_ms: u32) -> Self {
        Self {
            deadline: TickDeadline::after(now_ms, &config.rate),
            config,
            last_ms: now_ms,
            anomalies: ClockAnomalies::default(),
        }
    }

    /// Take a reading at `now_ms` and credit any ticks it entitles.
    pub fn sample(&mut self, now_ms: u32, clock: &mut EmulatedClock) -> SampleOutcome {
        if now_ms == self.last_ms {
            return SampleOutcome::Unchanged;
        }
        let moved = now_ms.wrapping_sub(self.last_ms) as i32;
        self.last_ms = now_ms;

        if moved < -(self.config.backward_tolerance_ms as i32) {
            self.reset_base(now_ms);
            self.anomalies.backward_resyncs += 1;
            debug!(
                "Wall clock moved {}ms backwards, resynchronising tick base",
                moved.unsigned_abs()
            );
            return SampleOutcome::Resynced;
        }

        let overdue = self.deadline.overdue_by(now_ms);
        if overdue >= 0 {
            if overdue as u32 > self.config.suspend_threshold_ms {
                // forget the backlog, the host had us stopped
                clock.entitle(1);
                self.reset_base(now_ms);
                self.anomalies.suspensions += 1;
                debug!("Wall clock jumped {}ms past deadline, treating as suspension", overdue);
                return SampleOutcome::Suspended;
            }

            let mut crossed = 0u32;
            while self.deadline.overdue_by(now_ms) >= 0 {
                crossed += 1;
                self.deadline.advance(&self.config.rate);
            }
            clock.entitle(crossed);
            trace!("Sampler credited {} tick(s) at {}ms", crossed, now_ms);
            SampleOutcome::Advanced(crossed)
        } else {
            SampleOutcome::Waiting
        }
    }

    /// Restart the deadline sequence one interval after `now_ms`, without
    /// crediting anything. Used after the machine was stopped.
    pub fn resync(&mut self, now_ms: u32) {
        self.last_ms = now_ms;
        self.reset_base(now_ms);
    }

    fn reset_base(&mut self, now_ms: u32) {
        self.deadline = TickDeadline::after(now_ms, &self.config.rate);
    }

    /// Milliseconds from the last reading to the next deadline (0 if due)
    pub fn ms_until_deadline(&self) -> u32 {
        let overdue = self.deadline.overdue_by(self.last_ms);
        if overdue >= 0 {
            0
        } else {
            overdue.unsigned_abs()
        }
    }

    pub fn last_ms(&self) -> u32 {
        self.last_ms
    }

    /// Wall-clock second of the last reading
    pub fn wall_second(&self) -> u32 {
        self.last_ms / 1000
    }

    pub fn anomalies(&self) -> ClockAnomalies {
        self.anomalies
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }
}

/// Sampler, counters and host clock bundled for the pacing loop.
pub struct Timekeeper<S: TimeSource> {
    source: S,
    sampler: WallClockSampler,
    clock: EmulatedClock,
    on_true_time: u32,
}

impl<S: TimeSource> Timekeeper<S> {
    pub fn new(source: S, config: SamplerConfig) -> Self {
        let now = source.now_ms();
        Self {
            sampler: WallClockSampler::new(config, now),
            source,
            clock: EmulatedClock::default(),
            on_true_time: 0,
        }
    }

    /// Sample the host clock. True if a tick boundary was crossed.
    pub fn update(&mut self) -> bool {
        let now = self.source.now_ms();
        self.sampler.sample(now, &mut self.clock).crossed_boundary()
    }

    /// Sample, then report whether we are still inside the tick window the
    /// current pass started in.
    pub fn extra_time_not_over(&mut self) -> bool {
        self.update();
        self.clock.true_time() == self.on_true_time
    }

    /// Pin the tick target for a scheduling pass.
    pub fn begin_pass(&mut self) -> u32 {
        self.on_true_time = self.clock.true_time();
        self.on_true_time
    }

    pub fn on_true_time(&self) -> u32 {
        self.on_true_time
    }

    /// Forget elapsed time, e.g. after leaving a stopped state.
    pub fn resync(&mut self) {
        let now = self.source.now_ms();
        self.sampler.resync(now);
        self.on_true_time = self.clock.true_time();
    }

    pub fn clock(&self) -> &EmulatedClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut EmulatedClock {
        &mut self.clock
    }

    pub fn sampler(&self) -> &WallClockSampler {
        &self.sampler
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sleep_ms(&self, ms: u32) {
        self.source.sleep_ms(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sixty_hz() -> SamplerConfig {
        SamplerConfig {
            rate: TickRate::new(60, 1).unwrap(),
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn test_unchanged_reading_is_noop() {
        let mut clock = EmulatedClock::default();
        let mut sampler = WallClockSampler::new(sixty_hz(), 1000);
        assert_eq!(sampler.sample(1000, &mut clock), SampleOutcome::Unchanged);
        assert_eq!(clock.true_time(), 0);
    }

    #[test]
    fn test_waiting_before_first_deadline() {
        let mut clock = EmulatedClock::default();
        let mut sampler = WallClockSampler::new(sixty_hz(), 0);
        assert_eq!(sampler.sample(10, &mut clock), SampleOutcome::Waiting);
        assert_eq!(sampler.ms_until_deadline(), 6);
    }

    #[test]
    fn test_crossing_two_boundaries() {
        let mut clock = EmulatedClock::default();
        let mut sampler = WallClockSampler::new(sixty_hz(), 0);
        // deadlines at 16 and 33
        assert_eq!(sampler.sample(40, &mut clock), SampleOutcome::Advanced(2));
        assert_eq!(clock.true_time(), 2);
    }

    #[test]
    fn test_backward_within_tolerance_waits() {
        let mut clock = EmulatedClock::default();
        let mut sampler = WallClockSampler::new(sixty_hz(), 1000);
        assert_eq!(sampler.sample(995, &mut clock), SampleOutcome::Waiting);
        assert_eq!(sampler.anomalies().backward_resyncs, 0);
    }

    #[test]
    fn test_backward_past_tolerance_resyncs() {
        let mut clock = EmulatedClock::default();
        let mut sampler = WallClockSampler::new(sixty_hz(), 1000);
        assert_eq!(sampler.sample(900, &mut clock), SampleOutcome::Resynced);
        assert_eq!(sampler.anomalies().backward_resyncs, 1);
        assert_eq!(clock.true_time(), 0);
        // base is now 900; next deadline at 916
        assert_eq!(sampler.sample(917, &mut clock), SampleOutcome::Advanced(1));
    }

    #[test]
    fn test_backward_tolerance_measured_from_last_reading() {
        let mut clock = EmulatedClock::default();
        let mut sampler = WallClockSampler::new(sixty_hz(), 10_000);
        // one ms short of the deadline, then 25 back: still closer to the
        // deadline than span + tolerance, but past tolerance from the reading
        assert_eq!(sampler.sample(10_015, &mut clock), SampleOutcome::Waiting);
        assert_eq!(sampler.sample(9_990, &mut clock), SampleOutcome::Resynced);

        let mut sampler = WallClockSampler::new(sixty_hz(), 10_000);
        assert_eq!(sampler.sample(10_015, &mut clock), SampleOutcome::Waiting);
        assert_eq!(sampler.sample(9_995, &mut clock), SampleOutcome::Waiting);
        // tolerance applies to each step, not the total drop
        assert_eq!(sampler.sample(9_974, &mut clock), SampleOutcome::Resynced);
        assert_eq!(sampler.anomalies().backward_resyncs, 1);
    }

    #[test]
    fn test_trim_and_credit() {
        let mut clock = EmulatedClock::new(20, 0);
        assert_eq!(clock.trim_to(20, 8), 12);
        assert_eq!(clock.deficit(), 8);
        assert!(clock.credit_tick());
        assert_eq!(clock.deficit(), 7);

        let mut idle = EmulatedClock::new(5, 5);
        assert!(!idle.credit_tick());
        idle.grant_tick();
        assert_eq!(idle.deficit(), 1);
    }
}
