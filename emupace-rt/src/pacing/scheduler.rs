//! Tick scheduler and catch-up controller
//!
//! One pass per frame. A pass:
//!
//! 1. Trims any backlog beyond the lag cap, so at most `lag_cap` ticks run.
//! 2. Runs one tick unconditionally and presents the accumulated damage.
//! 3. Runs further ticks with presentation suppressed while ticks are still
//!    owed and the wall clock has not crossed another tick boundary.
//!
//! Ticks that could not run stay owed and carry into the next pass.

use crate::machine::{Machine, Presenter, TickContext};
use crate::pacing::clock::Timekeeper;
use crate::timebase::TimeSource;
use serde::Serialize;
use tracing::{trace, warn};

/// Outcome of one scheduling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Ticks run, including the first
    pub executed: u32,
    /// Ticks run with presentation suppressed
    pub catch_up: u32,
    /// Ticks forgiven by the lag cap
    pub trimmed: u32,
    /// Ticks still owed after the pass
    pub lag: u32,
    /// Catch-up stopped early because a new tick boundary was crossed
    pub interrupted: bool,
}

/// Running scheduler totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub passes: u64,
    pub ticks: u64,
    pub catch_up_ticks: u64,
    pub trimmed_ticks: u64,
    pub trim_events: u64,
    pub interrupted_passes: u64,
    pub last_lag: u32,
    pub max_lag: u32,
}

#[derive(Debug, Clone)]
pub struct TickScheduler {
    lag_cap: u32,
    stats: SchedulerStats,
}

impl TickScheduler {
    /// `lag_cap` is clamped to at least 1.
    pub fn new(lag_cap: u32) -> Self {
        Self {
            lag_cap: lag_cap.max(1),
            stats: SchedulerStats::default(),
        }
    }

    pub fn lag_cap(&self) -> u32 {
        self.lag_cap
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Run the ticks owed up to the target pinned by
    /// [`Timekeeper::begin_pass`]. `None` when nothing is owed.
    pub fn run_pass<S, M, P>(
        &mut self,
        timekeeper: &mut Timekeeper<S>,
        machine: &mut M,
        ctx: &mut TickContext<'_>,
        presenter: &mut P,
    ) -> Option<PassReport>
    where
        S: TimeSource,
        M: Machine + ?Sized,
        P: Presenter + ?Sized,
    {
        let target = timekeeper.on_true_time();
        let owed = target.wrapping_sub(timekeeper.clock().cur_time());
        if owed == 0 || owed > i32::MAX as u32 {
            return None;
        }

        let mut report = PassReport {
            trimmed: timekeeper.clock_mut().trim_to(target, self.lag_cap),
            ..PassReport::default()
        };
        if report.trimmed > 0 {
            self.record_trim(report.trimmed);
        }

        ctx.video.set_suppressed(false);
        machine.emulate_tick(ctx);
        timekeeper.clock_mut().complete_tick();
        report.executed = 1;

        if let Some(rect) = ctx.video.take() {
            presenter.present_dirty_region(rect);
        }

        let mut remaining = target.wrapping_sub(timekeeper.clock().cur_time());
        if remaining > 0 {
            ctx.video.set_suppressed(true);
            while remaining > 0 {
                if !timekeeper.extra_time_not_over() {
                    report.interrupted = true;
                    break;
                }
                machine.emulate_tick(ctx);
                timekeeper.clock_mut().complete_tick();
                report.executed += 1;
                report.catch_up += 1;
                remaining -= 1;
            }
            ctx.video.set_suppressed(false);
        }

        report.lag = timekeeper.clock().deficit();
        self.record_pass(&report);
        Some(report)
    }

    fn record_trim(&mut self, trimmed: u32) {
        self.stats.trimmed_ticks += trimmed as u64;
        self.stats.trim_events += 1;
        trace!("Backlog of {} tick(s) beyond cap {} forgiven", trimmed, self.lag_cap);
        if self.stats.trim_events % 100 == 0 {
            warn!(
                "Emulation falling behind: backlog trimmed {} times ({} ticks dropped)",
                self.stats.trim_events, self.stats.trimmed_ticks
            );
        }
    }

    fn record_pass(&mut self, report: &PassReport) {
        let stats = &mut self.stats;
        stats.passes += 1;
        stats.ticks += report.executed as u64;
        stats.catch_up_ticks += report.catch_up as u64;
        if report.interrupted {
            stats.interrupted_passes += 1;
        }
        stats.last_lag = report.lag;
        stats.max_lag = stats.max_lag.max(report.lag);
    }
}
