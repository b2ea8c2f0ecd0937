//! Audio callback timing monitor
//!
//! The audio callback must never log or block, so it only bumps counters
//! here and in the ring. A tokio task polls those counters and turns changes
//! into log lines.
//!
//! The expected callback interval is learned from the first intervals the
//! device actually delivers, since drivers often pick a buffer size other
//! than the one requested.

use crate::sound::ring::RingHandle;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Intervals collected before the expected interval is fixed
const CALIBRATION_SAMPLES: usize = 50;

/// Monitor poll period
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock-free record of audio callback timing
pub struct CallbackMonitor {
    start_time: Instant,
    last_callback_ns: AtomicU64,
    callback_count: AtomicU64,
    irregular_intervals: AtomicU64,

    /// 0 until calibration completes
    expected_interval_ns: AtomicU64,
    tolerance_ns: AtomicU64,

    /// Filled by the callback with try_lock, drained by the monitor task
    calibration_samples: Mutex<Vec<u64>>,
}

impl CallbackMonitor {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            last_callback_ns: AtomicU64::new(0),
            callback_count: AtomicU64::new(0),
            irregular_intervals: AtomicU64::new(0),
            expected_interval_ns: AtomicU64::new(0),
            tolerance_ns: AtomicU64::new(0),
            calibration_samples: Mutex::new(Vec::with_capacity(CALIBRATION_SAMPLES)),
        }
    }

    /// Record a callback invocation (call at the start of the audio callback)
    ///
    /// **REAL-TIME SAFE**: atomics and a non-blocking try_lock only
    pub fn record_callback(&self) {
        let now_ns = self.start_time.elapsed().as_nanos() as u64;
        let last_ns = self.last_callback_ns.swap(now_ns, Ordering::Relaxed);
        self.callback_count.fetch_add(1, Ordering::Relaxed);

        if last_ns == 0 {
            return;
        }
        let interval_ns = now_ns.saturating_sub(last_ns);

        let expected_ns = self.expected_interval_ns.load(Ordering::Relaxed);
        if expected_ns == 0 {
            if let Ok(mut samples) = self.calibration_samples.try_lock() {
                if samples.len() < CALIBRATION_SAMPLES {
                    samples.push(interval_ns);
                }
            }
            return;
        }

        let tolerance_ns = self.tolerance_ns.load(Ordering::Relaxed);
        if interval_ns.abs_diff(expected_ns) > tolerance_ns {
            self.irregular_intervals.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fix the expected interval once enough samples exist (monitor task only)
    fn check_calibration(&self) {
        if self.expected_interval_ns.load(Ordering::Relaxed) != 0 {
            return;
        }

        let mut sorted = match self.calibration_samples.lock() {
            Ok(samples) if samples.len() >= CALIBRATION_SAMPLES => samples.clone(),
            _ => return,
        };
        sorted.sort_unstable();
        let median_ns = sorted[sorted.len() / 2].max(1);

        // 20% tolerance absorbs ordinary driver jitter
        self.tolerance_ns.store(median_ns / 5, Ordering::Relaxed);
        self.expected_interval_ns.store(median_ns, Ordering::Relaxed);

        info!(
            "Audio callback interval calibrated: {:.2}ms (median of {} samples)",
            median_ns as f64 / 1_000_000.0,
            sorted.len()
        );
    }

    pub fn stats(&self) -> CallbackStats {
        CallbackStats {
            callback_count: self.callback_count.load(Ordering::Relaxed),
            irregular_intervals: self.irregular_intervals.load(Ordering::Relaxed),
            expected_interval_us: self.expected_interval_ns.load(Ordering::Relaxed) / 1000,
            calibration_complete: self.expected_interval_ns.load(Ordering::Relaxed) != 0,
        }
    }

    /// Spawn the polling task on `rt_handle`.
    ///
    /// **Returns:** shutdown flag (set to true to stop monitoring)
    pub fn spawn_monitoring_task(
        self: Arc<Self>,
        ring: RingHandle,
        rt_handle: tokio::runtime::Handle,
    ) -> Arc<AtomicBool> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        rt_handle.spawn(async move {
            let mut last_underruns = 0u64;
            let mut last_overwrites = 0u64;
            let mut last_resyncs = 0u64;
            let mut last_irregular = 0u64;
            let mut last_health = Instant::now();

            debug!("CallbackMonitor: monitoring task started");

            while !shutdown_clone.load(Ordering::Relaxed) {
                tokio::time::sleep(POLL_INTERVAL).await;

                self.check_calibration();
                let stats = self.stats();
                let ring_stats = ring.stats();

                if ring_stats.underruns > last_underruns {
                    let new = ring_stats.underruns - last_underruns;
                    if ring_stats.started {
                        warn!(
                            "Sound ring underrun: {} total (+{}), emulation not keeping up with audio",
                            ring_stats.underruns, new
                        );
                    } else {
                        trace!(
                            "Sound ring underrun while buffering: {} total (+{})",
                            ring_stats.underruns, new
                        );
                    }
                    last_underruns = ring_stats.underruns;
                }

                if ring_stats.overwrites > last_overwrites {
                    debug!(
                        "Sound ring overwrote {} block(s) ({} total), audio consumer lagging",
                        ring_stats.overwrites - last_overwrites,
                        ring_stats.overwrites
                    );
                    last_overwrites = ring_stats.overwrites;
                }

                if ring_stats.resyncs > last_resyncs {
                    debug!(
                        "Sound ring cursors realigned {} time(s) ({} total)",
                        ring_stats.resyncs - last_resyncs,
                        ring_stats.resyncs
                    );
                    last_resyncs = ring_stats.resyncs;
                }

                if stats.irregular_intervals >= last_irregular + 100 {
                    warn!(
                        "Audio callback irregular intervals: {} of {} callbacks",
                        stats.irregular_intervals, stats.callback_count
                    );
                    last_irregular = stats.irregular_intervals;
                }

                if last_health.elapsed() >= Duration::from_secs(30) {
                    debug!(
                        "Audio health: {} callbacks, {} underruns, {} overwrites, {} filled blocks",
                        stats.callback_count,
                        ring_stats.underruns,
                        ring_stats.overwrites,
                        ring_stats.filled_blocks
                    );
                    last_health = Instant::now();
                }
            }

            info!("CallbackMonitor: monitoring task stopped");
        });

        shutdown
    }
}

impl Default for CallbackMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback statistics snapshot
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CallbackStats {
    pub callback_count: u64,
    pub irregular_intervals: u64,
    pub expected_interval_us: u64,
    pub calibration_complete: bool,
}
