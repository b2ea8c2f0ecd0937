//! Fixed-point tick rate arithmetic
//!
//! The emulated machine ticks at a rate that is not an integral number of
//! milliseconds (the reference machine runs at 60.14742 Hz, one tick every
//! ~16.626 ms). Tick deadlines are therefore tracked as whole milliseconds
//! plus a 16-bit binary fraction. Each deadline is derived from the previous
//! one by adding the same fixed step, so the sequence of deadlines depends
//! only on where it started, never on how often it is inspected.
//!
//! # Examples
//!
//! ```rust
//! use emupace_common::timing::{TickDeadline, TickRate};
//!
//! let rate = TickRate::new(60, 1).unwrap();
//! let mut deadline = TickDeadline::after(0, &rate);
//! assert_eq!(deadline.whole_ms(), 16);
//! deadline.advance(&rate);
//! assert_eq!(deadline.whole_ms(), 33);
//! ```

use crate::{Error, Result};
use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Constants
// ============================================================================

/// Number of fractional bits in a fixed-point millisecond value
pub const FRAC_BITS: u32 = 16;

/// One millisecond in fixed point
pub const FRAC_ONE: u32 = 1 << FRAC_BITS;

/// Mask selecting the fractional part
pub const FRAC_MASK: u32 = FRAC_ONE - 1;

/// Classic Macintosh Plus vertical retrace rate: 60.14742 Hz
pub const MAC_PLUS_TICK_RATE: (u32, u32) = (6_014_742, 100_000);

/// Seconds from 1904-01-01T00:00:00 to 1970-01-01T00:00:00
pub const MAC_EPOCH_OFFSET_SECS: i64 = 2_082_844_800;

// ============================================================================
// TickRate
// ============================================================================

/// Tick rate expressed as `num / den` ticks per second.
///
/// Stored internally as the tick interval in 16.16 fixed-point milliseconds,
/// truncated. Truncation makes deadlines land marginally early, so a span of
/// exactly `k` nominal intervals always contains `k` deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRate {
    num: u32,
    den: u32,
    step: u32,
}

impl TickRate {
    /// Build a rate of `num / den` ticks per second.
    ///
    /// # Errors
    /// - `num` or `den` is zero
    /// - the resulting interval is shorter than 1/65536 ms or longer than
    ///   what fits a signed 32-bit millisecond difference
    pub fn new(num: u32, den: u32) -> Result<Self> {
        if num == 0 || den == 0 {
            return Err(Error::InvalidInput(format!(
                "tick rate {}/{} must have non-zero numerator and denominator",
                num, den
            )));
        }

        let step = (1000u64 * den as u64 * FRAC_ONE as u64) / num as u64;
        if step == 0 || step > i32::MAX as u64 {
            return Err(Error::InvalidInput(format!(
                "tick rate {}/{} is outside the supported range",
                num, den
            )));
        }

        Ok(Self {
            num,
            den,
            step: step as u32,
        })
    }

    /// The reference machine's rate (60.14742 Hz).
    pub fn mac_plus() -> Self {
        let (num, den) = MAC_PLUS_TICK_RATE;
        Self {
            num,
            den,
            step: ((1000u64 * den as u64 * FRAC_ONE as u64) / num as u64) as u32,
        }
    }

    pub fn numerator(&self) -> u32 {
        self.num
    }

    pub fn denominator(&self) -> u32 {
        self.den
    }

    /// Tick interval in 16.16 fixed-point milliseconds
    pub fn step_fixed(&self) -> u32 {
        self.step
    }

    /// Ticks per second as a float (display only)
    pub fn hz(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Audio samples generated per tick at `sample_rate`, in 16.16 fixed point.
    pub fn samples_per_tick_fixed(&self, sample_rate: u32) -> u64 {
        (sample_rate as u64 * self.den as u64 * FRAC_ONE as u64) / self.num as u64
    }
}

impl Default for TickRate {
    fn default() -> Self {
        Self::mac_plus()
    }
}

impl fmt::Display for TickRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({:.5} Hz)", self.num, self.den, self.hz())
    }
}

impl FromStr for TickRate {
    type Err = Error;

    /// Parses `"NUM/DEN"` or a bare integer `"NUM"` (ticks per second).
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|e| Error::InvalidInput(format!("invalid tick rate '{}': {}", s, e)))
        };

        match s.split_once('/') {
            Some((num, den)) => Self::new(parse(num)?, parse(den)?),
            None => Self::new(parse(s)?, 1),
        }
    }
}

// ============================================================================
// TickDeadline
// ============================================================================

/// Next tick boundary as a wrapping millisecond counter plus fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickDeadline {
    whole_ms: u32,
    frac: u32,
}

impl TickDeadline {
    /// First deadline one interval after `base_ms`.
    pub fn after(base_ms: u32, rate: &TickRate) -> Self {
        let mut deadline = Self {
            whole_ms: base_ms,
            frac: 0,
        };
        deadline.advance(rate);
        deadline
    }

    /// Move the deadline forward by one interval.
    pub fn advance(&mut self, rate: &TickRate) {
        // frac < 2^16 and step <= i32::MAX, so this cannot overflow
        self.frac += rate.step;
        self.whole_ms = self.whole_ms.wrapping_add(self.frac >> FRAC_BITS);
        self.frac &= FRAC_MASK;
    }

    pub fn whole_ms(&self) -> u32 {
        self.whole_ms
    }

    pub fn frac(&self) -> u32 {
        self.frac
    }

    /// Milliseconds by which `now_ms` is past the deadline.
    ///
    /// Non-negative once the deadline has been reached. Computed on the
    /// wrapping counter so it stays correct across 32-bit wraparound.
    pub fn overdue_by(&self, now_ms: u32) -> i32 {
        now_ms.wrapping_sub(self.whole_ms) as i32
    }
}

// ============================================================================
// MachineDate
// ============================================================================

/// Emulated real-time-clock date, seconds since 1904-01-01 local time.
///
/// Anchored once to the host calendar, then advanced by elapsed wall-clock
/// seconds so the emulated clock never jumps with host clock adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineDate {
    anchor_secs: u32,
    anchor_wall_second: u32,
}

impl MachineDate {
    /// Anchor to a host local date/time observed at `wall_second`.
    pub fn anchor(host_local: NaiveDateTime, wall_second: u32) -> Self {
        let secs = host_local.and_utc().timestamp() + MAC_EPOCH_OFFSET_SECS;
        Self {
            anchor_secs: secs as u32,
            anchor_wall_second: wall_second,
        }
    }

    /// Anchor to the host's current local time.
    pub fn anchor_now(wall_second: u32) -> Self {
        Self::anchor(chrono::Local::now().naive_local(), wall_second)
    }

    /// Emulated date at `wall_second`.
    pub fn seconds_at(&self, wall_second: u32) -> u32 {
        self.anchor_secs
            .wrapping_add(wall_second.wrapping_sub(self.anchor_wall_second))
    }
}
