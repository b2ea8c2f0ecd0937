//! Stand-in machine and presenter for the binary
//!
//! `DemoMachine` produces a square-wave tone at exactly the sample rate the
//! tick rate implies, so a correctly paced run sounds steady and a badly
//! paced one audibly stutters. A synthetic work cost per tick lets the
//! catch-up path be exercised on a fast host.

use crate::machine::{DirtyRect, Machine, Presenter, TickContext};
use emupace_common::timing::{TickRate, FRAC_BITS, FRAC_MASK};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Screen geometry of the reference machine
const SCREEN_WIDTH: u32 = 512;
const SCREEN_HEIGHT: u32 = 342;

/// Most extra-time work units per frame
const MAX_EXTRA_UNITS: u32 = 4;

pub struct DemoMachine {
    /// Samples per tick, 16.16 fixed point
    samples_per_tick: u64,
    sample_frac: u64,
    half_period: u32,
    phase: u32,
    high: bool,
    amplitude: u8,
    work: Duration,
    ticks: u64,
    samples: u64,
    extra_units: u64,
}

impl DemoMachine {
    pub fn new(rate: TickRate, sample_rate: u32, tone_hz: u32, work: Duration) -> Self {
        let half_period = (sample_rate / tone_hz.max(1) / 2).max(1);
        Self {
            samples_per_tick: rate.samples_per_tick_fixed(sample_rate),
            sample_frac: 0,
            half_period,
            phase: 0,
            high: true,
            amplitude: 0x20,
            work,
            ticks: 0,
            samples: 0,
            extra_units: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn extra_units(&self) -> u64 {
        self.extra_units
    }

    fn next_sample(&mut self) -> u8 {
        let value = if self.high {
            0x80 + self.amplitude
        } else {
            0x80 - self.amplitude
        };
        self.phase += 1;
        if self.phase >= self.half_period {
            self.phase = 0;
            self.high = !self.high;
        }
        value
    }

    fn burn(duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let start = Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    }
}

impl Machine for DemoMachine {
    fn emulate_tick(&mut self, ctx: &mut TickContext<'_>) {
        self.sample_frac += self.samples_per_tick;
        let mut remaining = (self.sample_frac >> FRAC_BITS) as usize;
        self.sample_frac &= FRAC_MASK as u64;
        self.samples += remaining as u64;

        while remaining > 0 {
            let written = {
                let mut region = ctx.sound.begin_write(remaining);
                for i in 0..region.len() {
                    let sample = self.next_sample();
                    region.set(i, sample);
                }
                region.len()
            };
            ctx.sound.end_write(written);
            remaining -= written;
        }

        let row = (self.ticks % SCREEN_HEIGHT as u64) as u32;
        ctx.video
            .mark(DirtyRect::new(row, 0, row + 1, SCREEN_WIDTH));

        Self::burn(self.work);
        self.ticks += 1;
    }

    fn emulate_extra_time(&mut self, _ctx: &mut TickContext<'_>, more: &mut dyn FnMut() -> bool) {
        let mut units = 0;
        while units < MAX_EXTRA_UNITS && more() {
            Self::burn(self.work / 4);
            units += 1;
        }
        self.extra_units += units as u64;
    }
}

/// Presenter that only logs what it would redraw.
#[derive(Debug, Default)]
pub struct LogPresenter {
    presents: u64,
    last: Option<DirtyRect>,
}

impl LogPresenter {
    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn last(&self) -> Option<DirtyRect> {
        self.last
    }
}

impl Presenter for LogPresenter {
    fn present_dirty_region(&mut self, rect: DirtyRect) {
        self.presents += 1;
        self.last = Some(rect);
        trace!(
            "Present rows {}..{} cols {}..{}",
            rect.top,
            rect.bottom,
            rect.left,
            rect.right
        );
        if self.presents % 600 == 0 {
            debug!("{} frames presented", self.presents);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::VideoDamage;
    use crate::sound::{RingConfig, SoundRing};

    #[test]
    fn test_tone_produces_sample_rate_worth_per_second() {
        let rate = TickRate::new(60, 1).unwrap();
        let mut machine = DemoMachine::new(rate, 22_050, 440, Duration::ZERO);
        let ring = SoundRing::new(RingConfig::default());
        let (mut producer, _consumer) = ring.split();
        let mut video = VideoDamage::default();
        let mut ctx = TickContext {
            sound: &mut producer,
            video: &mut video,
            date_seconds: 0,
        };

        for _ in 0..60 {
            machine.emulate_tick(&mut ctx);
        }
        // fixed-point truncation loses at most one sample per second
        assert!((22_049..=22_050).contains(&machine.samples()));
        assert!(video.has_damage());
    }

    #[test]
    fn test_extra_time_respects_budget() {
        let rate = TickRate::new(60, 1).unwrap();
        let mut machine = DemoMachine::new(rate, 22_050, 440, Duration::ZERO);
        let ring = SoundRing::new(RingConfig::default());
        let (mut producer, _consumer) = ring.split();
        let mut video = VideoDamage::default();
        let mut ctx = TickContext {
            sound: &mut producer,
            video: &mut video,
            date_seconds: 0,
        };

        let mut polls = 0;
        machine.emulate_extra_time(&mut ctx, &mut || {
            polls += 1;
            polls <= 2
        });
        assert_eq!(machine.extra_units(), 2);
    }
}
