//! Recording collaborators

use emupace_rt::sound::SoundConsumer;
use emupace_rt::timebase::SimulatedClock;
use emupace_rt::{DirtyRect, Machine, Presenter, RunControl, TickContext};
use std::sync::Arc;

/// Machine that logs every tick.
#[derive(Default)]
pub struct RecordingMachine {
    /// Audio bytes written per tick
    pub bytes_per_tick: usize,
    /// Whether each tick ran with presentation suppressed
    pub suppressed: Vec<bool>,
    /// Date seen by each tick
    pub dates: Vec<u32>,
    /// Simulated work cost: advance this clock per tick
    pub work: Option<(SimulatedClock, u32)>,
    /// Request shutdown after this many ticks
    pub stop_after: Option<(Arc<RunControl>, usize)>,
    pub extra_time_polls: usize,
}

impl RecordingMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audio(bytes_per_tick: usize) -> Self {
        Self {
            bytes_per_tick,
            ..Self::default()
        }
    }

    pub fn ticks(&self) -> usize {
        self.suppressed.len()
    }

    pub fn suppressed_ticks(&self) -> usize {
        self.suppressed.iter().filter(|&&s| s).count()
    }
}

impl Machine for RecordingMachine {
    fn emulate_tick(&mut self, ctx: &mut TickContext<'_>) {
        let index = self.suppressed.len();
        self.suppressed.push(ctx.video.is_suppressed());
        self.dates.push(ctx.date_seconds);

        let pattern = vec![(index % 100) as u8; self.bytes_per_tick];
        ctx.sound.write_all(&pattern);

        let row = index as u32 % 100;
        ctx.video.mark(DirtyRect::new(row, 0, row + 1, 10));

        if let Some((clock, ms)) = &self.work {
            clock.advance(*ms);
        }
        if let Some((control, limit)) = &self.stop_after {
            if self.suppressed.len() >= *limit {
                control.request_shutdown();
            }
        }
    }

    fn emulate_extra_time(&mut self, _ctx: &mut TickContext<'_>, more: &mut dyn FnMut() -> bool) {
        if more() {
            self.extra_time_polls += 1;
        }
    }
}

/// Presenter that keeps every rectangle it was given.
#[derive(Default)]
pub struct RecordingPresenter {
    pub presented: Vec<DirtyRect>,
}

impl Presenter for RecordingPresenter {
    fn present_dirty_region(&mut self, rect: DirtyRect) {
        self.presented.push(rect);
    }
}

/// Presenter that also plays the audio consumer's role, draining a fixed
/// number of bytes per presented frame.
pub struct DrainingPresenter {
    pub consumer: SoundConsumer,
    pub bytes_per_frame: usize,
    pub presents: usize,
}

impl Presenter for DrainingPresenter {
    fn present_dirty_region(&mut self, _rect: DirtyRect) {
        let mut out = vec![0u8; self.bytes_per_frame];
        self.consumer.fill(&mut out);
        self.presents += 1;
    }
}
