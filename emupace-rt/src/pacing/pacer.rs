//! Frame pacer: the outer loop
//!
//! Each frame waits until the wall clock crosses a tick boundary, gives the
//! drift corrector its once-per-second look, runs one scheduling pass, then
//! offers the machine the rest of the tick window as extra time.
//!
//! Waiting sleeps for the time left to the next deadline and re-samples on
//! every wake, so oversleeping only shifts when the ticks run, never how
//! many are owed.

use crate::machine::{Machine, Presenter, TickContext, VideoDamage};
use crate::pacing::clock::{SamplerConfig, Timekeeper};
use crate::pacing::drift::{DriftCorrector, DriftDecision};
use crate::pacing::scheduler::{PassReport, TickScheduler};
use crate::sound::{NoSound, PlaybackControl, SoundProducer};
use crate::stats::PacerStats;
use crate::timebase::TimeSource;
use emupace_common::timing::MachineDate;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Sleep step while paused
const IDLE_SLEEP_MS: u32 = 10;

/// Flags shared between the pacing thread and whoever controls it.
#[derive(Debug, Default)]
pub struct RunControl {
    shutdown: AtomicBool,
    speed_stopped: AtomicBool,
    background: AtomicBool,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after the current pass completes.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// User-requested pause
    pub fn set_speed_stopped(&self, stopped: bool) {
        self.speed_stopped.store(stopped, Ordering::SeqCst);
    }

    pub fn is_speed_stopped(&self) -> bool {
        self.speed_stopped.load(Ordering::SeqCst)
    }

    /// Host window lost focus
    pub fn set_background(&self, background: bool) {
        self.background.store(background, Ordering::SeqCst);
    }

    pub fn is_background(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }

    fn should_pause(&self, run_in_background: bool) -> bool {
        self.is_speed_stopped() || (self.is_background() && !run_in_background)
    }
}

pub struct FramePacer<S: TimeSource, M: Machine, P: Presenter> {
    timekeeper: Timekeeper<S>,
    scheduler: TickScheduler,
    drift: Option<DriftCorrector>,
    playback: Box<dyn PlaybackControl>,
    producer: SoundProducer,
    video: VideoDamage,
    date: MachineDate,
    machine: M,
    presenter: P,
    run_in_background: bool,
    paused: bool,
    frames: u64,
    pauses: u64,
}

impl<S: TimeSource, M: Machine, P: Presenter> FramePacer<S, M, P> {
    /// Pacer without audio output: the producer's ring is never drained and
    /// no drift correction happens.
    pub fn new(
        source: S,
        sampler: SamplerConfig,
        lag_cap: u32,
        producer: SoundProducer,
        machine: M,
        presenter: P,
    ) -> Self {
        let timekeeper = Timekeeper::new(source, sampler);
        let date = MachineDate::anchor_now(timekeeper.sampler().wall_second());
        Self {
            timekeeper,
            scheduler: TickScheduler::new(lag_cap),
            drift: None,
            playback: Box::new(NoSound::default()),
            producer,
            video: VideoDamage::default(),
            date,
            machine,
            presenter,
            run_in_background: false,
            paused: false,
            frames: 0,
            pauses: 0,
        }
    }

    /// Attach an audio output and the drift corrector watching its ring.
    pub fn with_audio(mut self, playback: Box<dyn PlaybackControl>, drift: DriftCorrector) -> Self {
        self.playback = playback;
        self.drift = Some(drift);
        self
    }

    pub fn with_date(mut self, date: MachineDate) -> Self {
        self.date = date;
        self
    }

    pub fn with_run_in_background(mut self, run_in_background: bool) -> Self {
        self.run_in_background = run_in_background;
        self
    }

    /// Sleep until the sampler reports a tick boundary past the last pass.
    pub fn wait_for_next_tick(&mut self) {
        while self.timekeeper.extra_time_not_over() {
            let ms = self.timekeeper.sampler().ms_until_deadline().max(1);
            self.timekeeper.sleep_ms(ms);
        }
    }

    /// One frame: wait, correct drift, run a pass, then extra time.
    pub fn run_frame(&mut self) -> Option<PassReport> {
        self.wait_for_next_tick();

        let wall_second = self.timekeeper.sampler().wall_second();
        if let Some(drift) = self.drift.as_mut() {
            if let DriftDecision::Ahead { applied: false, .. } =
                drift.on_pass(wall_second, self.timekeeper.clock_mut())
            {
                debug!("Drift credit skipped, no tick owed");
            }
        }

        self.timekeeper.begin_pass();
        let mut ctx = TickContext {
            sound: &mut self.producer,
            video: &mut self.video,
            date_seconds: self.date.seconds_at(wall_second),
        };
        let report = self.scheduler.run_pass(
            &mut self.timekeeper,
            &mut self.machine,
            &mut ctx,
            &mut self.presenter,
        );

        let timekeeper = &mut self.timekeeper;
        self.machine
            .emulate_extra_time(&mut ctx, &mut || timekeeper.extra_time_not_over());

        self.frames += 1;
        report
    }

    /// Pace frames until `control` requests shutdown, idling while paused.
    pub fn run(&mut self, control: &RunControl) {
        info!(
            "Pacing at {} with lag cap {}",
            self.timekeeper.sampler().config().rate,
            self.scheduler.lag_cap()
        );
        self.start_running();

        while !control.is_shutdown() {
            if control.should_pause(self.run_in_background) {
                if !self.paused {
                    self.pause();
                }
                self.timekeeper.sleep_ms(IDLE_SLEEP_MS);
                continue;
            }
            if self.paused {
                self.resume();
            }
            self.run_frame();
        }

        self.playback.stop();
        info!("Pacer stopped after {} frames", self.frames);
    }

    /// Enter the stopped state: audio stops and elapsed time stops counting.
    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.playback.stop();
        self.paused = true;
        self.pauses += 1;
        info!("Emulation paused");
    }

    /// Leave the stopped state. The time spent paused is not owed.
    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        self.start_running();
        info!("Emulation resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Start audio and restart the tick base at now.
    pub fn start_running(&mut self) {
        self.playback.start();
        self.timekeeper.resync();
        let wall_second = self.timekeeper.sampler().wall_second();
        if let Some(drift) = self.drift.as_mut() {
            drift.reset_window(wall_second);
        }
    }

    pub fn stats(&self) -> PacerStats {
        PacerStats {
            frames: self.frames,
            pauses: self.pauses,
            scheduler: self.scheduler.stats(),
            clock_anomalies: self.timekeeper.sampler().anomalies(),
            drift: self.drift.as_ref().map(DriftCorrector::stats),
            ring: self.producer.handle().stats(),
            callbacks: None,
        }
    }

    pub fn timekeeper(&self) -> &Timekeeper<S> {
        &self.timekeeper
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }
}
