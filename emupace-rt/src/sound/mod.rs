//! Sound path: the SPSC ring, the host output stream and its monitor

pub mod monitor;
pub mod output;
pub mod ring;

pub use monitor::{CallbackMonitor, CallbackStats};
pub use output::SoundOutput;
pub use ring::{
    DrainReport, RingConfig, RingGeometry, RingHandle, RingStats, SoundConsumer, SoundProducer,
    SoundRing, WriteRegion,
};

/// Start/stop control over whatever drains the ring.
pub trait PlaybackControl {
    /// Reset the ring and begin draining. No-op if already playing.
    fn start(&mut self);

    /// Stop draining. The next start re-buffers from empty.
    fn stop(&mut self);

    fn is_playing(&self) -> bool;
}

/// Stand-in used when no audio device could be opened.
///
/// Nothing drains the ring, so the producer keeps overwriting its newest
/// block and the drift corrector never sees occupancy data.
#[derive(Debug, Default)]
pub struct NoSound {
    playing: bool,
}

impl PlaybackControl for NoSound {
    fn start(&mut self) {
        self.playing = true;
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}
