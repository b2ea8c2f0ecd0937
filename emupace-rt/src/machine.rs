//! Collaborator seams: the emulated machine and the presenter
//!
//! The pacing core treats one tick of emulation as opaque. During a tick the
//! machine may write any amount of audio through the producer and mark parts
//! of its frame buffer dirty; the scheduler decides when the accumulated
//! damage is handed to the presenter.

use crate::sound::SoundProducer;

/// Frame-buffer rectangle, half-open on bottom and right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRect {
    pub top: u32,
    pub left: u32,
    pub bottom: u32,
    pub right: u32,
}

impl DirtyRect {
    pub fn new(top: u32, left: u32, bottom: u32, right: u32) -> Self {
        Self {
            top,
            left,
            bottom,
            right,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bottom <= self.top || self.right <= self.left
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &DirtyRect) -> DirtyRect {
        DirtyRect {
            top: self.top.min(other.top),
            left: self.left.min(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.max(other.right),
        }
    }
}

/// Damage accumulated since the last presentation.
#[derive(Debug, Clone, Default)]
pub struct VideoDamage {
    dirty: Option<DirtyRect>,
    suppressed: bool,
}

impl VideoDamage {
    pub fn mark(&mut self, rect: DirtyRect) {
        if rect.is_empty() {
            return;
        }
        self.dirty = Some(match self.dirty {
            Some(existing) => existing.union(&rect),
            None => rect,
        });
    }

    /// True while the scheduler is catching up; intermediate frames will
    /// not be presented. Damage is still accumulated.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    pub(crate) fn set_suppressed(&mut self, suppressed: bool) {
        self.suppressed = suppressed;
    }

    pub fn has_damage(&self) -> bool {
        self.dirty.is_some()
    }

    pub(crate) fn take(&mut self) -> Option<DirtyRect> {
        self.dirty.take()
    }
}

/// What a tick may touch.
pub struct TickContext<'a> {
    pub sound: &'a mut SoundProducer,
    pub video: &'a mut VideoDamage,
    /// Emulated real-time clock, seconds since 1904-01-01
    pub date_seconds: u32,
}

/// The emulated machine.
pub trait Machine {
    /// Run one tick of emulated time.
    fn emulate_tick(&mut self, ctx: &mut TickContext<'_>);

    /// Optional work between ticks. Call `more()` before each unit of work
    /// and stop once it returns false.
    fn emulate_extra_time(&mut self, ctx: &mut TickContext<'_>, more: &mut dyn FnMut() -> bool) {
        let _ = (ctx, more);
    }
}

/// Receives the region to redraw.
pub trait Presenter {
    fn present_dirty_region(&mut self, rect: DirtyRect);
}
