//! Test helpers for emupace-rt integration tests
//!
//! - RecordingMachine: writes a recognisable audio pattern each tick and
//!   records how each tick was run
//! - RecordingPresenter: keeps every presented rectangle
//! - Ring and sampler builders with small, test-friendly geometry

#![allow(dead_code)]

pub mod recording;

pub use recording::{DrainingPresenter, RecordingMachine, RecordingPresenter};

use emupace_common::timing::TickRate;
use emupace_rt::pacing::SamplerConfig;
use emupace_rt::sound::{RingConfig, RingGeometry, RingHandle, SoundConsumer, SoundProducer, SoundRing};

pub const SILENCE: u8 = 0x80;

/// 60 Hz sampler with the given suspend threshold
pub fn sixty_hz(suspend_threshold_ms: u32) -> SamplerConfig {
    SamplerConfig {
        rate: TickRate::new(60, 1).unwrap(),
        suspend_threshold_ms,
        backward_tolerance_ms: 20,
    }
}

/// Ring of `2^ln2_blocks` blocks of `2^ln2_block_len` bytes
pub fn ring(
    ln2_block_len: u32,
    ln2_blocks: u32,
    start_threshold_blocks: u32,
) -> (SoundProducer, SoundConsumer, RingHandle) {
    let ring = SoundRing::new(RingConfig {
        geometry: RingGeometry::new(ln2_block_len, ln2_blocks).unwrap(),
        start_threshold_blocks,
        silence: SILENCE,
    });
    let handle = ring.handle();
    let (producer, consumer) = ring.split();
    (producer, consumer, handle)
}

/// `blocks` blocks of `block_len` bytes, block `i` filled with byte `i`
pub fn block_pattern(blocks: usize, block_len: usize) -> Vec<u8> {
    (0..blocks)
        .flat_map(|i| std::iter::repeat(i as u8).take(block_len))
        .collect()
}

/// Drain exactly `len` bytes in chunks cycling through `chunk_sizes`
pub fn drain_in_chunks(consumer: &mut SoundConsumer, len: usize, chunk_sizes: &[usize]) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut sizes = chunk_sizes.iter().cycle();
    while out.len() < len {
        let size = (*sizes.next().unwrap()).min(len - out.len());
        let mut chunk = vec![0u8; size];
        consumer.fill(&mut chunk);
        out.extend_from_slice(&chunk);
    }
    out
}
