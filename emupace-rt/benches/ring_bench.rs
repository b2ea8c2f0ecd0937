//! Sound ring throughput benchmark
//!
//! Measures the producer write path and the consumer drain path the audio
//! callback runs. Both must stay far below one callback period.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use emupace_rt::sound::{RingConfig, SoundRing};

fn bench_ring_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("sound_ring");

    group.bench_function("write_one_tick", |b| {
        // 22255 Hz / 60.15 Hz ~= 370 samples per tick
        let ring = SoundRing::new(RingConfig::default());
        let (mut producer, _consumer) = ring.split();
        let tick = vec![0x90u8; 370];

        b.iter(|| {
            producer.write_all(black_box(&tick));
        });
    });

    group.bench_function("drain_one_callback", |b| {
        let config = RingConfig {
            start_threshold_blocks: 0,
            ..RingConfig::default()
        };
        let ring = SoundRing::new(config);
        let (mut producer, mut consumer) = ring.split();
        let block = vec![0x90u8; config.geometry.block_len() as usize];
        let mut out = vec![0u8; 1024];

        b.iter(|| {
            producer.write_all(&block);
            producer.write_all(&block);
            let report = consumer.fill(black_box(&mut out));
            black_box(report);
        });
    });

    group.bench_function("drain_underrun", |b| {
        let ring = SoundRing::new(RingConfig::default());
        let (_producer, mut consumer) = ring.split();
        let mut out = vec![0u8; 1024];

        b.iter(|| {
            let report = consumer.fill(black_box(&mut out));
            black_box(report);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_ring_operations);
criterion_main!(benches);
