//! Pairing and Planning Benchmarks
//!
//! # Running Benchmarks
//! ```bash
//! cargo bench --bench planning
//! ```

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use split_compositor::{
    audio::{AudioData, LoudnessMeter},
    catalog::VideoAsset,
    composition::{CompositionPlanner, Size},
    config::Config,
    manifest::AssetRef,
    pairing::{PairGenerator, SortKey},
};

const RESOLUTIONS: [(u32, u32); 4] = [(1920, 1080), (1080, 1920), (1280, 720), (1080, 1080)];

fn catalog(n: usize) -> Vec<VideoAsset> {
    (0..n)
        .map(|i| {
            let (w, h) = RESOLUTIONS[i % RESOLUTIONS.len()];
            VideoAsset::new(format!("clip{:05}", i), format!("clips/clip{:05}.mp4", i), 10.0, w, h)
        })
        .collect()
}

fn bench_pairing(c: &mut Criterion) {
    let mut group = c.benchmark_group("pairing");

    for n in [100, 1_000, 10_000] {
        let assets = catalog(n);
        let eligible: Vec<&VideoAsset> = assets.iter().collect();
        group.throughput(Throughput::Elements(n as u64));

        for key in [SortKey::AssetId, SortKey::IdentityHash] {
            let generator = PairGenerator::new(key);
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", key), n),
                &eligible,
                |b, eligible| b.iter(|| black_box(generator.pair(black_box(eligible), Utc::now()))),
            );
        }
    }

    group.finish();
}

fn bench_planning(c: &mut Criterion) {
    let planner = match CompositionPlanner::from_config(&Config::default()) {
        Ok(planner) => planner,
        Err(e) => panic!("default config must plan: {}", e),
    };
    let mut group = c.benchmark_group("planning");

    group.bench_function("decide", |b| {
        b.iter(|| {
            for (w, h) in RESOLUTIONS {
                black_box(planner.decide(black_box(Size::new(w, h)), Size::new(1080, 960)));
            }
        })
    });

    let assets = catalog(2);
    let (top, bottom) = (AssetRef::from(&assets[0]), AssetRef::from(&assets[1]));
    group.bench_function("plan_one_off", |b| {
        b.iter(|| black_box(planner.plan_one_off("pair_bench", &top, &bottom, None, None, -14.0)))
    });

    group.finish();
}

fn bench_meter(c: &mut Criterion) {
    let rate = 48_000;
    let samples: Vec<f32> = (0..rate * 10)
        .flat_map(|n| {
            let s = 0.1 * (2.0 * std::f32::consts::PI * 997.0 * n as f32 / rate as f32).sin();
            [s, s]
        })
        .collect();
    let audio = AudioData::from_samples(samples, rate as u32, 2);
    let meter = LoudnessMeter::new();

    let mut group = c.benchmark_group("loudness");
    group.sample_size(10);
    group.bench_function("measure_10s_stereo", |b| b.iter(|| black_box(meter.measure(&audio))));
    group.finish();
}

criterion_group!(benches, bench_pairing, bench_planning, bench_meter);
criterion_main!(benches);
