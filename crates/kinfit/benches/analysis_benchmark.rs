use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use kinfit::{
    data::{test_dstar_event, test_event, EventBuilder, VertexKind},
    Analysis, Event, NullObserver, Vec3,
};

/// `n_tracks` prompt tracks with random kinematics and alternating charge, every second pair
/// of which forms a displaced vertex.
fn synthetic_event(rng: &mut fastrand::Rng, number: u64, n_tracks: usize) -> Event {
    let mut builder = EventBuilder::new(1, number);
    builder.add_primary_vertex(Vec3::default());
    let ids: Vec<_> = (0..n_tracks)
        .map(|i| {
            let p3 = Vec3::from_pt_eta_phi(
                0.3 + 4.0 * rng.f64(),
                4.0 * rng.f64() - 2.0,
                std::f64::consts::TAU * rng.f64(),
            );
            builder.add_track(p3, if i % 2 == 0 { 1 } else { -1 })
        })
        .collect();
    for pair in ids.chunks_exact(2).step_by(2) {
        let position = Vec3::new(rng.f64() - 0.5, rng.f64() - 0.5, rng.f64() - 0.5) * 10.0;
        builder.add_vertex(position, pair, VertexKind::Secondary);
    }
    builder.build().unwrap()
}

fn events(n: usize) -> Vec<Event> {
    let mut rng = fastrand::Rng::with_seed(0);
    (0..n)
        .map(|i| match i % 10 {
            0 => test_event(),
            1 => test_dstar_event(),
            _ => synthetic_event(&mut rng, i as u64, 12),
        })
        .collect()
}

fn analysis_benchmark(c: &mut Criterion) {
    let events = events(1000);
    let mut group = c.benchmark_group("analysis");
    group.bench_function("serial", |b| {
        b.iter_batched(
            Analysis::default,
            |mut analysis| black_box(analysis.process(&events, &mut NullObserver)),
            BatchSize::SmallInput,
        )
    });
    for threads in [2, 4, num_cpus::get()] {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
        group.bench_with_input(BenchmarkId::new("parallel", threads), &threads, |b, _| {
            b.iter_batched(
                Analysis::default,
                |mut analysis| pool.install(|| black_box(analysis.par_process(&events, &mut NullObserver))),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, analysis_benchmark);
criterion_main!(benches);
