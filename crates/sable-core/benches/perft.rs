use std::hint::black_box;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use sable_core::perft::perft;
use sable_core::position::{Position, START_FEN};

const BENCH_DEPTHS: [u32; 1] = [4];
const REFERENCE_COUNTS: &[(u32, u64)] = &[
    (1, 20),
    (2, 400),
    (3, 8_902),
    (4, 197_281),
    (5, 4_865_609),
];

fn expected_nodes(depth: u32) -> Option<u64> {
    REFERENCE_COUNTS
        .iter()
        .find_map(|&(d, nodes)| (d == depth).then_some(nodes))
}

fn perft_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("perft");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(8));

    for &depth in &BENCH_DEPTHS {
        let expected = expected_nodes(depth).unwrap_or_else(|| {
            panic!("no reference node count recorded for perft depth {depth}");
        });

        let mut pos = Position::from_fen(START_FEN, false).unwrap();
        assert_eq!(
            perft(&mut pos, depth),
            expected,
            "reference node count mismatch at depth {depth}"
        );

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let mut pos = Position::from_fen(START_FEN, false).unwrap();
                let nodes = perft(&mut pos, black_box(depth));
                black_box(nodes)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, perft_benchmark);
criterion_main!(benches);
