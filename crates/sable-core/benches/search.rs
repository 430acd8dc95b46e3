use std::hint::black_box;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use sable_core::engine::Engine;
use sable_core::search::{Limits, SearchCallbacks};

const BENCH_POSITIONS: &[&str] = &[
    "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10",
    "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
];

fn search_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_depth_8");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(20));

    group.bench_function("fixed_depth", |b| {
        let (tx, rx) = channel();
        let callbacks = SearchCallbacks {
            on_update: None,
            on_currmove: None,
            on_bestmove: Some(Arc::new(move |best, _| {
                tx.send(best).ok();
            })),
        };
        let mut engine = Engine::new(callbacks);

        b.iter(|| {
            for fen in BENCH_POSITIONS {
                engine.new_game();
                engine.set_position(fen, &[]).unwrap();
                engine.go(Limits { depth: 8, ..Default::default() });
                let best = rx.recv().expect("bestmove");
                black_box(best);
                engine.wait();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, search_benchmark);
criterion_main!(benches);
