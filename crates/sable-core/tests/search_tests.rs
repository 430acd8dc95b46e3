//! End-to-end search scenarios driven through the engine facade.

use std::sync::mpsc::{Receiver, channel};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sable_core::engine::Engine;
use sable_core::notation::move_text;
use sable_core::position::START_FEN;
use sable_core::search::{Limits, PvInfo, SearchCallbacks};
use sable_core::types::{Move, is_mate, mate_distance};

struct Harness {
    engine: Engine,
    infos: Arc<Mutex<Vec<PvInfo>>>,
    bestmoves: Receiver<(Move, Move)>,
}

fn harness() -> Harness {
    let infos: Arc<Mutex<Vec<PvInfo>>> = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = channel();

    let sink = infos.clone();
    let callbacks = SearchCallbacks {
        on_update: Some(Arc::new(move |info: &PvInfo| {
            sink.lock().unwrap().push(info.clone());
        })),
        on_currmove: None,
        on_bestmove: Some(Arc::new(move |best, ponder| {
            tx.send((best, ponder)).ok();
        })),
    };

    Harness { engine: Engine::new(callbacks), infos, bestmoves: rx }
}

impl Harness {
    fn go_and_wait(&mut self, limits: Limits) -> (Move, Move) {
        self.infos.lock().unwrap().clear();
        self.engine.go(limits);
        let result = self
            .bestmoves
            .recv_timeout(Duration::from_secs(60))
            .expect("search must produce a bestmove");
        self.engine.wait();
        result
    }

    fn last_value(&self) -> i32 {
        self.infos.lock().unwrap().last().expect("search emitted info lines").value
    }
}

fn depth_limits(depth: i32) -> Limits {
    Limits { depth, ..Default::default() }
}

/// Mate in one is found immediately and reported as `mate 1`.
#[test]
fn test_mate_in_one() {
    let mut h = harness();
    h.engine.set_position("4k3/8/4K3/8/8/8/8/6R1 w - - 0 1", &[]).unwrap();
    let (best, _) = h.go_and_wait(depth_limits(4));
    assert_eq!(move_text(best, false), "g1g8");
    let value = h.last_value();
    assert!(is_mate(value) && mate_distance(value) == 1, "score was {value}");
}

/// With KQ vs K the engine must not throw the win away by stalemate.
#[test]
fn test_stalemate_avoidance() {
    let mut h = harness();
    h.engine.set_position("7k/5Q2/6K1/8/8/8/8/8 w - - 0 1", &[]).unwrap();
    let (best, _) = h.go_and_wait(depth_limits(6));
    assert_ne!(move_text(best, false), "f7g7", "Qg7 stalemates");
    assert!(h.last_value() > 0);
}

/// Completing a threefold shuffle scores as a (jittered) draw.
#[test]
fn test_repetition_draw() {
    let mut h = harness();
    // Two knight round trips; one more retreat recreates the start position
    // for the third time.
    h.engine
        .set_position(
            START_FEN,
            &["g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1"],
        )
        .unwrap();

    let mut pos = h.engine.position().clone();
    let repeat = sable_core::notation::parse_move(&mut pos, "f6g8").unwrap();
    let mut limits = depth_limits(4);
    limits.search_moves = vec![repeat];

    let (best, _) = h.go_and_wait(limits);
    assert_eq!(best, repeat);
    assert!(h.last_value().abs() <= 4, "draw score was {}", h.last_value());
}

/// A completed search fills the shared table; repeating it is much cheaper.
#[test]
fn test_tt_reuse_across_searches() {
    let mut h = harness();
    let fen = "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10";
    h.engine.set_position(fen, &[]).unwrap();

    h.go_and_wait(depth_limits(7));
    let first = h.engine.nodes();

    h.engine.set_position(fen, &[]).unwrap();
    h.go_and_wait(depth_limits(6));
    let second = h.engine.nodes();

    assert!(second < first, "table reuse: {second} vs {first}");
}

/// MultiPV emits one ordered line per requested PV at the final depth.
#[test]
fn test_multipv_two_lines() {
    let mut h = harness();
    h.engine.set_option("MultiPV", "2").unwrap();
    h.engine.set_position(START_FEN, &[]).unwrap();
    h.go_and_wait(depth_limits(6));

    let infos = h.infos.lock().unwrap();
    let final_depth = infos.iter().map(|i| i.depth).max().unwrap();
    let lines: Vec<&PvInfo> = infos.iter().filter(|i| i.depth == final_depth).collect();
    let first = lines.iter().rev().find(|i| i.multipv == 1).expect("multipv 1 line");
    let second = lines.iter().rev().find(|i| i.multipv == 2).expect("multipv 2 line");
    assert!(first.value >= second.value);
    assert!(infos.iter().all(|i| i.multipv <= 2));
}

/// On a 100 ms clock the bestmove arrives promptly and is legal.
#[test]
fn test_time_abandonment() {
    let mut h = harness();
    h.engine.set_position(START_FEN, &[]).unwrap();

    let mut limits = Limits::default();
    limits.clocks[0].time = 100;
    limits.clocks[1].time = 100;

    let started = Instant::now();
    let (best, _) = h.go_and_wait(limits);
    let elapsed = started.elapsed();

    assert!(best.is_some());
    assert!(elapsed < Duration::from_millis(2000), "took {elapsed:?}");
}

/// searchmoves restricts the root; the excluded mate is not played.
#[test]
fn test_searchmoves_restriction() {
    let mut h = harness();
    h.engine.set_position("4k3/8/4K3/8/8/8/8/6R1 w - - 0 1", &[]).unwrap();

    let mut pos = h.engine.position().clone();
    let forced = sable_core::notation::parse_move(&mut pos, "g1g7").unwrap();
    let mut limits = depth_limits(4);
    limits.search_moves = vec![forced];

    let (best, _) = h.go_and_wait(limits);
    assert_eq!(move_text(best, false), "g1g7");
}

/// A checkmated root produces `bestmove (none)`.
#[test]
fn test_checkmated_root() {
    let mut h = harness();
    h.engine.set_position("6k1/6Q1/6K1/8/8/8/8/8 b - - 0 1", &[]).unwrap();
    let (best, ponder) = h.go_and_wait(depth_limits(4));
    assert_eq!(best, Move::NONE);
    assert_eq!(ponder, Move::NONE);
}

/// Fixed node budgets terminate the search close to the limit.
#[test]
fn test_node_limit() {
    let mut h = harness();
    h.engine.set_position(START_FEN, &[]).unwrap();
    let limits = Limits { nodes: 20_000, ..Default::default() };
    let (best, _) = h.go_and_wait(limits);
    assert!(best.is_some());
    assert!(h.engine.nodes() < 200_000, "nodes {}", h.engine.nodes());
}
