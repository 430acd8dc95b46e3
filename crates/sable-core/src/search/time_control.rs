//! Time allocation for timed games.
//!
//! Computes an optimum and a maximum budget at search start; the worker
//! polls the clock on a decimated schedule and the end of every root
//! iteration decides whether the remaining optimum is worth spending.

use std::sync::OnceLock;
use std::time::Instant;

use crate::position::Position;
use crate::search::{Limits, SearchOptions};

/// Maximum move horizon assumed when the GUI sends no movestogo.
const MAX_MOVES_TO_GO: i64 = 50;
const MTG_FACTOR: f64 = 0.05051;

/// Small sentinel added to the node budget in nodes-as-time mode so an
/// exhausted budget stays distinguishable from an uninitialized one.
const OFFSET_NODE: i64 = 1;

/// Wall-clock (or node-count) budgeting for one search.
#[derive(Debug)]
pub struct TimeManager {
    start_time: Instant,
    optimum_time: i64,
    maximum_time: i64,
    /// Nodes per millisecond when 'Nodes as Time' is active, else 0.
    nodes_time: i64,
    /// Remaining node budget across the game in nodes-as-time mode.
    remain_nodes: i64,
    /// Per-game adjustment derived from the first remaining-time reading.
    initial_adjust: f64,
}

impl TimeManager {
    pub fn new() -> TimeManager {
        TimeManager {
            start_time: Instant::now(),
            optimum_time: 0,
            maximum_time: 0,
            nodes_time: 0,
            remain_nodes: 0,
            initial_adjust: -1.0,
        }
    }

    /// Forgets game-scoped state; called on `ucinewgame`.
    pub fn clear(&mut self) {
        self.remain_nodes = 0;
        self.initial_adjust = -1.0;
    }

    /// Elapsed search effort: wall milliseconds, or searched nodes when the
    /// NodesTime option converts the clock into a node budget.
    #[inline]
    pub fn elapsed(&self, nodes: u64) -> i64 {
        if self.use_nodes_time() {
            nodes as i64
        } else {
            self.start_time.elapsed().as_millis() as i64
        }
    }

    #[inline]
    pub fn optimum(&self) -> i64 {
        self.optimum_time
    }

    #[inline]
    pub fn maximum(&self) -> i64 {
        self.maximum_time
    }

    #[inline]
    pub fn use_nodes_time(&self) -> bool {
        self.nodes_time != 0
    }

    /// Deducts the nodes spent by the finished search from the game budget.
    pub fn update_nodes(&mut self, used_nodes: u64) {
        debug_assert!(self.use_nodes_time());
        self.remain_nodes =
            (self.remain_nodes - OFFSET_NODE - used_nodes as i64).max(0) + OFFSET_NODE;
    }

    /// Computes the time bounds for this move. Supports both "x basetime
    /// (+ z increment)" and "x moves in y seconds (+ z increment)".
    pub fn init(&mut self, limits: &mut Limits, pos: &Position, options: &SearchOptions) {
        self.start_time = limits.start_time;
        self.nodes_time = options.nodes_time;

        let us = pos.active_color();
        let mut time = limits.clocks[us as usize].time;
        let mut inc = limits.clocks[us as usize].inc;
        let moves_to_go = limits.moves_to_go as i64;

        if time == 0 {
            self.optimum_time = 0;
            self.maximum_time = 0;
            return;
        }

        let mut move_overhead = options.move_overhead;

        // In 'Nodes as Time' mode the clock is converted into nodes, and the
        // same formulas run on node counts. The configured nodes-per-ms rate
        // must stay well below the real engine speed to avoid time losses.
        if self.use_nodes_time() {
            if self.remain_nodes == 0 {
                self.remain_nodes = time * self.nodes_time + OFFSET_NODE;
            }
            time = self.remain_nodes - OFFSET_NODE;
            inc *= self.nodes_time;
            move_overhead *= self.nodes_time;
        }

        let scale_factor = self.nodes_time.max(1);
        let scaled_time = time / scale_factor;
        let scaled_inc = inc / scale_factor;

        // Maximum move horizon
        let mut mtg = if moves_to_go != 0 {
            (((MAX_MOVES_TO_GO as f64 + 0.1 * (moves_to_go - MAX_MOVES_TO_GO).max(0) as f64)
                .floor()) as i64)
                .min(moves_to_go)
        } else {
            (((MAX_MOVES_TO_GO as f64
                - 0.1 * (pos.game_ply() as i64 / 2 + 1 - 20).max(0) as f64)
                .ceil()) as i64)
                .max(MAX_MOVES_TO_GO - 10)
        };

        // With under a second on the clock, shrink the horizon.
        if scaled_time < 1000 && mtg as f64 > MTG_FACTOR * scaled_inc as f64 {
            mtg = ((MTG_FACTOR * scaled_time as f64) as i64).clamp(2, mtg);
        }

        // remainTime must stay positive, it is used as a divisor.
        let remain_time = (time + (mtg - 1) * inc - (mtg + 2) * move_overhead).max(1);

        let ply = pos.game_ply() as f64;

        let (optimum_scale, maximum_scale);
        if moves_to_go != 0 {
            // x moves in y time (+ z increment)
            optimum_scale = ((0.8800 + 85.9106e-4 * ply) / mtg as f64)
                .min(0.8800 * time as f64 / remain_time as f64);
            maximum_scale = (1.3000 + 0.1100 * mtg as f64).min(8.4500);
        } else {
            // x basetime (+ z increment): a healthy increment can push the
            // remaining time past the game clock, so cap against it too.
            if self.initial_adjust < 0.0 {
                self.initial_adjust =
                    (-0.4354 + 0.3128 * (remain_time as f64).log10()).max(1.0e-6);
            }
            let log10_scaled_time = (1.0e-3 * scaled_time as f64).log10();
            let optimum_constant = (3.2116e-3 + 32.1123e-5 * log10_scaled_time).min(5.08017e-3);
            let maximum_constant = (3.3977 + 3.0395 * log10_scaled_time).max(2.94761);

            optimum_scale = self.initial_adjust
                * (12.1431e-3 + optimum_constant * (2.94693 + ply).powf(0.461073))
                    .min(0.213035 * time as f64 / remain_time as f64);
            maximum_scale = (maximum_constant + 83.439719e-3 * ply).min(6.67704);
        }

        self.optimum_time = (optimum_scale * remain_time as f64) as i64;
        self.maximum_time = if mtg > 1 {
            ((0.82518 * time as f64 - move_overhead as f64)
                .min(maximum_scale * self.optimum_time as f64) as i64)
                - 10
        } else {
            time - move_overhead
        }
        .max(1);

        if limits.ponder {
            self.optimum_time = (self.optimum_time as f64 * 1.2500) as i64;
        }

        if is_debug_enabled() {
            eprintln!(
                "[TimeManager] init: side={:?} time={time}ms inc={inc}ms mtg={mtg} optimum={}ms maximum={}ms",
                us, self.optimum_time, self.maximum_time
            );
        }
    }
}

impl Default for TimeManager {
    fn default() -> Self {
        TimeManager::new()
    }
}

fn is_debug_enabled() -> bool {
    static DEBUG: OnceLock<bool> = OnceLock::new();
    *DEBUG.get_or_init(|| {
        let env_var = std::env::var("SABLE_DEBUG_TIME").unwrap_or_default();
        env_var == "1" || env_var.to_lowercase() == "true"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;

    fn limits_with_clock(ms: i64, inc: i64) -> Limits {
        let mut limits = Limits::default();
        limits.clocks[0].time = ms;
        limits.clocks[0].inc = inc;
        limits
    }

    /// Optimum never exceeds maximum, and both fit in the clock.
    #[test]
    fn test_budget_shape() {
        let pos = Position::startpos();
        let options = SearchOptions::default();
        for (time, inc) in [(100i64, 0i64), (1000, 10), (60_000, 1000), (300_000, 0)] {
            let mut tm = TimeManager::new();
            let mut limits = limits_with_clock(time, inc);
            tm.init(&mut limits, &pos, &options);
            assert!(tm.optimum() >= 0);
            assert!(tm.maximum() >= 1);
            assert!(tm.optimum() <= tm.maximum() + 10, "time={time} inc={inc}");
            assert!(tm.maximum() <= time, "maximum exceeds the clock");
        }
    }

    /// More clock time buys a larger budget.
    #[test]
    fn test_budget_monotone_in_time() {
        let pos = Position::startpos();
        let options = SearchOptions::default();
        let mut small = TimeManager::new();
        let mut big = TimeManager::new();
        small.init(&mut limits_with_clock(1_000, 0), &pos, &options);
        big.init(&mut limits_with_clock(100_000, 0), &pos, &options);
        assert!(big.optimum() > small.optimum());
        assert!(big.maximum() > small.maximum());
    }

    /// movestogo mode divides the budget across the horizon.
    #[test]
    fn test_moves_to_go() {
        let pos = Position::startpos();
        let options = SearchOptions::default();
        let mut tm = TimeManager::new();
        let mut limits = limits_with_clock(60_000, 0);
        limits.moves_to_go = 10;
        tm.init(&mut limits, &pos, &options);
        assert!(tm.optimum() > 0);
        // Roughly a tenth of the clock, never the whole of it
        assert!(tm.optimum() < 20_000);
    }

    /// Nodes-as-time replaces wall time with node counts.
    #[test]
    fn test_nodes_time_mode() {
        let pos = Position::startpos();
        let options = SearchOptions { nodes_time: 1000, ..Default::default() };
        let mut tm = TimeManager::new();
        let mut limits = limits_with_clock(1_000, 0);
        tm.init(&mut limits, &pos, &options);
        assert!(tm.use_nodes_time());
        assert_eq!(tm.elapsed(12345), 12345);
        let before = tm.remain_nodes;
        tm.update_nodes(1000);
        assert!(tm.remain_nodes < before);
    }

    /// Pondering inflates the optimum budget.
    #[test]
    fn test_ponder_bonus() {
        let pos = Position::startpos();
        let options = SearchOptions::default();
        let mut plain = TimeManager::new();
        let mut pondering = TimeManager::new();
        plain.init(&mut limits_with_clock(60_000, 0), &pos, &options);
        let mut limits = limits_with_clock(60_000, 0);
        limits.ponder = true;
        pondering.init(&mut limits, &pos, &options);
        assert!(pondering.optimum() > plain.optimum());
    }
}
