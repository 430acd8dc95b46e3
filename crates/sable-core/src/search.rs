//! Search subsystem: limits, per-search options, progress callbacks and the
//! worker/thread-pool machinery in the submodules.

pub mod node_type;
pub mod root_move;
pub mod threading;
pub mod time_control;
pub mod worker;

use std::sync::Arc;
use std::time::Instant;

use rand::RngExt;

use crate::search::root_move::RootMove;
use crate::types::{Depth, Move, Value};

/// Remaining clock time and increment for one side, in milliseconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct Clock {
    pub time: i64,
    pub inc: i64,
}

/// Everything a `go` command can constrain.
#[derive(Clone, Debug)]
pub struct Limits {
    pub clocks: [Clock; 2],
    pub moves_to_go: u32,
    pub move_time: i64,
    pub depth: Depth,
    pub nodes: u64,
    pub mate: u32,
    pub infinite: bool,
    pub ponder: bool,
    pub search_moves: Vec<Move>,
    pub ignore_moves: Vec<Move>,
    pub start_time: Instant,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            clocks: [Clock::default(); 2],
            moves_to_go: 0,
            move_time: 0,
            depth: 0,
            nodes: 0,
            mate: 0,
            infinite: false,
            ponder: false,
            search_moves: Vec::new(),
            ignore_moves: Vec::new(),
            start_time: Instant::now(),
        }
    }
}

impl Limits {
    /// True when either clock carries time, i.e. the time manager runs.
    #[inline]
    pub fn use_time_manager(&self) -> bool {
        self.clocks[0].time != 0 || self.clocks[1].time != 0
    }

    /// Poll decimation: how many search calls pass between two clock reads.
    pub fn calls_count(&self) -> u16 {
        if self.nodes != 0 {
            (1 + self.nodes.div_ceil(1024)).min(512) as u16
        } else {
            512
        }
    }
}

/// Per-search option snapshot, copied into every worker at `start`.
#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub multi_pv: usize,
    pub skill_level: i32,
    pub limit_strength: bool,
    pub elo: i32,
    pub move_overhead: i64,
    pub nodes_time: i64,
    pub chess960: bool,
    pub syzygy_probe_limit: u32,
    pub syzygy_probe_depth: Depth,
    pub syzygy_50_move_rule: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            multi_pv: 1,
            skill_level: 20,
            limit_strength: false,
            elo: MAX_ELO,
            move_overhead: 10,
            nodes_time: 0,
            chess960: false,
            syzygy_probe_limit: 7,
            syzygy_probe_depth: 1,
            syzygy_50_move_rule: true,
        }
    }
}

/// One `info ... pv` line worth of progress.
#[derive(Clone, Debug)]
pub struct PvInfo {
    pub depth: Depth,
    pub sel_depth: i32,
    pub multipv: usize,
    pub value: Value,
    pub bound_lower: bool,
    pub bound_upper: bool,
    pub time_ms: i64,
    pub nodes: u64,
    pub nps: u64,
    pub hashfull: usize,
    pub tb_hits: u64,
    pub pv: Vec<Move>,
}

/// A `info ... currmove` update.
#[derive(Clone, Debug)]
pub struct CurrMoveInfo {
    pub depth: Depth,
    pub curr_move: Move,
    pub curr_move_number: usize,
}

pub type OnUpdate = dyn Fn(&PvInfo) + Send + Sync;
pub type OnCurrMove = dyn Fn(&CurrMoveInfo) + Send + Sync;
pub type OnBestMove = dyn Fn(Move, Move) + Send + Sync;

/// Progress sinks wired in by the front end. All optional; a missing sink
/// just drops the report.
#[derive(Default, Clone)]
pub struct SearchCallbacks {
    pub on_update: Option<Arc<OnUpdate>>,
    pub on_currmove: Option<Arc<OnCurrMove>>,
    pub on_bestmove: Option<Arc<OnBestMove>>,
}

/// Skill-level handicap: when enabled, the move played is picked from the
/// searched lines by a value-weighted randomized rule instead of taking the
/// best line outright.
#[derive(Clone, Debug)]
pub struct Skill {
    level: f64,
    pub best: Move,
}

/// Lowest Elo reachable through `UCI_ELO`, mapped onto fractional levels.
pub const MIN_ELO: i32 = 1320;
pub const MAX_ELO: i32 = 3190;

impl Skill {
    pub fn new(level: i32, limit_strength: bool, elo: i32) -> Skill {
        let level = if limit_strength {
            let e = (elo.clamp(MIN_ELO, MAX_ELO) - MIN_ELO) as f64
                / (MAX_ELO - MIN_ELO) as f64;
            -311.4380 * e * e + 341.1295 * e - 9.6924
        } else {
            level as f64
        };
        Skill { level, best: Move::NONE }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.level < 20.0
    }

    /// Picking is delayed to the iteration matching the level so weaker
    /// settings rely on shallower information.
    #[inline]
    pub fn time_to_pick(&self, depth: Depth) -> bool {
        depth == 1 + self.level as Depth
    }

    /// Chooses among the first `multi_pv` root moves, randomly favouring
    /// higher scores. Weaker levels wander further from the top line.
    pub fn pick_best_move(&mut self, root_moves: &[RootMove], multi_pv: usize) -> Move {
        let mut rng = rand::rng();
        let multi_pv = multi_pv.min(root_moves.len());

        let top_value = root_moves[0].cur_value;
        let delta = (top_value - root_moves[multi_pv - 1].cur_value).min(crate::piece::VALUE_PAWN);
        let weakness = 120.0 - 2.0 * self.level;

        let mut best_value = -crate::types::VALUE_INFINITE;
        self.best = root_moves[0].pv[0];
        for rm in root_moves.iter().take(multi_pv) {
            let push = weakness * (top_value - rm.cur_value) as f64 / 120.0
                + delta as f64 * rng.random_range(0.0..1.0);
            let value = rm.cur_value + push as Value;
            if value > best_value {
                best_value = value;
                self.best = rm.pv[0];
            }
        }
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calls_count_decimation() {
        let mut limits = Limits::default();
        assert_eq!(limits.calls_count(), 512);
        limits.nodes = 1024;
        assert_eq!(limits.calls_count(), 2);
        limits.nodes = 10_000_000;
        assert_eq!(limits.calls_count(), 512);
    }

    #[test]
    fn test_skill_mapping() {
        let full = Skill::new(20, false, 0);
        assert!(!full.enabled());
        let weak = Skill::new(5, false, 0);
        assert!(weak.enabled());
        assert!(weak.time_to_pick(6));
        let capped = Skill::new(20, true, MIN_ELO);
        assert!(capped.enabled());
    }
}
