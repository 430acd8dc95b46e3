//! Engine facade: owns the thread pool, transposition table and tablebases,
//! and translates option/position/go requests into searches.

use std::path::Path;
use std::sync::Arc;

use crate::error::EngineError;
use crate::notation::parse_move;
use crate::position::Position;
use crate::search::threading::ThreadPool;
use crate::search::{Limits, SearchCallbacks, SearchOptions};
use crate::syzygy::Tablebases;
use crate::tt::TranspositionTable;

/// How workers are spread over NUMA domains. Placement is advisory: the
/// policy is parsed and kept, but no node-local allocator is involved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NumaPolicy {
    None,
    Auto,
    /// Explicit `n-m:n-m:...` CPU ranges.
    Explicit(Vec<(usize, usize)>),
}

impl NumaPolicy {
    pub fn parse(value: &str) -> NumaPolicy {
        match value.to_ascii_lowercase().as_str() {
            "none" => NumaPolicy::None,
            "auto" | "system" | "hardware" => NumaPolicy::Auto,
            other => {
                let mut ranges = Vec::new();
                for part in other.split(':') {
                    let mut ends = part.splitn(2, '-');
                    let lo = ends.next().and_then(|s| s.parse().ok());
                    let hi = ends.next().and_then(|s| s.parse().ok());
                    if let (Some(lo), Some(hi)) = (lo, hi) {
                        ranges.push((lo, hi));
                    }
                }
                if ranges.is_empty() { NumaPolicy::Auto } else { NumaPolicy::Explicit(ranges) }
            }
        }
    }
}

/// The full user-visible option set.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub threads: usize,
    pub hash_mb: usize,
    pub multi_pv: usize,
    pub ponder: bool,
    pub move_overhead: i64,
    pub nodes_time: i64,
    pub skill_level: i32,
    pub limit_strength: bool,
    pub elo: i32,
    pub chess960: bool,
    pub show_wdl: bool,
    pub syzygy_path: String,
    pub syzygy_probe_limit: u32,
    pub syzygy_probe_depth: i32,
    pub syzygy_50_move_rule: bool,
    pub hash_retain: bool,
    pub hash_file: String,
    pub numa_policy: NumaPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            threads: 1,
            hash_mb: 16,
            multi_pv: 1,
            ponder: false,
            move_overhead: 10,
            nodes_time: 0,
            skill_level: 20,
            limit_strength: false,
            elo: crate::search::MAX_ELO,
            chess960: false,
            show_wdl: false,
            syzygy_path: String::new(),
            syzygy_probe_limit: 7,
            syzygy_probe_depth: 1,
            syzygy_50_move_rule: true,
            hash_retain: false,
            hash_file: "hash.bin".to_string(),
            numa_policy: NumaPolicy::Auto,
        }
    }
}

/// The engine instance a front end drives.
pub struct Engine {
    options: EngineOptions,
    tt: Arc<TranspositionTable>,
    tb: Arc<Tablebases>,
    pool: Arc<ThreadPool>,
    callbacks: Arc<SearchCallbacks>,
    pos: Position,
}

impl Engine {
    pub fn new(callbacks: SearchCallbacks) -> Engine {
        let options = EngineOptions::default();
        let callbacks = Arc::new(callbacks);
        let tt = Arc::new(TranspositionTable::new(options.hash_mb));
        let tb = Arc::new(Tablebases::new());
        let pool = ThreadPool::new(options.threads, tt.clone(), tb.clone(), callbacks.clone());
        Engine {
            options,
            tt,
            tb,
            pool,
            callbacks,
            pos: Position::startpos(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn position(&self) -> &Position {
        &self.pos
    }

    /// The workers hold shared handles to the table and tablebases, so any
    /// change to those (or to the thread count) swaps in a fresh pool. Only
    /// done while no search runs.
    fn rebuild_pool(&mut self) {
        self.pool.wait_finish();
        self.pool =
            ThreadPool::new(self.options.threads, self.tt.clone(), self.tb.clone(), self.callbacks.clone());
    }

    /// Applies a `setoption` pair. Unknown names report an error string the
    /// front end surfaces as an `info string` diagnostic.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<(), String> {
        let key = name.trim().to_ascii_lowercase();
        let parse_int = |v: &str| v.trim().parse::<i64>().map_err(|_| format!("bad value '{v}'"));
        let parse_bool = |v: &str| match v.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(format!("bad value '{other}'")),
        };

        match key.as_str() {
            "threads" => {
                self.options.threads = parse_int(value)?.clamp(1, 1024) as usize;
                self.rebuild_pool();
            }
            "hash" => {
                self.options.hash_mb = parse_int(value)?.clamp(1, 1 << 20) as usize;
                self.pool.wait_finish();
                self.tt = Arc::new(TranspositionTable::new(self.options.hash_mb));
                self.rebuild_pool();
            }
            "clear hash" => {
                self.pool.wait_finish();
                self.tt.clear();
            }
            "save hash" => {
                self.pool.wait_finish();
                let path = if value.trim().is_empty() { &self.options.hash_file } else { value.trim() };
                self.tt.save(Path::new(path)).map_err(|e| e.to_string())?;
            }
            "load hash" => {
                self.pool.wait_finish();
                let path = if value.trim().is_empty() {
                    self.options.hash_file.clone()
                } else {
                    value.trim().to_string()
                };
                let mut tt = TranspositionTable::new(self.options.hash_mb);
                tt.load(Path::new(&path)).map_err(|e| e.to_string())?;
                self.tt = Arc::new(tt);
                self.rebuild_pool();
            }
            "hashfile" => self.options.hash_file = value.trim().to_string(),
            "hashretain" => self.options.hash_retain = parse_bool(value)?,
            "multipv" => self.options.multi_pv = parse_int(value)?.clamp(1, 256) as usize,
            "ponder" => self.options.ponder = parse_bool(value)?,
            "moveoverhead" => self.options.move_overhead = parse_int(value)?.clamp(0, 5000),
            "nodestime" => self.options.nodes_time = parse_int(value)?.clamp(0, 10000),
            "skilllevel" => self.options.skill_level = parse_int(value)?.clamp(0, 20) as i32,
            "uci_limitstrength" => self.options.limit_strength = parse_bool(value)?,
            "uci_elo" => {
                self.options.elo =
                    parse_int(value)?.clamp(crate::search::MIN_ELO as i64, crate::search::MAX_ELO as i64) as i32;
            }
            "uci_chess960" => self.options.chess960 = parse_bool(value)?,
            "uci_showwdl" => self.options.show_wdl = parse_bool(value)?,
            "syzygypath" => {
                self.options.syzygy_path = value.trim().to_string();
                self.pool.wait_finish();
                let mut tb = Tablebases::new();
                tb.init(&self.options.syzygy_path);
                self.tb = Arc::new(tb);
                self.rebuild_pool();
            }
            "syzygyprobelimit" => {
                self.options.syzygy_probe_limit = parse_int(value)?.clamp(0, 7) as u32;
            }
            "syzygyprobedepth" => {
                self.options.syzygy_probe_depth = parse_int(value)?.clamp(1, 100) as i32;
            }
            "syzygy50moverule" => self.options.syzygy_50_move_rule = parse_bool(value)?,
            "numapolicy" => self.options.numa_policy = NumaPolicy::parse(value),
            _ => return Err(format!("unknown option '{name}'")),
        }
        Ok(())
    }

    /// Number of WDL/DTZ files found after the last SyzygyPath change.
    pub fn tablebase_counts(&self) -> (usize, usize, u32) {
        (self.tb.wdl_count(), self.tb.dtz_count(), self.tb.max_cardinality())
    }

    /// Sets the position from a FEN (or startpos) and a move list in LAN
    /// or SAN.
    pub fn set_position(&mut self, fen: &str, moves: &[&str]) -> Result<(), EngineError> {
        let mut pos = Position::from_fen(fen, self.options.chess960)?;
        for text in moves {
            let m = parse_move(&mut pos, text)
                .ok_or_else(|| EngineError::MoveText(format!("illegal move '{text}'")))?;
            pos.do_move(m);
        }
        self.pos = pos;
        Ok(())
    }

    /// Clears all game-scoped learning: the table (unless retained), every
    /// worker's histories and the time manager's game state.
    pub fn new_game(&mut self) {
        self.pool.wait_finish();
        if !self.options.hash_retain {
            self.tt.clear();
        }
        self.pool.new_game();
        self.pos = Position::startpos();
    }

    fn search_options(&self) -> SearchOptions {
        SearchOptions {
            multi_pv: self.options.multi_pv,
            skill_level: self.options.skill_level,
            limit_strength: self.options.limit_strength,
            elo: self.options.elo,
            move_overhead: self.options.move_overhead,
            nodes_time: self.options.nodes_time,
            chess960: self.options.chess960,
            syzygy_probe_limit: self.options.syzygy_probe_limit,
            syzygy_probe_depth: self.options.syzygy_probe_depth,
            syzygy_50_move_rule: self.options.syzygy_50_move_rule,
        }
    }

    /// Launches a search; returns immediately. Progress and the final
    /// bestmove arrive through the callbacks.
    pub fn go(&mut self, limits: Limits) {
        self.pool.start(&self.pos, limits, self.search_options());
    }

    /// Counts leaf nodes; the `go perft D` service.
    pub fn perft(&mut self, depth: u32) -> (u64, Vec<(String, u64)>) {
        let mut pos = self.pos.clone();
        crate::perft::perft_divide(&mut pos, depth)
    }

    pub fn stop(&self) {
        self.pool.stop();
    }

    pub fn ponderhit(&self) {
        self.pool.ponderhit();
    }

    /// Blocks until the current search has fully finished.
    pub fn wait(&self) {
        self.pool.wait_finish();
    }

    pub fn nodes(&self) -> u64 {
        self.pool.nodes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numa_policy_parse() {
        assert_eq!(NumaPolicy::parse("none"), NumaPolicy::None);
        assert_eq!(NumaPolicy::parse("AUTO"), NumaPolicy::Auto);
        assert_eq!(NumaPolicy::parse("system"), NumaPolicy::Auto);
        assert_eq!(
            NumaPolicy::parse("0-7:8-15"),
            NumaPolicy::Explicit(vec![(0, 7), (8, 15)])
        );
    }

    #[test]
    fn test_set_option() {
        let mut engine = Engine::new(SearchCallbacks::default());
        assert!(engine.set_option("MultiPV", "3").is_ok());
        assert_eq!(engine.options().multi_pv, 3);
        assert!(engine.set_option("Hash", "4").is_ok());
        assert!(engine.set_option("Threads", "2").is_ok());
        assert!(engine.set_option("NoSuchOption", "1").is_err());
        assert!(engine.set_option("MultiPV", "banana").is_err());
    }

    #[test]
    fn test_set_position_moves() {
        let mut engine = Engine::new(SearchCallbacks::default());
        engine
            .set_position(crate::position::START_FEN, &["e2e4", "e7e5", "Nf3"])
            .unwrap();
        assert_eq!(engine.position().game_ply(), 3);
        assert!(engine.set_position(crate::position::START_FEN, &["e2e5"]).is_err());
    }

    #[test]
    fn test_perft_service() {
        let mut engine = Engine::new(SearchCallbacks::default());
        engine.set_position(crate::position::START_FEN, &[]).unwrap();
        let (total, _) = engine.perft(2);
        assert_eq!(total, 400);
    }
}
