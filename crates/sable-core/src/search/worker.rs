//! The search worker: iterative deepening with aspiration windows, the
//! recursive alpha-beta with its pruning/extension ladder, and quiescence.
//!
//! Every worker owns its history tables, search stacks and root move list;
//! only the transposition table and the control flags are shared.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::Ordering;

use arrayvec::ArrayVec;

use crate::evaluate::evaluate;
use crate::history::{
    ContinuationKey, Histories, LOW_PLY_SIZE, imbalance_bucket, pawn_index, stat_bonus, stat_malus,
};
use crate::movepick::{MovePicker, PickKind};
use crate::piece::{Color, Piece, PieceType, VALUE_PAWN};
use crate::position::Position;
use crate::search::node_type::{NodeType, NonPV, PV, Root};
use crate::search::root_move::{RootMove, sort_root_moves};
use crate::search::threading::{SharedFlags, ThreadPool, WorkerCounters};
use crate::search::time_control::TimeManager;
use crate::search::{CurrMoveInfo, Limits, PvInfo, SearchCallbacks, SearchOptions, Skill};
use crate::square::Square;
use crate::syzygy::Tablebases;
use crate::tt::TranspositionTable;
use crate::types::{
    Bound, DEPTH_NONE, DEPTH_QS, Depth, MAX_PLY, Move, MoveType, VALUE_DRAW, VALUE_INFINITE,
    VALUE_MATE, VALUE_NONE, VALUE_TB, VALUE_TB_LOSS_IN_MAX_PLY, VALUE_TB_WIN_IN_MAX_PLY, Value,
    draw_value, is_decisive, is_loss, is_mate, is_win, mated_in, mates_in, value_from_tt,
};

/// Sentinel frames before ply 0: continuation lookups reach back eight
/// plies from `ss - 1`.
const STACK_OFFSET: usize = 9;
const STACK_SIZE: usize = STACK_OFFSET + MAX_PLY + 2;

/// Cap on the collected worse-move lists for history maluses.
const MAX_TRIED: usize = 32;

/// Quiet ordering partition floor.
const MAX_QUIET_THRESHOLD: i32 = -7998;

/// One ply of search state.
#[derive(Clone, Default)]
pub struct Stack {
    pub pv: Vec<Move>,
    pub cont_key: Option<ContinuationKey>,
    pub corr_key: Option<(Piece, Square)>,
    pub static_eval: Value,
    pub ply: i32,
    pub curr_move: Move,
    pub tt_move: Move,
    pub move_count: i32,
    pub cutoff_count: i32,
    pub in_check: bool,
    pub tt_pv: bool,
    pub history: i32,
}

/// Supervisor-only state: clock, poll decimation and skill handicap.
pub struct MainManager {
    pub time_manager: TimeManager,
    pub calls_count: u16,
    pub ponderhit_stop: bool,
    pub move_first: bool,
    pub pre_best_cur_value: Value,
    pub pre_best_avg_value: Value,
    pub pre_time_reduction: f64,
    pub time_reduction: f64,
    pub sum_move_changes: f64,
    pub skill: Skill,
}

impl MainManager {
    fn new() -> MainManager {
        MainManager {
            time_manager: TimeManager::new(),
            calls_count: 1,
            ponderhit_stop: false,
            move_first: true,
            pre_best_cur_value: 0,
            pre_best_avg_value: 0,
            pre_time_reduction: 0.85,
            time_reduction: 1.0,
            sum_move_changes: 0.0,
            skill: Skill::new(20, false, 0),
        }
    }
}

/// A single search thread's state and algorithms.
pub struct Worker {
    idx: usize,
    pool: Weak<ThreadPool>,
    flags: Arc<SharedFlags>,
    counters: Arc<WorkerCounters>,
    tt: Arc<TranspositionTable>,
    tb: Arc<Tablebases>,
    callbacks: Arc<SearchCallbacks>,

    pub options: SearchOptions,
    pub limits: Limits,
    pub root_pos: Position,
    pub root_moves: Vec<RootMove>,
    pub root_depth: Depth,
    pub completed_depth: Depth,
    pub sel_depth: i32,

    histories: Histories,
    stacks: Vec<Stack>,
    reductions: Vec<i32>,

    nmp_min_ply: i32,
    root_delta: Value,
    pv_idx: usize,
    pv_last: usize,
    multi_pv: usize,
    research_count: u32,
    /// Effective tablebase cardinality for in-tree probes; zero when the
    /// root ranking already settled the position.
    tb_cardinality: u32,
    root_in_tb: bool,

    main: Option<MainManager>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        idx: usize,
        pool: Weak<ThreadPool>,
        flags: Arc<SharedFlags>,
        counters: Arc<WorkerCounters>,
        tt: Arc<TranspositionTable>,
        tb: Arc<Tablebases>,
        callbacks: Arc<SearchCallbacks>,
    ) -> Worker {
        let reductions = (0..crate::movegen::MAX_MOVES)
            .map(|i| if i == 0 { 0 } else { (20.52 * (i as f64).ln()) as i32 })
            .collect();

        Worker {
            idx,
            pool,
            flags,
            counters,
            tt,
            tb,
            callbacks,
            options: SearchOptions::default(),
            limits: Limits::default(),
            root_pos: Position::startpos(),
            root_moves: Vec::new(),
            root_depth: 0,
            completed_depth: 0,
            sel_depth: 0,
            histories: Histories::new(),
            stacks: vec![Stack::default(); STACK_SIZE],
            reductions,
            nmp_min_ply: 0,
            root_delta: 1,
            pv_idx: 0,
            pv_last: 0,
            multi_pv: 1,
            research_count: 0,
            tb_cardinality: 0,
            root_in_tb: false,
            main: if idx == 0 { Some(MainManager::new()) } else { None },
        }
    }

    /// Forgets everything learned in the current game.
    pub fn new_game(&mut self) {
        self.histories.clear();
        if let Some(main) = &mut self.main {
            main.time_manager.clear();
            main.move_first = true;
            main.pre_best_cur_value = 0;
            main.pre_best_avg_value = 0;
            main.pre_time_reduction = 0.85;
        }
    }

    /// Installs the position and limits for the next search.
    pub(crate) fn prepare(
        &mut self,
        pos: Position,
        root_moves: Vec<RootMove>,
        limits: Limits,
        options: SearchOptions,
        root_in_tb: bool,
    ) {
        self.root_pos = pos;
        self.root_moves = root_moves;
        self.limits = limits;
        self.options = options;
        self.root_depth = 0;
        self.completed_depth = 0;
        self.sel_depth = 0;
        self.nmp_min_ply = 0;
        self.research_count = 0;
        self.root_in_tb = root_in_tb;
        self.tb_cardinality = if root_in_tb {
            0
        } else {
            self.tb.max_cardinality().min(self.options.syzygy_probe_limit)
        };
    }

    #[inline]
    fn is_main(&self) -> bool {
        self.idx == 0
    }

    #[inline]
    fn stopped(&self) -> bool {
        self.flags.stop.load(Ordering::Relaxed)
    }

    #[inline]
    fn local_nodes(&self) -> u64 {
        self.counters.nodes.load(Ordering::Relaxed)
    }

    fn total_nodes(&self) -> u64 {
        self.pool.upgrade().map_or_else(|| self.local_nodes(), |p| p.nodes())
    }

    fn total_tb_hits(&self) -> u64 {
        self.pool.upgrade().map_or(0, |p| p.tb_hits())
    }

    /// Entry point, called on the worker's own thread after a wakeup.
    pub(crate) fn start_searching(&mut self) {
        if !self.is_main() {
            self.iterative_deepening();
            return;
        }

        let pool = self.pool.upgrade().expect("pool alive during search");
        {
            let main = self.main.as_mut().unwrap();
            main.calls_count = 1;
            main.ponderhit_stop = false;
            main.time_reduction = 1.0;
            main.sum_move_changes = 0.0;
            main.skill = Skill::new(
                self.options.skill_level,
                self.options.limit_strength,
                self.options.elo,
            );
        }
        if self.limits.use_time_manager() {
            let mut limits = self.limits.clone();
            let main = self.main.as_mut().unwrap();
            main.time_manager.init(&mut limits, &self.root_pos, &self.options);
            self.limits = limits;
        }

        let thought = !self.root_moves.is_empty();
        if !thought {
            // Mate or stalemate at the root: report and fall through to the
            // bestmove handshake below.
            if let Some(cb) = &self.callbacks.on_update {
                cb(&PvInfo {
                    depth: 0,
                    sel_depth: 0,
                    multipv: 1,
                    value: if self.root_pos.in_check() { mated_in(0) } else { VALUE_DRAW },
                    bound_lower: false,
                    bound_upper: false,
                    time_ms: 0,
                    nodes: 0,
                    nps: 0,
                    hashfull: 0,
                    tb_hits: 0,
                    pv: Vec::new(),
                });
            }
        } else {
            pool.start_helpers();
            self.iterative_deepening();
        }

        // The protocol forbids a bestmove while pondering or in an infinite
        // search until the GUI releases us.
        while !self.stopped()
            && (self.flags.ponder.load(Ordering::Relaxed) || self.limits.infinite)
        {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        self.flags.stop.store(true, Ordering::Release);
        pool.wait_helpers();

        // In nodes-as-time mode the spent nodes reduce the game budget.
        if self.main.as_ref().unwrap().time_manager.use_nodes_time() {
            let nodes = pool.nodes();
            self.main.as_mut().unwrap().time_manager.update_nodes(nodes);
        }

        let mut best_idx = 0;
        if thought {
            let skill_enabled = self.main.as_ref().unwrap().skill.enabled();
            if skill_enabled {
                let pick = self
                    .main
                    .as_mut()
                    .unwrap()
                    .skill
                    .pick_best_move(&self.root_moves, self.multi_pv.max(4));
                if let Some(at) = self.root_moves.iter().position(|rm| rm.pv[0] == pick) {
                    self.root_moves.swap(0, at);
                }
            } else if self.multi_pv == 1
                && pool.size() > 1
                && self.limits.mate == 0
                && self.root_moves[0].pv[0].is_some()
            {
                best_idx = pool.best_thread();
                if best_idx != self.idx {
                    let depth = pool.thread(best_idx).worker().completed_depth;
                    Self::show_pv_of(
                        pool.thread(best_idx).worker(),
                        &self.callbacks,
                        depth,
                        self.elapsed(),
                        pool.nodes(),
                        self.tt.hashfull(0),
                        pool.tb_hits(),
                    );
                }
            }

            if self.limits.use_time_manager() {
                let (cur, avg) = if best_idx == self.idx {
                    (self.root_moves[0].cur_value, self.root_moves[0].avg_value)
                } else {
                    let best_worker = pool.thread(best_idx).worker();
                    (best_worker.root_moves[0].cur_value, best_worker.root_moves[0].avg_value)
                };
                let main = self.main.as_mut().unwrap();
                main.move_first = false;
                main.pre_best_cur_value = cur;
                main.pre_best_avg_value = avg;
                main.pre_time_reduction = main.time_reduction;
            }
        }

        let (best_move, ponder_move) = if thought {
            let (best, pv_ponder) = if best_idx == self.idx {
                let rm = &self.root_moves[0];
                (rm.pv[0], rm.pv.get(1).copied())
            } else {
                let rm = &pool.thread(best_idx).worker().root_moves[0];
                (rm.pv[0], rm.pv.get(1).copied())
            };
            let ponder = pv_ponder.unwrap_or_else(|| self.extract_ponder_move(best));
            (best, ponder)
        } else {
            (Move::NONE, Move::NONE)
        };

        if let Some(cb) = &self.callbacks.on_bestmove {
            cb(best_move, ponder_move);
        }
    }

    /// A pondering PV of length one: look the reply up in the table.
    fn extract_ponder_move(&self, best: Move) -> Move {
        if !best.is_some() {
            return Move::NONE;
        }
        let mut pos = self.root_pos.clone();
        pos.do_move(best);
        let (data, cluster_move, _) = self.tt.probe(pos.key(), 1);
        let mut ponder = Move::NONE;
        for cand in [data.mv, cluster_move] {
            if cand.is_some() && pos.pseudo_legal(cand) && pos.legal(cand) {
                ponder = cand;
                break;
            }
        }
        pos.undo_move(best);
        ponder
    }

    fn elapsed(&self) -> i64 {
        match &self.main {
            Some(main) => main.time_manager.elapsed(self.total_nodes()),
            None => 0,
        }
    }

    // ---- iterative deepening ----

    fn iterative_deepening(&mut self) {
        let mut pos = self.root_pos.clone();

        // Reset the stack array: 9 sentinel frames before ply 0, one after
        // the horizon.
        for (i, frame) in self.stacks.iter_mut().enumerate() {
            *frame = Stack::default();
            frame.ply = i as i32 - STACK_OFFSET as i32;
            if i < STACK_OFFSET {
                frame.static_eval = VALUE_NONE;
            }
        }

        self.multi_pv = self.options.multi_pv.min(self.root_moves.len()).max(1);
        let skill_enabled = self.main.as_ref().is_some_and(|m| m.skill.enabled());
        if skill_enabled {
            self.multi_pv = self.multi_pv.max(4).min(self.root_moves.len());
        }

        let mut last_best_pv: Vec<Move> = vec![Move::NONE];
        let mut last_best_cur_value = -VALUE_INFINITE;
        let mut last_best_pre_value = -VALUE_INFINITE;
        let mut last_best_uci_value = -VALUE_INFINITE;
        let mut last_best_depth = 0;

        while !self.stopped() {
            self.root_depth += 1;
            if self.root_depth >= MAX_PLY as Depth {
                break;
            }
            if self.is_main() && self.limits.depth != 0 && self.root_depth > self.limits.depth {
                break;
            }

            // Age out the PV variability metric.
            if self.is_main() && self.limits.use_time_manager() {
                self.main.as_mut().unwrap().sum_move_changes *= 0.5;
            }

            for rm in &mut self.root_moves {
                rm.pre_value = rm.cur_value;
            }

            if self.flags.research.load(Ordering::Relaxed) {
                self.research_count += 1;
            }

            let mut best_value = -VALUE_INFINITE;
            self.pv_last = 0;
            let mut pv_first = 0;

            for pv_idx in 0..self.multi_pv {
                self.pv_idx = pv_idx;
                if pv_idx == self.pv_last {
                    pv_first = self.pv_last;
                    self.pv_last += 1;
                    while self.pv_last < self.root_moves.len()
                        && self.root_moves[self.pv_last].tb_rank
                            == self.root_moves[pv_first].tb_rank
                    {
                        self.pv_last += 1;
                    }
                }

                self.sel_depth = 0;

                let mut avg_value = self.root_moves[pv_idx].avg_value;
                if avg_value == -VALUE_INFINITE {
                    avg_value = 0;
                }
                let mut avg_sqr_value = self.root_moves[pv_idx].avg_sqr_value;
                if avg_sqr_value < 0 {
                    avg_sqr_value = 0;
                }

                // Aspiration window sized by the score's running variance.
                let mut delta = 5 + (avg_sqr_value.abs() * 887 / 10_000_000) as Value;
                let mut alpha = (avg_value - delta).max(-VALUE_INFINITE);
                let mut beta = (avg_value + delta).min(VALUE_INFINITE);

                let mut fail_high_count: Depth = 0;
                loop {
                    self.nmp_min_ply = 0;
                    self.root_delta = (beta - alpha).max(1);
                    let adjusted_depth = (self.root_depth
                        - fail_high_count
                        - (3 * (1 + self.research_count as Depth)) / 4)
                        .max(1);

                    best_value = self.search::<Root>(
                        &mut pos,
                        STACK_OFFSET,
                        alpha,
                        beta,
                        adjusted_depth,
                        false,
                        Move::NONE,
                    );

                    sort_root_moves(&mut self.root_moves[..self.pv_last], pv_idx);

                    if self.stopped() {
                        break;
                    }

                    if self.is_main()
                        && self.multi_pv == 1
                        && self.root_depth > 30
                        && (best_value <= alpha || best_value >= beta)
                    {
                        self.show_pv(self.root_depth);
                    }

                    if best_value <= alpha {
                        // Fail low: pull beta in, drop alpha toward the score.
                        beta = (alpha + beta) / 2;
                        alpha = (best_value - delta).max(-VALUE_INFINITE);
                        fail_high_count = 0;
                        if self.is_main() && self.flags.ponder.load(Ordering::Relaxed) {
                            self.main.as_mut().unwrap().ponderhit_stop = false;
                        }
                    } else if best_value >= beta {
                        beta = (best_value + delta).min(VALUE_INFINITE);
                        fail_high_count += 1;
                    } else {
                        break;
                    }

                    delta += delta / 3;
                }

                sort_root_moves(&mut self.root_moves[..pv_idx + 1], pv_first);

                if self.is_main()
                    && (self.stopped() || pv_idx + 1 == self.multi_pv || self.root_depth > 30)
                    && !(self.flags.abort.load(Ordering::Relaxed)
                        && is_loss(self.root_moves[0].uci_value))
                {
                    self.show_pv(self.root_depth);
                }

                if self.stopped() {
                    break;
                }
            }

            if !self.stopped() {
                self.completed_depth = self.root_depth;
            }

            // An aborted iteration may leave an unproven mated-in score up
            // front; fall back to the last completed result.
            if self.flags.abort.load(Ordering::Relaxed)
                && last_best_pv[0].is_some()
                && self.root_moves[0].cur_value != -VALUE_INFINITE
                && is_loss(self.root_moves[0].cur_value)
            {
                if let Some(at) =
                    self.root_moves.iter().position(|rm| rm.pv[0] == last_best_pv[0])
                {
                    self.root_moves.swap(0, at);
                }
                self.root_moves[0].pv = last_best_pv.clone();
                self.root_moves[0].cur_value = last_best_cur_value;
                self.root_moves[0].pre_value = last_best_pre_value;
                self.root_moves[0].uci_value = last_best_uci_value;
            } else if self.root_moves[0].pv[0] != last_best_pv[0] {
                last_best_pv = self.root_moves[0].pv.clone();
                last_best_cur_value = self.root_moves[0].cur_value;
                last_best_pre_value = self.root_moves[0].pre_value;
                last_best_uci_value = self.root_moves[0].uci_value;
                last_best_depth = self.completed_depth;
            }

            if !self.is_main() {
                continue;
            }

            // Mate-limited search: a proven short enough mate ends it.
            if self.limits.mate != 0
                && self.root_moves[0].cur_value == self.root_moves[0].uci_value
                && ((self.root_moves[0].cur_value != VALUE_INFINITE
                    && is_mate(self.root_moves[0].cur_value)
                    && self.root_moves[0].cur_value > 0
                    && VALUE_MATE - self.root_moves[0].cur_value
                        <= 2 * self.limits.mate as Value)
                    || (self.root_moves[0].cur_value != -VALUE_INFINITE
                        && is_mate(self.root_moves[0].cur_value)
                        && self.root_moves[0].cur_value < 0
                        && VALUE_MATE + self.root_moves[0].cur_value
                            <= 2 * self.limits.mate as Value))
            {
                self.flags.stop.store(true, Ordering::Release);
            }

            // Skill: commit to a sub-optimal line once its depth comes up.
            if skill_enabled {
                let pick_now = self.main.as_ref().unwrap().skill.time_to_pick(self.root_depth);
                if pick_now {
                    let multi_pv = self.multi_pv;
                    let root_moves = std::mem::take(&mut self.root_moves);
                    self.main.as_mut().unwrap().skill.pick_best_move(&root_moves, multi_pv);
                    self.root_moves = root_moves;
                }
            }

            // End-of-iteration abandonment decision.
            if self.limits.use_time_manager()
                && !self.stopped()
                && !self.main.as_ref().unwrap().ponderhit_stop
            {
                self.time_abandonment_check(best_value, last_best_depth);
            }
        }
    }

    /// Decides whether the current optimum budget has been outspent, scaled
    /// by PV instability, eval swings, node distribution and recaptures.
    fn time_abandonment_check(&mut self, best_value: Value, last_best_depth: Depth) {
        let pool = match self.pool.upgrade() {
            Some(pool) => pool,
            None => return,
        };

        let mut sum_move_changes = 0.0;
        for counters in &pool.counters {
            sum_move_changes += counters.move_changes.swap(0, Ordering::Relaxed) as f64;
        }

        let completed_depth = self.completed_depth;
        let total_nodes = pool.nodes().max(1);
        let first_nodes = self.root_moves[0].nodes;
        let first_move = self.root_moves[0].pv[0];
        let recapture = {
            let prev_capture = self.root_pos.captured_piece() != Piece::None;
            prev_capture && self.root_pos.capture(first_move) && self.root_pos.see_ge(first_move, 200)
        };

        let main = self.main.as_mut().unwrap();
        main.sum_move_changes += sum_move_changes;

        let move_first = main.move_first;
        let eval_change = (0.11396
            + 0.02035 * (main.pre_best_avg_value - best_value) as f64
            + 0.00968 * (main.pre_best_cur_value - best_value) as f64)
            .clamp(
                0.9 - 0.3214 * !move_first as u8 as f64,
                1.1 + 0.5752 * !move_first as u8 as f64,
            );

        let stable_depth = (completed_depth - last_best_depth).max(0) as f64;
        main.time_reduction = 0.7046
            + 0.39055
                * ((stable_depth / (3.0 + 2.0 * ((1.0 + stable_depth) / 2.0).log10()) - 1.27)
                    .ceil())
                .clamp(0.0, 3.0);
        let reduction = 0.46311 * (1.4540 + main.pre_time_reduction) / main.time_reduction;
        let instability = 0.9929 + 1.8519 * main.sum_move_changes / pool.size() as f64;

        let mut node_reduction = 1.0;
        if completed_depth >= 10 {
            let scaled_nodes = 100000.0 * first_nodes as f64 / total_nodes as f64;
            node_reduction -= 70.79288e-6 * (scaled_nodes - 95056.0).max(0.0);
        }

        let mut re_capture = 1.0;
        if recapture {
            re_capture -= 13.84e-3 * (stable_depth.min(25.0));
        }

        let mut total_time = main.time_manager.optimum() as f64
            * eval_change
            * reduction
            * instability
            * node_reduction
            * re_capture;

        // A single legal reply does not deserve the full budget.
        if self.root_moves.len() == 1 {
            total_time = (0.5 * total_time).min(500.0);
        }

        let elapsed = main.time_manager.elapsed(total_nodes) as f64;

        if elapsed > total_time {
            if self.flags.ponder.load(Ordering::Relaxed) {
                main.ponderhit_stop = true;
            } else {
                self.flags.stop.store(true, Ordering::Release);
            }
        }

        if !self.flags.ponder.load(Ordering::Relaxed) {
            self.flags
                .research
                .store(elapsed > 0.5138 * total_time, Ordering::Relaxed);
        }
    }

    /// Clock/node poll, decimated by `calls_count`.
    fn check_time(&mut self) {
        let main = self.main.as_mut().unwrap();
        main.calls_count -= 1;
        if main.calls_count > 0 {
            return;
        }
        main.calls_count = self.limits.calls_count();

        let nodes = self.total_nodes();
        let main = self.main.as_ref().unwrap();
        let elapsed = main.time_manager.elapsed(nodes);

        let timed_out = (self.limits.use_time_manager()
            && (main.ponderhit_stop || elapsed >= main.time_manager.maximum()))
            || (self.limits.move_time != 0 && elapsed >= self.limits.move_time)
            || (self.limits.nodes != 0 && nodes >= self.limits.nodes);

        // Pondering blocks the stop until the GUI resolves the ponder move.
        if !self.flags.ponder.load(Ordering::Relaxed)
            && self.completed_depth > 0
            && timed_out
        {
            self.flags.stop.store(true, Ordering::Release);
            self.flags.abort.store(true, Ordering::Release);
        }
    }

    // ---- reporting ----

    fn show_pv(&self, depth: Depth) {
        Self::show_pv_of(
            self,
            &self.callbacks,
            depth,
            self.elapsed(),
            self.total_nodes(),
            self.tt.hashfull(0),
            self.total_tb_hits(),
        );
    }

    fn show_pv_of(
        worker: &Worker,
        callbacks: &SearchCallbacks,
        depth: Depth,
        time_ms: i64,
        nodes: u64,
        hashfull: usize,
        tb_hits: u64,
    ) {
        let Some(cb) = &callbacks.on_update else { return };
        let time_ms = time_ms.max(1);
        for i in 0..worker.multi_pv.min(worker.root_moves.len()) {
            let rm = &worker.root_moves[i];
            let updated = rm.cur_value != -VALUE_INFINITE;
            if depth == 1 && !updated && i > 0 {
                continue;
            }
            let (d, v) = if updated {
                (depth, rm.uci_value)
            } else {
                (depth - 1, rm.pre_value)
            };
            if v == -VALUE_INFINITE {
                continue;
            }
            cb(&PvInfo {
                depth: d,
                sel_depth: rm.sel_depth,
                multipv: i + 1,
                value: v,
                bound_lower: updated && rm.bound_lower,
                bound_upper: updated && rm.bound_upper,
                time_ms,
                nodes,
                nps: (nodes as i64 * 1000 / time_ms) as u64,
                hashfull,
                tb_hits,
                pv: rm.pv.clone(),
            });
        }
    }

    // ---- helpers shared by search and qsearch ----

    #[inline]
    fn reduction(&self, depth: Depth, move_count: i32, delta_ratio: i32, improving: bool) -> i32 {
        let scale = self.reductions[depth.min(255) as usize]
            * self.reductions[(move_count as usize).min(255)];
        let base = 1132 + scale - delta_ratio;
        base + if improving { 0 } else { scale * 3367 / 10000 }
    }

    /// Clamps a heuristic score away from the decisive bands.
    #[inline]
    fn in_range(v: Value) -> Value {
        v.clamp(VALUE_TB_LOSS_IN_MAX_PLY + 1, VALUE_TB_WIN_IN_MAX_PLY - 1)
    }

    #[inline]
    fn promotion_value(m: Move) -> Value {
        if m.type_of() == MoveType::Promotion {
            m.promotion_type().value() - VALUE_PAWN
        } else {
            0
        }
    }

    /// Aggregated correction-history adjustment for the static evaluation.
    fn correction_value(&self, pos: &Position, ss: usize) -> i32 {
        let us = pos.active_color();
        let h = &self.histories;
        let mut cv = 7685 * h.pawn_correction.get(pos.pawn_key(), us)
            + 6285 * h.minor_correction.get(pos.minor_key(), us)
            + 6845
                * (h.non_pawn_correction[0].get(pos.non_pawn_key(Color::White), us)
                    + h.non_pawn_correction[1].get(pos.non_pawn_key(Color::Black), us));
        if let (Some((p1, s1)), Some((p2, s2))) =
            (self.stacks[ss - 1].corr_key, self.stacks[ss - 2].corr_key)
        {
            cv += 6460 * h.continuation_correction.get(p1, s1, p2, s2);
        }
        cv
    }

    fn update_correction_history(&mut self, pos: &Position, ss: usize, bonus: i32) {
        let us = pos.active_color();
        let bonus = bonus.clamp(
            -crate::history::CORRECTION_LIMIT / 4,
            crate::history::CORRECTION_LIMIT / 4,
        );
        let h = &mut self.histories;
        h.pawn_correction.update(pos.pawn_key(), us, bonus * 13 / 16);
        h.minor_correction.update(pos.minor_key(), us, bonus * 21 / 16);
        h.non_pawn_correction[0].update(pos.non_pawn_key(Color::White), us, bonus);
        h.non_pawn_correction[1].update(pos.non_pawn_key(Color::Black), us, bonus);
        if let (Some((p1, s1)), Some((p2, s2))) =
            (self.stacks[ss - 1].corr_key, self.stacks[ss - 2].corr_key)
        {
            h.continuation_correction.update(p1, s1, p2, s2, bonus * 18 / 16);
        }
    }

    /// Continuation context seen from the node at `ss`, previous ply first.
    fn cont_keys(&self, ss: usize) -> [Option<ContinuationKey>; 7] {
        std::array::from_fn(|i| self.stacks[ss - 1 - i].cont_key)
    }

    fn update_continuation_histories(&mut self, ss: usize, piece: Piece, dst: Square, bonus: i32) {
        // Weighted over the earlier plies that correlate with this move; in
        // check only the immediate continuations carry signal.
        for (offset, weight) in [(1, 1024), (2, 672), (3, 608), (4, 640), (6, 880)] {
            if self.stacks[ss].in_check && offset > 2 {
                break;
            }
            if let Some(key) = self.stacks[ss - offset].cont_key {
                self.histories.continuation.update(&key, piece, dst, bonus * weight / 1024);
            }
        }
    }

    fn update_quiet_histories(&mut self, pos: &Position, ss: usize, m: Move, bonus: i32) {
        let us = pos.active_color();
        let piece = pos.moved_piece(m);
        let dst = m.dst_sq();
        self.histories.quiet.update(us, m, bonus);
        self.histories.pawn.update(pawn_index(pos.pawn_key()), piece, dst, bonus * 3 / 4);
        self.update_continuation_histories(ss, piece, dst, bonus * 7 / 8);
        let ply = self.stacks[ss].ply as usize;
        if ply < LOW_PLY_SIZE {
            self.histories.low_ply_quiet.update(ply, m, bonus * 13 / 16);
        }
    }

    fn update_capture_history(&mut self, pos: &Position, m: Move, bonus: i32) {
        let piece = pos.moved_piece(m);
        let captured = pos.captured_piece_type(m);
        self.histories.capture.update(piece, m.dst_sq(), captured, imbalance_bucket(pos), bonus);
    }

    /// Rewards the winning move and penalizes the alternatives that were
    /// tried before it.
    fn update_all_history(
        &mut self,
        pos: &Position,
        ss: usize,
        depth: Depth,
        best_move: Move,
        quiets: &ArrayVec<Move, MAX_TRIED>,
        captures: &ArrayVec<Move, MAX_TRIED>,
    ) {
        let tt_move = self.stacks[ss].tt_move;
        let bonus = stat_bonus(depth) + 300 * (best_move == tt_move) as i32;
        let malus = (stat_malus(depth) - 34 * (self.stacks[ss].move_count - 1)).max(1);

        self.histories.tt_move.update(if best_move == tt_move { 800 } else { -870 });

        if pos.capture_stage(best_move) {
            self.update_capture_history(pos, best_move, bonus * 19 / 16);
        } else {
            self.update_quiet_histories(pos, ss, best_move, bonus * 19 / 16);
            for &qm in quiets {
                self.update_quiet_histories(pos, ss, qm, -malus * 17 / 16);
            }
        }

        for &cm in captures {
            self.update_capture_history(pos, cm, -malus * 19 / 16);
        }

        // Extra penalty for an early refuted quiet on the previous ply.
        let prev = self.stacks[ss - 1].curr_move;
        if prev.is_some()
            && pos.captured_piece() == Piece::None
            && self.stacks[ss - 1].move_count
                == 1 + self.stacks[ss - 1].tt_move.is_some() as i32
        {
            let piece = pos.piece_on(prev.dst_sq());
            if piece != Piece::None {
                self.update_continuation_histories(
                    ss - 1,
                    piece,
                    prev.dst_sq(),
                    -malus * 15 / 16,
                );
            }
        }
    }

    // ---- the recursive search ----

    /// Main alpha-beta search. `cut_node` distinguishes expected fail-highs
    /// among the zero-window nodes; PV children always start as non-cut.
    #[allow(clippy::too_many_lines)]
    pub fn search<NT: NodeType>(
        &mut self,
        pos: &mut Position,
        ss: usize,
        mut alpha: Value,
        mut beta: Value,
        mut depth: Depth,
        cut_node: bool,
        excluded: Move,
    ) -> Value {
        let pv_node = NT::PV_NODE;
        let root_node = NT::ROOT_NODE;
        let ply = (ss - STACK_OFFSET) as i32;
        debug_assert!(-VALUE_INFINITE <= alpha && alpha < beta && beta <= VALUE_INFINITE);

        // Step 1. Dispatch to quiescence at the horizon.
        if depth <= 0 {
            return if pv_node {
                self.qsearch::<PV>(pos, ss, alpha, beta)
            } else {
                self.qsearch::<NonPV>(pos, ss, alpha, beta)
            };
        }
        depth = depth.min(MAX_PLY as Depth - 1);

        // Step 2. Upcoming repetition: a reachable cycle bounds us to draw.
        if !root_node && alpha < VALUE_DRAW && pos.upcoming_repetition(ply) {
            alpha = draw_value(pos.key(), self.local_nodes());
            if alpha >= beta {
                return alpha;
            }
        }

        if self.is_main() {
            self.check_time();
        }

        let in_check = pos.in_check();
        self.stacks[ss].in_check = in_check;
        self.stacks[ss].ply = ply;
        self.stacks[ss].move_count = 0;
        self.stacks[ss].history = 0;
        if pv_node && self.sel_depth < ply + 1 {
            self.sel_depth = ply + 1;
        }

        if !root_node {
            // Step 3. Abort, horizon and draws.
            if self.stopped() || ply >= MAX_PLY as i32 || pos.is_draw(ply) {
                return if ply >= MAX_PLY as i32 && !in_check {
                    evaluate(pos)
                } else {
                    draw_value(pos.key(), self.local_nodes())
                };
            }

            // Step 4. Mate distance pruning.
            alpha = alpha.max(mated_in(ply));
            beta = beta.min(mates_in(ply + 1));
            if alpha >= beta {
                return alpha;
            }
        }

        let excluded_some = excluded.is_some();
        self.stacks[ss + 2].cutoff_count = 0;

        // Step 5. Transposition table probe.
        let tt = self.tt.clone();
        let key = pos.key();
        let (tt_data, cluster_move, mut tt_writer) = tt.probe(key, ply);
        let tt_hit = tt_data.hit;
        let mut tt_value =
            if tt_hit { value_from_tt(tt_data.value, ply, pos.rule50_count()) } else { VALUE_NONE };
        let tt_move = if root_node {
            self.root_moves[self.pv_idx].pv[0]
        } else if tt_hit && tt_data.mv.is_some() && pos.pseudo_legal(tt_data.mv) {
            tt_data.mv
        } else if cluster_move.is_some() && pos.pseudo_legal(cluster_move) {
            cluster_move
        } else {
            Move::NONE
        };
        self.stacks[ss].tt_move = tt_move;
        let tt_capture = tt_move.is_some() && pos.capture_stage(tt_move);
        if !excluded_some {
            self.stacks[ss].tt_pv = pv_node || (tt_hit && tt_data.pv);
        }
        let tt_pv = self.stacks[ss].tt_pv;

        // Step 6. Transposition table cutoff.
        if !pv_node
            && !excluded_some
            && tt_value != VALUE_NONE
            && (cut_node == (tt_value >= beta) || depth > 9)
            && tt_data.depth > depth - (tt_value <= beta) as Depth
            && tt_data
                .bound
                .covers(if tt_value >= beta { Bound::Lower } else { Bound::Upper })
        {
            if pos.rule50_count() < 90 {
                if tt_value >= beta && tt_move.is_some() && !tt_capture {
                    self.update_quiet_histories(pos, ss, tt_move, stat_bonus(depth) * 13 / 16);
                }
                // The previous quiet was refuted without effort.
                let prev = self.stacks[ss - 1].curr_move;
                if tt_value >= beta
                    && prev.is_some()
                    && pos.captured_piece() == Piece::None
                    && self.stacks[ss - 1].move_count <= 2
                {
                    let piece = pos.piece_on(prev.dst_sq());
                    if piece != Piece::None {
                        self.update_continuation_histories(
                            ss - 1,
                            piece,
                            prev.dst_sq(),
                            -stat_malus(depth + 1),
                        );
                    }
                }
                return tt_value;
            }
            // Near the fifty-move horizon cutoffs are unsound; damp a raw
            // fail-high toward beta instead and keep searching.
            if tt_value > beta && tt_data.depth > 0 && !is_decisive(tt_value) {
                tt_value = (tt_data.depth * tt_value + beta) / (tt_data.depth + 1);
            }
        }

        let mut best_value = -VALUE_INFINITE;
        let mut max_value = VALUE_INFINITE;

        // Step 7. Tablebase probe.
        if !root_node
            && !excluded_some
            && self.tb_cardinality > 0
            && pos.rule50_count() == 0
            && pos.castling_rights() == 0
        {
            let piece_count = pos.total_piece_count() as u32;
            if piece_count <= self.tb_cardinality
                && (piece_count < self.tb_cardinality || depth >= self.options.syzygy_probe_depth)
            {
                if let Some(wdl) = self.tb.probe_wdl(pos) {
                    self.counters.tb_hits.fetch_add(1, Ordering::Relaxed);

                    let draw_bound = self.options.syzygy_50_move_rule as i32;
                    let wdl = wdl as i32;
                    let value = if wdl < -draw_bound {
                        -VALUE_TB + ply
                    } else if wdl > draw_bound {
                        VALUE_TB - ply
                    } else {
                        VALUE_DRAW + 2 * wdl
                    };
                    let bound = if wdl < -draw_bound {
                        Bound::Upper
                    } else if wdl > draw_bound {
                        Bound::Lower
                    } else {
                        Bound::Exact
                    };

                    if bound == Bound::Exact
                        || (bound == Bound::Lower && value >= beta)
                        || (bound == Bound::Upper && value <= alpha)
                    {
                        tt_writer.write(
                            (depth + 6).min(MAX_PLY as Depth - 1),
                            tt_pv,
                            bound,
                            Move::NONE,
                            value,
                            VALUE_NONE,
                        );
                        return value;
                    }

                    if pv_node {
                        if bound == Bound::Lower {
                            best_value = value;
                            alpha = alpha.max(value);
                        } else {
                            max_value = value;
                        }
                    }
                }
            }
        }

        // Step 8. Static evaluation.
        let correction = if in_check { 0 } else { self.correction_value(pos, ss) };
        let mut unadjusted_eval = VALUE_NONE;
        let mut eval = VALUE_NONE;
        let mut improving = false;
        let mut opp_worsening = false;

        if in_check {
            self.stacks[ss].static_eval = VALUE_NONE;
        } else {
            if excluded_some {
                unadjusted_eval = self.stacks[ss].static_eval;
                eval = unadjusted_eval;
            } else if tt_hit {
                unadjusted_eval =
                    if tt_data.eval != VALUE_NONE { tt_data.eval } else { evaluate(pos) };
                eval = Self::in_range(unadjusted_eval + correction / 131072);
                self.stacks[ss].static_eval = eval;
                // The table value is a tighter estimate when its bound fits.
                if tt_value != VALUE_NONE
                    && tt_data
                        .bound
                        .covers(if tt_value > eval { Bound::Lower } else { Bound::Upper })
                {
                    eval = tt_value;
                }
            } else {
                unadjusted_eval = evaluate(pos);
                eval = Self::in_range(unadjusted_eval + correction / 131072);
                self.stacks[ss].static_eval = eval;
                tt_writer.write(
                    DEPTH_NONE,
                    tt_pv,
                    Bound::None,
                    Move::NONE,
                    VALUE_NONE,
                    unadjusted_eval,
                );
            }

            improving = self.stacks[ss].static_eval > self.stacks[ss - 2].static_eval
                && self.stacks[ss - 2].static_eval != VALUE_NONE;
            opp_worsening = self.stacks[ss - 1].static_eval != VALUE_NONE
                && self.stacks[ss].static_eval + self.stacks[ss - 1].static_eval > 2;

            // Step 9. The opponent's quiet move shifted the eval: feed that
            // back into its history.
            let prev = self.stacks[ss - 1].curr_move;
            if prev.is_some()
                && prev != Move::NULL
                && !self.stacks[ss - 1].in_check
                && pos.captured_piece() == Piece::None
                && !excluded_some
            {
                let delta = self.stacks[ss - 1].static_eval + self.stacks[ss].static_eval;
                let bonus = (-10 * delta).clamp(-1831, 1428);
                self.histories.quiet.update(!pos.active_color(), prev, bonus * 6 / 8);
            }

            // Step 10. Razoring: a hopeless eval resolves tactically.
            if !pv_node && eval < alpha - 464 - 286 * depth * depth {
                return self.qsearch::<NonPV>(pos, ss, alpha, alpha + 1);
            }

            // Step 11. Futility pruning: the eval clears beta by a margin no
            // quiet continuation is likely to give back.
            if !tt_pv
                && depth < 15
                && eval >= beta
                && (!tt_move.is_some() || tt_capture)
                && !is_loss(beta)
                && !is_win(eval)
            {
                let mult = 111 - 25 * (cut_node && !tt_hit) as Value;
                let margin = mult * depth
                    - 2 * mult * improving as Value
                    - mult * opp_worsening as Value / 3
                    + (40 - correction.abs() / 131072)
                    - self.stacks[ss - 1].history * 346 / 100_000;
                if eval - margin >= beta {
                    return Self::in_range((2 * eval + beta) / 3);
                }
            }

            // Step 12. Null move search with verification.
            if cut_node
                && !excluded_some
                && self.stacks[ss - 1].curr_move != Move::NULL
                && !is_loss(beta)
                && eval >= beta
                && ply >= self.nmp_min_ply
                && self.stacks[ss].static_eval >= 470 + beta - 20 * depth
                && pos.non_pawn_material(pos.active_color()) > 0
            {
                let diff = eval - beta;
                let r = (4 + depth / 3 + (diff / 230).min(7) + pos.phase() / 96).min(depth);

                pos.do_null_move();
                tt.prefetch(pos.key());
                self.counters.nodes.fetch_add(1, Ordering::Relaxed);
                self.stacks[ss].curr_move = Move::NULL;
                self.stacks[ss].cont_key =
                    Some(ContinuationKey::new(false, false, Piece::None, Square::A1));
                self.stacks[ss].corr_key = Some((Piece::None, Square::A1));

                let null_value =
                    -self.search::<NonPV>(pos, ss + 1, -beta, -beta + 1, depth - r, false, Move::NONE);

                pos.undo_null_move();

                if self.stopped() {
                    return VALUE_DRAW;
                }

                if null_value >= beta && !is_win(null_value) {
                    if self.nmp_min_ply != 0 || depth < 16 {
                        return null_value;
                    }
                    // Verification: forbid nested null moves below this ply
                    // and repeat with an ordinary reduced search.
                    self.nmp_min_ply = ply + 3 * (depth - r) / 4;
                    let v = self.search::<NonPV>(pos, ss, beta - 1, beta, depth - r, false, Move::NONE);
                    self.nmp_min_ply = 0;
                    if v >= beta {
                        return null_value;
                    }
                }
            }

            // Step 13. Internal iterative reductions: probing shallower will
            // surface a table move to order the deeper search.
            if (pv_node || cut_node) && depth > 4 * cut_node as Depth && tt_move.is_none() {
                depth = (depth - 2).max(1);
            }

            // Step 14. ProbCut: a good capture pushing well above beta lets
            // the node fail high after a shallow verification.
            let prob_cut_beta = (beta + 193 - 61 * improving as Value).min(VALUE_INFINITE - 1);
            if depth >= 3
                && !is_decisive(beta)
                && tt_value != VALUE_NONE
                && !is_decisive(tt_value)
                && tt_value >= prob_cut_beta
            {
                let prob_cut_depth = (depth - 4).max(0);
                let threshold = prob_cut_beta - self.stacks[ss].static_eval;
                let conts = self.cont_keys(ss);
                let mut picker = MovePicker::new_probcut(
                    pos,
                    if tt_capture { tt_move } else { Move::NONE },
                    threshold,
                );

                while let Some(m) = picker.next(pos, &self.histories, &conts) {
                    if m == excluded || !pos.legal(m) {
                        continue;
                    }

                    let dst = m.dst_sq();
                    let piece = pos.moved_piece(m);
                    pos.do_move(m);
                    tt.prefetch(pos.key());
                    self.counters.nodes.fetch_add(1, Ordering::Relaxed);
                    self.stacks[ss].curr_move = m;
                    self.stacks[ss].cont_key =
                        Some(ContinuationKey::new(in_check, true, piece, dst));
                    self.stacks[ss].corr_key = Some((piece, dst));

                    let mut value =
                        -self.qsearch::<NonPV>(pos, ss + 1, -prob_cut_beta, -prob_cut_beta + 1);

                    if value >= prob_cut_beta && prob_cut_depth > 0 {
                        value = -self.search::<NonPV>(
                            pos,
                            ss + 1,
                            -prob_cut_beta,
                            -prob_cut_beta + 1,
                            prob_cut_depth,
                            !cut_node,
                            Move::NONE,
                        );
                    }

                    pos.undo_move(m);

                    if self.stopped() {
                        return VALUE_DRAW;
                    }

                    if value >= prob_cut_beta {
                        tt_writer.write(
                            prob_cut_depth + 1,
                            tt_pv,
                            Bound::Lower,
                            m,
                            value,
                            unadjusted_eval,
                        );
                        if !is_win(value) {
                            return value - (prob_cut_beta - beta);
                        }
                    }
                }
            }
        }

        // Step 15. Move loop setup.
        let conts = self.cont_keys(ss);
        let quiet_threshold = ((-3560 - 10 * improving as i32) * depth).min(MAX_QUIET_THRESHOLD);
        let mut picker =
            MovePicker::new(pos, PickKind::Main, tt_move, ply.max(0) as usize, quiet_threshold);

        let imbalance = imbalance_bucket(pos);
        let pawn_idx = pawn_index(pos.pawn_key());
        let us = pos.active_color();

        let mut move_count: i32 = 0;
        let mut promo_count: i32 = 0;
        let mut best_move = Move::NONE;
        let mut value;
        let mut singular_value = VALUE_INFINITE;
        let mut quiets_tried: ArrayVec<Move, MAX_TRIED> = ArrayVec::new();
        let mut captures_tried: ArrayVec<Move, MAX_TRIED> = ArrayVec::new();

        // Step 16. Iterate the picker until exhaustion or a beta cutoff.
        while let Some(m) = picker.next(pos, &self.histories, &conts) {
            debug_assert!(pos.pseudo_legal(m));

            // 16a. Exclusions: the singular candidate, illegal moves, and at
            // root anything outside the current MultiPV/TB-rank slice.
            if m == excluded || !pos.legal(m) {
                continue;
            }
            if root_node
                && !self.root_moves[self.pv_idx..self.pv_last]
                    .iter()
                    .any(|rm| rm.pv[0] == m)
            {
                continue;
            }

            // 16b. Counters.
            move_count += 1;
            self.stacks[ss].move_count = move_count;
            promo_count += (m.type_of() == MoveType::Promotion
                && m.promotion_type() != PieceType::Queen) as i32;

            if root_node && self.is_main() && self.root_depth > 30 {
                if let Some(cb) = &self.callbacks.on_currmove {
                    cb(&CurrMoveInfo {
                        depth: self.root_depth,
                        curr_move: m,
                        curr_move_number: self.pv_idx + move_count as usize,
                    });
                }
            }

            let dst = m.dst_sq();
            let piece = pos.moved_piece(m);
            let gives_check = pos.gives_check(m);
            let dbl_check = gives_check && {
                // A discovered check alongside the direct one.
                pos.blockers_for_king(!us) & m.org_sq().bb() != 0
                    && pos.check_squares(piece.piece_type()) & dst.bb() != 0
            };
            let capture = pos.capture_stage(m);
            let captured = pos.captured_piece_type(m);

            // 16c. Base depth and reduction for this move.
            let mut new_depth = depth - 1;
            let delta_ratio = 806 * (beta - alpha) / self.root_delta;
            let mut r = self.reduction(depth, move_count, delta_ratio, improving);

            // 16d. Pruning at shallow depth.
            if !root_node
                && pos.non_pawn_material(us) > 0
                && !is_loss(best_value)
            {
                // Futility move count: stop picking quiets late in the list.
                if move_count
                    >= ((3 + depth * depth) >> !improving as i32) + promo_count
                        - (!improving && singular_value < alpha - 80) as i32
                {
                    picker.skip_quiets();
                }

                let lmr_depth = new_depth - r / 1024;

                if capture {
                    let cap_hist = self.histories.capture.get(piece, dst, captured, imbalance);

                    // Capture futility.
                    if !in_check && lmr_depth < 7 && !gives_check {
                        let futility_value = (263
                            + self.stacks[ss].static_eval
                            + captured.value()
                            + Self::promotion_value(m)
                            + cap_hist / 7
                            + 222 * lmr_depth)
                            .min(VALUE_TB_WIN_IN_MAX_PLY - 1);
                        if futility_value <= alpha {
                            continue;
                        }
                    }

                    // Capture SEE gate.
                    let see_hist = (cap_hist * 27 / 1000).clamp(-164 * depth, 163 * depth);
                    if !pos.see_ge(m, -(see_hist + 160 * depth + 256 * dbl_check as i32)) {
                        continue;
                    }
                } else {
                    let cont_hist = conts[0]
                        .map_or(0, |k| self.histories.continuation.get(&k, piece, dst))
                        + conts[1].map_or(0, |k| self.histories.continuation.get(&k, piece, dst))
                        + self.histories.pawn.get(pawn_idx, piece, dst);

                    // Quiet continuation pruning.
                    if cont_hist < -3865 * depth {
                        continue;
                    }

                    let cont_hist = cont_hist + 2 * self.histories.quiet.get(us, m);
                    let lmr_depth = lmr_depth + cont_hist * 2979 / 10_000_000;

                    // Quiet futility, propagating the margin as a floor.
                    if !in_check && lmr_depth < 13 && !gives_check {
                        let futility_value = (47
                            + self.stacks[ss].static_eval
                            + 95 * best_move.is_none() as Value
                            + 144 * lmr_depth)
                            .min(VALUE_TB_WIN_IN_MAX_PLY - 1);
                        if futility_value <= alpha {
                            best_value = best_value.max(futility_value);
                            continue;
                        }
                    }

                    // Quiet SEE gate.
                    let lmr_depth = lmr_depth.max(0);
                    if !pos.see_ge(m, -(23 * lmr_depth * lmr_depth + 256 * dbl_check as i32)) {
                        continue;
                    }
                }
            }

            // Step 16e-g. Extensions, kept in check beyond twice the root
            // depth to avoid search explosions.
            let mut extension: Depth = 0;
            if ply < 2 * self.root_depth {
                // 16e. Singular extension: is the table move the only one
                // that holds? Search the rest against a lowered bound.
                if !root_node
                    && !excluded_some
                    && m == tt_move
                    && depth > 4 - (self.completed_depth > 32) as Depth + tt_pv as Depth
                    && tt_value != VALUE_NONE
                    && !is_decisive(tt_value)
                    && tt_data.depth >= depth - 3
                    && tt_data.bound.covers(Bound::Lower)
                {
                    let singular_beta = tt_value - (53 + 84 * tt_pv as Value) * depth / 64;
                    let singular_depth = (new_depth / 2).max(1);

                    value = self.search::<NonPV>(
                        pos,
                        ss,
                        singular_beta - 1,
                        singular_beta,
                        singular_depth,
                        cut_node,
                        m,
                    );
                    self.stacks[ss].move_count = move_count;
                    self.stacks[ss].tt_move = tt_move;

                    if value < singular_beta {
                        singular_value = value;

                        let double_margin = 250 * pv_node as Value - 176 * !tt_capture as Value
                            - correction.abs() / 239_086;
                        let triple_margin = 100 + 285 * pv_node as Value
                            - 253 * !tt_capture as Value
                            + 97 * tt_pv as Value
                            - correction.abs() / 274_335;

                        extension = 1
                            + (value < singular_beta - double_margin) as Depth
                            + (value < singular_beta - triple_margin) as Depth;

                        depth =
                            (depth + 1 + (depth < 8 && extension > 2) as Depth).min(MAX_PLY as Depth - 1);
                    } else if value >= beta && !is_win(value) {
                        // Multi-cut: several moves beat beta without the
                        // table move; trust the soft bound.
                        return value;
                    } else if tt_value >= beta {
                        extension = -3;
                    } else if cut_node {
                        extension = -2;
                    }
                }
                // 16f. Recapture extension on the principal variation.
                else if pv_node
                    && capture
                    && self.stacks[ss - 1].curr_move.is_some()
                    && dst == self.stacks[ss - 1].curr_move.dst_sq()
                    && self.histories.capture.get(piece, dst, captured, imbalance) > 4263
                {
                    extension = 1;
                }
                // 16g. Check extension.
                else if gives_check
                    && (dbl_check
                        || (depth > 12 && pos.rule50_count() < 10 && pos.see_ge(m, 1)))
                {
                    extension = 1;
                }
            }

            new_depth += extension;

            let pre_nodes = self.local_nodes();

            // 16h. Make the move; prefetch the child's cluster right away.
            pos.do_move(m);
            tt.prefetch(pos.key());
            self.counters.nodes.fetch_add(1, Ordering::Relaxed);
            self.stacks[ss].curr_move = m;
            self.stacks[ss].cont_key = Some(ContinuationKey::new(in_check, capture, piece, dst));
            self.stacks[ss].corr_key = Some((piece, dst));

            self.stacks[ss].history = if capture {
                7 * captured.value() + 3 * Self::promotion_value(m)
                    + self.histories.capture.get(piece, dst, captured, imbalance)
                    - 4790
            } else {
                2 * self.histories.quiet.get(us, m)
                    + conts[0].map_or(0, |k| self.histories.continuation.get(&k, piece, dst))
                    + conts[1].map_or(0, |k| self.histories.continuation.get(&k, piece, dst))
                    - 3752
            };

            // Reduction adjustments around the table move, PV membership,
            // cutoff frequency and history.
            r -= (1037
                + 965 * (tt_value != VALUE_NONE && tt_value > alpha) as i32
                + 960 * (tt_data.depth >= depth) as i32)
                * tt_pv as i32;
            r -= 1061 * pv_node as i32;
            r += (2825 - 1101 * (tt_pv && tt_data.depth >= depth) as i32) * cut_node as i32;
            r += 292 - 64 * move_count - 1024 * dbl_check as i32 - correction.abs() / 33838;
            r += (1230 + 1194 * (depth < 7) as i32) * (tt_capture && !capture) as i32;
            r += if self.stacks[ss].cutoff_count > 3 {
                993 + 945 * (!pv_node && !cut_node) as i32
            } else {
                -2106 * (m == tt_move) as i32
            };
            r -= self.stacks[ss].history * 983 / 10_000;

            // 16i. Late move reduction.
            let all_node = !pv_node && !cut_node;
            if depth > 1 && move_count > 1 {
                let red_depth = (new_depth - r / 1024)
                    .min(new_depth + !all_node as Depth + (pv_node && best_move.is_none()) as Depth)
                    .max(1);

                value =
                    -self.search::<NonPV>(pos, ss + 1, -(alpha + 1), -alpha, red_depth, true, Move::NONE);

                // Fail high on the reduced search: deepen adaptively.
                if value > alpha && new_depth > red_depth {
                    new_depth += (value > 43 + best_value + 2 * new_depth) as Depth;
                    new_depth -= (value < 9 + best_value) as Depth;

                    if new_depth > red_depth {
                        value = -self.search::<NonPV>(
                            pos,
                            ss + 1,
                            -(alpha + 1),
                            -alpha,
                            new_depth,
                            !cut_node,
                            Move::NONE,
                        );
                    }

                    if value >= beta {
                        self.update_continuation_histories(ss, piece, dst, 2048);
                    }
                }
            }
            // 16j. Full-depth zero-window search when LMR does not apply.
            else if !pv_node || move_count > 1 {
                r += 2178 * tt_move.is_none() as i32;
                value = -self.search::<NonPV>(
                    pos,
                    ss + 1,
                    -(alpha + 1),
                    -alpha,
                    new_depth - (r > 3385) as Depth,
                    !cut_node,
                    Move::NONE,
                );
            } else {
                value = alpha + 1; // first move of a PV node: search below
            }

            // Full-window search for the PV first move or after a fail-high.
            if pv_node && (move_count == 1 || value > alpha) {
                self.stacks[ss + 1].pv.clear();
                value = -self.search::<PV>(pos, ss + 1, -beta, -alpha, new_depth, false, Move::NONE);
            }

            // 16k. Undo; on stop the value is untrusted, return at once
            // without touching the table or the PV.
            pos.undo_move(m);

            if self.stopped() {
                return VALUE_DRAW;
            }

            // 16m. Root bookkeeping.
            if root_node {
                let spent = self.local_nodes() - pre_nodes;
                let sel_depth = self.sel_depth;
                let time_managed = self.limits.use_time_manager();
                let rm = self
                    .root_moves
                    .iter_mut()
                    .find(|rm| rm.pv[0] == m)
                    .expect("root move present");
                rm.nodes += spent;
                rm.avg_value =
                    if rm.avg_value == -VALUE_INFINITE { value } else { (value + rm.avg_value) / 2 };
                let sqr = value as i64 * value.abs() as i64;
                rm.avg_sqr_value =
                    if rm.avg_sqr_value < 0 { sqr } else { (sqr + rm.avg_sqr_value) / 2 };

                if move_count == 1 || value > alpha {
                    rm.cur_value = value;
                    rm.uci_value = value;
                    rm.sel_depth = sel_depth;
                    rm.bound_lower = false;
                    rm.bound_upper = false;
                    if value >= beta {
                        rm.bound_lower = true;
                        rm.uci_value = beta;
                    } else if value <= alpha {
                        rm.bound_upper = true;
                        rm.uci_value = alpha;
                    }
                    rm.pv.truncate(1);
                    let child_pv = std::mem::take(&mut self.stacks[ss + 1].pv);
                    self.root_moves
                        .iter_mut()
                        .find(|rm| rm.pv[0] == m)
                        .unwrap()
                        .pv
                        .extend_from_slice(&child_pv);
                    self.stacks[ss + 1].pv = child_pv;

                    if self.pv_idx == 0 && move_count > 1 && time_managed {
                        self.counters.move_changes.fetch_add(1, Ordering::Relaxed);
                    }
                } else {
                    // Preserved order relies on the stable sort.
                    rm.cur_value = -VALUE_INFINITE;
                }
            }

            // 16l. Accept.
            if value > best_value {
                best_value = value;

                if value > alpha {
                    best_move = m;

                    if pv_node && !root_node {
                        let child_pv = std::mem::take(&mut self.stacks[ss + 1].pv);
                        let pv = &mut self.stacks[ss].pv;
                        pv.clear();
                        pv.push(m);
                        pv.extend_from_slice(&child_pv);
                        self.stacks[ss + 1].pv = child_pv;
                    }

                    if value >= beta {
                        if !root_node {
                            self.stacks[ss - 1].cutoff_count += (extension < 2) as i32;
                        }
                        break;
                    }

                    alpha = value;

                    // One improvement is enough evidence to thin the rest.
                    if depth < 18 && !is_decisive(value) {
                        depth = (depth - if depth < 8 { 3 } else if depth < 14 { 2 } else { 1 })
                            .max(1);
                    }
                }
            }

            if m != best_move && move_count <= MAX_TRIED as i32 {
                if capture {
                    let _ = captures_tried.try_push(m);
                } else {
                    let _ = quiets_tried.try_push(m);
                }
            }
        }

        // A fail-high at a non-PV node is damped toward beta.
        if !pv_node && best_value > beta && !is_decisive(best_value) {
            best_value = Self::in_range((depth * best_value + beta) / (depth + 1));
        }

        // Step 17. No legal move: mate, stalemate, or a failed exclusion.
        if move_count == 0 {
            best_value = if excluded_some {
                alpha
            } else if in_check {
                mated_in(ply)
            } else {
                VALUE_DRAW
            };
        }
        // Step 18. History updates.
        else if best_move.is_some() {
            self.update_all_history(pos, ss, depth, best_move, &quiets_tried, &captures_tried);
        }
        // No cutoff here: the previous quiet move gets credit for the low.
        else {
            let prev = self.stacks[ss - 1].curr_move;
            if prev.is_some() && pos.captured_piece() == Piece::None {
                let bonus_scale = (119 * (depth > 5) as i32
                    + 39 * (pv_node || cut_node) as i32
                    + 193 * (self.stacks[ss - 1].move_count > 8) as i32
                    + 143
                        * (!in_check
                            && self.stacks[ss].static_eval != VALUE_NONE
                            && best_value <= self.stacks[ss].static_eval - 107)
                            as i32
                    + 110
                        * (!self.stacks[ss - 1].in_check
                            && self.stacks[ss - 1].static_eval != VALUE_NONE
                            && best_value <= -self.stacks[ss - 1].static_eval - 81)
                            as i32
                    + 80 * (prev == self.stacks[ss - 1].tt_move) as i32
                    + (-self.stacks[ss - 1].history / 100).clamp(0, 316))
                .max(0);

                let bonus = bonus_scale * stat_bonus(depth);
                let prev_piece = pos.piece_on(prev.dst_sq());
                if prev_piece != Piece::None {
                    self.histories.quiet.update(!us, prev, bonus * 68 / 10_000);
                    self.update_continuation_histories(
                        ss - 1,
                        prev_piece,
                        prev.dst_sq(),
                        bonus * 156 / 10_000,
                    );
                    if prev_piece.piece_type() != PieceType::Pawn
                        && prev.type_of() != MoveType::Promotion
                    {
                        self.histories.pawn.update(
                            pawn_index(pos.pawn_key()),
                            prev_piece,
                            prev.dst_sq(),
                            bonus * 383 / 10_000,
                        );
                    }
                }
            }
            // A capture refuted us: its history slot takes the credit.
            else if prev.is_some() && pos.captured_piece() != Piece::None {
                let prev_piece = pos.piece_on(prev.dst_sq());
                if prev_piece != Piece::None {
                    let captured = pos.captured_piece().piece_type();
                    let bonus = 2 * stat_bonus(depth);
                    self.histories.capture.update(
                        prev_piece,
                        prev.dst_sq(),
                        captured,
                        imbalance,
                        bonus,
                    );
                }
            }
        }

        // Clamp by the TB ceiling established in step 7.
        if pv_node {
            best_value = best_value.min(max_value);
        }

        // A fail-low under a PV parent marks this node as PV-adjacent.
        if best_value <= alpha {
            self.stacks[ss].tt_pv = self.stacks[ss].tt_pv || self.stacks[ss - 1].tt_pv;
        }

        // Write back, except for excluded-move probes and non-first root
        // lines, whose windows lie about the position.
        if (!root_node || self.pv_idx == 0) && !excluded_some {
            let bound = if best_value >= beta {
                Bound::Lower
            } else if pv_node && best_move.is_some() {
                Bound::Exact
            } else {
                Bound::Upper
            };
            tt_writer.write(
                depth,
                self.stacks[ss].tt_pv,
                bound,
                best_move,
                best_value,
                unadjusted_eval,
            );
        }

        // Correction history learns from the eval-vs-search gap.
        if !in_check
            && !(best_move.is_some() && pos.capture(best_move))
            && self.stacks[ss].static_eval != VALUE_NONE
            && ((best_value < self.stacks[ss].static_eval && best_value < beta)
                || (best_value > self.stacks[ss].static_eval && best_move.is_some()))
        {
            let bonus = depth * (best_value - self.stacks[ss].static_eval) / 8;
            self.update_correction_history(pos, ss, bonus);
        }

        debug_assert!(best_value > -VALUE_INFINITE && best_value < VALUE_INFINITE);
        best_value
    }

    // ---- quiescence ----

    /// Tactical resolution at the horizon: captures and promotions only,
    /// full evasions while in check.
    pub fn qsearch<NT: NodeType>(
        &mut self,
        pos: &mut Position,
        ss: usize,
        mut alpha: Value,
        beta: Value,
    ) -> Value {
        let pv_node = NT::PV_NODE;
        let ply = (ss - STACK_OFFSET) as i32;
        debug_assert!(-VALUE_INFINITE <= alpha && alpha < beta && beta <= VALUE_INFINITE);
        debug_assert!(pv_node || alpha + 1 == beta);

        let key = pos.key();

        // Upcoming repetition guard, as in the main search.
        if alpha < VALUE_DRAW && pos.upcoming_repetition(ply) {
            alpha = draw_value(key, self.local_nodes());
            if alpha >= beta {
                return alpha;
            }
        }

        if pv_node {
            self.stacks[ss].pv.clear();
            if self.sel_depth < ply + 1 {
                self.sel_depth = ply + 1;
            }
        }

        let in_check = pos.in_check();
        self.stacks[ss].in_check = in_check;
        self.stacks[ss].ply = ply;

        // Draw or horizon.
        if ply >= MAX_PLY as i32 || pos.is_draw(ply) {
            return if ply >= MAX_PLY as i32 && !in_check { evaluate(pos) } else { VALUE_DRAW };
        }

        // Table probe; qsearch entries carry the zero-depth marker.
        let tt = self.tt.clone();
        let (tt_data, cluster_move, mut tt_writer) = tt.probe(key, ply);
        let tt_hit = tt_data.hit;
        let mut tt_value =
            if tt_hit { value_from_tt(tt_data.value, ply, pos.rule50_count()) } else { VALUE_NONE };
        let tt_move = if tt_hit && tt_data.mv.is_some() && pos.pseudo_legal(tt_data.mv) {
            tt_data.mv
        } else if cluster_move.is_some() && pos.pseudo_legal(cluster_move) {
            cluster_move
        } else {
            Move::NONE
        };
        self.stacks[ss].tt_move = tt_move;
        let pv_hit = tt_hit && tt_data.pv;

        if !pv_node
            && tt_value != VALUE_NONE
            && tt_data.depth >= 0
            && tt_data
                .bound
                .covers(if tt_value >= beta { Bound::Lower } else { Bound::Upper })
            && pos.rule50_count() < 90
        {
            if tt_value > beta && tt_data.depth > 0 && !is_decisive(tt_value) {
                tt_value = Self::in_range((tt_data.depth * tt_value + beta) / (tt_data.depth + 1));
            }
            return tt_value;
        }

        let correction = if in_check { 0 } else { self.correction_value(pos, ss) };

        // Stand pat.
        let mut unadjusted_eval = VALUE_NONE;
        let mut best_value;
        let mut futility_base = -VALUE_INFINITE;

        if in_check {
            best_value = -VALUE_INFINITE;
            self.stacks[ss].static_eval = VALUE_NONE;
        } else {
            if tt_hit {
                unadjusted_eval =
                    if tt_data.eval != VALUE_NONE { tt_data.eval } else { evaluate(pos) };
                best_value = Self::in_range(unadjusted_eval + correction / 131072);
                self.stacks[ss].static_eval = best_value;
                if tt_value != VALUE_NONE
                    && tt_data
                        .bound
                        .covers(if tt_value > best_value { Bound::Lower } else { Bound::Upper })
                {
                    best_value = tt_value;
                }
            } else {
                // After a null move the sign-flipped parent eval is exact.
                unadjusted_eval = if self.stacks[ss - 1].curr_move != Move::NULL {
                    evaluate(pos)
                } else {
                    -self.stacks[ss - 1].static_eval
                };
                best_value = Self::in_range(unadjusted_eval + correction / 131072);
                self.stacks[ss].static_eval = best_value;
            }

            if best_value >= beta {
                if best_value > beta && !is_decisive(best_value) {
                    best_value = Self::in_range((best_value + beta) / 2);
                }
                if !tt_hit {
                    tt_writer.write(
                        DEPTH_NONE,
                        false,
                        Bound::Lower,
                        Move::NONE,
                        best_value,
                        unadjusted_eval,
                    );
                }
                return best_value;
            }

            alpha = alpha.max(best_value);
            futility_base = (322 + self.stacks[ss].static_eval).min(VALUE_TB_WIN_IN_MAX_PLY - 1);
        }

        let conts = self.cont_keys(ss);
        let pawn_idx = pawn_index(pos.pawn_key());
        let npm = pos.non_pawn_material(pos.active_color()) > 0;
        let prev_dst = if self.stacks[ss - 1].curr_move.is_some() {
            Some(self.stacks[ss - 1].curr_move.dst_sq())
        } else {
            None
        };

        let mut picker =
            MovePicker::new(pos, PickKind::QSearch, tt_move, ply.max(0) as usize, 0);
        let mut move_count = 0;
        let mut promo_count = 0;
        let mut best_move = Move::NONE;

        while let Some(m) = picker.next(pos, &self.histories, &conts) {
            if !pos.legal(m) {
                continue;
            }

            move_count += 1;
            promo_count += (m.type_of() == MoveType::Promotion
                && m.promotion_type() != PieceType::Queen) as i32;

            let dst = m.dst_sq();
            let piece = pos.moved_piece(m);
            let gives_check = pos.gives_check(m);
            let dbl_check = gives_check
                && pos.blockers_for_king(!pos.active_color()) & m.org_sq().bb() != 0;
            let capture = pos.capture_stage(m);
            let captured = pos.captured_piece_type(m);

            // Pruning: futility against the stand-pat base, then SEE.
            if npm && !is_loss(best_value) {
                if move_count >= 4 + promo_count {
                    picker.skip_quiets();
                }

                if !gives_check
                    && Some(dst) != prev_dst
                    && !is_loss(futility_base)
                    && (m.type_of() != MoveType::Promotion
                        || (!in_check && m.promotion_type() != PieceType::Queen))
                {
                    if move_count > 2 + promo_count {
                        continue;
                    }

                    let futility_value = (futility_base
                        + captured.value()
                        + Self::promotion_value(m))
                    .min(VALUE_TB_WIN_IN_MAX_PLY - 1);
                    if futility_value <= alpha {
                        best_value = best_value.max(futility_value);
                        continue;
                    }

                    if !pos.see_ge(m, alpha - futility_base) {
                        best_value = best_value.max(alpha.min(futility_base));
                        continue;
                    }
                }

                if !capture {
                    let cont_hist = conts[0]
                        .map_or(0, |k| self.histories.continuation.get(&k, piece, dst))
                        + conts[1].map_or(0, |k| self.histories.continuation.get(&k, piece, dst))
                        + self.histories.pawn.get(pawn_idx, piece, dst);
                    if cont_hist <= 4679 {
                        continue;
                    }
                }

                if !pos.see_ge(m, -(83 + 64 * dbl_check as i32)) {
                    continue;
                }
            }

            pos.do_move(m);
            tt.prefetch(pos.key());
            self.counters.nodes.fetch_add(1, Ordering::Relaxed);
            self.stacks[ss].curr_move = m;
            self.stacks[ss].cont_key = Some(ContinuationKey::new(in_check, capture, piece, dst));
            self.stacks[ss].corr_key = Some((piece, dst));

            let value = -self.qsearch::<NT>(pos, ss + 1, -beta, -alpha);

            pos.undo_move(m);

            if self.stopped() {
                return VALUE_DRAW;
            }

            if value > best_value {
                best_value = value;

                if value > alpha {
                    best_move = m;

                    if pv_node {
                        let child_pv = std::mem::take(&mut self.stacks[ss + 1].pv);
                        let pv = &mut self.stacks[ss].pv;
                        pv.clear();
                        pv.push(m);
                        pv.extend_from_slice(&child_pv);
                        self.stacks[ss + 1].pv = child_pv;
                    }

                    if value >= beta {
                        break;
                    }
                    alpha = value;
                }
            }
        }

        // In check with nothing legal: mated here.
        if in_check && best_value == -VALUE_INFINITE {
            return mated_in(ply);
        }

        if best_value > beta && !is_decisive(best_value) {
            best_value = Self::in_range((3 * best_value + beta) / 4);
        }

        let bound = if best_value >= beta { Bound::Lower } else { Bound::Upper };
        tt_writer.write(DEPTH_QS, pv_hit, bound, best_move, best_value, unadjusted_eval);

        best_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The reduction table grows with depth and move count.
    #[test]
    fn test_reduction_monotone() {
        let worker = Worker::new(
            0,
            Weak::new(),
            Arc::new(SharedFlags::default()),
            Arc::new(WorkerCounters::default()),
            Arc::new(TranspositionTable::new(1)),
            Arc::new(Tablebases::new()),
            Arc::new(SearchCallbacks::default()),
        );
        let base = worker.reduction(8, 4, 0, true);
        assert!(worker.reduction(16, 4, 0, true) > base);
        assert!(worker.reduction(8, 12, 0, true) > base);
        // Not improving is reduced more
        assert!(worker.reduction(8, 4, 0, false) > base);
        // A wide window relative to the root delta reduces less
        assert!(worker.reduction(8, 4, 800, true) < base);
    }

    #[test]
    fn test_in_range() {
        assert_eq!(Worker::in_range(0), 0);
        assert!(Worker::in_range(VALUE_MATE) < VALUE_TB_WIN_IN_MAX_PLY);
        assert!(Worker::in_range(-VALUE_MATE) > VALUE_TB_LOSS_IN_MAX_PLY);
    }
}
