//! Lazy-SMP thread pool.
//!
//! N workers run the same iterative deepening concurrently on private
//! stacks and history tables, sharing only the transposition table and the
//! atomic control flags. Thread 0 is the supervisor: it owns the time
//! manager, wakes the helpers, and elects the final best thread by vote.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;

use crate::movegen::MoveList;
use crate::position::Position;
use crate::search::root_move::RootMove;
use crate::search::worker::Worker;
use crate::search::{Limits, SearchCallbacks, SearchOptions};
use crate::syzygy::Tablebases;
use crate::tt::TranspositionTable;
use crate::types::{is_loss, is_win};

/// Atomic control flags shared by every worker.
///
/// `stop` and `abort` are read with relaxed ordering inside the search and
/// written with release by the supervisor; a worker is guaranteed to observe
/// them within one polling interval.
#[derive(Default)]
pub struct SharedFlags {
    pub stop: AtomicBool,
    pub abort: AtomicBool,
    pub research: AtomicBool,
    pub ponder: AtomicBool,
}

/// Per-worker statistic counters, summed across the pool for reporting.
#[derive(Default)]
pub struct WorkerCounters {
    pub nodes: AtomicU64,
    pub tb_hits: AtomicU64,
    pub move_changes: AtomicU64,
}

/// One OS thread and its worker state.
///
/// The worker lives in an `UnsafeCell`: it is mutated either by its own
/// thread while `busy`, or by the pool while provably idle (under the busy
/// mutex). That protocol is the entire synchronization story.
pub struct Thread {
    busy: Mutex<bool>,
    cv: Condvar,
    exit: AtomicBool,
    worker: UnsafeCell<Worker>,
}

unsafe impl Sync for Thread {}
unsafe impl Send for Thread {}

impl Thread {
    fn new(worker: Worker) -> Thread {
        Thread {
            busy: Mutex::new(false),
            cv: Condvar::new(),
            exit: AtomicBool::new(false),
            worker: UnsafeCell::new(worker),
        }
    }

    /// Mutable access to the worker.
    ///
    /// # Safety
    ///
    /// The caller must hold the idle side of the busy protocol: either this
    /// is the worker's own thread inside `start_searching`, or the pool has
    /// observed `busy == false` and no wakeup has been issued since.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn worker_mut(&self) -> &mut Worker {
        unsafe { &mut *self.worker.get() }
    }

    /// Shared read access, valid under the same protocol as `worker_mut`.
    pub(crate) fn worker(&self) -> &Worker {
        unsafe { &*self.worker.get() }
    }

    /// Sleeps until woken with work, runs it, and goes back to sleep.
    fn idle_loop(self: &Arc<Self>) {
        loop {
            let mut busy = self.busy.lock().unwrap();
            while !*busy && !self.exit.load(Ordering::Acquire) {
                busy = self.cv.wait(busy).unwrap();
            }
            if self.exit.load(Ordering::Acquire) {
                return;
            }
            drop(busy);

            unsafe { self.worker_mut() }.start_searching();

            let mut busy = self.busy.lock().unwrap();
            *busy = false;
            self.cv.notify_all();
        }
    }

    pub(crate) fn wake(&self) {
        let mut busy = self.busy.lock().unwrap();
        *busy = true;
        self.cv.notify_all();
    }

    /// Blocks until the thread has finished its current job.
    pub(crate) fn wait_finish(&self) {
        let mut busy = self.busy.lock().unwrap();
        while *busy {
            busy = self.cv.wait(busy).unwrap();
        }
    }
}

/// The pool of search threads.
pub struct ThreadPool {
    threads: Vec<Arc<Thread>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    pub flags: Arc<SharedFlags>,
    pub counters: Vec<Arc<WorkerCounters>>,
    tt: Arc<TranspositionTable>,
    tb: Arc<Tablebases>,
}

impl ThreadPool {
    /// Creates the pool and parks `n_threads` workers in their idle loops.
    pub fn new(
        n_threads: usize,
        tt: Arc<TranspositionTable>,
        tb: Arc<Tablebases>,
        callbacks: Arc<SearchCallbacks>,
    ) -> Arc<ThreadPool> {
        let n_threads = n_threads.clamp(1, 1024).min(num_cpus::get().max(1));
        let flags = Arc::new(SharedFlags::default());
        let counters: Vec<Arc<WorkerCounters>> =
            (0..n_threads).map(|_| Arc::new(WorkerCounters::default())).collect();

        Arc::new_cyclic(|weak: &Weak<ThreadPool>| {
            let mut threads = Vec::with_capacity(n_threads);
            let mut handles = Vec::with_capacity(n_threads);

            for idx in 0..n_threads {
                let worker = Worker::new(
                    idx,
                    weak.clone(),
                    flags.clone(),
                    counters[idx].clone(),
                    tt.clone(),
                    tb.clone(),
                    callbacks.clone(),
                );
                let thread = Arc::new(Thread::new(worker));
                let runner = thread.clone();
                handles.push(
                    std::thread::Builder::new()
                        .name(format!("sable-worker-{idx}"))
                        .spawn(move || runner.idle_loop())
                        .expect("failed to spawn search thread"),
                );
                threads.push(thread);
            }

            ThreadPool {
                threads,
                handles: Mutex::new(handles),
                flags,
                counters,
                tt,
                tb,
            }
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    pub(crate) fn main(&self) -> &Arc<Thread> {
        &self.threads[0]
    }

    pub(crate) fn thread(&self, idx: usize) -> &Arc<Thread> {
        &self.threads[idx]
    }

    /// Total nodes searched by all workers, relaxed sum.
    pub fn nodes(&self) -> u64 {
        self.counters.iter().map(|c| c.nodes.load(Ordering::Relaxed)).sum()
    }

    /// Total tablebase hits across workers.
    pub fn tb_hits(&self) -> u64 {
        self.counters.iter().map(|c| c.tb_hits.load(Ordering::Relaxed)).sum()
    }

    /// Launches a search on every worker.
    ///
    /// Waits for the previous search to finish, clears the control flags,
    /// builds the root move list, copies the position and limits into each
    /// worker, then wakes the main worker, which in turn wakes the rest.
    pub fn start(&self, pos: &Position, limits: Limits, options: SearchOptions) {
        self.wait_finish();

        self.flags.stop.store(false, Ordering::Release);
        self.flags.abort.store(false, Ordering::Release);
        self.flags.research.store(false, Ordering::Release);
        self.flags.ponder.store(limits.ponder, Ordering::Release);

        if !limits.infinite {
            self.tt.new_search();
        }

        // Root moves: legal moves filtered by searchmoves / ignoremoves.
        let mut root_moves: Vec<RootMove> = MoveList::legal(pos)
            .iter()
            .copied()
            .filter(|m| limits.search_moves.is_empty() || limits.search_moves.contains(m))
            .filter(|m| !limits.ignore_moves.contains(m))
            .map(RootMove::new)
            .collect();

        // Seed tablebase ranks before any worker sees the list.
        let mut root_copy = pos.clone();
        let root_in_tb = self.tb.rank_root_moves(
            &mut root_copy,
            &mut root_moves,
            options.syzygy_probe_limit,
            options.syzygy_50_move_rule,
        );

        for (idx, thread) in self.threads.iter().enumerate() {
            self.counters[idx].nodes.store(0, Ordering::Relaxed);
            self.counters[idx].tb_hits.store(0, Ordering::Relaxed);
            self.counters[idx].move_changes.store(0, Ordering::Relaxed);
            // All threads are idle here, so the mutable access is safe.
            let worker = unsafe { thread.worker_mut() };
            worker.prepare(pos.clone(), root_moves.clone(), limits.clone(), options.clone(), root_in_tb);
        }

        self.main().wake();
    }

    /// Wakes every non-main worker; called by the main worker once its own
    /// setup is complete.
    pub(crate) fn start_helpers(&self) {
        for thread in self.threads.iter().skip(1) {
            thread.wake();
        }
    }

    /// Waits for every non-main worker to finish the current search.
    pub(crate) fn wait_helpers(&self) {
        for thread in self.threads.iter().skip(1) {
            thread.wait_finish();
        }
    }

    /// Blocks until no worker is searching.
    pub fn wait_finish(&self) {
        for thread in &self.threads {
            thread.wait_finish();
        }
    }

    /// Clears game-scoped worker state (histories, time-manager memory).
    pub fn new_game(&self) {
        self.wait_finish();
        for thread in &self.threads {
            // All threads idle after wait_finish.
            unsafe { thread.worker_mut() }.new_game();
        }
    }

    /// Requests the current search to stop. When pondering, the ponder flag
    /// falls with it so the main worker can conclude.
    pub fn stop(&self) {
        self.flags.ponder.store(false, Ordering::Release);
        self.flags.stop.store(true, Ordering::Release);
    }

    /// The GUI played the pondered move: keep searching, now on our clock.
    pub fn ponderhit(&self) {
        self.flags.ponder.store(false, Ordering::Release);
    }

    /// Elects the thread whose result the pool reports.
    ///
    /// Votes are tallied per best move, weighted by score margin over the
    /// worst thread and by completed depth. Proven wins prefer the shorter
    /// mate; proven losses the longest resistance.
    pub(crate) fn best_thread(&self) -> usize {
        let worker_at = |idx: usize| self.threads[idx].worker();

        let mut min_value = i32::MAX;
        for idx in 0..self.threads.len() {
            let w = worker_at(idx);
            if w.root_moves.is_empty() {
                return 0;
            }
            min_value = min_value.min(w.root_moves[0].cur_value);
        }

        let mut votes: HashMap<u16, i64> = HashMap::new();
        for idx in 0..self.threads.len() {
            let w = worker_at(idx);
            let weight =
                (14 + w.root_moves[0].cur_value - min_value) as i64 * w.completed_depth as i64;
            *votes.entry(w.root_moves[0].pv[0].raw()).or_insert(0) += weight;
        }

        let mut best_idx = 0;
        for idx in 1..self.threads.len() {
            let best = worker_at(best_idx);
            let cand = worker_at(idx);
            let best_value = best.root_moves[0].cur_value;
            let cand_value = cand.root_moves[0].cur_value;
            let best_move = best.root_moves[0].pv[0];
            let cand_move = cand.root_moves[0].pv[0];

            let take = if is_loss(best_value) {
                // Everything is lost: take the longest resistance.
                cand_value > best_value
                    || (cand_value == best_value && cand.completed_depth > best.completed_depth)
            } else if is_win(cand_value) {
                // Shorter proven win beats anything unproven.
                cand_value > best_value
            } else if is_win(best_value) || is_loss(cand_value) {
                false
            } else {
                let vb = votes[&best_move.raw()];
                let vc = votes[&cand_move.raw()];
                vc > vb
                    || (vc == vb
                        && cand.root_moves[0].pv.len() > best.root_moves[0].pv.len())
            };
            if take {
                best_idx = idx;
            }
        }
        best_idx
    }

    fn exit(&self) {
        // A search still in flight must wind down before the join.
        self.stop();
        self.wait_finish();
        for thread in &self.threads {
            // Setting the flag under the busy mutex pairs with the condvar
            // wait, so no sleeping thread can miss the wakeup.
            let _busy = thread.busy.lock().unwrap();
            thread.exit.store(true, Ordering::Release);
            thread.cv.notify_all();
        }
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.exit();
    }
}
