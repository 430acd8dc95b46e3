//! Per-thread search statistics: butterfly, capture, pawn, continuation and
//! correction histories. Never shared between workers.

use crate::piece::{Color, Piece, PieceType};
use crate::position::Position;
use crate::square::Square;
use crate::types::{Depth, Move};
use crate::zobrist::compress_key16;

/// Quiet history near the root is kept separately for the first plies.
pub const LOW_PLY_SIZE: usize = 5;

/// Number of pawn-structure buckets.
pub const PAWN_HISTORY_SIZE: usize = 0x4000;

const UINT16_SIZE: usize = 0x10000;

/// Update range of the correction histories.
pub const CORRECTION_LIMIT: i32 = 1024;

const CAPTURE_LIMIT: i32 = 10692;
const QUIET_LIMIT: i32 = 7183;
const PAWN_LIMIT: i32 = 8192;
const TT_MOVE_LIMIT: i32 = 8192;
const CONTINUATION_LIMIT: i32 = 30000;

/// Piece dimension including the empty marker used for null moves.
const PIECE_DIM: usize = 13;

#[inline]
pub fn pawn_index(pawn_key: u64) -> usize {
    compress_key16(pawn_key) as usize & (PAWN_HISTORY_SIZE - 1)
}

#[inline]
pub fn correction_index(key: u64) -> usize {
    compress_key16(key) as usize
}

/// Material-imbalance bucket for the capture history: whether the side to
/// move is ahead in non-pawn material.
#[inline]
pub fn imbalance_bucket(pos: &Position) -> usize {
    let us = pos.active_color();
    (pos.non_pawn_material(us) > pos.non_pawn_material(!us)) as usize
}

/// Reward bonus for a move that proved itself at depth `d`.
/// Monotone non-decreasing and bounded.
#[inline]
pub fn stat_bonus(d: Depth) -> i32 {
    (156 * d - 95).clamp(0, 1776)
}

/// Penalty magnitude for moves that failed at depth `d`.
/// Monotone non-decreasing and bounded.
#[inline]
pub fn stat_malus(d: Depth) -> i32 {
    (849 * d - 269).clamp(0, 2704)
}

/// Gravity update: pulls the entry toward the bonus while damping values
/// that are already near the cap, so the entry stays inside `[-limit, limit]`.
#[inline]
fn update_entry(entry: &mut i16, bonus: i32, limit: i32) {
    let clamped = bonus.clamp(-limit, limit);
    let v = *entry as i32;
    *entry = (v + clamped - v * clamped.abs() / limit) as i16;
    debug_assert!((*entry as i32).abs() <= limit);
}

/// `captureHistory[piece][dst][captured][imbalance]`
pub struct CaptureHistory {
    data: Vec<i16>,
}

impl CaptureHistory {
    pub fn new() -> Self {
        CaptureHistory { data: vec![0; 12 * 64 * 6 * 2] }
    }

    #[inline]
    fn index(piece: Piece, dst: Square, captured: PieceType, imbalance: usize) -> usize {
        ((piece as usize * 64 + dst as usize) * 6 + captured as usize) * 2 + imbalance
    }

    #[inline]
    pub fn get(&self, piece: Piece, dst: Square, captured: PieceType, imbalance: usize) -> i32 {
        self.data[Self::index(piece, dst, captured, imbalance)] as i32
    }

    #[inline]
    pub fn update(
        &mut self,
        piece: Piece,
        dst: Square,
        captured: PieceType,
        imbalance: usize,
        bonus: i32,
    ) {
        update_entry(&mut self.data[Self::index(piece, dst, captured, imbalance)], bonus, CAPTURE_LIMIT);
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

/// `quietHistory[color][org_dst]`, the classic butterfly table.
pub struct QuietHistory {
    data: Vec<i16>,
}

impl QuietHistory {
    pub fn new() -> Self {
        QuietHistory { data: vec![0; 2 * UINT16_SIZE] }
    }

    #[inline]
    fn index(color: Color, m: Move) -> usize {
        color as usize * UINT16_SIZE + (m.raw() as usize & (UINT16_SIZE - 1))
    }

    #[inline]
    pub fn get(&self, color: Color, m: Move) -> i32 {
        self.data[Self::index(color, m)] as i32
    }

    #[inline]
    pub fn update(&mut self, color: Color, m: Move, bonus: i32) {
        update_entry(&mut self.data[Self::index(color, m)], bonus, QUIET_LIMIT);
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

/// `pawnHistory[pawnIndex][piece][dst]`
pub struct PawnHistory {
    data: Vec<i16>,
}

impl PawnHistory {
    pub fn new() -> Self {
        PawnHistory { data: vec![0; PAWN_HISTORY_SIZE * 12 * 64] }
    }

    #[inline]
    fn index(pawn_idx: usize, piece: Piece, dst: Square) -> usize {
        (pawn_idx * 12 + piece as usize) * 64 + dst as usize
    }

    #[inline]
    pub fn get(&self, pawn_idx: usize, piece: Piece, dst: Square) -> i32 {
        self.data[Self::index(pawn_idx, piece, dst)] as i32
    }

    #[inline]
    pub fn update(&mut self, pawn_idx: usize, piece: Piece, dst: Square, bonus: i32) {
        update_entry(&mut self.data[Self::index(pawn_idx, piece, dst)], bonus, PAWN_LIMIT);
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

/// `lowPlyQuietHistory[ply][org_dst]`, consulted only for `ply < 5`.
pub struct LowPlyQuietHistory {
    data: Vec<i16>,
}

impl LowPlyQuietHistory {
    pub fn new() -> Self {
        LowPlyQuietHistory { data: vec![0; LOW_PLY_SIZE * UINT16_SIZE] }
    }

    #[inline]
    fn index(ply: usize, m: Move) -> usize {
        ply * UINT16_SIZE + (m.raw() as usize & (UINT16_SIZE - 1))
    }

    #[inline]
    pub fn get(&self, ply: usize, m: Move) -> i32 {
        self.data[Self::index(ply, m)] as i32
    }

    #[inline]
    pub fn update(&mut self, ply: usize, m: Move, bonus: i32) {
        update_entry(&mut self.data[Self::index(ply, m)], bonus, QUIET_LIMIT);
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

/// Scalar statistic on how often the table move turns out best.
#[derive(Default)]
pub struct TtMoveHistory {
    value: i16,
}

impl TtMoveHistory {
    #[inline]
    pub fn get(&self) -> i32 {
        self.value as i32
    }

    #[inline]
    pub fn update(&mut self, bonus: i32) {
        update_entry(&mut self.value, bonus, TT_MOVE_LIMIT);
    }

    pub fn clear(&mut self) {
        self.value = 0;
    }
}

/// A frame of continuation context: which table the move made at some
/// earlier ply selected. Null moves use the empty piece marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContinuationKey {
    pub in_check: bool,
    pub capture: bool,
    pub piece: Piece,
    pub dst: Square,
}

impl ContinuationKey {
    pub fn new(in_check: bool, capture: bool, piece: Piece, dst: Square) -> Self {
        ContinuationKey { in_check, capture, piece, dst }
    }
}

/// `continuationHistory[inCheck][capture][piece][dst] -> [piece][dst]`
pub struct ContinuationHistory {
    data: Vec<i16>,
}

impl ContinuationHistory {
    pub fn new() -> Self {
        ContinuationHistory { data: vec![0; 2 * 2 * PIECE_DIM * 64 * PIECE_DIM * 64] }
    }

    #[inline]
    fn index(key: &ContinuationKey, piece: Piece, dst: Square) -> usize {
        ((((key.in_check as usize * 2 + key.capture as usize) * PIECE_DIM + key.piece as usize)
            * 64
            + key.dst as usize)
            * PIECE_DIM
            + piece as usize)
            * 64
            + dst as usize
    }

    #[inline]
    pub fn get(&self, key: &ContinuationKey, piece: Piece, dst: Square) -> i32 {
        self.data[Self::index(key, piece, dst)] as i32
    }

    #[inline]
    pub fn update(&mut self, key: &ContinuationKey, piece: Piece, dst: Square, bonus: i32) {
        update_entry(&mut self.data[Self::index(key, piece, dst)], bonus, CONTINUATION_LIMIT);
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

/// Correction history keyed by a compressed structure key and side to move.
pub struct KeyedCorrectionHistory {
    data: Vec<i16>,
}

impl KeyedCorrectionHistory {
    pub fn new() -> Self {
        KeyedCorrectionHistory { data: vec![0; UINT16_SIZE * 2] }
    }

    #[inline]
    fn index(key: u64, color: Color) -> usize {
        correction_index(key) * 2 + color as usize
    }

    #[inline]
    pub fn get(&self, key: u64, color: Color) -> i32 {
        self.data[Self::index(key, color)] as i32
    }

    #[inline]
    pub fn update(&mut self, key: u64, color: Color, bonus: i32) {
        update_entry(&mut self.data[Self::index(key, color)], bonus, CORRECTION_LIMIT);
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

/// Correction history keyed by the previous move pair.
pub struct ContinuationCorrectionHistory {
    data: Vec<i16>,
}

impl ContinuationCorrectionHistory {
    pub fn new() -> Self {
        ContinuationCorrectionHistory { data: vec![0; PIECE_DIM * 64 * PIECE_DIM * 64] }
    }

    #[inline]
    fn index(prev_piece: Piece, prev_dst: Square, piece: Piece, dst: Square) -> usize {
        ((prev_piece as usize * 64 + prev_dst as usize) * PIECE_DIM + piece as usize) * 64
            + dst as usize
    }

    #[inline]
    pub fn get(&self, prev_piece: Piece, prev_dst: Square, piece: Piece, dst: Square) -> i32 {
        self.data[Self::index(prev_piece, prev_dst, piece, dst)] as i32
    }

    #[inline]
    pub fn update(
        &mut self,
        prev_piece: Piece,
        prev_dst: Square,
        piece: Piece,
        dst: Square,
        bonus: i32,
    ) {
        update_entry(
            &mut self.data[Self::index(prev_piece, prev_dst, piece, dst)],
            bonus,
            CORRECTION_LIMIT,
        );
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

/// The full per-worker statistics block.
pub struct Histories {
    pub capture: CaptureHistory,
    pub quiet: QuietHistory,
    pub pawn: PawnHistory,
    pub low_ply_quiet: LowPlyQuietHistory,
    pub tt_move: TtMoveHistory,
    pub continuation: ContinuationHistory,
    pub pawn_correction: KeyedCorrectionHistory,
    pub minor_correction: KeyedCorrectionHistory,
    pub non_pawn_correction: [KeyedCorrectionHistory; 2],
    pub continuation_correction: ContinuationCorrectionHistory,
}

impl Histories {
    pub fn new() -> Self {
        Histories {
            capture: CaptureHistory::new(),
            quiet: QuietHistory::new(),
            pawn: PawnHistory::new(),
            low_ply_quiet: LowPlyQuietHistory::new(),
            tt_move: TtMoveHistory::default(),
            continuation: ContinuationHistory::new(),
            pawn_correction: KeyedCorrectionHistory::new(),
            minor_correction: KeyedCorrectionHistory::new(),
            non_pawn_correction: [KeyedCorrectionHistory::new(), KeyedCorrectionHistory::new()],
            continuation_correction: ContinuationCorrectionHistory::new(),
        }
    }

    pub fn clear(&mut self) {
        self.capture.clear();
        self.quiet.clear();
        self.pawn.clear();
        self.low_ply_quiet.clear();
        self.tt_move.clear();
        self.continuation.clear();
        self.pawn_correction.clear();
        self.minor_correction.clear();
        self.non_pawn_correction[0].clear();
        self.non_pawn_correction[1].clear();
        self.continuation_correction.clear();
    }
}

impl Default for Histories {
    fn default() -> Self {
        Histories::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Entries stay inside [-limit, limit] under repeated one-sided updates.
    #[test]
    fn test_gravity_bounds() {
        let mut e: i16 = 0;
        for _ in 0..1000 {
            update_entry(&mut e, QUIET_LIMIT, QUIET_LIMIT);
            assert!((e as i32).abs() <= QUIET_LIMIT);
        }
        assert_eq!(e as i32, QUIET_LIMIT);
        for _ in 0..1000 {
            update_entry(&mut e, -QUIET_LIMIT, QUIET_LIMIT);
        }
        assert_eq!(e as i32, -QUIET_LIMIT);
    }

    /// A saturated entry absorbs further same-sign bonuses completely.
    #[test]
    fn test_gravity_damping() {
        let mut e: i16 = 0;
        update_entry(&mut e, 100, 1024);
        let after_one = e;
        update_entry(&mut e, 100, 1024);
        // The second bonus moves the entry by less than the first
        assert!((e - after_one) < after_one);
    }

    /// stat_bonus and stat_malus are monotone non-decreasing and bounded.
    #[test]
    fn test_stat_bonus_malus_monotone() {
        for d in 1..60 {
            assert!(stat_bonus(d + 1) >= stat_bonus(d));
            assert!(stat_malus(d + 1) >= stat_malus(d));
        }
        assert!(stat_bonus(300) <= 1776);
        assert!(stat_malus(300) <= 2704);
    }

    /// Continuation history round-trips through the composite index.
    #[test]
    fn test_continuation_indexing() {
        let mut hist = ContinuationHistory::new();
        let key = ContinuationKey::new(false, true, Piece::WKnight, Square::F3);
        hist.update(&key, Piece::BPawn, Square::E5, 500);
        assert!(hist.get(&key, Piece::BPawn, Square::E5) > 0);
        assert_eq!(hist.get(&key, Piece::BPawn, Square::E4), 0);
        let other = ContinuationKey::new(true, true, Piece::WKnight, Square::F3);
        assert_eq!(hist.get(&other, Piece::BPawn, Square::E5), 0);
    }

    /// Null-move frames index with the empty piece marker without clashing.
    #[test]
    fn test_null_move_key() {
        let mut hist = ContinuationHistory::new();
        let null_key = ContinuationKey::new(false, false, Piece::None, Square::A1);
        hist.update(&null_key, Piece::WQueen, Square::D8, 900);
        assert!(hist.get(&null_key, Piece::WQueen, Square::D8) > 0);
    }
}
