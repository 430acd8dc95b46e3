//! Staged lazy move enumerator.
//!
//! Moves are generated in batches and scored only when their stage is
//! reached, so a quick beta cutoff on the table move or a winning capture
//! never pays for sorting quiets.

use arrayvec::ArrayVec;

use crate::history::{ContinuationKey, Histories, LOW_PLY_SIZE, imbalance_bucket, pawn_index};
use crate::movegen::{GenType, MAX_MOVES, MoveList};
use crate::position::Position;
use crate::types::{Move, MoveType};

/// Weights for summing continuation history over the previous plies.
const CONT_WEIGHT: [i32; 7] = [2, 2, 1, 1, 1, 1, 1];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    TTMove,
    CaptureInit,
    CaptureGood,
    QuietInit,
    QuietGood,
    CaptureBad,
    QuietBad,
    EvaCaptureInit,
    EvaCaptureAll,
    EvaQuietInit,
    EvaQuietAll,
    ProbcutInit,
    ProbcutAll,
    Done,
}

/// Which search consumer the picker feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PickKind {
    /// Full main-search enumeration.
    Main,
    /// Tactical-only enumeration for quiescence.
    QSearch,
    /// Captures above a SEE threshold for the probcut subprobe.
    ProbCut,
}

/// The per-node move picker. Holds no references: callers pass the position
/// and history tables into `next`, which keeps the search free to make and
/// unmake moves between calls.
pub struct MovePicker {
    stage: Stage,
    kind: PickKind,
    tt_move: Move,
    ply: usize,
    /// Partition line for quiet scores; lower goes to the QuietBad stage.
    quiet_threshold: i32,
    /// SEE threshold for probcut captures.
    probcut_threshold: i32,
    quiet_pick: bool,
    captures: ArrayVec<(Move, i32), MAX_MOVES>,
    quiets: ArrayVec<(Move, i32), MAX_MOVES>,
    bad_captures: ArrayVec<Move, MAX_MOVES>,
    capture_idx: usize,
    quiet_idx: usize,
    bad_capture_idx: usize,
    quiet_good_end: usize,
}

impl MovePicker {
    /// Picker for a main-search or quiescence node.
    pub fn new(
        pos: &Position,
        kind: PickKind,
        tt_move: Move,
        ply: usize,
        quiet_threshold: i32,
    ) -> MovePicker {
        debug_assert!(kind != PickKind::ProbCut);
        let tt_ok = tt_move.is_some()
            && pos.pseudo_legal(tt_move)
            && (kind == PickKind::Main || pos.in_check() || pos.capture_stage(tt_move));
        MovePicker {
            stage: if tt_ok { Stage::TTMove } else { Self::after_tt(pos) },
            kind,
            tt_move: if tt_ok { tt_move } else { Move::NONE },
            ply,
            quiet_threshold,
            probcut_threshold: 0,
            // Quiescence considers quiet moves only as check evasions.
            quiet_pick: kind == PickKind::Main || pos.in_check(),
            captures: ArrayVec::new(),
            quiets: ArrayVec::new(),
            bad_captures: ArrayVec::new(),
            capture_idx: 0,
            quiet_idx: 0,
            bad_capture_idx: 0,
            quiet_good_end: 0,
        }
    }

    /// Picker for the probcut subprobe: captures with SEE at or above the
    /// given threshold.
    pub fn new_probcut(pos: &Position, tt_move: Move, threshold: i32) -> MovePicker {
        let tt_ok = tt_move.is_some()
            && pos.pseudo_legal(tt_move)
            && pos.capture_stage(tt_move)
            && pos.see_ge(tt_move, threshold);
        MovePicker {
            stage: if tt_ok { Stage::TTMove } else { Stage::ProbcutInit },
            kind: PickKind::ProbCut,
            tt_move: if tt_ok { tt_move } else { Move::NONE },
            ply: 0,
            quiet_threshold: 0,
            probcut_threshold: threshold,
            quiet_pick: false,
            captures: ArrayVec::new(),
            quiets: ArrayVec::new(),
            bad_captures: ArrayVec::new(),
            capture_idx: 0,
            quiet_idx: 0,
            bad_capture_idx: 0,
            quiet_good_end: 0,
        }
    }

    fn after_tt(pos: &Position) -> Stage {
        if pos.in_check() { Stage::EvaCaptureInit } else { Stage::CaptureInit }
    }

    /// Disables the remaining quiet stages; bad captures still flow.
    pub fn skip_quiets(&mut self) {
        self.quiet_pick = false;
    }

    /// Yields the next move, or None when exhausted. Yielded moves are
    /// pseudo-legal; the caller still runs the full legality check.
    pub fn next(
        &mut self,
        pos: &Position,
        hist: &Histories,
        conts: &[Option<ContinuationKey>],
    ) -> Option<Move> {
        loop {
            match self.stage {
                Stage::TTMove => {
                    self.stage = if self.kind == PickKind::ProbCut {
                        Stage::ProbcutInit
                    } else {
                        Self::after_tt(pos)
                    };
                    return Some(self.tt_move);
                }

                Stage::CaptureInit => {
                    self.score_captures(pos, hist);
                    self.stage = Stage::CaptureGood;
                }

                Stage::CaptureGood => {
                    while self.capture_idx < self.captures.len() {
                        let (m, score) = self.captures[self.capture_idx];
                        self.capture_idx += 1;
                        // The "good" SEE gate scales with the ordering score.
                        if pos.see_ge(m, -score / 18) {
                            return Some(m);
                        }
                        self.bad_captures.push(m);
                    }
                    self.stage = if self.kind == PickKind::QSearch {
                        Stage::CaptureBad
                    } else {
                        Stage::QuietInit
                    };
                }

                Stage::QuietInit => {
                    if self.quiet_pick {
                        self.score_quiets(pos, hist, conts);
                    }
                    self.stage = Stage::QuietGood;
                }

                Stage::QuietGood => {
                    if self.quiet_pick {
                        while self.quiet_idx < self.quiet_good_end {
                            let (m, _) = self.quiets[self.quiet_idx];
                            self.quiet_idx += 1;
                            return Some(m);
                        }
                    }
                    self.stage = Stage::CaptureBad;
                }

                Stage::CaptureBad => {
                    if self.bad_capture_idx < self.bad_captures.len() {
                        let m = self.bad_captures[self.bad_capture_idx];
                        self.bad_capture_idx += 1;
                        return Some(m);
                    }
                    self.stage = if self.kind == PickKind::QSearch {
                        Stage::Done
                    } else {
                        Stage::QuietBad
                    };
                }

                Stage::QuietBad => {
                    if self.quiet_pick {
                        while self.quiet_idx < self.quiets.len() {
                            let (m, _) = self.quiets[self.quiet_idx];
                            self.quiet_idx += 1;
                            return Some(m);
                        }
                    }
                    self.stage = Stage::Done;
                }

                Stage::EvaCaptureInit => {
                    self.score_evasion_captures(pos, hist);
                    self.stage = Stage::EvaCaptureAll;
                }

                Stage::EvaCaptureAll => {
                    while self.capture_idx < self.captures.len() {
                        let (m, _) = self.captures[self.capture_idx];
                        self.capture_idx += 1;
                        return Some(m);
                    }
                    self.stage = Stage::EvaQuietInit;
                }

                Stage::EvaQuietInit => {
                    if self.quiet_pick {
                        self.score_evasion_quiets(pos, hist, conts);
                    }
                    self.stage = Stage::EvaQuietAll;
                }

                Stage::EvaQuietAll => {
                    if self.quiet_pick {
                        while self.quiet_idx < self.quiets.len() {
                            let (m, _) = self.quiets[self.quiet_idx];
                            self.quiet_idx += 1;
                            return Some(m);
                        }
                    }
                    self.stage = Stage::Done;
                }

                Stage::ProbcutInit => {
                    self.score_captures(pos, hist);
                    self.stage = Stage::ProbcutAll;
                }

                Stage::ProbcutAll => {
                    while self.capture_idx < self.captures.len() {
                        let (m, _) = self.captures[self.capture_idx];
                        self.capture_idx += 1;
                        if pos.see_ge(m, self.probcut_threshold) {
                            return Some(m);
                        }
                    }
                    self.stage = Stage::Done;
                }

                Stage::Done => return None,
            }
        }
    }

    fn capture_score(&self, pos: &Position, hist: &Histories, m: Move) -> i32 {
        let captured = pos.captured_piece_type(m);
        let imbalance = imbalance_bucket(pos);
        let mut score = captured.value() * 6
            + hist.capture.get(pos.moved_piece(m), m.dst_sq(), captured, imbalance) / 16;
        if m.type_of() == MoveType::Promotion {
            score += m.promotion_type().value() * 6;
        }
        score
    }

    fn score_captures(&mut self, pos: &Position, hist: &Histories) {
        for &m in &MoveList::generate(pos, GenType::Captures) {
            if m.raw() == self.tt_move.raw() {
                continue;
            }
            let score = self.capture_score(pos, hist, m);
            self.captures.push((m, score));
        }
        self.captures.sort_unstable_by_key(|&(_, s)| -s);
    }

    fn quiet_score(
        &self,
        pos: &Position,
        hist: &Histories,
        conts: &[Option<ContinuationKey>],
        m: Move,
    ) -> i32 {
        let piece = pos.moved_piece(m);
        let dst = m.dst_sq();
        let mut score = 2 * hist.quiet.get(pos.active_color(), m)
            + hist.pawn.get(pawn_index(pos.pawn_key()), piece, dst);
        for (i, key) in conts.iter().take(CONT_WEIGHT.len()).enumerate() {
            if let Some(key) = key {
                score += CONT_WEIGHT[i] * hist.continuation.get(key, piece, dst);
            }
        }
        if self.ply < LOW_PLY_SIZE {
            score += hist.low_ply_quiet.get(self.ply, m);
        }
        score
    }

    fn score_quiets(
        &mut self,
        pos: &Position,
        hist: &Histories,
        conts: &[Option<ContinuationKey>],
    ) {
        for &m in &MoveList::generate(pos, GenType::Quiets) {
            if m.raw() == self.tt_move.raw() {
                continue;
            }
            let score = self.quiet_score(pos, hist, conts, m);
            self.quiets.push((m, score));
        }
        self.quiet_good_end = partial_insertion_sort(&mut self.quiets, self.quiet_threshold);
    }

    fn score_evasion_captures(&mut self, pos: &Position, hist: &Histories) {
        for &m in &MoveList::generate(pos, GenType::Evasions) {
            if m.raw() == self.tt_move.raw() || !pos.capture_stage(m) {
                continue;
            }
            // Escaping check: the capture value dominates, history decides ties.
            let score = pos.captured_piece_type(m).value() * 16 + self.capture_score(pos, hist, m);
            self.captures.push((m, score));
        }
        self.captures.sort_unstable_by_key(|&(_, s)| -s);
    }

    fn score_evasion_quiets(
        &mut self,
        pos: &Position,
        hist: &Histories,
        conts: &[Option<ContinuationKey>],
    ) {
        for &m in &MoveList::generate(pos, GenType::Evasions) {
            if m.raw() == self.tt_move.raw() || pos.capture_stage(m) {
                continue;
            }
            let score = self.quiet_score(pos, hist, conts, m);
            self.quiets.push((m, score));
        }
        self.quiets.sort_unstable_by_key(|&(_, s)| -s);
    }
}

/// Sorts the slice so that every element scoring at least `limit` is placed
/// in descending order at the front; lower-scoring elements stay behind in
/// arbitrary order. Returns the partition index.
fn partial_insertion_sort(moves: &mut ArrayVec<(Move, i32), MAX_MOVES>, limit: i32) -> usize {
    let mut sorted_end = 0;
    for i in 0..moves.len() {
        if moves[i].1 >= limit {
            let entry = moves[i];
            moves[i] = moves[sorted_end];
            // Insert into the sorted prefix.
            let mut j = sorted_end;
            while j > 0 && moves[j - 1].1 < entry.1 {
                moves[j] = moves[j - 1];
                j -= 1;
            }
            moves[j] = entry;
            sorted_end += 1;
        }
    }
    sorted_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;

    fn drain(picker: &mut MovePicker, pos: &Position, hist: &Histories) -> Vec<Move> {
        let conts: [Option<ContinuationKey>; 7] = [None; 7];
        let mut out = Vec::new();
        while let Some(m) = picker.next(pos, hist, &conts) {
            out.push(m);
        }
        out
    }

    /// The TT move comes first and is never re-yielded.
    #[test]
    fn test_tt_move_dedup() {
        let pos = Position::startpos();
        let hist = Histories::new();
        let tt_move = crate::notation::parse_uci_move(&pos, "e2e4").unwrap();
        let mut picker = MovePicker::new(&pos, PickKind::Main, tt_move, 0, -3000);
        let moves = drain(&mut picker, &pos, &hist);
        assert_eq!(moves[0], tt_move);
        assert_eq!(moves.iter().filter(|&&m| m == tt_move).count(), 1);
        assert_eq!(moves.len(), 20);
    }

    /// An unverifiable TT move is dropped instead of yielded.
    #[test]
    fn test_bogus_tt_move_dropped() {
        let pos = Position::startpos();
        let hist = Histories::new();
        let bogus = Move::new(crate::square::Square::A3, crate::square::Square::A6);
        let mut picker = MovePicker::new(&pos, PickKind::Main, bogus, 0, -3000);
        let moves = drain(&mut picker, &pos, &hist);
        assert!(!moves.contains(&bogus));
        assert_eq!(moves.len(), 20);
    }

    /// Losing captures are deferred to the bad-capture stage.
    #[test]
    fn test_bad_captures_come_late() {
        // Qxe5 loses the queen to a defended pawn; pawn takes are fine
        let pos = Position::from_fen(
            "rnb1kbnr/pppp1ppp/8/4p3/3P4/3Q4/PPP1PPPP/RNB1KBNR w KQkq - 0 1",
            false,
        )
        .unwrap();
        let hist = Histories::new();
        let mut picker = MovePicker::new(&pos, PickKind::Main, Move::NONE, 0, -3000);
        let moves = drain(&mut picker, &pos, &hist);
        let qxe5 = crate::notation::parse_uci_move(&pos, "d3e5");
        // d3e5 is not legal here (queen on d3 cannot reach e5); use dxe5 legality instead
        assert!(qxe5.is_none());
        let dxe5 = crate::notation::parse_uci_move(&pos, "d4e5").unwrap();
        assert_eq!(moves[0], dxe5);
    }

    /// In check the picker yields evasions only.
    #[test]
    fn test_evasion_path() {
        let pos = Position::from_fen("4k3/8/8/8/8/8/4r3/4K3 w - - 0 1", false).unwrap();
        let hist = Histories::new();
        let mut picker = MovePicker::new(&pos, PickKind::Main, Move::NONE, 0, -3000);
        let moves = drain(&mut picker, &pos, &hist);
        let legal = crate::movegen::MoveList::generate(&pos, GenType::Evasions);
        assert_eq!(moves.len(), legal.len());
        // Capturing the rook is tried before quiet king steps
        let kxe2 = crate::notation::parse_uci_move(&pos, "e1e2").unwrap();
        assert_eq!(moves[0], kxe2);
    }

    /// Probcut only yields captures meeting the SEE threshold.
    #[test]
    fn test_probcut_threshold() {
        let pos = Position::from_fen(
            "rnb1kbnr/pppp1ppp/8/4p3/3P4/8/PPP1PPPP/RNBQKBNR w KQkq - 0 1",
            false,
        )
        .unwrap();
        let hist = Histories::new();
        let mut picker = MovePicker::new_probcut(&pos, Move::NONE, 1);
        let moves = drain(&mut picker, &pos, &hist);
        for m in &moves {
            assert!(pos.capture_stage(*m));
            assert!(pos.see_ge(*m, 1));
        }
    }

    /// skip_quiets stops quiet stages but still drains bad captures.
    #[test]
    fn test_skip_quiets() {
        let pos = Position::from_fen(
            "rnb1kbnr/pppp1ppp/8/4p3/4P3/5Q2/PPPP1PPP/RNB1KBNR w KQkq - 0 1",
            false,
        )
        .unwrap();
        let hist = Histories::new();
        let conts: [Option<ContinuationKey>; 7] = [None; 7];
        let mut picker = MovePicker::new(&pos, PickKind::Main, Move::NONE, 0, -3000);
        let mut seen = Vec::new();
        while let Some(m) = picker.next(&pos, &hist, &conts) {
            seen.push(m);
            picker.skip_quiets();
        }
        // Qxf7 is a losing capture: it must still be yielded eventually
        let qxf7 = crate::notation::parse_uci_move(&pos, "f3f7").unwrap();
        assert!(seen.contains(&qxf7));
        // But no quiet move may appear after the first skip request
        assert!(seen.iter().skip(1).all(|&m| pos.capture_stage(m)));
    }

    /// Partial insertion sort orders the prefix and partitions on the limit.
    #[test]
    fn test_partial_insertion_sort() {
        let mut moves: ArrayVec<(Move, i32), MAX_MOVES> = ArrayVec::new();
        for (i, score) in [5, -100, 80, 3, -7, 42].iter().enumerate() {
            moves.push((Move::from_raw(i as u16 + 1), *score));
        }
        let end = partial_insertion_sort(&mut moves, 0);
        assert_eq!(end, 4);
        let prefix: Vec<i32> = moves[..end].iter().map(|&(_, s)| s).collect();
        assert_eq!(prefix, vec![80, 42, 5, 3]);
        assert!(moves[end..].iter().all(|&(_, s)| s < 0));
    }
}
