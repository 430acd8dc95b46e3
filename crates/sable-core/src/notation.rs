//! Move text: long algebraic (UCI) and standard algebraic notation.

use crate::bitboard::BitboardIterator;
use crate::movegen::MoveList;
use crate::piece::PieceType;
use crate::position::Position;
use crate::square::Square;
use crate::types::{Move, MoveType};

/// Renders a move in UCI long algebraic notation, given only the Chess960
/// flag. Castling prints as a king move to its destination file in standard
/// chess and as king-takes-rook in Chess960, matching what GUIs send back.
pub fn move_text(m: Move, chess960: bool) -> String {
    if m == Move::NONE {
        return "(none)".to_string();
    }
    if m == Move::NULL {
        return "0000".to_string();
    }

    let org = m.org_sq();
    let mut dst = m.dst_sq();
    if m.type_of() == MoveType::Castling && !chess960 {
        dst = Square::make(if dst > org { 6 } else { 2 }, org.rank());
    }

    let mut out = format!("{org}{dst}");
    if m.type_of() == MoveType::Promotion {
        out.push(m.promotion_type().to_char().to_ascii_lowercase());
    }
    out
}

/// Renders a move in UCI long algebraic notation.
pub fn move_to_uci(pos: &Position, m: Move) -> String {
    move_text(m, pos.is_chess960())
}

/// Parses UCI move text against the legal moves of the position.
pub fn parse_uci_move(pos: &Position, text: &str) -> Option<Move> {
    let text = text.trim();
    MoveList::legal(pos)
        .iter()
        .copied()
        .find(|&m| move_to_uci(pos, m) == text)
}

/// Renders a move in SAN, with disambiguation and check/mate suffixes.
pub fn move_to_san(pos: &mut Position, m: Move) -> String {
    if m.type_of() == MoveType::Castling {
        let side = if m.dst_sq() > m.org_sq() { "O-O" } else { "O-O-O" };
        return format!("{side}{}", check_suffix(pos, m));
    }

    let org = m.org_sq();
    let dst = m.dst_sq();
    let pt = pos.moved_piece(m).piece_type();
    let mut out = String::new();

    if pt == PieceType::Pawn {
        if pos.capture(m) {
            out.push((b'a' + org.file()) as char);
            out.push('x');
        }
        out.push_str(&dst.to_string());
        if m.type_of() == MoveType::Promotion {
            out.push('=');
            out.push(m.promotion_type().to_char());
        }
    } else {
        out.push(pt.to_char());

        // Disambiguate among same-type pieces that can legally reach dst.
        let mut others = 0u64;
        for cand in &MoveList::legal(pos) {
            if cand.dst_sq() == dst
                && cand.org_sq() != org
                && pos.moved_piece(*cand).piece_type() == pt
            {
                others |= cand.org_sq().bb();
            }
        }
        if others != 0 {
            let same_file = BitboardIterator::new(others).any(|s| s.file() == org.file());
            let same_rank = BitboardIterator::new(others).any(|s| s.rank() == org.rank());
            if !same_file {
                out.push((b'a' + org.file()) as char);
            } else if !same_rank {
                out.push((b'1' + org.rank()) as char);
            } else {
                out.push_str(&org.to_string());
            }
        }

        if pos.capture(m) {
            out.push('x');
        }
        out.push_str(&dst.to_string());
    }

    out + &check_suffix(pos, m)
}

fn check_suffix(pos: &mut Position, m: Move) -> String {
    pos.do_move(m);
    let suffix = if pos.in_check() {
        if MoveList::legal(pos).is_empty() { "#" } else { "+" }
    } else {
        ""
    };
    pos.undo_move(m);
    suffix.to_string()
}

/// Normalized form used to compare SAN text: annotations, check marks and
/// the promotion '=' are ignored, zeros read as castling O's.
fn normalize_san(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '+' | '#' | '!' | '?' | '='))
        .map(|c| if c == '0' { 'O' } else { c })
        .collect()
}

/// Parses SAN move text against the legal moves of the position.
pub fn parse_san_move(pos: &mut Position, text: &str) -> Option<Move> {
    let wanted = normalize_san(text.trim());
    if wanted.is_empty() {
        return None;
    }
    let legal: Vec<Move> = MoveList::legal(pos).iter().copied().collect();
    legal
        .into_iter()
        .find(|&m| normalize_san(&move_to_san(pos, m)) == wanted)
}

/// Parses a move given in either notation, trying UCI first.
pub fn parse_move(pos: &mut Position, text: &str) -> Option<Move> {
    parse_uci_move(pos, text).or_else(|| parse_san_move(pos, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Move -> LAN -> Move is the identity on legal moves.
    #[test]
    fn test_uci_round_trip() {
        for fen in [
            crate::position::START_FEN,
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "4k3/P7/8/8/8/8/8/4K3 w - - 0 1",
        ] {
            let pos = Position::from_fen(fen, false).unwrap();
            for m in &MoveList::legal(&pos) {
                let text = move_to_uci(&pos, *m);
                assert_eq!(parse_uci_move(&pos, &text), Some(*m), "{fen} {text}");
            }
        }
    }

    /// SAN parsing accepts the common spellings.
    #[test]
    fn test_san_parsing() {
        let mut pos = Position::startpos();
        let m = parse_san_move(&mut pos, "Nf3").unwrap();
        assert_eq!(move_to_uci(&pos, m), "g1f3");
        let m = parse_san_move(&mut pos, "e4").unwrap();
        assert_eq!(move_to_uci(&pos, m), "e2e4");

        let mut pos = Position::from_fen("4k3/P7/8/8/8/8/8/4K3 w - - 0 1", false).unwrap();
        let m = parse_san_move(&mut pos, "a8=Q+").unwrap();
        assert_eq!(move_to_uci(&pos, m), "a7a8q");
        let m = parse_san_move(&mut pos, "a8N").unwrap();
        assert_eq!(move_to_uci(&pos, m), "a7a8n");

        let mut pos = Position::from_fen("4k3/8/8/8/8/8/8/4K2R w K - 0 1", false).unwrap();
        let m = parse_san_move(&mut pos, "O-O").unwrap();
        assert_eq!(m.type_of(), MoveType::Castling);
        let m = parse_san_move(&mut pos, "0-0").unwrap();
        assert_eq!(m.type_of(), MoveType::Castling);
    }

    /// Disambiguation by file, rank and full square.
    #[test]
    fn test_san_disambiguation() {
        let mut pos =
            Position::from_fen("4k3/8/8/8/8/8/8/R3K2R w - - 0 1", false).unwrap();
        let m = parse_uci_move(&pos, "a1d1").unwrap();
        assert_eq!(move_to_san(&mut pos, m), "Rad1");

        let mut pos = Position::from_fen("4k3/8/8/8/8/8/8/RK5R b - - 0 1", false).unwrap();
        let any = parse_san_move(&mut pos, "Kd8");
        assert!(any.is_some());
    }

    /// Mate suffix is produced and parsed.
    #[test]
    fn test_san_mate_suffix() {
        let mut pos = Position::from_fen("4k3/8/4K3/8/8/8/8/6R1 w - - 0 1", false).unwrap();
        let m = parse_uci_move(&pos, "g1g8").unwrap();
        assert_eq!(move_to_san(&mut pos, m), "Rg8#");
        assert_eq!(parse_san_move(&mut pos, "Rg8#"), Some(m));
        assert_eq!(parse_san_move(&mut pos, "Rg8"), Some(m));
    }
}
