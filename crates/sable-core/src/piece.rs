use std::fmt;
use std::ops::Not;

/// Side to move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    White = 0,
    Black = 1,
}

impl Color {
    #[inline]
    pub fn from_u8_unchecked(index: u8) -> Color {
        debug_assert!(index < 2);
        unsafe { std::mem::transmute(index) }
    }

    /// Forward direction for this color's pawns, as a square step.
    #[inline]
    pub const fn forward(self) -> i8 {
        match self {
            Color::White => 8,
            Color::Black => -8,
        }
    }
}

impl Not for Color {
    type Output = Color;

    #[inline]
    fn not(self) -> Color {
        unsafe { std::mem::transmute(self as u8 ^ 1) }
    }
}

/// Piece kind, colorless.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PieceType {
    Pawn = 0,
    Knight = 1,
    Bishop = 2,
    Rook = 3,
    Queen = 4,
    King = 5,
}

/// Piece values used by exchange evaluation and move ordering.
pub const PIECE_VALUE: [i32; 6] = [208, 781, 825, 1276, 2538, 0];

pub const VALUE_PAWN: i32 = PIECE_VALUE[PieceType::Pawn as usize];
pub const VALUE_QUEEN: i32 = PIECE_VALUE[PieceType::Queen as usize];

impl PieceType {
    #[inline]
    pub fn from_u8_unchecked(index: u8) -> PieceType {
        debug_assert!(index < 6);
        unsafe { std::mem::transmute(index) }
    }

    #[inline]
    pub const fn value(self) -> i32 {
        PIECE_VALUE[self as usize]
    }

    /// Character used in FEN and SAN, uppercase.
    pub const fn to_char(self) -> char {
        match self {
            PieceType::Pawn => 'P',
            PieceType::Knight => 'N',
            PieceType::Bishop => 'B',
            PieceType::Rook => 'R',
            PieceType::Queen => 'Q',
            PieceType::King => 'K',
        }
    }

    pub fn from_char(c: char) -> Option<PieceType> {
        match c.to_ascii_uppercase() {
            'P' => Some(PieceType::Pawn),
            'N' => Some(PieceType::Knight),
            'B' => Some(PieceType::Bishop),
            'R' => Some(PieceType::Rook),
            'Q' => Some(PieceType::Queen),
            'K' => Some(PieceType::King),
            _ => None,
        }
    }
}

/// A colored piece, `color * 6 + piece_type`, with a trailing empty marker
/// so board squares can be stored in a plain array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Piece {
    WPawn = 0,
    WKnight,
    WBishop,
    WRook,
    WQueen,
    WKing,
    BPawn,
    BKnight,
    BBishop,
    BRook,
    BQueen,
    BKing,
    None = 12,
}

impl Piece {
    #[inline]
    pub const fn make(color: Color, pt: PieceType) -> Piece {
        unsafe { std::mem::transmute(color as u8 * 6 + pt as u8) }
    }

    #[inline]
    pub fn from_u8_unchecked(index: u8) -> Piece {
        debug_assert!(index <= 12);
        unsafe { std::mem::transmute(index) }
    }

    #[inline]
    pub fn color(self) -> Color {
        debug_assert!(self != Piece::None);
        Color::from_u8_unchecked(self as u8 / 6)
    }

    #[inline]
    pub fn piece_type(self) -> PieceType {
        debug_assert!(self != Piece::None);
        PieceType::from_u8_unchecked(self as u8 % 6)
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        matches!(self, Piece::None)
    }

    /// FEN character: uppercase for white, lowercase for black.
    pub fn to_char(self) -> char {
        let c = self.piece_type().to_char();
        match self.color() {
            Color::White => c,
            Color::Black => c.to_ascii_lowercase(),
        }
    }

    pub fn from_char(c: char) -> Option<Piece> {
        let pt = PieceType::from_char(c)?;
        let color = if c.is_ascii_uppercase() {
            Color::White
        } else {
            Color::Black
        };
        Some(Piece::make(color, pt))
    }
}

impl fmt::Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_make_and_split() {
        for color in [Color::White, Color::Black] {
            for i in 0..6 {
                let pt = PieceType::from_u8_unchecked(i);
                let piece = Piece::make(color, pt);
                assert_eq!(piece.color(), color);
                assert_eq!(piece.piece_type(), pt);
            }
        }
        assert_eq!(!Color::White, Color::Black);
        assert_eq!(!Color::Black, Color::White);
    }

    #[test]
    fn test_piece_chars() {
        assert_eq!(Piece::make(Color::White, PieceType::Knight).to_char(), 'N');
        assert_eq!(Piece::make(Color::Black, PieceType::Queen).to_char(), 'q');
        assert_eq!(Piece::from_char('r'), Some(Piece::BRook));
        assert_eq!(Piece::from_char('K'), Some(Piece::WKing));
        assert_eq!(Piece::from_char('x'), None);
    }
}
