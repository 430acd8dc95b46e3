//! Syzygy endgame tablebases: WDL and DTZ probing up to 7 pieces.
//!
//! Table files are discovered at option-set time and memory-mapped lazily on
//! first probe. A probe canonicalizes the position (color, file and rank
//! flips plus triangle mapping), encodes it into a single index through
//! binomial-coefficient positional encoding, and decodes the value from the
//! recursive-pairing Huffman stream.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex};

use memmap2::Mmap;

use crate::bitboard::BitboardIterator;
use crate::movegen::MoveList;
use crate::piece::{Color, PieceType};
use crate::position::Position;
use crate::search::root_move::RootMove;
use crate::square::Square;
use crate::types::{MAX_PLY, VALUE_DRAW, VALUE_MATE, Value};
use crate::zobrist;

/// Maximum number of pieces in any supported table.
pub const TB_PIECES: usize = 7;

/// Rank scale for DTZ-ranked root moves, large enough for any real DTZ.
const MAX_DTZ: i32 = 1 << 18;

const WDL_MAGIC: [u8; 4] = [0xD7, 0x66, 0x0C, 0xA5];
const DTZ_MAGIC: [u8; 4] = [0x71, 0xE8, 0x23, 0x5D];

// Per-table flags; all but SingleValue refer to DTZ tables.
const FLAG_AC: u8 = 1;
const FLAG_MAPPED: u8 = 2;
const FLAG_WIN_PLIES: u8 = 4;
const FLAG_LOSS_PLIES: u8 = 8;
const FLAG_WIDE: u8 = 16;
const FLAG_SINGLE_VALUE: u8 = 128;

/// Win/draw/loss score modulo the fifty-move rule, side to move's view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i8)]
pub enum Wdl {
    Loss = -2,
    BlessedLoss = -1,
    Draw = 0,
    CursedWin = 1,
    Win = 2,
}

impl Wdl {
    fn from_i32(v: i32) -> Wdl {
        match v {
            -2 => Wdl::Loss,
            -1 => Wdl::BlessedLoss,
            0 => Wdl::Draw,
            1 => Wdl::CursedWin,
            _ => Wdl::Win,
        }
    }

    fn negate(self) -> Wdl {
        Wdl::from_i32(-(self as i32))
    }
}

/// Outcome of one table access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProbeState {
    Ok,
    /// The table or a dependency is missing or unreadable.
    Fail,
    /// The table stores the other side; caller must flip via a 1-ply search.
    ChangeAc,
    /// The best move zeroes the rule-50 counter; DTZ must be derived.
    BestMoveZeroing,
}

/// DTZ of the move before a zeroing move, recovered from the WDL score.
fn dtz_before_zeroing(wdl: Wdl) -> i32 {
    match wdl {
        Wdl::Win => 1,
        Wdl::CursedWin => 101,
        Wdl::BlessedLoss => -101,
        Wdl::Loss => -1,
        Wdl::Draw => 0,
    }
}

fn sign_of(v: i32) -> i32 {
    v.signum()
}

// File piece codes: nibble 1-6 = white pawn..king, 9-14 = black.
fn code_of(color: Color, pt: PieceType) -> u8 {
    (pt as u8 + 1) | if color == Color::Black { 8 } else { 0 }
}

fn code_type(code: u8) -> PieceType {
    PieceType::from_u8_unchecked((code & 7) - 1)
}

fn code_color(code: u8) -> Color {
    if code & 8 != 0 { Color::Black } else { Color::White }
}

fn off_a1h8(sq: usize) -> i32 {
    (sq as i32 >> 3) - (sq as i32 & 7)
}

fn flip_file(sq: usize) -> usize {
    sq ^ 0x07
}

fn flip_rank(sq: usize) -> usize {
    sq ^ 0x38
}

fn edge_distance(file: usize) -> usize {
    file.min(7 - file)
}

/// Material key of one side arrangement, matching `Position::material_key`.
fn material_key(counts: &[(Color, PieceType, u8)]) -> u64 {
    let mut key = 0;
    for &(color, pt, count) in counts {
        let piece = crate::piece::Piece::make(color, pt);
        for i in 0..count {
            key ^= zobrist::PIECE_SQUARE[piece as usize][i as usize];
        }
    }
    key
}

/// Static encoding maps, built once.
struct Maps {
    /// Pawn squares a2-h7 ranked toward the edge and low ranks.
    pawns_map: [usize; 64],
    /// Squares strictly below the a1-h8 diagonal mapped to 0..27.
    b1h1h7_map: [usize; 64],
    /// The a1-d1-d4 triangle mapped to 0..9, diagonal squares last.
    a1d1d4_map: [usize; 64],
    /// All 462 legal two-king placements with the first in the triangle.
    kk_map: [[u64; 64]; 10],
    /// Binomial[k][n]: ways to choose k squares among n.
    binomial: [[u64; 64]; 6],
    lead_pawn_idx: [[u64; 64]; 6],
    lead_pawn_size: [[u64; 4]; 6],
}

static MAPS: LazyLock<Maps> = LazyLock::new(|| {
    let mut maps = Maps {
        pawns_map: [0; 64],
        b1h1h7_map: [0; 64],
        a1d1d4_map: [0; 64],
        kk_map: [[0; 64]; 10],
        binomial: [[0; 64]; 6],
        lead_pawn_idx: [[0; 64]; 6],
        lead_pawn_size: [[0; 4]; 6],
    };

    let mut code = 0;
    for s in 0..64 {
        if off_a1h8(s) < 0 {
            maps.b1h1h7_map[s] = code;
            code += 1;
        }
    }

    let mut code = 0;
    let mut diagonal = Vec::new();
    for s in 0..=27 {
        if s & 7 <= 3 {
            if off_a1h8(s) < 0 {
                maps.a1d1d4_map[s] = code;
                code += 1;
            } else if off_a1h8(s) == 0 {
                diagonal.push(s);
            }
        }
    }
    for s in diagonal {
        maps.a1d1d4_map[s] = code;
        code += 1;
    }

    // Two-king placements; pairs on the long diagonal are encoded last.
    let mut code = 0u64;
    let mut both_on_diagonal = Vec::new();
    for idx in 0..10 {
        for s1 in 0..=27usize {
            if s1 & 7 <= 3 && maps.a1d1d4_map[s1] == idx && (idx != 0 || s1 == 1) {
                for s2 in 0..64usize {
                    let k1 = Square::from_u8_unchecked(s1 as u8);
                    if (crate::bitboard::king_attacks(k1) | k1.bb()) & (1u64 << s2) != 0 {
                        continue;
                    }
                    if off_a1h8(s1) == 0 && off_a1h8(s2) > 0 {
                        continue;
                    }
                    if off_a1h8(s1) == 0 && off_a1h8(s2) == 0 {
                        both_on_diagonal.push((idx, s2));
                    } else {
                        maps.kk_map[idx][s2] = code;
                        code += 1;
                    }
                }
            }
        }
    }
    for (idx, s2) in both_on_diagonal {
        maps.kk_map[idx][s2] = code;
        code += 1;
    }

    maps.binomial[0][0] = 1;
    for n in 1..64 {
        for k in 0..6.min(n + 1) {
            maps.binomial[k][n] = (if k > 0 { maps.binomial[k - 1][n - 1] } else { 0 })
                + (if k < n { maps.binomial[k][n - 1] } else { 0 });
        }
    }

    // Leading-pawn encodings, one sub-table per file a-d.
    let mut code: i64 = 47;
    for lead_pawn_count in 1..=5usize {
        for file in 0..4usize {
            let mut idx = 0u64;
            for rank in 1..=6usize {
                let s = rank * 8 + file;
                if lead_pawn_count == 1 {
                    maps.pawns_map[s] = code as usize;
                    code -= 1;
                    maps.pawns_map[flip_file(s)] = code as usize;
                    code -= 1;
                }
                maps.lead_pawn_idx[lead_pawn_count][s] = idx;
                idx += maps.binomial[lead_pawn_count - 1][maps.pawns_map[s]];
            }
            maps.lead_pawn_size[lead_pawn_count][file] = idx;
        }
    }
    maps
});

// ---- low-level little/big-endian reads out of the mapping ----

fn read_u8(data: &[u8], off: usize) -> u8 {
    data[off]
}

fn read_u16_le(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn read_u32_le(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn read_u32_be(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn read_u64_be(data: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[off..off + 8]);
    u64::from_be_bytes(bytes)
}

/// Indexing information for one (side, file) sub-table.
#[derive(Clone, Default)]
struct PairsData {
    flags: u8,
    max_sym_len: u8,
    min_sym_len: u8,
    block_count: u32,
    block_size: usize,
    span: usize,
    /// Offsets into the mapping.
    lowest_sym_off: usize,
    btree_off: usize,
    block_length_off: usize,
    block_length_size: u32,
    sparse_index_off: usize,
    sparse_index_size: usize,
    data_off: usize,
    /// base64[l - minSymLen]: 64-bit padded lowest symbol of length l.
    base64: Vec<u64>,
    /// Number of values (minus one) a symbol expands to.
    sym_len: Vec<u8>,
    pieces: [u8; TB_PIECES],
    group_idx: [u64; TB_PIECES + 1],
    group_len: [i32; TB_PIECES + 1],
    map_idx: [u16; 4],
}

impl PairsData {
    fn btree_left(&self, data: &[u8], sym: usize) -> usize {
        let off = self.btree_off + 3 * sym;
        (((data[off + 1] as usize & 0xF) << 8) | data[off] as usize) & 0xFFF
    }

    fn btree_right(&self, data: &[u8], sym: usize) -> usize {
        let off = self.btree_off + 3 * sym;
        ((data[off + 2] as usize) << 4) | (data[off + 1] as usize >> 4)
    }
}

/// One mapped table file with its decoded indexing blocks.
struct MappedTable {
    mmap: Mmap,
    /// `[side][file]`; one side for DTZ, one file when pawnless.
    items: Vec<Vec<PairsData>>,
    /// DTZ score remap area offset.
    map_off: usize,
}

/// Shared description of a WDL/DTZ table pair for one material signature.
struct TbTable {
    is_wdl: bool,
    key: [u64; 2],
    piece_count: u8,
    has_pawns: bool,
    has_unique_pieces: bool,
    /// Lead-color pawn count first.
    pawn_count: [u8; 2],
    /// Canonical piece-code name, e.g. "KRPvKN".
    name: String,

    ready: AtomicBool,
    loader: Mutex<()>,
    mapped: std::cell::UnsafeCell<Option<MappedTable>>,
}

unsafe impl Sync for TbTable {}
unsafe impl Send for TbTable {}

impl TbTable {
    fn new(name: &str, is_wdl: bool) -> TbTable {
        // Decode the code string: pieces of the stronger side before 'v'.
        let mut counts: Vec<(Color, PieceType, u8)> = Vec::new();
        let mut color = Color::White;
        for c in name.chars() {
            if c == 'v' {
                color = Color::Black;
                continue;
            }
            let pt = PieceType::from_char(c).unwrap();
            if let Some(entry) =
                counts.iter_mut().find(|(cl, t, _)| *cl == color && *t == pt)
            {
                entry.2 += 1;
            } else {
                counts.push((color, pt, 1));
            }
        }

        let count =
            |color: Color, pt: PieceType| -> u8 {
                counts
                    .iter()
                    .find(|(cl, t, _)| *cl == color && *t == pt)
                    .map_or(0, |e| e.2)
            };

        let piece_count: u8 = counts.iter().map(|e| e.2).sum();
        let white_pawns = count(Color::White, PieceType::Pawn);
        let black_pawns = count(Color::Black, PieceType::Pawn);
        let has_pawns = white_pawns + black_pawns > 0;

        let mut has_unique_pieces = false;
        for &(_, pt, n) in &counts {
            if pt != PieceType::King && n == 1 {
                has_unique_pieces = true;
            }
        }

        // The leading color is the one with fewer pawns, for compression.
        let lead_white =
            black_pawns == 0 || (white_pawns != 0 && black_pawns >= white_pawns);
        let pawn_count = if lead_white {
            [white_pawns, black_pawns]
        } else {
            [black_pawns, white_pawns]
        };

        let key_white = material_key(&counts);
        let flipped: Vec<(Color, PieceType, u8)> =
            counts.iter().map(|&(c, t, n)| (!c, t, n)).collect();
        let key_black = material_key(&flipped);

        TbTable {
            is_wdl,
            key: [key_white, key_black],
            piece_count,
            has_pawns,
            has_unique_pieces,
            pawn_count,
            name: name.to_string(),
            ready: AtomicBool::new(false),
            loader: Mutex::new(()),
            mapped: std::cell::UnsafeCell::new(None),
        }
    }

    fn sides(&self) -> usize {
        if self.is_wdl && self.key[0] != self.key[1] { 2 } else { 1 }
    }

    fn max_file(&self) -> usize {
        if self.has_pawns { 3 } else { 0 }
    }

    fn get<'a>(&self, mapped: &'a MappedTable, ac: usize, file: usize) -> &'a PairsData {
        let side = ac % self.sides();
        let file = if self.has_pawns { file } else { 0 };
        &mapped.items[side][file]
    }

    /// Maps the file and decodes the index blocks on first access.
    ///
    /// The ready flag is acquire/release so no thread observes a partially
    /// initialized mapping; the loader mutex serializes the slow path.
    fn mapped_data(&self, paths: &[PathBuf]) -> Option<&MappedTable> {
        if !self.ready.load(Ordering::Acquire) {
            let _guard = self.loader.lock().unwrap();
            if !self.ready.load(Ordering::Relaxed) {
                let loaded = self.load(paths);
                unsafe { *self.mapped.get() = loaded };
                self.ready.store(true, Ordering::Release);
            }
        }
        unsafe { (*self.mapped.get()).as_ref() }
    }

    fn load(&self, paths: &[PathBuf]) -> Option<MappedTable> {
        let extension = if self.is_wdl { "rtbw" } else { "rtbz" };
        let filename = format!("{}.{extension}", self.name);
        let file = paths.iter().find_map(|dir| {
            std::fs::File::open(dir.join(&filename)).ok()
        })?;

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(err) => {
                eprintln!("Could not mmap tablebase file {filename}: {err}");
                std::process::exit(1);
            }
        };

        if mmap.len() % 64 != 16 {
            eprintln!("Corrupt tablebase file {filename}");
            std::process::exit(1);
        }

        let magic = if self.is_wdl { WDL_MAGIC } else { DTZ_MAGIC };
        if mmap[..4] != magic {
            eprintln!("Corrupted table in file {filename}");
            std::process::exit(1);
        }

        Some(self.decode(mmap))
    }

    /// Walks the post-magic layout: per-file piece orders and group sizes,
    /// then symbol books, DTZ maps, sparse indices, block lengths and the
    /// Huffman data itself.
    fn decode(&self, mmap: Mmap) -> MappedTable {
        let maps = &*MAPS;
        let data: &[u8] = &mmap;
        let mut off = 4; // past the magic

        let split = data[off] & 1 != 0;
        debug_assert_eq!(self.has_pawns, data[off] & 2 != 0);
        debug_assert_eq!(self.key[0] != self.key[1], split);
        off += 1;

        let sides = self.sides();
        let max_file = self.max_file();
        let pp = self.has_pawns && self.pawn_count[1] != 0;

        let mut items: Vec<Vec<PairsData>> =
            vec![vec![PairsData::default(); max_file + 1]; sides];

        for file in 0..=max_file {
            let order = [
                [
                    (data[off] & 0xF) as usize,
                    if pp { (data[off + 1] & 0xF) as usize } else { 0xF },
                ],
                [
                    (data[off] >> 4) as usize,
                    if pp { (data[off + 1] >> 4) as usize } else { 0xF },
                ],
            ];
            off += 1 + pp as usize;

            for k in 0..self.piece_count as usize {
                for (i, side) in items.iter_mut().enumerate() {
                    side[file].pieces[k] =
                        if i == 1 { data[off] >> 4 } else { data[off] & 0xF };
                }
                off += 1;
            }

            for (i, side) in items.iter_mut().enumerate() {
                set_groups(self, &mut side[file], &order[i], file, maps);
            }
        }

        off += off & 1; // word alignment

        for file in 0..=max_file {
            for side in items.iter_mut() {
                off = set_sizes(&mut side[file], data, off);
            }
        }

        // DTZ score remap tables.
        let map_off = off;
        if !self.is_wdl {
            for file in 0..=max_file {
                let flags = items[0][file].flags;
                if flags & FLAG_MAPPED != 0 {
                    if flags & FLAG_WIDE != 0 {
                        off += off & 1;
                        for idx in items[0][file].map_idx.iter_mut() {
                            *idx = ((off - map_off) / 2 + 1) as u16;
                            off += 2 * read_u16_le(data, off) as usize + 2;
                        }
                    } else {
                        for idx in items[0][file].map_idx.iter_mut() {
                            *idx = (off - map_off + 1) as u16;
                            off += data[off] as usize + 1;
                        }
                    }
                }
            }
            off += off & 1;
        }

        for file in 0..=max_file {
            for side in items.iter_mut() {
                side[file].sparse_index_off = off;
                off += side[file].sparse_index_size * 6;
            }
        }

        for file in 0..=max_file {
            for side in items.iter_mut() {
                side[file].block_length_off = off;
                off += side[file].block_length_size as usize * 2;
            }
        }

        for file in 0..=max_file {
            for side in items.iter_mut() {
                off = (off + 0x3F) & !0x3F; // 64-byte alignment
                side[file].data_off = off;
                off += side[file].block_count as usize * side[file].block_size;
            }
        }

        MappedTable { mmap, items, map_off }
    }
}

/// Groups pieces that are encoded together and computes the per-group index
/// multipliers. KRKN gives groups (3, 1); KPPKP gives P + PP + K + K.
fn set_groups(table: &TbTable, d: &mut PairsData, order: &[usize; 2], file: usize, maps: &Maps) {
    let mut n = 0;
    let mut first_len: i32 = if table.has_pawns {
        0
    } else if table.has_unique_pieces {
        3
    } else {
        2
    };
    d.group_len[0] = 1;

    for i in 1..table.piece_count as usize {
        first_len -= 1;
        if first_len > 0 || d.pieces[i] == d.pieces[i - 1] {
            d.group_len[n] += 1;
        } else {
            n += 1;
            d.group_len[n] = 1;
        }
    }
    n += 1;
    d.group_len[n] = 0;

    let pp = table.has_pawns && table.pawn_count[1] != 0;
    let mut i = if pp { 2 } else { 1 };
    let mut free_len =
        64 - d.group_len[0] as u64 - if pp { d.group_len[1] as u64 } else { 0 };
    let mut idx = 1u64;

    let mut k = 0;
    while k == order[0] || k == order[1] || i < n {
        if k == order[0] {
            // Leading pawns or pieces.
            d.group_idx[0] = idx;
            idx *= if table.has_pawns {
                maps.lead_pawn_size[d.group_len[0] as usize][file]
            } else if table.has_unique_pieces {
                31332
            } else {
                462
            };
        } else if k == order[1] {
            // Remaining pawns.
            d.group_idx[1] = idx;
            idx *= maps.binomial[d.group_len[1] as usize][48 - d.group_len[0] as usize];
        } else {
            // Remaining pieces.
            d.group_idx[i] = idx;
            idx *= maps.binomial[d.group_len[i] as usize][free_len as usize];
            free_len -= d.group_len[i] as u64;
            i += 1;
        }
        k += 1;
    }
    d.group_idx[n] = idx;
}

/// Expands the recursive-pairing tree to compute per-symbol value counts.
fn set_symlen(d: &mut PairsData, data: &[u8], sym: usize, visited: &mut [bool]) -> u8 {
    visited[sym] = true;

    let right = d.btree_right(data, sym);
    if right == 0xFFF {
        return 0;
    }

    let left = d.btree_left(data, sym);
    if !visited[left] {
        d.sym_len[left] = set_symlen(d, data, left, visited);
    }
    if !visited[right] {
        d.sym_len[right] = set_symlen(d, data, right, visited);
    }

    d.sym_len[left] + d.sym_len[right] + 1
}

/// Parses the symbol book header of one sub-table; returns the new offset.
fn set_sizes(d: &mut PairsData, data: &[u8], mut off: usize) -> usize {
    d.flags = data[off];
    off += 1;

    if d.flags & FLAG_SINGLE_VALUE != 0 {
        d.block_count = 0;
        d.block_length_size = 0;
        d.span = 0;
        d.sparse_index_size = 0;
        d.min_sym_len = data[off]; // stores the single value
        off += 1;
        return off;
    }

    // The last group index is the table size.
    let tb_size = {
        let terminator = d.group_len.iter().position(|&l| l == 0).unwrap();
        d.group_idx[terminator]
    };

    d.block_size = 1usize << data[off];
    off += 1;
    d.span = 1usize << data[off];
    off += 1;
    d.sparse_index_size = (tb_size as usize + d.span - 1) / d.span;
    let padding = read_u8(data, off);
    off += 1;
    d.block_count = read_u32_le(data, off);
    off += 4;
    // Padded so the sparse index never points past the end.
    d.block_length_size = d.block_count + padding as u32;
    d.max_sym_len = data[off];
    off += 1;
    d.min_sym_len = data[off];
    off += 1;
    d.lowest_sym_off = off;
    let base64_len = (d.max_sym_len - d.min_sym_len + 1) as usize;
    d.base64 = vec![0u64; base64_len];

    // Canonical Huffman: longer symbols have lower numeric values, so the
    // padded base values satisfy base64[i] >= base64[i+1].
    for i in (1..base64_len).rev() {
        d.base64[i - 1] = (d.base64[i]
            + read_u16_le(data, d.lowest_sym_off + 2 * (i - 1)) as u64
            - read_u16_le(data, d.lowest_sym_off + 2 * i) as u64)
            / 2;
    }
    for i in 0..base64_len {
        d.base64[i] <<= 64 - i as u32 - d.min_sym_len as u32;
    }

    off += base64_len * 2;
    let sym_count = read_u16_le(data, off) as usize;
    off += 2;
    d.btree_off = off;
    d.sym_len = vec![0u8; sym_count];

    let mut visited = vec![false; sym_count];
    for sym in 0..sym_count {
        if !visited[sym] {
            d.sym_len[sym] = set_symlen(d, data, sym, &mut visited);
        }
    }

    off + sym_count * 3 + (sym_count & 1)
}

/// Decodes the value at `idx` from the Huffman stream: jump through the
/// sparse index, walk block lengths into range, then expand symbols.
fn decompress_pairs(d: &PairsData, data: &[u8], idx: u64) -> i32 {
    if d.flags & FLAG_SINGLE_VALUE != 0 {
        return d.min_sym_len as i32;
    }

    let k = (idx / d.span as u64) as usize;
    let mut block = read_u32_le(data, d.sparse_index_off + 6 * k) as usize;
    let mut offset = read_u16_le(data, d.sparse_index_off + 6 * k + 4) as i64;

    let diff = (idx % d.span as u64) as i64 - d.span as i64 / 2;
    offset += diff;

    let block_len = |b: usize| read_u16_le(data, d.block_length_off + 2 * b) as i64;

    while offset < 0 {
        block -= 1;
        offset += block_len(block) + 1;
    }
    while offset > block_len(block) {
        offset -= block_len(block) + 1;
        block += 1;
    }

    let mut ptr = d.data_off + block * d.block_size;
    let mut buf64 = read_u64_be(data, ptr);
    ptr += 8;
    let mut buf64_size = 64i32;
    let mut sym;

    loop {
        let mut len = 0usize;
        while buf64 < d.base64[len] {
            len += 1;
        }

        // Symbols of one length are consecutive integers.
        sym = ((buf64 - d.base64[len]) >> (64 - len as u32 - d.min_sym_len as u32)) as usize;
        sym += read_u16_le(data, d.lowest_sym_off + 2 * len) as usize;

        if offset < d.sym_len[sym] as i64 + 1 {
            break;
        }

        offset -= d.sym_len[sym] as i64 + 1;
        let len = len as i32 + d.min_sym_len as i32;
        buf64 <<= len;
        buf64_size -= len;

        if buf64_size <= 32 {
            buf64_size += 32;
            buf64 |= (read_u32_be(data, ptr) as u64) << (64 - buf64_size);
            ptr += 4;
        }
    }

    // Expand the pairing tree down to the leaf holding our value.
    while d.sym_len[sym] != 0 {
        let left = d.btree_left(data, sym);
        if offset < d.sym_len[left] as i64 + 1 {
            sym = left;
        } else {
            offset -= d.sym_len[left] as i64 + 1;
            sym = d.btree_right(data, sym);
        }
    }

    d.btree_left(data, sym) as i32
}

/// Remaps a decoded DTZ value and converts it to plies.
fn map_dtz_score(
    table: &TbTable,
    mapped: &MappedTable,
    file: usize,
    mut value: i32,
    wdl: Wdl,
) -> i32 {
    const WDL_MAP: [usize; 5] = [1, 3, 0, 2, 0];

    let d = &mapped.items[0][if table.has_pawns { file } else { 0 }];
    let flags = d.flags;
    let data: &[u8] = &mapped.mmap;

    if flags & FLAG_MAPPED != 0 {
        let slot = WDL_MAP[(wdl as i32 + 2) as usize];
        if flags & FLAG_WIDE != 0 {
            value = read_u16_le(
                data,
                mapped.map_off + 2 * (d.map_idx[slot] as usize + value as usize),
            ) as i32;
        } else {
            value = data[mapped.map_off + d.map_idx[slot] as usize + value as usize] as i32;
        }
    }

    // Tables may store moves instead of plies.
    if (wdl == Wdl::Win && flags & FLAG_WIN_PLIES == 0)
        || (wdl == Wdl::Loss && flags & FLAG_LOSS_PLIES == 0)
        || wdl == Wdl::CursedWin
        || wdl == Wdl::BlessedLoss
    {
        value *= 2;
    }

    value + 1
}

/// Encodes the position into an index and reads the table.
fn do_probe_table(
    pos: &Position,
    table: &TbTable,
    mapped: &MappedTable,
    wdl: Wdl,
    result: &mut ProbeState,
) -> i32 {
    let maps = &*MAPS;
    let data: &[u8] = &mapped.mmap;

    let mut squares = [0usize; TB_PIECES];
    let mut pieces = [0u8; TB_PIECES];
    let mut size = 0usize;
    let mut lead_pawn_count = 0usize;
    let mut tb_file = 0usize;

    // Symmetric tables store only white to move; always probe them with the
    // stronger side mapped to white.
    let symmetric_black_to_move =
        table.key[0] == table.key[1] && pos.active_color() == Color::Black;
    let black_stronger = pos.material_key() != table.key[0];

    let flip = symmetric_black_to_move || black_stronger;
    let color_flip = if flip { 8u8 } else { 0 };
    let square_flip = if flip { 0x38usize } else { 0 };
    let ac = (flip as u8) ^ pos.active_color() as u8;

    let mut lead_pawns_bb = 0u64;
    if table.has_pawns {
        // Pawns come first in every sub-table, colored as the leading side.
        let first = table.get(mapped, 0, 0);
        let pc = first.pieces[0] ^ color_flip;
        debug_assert_eq!(code_type(pc), PieceType::Pawn);

        lead_pawns_bb = pos.pieces_colored(code_color(pc), PieceType::Pawn);
        for sq in BitboardIterator::new(lead_pawns_bb) {
            squares[size] = sq as usize ^ square_flip;
            size += 1;
        }
        lead_pawn_count = size;

        // The leading pawn is the edge-most one with the lowest rank.
        let mut best = 0;
        for i in 1..lead_pawn_count {
            if maps.pawns_map[squares[i]] > maps.pawns_map[squares[best]] {
                best = i;
            }
        }
        squares.swap(0, best);
        tb_file = edge_distance(squares[0] & 7);
    }

    // DTZ tables are single-sided.
    if !table.is_wdl {
        let d = table.get(mapped, ac as usize, tb_file);
        let ac_matches =
            (d.flags & FLAG_AC) == ac || (!table.has_pawns && table.key[0] == table.key[1]);
        if !ac_matches {
            *result = ProbeState::ChangeAc;
            return 0;
        }
    }

    let mut rest = pos.occupied() ^ lead_pawns_bb;
    while rest != 0 {
        let sq = crate::bitboard::pop_lsb(&mut rest);
        squares[size] = sq as usize ^ square_flip;
        let piece = pos.piece_on(sq);
        pieces[size] = code_of(piece.color(), piece.piece_type()) ^ color_flip;
        size += 1;
    }
    debug_assert!(size >= 2);

    let d = table.get(mapped, ac as usize, tb_file);

    // Reorder to the stored sequence, which was chosen for compression.
    for i in lead_pawn_count..size - 1 {
        for j in i + 1..size {
            if d.pieces[i] == pieces[j] {
                pieces.swap(i, j);
                squares.swap(i, j);
                break;
            }
        }
    }

    // Map the lead piece into the A1-D4 triangle.
    if squares[0] & 7 > 3 {
        for s in squares.iter_mut().take(size) {
            *s = flip_file(*s);
        }
    }

    let mut idx;
    if table.has_pawns {
        idx = maps.lead_pawn_idx[lead_pawn_count][squares[0]];
        // Remaining lead pawns in ascending PawnsMap order.
        squares[1..lead_pawn_count].sort_by_key(|&s| maps.pawns_map[s]);
        for i in 1..lead_pawn_count {
            idx += maps.binomial[i][maps.pawns_map[squares[i]]];
        }
    } else {
        // Pawnless: put the lead piece under rank 5, then under the long
        // diagonal, and encode the leading group.
        if squares[0] >> 3 > 3 {
            for s in squares.iter_mut().take(size) {
                *s = flip_rank(*s);
            }
        }

        for i in 0..d.group_len[0] as usize {
            if off_a1h8(squares[i]) == 0 {
                continue;
            }
            if off_a1h8(squares[i]) > 0 {
                // Diagonal flip: A3 -> C1.
                for s in squares.iter_mut().take(size).skip(i) {
                    *s = ((*s >> 3) | (*s << 3)) & 0x3F;
                }
            }
            break;
        }

        if table.has_unique_pieces {
            let adjust1 = (squares[1] > squares[0]) as u64;
            let adjust2 = (squares[2] > squares[0]) as u64 + (squares[2] > squares[1]) as u64;

            idx = if off_a1h8(squares[0]) != 0 {
                (maps.a1d1d4_map[squares[0]] as u64 * 63 + (squares[1] as u64 - adjust1)) * 62
                    + (squares[2] as u64 - adjust2)
            } else if off_a1h8(squares[1]) != 0 {
                (6 * 63 + (squares[0] as u64 >> 3) * 28 + maps.b1h1h7_map[squares[1]] as u64)
                    * 62
                    + (squares[2] as u64 - adjust2)
            } else if off_a1h8(squares[2]) != 0 {
                6 * 63 * 62
                    + 4 * 28 * 62
                    + (squares[0] as u64 >> 3) * 7 * 28
                    + ((squares[1] as u64 >> 3) - adjust1) * 28
                    + maps.b1h1h7_map[squares[2]] as u64
            } else {
                6 * 63 * 62
                    + 4 * 28 * 62
                    + 4 * 7 * 28
                    + (squares[0] as u64 >> 3) * 7 * 6
                    + ((squares[1] as u64 >> 3) - adjust1) * 6
                    + ((squares[2] as u64 >> 3) - adjust2)
            };
        } else {
            idx = maps.kk_map[maps.a1d1d4_map[squares[0]]][squares[1]];
        }
    }

    idx *= d.group_idx[0];

    // Encode the remaining groups by sorted square, mapping each square
    // down past the ones already encoded.
    let mut group_base = d.group_len[0] as usize;
    let mut pawns_remaining = table.has_pawns && table.pawn_count[1] != 0;
    let mut next = 1;
    while d.group_len[next] != 0 {
        let group_len = d.group_len[next] as usize;
        squares[group_base..group_base + group_len].sort_unstable();

        let mut n = 0u64;
        for i in 0..group_len {
            let sq = squares[group_base + i];
            let adjust =
                squares[..group_base].iter().filter(|&&prev| sq > prev).count();
            n += maps.binomial[i + 1]
                [sq - adjust - if pawns_remaining { 8 } else { 0 }];
        }

        pawns_remaining = false;
        idx += n * d.group_idx[next];
        group_base += group_len;
        next += 1;
    }

    let value = decompress_pairs(d, data, idx);
    *result = ProbeState::Ok;

    if table.is_wdl {
        value - 2
    } else {
        map_dtz_score(table, mapped, tb_file, value, wdl)
    }
}

/// The set of discovered tables plus the probing entry points.
pub struct Tablebases {
    paths: Vec<PathBuf>,
    max_cardinality: u32,
    wdl_count: usize,
    dtz_count: usize,
    /// Material key (either color arrangement) to table pair.
    tables: HashMap<u64, usize>,
    entries: Vec<(TbTable, TbTable)>,
}

impl Tablebases {
    pub fn new() -> Tablebases {
        Tablebases {
            paths: Vec::new(),
            max_cardinality: 0,
            wdl_count: 0,
            dtz_count: 0,
            tables: HashMap::new(),
            entries: Vec::new(),
        }
    }

    #[inline]
    pub fn max_cardinality(&self) -> u32 {
        self.max_cardinality
    }

    pub fn wdl_count(&self) -> usize {
        self.wdl_count
    }

    pub fn dtz_count(&self) -> usize {
        self.dtz_count
    }

    /// Re-scans the given path list (';'-separated on Windows, ':' else)
    /// for table files. Called on every SyzygyPath change.
    pub fn init(&mut self, paths: &str) {
        self.paths.clear();
        self.max_cardinality = 0;
        self.wdl_count = 0;
        self.dtz_count = 0;
        self.tables.clear();
        self.entries.clear();

        let separator = if cfg!(windows) { ';' } else { ':' };
        for path in paths.split(separator) {
            let path = path.trim();
            if !path.is_empty() && path != "<empty>" {
                self.paths.push(PathBuf::from(path));
            }
        }
        if self.paths.is_empty() {
            return;
        }

        // Enumerate all material signatures up to seven pieces, stronger
        // side first, and keep those whose WDL file exists.
        let pts = [PieceType::Pawn, PieceType::Knight, PieceType::Bishop, PieceType::Rook, PieceType::Queen];
        let mut signatures: Vec<(Vec<PieceType>, Vec<PieceType>)> = Vec::new();
        for (i1, &p1) in pts.iter().enumerate() {
            signatures.push((vec![p1], vec![]));
            for (i2, &p2) in pts.iter().enumerate().take(i1 + 1) {
                signatures.push((vec![p1, p2], vec![]));
                signatures.push((vec![p1], vec![p2]));
                for &p3 in pts.iter() {
                    signatures.push((vec![p1, p2], vec![p3]));
                }
                for (i3, &p3) in pts.iter().enumerate().take(i2 + 1) {
                    signatures.push((vec![p1, p2, p3], vec![]));
                    for (i4, &p4) in pts.iter().enumerate().take(i3 + 1) {
                        signatures.push((vec![p1, p2, p3, p4], vec![]));
                        for &p5 in pts.iter().take(i4 + 1) {
                            signatures.push((vec![p1, p2, p3, p4, p5], vec![]));
                        }
                        for &p5 in pts.iter() {
                            signatures.push((vec![p1, p2, p3, p4], vec![p5]));
                        }
                    }
                    for (i4, &p4) in pts.iter().enumerate() {
                        signatures.push((vec![p1, p2, p3], vec![p4]));
                        for &p5 in pts.iter().take(i4 + 1) {
                            signatures.push((vec![p1, p2, p3], vec![p4, p5]));
                        }
                    }
                }
                for (i3, &p3) in pts.iter().enumerate().take(i1 + 1) {
                    let limit = if i1 == i3 { i2 + 1 } else { i3 + 1 };
                    for &p4 in pts.iter().take(limit) {
                        signatures.push((vec![p1, p2], vec![p3, p4]));
                    }
                }
            }
        }

        for (white, black) in signatures {
            self.add(&white, &black);
        }
    }

    fn add(&mut self, white: &[PieceType], black: &[PieceType]) {
        let mut name = String::from("K");
        for pt in white {
            name.push(pt.to_char());
        }
        name.push_str("vK");
        for pt in black {
            name.push(pt.to_char());
        }

        // The signature enumeration can revisit a material balance.
        if self.entries.iter().any(|(wdl, _)| wdl.name == name) {
            return;
        }

        let exists = |ext: &str| {
            self.paths.iter().any(|dir| dir.join(format!("{name}.{ext}")).exists())
        };

        if exists("rtbz") {
            self.dtz_count += 1;
        }
        if !exists("rtbw") {
            return;
        }
        self.wdl_count += 1;

        let wdl = TbTable::new(&name, true);
        let dtz = TbTable::new(&name, false);
        let keys = wdl.key;
        self.max_cardinality = self.max_cardinality.max(wdl.piece_count as u32);

        let index = self.entries.len();
        self.entries.push((wdl, dtz));
        self.tables.insert(keys[0], index);
        self.tables.insert(keys[1], index);
    }

    fn probe_table(&self, pos: &Position, want_wdl: bool, wdl: Wdl, result: &mut ProbeState) -> i32 {
        if pos.total_piece_count() == 2 {
            return 0; // KvK
        }

        let Some(&index) = self.tables.get(&pos.material_key()) else {
            *result = ProbeState::Fail;
            return 0;
        };
        let entry = &self.entries[index];
        let table = if want_wdl { &entry.0 } else { &entry.1 };

        match table.mapped_data(&self.paths) {
            Some(mapped) => do_probe_table(pos, table, mapped, wdl, result),
            None => {
                *result = ProbeState::Fail;
                0
            }
        }
    }

    /// WDL probe with the zeroing-move sweep: winning captures are "don't
    /// care" values in the tables, so resolve them by search.
    fn search_wdl(
        &self,
        pos: &mut Position,
        check_zeroing: bool,
        result: &mut ProbeState,
    ) -> Wdl {
        let mut best_value = Wdl::Loss;
        let legal = MoveList::legal(pos);
        let total = legal.len();
        let mut move_count = 0;

        for m in legal.iter().copied() {
            if !pos.capture(m)
                && (!check_zeroing || pos.moved_piece(m).piece_type() != PieceType::Pawn)
            {
                continue;
            }
            move_count += 1;

            pos.do_move(m);
            let value = self.search_wdl(pos, false, result).negate();
            pos.undo_move(m);

            if *result == ProbeState::Fail {
                return Wdl::Draw;
            }

            if best_value < value {
                best_value = value;
                if value == Wdl::Win {
                    *result = ProbeState::BestMoveZeroing;
                    return value;
                }
            }
        }

        // With every move searched the table is not needed; it may even be
        // wrong, e.g. for positions with en-passant rights.
        let moves_no_more = move_count != 0 && move_count == total;
        let value = if moves_no_more {
            best_value
        } else {
            let v = self.probe_table(pos, true, Wdl::Draw, result);
            if *result == ProbeState::Fail {
                return Wdl::Draw;
            }
            Wdl::from_i32(v)
        };

        if best_value >= value {
            *result = if best_value > Wdl::Draw || moves_no_more {
                ProbeState::BestMoveZeroing
            } else {
                ProbeState::Ok
            };
            return best_value;
        }

        *result = ProbeState::Ok;
        value
    }

    /// Probes the WDL score of the position. `None` when no table covers it.
    pub fn probe_wdl(&self, pos: &mut Position) -> Option<Wdl> {
        if self.max_cardinality == 0 {
            return None;
        }
        let mut result = ProbeState::Ok;
        let wdl = self.search_wdl(pos, false, &mut result);
        (result != ProbeState::Fail).then_some(wdl)
    }

    /// Probes the distance-to-zero in plies; sign carries win/loss.
    pub fn probe_dtz(&self, pos: &mut Position) -> Option<i32> {
        let mut result = ProbeState::Ok;
        let wdl = self.search_wdl(pos, true, &mut result);

        if result == ProbeState::Fail {
            return None;
        }
        if wdl == Wdl::Draw {
            return Some(0); // DTZ tables do not store draws
        }
        if result == ProbeState::BestMoveZeroing {
            return Some(dtz_before_zeroing(wdl));
        }

        let dtz = self.probe_table(pos, false, wdl, &mut result);
        match result {
            ProbeState::Fail => None,
            ProbeState::ChangeAc => self.probe_dtz_flipped(pos, wdl),
            _ => Some(
                (dtz + 100 * (wdl == Wdl::BlessedLoss || wdl == Wdl::CursedWin) as i32)
                    * sign_of(wdl as i32),
            ),
        }
    }

    /// The table stores the other side to move: run a 1-ply search and
    /// minimize the children's DTZ.
    fn probe_dtz_flipped(&self, pos: &mut Position, wdl: Wdl) -> Option<i32> {
        let mut min_dtz = i32::MAX;

        for m in MoveList::legal(pos).iter().copied().collect::<Vec<_>>() {
            let zeroing = pos.capture(m) || pos.moved_piece(m).piece_type() == PieceType::Pawn;

            pos.do_move(m);

            let mut dtz = if zeroing {
                let mut result = ProbeState::Ok;
                let child = self.search_wdl(pos, false, &mut result);
                if result == ProbeState::Fail {
                    pos.undo_move(m);
                    return None;
                }
                -dtz_before_zeroing(child)
            } else {
                match self.probe_dtz(pos) {
                    Some(d) => -d,
                    None => {
                        pos.undo_move(m);
                        return None;
                    }
                }
            };

            // A mating move gets DTZ 1.
            if dtz == 1 && pos.in_check() && MoveList::legal(pos).is_empty() {
                min_dtz = 1;
            }

            if !zeroing {
                dtz += sign_of(dtz);
            }

            if min_dtz > dtz && sign_of(dtz) == sign_of(wdl as i32) {
                min_dtz = dtz;
            }

            pos.undo_move(m);
        }

        // No legal moves means mate.
        Some(if min_dtz == i32::MAX { -1 } else { min_dtz })
    }

    /// DTZ-based root move ranking; falls back to WDL ranking when DTZ
    /// files are missing. Returns whether the root is settled by the TB.
    pub fn rank_root_moves(
        &self,
        pos: &mut Position,
        root_moves: &mut [RootMove],
        probe_limit: u32,
        use_rule50: bool,
    ) -> bool {
        if root_moves.is_empty() || self.max_cardinality == 0 {
            return false;
        }

        let cardinality = probe_limit.min(self.max_cardinality);
        if cardinality < pos.total_piece_count() as u32 || pos.castling_rights() != 0 {
            return false;
        }

        let mut root_in_tb = self.root_probe_dtz(pos, root_moves, use_rule50);
        if !root_in_tb {
            root_in_tb = self.root_probe_wdl(pos, root_moves, use_rule50);
        }

        if root_in_tb {
            root_moves.sort_by_key(|rm| -rm.tb_rank);
        } else {
            for rm in root_moves.iter_mut() {
                rm.tb_rank = 0;
            }
        }

        root_in_tb
    }

    fn root_probe_dtz(&self, pos: &mut Position, root_moves: &mut [RootMove], use_rule50: bool) -> bool {
        let rule50 = pos.rule50_count();
        let rep = pos.has_repeated();
        let bound = if use_rule50 { MAX_DTZ / 2 - 100 } else { 1 };

        for rm in root_moves.iter_mut() {
            let m = rm.pv[0];
            pos.do_move(m);

            let dtz = if pos.rule50_count() == 0 {
                // Zeroing move: one of -101/-1/0/1/101 recovered from WDL.
                match self.probe_wdl(pos) {
                    Some(wdl) => dtz_before_zeroing(wdl.negate()),
                    None => {
                        pos.undo_move(m);
                        return false;
                    }
                }
            } else if pos.is_draw(1) {
                // A true repetition or fifty-move draw one ply from root.
                0
            } else {
                match self.probe_dtz(pos) {
                    Some(d) => {
                        let d = -d;
                        d + sign_of(d)
                    }
                    None => {
                        pos.undo_move(m);
                        return false;
                    }
                }
            };

            // Mating moves get DTZ 1.
            let dtz = if dtz == 2 && pos.in_check() && MoveList::legal(pos).is_empty() {
                1
            } else {
                dtz
            };

            pos.undo_move(m);

            // Better moves rank higher; wins in reach of the fifty-move rule
            // rank above fenced wins, symmetrically for losses.
            let r = if dtz > 0 {
                if dtz + rule50 < 100 && !rep {
                    MAX_DTZ - dtz
                } else {
                    MAX_DTZ / 2 - (dtz + rule50)
                }
            } else if dtz < 0 {
                if -2 * dtz + rule50 < 100 {
                    -MAX_DTZ - dtz
                } else {
                    -MAX_DTZ / 2 + (-dtz + rule50)
                }
            } else {
                0
            };
            rm.tb_rank = r;

            // Displayed score: cursed wins get 1..49 cp.
            rm.tb_value = if r >= bound {
                VALUE_MATE - MAX_PLY as Value - 1
            } else if r > 0 {
                ((r - (MAX_DTZ / 2 - 200)).max(3) * crate::piece::VALUE_PAWN) / 200
            } else if r == 0 {
                VALUE_DRAW
            } else if r > -bound {
                ((r + (MAX_DTZ / 2 - 200)).min(-3) * crate::piece::VALUE_PAWN) / 200
            } else {
                -VALUE_MATE + MAX_PLY as Value + 1
            };
        }
        true
    }

    fn root_probe_wdl(&self, pos: &mut Position, root_moves: &mut [RootMove], use_rule50: bool) -> bool {
        const WDL_TO_RANK: [i32; 5] = [-MAX_DTZ, -MAX_DTZ + 101, 0, MAX_DTZ - 101, MAX_DTZ];

        let wdl_to_value = |wdl: Wdl| -> Value {
            match wdl {
                Wdl::Loss => -VALUE_MATE + MAX_PLY as Value + 1,
                Wdl::BlessedLoss => VALUE_DRAW - 2,
                Wdl::Draw => VALUE_DRAW,
                Wdl::CursedWin => VALUE_DRAW + 2,
                Wdl::Win => VALUE_MATE - MAX_PLY as Value - 1,
            }
        };

        for rm in root_moves.iter_mut() {
            let m = rm.pv[0];
            pos.do_move(m);

            let wdl = if pos.is_draw(1) {
                Some(Wdl::Draw)
            } else {
                self.probe_wdl(pos).map(Wdl::negate)
            };
            pos.undo_move(m);

            let Some(mut wdl) = wdl else { return false };

            rm.tb_rank = WDL_TO_RANK[(wdl as i32 + 2) as usize];
            if !use_rule50 {
                wdl = match wdl.cmp(&Wdl::Draw) {
                    std::cmp::Ordering::Greater => Wdl::Win,
                    std::cmp::Ordering::Less => Wdl::Loss,
                    std::cmp::Ordering::Equal => Wdl::Draw,
                };
            }
            rm.tb_value = wdl_to_value(wdl);
        }
        true
    }
}

impl Default for Tablebases {
    fn default() -> Self {
        Tablebases::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The static maps match the well-known Syzygy invariants.
    #[test]
    fn test_static_maps() {
        let maps = &*MAPS;
        // 462 legal two-king placements
        let max_kk = maps
            .kk_map
            .iter()
            .flat_map(|row| row.iter())
            .copied()
            .max()
            .unwrap();
        assert_eq!(max_kk, 461);
        // Binomials: C(2, 4) = 6, C(3, 7) = 35
        assert_eq!(maps.binomial[2][4], 6);
        assert_eq!(maps.binomial[3][7], 35);
        // 28 squares strictly below the a1-h8 diagonal
        let max_b1 = (0..64).filter(|&s| off_a1h8(s) < 0).map(|s| maps.b1h1h7_map[s]).max();
        assert_eq!(max_b1, Some(27));
        // Triangle map covers 0..9
        let max_tri = (0..28)
            .filter(|&s| s & 7 <= 3)
            .map(|s| maps.a1d1d4_map[s])
            .max();
        assert_eq!(max_tri, Some(9));
    }

    /// Piece codes round-trip through the file nibble encoding.
    #[test]
    fn test_piece_codes() {
        for color in [Color::White, Color::Black] {
            for i in 0..6u8 {
                let pt = PieceType::from_u8_unchecked(i);
                let code = code_of(color, pt);
                assert_eq!(code_type(code), pt);
                assert_eq!(code_color(code), color);
            }
        }
    }

    /// Without any configured path every probe declines gracefully.
    #[test]
    fn test_empty_tablebases() {
        let tb = Tablebases::new();
        assert_eq!(tb.max_cardinality(), 0);
        let mut pos = Position::from_fen("4k3/8/4K3/8/8/8/8/6R1 w - - 0 1", false).unwrap();
        assert_eq!(tb.probe_wdl(&mut pos), None);

        let mut root_moves: Vec<RootMove> = MoveList::legal(&pos)
            .iter()
            .map(|&m| RootMove::new(m))
            .collect();
        assert!(!tb.rank_root_moves(&mut pos, &mut root_moves, 7, true));
        assert!(root_moves.iter().all(|rm| rm.tb_rank == 0));
    }

    /// Table name decoding fixes keys, pawn counts and uniqueness.
    #[test]
    fn test_table_from_name() {
        let table = TbTable::new("KRPvKN", true);
        assert_eq!(table.piece_count, 5);
        assert!(table.has_pawns);
        assert!(table.has_unique_pieces);
        assert_eq!(table.pawn_count, [1, 0]);
        assert_ne!(table.key[0], table.key[1]);
        assert_eq!(table.sides(), 2);

        let symmetric = TbTable::new("KQvKQ", true);
        assert_eq!(symmetric.key[0], symmetric.key[1]);
        assert_eq!(symmetric.sides(), 1);

        let dtz = TbTable::new("KQvKQ", false);
        assert_eq!(dtz.sides(), 1);
    }

    /// An init over a directory without tables leaves the set empty.
    #[test]
    fn test_init_empty_dir() {
        let mut tb = Tablebases::new();
        tb.init(std::env::temp_dir().to_str().unwrap());
        assert_eq!(tb.max_cardinality(), 0);
        assert_eq!(tb.wdl_count(), 0);
        tb.init("");
        assert_eq!(tb.max_cardinality(), 0);
    }
}
