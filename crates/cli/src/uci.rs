//! UCI (Universal Chess Interface) implementation.
//!
//! A line-based protocol loop: commands are parsed into a typed `Command`,
//! malformed input is reported as an `info string` diagnostic and never
//! kills the session.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use sable_core::engine::Engine;
use sable_core::notation::move_text;
use sable_core::position::START_FEN;
use sable_core::search::{Limits, PvInfo, SearchCallbacks};
use sable_core::types::{
    Move, VALUE_TB, VALUE_TB_LOSS_IN_MAX_PLY, VALUE_TB_WIN_IN_MAX_PLY, Value, is_mate,
    mate_distance,
};

const ENGINE_NAME: &str = "Sable";
const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
const ENGINE_AUTHOR: &str = "the Sable developers";

/// A parsed UCI command.
#[derive(Debug, Clone)]
enum Command {
    Uci,
    IsReady,
    UciNewGame,
    Position { fen: String, moves: Vec<String> },
    /// Limits plus the raw searchmoves/ignoremoves texts, resolved against
    /// the current position when the search starts.
    Go(Box<Limits>, Vec<String>, Vec<String>),
    Perft(u32),
    Stop,
    PonderHit,
    SetOption { name: String, value: String },
    Quit,
    Unknown(String),
}

/// Output-side state shared with the search callbacks.
struct Shared {
    chess960: AtomicBool,
    show_wdl: AtomicBool,
}

pub struct UciSession {
    engine: Engine,
    shared: Arc<Shared>,
}

impl UciSession {
    pub fn new(hash_mb: usize, threads: Option<usize>) -> UciSession {
        let shared = Arc::new(Shared {
            chess960: AtomicBool::new(false),
            show_wdl: AtomicBool::new(false),
        });

        let cb_shared = shared.clone();
        let on_update = Arc::new(move |info: &PvInfo| {
            print_info(info, &cb_shared);
        });
        let curr_shared = shared.clone();
        let on_currmove = Arc::new(move |info: &sable_core::search::CurrMoveInfo| {
            println!(
                "info depth {} currmove {} currmovenumber {}",
                info.depth,
                move_text(info.curr_move, curr_shared.chess960.load(Ordering::Relaxed)),
                info.curr_move_number
            );
        });
        let cb_shared = shared.clone();
        let on_bestmove = Arc::new(move |best: Move, ponder: Move| {
            let chess960 = cb_shared.chess960.load(Ordering::Relaxed);
            if !best.is_some() {
                println!("bestmove (none)");
            } else if ponder.is_some() {
                println!(
                    "bestmove {} ponder {}",
                    move_text(best, chess960),
                    move_text(ponder, chess960)
                );
            } else {
                println!("bestmove {}", move_text(best, chess960));
            }
            io::stdout().flush().ok();
        });

        let callbacks = SearchCallbacks {
            on_update: Some(on_update),
            on_currmove: Some(on_currmove),
            on_bestmove: Some(on_bestmove),
        };

        let mut engine = Engine::new(callbacks);
        if hash_mb != 16 {
            engine.set_option("Hash", &hash_mb.to_string()).ok();
        }
        if let Some(threads) = threads {
            engine.set_option("Threads", &threads.to_string()).ok();
        }

        UciSession { engine, shared }
    }

    /// Reads stdin until `quit`.
    pub fn run(&mut self) {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if !self.handle_line(&line) {
                break;
            }
        }
        self.engine.stop();
        self.engine.wait();
    }

    /// Returns false when the session should end.
    pub fn handle_line(&mut self, line: &str) -> bool {
        match parse_command(line) {
            Command::Uci => {
                println!("id name {ENGINE_NAME} {ENGINE_VERSION}");
                println!("id author {ENGINE_AUTHOR}");
                print_options(&self.engine);
                println!("uciok");
            }
            Command::IsReady => println!("readyok"),
            Command::UciNewGame => self.engine.new_game(),
            Command::Position { fen, moves } => {
                let moves: Vec<&str> = moves.iter().map(String::as_str).collect();
                if let Err(err) = self.engine.set_position(&fen, &moves) {
                    println!("info string {err}");
                }
            }
            Command::Go(mut limits, search_texts, ignore_texts) => {
                let mut pos = self.engine.position().clone();
                limits.search_moves = search_texts
                    .iter()
                    .filter_map(|t| sable_core::notation::parse_move(&mut pos, t))
                    .collect();
                limits.ignore_moves = ignore_texts
                    .iter()
                    .filter_map(|t| sable_core::notation::parse_move(&mut pos, t))
                    .collect();
                self.engine.go(*limits);
            }
            Command::Perft(depth) => {
                let started = Instant::now();
                let (total, lines) = self.engine.perft(depth);
                for (text, nodes) in lines {
                    println!("{text}: {nodes}");
                }
                println!();
                println!("Nodes searched: {total}");
                println!("Time: {} ms", started.elapsed().as_millis());
            }
            Command::Stop => self.engine.stop(),
            Command::PonderHit => self.engine.ponderhit(),
            Command::SetOption { name, value } => {
                if let Err(err) = self.engine.set_option(&name, &value) {
                    println!("info string {err}");
                } else {
                    self.sync_shared(&name);
                }
            }
            Command::Quit => return false,
            Command::Unknown(cmd) => {
                if !cmd.is_empty() {
                    println!("info string unknown command '{cmd}'");
                }
            }
        }
        io::stdout().flush().ok();
        true
    }

    fn sync_shared(&self, name: &str) {
        match name.to_ascii_lowercase().as_str() {
            "uci_chess960" => self
                .shared
                .chess960
                .store(self.engine.options().chess960, Ordering::Relaxed),
            "uci_showwdl" => self
                .shared
                .show_wdl
                .store(self.engine.options().show_wdl, Ordering::Relaxed),
            "syzygypath" => {
                let (wdl, dtz, max) = self.engine.tablebase_counts();
                println!(
                    "info string Tablebase: {wdl} WDL and {dtz} DTZ found. Tablebase files up to {max}-man."
                );
            }
            _ => {}
        }
    }
}

fn parse_command(line: &str) -> Command {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&keyword) = tokens.first() else {
        return Command::Unknown(String::new());
    };

    match keyword.to_ascii_lowercase().as_str() {
        "uci" => Command::Uci,
        "isready" => Command::IsReady,
        "ucinewgame" => Command::UciNewGame,
        "position" => parse_position(&tokens[1..]),
        "go" => parse_go(&tokens[1..]),
        "stop" => Command::Stop,
        "ponderhit" => Command::PonderHit,
        "setoption" => parse_setoption(&tokens[1..]),
        "quit" => Command::Quit,
        _ => Command::Unknown(keyword.to_string()),
    }
}

fn parse_position(args: &[&str]) -> Command {
    let mut fen = String::new();
    let mut moves = Vec::new();
    let mut iter = args.iter().peekable();

    match iter.next().map(|s| s.to_ascii_lowercase()) {
        Some(ref tok) if tok == "startpos" => fen = START_FEN.to_string(),
        Some(ref tok) if tok == "fen" => {
            let mut fields = Vec::new();
            while let Some(&&next) = iter.peek() {
                if next.eq_ignore_ascii_case("moves") {
                    break;
                }
                fields.push(*iter.next().unwrap());
            }
            fen = fields.join(" ");
        }
        _ => return Command::Unknown("position".to_string()),
    }

    if iter.next().is_some_and(|tok| tok.eq_ignore_ascii_case("moves")) {
        moves.extend(iter.map(|s| s.to_string()));
    }

    Command::Position { fen, moves }
}

fn parse_go(args: &[&str]) -> Command {
    let mut limits = Limits { start_time: Instant::now(), ..Default::default() };
    let mut search_texts = Vec::new();
    let mut ignore_texts = Vec::new();
    let mut iter = args.iter().peekable();

    fn collect_moves(iter: &mut std::iter::Peekable<std::slice::Iter<&str>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(&&next) = iter.peek() {
            if is_go_keyword(next) {
                break;
            }
            out.push(iter.next().unwrap().to_string());
        }
        out
    }

    while let Some(&token) = iter.next() {
        let value = |iter: &mut std::iter::Peekable<std::slice::Iter<&str>>| {
            iter.next().and_then(|v| v.parse::<i64>().ok()).unwrap_or(0)
        };
        match token.to_ascii_lowercase().as_str() {
            "wtime" => limits.clocks[0].time = value(&mut iter),
            "btime" => limits.clocks[1].time = value(&mut iter),
            "winc" => limits.clocks[0].inc = value(&mut iter),
            "binc" => limits.clocks[1].inc = value(&mut iter),
            "movestogo" => limits.moves_to_go = value(&mut iter) as u32,
            "movetime" => limits.move_time = value(&mut iter),
            "depth" => limits.depth = value(&mut iter) as i32,
            "nodes" => limits.nodes = value(&mut iter) as u64,
            "mate" => limits.mate = value(&mut iter) as u32,
            "infinite" => limits.infinite = true,
            "ponder" => limits.ponder = true,
            "perft" => return Command::Perft(value(&mut iter) as u32),
            "searchmoves" => search_texts = collect_moves(&mut iter),
            "ignoremoves" => ignore_texts = collect_moves(&mut iter),
            _ => {}
        }
    }

    Command::Go(Box::new(limits), search_texts, ignore_texts)
}

fn is_go_keyword(token: &str) -> bool {
    matches!(
        token.to_ascii_lowercase().as_str(),
        "wtime"
            | "btime"
            | "winc"
            | "binc"
            | "movestogo"
            | "movetime"
            | "depth"
            | "nodes"
            | "mate"
            | "infinite"
            | "ponder"
            | "perft"
            | "searchmoves"
            | "ignoremoves"
    )
}

fn parse_setoption(args: &[&str]) -> Command {
    // setoption name <name tokens> [value <value tokens>]
    let mut name_parts = Vec::new();
    let mut value_parts = Vec::new();
    let mut in_value = false;
    let mut iter = args.iter();

    match iter.next() {
        Some(tok) if tok.eq_ignore_ascii_case("name") => {}
        _ => return Command::Unknown("setoption".to_string()),
    }
    for tok in iter {
        if tok.eq_ignore_ascii_case("value") && !in_value {
            in_value = true;
        } else if in_value {
            value_parts.push(*tok);
        } else {
            name_parts.push(*tok);
        }
    }

    Command::SetOption { name: name_parts.join(" "), value: value_parts.join(" ") }
}

fn print_options(engine: &Engine) {
    let opts = engine.options();
    println!("option name Threads type spin default {} min 1 max 1024", opts.threads);
    println!("option name Hash type spin default {} min 1 max 1048576", opts.hash_mb);
    println!("option name Clear Hash type button");
    println!("option name Save Hash type button");
    println!("option name Load Hash type button");
    println!("option name HashFile type string default {}", opts.hash_file);
    println!("option name HashRetain type check default {}", opts.hash_retain);
    println!("option name MultiPV type spin default {} min 1 max 256", opts.multi_pv);
    println!("option name Ponder type check default {}", opts.ponder);
    println!(
        "option name MoveOverhead type spin default {} min 0 max 5000",
        opts.move_overhead
    );
    println!("option name NodesTime type spin default {} min 0 max 10000", opts.nodes_time);
    println!("option name SkillLevel type spin default {} min 0 max 20", opts.skill_level);
    println!(
        "option name UCI_LimitStrength type check default {}",
        opts.limit_strength
    );
    println!(
        "option name UCI_ELO type spin default {} min {} max {}",
        opts.elo,
        sable_core::search::MIN_ELO,
        sable_core::search::MAX_ELO
    );
    println!("option name UCI_Chess960 type check default {}", opts.chess960);
    println!("option name UCI_ShowWDL type check default {}", opts.show_wdl);
    println!("option name SyzygyPath type string default <empty>");
    println!(
        "option name SyzygyProbeLimit type spin default {} min 0 max 7",
        opts.syzygy_probe_limit
    );
    println!(
        "option name SyzygyProbeDepth type spin default {} min 1 max 100",
        opts.syzygy_probe_depth
    );
    println!(
        "option name Syzygy50MoveRule type check default {}",
        opts.syzygy_50_move_rule
    );
    println!("option name NumaPolicy type string default auto");
}

fn print_info(info: &PvInfo, shared: &Shared) {
    let chess960 = shared.chess960.load(Ordering::Relaxed);
    let mut line = format!(
        "info depth {} seldepth {} multipv {} score {}",
        info.depth,
        info.sel_depth,
        info.multipv,
        score_text(info.value)
    );
    if info.bound_lower {
        line.push_str(" lowerbound");
    }
    if info.bound_upper {
        line.push_str(" upperbound");
    }
    if shared.show_wdl.load(Ordering::Relaxed) {
        let (w, d, l) = wdl_model(info.value);
        line.push_str(&format!(" wdl {w} {d} {l}"));
    }
    line.push_str(&format!(
        " time {} nodes {} nps {} hashfull {} tbhits {}",
        info.time_ms, info.nodes, info.nps, info.hashfull, info.tb_hits
    ));
    if !info.pv.is_empty() {
        line.push_str(" pv");
        for &m in &info.pv {
            line.push(' ');
            line.push_str(&move_text(m, chess960));
        }
    }
    println!("{line}");
    io::stdout().flush().ok();
}

/// Formats a score per the protocol: `cp N`, `mate N`, or a near-20000 cp
/// band for tablebase scores.
fn score_text(v: Value) -> String {
    if is_mate(v) {
        format!("mate {}", mate_distance(v))
    } else if v >= VALUE_TB_WIN_IN_MAX_PLY {
        format!("cp {}", 20000 - (VALUE_TB - v))
    } else if v <= VALUE_TB_LOSS_IN_MAX_PLY {
        format!("cp {}", -20000 + (VALUE_TB + v))
    } else {
        format!("cp {v}")
    }
}

/// A compact win/draw/loss estimate in permille from the internal score.
fn wdl_model(v: Value) -> (i32, i32, i32) {
    let v = v.clamp(-4000, 4000) as f64;
    let w = (1000.0 / (1.0 + (-v / 168.0).exp())) as i32;
    let l = (1000.0 / (1.0 + (v / 168.0).exp())) as i32;
    (w, 1000 - w - l, l)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_core::types::VALUE_MATE;

    #[test]
    fn test_score_text() {
        assert_eq!(score_text(42), "cp 42");
        assert_eq!(score_text(VALUE_MATE - 1), "mate 1");
        assert_eq!(score_text(-(VALUE_MATE - 2)), "mate -1");
        assert!(score_text(VALUE_TB - 10).starts_with("cp 19"));
    }

    #[test]
    fn test_parse_go_clocks() {
        let cmd = parse_go(&["wtime", "1000", "btime", "2000", "winc", "10", "movestogo", "40"]);
        let Command::Go(limits, _, _) = cmd else { panic!("not a go") };
        assert_eq!(limits.clocks[0].time, 1000);
        assert_eq!(limits.clocks[1].time, 2000);
        assert_eq!(limits.clocks[0].inc, 10);
        assert_eq!(limits.moves_to_go, 40);
    }

    #[test]
    fn test_parse_go_searchmoves() {
        let cmd = parse_go(&["depth", "6", "searchmoves", "e2e4", "d2d4", "ignoremoves", "g1f3"]);
        let Command::Go(limits, search, ignore) = cmd else { panic!("not a go") };
        assert_eq!(limits.depth, 6);
        assert_eq!(search, vec!["e2e4", "d2d4"]);
        assert_eq!(ignore, vec!["g1f3"]);
    }

    #[test]
    fn test_parse_setoption() {
        let cmd = parse_setoption(&["name", "Clear", "Hash"]);
        let Command::SetOption { name, value } = cmd else { panic!() };
        assert_eq!(name, "Clear Hash");
        assert_eq!(value, "");

        let cmd = parse_setoption(&["name", "SyzygyPath", "value", "/tb/wdl:/tb/dtz"]);
        let Command::SetOption { name, value } = cmd else { panic!() };
        assert_eq!(name, "SyzygyPath");
        assert_eq!(value, "/tb/wdl:/tb/dtz");
    }

    #[test]
    fn test_wdl_model_sums() {
        for v in [-3000, -100, 0, 100, 3000] {
            let (w, d, l) = wdl_model(v);
            assert_eq!(w + d + l, 1000);
            assert!(w >= 0 && d >= 0 && l >= 0);
        }
        let (w, _, l) = wdl_model(500);
        assert!(w > l);
    }
}
