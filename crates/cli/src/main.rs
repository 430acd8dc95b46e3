mod uci;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(about = "Sable, a UCI chess engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<SubCommands>,

    /// Transposition table size in MiB.
    #[arg(long, default_value = "16")]
    hash: usize,

    /// Number of search threads; defaults to one.
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum SubCommands {
    /// Count leaf nodes of the legal move tree from a position.
    Perft {
        #[arg()]
        depth: u32,

        #[arg(long, default_value = sable_core::position::START_FEN)]
        fen: String,
    },
}

fn main() {
    let args = Cli::parse();
    match args.command {
        Some(SubCommands::Perft { depth, fen }) => {
            let mut pos = match sable_core::position::Position::from_fen(&fen, false) {
                Ok(pos) => pos,
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(1);
                }
            };
            let started = std::time::Instant::now();
            let (total, lines) = sable_core::perft::perft_divide(&mut pos, depth);
            for (text, nodes) in lines {
                println!("{text}: {nodes}");
            }
            println!();
            println!("Nodes searched: {total}");
            println!("Time: {} ms", started.elapsed().as_millis());
        }
        None => {
            let mut session = uci::UciSession::new(args.hash, args.threads);
            session.run();
        }
    }
}
