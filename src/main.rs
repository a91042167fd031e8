mod cli;

use clap::{Parser, Subcommand};
use tracing::{error, Level};

/// Batch receptor-ligand docking across genes and species
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity of the program:
    /// -v for info, -vv for debug, and -vvv for trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prepare receptors and ligands, dock every gene's receptors against its ligands and tabulate the affinities
    Docking(cli::docking::Args),
    /// Rebuild the affinity table and activity matrix from an existing docking tree
    Table(cli::table::Args),
    /// Print the search box of the top-ranked pocket of each receptor
    Pocket(cli::pocket::Args),
}

fn main() {
    let args = Cli::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let result = match &args.command {
        Commands::Docking(args) => cli::docking::run(args),
        Commands::Table(args) => cli::table::run(args),
        Commands::Pocket(args) => cli::pocket::run(args),
    };
    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}
