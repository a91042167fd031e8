use clap::Parser;
use genedock::cache::PocketCache;
use genedock::config::{resolve_tool, POCKET_PADDING};
use genedock::pocket::{Fpocket, PocketLocator};
use genedock::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, trace};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub(crate) struct Args {
    /// Receptor structures in PDB format
    #[arg(short, long, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Gene the receptors belong to, used as the cache namespace
    #[arg(short, long, default_value_t = String::from("receptor"))]
    gene: String,

    /// Keep detection results in this directory for later runs
    #[arg(short, long = "cache-dir")]
    cache_dir: Option<PathBuf>,

    /// Margin in Å added to each axis of the pocket box
    #[arg(long, default_value_t = POCKET_PADDING)]
    padding: f64,

    /// Path to the fpocket binary
    #[arg(long)]
    fpocket: Option<PathBuf>,

    /// Kill fpocket after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

pub(crate) fn run(args: &Args) -> Result<()> {
    trace!("{args:?}");

    let fpocket = Fpocket::new(resolve_tool("fpocket", args.fpocket.as_deref())?)
        .with_timeout(args.timeout.map(Duration::from_secs));

    // Without a cache directory, results only live for this invocation
    let scratch = tempfile::Builder::new().prefix("genedock").tempdir()?;
    let cache_root = match &args.cache_dir {
        Some(dir) => dir.clone(),
        None => scratch.path().to_path_buf(),
    };
    debug!("Caching pockets in {}", cache_root.display());
    let locator = PocketLocator::new(&fpocket, PocketCache::new(cache_root), args.padding);

    for f in &args.input {
        let input_path = match f.canonicalize() {
            Ok(path) => path,
            Err(e) => {
                error!("Failed to retrieve input file {}: {e}", f.display());
                continue;
            }
        };
        match locator.locate(&input_path, &args.gene) {
            Ok(pocket) => println!("{}\t{pocket}", input_path.display()),
            Err(e) => error!("{}: {e}", input_path.display()),
        }
    }
    Ok(())
}
