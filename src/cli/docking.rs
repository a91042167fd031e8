use clap::Parser;
use genedock::config::{EXHAUSTIVENESS, NUM_MODES, POCKET_PADDING};
use genedock::{
    ActivityMethod, AutoDocking, DataFrameFileType, DockingRequest, DockingSettings, ExternalTools,
    Result, TableOptions, ToolOverrides, ToolPaths,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, trace, warn};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub(crate) struct Args {
    /// Directory with one subdirectory of receptor structures (PDB or mmCIF) per gene
    #[arg(short, long = "protein-dir")]
    protein_dir: PathBuf,

    /// Table with Gene, Substrate and Product columns (CSV or TSV).
    /// Multiple ligands in one cell are separated by ',', ';' or '|'
    #[arg(short, long)]
    mapping: PathBuf,

    /// Species tree matching the receptor names
    #[arg(short, long = "tree-file")]
    tree_file: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Number of docking runs in parallel, 0 uses all logical CPUs
    #[arg(short = 'j', long = "num-threads", default_value_t = 0)]
    num_threads: usize,

    /// Keep the results of runs that already finished in an earlier batch
    #[arg(long = "skip-completed", default_value_t = false)]
    skip_completed: bool,

    /// Kill an external tool call after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Search thoroughness of the docking engine
    #[arg(long, default_value_t = EXHAUSTIVENESS)]
    exhaustiveness: u32,

    /// Number of poses written per run
    #[arg(long = "num-modes", default_value_t = NUM_MODES)]
    num_modes: u32,

    /// Margin in Å added to each axis of the pocket box
    #[arg(long, default_value_t = POCKET_PADDING)]
    padding: f64,

    /// Output file type of the affinity tables
    #[arg(long = "output-format", default_value_t = DataFrameFileType::Csv)]
    output_format: DataFrameFileType,

    /// How substrate and product energies are combined into an activity score
    #[arg(long = "activity-method", value_enum, default_value_t = ActivityMethod::Ratio)]
    activity_method: ActivityMethod,

    /// Z-score activities per gene
    #[arg(long, default_value_t = false)]
    standardize: bool,

    /// Path to the vina binary
    #[arg(long)]
    vina: Option<PathBuf>,

    /// Path to the fpocket binary
    #[arg(long)]
    fpocket: Option<PathBuf>,

    /// Path to the obabel binary
    #[arg(long)]
    obabel: Option<PathBuf>,

    /// Receptor preparation command, or script when --interpreter is given
    #[arg(long = "prepare-receptor")]
    prepare_receptor: Option<PathBuf>,

    /// Ligand preparation command, or script when --interpreter is given
    #[arg(long = "prepare-ligand")]
    prepare_ligand: Option<PathBuf>,

    /// Interpreter for the preparation scripts, e.g. MGLTools' pythonsh
    #[arg(long)]
    interpreter: Option<PathBuf>,
}

impl Args {
    fn settings(&self) -> DockingSettings {
        DockingSettings {
            exhaustiveness: self.exhaustiveness,
            num_modes: self.num_modes,
            pocket_padding: self.padding,
            num_threads: self.num_threads,
            skip_completed: self.skip_completed,
            task_timeout: self.timeout.map(Duration::from_secs),
            ..Default::default()
        }
    }

    fn overrides(&self) -> ToolOverrides {
        ToolOverrides {
            vina: self.vina.clone(),
            fpocket: self.fpocket.clone(),
            obabel: self.obabel.clone(),
            prepare_receptor: self.prepare_receptor.clone(),
            prepare_ligand: self.prepare_ligand.clone(),
            interpreter: self.interpreter.clone(),
        }
    }
}

fn existing(path: &Path, what: &str) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| {
        error!("Failed to retrieve {what} {}: {e}", path.display());
        e.into()
    })
}

pub(crate) fn run(args: &Args) -> Result<()> {
    trace!("{args:?}");

    let protein_dir = existing(&args.protein_dir, "protein directory")?;
    let mapping = existing(&args.mapping, "mapping table")?;
    let tree_file = existing(&args.tree_file, "tree file")?;
    let output_path = std::path::absolute(&args.output)?;

    let settings = args.settings();
    let paths = ToolPaths::resolve(&args.overrides())?;
    let tools = ExternalTools::new(&paths, &settings)?;
    let pipeline = AutoDocking::new(&output_path, settings, tools.collaborators());

    let summary = pipeline.run(&DockingRequest {
        protein_dir,
        mapping,
        tree_file: Some(tree_file),
        tables: TableOptions {
            output_format: args.output_format,
            activity_method: args.activity_method,
            standardize: args.standardize,
        },
    })?;

    let docking = &summary.docking;
    if !summary.ligands.failed.is_empty() {
        warn!(
            "{} ligand(s) could not be retrieved: {}",
            summary.ligands.failed.len(),
            summary
                .ligands
                .failed
                .iter()
                .map(|(ligand, _)| ligand.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    info!(
        "{} of {} docking run(s) succeeded; results saved to {}",
        docking.succeeded(),
        docking.expected,
        output_path.display()
    );
    Ok(())
}
