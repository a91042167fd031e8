use clap::Parser;
use genedock::pipeline::write_tables;
use genedock::{ActivityMethod, DataFrameFileType, GeneLigandMap, Result, TableOptions};
use std::path::PathBuf;
use tracing::{error, info, trace};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub(crate) struct Args {
    /// Docking output tree, `{output}/docking` of a pipeline run
    #[arg(short, long = "docking-dir")]
    docking_dir: PathBuf,

    /// Table with Gene, Substrate and Product columns (CSV or TSV)
    #[arg(short, long)]
    mapping: PathBuf,

    /// Affinity table to write; the extension follows the output format
    #[arg(short, long)]
    output: PathBuf,

    /// Also write the activity matrix here
    #[arg(short, long)]
    activity: Option<PathBuf>,

    /// Output file type
    #[arg(long = "output-format", default_value_t = DataFrameFileType::Csv)]
    output_format: DataFrameFileType,

    /// How substrate and product energies are combined into an activity score
    #[arg(long = "activity-method", value_enum, default_value_t = ActivityMethod::Ratio)]
    activity_method: ActivityMethod,

    /// Z-score activities per gene
    #[arg(long, default_value_t = false)]
    standardize: bool,
}

pub(crate) fn run(args: &Args) -> Result<()> {
    trace!("{args:?}");

    let docking_dir = match args.docking_dir.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            error!("Failed to retrieve docking directory: {e}");
            return Err(e.into());
        }
    };
    let map = GeneLigandMap::from_path(&args.mapping)?;
    let summary = write_tables(
        &docking_dir,
        &map,
        &args.output,
        args.activity.as_deref(),
        &TableOptions {
            output_format: args.output_format,
            activity_method: args.activity_method,
            standardize: args.standardize,
        },
    )?;
    info!(
        "Tabulated {} affinities from {}",
        summary.affinities,
        docking_dir.display()
    );
    Ok(())
}
