//! End-to-end docking batch: from raw receptor structures and a mapping
//! table to affinity tables and a run summary.

use crate::activity::{activity_matrix, ActivityMethod};
use crate::config::{DockingSettings, PipelineLayout, ToolPaths};
use crate::convert::{ObabelConverter, PdbtbxConverter, StructureConverter};
use crate::errors::Result;
use crate::ligands::{prepare_ligands, CompoundResolver, LigandCatalog, LigandSummary, PubChem};
use crate::mapping::{check_gene_sets, GeneLigandMap};
use crate::pocket::{Fpocket, PocketDetector};
use crate::prepare::{AutoDockToolsPreparer, BatchPrepReport, ChargePreparer};
use crate::receptors::{discover_genes, normalize_receptors, prepare_receptors, PrepSummary};
use crate::scheduler::{collect_tasks, BatchReport, DockingEngine, DockingScheduler, Vina};
use crate::table::{affinity_matrix, collect_affinities};
use crate::utils::{write_df_to_file, DataFrameFileType};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The external collaborators a batch needs.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Receptor structures to PDB
    pub receptor_converter: &'a dyn StructureConverter,
    /// Ligand structures to PDB
    pub ligand_converter: &'a dyn StructureConverter,
    /// Ligand lookup and download
    pub resolver: &'a dyn CompoundResolver,
    /// Charge preparation
    pub preparer: &'a dyn ChargePreparer,
    /// Pocket detection
    pub detector: &'a dyn PocketDetector,
    /// Docking engine
    pub engine: &'a dyn DockingEngine,
}

/// Collaborators backed by the real command line tools and PubChem.
pub struct ExternalTools {
    pdbtbx: PdbtbxConverter,
    obabel: ObabelConverter,
    pubchem: PubChem,
    preparer: AutoDockToolsPreparer,
    fpocket: Fpocket,
    vina: Vina,
}

impl ExternalTools {
    /// Wrap already resolved tool paths.
    pub fn new(paths: &ToolPaths, settings: &DockingSettings) -> Result<Self> {
        Ok(Self {
            pdbtbx: PdbtbxConverter,
            obabel: ObabelConverter::new(&paths.obabel),
            pubchem: PubChem::new()?,
            preparer: AutoDockToolsPreparer::new(
                paths.prepare_receptor.clone(),
                paths.prepare_ligand.clone(),
            )
            .with_timeout(settings.task_timeout),
            fpocket: Fpocket::new(&paths.fpocket).with_timeout(settings.task_timeout),
            vina: Vina::new(&paths.vina),
        })
    }

    /// Borrow the tools as pipeline collaborators.
    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            receptor_converter: &self.pdbtbx,
            ligand_converter: &self.obabel,
            resolver: &self.pubchem,
            preparer: &self.preparer,
            detector: &self.fpocket,
            engine: &self.vina,
        }
    }
}

/// Output options for the affinity and activity tables.
#[derive(Clone, Copy, Debug)]
pub struct TableOptions {
    /// File format of both tables
    pub output_format: DataFrameFileType,
    /// Activity score
    pub activity_method: ActivityMethod,
    /// Z-score activities per gene
    pub standardize: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            output_format: DataFrameFileType::Csv,
            activity_method: ActivityMethod::default(),
            standardize: false,
        }
    }
}

/// Tables written from a docking tree.
#[derive(Clone, Debug, Serialize)]
pub struct TableSummary {
    /// Affinities found
    pub affinities: usize,
    /// Wide affinity table
    pub binding_energy_table: PathBuf,
    /// Activity matrix, if requested
    pub activity_matrix: Option<PathBuf>,
}

/// Collect affinities below `docking_root` and write the affinity table to
/// `table_path` and, when given, the activity matrix to `activity_path`.
/// Extensions are set from the output format.
pub fn write_tables(
    docking_root: &Path,
    map: &GeneLigandMap,
    table_path: &Path,
    activity_path: Option<&Path>,
    options: &TableOptions,
) -> Result<TableSummary> {
    let records = collect_affinities(docking_root, map)?;
    let mut table = affinity_matrix(&records)?;
    let binding_energy_table =
        write_df_to_file(&mut table, table_path, options.output_format)?;
    info!("Binding energies saved to {}", binding_energy_table.display());

    let activity_matrix = match activity_path {
        Some(path) => {
            let mut activity =
                activity_matrix(&records, options.activity_method, options.standardize)?;
            let written = write_df_to_file(&mut activity, path, options.output_format)?;
            info!("Activity matrix saved to {}", written.display());
            Some(written)
        }
        None => None,
    };

    Ok(TableSummary {
        affinities: records.len(),
        binding_energy_table,
        activity_matrix,
    })
}

/// Inputs of one batch.
#[derive(Clone, Debug)]
pub struct DockingRequest {
    /// One subdirectory of structures per gene
    pub protein_dir: PathBuf,
    /// Gene, Substrate and Product table
    pub mapping: PathBuf,
    /// Species tree, recorded for downstream visualisation
    pub tree_file: Option<PathBuf>,
    /// Table output options
    pub tables: TableOptions,
}

/// Everything a batch did, written as `run_summary.json`.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    /// Species tree that goes with the results
    pub tree_file: Option<PathBuf>,
    /// Settings the batch ran with
    pub settings: DockingSettings,
    /// Genes with at least one receptor
    pub genes: BTreeSet<String>,
    /// Receptor normalization
    pub receptors_normalized: PrepSummary,
    /// Receptor charge preparation
    pub receptors_prepared: PrepSummary,
    /// Ligand retrieval
    pub ligands: LigandSummary,
    /// Ligand charge preparation
    pub ligands_prepared: BatchPrepReport,
    /// Docking
    pub docking: BatchReport,
    /// Output tables
    pub tables: TableSummary,
}

/// A full docking batch below one output root.
pub struct AutoDocking<'a> {
    layout: PipelineLayout,
    settings: DockingSettings,
    tools: Collaborators<'a>,
}

impl<'a> AutoDocking<'a> {
    /// Batch writing below `output_root`.
    pub fn new(
        output_root: impl Into<PathBuf>,
        settings: DockingSettings,
        tools: Collaborators<'a>,
    ) -> Self {
        Self {
            layout: PipelineLayout::new(output_root),
            settings,
            tools,
        }
    }

    /// Output layout.
    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    /// Run every stage. Only configuration errors and failures to write the
    /// output tree are returned; everything else ends up in the summary.
    pub fn run(&self, request: &DockingRequest) -> Result<RunSummary> {
        let layout = &self.layout;
        layout.create_dirs()?;

        let receptors_normalized = normalize_receptors(
            &request.protein_dir,
            &layout.receptor_pdb,
            self.tools.receptor_converter,
        )?;
        let genes = discover_genes(&layout.receptor_pdb)?;
        let map = GeneLigandMap::from_path(&request.mapping)?;
        check_gene_sets(&genes, &map)?;
        info!(
            "Docking {} gene(s) against {} ligand(s)",
            genes.len(),
            map.all_ligands().len()
        );

        let ligands = LigandCatalog::new(
            self.tools.resolver,
            self.tools.ligand_converter,
            &layout.temp_ligand,
            &layout.ligand_pdb,
        )
        .with_retry(self.settings.name_lookup_retries, self.settings.retry_backoff)
        .fetch_all(&map.all_ligands());
        let ligands_prepared =
            prepare_ligands(&layout.ligand_pdb, &layout.ligand_pdbqt, self.tools.preparer)?;
        let receptors_prepared =
            prepare_receptors(&layout.receptor_pdb, &layout.receptor_pdbqt, self.tools.preparer)?;

        let plan = collect_tasks(
            &layout.receptor_pdb,
            &layout.receptor_pdbqt,
            &layout.ligand_pdbqt,
            &map,
        )?;
        let docking =
            DockingScheduler::new(self.tools.detector, self.tools.engine, layout, &self.settings)
                .run(&plan)?;
        if !docking.is_complete() {
            warn!(
                "{} of {} docking run(s) produced a result",
                docking.succeeded(),
                docking.expected
            );
        }

        let tables = write_tables(
            &layout.docking,
            &map,
            &layout.binding_energy_table(),
            Some(&layout.activity_matrix()),
            &request.tables,
        )?;

        let summary = RunSummary {
            tree_file: request.tree_file.clone(),
            settings: self.settings.clone(),
            genes,
            receptors_normalized,
            receptors_prepared,
            ligands,
            ligands_prepared,
            docking,
            tables,
        };
        let file = std::fs::File::create(layout.run_summary())?;
        serde_json::to_writer_pretty(file, &summary)?;
        info!("Run summary saved to {}", layout.run_summary().display());
        Ok(summary)
    }
}
