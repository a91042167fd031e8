#![warn(missing_docs)]

//! # Genedock Library
//!
//! Batch receptor-ligand docking across genes and species. Receptor
//! structures are organized as one directory per gene, ligands are assigned
//! to genes as substrates or products, and every receptor of a gene is docked
//! against every ligand of that gene inside its top-ranked binding pocket.
//!
//! The best affinity of each run is gathered into Polars DataFrames: a wide
//! affinity table and a per-species catalytic activity matrix.
//!
//! External programs (structure conversion, charge preparation, pocket
//! detection, docking) sit behind traits so that each stage can be driven
//! with other implementations.

pub mod activity;
pub mod cache;
pub mod config;
pub mod convert;
pub mod errors;
pub mod ligands;
pub mod mapping;
pub mod pipeline;
pub mod pocket;
pub mod prepare;
pub mod receptors;
pub mod scheduler;
pub mod table;
pub mod tools;
pub mod utils;

// Re-export key public types
pub use activity::{activity_matrix, ActivityMethod};
pub use config::{DockingSettings, PipelineLayout, ToolOverrides, ToolPaths};
pub use errors::{DockingError, Result};
pub use mapping::{GeneLigandMap, GeneLigands, LigandRole};
pub use pipeline::{AutoDocking, Collaborators, DockingRequest, ExternalTools, TableOptions};
pub use pocket::Pocket;
pub use receptors::clean_filename;
pub use scheduler::{BatchReport, DockingScheduler, DockingTask, TaskState};
pub use table::{affinity_matrix, AffinityRecord};
pub use utils::{run_with_threads, write_df_to_file, DataFrameFileType};
