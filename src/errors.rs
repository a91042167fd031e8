//! Error types for the docking pipeline.
//!
//! Only configuration-class errors ([`DockingError::is_fatal`]) are allowed to
//! abort a batch. Everything else is logged where it happens and the affected
//! receptor, ligand or task is left out of the results.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DockingError>;

/// Unified error type for all pipeline stages.
#[derive(Error, Debug)]
pub enum DockingError {
    /// Genes found in the receptor tree differ from the genes in the mapping table.
    #[error(
        "gene names in the receptor directory {receptor_genes:?} do not match the mapping table {mapping_genes:?}"
    )]
    GeneSetMismatch {
        /// Genes discovered under the receptor tree
        receptor_genes: BTreeSet<String>,
        /// Genes listed in the mapping table
        mapping_genes: BTreeSet<String>,
    },

    /// A required external binary could not be found.
    #[error("required tool '{0}' was not found on PATH")]
    MissingTool(String),

    /// The gene-ligand mapping table is missing or malformed.
    #[error("failed to read mapping table {path}: {message}")]
    MappingTable {
        /// Path of the table
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Name cleaning left nothing of a receptor file stem.
    #[error("invalid receptor name '{stem}' for gene '{gene}'")]
    InvalidName {
        /// Original file stem
        stem: String,
        /// Gene the receptor belongs to
        gene: String,
    },

    /// A structure file could not be converted.
    #[error("failed to convert {path}: {message}")]
    Conversion {
        /// Input structure
        path: PathBuf,
        /// Converter message
        message: String,
    },

    /// No usable pocket could be derived for a receptor.
    #[error("no pocket available for {0}")]
    PocketUnavailable(String),

    /// An external tool exited unsuccessfully.
    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailed {
        /// Tool name
        tool: String,
        /// Exit status description
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// An external tool ran past its time limit and was killed.
    #[error("{tool} timed out after {timeout:?}")]
    ToolTimeout {
        /// Tool name
        tool: String,
        /// Limit that was exceeded
        timeout: Duration,
    },

    /// Ligand lookup or download failed.
    #[error("ligand '{ligand}' could not be retrieved: {message}")]
    LigandRetrieval {
        /// Ligand token
        ligand: String,
        /// Reason
        message: String,
    },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Table building errors.
    #[error("table error: {0}")]
    Table(#[from] polars::prelude::PolarsError),

    /// Serialization errors.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DockingError {
    /// Whether this error must halt the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DockingError::GeneSetMismatch { .. }
                | DockingError::MissingTool(_)
                | DockingError::MappingTable { .. }
        )
    }

    /// Creates a tool failure from a process status and its stderr.
    pub fn tool_failed(
        tool: impl Into<String>,
        status: impl ToString,
        stderr: impl Into<String>,
    ) -> Self {
        DockingError::ToolFailed {
            tool: tool.into(),
            status: status.to_string(),
            stderr: stderr.into(),
        }
    }

    /// Creates a conversion error.
    pub fn conversion(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        DockingError::Conversion {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a ligand retrieval error.
    pub fn ligand(ligand: impl Into<String>, message: impl Into<String>) -> Self {
        DockingError::LigandRetrieval {
            ligand: ligand.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_errors_are_fatal() {
        let mismatch = DockingError::GeneSetMismatch {
            receptor_genes: BTreeSet::from(["A".to_string()]),
            mapping_genes: BTreeSet::from(["B".to_string()]),
        };
        assert!(mismatch.is_fatal());
        assert!(DockingError::MissingTool("vina".into()).is_fatal());

        assert!(!DockingError::PocketUnavailable("rec".into()).is_fatal());
        assert!(!DockingError::tool_failed("vina", "exit status: 1", "boom").is_fatal());
        assert!(!DockingError::ligand("ATP", "offline").is_fatal());
    }
}
