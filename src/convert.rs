//! Structure format conversion.

use crate::errors::{DockingError, Result};
use crate::tools::run_tool;
use pdbtbx::StrictnessLevel;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Converts one structure file into PDB format.
pub trait StructureConverter: Send + Sync {
    /// Write `output` as the PDB rendition of `input`.
    fn convert(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Native macromolecule conversion (mmCIF or PDB in, PDB out) via [`pdbtbx`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PdbtbxConverter;

impl StructureConverter for PdbtbxConverter {
    fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        let input_str = path_str(input)?;
        let output_str = path_str(output)?;

        let (pdb, warnings) = pdbtbx::ReadOptions::default()
            .set_only_atomic_coords(true)
            .set_level(StrictnessLevel::Loose)
            .read(input_str)
            .map_err(|errors| DockingError::conversion(input, join_errors(&errors)))?;
        for w in &warnings {
            debug!("{}: {w}", input.display());
        }
        if pdb.atom_count() == 0 {
            return Err(DockingError::conversion(input, "structure contains no atoms"));
        }

        pdbtbx::save_pdb(&pdb, output_str, StrictnessLevel::Loose)
            .map_err(|errors| DockingError::conversion(input, join_errors(&errors)))
    }
}

/// Small-molecule conversion through the Open Babel command line.
#[derive(Clone, Debug)]
pub struct ObabelConverter {
    executable: PathBuf,
}

impl ObabelConverter {
    /// Use the given `obabel` binary.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl StructureConverter for ObabelConverter {
    fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(input).arg("-O").arg(output);
        let stderr = run_tool("obabel", cmd, None)?;

        // obabel exits cleanly even when nothing could be read
        let written = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            let _ = std::fs::remove_file(output);
            warn!("obabel produced no molecule for {}", input.display());
            return Err(DockingError::conversion(input, stderr.trim()));
        }
        Ok(())
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| DockingError::conversion(path, "path is not valid UTF-8"))
}

fn join_errors(errors: &[pdbtbx::PDBError]) -> String {
    errors
        .iter()
        .map(|e| e.short_description().to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_ATOMS: &str = "\
ATOM      1  N   ALA A   1      11.104   6.134  -6.504  1.00  0.00           N
ATOM      2  CA  ALA A   1      11.639   6.071  -5.147  1.00  0.00           C
END
";

    #[test]
    fn pdb_roundtrips_through_pdbtbx() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("in.pdb");
        let output = tmp.path().join("out.pdb");
        std::fs::write(&input, TWO_ATOMS).unwrap();

        PdbtbxConverter.convert(&input, &output).unwrap();
        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().filter(|l| l.starts_with("ATOM")).count(), 2);
    }

    #[test]
    fn garbage_structure_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("broken.cif");
        let output = tmp.path().join("broken.pdb");
        std::fs::write(&input, "this is not a structure\n").unwrap();

        let err = PdbtbxConverter.convert(&input, &output).unwrap_err();
        assert!(matches!(err, DockingError::Conversion { .. }));
        assert!(!err.is_fatal());
    }
}
