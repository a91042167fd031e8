//! Run configuration: external tool locations, docking parameters and the
//! on-disk layout of a pipeline run.

use crate::errors::{DockingError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default search thoroughness passed to the docking engine
pub const EXHAUSTIVENESS: u32 = 32;
/// Default number of poses written by the docking engine
pub const NUM_MODES: u32 = 20;
/// Margin added to every axis of the pocket bounding box
pub const POCKET_PADDING: f64 = 10.0;
/// Attempts made when resolving a ligand name to a registry ID
pub const NAME_LOOKUP_RETRIES: usize = 5;
/// Pause between two name lookup attempts
pub const RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// A resolved external command: the program plus any leading arguments,
/// e.g. an interpreter followed by the script it should run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCommand {
    /// Absolute path of the program
    pub program: PathBuf,
    /// Arguments always passed before the call-specific ones
    pub prefix_args: Vec<OsString>,
}

impl ToolCommand {
    /// A command that is just a binary.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// A script run through an interpreter (e.g. MGLTools' `pythonsh`).
    pub fn with_interpreter(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: interpreter.into(),
            prefix_args: vec![script.into().into_os_string()],
        }
    }

    /// Start a [`std::process::Command`] for this tool.
    pub fn command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.prefix_args);
        cmd
    }
}

/// User-supplied overrides for tool discovery.
#[derive(Clone, Debug, Default)]
pub struct ToolOverrides {
    /// Docking engine binary
    pub vina: Option<PathBuf>,
    /// Pocket detection binary
    pub fpocket: Option<PathBuf>,
    /// Small-molecule format converter
    pub obabel: Option<PathBuf>,
    /// Receptor charge preparation command or script
    pub prepare_receptor: Option<PathBuf>,
    /// Ligand charge preparation command or script
    pub prepare_ligand: Option<PathBuf>,
    /// Interpreter used to run the preparation scripts
    pub interpreter: Option<PathBuf>,
}

/// Absolute locations of every external tool, resolved once at startup.
#[derive(Clone, Debug)]
pub struct ToolPaths {
    /// Docking engine
    pub vina: PathBuf,
    /// Pocket detection
    pub fpocket: PathBuf,
    /// Small-molecule format conversion
    pub obabel: PathBuf,
    /// Receptor charge preparation
    pub prepare_receptor: ToolCommand,
    /// Ligand charge preparation
    pub prepare_ligand: ToolCommand,
}

impl ToolPaths {
    /// Look up every tool, failing on the first one that cannot be found.
    pub fn resolve(overrides: &ToolOverrides) -> Result<Self> {
        let vina = resolve_tool("vina", overrides.vina.as_deref())?;
        let fpocket = resolve_tool("fpocket", overrides.fpocket.as_deref())?;
        let obabel = resolve_tool("obabel", overrides.obabel.as_deref())?;

        let (prepare_receptor, prepare_ligand) = match &overrides.interpreter {
            Some(interpreter) => {
                let interpreter = resolve_tool("pythonsh", Some(interpreter))?;
                let receptor_script = resolve_script(
                    "prepare_receptor4.py",
                    overrides.prepare_receptor.as_deref(),
                )?;
                let ligand_script =
                    resolve_script("prepare_ligand4.py", overrides.prepare_ligand.as_deref())?;
                (
                    ToolCommand::with_interpreter(&interpreter, receptor_script),
                    ToolCommand::with_interpreter(&interpreter, ligand_script),
                )
            }
            None => (
                ToolCommand::new(resolve_tool(
                    "prepare_receptor",
                    overrides.prepare_receptor.as_deref(),
                )?),
                ToolCommand::new(resolve_tool(
                    "prepare_ligand",
                    overrides.prepare_ligand.as_deref(),
                )?),
            ),
        };

        let tools = Self {
            vina,
            fpocket,
            obabel,
            prepare_receptor,
            prepare_ligand,
        };
        debug!("Resolved external tools: {tools:?}");
        Ok(tools)
    }
}

/// Find a binary either at an explicit location or on `PATH`.
pub fn resolve_tool(name: &str, explicit: Option<&Path>) -> Result<PathBuf> {
    let candidate = explicit.map(Path::as_os_str).unwrap_or(OsStr::new(name));
    which::which(candidate).map_err(|_| DockingError::MissingTool(name.to_string()))
}

/// Scripts are passed to an interpreter, so they only need to exist.
fn resolve_script(name: &str, explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(_) => Err(DockingError::MissingTool(name.to_string())),
        None => which::which(name).map_err(|_| DockingError::MissingTool(name.to_string())),
    }
}

/// Parameters controlling docking and retry behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DockingSettings {
    /// Search thoroughness
    pub exhaustiveness: u32,
    /// Number of poses to report
    pub num_modes: u32,
    /// Padding added to each axis of the pocket box
    pub pocket_padding: f64,
    /// Worker threads for docking, 0 uses all logical CPUs
    pub num_threads: usize,
    /// Do not re-dock tasks whose log already holds a ranked result
    pub skip_completed: bool,
    /// Kill a docking run that exceeds this duration
    pub task_timeout: Option<Duration>,
    /// Attempts when resolving ligand names
    pub name_lookup_retries: usize,
    /// Pause between lookup attempts
    pub retry_backoff: Duration,
}

impl Default for DockingSettings {
    fn default() -> Self {
        Self {
            exhaustiveness: EXHAUSTIVENESS,
            num_modes: NUM_MODES,
            pocket_padding: POCKET_PADDING,
            num_threads: 0,
            skip_completed: false,
            task_timeout: None,
            name_lookup_retries: NAME_LOOKUP_RETRIES,
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

/// Directory layout of one pipeline run below the output root.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineLayout {
    /// Output root
    pub root: PathBuf,
    /// Normalized receptor PDB files, one subdirectory per gene
    pub receptor_pdb: PathBuf,
    /// Converted ligand PDB files
    pub ligand_pdb: PathBuf,
    /// Raw downloaded ligand structures
    pub temp_ligand: PathBuf,
    /// Pocket detection cache
    pub temp_center: PathBuf,
    /// Charge-prepared receptors, mirroring `receptor_pdb`
    pub receptor_pdbqt: PathBuf,
    /// Charge-prepared ligands
    pub ligand_pdbqt: PathBuf,
    /// Docking outputs
    pub docking: PathBuf,
}

impl PipelineLayout {
    /// Derive all paths from the output root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            receptor_pdb: root.join("pdb").join("receptor_pdb"),
            ligand_pdb: root.join("pdb").join("ligand_pdb"),
            temp_ligand: root.join("temp").join("ligand"),
            temp_center: root.join("temp").join("center"),
            receptor_pdbqt: root.join("pdbqt").join("receptor_pdbqt"),
            ligand_pdbqt: root.join("pdbqt").join("ligand_pdbqt"),
            docking: root.join("docking"),
            root,
        }
    }

    /// Create every directory of the layout.
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            &self.receptor_pdb,
            &self.ligand_pdb,
            &self.temp_ligand,
            &self.temp_center,
            &self.receptor_pdbqt,
            &self.ligand_pdbqt,
            &self.docking,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Long-format affinity table, without extension.
    pub fn binding_energy_table(&self) -> PathBuf {
        self.root.join("raw_binding_energy")
    }

    /// Per-species activity matrix, without extension.
    pub fn activity_matrix(&self) -> PathBuf {
        self.root.join("catalytic_activity_matrix")
    }

    /// Machine-readable batch report.
    pub fn run_summary(&self) -> PathBuf {
        self.root.join("run_summary.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_engine_contract() {
        let settings = DockingSettings::default();
        assert_eq!(settings.exhaustiveness, 32);
        assert_eq!(settings.num_modes, 20);
        assert_eq!(settings.pocket_padding, 10.0);
        assert_eq!(settings.name_lookup_retries, 5);
        assert_eq!(settings.retry_backoff, Duration::from_secs(3));
        assert!(!settings.skip_completed);
        assert!(settings.task_timeout.is_none());
    }

    #[test]
    fn layout_creates_all_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = PipelineLayout::new(tmp.path());
        layout.create_dirs().unwrap();

        assert!(layout.receptor_pdb.ends_with("pdb/receptor_pdb"));
        assert!(layout.temp_center.ends_with("temp/center"));
        for dir in [&layout.ligand_pdbqt, &layout.docking, &layout.temp_ligand] {
            assert!(dir.is_dir(), "{dir:?} should exist");
        }
    }

    #[test]
    fn unknown_tool_is_fatal() {
        let err = resolve_tool("definitely-not-a-real-docking-tool", None).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, DockingError::MissingTool(name) if name == "definitely-not-a-real-docking-tool"));
    }
}
