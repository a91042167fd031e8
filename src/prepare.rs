//! Charge preparation: adding hydrogens and partial charges to produce the
//! docking engine's PDBQT input format.

use crate::config::ToolCommand;
use crate::errors::{DockingError, Result};
use crate::tools::run_tool;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one batch preparation call.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchPrepReport {
    /// Files written by this call
    pub prepared: Vec<PathBuf>,
    /// Inputs that could not be prepared, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

/// Produces charge-prepared PDBQT files.
pub trait ChargePreparer: Send + Sync {
    /// Prepare a single receptor.
    fn prepare_receptor(&self, input: &Path, output: &Path) -> Result<()>;

    /// Prepare a batch of ligand PDB files into `output_dir`, one
    /// `<stem>.pdbqt` per input. Per-file failures are reported, not raised.
    fn prepare_ligands(&self, inputs: &[PathBuf], output_dir: &Path) -> BatchPrepReport;
}

/// Location of the prepared counterpart of `input` inside `output_dir`.
pub fn pdbqt_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    output_dir.join(format!("{stem}.pdbqt"))
}

/// AutoDockTools `prepare_receptor4` / `prepare_ligand4` (or the ADFR suite
/// equivalents), removing waters and adding hydrogens.
#[derive(Clone, Debug)]
pub struct AutoDockToolsPreparer {
    receptor: ToolCommand,
    ligand: ToolCommand,
    timeout: Option<Duration>,
}

impl AutoDockToolsPreparer {
    /// Use the given receptor and ligand preparation commands.
    pub fn new(receptor: ToolCommand, ligand: ToolCommand) -> Self {
        Self {
            receptor,
            ligand,
            timeout: None,
        }
    }

    /// Abort a single preparation that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn prepare_ligand(&self, input: &Path, output: &Path) -> Result<()> {
        // Both paths must survive the change of working directory below
        let input = std::path::absolute(input)?;
        let output = std::path::absolute(output)?;
        let mut cmd = self.ligand.command();
        // prepare_ligand4 only finds its input relative to the working directory
        if let Some(dir) = input.parent() {
            cmd.current_dir(dir);
        }
        cmd.arg("-l")
            .arg(input.file_name().unwrap_or(input.as_os_str()))
            .arg("-o")
            .arg(&output)
            .args(["-U", "waters", "-A", "hydrogens"]);
        run_tool("prepare_ligand", cmd, self.timeout)?;
        require_output("prepare_ligand", &output)
    }
}

impl ChargePreparer for AutoDockToolsPreparer {
    fn prepare_receptor(&self, input: &Path, output: &Path) -> Result<()> {
        let mut cmd = self.receptor.command();
        cmd.arg("-r")
            .arg(input)
            .arg("-o")
            .arg(output)
            .args(["-U", "waters", "-A", "hydrogens"]);
        run_tool("prepare_receptor", cmd, self.timeout)?;
        require_output("prepare_receptor", output)
    }

    fn prepare_ligands(&self, inputs: &[PathBuf], output_dir: &Path) -> BatchPrepReport {
        let mut report = BatchPrepReport::default();
        for input in inputs {
            let output = pdbqt_path(input, output_dir);
            match self.prepare_ligand(input, &output) {
                Ok(()) => {
                    debug!("Prepared ligand {}", output.display());
                    report.prepared.push(output);
                }
                Err(e) => {
                    warn!(stage = "ligand-prep", ligand = %input.display(), "{e}");
                    report.failed.push((input.clone(), e.to_string()));
                }
            }
        }
        report
    }
}

fn require_output(tool: &str, output: &Path) -> Result<()> {
    if output.is_file() {
        Ok(())
    } else {
        Err(DockingError::tool_failed(
            tool,
            "exit status: 0",
            format!("no output written to {}", output.display()),
        ))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process stand-in for the charge preparation tools.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a stub PDBQT for every input and counts how often it is invoked.
    #[derive(Default)]
    pub struct FakePreparer {
        pub receptor_calls: AtomicUsize,
        pub ligand_batches: AtomicUsize,
        pub fail_on: Option<String>,
    }

    impl FakePreparer {
        pub fn failing_on(stem: &str) -> Self {
            Self {
                fail_on: Some(stem.to_string()),
                ..Default::default()
            }
        }

        fn should_fail(&self, input: &Path) -> bool {
            let stem = input.file_stem().and_then(|s| s.to_str());
            self.fail_on.as_deref().is_some_and(|f| Some(f) == stem)
        }
    }

    impl ChargePreparer for FakePreparer {
        fn prepare_receptor(&self, input: &Path, output: &Path) -> Result<()> {
            self.receptor_calls.fetch_add(1, Ordering::SeqCst);
            if self.should_fail(input) {
                return Err(DockingError::tool_failed("prepare_receptor", "exit status: 1", "bad"));
            }
            std::fs::write(output, "REMARK prepared\n")?;
            Ok(())
        }

        fn prepare_ligands(&self, inputs: &[PathBuf], output_dir: &Path) -> BatchPrepReport {
            self.ligand_batches.fetch_add(1, Ordering::SeqCst);
            let mut report = BatchPrepReport::default();
            for input in inputs {
                if self.should_fail(input) {
                    report.failed.push((input.clone(), "bad".into()));
                    continue;
                }
                let output = pdbqt_path(input, output_dir);
                std::fs::write(&output, "REMARK prepared\n").unwrap();
                report.prepared.push(output);
            }
            report
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepared_path_swaps_extension() {
        assert_eq!(
            pdbqt_path(Path::new("/a/b/Arabidopsis.pdb"), Path::new("/out")),
            PathBuf::from("/out/Arabidopsis.pdbqt")
        );
        assert_eq!(
            pdbqt_path(Path::new("2.3-butanediol.pdb"), Path::new("lig")),
            PathBuf::from("lig/2.3-butanediol.pdbqt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn tool_without_output_is_a_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("rec.pdb");
        std::fs::write(&input, "END\n").unwrap();

        // `true` accepts any arguments and writes nothing
        let preparer = AutoDockToolsPreparer::new(ToolCommand::new("true"), ToolCommand::new("true"));
        let err = preparer
            .prepare_receptor(&input, &tmp.path().join("rec.pdbqt"))
            .unwrap_err();
        assert!(matches!(err, DockingError::ToolFailed { .. }));

        let report = preparer.prepare_ligands(&[input], tmp.path());
        assert!(report.prepared.is_empty());
        assert_eq!(report.failed.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn relative_ligand_output_is_resolved_before_the_directory_change() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("naringenin.pdb");
        std::fs::write(&input, "END\n").unwrap();
        let args_file = tmp.path().join("args.txt");
        let script = tmp.path().join("record.sh");
        std::fs::write(
            &script,
            format!("printf '%s\\n' \"$@\" > '{}'\n", args_file.display()),
        )
        .unwrap();

        let preparer = AutoDockToolsPreparer::new(
            ToolCommand::new("true"),
            ToolCommand::with_interpreter("sh", &script),
        );
        let output_dir = Path::new("relative-ligands");
        let report = preparer.prepare_ligands(&[input], output_dir);
        // Nothing is written, but the tool was told where to write
        assert_eq!(report.failed.len(), 1);

        let args = std::fs::read_to_string(&args_file).unwrap();
        let args: Vec<&str> = args.lines().collect();
        let expected = std::path::absolute(output_dir.join("naringenin.pdbqt")).unwrap();
        assert_eq!(&args[..4], ["-l", "naringenin.pdb", "-o", expected.to_str().unwrap()]);
    }
}
