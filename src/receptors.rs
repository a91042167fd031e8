//! Receptor discovery, name cleaning, format normalization and preparation.

use crate::convert::StructureConverter;
use crate::errors::{DockingError, Result};
use crate::prepare::{pdbqt_path, ChargePreparer};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Words that structure predictors and databases add to file names.
const BOILERPLATE_TAGS: [&str; 5] = ["fold", "model", "structure", "protein", "gene"];

static TAG_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    BOILERPLATE_TAGS
        .iter()
        .map(|tag| Regex::new(&format!(r"(?i)[_-]?{tag}(?:[_-]?\d+)?")).expect("valid tag pattern"))
        .collect()
});

static REPEATED_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_-]{2,}").expect("valid separator pattern"));

/// A receptor structure inside the normalized tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Receptor {
    /// Gene the receptor belongs to (its parent directory name)
    pub gene: String,
    /// Cleaned file stem, usually the species
    pub name: String,
    /// PDB file
    pub pdb: PathBuf,
    /// Directory of `pdb` relative to the tree root
    pub relative_dir: PathBuf,
}

impl Receptor {
    /// Where the charge-prepared file lives inside `pdbqt_root`.
    pub fn prepared_path(&self, pdbqt_root: &Path) -> PathBuf {
        pdbqt_path(&self.pdb, &pdbqt_root.join(&self.relative_dir))
    }
}

/// Counts from a normalization or preparation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PrepSummary {
    /// Artifacts written in this pass
    pub written: usize,
    /// Artifacts that already existed
    pub existing: usize,
    /// Inputs that were skipped because of an error
    pub failed: usize,
}

/// Strip the gene name and boilerplate tags from a file stem.
///
/// Matching is case-insensitive; a tag may carry a trailing number
/// (`model_1`, `fold-2`). Runs of separators collapse to a single `_`.
///
/// # Example
///
/// ```
/// use genedock::clean_filename;
///
/// let name = clean_filename("CHS_Arabidopsis_thaliana_fold_model_0", "CHS").unwrap();
/// assert_eq!(name, "Arabidopsis_thaliana");
/// ```
pub fn clean_filename(stem: &str, gene: &str) -> Result<String> {
    let invalid = || DockingError::InvalidName {
        stem: stem.to_string(),
        gene: gene.to_string(),
    };

    let mut name = stem.to_string();
    if !gene.is_empty() {
        let gene_pattern = Regex::new(&format!(r"(?i)[_-]?{}[_-]?", regex::escape(gene)))
            .map_err(|_| invalid())?;
        name = gene_pattern.replace_all(&name, "").into_owned();
    }
    for pattern in TAG_PATTERNS.iter() {
        name = pattern.replace_all(&name, "").into_owned();
    }
    let name = REPEATED_SEPARATORS
        .replace_all(&name, "_")
        .trim_matches(|c| c == '_' || c == '-')
        .to_string();

    if name.is_empty() {
        Err(invalid())
    } else {
        Ok(name)
    }
}

/// Genes with at least one `.pdb` or `.cif` file in their directory.
pub fn discover_genes(root: &Path) -> Result<BTreeSet<String>> {
    let mut genes = BTreeSet::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let has_structure = std::fs::read_dir(&path)?
            .filter_map(|e| e.ok())
            .any(|e| structure_kind(&e.path()).is_some());
        if has_structure {
            if let Some(gene) = path.file_name().and_then(|n| n.to_str()) {
                genes.insert(gene.to_string());
            }
        }
    }
    Ok(genes)
}

/// Copy PDB files and convert mmCIF files from `{input_root}/{gene}/` into
/// `{output_root}/{gene}/` under cleaned names.
///
/// Files that cannot be named or converted are logged and skipped.
pub fn normalize_receptors(
    input_root: &Path,
    output_root: &Path,
    converter: &dyn StructureConverter,
) -> Result<PrepSummary> {
    let mut summary = PrepSummary::default();
    let mut gene_dirs: Vec<PathBuf> = std::fs::read_dir(input_root)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    gene_dirs.sort();

    for gene_dir in gene_dirs {
        let Some(gene) = gene_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let out_dir = output_root.join(gene);
        std::fs::create_dir_all(&out_dir)?;
        let gene_summary = normalize_gene_dir(&gene_dir, &out_dir, gene, converter)?;
        summary.written += gene_summary.written;
        summary.existing += gene_summary.existing;
        summary.failed += gene_summary.failed;
    }
    info!(
        "Normalized {} receptor(s), {} failed",
        summary.written, summary.failed
    );
    Ok(summary)
}

fn normalize_gene_dir(
    gene_dir: &Path,
    out_dir: &Path,
    gene: &str,
    converter: &dyn StructureConverter,
) -> Result<PrepSummary> {
    let mut summary = PrepSummary::default();
    let mut files: Vec<PathBuf> = std::fs::read_dir(gene_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    let mut seen = BTreeSet::new();
    for src in files {
        let Some(kind) = structure_kind(&src) else {
            continue;
        };
        let stem = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match clean_filename(&stem, gene) {
            Ok(name) => name,
            Err(e) => {
                warn!(stage = "receptor-normalize", gene, receptor = %stem, "{e}");
                summary.failed += 1;
                continue;
            }
        };
        if !seen.insert(name.clone()) {
            warn!(
                gene,
                receptor = %name,
                "{} cleans to a name already used in this gene and overwrites it",
                src.display()
            );
        }

        let dst = out_dir.join(format!("{name}.pdb"));
        let result = match kind {
            StructureKind::Pdb => std::fs::copy(&src, &dst).map(|_| ()).map_err(Into::into),
            StructureKind::Mmcif => converter.convert(&src, &dst),
        };
        match result {
            Ok(()) => {
                debug!("{} -> {}", src.display(), dst.display());
                summary.written += 1;
            }
            Err(e) => {
                warn!(stage = "receptor-normalize", gene, receptor = %name, "{e}");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

/// Every `.pdb` below `root`, with its gene taken from the parent directory.
pub fn list_receptors(root: &Path) -> Result<Vec<Receptor>> {
    let mut receptors = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            if structure_kind(&path) != Some(StructureKind::Pdb) {
                continue;
            }
            let gene = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = path
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let relative_dir = dir.strip_prefix(root).unwrap_or(&dir).to_path_buf();
            receptors.push(Receptor {
                gene,
                name,
                pdb: path,
                relative_dir,
            });
        }
    }
    receptors.sort_by(|a, b| a.pdb.cmp(&b.pdb));
    Ok(receptors)
}

/// Charge-prepare one receptor unless its output already exists.
///
/// Returns the prepared path and whether a tool was invoked.
pub fn prepare_receptor(
    receptor: &Receptor,
    pdbqt_root: &Path,
    preparer: &dyn ChargePreparer,
) -> Result<(PathBuf, bool)> {
    let output = receptor.prepared_path(pdbqt_root);
    if output.exists() {
        debug!("Receptor already prepared: {}", output.display());
        return Ok((output, false));
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    preparer.prepare_receptor(&receptor.pdb, &output)?;
    Ok((output, true))
}

/// Prepare every receptor of the normalized tree into the mirrored PDBQT tree.
pub fn prepare_receptors(
    pdb_root: &Path,
    pdbqt_root: &Path,
    preparer: &dyn ChargePreparer,
) -> Result<PrepSummary> {
    let mut summary = PrepSummary::default();
    for receptor in list_receptors(pdb_root)? {
        match prepare_receptor(&receptor, pdbqt_root, preparer) {
            Ok((_, true)) => summary.written += 1,
            Ok((_, false)) => summary.existing += 1,
            Err(e) => {
                warn!(
                    stage = "receptor-prep",
                    gene = %receptor.gene,
                    receptor = %receptor.name,
                    "{e}"
                );
                summary.failed += 1;
            }
        }
    }
    info!(
        "Prepared {} receptor(s), {} already present, {} failed",
        summary.written, summary.existing, summary.failed
    );
    Ok(summary)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StructureKind {
    Pdb,
    Mmcif,
}

fn structure_kind(path: &Path) -> Option<StructureKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdb" => Some(StructureKind::Pdb),
        "cif" => Some(StructureKind::Mmcif),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepare::testing::FakePreparer;
    use std::sync::atomic::Ordering;

    struct CopyConverter;

    impl StructureConverter for CopyConverter {
        fn convert(&self, input: &Path, output: &Path) -> Result<()> {
            if std::fs::read_to_string(input)?.contains("corrupt") {
                return Err(DockingError::conversion(input, "unreadable"));
            }
            std::fs::copy(input, output)?;
            Ok(())
        }
    }

    fn touch(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn filename_cleaning() {
        assert_eq!(
            clean_filename("GeneX_Populus_trichocarpa_fold_model_1", "GeneX").unwrap(),
            "Populus_trichocarpa"
        );
        assert_eq!(clean_filename("genex-Oryza--sativa", "GeneX").unwrap(), "Oryza_sativa");
        assert_eq!(clean_filename("Zea_mays_structure2", "PAL").unwrap(), "Zea_mays");
        // Deterministic
        assert_eq!(
            clean_filename("PAL_Vitis_protein_3", "PAL").unwrap(),
            clean_filename("PAL_Vitis_protein_3", "PAL").unwrap()
        );
    }

    #[test]
    fn fully_stripped_name_is_invalid() {
        let err = clean_filename("GeneX_fold_model_1", "GeneX").unwrap_err();
        assert!(matches!(err, DockingError::InvalidName { .. }));
        assert!(!err.is_fatal());
        assert!(clean_filename("__", "").is_err());
    }

    #[test]
    fn gene_name_is_escaped() {
        assert_eq!(clean_filename("C4H.1_Glycine_max", "C4H.1").unwrap(), "Glycine_max");
    }

    #[test]
    fn normalize_copies_converts_and_skips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("input");
        let output = tmp.path().join("normalized");
        touch(&input.join("CHS/CHS_Arabidopsis_model_0.pdb"), "ATOM\n");
        touch(&input.join("CHS/CHS_Petunia.cif"), "data_x\n");
        touch(&input.join("CHS/CHS_Bad.cif"), "corrupt\n");
        touch(&input.join("CHS/CHS_fold.pdb"), "ATOM\n");
        touch(&input.join("CHS/notes.txt"), "ignored\n");
        touch(&input.join("PAL/PAL_Zea.pdb"), "ATOM\n");

        let summary = normalize_receptors(&input, &output, &CopyConverter).unwrap();
        assert_eq!(summary.written, 3);
        assert_eq!(summary.failed, 2);
        assert!(output.join("CHS/Arabidopsis.pdb").is_file());
        assert!(output.join("CHS/Petunia.pdb").is_file());
        assert!(output.join("PAL/Zea.pdb").is_file());
        assert!(!output.join("CHS/notes.pdb").exists());

        assert_eq!(
            discover_genes(&output).unwrap(),
            BTreeSet::from(["CHS".to_string(), "PAL".to_string()])
        );
    }

    #[test]
    fn genes_without_structures_are_not_discovered() {
        let tmp = tempfile::TempDir::new().unwrap();
        touch(&tmp.path().join("A/a.pdb"), "");
        touch(&tmp.path().join("B/readme.md"), "");
        std::fs::create_dir_all(tmp.path().join("C")).unwrap();
        touch(&tmp.path().join("D/d.CIF"), "");

        assert_eq!(
            discover_genes(tmp.path()).unwrap(),
            BTreeSet::from(["A".to_string(), "D".to_string()])
        );
    }

    #[test]
    fn receptors_mirror_into_prepared_tree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pdb_root = tmp.path().join("pdb");
        touch(&pdb_root.join("CHS/Arabidopsis.pdb"), "ATOM\n");

        let receptors = list_receptors(&pdb_root).unwrap();
        assert_eq!(receptors.len(), 1);
        assert_eq!(receptors[0].gene, "CHS");
        assert_eq!(receptors[0].name, "Arabidopsis");
        assert_eq!(
            receptors[0].prepared_path(Path::new("/qt")),
            PathBuf::from("/qt/CHS/Arabidopsis.pdbqt")
        );
    }

    #[test]
    fn preparation_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pdb_root = tmp.path().join("pdb");
        let pdbqt_root = tmp.path().join("pdbqt");
        touch(&pdb_root.join("CHS/Arabidopsis.pdb"), "ATOM\n");
        touch(&pdb_root.join("CHS/Petunia.pdb"), "ATOM\n");

        let preparer = FakePreparer::default();
        let first = prepare_receptors(&pdb_root, &pdbqt_root, &preparer).unwrap();
        assert_eq!(first.written, 2);
        assert_eq!(preparer.receptor_calls.load(Ordering::SeqCst), 2);
        assert!(pdbqt_root.join("CHS/Petunia.pdbqt").is_file());

        let second = prepare_receptors(&pdb_root, &pdbqt_root, &preparer).unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.existing, 2);
        assert_eq!(preparer.receptor_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_preparation_does_not_stop_the_batch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pdb_root = tmp.path().join("pdb");
        let pdbqt_root = tmp.path().join("pdbqt");
        touch(&pdb_root.join("CHS/Arabidopsis.pdb"), "ATOM\n");
        touch(&pdb_root.join("CHS/Petunia.pdb"), "ATOM\n");

        let preparer = FakePreparer::failing_on("Arabidopsis");
        let summary = prepare_receptors(&pdb_root, &pdbqt_root, &preparer).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.written, 1);
    }
}
