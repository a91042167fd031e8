//! Binding affinity extraction from finished docking runs.

use crate::errors::Result;
use crate::mapping::{GeneLigandMap, LigandRole};
use polars::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Rank-1 row of a docking log: mode number 1 followed by its affinity.
static RANK_ONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*1\s+(-?\d+\.\d+)").expect("valid rank pattern"));

/// Separator between gene, receptor and ligand in a run directory name
pub const RUN_NAME_SEPARATOR: &str = "__";

/// Best binding affinity of one docking run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AffinityRecord {
    /// Receptor name, i.e. the species the structure was modeled for
    pub species: String,
    /// Gene
    pub gene: String,
    /// Role of the ligand for this gene
    pub role: LigandRole,
    /// Ligand token
    pub ligand: String,
    /// Affinity of the top-ranked pose
    pub affinity: f64,
}

impl AffinityRecord {
    /// Column key used in the wide affinity matrix.
    pub fn column_key(&self) -> String {
        format!("{}|{}|{}", self.gene, self.role, self.ligand)
    }
}

/// Name of the output directory of one docking run.
pub fn run_name(gene: &str, receptor: &str, ligand: &str) -> String {
    [gene, receptor, ligand].join(RUN_NAME_SEPARATOR)
}

/// Split a run directory name into `(gene, receptor, ligand)`.
///
/// At most two splits are made, so the ligand keeps any further separators.
pub fn split_run_name(name: &str) -> Option<(&str, &str, &str)> {
    let mut parts = name.splitn(3, RUN_NAME_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(gene), Some(receptor), Some(ligand)) => Some((gene, receptor, ligand)),
        _ => None,
    }
}

/// Affinity of the first-ranked pose in a docking log, `None` if no
/// ranked row is present.
pub fn best_affinity(log: &Path) -> Result<Option<f64>> {
    let content = fs::read_to_string(log)?;
    Ok(content
        .lines()
        .find_map(|line| RANK_ONE.captures(line))
        .and_then(|caps| caps[1].parse().ok()))
}

/// Log file of a run directory: the first `.log`, else the first `.txt`.
pub fn find_log(run_dir: &Path) -> Option<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(run_dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    let with_ext = |ext: &str| {
        files
            .iter()
            .find(|p| p.extension().is_some_and(|e| e == ext))
            .cloned()
    };
    with_ext("log").or_else(|| with_ext("txt"))
}

/// Walk `{docking_root}/{gene}/{run}` and collect the best affinity of every
/// run that belongs to a mapped gene and ligand.
pub fn collect_affinities(docking_root: &Path, map: &GeneLigandMap) -> Result<Vec<AffinityRecord>> {
    let mut records = Vec::new();
    for gene_dir in sorted_subdirs(docking_root)? {
        let gene = file_name(&gene_dir);
        let Some(ligands) = map.get(&gene) else {
            debug!("Skipping unmapped gene directory {}", gene_dir.display());
            continue;
        };

        for run_dir in sorted_subdirs(&gene_dir)? {
            let name = file_name(&run_dir);
            let Some((run_gene, species, ligand)) = split_run_name(&name) else {
                debug!("Skipping {name}: not a docking run directory");
                continue;
            };
            if run_gene != gene {
                debug!("Skipping {name}: belongs to {run_gene}, found under {gene}");
                continue;
            }
            let Some(role) = ligands.role_of(ligand) else {
                debug!("Skipping {name}: {ligand} is not mapped to {gene}");
                continue;
            };
            let Some(log) = find_log(&run_dir) else {
                warn!(stage = "table", gene = %gene, receptor = %species, ligand = %ligand, "No docking log found");
                continue;
            };
            match best_affinity(&log) {
                Ok(Some(affinity)) => records.push(AffinityRecord {
                    species: species.to_string(),
                    gene: gene.clone(),
                    role,
                    ligand: ligand.to_string(),
                    affinity,
                }),
                Ok(None) => {
                    warn!(stage = "table", gene = %gene, receptor = %species, ligand = %ligand, "No ranked pose in {}", log.display())
                }
                Err(e) => {
                    warn!(stage = "table", gene = %gene, receptor = %species, ligand = %ligand, "{e}")
                }
            }
        }
    }
    info!("Collected {} binding affinities", records.len());
    Ok(records)
}

/// Long-format table with one row per record.
pub fn records_to_df(records: &[AffinityRecord]) -> Result<DataFrame> {
    Ok(df!(
        "species" => records.iter().map(|r| r.species.clone()).collect::<Vec<String>>(),
        "gene" => records.iter().map(|r| r.gene.clone()).collect::<Vec<String>>(),
        "role" => records.iter().map(|r| r.role.to_string()).collect::<Vec<String>>(),
        "ligand" => records.iter().map(|r| r.ligand.clone()).collect::<Vec<String>>(),
        "affinity" => records.iter().map(|r| r.affinity).collect::<Vec<f64>>(),
    )?)
}

/// Wide table: one row per species (sorted), one `gene|role|ligand` column
/// per docked combination (sorted), null where a run is missing.
pub fn affinity_matrix(records: &[AffinityRecord]) -> Result<DataFrame> {
    let species: Vec<String> = records
        .iter()
        .map(|r| r.species.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let row_of: BTreeMap<&str, usize> = species
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();

    let mut cells: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();
    for record in records {
        let column = cells
            .entry(record.column_key())
            .or_insert_with(|| vec![None; species.len()]);
        column[row_of[record.species.as_str()]] = Some(record.affinity);
    }

    let mut columns = vec![Column::new("species".into(), &species)];
    columns.extend(
        cells
            .into_iter()
            .map(|(key, values)| Column::new(key.into(), values)),
    );
    Ok(DataFrame::new(columns)?)
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::GeneLigands;

    const VINA_LOG: &str = "\
Scoring function : vina
mode |   affinity | dist from best mode
     | (kcal/mol) | rmsd l.b.| rmsd u.b.
-----+------------+----------+----------
   1       -7.412          0          0
   2       -7.105      1.873      2.664
";

    fn write_run(root: &Path, gene: &str, run: &str, file: &str, content: &str) {
        let dir = root.join(gene).join(run);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), content).unwrap();
    }

    fn chs_map() -> GeneLigandMap {
        let mut map = GeneLigandMap::default();
        map.insert(
            "CHS",
            GeneLigands::new(vec!["malonyl-CoA".into()], vec!["naringenin".into()]),
        );
        map
    }

    #[test]
    fn run_names_round_trip() {
        let name = run_name("CHS", "Zea_mays", "5793");
        assert_eq!(name, "CHS__Zea_mays__5793");
        assert_eq!(split_run_name(&name), Some(("CHS", "Zea_mays", "5793")));
        assert_eq!(split_run_name("CHS__Zea"), None);
        assert_eq!(split_run_name("A__B__C__D"), Some(("A", "B", "C__D")));
    }

    #[test]
    fn first_ranked_affinity_is_read() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = tmp.path().join("result.log");
        fs::write(&log, VINA_LOG).unwrap();
        assert_eq!(best_affinity(&log).unwrap(), Some(-7.412));

        fs::write(&log, "mode | affinity\nWriting output ... done.\n").unwrap();
        assert_eq!(best_affinity(&log).unwrap(), None);
    }

    #[test]
    fn log_lookup_prefers_log_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join("vina_config.txt"), "receptor = r\n").unwrap();
        assert_eq!(find_log(tmp.path()), Some(tmp.path().join("vina_config.txt")));
        fs::write(tmp.path().join("result.log"), VINA_LOG).unwrap();
        assert_eq!(find_log(tmp.path()), Some(tmp.path().join("result.log")));
    }

    #[test]
    fn affinities_are_collected_and_filtered() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        write_run(root, "CHS", "CHS__Zea_mays__malonyl-CoA", "result.log", VINA_LOG);
        write_run(root, "CHS", "CHS__Zea_mays__Naringenin", "result.log", "   1   -5.000   0   0\n");
        write_run(root, "CHS", "CHS__Oryza__malonyl-CoA", "result.log", "   1   -6.250   0   0\n");
        // Skipped: wrong gene prefix, unmapped ligand, malformed name, unmapped gene, no log
        write_run(root, "CHS", "PAL__Zea_mays__malonyl-CoA", "result.log", VINA_LOG);
        write_run(root, "CHS", "CHS__Zea_mays__ATP", "result.log", VINA_LOG);
        write_run(root, "CHS", "CHS_Zea_mays_malonyl-CoA", "result.log", VINA_LOG);
        write_run(root, "PAL", "PAL__Zea_mays__malonyl-CoA", "result.log", VINA_LOG);
        write_run(root, "CHS", "CHS__Glycine__malonyl-CoA", "result.pdbqt", "MODEL 1\n");

        let records = collect_affinities(root, &chs_map()).unwrap();
        assert_eq!(records.len(), 3);
        let naringenin = records.iter().find(|r| r.ligand == "Naringenin").unwrap();
        assert_eq!(naringenin.role, LigandRole::Product);
        assert_eq!(naringenin.affinity, -5.0);

        let matrix = affinity_matrix(&records).unwrap();
        assert_eq!(matrix.height(), 2);
        assert_eq!(
            matrix.get_column_names_str(),
            vec![
                "species",
                "CHS|product|Naringenin",
                "CHS|substrate|malonyl-CoA"
            ]
        );
        let species = matrix.column("species").unwrap().str().unwrap();
        assert_eq!(species.get(0), Some("Oryza"));
        let product = matrix.column("CHS|product|Naringenin").unwrap().f64().unwrap();
        assert_eq!(product.get(0), None);
        assert_eq!(product.get(1), Some(-5.0));
    }

    #[test]
    fn long_table_has_one_row_per_record() {
        let records = vec![AffinityRecord {
            species: "Zea_mays".into(),
            gene: "CHS".into(),
            role: LigandRole::Substrate,
            ligand: "5793".into(),
            affinity: -6.5,
        }];
        let df = records_to_df(&records).unwrap();
        assert_eq!(df.shape(), (1, 5));
        assert_eq!(records[0].column_key(), "CHS|substrate|5793");
    }
}
