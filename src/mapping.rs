//! Gene to ligand assignments loaded from a substrate/product table.

use crate::errors::{DockingError, Result};
use polars::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

static LIGAND_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[;,|/]+").expect("valid separator pattern"));

const GENE_COLUMN: &str = "Gene";
const SUBSTRATE_COLUMN: &str = "Substrate";
const PRODUCT_COLUMN: &str = "Product";

/// The part a ligand plays in the reaction catalyzed by a gene product.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LigandRole {
    /// Consumed by the reaction
    Substrate,
    /// Produced by the reaction
    Product,
}

impl fmt::Display for LigandRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LigandRole::Substrate => write!(f, "substrate"),
            LigandRole::Product => write!(f, "product"),
        }
    }
}

/// Ligands of one gene, split by role.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneLigands {
    /// Substrate tokens in table order
    pub substrates: Vec<String>,
    /// Product tokens in table order
    pub products: Vec<String>,
}

impl GeneLigands {
    /// Build from role lists, dropping repeated tokens within a role.
    pub fn new(substrates: Vec<String>, products: Vec<String>) -> Self {
        Self {
            substrates: dedup_in_order(substrates),
            products: dedup_in_order(products),
        }
    }

    /// Union of both roles.
    pub fn ligands(&self) -> BTreeSet<String> {
        self.substrates
            .iter()
            .chain(&self.products)
            .cloned()
            .collect()
    }

    /// Role of a ligand token, compared case-insensitively. Substrate wins
    /// when a token is listed under both roles.
    pub fn role_of(&self, ligand: &str) -> Option<LigandRole> {
        let matches = |list: &[String]| list.iter().any(|l| l.eq_ignore_ascii_case(ligand));
        if matches(&self.substrates) {
            Some(LigandRole::Substrate)
        } else if matches(&self.products) {
            Some(LigandRole::Product)
        } else {
            None
        }
    }

    /// `(role, ligand)` pairs for both roles.
    pub fn by_role(&self) -> impl Iterator<Item = (LigandRole, &str)> {
        self.substrates
            .iter()
            .map(|l| (LigandRole::Substrate, l.as_str()))
            .chain(self.products.iter().map(|l| (LigandRole::Product, l.as_str())))
    }
}

/// Mapping from gene name to the ligands it is docked against.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneLigandMap {
    genes: BTreeMap<String, GeneLigands>,
}

impl GeneLigandMap {
    /// Load a CSV/TSV table with `Gene`, `Substrate` and `Product` columns.
    ///
    /// Column names are matched case-insensitively and the delimiter is
    /// detected from the header line. Any failure here is fatal for a run.
    pub fn from_path(path: &Path) -> Result<Self> {
        let table_err = |message: String| DockingError::MappingTable {
            path: path.to_path_buf(),
            message,
        };

        let content = std::fs::read_to_string(path).map_err(|e| table_err(e.to_string()))?;
        let header = content.lines().next().unwrap_or_default();
        let separator = detect_separator(header);
        debug!(
            "Reading mapping table {} with separator {:?}",
            path.display(),
            separator as char
        );

        let df = CsvReadOptions::default()
            .with_has_header(true)
            // Read every cell as a string, registry IDs must not become integers
            .with_infer_schema_length(Some(0))
            .with_parse_options(CsvParseOptions::default().with_separator(separator))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .and_then(|reader| reader.finish())
            .map_err(|e| table_err(e.to_string()))?;

        Self::from_dataframe(&df).map_err(|e| table_err(e.to_string()))
    }

    /// Build the mapping from an already loaded table.
    pub fn from_dataframe(df: &DataFrame) -> PolarsResult<Self> {
        let columns: HashMap<String, String> = df
            .get_column_names()
            .iter()
            .map(|name| (normalize_header(name.as_str()), name.to_string()))
            .collect();

        let genes = string_column(df, &columns, GENE_COLUMN)?;
        let substrates = string_column(df, &columns, SUBSTRATE_COLUMN)?;
        let products = string_column(df, &columns, PRODUCT_COLUMN)?;

        let mut map = Self::default();
        for ((gene, substrate), product) in genes
            .into_iter()
            .zip(substrates.into_iter())
            .zip(products.into_iter())
        {
            let gene = gene.unwrap_or_default().trim();
            if gene.is_empty() {
                continue;
            }
            let entry = GeneLigands::new(
                split_ligands(substrate.unwrap_or_default()),
                split_ligands(product.unwrap_or_default()),
            );
            if map.genes.contains_key(gene) {
                warn!("Gene {gene} is listed more than once in the mapping table, keeping the last row");
            }
            map.insert(gene, entry);
        }
        Ok(map)
    }

    /// Add or replace the ligands of a gene.
    pub fn insert(&mut self, gene: impl Into<String>, ligands: GeneLigands) {
        self.genes.insert(gene.into(), ligands);
    }

    /// Names of all mapped genes.
    pub fn genes(&self) -> BTreeSet<String> {
        self.genes.keys().cloned().collect()
    }

    /// Whether a gene is mapped.
    pub fn contains_gene(&self, gene: &str) -> bool {
        self.genes.contains_key(gene)
    }

    /// Role-split ligands of one gene.
    pub fn get(&self, gene: &str) -> Option<&GeneLigands> {
        self.genes.get(gene)
    }

    /// Deduplicated ligand tokens of one gene.
    pub fn ligands_for(&self, gene: &str) -> BTreeSet<String> {
        self.genes.get(gene).map(GeneLigands::ligands).unwrap_or_default()
    }

    /// Every ligand token across all genes.
    pub fn all_ligands(&self) -> BTreeSet<String> {
        self.genes.values().flat_map(GeneLigands::ligands).collect()
    }

    /// Iterate over genes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &GeneLigands)> {
        self.genes.iter().map(|(gene, ligands)| (gene.as_str(), ligands))
    }

    /// Number of mapped genes.
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    /// Whether no gene is mapped.
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

/// Require the receptor tree and the mapping table to name exactly the same genes.
pub fn check_gene_sets(receptor_genes: &BTreeSet<String>, map: &GeneLigandMap) -> Result<()> {
    let mapping_genes = map.genes();
    if *receptor_genes == mapping_genes {
        Ok(())
    } else {
        Err(DockingError::GeneSetMismatch {
            receptor_genes: receptor_genes.clone(),
            mapping_genes,
        })
    }
}

/// Split a multi-valued cell on `, ; | /`, replacing inner spaces with `-`.
pub fn split_ligands(cell: &str) -> Vec<String> {
    LIGAND_SEPARATORS
        .split(cell)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| token.replace(' ', "-"))
        .collect()
}

/// Pick the table delimiter from the header line, preferring tabs.
pub fn detect_separator(header: &str) -> u8 {
    [b'\t', b',', b';']
        .into_iter()
        .find(|sep| header.as_bytes().contains(sep))
        .unwrap_or(b',')
}

fn string_column<'a>(
    df: &'a DataFrame,
    columns: &HashMap<String, String>,
    wanted: &str,
) -> PolarsResult<&'a StringChunked> {
    let original = columns.get(wanted).ok_or_else(
        || polars_err!(ColumnNotFound: "missing required columns: Gene, Substrate, Product"),
    )?;
    df.column(original)?.as_materialized_series().str()
}

/// `" gene"` and `"\u{feff}GENE"` both become `"Gene"`.
fn normalize_header(name: &str) -> String {
    let name = name.trim_start_matches('\u{feff}').trim();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn dedup_in_order(tokens: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tokens
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
