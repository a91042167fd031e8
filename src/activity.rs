//! Per-species catalytic activity estimates derived from substrate and
//! product binding energies.

use crate::errors::Result;
use crate::table::{records_to_df, AffinityRecord};
use polars::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Gas constant in kcal/(mol K)
const R_KCAL: f64 = 1.987e-3;
/// Temperature in K
const TEMPERATURE: f64 = 298.0;

/// How substrate and product energies are combined into one activity score.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityMethod {
    /// |mean product / mean substrate|
    #[default]
    Ratio,
    /// mean substrate - mean product
    Delta,
    /// exp((mean substrate - mean product) / RT)
    ExpDelta,
}

impl ActivityMethod {
    /// Score from the mean substrate and mean product energies.
    pub fn score(self, mean_substrate: f64, mean_product: f64) -> f64 {
        match self {
            ActivityMethod::Ratio => (mean_product / mean_substrate).abs(),
            ActivityMethod::Delta => mean_substrate - mean_product,
            ActivityMethod::ExpDelta => ((mean_substrate - mean_product) / (R_KCAL * TEMPERATURE)).exp(),
        }
    }
}

#[derive(Default)]
struct RoleMeans {
    substrate: Option<f64>,
    product: Option<f64>,
}

/// Activity of every gene in every species, one row per species (sorted)
/// and one column per gene (sorted).
///
/// Only favorable (negative) energies count; a species-gene pair needs at
/// least one substrate and one product energy. With `standardize`, scores
/// are z-scored per gene using the sample standard deviation, and a gene
/// without spread scores 0 everywhere.
pub fn activity_matrix(
    records: &[AffinityRecord],
    method: ActivityMethod,
    standardize: bool,
) -> Result<DataFrame> {
    let means = records_to_df(records)?
        .lazy()
        .filter(col("affinity").lt(lit(0.0)))
        .group_by([col("species"), col("gene"), col("role")])
        .agg([col("affinity").mean()])
        .collect()?;

    let species = means.column("species")?.str()?;
    let genes = means.column("gene")?.str()?;
    let roles = means.column("role")?.str()?;
    let energies = means.column("affinity")?.f64()?;

    let mut pairs: BTreeMap<(String, String), RoleMeans> = BTreeMap::new();
    for (((s, g), r), e) in species
        .into_iter()
        .zip(genes.into_iter())
        .zip(roles.into_iter())
        .zip(energies.into_iter())
    {
        let (Some(s), Some(g), Some(r), Some(e)) = (s, g, r, e) else {
            continue;
        };
        let entry = pairs.entry((s.to_string(), g.to_string())).or_default();
        match r {
            "substrate" => entry.substrate = Some(e),
            "product" => entry.product = Some(e),
            _ => {}
        }
    }

    let mut scores: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for ((s, g), m) in pairs {
        match (m.substrate, m.product) {
            (Some(sub), Some(prod)) => {
                scores.entry(g).or_default().insert(s, method.score(sub, prod));
            }
            _ => debug!("No activity for {g} in {s}: substrate or product energy missing"),
        }
    }
    if standardize {
        scores.values_mut().for_each(z_score);
    }

    let rows: Vec<String> = scores
        .values()
        .flat_map(|by_species| by_species.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut columns = vec![Column::new("species".into(), &rows)];
    for (gene, by_species) in &scores {
        let values: Vec<Option<f64>> = rows.iter().map(|s| by_species.get(s).copied()).collect();
        columns.push(Column::new(gene.as_str().into(), values));
    }
    Ok(DataFrame::new(columns)?)
}

fn z_score(values: &mut BTreeMap<String, f64>) {
    let n = values.len() as f64;
    let mean = values.values().sum::<f64>() / n;
    let std = if values.len() > 1 {
        (values.values().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        f64::NAN
    };
    for v in values.values_mut() {
        *v = if std > 0.0 { (*v - mean) / std } else { 0.0 };
    }
}
