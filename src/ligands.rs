//! Ligand retrieval: name resolution, 3D structure download, conversion and
//! batch charge preparation.

use crate::convert::StructureConverter;
use crate::errors::{DockingError, Result};
use crate::prepare::{pdbqt_path, BatchPrepReport, ChargePreparer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// PubChem PUG REST endpoint
pub const PUBCHEM_BASE_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";
/// Downloads smaller than this are error pages, not structures
const MIN_SDF_BYTES: usize = 100;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Looks up chemical identifiers and 3D structures.
pub trait CompoundResolver: Send + Sync {
    /// Registry ID of a compound name.
    fn resolve_cid(&self, name: &str) -> Result<String>;
    /// 3D SDF record of a registry ID.
    fn download_sdf(&self, cid: &str) -> Result<Vec<u8>>;
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CidResponse {
    identifier_list: IdentifierList,
}

#[derive(Deserialize)]
struct IdentifierList {
    #[serde(rename = "CID")]
    cid: Vec<u64>,
}

/// [`CompoundResolver`] backed by the PubChem REST API.
pub struct PubChem {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl PubChem {
    /// Client for the public PubChem service.
    pub fn new() -> Result<Self> {
        Self::with_base_url(PUBCHEM_BASE_URL)
    }

    /// Client for a PubChem-compatible mirror.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| DockingError::ligand("*", e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| DockingError::ligand(segments.join("/"), e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| DockingError::ligand(segments.join("/"), "base URL cannot hold a path"))?
            .extend(segments);
        Ok(url)
    }
}

impl CompoundResolver for PubChem {
    fn resolve_cid(&self, name: &str) -> Result<String> {
        let url = self.url(&["compound", "name", name, "cids", "JSON"])?;
        let body: CidResponse = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| DockingError::ligand(name, e.to_string()))?;
        body.identifier_list
            .cid
            .first()
            .map(|cid| cid.to_string())
            .ok_or_else(|| DockingError::ligand(name, "no registry ID returned"))
    }

    fn download_sdf(&self, cid: &str) -> Result<Vec<u8>> {
        let mut url = self.url(&["compound", "cid", cid, "SDF"])?;
        url.set_query(Some("record_type=3d"));
        let bytes = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(|e| DockingError::ligand(cid, e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// A ligand with a structure ready for charge preparation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Ligand {
    /// Token from the mapping table
    pub token: String,
    /// Registry ID, when it was looked up or given
    pub cid: Option<String>,
    /// Downloaded SDF
    pub raw: PathBuf,
    /// Converted PDB
    pub pdb: PathBuf,
}

/// Results of fetching a set of ligands.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LigandSummary {
    /// Ligands with a PDB structure
    pub fetched: Vec<Ligand>,
    /// Tokens that could not be fetched, with the reason
    pub failed: Vec<(String, String)>,
}

/// A token made only of digits is a registry ID.
pub fn is_registry_id(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// File stem under which a ligand's artifacts are stored.
pub fn ligand_label(token: &str) -> String {
    token.trim().replace(' ', "-")
}

/// Resolves, downloads and converts ligands, caching every artifact on disk.
pub struct LigandCatalog<'a> {
    resolver: &'a dyn CompoundResolver,
    converter: &'a dyn StructureConverter,
    raw_dir: PathBuf,
    pdb_dir: PathBuf,
    retries: usize,
    backoff: Duration,
}

impl<'a> LigandCatalog<'a> {
    /// Store raw downloads in `raw_dir` and converted structures in `pdb_dir`.
    pub fn new(
        resolver: &'a dyn CompoundResolver,
        converter: &'a dyn StructureConverter,
        raw_dir: impl Into<PathBuf>,
        pdb_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver,
            converter,
            raw_dir: raw_dir.into(),
            pdb_dir: pdb_dir.into(),
            retries: crate::config::NAME_LOOKUP_RETRIES,
            backoff: crate::config::RETRY_BACKOFF,
        }
    }

    /// Override the name lookup retry policy.
    pub fn with_retry(mut self, retries: usize, backoff: Duration) -> Self {
        self.retries = retries.max(1);
        self.backoff = backoff;
        self
    }

    /// Make one ligand available as PDB.
    ///
    /// An existing raw download short-circuits lookup and download; an
    /// existing PDB short-circuits conversion.
    pub fn fetch(&self, token: &str) -> Result<Ligand> {
        let label = ligand_label(token);
        let raw = self.raw_dir.join(format!("{label}.sdf"));
        let pdb = self.pdb_dir.join(format!("{label}.pdb"));
        let mut cid = is_registry_id(&label).then(|| label.clone());

        if raw.is_file() {
            debug!("Using cached structure {}", raw.display());
        } else {
            let id = match cid.clone() {
                Some(id) => id,
                None => self.resolve_with_retry(&label)?,
            };
            let sdf = self.resolver.download_sdf(&id)?;
            if sdf.len() < MIN_SDF_BYTES {
                return Err(DockingError::ligand(
                    token,
                    format!("downloaded record for {id} is too small to be a structure"),
                ));
            }
            std::fs::write(&raw, &sdf)?;
            info!("Downloaded {label} (CID {id})");
            cid = Some(id);
        }

        if !pdb.is_file() {
            if let Err(e) = self.converter.convert(&raw, &pdb) {
                let _ = std::fs::remove_file(&pdb);
                return Err(e);
            }
        }

        Ok(Ligand {
            token: label,
            cid,
            raw,
            pdb,
        })
    }

    /// Fetch every token; failures are logged and reported, never raised.
    pub fn fetch_all<'t>(&self, tokens: impl IntoIterator<Item = &'t String>) -> LigandSummary {
        let mut summary = LigandSummary::default();
        for token in tokens {
            match self.fetch(token) {
                Ok(ligand) => summary.fetched.push(ligand),
                Err(e) => {
                    warn!(stage = "ligand-fetch", ligand = %token, "{e}");
                    summary.failed.push((token.clone(), e.to_string()));
                }
            }
        }
        info!(
            "Fetched {} ligand(s), {} failed",
            summary.fetched.len(),
            summary.failed.len()
        );
        summary
    }

    fn resolve_with_retry(&self, name: &str) -> Result<String> {
        let mut last_error = None;
        for attempt in 1..=self.retries {
            match self.resolver.resolve_cid(name) {
                Ok(cid) => return Ok(cid),
                Err(e) => {
                    warn!("Lookup of {name} failed (attempt {attempt}/{}): {e}", self.retries);
                    last_error = Some(e);
                    if attempt < self.retries {
                        thread::sleep(self.backoff);
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| DockingError::ligand(name, "lookup was not attempted")))
    }
}

/// Charge-prepare every ligand PDB in `pdb_dir` lacking a PDBQT in
/// `pdbqt_dir`, in a single call to the preparer.
pub fn prepare_ligands(
    pdb_dir: &Path,
    pdbqt_dir: &Path,
    preparer: &dyn ChargePreparer,
) -> Result<BatchPrepReport> {
    let mut pending: Vec<PathBuf> = std::fs::read_dir(pdb_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdb")))
        .filter(|p| !pdbqt_path(p, pdbqt_dir).exists())
        .collect();
    pending.sort();

    if pending.is_empty() {
        debug!("All ligands already prepared");
        return Ok(BatchPrepReport::default());
    }
    std::fs::create_dir_all(pdbqt_dir)?;
    let report = preparer.prepare_ligands(&pending, pdbqt_dir);
    info!(
        "Prepared {} ligand(s), {} failed",
        report.prepared.len(),
        report.failed.len()
    );
    Ok(report)
}
