//! Binding pocket detection and search box derivation.

use crate::cache::PocketCache;
use crate::errors::{DockingError, Result};
use crate::tools::run_tool;
use nalgebra::Vector3;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::warn;

/// Vertex file of the top-ranked pocket inside a detection output directory
const POCKET_VERTICES: &str = "pockets/pocket1_vert.pqr";

/// Search box around a binding pocket.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pocket {
    /// Mean of the pocket vertex coordinates
    pub center: Vector3<f64>,
    /// Per-axis vertex span plus padding
    pub size: Vector3<f64>,
}

impl Pocket {
    /// Box enclosing `points` with `padding` added to every axis.
    /// Returns `None` for an empty point set.
    pub fn from_points(points: &[Vector3<f64>], padding: f64) -> Option<Self> {
        let first = points.first()?;
        let (min, max, sum) = points.iter().fold(
            (*first, *first, Vector3::<f64>::zeros()),
            |(min, max, sum), p| (min.inf(p), max.sup(p), sum + p),
        );
        Some(Self {
            center: sum / points.len() as f64,
            size: (max - min).add_scalar(padding),
        })
    }
}

impl fmt::Display for Pocket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "center: ({:.3}, {:.3}, {:.3})  size: ({:.3}, {:.3}, {:.3})",
            self.center.x, self.center.y, self.center.z, self.size.x, self.size.y, self.size.z
        )
    }
}

/// Read the search box from a detection output directory.
///
/// Coordinates are taken from whitespace-split fields 6 to 8 of the `ATOM`
/// and `HETATM` records of the first pocket's vertex file.
pub fn parse_pocket_pqr(out_dir: &Path, padding: f64) -> Result<Pocket> {
    let unavailable = || DockingError::PocketUnavailable(out_dir.display().to_string());
    let pqr = out_dir.join(POCKET_VERTICES);
    let content = std::fs::read_to_string(&pqr).map_err(|_| unavailable())?;

    let mut points = Vec::new();
    for line in content.lines() {
        if !(line.starts_with("ATOM") || line.starts_with("HETATM")) {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let coords = fields
            .get(5..8)
            .and_then(|xyz| {
                xyz.iter()
                    .map(|v| v.parse::<f64>().ok())
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or_else(unavailable)?;
        points.push(Vector3::new(coords[0], coords[1], coords[2]));
    }
    Pocket::from_points(&points, padding).ok_or_else(unavailable)
}

/// Detects pockets on a receptor.
pub trait PocketDetector: Send + Sync {
    /// Run detection on `receptor` inside the private directory `workdir`
    /// and return the produced output directory.
    fn detect(&self, receptor: &Path, workdir: &Path) -> Result<PathBuf>;
}

/// The fpocket command line tool.
#[derive(Clone, Debug)]
pub struct Fpocket {
    executable: PathBuf,
    timeout: Option<Duration>,
}

impl Fpocket {
    /// Use the given `fpocket` binary.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: None,
        }
    }

    /// Kill a detection that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl PocketDetector for Fpocket {
    fn detect(&self, receptor: &Path, workdir: &Path) -> Result<PathBuf> {
        let unavailable = || DockingError::PocketUnavailable(receptor.display().to_string());
        let file_name = receptor.file_name().ok_or_else(unavailable)?;
        let stem = receptor.file_stem().ok_or_else(unavailable)?.to_string_lossy();

        // fpocket writes next to its input, so it only ever sees a private copy
        std::fs::copy(receptor, workdir.join(file_name))?;
        let mut cmd = Command::new(&self.executable);
        cmd.current_dir(workdir).arg("-f").arg(file_name);
        run_tool("fpocket", cmd, self.timeout)?;

        let out = workdir.join(format!("{stem}_out"));
        if out.is_dir() {
            Ok(out)
        } else {
            Err(unavailable())
        }
    }
}

/// Resolves search boxes through the pocket cache.
pub struct PocketLocator<'a> {
    detector: &'a dyn PocketDetector,
    cache: PocketCache,
    padding: f64,
}

impl<'a> PocketLocator<'a> {
    /// Locator storing detection results under `cache`.
    pub fn new(detector: &'a dyn PocketDetector, cache: PocketCache, padding: f64) -> Self {
        Self {
            detector,
            cache,
            padding,
        }
    }

    /// Search box of `receptor`, detecting its pockets when not cached.
    pub fn locate(&self, receptor: &Path, gene: &str) -> Result<Pocket> {
        let stem = receptor_stem(receptor)?;
        self.cache.get_or_compute(
            gene,
            &stem,
            |scratch| self.run_detection(receptor, scratch),
            |entry| parse_pocket_pqr(entry, self.padding),
        )
    }

    fn run_detection(&self, receptor: &Path, scratch: &Path) -> Result<PathBuf> {
        self.detector.detect(receptor, scratch).inspect_err(|e| {
            warn!(stage = "pocket", receptor = %receptor.display(), "{e}");
        })
    }
}

fn receptor_stem(receptor: &Path) -> Result<String> {
    receptor
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| DockingError::PocketUnavailable(receptor.display().to_string()))
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeDetector, PQR};
    use super::*;
    use std::sync::atomic::Ordering;

    fn assert_close(actual: Vector3<f64>, expected: [f64; 3]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-3, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn pocket_box_from_vertices() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("pockets")).unwrap();
        std::fs::write(tmp.path().join(POCKET_VERTICES), PQR).unwrap();

        let pocket = parse_pocket_pqr(tmp.path(), 10.0).unwrap();
        assert_close(pocket.center, [0.667, 0.667, 0.0]);
        assert_close(pocket.size, [12.0, 12.0, 10.0]);
        assert_eq!(
            pocket.to_string(),
            "center: (0.667, 0.667, 0.000)  size: (12.000, 12.000, 10.000)"
        );
    }

    #[test]
    fn empty_or_missing_pockets_are_unavailable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = parse_pocket_pqr(tmp.path(), 10.0).unwrap_err();
        assert!(matches!(err, DockingError::PocketUnavailable(_)));

        std::fs::create_dir_all(tmp.path().join("pockets")).unwrap();
        std::fs::write(tmp.path().join(POCKET_VERTICES), "HEADER\nEND\n").unwrap();
        assert!(parse_pocket_pqr(tmp.path(), 10.0).is_err());
    }

    #[test]
    fn malformed_record_is_a_parse_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("pockets")).unwrap();
        std::fs::write(tmp.path().join(POCKET_VERTICES), "ATOM 1 C STP 1 x y z\n").unwrap();
        assert!(parse_pocket_pqr(tmp.path(), 10.0).is_err());
    }

    #[test]
    fn located_pockets_are_cached() {
        let tmp = tempfile::TempDir::new().unwrap();
        let receptor = tmp.path().join("Zea_mays.pdb");
        std::fs::write(&receptor, "END\n").unwrap();

        let detector = FakeDetector::default();
        let cache = PocketCache::new(tmp.path().join("center"));
        let locator = PocketLocator::new(&detector, cache.clone(), 10.0);

        let pocket = locator.locate(&receptor, "CHS").unwrap();
        assert_close(pocket.size, [12.0, 12.0, 10.0]);
        assert!(cache.exists("CHS", "Zea_mays"));

        locator.locate(&receptor, "CHS").unwrap();
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unusable_cache_entry_is_recomputed_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let receptor = tmp.path().join("Oryza.pdb");
        std::fs::write(&receptor, "END\n").unwrap();

        let detector = FakeDetector {
            empty: vec!["Oryza".into()],
            ..Default::default()
        };
        let locator =
            PocketLocator::new(&detector, PocketCache::new(tmp.path().join("center")), 10.0);

        // Fresh detection without pockets fails outright
        assert!(locator.locate(&receptor, "PAL").is_err());
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);

        // The stale entry is recomputed exactly once before giving up
        let err = locator.locate(&receptor, "PAL").unwrap_err();
        assert!(matches!(err, DockingError::PocketUnavailable(_)));
        assert_eq!(detector.calls.load(Ordering::SeqCst), 2);
    }
}
