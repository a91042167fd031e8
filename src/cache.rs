//! Path-addressed artifact cache.
//!
//! An entry is a directory `{root}/{gene}/{stem}_out`; its presence on disk
//! is the only record that the work behind it was done. [`PocketCache::get_or_compute`]
//! owns the refresh policy: an entry that fails to parse is recomputed once.

use crate::errors::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cache of pocket detection output directories.
#[derive(Clone, Debug)]
pub struct PocketCache {
    root: PathBuf,
}

impl PocketCache {
    /// Cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the entry for `(gene, stem)`, whether or not it exists.
    pub fn entry_path(&self, gene: &str, stem: &str) -> PathBuf {
        self.root.join(gene).join(format!("{stem}_out"))
    }

    /// Whether an entry exists.
    pub fn exists(&self, gene: &str, stem: &str) -> bool {
        self.entry_path(gene, stem).is_dir()
    }

    /// Parse an existing entry, `None` on a miss.
    pub fn get<T>(
        &self,
        gene: &str,
        stem: &str,
        parse: impl Fn(&Path) -> Result<T>,
    ) -> Option<Result<T>> {
        let entry = self.entry_path(gene, stem);
        entry.is_dir().then(|| parse(&entry))
    }

    /// Move a freshly produced directory into the cache, replacing any
    /// previous entry.
    pub fn put(&self, gene: &str, stem: &str, produced: &Path) -> Result<PathBuf> {
        let entry = self.entry_path(gene, stem);
        if entry.exists() {
            fs::remove_dir_all(&entry)?;
        }
        if let Some(parent) = entry.parent() {
            fs::create_dir_all(parent)?;
        }
        move_dir(produced, &entry)?;
        debug!("Cached {} at {}", produced.display(), entry.display());
        Ok(entry)
    }

    /// Produce an entry inside a private scratch directory and move it into
    /// the cache.
    ///
    /// `compute` receives the scratch directory and returns the directory
    /// holding its results.
    pub fn fill(
        &self,
        gene: &str,
        stem: &str,
        compute: impl Fn(&Path) -> Result<PathBuf>,
    ) -> Result<PathBuf> {
        let scratch = tempfile::Builder::new().prefix("genedock").tempdir()?;
        let produced = compute(scratch.path())?;
        self.put(gene, stem, &produced)
    }

    /// Parse the cached entry, computing it when missing. A cached entry
    /// that fails to parse is recomputed exactly once.
    pub fn get_or_compute<T>(
        &self,
        gene: &str,
        stem: &str,
        compute: impl Fn(&Path) -> Result<PathBuf>,
        parse: impl Fn(&Path) -> Result<T>,
    ) -> Result<T> {
        match self.get(gene, stem, &parse) {
            Some(Ok(value)) => return Ok(value),
            Some(Err(e)) => warn!("Cached entry for {gene}/{stem} is unusable, recomputing: {e}"),
            None => debug!("No cached entry for {gene}/{stem}"),
        }
        let entry = self.fill(gene, stem, compute)?;
        parse(&entry)
    }
}

/// Rename `src` to `dest`, falling back to copy and delete when a rename is
/// not possible (e.g. across filesystems).
pub fn move_dir(src: &Path, dest: &Path) -> Result<()> {
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    copy_dir(src, dest)?;
    fs::remove_dir_all(src)?;
    Ok(())
}

fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DockingError;
    use std::cell::Cell;

    fn produce(dir: &Path, content: &str) -> PathBuf {
        let out = dir.join(format!("fresh{}", content.len()));
        fs::create_dir_all(out.join("pockets")).unwrap();
        fs::write(out.join("pockets").join("value"), content).unwrap();
        out
    }

    fn read_value(entry: &Path) -> Result<u32> {
        let text = fs::read_to_string(entry.join("pockets").join("value"))?;
        text.trim()
            .parse()
            .map_err(|_| DockingError::PocketUnavailable(entry.display().to_string()))
    }

    #[test]
    fn miss_computes_and_stores() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cache = PocketCache::new(tmp.path().join("cache"));
        let calls = Cell::new(0);

        assert!(!cache.exists("CHS", "Zea"));
        let value = cache
            .get_or_compute(
                "CHS",
                "Zea",
                |scratch| {
                    calls.set(calls.get() + 1);
                    Ok(produce(scratch, "42"))
                },
                read_value,
            )
            .unwrap();
        assert_eq!(value, 42);
        assert!(cache.exists("CHS", "Zea"));
        assert!(cache.entry_path("CHS", "Zea").ends_with("CHS/Zea_out"));

        // Second lookup is a pure hit
        let value = cache
            .get_or_compute("CHS", "Zea", |_| unreachable!(), read_value)
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn corrupt_entry_is_recomputed_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cache = PocketCache::new(tmp.path().join("cache"));
        let scratch = tmp.path().join("scratch");
        cache
            .put("PAL", "Oryza", &produce(&scratch, "garbage"))
            .unwrap();

        let calls = Cell::new(0);
        let value = cache
            .get_or_compute(
                "PAL",
                "Oryza",
                |scratch| {
                    calls.set(calls.get() + 1);
                    Ok(produce(scratch, "7"))
                },
                read_value,
            )
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn second_parse_failure_is_returned() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cache = PocketCache::new(tmp.path().join("cache"));
        let scratch = tmp.path().join("scratch");
        cache.put("PAL", "Oryza", &produce(&scratch, "bad")).unwrap();

        let calls = Cell::new(0);
        let result = cache.get_or_compute(
            "PAL",
            "Oryza",
            |scratch| {
                calls.set(calls.get() + 1);
                Ok(produce(scratch, "still bad"))
            },
            read_value,
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn directories_are_relocated() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = produce(tmp.path(), "1");
        let dest = tmp.path().join("a").join("b");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        move_dir(&src, &dest).unwrap();
        assert!(!src.exists());
        assert_eq!(read_value(&dest).unwrap(), 1);

        let copy = tmp.path().join("copy");
        copy_dir(&dest, &copy).unwrap();
        assert_eq!(read_value(&copy).unwrap(), 1);
        assert!(dest.exists());
    }
}
