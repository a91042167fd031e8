use crate::errors::Result;
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// Run `f` on a dedicated rayon pool with `num_threads` workers
/// (0 uses every logical CPU).
pub fn run_with_threads<R, F>(num_threads: usize, f: F) -> Result<R>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(std::io::Error::other)?;
    Ok(pool.install(f))
}

/// Write a DataFrame next to `file_path`, with the extension replaced by the
/// one of `file_type`. Returns the written path.
pub fn write_df_to_file(
    df: &mut DataFrame,
    file_path: &Path,
    file_type: DataFrameFileType,
) -> Result<PathBuf> {
    let output = file_path.with_extension(file_type.to_string());
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(&output)?;
    match file_type {
        DataFrameFileType::Csv => {
            CsvWriter::new(&mut file).finish(df)?;
        }
        DataFrameFileType::Parquet => {
            ParquetWriter::new(&mut file).finish(df)?;
        }
        DataFrameFileType::Json => {
            JsonWriter::new(&mut file)
                .with_json_format(JsonFormat::Json)
                .finish(df)?;
        }
        DataFrameFileType::NDJson => {
            JsonWriter::new(&mut file)
                .with_json_format(JsonFormat::JsonLines)
                .finish(df)?;
        }
    }
    Ok(output)
}

/// File format for writing DataFrames.
#[derive(clap::ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum DataFrameFileType {
    /// Comma-separated values
    Csv,
    /// Parquet columnar storage
    Parquet,
    /// Standard JSON
    Json,
    /// Newline-delimited JSON
    NDJson,
}

impl std::fmt::Display for DataFrameFileType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DataFrameFileType::Csv => write!(f, "csv"),
            DataFrameFileType::Parquet => write!(f, "parquet"),
            DataFrameFileType::Json => write!(f, "json"),
            DataFrameFileType::NDJson => write!(f, "ndjson"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_is_respected() {
        assert_eq!(run_with_threads(3, rayon::current_num_threads).unwrap(), 3);
        assert!(run_with_threads(0, rayon::current_num_threads).unwrap() >= 1);
    }

    #[test]
    fn extension_follows_file_type() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut df = df!("species" => ["Zea_mays"], "CHS" => [1.5]).unwrap();

        let csv = write_df_to_file(&mut df, &tmp.path().join("matrix"), DataFrameFileType::Csv)
            .unwrap();
        assert!(csv.ends_with("matrix.csv"));
        let content = std::fs::read_to_string(&csv).unwrap();
        assert_eq!(content.lines().next(), Some("species,CHS"));

        let ndjson =
            write_df_to_file(&mut df, &tmp.path().join("matrix"), DataFrameFileType::NDJson)
                .unwrap();
        assert!(ndjson.ends_with("matrix.ndjson"));
        assert_eq!(std::fs::read_to_string(&ndjson).unwrap().lines().count(), 1);
    }
}
