//! Source resolution: decide where table data comes from and materialize it.
//!
//! The decision procedure: no identifier means the bundled default dataset, an
//! identifier naming an existing local path is read directly, anything else is
//! treated as a remote locator and fetched into the local working area. Local
//! existence is always checked before any network attempt.

use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use reqwest::Client;
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use crate::dataset::Dataset;
use crate::error::{LoadError, Result};

/// Dataset used when no source identifier is given.
pub const DEFAULT_DATASET: &str = "yellow_tripdata_2021-01.parquet";

const CSV_INFER_ROWS: usize = 1000;

/// One identifier, or a sequence of them. A sequence runs the whole pipeline
/// once per element.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Default,
    Single(String),
    Many(Vec<String>),
}

impl SourceSpec {
    /// Build from CLI input: no urls means the bundled default.
    pub fn from_urls(mut urls: Vec<String>) -> Self {
        match urls.len() {
            0 => SourceSpec::Default,
            1 => SourceSpec::Single(urls.remove(0)),
            _ => SourceSpec::Many(urls),
        }
    }

    /// The identifiers to iterate over; `None` stands for the bundled default.
    pub fn items(&self) -> Vec<Option<&str>> {
        match self {
            SourceSpec::Default => vec![None],
            SourceSpec::Single(url) => vec![Some(url.as_str())],
            SourceSpec::Many(urls) => urls.iter().map(|u| Some(u.as_str())).collect(),
        }
    }
}

/// Resolve one identifier into an in-memory dataset.
///
/// Side effects: a remote fetch writes a file under `data_dir`, deleting any
/// same-named leftover first so stale data is never reused.
pub async fn resolve(client: &Client, url: Option<&str>, data_dir: &Path) -> Result<Dataset> {
    let url = match url {
        None => {
            let path = data_dir.join(DEFAULT_DATASET);
            if !path.exists() {
                return Err(LoadError::DefaultDatasetMissing(path));
            }
            info!("no url specified; using bundled dataset {}", DEFAULT_DATASET);
            return read_table(&path);
        }
        Some(url) => url,
    };

    // A locator naming an existing local file wins over any remote fetch.
    if Path::new(url).exists() {
        info!(path = %url, "url points to a local file; using it directly");
        return read_table(Path::new(url));
    }

    let local = download(client, url, data_dir).await?;
    read_table(&local)
}

/// Fetch `url` into `data_dir` under its original filename.
async fn download(client: &Client, url: &str, data_dir: &Path) -> Result<PathBuf> {
    let unreachable = |cause: &dyn std::fmt::Display| {
        debug!(url, %cause, "fetch failed");
        LoadError::SourceUnreachable {
            url: url.to_string(),
        }
    };

    let parsed = Url::parse(url).map_err(|e| unreachable(&e))?;
    let filename = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("download");
    let dest = data_dir.join(filename);

    if dest.exists() {
        info!(path = %dest.display(), "datafile already downloaded; removing and redownloading");
        fs::remove_file(&dest).await.map_err(|e| unreachable(&e))?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await.map_err(|e| unreachable(&e))?;
    }

    let resp = client
        .get(parsed.as_str())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| unreachable(&e))?;
    let body = resp.bytes().await.map_err(|e| unreachable(&e))?;
    fs::write(&dest, &body).await.map_err(|e| unreachable(&e))?;

    info!(path = %dest.display(), bytes = body.len(), "downloaded");
    Ok(dest)
}

/// Parse a local file by extension. csv and parquet only; a parse failure is
/// reported the same way as an unknown extension.
pub fn read_table(path: &Path) -> Result<Dataset> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let unsupported = |cause: &dyn std::fmt::Display| {
        debug!(file = %name, %cause, "parse failed");
        LoadError::UnsupportedFormat(name.clone())
    };

    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => {
            let file = File::open(path)?;
            let builder =
                ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| unsupported(&e))?;
            let schema = builder.schema().clone();
            let reader = builder.build().map_err(|e| unsupported(&e))?;
            let batches = reader
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| unsupported(&e))?;
            Ok(Dataset::from_batches(schema, batches))
        }
        Some("csv") => {
            let format = Format::default().with_header(true);
            let mut file = File::open(path)?;
            let (schema, _) = format
                .infer_schema(&mut file, Some(CSV_INFER_ROWS))
                .map_err(|e| unsupported(&e))?;
            let file = File::open(path)?;
            let schema = std::sync::Arc::new(schema);
            let reader = ReaderBuilder::new(schema.clone())
                .with_format(format)
                .build(file)
                .map_err(|e| unsupported(&e))?;
            let batches = reader
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| unsupported(&e))?;
            Ok(Dataset::from_batches(schema, batches))
        }
        _ => Err(LoadError::UnsupportedFormat(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_csv(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "id,fare,zone\n1,9.5,JFK\n2,12.0,EWR\n").unwrap();
        path
    }

    #[tokio::test]
    async fn missing_default_dataset_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = resolve(&Client::new(), None, dir.path()).await.unwrap_err();
        assert!(matches!(err, LoadError::DefaultDatasetMissing(_)));
    }

    #[tokio::test]
    async fn local_csv_path_is_read_without_fetching() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(dir.path(), "trips.csv");

        // A plain filesystem path is not a valid url, so reaching the remote
        // branch would fail; success proves the local-existence check won.
        let ds = resolve(&Client::new(), Some(path.to_str().unwrap()), dir.path())
            .await
            .unwrap();
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.num_columns(), 3);
    }

    #[tokio::test]
    async fn stale_download_is_removed_before_the_fetch() {
        let dir = TempDir::new().unwrap();
        let stale = write_csv(dir.path(), "trips.csv");

        // The fetch itself fails, but the same-named leftover must already be
        // gone: a failed run never leaves stale data to be reused.
        let err = resolve(
            &Client::new(),
            Some("http://127.0.0.1:1/trips.csv"),
            dir.path(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LoadError::SourceUnreachable { .. }));
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn unreachable_remote_locator_is_coerced() {
        let dir = TempDir::new().unwrap();
        let err = resolve(
            &Client::new(),
            Some("http://127.0.0.1:1/nope/trips.csv"),
            dir.path(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LoadError::SourceUnreachable { .. }));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trips.txt");
        std::fs::write(&path, "id\n1\n").unwrap();
        let err = read_table(&path).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(name) if name == "trips.txt"));
    }

    #[test]
    fn corrupt_parquet_is_reported_as_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trips.parquet");
        std::fs::write(&path, b"definitely not parquet").unwrap();
        let err = read_table(&path).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(_)));
    }

    #[test]
    fn parquet_written_by_the_dataset_encoder_reads_back() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(dir.path(), "trips.csv");
        let ds = read_table(&csv).unwrap();

        let path = dir.path().join("trips.parquet");
        std::fs::write(&path, ds.to_parquet_bytes(true).unwrap()).unwrap();
        let back = read_table(&path).unwrap();
        assert_eq!(back.row_count(), 2);
    }

    #[test]
    fn source_spec_classifies_url_lists() {
        assert!(matches!(SourceSpec::from_urls(vec![]), SourceSpec::Default));
        assert!(matches!(
            SourceSpec::from_urls(vec!["a".into()]),
            SourceSpec::Single(_)
        ));
        let many = SourceSpec::from_urls(vec!["a".into(), "b".into()]);
        assert_eq!(many.items().len(), 2);
    }
}
