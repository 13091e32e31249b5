//! Error types for the ingestion pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The bundled default dataset is not on disk where we expect it.
    #[error("bundled default dataset not found at `{0}`")]
    DefaultDatasetMissing(PathBuf),

    /// A remote fetch failed. The underlying cause is logged and discarded;
    /// the locator itself is usually the problem.
    #[error("couldn't get data, check url `{url}`")]
    SourceUnreachable { url: String },

    /// Unknown file extension, or the file would not parse as what its
    /// extension claims. Only csv and parquet inputs are accepted.
    #[error("only csv or parquet files are accepted (got `{0}`)")]
    UnsupportedFormat(String),

    /// Append against a table whose columns don't line up with the dataset.
    #[error("schema mismatch appending to table `{table}`: {message}")]
    SchemaMismatch { table: String, message: String },

    /// Fail-policy write against a table that is already present.
    #[error("table `{0}` already exists")]
    TableExists(String),

    /// A query result column we have no Arrow mapping for.
    #[error("unsupported column type `{0}` in query result")]
    UnsupportedColumnType(String),

    /// Database connection or statement error.
    #[error("database error: {0}")]
    Db(#[from] tokio_postgres::Error),

    /// Arrow-side encode/decode error (CSV/COPY serialization of results).
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet encode error when serializing an export payload.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// IO error (file operations in the local working area).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Object-store upload/download error.
    #[error("cloud storage error: {0}")]
    Storage(String),

    /// Warehouse load error.
    #[error("warehouse error: {0}")]
    Warehouse(String),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, LoadError>;
