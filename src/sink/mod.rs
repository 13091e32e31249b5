//! Destination writer: ensure the database and table exist, then bulk-load the
//! dataset under a conflict policy.
//!
//! Errors are returned to the caller; whether a failed store halts the whole
//! run is the pipeline's decision, not ours.

pub mod encode;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::error::{LoadError, Result};
use encode::{canonical_db_type, copy_text, create_table_ddl, pg_type_for, quote_ident};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maintenance database used to create the target database when missing.
const ADMIN_DB: &str = "postgres";

/// Connection coordinates for the destination server.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl DbConfig {
    /// Connect to a specific database on the configured server. The
    /// connection task is driven in the background for the client's lifetime.
    async fn connect_to(&self, dbname: &str) -> Result<Client> {
        let mut config = PgConfig::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(dbname)
            .connect_timeout(CONNECT_TIMEOUT);

        let (client, connection) = config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection closed with error");
            }
        });
        Ok(client)
    }

    /// Connect to the configured target database.
    pub async fn connect(&self) -> Result<Client> {
        self.connect_to(&self.database).await
    }

    /// Host/port/database for log lines. No password.
    pub fn display(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// What to do when the destination table already holds data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Replace,
    Append,
    Fail,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "replace" => Ok(ConflictPolicy::Replace),
            "append" => Ok(ConflictPolicy::Append),
            "fail" => Ok(ConflictPolicy::Fail),
            other => Err(format!(
                "if_exists must be replace, append or fail (got `{}`)",
                other
            )),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictPolicy::Replace => "replace",
            ConflictPolicy::Append => "append",
            ConflictPolicy::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful store.
#[derive(Debug, Clone)]
pub struct WriteReport {
    pub table: String,
    pub rows: u64,
    pub table_existed: bool,
}

/// Create the target database when it does not exist yet. Returns whether it
/// had to be created.
pub async fn ensure_database(config: &DbConfig) -> Result<bool> {
    let admin = config.connect_to(ADMIN_DB).await?;
    let existing = admin
        .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&config.database])
        .await?;

    if existing.is_some() {
        info!(database = %config.database, "database exists");
        return Ok(false);
    }

    info!(database = %config.database, "database does not exist; creating it");
    // CREATE DATABASE cannot be parameterized or run in a transaction.
    admin
        .simple_query(&format!("CREATE DATABASE {}", quote_ident(&config.database)))
        .await?;
    Ok(true)
}

/// Write the dataset into `table` under the given conflict policy.
pub async fn write(
    config: &DbConfig,
    dataset: &Dataset,
    table: &str,
    policy: ConflictPolicy,
) -> Result<WriteReport> {
    let client = config.connect().await?;
    let existed = table_exists(&client, table).await?;
    if existed {
        info!(table, %policy, "table already exists; applying policy to new data");
    } else {
        info!(table, "table not found in the database; it will be created");
    }

    match policy {
        ConflictPolicy::Fail if existed => return Err(LoadError::TableExists(table.to_string())),
        ConflictPolicy::Replace => {
            client
                .simple_query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
                .await?;
            create_table(&client, table, dataset).await?;
        }
        ConflictPolicy::Append if existed => {
            check_append_schema(&client, table, dataset).await?;
        }
        // Append onto a missing table, or Fail with no conflict.
        _ => create_table(&client, table, dataset).await?,
    }

    let rows = copy_dataset(&client, table, dataset).await?;
    info!(table, rows, "data stored");
    Ok(WriteReport {
        table: table.to_string(),
        rows,
        table_existed: existed,
    })
}

async fn create_table(client: &Client, table: &str, dataset: &Dataset) -> Result<()> {
    let ddl = create_table_ddl(table, &dataset.schema())?;
    debug!(table, %ddl, "creating table");
    client.simple_query(&ddl).await?;
    Ok(())
}

/// Bulk-load every batch through one text-format COPY.
async fn copy_dataset(client: &Client, table: &str, dataset: &Dataset) -> Result<u64> {
    let columns: Vec<String> = dataset
        .schema()
        .fields()
        .iter()
        .map(|f| quote_ident(f.name()))
        .collect();
    let copy_sql = format!(
        "COPY {} ({}) FROM STDIN",
        quote_ident(table),
        columns.join(", ")
    );

    let sink = client.copy_in::<_, Bytes>(&copy_sql).await?;
    tokio::pin!(sink);
    for batch in dataset.batches() {
        let text = copy_text(batch)?;
        sink.send(Bytes::from(text)).await?;
    }
    let rows = sink.finish().await?;
    Ok(rows)
}

/// Whether `table` is present in the public schema.
pub async fn table_exists(client: &Client, table: &str) -> Result<bool> {
    let row = client
        .query_one(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
            &[&table],
        )
        .await?;
    Ok(row.get::<_, bool>(0))
}

/// Compare the existing table's columns against the dataset before appending,
/// so an incompatible append fails cleanly instead of mid-COPY.
async fn check_append_schema(client: &Client, table: &str, dataset: &Dataset) -> Result<()> {
    let rows = client
        .query(
            r#"
            SELECT column_name, data_type FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = $1
            ORDER BY ordinal_position
            "#,
            &[&table],
        )
        .await?;

    let mismatch = |message: String| LoadError::SchemaMismatch {
        table: table.to_string(),
        message,
    };

    let schema = dataset.schema();
    if rows.len() != schema.fields().len() {
        return Err(mismatch(format!(
            "table has {} columns, dataset has {}",
            rows.len(),
            schema.fields().len()
        )));
    }

    for (row, field) in rows.iter().zip(schema.fields()) {
        let db_name: &str = row.get(0);
        let db_type: &str = row.get(1);
        if db_name != field.name() {
            return Err(mismatch(format!(
                "column `{}` in table, `{}` in dataset",
                db_name,
                field.name()
            )));
        }
        let want = pg_type_for(field.data_type())?;
        if canonical_db_type(&want) != db_type {
            return Err(mismatch(format!(
                "column `{}` is {} in table, {} in dataset",
                db_name, db_type, want
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_policy_parses_the_three_values_only() {
        assert_eq!("replace".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Replace);
        assert_eq!("append".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Append);
        assert_eq!("fail".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Fail);
        assert!("overwrite".parse::<ConflictPolicy>().is_err());
        assert!("REPLACE".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn policy_display_round_trips() {
        for policy in [ConflictPolicy::Replace, ConflictPolicy::Append, ConflictPolicy::Fail] {
            assert_eq!(policy.to_string().parse::<ConflictPolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn db_display_omits_credentials() {
        let config = DbConfig {
            user: "root".into(),
            password: "secret".into(),
            host: "localhost".into(),
            port: 5432,
            database: "my_db".into(),
        };
        let shown = config.display();
        assert_eq!(shown, "localhost:5432/my_db");
        assert!(!shown.contains("secret"));
    }

    fn sample_dataset() -> Dataset {
        use arrow::array::{Float64Array, Int64Array};
        use arrow::datatypes::{DataType, Field, Schema};
        use arrow::record_batch::RecordBatch;
        use std::sync::Arc;

        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("fare", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(Float64Array::from(vec![Some(9.5), None, Some(3.25)])),
            ],
        )
        .unwrap();
        Dataset::from_batches(schema, vec![batch])
    }

    async fn count_rows(config: &DbConfig, table: &str) -> i64 {
        use arrow::array::Int64Array;

        let result = crate::query::run(config, table, None, crate::query::DefaultQuery::Count)
            .await
            .unwrap();
        result.batches()[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .value(0)
    }

    /// Conflict-policy semantics against a live PostgreSQL server. Run with
    /// `cargo test -- --ignored` when one is reachable; connection details
    /// come from the same env vars the CLI reads.
    #[tokio::test]
    #[ignore]
    async fn conflict_policies_against_live_database() {
        let config = DbConfig {
            user: std::env::var("user").unwrap_or_else(|_| "root".into()),
            password: std::env::var("password").unwrap_or_else(|_| "root".into()),
            host: std::env::var("host").unwrap_or_else(|_| "localhost".into()),
            port: 5432,
            database: "tabload_test".into(),
        };
        ensure_database(&config).await.unwrap();

        let dataset = sample_dataset();
        let table = "conflict_policy_check";

        // replace: table holds exactly the new rows, even on a rerun
        let report = write(&config, &dataset, table, ConflictPolicy::Replace)
            .await
            .unwrap();
        assert_eq!(report.rows, 3);
        write(&config, &dataset, table, ConflictPolicy::Replace)
            .await
            .unwrap();
        assert_eq!(count_rows(&config, table).await, 3);

        // append: union of old and new rows
        write(&config, &dataset, table, ConflictPolicy::Append)
            .await
            .unwrap();
        assert_eq!(count_rows(&config, table).await, 6);

        // fail: prior content untouched
        let err = write(&config, &dataset, table, ConflictPolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::TableExists(_)));
        assert_eq!(count_rows(&config, table).await, 6);
    }
}
