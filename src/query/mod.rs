//! Query runner: execute a query (or a default derived from the table name)
//! and materialize the whole result set as a dataset.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::Type;
use tokio_postgres::{Column, Row};
use tracing::info;

use crate::dataset::Dataset;
use crate::error::{LoadError, Result};
use crate::sink::encode::quote_ident;
use crate::sink::DbConfig;

/// Query substituted when the caller does not provide one. The two script
/// variants differ here: the plain loader counts, the cloud flow samples.
#[derive(Debug, Clone, Copy)]
pub enum DefaultQuery {
    Count,
    Sample { limit: i64 },
}

impl DefaultQuery {
    pub fn sql(&self, table: &str) -> String {
        match self {
            DefaultQuery::Count => format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            DefaultQuery::Sample { limit } => {
                format!("SELECT * FROM {} LIMIT {}", quote_ident(table), limit)
            }
        }
    }
}

/// Execute `query` (or the default) against the destination database. The
/// result set is pulled into memory in full; no pagination, no timeout beyond
/// the driver's.
pub async fn run(
    config: &DbConfig,
    table: &str,
    query: Option<&str>,
    default: DefaultQuery,
) -> Result<Dataset> {
    let sql = match query {
        Some(q) => q.to_string(),
        None => {
            let sql = default.sql(table);
            info!(%sql, "no query specified; using default");
            sql
        }
    };

    let client = config.connect().await?;
    let statement = client.prepare(&sql).await?;
    let rows = client.query(&statement, &[]).await?;
    rows_to_dataset(statement.columns(), &rows)
}

/// Convert a result set into Arrow arrays, one column at a time.
fn rows_to_dataset(columns: &[Column], rows: &[Row]) -> Result<Dataset> {
    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());

    for (idx, column) in columns.iter().enumerate() {
        let (data_type, array) = column_to_arrow(column, idx, rows)?;
        fields.push(Field::new(column.name(), data_type, true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    if arrays.is_empty() {
        return Ok(Dataset::empty(schema));
    }
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    Ok(Dataset::from_batches(schema, vec![batch]))
}

fn column_to_arrow(column: &Column, idx: usize, rows: &[Row]) -> Result<(DataType, ArrayRef)> {
    macro_rules! collect {
        ($rust:ty) => {
            rows.iter()
                .map(|row| row.try_get::<_, Option<$rust>>(idx))
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
    }

    // Type constants are not usable as match patterns, hence the chain.
    let ty = column.type_();
    let converted: (DataType, ArrayRef) = if *ty == Type::INT2 {
        (DataType::Int16, Arc::new(Int16Array::from(collect!(i16))))
    } else if *ty == Type::INT4 {
        (DataType::Int32, Arc::new(Int32Array::from(collect!(i32))))
    } else if *ty == Type::INT8 {
        (DataType::Int64, Arc::new(Int64Array::from(collect!(i64))))
    } else if *ty == Type::FLOAT4 {
        (
            DataType::Float32,
            Arc::new(Float32Array::from(collect!(f32))),
        )
    } else if *ty == Type::FLOAT8 {
        (
            DataType::Float64,
            Arc::new(Float64Array::from(collect!(f64))),
        )
    } else if *ty == Type::BOOL {
        (
            DataType::Boolean,
            Arc::new(BooleanArray::from(collect!(bool))),
        )
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        (
            DataType::Utf8,
            Arc::new(StringArray::from(collect!(String))),
        )
    } else if *ty == Type::TIMESTAMP {
        let micros: Vec<Option<i64>> = collect!(NaiveDateTime)
            .into_iter()
            .map(|dt| dt.map(|dt| dt.and_utc().timestamp_micros()))
            .collect();
        (
            DataType::Timestamp(TimeUnit::Microsecond, None),
            Arc::new(TimestampMicrosecondArray::from(micros)),
        )
    } else if *ty == Type::TIMESTAMPTZ {
        let micros: Vec<Option<i64>> = collect!(DateTime<Utc>)
            .into_iter()
            .map(|dt| dt.map(|dt| dt.timestamp_micros()))
            .collect();
        (
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            Arc::new(TimestampMicrosecondArray::from(micros).with_timezone("UTC")),
        )
    } else if *ty == Type::DATE {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        let days: Vec<Option<i32>> = collect!(NaiveDate)
            .into_iter()
            .map(|d| d.map(|d| (d - epoch).num_days() as i32))
            .collect();
        (DataType::Date32, Arc::new(Date32Array::from(days)))
    } else {
        return Err(LoadError::UnsupportedColumnType(ty.name().to_string()));
    };
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_count_query_quotes_the_table() {
        assert_eq!(
            DefaultQuery::Count.sql("ny_taxi"),
            "SELECT COUNT(*) FROM \"ny_taxi\""
        );
    }

    #[test]
    fn default_sample_query_is_bounded() {
        assert_eq!(
            DefaultQuery::Sample { limit: 100 }.sql("trips"),
            "SELECT * FROM \"trips\" LIMIT 100"
        );
    }
}
