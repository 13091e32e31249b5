//! In-memory tabular dataset passed between pipeline stages.
//!
//! A thin wrapper over Arrow record batches: one schema, N batches, all
//! columns equal length within a batch. Created by the source resolver,
//! narrowed/annotated by the transform stage, encoded for the sink and the
//! export stages. Nothing here outlives a single pipeline run.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::StringArray;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Dataset {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Dataset {
    pub fn from_batches(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    /// A dataset with a schema but no rows.
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn row_count(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    /// Narrow to the first `n` columns. Datasets with fewer columns are
    /// returned unchanged.
    pub fn head_columns(&self, n: usize) -> Result<Self> {
        if self.num_columns() <= n {
            return Ok(self.clone());
        }
        let indices: Vec<usize> = (0..n).collect();
        let schema = Arc::new(self.schema.project(&indices)?);
        let batches = self
            .batches
            .iter()
            .map(|b| b.project(&indices))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { schema, batches })
    }

    /// Append one constant Utf8 column holding `text` in every row.
    pub fn with_constant_column(&self, name: &str, text: &str) -> Result<Self> {
        let mut fields: Vec<Arc<Field>> = self.schema.fields().iter().cloned().collect();
        fields.push(Arc::new(Field::new(name, DataType::Utf8, false)));
        let schema = Arc::new(Schema::new(fields));

        let mut batches = Vec::with_capacity(self.batches.len());
        for batch in &self.batches {
            let constant = StringArray::from(vec![text; batch.num_rows()]);
            let mut columns = batch.columns().to_vec();
            columns.push(Arc::new(constant));
            batches.push(RecordBatch::try_new(schema.clone(), columns)?);
        }
        // Keep the widened schema even when there are no batches to rebuild.
        Ok(Self { schema, batches })
    }

    /// Encode as delimited text with a header row.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        {
            let mut writer = arrow::csv::WriterBuilder::new()
                .with_header(true)
                .build(&mut buffer);
            for batch in &self.batches {
                writer.write(batch)?;
            }
        }
        Ok(buffer)
    }

    /// Encode as parquet, optionally with gzip-compressed pages.
    pub fn to_parquet_bytes(&self, gzip: bool) -> Result<Vec<u8>> {
        let compression = if gzip {
            Compression::GZIP(GzipLevel::default())
        } else {
            Compression::SNAPPY
        };
        let props = WriterProperties::builder()
            .set_compression(compression)
            .build();

        let mut buffer = Vec::new();
        let cursor = Cursor::new(&mut buffer);
        let mut writer = ArrowWriter::try_new(cursor, self.schema.clone(), Some(props))?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.close()?;
        Ok(buffer)
    }

    /// Decode a parquet payload held in memory (e.g. an object fetched from
    /// cloud storage). `name` only labels the error when decoding fails.
    pub fn from_parquet_bytes(data: bytes::Bytes, name: &str) -> Result<Self> {
        let unsupported = || crate::error::LoadError::UnsupportedFormat(name.to_string());
        let builder =
            parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(data)
                .map_err(|_| unsupported())?;
        let schema = builder.schema().clone();
        let reader = builder.build().map_err(|_| unsupported())?;
        let batches = reader
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| unsupported())?;
        Ok(Self { schema, batches })
    }

    /// Render as an aligned table for terminal output.
    pub fn pretty(&self) -> Result<String> {
        Ok(pretty_format_batches(&self.batches)?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array};

    fn sample() -> Dataset {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("fare", DataType::Float64, false),
            Field::new("zone", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(Float64Array::from(vec![9.5, 12.0, 3.25])),
                Arc::new(StringArray::from(vec!["JFK", "EWR", "LGA"])),
            ],
        )
        .unwrap();
        Dataset::from_batches(schema, vec![batch])
    }

    #[test]
    fn head_columns_narrows() {
        let ds = sample().head_columns(2).unwrap();
        assert_eq!(ds.num_columns(), 2);
        assert_eq!(ds.row_count(), 3);
        assert_eq!(ds.schema().field(1).name(), "fare");
    }

    #[test]
    fn head_columns_is_noop_when_already_narrow() {
        let ds = sample().head_columns(10).unwrap();
        assert_eq!(ds.num_columns(), 3);
    }

    #[test]
    fn constant_column_is_appended_to_every_row() {
        let ds = sample()
            .with_constant_column("transformation", "annotated")
            .unwrap();
        assert_eq!(ds.num_columns(), 4);
        let batch = &ds.batches()[0];
        let col = batch
            .column(3)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert!((0..3).all(|i| col.value(i) == "annotated"));
    }

    #[test]
    fn csv_bytes_carry_header_and_rows() {
        let bytes = sample().to_csv_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("id,fare,zone"));
        assert_eq!(lines.count(), 3);
    }
}
