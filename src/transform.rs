//! The fixed transform applied between query and export: keep the first few
//! columns and stamp every row with a constant annotation.

use crate::dataset::Dataset;
use crate::error::Result;

/// How many leading columns survive the transform.
pub const KEEP_COLUMNS: usize = 10;

/// Narrow to the first [`KEEP_COLUMNS`] columns and append one constant
/// annotation column. Datasets narrower than the cutoff keep all columns.
pub fn annotate(dataset: &Dataset, column: &str, text: &str) -> Result<Dataset> {
    dataset
        .head_columns(KEEP_COLUMNS)?
        .with_constant_column(column, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn wide_dataset(columns: usize) -> Dataset {
        let fields: Vec<Field> = (0..columns)
            .map(|i| Field::new(format!("c{}", i), DataType::Int64, false))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let arrays = (0..columns)
            .map(|_| Arc::new(Int64Array::from(vec![1, 2])) as _)
            .collect();
        let batch = RecordBatch::try_new(schema.clone(), arrays).unwrap();
        Dataset::from_batches(schema, vec![batch])
    }

    #[test]
    fn wide_datasets_are_cut_to_ten_plus_annotation() {
        let out = annotate(&wide_dataset(14), "transformation", "note").unwrap();
        assert_eq!(out.num_columns(), KEEP_COLUMNS + 1);
        assert_eq!(out.schema().field(KEEP_COLUMNS).name(), "transformation");
        assert_eq!(out.row_count(), 2);
    }

    #[test]
    fn narrow_datasets_keep_all_columns() {
        let out = annotate(&wide_dataset(3), "transformation", "note").unwrap();
        assert_eq!(out.num_columns(), 4);
    }
}
