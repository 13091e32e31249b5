//! Arrow → PostgreSQL encoding: DDL from a record-batch schema and text-format
//! COPY payloads.

use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};

use crate::error::{LoadError, Result};

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Map an Arrow column type to the PostgreSQL type used in DDL.
pub fn pg_type_for(data_type: &DataType) -> Result<String> {
    let ty = match data_type {
        DataType::Boolean => "boolean".to_string(),
        DataType::Int8 | DataType::Int16 => "smallint".to_string(),
        DataType::Int32 | DataType::UInt8 | DataType::UInt16 => "integer".to_string(),
        DataType::Int64 | DataType::UInt32 => "bigint".to_string(),
        DataType::Float16 | DataType::Float32 => "real".to_string(),
        DataType::Float64 => "double precision".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 => "text".to_string(),
        DataType::Timestamp(_, None) => "timestamp".to_string(),
        DataType::Timestamp(_, Some(_)) => "timestamptz".to_string(),
        DataType::Date32 | DataType::Date64 => "date".to_string(),
        DataType::Decimal128(precision, scale) => format!("numeric({},{})", precision, scale),
        other => return Err(LoadError::UnsupportedColumnType(other.to_string())),
    };
    Ok(ty)
}

/// The name `information_schema.columns` reports for a DDL type. Used when
/// checking append compatibility against an existing table.
pub fn canonical_db_type(ddl_type: &str) -> &str {
    match ddl_type {
        "timestamp" => "timestamp without time zone",
        "timestamptz" => "timestamp with time zone",
        ty if ty.starts_with("numeric") => "numeric",
        ty => ty,
    }
}

/// Generate table DDL from the dataset schema.
pub fn create_table_ddl(table: &str, schema: &Schema) -> Result<String> {
    let col_defs: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| {
            let pg_type = pg_type_for(f.data_type())?;
            let null_clause = if f.is_nullable() { "" } else { " NOT NULL" };
            Ok(format!("{} {}{}", quote_ident(f.name()), pg_type, null_clause))
        })
        .collect::<Result<_>>()?;

    Ok(format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(table),
        col_defs.join(",\n    ")
    ))
}

/// Encode one record batch as text-format COPY rows.
pub fn copy_text(batch: &RecordBatch) -> Result<String> {
    let options = FormatOptions::default()
        .with_timestamp_format(Some("%Y-%m-%d %H:%M:%S%.f"))
        .with_timestamp_tz_format(Some("%Y-%m-%d %H:%M:%S%.f%:z"))
        .with_date_format(Some("%Y-%m-%d"));

    let formatters = batch
        .columns()
        .iter()
        .map(|col| ArrayFormatter::try_new(col.as_ref(), &options))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut out = String::with_capacity(batch.num_rows() * 64);
    for row in 0..batch.num_rows() {
        for (i, (col, fmt)) in batch.columns().iter().zip(&formatters).enumerate() {
            if i > 0 {
                out.push('\t');
            }
            if col.is_null(row) {
                out.push_str("\\N");
            } else {
                out.push_str(&escape_copy_text(&fmt.value(row).try_to_string()?));
            }
        }
        out.push('\n');
    }
    Ok(out)
}

/// Escape text for PostgreSQL COPY.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::Field;
    use std::sync::Arc;

    #[test]
    fn quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn ddl_reflects_arrow_types_and_nullability() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("fare", DataType::Float64, true),
            Field::new("zone", DataType::Utf8, true),
        ]);
        let ddl = create_table_ddl("trips", &schema).unwrap();
        assert!(ddl.starts_with("CREATE TABLE \"trips\""));
        assert!(ddl.contains("\"id\" bigint NOT NULL"));
        assert!(ddl.contains("\"fare\" double precision,"));
        assert!(ddl.contains("\"zone\" text"));
    }

    #[test]
    fn unmappable_type_is_rejected() {
        let err = pg_type_for(&DataType::Binary).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedColumnType(_)));
    }

    #[test]
    fn copy_text_escapes_and_marks_nulls() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("zone", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("a\tb"), None])),
            ],
        )
        .unwrap();

        let text = copy_text(&batch).unwrap();
        assert_eq!(text, "1\ta\\tb\n2\t\\N\n");
    }

    #[test]
    fn canonical_names_match_information_schema() {
        assert_eq!(canonical_db_type("timestamp"), "timestamp without time zone");
        assert_eq!(canonical_db_type("numeric(10,2)"), "numeric");
        assert_eq!(canonical_db_type("bigint"), "bigint");
    }
}
