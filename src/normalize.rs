//! Write-path value normalization.
//!
//! The wire driver is strict about a few shapes the engine itself tolerates:
//! floats silently lose precision unless sent as text, an empty string in a
//! numeric column is rejected outright, and LOB columns want explicit
//! varbinary(max) binding. Normalization happens against column metadata
//! right before a write statement is built.

use crate::error::MssqlAdapterError;
use crate::metadata::{ColumnInfo, MetaType};
use crate::types::SqlValue;

/// Normalize one value for its destination column. Rules apply in order and
/// at most one fires, mirroring how columns behave on the wire:
/// booleans become integers; floats and values headed for character columns
/// travel as text; binary columns take raw bytes; an empty string in a
/// numeric column becomes 0.
#[must_use]
pub fn normalize_value(column: &ColumnInfo, value: SqlValue) -> SqlValue {
    match value {
        SqlValue::Bool(b) => SqlValue::Int(i64::from(b)),
        value
            if !value.is_null()
                && (matches!(value, SqlValue::Float(_))
                    || matches!(column.meta_type, MetaType::Char | MetaType::Text)) =>
        {
            stringify(value)
        }
        value if column.meta_type == MetaType::Binary => to_binary(value),
        SqlValue::Text(s) if s.is_empty() && column.is_numeric() => SqlValue::Int(0),
        value => value,
    }
}

/// Normalize a whole field list against table metadata. Unknown fields are
/// a coding error (the write helpers only accept real columns).
pub fn normalize_fields(
    columns: &[ColumnInfo],
    fields: Vec<(String, SqlValue)>,
) -> Result<Vec<(String, SqlValue)>, MssqlAdapterError> {
    fields
        .into_iter()
        .map(|(name, value)| {
            let column = columns
                .iter()
                .find(|column| column.name.eq_ignore_ascii_case(&name))
                .ok_or_else(|| {
                    MssqlAdapterError::Coding(format!("unknown column {name} in field list"))
                })?;
            Ok((name, normalize_value(column, value)))
        })
        .collect()
}

fn stringify(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::Text(s) => SqlValue::Text(s),
        SqlValue::NumericText(s) => SqlValue::NumericText(s),
        SqlValue::Int(i) => SqlValue::Text(i.to_string()),
        SqlValue::Float(f) => SqlValue::Text(f.to_string()),
        SqlValue::Timestamp(dt) => SqlValue::Text(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        SqlValue::Json(json) => SqlValue::Text(json.to_string()),
        // binary has no meaningful text form; leave it to the driver
        other => other,
    }
}

fn to_binary(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::Binary(bytes) => SqlValue::Binary(bytes),
        SqlValue::Text(s) | SqlValue::NumericText(s) => SqlValue::Binary(s.into_bytes()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::UNBOUNDED_LENGTH;

    fn column(meta_type: MetaType) -> ColumnInfo {
        ColumnInfo {
            name: "c".into(),
            meta_type,
            not_null: false,
            auto_increment: false,
            max_length: UNBOUNDED_LENGTH,
        }
    }

    #[test]
    fn booleans_become_integers() {
        assert_eq!(
            normalize_value(&column(MetaType::Boolean), SqlValue::Bool(true)),
            SqlValue::Int(1)
        );
        assert_eq!(
            normalize_value(&column(MetaType::Integer), SqlValue::Bool(false)),
            SqlValue::Int(0)
        );
    }

    #[test]
    fn floats_travel_as_text_regardless_of_column() {
        assert_eq!(
            normalize_value(&column(MetaType::Number), SqlValue::Float(1.25)),
            SqlValue::Text("1.25".into())
        );
    }

    #[test]
    fn character_columns_stringify_values() {
        assert_eq!(
            normalize_value(&column(MetaType::Char), SqlValue::Int(7)),
            SqlValue::Text("7".into())
        );
        // null passes through untouched
        assert_eq!(
            normalize_value(&column(MetaType::Text), SqlValue::Null),
            SqlValue::Null
        );
    }

    #[test]
    fn binary_columns_take_raw_bytes() {
        assert_eq!(
            normalize_value(&column(MetaType::Binary), SqlValue::Text("ab".into())),
            SqlValue::Binary(vec![b'a', b'b'])
        );
    }

    #[test]
    fn empty_string_in_numeric_column_becomes_zero() {
        assert_eq!(
            normalize_value(&column(MetaType::Integer), SqlValue::Text(String::new())),
            SqlValue::Int(0)
        );
        assert_eq!(
            normalize_value(&column(MetaType::Number), SqlValue::Text(String::new())),
            SqlValue::Int(0)
        );
        // but not in a character column
        assert_eq!(
            normalize_value(&column(MetaType::Char), SqlValue::Text(String::new())),
            SqlValue::Text(String::new())
        );
    }

    #[test]
    fn unknown_field_is_a_coding_error() {
        let columns = vec![column(MetaType::Integer)];
        let err = normalize_fields(&columns, vec![("nope".into(), SqlValue::Int(1))]).unwrap_err();
        assert!(matches!(err, MssqlAdapterError::Coding(_)));
    }
}
