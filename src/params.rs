//! Binding [`SqlValue`] onto tiberius queries and reading it back from rows.

use tiberius::numeric::Numeric;

use crate::error::MssqlAdapterError;
use crate::types::SqlValue;

/// Bind parameters directly onto the query builder; tiberius takes ownership
/// of the bound data.
pub(crate) fn bind_values(query: &mut tiberius::Query<'_>, params: &[SqlValue]) {
    for param in params {
        match param {
            SqlValue::Null => query.bind(Option::<String>::None),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.clone()),
            // numeric-looking strings must stay strings on the wire
            SqlValue::NumericText(s) => query.bind(s.clone()),
            SqlValue::Binary(bytes) => query.bind(bytes.clone()),
            SqlValue::Timestamp(dt) => query.bind(*dt),
            SqlValue::Json(json) => query.bind(json.to_string()),
        }
    }
}

/// Extract a value from a row at a specific index, trying the narrow types
/// first and falling back to text/binary.
pub(crate) fn extract_value(
    row: &tiberius::Row,
    idx: usize,
) -> Result<Option<SqlValue>, MssqlAdapterError> {
    if let Ok(Some(val)) = row.try_get::<i32, _>(idx) {
        return Ok(Some(SqlValue::Int(i64::from(val))));
    }
    if let Ok(Some(val)) = row.try_get::<i64, _>(idx) {
        return Ok(Some(SqlValue::Int(val)));
    }
    if let Ok(Some(val)) = row.try_get::<f32, _>(idx) {
        return Ok(Some(SqlValue::Float(f64::from(val))));
    }
    if let Ok(Some(val)) = row.try_get::<f64, _>(idx) {
        return Ok(Some(SqlValue::Float(val)));
    }
    if let Ok(Some(val)) = row.try_get::<bool, _>(idx) {
        return Ok(Some(SqlValue::Bool(val)));
    }
    if let Ok(Some(val)) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
        return Ok(Some(SqlValue::Timestamp(val)));
    }
    // DECIMAL/NUMERIC (SCOPE_IDENTITY() comes back this way)
    if let Ok(Some(val)) = row.try_get::<Numeric, _>(idx) {
        if val.scale() == 0 {
            if let Ok(int) = i64::try_from(val.int_part()) {
                return Ok(Some(SqlValue::Int(int)));
            }
        }
        return Ok(Some(SqlValue::Float(f64::from(val))));
    }
    if let Ok(Some(val)) = row.try_get::<&str, _>(idx) {
        return Ok(Some(SqlValue::Text(val.to_string())));
    }
    if let Ok(Some(val)) = row.try_get::<&[u8], _>(idx) {
        return Ok(Some(SqlValue::Binary(val.to_vec())));
    }

    // none of the decoders produced a value: treat as NULL
    Ok(None)
}

/// Read a whole row into adapter values, NULL-filling undecodable cells.
pub(crate) fn row_values(
    row: &tiberius::Row,
    column_count: usize,
) -> Result<Vec<SqlValue>, MssqlAdapterError> {
    let mut values = Vec::with_capacity(column_count);
    for idx in 0..column_count {
        values.push(extract_value(row, idx)?.unwrap_or(SqlValue::Null));
    }
    Ok(values)
}
