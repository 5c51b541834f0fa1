//! Placeholder style inference and bound-parameter emulation.
//!
//! The engine family served here has a hard limit on bound parameters per
//! statement. When a caller exceeds it (bulk inserts routinely do), the only
//! way out is to inline the values as SQL literals and ship a parameter-free
//! statement. Literal encoding is picky: numeric-looking strings must keep
//! their leading zeros, and wide-string literals are required so text is
//! never re-interpreted by the server.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::MssqlAdapterError;
use crate::scan::{self, PlaceholderKind};
use crate::types::{ParamSet, PlaceholderStyle, SqlValue};

/// Hard ceiling on bound parameters per statement for this engine family.
pub const MAX_PARAMETER_COUNT: usize = 2100;

/// Lexical numeric test. Deliberately *not* a numeric-type parse: a string
/// like `0045646` must keep its leading zeros through emulation, so the rule
/// is anchored and performs no normalization.
static NUMERIC_LOOKING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("numeric pattern"));

pub(crate) fn is_numeric_looking(text: &str) -> bool {
    NUMERIC_LOOKING.is_match(text)
}

/// Infer which placeholder style a query/parameter pair uses.
///
/// Pure and stateless; called fresh per pagination or emulation pass.
///
/// # Errors
///
/// Returns [`MssqlAdapterError::Coding`] when named and dollar markers are
/// mixed in one query, or when parameters are supplied for a query with no
/// placeholders at all.
pub fn infer_style(sql: &str, params: &ParamSet) -> Result<PlaceholderStyle, MssqlAdapterError> {
    if params.is_empty() {
        return Ok(PlaceholderStyle::Positional);
    }
    if matches!(params, ParamSet::Named(_)) {
        return Ok(PlaceholderStyle::NamedColon);
    }

    let mut named = 0usize;
    let mut dollar = 0usize;
    for ph in scan::find_placeholders(sql) {
        match ph.kind {
            PlaceholderKind::Question => return Ok(PlaceholderStyle::Positional),
            PlaceholderKind::Named(_) => named += 1,
            PlaceholderKind::Dollar(_) => dollar += 1,
        }
    }

    if named > 0 && dollar > 0 {
        return Err(MssqlAdapterError::Coding(
            "multiple placeholder styles are being used in one query".into(),
        ));
    }
    if named > 0 {
        return Ok(PlaceholderStyle::NamedColon);
    }
    if dollar > 0 {
        return Ok(PlaceholderStyle::DollarIndexed);
    }
    Err(MssqlAdapterError::Coding(format!(
        "query has no placeholders for {} supplied parameter(s)",
        params.len()
    )))
}

/// Replace every positional marker with a literal-encoded parameter value,
/// producing a statement that binds nothing.
///
/// # Errors
///
/// Returns [`MssqlAdapterError::Coding`] when the marker count does not match
/// the parameter count.
pub fn emulate(sql: &str, params: &[SqlValue]) -> Result<String, MssqlAdapterError> {
    if params.is_empty() {
        return Ok(sql.to_string());
    }

    let segments = scan::split_on_positional(sql);
    if segments.len() - 1 != params.len() {
        return Err(MssqlAdapterError::Coding(format!(
            "cannot emulate bound parameters: {} placeholder(s) but {} value(s)",
            segments.len() - 1,
            params.len()
        )));
    }

    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    out.push_str(segments[0]);
    for (segment, param) in segments[1..].iter().zip(params) {
        out.push_str(&encode_literal(param));
        out.push_str(segment);
    }
    Ok(out)
}

/// Encode one value as a SQL literal. Rules, in priority order:
/// bool, hex binary, forced numeric string, forced integer, NULL,
/// numeric-looking text (quoted, leading zeros kept), float, and finally
/// escaped wide-string text.
fn encode_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        SqlValue::Binary(bytes) => {
            let mut hex = String::with_capacity(2 + bytes.len() * 2);
            hex.push_str("0x");
            for byte in bytes {
                let _ = write!(hex, "{byte:02x}");
            }
            hex
        }
        SqlValue::NumericText(text) => format!("N'{}'", escape_text(text)),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Text(text) if is_numeric_looking(text) => {
            // kept as a quoted string: compatible with both int and varchar
            // columns, and leading zeros survive
            format!("'{text}'")
        }
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Text(text) => format!("N'{}'", escape_text(text)),
        SqlValue::Timestamp(dt) => format!("N'{}'", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
        SqlValue::Json(json) => format!("N'{}'", escape_text(&json.to_string())),
    }
}

fn escape_text(text: &str) -> String {
    text.replace('\'', "''").replace('\0', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_params_default_to_positional() {
        let style = infer_style("select 1", &ParamSet::None).unwrap();
        assert_eq!(style, PlaceholderStyle::Positional);
    }

    #[test]
    fn named_params_win_before_text_scan() {
        let params = ParamSet::named(vec![("id".into(), SqlValue::Int(1))]);
        let style = infer_style("select * from t where id = :id", &params).unwrap();
        assert_eq!(style, PlaceholderStyle::NamedColon);
    }

    #[test]
    fn question_mark_in_text_means_positional() {
        let params = ParamSet::positional(vec![SqlValue::Int(1)]);
        let style = infer_style("select * from t where id = ?", &params).unwrap();
        assert_eq!(style, PlaceholderStyle::Positional);
    }

    #[test]
    fn dollar_tokens_detected_by_scan() {
        let params = ParamSet::positional(vec![SqlValue::Int(1)]);
        let style = infer_style("select * from t where id = $1", &params).unwrap();
        assert_eq!(style, PlaceholderStyle::DollarIndexed);
    }

    #[test]
    fn mixed_styles_are_a_coding_error() {
        let params = ParamSet::positional(vec![SqlValue::Int(1), SqlValue::Int(2)]);
        let err = infer_style("select * from t where a = $1 and b = :b", &params).unwrap_err();
        assert!(matches!(err, MssqlAdapterError::Coding(_)));
    }

    #[test]
    fn emulation_count_mismatch_is_a_coding_error() {
        let err = emulate("a = ? and b = ?", &[SqlValue::Int(1)]).unwrap_err();
        assert!(matches!(err, MssqlAdapterError::Coding(_)));
    }

    #[test]
    fn emulation_substitutes_every_marker() {
        let sql = emulate(
            "insert into t values (?, ?, ?, ?, ?)",
            &[
                SqlValue::Bool(true),
                SqlValue::Null,
                SqlValue::Int(7),
                SqlValue::Float(1.5),
                SqlValue::Text("plain".into()),
            ],
        )
        .unwrap();
        assert_eq!(sql, "insert into t values (1, NULL, 7, 1.5, N'plain')");
    }

    #[test]
    fn numeric_looking_strings_keep_leading_zeros() {
        let sql = emulate("id = ?", &[SqlValue::Text("0045646".into())]).unwrap();
        assert_eq!(sql, "id = '0045646'");
        assert!(is_numeric_looking("-12.5"));
        assert!(!is_numeric_looking("12abc"));
        assert!(!is_numeric_looking("1e5"));
    }

    #[test]
    fn forced_numeric_text_stays_a_wide_string() {
        let sql = emulate("code = ?", &[SqlValue::NumericText("0100".into())]).unwrap();
        assert_eq!(sql, "code = N'0100'");
    }

    #[test]
    fn binary_encodes_as_hex_literal() {
        let sql = emulate("blob = ?", &[SqlValue::Binary(vec![0xde, 0xad, 0x01])]).unwrap();
        assert_eq!(sql, "blob = 0xdead01");
    }

    #[test]
    fn quotes_doubled_and_nul_bytes_stripped() {
        let sql = emulate("name = ?", &[SqlValue::Text("O'Brien\0".into())]).unwrap();
        assert_eq!(sql, "name = N'O''Brien'");
    }

    #[test]
    fn literal_question_mark_survives_emulation() {
        let sql = emulate("a = '?' and b = ?", &[SqlValue::Int(3)]).unwrap();
        assert_eq!(sql, "a = '?' and b = 3");
    }
}
