//! OFFSET/FETCH pagination rewriting.
//!
//! The engine's offset/fetch syntax requires an ORDER BY on the main query,
//! and "main query" cannot be decided by substring search alone: ORDER BY is
//! legal inside subqueries and window-function OVER clauses. Instead of a SQL
//! parser, every parenthesis group (nested included) is folded down to `()`
//! first; whatever ORDER BY survives belongs to the main query.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::MssqlAdapterError;
use crate::placeholder::infer_style;
use crate::types::{ParamSet, PlaceholderStyle, SqlValue};

static ORDER_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ORDER\s+BY").expect("order by pattern"));

/// Collapse every balanced `( ... )` group, nested content included, to `()`.
///
/// Text outside any group is preserved byte for byte, and the operation is
/// idempotent. Parentheses inside string literals do not open groups. An
/// unmatched `(` swallows the rest of the text; an unmatched `)` at the top
/// level is ordinary text.
#[must_use]
pub fn fold_parens(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut depth = 0u32;
    let mut in_single = false;
    let mut in_double = false;

    for ch in sql.chars() {
        if in_single {
            if ch == '\'' {
                in_single = false;
            }
            if depth == 0 {
                out.push(ch);
            }
            continue;
        }
        if in_double {
            if ch == '"' {
                in_double = false;
            }
            if depth == 0 {
                out.push(ch);
            }
            continue;
        }
        match ch {
            '\'' => {
                in_single = true;
                if depth == 0 {
                    out.push(ch);
                }
            }
            '"' => {
                in_double = true;
                if depth == 0 {
                    out.push(ch);
                }
            }
            '(' => {
                if depth == 0 {
                    out.push('(');
                }
                depth += 1;
            }
            ')' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        out.push(')');
                    }
                } else {
                    out.push(')');
                }
            }
            _ => {
                if depth == 0 {
                    out.push(ch);
                }
            }
        }
    }

    out
}

/// Whether the *main* query carries an ORDER BY clause. Ordering inside a
/// subquery or an OVER clause does not count.
#[must_use]
pub fn has_main_order_by(sql: &str) -> bool {
    let upper = sql.to_uppercase();
    // Fail fast when there is no ORDER BY anywhere in the text.
    if !ORDER_BY.is_match(&upper) {
        return false;
    }
    ORDER_BY.is_match(&fold_parens(&upper))
}

/// Rewrite a SELECT for offset/limit pagination.
///
/// No-op when both are zero. Otherwise strips one trailing `;`, appends
/// `ORDER BY 1` when the main query has no ordering (offset/fetch demands
/// one, and ordering by the first projected column does not change result
/// content), then appends OFFSET and, for a positive limit, FETCH NEXT
/// clauses whose values are bound through placeholders matching the query's
/// existing style.
///
/// # Errors
///
/// Returns [`MssqlAdapterError::Coding`] when the placeholder style cannot be
/// inferred or the parameter set does not match it.
pub fn rewrite(
    sql: &str,
    params: ParamSet,
    offset: u64,
    limit: u64,
) -> Result<(String, ParamSet), MssqlAdapterError> {
    if offset == 0 && limit == 0 {
        return Ok((sql.to_string(), params));
    }

    let style = infer_style(sql, &params)?;
    let mut params = params;

    let trimmed = sql.trim_end();
    let mut sql = trimmed
        .strip_suffix(';')
        .unwrap_or(trimmed)
        .to_string();

    if !has_main_order_by(&sql) {
        sql.push_str(" ORDER BY 1");
    }

    let offset_ph = add_parameter(style, &mut params, int_value(offset)?)?;
    sql.push_str(&format!(" OFFSET {offset_ph} ROWS"));

    if limit > 0 {
        let fetch_ph = add_parameter(style, &mut params, int_value(limit)?)?;
        sql.push_str(&format!(" FETCH NEXT {fetch_ph} ROWS ONLY"));
    }

    Ok((sql, params))
}

fn int_value(n: u64) -> Result<SqlValue, MssqlAdapterError> {
    i64::try_from(n)
        .map(SqlValue::Int)
        .map_err(|_| MssqlAdapterError::Coding(format!("pagination bound {n} out of range")))
}

/// Append `value` to `params` and return the placeholder text to splice into
/// the query, in the given style.
fn add_parameter(
    style: PlaceholderStyle,
    params: &mut ParamSet,
    value: SqlValue,
) -> Result<String, MssqlAdapterError> {
    match style {
        PlaceholderStyle::Positional => {
            match params {
                ParamSet::None => *params = ParamSet::Positional(vec![value]),
                ParamSet::Positional(values) => values.push(value),
                ParamSet::Named(_) => {
                    return Err(MssqlAdapterError::Coding(
                        "positional placeholder style with named parameters".into(),
                    ));
                }
            }
            Ok("?".to_string())
        }
        PlaceholderStyle::DollarIndexed => match params {
            ParamSet::Positional(values) => {
                values.push(value);
                Ok(format!("${}", values.len()))
            }
            _ => Err(MssqlAdapterError::Coding(
                "dollar placeholder style requires positional parameters".into(),
            )),
        },
        PlaceholderStyle::NamedColon => match params {
            ParamSet::Named(values) => {
                let mut i = 0usize;
                let name = loop {
                    let candidate = format!("mssql{i}");
                    if !values.iter().any(|(key, _)| key == &candidate) {
                        break candidate;
                    }
                    i += 1;
                };
                let ph = format!(":{name}");
                values.push((name, value));
                Ok(ph)
            }
            _ => Err(MssqlAdapterError::Coding(
                "named placeholder style requires named parameters".into(),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folding_collapses_nested_groups() {
        let folded = fold_parens("SELECT ROW_NUMBER() OVER(ORDER BY x) FROM t");
        assert_eq!(folded, "SELECT ROW_NUMBER() OVER() FROM t");
    }

    #[test]
    fn folding_is_idempotent() {
        let once = fold_parens("a (b (c) d) e ((f))");
        assert_eq!(once, "a () e ()");
        assert_eq!(fold_parens(&once), once);
    }

    #[test]
    fn folding_ignores_parens_in_literals() {
        assert_eq!(fold_parens("select '(' from t"), "select '(' from t");
    }

    #[test]
    fn order_by_in_subquery_is_not_main() {
        let sql = "SELECT * FROM (SELECT TOP 5 id FROM t ORDER BY id) q";
        assert!(!has_main_order_by(sql));
        let sql = "SELECT ROW_NUMBER() OVER(ORDER BY id) FROM t";
        assert!(!has_main_order_by(sql));
    }

    #[test]
    fn order_by_after_subquery_is_main() {
        let sql = "SELECT * FROM (SELECT id FROM t ORDER BY id) q ORDER BY 1";
        assert!(has_main_order_by(sql));
        assert!(has_main_order_by("select * from t order\n by name"));
    }

    #[test]
    fn zero_offset_zero_limit_is_a_no_op() {
        let params = ParamSet::positional(vec![SqlValue::Int(9)]);
        let (sql, out) = rewrite("SELECT id FROM t WHERE a = ?", params.clone(), 0, 0).unwrap();
        assert_eq!(sql, "SELECT id FROM t WHERE a = ?");
        assert_eq!(out, params);
    }

    #[test]
    fn unordered_query_gains_order_by_1_and_both_bounds() {
        let (sql, params) = rewrite("SELECT id FROM t;", ParamSet::None, 5, 10).unwrap();
        assert_eq!(
            sql,
            "SELECT id FROM t ORDER BY 1 OFFSET ? ROWS FETCH NEXT ? ROWS ONLY"
        );
        assert_eq!(
            params,
            ParamSet::Positional(vec![SqlValue::Int(5), SqlValue::Int(10)])
        );
    }

    #[test]
    fn ordered_query_keeps_its_ordering() {
        let (sql, _) = rewrite("SELECT id FROM t ORDER BY id DESC", ParamSet::None, 3, 0).unwrap();
        assert_eq!(sql, "SELECT id FROM t ORDER BY id DESC OFFSET ? ROWS");
    }

    #[test]
    fn named_style_appends_fresh_keys() {
        let params = ParamSet::named(vec![("uid".into(), SqlValue::Int(42))]);
        let (sql, params) = rewrite("SELECT id FROM t WHERE u = :uid", params, 2, 4).unwrap();
        assert_eq!(
            sql,
            "SELECT id FROM t WHERE u = :uid ORDER BY 1 OFFSET :mssql0 ROWS FETCH NEXT :mssql1 ROWS ONLY"
        );
        assert_eq!(params.get_named("mssql0"), Some(&SqlValue::Int(2)));
        assert_eq!(params.get_named("mssql1"), Some(&SqlValue::Int(4)));
    }

    #[test]
    fn dollar_style_uses_next_indexes() {
        let params = ParamSet::positional(vec![SqlValue::Int(42)]);
        let (sql, params) = rewrite("SELECT id FROM t WHERE u = $1", params, 7, 9).unwrap();
        assert_eq!(
            sql,
            "SELECT id FROM t WHERE u = $1 ORDER BY 1 OFFSET $2 ROWS FETCH NEXT $3 ROWS ONLY"
        );
        assert_eq!(params.len(), 3);
    }
}
