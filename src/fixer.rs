//! The SQL-parameter-fixer seam.
//!
//! Callers write dialect-neutral SQL: `{tablename}` braces instead of
//! physical table names, and whichever placeholder style their layer
//! prefers. The fixer normalizes both before execution — the engine itself
//! only binds positional markers. The trait exists so a host framework can
//! substitute its own normalization; [`DefaultParamFixer`] is authoritative
//! for everything this crate runs on its own.

use std::collections::HashSet;

use crate::error::MssqlAdapterError;
use crate::placeholder::infer_style;
use crate::scan::{self, PlaceholderKind};
use crate::types::{ParamSet, PlaceholderStyle, SqlValue};

/// Normalized output of a fixer pass: positional-only SQL, values in
/// occurrence order, and the style the caller had used.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub style: PlaceholderStyle,
}

/// Normalizes placeholder syntax and table-name braces ahead of execution.
pub trait ParamFixer: Send + Sync {
    /// Normalize `sql` + `params` to positional form.
    ///
    /// # Errors
    ///
    /// Implementations report placeholder-count mismatches and mixed styles
    /// as [`MssqlAdapterError::Coding`].
    fn fix(&self, sql: &str, params: &ParamSet) -> Result<FixedQuery, MssqlAdapterError>;
}

/// Standard fixer: expands `{tablename}` to the prefixed physical name
/// (session temp tables get the `#` marker) and rewrites named/dollar
/// placeholders to `?`, reordering values by occurrence.
#[derive(Debug, Clone, Default)]
pub struct DefaultParamFixer {
    prefix: String,
    temp_tables: HashSet<String>,
}

impl DefaultParamFixer {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            temp_tables: HashSet::new(),
        }
    }

    /// Mark a logical table name as a session temp table so `{name}` expands
    /// to the engine's `#`-prefixed form.
    pub fn register_temp_table(&mut self, name: impl Into<String>) {
        self.temp_tables.insert(name.into());
    }

    pub fn forget_temp_table(&mut self, name: &str) {
        self.temp_tables.remove(name);
    }

    /// Physical name for a logical table.
    #[must_use]
    pub fn table_name(&self, logical: &str) -> String {
        if self.temp_tables.contains(logical) {
            format!("#{}{}", self.prefix, logical)
        } else {
            format!("{}{}", self.prefix, logical)
        }
    }

    fn expand_braces(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut rest = sql;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close)
                    if close > 0
                        && after[..close]
                            .bytes()
                            .all(|b| b.is_ascii_alphanumeric() || b == b'_') =>
                {
                    out.push_str(&self.table_name(&after[..close]));
                    rest = &after[close + 1..];
                }
                _ => {
                    // not a table reference, keep the brace as-is
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl ParamFixer for DefaultParamFixer {
    fn fix(&self, sql: &str, params: &ParamSet) -> Result<FixedQuery, MssqlAdapterError> {
        let sql = self.expand_braces(sql);
        let style = if params.is_empty() && scan::find_placeholders(&sql).is_empty() {
            PlaceholderStyle::Positional
        } else {
            infer_style(&sql, params)?
        };

        match style {
            PlaceholderStyle::Positional => {
                let count = scan::find_placeholders(&sql)
                    .iter()
                    .filter(|ph| ph.kind == PlaceholderKind::Question)
                    .count();
                let values = match params {
                    ParamSet::None => Vec::new(),
                    ParamSet::Positional(values) => values.clone(),
                    ParamSet::Named(_) => {
                        return Err(MssqlAdapterError::Coding(
                            "positional placeholders with named parameters".into(),
                        ));
                    }
                };
                if count != values.len() {
                    return Err(MssqlAdapterError::Coding(format!(
                        "incorrect number of query parameters: {} placeholder(s), {} value(s)",
                        count,
                        values.len()
                    )));
                }
                Ok(FixedQuery { sql, params: values, style })
            }
            PlaceholderStyle::NamedColon => {
                let named = match params {
                    ParamSet::Named(values) => values,
                    _ => {
                        return Err(MssqlAdapterError::Coding(
                            "named placeholders require named parameters".into(),
                        ));
                    }
                };
                let mut out_sql = String::with_capacity(sql.len());
                let mut out_params = Vec::new();
                let mut used: HashSet<&str> = HashSet::new();
                let mut last = 0;
                for ph in scan::find_placeholders(&sql) {
                    let PlaceholderKind::Named(name) = &ph.kind else {
                        continue;
                    };
                    let value = params.get_named(name).ok_or_else(|| {
                        MssqlAdapterError::Coding(format!(
                            "missing value for named parameter :{name}"
                        ))
                    })?;
                    out_sql.push_str(&sql[last..ph.start]);
                    out_sql.push('?');
                    out_params.push(value.clone());
                    if let Some((key, _)) = named.iter().find(|(key, _)| key == name) {
                        used.insert(key.as_str());
                    }
                    last = ph.end;
                }
                out_sql.push_str(&sql[last..]);
                if used.len() != named.len() {
                    return Err(MssqlAdapterError::Coding(format!(
                        "incorrect number of query parameters: {} of {} named value(s) referenced",
                        used.len(),
                        named.len()
                    )));
                }
                Ok(FixedQuery {
                    sql: out_sql,
                    params: out_params,
                    style,
                })
            }
            PlaceholderStyle::DollarIndexed => {
                let values = match params {
                    ParamSet::Positional(values) => values,
                    _ => {
                        return Err(MssqlAdapterError::Coding(
                            "dollar placeholders require positional parameters".into(),
                        ));
                    }
                };
                let mut out_sql = String::with_capacity(sql.len());
                let mut out_params = Vec::new();
                let mut used: HashSet<usize> = HashSet::new();
                let mut last = 0;
                for ph in scan::find_placeholders(&sql) {
                    let PlaceholderKind::Dollar(index) = ph.kind else {
                        continue;
                    };
                    let value = values.get(index - 1).ok_or_else(|| {
                        MssqlAdapterError::Coding(format!(
                            "dollar placeholder ${index} has no matching value"
                        ))
                    })?;
                    out_sql.push_str(&sql[last..ph.start]);
                    out_sql.push('?');
                    out_params.push(value.clone());
                    used.insert(index);
                    last = ph.end;
                }
                out_sql.push_str(&sql[last..]);
                if used.len() != values.len() {
                    return Err(MssqlAdapterError::Coding(format!(
                        "incorrect number of query parameters: {} of {} value(s) referenced",
                        used.len(),
                        values.len()
                    )));
                }
                Ok(FixedQuery {
                    sql: out_sql,
                    params: out_params,
                    style,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixer() -> DefaultParamFixer {
        DefaultParamFixer::new("app_")
    }

    #[test]
    fn braces_expand_to_prefixed_names() {
        let fixed = fixer().fix("SELECT id FROM {user}", &ParamSet::None).unwrap();
        assert_eq!(fixed.sql, "SELECT id FROM app_user");
    }

    #[test]
    fn temp_tables_get_the_session_marker() {
        let mut f = fixer();
        f.register_temp_table("scratch");
        let fixed = f.fix("DELETE FROM {scratch}", &ParamSet::None).unwrap();
        assert_eq!(fixed.sql, "DELETE FROM #app_scratch");
    }

    #[test]
    fn non_table_braces_are_left_alone() {
        let fixed = fixer()
            .fix("SELECT '{not a table' FROM {user}", &ParamSet::None)
            .unwrap();
        assert_eq!(fixed.sql, "SELECT '{not a table' FROM app_user");
    }

    #[test]
    fn named_placeholders_reorder_by_occurrence() {
        let params = ParamSet::named(vec![
            ("b".into(), SqlValue::Int(2)),
            ("a".into(), SqlValue::Int(1)),
        ]);
        let fixed = fixer()
            .fix("SELECT * FROM {t} WHERE a = :a AND b = :b", &params)
            .unwrap();
        assert_eq!(fixed.sql, "SELECT * FROM app_t WHERE a = ? AND b = ?");
        assert_eq!(fixed.params, vec![SqlValue::Int(1), SqlValue::Int(2)]);
        assert_eq!(fixed.style, PlaceholderStyle::NamedColon);
    }

    #[test]
    fn named_value_may_be_referenced_twice() {
        let params = ParamSet::named(vec![("x".into(), SqlValue::Int(9))]);
        let fixed = fixer().fix("WHERE a = :x OR b = :x", &params).unwrap();
        assert_eq!(fixed.params, vec![SqlValue::Int(9), SqlValue::Int(9)]);
    }

    #[test]
    fn dollar_placeholders_pick_values_by_index() {
        let params = ParamSet::positional(vec![SqlValue::Int(10), SqlValue::Int(20)]);
        let fixed = fixer().fix("WHERE a = $2 AND b = $1", &params).unwrap();
        assert_eq!(fixed.sql, "WHERE a = ? AND b = ?");
        assert_eq!(fixed.params, vec![SqlValue::Int(20), SqlValue::Int(10)]);
    }

    #[test]
    fn count_mismatch_is_a_coding_error() {
        let params = ParamSet::positional(vec![SqlValue::Int(1), SqlValue::Int(2)]);
        let err = fixer().fix("WHERE a = ?", &params).unwrap_err();
        assert!(matches!(err, MssqlAdapterError::Coding(_)));

        let params = ParamSet::named(vec![
            ("a".into(), SqlValue::Int(1)),
            ("unused".into(), SqlValue::Int(2)),
        ]);
        let err = fixer().fix("WHERE a = :a", &params).unwrap_err();
        assert!(matches!(err, MssqlAdapterError::Coding(_)));
    }

    #[test]
    fn missing_named_value_is_a_coding_error() {
        let params = ParamSet::named(vec![("a".into(), SqlValue::Int(1))]);
        let err = fixer().fix("WHERE a = :a AND b = :b", &params).unwrap_err();
        assert!(matches!(err, MssqlAdapterError::Coding(_)));
    }
}
