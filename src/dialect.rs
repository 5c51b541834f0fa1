//! Collation-aware SQL fragment builders.
//!
//! Text comparison on this engine family is collation-driven: case and
//! accent sensitivity are not query flags but suffix tokens on the collation
//! name (`_CI`/`_CS`, `_AI`/`_AS`). Fragments produced here splice a
//! `COLLATE` modifier next to the field so a single query can compare with a
//! sensitivity different from the database default.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// `SQL_`-prefixed codepage collations have no case-sensitive,
/// accent-insensitive member; stripping the prefix and the `CPnn_` segment
/// falls back to a plain codepage collation that does support it.
static CODEPAGE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(SQL_|CP\d+_)").expect("codepage pattern"));

/// Toggle the case/accent sensitivity tokens of a collation name.
#[must_use]
pub fn modify_collation(collation: &str, case_sensitive: bool, accent_sensitive: bool) -> String {
    let collation = if case_sensitive {
        collation.replace("_CI", "_CS")
    } else {
        collation.replace("_CS", "_CI")
    };
    let collation = if accent_sensitive {
        collation.replace("_AI", "_AS")
    } else {
        collation.replace("_AS", "_AI")
    };

    if collation.starts_with("SQL_") && case_sensitive && !accent_sensitive {
        return CODEPAGE_SEGMENT.replace_all(&collation, "").into_owned();
    }
    collation
}

/// Fragment builder bound to a default collation.
///
/// Obtained from [`MssqlAdapter::dialect`](crate::adapter::MssqlAdapter::dialect),
/// which supplies the connection's cached collation.
#[derive(Debug, Clone)]
pub struct Dialect {
    collation: String,
}

impl Dialect {
    #[must_use]
    pub fn new(collation: impl Into<String>) -> Self {
        Self {
            collation: collation.into(),
        }
    }

    #[must_use]
    pub fn collation(&self) -> &str {
        &self.collation
    }

    #[must_use]
    pub fn modified_collation(&self, case_sensitive: bool, accent_sensitive: bool) -> String {
        modify_collation(&self.collation, case_sensitive, accent_sensitive)
    }

    /// `field COLLATE <modified> {=|<>} param`
    #[must_use]
    pub fn equal(
        &self,
        field: &str,
        param: &str,
        case_sensitive: bool,
        accent_sensitive: bool,
        not_equal: bool,
    ) -> String {
        let op = if not_equal { "<>" } else { "=" };
        let collation = self.modified_collation(case_sensitive, accent_sensitive);
        format!("{field} COLLATE {collation} {op} {param}")
    }

    /// `field COLLATE <modified> [NOT] LIKE param ESCAPE '<c>'`
    ///
    /// `param` is expected to be a bound placeholder. A literal wildcard in
    /// it means the caller interpolated text instead of binding it.
    #[must_use]
    pub fn like(
        &self,
        field: &str,
        param: &str,
        case_sensitive: bool,
        accent_sensitive: bool,
        not_like: bool,
        escape_char: char,
    ) -> String {
        if param.contains('%') {
            warn!(param, "potential SQL injection: like() expects bound parameters (? or :named)");
        }
        let like = if not_like { "NOT LIKE" } else { "LIKE" };
        let collation = self.modified_collation(case_sensitive, accent_sensitive);
        format!("{field} COLLATE {collation} {like} {param} ESCAPE '{escape_char}'")
    }

    /// Concatenate expressions with `+`, each cast to a fixed-width wide
    /// string first. Zero arguments yield an empty-string literal.
    #[must_use]
    pub fn concat(&self, parts: &[&str]) -> String {
        if parts.is_empty() {
            return " '' ".to_string();
        }
        let cast: Vec<String> = parts
            .iter()
            .map(|part| format!(" CAST({part} AS NVARCHAR(255)) "))
            .collect();
        format!(" {} ", cast.join("+").trim())
    }

    /// Concatenate with a separator literal between elements.
    #[must_use]
    pub fn concat_join(&self, separator: &str, parts: &[&str]) -> String {
        let mut interleaved: Vec<&str> = Vec::with_capacity(parts.len() * 2);
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                interleaved.push(separator);
            }
            interleaved.push(part);
        }
        self.concat(&interleaved)
    }

    /// `SUBSTRING(expr, CAST(start AS INT), ...)`; when `length` is omitted
    /// the 2^31-1 sentinel covers "to end of string" without a second query.
    #[must_use]
    pub fn substr(&self, expr: &str, start: &str, length: Option<&str>) -> String {
        match length {
            Some(length) => format!(
                "SUBSTRING({expr}, {}, {})",
                self.cast_char2int(start, false),
                self.cast_char2int(length, false)
            ),
            None => format!(
                "SUBSTRING({expr}, {}, 2147483647)",
                self.cast_char2int(start, false)
            ),
        }
    }

    #[must_use]
    pub fn length(&self, field: &str) -> String {
        format!(" LEN({field})")
    }

    #[must_use]
    pub fn ceil(&self, field: &str) -> String {
        format!(" CEILING({field})")
    }

    /// Location of `needle` within `haystack`.
    #[must_use]
    pub fn position(&self, needle: &str, haystack: &str) -> String {
        format!("CHARINDEX(({needle}), ({haystack}))")
    }

    #[must_use]
    pub fn cast_char2int(&self, field: &str, text: bool) -> String {
        if text {
            format!(" CAST({} AS INT) ", self.compare_text(field))
        } else {
            format!(" CAST({field} AS INT) ")
        }
    }

    #[must_use]
    pub fn cast_char2real(&self, field: &str, text: bool) -> String {
        if text {
            format!(" CAST({} AS REAL) ", self.compare_text(field))
        } else {
            format!(" CAST({field} AS REAL) ")
        }
    }

    /// LOB-typed columns cannot be compared directly; convert first.
    #[must_use]
    pub fn compare_text(&self, field: &str) -> String {
        format!("CONVERT(NVARCHAR(MAX), {field})")
    }

    /// Text columns are not orderable either; truncate-convert for ORDER BY.
    #[must_use]
    pub fn order_by_text(&self, field: &str, num_chars: u32) -> String {
        format!(" CONVERT(varchar({num_chars}), {field})")
    }

    #[must_use]
    pub fn is_empty(&self, field: &str, text_field: bool) -> String {
        if text_field {
            format!(" ({} = '') ", self.compare_text(field))
        } else {
            format!(" ({field} = '') ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_swap_suffix_tokens() {
        assert_eq!(
            modify_collation("Latin1_General_CI_AI", true, true),
            "Latin1_General_CS_AS"
        );
        assert_eq!(
            modify_collation("Latin1_General_CS_AS", false, false),
            "Latin1_General_CI_AI"
        );
    }

    #[test]
    fn toggling_is_self_inverse() {
        let base = "Latin1_General_CI_AS";
        let there = modify_collation(base, true, true);
        let back = modify_collation(&there, false, true);
        assert_eq!(back, modify_collation(base, false, true));
    }

    #[test]
    fn codepage_family_falls_back_for_cs_ai() {
        assert_eq!(
            modify_collation("SQL_Latin1_General_CP1_CI_AI", true, false),
            "Latin1_General_CS_AI"
        );
        // any other combination keeps the SQL_ family
        assert_eq!(
            modify_collation("SQL_Latin1_General_CP1_CI_AI", true, true),
            "SQL_Latin1_General_CP1_CS_AS"
        );
    }

    #[test]
    fn equal_fragment_carries_collation_and_operator() {
        let d = Dialect::new("Latin1_General_CI_AI");
        assert_eq!(
            d.equal("name", "?", false, true, false),
            "name COLLATE Latin1_General_CI_AS = ?"
        );
        assert_eq!(
            d.equal("name", "?", true, true, true),
            "name COLLATE Latin1_General_CS_AS <> ?"
        );
    }

    #[test]
    fn like_fragment_includes_escape() {
        let d = Dialect::new("Latin1_General_CI_AI");
        assert_eq!(
            d.like("name", "?", false, false, true, '\\'),
            "name COLLATE Latin1_General_CI_AI NOT LIKE ? ESCAPE '\\'"
        );
    }

    #[test]
    fn concat_of_nothing_is_empty_string_literal() {
        let d = Dialect::new("Latin1_General_CI_AI");
        assert_eq!(d.concat(&[]), " '' ");
        let joined = d.concat_join("' '", &["a", "b"]);
        assert!(joined.contains("CAST(a AS NVARCHAR(255))"));
        assert!(joined.contains("CAST(' ' AS NVARCHAR(255))"));
        assert!(joined.contains("CAST(b AS NVARCHAR(255))"));
    }

    #[test]
    fn substr_without_length_uses_to_end_sentinel() {
        let d = Dialect::new("Latin1_General_CI_AI");
        let sql = d.substr("name", "2", None);
        assert!(sql.contains("2147483647"));
        let sql = d.substr("name", "2", Some("5"));
        assert!(sql.contains("CAST(5 AS INT)"));
    }
}
