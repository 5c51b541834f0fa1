use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

/// Values that can be bound to a query or read back from a row.
///
/// One enum is used on both sides of the wire so helper code never has to
/// branch on driver types:
/// ```rust
/// use mssql_adapter::prelude::*;
///
/// let params = vec![
///     SqlValue::Int(1),
///     SqlValue::Text("alice".into()),
///     SqlValue::Bool(true),
/// ];
/// # let _ = params;
/// ```
///
/// `NumericText` carries a numeric-looking string that must stay a string on
/// the wire (think zero-padded identifiers like `0045646`); `Binary` always
/// binds as varbinary(max) and emulates as a `0x..` literal.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Boolean value (stored as BIT / 0-1)
    Bool(bool),
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Numeric-looking text that must never be re-interpreted as a number
    NumericText(String),
    /// Binary data
    Binary(Vec<u8>),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// JSON value (bound as NVARCHAR text)
    Json(JsonValue),
}

impl SqlValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let SqlValue::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(value) | SqlValue::NumericText(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let SqlValue::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let SqlValue::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let SqlValue::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS.SSS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S.%3f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        if let SqlValue::Binary(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

/// The kind of operation a statement performs.
///
/// `Structure` statements are sent verbatim: raw DDL may legitimately contain
/// a literal `?` (e.g. in a column default), so they never pass through
/// placeholder fix-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    /// DDL handed over by a schema manager
    Structure,
    /// Internal/auxiliary statements (collation lookup, applocks, ...)
    Aux,
}

impl QueryKind {
    /// Whether statements of this kind participate in parameter fix-up.
    #[must_use]
    pub fn uses_parameters(self) -> bool {
        !matches!(self, QueryKind::Structure)
    }
}

/// Placeholder convention used by a query's parameter markers.
///
/// Exactly one style may be active per query; mixing styles is a coding
/// error surfaced by [`infer_style`](crate::placeholder::infer_style).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// Positional `?` markers
    Positional,
    /// Dollar-indexed markers like `$1`
    DollarIndexed,
    /// Named markers like `:userid`
    NamedColon,
}

/// An ordered set of query parameters.
///
/// Positional sets pair up with `?`/`$n` markers by position or index; named
/// sets pair with `:name` markers by key. Order is significant in both forms
/// (named entries keep their insertion order so appended pagination
/// parameters land at the end).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ParamSet {
    /// No parameters at all
    #[default]
    None,
    /// Values bound by position
    Positional(Vec<SqlValue>),
    /// Values bound by name
    Named(Vec<(String, SqlValue)>),
}

impl ParamSet {
    #[must_use]
    pub fn positional(values: Vec<SqlValue>) -> Self {
        ParamSet::Positional(values)
    }

    #[must_use]
    pub fn named(values: Vec<(String, SqlValue)>) -> Self {
        ParamSet::Named(values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ParamSet::None => 0,
            ParamSet::Positional(values) => values.len(),
            ParamSet::Named(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a named value by key.
    #[must_use]
    pub fn get_named(&self, key: &str) -> Option<&SqlValue> {
        match self {
            ParamSet::Named(values) => values
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    #[must_use]
    pub fn has_named_key(&self, key: &str) -> bool {
        self.get_named(key).is_some()
    }
}

impl From<Vec<SqlValue>> for ParamSet {
    fn from(values: Vec<SqlValue>) -> Self {
        if values.is_empty() {
            ParamSet::None
        } else {
            ParamSet::Positional(values)
        }
    }
}
