use crate::types::{ParamSet, QueryKind};

/// A SQL string, its parameters, and the operation kind, bundled together.
///
/// Handy for passing a statement around as one unit without losing the
/// kind-specific handling (structure statements bypass parameter fix-up):
/// ```rust
/// use mssql_adapter::prelude::*;
///
/// let qp = QueryAndParams::select(
///     "SELECT id, name FROM {user} WHERE id = ?",
///     ParamSet::positional(vec![SqlValue::Int(1)]),
/// );
/// # let _ = qp;
/// ```
#[derive(Debug, Clone)]
pub struct QueryAndParams {
    /// The SQL query string
    pub query: String,
    /// The parameters to be bound to the query
    pub params: ParamSet,
    /// The operation kind
    pub kind: QueryKind,
}

impl QueryAndParams {
    pub fn new(query: impl Into<String>, params: ParamSet, kind: QueryKind) -> Self {
        Self {
            query: query.into(),
            params,
            kind,
        }
    }

    pub fn select(query: impl Into<String>, params: ParamSet) -> Self {
        Self::new(query, params, QueryKind::Select)
    }

    /// A statement with no parameters at all.
    pub fn new_without_params(query: impl Into<String>, kind: QueryKind) -> Self {
        Self::new(query, ParamSet::None, kind)
    }
}
