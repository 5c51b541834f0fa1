//! Instrumentation hooks bracketing every query.
//!
//! Purely observational: hooks see each statement before it runs and its
//! outcome after, and have no control-flow effect.

use tracing::{debug, error};

use crate::error::MssqlAdapterError;
use crate::types::{QueryKind, SqlValue};

/// What the after-hook learns about a finished statement.
#[derive(Debug, Clone, Copy)]
pub struct QuerySummary {
    pub kind: QueryKind,
    pub rows_affected: u64,
}

/// Before/after observation points around each engine call.
pub trait QueryHooks: Send + Sync {
    fn before_query(&self, sql: &str, params: &[SqlValue], kind: QueryKind);
    fn after_query(&self, summary: &QuerySummary, error: Option<&MssqlAdapterError>);
}

/// Default hooks: structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHooks;

impl QueryHooks for TracingHooks {
    fn before_query(&self, sql: &str, params: &[SqlValue], kind: QueryKind) {
        debug!(?kind, params = params.len(), sql, "query start");
    }

    fn after_query(&self, summary: &QuerySummary, error: Option<&MssqlAdapterError>) {
        match error {
            None => debug!(
                kind = ?summary.kind,
                rows_affected = summary.rows_affected,
                "query end"
            ),
            Some(e) => error!(kind = ?summary.kind, error = %e, "query failed"),
        }
    }
}
