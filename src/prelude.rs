//! Convenient imports for common functionality.
//!
//! ```rust
//! use mssql_adapter::prelude::*;
//! ```

pub use crate::adapter::{MssqlAdapter, RunOutcome, ServerInfo, Tx};
pub use crate::config::MssqlOptions;
pub use crate::cursor::{Cursor, RowFeed};
pub use crate::dialect::Dialect;
pub use crate::error::MssqlAdapterError;
pub use crate::fixer::{DefaultParamFixer, ParamFixer};
pub use crate::hooks::{QueryHooks, QuerySummary, TracingHooks};
pub use crate::metadata::{ColumnInfo, MetaType, MetadataProvider};
pub use crate::query::QueryAndParams;
pub use crate::results::{DbRow, ResultSet};
pub use crate::types::{ParamSet, PlaceholderStyle, QueryKind, SqlValue};
