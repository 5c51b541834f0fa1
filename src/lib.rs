//! Async adapter for one SQL engine family (SQL Server over tiberius).
//!
//! Higher-level data-access code writes dialect-neutral SQL — `{tablename}`
//! braces, whichever placeholder style it prefers — and this crate handles
//! the engine's quirks behind a uniform surface:
//!
//! - placeholder fix-up, and literal emulation once the engine's bound
//!   parameter ceiling is exceeded ([`placeholder`])
//! - OFFSET/FETCH pagination injected into arbitrary SELECT text without a
//!   SQL parser ([`pagination`])
//! - collation-driven comparison fragments ([`dialect`])
//! - streaming cursors that buffer fully before a transaction begins,
//!   because the engine does not keep concurrent result streams reliable
//!   across that boundary ([`cursor`])
//! - advisory session locks with a dedicated wait-timeout error kind
//!
//! The central type is [`MssqlAdapter`], which exclusively owns a single
//! engine session.

pub mod adapter;
pub mod client;
pub mod config;
pub mod cursor;
pub mod dialect;
mod error;
pub mod fixer;
pub mod hooks;
pub mod metadata;
pub mod normalize;
pub mod pagination;
mod params;
pub mod placeholder;
pub mod prelude;
pub mod query;
pub mod results;
mod scan;
mod session_lock;
pub mod types;

pub use adapter::{MssqlAdapter, RunOutcome, ServerInfo, Tx};
pub use client::{MssqlClient, create_client};
pub use config::MssqlOptions;
pub use cursor::{BufferedFeed, ChannelFeed, Cursor, CursorRegistry, RowFeed};
pub use dialect::{Dialect, modify_collation};
pub use error::MssqlAdapterError;
pub use fixer::{DefaultParamFixer, FixedQuery, ParamFixer};
pub use hooks::{QueryHooks, QuerySummary, TracingHooks};
pub use metadata::{ColumnInfo, MetaType, MetadataProvider, UNBOUNDED_LENGTH, map_native_type};
pub use normalize::{normalize_fields, normalize_value};
pub use placeholder::{MAX_PARAMETER_COUNT, emulate, infer_style};
pub use query::QueryAndParams;
pub use results::{DbRow, ResultSet};
pub use types::{ParamSet, PlaceholderStyle, QueryKind, SqlValue};
