//! The execution core: one exclusively-owned engine session, the fix-up →
//! ceiling-check → emulation pipeline in front of it, and the cursor
//! registry that keeps streaming results coherent across transactions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use futures_util::TryStreamExt;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, oneshot};
use tracing::debug;

use crate::client::{MssqlClient, create_client};
use crate::config::MssqlOptions;
use crate::cursor::{ChannelFeed, Cursor, CursorRegistry};
use crate::dialect::Dialect;
use crate::error::MssqlAdapterError;
use crate::fixer::{DefaultParamFixer, ParamFixer};
use crate::hooks::{QueryHooks, QuerySummary, TracingHooks};
use crate::metadata::{ColumnInfo, MetadataProvider};
use crate::normalize::{normalize_fields, normalize_value};
use crate::pagination;
use crate::params::{bind_values, row_values};
use crate::placeholder::{MAX_PARAMETER_COUNT, emulate};
use crate::query::QueryAndParams;
use crate::results::ResultSet;
use crate::types::{ParamSet, QueryKind, SqlValue};

const DEFAULT_COLLATION: &str = "Latin1_General_CI_AI";

/// Result of running a [`QueryAndParams`] through [`MssqlAdapter::run`].
#[derive(Debug)]
pub enum RunOutcome {
    Rows(ResultSet),
    Affected(u64),
}

/// Server description/version/database triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub description: String,
    pub version: String,
    pub database: String,
}

/// Adapter over a single SQL Server session.
///
/// The connection handle is exclusively owned: one statement is in flight at
/// a time, and concurrent [`Cursor`]s hand rows through driver tasks that
/// take the connection guard for the duration of their stream. The instance
/// is done once [`dispose`](Self::dispose) consumes it.
pub struct MssqlAdapter {
    client: Arc<Mutex<MssqlClient>>,
    options: MssqlOptions,
    cursors: CursorRegistry,
    fixer: Arc<dyn ParamFixer>,
    hooks: Arc<dyn QueryHooks>,
    metadata: Option<Arc<dyn MetadataProvider>>,
    collation: StdMutex<Option<String>>,
    column_cache: StdMutex<HashMap<String, Arc<Vec<ColumnInfo>>>>,
}

impl MssqlAdapter {
    /// Connect and wrap a fresh session.
    ///
    /// # Errors
    ///
    /// Returns [`MssqlAdapterError::Connection`] when the session cannot be
    /// established.
    pub async fn connect(options: MssqlOptions) -> Result<Self, MssqlAdapterError> {
        let client = create_client(&options).await?;
        Ok(Self::from_client(client, options))
    }

    /// Wrap an already-connected session.
    #[must_use]
    pub fn from_client(client: MssqlClient, options: MssqlOptions) -> Self {
        let fixer = Arc::new(DefaultParamFixer::new(options.prefix.clone()));
        Self {
            client: Arc::new(Mutex::new(client)),
            options,
            cursors: CursorRegistry::new(),
            fixer,
            hooks: Arc::new(TracingHooks),
            metadata: None,
            collation: StdMutex::new(None),
            column_cache: StdMutex::new(HashMap::new()),
        }
    }

    /// Replace the SQL-parameter fixer.
    #[must_use]
    pub fn with_fixer(mut self, fixer: Arc<dyn ParamFixer>) -> Self {
        self.fixer = fixer;
        self
    }

    /// Replace the instrumentation hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn QueryHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Attach the metadata collaborator required by the write helpers.
    #[must_use]
    pub fn with_metadata_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = Some(provider);
        self
    }

    #[must_use]
    pub fn options(&self) -> &MssqlOptions {
        &self.options
    }

    #[must_use]
    pub fn open_cursor_count(&self) -> usize {
        self.cursors.open_count()
    }

    // ----- statement preparation -------------------------------------------

    /// Fix placeholders, then decide between bound parameters and literal
    /// emulation. Structure statements skip both: raw DDL may contain a
    /// literal `?`.
    fn prepare(
        &self,
        sql: &str,
        params: &ParamSet,
        kind: QueryKind,
    ) -> Result<(String, Vec<SqlValue>), MssqlAdapterError> {
        if !kind.uses_parameters() {
            return Ok((sql.to_string(), Vec::new()));
        }
        let fixed = self.fixer.fix(sql, params)?;
        if self.options.emulate_parameters || fixed.params.len() > MAX_PARAMETER_COUNT {
            let sql = emulate(&fixed.sql, &fixed.params)?;
            return Ok((sql, Vec::new()));
        }
        Ok((fixed.sql, fixed.params))
    }

    fn observe<T>(
        &self,
        kind: QueryKind,
        rows_affected: u64,
        result: Result<T, MssqlAdapterError>,
    ) -> Result<T, MssqlAdapterError> {
        let summary = QuerySummary {
            kind,
            rows_affected,
        };
        match &result {
            Ok(_) => self.hooks.after_query(&summary, None),
            Err(e) => self.hooks.after_query(&summary, Some(e)),
        }
        result
    }

    // ----- execution primitives --------------------------------------------

    async fn run_affected(
        &self,
        sql: String,
        values: Vec<SqlValue>,
        kind: QueryKind,
    ) -> Result<u64, MssqlAdapterError> {
        self.hooks.before_query(&sql, &values, kind);
        let mut guard = self.client.clone().lock_owned().await;
        let result = execute_affected(&mut guard, &sql, &values).await;
        drop(guard);
        let rows = *result.as_ref().unwrap_or(&0);
        self.observe(kind, rows, result)
    }

    async fn run_result_sets(
        &self,
        sql: String,
        values: Vec<SqlValue>,
        kind: QueryKind,
    ) -> Result<Vec<ResultSet>, MssqlAdapterError> {
        self.hooks.before_query(&sql, &values, kind);
        let mut guard = self.client.clone().lock_owned().await;
        let result = execute_result_sets(&mut guard, &sql, &values).await;
        drop(guard);
        let rows = result
            .as_ref()
            .map(|sets| sets.iter().map(ResultSet::len).sum::<usize>() as u64)
            .unwrap_or(0);
        self.observe(kind, rows, result)
    }

    async fn run_streaming(
        &self,
        sql: String,
        values: Vec<SqlValue>,
        kind: QueryKind,
        static_cursor: bool,
    ) -> Result<Cursor, MssqlAdapterError> {
        self.hooks.before_query(&sql, &values, kind);
        let guard = self.client.clone().lock_owned().await;

        let (row_tx, row_rx) = mpsc::unbounded_channel();
        let (col_tx, col_rx) = oneshot::channel();
        tokio::spawn(drive_stream(guard, sql, values, row_tx, col_tx));

        let columns = match col_rx.await {
            Ok(columns) => columns,
            Err(_) => Err(MssqlAdapterError::Execution(
                "query driver task ended before reporting columns".into(),
            )),
        };
        let columns = self.observe(kind, 0, columns)?;

        let mut cursor = Cursor::register(columns, Box::new(ChannelFeed::new(row_rx)), &self.cursors);
        if static_cursor {
            // a static (scrollable) cursor request means the stream cannot
            // stay lazy; buffer it fully up front
            cursor.materialize().await?;
        }
        Ok(cursor)
    }

    async fn aux_rows(
        &self,
        sql: &str,
        params: ParamSet,
    ) -> Result<ResultSet, MssqlAdapterError> {
        let (sql, values) = self.prepare(sql, &params, QueryKind::Aux)?;
        let mut sets = self.run_result_sets(sql, values, QueryKind::Aux).await?;
        Ok(sets.pop().unwrap_or_default())
    }

    pub(crate) async fn aux_execute(
        &self,
        sql: &str,
        params: ParamSet,
    ) -> Result<(), MssqlAdapterError> {
        let (sql, values) = self.prepare(sql, &params, QueryKind::Aux)?;
        self.run_affected(sql, values, QueryKind::Aux).await?;
        Ok(())
    }

    pub(crate) async fn aux_query(
        &self,
        sql: &str,
        params: ParamSet,
    ) -> Result<ResultSet, MssqlAdapterError> {
        self.aux_rows(sql, params).await
    }

    // ----- public query surface --------------------------------------------

    /// Run a bundled query, dispatching on its kind.
    ///
    /// # Errors
    ///
    /// Surfaces the same errors as the kind-specific methods.
    pub async fn run(&self, q: &QueryAndParams) -> Result<RunOutcome, MssqlAdapterError> {
        match q.kind {
            QueryKind::Select => self
                .query(&q.query, q.params.clone(), 0, 0)
                .await
                .map(RunOutcome::Rows),
            QueryKind::Aux => self
                .aux_query(&q.query, q.params.clone())
                .await
                .map(RunOutcome::Rows),
            QueryKind::Insert | QueryKind::Update | QueryKind::Delete => {
                let (sql, values) = self.prepare(&q.query, &q.params, q.kind)?;
                self.run_affected(sql, values, q.kind)
                    .await
                    .map(RunOutcome::Affected)
            }
            QueryKind::Structure => self
                .change_structure(&[q.query.as_str()], None)
                .await
                .map(|()| RunOutcome::Affected(0)),
        }
    }

    /// Execute a general statement. Structure changes go through
    /// [`change_structure`](Self::change_structure) instead.
    ///
    /// # Errors
    ///
    /// A `;` in the text is a [`MssqlAdapterError::Coding`] error: multiple
    /// statements per call are not allowed through this path.
    pub async fn execute(&self, sql: &str, params: ParamSet) -> Result<u64, MssqlAdapterError> {
        if sql.contains(';') {
            return Err(MssqlAdapterError::Coding(
                "execute() does not accept multiple sql statements".into(),
            ));
        }
        let (sql, values) = self.prepare(sql, &params, QueryKind::Update)?;
        self.run_affected(sql, values, QueryKind::Update).await
    }

    /// Open a streaming cursor over a SELECT, optionally paginated.
    ///
    /// # Errors
    ///
    /// Surfaces fix-up/pagination coding errors and engine failures.
    pub async fn query_streaming(
        &self,
        sql: &str,
        params: ParamSet,
        offset: u64,
        limit: u64,
    ) -> Result<Cursor, MssqlAdapterError> {
        let mut needs_static = offset > 0;
        let (sql, params) = pagination::rewrite(sql, params, offset, limit)?;
        if offset > 0 || limit > 0 {
            // native OFFSET/FETCH replaces manual cursor seeking
            needs_static = false;
        }
        let (sql, values) = self.prepare(&sql, &params, QueryKind::Select)?;
        let static_cursor = needs_static_cursor(&sql, needs_static);
        self.run_streaming(sql, values, QueryKind::Select, static_cursor)
            .await
    }

    /// Run a SELECT to completion and return the materialized rows.
    ///
    /// # Errors
    ///
    /// Surfaces fix-up/pagination coding errors and engine failures.
    pub async fn query(
        &self,
        sql: &str,
        params: ParamSet,
        offset: u64,
        limit: u64,
    ) -> Result<ResultSet, MssqlAdapterError> {
        let mut cursor = self.query_streaming(sql, params, offset, limit).await?;
        cursor.fetch_all().await
    }

    /// First-column projection of a SELECT.
    ///
    /// # Errors
    ///
    /// Surfaces the same errors as [`query`](Self::query).
    pub async fn query_first_column(
        &self,
        sql: &str,
        params: ParamSet,
    ) -> Result<Vec<SqlValue>, MssqlAdapterError> {
        let result_set = self.query(sql, params, 0, 0).await?;
        Ok(result_set.first_column())
    }

    // ----- write helpers ----------------------------------------------------

    /// Insert one record, normalizing values against column metadata.
    /// Unknown fields and the `id` column are dropped; the generated
    /// identity is returned when `return_id` is set.
    ///
    /// # Errors
    ///
    /// Requires a metadata provider; surfaces coding errors and engine
    /// failures.
    pub async fn insert_record(
        &self,
        table: &str,
        fields: Vec<(String, SqlValue)>,
        return_id: bool,
    ) -> Result<Option<i64>, MssqlAdapterError> {
        let columns = self.columns(table).await?;
        let cleaned: Vec<(String, SqlValue)> = fields
            .into_iter()
            .filter(|(name, _)| {
                name != "id"
                    && columns
                        .iter()
                        .any(|column| column.name.eq_ignore_ascii_case(name))
            })
            .collect();
        let cleaned = normalize_fields(&columns, cleaned)?;
        self.insert_record_raw(table, cleaned, return_id, false)
            .await
    }

    /// Insert one record verbatim. With `custom_sequence`, the caller
    /// supplies `id` and IDENTITY_INSERT is toggled around the statement
    /// when the column is an identity.
    ///
    /// # Errors
    ///
    /// Surfaces coding errors (missing id/fields) and engine failures.
    pub async fn insert_record_raw(
        &self,
        table: &str,
        mut fields: Vec<(String, SqlValue)>,
        return_id: bool,
        custom_sequence: bool,
    ) -> Result<Option<i64>, MssqlAdapterError> {
        let mut return_id = return_id;
        let mut is_identity = false;

        if custom_sequence {
            if !fields.iter().any(|(name, _)| name == "id") {
                return Err(MssqlAdapterError::Coding(
                    "id field must be specified if custom sequences are used".into(),
                ));
            }
            return_id = false;
            let columns = self.columns(table).await?;
            is_identity = columns
                .iter()
                .any(|column| column.name == "id" && column.auto_increment);
            if is_identity {
                self.aux_execute(
                    &format!("SET IDENTITY_INSERT {{{table}}} ON"),
                    ParamSet::None,
                )
                .await?;
            }
        } else {
            fields.retain(|(name, _)| name != "id");
        }

        if fields.is_empty() {
            return Err(MssqlAdapterError::Coding(
                "no fields found to insert".into(),
            ));
        }

        let names: Vec<&str> = fields.iter().map(|(name, _)| name.as_str()).collect();
        let markers = vec!["?"; fields.len()].join(",");
        let mut sql = format!(
            "INSERT INTO {{{table}}} ({}) VALUES({markers})",
            names.join(",")
        );
        if return_id {
            // SCOPE_IDENTITY() runs in a different scope when sent
            // separately; append it and read the extra result set
            sql.push_str("; SELECT SCOPE_IDENTITY() AS scope_identity");
        }

        let values: Vec<SqlValue> = fields.into_iter().map(|(_, value)| value).collect();
        let params = ParamSet::positional(values);
        let (sql, values) = self.prepare(&sql, &params, QueryKind::Insert)?;

        let inserted_id = if return_id {
            let sets = self
                .run_result_sets(sql, values, QueryKind::Insert)
                .await?;
            sets.last()
                .and_then(|set| set.rows.first())
                .and_then(|row| row.get_by_index(0))
                .and_then(value_to_id)
        } else {
            self.run_affected(sql, values, QueryKind::Insert).await?;
            None
        };

        if custom_sequence && is_identity {
            self.aux_execute(
                &format!("SET IDENTITY_INSERT {{{table}}} OFF"),
                ParamSet::None,
            )
            .await?;
        }

        Ok(inserted_id)
    }

    /// Import a record with its `id` preserved (identity kept intact via
    /// IDENTITY_INSERT when needed). Values are normalized, unknown fields
    /// dropped.
    ///
    /// # Errors
    ///
    /// Surfaces coding errors and engine failures.
    pub async fn import_record(
        &self,
        table: &str,
        fields: Vec<(String, SqlValue)>,
    ) -> Result<(), MssqlAdapterError> {
        let columns = self.columns(table).await?;
        let cleaned: Vec<(String, SqlValue)> = fields
            .into_iter()
            .filter(|(name, _)| {
                columns
                    .iter()
                    .any(|column| column.name.eq_ignore_ascii_case(name))
            })
            .collect();
        let cleaned = normalize_fields(&columns, cleaned)?;
        self.insert_record_raw(table, cleaned, false, true).await?;
        Ok(())
    }

    /// Update one record by `id`, normalizing values against metadata.
    ///
    /// # Errors
    ///
    /// Surfaces coding errors (missing id) and engine failures.
    pub async fn update_record(
        &self,
        table: &str,
        fields: Vec<(String, SqlValue)>,
    ) -> Result<(), MssqlAdapterError> {
        let columns = self.columns(table).await?;
        let cleaned: Vec<(String, SqlValue)> = fields
            .into_iter()
            .filter(|(name, _)| {
                name == "id"
                    || columns
                        .iter()
                        .any(|column| column.name.eq_ignore_ascii_case(name))
            })
            .collect();
        let mut id = None;
        let mut sets = Vec::with_capacity(cleaned.len());
        for (name, value) in cleaned {
            if name == "id" {
                id = Some(value);
            } else {
                let column = columns
                    .iter()
                    .find(|column| column.name.eq_ignore_ascii_case(&name))
                    .ok_or_else(|| {
                        MssqlAdapterError::Coding(format!("unknown column {name} in field list"))
                    })?;
                sets.push((name, normalize_value(column, value)));
            }
        }
        let id = id.ok_or_else(|| {
            MssqlAdapterError::Coding("update_record() requires an id field".into())
        })?;
        if sets.is_empty() {
            return Err(MssqlAdapterError::Coding("no fields found to update".into()));
        }

        let assignments: Vec<String> = sets.iter().map(|(name, _)| format!("{name} = ?")).collect();
        let sql = format!(
            "UPDATE {{{table}}} SET {} WHERE id = ?",
            assignments.join(",")
        );
        let mut values: Vec<SqlValue> = sets.into_iter().map(|(_, value)| value).collect();
        values.push(id);

        let (sql, values) = self.prepare(&sql, &ParamSet::positional(values), QueryKind::Update)?;
        self.run_affected(sql, values, QueryKind::Update).await?;
        Ok(())
    }

    /// Set a single field on every record matching a WHERE fragment.
    ///
    /// # Errors
    ///
    /// Surfaces coding errors and engine failures.
    pub async fn set_field_select(
        &self,
        table: &str,
        field: &str,
        value: SqlValue,
        select: &str,
        params: ParamSet,
    ) -> Result<u64, MssqlAdapterError> {
        let fixed = self.fixer.fix(select, &params)?;
        let columns = self.columns(table).await?;
        let column = columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(field))
            .ok_or_else(|| {
                MssqlAdapterError::Coding(format!("unknown column {field} in {table}"))
            })?;
        let value = normalize_value(column, value);

        let (assignment, values) = if value.is_null() {
            (format!("{field} = NULL"), fixed.params)
        } else {
            let mut values = vec![value];
            values.extend(fixed.params);
            (format!("{field} = ?"), values)
        };

        let where_clause = if select.trim().is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", fixed.sql)
        };
        let sql = format!("UPDATE {{{table}}} SET {assignment}{where_clause}");
        let (sql, values) = self.prepare(&sql, &ParamSet::positional(values), QueryKind::Update)?;
        self.run_affected(sql, values, QueryKind::Update).await
    }

    /// Delete every record matching a WHERE fragment.
    ///
    /// # Errors
    ///
    /// Surfaces coding errors and engine failures.
    pub async fn delete_records_select(
        &self,
        table: &str,
        select: &str,
        params: ParamSet,
    ) -> Result<u64, MssqlAdapterError> {
        let where_clause = if select.trim().is_empty() {
            String::new()
        } else {
            format!(" WHERE {select}")
        };
        let sql = format!("DELETE FROM {{{table}}}{where_clause}");
        let (sql, values) = self.prepare(&sql, &params, QueryKind::Delete)?;
        self.run_affected(sql, values, QueryKind::Delete).await
    }

    // ----- structure changes ------------------------------------------------

    /// Execute DDL handed over by a schema manager. Metadata caches for the
    /// affected tables are invalidated whether the statements succeeded or
    /// failed — a failed batch may still have partially applied.
    ///
    /// # Errors
    ///
    /// Failures re-raise as [`MssqlAdapterError::Structure`].
    pub async fn change_structure(
        &self,
        statements: &[&str],
        tables: Option<&[&str]>,
    ) -> Result<(), MssqlAdapterError> {
        for sql in statements {
            let result = self
                .run_affected((*sql).to_string(), Vec::new(), QueryKind::Structure)
                .await;
            if let Err(e) = result {
                self.invalidate_caches(tables);
                return Err(MssqlAdapterError::Structure(e.to_string()));
            }
        }
        self.invalidate_caches(tables);
        Ok(())
    }

    /// Drop cached column metadata, either for specific tables or wholesale.
    pub fn invalidate_caches(&self, tables: Option<&[&str]>) {
        let mut cache = lock_unpoisoned(&self.column_cache);
        match tables {
            Some(tables) => {
                for table in tables {
                    cache.remove(*table);
                }
            }
            None => cache.clear(),
        }
    }

    // ----- metadata and collation -------------------------------------------

    /// Column metadata for a logical table, cached per connection.
    ///
    /// # Errors
    ///
    /// [`MssqlAdapterError::Coding`] without a metadata provider; provider
    /// errors pass through.
    pub async fn columns(&self, table: &str) -> Result<Arc<Vec<ColumnInfo>>, MssqlAdapterError> {
        if let Some(cached) = lock_unpoisoned(&self.column_cache).get(table) {
            return Ok(cached.clone());
        }
        let provider = self.metadata.as_ref().ok_or_else(|| {
            MssqlAdapterError::Coding("no metadata provider configured".into())
        })?;
        let columns = Arc::new(provider.columns(table).await?);
        lock_unpoisoned(&self.column_cache).insert(table.to_string(), columns.clone());
        Ok(columns)
    }

    /// The connection's default collation: the configured override if set,
    /// otherwise queried once from the engine with a static fallback.
    ///
    /// # Errors
    ///
    /// Currently infallible beyond poisoning-free cache access; kept
    /// fallible for parity with the other lookups.
    pub async fn collation(&self) -> Result<String, MssqlAdapterError> {
        if let Some(collation) = lock_unpoisoned(&self.collation).clone() {
            return Ok(collation);
        }
        let collation = if let Some(configured) = &self.options.collation {
            configured.clone()
        } else {
            let sql = format!(
                "SELECT CAST(DATABASEPROPERTYEX('{}', 'Collation') AS varchar(255)) AS SQLCollation",
                self.options.database
            );
            match self.aux_rows(&sql, ParamSet::None).await {
                Ok(result_set) => result_set
                    .rows
                    .first()
                    .and_then(|row| row.get_by_index(0))
                    .and_then(|value| value.as_text().map(str::to_string))
                    .unwrap_or_else(|| DEFAULT_COLLATION.to_string()),
                Err(e) => {
                    debug!(error = %e, "collation lookup failed, using default");
                    DEFAULT_COLLATION.to_string()
                }
            }
        };
        *lock_unpoisoned(&self.collation) = Some(collation.clone());
        Ok(collation)
    }

    /// Fragment builder bound to the connection's collation.
    ///
    /// # Errors
    ///
    /// Propagates [`collation`](Self::collation) errors.
    pub async fn dialect(&self) -> Result<Dialect, MssqlAdapterError> {
        Ok(Dialect::new(self.collation().await?))
    }

    /// Server description, version and current database.
    ///
    /// # Errors
    ///
    /// Surfaces engine failures.
    pub async fn server_info(&self) -> Result<ServerInfo, MssqlAdapterError> {
        let sql = "SELECT @@SERVERNAME AS server_name, \
                   CAST(SERVERPROPERTY('ProductVersion') AS NVARCHAR(128)) AS product_version, \
                   DB_NAME() AS current_database";
        let result_set = self.aux_rows(sql, ParamSet::None).await?;
        let row = result_set.rows.first().ok_or_else(|| {
            MssqlAdapterError::Execution("no server info row returned".into())
        })?;
        let text = |name: &str| {
            row.get(name)
                .and_then(|value| value.as_text().map(str::to_string))
                .unwrap_or_default()
        };
        Ok(ServerInfo {
            description: text("server_name"),
            version: text("product_version"),
            database: text("current_database"),
        })
    }

    // ----- transactions -----------------------------------------------------

    /// Begin a transaction. Every open cursor is materialized first: the
    /// engine does not keep concurrent result streams reliable across a
    /// transaction boundary.
    ///
    /// # Errors
    ///
    /// Surfaces materialization and engine failures.
    pub async fn begin(&self) -> Result<Tx<'_>, MssqlAdapterError> {
        self.cursors.materialize_all().await?;

        self.hooks
            .before_query("BEGIN TRANSACTION", &[], QueryKind::Aux);
        let mut guard = self.client.clone().lock_owned().await;
        let result = execute_affected(&mut guard, "BEGIN TRANSACTION", &[]).await;
        self.observe(QueryKind::Aux, 0, result)?;

        Ok(Tx {
            adapter: self,
            guard,
            open: true,
        })
    }

    // ----- teardown ---------------------------------------------------------

    /// Tear down the adapter: close every tracked cursor and the session.
    /// The instance cannot be reused afterwards.
    ///
    /// # Errors
    ///
    /// Surfaces a failed engine-side close.
    pub async fn dispose(self) -> Result<(), MssqlAdapterError> {
        self.cursors.close_all().await;
        if let Some(mutex) = Arc::into_inner(self.client) {
            mutex.into_inner().close().await?;
        }
        Ok(())
    }
}

/// A transaction over the exclusively-held connection.
///
/// Dropping a `Tx` without [`commit`](Tx::commit) or
/// [`rollback`](Tx::rollback) leaves the session mid-transaction. Always
/// finish the transaction explicitly.
pub struct Tx<'a> {
    adapter: &'a MssqlAdapter,
    guard: OwnedMutexGuard<MssqlClient>,
    open: bool,
}

impl Tx<'_> {
    /// Execute a DML statement inside the transaction.
    ///
    /// # Errors
    ///
    /// Surfaces fix-up coding errors and engine failures.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: ParamSet,
    ) -> Result<u64, MssqlAdapterError> {
        let (sql, values) = self.adapter.prepare(sql, &params, QueryKind::Update)?;
        self.adapter
            .hooks
            .before_query(&sql, &values, QueryKind::Update);
        let result = execute_affected(&mut self.guard, &sql, &values).await;
        let rows = *result.as_ref().unwrap_or(&0);
        self.adapter.observe(QueryKind::Update, rows, result)
    }

    /// Run a SELECT inside the transaction. Results materialize eagerly:
    /// streaming is not kept open across transaction work.
    ///
    /// # Errors
    ///
    /// Surfaces fix-up coding errors and engine failures.
    pub async fn query(
        &mut self,
        sql: &str,
        params: ParamSet,
    ) -> Result<ResultSet, MssqlAdapterError> {
        let (sql, values) = self.adapter.prepare(sql, &params, QueryKind::Select)?;
        self.adapter
            .hooks
            .before_query(&sql, &values, QueryKind::Select);
        let result = execute_result_sets(&mut self.guard, &sql, &values).await;
        let rows = result
            .as_ref()
            .map(|sets| sets.iter().map(ResultSet::len).sum::<usize>() as u64)
            .unwrap_or(0);
        let sets = self.adapter.observe(QueryKind::Select, rows, result)?;
        Ok(sets.into_iter().next().unwrap_or_default())
    }

    /// Commit the transaction and release the connection.
    ///
    /// # Errors
    ///
    /// Surfaces engine failures.
    pub async fn commit(mut self) -> Result<(), MssqlAdapterError> {
        if self.open {
            self.adapter
                .hooks
                .before_query("COMMIT TRANSACTION", &[], QueryKind::Aux);
            let result = execute_affected(&mut self.guard, "COMMIT TRANSACTION", &[]).await;
            self.adapter.observe(QueryKind::Aux, 0, result)?;
            self.open = false;
        }
        Ok(())
    }

    /// Roll the transaction back and release the connection.
    ///
    /// # Errors
    ///
    /// Surfaces engine failures.
    pub async fn rollback(mut self) -> Result<(), MssqlAdapterError> {
        if self.open {
            self.adapter
                .hooks
                .before_query("ROLLBACK TRANSACTION", &[], QueryKind::Aux);
            let result = execute_affected(&mut self.guard, "ROLLBACK TRANSACTION", &[]).await;
            self.adapter.observe(QueryKind::Aux, 0, result)?;
            self.open = false;
        }
        Ok(())
    }
}

// ----- free helpers ---------------------------------------------------------

fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Temp tables cannot always use the default forward-only cursor reliably;
/// a pending manual offset seek needs a reversible one.
fn needs_static_cursor(sql: &str, offset_pending: bool) -> bool {
    offset_pending || sql.contains('#')
}

fn value_to_id(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Int(i) => Some(*i),
        #[allow(clippy::cast_possible_truncation)]
        SqlValue::Float(f) => Some(*f as i64),
        SqlValue::Text(s) | SqlValue::NumericText(s) => s.parse().ok(),
        _ => None,
    }
}

async fn execute_affected(
    client: &mut MssqlClient,
    sql: &str,
    values: &[SqlValue],
) -> Result<u64, MssqlAdapterError> {
    let mut query = tiberius::Query::new(sql.to_string());
    bind_values(&mut query, values);
    let result = query.execute(client).await.map_err(|e| {
        MssqlAdapterError::Execution(format!("SQL Server execution error: {e}"))
    })?;
    Ok(result.rows_affected().iter().sum())
}

async fn execute_result_sets(
    client: &mut MssqlClient,
    sql: &str,
    values: &[SqlValue],
) -> Result<Vec<ResultSet>, MssqlAdapterError> {
    let mut query = tiberius::Query::new(sql.to_string());
    bind_values(&mut query, values);
    let stream = query
        .query(client)
        .await
        .map_err(|e| MssqlAdapterError::Execution(format!("SQL Server query error: {e}")))?;
    let results = stream
        .into_results()
        .await
        .map_err(|e| MssqlAdapterError::Execution(format!("SQL Server row fetch error: {e}")))?;

    let mut sets = Vec::with_capacity(results.len());
    for rows in results {
        let mut set = ResultSet::with_capacity(rows.len());
        if let Some(first) = rows.first() {
            let names: Vec<String> = first
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect();
            let count = names.len();
            set.set_column_names(Arc::new(names));
            for row in &rows {
                set.add_row_values(row_values(row, count)?);
            }
        }
        sets.push(set);
    }
    Ok(sets)
}

async fn drive_stream(
    mut guard: OwnedMutexGuard<MssqlClient>,
    sql: String,
    values: Vec<SqlValue>,
    row_tx: mpsc::UnboundedSender<Result<Vec<SqlValue>, MssqlAdapterError>>,
    col_tx: oneshot::Sender<Result<Vec<String>, MssqlAdapterError>>,
) {
    let mut query = tiberius::Query::new(sql);
    bind_values(&mut query, &values);

    let mut stream = match query.query(&mut *guard).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = col_tx.send(Err(MssqlAdapterError::Execution(format!(
                "SQL Server query error: {e}"
            ))));
            return;
        }
    };

    let columns = match stream.columns().await {
        Ok(Some(columns)) => columns
            .iter()
            .map(|column| column.name().to_string())
            .collect::<Vec<_>>(),
        Ok(None) => Vec::new(),
        Err(e) => {
            let _ = col_tx.send(Err(MssqlAdapterError::Execution(format!(
                "SQL Server column fetch error: {e}"
            ))));
            return;
        }
    };
    let column_count = columns.len();
    if col_tx.send(Ok(columns)).is_err() {
        return;
    }

    let mut rows = stream.into_row_stream();
    loop {
        match rows.try_next().await {
            Ok(Some(row)) => {
                let values = match row_values(&row, column_count) {
                    Ok(values) => values,
                    Err(e) => {
                        let _ = row_tx.send(Err(e));
                        break;
                    }
                };
                if row_tx.send(Ok(values)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = row_tx.send(Err(MssqlAdapterError::Execution(format!(
                    "SQL Server row fetch error: {e}"
                ))));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_cursor_needed_for_temp_tables_and_pending_offsets() {
        assert!(needs_static_cursor("SELECT * FROM #app_scratch", false));
        assert!(needs_static_cursor("SELECT * FROM t", true));
        assert!(!needs_static_cursor("SELECT * FROM t", false));
    }

    #[test]
    fn identity_values_coerce_to_ids() {
        assert_eq!(value_to_id(&SqlValue::Int(7)), Some(7));
        assert_eq!(value_to_id(&SqlValue::Float(8.0)), Some(8));
        assert_eq!(value_to_id(&SqlValue::Text("9".into())), Some(9));
        assert_eq!(value_to_id(&SqlValue::Null), None);
    }
}
