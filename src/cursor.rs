//! Streaming cursors and their coordination with transactions.
//!
//! The engine does not guarantee that open result streams stay valid once a
//! transaction begins on the same session. The registry therefore tracks
//! every open cursor, and the adapter forces them all to buffer their
//! remaining rows into memory immediately before issuing BEGIN TRANSACTION.
//!
//! State machine per cursor: `streaming → materialized → closed`, where the
//! materialized hop only happens at a transaction boundary (or when a
//! static/scrollable cursor was requested up front).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::error::MssqlAdapterError;
use crate::results::{DbRow, ResultSet, build_column_index};
use crate::types::SqlValue;

/// Source of rows behind a cursor.
///
/// The production feed is a channel drained from a connection-owning driver
/// task; tests and pre-drained (static cursor) results use [`BufferedFeed`].
#[async_trait]
pub trait RowFeed: Send {
    /// Pull the next row, or `None` at end of results.
    ///
    /// # Errors
    ///
    /// Surfaces engine row-fetch failures.
    async fn fetch_next(&mut self) -> Result<Option<Vec<SqlValue>>, MssqlAdapterError>;
}

/// Feed over rows already sitting in memory.
#[derive(Debug, Default)]
pub struct BufferedFeed {
    rows: VecDeque<Vec<SqlValue>>,
}

impl BufferedFeed {
    #[must_use]
    pub fn new(rows: Vec<Vec<SqlValue>>) -> Self {
        Self { rows: rows.into() }
    }
}

#[async_trait]
impl RowFeed for BufferedFeed {
    async fn fetch_next(&mut self) -> Result<Option<Vec<SqlValue>>, MssqlAdapterError> {
        Ok(self.rows.pop_front())
    }
}

/// Feed over a channel filled by a driver task that exclusively holds the
/// connection while the engine streams rows.
pub struct ChannelFeed {
    receiver: mpsc::UnboundedReceiver<Result<Vec<SqlValue>, MssqlAdapterError>>,
}

impl ChannelFeed {
    #[must_use]
    pub fn new(receiver: mpsc::UnboundedReceiver<Result<Vec<SqlValue>, MssqlAdapterError>>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl RowFeed for ChannelFeed {
    async fn fetch_next(&mut self) -> Result<Option<Vec<SqlValue>>, MssqlAdapterError> {
        match self.receiver.recv().await {
            Some(row) => row.map(Some),
            None => Ok(None),
        }
    }
}

struct CursorInner {
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
    feed: Option<Box<dyn RowFeed>>,
    buffered: VecDeque<Vec<SqlValue>>,
    materialized: bool,
    closed: bool,
}

impl CursorInner {
    async fn next_values(&mut self) -> Result<Option<Vec<SqlValue>>, MssqlAdapterError> {
        // buffered rows always drain first so materialization never reorders
        if let Some(values) = self.buffered.pop_front() {
            return Ok(Some(values));
        }
        if self.closed {
            return Ok(None);
        }
        if let Some(feed) = self.feed.as_mut() {
            match feed.fetch_next().await? {
                Some(values) => return Ok(Some(values)),
                None => self.feed = None,
            }
        }
        Ok(None)
    }

    async fn materialize(&mut self) -> Result<(), MssqlAdapterError> {
        if let Some(feed) = self.feed.as_mut() {
            while let Some(values) = feed.fetch_next().await? {
                self.buffered.push_back(values);
            }
            self.feed = None;
            self.materialized = true;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.feed = None;
        self.buffered.clear();
    }
}

/// A live handle over a streamed query result.
///
/// Rows are pulled lazily until either the stream ends, the cursor is
/// closed, or a transaction forces materialization. Dropping the handle
/// without closing releases it from the registry.
pub struct Cursor {
    inner: Arc<Mutex<CursorInner>>,
    registry: Option<CursorRegistry>,
    column_names: Arc<Vec<String>>,
}

impl Cursor {
    pub(crate) fn register(
        column_names: Vec<String>,
        feed: Box<dyn RowFeed>,
        registry: &CursorRegistry,
    ) -> Cursor {
        let mut cursor = Cursor::detached(column_names, feed);
        registry.register(&cursor.inner);
        cursor.registry = Some(registry.clone());
        cursor
    }

    /// Build a cursor that is not tracked by any registry. Useful for
    /// embedding foreign row sources and for tests.
    #[must_use]
    pub fn detached(column_names: Vec<String>, feed: Box<dyn RowFeed>) -> Cursor {
        let column_index = Arc::new(build_column_index(&column_names));
        let column_names = Arc::new(column_names);
        Cursor {
            inner: Arc::new(Mutex::new(CursorInner {
                column_names: column_names.clone(),
                column_index,
                feed: Some(feed),
                buffered: VecDeque::new(),
                materialized: false,
                closed: false,
            })),
            registry: None,
            column_names,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &Arc<Vec<String>> {
        &self.column_names
    }

    /// Pull the next row. Returns `None` at end of results and on a closed
    /// cursor.
    ///
    /// # Errors
    ///
    /// Surfaces engine row-fetch failures.
    pub async fn next_row(&mut self) -> Result<Option<DbRow>, MssqlAdapterError> {
        let mut inner = self.inner.lock().await;
        let values = inner.next_values().await?;
        Ok(values.map(|values| {
            DbRow::with_index(
                inner.column_names.clone(),
                inner.column_index.clone(),
                values,
            )
        }))
    }

    /// Drain every remaining row into a [`ResultSet`] and close the cursor.
    ///
    /// # Errors
    ///
    /// Surfaces engine row-fetch failures.
    pub async fn fetch_all(&mut self) -> Result<ResultSet, MssqlAdapterError> {
        let mut result_set = ResultSet::with_capacity(16);
        result_set.set_column_names(self.column_names.clone());
        while let Some(row) = self.next_row().await? {
            result_set.add_row_values(row.values);
        }
        self.close().await;
        Ok(result_set)
    }

    pub(crate) async fn materialize(&mut self) -> Result<(), MssqlAdapterError> {
        self.inner.lock().await.materialize().await
    }

    /// Whether a transaction (or static-cursor request) has buffered this
    /// cursor fully into memory.
    pub async fn is_materialized(&self) -> bool {
        self.inner.lock().await.materialized
    }

    /// Close the cursor and deregister it. Closing twice is a no-op.
    pub async fn close(&mut self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return;
            }
            inner.close();
        }
        if let Some(registry) = self.registry.take() {
            registry.deregister(&self.inner);
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.deregister(&self.inner);
        }
    }
}

/// Tracking set of every open cursor on a connection.
#[derive(Clone, Default)]
pub struct CursorRegistry {
    cursors: Arc<StdMutex<Vec<Weak<Mutex<CursorInner>>>>>,
}

impl CursorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, inner: &Arc<Mutex<CursorInner>>) {
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.push(Arc::downgrade(inner));
        }
    }

    fn deregister(&self, inner: &Arc<Mutex<CursorInner>>) {
        if let Ok(mut cursors) = self.cursors.lock() {
            let target = Arc::downgrade(inner);
            cursors.retain(|weak| weak.strong_count() > 0 && !Weak::ptr_eq(weak, &target));
        }
    }

    fn live(&self) -> Vec<Arc<Mutex<CursorInner>>> {
        match self.cursors.lock() {
            Ok(mut cursors) => {
                cursors.retain(|weak| weak.strong_count() > 0);
                cursors.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Number of tracked (not yet closed or dropped) cursors.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.live().len()
    }

    /// Force every open cursor to buffer its remaining rows into memory.
    /// Called exactly when a transaction is about to begin.
    ///
    /// # Errors
    ///
    /// Surfaces the first row-fetch failure encountered while draining.
    pub async fn materialize_all(&self) -> Result<(), MssqlAdapterError> {
        for cursor in self.live() {
            cursor.lock().await.materialize().await?;
        }
        Ok(())
    }

    /// Close every tracked cursor (adapter teardown).
    pub(crate) async fn close_all(&self) {
        for cursor in self.live() {
            cursor.lock().await.close();
        }
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: i64) -> Vec<Vec<SqlValue>> {
        (0..n).map(|i| vec![SqlValue::Int(i)]).collect()
    }

    fn feed(n: i64) -> Box<dyn RowFeed> {
        Box::new(BufferedFeed::new(rows(n)))
    }

    #[tokio::test]
    async fn streams_rows_in_order() {
        let mut cursor = Cursor::detached(vec!["id".into()], feed(3));
        let mut seen = Vec::new();
        while let Some(row) = cursor.next_row().await.unwrap() {
            seen.push(row.get("id").cloned().unwrap());
        }
        assert_eq!(
            seen,
            vec![SqlValue::Int(0), SqlValue::Int(1), SqlValue::Int(2)]
        );
    }

    #[tokio::test]
    async fn materialize_all_buffers_every_open_cursor() {
        let registry = CursorRegistry::new();
        let mut a = Cursor::register(vec!["id".into()], feed(4), &registry);
        let mut b = Cursor::register(vec!["id".into()], feed(2), &registry);

        // partially consume one of them first
        let first = a.next_row().await.unwrap().unwrap();
        assert_eq!(first.get_by_index(0), Some(&SqlValue::Int(0)));

        registry.materialize_all().await.unwrap();
        assert!(a.is_materialized().await);
        assert!(b.is_materialized().await);

        // both still yield their remaining rows in order
        let rest_a = a.fetch_all().await.unwrap();
        assert_eq!(rest_a.len(), 3);
        let rest_b = b.fetch_all().await.unwrap();
        assert_eq!(rest_b.len(), 2);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_deregisters() {
        let registry = CursorRegistry::new();
        let mut cursor = Cursor::register(vec!["id".into()], feed(5), &registry);
        assert_eq!(registry.open_count(), 1);

        cursor.close().await;
        assert_eq!(registry.open_count(), 0);
        cursor.close().await; // no-op
        assert!(cursor.next_row().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropping_a_cursor_releases_its_registration() {
        let registry = CursorRegistry::new();
        let cursor = Cursor::register(vec!["id".into()], feed(1), &registry);
        assert_eq!(registry.open_count(), 1);
        drop(cursor);
        assert_eq!(registry.open_count(), 0);
    }

    #[tokio::test]
    async fn channel_feed_ends_when_sender_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Ok(vec![SqlValue::Int(1)])).unwrap();
        drop(tx);
        let mut cursor = Cursor::detached(vec!["id".into()], Box::new(ChannelFeed::new(rx)));
        assert!(cursor.next_row().await.unwrap().is_some());
        assert!(cursor.next_row().await.unwrap().is_none());
    }
}
