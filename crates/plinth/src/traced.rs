//! The database seam and its tracing wrapper.
//!
//! Everything the engine needs from SQL Server goes through [`Connection`].
//! [`TracedConn`] wraps any connection and logs every call via tracing.

use crate::Result;
use crate::introspect::{ColumnMetadata, ForeignKeyConstraint};
use crate::registry::TypeRegistryEntry;
use crate::seed::SeedValue;
use std::future::Future;
use std::pin::Pin;
use tracing::Instrument;

/// Boxed future returned by [`Connection`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for database connections the engine can drive.
///
/// Implemented by [`crate::pool::MssqlConnection`]; tests provide an
/// in-memory implementation.
pub trait Connection: Send {
    /// Names of all base tables.
    fn base_tables(&mut self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Column metadata for one table, in ordinal order. Empty if the table
    /// does not exist.
    fn column_metadata<'a>(
        &'a mut self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ColumnMetadata>>>;

    /// Execute a DDL statement or batch.
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<()>>;

    fn begin(&mut self) -> BoxFuture<'_, Result<()>>;

    fn commit(&mut self) -> BoxFuture<'_, Result<()>>;

    fn rollback(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Number of rows in a table.
    fn row_count<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<u64>>;

    /// Insert one row of literal values.
    fn insert_row<'a>(
        &'a mut self,
        table: &'a str,
        values: &'a [(String, SeedValue)],
    ) -> BoxFuture<'a, Result<()>>;

    /// Whether `table` already has an entry in the type registry.
    fn registry_contains<'a>(
        &'a mut self,
        registry: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<bool>>;

    /// Add an entry to the type registry.
    fn registry_insert<'a>(
        &'a mut self,
        registry: &'a str,
        entry: &'a TypeRegistryEntry,
    ) -> BoxFuture<'a, Result<()>>;

    /// All foreign key constraints in the database.
    fn foreign_keys(&mut self) -> BoxFuture<'_, Result<Vec<ForeignKeyConstraint>>>;
}

/// A wrapper around a [`Connection`] that logs all calls via tracing.
///
/// # Example
///
/// ```ignore
/// let mut conn = provider.acquire().await?;
/// let mut traced = TracedConn::new(&mut conn);
///
/// // Statements are now logged at debug level
/// traced.execute("DROP TABLE [legacy];").await?;
/// ```
pub struct TracedConn<'a, C: Connection + ?Sized> {
    conn: &'a mut C,
}

impl<'a, C: Connection + ?Sized> TracedConn<'a, C> {
    /// Create a new traced connection wrapper.
    pub fn new(conn: &'a mut C) -> Self {
        Self { conn }
    }
}

impl<C: Connection + ?Sized> Connection for TracedConn<'_, C> {
    fn base_tables(&mut self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let span = tracing::debug_span!("db.query", what = "base_tables", rows = tracing::field::Empty);
            let tables = self.conn.base_tables().instrument(span.clone()).await?;
            span.record("rows", tables.len());
            Ok(tables)
        })
    }

    fn column_metadata<'a>(
        &'a mut self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ColumnMetadata>>> {
        Box::pin(async move {
            let span = tracing::debug_span!(
                "db.query",
                what = "column_metadata",
                table = %table,
                rows = tracing::field::Empty,
            );
            let rows = self
                .conn
                .column_metadata(table)
                .instrument(span.clone())
                .await?;
            span.record("rows", rows.len());
            Ok(rows)
        })
    }

    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let span = tracing::debug_span!("db.execute", sql = %sql);
            let result = self.conn.execute(sql).instrument(span).await;
            if let Err(e) = &result {
                tracing::debug!(error = %e, "statement failed");
            }
            result
        })
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(
            self.conn
                .begin()
                .instrument(tracing::debug_span!("db.transaction", action = "begin")),
        )
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(
            self.conn
                .commit()
                .instrument(tracing::debug_span!("db.transaction", action = "commit")),
        )
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(
            self.conn
                .rollback()
                .instrument(tracing::debug_span!("db.transaction", action = "rollback")),
        )
    }

    fn row_count<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let span = tracing::debug_span!(
                "db.query",
                what = "row_count",
                table = %table,
                count = tracing::field::Empty,
            );
            let count = self.conn.row_count(table).instrument(span.clone()).await?;
            span.record("count", count);
            Ok(count)
        })
    }

    fn insert_row<'a>(
        &'a mut self,
        table: &'a str,
        values: &'a [(String, SeedValue)],
    ) -> BoxFuture<'a, Result<()>> {
        let span = tracing::debug_span!(
            "db.execute",
            what = "insert_row",
            table = %table,
            params = values.len(),
        );
        Box::pin(self.conn.insert_row(table, values).instrument(span))
    }

    fn registry_contains<'a>(
        &'a mut self,
        registry: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<bool>> {
        let span = tracing::debug_span!(
            "db.query",
            what = "registry_contains",
            registry = %registry,
            table = %table,
        );
        Box::pin(self.conn.registry_contains(registry, table).instrument(span))
    }

    fn registry_insert<'a>(
        &'a mut self,
        registry: &'a str,
        entry: &'a TypeRegistryEntry,
    ) -> BoxFuture<'a, Result<()>> {
        let span = tracing::debug_span!(
            "db.execute",
            what = "registry_insert",
            registry = %registry,
            table = %entry.table_name,
        );
        Box::pin(self.conn.registry_insert(registry, entry).instrument(span))
    }

    fn foreign_keys(&mut self) -> BoxFuture<'_, Result<Vec<ForeignKeyConstraint>>> {
        Box::pin(async move {
            let span = tracing::debug_span!("db.query", what = "foreign_keys", rows = tracing::field::Empty);
            let fks = self.conn.foreign_keys().instrument(span.clone()).await?;
            span.record("rows", fks.len());
            Ok(fks)
        })
    }
}
