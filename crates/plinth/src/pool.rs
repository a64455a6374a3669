//! SQL Server connections on tiberius, pooled with deadpool.

use crate::Result;
use crate::error::Error;
use crate::introspect::{
    BASE_TABLES_SQL, COLUMN_METADATA_SQL, ColumnMetadata, FOREIGN_KEYS_SQL, ForeignKeyConstraint,
};
use crate::registry::TypeRegistryEntry;
use crate::seed::SeedValue;
use crate::sql::{Ident, ident_list};
use crate::traced::{BoxFuture, Connection};
use deadpool::managed::{self, Metrics, Object, Pool, RecycleResult};
use tiberius::{Client, Config, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

/// A tiberius client over a tokio TCP stream.
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Something that hands out database connections.
///
/// The service acquires one connection per operation.
pub trait ConnectionProvider: Send + Sync {
    type Conn: Connection;

    fn acquire(&self) -> BoxFuture<'_, Result<Self::Conn>>;
}

/// Opens tiberius clients from an ADO connection string.
pub struct MssqlManager {
    config: Config,
}

impl MssqlManager {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            config: Config::from_ado_string(url)?,
        })
    }
}

impl managed::Manager for MssqlManager {
    type Type = MssqlClient;
    type Error = tiberius::error::Error;

    async fn create(&self) -> std::result::Result<MssqlClient, Self::Error> {
        let tcp = TcpStream::connect(self.config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        Client::connect(self.config.clone(), tcp.compat_write()).await
    }

    async fn recycle(&self, client: &mut MssqlClient, _: &Metrics) -> RecycleResult<Self::Error> {
        client.simple_query("SELECT 1").await?.into_results().await?;
        Ok(())
    }
}

/// A pool of SQL Server connections.
#[derive(Clone)]
pub struct MssqlPool {
    inner: Pool<MssqlManager>,
}

impl MssqlPool {
    pub fn new(url: &str, max_connections: usize) -> Result<Self> {
        let inner = Pool::builder(MssqlManager::new(url)?)
            .max_size(max_connections.max(1))
            .build()
            .map_err(|e| Error::Pool(e.to_string()))?;
        Ok(Self { inner })
    }

    pub async fn get(&self) -> Result<MssqlConnection> {
        let conn = self
            .inner
            .get()
            .await
            .map_err(|e| Error::Pool(e.to_string()))?;
        Ok(MssqlConnection(conn))
    }
}

impl ConnectionProvider for MssqlPool {
    type Conn = MssqlConnection;

    fn acquire(&self) -> BoxFuture<'_, Result<MssqlConnection>> {
        Box::pin(self.get())
    }
}

/// A pooled SQL Server connection.
pub struct MssqlConnection(Object<MssqlManager>);

impl MssqlConnection {
    async fn batch(&mut self, sql: &str) -> Result<Vec<Vec<Row>>> {
        let stream = self
            .0
            .simple_query(sql)
            .await
            .map_err(|e| Error::statement(sql, e))?;
        stream
            .into_results()
            .await
            .map_err(|e| Error::statement(sql, e))
    }
}

fn text(row: &Row, column: &str) -> Result<Option<String>> {
    Ok(row.try_get::<&str, _>(column)?.map(str::to_string))
}

fn required_text(row: &Row, column: &str) -> Result<String> {
    Ok(text(row, column)?.unwrap_or_default())
}

fn flag(row: &Row, column: &str) -> Result<bool> {
    Ok(row.try_get::<bool, _>(column)?.unwrap_or(false))
}

fn metadata_row(row: &Row) -> Result<ColumnMetadata> {
    Ok(ColumnMetadata {
        column_name: required_text(row, "COLUMN_NAME")?,
        data_type: required_text(row, "DATA_TYPE")?,
        is_nullable: text(row, "IS_NULLABLE")?.is_some_and(|v| v.eq_ignore_ascii_case("YES")),
        column_default: text(row, "COLUMN_DEFAULT")?,
        character_maximum_length: row.try_get::<i32, _>("CHARACTER_MAXIMUM_LENGTH")?,
        numeric_precision: row.try_get::<i32, _>("NUMERIC_PRECISION")?,
        numeric_scale: row.try_get::<i32, _>("NUMERIC_SCALE")?,
        is_primary_key: flag(row, "IS_PRIMARY_KEY")?,
        is_foreign_key: flag(row, "IS_FOREIGN_KEY")?,
        is_identity: flag(row, "IS_IDENTITY")?,
    })
}

/// Build a parameterized INSERT; NULL and SQL expressions are inlined.
fn insert_statement(table: &str, values: &[(String, SeedValue)]) -> String {
    let columns: Vec<&str> = values.iter().map(|(name, _)| name.as_str()).collect();
    let mut param = 0;
    let placeholders: Vec<String> = values
        .iter()
        .map(|(_, value)| match value {
            SeedValue::Null => "NULL".to_string(),
            SeedValue::Expr { sql } => sql.clone(),
            _ => {
                param += 1;
                format!("@P{param}")
            }
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        Ident(table),
        ident_list(&columns),
        placeholders.join(", ")
    )
}

impl Connection for MssqlConnection {
    fn base_tables(&mut self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let rows = self.batch(BASE_TABLES_SQL).await?;
            rows.into_iter()
                .flatten()
                .map(|row| required_text(&row, "TABLE_NAME"))
                .collect()
        })
    }

    fn column_metadata<'a>(
        &'a mut self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ColumnMetadata>>> {
        Box::pin(async move {
            let rows = self
                .0
                .query(COLUMN_METADATA_SQL, &[&table])
                .await?
                .into_first_result()
                .await?;
            rows.iter().map(metadata_row).collect()
        })
    }

    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.batch(sql).await?;
            Ok(())
        })
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.batch("BEGIN TRANSACTION").await?;
            Ok(())
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.batch("COMMIT TRANSACTION").await?;
            Ok(())
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await?;
            Ok(())
        })
    }

    fn row_count<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let sql = format!("SELECT COUNT_BIG(*) AS n FROM {}", Ident(table));
            let rows = self.batch(&sql).await?;
            let count = match rows.first().and_then(|set| set.first()) {
                Some(row) => row.try_get::<i64, _>("n")?.unwrap_or(0),
                None => 0,
            };
            Ok(count.max(0) as u64)
        })
    }

    fn insert_row<'a>(
        &'a mut self,
        table: &'a str,
        values: &'a [(String, SeedValue)],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = insert_statement(table, values);
            let mut query = Query::new(sql.clone());
            for (_, value) in values {
                match value {
                    SeedValue::Bool(b) => query.bind(*b),
                    SeedValue::Int(i) => query.bind(*i),
                    SeedValue::Float(f) => query.bind(*f),
                    SeedValue::Text(s) => query.bind(s.as_str()),
                    SeedValue::Null | SeedValue::Expr { .. } => {}
                }
            }
            query
                .execute(&mut *self.0)
                .await
                .map_err(|e| Error::statement(sql, e))?;
            Ok(())
        })
    }

    fn registry_contains<'a>(
        &'a mut self,
        registry: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT CAST(COUNT(*) AS INT) AS n FROM {} WHERE [table_name] = @P1",
                Ident(registry)
            );
            let rows = self
                .0
                .query(sql.as_str(), &[&table])
                .await?
                .into_first_result()
                .await?;
            let count = match rows.first() {
                Some(row) => row.try_get::<i32, _>("n")?.unwrap_or(0),
                None => 0,
            };
            Ok(count > 0)
        })
    }

    fn registry_insert<'a>(
        &'a mut self,
        registry: &'a str,
        entry: &'a TypeRegistryEntry,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = format!(
                "INSERT INTO {} ([type_name], [table_name], [supports_mapping], [is_active], [created_at]) \
                 VALUES (@P1, @P2, @P3, @P4, @P5);",
                Ident(registry)
            );
            let mut query = Query::new(sql.clone());
            query.bind(entry.type_name.as_str());
            query.bind(entry.table_name.as_str());
            query.bind(entry.supports_mapping);
            query.bind(entry.is_active);
            query.bind(entry.created_at);
            query
                .execute(&mut *self.0)
                .await
                .map_err(|e| Error::statement(sql, e))?;
            Ok(())
        })
    }

    fn foreign_keys(&mut self) -> BoxFuture<'_, Result<Vec<ForeignKeyConstraint>>> {
        Box::pin(async move {
            let rows = self.batch(FOREIGN_KEYS_SQL).await?;
            rows.into_iter()
                .flatten()
                .map(|row| {
                    Ok(ForeignKeyConstraint {
                        table: required_text(&row, "TABLE_NAME")?,
                        name: required_text(&row, "CONSTRAINT_NAME")?,
                    })
                })
                .collect()
        })
    }
}
