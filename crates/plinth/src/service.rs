//! The operations exposed to the CLI.
//!
//! Every operation reloads the schema from disk, acquires at most one
//! connection, and returns a structured result. Nothing here prints.
//!
//! # Example
//!
//! ```ignore
//! let pool = MssqlPool::new(&url, settings.database.max_connections)?;
//! let service = PlinthService::new(pool, settings);
//! let report = service.migrate(true, false).await?;
//! ```

use crate::cleanup::{self, DropReport};
use crate::config::Settings;
use crate::diff::{self, TableDiff};
use crate::error::Error;
use crate::introspect;
use crate::migrate::{
    self, CreateReport, DatabaseInfo, UpdateReport, foreign_key_statements, table_statements,
};
use crate::pool::ConnectionProvider;
use crate::repository::{self, ResolvedSchema, TableOrigin};
use crate::seed::{self, SeedReport};
use crate::solver::CreationOrder;
use crate::traced::TracedConn;
use crate::{Result, ddl};
use plinth_db_schema::TableDefinition;
use serde::Serialize;

/// Result of [`PlinthService::migrate`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MigrateOutcome {
    Create(CreateReport),
    Update(UpdateReport),
}

impl MigrateOutcome {
    pub fn errors(&self) -> &[String] {
        match self {
            MigrateOutcome::Create(r) => &r.errors,
            MigrateOutcome::Update(r) => &r.errors,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub info: DatabaseInfo,
    pub is_up_to_date: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParentSummary {
    pub name: String,
    pub columns: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub parent: Option<String>,
    pub plugin: Option<String>,
    pub columns: usize,
    pub own_columns: usize,
}

/// The resolved schema, without touching the database.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaDump {
    pub parents: Vec<ParentSummary>,
    pub tables: Vec<TableSummary>,
    pub creation_order: CreationOrder,
    pub validation_errors: Vec<String>,
}

/// One resolved table with the SQL that would create it.
#[derive(Debug, Clone, Serialize)]
pub struct TableView {
    pub name: String,
    pub origin: Option<TableOrigin>,
    pub definition: TableDefinition,
    /// CREATE TABLE, indexes, then foreign keys to tables in the schema
    pub sql: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableDiffView {
    pub diff: TableDiff,
    pub commands: Vec<String>,
}

pub struct PlinthService<P> {
    provider: P,
    settings: Settings,
}

impl<P: ConnectionProvider> PlinthService<P> {
    pub fn new(provider: P, settings: Settings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn load_schema(&self) -> Result<ResolvedSchema> {
        Ok(repository::load(&self.settings.schema)?)
    }

    /// Create missing tables, or with `update_existing` alter existing ones.
    pub async fn migrate(&self, dry_run: bool, update_existing: bool) -> Result<MigrateOutcome> {
        let schema = self.load_schema()?;
        let mut conn = self.provider.acquire().await?;
        let mut conn = TracedConn::new(&mut conn);

        if update_existing {
            let report = migrate::update_existing(&mut conn, &schema, dry_run).await?;
            Ok(MigrateOutcome::Update(report))
        } else {
            let report =
                migrate::create_all(&mut conn, &schema, &self.settings.registry, dry_run).await?;
            Ok(MigrateOutcome::Create(report))
        }
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let schema = self.load_schema()?;
        let mut conn = self.provider.acquire().await?;
        let mut conn = TracedConn::new(&mut conn);

        let info = migrate::database_info(&mut conn, &schema).await?;
        let is_up_to_date = info.missing_tables.is_empty() && info.validation_errors.is_empty();
        Ok(StatusReport {
            info,
            is_up_to_date,
        })
    }

    pub fn dump_schema(&self) -> Result<SchemaDump> {
        dump_schema(&self.settings)
    }

    pub fn show_table(&self, name: &str) -> Result<TableView> {
        show_table(&self.settings, name)
    }

    /// Live-vs-desired diff for one table. The table must exist on both sides.
    pub async fn diff_table(&self, name: &str) -> Result<TableDiffView> {
        let schema = self.load_schema()?;
        let desired = find_table(&schema, name)?;

        let mut conn = self.provider.acquire().await?;
        let mut conn = TracedConn::new(&mut conn);

        let live = introspect::introspect(&mut conn, &desired.name)
            .await?
            .ok_or_else(|| Error::NotInDatabase(desired.name.clone()))?;
        let diff = diff::compare(&live, desired);
        let commands = ddl::alter_commands(&diff);
        Ok(TableDiffView { diff, commands })
    }

    pub async fn drop_extra_tables(&self, force: bool) -> Result<DropReport> {
        let schema = self.load_schema()?;
        let mut conn = self.provider.acquire().await?;
        let mut conn = TracedConn::new(&mut conn);
        cleanup::drop_extra_tables(&mut conn, &schema, force).await
    }

    pub async fn clean_database(&self, force: bool) -> Result<DropReport> {
        let mut conn = self.provider.acquire().await?;
        let mut conn = TracedConn::new(&mut conn);
        cleanup::clean_database(&mut conn, force).await
    }

    pub async fn seed_initial_data(&self) -> Result<SeedReport> {
        let schema = self.load_schema()?;
        let seeds = seed::load_seeds(&self.settings.schema)?;

        let mut conn = self.provider.acquire().await?;
        let mut conn = TracedConn::new(&mut conn);
        seed::seed_tables(&mut conn, &schema, &seeds, &self.settings.registry).await
    }
}

/// Summarize the resolved schema. Needs no database.
pub fn dump_schema(settings: &Settings) -> Result<SchemaDump> {
    let schema = repository::load(&settings.schema)?;

    let parents = schema
        .parents
        .values()
        .map(|p| ParentSummary {
            name: p.name.clone(),
            columns: p.columns.len(),
        })
        .collect();

    let tables = schema
        .tables
        .values()
        .map(|t| {
            let origin = schema.origins.get(&t.name);
            TableSummary {
                name: t.name.clone(),
                parent: origin.and_then(|o| o.parent.clone()),
                plugin: t.plugin.clone(),
                columns: t.columns.len(),
                own_columns: origin.map_or(t.columns.len(), |o| o.own_columns),
            }
        })
        .collect();

    Ok(SchemaDump {
        parents,
        tables,
        creation_order: schema.creation_order(&settings.registry),
        validation_errors: schema
            .validate_foreign_keys()
            .iter()
            .map(ToString::to_string)
            .collect(),
    })
}

/// One resolved table and the SQL that would create it. Needs no database.
pub fn show_table(settings: &Settings, name: &str) -> Result<TableView> {
    let schema = repository::load(&settings.schema)?;
    let table = find_table(&schema, name)?;

    let mut sql = table_statements(table);
    sql.extend(foreign_key_statements(&schema, table));

    Ok(TableView {
        name: table.name.clone(),
        origin: schema.origins.get(&table.name).cloned(),
        definition: table.clone(),
        sql,
    })
}

fn find_table<'s>(schema: &'s ResolvedSchema, name: &str) -> Result<&'s TableDefinition> {
    schema
        .table_ignore_case(name)
        .ok_or_else(|| Error::TableNotFound {
            table: name.to_string(),
            available: schema.table_names(),
        })
}
