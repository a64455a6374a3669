//! Migration orchestration: create missing tables, update existing ones,
//! and report on the database.

use crate::Result;
use crate::config::RegistrySettings;
use crate::ddl;
use crate::diff::{self, TableDiff};
use crate::error::Error;
use crate::introspect;
use crate::registry::{self, RegistrationReport};
use crate::repository::ResolvedSchema;
use crate::traced::Connection;
use plinth_db_schema::TableDefinition;
use serde::Serialize;
use std::collections::HashSet;

/// Outcome of [`create_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateReport {
    pub created: Vec<String>,
    /// `"<table> (already exists)"`
    pub skipped: Vec<String>,
    /// Statements that would run, filled in dry-run mode only
    pub planned: Vec<String>,
    /// Foreign key constraints added in the second phase
    pub foreign_keys: Vec<String>,
    pub errors: Vec<String>,
    /// The batch failed and nothing was created
    pub rolled_back: bool,
    pub registration: RegistrationReport,
}

/// The ALTER statements for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TablePlan {
    pub table: String,
    pub commands: Vec<String>,
    pub diff: TableDiff,
}

/// Outcome of [`update_existing`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    pub plans: Vec<TablePlan>,
    pub updated: Vec<String>,
    /// `"<table> (not in database)"`
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

/// Read-only comparison of live and desired table sets.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseInfo {
    pub existing_tables: Vec<String>,
    pub schema_tables: Vec<String>,
    /// Schema tables with no live counterpart, ignoring case
    pub missing_tables: Vec<String>,
    /// Live tables with no schema counterpart, ignoring case
    pub extra_tables: Vec<String>,
    pub validation_errors: Vec<String>,
}

fn lowercase_set(names: &[String]) -> HashSet<String> {
    names.iter().map(|n| n.to_ascii_lowercase()).collect()
}

/// CREATE TABLE followed by the table's indexes.
pub fn table_statements(table: &TableDefinition) -> Vec<String> {
    let mut statements = vec![ddl::create_table(table)];
    statements.extend(ddl::create_indexes(&table.name, &table.indexes));
    statements
}

/// Foreign key constraints for `table` whose targets are in the schema.
pub fn foreign_key_statements(schema: &ResolvedSchema, table: &TableDefinition) -> Vec<String> {
    table
        .foreign_keys()
        .filter(|(_, target)| schema.table_ignore_case(&target.table).is_some())
        .map(|(column, target)| ddl::add_foreign_key(&table.name, column, target))
        .collect()
}

/// Create every schema table missing from the database.
///
/// All CREATE TABLE and CREATE INDEX statements run in one transaction,
/// followed by the foreign key constraints of the new tables. Any failure
/// rolls back the whole batch. New tables are registered after commit.
pub async fn create_all<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &ResolvedSchema,
    rules: &RegistrySettings,
    dry_run: bool,
) -> Result<CreateReport> {
    let mut report = CreateReport::default();

    let existing = lowercase_set(&conn.base_tables().await?);
    let order = schema.creation_order(rules);

    let mut pending: Vec<&TableDefinition> = Vec::new();
    for name in &order.tables {
        let Some(table) = schema.table(name) else {
            continue;
        };
        if existing.contains(&name.to_ascii_lowercase()) {
            tracing::debug!(table = %name, "table already exists");
            report.skipped.push(format!("{name} (already exists)"));
        } else {
            pending.push(table);
        }
    }

    if pending.is_empty() {
        tracing::info!("all schema tables already exist");
        return Ok(report);
    }

    if dry_run {
        for table in &pending {
            report.planned.extend(table_statements(table));
        }
        for table in &pending {
            report.planned.extend(foreign_key_statements(schema, table));
        }
        return Ok(report);
    }

    conn.begin().await?;

    if let Err((table, e)) = create_batch(conn, schema, &pending, &mut report).await {
        let e = Error::TableCreation {
            table,
            source: Box::new(e),
        };
        tracing::warn!(error = %e, "table creation failed, rolling back");
        if let Err(rollback) = conn.rollback().await {
            tracing::warn!(error = %rollback, "rollback failed");
        }
        report.errors.push(e.to_string());
        report.created.clear();
        report.foreign_keys.clear();
        report.rolled_back = true;
        return Ok(report);
    }

    conn.commit().await?;
    tracing::info!(count = report.created.len(), "created tables");

    if rules.enabled {
        report.registration = registry::register_tables(conn, schema, &report.created, rules).await;
    }

    Ok(report)
}

async fn create_batch<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &ResolvedSchema,
    pending: &[&TableDefinition],
    report: &mut CreateReport,
) -> std::result::Result<(), (String, Error)> {
    for table in pending {
        for sql in table_statements(table) {
            conn.execute(&sql)
                .await
                .map_err(|e| (table.name.clone(), e))?;
        }
        tracing::info!(table = %table.name, "created table");
        report.created.push(table.name.clone());
    }

    for table in pending {
        for (column, target) in table.foreign_keys() {
            if schema.table_ignore_case(&target.table).is_none() {
                tracing::warn!(
                    table = %table.name,
                    column = %column,
                    references = %target.table,
                    "skipping foreign key to a table outside the schema"
                );
                continue;
            }
            let sql = ddl::add_foreign_key(&table.name, column, target);
            conn.execute(&sql)
                .await
                .map_err(|e| (table.name.clone(), e))?;
            report
                .foreign_keys
                .push(ddl::foreign_key_name(&table.name, column));
        }
    }

    Ok(())
}

/// Bring existing tables in line with the schema.
///
/// Each table is introspected and diffed; in dry-run mode the ALTER
/// statements are only collected. Otherwise they run one by one, and a
/// failure stops that table only.
pub async fn update_existing<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &ResolvedSchema,
    dry_run: bool,
) -> Result<UpdateReport> {
    let mut report = UpdateReport::default();
    let live_tables = conn.base_tables().await?;

    for (name, desired) in &schema.tables {
        let Some(live_name) = live_tables.iter().find(|t| t.eq_ignore_ascii_case(name)) else {
            report.skipped.push(format!("{name} (not in database)"));
            continue;
        };

        let live = match introspect::introspect(conn, live_name).await {
            Ok(Some(live)) => live,
            Ok(None) => {
                report.skipped.push(format!("{name} (not in database)"));
                continue;
            }
            Err(e) => {
                record_update_error(&mut report, name, e);
                continue;
            }
        };

        let diff = diff::compare(&live, desired);
        if diff.is_empty() {
            tracing::debug!(table = %name, "table is up to date");
            continue;
        }

        let commands = ddl::alter_commands(&diff);
        report.plans.push(TablePlan {
            table: name.clone(),
            commands: commands.clone(),
            diff,
        });
        if dry_run {
            continue;
        }

        let mut failed = false;
        for sql in &commands {
            if let Err(e) = conn.execute(sql).await {
                record_update_error(&mut report, name, e);
                failed = true;
                break;
            }
        }
        if !failed {
            tracing::info!(table = %name, statements = commands.len(), "updated table");
            report.updated.push(name.clone());
        }
    }

    Ok(report)
}

fn record_update_error(report: &mut UpdateReport, table: &str, e: Error) {
    let e = Error::TableUpdate {
        table: table.to_string(),
        source: Box::new(e),
    };
    tracing::warn!(error = %e, "table update failed");
    report.errors.push(e.to_string());
}

/// Compare the live table list with the schema. Read-only.
pub async fn database_info<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &ResolvedSchema,
) -> Result<DatabaseInfo> {
    let existing_tables = conn.base_tables().await?;
    let schema_tables = schema.table_names();

    let live = lowercase_set(&existing_tables);
    let desired = lowercase_set(&schema_tables);

    let missing_tables = schema_tables
        .iter()
        .filter(|t| !live.contains(&t.to_ascii_lowercase()))
        .cloned()
        .collect();
    let extra_tables = existing_tables
        .iter()
        .filter(|t| !desired.contains(&t.to_ascii_lowercase()))
        .cloned()
        .collect();

    Ok(DatabaseInfo {
        existing_tables,
        schema_tables,
        missing_tables,
        extra_tables,
        validation_errors: schema
            .validate_foreign_keys()
            .iter()
            .map(ToString::to_string)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_db_schema::{ColumnDefinition, SqlType};

    fn table(name: &str, fk: Option<&str>) -> TableDefinition {
        let mut table = TableDefinition {
            name: name.to_string(),
            ..Default::default()
        };
        table.columns.insert(
            "id".to_string(),
            ColumnDefinition {
                sql_type: SqlType::Int,
                primary_key: true,
                ..Default::default()
            },
        );
        if let Some(fk) = fk {
            table.columns.insert(
                "ref_id".to_string(),
                ColumnDefinition {
                    sql_type: SqlType::Int,
                    foreign_key: Some(fk.parse().unwrap()),
                    ..Default::default()
                },
            );
        }
        table
    }

    #[test]
    fn test_foreign_keys_outside_schema_are_skipped() {
        let mut schema = ResolvedSchema::default();
        for t in [table("brands", None), table("products", Some("brands.id"))] {
            schema.tables.insert(t.name.clone(), t);
        }
        let orphan = table("orphans", Some("ghost.id"));

        assert_eq!(
            foreign_key_statements(&schema, &schema.tables["products"]),
            ["ALTER TABLE [products] ADD CONSTRAINT [FK_products_ref_id] FOREIGN KEY ([ref_id]) REFERENCES [brands] ([id]);"]
        );
        assert!(foreign_key_statements(&schema, &orphan).is_empty());
    }

    #[test]
    fn test_table_statements_create_before_indexes() {
        let mut t = table("brands", None);
        t.indexes.push(plinth_db_schema::IndexDefinition {
            name: None,
            columns: vec!["id".to_string()],
            unique: true,
        });
        let statements = table_statements(&t);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE [brands]"));
        assert_eq!(
            statements[1],
            "CREATE UNIQUE INDEX [IX_brands_id] ON [brands] ([id]);"
        );
    }
}
