//! Destructive maintenance: dropping tables the schema does not know about,
//! or every table.
//!
//! Both operations return their candidates without touching anything unless
//! `force` is set.

use crate::Result;
use crate::ddl;
use crate::repository::ResolvedSchema;
use crate::traced::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DropReport {
    /// Tables that are (or would be) dropped
    pub candidates: Vec<String>,
    /// Foreign key constraints dropped beforehand
    pub foreign_keys_dropped: Vec<String>,
    pub dropped: Vec<String>,
    pub errors: Vec<String>,
}

/// Drop live tables that are absent from the schema, ignoring case.
pub async fn drop_extra_tables<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &ResolvedSchema,
    force: bool,
) -> Result<DropReport> {
    let candidates: Vec<String> = conn
        .base_tables()
        .await?
        .into_iter()
        .filter(|t| schema.table_ignore_case(t).is_none())
        .collect();

    let mut report = DropReport {
        candidates,
        ..Default::default()
    };
    if !force {
        return Ok(report);
    }

    for table in report.candidates.clone() {
        drop_one(conn, &table, &mut report).await;
    }
    Ok(report)
}

/// Drop every base table, after removing all foreign key constraints so
/// drop order does not matter.
pub async fn clean_database<C: Connection + ?Sized>(
    conn: &mut C,
    force: bool,
) -> Result<DropReport> {
    let mut report = DropReport {
        candidates: conn.base_tables().await?,
        ..Default::default()
    };
    if !force {
        return Ok(report);
    }

    for fk in conn.foreign_keys().await? {
        let sql = ddl::drop_constraint(&fk.table, &fk.name);
        match conn.execute(&sql).await {
            Ok(()) => report.foreign_keys_dropped.push(fk.name),
            Err(e) => {
                tracing::warn!(table = %fk.table, constraint = %fk.name, error = %e, "could not drop foreign key");
                report.errors.push(format!("{}.{}: {e}", fk.table, fk.name));
            }
        }
    }

    for table in report.candidates.clone() {
        drop_one(conn, &table, &mut report).await;
    }
    Ok(report)
}

async fn drop_one<C: Connection + ?Sized>(conn: &mut C, table: &str, report: &mut DropReport) {
    match conn.execute(&ddl::drop_table(table)).await {
        Ok(()) => {
            tracing::info!(table = %table, "dropped table");
            report.dropped.push(table.to_string());
        }
        Err(e) => {
            tracing::warn!(table = %table, error = %e, "could not drop table");
            report.errors.push(format!("{table}: {e}"));
        }
    }
}
