//! Initial data seeding.
//!
//! Seed documents live in the seeds category:
//!
//! ```yaml
//! seeds:
//!   users:
//!     - { username: admin, is_active: true, created_at: { sql: "GETDATE()" } }
//! ```
//!
//! Rows are only inserted into tables that exist and are empty.

use crate::config::{RegistrySettings, SchemaSettings};
use crate::error::SchemaLoadError;
use crate::repository::{ResolvedSchema, parse_document};
use crate::traced::Connection;
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A literal value in a seed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// A raw SQL expression, inlined as-is
    Expr { sql: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedDocument {
    #[serde(default)]
    pub seeds: IndexMap<String, Vec<IndexMap<String, SeedValue>>>,
}

/// Rows to seed, by table.
pub type SeedSet = IndexMap<String, Vec<Vec<(String, SeedValue)>>>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedReport {
    /// `"<table> (<n> rows)"`
    pub seeded: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

/// Load every seed document. A missing seeds directory is an empty set.
pub fn load_seeds(settings: &SchemaSettings) -> Result<SeedSet, SchemaLoadError> {
    let dir = settings.seed_dir();
    let mut seeds = SeedSet::new();
    if !dir.is_dir() {
        tracing::debug!(dir = %dir, "seed directory not found");
        return Ok(seeds);
    }

    for path in seed_documents(&dir)? {
        let doc: SeedDocument = parse_document(&path)?;
        for (table, rows) in doc.seeds {
            seeds
                .entry(table)
                .or_default()
                .extend(rows.into_iter().map(|row| row.into_iter().collect()));
        }
    }
    Ok(seeds)
}

fn seed_documents(dir: &camino::Utf8Path) -> Result<Vec<Utf8PathBuf>, SchemaLoadError> {
    let mut paths = Vec::new();
    let entries = dir.read_dir_utf8().map_err(|source| SchemaLoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let path = entry
            .map_err(|source| SchemaLoadError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .into_path();
        if matches!(path.extension(), Some("yaml" | "yml" | "json")) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Insert seed rows into empty tables, in creation order.
///
/// Each table is seeded in its own transaction; a failure rolls back that
/// table only and is recorded.
pub async fn seed_tables<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &ResolvedSchema,
    seeds: &SeedSet,
    rules: &RegistrySettings,
) -> crate::Result<SeedReport> {
    let mut report = SeedReport::default();
    let existing = conn.base_tables().await?;

    let order = schema.creation_order(rules).tables;
    let mut tables: Vec<&String> = seeds.keys().collect();
    tables.sort_by_key(|t| order.iter().position(|o| o == *t).unwrap_or(usize::MAX));

    for table in tables {
        let rows = &seeds[table.as_str()];
        let Some(live_name) = existing.iter().find(|t| t.eq_ignore_ascii_case(table)) else {
            report.skipped.push(format!("{table} (table missing)"));
            continue;
        };

        match conn.row_count(live_name).await {
            Ok(0) => {}
            Ok(_) => {
                report.skipped.push(format!("{table} (already has data)"));
                continue;
            }
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "could not count rows");
                report.errors.push(format!("{table}: {e}"));
                continue;
            }
        }

        match seed_table(conn, live_name, rows).await {
            Ok(()) => {
                tracing::info!(table = %table, rows = rows.len(), "seeded table");
                report.seeded.push(format!("{table} ({} rows)", rows.len()));
            }
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "seeding failed");
                report.errors.push(format!("{table}: {e}"));
            }
        }
    }

    Ok(report)
}

/// Insert every row in one transaction, rolling back on the first failure.
async fn seed_table<C: Connection + ?Sized>(
    conn: &mut C,
    table: &str,
    rows: &[Vec<(String, SeedValue)>],
) -> crate::Result<()> {
    conn.begin().await?;
    for row in rows {
        if let Err(e) = conn.insert_row(table, row).await {
            if let Err(rollback) = conn.rollback().await {
                tracing::warn!(table = %table, error = %rollback, "rollback failed");
            }
            return Err(e);
        }
    }
    conn.commit().await
}
