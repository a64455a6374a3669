//! Best-effort registration of new tables in the type registry.

use crate::config::RegistrySettings;
use crate::error::Error;
use crate::repository::ResolvedSchema;
use crate::traced::Connection;
use chrono::NaiveDateTime;
use serde::Serialize;

/// A row of the type registry table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeRegistryEntry {
    pub type_name: String,
    pub table_name: String,
    pub is_active: bool,
    pub supports_mapping: bool,
    pub created_at: NaiveDateTime,
}

/// Outcome of a registration pass. Never fails as a whole.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrationReport {
    pub registered: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

pub const UNKNOWN_TYPE_NAME: &str = "Unknown Type";

/// Derive a display name from a table description.
///
/// Takes the text before the first em dash, en dash or ` - `, trimmed and
/// truncated to `max_len` characters.
pub fn type_name_from_description(description: Option<&str>, max_len: usize) -> String {
    let Some(description) = description else {
        return UNKNOWN_TYPE_NAME.to_string();
    };

    let mut head = description;
    for separator in ["\u{2014}", "\u{2013}", " - "] {
        if let Some((before, _)) = head.split_once(separator) {
            head = before;
        }
    }

    let name: String = head.trim().chars().take(max_len).collect();
    let name = name.trim_end().to_string();
    if name.is_empty() {
        UNKNOWN_TYPE_NAME.to_string()
    } else {
        name
    }
}

/// Build the registry entry for a table.
pub fn entry_for(
    schema: &ResolvedSchema,
    table: &str,
    rules: &RegistrySettings,
    now: NaiveDateTime,
) -> TypeRegistryEntry {
    let description = schema
        .table(table)
        .and_then(|t| t.description.as_deref());
    TypeRegistryEntry {
        type_name: type_name_from_description(description, rules.type_name_max_len),
        table_name: table.to_string(),
        is_active: true,
        supports_mapping: rules.supports_mapping(table),
        created_at: now,
    }
}

/// Register newly created tables.
///
/// System and parent-named tables are skipped, as are tables already in the
/// registry. A missing registry table skips the whole pass. Failures are
/// logged and collected, never returned.
pub async fn register_tables<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &ResolvedSchema,
    tables: &[String],
    rules: &RegistrySettings,
) -> RegistrationReport {
    let mut report = RegistrationReport::default();

    let candidates: Vec<&String> = tables
        .iter()
        .filter(|t| !rules.is_system_table(t) && !rules.is_parent_table(t))
        .collect();
    if candidates.is_empty() {
        return report;
    }

    match conn.base_tables().await {
        Ok(existing) if existing.iter().any(|t| t.eq_ignore_ascii_case(&rules.table)) => {}
        Ok(_) => {
            tracing::warn!(registry = %rules.table, "type registry table not found, skipping registration");
            report
                .skipped
                .extend(candidates.iter().map(|t| format!("{t} (no registry table)")));
            return report;
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not list tables, skipping registration");
            report.errors.push(e.to_string());
            return report;
        }
    }

    let now = chrono::Utc::now().naive_utc();
    for table in candidates {
        match register_one(conn, schema, table, rules, now).await {
            Ok(true) => {
                tracing::info!(table = %table, "registered table in type registry");
                report.registered.push(table.clone());
            }
            Ok(false) => report.skipped.push(format!("{table} (already registered)")),
            Err(e) => {
                let e = Error::Registration {
                    table: table.clone(),
                    source: Box::new(e),
                };
                tracing::warn!(error = %e, "registration failed");
                report.errors.push(e.to_string());
            }
        }
    }

    report
}

async fn register_one<C: Connection + ?Sized>(
    conn: &mut C,
    schema: &ResolvedSchema,
    table: &str,
    rules: &RegistrySettings,
    now: NaiveDateTime,
) -> crate::Result<bool> {
    if conn.registry_contains(&rules.table, table).await? {
        return Ok(false);
    }
    let entry = entry_for(schema, table, rules, now);
    conn.registry_insert(&rules.table, &entry).await?;
    Ok(true)
}
