//! Table creation ordering and foreign key validation.

use crate::config::RegistrySettings;
use indexmap::IndexMap;
use plinth_db_schema::TableDefinition;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// The order tables should be created in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CreationOrder {
    pub tables: Vec<String>,
    /// Tables placed by the cycle fallback rather than by dependency order
    pub cyclic: Vec<String>,
}

impl CreationOrder {
    pub fn has_cycles(&self) -> bool {
        !self.cyclic.is_empty()
    }
}

/// Compute a deterministic creation order.
///
/// The registry table comes first, then the other system tables in
/// lexicographic order. The remaining tables are placed in rounds: each
/// round takes every table whose unplaced dependencies are all outside the
/// remaining set, sorted lexicographically. If a round finds nothing, the
/// rest form a cycle and are appended lexicographically.
///
/// References to tables outside the schema and self-references are ignored.
pub fn creation_order(
    tables: &IndexMap<String, TableDefinition>,
    rules: &RegistrySettings,
) -> CreationOrder {
    let mut order = CreationOrder::default();

    if tables.contains_key(&rules.table) {
        order.tables.push(rules.table.clone());
    }

    let system: BTreeSet<&String> = tables
        .keys()
        .filter(|name| **name != rules.table && rules.is_system_table(name))
        .collect();
    order.tables.extend(system.iter().map(|name| (*name).clone()));

    let mut remaining: BTreeSet<&str> = tables
        .keys()
        .filter(|name| **name != rules.table && !rules.is_system_table(name))
        .map(String::as_str)
        .collect();

    let dependencies: IndexMap<&str, BTreeSet<String>> = tables
        .iter()
        .map(|(name, table)| (name.as_str(), table.dependencies()))
        .collect();

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|name| {
                dependencies
                    .get(name)
                    .map(|deps| deps.iter().all(|dep| !remaining.contains(dep.as_str())))
                    .unwrap_or(true)
            })
            .collect();

        if ready.is_empty() {
            let cyclic: Vec<String> = remaining.iter().map(|s| s.to_string()).collect();
            tracing::warn!(
                tables = %cyclic.join(", "),
                "circular foreign key dependency; creating remaining tables in name order"
            );
            order.tables.extend(cyclic.iter().cloned());
            order.cyclic = cyclic;
            break;
        }

        for name in ready {
            remaining.remove(name);
            order.tables.push(name.to_string());
        }
    }

    order
}

/// A foreign key that points at a table missing from the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyIssue {
    pub table: String,
    pub column: String,
    pub references: String,
}

impl fmt::Display for ForeignKeyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Foreign key in {}.{} references non-existent table: {}",
            self.table, self.column, self.references
        )
    }
}

/// Check that every foreign key references a table in the schema.
pub fn validate_foreign_keys(tables: &IndexMap<String, TableDefinition>) -> Vec<ForeignKeyIssue> {
    let known: HashSet<&str> = tables.keys().map(String::as_str).collect();
    tables
        .values()
        .flat_map(|table| {
            table
                .foreign_keys()
                .filter(|(_, fk)| !known.contains(fk.table.as_str()))
                .map(|(column, fk)| ForeignKeyIssue {
                    table: table.name.clone(),
                    column: column.to_string(),
                    references: fk.table.clone(),
                })
        })
        .collect()
}
