//! Loading and resolving schema documents.
//!
//! The schema root holds one directory per category. The parent category
//! holds parent templates, the plugins category holds one directory per
//! plugin, the seeds category holds seed data, and every other category
//! holds core table documents. Documents are YAML (`.yaml`, `.yml`) or
//! JSON (`.json`) and are searched recursively.

use crate::config::{RegistrySettings, SchemaSettings};
use crate::error::SchemaLoadError;
use crate::solver::{self, CreationOrder, ForeignKeyIssue};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use plinth_db_schema::{
    ParentDocument, ParentTemplate, TableDefinition, TableDocument, merge_parent_columns,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Where a resolved table came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableOrigin {
    /// Name in its document, before any plugin prefix
    pub base_name: String,
    /// Parent template it was merged with
    pub parent: Option<String>,
    pub plugin: Option<String>,
    /// Number of columns declared by the table itself
    pub own_columns: usize,
    pub source: Utf8PathBuf,
}

/// The desired schema after inheritance resolution.
///
/// Built once per load and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSchema {
    pub parents: IndexMap<String, ParentTemplate>,
    /// Resolved tables by final name: core tables first, then plugin tables
    pub tables: IndexMap<String, TableDefinition>,
    pub origins: IndexMap<String, TableOrigin>,
}

impl ResolvedSchema {
    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.get(name)
    }

    /// Look a table up ignoring ASCII case, as SQL Server does by default.
    pub fn table_ignore_case(&self, name: &str) -> Option<&TableDefinition> {
        self.table(name).or_else(|| {
            self.tables
                .values()
                .find(|t| t.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn creation_order(&self, rules: &RegistrySettings) -> CreationOrder {
        solver::creation_order(&self.tables, rules)
    }

    pub fn validate_foreign_keys(&self) -> Vec<ForeignKeyIssue> {
        solver::validate_foreign_keys(&self.tables)
    }
}

/// Load every schema document under the configured root and resolve it.
pub fn load(settings: &SchemaSettings) -> Result<ResolvedSchema, SchemaLoadError> {
    let root = &settings.root;
    if !root.is_dir() {
        return Err(SchemaLoadError::Io {
            path: root.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "schema root is not a directory",
            ),
        });
    }

    let mut schema = ResolvedSchema::default();
    let mut parent_sources: IndexMap<String, Utf8PathBuf> = IndexMap::new();

    let parent_dir = settings.parent_dir();
    if parent_dir.is_dir() {
        for path in collect_documents(&parent_dir)? {
            let doc: ParentDocument = parse_document(&path)?;
            for template in doc.into_templates() {
                if let Some(first) = parent_sources.get(&template.name) {
                    return Err(SchemaLoadError::DuplicateParent {
                        name: template.name,
                        first: first.clone(),
                        second: path,
                    });
                }
                parent_sources.insert(template.name.clone(), path.clone());
                schema.parents.insert(template.name.clone(), template);
            }
        }
        tracing::info!(count = schema.parents.len(), "loaded parent templates");
    } else {
        tracing::warn!(dir = %parent_dir, "parent template directory not found");
    }

    let mut core_dirs = Vec::new();
    for entry in read_dir_sorted(root)? {
        if entry.is_dir()
            && let Some(name) = entry.file_name()
            && !settings.is_reserved_category(name)
        {
            core_dirs.push(entry);
        }
    }

    for dir in &core_dirs {
        for path in collect_documents(dir)? {
            let doc: TableDocument = parse_document(&path)?;
            let plugin = doc.plugin.clone();
            add_tables(&mut schema, doc, plugin.as_deref(), &path)?;
        }
    }

    let plugins_dir = settings.plugins_dir();
    if plugins_dir.is_dir() {
        for plugin_dir in read_dir_sorted(&plugins_dir)? {
            let Some(plugin) = plugin_dir.file_name().map(str::to_string) else {
                continue;
            };
            if !plugin_dir.is_dir() {
                continue;
            }
            if !settings.plugin_enabled(&plugin) {
                tracing::debug!(plugin = %plugin, "plugin not enabled, skipping");
                continue;
            }
            for path in collect_documents(&plugin_dir)? {
                let doc: TableDocument = parse_document(&path)?;
                add_tables(&mut schema, doc, Some(&plugin), &path)?;
            }
            tracing::info!(plugin = %plugin, "loaded plugin schema");
        }
    } else {
        tracing::debug!(dir = %plugins_dir, "plugins directory not found");
    }

    if let Some(enabled) = &settings.enabled_plugins {
        for plugin in enabled {
            if !plugins_dir.join(plugin).is_dir() {
                tracing::warn!(plugin = %plugin, "enabled plugin has no schema directory");
            }
        }
    }

    tracing::info!(
        tables = schema.tables.len(),
        parents = schema.parents.len(),
        "schema loaded"
    );

    Ok(schema)
}

/// Resolve a table's parent, if it declares one.
///
/// The result holds the parent's columns followed by the table's own, with
/// same-named table columns replacing the parent's in place. The `parent`
/// field is cleared.
pub fn resolve_inheritance(
    table_name: &str,
    raw: TableDefinition,
    parents: &IndexMap<String, ParentTemplate>,
) -> Result<TableDefinition, SchemaLoadError> {
    let Some(parent_name) = &raw.parent else {
        return Ok(raw);
    };

    let parent = parents
        .get(parent_name)
        .ok_or_else(|| SchemaLoadError::MissingParent {
            table: table_name.to_string(),
            parent: parent_name.clone(),
        })?;

    let columns = merge_parent_columns(&parent.columns, &raw.columns);
    Ok(TableDefinition {
        parent: None,
        columns,
        ..raw
    })
}

fn add_tables(
    schema: &mut ResolvedSchema,
    doc: TableDocument,
    plugin: Option<&str>,
    source: &Utf8Path,
) -> Result<(), SchemaLoadError> {
    for (base_name, raw) in doc.tables {
        let name = match plugin {
            Some(plugin) if schema.tables.contains_key(&base_name) => {
                format!("{plugin}_{base_name}")
            }
            _ => base_name.clone(),
        };

        if let Some(existing) = schema.origins.get(&name) {
            return Err(SchemaLoadError::DuplicateTable {
                table: name,
                first: existing.source.clone(),
                second: source.to_path_buf(),
            });
        }

        let origin = TableOrigin {
            base_name: base_name.clone(),
            parent: raw.parent.clone(),
            plugin: plugin.map(str::to_string),
            own_columns: raw.columns.len(),
            source: source.to_path_buf(),
        };

        let mut table = resolve_inheritance(&name, raw, &schema.parents)?;
        if table.columns.is_empty() {
            return Err(SchemaLoadError::NoColumns { table: name });
        }
        table.name = name.clone();
        table.plugin = origin.plugin.clone();
        if table.description.is_none() {
            table.description = doc.description.clone();
        }

        schema.origins.insert(name.clone(), origin);
        schema.tables.insert(name, table);
    }
    Ok(())
}

fn read_dir_sorted(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, SchemaLoadError> {
    let io_err = |source| SchemaLoadError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in dir.read_dir_utf8().map_err(io_err)? {
        entries.push(entry.map_err(io_err)?.into_path());
    }
    entries.sort();
    Ok(entries)
}

/// All schema documents under `dir`, recursively, in path order.
fn collect_documents(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, SchemaLoadError> {
    let mut documents = Vec::new();
    for path in read_dir_sorted(dir)? {
        if path.is_dir() {
            documents.extend(collect_documents(&path)?);
        } else if matches!(path.extension(), Some("yaml" | "yml" | "json")) {
            documents.push(path);
        }
    }
    Ok(documents)
}

/// Parse a YAML or JSON document. An empty file is an empty document.
pub(crate) fn parse_document<T: DeserializeOwned + Default>(
    path: &Utf8Path,
) -> Result<T, SchemaLoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| SchemaLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if content.trim().is_empty() {
        return Ok(T::default());
    }

    let parsed = match path.extension() {
        Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
        _ => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
    };

    parsed.map_err(|message| SchemaLoadError::Parse {
        path: path.to_path_buf(),
        message,
    })
}
