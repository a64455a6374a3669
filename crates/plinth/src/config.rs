//! Engine settings.
//!
//! Every field has a default, so an empty document is a valid configuration.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub schema: SchemaSettings,
    pub registry: RegistrySettings,
}

impl Settings {
    /// Resolve relative schema paths against `base`.
    pub fn relative_to(mut self, base: &Utf8Path) -> Self {
        if self.schema.root.is_relative() {
            self.schema.root = base.join(&self.schema.root);
        }
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// ADO-style connection string, e.g.
    /// `server=tcp:localhost,1433;database=app;user=sa;password=...;TrustServerCertificate=true`
    pub url: Option<String>,
    /// Maximum pooled connections
    pub max_connections: usize,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 4,
        }
    }
}

/// Where schema documents live and how they are categorized.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaSettings {
    /// Directory holding one subdirectory per category
    pub root: Utf8PathBuf,
    /// Category holding parent templates
    pub parent_category: String,
    /// Category holding one subdirectory per plugin
    pub plugins_category: String,
    /// Category holding seed documents
    pub seed_category: String,
    /// Plugins to load; every plugin directory when unset
    pub enabled_plugins: Option<Vec<String>>,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("schemas"),
            parent_category: "parent".to_string(),
            plugins_category: "plugins".to_string(),
            seed_category: "seeds".to_string(),
            enabled_plugins: None,
        }
    }
}

impl SchemaSettings {
    pub fn parent_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.parent_category)
    }

    pub fn plugins_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.plugins_category)
    }

    pub fn seed_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.seed_category)
    }

    /// Whether a top-level directory name is reserved for something other
    /// than core table documents.
    pub(crate) fn is_reserved_category(&self, name: &str) -> bool {
        name == self.parent_category || name == self.plugins_category || name == self.seed_category
    }

    pub(crate) fn plugin_enabled(&self, plugin: &str) -> bool {
        match &self.enabled_plugins {
            Some(enabled) => enabled.iter().any(|p| p == plugin),
            None => true,
        }
    }
}

/// The type registry and the table-name conventions it relies on.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Register newly created tables
    pub enabled: bool,
    /// Registry table name; always created first
    pub table: String,
    /// Prefix of system tables, created right after the registry and never registered
    pub system_prefix: String,
    /// Prefixes of business-domain tables that support column mapping
    pub mapping_prefixes: Vec<String>,
    /// Maximum length of a registered type name
    pub type_name_max_len: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            table: "sys_data_types".to_string(),
            system_prefix: "sys_".to_string(),
            mapping_prefixes: vec!["cat_".to_string()],
            type_name_max_len: 100,
        }
    }
}

impl RegistrySettings {
    pub fn is_system_table(&self, table: &str) -> bool {
        table.starts_with(&self.system_prefix)
    }

    /// Parent-named tables hold templates, not data.
    pub fn is_parent_table(&self, table: &str) -> bool {
        table.to_ascii_lowercase().contains("parent")
    }

    pub fn supports_mapping(&self, table: &str) -> bool {
        !self.is_system_table(table)
            && !self.is_parent_table(table)
            && self.mapping_prefixes.iter().any(|p| table.starts_with(p.as_str()))
    }
}
