use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while loading and resolving schema documents.
///
/// All of these are fatal: no database work starts after one of them.
#[derive(Debug, Error)]
pub enum SchemaLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: Utf8PathBuf, message: String },

    #[error("table `{table}` declares parent `{parent}`, which is not defined")]
    MissingParent { table: String, parent: String },

    #[error("table `{table}` is defined in both {first} and {second}")]
    DuplicateTable {
        table: String,
        first: Utf8PathBuf,
        second: Utf8PathBuf,
    },

    #[error("parent template `{name}` is defined in both {first} and {second}")]
    DuplicateParent {
        name: String,
        first: Utf8PathBuf,
        second: Utf8PathBuf,
    },

    #[error("table `{table}` has no columns")]
    NoColumns { table: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaLoadError),

    #[error("failed to create table `{table}`: {source}")]
    TableCreation {
        table: String,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to update table `{table}`: {source}")]
    TableUpdate {
        table: String,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to register table `{table}`: {source}")]
    Registration {
        table: String,
        #[source]
        source: Box<Error>,
    },

    #[error("sql server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("statement failed: {message}\n  sql: {sql}")]
    Statement { sql: String, message: String },

    #[error("table `{table}` is not defined in the schema (available: {})", available.join(", "))]
    TableNotFound {
        table: String,
        available: Vec<String>,
    },

    #[error("table `{0}` does not exist in the database")]
    NotInDatabase(String),
}

impl Error {
    pub(crate) fn statement(sql: impl Into<String>, message: impl ToString) -> Self {
        Error::Statement {
            sql: sql.into(),
            message: message.to_string(),
        }
    }
}
