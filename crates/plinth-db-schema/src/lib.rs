//! Schema document types for plinth.
//!
//! This crate contains the declarative table model shared by the schema
//! repository, the diff engine and the DDL generator in `plinth`:
//! column and index definitions, parent templates, and the on-disk document
//! shapes they are deserialized from.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Errors raised while interpreting a schema definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("unknown SQL type `{0}`")]
    UnknownType(String),

    #[error("SQL type `{0}` requires a length")]
    MissingLength(String),

    #[error("invalid arguments for SQL type `{0}`")]
    InvalidArguments(String),

    #[error("invalid foreign key reference `{0}` (expected `table.column`)")]
    InvalidForeignKey(String),
}

/// Length of a character or binary type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Length {
    /// A fixed maximum, in characters (or bytes for binary types).
    Chars(u16),
    /// `MAX`
    Max,
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Length::Chars(n) => write!(f, "{n}"),
            Length::Max => f.write_str("MAX"),
        }
    }
}

impl FromStr for Length {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("max") {
            return Ok(Length::Max);
        }
        match s.parse::<u16>() {
            Ok(n) if n > 0 => Ok(Length::Chars(n)),
            _ => Err(()),
        }
    }
}

/// SQL Server column types understood by the engine.
///
/// Document types are parsed strictly, so a typo in a schema file fails at
/// load time instead of at `CREATE TABLE` time. [`SqlType::Other`] only
/// comes out of live introspection, for catalog types the documents cannot
/// declare.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SqlType {
    /// TINYINT
    TinyInt,
    /// SMALLINT
    SmallInt,
    /// INT
    Int,
    /// BIGINT
    BigInt,
    /// BIT
    Bit,
    /// DECIMAL(p,s)
    Decimal { precision: u8, scale: u8 },
    /// FLOAT
    Float,
    /// REAL
    Real,
    /// CHAR(n)
    Char(u16),
    /// NCHAR(n)
    NChar(u16),
    /// VARCHAR(n | MAX)
    VarChar(Length),
    /// NVARCHAR(n | MAX)
    NVarChar(Length),
    /// TEXT
    Text,
    /// NTEXT
    NText,
    /// DATE
    Date,
    /// TIME
    Time,
    /// DATETIME
    DateTime,
    /// DATETIME2
    DateTime2,
    /// DATETIMEOFFSET
    DateTimeOffset,
    /// UNIQUEIDENTIFIER
    UniqueIdentifier,
    /// VARBINARY(n | MAX)
    VarBinary(Length),
    /// Any other catalog type, upper-cased.
    Other(String),
}

/// Broad grouping of [`SqlType`]s, used to pick implicit defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Text,
    Integer,
    Boolean,
    Numeric,
    Temporal,
    Guid,
    Binary,
    Other,
}

impl SqlType {
    /// The type family this type belongs to.
    pub fn family(&self) -> TypeFamily {
        match self {
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Int | SqlType::BigInt => {
                TypeFamily::Integer
            }
            SqlType::Bit => TypeFamily::Boolean,
            SqlType::Decimal { .. } | SqlType::Float | SqlType::Real => TypeFamily::Numeric,
            SqlType::Char(_)
            | SqlType::NChar(_)
            | SqlType::VarChar(_)
            | SqlType::NVarChar(_)
            | SqlType::Text
            | SqlType::NText => TypeFamily::Text,
            SqlType::Date
            | SqlType::Time
            | SqlType::DateTime
            | SqlType::DateTime2
            | SqlType::DateTimeOffset => TypeFamily::Temporal,
            SqlType::UniqueIdentifier => TypeFamily::Guid,
            SqlType::VarBinary(_) => TypeFamily::Binary,
            SqlType::Other(_) => TypeFamily::Other,
        }
    }

    /// Build a canonical type from an `INFORMATION_SCHEMA.COLUMNS` row.
    ///
    /// `max_length` of `-1` means `MAX`. Types whose parameters are missing
    /// or out of range, and types outside the document vocabulary, come back
    /// as [`SqlType::Other`].
    pub fn from_catalog(
        data_type: &str,
        max_length: Option<i32>,
        precision: Option<i32>,
        scale: Option<i32>,
    ) -> SqlType {
        let upper = data_type.trim().to_ascii_uppercase();
        let length = match max_length {
            Some(-1) => Some(Length::Max),
            Some(n) => u16::try_from(n).ok().filter(|n| *n > 0).map(Length::Chars),
            None => None,
        };
        let fixed = match length {
            Some(Length::Chars(n)) => Some(n),
            _ => None,
        };

        match upper.as_str() {
            "TINYINT" => SqlType::TinyInt,
            "SMALLINT" => SqlType::SmallInt,
            "INT" => SqlType::Int,
            "BIGINT" => SqlType::BigInt,
            "BIT" => SqlType::Bit,
            "FLOAT" => SqlType::Float,
            "REAL" => SqlType::Real,
            "TEXT" => SqlType::Text,
            "NTEXT" => SqlType::NText,
            "DATE" => SqlType::Date,
            "TIME" => SqlType::Time,
            "DATETIME" => SqlType::DateTime,
            "DATETIME2" => SqlType::DateTime2,
            "DATETIMEOFFSET" => SqlType::DateTimeOffset,
            "UNIQUEIDENTIFIER" => SqlType::UniqueIdentifier,
            "DECIMAL" | "NUMERIC" => {
                let precision = precision.and_then(|p| u8::try_from(p).ok());
                let scale = scale.and_then(|s| u8::try_from(s).ok());
                match (precision, scale) {
                    (Some(precision), Some(scale)) => SqlType::Decimal { precision, scale },
                    _ => SqlType::Other(upper),
                }
            }
            "VARCHAR" => length.map(SqlType::VarChar).unwrap_or(SqlType::Other(upper)),
            "NVARCHAR" => length.map(SqlType::NVarChar).unwrap_or(SqlType::Other(upper)),
            "VARBINARY" => length.map(SqlType::VarBinary).unwrap_or(SqlType::Other(upper)),
            "CHAR" => fixed.map(SqlType::Char).unwrap_or(SqlType::Other(upper)),
            "NCHAR" => fixed.map(SqlType::NChar).unwrap_or(SqlType::Other(upper)),
            _ => SqlType::Other(upper),
        }
    }
}

impl Default for SqlType {
    /// Columns that declare no type are `NVARCHAR(255)`.
    fn default() -> Self {
        SqlType::NVarChar(Length::Chars(255))
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::TinyInt => f.write_str("TINYINT"),
            SqlType::SmallInt => f.write_str("SMALLINT"),
            SqlType::Int => f.write_str("INT"),
            SqlType::BigInt => f.write_str("BIGINT"),
            SqlType::Bit => f.write_str("BIT"),
            SqlType::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
            SqlType::Float => f.write_str("FLOAT"),
            SqlType::Real => f.write_str("REAL"),
            SqlType::Char(n) => write!(f, "CHAR({n})"),
            SqlType::NChar(n) => write!(f, "NCHAR({n})"),
            SqlType::VarChar(len) => write!(f, "VARCHAR({len})"),
            SqlType::NVarChar(len) => write!(f, "NVARCHAR({len})"),
            SqlType::Text => f.write_str("TEXT"),
            SqlType::NText => f.write_str("NTEXT"),
            SqlType::Date => f.write_str("DATE"),
            SqlType::Time => f.write_str("TIME"),
            SqlType::DateTime => f.write_str("DATETIME"),
            SqlType::DateTime2 => f.write_str("DATETIME2"),
            SqlType::DateTimeOffset => f.write_str("DATETIMEOFFSET"),
            SqlType::UniqueIdentifier => f.write_str("UNIQUEIDENTIFIER"),
            SqlType::VarBinary(len) => write!(f, "VARBINARY({len})"),
            SqlType::Other(name) => f.write_str(name),
        }
    }
}

impl FromStr for SqlType {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();

        let (base, args) = match compact.split_once('(') {
            Some((base, rest)) => {
                let args = rest
                    .strip_suffix(')')
                    .ok_or_else(|| DefinitionError::UnknownType(s.to_string()))?;
                (base, Some(args))
            }
            None => (compact.as_str(), None),
        };

        let invalid = || DefinitionError::InvalidArguments(s.to_string());
        let length = |args: Option<&str>| -> Result<Length, DefinitionError> {
            let args = args.ok_or_else(|| DefinitionError::MissingLength(s.to_string()))?;
            args.parse::<Length>().map_err(|_| invalid())
        };
        let fixed = |args: Option<&str>| -> Result<u16, DefinitionError> {
            match length(args)? {
                Length::Chars(n) => Ok(n),
                Length::Max => Err(invalid()),
            }
        };
        let scalar = |ty: SqlType| -> Result<SqlType, DefinitionError> {
            match args {
                None => Ok(ty),
                Some(_) => Err(invalid()),
            }
        };

        match base {
            "TINYINT" => scalar(SqlType::TinyInt),
            "SMALLINT" => scalar(SqlType::SmallInt),
            "INT" | "INTEGER" => scalar(SqlType::Int),
            "BIGINT" => scalar(SqlType::BigInt),
            "BIT" => scalar(SqlType::Bit),
            "FLOAT" => scalar(SqlType::Float),
            "REAL" => scalar(SqlType::Real),
            "TEXT" => scalar(SqlType::Text),
            "NTEXT" => scalar(SqlType::NText),
            "DATE" => scalar(SqlType::Date),
            "TIME" => scalar(SqlType::Time),
            "DATETIME" => scalar(SqlType::DateTime),
            "DATETIME2" => scalar(SqlType::DateTime2),
            "DATETIMEOFFSET" => scalar(SqlType::DateTimeOffset),
            "UNIQUEIDENTIFIER" => scalar(SqlType::UniqueIdentifier),
            "DECIMAL" | "NUMERIC" => {
                let (precision, scale) = match args {
                    None => (18, 0),
                    Some(args) => match args.split_once(',') {
                        Some((p, s)) => (
                            p.parse::<u8>().map_err(|_| invalid())?,
                            s.parse::<u8>().map_err(|_| invalid())?,
                        ),
                        None => (args.parse::<u8>().map_err(|_| invalid())?, 0),
                    },
                };
                if precision == 0 || precision > 38 || scale > precision {
                    return Err(invalid());
                }
                Ok(SqlType::Decimal { precision, scale })
            }
            "CHAR" => Ok(SqlType::Char(fixed(args)?)),
            "NCHAR" => Ok(SqlType::NChar(fixed(args)?)),
            "VARCHAR" => Ok(SqlType::VarChar(length(args)?)),
            "NVARCHAR" => Ok(SqlType::NVarChar(length(args)?)),
            "VARBINARY" => Ok(SqlType::VarBinary(length(args)?)),
            _ => Err(DefinitionError::UnknownType(s.to_string())),
        }
    }
}

impl TryFrom<String> for SqlType {
    type Error = DefinitionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SqlType> for String {
    fn from(value: SqlType) -> Self {
        value.to_string()
    }
}

/// A `table.column` foreign key target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ForeignKeyRef {
    /// Referenced table
    pub table: String,
    /// Referenced column
    pub column: String,
}

impl fmt::Display for ForeignKeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

impl FromStr for ForeignKeyRef {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (table, column) = parse_fk_reference(s.trim())
            .ok_or_else(|| DefinitionError::InvalidForeignKey(s.to_string()))?;
        Ok(ForeignKeyRef {
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

impl TryFrom<String> for ForeignKeyRef {
    type Error = DefinitionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ForeignKeyRef> for String {
    fn from(value: ForeignKeyRef) -> Self {
        value.to_string()
    }
}

/// Parse a foreign key reference.
///
/// Supports two formats:
/// - `table.column` (dot-separated)
/// - `table(column)` (parentheses)
///
/// Returns `Some((table, column))` on success, `None` on parse failure.
pub fn parse_fk_reference(fk_ref: &str) -> Option<(&str, &str)> {
    if let Some((table, col)) = fk_ref.split_once('.')
        && !table.is_empty()
        && !col.is_empty()
    {
        return Some((table, col));
    }

    if let Some(paren_idx) = fk_ref.find('(')
        && fk_ref.ends_with(')')
    {
        let table = &fk_ref[..paren_idx];
        let col = &fk_ref[paren_idx + 1..fk_ref.len() - 1];
        if !table.is_empty() && !col.is_empty() {
            return Some((table, col));
        }
    }

    None
}

/// A declared column.
///
/// The column name is the key it is stored under in its table's column map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Declared type, `NVARCHAR(255)` when omitted
    #[serde(rename = "type", default)]
    pub sql_type: SqlType,
    /// Whether the column allows NULL (ignored for primary keys)
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Part of the table's primary key
    #[serde(default)]
    pub primary_key: bool,
    /// Has a UNIQUE constraint
    #[serde(default)]
    pub unique: bool,
    /// Rendered as `IDENTITY(1,1)`
    #[serde(default)]
    pub auto_increment: bool,
    /// Raw SQL default, e.g. `GETDATE()` or `N'draft'`
    #[serde(default, deserialize_with = "deserialize_scalar_text")]
    pub default: Option<String>,
    /// Referenced `table.column`
    #[serde(default)]
    pub foreign_key: Option<ForeignKeyRef>,
    /// Free-text description
    #[serde(default)]
    pub description: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl Default for ColumnDefinition {
    fn default() -> Self {
        Self {
            sql_type: SqlType::default(),
            nullable: true,
            primary_key: false,
            unique: false,
            auto_increment: false,
            default: None,
            foreign_key: None,
            description: None,
        }
    }
}

impl ColumnDefinition {
    /// Whether the column is rendered `NOT NULL`. Primary keys always are.
    pub fn is_not_null(&self) -> bool {
        self.primary_key || !self.nullable
    }

    /// The declared default, unless the column is an identity column.
    pub fn effective_default(&self) -> Option<&str> {
        if self.auto_increment {
            None
        } else {
            self.default.as_deref()
        }
    }
}

/// A declared index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Explicit name; derived from the table and columns when absent
    #[serde(default)]
    pub name: Option<String>,
    /// Indexed columns, in order
    pub columns: Vec<String>,
    /// Whether this is a unique index
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    /// The name the index is created under.
    pub fn resolved_name(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => index_name(table, &self.columns),
        }
    }
}

/// Default index name: `IX_<table>_<col1>_<col2>...`.
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let mut name = format!("IX_{table}");
    for col in columns {
        name.push('_');
        name.push_str(col.as_ref());
    }
    name
}

/// A table definition, before or after parent resolution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Final table name (the document key, possibly plugin-prefixed)
    #[serde(skip)]
    pub name: String,
    /// Parent template to merge in; `None` once resolved
    #[serde(default)]
    pub parent: Option<String>,
    /// Free-text description
    #[serde(default)]
    pub description: Option<String>,
    /// Columns in DDL order
    #[serde(default)]
    pub columns: IndexMap<String, ColumnDefinition>,
    /// Secondary indexes
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    /// Owning plugin, if the table came from a plugin schema
    #[serde(skip)]
    pub plugin: Option<String>,
}

impl TableDefinition {
    /// Names of the primary key columns, in column order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, col)| col.primary_key)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Foreign key columns with their targets, in column order.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&str, &ForeignKeyRef)> {
        self.columns
            .iter()
            .filter_map(|(name, col)| col.foreign_key.as_ref().map(|fk| (name.as_str(), fk)))
    }

    /// Tables this table references, excluding itself.
    pub fn dependencies(&self) -> BTreeSet<String> {
        self.foreign_keys()
            .map(|(_, fk)| fk.table.clone())
            .filter(|table| *table != self.name)
            .collect()
    }
}

/// A named set of columns merged into every table that declares it as parent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParentTemplate {
    pub name: String,
    pub columns: IndexMap<String, ColumnDefinition>,
}

/// Merge a parent's columns with a child's.
///
/// Parent columns come first in their declared order; a child column with
/// the same name replaces the parent's in place, and the remaining child
/// columns follow in their own order.
pub fn merge_parent_columns(
    parent: &IndexMap<String, ColumnDefinition>,
    child: &IndexMap<String, ColumnDefinition>,
) -> IndexMap<String, ColumnDefinition> {
    let mut merged = parent.clone();
    for (name, col) in child {
        merged.insert(name.clone(), col.clone());
    }
    merged
}

/// A document holding parent templates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParentDocument {
    #[serde(default)]
    pub parent_tables: IndexMap<String, IndexMap<String, ColumnDefinition>>,
}

impl ParentDocument {
    pub fn into_templates(self) -> impl Iterator<Item = ParentTemplate> {
        self.parent_tables
            .into_iter()
            .map(|(name, columns)| ParentTemplate { name, columns })
    }
}

/// A document holding table definitions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableDocument {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar_text")]
    pub version: Option<String>,
    /// Plugin that owns every table in this document
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub tables: IndexMap<String, TableDefinition>,
}

/// Accept a string, number or boolean scalar and keep it as SQL text.
///
/// Booleans become `1` / `0`, matching `BIT` literals.
fn deserialize_scalar_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
        Scalar::Bool(true) => "1".to_string(),
        Scalar::Bool(false) => "0".to_string(),
        Scalar::Int(n) => n.to_string(),
        Scalar::Float(n) => n.to_string(),
        Scalar::Text(s) => s,
    }))
}
