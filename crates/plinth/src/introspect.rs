//! Live table introspection through `INFORMATION_SCHEMA`.

use crate::Result;
use crate::traced::Connection;
use indexmap::IndexMap;
use plinth_db_schema::SqlType;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Column metadata for one table, primary/foreign key membership included.
///
/// Numeric columns are cast to `INT` and key flags to `BIT` so every driver
/// reads them the same way. Bound parameter `@P1` is the table name.
pub const COLUMN_METADATA_SQL: &str = "\
SELECT
    c.COLUMN_NAME,
    c.DATA_TYPE,
    c.IS_NULLABLE,
    c.COLUMN_DEFAULT,
    CAST(c.CHARACTER_MAXIMUM_LENGTH AS INT) AS CHARACTER_MAXIMUM_LENGTH,
    CAST(c.NUMERIC_PRECISION AS INT) AS NUMERIC_PRECISION,
    CAST(c.NUMERIC_SCALE AS INT) AS NUMERIC_SCALE,
    CAST(CASE WHEN pk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS BIT) AS IS_PRIMARY_KEY,
    CAST(CASE WHEN fk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS BIT) AS IS_FOREIGN_KEY,
    CAST(COLUMNPROPERTY(OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)), c.COLUMN_NAME, 'IsIdentity') AS BIT) AS IS_IDENTITY
FROM INFORMATION_SCHEMA.COLUMNS c
LEFT JOIN (
    SELECT DISTINCT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME
    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
    WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
) pk ON c.TABLE_SCHEMA = pk.TABLE_SCHEMA AND c.TABLE_NAME = pk.TABLE_NAME AND c.COLUMN_NAME = pk.COLUMN_NAME
LEFT JOIN (
    SELECT DISTINCT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME
    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
    WHERE tc.CONSTRAINT_TYPE = 'FOREIGN KEY'
) fk ON c.TABLE_SCHEMA = fk.TABLE_SCHEMA AND c.TABLE_NAME = fk.TABLE_NAME AND c.COLUMN_NAME = fk.COLUMN_NAME
WHERE c.TABLE_NAME = @P1
ORDER BY c.ORDINAL_POSITION";

/// All base tables, by name.
pub const BASE_TABLES_SQL: &str = "\
SELECT TABLE_NAME
FROM INFORMATION_SCHEMA.TABLES
WHERE TABLE_TYPE = 'BASE TABLE'
ORDER BY TABLE_NAME";

/// Every foreign key constraint with its owning table.
pub const FOREIGN_KEYS_SQL: &str = "\
SELECT OBJECT_NAME(fk.parent_object_id) AS TABLE_NAME, fk.name AS CONSTRAINT_NAME
FROM sys.foreign_keys fk
ORDER BY TABLE_NAME, CONSTRAINT_NAME";

/// A foreign key constraint as seen in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyConstraint {
    /// Table that owns the constraint
    pub table: String,
    pub name: String,
}

/// One row of [`COLUMN_METADATA_SQL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub character_maximum_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub is_identity: bool,
}

/// A live column in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveColumn {
    /// Column name as stored in the catalog
    pub name: String,
    #[serde(serialize_with = "serialize_display")]
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Default expression text, as reported by the catalog
    pub default: Option<String>,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub is_identity: bool,
}

/// The actual structure of one live table.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LiveTableStructure {
    pub table: String,
    /// Columns in ordinal order, keyed by catalog name
    pub columns: IndexMap<String, LiveColumn>,
}

impl LiveTableStructure {
    pub fn from_metadata(table: &str, rows: Vec<ColumnMetadata>) -> Self {
        let columns = rows
            .into_iter()
            .map(|row| {
                let sql_type = SqlType::from_catalog(
                    &row.data_type,
                    row.character_maximum_length,
                    row.numeric_precision,
                    row.numeric_scale,
                );
                let col = LiveColumn {
                    name: row.column_name,
                    sql_type,
                    nullable: row.is_nullable,
                    default: row.column_default,
                    is_primary_key: row.is_primary_key,
                    is_foreign_key: row.is_foreign_key,
                    is_identity: row.is_identity,
                };
                (col.name.clone(), col)
            })
            .collect();

        Self {
            table: table.to_string(),
            columns,
        }
    }

    /// Look up a column by its normalized name.
    ///
    /// When several catalog names normalize to the same key, the one spelled
    /// exactly like the key wins, then the first in ordinal order.
    pub fn column(&self, name: &str) -> Option<&LiveColumn> {
        let key = normalize_column_name(name);
        self.columns.get(&key).or_else(|| {
            self.columns
                .values()
                .find(|col| normalize_column_name(&col.name) == key)
        })
    }
}

/// Read one table's live structure.
///
/// Returns `None` when the table has no columns, i.e. does not exist.
pub async fn introspect<C: Connection + ?Sized>(
    conn: &mut C,
    table: &str,
) -> Result<Option<LiveTableStructure>> {
    let rows = conn.column_metadata(table).await?;
    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(LiveTableStructure::from_metadata(table, rows)))
}

static CAMEL_PATTERNS: LazyLock<Option<(Regex, Regex)>> = LazyLock::new(|| {
    let word = Regex::new("(.)([A-Z][a-z]+)").ok()?;
    let boundary = Regex::new("([a-z0-9])([A-Z])").ok()?;
    Some((word, boundary))
});

/// Convert a Camel/PascalCase catalog name to snake_case.
///
/// Names that are already snake_case come back unchanged.
pub fn normalize_column_name(name: &str) -> String {
    let Some((word, boundary)) = CAMEL_PATTERNS.as_ref() else {
        return name.to_lowercase();
    };
    let first = word.replace_all(name, "${1}_${2}");
    let second = boundary.replace_all(&first, "${1}_${2}");
    second.to_lowercase()
}

fn serialize_display<S: serde::Serializer>(
    value: &SqlType,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
