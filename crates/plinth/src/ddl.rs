//! T-SQL DDL generation.
//!
//! Every function here is pure: it renders statements, it never runs them.

use crate::diff::TableDiff;
use crate::sql::{Ident, Lit, ident_list};
use plinth_db_schema::{ColumnDefinition, ForeignKeyRef, IndexDefinition, TableDefinition, TypeFamily};

/// Render one column: `[name] TYPE [IDENTITY(1,1)] NOT NULL|NULL [DEFAULT x] [UNIQUE]`.
pub fn column_sql(name: &str, col: &ColumnDefinition) -> String {
    column_sql_with_default(name, col, col.effective_default())
}

fn column_sql_with_default(name: &str, col: &ColumnDefinition, default: Option<&str>) -> String {
    let mut def = format!("{} {}", Ident(name), col.sql_type);

    if col.auto_increment {
        def.push_str(" IDENTITY(1,1)");
    }

    def.push_str(if col.is_not_null() { " NOT NULL" } else { " NULL" });

    if let Some(default) = default {
        def.push_str(&format!(" DEFAULT {default}"));
    }

    if col.unique && !col.primary_key {
        def.push_str(" UNIQUE");
    }

    def
}

/// Name of a table's primary key constraint.
pub fn primary_key_name(table: &str) -> String {
    format!("PK_{table}")
}

/// Name of the foreign key constraint on `table.column`.
pub fn foreign_key_name(table: &str, column: &str) -> String {
    format!("FK_{table}_{column}")
}

/// Generate the CREATE TABLE statement for a resolved table.
///
/// Foreign keys are not part of it; see [`add_foreign_key`].
pub fn create_table(table: &TableDefinition) -> String {
    let mut sql = format!("CREATE TABLE {} (\n", Ident(&table.name));

    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|(name, col)| format!("    {}", column_sql(name, col)))
        .collect();

    let pk_columns = table.primary_key_columns();
    if !pk_columns.is_empty() {
        parts.push(format!(
            "    CONSTRAINT {} PRIMARY KEY ({})",
            Ident(primary_key_name(&table.name)),
            ident_list(&pk_columns)
        ));
    }

    sql.push_str(&parts.join(",\n"));
    sql.push_str("\n);");

    sql
}

/// Generate one CREATE INDEX statement per index definition.
pub fn create_indexes(table: &str, indexes: &[IndexDefinition]) -> Vec<String> {
    indexes
        .iter()
        .map(|idx| {
            let unique = if idx.unique { "UNIQUE " } else { "" };
            format!(
                "CREATE {}INDEX {} ON {} ({});",
                unique,
                Ident(idx.resolved_name(table)),
                Ident(table),
                ident_list(&idx.columns)
            )
        })
        .collect()
}

/// Generate the foreign key constraint for `table.column`.
pub fn add_foreign_key(table: &str, column: &str, target: &ForeignKeyRef) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({});",
        Ident(table),
        Ident(foreign_key_name(table, column)),
        Ident(column),
        Ident(&target.table),
        Ident(&target.column)
    )
}

/// The default injected when adding a NOT NULL column that declares none.
///
/// Existing rows need a value, so every document type gets one.
pub fn implicit_default(col: &ColumnDefinition) -> Option<&'static str> {
    match col.sql_type.family() {
        TypeFamily::Text => Some("N''"),
        TypeFamily::Integer | TypeFamily::Boolean | TypeFamily::Numeric => Some("0"),
        TypeFamily::Temporal => Some("GETDATE()"),
        TypeFamily::Guid => Some("NEWID()"),
        TypeFamily::Binary => Some("0x"),
        TypeFamily::Other => None,
    }
}

/// Generate `ALTER TABLE ... ADD` for a new column.
pub fn add_column(table: &str, name: &str, col: &ColumnDefinition) -> String {
    let default = match col.effective_default() {
        Some(default) => Some(default),
        None if col.is_not_null() && !col.auto_increment => implicit_default(col),
        None => None,
    };
    format!(
        "ALTER TABLE {} ADD {};",
        Ident(table),
        column_sql_with_default(name, col, default)
    )
}

/// Generate `ALTER TABLE ... ALTER COLUMN`, changing type and nullability only.
pub fn alter_column(table: &str, name: &str, col: &ColumnDefinition) -> String {
    let null = if col.is_not_null() { "NOT NULL" } else { "NULL" };
    format!(
        "ALTER TABLE {} ALTER COLUMN {} {} {};",
        Ident(table),
        Ident(name),
        col.sql_type,
        null
    )
}

/// Generate the statements that drop a column.
///
/// The first drops whatever DEFAULT constraint is bound to the column (SQL
/// Server refuses to drop a column that still has one), the second drops
/// the column itself.
pub fn drop_column(table: &str, name: &str) -> Vec<String> {
    let drop_constraint = format!("ALTER TABLE {} DROP CONSTRAINT ", Ident(table));
    let lookup = format!(
        "DECLARE @constraint_name SYSNAME;\n\
         SELECT @constraint_name = dc.name\n\
         FROM sys.default_constraints dc\n\
         JOIN sys.columns c ON c.object_id = dc.parent_object_id AND c.column_id = dc.parent_column_id\n\
         WHERE dc.parent_object_id = OBJECT_ID({}) AND c.name = {};\n\
         IF @constraint_name IS NOT NULL\n\
         BEGIN\n\
         \x20   DECLARE @sql NVARCHAR(MAX) = {} + QUOTENAME(@constraint_name);\n\
         \x20   EXEC sp_executesql @sql;\n\
         END",
        Lit(Ident(table).to_string()),
        Lit(name),
        Lit(drop_constraint)
    );

    vec![
        lookup,
        format!("ALTER TABLE {} DROP COLUMN {};", Ident(table), Ident(name)),
    ]
}

/// Generate the ALTER statements for a diff: adds, then modifications, then drops.
pub fn alter_commands(diff: &TableDiff) -> Vec<String> {
    let mut commands = Vec::new();

    for (name, col) in &diff.add_columns {
        commands.push(add_column(&diff.table, name, col));
    }

    for change in &diff.modify_columns {
        commands.push(alter_column(&diff.table, &change.live.name, &change.desired));
    }

    for name in &diff.drop_columns {
        commands.extend(drop_column(&diff.table, name));
    }

    commands
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE {};", Ident(table))
}

pub fn drop_constraint(table: &str, constraint: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {};",
        Ident(table),
        Ident(constraint)
    )
}
