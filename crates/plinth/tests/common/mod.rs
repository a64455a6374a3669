//! In-memory SQL Server stand-in.
//!
//! `FakeDb` interprets the DDL the engine generates (and nothing more) and
//! answers the catalog queries the way `INFORMATION_SCHEMA` would. DDL is
//! transactional, like on the real server.

#![allow(dead_code)]

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use plinth::introspect::{ColumnMetadata, ForeignKeyConstraint};
use plinth::registry::TypeRegistryEntry;
use plinth::schema::{Length, SqlType};
use plinth::seed::SeedValue;
use plinth::traced::BoxFuture;
use plinth::{Connection, ConnectionProvider, Error, Result, SchemaSettings, Settings};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub struct FakeColumn {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub default: Option<String>,
    pub identity: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub foreign_key: bool,
}

#[derive(Debug, Clone)]
pub struct FakeForeignKey {
    pub name: String,
    pub column: String,
    pub references: String,
}

#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    pub name: String,
    pub columns: Vec<FakeColumn>,
    pub rows: u64,
    pub foreign_keys: Vec<FakeForeignKey>,
    pub indexes: Vec<String>,
}

impl FakeTable {
    fn column_mut(&mut self, name: &str) -> Option<&mut FakeColumn> {
        self.columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Default)]
struct Catalog {
    tables: IndexMap<String, FakeTable>,
    registry: Vec<TypeRegistryEntry>,
}

impl Catalog {
    fn key(&self, name: &str) -> Option<String> {
        self.tables
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn table_mut(&mut self, name: &str) -> std::result::Result<&mut FakeTable, String> {
        let key = self
            .key(name)
            .ok_or_else(|| format!("Invalid object name '{name}'."))?;
        self.tables
            .get_mut(&key)
            .ok_or_else(|| format!("Invalid object name '{name}'."))
    }
}

#[derive(Default)]
struct State {
    catalog: Catalog,
    snapshot: Option<Catalog>,
    executed: Vec<String>,
    inserted: Vec<(String, Vec<(String, SeedValue)>)>,
    fail_on: Option<String>,
}

/// A shared in-memory database. Clones see the same state.
#[derive(Clone, Default)]
pub struct FakeDb {
    state: Arc<Mutex<State>>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn conn(&self) -> FakeConn {
        FakeConn { db: self.clone() }
    }

    pub fn provider(&self) -> FakeProvider {
        FakeProvider { db: self.clone() }
    }

    /// Run DDL directly, outside the engine. Panics on failure.
    pub fn exec(&self, sql: &str) {
        let mut state = self.lock();
        apply(&mut state.catalog, sql).unwrap();
    }

    /// Make every statement containing `needle` fail.
    pub fn fail_on(&self, needle: &str) {
        self.lock().fail_on = Some(needle.to_string());
    }

    pub fn set_rows(&self, table: &str, rows: u64) {
        self.lock().catalog.table_mut(table).unwrap().rows = rows;
    }

    pub fn table_names(&self) -> Vec<String> {
        self.lock().catalog.tables.keys().cloned().collect()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.lock().catalog.key(name).is_some()
    }

    pub fn table(&self, name: &str) -> FakeTable {
        let state = self.lock();
        let key = state.catalog.key(name).unwrap();
        state.catalog.tables[&key].clone()
    }

    pub fn column_names(&self, table: &str) -> Vec<String> {
        self.table(table)
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn column(&self, table: &str, column: &str) -> FakeColumn {
        self.table(table)
            .columns
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
            .unwrap()
    }

    /// Every statement successfully executed through a connection.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn registry(&self) -> Vec<TypeRegistryEntry> {
        self.lock().catalog.registry.clone()
    }

    pub fn inserted(&self) -> Vec<(String, Vec<(String, SeedValue)>)> {
        self.lock().inserted.clone()
    }
}

pub struct FakeConn {
    db: FakeDb,
}

fn failure(sql: &str, message: impl Into<String>) -> Error {
    Error::Statement {
        sql: sql.to_string(),
        message: message.into(),
    }
}

impl FakeConn {
    fn run<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> BoxFuture<'static, Result<T>>
    where
        T: Send + 'static,
    {
        let result = f(&mut self.db.lock());
        Box::pin(async move { result })
    }
}

impl Connection for FakeConn {
    fn base_tables(&mut self) -> BoxFuture<'_, Result<Vec<String>>> {
        self.run(|state| {
            let mut names: Vec<String> = state.catalog.tables.keys().cloned().collect();
            names.sort_by_key(|n| n.to_ascii_lowercase());
            Ok(names)
        })
    }

    fn column_metadata<'a>(
        &'a mut self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ColumnMetadata>>> {
        self.run(|state| {
            let Some(key) = state.catalog.key(table) else {
                return Ok(Vec::new());
            };
            Ok(state.catalog.tables[&key]
                .columns
                .iter()
                .map(metadata_row)
                .collect())
        })
    }

    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        self.run(|state| {
            if let Some(needle) = &state.fail_on
                && sql.contains(needle.as_str())
            {
                return Err(failure(sql, "injected failure"));
            }
            apply(&mut state.catalog, sql).map_err(|message| failure(sql, message))?;
            state.executed.push(sql.to_string());
            Ok(())
        })
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<()>> {
        self.run(|state| {
            state.snapshot = Some(state.catalog.clone());
            Ok(())
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<()>> {
        self.run(|state| {
            state.snapshot = None;
            Ok(())
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<()>> {
        self.run(|state| {
            if let Some(snapshot) = state.snapshot.take() {
                state.catalog = snapshot;
            }
            Ok(())
        })
    }

    fn row_count<'a>(&'a mut self, table: &'a str) -> BoxFuture<'a, Result<u64>> {
        self.run(|state| {
            let sql = format!("SELECT COUNT_BIG(*) AS n FROM [{table}]");
            if let Some(needle) = &state.fail_on
                && sql.contains(needle.as_str())
            {
                return Err(failure(&sql, "injected failure"));
            }
            state
                .catalog
                .table_mut(table)
                .map(|t| t.rows)
                .map_err(|m| failure(&sql, m))
        })
    }

    fn insert_row<'a>(
        &'a mut self,
        table: &'a str,
        values: &'a [(String, SeedValue)],
    ) -> BoxFuture<'a, Result<()>> {
        self.run(|state| {
            let t = state
                .catalog
                .table_mut(table)
                .map_err(|m| failure("INSERT", m))?;
            for (column, _) in values {
                if t.column_mut(column).is_none() {
                    return Err(failure("INSERT", format!("Invalid column name '{column}'.")));
                }
            }
            t.rows += 1;
            state.inserted.push((table.to_string(), values.to_vec()));
            Ok(())
        })
    }

    fn registry_contains<'a>(
        &'a mut self,
        registry: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<bool>> {
        self.run(|state| {
            state
                .catalog
                .table_mut(registry)
                .map_err(|m| failure("SELECT", m))?;
            Ok(state
                .catalog
                .registry
                .iter()
                .any(|e| e.table_name == table))
        })
    }

    fn registry_insert<'a>(
        &'a mut self,
        registry: &'a str,
        entry: &'a TypeRegistryEntry,
    ) -> BoxFuture<'a, Result<()>> {
        self.run(|state| {
            state
                .catalog
                .table_mut(registry)
                .map_err(|m| failure("INSERT", m))?
                .rows += 1;
            state.catalog.registry.push(entry.clone());
            Ok(())
        })
    }

    fn foreign_keys(&mut self) -> BoxFuture<'_, Result<Vec<ForeignKeyConstraint>>> {
        self.run(|state| {
            Ok(state
                .catalog
                .tables
                .values()
                .flat_map(|t| {
                    t.foreign_keys.iter().map(|fk| ForeignKeyConstraint {
                        table: t.name.clone(),
                        name: fk.name.clone(),
                    })
                })
                .collect())
        })
    }
}

pub struct FakeProvider {
    db: FakeDb,
}

impl ConnectionProvider for FakeProvider {
    type Conn = FakeConn;

    fn acquire(&self) -> BoxFuture<'_, Result<FakeConn>> {
        let conn = self.db.conn();
        Box::pin(async move { Ok(conn) })
    }
}

/// How `INFORMATION_SCHEMA.COLUMNS` describes a column.
fn metadata_row(col: &FakeColumn) -> ColumnMetadata {
    let (data_type, length, precision, scale) = match &col.sql_type {
        SqlType::NVarChar(len) => ("nvarchar".to_string(), Some(length(len)), None, None),
        SqlType::VarChar(len) => ("varchar".to_string(), Some(length(len)), None, None),
        SqlType::VarBinary(len) => ("varbinary".to_string(), Some(length(len)), None, None),
        SqlType::Char(n) => ("char".to_string(), Some(i32::from(*n)), None, None),
        SqlType::NChar(n) => ("nchar".to_string(), Some(i32::from(*n)), None, None),
        SqlType::Decimal { precision, scale } => (
            "decimal".to_string(),
            None,
            Some(i32::from(*precision)),
            Some(i32::from(*scale)),
        ),
        SqlType::Int => ("int".to_string(), None, Some(10), Some(0)),
        SqlType::BigInt => ("bigint".to_string(), None, Some(19), Some(0)),
        other => (other.to_string().to_ascii_lowercase(), None, None, None),
    };
    ColumnMetadata {
        column_name: col.name.clone(),
        data_type,
        is_nullable: col.nullable,
        column_default: col.default.as_ref().map(|d| format!("({d})")),
        character_maximum_length: length,
        numeric_precision: precision,
        numeric_scale: scale,
        is_primary_key: col.primary_key,
        is_foreign_key: col.foreign_key,
        is_identity: col.identity,
    }
}

fn length(len: &Length) -> i32 {
    match len {
        Length::Chars(n) => i32::from(*n),
        Length::Max => -1,
    }
}

/// Split a leading `[identifier]` off `s`.
fn take_ident(s: &str) -> Option<(String, &str)> {
    let rest = s.trim_start().strip_prefix('[')?;
    let mut name = String::new();
    let mut chars = rest.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == ']' {
            if let Some((_, ']')) = chars.peek() {
                chars.next();
                name.push(']');
                continue;
            }
            return Some((name, &rest[i + 1..]));
        }
        name.push(c);
    }
    None
}

/// Every `[identifier]` in `s`, in order.
fn all_idents(mut s: &str) -> Vec<String> {
    let mut idents = Vec::new();
    while let Some(start) = s.find('[') {
        match take_ident(&s[start..]) {
            Some((name, rest)) => {
                idents.push(name);
                s = rest;
            }
            None => break,
        }
    }
    idents
}

fn parse_column(def: &str) -> std::result::Result<FakeColumn, String> {
    let (name, rest) = take_ident(def).ok_or_else(|| format!("expected column in `{def}`"))?;
    let rest = rest.trim();
    let (ty, rest) = rest.split_once(' ').unwrap_or((rest, ""));
    let sql_type: SqlType = ty.parse().map_err(|e| format!("{e}"))?;
    let default = rest
        .split_once("DEFAULT ")
        .map(|(_, d)| d.trim().trim_end_matches(" UNIQUE").to_string());
    Ok(FakeColumn {
        name,
        sql_type,
        nullable: !rest.contains("NOT NULL"),
        default,
        identity: rest.contains("IDENTITY(1,1)"),
        unique: rest.ends_with("UNIQUE"),
        primary_key: false,
        foreign_key: false,
    })
}

fn between<'s>(s: &'s str, start: &str, end: &str) -> Option<&'s str> {
    let from = s.find(start)? + start.len();
    let len = s[from..].find(end)?;
    Some(&s[from..from + len])
}

/// Apply one engine-generated statement to the catalog.
fn apply(catalog: &mut Catalog, sql: &str) -> std::result::Result<(), String> {
    let sql = sql.trim();

    if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
        return create_table(catalog, rest);
    }

    if sql.starts_with("CREATE INDEX") || sql.starts_with("CREATE UNIQUE INDEX") {
        let idents = all_idents(sql);
        let [index, table, ..] = idents.as_slice() else {
            return Err("malformed CREATE INDEX".to_string());
        };
        catalog.table_mut(table)?.indexes.push(index.clone());
        return Ok(());
    }

    if sql.starts_with("DECLARE @constraint_name") {
        let table = between(sql, "OBJECT_ID(N'", "')")
            .and_then(take_ident)
            .map(|(t, _)| t)
            .ok_or("malformed constraint lookup")?;
        let column = between(sql, "c.name = N'", "';")
            .ok_or("malformed constraint lookup")?
            .replace("''", "'");
        if let Ok(t) = catalog.table_mut(&table)
            && let Some(col) = t.column_mut(&column)
        {
            col.default = None;
        }
        return Ok(());
    }

    if let Some(rest) = sql.strip_prefix("DROP TABLE ") {
        let (name, _) = take_ident(rest).ok_or("malformed DROP TABLE")?;
        let key = catalog
            .key(&name)
            .ok_or_else(|| format!("Cannot drop the table '{name}', because it does not exist."))?;
        for other in catalog.tables.values().filter(|t| t.name != key) {
            if let Some(fk) = other
                .foreign_keys
                .iter()
                .find(|fk| fk.references.eq_ignore_ascii_case(&name))
            {
                return Err(format!(
                    "Could not drop object '{name}' because it is referenced by a FOREIGN KEY constraint ({}).",
                    fk.name
                ));
            }
        }
        catalog.tables.shift_remove(&key);
        return Ok(());
    }

    let rest = sql
        .strip_prefix("ALTER TABLE ")
        .ok_or_else(|| format!("unsupported statement: {sql}"))?;
    let (table_name, rest) = take_ident(rest).ok_or("malformed ALTER TABLE")?;
    let rest = rest.trim().trim_end_matches(';');

    if let Some(constraint) = rest.strip_prefix("ADD CONSTRAINT ") {
        let idents = all_idents(constraint);
        let [name, column, references, target_column] = idents.as_slice() else {
            return Err("malformed ADD CONSTRAINT".to_string());
        };
        let target_key = catalog
            .key(references)
            .ok_or_else(|| format!("Foreign key references invalid table '{references}'."))?;
        if !catalog.tables[&target_key]
            .columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(target_column))
        {
            return Err(format!("Foreign key references invalid column '{target_column}'."));
        }
        let table = catalog.table_mut(&table_name)?;
        table
            .column_mut(column)
            .ok_or_else(|| format!("Invalid column name '{column}'."))?
            .foreign_key = true;
        table.foreign_keys.push(FakeForeignKey {
            name: name.clone(),
            column: column.clone(),
            references: references.clone(),
        });
        return Ok(());
    }

    if let Some(def) = rest.strip_prefix("ALTER COLUMN ") {
        let (column, spec) = take_ident(def).ok_or("malformed ALTER COLUMN")?;
        let spec = spec.trim();
        let (ty, null) = spec.split_once(' ').ok_or("malformed ALTER COLUMN")?;
        let sql_type: SqlType = ty.parse().map_err(|e| format!("{e}"))?;
        let col = catalog
            .table_mut(&table_name)?
            .column_mut(&column)
            .ok_or_else(|| format!("Invalid column name '{column}'."))?;
        col.sql_type = sql_type;
        col.nullable = null != "NOT NULL";
        return Ok(());
    }

    if let Some(def) = rest.strip_prefix("DROP COLUMN ") {
        let (column, _) = take_ident(def).ok_or("malformed DROP COLUMN")?;
        let table = catalog.table_mut(&table_name)?;
        let col = table
            .column_mut(&column)
            .ok_or_else(|| format!("Invalid column name '{column}'."))?;
        if col.default.is_some() {
            return Err(format!(
                "The object 'DF_{table_name}_{column}' is dependent on column '{column}'."
            ));
        }
        table.columns.retain(|c| !c.name.eq_ignore_ascii_case(&column));
        return Ok(());
    }

    if let Some(def) = rest.strip_prefix("DROP CONSTRAINT ") {
        let (name, _) = take_ident(def).ok_or("malformed DROP CONSTRAINT")?;
        let table = catalog.table_mut(&table_name)?;
        let before = table.foreign_keys.len();
        table.foreign_keys.retain(|fk| fk.name != name);
        if table.foreign_keys.len() == before {
            return Err(format!("'{name}' is not a constraint."));
        }
        return Ok(());
    }

    if let Some(def) = rest.strip_prefix("ADD ") {
        let column = parse_column(def)?;
        let table = catalog.table_mut(&table_name)?;
        if table.rows > 0 && !column.nullable && column.default.is_none() && !column.identity {
            return Err(format!(
                "ALTER TABLE only allows columns to be added that can contain nulls, or have a DEFAULT definition specified. Column '{}' cannot be added to non-empty table '{table_name}'.",
                column.name
            ));
        }
        if table.column_mut(&column.name).is_some() {
            return Err(format!("Column name '{}' is specified more than once.", column.name));
        }
        table.columns.push(column);
        return Ok(());
    }

    Err(format!("unsupported statement: {sql}"))
}

fn create_table(catalog: &mut Catalog, rest: &str) -> std::result::Result<(), String> {
    let (name, _) = take_ident(rest).ok_or("malformed CREATE TABLE")?;
    if catalog.key(&name).is_some() {
        return Err(format!(
            "There is already an object named '{name}' in the database."
        ));
    }

    let (_, body) = rest.split_once('\n').ok_or("malformed CREATE TABLE")?;
    let mut table = FakeTable {
        name: name.clone(),
        ..Default::default()
    };
    let mut primary_key = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        if line == ");" {
            break;
        }
        let line = line.strip_suffix(',').unwrap_or(line);
        if let Some(constraint) = line.strip_prefix("CONSTRAINT ") {
            let columns = constraint
                .split_once("PRIMARY KEY")
                .map(|(_, cols)| all_idents(cols))
                .ok_or("unsupported table constraint")?;
            primary_key.extend(columns);
        } else {
            table.columns.push(parse_column(line)?);
        }
    }

    for pk in primary_key {
        let col = table
            .column_mut(&pk)
            .ok_or_else(|| format!("Invalid primary key column '{pk}'."))?;
        col.primary_key = true;
        col.nullable = false;
    }

    catalog.tables.insert(name, table);
    Ok(())
}

/// A schema tree in a temporary directory.
pub struct SchemaDir {
    _dir: tempfile::TempDir,
    pub root: Utf8PathBuf,
}

impl SchemaDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self { _dir: dir, root }
    }

    pub fn write(&self, rel: &str, content: &str) -> &Self {
        let path = self.root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
        self
    }

    pub fn schema_settings(&self) -> SchemaSettings {
        SchemaSettings {
            root: self.root.clone(),
            ..Default::default()
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            schema: self.schema_settings(),
            ..Default::default()
        }
    }
}

pub const BASE_PARENT: &str = r#"
parent_tables:
  base:
    _id: { type: INT, primary_key: true, auto_increment: true }
    _created_by: { type: NVARCHAR(100) }
"#;

pub const REGISTRY_TABLE: &str = r#"
tables:
  sys_data_types:
    description: Type registry
    columns:
      id: { type: INT, primary_key: true, auto_increment: true }
      type_name: { type: NVARCHAR(100), nullable: false }
      table_name: { type: NVARCHAR(100), nullable: false }
      supports_mapping: { type: BIT, nullable: false, default: false }
      is_active: { type: BIT, nullable: false, default: true }
      created_at: { type: DATETIME2, nullable: false, default: "GETDATE()" }
"#;

pub const CATALOG_TABLES: &str = r#"
description: Product catalog
tables:
  cat_brands:
    parent: base
    description: "Brands: companies that make products"
    columns:
      name: { type: NVARCHAR(100), nullable: false, unique: true }
  cat_products:
    parent: base
    description: "Products - things we sell"
    columns:
      name: { type: NVARCHAR(200), nullable: false }
      price: { type: "DECIMAL(10,2)", nullable: false, default: 0 }
      brand_id: { type: INT, foreign_key: cat_brands._id }
    indexes:
      - columns: [brand_id]
"#;
