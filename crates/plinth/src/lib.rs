//! Declarative schema management for SQL Server.
//!
//! Tables are described in YAML or JSON documents, optionally sharing
//! columns through parent templates. This crate provides:
//! - Loading and inheritance resolution ([`repository`])
//! - Creation ordering under foreign key dependencies ([`solver`])
//! - Live introspection and column diffs ([`introspect`], [`diff`])
//! - T-SQL DDL generation ([`ddl`])
//! - Migration orchestration ([`migrate`]) and the CLI-facing [`PlinthService`]
//!
//! # Schema layout
//!
//! ```text
//! schemas/
//!   parent/base.yaml         # parent_tables: { base: { _id: {...} } }
//!   catalog/brands.yaml      # tables: { brands: { parent: base, columns: {...} } }
//!   plugins/shop/orders.yaml # plugin tables, prefixed on collision
//!   seeds/users.yaml         # seeds: { users: [ {...} ] }
//! ```
//!
//! # Migrating
//!
//! ```ignore
//! let pool = MssqlPool::new(&url, 4)?;
//! let service = PlinthService::new(pool, Settings::default());
//! match service.migrate(false, false).await? {
//!     MigrateOutcome::Create(report) => println!("created {:?}", report.created),
//!     MigrateOutcome::Update(report) => println!("updated {:?}", report.updated),
//! }
//! ```

pub mod cleanup;
pub mod config;
pub mod ddl;
pub mod diff;
mod error;
pub mod introspect;
pub mod migrate;
pub mod pool;
pub mod registry;
pub mod repository;
pub mod seed;
pub mod service;
pub mod solver;
pub mod sql;
pub mod traced;

pub use config::{DatabaseSettings, RegistrySettings, SchemaSettings, Settings};
pub use diff::TableDiff;
pub use error::{Error, SchemaLoadError};
pub use introspect::LiveTableStructure;
pub use migrate::{CreateReport, DatabaseInfo, UpdateReport};
pub use pool::{ConnectionProvider, MssqlPool};
pub use repository::ResolvedSchema;
pub use service::{MigrateOutcome, PlinthService};
pub use traced::{Connection, TracedConn};

pub use plinth_db_schema as schema;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
