//! # cms-upgrade
//!
//! Install and upgrade plugins for a content management system.
//!
//! This library provides:
//!
//! - **Plugin dispatch**: modules of plugins resolved by identifier from an
//!   XML plugin document, with every failure turned into a reported response
//! - **Table snapshots**: a table's schema and rows captured in a fixed order
//! - **Declarative transforms**: add columns, rename or deduplicate values,
//!   resequence keys, ensure rows exist
//! - **Replay**: the diff between a transformed snapshot and the live table,
//!   applied in one transaction per table
//! - **Stores** for PostgreSQL, SQL Server and an in-memory database
//!
//! ## Example
//!
//! ```rust,no_run
//! use cms_upgrade::{Config, Dispatcher, PluginRegistry};
//!
//! #[tokio::main]
//! async fn main() -> cms_upgrade::Result<()> {
//!     let config = Config::load("upgrade.yaml")?;
//!     let document = config.load_plugins()?;
//!     let dispatcher = Dispatcher::from_config(&config, PluginRegistry::with_builtins()).await?;
//!     let report = dispatcher.run(&document, &config.upgrade.modules).await?;
//!     if report.has_exception() {
//!         eprintln!("upgrade reported errors");
//!     }
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod plugin;
pub mod replay;
pub mod transform;

// Re-exports for convenient access
pub use config::{Config, ModuleDef, PluginDescriptor, PluginDocument, RepositoryConfig, XmlElement};
pub use core::{SnapshotBuilder, SortKey, SqlValue, TableSchema, TableSnapshot, TableStore};
pub use drivers::MemoryStore;
pub use error::{Result, UpgradeError};
pub use orchestrator::{Dispatcher, ModuleReport, PluginReport, RunReport};
pub use plugin::{ModuleLog, Plugin, PluginContext, PluginRegistry, PluginResponse, ResponseKind};
pub use replay::{MigrationOutcome, ReplayPlan, TableMigration};
pub use transform::{Transform, TransformPipeline};
