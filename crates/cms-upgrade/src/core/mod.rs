//! Core abstractions shared by stores, transforms and plugins.
//!
//! - [`schema`]: table and column metadata
//! - [`value`]: owned SQL values
//! - [`snapshot`]: table snapshots and the builder that captures them
//! - [`traits`]: the [`TableStore`] and [`Dialect`] seams
//! - [`identifier`]: identifier validation and quoting
//! - [`version`]: server version comparison

pub mod identifier;
pub mod schema;
pub mod snapshot;
pub mod traits;
pub mod value;
pub mod version;

pub use schema::{ColumnDef, TableSchema};
pub use snapshot::{SnapshotBuilder, SnapshotRow, SortKey, TableSnapshot};
pub use traits::{Dialect, RowKey, Statement, TableStore};
pub use value::{SqlNullType, SqlValue};
pub use version::DatabaseVersion;
