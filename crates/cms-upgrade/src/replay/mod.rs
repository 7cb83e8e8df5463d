//! Replay of transformed snapshots against the live database.
//!
//! [`ReplayPlan::diff`] compares a snapshot with what was captured and
//! [`TableMigration`] drives one table from capture to commit.

mod migration;
mod plan;

pub use migration::{MigrationOutcome, MigrationReport, TableMigration};
pub use plan::{ReplayPlan, ReplayStats, RowDelete, RowUpdate};
