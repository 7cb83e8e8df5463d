//! One table migration: capture, transform, validate, diff, replay.

use serde::Serialize;
use tracing::{debug, info};

use super::plan::{ReplayPlan, ReplayStats};
use crate::config::XmlElement;
use crate::core::identifier::validate_identifier;
use crate::core::snapshot::{SnapshotBuilder, SortKey};
use crate::core::traits::TableStore;
use crate::error::Result;
use crate::transform::{TransformPipeline, TransformReport};

/// What happened to one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// The table does not exist; nothing was done.
    Absent,
    /// The transformed snapshot equals the live table.
    Unchanged,
    /// Dry run: the plan was computed but not applied.
    Planned(ReplayStats),
    /// The plan was committed.
    Applied(ReplayStats),
}

/// Result of running a [`TableMigration`].
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub table: String,
    pub outcome: MigrationOutcome,
    pub transforms: TransformReport,
}

/// Transforms for one table plus the row order they rely on.
#[derive(Debug, Clone)]
pub struct TableMigration {
    pub table: String,
    pub order_by: Vec<SortKey>,
    pub pipeline: TransformPipeline,
}

impl TableMigration {
    pub fn new(table: impl Into<String>, pipeline: TransformPipeline) -> Self {
        Self {
            table: table.into(),
            order_by: Vec::new(),
            pipeline,
        }
    }

    pub fn with_order(mut self, order_by: Vec<SortKey>) -> Self {
        self.order_by = order_by;
        self
    }

    /// Read a `<Table name="..." orderBy="...">` element.
    pub fn from_element(el: &XmlElement) -> Result<Self> {
        let table = el.required_attr("name")?;
        validate_identifier(table)?;
        let order_by = match el.attr("orderBy") {
            Some(keys) => SortKey::parse_list(keys)?,
            None => Vec::new(),
        };
        Ok(Self::new(table, TransformPipeline::from_element(el)?).with_order(order_by))
    }

    /// Run against a store. With `dry_run` the plan is computed and counted
    /// but nothing is written.
    pub async fn run(&self, store: &dyn TableStore, dry_run: bool) -> Result<MigrationReport> {
        let builder = SnapshotBuilder::new(store).order_by(self.order_by.clone());

        let Some(mut snapshot) = builder.capture(&self.table).await? else {
            info!("{}: table does not exist, skipping", self.table);
            return Ok(MigrationReport {
                table: self.table.clone(),
                outcome: MigrationOutcome::Absent,
                transforms: TransformReport::default(),
            });
        };

        let transforms = self.pipeline.apply(&mut snapshot)?;
        let plan = ReplayPlan::diff(&snapshot)?;
        let table = snapshot.table_name();

        let outcome = if plan.is_empty() {
            debug!("{}: already up to date", table);
            MigrationOutcome::Unchanged
        } else if dry_run {
            let stats = ReplayStats::from_plan(&plan);
            info!("{}: dry run, {} writes planned", table, stats.total());
            MigrationOutcome::Planned(stats)
        } else {
            let stats = store.apply_plan(&plan).await?;
            info!(
                "{}: {} columns added, {} deleted, {} updated, {} inserted",
                table,
                stats.columns_added,
                stats.rows_deleted,
                stats.rows_updated,
                stats.rows_inserted
            );
            MigrationOutcome::Applied(stats)
        };

        Ok(MigrationReport {
            table,
            outcome,
            transforms,
        })
    }
}
