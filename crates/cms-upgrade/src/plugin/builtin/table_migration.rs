//! `table-migration`: run declarative table migrations.
//!
//! ```xml
//! <PluginData>
//!   <Table name="RXCOMMUNITY" orderBy="ID">
//!     <Deduplicate column="NAME"/>
//!   </Table>
//! </PluginData>
//! ```

use async_trait::async_trait;

use crate::config::XmlElement;
use crate::error::Result;
use crate::plugin::{Plugin, PluginContext, PluginResponse, ResponseKind};
use crate::replay::{MigrationOutcome, MigrationReport, TableMigration};

/// Runs one [`TableMigration`] per `<Table>` element.
///
/// Each table commits on its own. A failing table is reported and the
/// remaining tables still run.
#[derive(Debug, Default)]
pub struct TableMigrationPlugin;

#[async_trait]
impl Plugin for TableMigrationPlugin {
    async fn process(
        &self,
        ctx: &mut PluginContext<'_>,
        payload: &XmlElement,
    ) -> Result<Option<PluginResponse>> {
        let tables: Vec<&XmlElement> = payload.children_named("Table").collect();
        if tables.is_empty() {
            return Ok(Some(PluginResponse::warning("no <Table> elements to migrate")));
        }

        let store = ctx.store()?;
        let mut worst = ResponseKind::Success;
        let mut summary = Vec::with_capacity(tables.len());

        for el in tables {
            let label = el.attr("name").unwrap_or("<unnamed>").to_string();
            let result = match TableMigration::from_element(el) {
                Ok(migration) => migration.run(store.as_ref(), ctx.dry_run()).await,
                Err(e) => Err(e),
            };

            let (kind, line) = match result {
                Ok(report) => describe(ctx, &report),
                Err(e) => {
                    ctx.error(format!("{}: {}", label, e.format_detailed()));
                    (ResponseKind::Exception, format!("{}: {}", label, e))
                }
            };
            worst = worst.max(kind);
            summary.push(line);
        }

        Ok(Some(PluginResponse::new(worst, summary.join("; "))))
    }
}

/// Log a table's report and summarise it in one line.
fn describe(ctx: &mut PluginContext<'_>, report: &MigrationReport) -> (ResponseKind, String) {
    for rename in &report.transforms.renames {
        ctx.info(format!(
            "{}.{}: renamed '{}' to '{}'",
            rename.table, rename.column, rename.from, rename.to
        ));
    }
    for note in &report.transforms.notes {
        ctx.info(note);
    }

    match &report.outcome {
        MigrationOutcome::Absent => {
            let line = format!("{}: table does not exist, skipped", report.table);
            ctx.warn(&line);
            (ResponseKind::Warning, line)
        }
        MigrationOutcome::Unchanged => {
            let line = format!("{}: up to date", report.table);
            ctx.info(&line);
            (ResponseKind::Success, line)
        }
        MigrationOutcome::Planned(stats) => {
            let line = format!("{}: {} writes planned (dry run)", report.table, stats.total());
            ctx.info(&line);
            (ResponseKind::Success, line)
        }
        MigrationOutcome::Applied(stats) => {
            let line = format!(
                "{}: {} columns added, {} deleted, {} updated, {} inserted",
                report.table,
                stats.columns_added,
                stats.rows_deleted,
                stats.rows_updated,
                stats.rows_inserted
            );
            ctx.info(&line);
            (ResponseKind::Success, line)
        }
    }
}
