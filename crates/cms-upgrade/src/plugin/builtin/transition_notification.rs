//! `ensure-transition-notification`: give workflow transitions a default
//! notification.
//!
//! ```xml
//! <PluginData>
//!   <State workflow="5" id="2"/>
//!   <Notification id="1" recipients="1"/>
//! </PluginData>
//! ```
//!
//! Every transition leaving a listed state (all transitions when no state is
//! listed) gets a notification row unless it already has one. Table and
//! column names default to the CMS workflow schema and can be overridden
//! with `<Transitions>` and `<Notifications>` elements.

use async_trait::async_trait;

use crate::config::XmlElement;
use crate::core::identifier::validate_identifier;
use crate::core::snapshot::SnapshotBuilder;
use crate::core::value::SqlValue;
use crate::error::Result;
use crate::plugin::{Plugin, PluginContext, PluginResponse};
use crate::replay::{MigrationOutcome, TableMigration};
use crate::transform::{CellValue, Transform, TransformPipeline};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TransitionTable {
    table: String,
    workflow: String,
    id: String,
    from_state: String,
}

impl TransitionTable {
    fn from_payload(payload: &XmlElement) -> Result<Self> {
        let el = payload.child("Transitions");
        let get = |attr: &str, default: &str| -> Result<String> {
            let value = el.and_then(|e| e.attr(attr)).unwrap_or(default).to_string();
            validate_identifier(&value)?;
            Ok(value)
        };
        Ok(Self {
            table: get("table", "TRANSITIONS")?,
            workflow: get("workflow", "WORKFLOWAPPID")?,
            id: get("id", "TRANSITIONID")?,
            from_state: get("fromState", "TRANSITIONFROMSTATEID")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NotificationTable {
    table: String,
    workflow: String,
    transition: String,
    notification: String,
    recipients: String,
}

impl NotificationTable {
    fn from_payload(payload: &XmlElement) -> Result<Self> {
        let el = payload.child("Notifications");
        let get = |attr: &str, default: &str| -> Result<String> {
            let value = el.and_then(|e| e.attr(attr)).unwrap_or(default).to_string();
            validate_identifier(&value)?;
            Ok(value)
        };
        Ok(Self {
            table: get("table", "TRANSITIONNOTIFICATIONS")?,
            workflow: get("workflow", "WORKFLOWAPPID")?,
            transition: get("transition", "TRANSITIONID")?,
            notification: get("notification", "NOTIFICATIONID")?,
            recipients: get("recipients", "STATEROLERECIPIENTTYPES")?,
        })
    }
}

/// Ensures a default notification exists for every selected transition.
#[derive(Debug, Default)]
pub struct EnsureTransitionNotification;

#[async_trait]
impl Plugin for EnsureTransitionNotification {
    async fn process(
        &self,
        ctx: &mut PluginContext<'_>,
        payload: &XmlElement,
    ) -> Result<Option<PluginResponse>> {
        let transitions = TransitionTable::from_payload(payload)?;
        let notifications = NotificationTable::from_payload(payload)?;
        let states: Vec<(String, String)> = payload
            .children_named("State")
            .map(|s| {
                Ok((
                    s.required_attr("workflow")?.to_string(),
                    s.required_attr("id")?.to_string(),
                ))
            })
            .collect::<Result<_>>()?;
        let default = payload.child("Notification");
        let notification_id = default.and_then(|d| d.attr("id")).unwrap_or("1").to_string();
        let recipients = default
            .and_then(|d| d.attr("recipients"))
            .unwrap_or("1")
            .to_string();

        let store = ctx.store()?;
        let Some(snapshot) = SnapshotBuilder::new(store.as_ref())
            .capture(&transitions.table)
            .await?
        else {
            return Ok(Some(PluginResponse::warning(format!(
                "{} does not exist; no notifications added",
                transitions.table
            ))));
        };

        let wf_idx = snapshot.require_column(&transitions.workflow)?;
        let id_idx = snapshot.require_column(&transitions.id)?;
        let from_idx = snapshot.require_column(&transitions.from_state)?;

        let text = |v: &SqlValue| v.to_text().unwrap_or_default();
        let selected: Vec<(String, String)> = snapshot
            .rows()
            .iter()
            .filter(|row| {
                states.is_empty()
                    || states.iter().any(|(wf, state)| {
                        text(&row.values[wf_idx]) == *wf && text(&row.values[from_idx]) == *state
                    })
            })
            .map(|row| (text(&row.values[wf_idx]), text(&row.values[id_idx])))
            .collect();

        if selected.is_empty() {
            return Ok(Some(PluginResponse::success("no transitions leave the selected states")));
        }

        let transforms = selected
            .iter()
            .map(|(wf, id)| Transform::EnsureRow {
                matching: vec![
                    (notifications.workflow.clone(), wf.clone()),
                    (notifications.transition.clone(), id.clone()),
                ],
                values: vec![
                    (
                        notifications.notification.clone(),
                        CellValue::Value(notification_id.clone()),
                    ),
                    (
                        notifications.recipients.clone(),
                        CellValue::Value(recipients.clone()),
                    ),
                ],
            })
            .collect();
        let migration = TableMigration::new(&notifications.table, TransformPipeline::new(transforms));

        let report = migration.run(store.as_ref(), ctx.dry_run()).await?;
        for note in &report.transforms.notes {
            ctx.info(note);
        }

        let response = match report.outcome {
            MigrationOutcome::Absent => PluginResponse::warning(format!(
                "{} does not exist; no notifications added",
                notifications.table
            )),
            MigrationOutcome::Unchanged => PluginResponse::success(format!(
                "all {} transitions already have notifications",
                selected.len()
            )),
            MigrationOutcome::Planned(stats) => PluginResponse::success(format!(
                "{} notifications would be added (dry run)",
                stats.rows_inserted
            )),
            MigrationOutcome::Applied(stats) => PluginResponse::success(format!(
                "added {} notifications",
                stats.rows_inserted
            )),
        };
        if response.is_issue() {
            ctx.warn(&response.message);
        } else {
            ctx.info(&response.message);
        }
        Ok(Some(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnDef, TableSchema};
    use crate::core::traits::TableStore;
    use crate::drivers::MemoryStore;
    use crate::plugin::{ModuleLog, ResponseKind};
    use std::path::Path;
    use std::sync::Arc;

    fn store() -> Arc<MemoryStore> {
        let transitions = TableSchema::new("public", "TRANSITIONS")
            .with_column(ColumnDef::new("WORKFLOWAPPID", "int4").primary_key())
            .with_column(ColumnDef::new("TRANSITIONID", "int4").primary_key())
            .with_column(ColumnDef::new("TRANSITIONFROMSTATEID", "int4"));
        let notifications = TableSchema::new("public", "TRANSITIONNOTIFICATIONS")
            .with_column(ColumnDef::new("WORKFLOWAPPID", "int4").primary_key())
            .with_column(ColumnDef::new("TRANSITIONID", "int4").primary_key())
            .with_column(ColumnDef::new("NOTIFICATIONID", "int4").not_null())
            .with_column(ColumnDef::new("STATEROLERECIPIENTTYPES", "int4"));
        let t = |wf: i32, id: i32, from: i32| vec![SqlValue::I32(wf), SqlValue::I32(id), SqlValue::I32(from)];
        Arc::new(
            MemoryStore::new()
                .with_table(transitions, vec![t(5, 1, 2), t(5, 2, 2), t(5, 3, 4)])
                .with_table(
                    notifications,
                    vec![vec![
                        SqlValue::I32(5),
                        SqlValue::I32(1),
                        SqlValue::I32(9),
                        SqlValue::I32(3),
                    ]],
                ),
        )
    }

    async fn run(store: Arc<MemoryStore>) -> PluginResponse {
        let payload = XmlElement::parse(
            r#"<PluginData><State workflow="5" id="2"/><Notification id="1" recipients="1"/></PluginData>"#,
        )
        .unwrap();
        let shared: Arc<dyn TableStore> = store;
        let mut log = ModuleLog::memory("post");
        let mut ctx = PluginContext::new("post", "notify", &mut log, Some(shared), Path::new("."), false);
        EnsureTransitionNotification
            .process(&mut ctx, &payload)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_adds_missing_notifications_once() {
        let store = store();
        let first = run(store.clone()).await;
        assert_eq!(first.kind, ResponseKind::Success);
        assert_eq!(first.message, "added 1 notifications");

        let rows = store.rows("TRANSITIONNOTIFICATIONS").unwrap();
        assert_eq!(rows.len(), 2);
        // The existing notification of transition 1 is left alone.
        assert!(rows.contains(&vec![
            SqlValue::I32(5),
            SqlValue::I32(1),
            SqlValue::I32(9),
            SqlValue::I32(3)
        ]));
        assert!(rows.contains(&vec![
            SqlValue::I32(5),
            SqlValue::I32(2),
            SqlValue::I32(1),
            SqlValue::I32(1)
        ]));

        let second = run(store.clone()).await;
        assert!(second.message.starts_with("all 2 transitions"));
        assert_eq!(store.rows("TRANSITIONNOTIFICATIONS").unwrap(), rows);
    }

    #[tokio::test]
    async fn test_missing_transitions_table_warns() {
        let store = Arc::new(MemoryStore::new());
        let response = run(store).await;
        assert_eq!(response.kind, ResponseKind::Warning);
    }
}
