//! Diff of a transformed snapshot against its captured baseline.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::core::schema::{ColumnDef, TableSchema};
use crate::core::snapshot::TableSnapshot;
use crate::core::traits::{Dialect, RowKey, Statement};
use crate::core::value::SqlValue;
use crate::error::{Result, UpgradeError};

/// Changed cells of one captured row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    /// Captured key of the row.
    pub key: RowKey,

    /// Column position and new value.
    pub changes: Vec<(usize, SqlValue)>,
}

/// Rows matching one captured key, removed by a single DELETE.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDelete {
    pub key: RowKey,

    /// Number of live rows the key must match.
    pub rows: usize,
}

impl RowDelete {
    fn single(key: RowKey) -> Self {
        Self { key, rows: 1 }
    }
}

/// The writes that converge a live table to a transformed snapshot.
///
/// Statement order is fixed: add columns (nullable), deletes, updates,
/// inserts, then `SET NOT NULL` for added non-nullable columns. Updates
/// that rewrite a primary key are ordered so no intermediate state holds
/// a duplicate key.
#[derive(Debug, Clone)]
pub struct ReplayPlan {
    /// Schema after transforms, including added columns.
    pub table: TableSchema,
    pub added_columns: Vec<ColumnDef>,
    pub deletes: Vec<RowDelete>,
    pub updates: Vec<RowUpdate>,
    pub inserts: Vec<Vec<SqlValue>>,
}

/// Counts of what a replay wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub columns_added: usize,
    pub rows_deleted: usize,
    pub rows_updated: usize,
    pub rows_inserted: usize,
}

impl ReplayStats {
    /// Counts a plan is expected to produce.
    pub fn from_plan(plan: &ReplayPlan) -> Self {
        Self {
            columns_added: plan.added_columns.len(),
            rows_deleted: plan.deletes.iter().map(|d| d.rows).sum(),
            rows_updated: plan.updates.len(),
            rows_inserted: plan.inserts.len(),
        }
    }

    pub fn total(&self) -> usize {
        self.columns_added + self.rows_deleted + self.rows_updated + self.rows_inserted
    }
}

/// Hashable identity of a list of values. Decimals compare by value, not scale.
fn identity<'a>(values: impl IntoIterator<Item = &'a SqlValue>) -> Vec<Option<String>> {
    values
        .into_iter()
        .map(|v| match v {
            SqlValue::Decimal(d) => Some(d.normalize().to_string()),
            other => other.to_text(),
        })
        .collect()
}

fn describe_key(key: &RowKey) -> String {
    let parts: Vec<String> = key
        .iter()
        .map(|(_, v)| v.to_text().unwrap_or_else(|| "NULL".to_string()))
        .collect();
    format!("({})", parts.join(", "))
}

/// Cells of `values` that differ from the captured row. Cells past the
/// captured width belong to added columns, which start out NULL.
fn changed_cells(values: &[SqlValue], origin: &[SqlValue]) -> Vec<(usize, SqlValue)> {
    values
        .iter()
        .enumerate()
        .filter(|(i, v)| match origin.get(*i) {
            Some(captured) => captured != *v,
            None => !v.is_null(),
        })
        .map(|(i, v)| (i, v.clone()))
        .collect()
}

impl ReplayPlan {
    /// Diff a snapshot against its baseline.
    ///
    /// Rows of a table with a primary key are identified by it. A table
    /// without one has no reliable row identity, so every group of rows
    /// sharing the same captured values is replaced as a whole: one DELETE
    /// that must match the whole group, then an INSERT per surviving row.
    pub fn diff(snapshot: &TableSnapshot) -> Result<Self> {
        let (deletes, updates, inserts) = if snapshot.schema().has_primary_key() {
            Self::diff_keyed(snapshot)?
        } else {
            let (deletes, inserts) = Self::diff_keyless(snapshot);
            (deletes, Vec::new(), inserts)
        };

        Ok(Self {
            table: snapshot.schema().clone(),
            added_columns: snapshot.added_columns().to_vec(),
            deletes,
            updates,
            inserts,
        })
    }

    fn diff_keyed(
        snapshot: &TableSnapshot,
    ) -> Result<(Vec<RowDelete>, Vec<RowUpdate>, Vec<Vec<SqlValue>>)> {
        let pk = snapshot.schema().primary_key_indexes();
        let key_of = |origin: &[SqlValue]| -> RowKey {
            pk.iter().map(|&i| (i, origin[i].clone())).collect()
        };

        let deletes = snapshot
            .removed()
            .iter()
            .map(|o| RowDelete::single(key_of(o.as_slice())))
            .collect();

        let mut updates = Vec::new();
        let mut inserts = Vec::new();
        let mut live_keys = HashSet::new();
        for row in snapshot.rows() {
            match &row.origin {
                None => inserts.push(row.values.clone()),
                Some(origin) => {
                    live_keys.insert(identity(pk.iter().map(|&i| &origin[i])));
                    let changes = changed_cells(&row.values, origin);
                    if !changes.is_empty() {
                        updates.push(RowUpdate {
                            key: key_of(origin.as_slice()),
                            changes,
                        });
                    }
                }
            }
        }

        let updates = order_key_rewrites(&snapshot.table_name(), live_keys, updates)?;
        Ok((deletes, updates, inserts))
    }

    fn diff_keyless(snapshot: &TableSnapshot) -> (Vec<RowDelete>, Vec<Vec<SqlValue>>) {
        let width = snapshot.baseline_columns().len();

        struct Group {
            key: RowKey,
            captured: usize,
            changed: bool,
        }
        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<Vec<Option<String>>, usize> = HashMap::new();
        let mut group_of = |origin: &[SqlValue]| -> usize {
            *index.entry(identity(&origin[..width])).or_insert_with(|| {
                groups.push(Group {
                    key: origin[..width].iter().cloned().enumerate().collect(),
                    captured: 0,
                    changed: false,
                });
                groups.len() - 1
            })
        };

        let mut membership = Vec::with_capacity(snapshot.len());
        for origin in snapshot.removed() {
            let g = group_of(origin.as_slice());
            membership.push((g, true));
        }
        for row in snapshot.rows() {
            if let Some(origin) = &row.origin {
                let g = group_of(origin.as_slice());
                membership.push((g, !changed_cells(&row.values, origin).is_empty()));
            }
        }
        for (g, changed) in membership {
            groups[g].captured += 1;
            groups[g].changed |= changed;
        }

        let mut inserts = Vec::new();
        for row in snapshot.rows() {
            let replaced = match &row.origin {
                None => true,
                Some(origin) => {
                    let g = index[&identity(&origin[..width])];
                    groups[g].changed
                }
            };
            if replaced {
                inserts.push(row.values.clone());
            }
        }

        let deletes = groups
            .into_iter()
            .filter(|g| g.changed)
            .map(|g| RowDelete {
                key: g.key,
                rows: g.captured,
            })
            .collect();
        (deletes, inserts)
    }

    pub fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.deletes.is_empty()
            && self.updates.is_empty()
            && self.inserts.is_empty()
    }

    /// Render the plan as statements for one dialect.
    ///
    /// Every DML statement carries the number of rows it must affect.
    pub fn to_statements(&self, dialect: &dyn Dialect) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();

        for column in &self.added_columns {
            statements.push(Statement::new(dialect.build_add_column(&self.table, column)?));
        }
        for delete in &self.deletes {
            statements.push(
                dialect
                    .build_delete(&self.table, &delete.key)?
                    .expecting(delete.rows as u64),
            );
        }
        for update in &self.updates {
            statements.push(dialect.build_update(&self.table, &update.key, &update.changes)?);
        }
        for row in &self.inserts {
            statements.push(dialect.build_insert(&self.table, row)?);
        }
        for column in self.added_columns.iter().filter(|c| !c.is_nullable) {
            statements.push(Statement::new(
                dialect.build_set_not_null(&self.table, column)?,
            ));
        }

        Ok(statements)
    }
}

/// Order updates so that a primary key is only rewritten to a value no
/// other live row holds at that point.
///
/// Updates that keep their key run first. A cycle of rewrites (two rows
/// swapping keys) cannot be ordered and is rejected.
fn order_key_rewrites(
    table: &str,
    mut occupied: HashSet<Vec<Option<String>>>,
    updates: Vec<RowUpdate>,
) -> Result<Vec<RowUpdate>> {
    let mut ordered = Vec::with_capacity(updates.len());
    let mut pending = Vec::new();

    for update in updates {
        let new_key: RowKey = update
            .key
            .iter()
            .map(|(i, old)| {
                let value = update
                    .changes
                    .iter()
                    .find(|(c, _)| c == i)
                    .map_or(old, |(_, v)| v);
                (*i, value.clone())
            })
            .collect();
        if new_key == update.key {
            ordered.push(update);
        } else {
            pending.push((new_key, update));
        }
    }

    while !pending.is_empty() {
        let free = pending
            .iter()
            .position(|(new_key, _)| {
                !occupied.contains(&identity(new_key.iter().map(|(_, v)| v)))
            });
        let Some(pos) = free else {
            let (new_key, update) = &pending[0];
            return Err(UpgradeError::replay(
                table,
                format!(
                    "primary key rewrite collides: row {} cannot move to {} while another row holds it",
                    describe_key(&update.key),
                    describe_key(new_key)
                ),
            ));
        };

        let (new_key, update) = pending.remove(pos);
        occupied.remove(&identity(update.key.iter().map(|(_, v)| v)));
        occupied.insert(identity(new_key.iter().map(|(_, v)| v)));
        ordered.push(update);
    }

    Ok(ordered)
}
