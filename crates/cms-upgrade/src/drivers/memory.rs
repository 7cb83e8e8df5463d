//! In-memory table store.
//!
//! Holds tables as plain rows behind a mutex. A replay plan is applied to a
//! copy of the table and swapped in only when every statement succeeds, so a
//! failed plan leaves the table untouched.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::core::schema::TableSchema;
use crate::core::snapshot::SortKey;
use crate::core::traits::{RowKey, TableStore};
use crate::core::value::SqlValue;
use crate::core::version::DatabaseVersion;
use crate::error::{Result, UpgradeError};
use crate::replay::{ReplayPlan, ReplayStats};

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Vec<SqlValue>>,
}

/// Table store backed by process memory.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, MemoryTable>>,
    schema: String,
    version: DatabaseVersion,
    failing: HashSet<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            schema: "public".to_string(),
            version: DatabaseVersion {
                raw: "1.0".to_string(),
                parts: vec![1, 0],
            },
            failing: HashSet::new(),
        }
    }

    /// Add a table with its rows.
    pub fn with_table(self, schema: TableSchema, rows: Vec<Vec<SqlValue>>) -> Self {
        self.lock().insert(
            table_key(&schema.schema, &schema.name),
            MemoryTable { schema, rows },
        );
        self
    }

    /// Version reported by [`TableStore::server_version`].
    pub fn with_version(mut self, version: DatabaseVersion) -> Self {
        self.version = version;
        self
    }

    /// Make every replay against `table` fail before anything is written.
    pub fn fail_table(mut self, table: &str) -> Self {
        let key = self.qualified_key(table);
        self.failing.insert(key);
        self
    }

    /// Current schema of a table, if it exists.
    pub fn table(&self, table: &str) -> Option<TableSchema> {
        self.lock()
            .get(&self.qualified_key(table))
            .map(|t| t.schema.clone())
    }

    /// Current rows of a table in insertion order.
    pub fn rows(&self, table: &str) -> Option<Vec<Vec<SqlValue>>> {
        self.lock()
            .get(&self.qualified_key(table))
            .map(|t| t.rows.clone())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, MemoryTable>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn qualified_key(&self, table: &str) -> String {
        match table.split_once('.') {
            Some((schema, name)) => table_key(schema, name),
            None => table_key(&self.schema, table),
        }
    }
}

fn table_key(schema: &str, name: &str) -> String {
    format!("{}.{}", schema, name).to_lowercase()
}

#[async_trait]
impl TableStore for MemoryStore {
    fn db_type(&self) -> &str {
        "memory"
    }

    fn default_schema(&self) -> &str {
        &self.schema
    }

    async fn describe_table(&self, schema: &str, table: &str) -> Result<Option<TableSchema>> {
        Ok(self
            .lock()
            .get(&table_key(schema, table))
            .map(|t| t.schema.clone()))
    }

    async fn fetch_rows(
        &self,
        table: &TableSchema,
        order_by: &[SortKey],
    ) -> Result<Vec<Vec<SqlValue>>> {
        let tables = self.lock();
        let stored = tables
            .get(&table_key(&table.schema, &table.name))
            .ok_or_else(|| {
                UpgradeError::snapshot(table.full_name(), "table disappeared during capture")
            })?;

        let mut keys = Vec::with_capacity(order_by.len());
        for key in order_by {
            let idx = stored.schema.column_index(&key.column).ok_or_else(|| {
                UpgradeError::snapshot(
                    table.full_name(),
                    format!("sort column {} not found", key.column),
                )
            })?;
            keys.push((idx, key.descending));
        }

        let mut rows = stored.rows.clone();
        rows.sort_by(|a, b| {
            for &(idx, descending) in &keys {
                let ord = compare_values(&a[idx], &b[idx]);
                let ord = if descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(rows)
    }

    async fn apply_plan(&self, plan: &ReplayPlan) -> Result<ReplayStats> {
        let name = plan.table.full_name();
        let key = table_key(&plan.table.schema, &plan.table.name);
        if self.failing.contains(&key) {
            return Err(UpgradeError::replay(&name, "table is marked as failing"));
        }

        let mut tables = self.lock();
        let current = tables
            .get(&key)
            .ok_or_else(|| UpgradeError::replay(&name, "table does not exist"))?;

        let mut next = current.clone();
        apply_to(&mut next, plan)?;
        debug!("{}: memory replay committed ({} rows)", name, next.rows.len());
        tables.insert(key, next);

        Ok(ReplayStats::from_plan(plan))
    }

    async fn server_version(&self) -> Result<DatabaseVersion> {
        Ok(self.version.clone())
    }

    async fn close(&self) {}
}

/// Apply every step of a plan to `table`, failing on the first violation.
fn apply_to(table: &mut MemoryTable, plan: &ReplayPlan) -> Result<()> {
    let name = plan.table.full_name();

    for column in &plan.added_columns {
        if table.schema.has_column(&column.name) {
            return Err(UpgradeError::replay(
                &name,
                format!("column {} already exists", column.name),
            ));
        }
        let mut nullable = column.clone();
        nullable.is_nullable = true;
        nullable.ordinal_pos = table.schema.columns.len() as i32 + 1;
        let null = SqlValue::Null(nullable.value_type());
        table.schema.columns.push(nullable);
        for row in &mut table.rows {
            row.push(null.clone());
        }
    }

    // Plan positions refer to the plan's column list; map them by name.
    let mut positions = Vec::with_capacity(plan.table.columns.len());
    for column in &plan.table.columns {
        let idx = table.schema.column_index(&column.name).ok_or_else(|| {
            UpgradeError::replay(&name, format!("column {} not found", column.name))
        })?;
        positions.push(idx);
    }
    let map_key = |key: &RowKey| -> RowKey {
        key.iter()
            .map(|(i, v)| (positions[*i], v.clone()))
            .collect()
    };

    // Statements run one at a time against the current rows with the
    // same row-count and constraint checks a database transaction applies.
    for delete in &plan.deletes {
        let key = map_key(&delete.key);
        let before = table.rows.len();
        table.rows.retain(|row| !matches_key(row, &key));
        expect_affected(&name, "delete", before - table.rows.len(), delete.rows)?;
    }

    for update in &plan.updates {
        let key = map_key(&update.key);
        let rows: Vec<usize> = (0..table.rows.len())
            .filter(|&r| matches_key(&table.rows[r], &key))
            .collect();
        expect_affected(&name, "update", rows.len(), 1)?;
        for r in rows {
            for (i, value) in &update.changes {
                table.rows[r][positions[*i]] = value.clone();
            }
        }
        check_constraints(table, &name)?;
    }

    for values in &plan.inserts {
        if values.len() != positions.len() {
            return Err(UpgradeError::replay(
                &name,
                format!(
                    "insert has {} values for {} columns",
                    values.len(),
                    positions.len()
                ),
            ));
        }
        let mut row: Vec<SqlValue> = table
            .schema
            .columns
            .iter()
            .map(|c| SqlValue::Null(c.value_type()))
            .collect();
        for (i, value) in values.iter().enumerate() {
            row[positions[i]] = value.clone();
        }
        table.rows.push(row);
        check_constraints(table, &name)?;
    }

    for column in plan.added_columns.iter().filter(|c| !c.is_nullable) {
        if let Some(idx) = table.schema.column_index(&column.name) {
            table.schema.columns[idx].is_nullable = false;
        }
    }

    check_constraints(table, &name)
}

fn expect_affected(name: &str, what: &str, affected: usize, expected: usize) -> Result<()> {
    if affected != expected {
        return Err(UpgradeError::replay(
            name,
            format!("{} affected {} rows, expected {}", what, affected, expected),
        ));
    }
    Ok(())
}

fn check_constraints(table: &MemoryTable, name: &str) -> Result<()> {
    for (idx, column) in table.schema.columns.iter().enumerate() {
        if !column.is_nullable && table.rows.iter().any(|r| r[idx].is_null()) {
            return Err(UpgradeError::replay(
                name,
                format!("column {} contains NULL", column.name),
            ));
        }
    }

    let pk = table.schema.primary_key_indexes();
    if !pk.is_empty() {
        let mut seen = HashSet::new();
        for row in &table.rows {
            let key: Vec<String> = pk
                .iter()
                .map(|&i| row[i].to_text().unwrap_or_default())
                .collect();
            if !seen.insert(key) {
                return Err(UpgradeError::replay(name, "duplicate primary key"));
            }
        }
    }

    Ok(())
}

/// SQL `=` for non-NULL key values, `IS NULL` for NULL ones.
fn matches_key(row: &[SqlValue], key: &RowKey) -> bool {
    key.iter().all(|(i, expected)| match row.get(*i) {
        Some(actual) if expected.is_null() => actual.is_null(),
        Some(actual) => compare_values(actual, expected) == Ordering::Equal && !actual.is_null(),
        None => false,
    })
}

/// Total order over values: numbers numerically, text bytewise, NULLs last.
fn compare_values(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a, b) {
        (SqlValue::Null(_), SqlValue::Null(_)) => Ordering::Equal,
        (SqlValue::Null(_), _) => Ordering::Greater,
        (_, SqlValue::Null(_)) => Ordering::Less,
        (SqlValue::Text(x), SqlValue::Text(y)) => x.cmp(y),
        (SqlValue::Bool(x), SqlValue::Bool(y)) => x.cmp(y),
        (SqlValue::F64(x), SqlValue::F64(y)) => x.total_cmp(y),
        (SqlValue::Decimal(x), SqlValue::Decimal(y)) => x.cmp(y),
        (SqlValue::DateTime(x), SqlValue::DateTime(y)) => x.cmp(y),
        (SqlValue::Date(x), SqlValue::Date(y)) => x.cmp(y),
        (SqlValue::Uuid(x), SqlValue::Uuid(y)) => x.cmp(y),
        (SqlValue::Bytes(x), SqlValue::Bytes(y)) => x.cmp(y),
        _ => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a.to_text().cmp(&b.to_text()),
        },
    }
}
