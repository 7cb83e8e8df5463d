//! In-memory capture of one table's schema and rows.
//!
//! A [`TableSnapshot`] remembers what was read (the baseline) so the replay
//! step can diff the transformed rows against it. Columns are only ever
//! appended, which keeps baseline column positions stable.

use std::fmt;

use serde_json::json;
use tracing::debug;

use super::identifier::split_qualified;
use super::schema::{ColumnDef, TableSchema};
use super::traits::TableStore;
use super::value::SqlValue;
use crate::error::{Result, UpgradeError};

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }

    /// Parse a comma separated list such as `"STATE_ID, ORDINAL DESC"`.
    pub fn parse_list(text: &str) -> Result<Vec<SortKey>> {
        text.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|term| {
                let mut words = term.split_whitespace();
                let column = words.next().unwrap_or_default();
                let descending = match words.next().map(|w| w.to_ascii_uppercase()) {
                    None => false,
                    Some(w) if w == "ASC" => false,
                    Some(w) if w == "DESC" => true,
                    Some(w) => {
                        return Err(UpgradeError::Config(format!(
                            "invalid sort direction '{}' in '{}'",
                            w, term
                        )))
                    }
                };
                if words.next().is_some() {
                    return Err(UpgradeError::Config(format!("invalid sort key '{}'", term)));
                }
                Ok(SortKey {
                    column: column.to_string(),
                    descending,
                })
            })
            .collect()
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} DESC", self.column)
        } else {
            write!(f, "{}", self.column)
        }
    }
}

/// A row of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    /// Current values, one per snapshot column.
    pub values: Vec<SqlValue>,

    /// Values as captured from the store; `None` for rows added by transforms.
    pub origin: Option<Vec<SqlValue>>,
}

/// Schema and rows of one table.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    schema: TableSchema,
    baseline_columns: usize,
    rows: Vec<SnapshotRow>,
    removed: Vec<Vec<SqlValue>>,
    order_by: Vec<SortKey>,
}

impl TableSnapshot {
    /// Build a snapshot from captured rows. Every row must have one value per column.
    pub fn new(
        schema: TableSchema,
        rows: Vec<Vec<SqlValue>>,
        order_by: Vec<SortKey>,
    ) -> Result<Self> {
        let width = schema.columns.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(UpgradeError::snapshot(
                schema.full_name(),
                format!(
                    "row {} has {} values, table has {} columns",
                    bad,
                    rows[bad].len(),
                    width
                ),
            ));
        }

        Ok(Self {
            baseline_columns: width,
            rows: rows
                .into_iter()
                .map(|values| SnapshotRow {
                    origin: Some(values.clone()),
                    values,
                })
                .collect(),
            removed: Vec::new(),
            order_by,
            schema,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn table_name(&self) -> String {
        self.schema.full_name()
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.schema.columns
    }

    /// Columns that were present when the snapshot was captured.
    pub fn baseline_columns(&self) -> &[ColumnDef] {
        &self.schema.columns[..self.baseline_columns]
    }

    /// Columns appended by transforms.
    pub fn added_columns(&self) -> &[ColumnDef] {
        &self.schema.columns[self.baseline_columns..]
    }

    pub fn rows(&self) -> &[SnapshotRow] {
        &self.rows
    }

    /// Captured values of rows removed by transforms.
    pub fn removed(&self) -> &[Vec<SqlValue>] {
        &self.removed
    }

    pub fn order_by(&self) -> &[SortKey] {
        &self.order_by
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.column_index(name)
    }

    /// Position of a column, or a transform error naming the table.
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            UpgradeError::transform(self.table_name(), format!("column {} not found", name))
        })
    }

    pub fn value(&self, row: usize, column: usize) -> &SqlValue {
        &self.rows[row].values[column]
    }

    /// Overwrite one cell. Returns whether the value changed.
    pub fn set_value(&mut self, row: usize, column: usize, value: SqlValue) -> bool {
        let cell = &mut self.rows[row].values[column];
        if *cell == value {
            return false;
        }
        *cell = value;
        true
    }

    /// Append a column filled with one value per existing row.
    pub fn add_column(&mut self, mut column: ColumnDef, values: Vec<SqlValue>) -> Result<()> {
        if self.schema.has_column(&column.name) {
            return Err(UpgradeError::transform(
                self.table_name(),
                format!("column {} already exists", column.name),
            ));
        }
        if values.len() != self.rows.len() {
            return Err(UpgradeError::transform(
                self.table_name(),
                format!(
                    "column {} needs {} values, got {}",
                    column.name,
                    self.rows.len(),
                    values.len()
                ),
            ));
        }

        column.ordinal_pos = self.schema.columns.len() as i32 + 1;
        debug!("{}: adding column {}", self.table_name(), column.name);
        self.schema.columns.push(column);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.values.push(value);
        }
        Ok(())
    }

    /// Append a new row.
    pub fn push_row(&mut self, values: Vec<SqlValue>) -> Result<()> {
        if values.len() != self.schema.columns.len() {
            return Err(UpgradeError::transform(
                self.table_name(),
                format!(
                    "new row has {} values, table has {} columns",
                    values.len(),
                    self.schema.columns.len()
                ),
            ));
        }
        self.rows.push(SnapshotRow {
            values,
            origin: None,
        });
        Ok(())
    }

    /// Drop rows for which `remove` returns true. Returns how many were dropped.
    pub fn remove_rows<F>(&mut self, mut remove: F) -> usize
    where
        F: FnMut(&SnapshotRow) -> bool,
    {
        let before = self.rows.len();
        let mut kept = Vec::with_capacity(before);
        for row in std::mem::take(&mut self.rows) {
            if remove(&row) {
                if let Some(origin) = row.origin {
                    self.removed.push(origin);
                }
            } else {
                kept.push(row);
            }
        }
        self.rows = kept;
        before - self.rows.len()
    }

    /// Check that every row has a value for every column and that
    /// non-nullable columns hold no NULLs.
    pub fn validate(&self) -> Result<()> {
        let width = self.schema.columns.len();
        for (i, row) in self.rows.iter().enumerate() {
            if row.values.len() != width {
                return Err(UpgradeError::snapshot(
                    self.table_name(),
                    format!("row {} has {} values, expected {}", i, row.values.len(), width),
                ));
            }
            for (column, value) in self.schema.columns.iter().zip(&row.values) {
                if !column.is_nullable && value.is_null() {
                    return Err(UpgradeError::snapshot(
                        self.table_name(),
                        format!("row {} has NULL in non-nullable column {}", i, column.name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// JSON dump: column names plus rows as arrays.
    pub fn to_json(&self) -> serde_json::Value {
        let columns: Vec<serde_json::Value> = self
            .schema
            .columns
            .iter()
            .map(|c| {
                json!({
                    "name": c.name,
                    "type": c.data_type,
                    "nullable": c.is_nullable,
                    "primary_key": c.is_primary_key,
                })
            })
            .collect();
        let rows: Vec<Vec<serde_json::Value>> = self
            .rows
            .iter()
            .map(|r| r.values.iter().map(SqlValue::to_json).collect())
            .collect();
        let order_by: Vec<String> = self.order_by.iter().map(|k| k.to_string()).collect();

        json!({
            "table": self.table_name(),
            "order_by": order_by,
            "columns": columns,
            "rows": rows,
        })
    }
}

/// Captures table snapshots from a store.
pub struct SnapshotBuilder<'a> {
    store: &'a dyn TableStore,
    order_by: Vec<SortKey>,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(store: &'a dyn TableStore) -> Self {
        Self {
            store,
            order_by: Vec::new(),
        }
    }

    /// Sort keys placed ahead of the primary key.
    pub fn order_by(mut self, keys: Vec<SortKey>) -> Self {
        self.order_by = keys;
        self
    }

    /// Capture `table` (optionally `schema.table`).
    ///
    /// Returns `Ok(None)` when the table does not exist.
    pub async fn capture(&self, table: &str) -> Result<Option<TableSnapshot>> {
        let (schema, name) = split_qualified(table);
        let schema = schema.unwrap_or_else(|| self.store.default_schema());

        let Some(table_schema) = self.store.describe_table(schema, name).await? else {
            debug!("{}.{} does not exist", schema, name);
            return Ok(None);
        };

        let order_by = resolve_order(&table_schema, &self.order_by)?;
        let rows = self.store.fetch_rows(&table_schema, &order_by).await?;
        debug!(
            "captured {} rows from {}",
            rows.len(),
            table_schema.full_name()
        );

        TableSnapshot::new(table_schema, rows, order_by).map(Some)
    }
}

/// Pick the row order for a capture: declared keys, else the primary key,
/// else every column in ordinal order. Declared keys are resolved to the
/// catalog spelling of the column name.
///
/// Declared keys need not be unique, so they are followed by the primary key
/// (or, without one, every remaining column) to break ties.
pub fn resolve_order(table: &TableSchema, declared: &[SortKey]) -> Result<Vec<SortKey>> {
    let mut keys: Vec<SortKey> = Vec::with_capacity(declared.len() + table.columns.len());
    for k in declared {
        let column = table.column(&k.column).ok_or_else(|| {
            UpgradeError::snapshot(
                table.full_name(),
                format!("sort column {} not found", k.column),
            )
        })?;
        if !keys.iter().any(|existing| existing.column == column.name) {
            keys.push(SortKey {
                column: column.name.clone(),
                descending: k.descending,
            });
        }
    }

    let pk = table.primary_key();
    let tie_breakers: Vec<&str> = if pk.is_empty() {
        table.columns.iter().map(|c| c.name.as_str()).collect()
    } else {
        pk
    };
    for name in tie_breakers {
        if !keys.iter().any(|k| k.column == name) {
            keys.push(SortKey::asc(name));
        }
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlNullType;

    fn communities() -> TableSchema {
        TableSchema::new("public", "RXCOMMUNITY")
            .with_column(ColumnDef::new("ID", "int4").primary_key())
            .with_column(ColumnDef::new("NAME", "varchar").with_length(64))
    }

    fn snapshot() -> TableSnapshot {
        TableSnapshot::new(
            communities(),
            vec![
                vec![SqlValue::I32(1), SqlValue::from("Intranet")],
                vec![SqlValue::I32(2), SqlValue::from("Extranet")],
            ],
            vec![SortKey::asc("ID")],
        )
        .unwrap()
    }

    #[test]
    fn test_parse_sort_keys() {
        let keys = SortKey::parse_list("STATE_ID, ORDINAL desc").unwrap();
        assert_eq!(keys, vec![SortKey::asc("STATE_ID"), SortKey::desc("ORDINAL")]);
        assert!(SortKey::parse_list("A SIDEWAYS").is_err());
        assert!(SortKey::parse_list("A DESC EXTRA").is_err());
        assert!(SortKey::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_new_rejects_short_rows() {
        let result = TableSnapshot::new(communities(), vec![vec![SqlValue::I32(1)]], Vec::new());
        assert!(matches!(result, Err(UpgradeError::Snapshot { .. })));
    }

    #[test]
    fn test_add_column_appends() {
        let mut snap = snapshot();
        snap.add_column(
            ColumnDef::new("ORDINAL", "int4"),
            vec![SqlValue::I32(1), SqlValue::I32(2)],
        )
        .unwrap();
        assert_eq!(snap.columns().len(), 3);
        assert_eq!(snap.baseline_columns().len(), 2);
        assert_eq!(snap.added_columns()[0].name, "ORDINAL");
        assert_eq!(snap.added_columns()[0].ordinal_pos, 3);
        assert_eq!(snap.value(1, 2), &SqlValue::I32(2));
    }

    #[test]
    fn test_add_existing_column_fails() {
        let mut snap = snapshot();
        let err = snap
            .add_column(ColumnDef::new("name", "text"), vec![SqlValue::Null(SqlNullType::String); 2])
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_remove_rows_tracks_captured_rows_only() {
        let mut snap = snapshot();
        snap.push_row(vec![SqlValue::I32(3), SqlValue::from("Extranet")])
            .unwrap();
        let removed = snap.remove_rows(|r| r.values[1] == SqlValue::from("Extranet"));
        assert_eq!(removed, 2);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.removed().len(), 1);
        assert_eq!(snap.removed()[0][0], SqlValue::I32(2));
    }

    #[test]
    fn test_validate_rejects_null_in_not_null_column() {
        let mut snap = snapshot();
        snap.add_column(
            ColumnDef::new("ORDINAL", "int4").not_null(),
            vec![SqlValue::I32(1), SqlValue::Null(SqlNullType::I32)],
        )
        .unwrap();
        assert!(snap.validate().is_err());
        snap.set_value(1, 2, SqlValue::I32(2));
        assert!(snap.validate().is_ok());
    }

    #[test]
    fn test_set_value_reports_change() {
        let mut snap = snapshot();
        assert!(!snap.set_value(0, 1, SqlValue::from("Intranet")));
        assert!(snap.set_value(0, 1, SqlValue::from("Portal")));
    }

    #[test]
    fn test_resolve_order() {
        let table = communities();
        assert_eq!(resolve_order(&table, &[]).unwrap(), vec![SortKey::asc("ID")]);
        assert_eq!(
            resolve_order(&table, &[SortKey::desc("name")]).unwrap(),
            vec![SortKey::desc("NAME"), SortKey::asc("ID")]
        );
        assert_eq!(
            resolve_order(&table, &[SortKey::desc("ID")]).unwrap(),
            vec![SortKey::desc("ID")]
        );
        assert!(resolve_order(&table, &[SortKey::asc("MISSING")]).is_err());

        let keyless = TableSchema::new("public", "LOG")
            .with_column(ColumnDef::new("A", "text"))
            .with_column(ColumnDef::new("B", "text"));
        assert_eq!(
            resolve_order(&keyless, &[]).unwrap(),
            vec![SortKey::asc("A"), SortKey::asc("B")]
        );
    }

    #[test]
    fn test_declared_order_gets_tie_breakers() {
        let states = TableSchema::new("public", "STATES")
            .with_column(ColumnDef::new("STATEID", "int4").primary_key())
            .with_column(ColumnDef::new("WORKFLOWAPPID", "int4"))
            .with_column(ColumnDef::new("ORDINAL", "int4"));
        assert_eq!(
            resolve_order(&states, &[SortKey::asc("WORKFLOWAPPID")]).unwrap(),
            vec![SortKey::asc("WORKFLOWAPPID"), SortKey::asc("STATEID")]
        );

        let keyless = TableSchema::new("public", "LOG")
            .with_column(ColumnDef::new("A", "text"))
            .with_column(ColumnDef::new("B", "text"))
            .with_column(ColumnDef::new("C", "text"));
        assert_eq!(
            resolve_order(&keyless, &[SortKey::desc("B")]).unwrap(),
            vec![SortKey::desc("B"), SortKey::asc("A"), SortKey::asc("C")]
        );
    }

    #[test]
    fn test_to_json_keeps_column_order() {
        let json = snapshot().to_json();
        assert_eq!(json["table"], "public.RXCOMMUNITY");
        assert_eq!(json["columns"][1]["name"], "NAME");
        assert_eq!(json["rows"][1][1], "Extranet");
        assert_eq!(json["order_by"][0], "ID");
    }
}
