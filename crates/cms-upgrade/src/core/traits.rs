//! Store and dialect abstractions.
//!
//! - [`TableStore`]: reads table schema and rows, applies replay plans
//! - [`Dialect`]: generates SQL text for one database family
//!
//! Stores are async because the drivers are. Callers await every call in
//! order; nothing here spawns work.

use async_trait::async_trait;

use super::schema::{ColumnDef, TableSchema};
use super::snapshot::SortKey;
use super::value::SqlValue;
use super::version::DatabaseVersion;
use crate::error::{Result, UpgradeError};
use crate::replay::{ReplayPlan, ReplayStats};

/// A live table store.
///
/// Implementations exist for PostgreSQL, SQL Server and an in-memory store
/// used for dry runs and tests.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Database type identifier (e.g. "postgres", "mssql", "memory").
    fn db_type(&self) -> &str;

    /// Schema used when a table name is not qualified.
    fn default_schema(&self) -> &str;

    /// Read the column definitions of a table.
    ///
    /// Returns `Ok(None)` when the table does not exist. An existing table
    /// with no rows still returns its schema.
    async fn describe_table(&self, schema: &str, table: &str) -> Result<Option<TableSchema>>;

    /// Read every row of a table, ordered by `order_by`.
    ///
    /// Each row holds one value per column of `table`, in column order.
    async fn fetch_rows(
        &self,
        table: &TableSchema,
        order_by: &[SortKey],
    ) -> Result<Vec<Vec<SqlValue>>>;

    /// Apply a replay plan in a single transaction.
    ///
    /// Either every statement of the plan is committed or none is.
    async fn apply_plan(&self, plan: &ReplayPlan) -> Result<ReplayStats>;

    /// Version of the connected server.
    async fn server_version(&self) -> Result<DatabaseVersion>;

    /// Release pooled connections.
    async fn close(&self);
}

/// A SQL statement with bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,

    /// Exact number of rows the statement must affect. `None` for DDL.
    pub expected_rows: Option<u64>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            expected_rows: None,
        }
    }

    /// Require the statement to affect exactly `rows` rows.
    pub fn expecting(mut self, rows: u64) -> Self {
        self.expected_rows = Some(rows);
        self
    }

    /// Check an affected-row count against the expectation.
    pub fn check_affected(&self, table: &str, affected: u64) -> Result<()> {
        match self.expected_rows {
            Some(expected) if expected != affected => Err(UpgradeError::replay(
                table,
                format!(
                    "statement affected {} rows, expected {}: {}",
                    affected, expected, self.sql
                ),
            )),
            _ => Ok(()),
        }
    }
}

/// Identifies one row by column position and captured value.
pub type RowKey = Vec<(usize, SqlValue)>;

/// SQL generation strategy for one database family.
///
/// The DML builders are template methods: they only need quoting and
/// placeholders from the implementation.
pub trait Dialect: Send + Sync {
    /// Get the dialect identifier (e.g., "mssql", "postgres").
    fn name(&self) -> &str;

    /// Quote an identifier (table name, column name, etc.).
    ///
    /// - MSSQL: `[identifier]`
    /// - PostgreSQL: `"identifier"`
    fn quote_ident(&self, name: &str) -> Result<String>;

    /// Get a parameter placeholder for the given 1-based index.
    ///
    /// The target column is passed so dialects that bind parameters as text
    /// can cast to the column type.
    fn param_placeholder(&self, index: usize, column: &ColumnDef) -> String;

    /// Column type text for DDL, e.g. `varchar(64)`.
    fn column_type(&self, column: &ColumnDef) -> String;

    /// `ALTER TABLE ... ADD ...` for a new column, always nullable.
    ///
    /// NOT NULL is applied after the rows are filled, see [`Dialect::build_set_not_null`].
    fn build_add_column(&self, table: &TableSchema, column: &ColumnDef) -> Result<String>;

    /// Make an existing column non-nullable.
    fn build_set_not_null(&self, table: &TableSchema, column: &ColumnDef) -> Result<String>;

    /// Expression selecting one column.
    ///
    /// Dialects cast types their driver cannot read natively to text.
    fn select_expr(&self, column: &ColumnDef) -> Result<String> {
        self.quote_ident(&column.name)
    }

    /// Quote `schema.table`.
    fn qualify_table(&self, table: &TableSchema) -> Result<String> {
        Ok(format!(
            "{}.{}",
            self.quote_ident(&table.schema)?,
            self.quote_ident(&table.name)?
        ))
    }

    /// SELECT every column in ordinal order with an explicit ORDER BY.
    fn build_select(&self, table: &TableSchema, order_by: &[SortKey]) -> Result<String> {
        let columns = table
            .columns
            .iter()
            .map(|c| self.select_expr(c))
            .collect::<Result<Vec<_>>>()?;

        let mut sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            self.qualify_table(table)?
        );

        if !order_by.is_empty() {
            let keys = order_by
                .iter()
                .map(|k| {
                    let dir = if k.descending { " DESC" } else { "" };
                    Ok(format!("{}{}", self.quote_ident(&k.column)?, dir))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        Ok(sql)
    }

    /// INSERT one full row.
    fn build_insert(&self, table: &TableSchema, row: &[SqlValue]) -> Result<Statement> {
        let columns = table
            .columns
            .iter()
            .map(|c| self.quote_ident(&c.name))
            .collect::<Result<Vec<_>>>()?;
        let placeholders: Vec<String> = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| self.param_placeholder(i + 1, c))
            .collect();

        Ok(Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.qualify_table(table)?,
                columns.join(", "),
                placeholders.join(", ")
            ),
            params: row.to_vec(),
            expected_rows: Some(1),
        })
    }

    /// UPDATE the changed cells of the row identified by `key`.
    fn build_update(
        &self,
        table: &TableSchema,
        key: &RowKey,
        changes: &[(usize, SqlValue)],
    ) -> Result<Statement> {
        let mut params = Vec::with_capacity(changes.len() + key.len());
        let mut assignments = Vec::with_capacity(changes.len());
        for (idx, value) in changes {
            let column = &table.columns[*idx];
            params.push(value.clone());
            assignments.push(format!(
                "{} = {}",
                self.quote_ident(&column.name)?,
                self.param_placeholder(params.len(), column)
            ));
        }

        let predicate = self.build_key_predicate(table, key, &mut params)?;

        Ok(Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE {}",
                self.qualify_table(table)?,
                assignments.join(", "),
                predicate
            ),
            params,
            expected_rows: Some(1),
        })
    }

    /// DELETE the row identified by `key`.
    fn build_delete(&self, table: &TableSchema, key: &RowKey) -> Result<Statement> {
        let mut params = Vec::with_capacity(key.len());
        let predicate = self.build_key_predicate(table, key, &mut params)?;

        Ok(Statement {
            sql: format!("DELETE FROM {} WHERE {}", self.qualify_table(table)?, predicate),
            params,
            expected_rows: Some(1),
        })
    }

    /// WHERE predicate matching a row key. NULL key values compare with IS NULL.
    fn build_key_predicate(
        &self,
        table: &TableSchema,
        key: &RowKey,
        params: &mut Vec<SqlValue>,
    ) -> Result<String> {
        let mut terms = Vec::with_capacity(key.len());
        for (idx, value) in key {
            let column = &table.columns[*idx];
            let quoted = self.quote_ident(&column.name)?;
            if value.is_null() {
                terms.push(format!("{} IS NULL", quoted));
            } else {
                params.push(value.clone());
                terms.push(format!(
                    "{} = {}",
                    quoted,
                    self.param_placeholder(params.len(), column)
                ));
            }
        }
        Ok(terms.join(" AND "))
    }
}
