//! Table and column metadata read from the live schema catalog.

use serde::{Deserialize, Serialize};

use super::value::SqlNullType;

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,

    /// Data type as the catalog reports it (e.g. "int4", "nvarchar").
    pub data_type: String,

    /// Maximum length for string/binary types (0 when not applicable, -1 for max).
    pub max_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric scale.
    pub scale: i32,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Whether the column is part of the primary key.
    pub is_primary_key: bool,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,
}

impl ColumnDef {
    /// A nullable column with no length, precision or key membership.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            is_primary_key: false,
            ordinal_pos: 0,
        }
    }

    pub fn with_length(mut self, max_length: i32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Mark as primary key member. Key columns are never nullable.
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    /// Value type used to bind and parse values of this column.
    pub fn value_type(&self) -> SqlNullType {
        SqlNullType::from_type_name(&self.data_type)
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Append a column, assigning its ordinal position.
    pub fn with_column(mut self, mut column: ColumnDef) -> Self {
        column.ordinal_pos = self.columns.len() as i32 + 1;
        self.columns.push(column);
        self
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Names of the primary key columns, in column order.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Indexes of the primary key columns.
    pub fn primary_key_indexes(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary_key)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.is_primary_key)
    }

    /// Position of a column. Catalog names are matched case-insensitively
    /// since SQL Server and unquoted PostgreSQL names differ in case.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }
}
