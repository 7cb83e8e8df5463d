//! PostgreSQL SQL dialect.

use crate::core::identifier::{quote_pg, validate_type_name};
use crate::core::schema::{ColumnDef, TableSchema};
use crate::core::traits::Dialect;
use crate::error::Result;

/// PostgreSQL dialect implementation.
///
/// Parameters are bound as text and cast in SQL, so one binding path serves
/// every column type including enums and json.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }

    /// Whether a column accepts a text parameter without a second cast.
    fn is_text_type(data_type: &str) -> bool {
        matches!(
            base_type(data_type).as_str(),
            "" | "text" | "varchar" | "character varying" | "bpchar" | "char" | "character" | "name" | "citext"
        )
    }

    /// Types read directly into a typed value; everything else is read as text.
    pub(crate) fn is_native_type(data_type: &str) -> bool {
        Self::is_text_type(data_type)
            || matches!(
                base_type(data_type).as_str(),
                "bool"
                    | "boolean"
                    | "int2"
                    | "smallint"
                    | "int4"
                    | "integer"
                    | "int8"
                    | "bigint"
                    | "float4"
                    | "real"
                    | "float8"
                    | "double precision"
                    | "numeric"
                    | "decimal"
                    | "uuid"
                    | "timestamp"
                    | "timestamp without time zone"
                    | "date"
                    | "bytea"
            )
    }
}

fn base_type(data_type: &str) -> String {
    data_type
        .split('(')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_pg(name)
    }

    fn select_expr(&self, column: &ColumnDef) -> Result<String> {
        let quoted = self.quote_ident(&column.name)?;
        if Self::is_native_type(&column.data_type) {
            Ok(quoted)
        } else {
            Ok(format!("{}::text AS {}", quoted, quoted))
        }
    }

    fn param_placeholder(&self, index: usize, column: &ColumnDef) -> String {
        let target = self.column_type(column);
        if Self::is_text_type(&target) {
            format!("${}::text", index)
        } else {
            format!("${}::text::{}", index, base_type(&target))
        }
    }

    fn column_type(&self, column: &ColumnDef) -> String {
        let base = base_type(&column.data_type);
        let with_length = |name: &str| {
            if column.max_length > 0 {
                format!("{}({})", name, column.max_length)
            } else {
                name.to_string()
            }
        };

        match base.as_str() {
            "int2" | "smallint" | "tinyint" => "smallint".to_string(),
            "int4" | "int" | "integer" => "integer".to_string(),
            "int8" | "bigint" => "bigint".to_string(),
            "bool" | "boolean" | "bit" => "boolean".to_string(),
            "float4" | "real" => "real".to_string(),
            "float8" | "float" | "double precision" => "double precision".to_string(),
            "varchar" | "nvarchar" | "character varying" => with_length("varchar"),
            "bpchar" | "char" | "nchar" | "character" => with_length("char"),
            "ntext" => "text".to_string(),
            "datetime" | "datetime2" | "timestamp" => "timestamp".to_string(),
            "uniqueidentifier" => "uuid".to_string(),
            "varbinary" | "binary" | "image" => "bytea".to_string(),
            "numeric" | "decimal" if column.precision > 0 => {
                format!("numeric({}, {})", column.precision, column.scale)
            }
            _ => column.data_type.clone(),
        }
    }

    fn build_add_column(&self, table: &TableSchema, column: &ColumnDef) -> Result<String> {
        let data_type = self.column_type(column);
        validate_type_name(&data_type)?;
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {} {} NULL",
            self.qualify_table(table)?,
            self.quote_ident(&column.name)?,
            data_type
        ))
    }

    fn build_set_not_null(&self, table: &TableSchema, column: &ColumnDef) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
            self.qualify_table(table)?,
            self.quote_ident(&column.name)?
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::SortKey;
    use crate::core::value::SqlValue;

    fn states() -> TableSchema {
        TableSchema::new("public", "STATES")
            .with_column(ColumnDef::new("ID", "int4").primary_key())
            .with_column(ColumnDef::new("NAME", "varchar").with_length(64))
            .with_column(ColumnDef::new("META", "jsonb"))
    }

    #[test]
    fn test_quote_ident() {
        let d = PostgresDialect::new();
        assert_eq!(d.quote_ident("NAME").unwrap(), "\"NAME\"");
        assert_eq!(d.quote_ident("a\"b").unwrap(), "\"a\"\"b\"");
    }

    #[test]
    fn test_placeholders_cast_through_text() {
        let d = PostgresDialect::new();
        let t = states();
        assert_eq!(d.param_placeholder(1, &t.columns[0]), "$1::text::integer");
        assert_eq!(d.param_placeholder(2, &t.columns[1]), "$2::text");
        assert_eq!(d.param_placeholder(3, &t.columns[2]), "$3::text::jsonb");
    }

    #[test]
    fn test_build_select_orders_explicitly() {
        let sql = PostgresDialect
            .build_select(&states(), &[SortKey::asc("ID"), SortKey::desc("NAME")])
            .unwrap();
        assert_eq!(
            sql,
            "SELECT \"ID\", \"NAME\", \"META\"::text AS \"META\" FROM \"public\".\"STATES\" ORDER BY \"ID\", \"NAME\" DESC"
        );
    }

    #[test]
    fn test_build_insert_and_delete() {
        let t = states();
        let insert = PostgresDialect
            .build_insert(
                &t,
                &[SqlValue::I32(4), SqlValue::from("Review"), SqlValue::from("{}")],
            )
            .unwrap();
        assert_eq!(
            insert.sql,
            "INSERT INTO \"public\".\"STATES\" (\"ID\", \"NAME\", \"META\") VALUES ($1::text::integer, $2::text, $3::text::jsonb)"
        );
        assert_eq!(insert.params.len(), 3);

        let delete = PostgresDialect
            .build_delete(&t, &vec![(0, SqlValue::I32(4))])
            .unwrap();
        assert_eq!(
            delete.sql,
            "DELETE FROM \"public\".\"STATES\" WHERE \"ID\" = $1::text::integer"
        );
    }

    #[test]
    fn test_column_types() {
        let d = PostgresDialect;
        assert_eq!(d.column_type(&ColumnDef::new("A", "int4")), "integer");
        assert_eq!(d.column_type(&ColumnDef::new("A", "nvarchar").with_length(50)), "varchar(50)");
        assert_eq!(d.column_type(&ColumnDef::new("A", "bit")), "boolean");
        assert_eq!(d.column_type(&ColumnDef::new("A", "text")), "text");
    }

    #[test]
    fn test_add_column_rejects_injected_type() {
        let t = states();
        let column = ColumnDef::new("X", "int; DROP TABLE users");
        assert!(PostgresDialect.build_add_column(&t, &column).is_err());
    }
}
