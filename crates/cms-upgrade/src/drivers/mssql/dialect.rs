//! SQL Server SQL dialect.

use crate::core::identifier::{quote_mssql, validate_type_name};
use crate::core::schema::{ColumnDef, TableSchema};
use crate::core::traits::Dialect;
use crate::error::Result;

/// SQL Server dialect implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Create a new SQL Server dialect instance.
    pub fn new() -> Self {
        Self
    }

    /// Types read directly into a typed value; everything else is read as nvarchar.
    pub(crate) fn is_native_type(data_type: &str) -> bool {
        matches!(
            base_type(data_type).as_str(),
            "bit"
                | "tinyint"
                | "smallint"
                | "int"
                | "bigint"
                | "real"
                | "float"
                | "decimal"
                | "numeric"
                | "uniqueidentifier"
                | "datetime"
                | "datetime2"
                | "smalldatetime"
                | "date"
                | "binary"
                | "varbinary"
                | "image"
                | "char"
                | "varchar"
                | "nchar"
                | "nvarchar"
                | "text"
                | "ntext"
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

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mssql(name)
    }

    fn select_expr(&self, column: &ColumnDef) -> Result<String> {
        let quoted = self.quote_ident(&column.name)?;
        if Self::is_native_type(&column.data_type) {
            Ok(quoted)
        } else {
            Ok(format!("CAST({} AS nvarchar(max)) AS {}", quoted, quoted))
        }
    }

    fn param_placeholder(&self, index: usize, _column: &ColumnDef) -> String {
        format!("@P{}", index)
    }

    fn column_type(&self, column: &ColumnDef) -> String {
        let base = base_type(&column.data_type);
        let length = match column.max_length {
            -1 => "max".to_string(),
            n if n > 0 => n.to_string(),
            _ => String::new(),
        };
        let sized = |name: &str, default: &str| {
            if length.is_empty() {
                format!("{}({})", name, default)
            } else {
                format!("{}({})", name, length)
            }
        };

        match base.as_str() {
            "int2" | "smallint" => "smallint".to_string(),
            "int4" | "int" | "integer" => "int".to_string(),
            "int8" | "bigint" => "bigint".to_string(),
            "bool" | "boolean" | "bit" => "bit".to_string(),
            "float4" | "real" => "real".to_string(),
            "float8" | "float" | "double precision" => "float".to_string(),
            "varchar" | "character varying" => sized("varchar", "max"),
            "nvarchar" => sized("nvarchar", "max"),
            "text" => "nvarchar(max)".to_string(),
            "bpchar" | "char" | "character" => sized("char", "1"),
            "timestamp" | "datetime2" => "datetime2".to_string(),
            "uuid" | "uniqueidentifier" => "uniqueidentifier".to_string(),
            "bytea" | "varbinary" => sized("varbinary", "max"),
            "numeric" | "decimal" if column.precision > 0 => {
                format!("decimal({}, {})", column.precision, column.scale)
            }
            _ => column.data_type.clone(),
        }
    }

    fn build_add_column(&self, table: &TableSchema, column: &ColumnDef) -> Result<String> {
        let data_type = self.column_type(column);
        validate_type_name(&data_type)?;
        Ok(format!(
            "ALTER TABLE {} ADD {} {} NULL",
            self.qualify_table(table)?,
            self.quote_ident(&column.name)?,
            data_type
        ))
    }

    /// SQL Server restates the type when changing nullability.
    fn build_set_not_null(&self, table: &TableSchema, column: &ColumnDef) -> Result<String> {
        let data_type = self.column_type(column);
        validate_type_name(&data_type)?;
        Ok(format!(
            "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
            self.qualify_table(table)?,
            self.quote_ident(&column.name)?,
            data_type
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::SortKey;
    use crate::core::value::SqlValue;

    fn transitions() -> TableSchema {
        TableSchema::new("dbo", "TRANSITIONS")
            .with_column(ColumnDef::new("ID", "int").primary_key())
            .with_column(ColumnDef::new("LABEL", "nvarchar").with_length(50))
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(MssqlDialect.quote_ident("LABEL").unwrap(), "[LABEL]");
        assert_eq!(MssqlDialect.quote_ident("a]b").unwrap(), "[a]]b]");
    }

    #[test]
    fn test_build_update() {
        let t = transitions();
        let stmt = MssqlDialect
            .build_update(
                &t,
                &vec![(0, SqlValue::I32(7))],
                &[(1, SqlValue::from("Approve"))],
            )
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE [dbo].[TRANSITIONS] SET [LABEL] = @P1 WHERE [ID] = @P2"
        );
        assert_eq!(stmt.params, vec![SqlValue::from("Approve"), SqlValue::I32(7)]);
    }

    #[test]
    fn test_build_select() {
        let sql = MssqlDialect
            .build_select(&transitions(), &[SortKey::asc("ID")])
            .unwrap();
        assert_eq!(sql, "SELECT [ID], [LABEL] FROM [dbo].[TRANSITIONS] ORDER BY [ID]");
    }

    #[test]
    fn test_select_casts_non_native_columns() {
        let t = transitions().with_column(ColumnDef::new("SHAPE", "geography"));
        let sql = MssqlDialect.build_select(&t, &[SortKey::asc("ID")]).unwrap();
        assert_eq!(
            sql,
            "SELECT [ID], [LABEL], CAST([SHAPE] AS nvarchar(max)) AS [SHAPE] FROM [dbo].[TRANSITIONS] ORDER BY [ID]"
        );
    }

    #[test]
    fn test_add_then_require_column() {
        let t = transitions();
        let column = ColumnDef::new("ORDINAL", "int4").not_null();
        assert_eq!(
            MssqlDialect.build_add_column(&t, &column).unwrap(),
            "ALTER TABLE [dbo].[TRANSITIONS] ADD [ORDINAL] int NULL"
        );
        assert_eq!(
            MssqlDialect.build_set_not_null(&t, &column).unwrap(),
            "ALTER TABLE [dbo].[TRANSITIONS] ALTER COLUMN [ORDINAL] int NOT NULL"
        );
    }

    #[test]
    fn test_column_types() {
        let d = MssqlDialect;
        assert_eq!(d.column_type(&ColumnDef::new("A", "text")), "nvarchar(max)");
        assert_eq!(d.column_type(&ColumnDef::new("A", "varchar").with_length(-1)), "varchar(max)");
        assert_eq!(d.column_type(&ColumnDef::new("A", "nvarchar").with_length(40)), "nvarchar(40)");
        assert_eq!(d.column_type(&ColumnDef::new("A", "boolean")), "bit");
    }
}
