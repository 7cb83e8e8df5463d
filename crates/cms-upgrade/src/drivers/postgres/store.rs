//! PostgreSQL table store.
//!
//! Uses deadpool-postgres for pooling. Each call checks out one connection
//! and returns it before the call completes.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use super::dialect::PostgresDialect;
use super::tls::{make_tls_connector, SslMode};
use crate::config::RepositoryConfig;
use crate::core::schema::{ColumnDef, TableSchema};
use crate::core::snapshot::SortKey;
use crate::core::traits::{Dialect, TableStore};
use crate::core::value::{SqlNullType, SqlValue};
use crate::core::version::DatabaseVersion;
use crate::drivers::pick_catalog_table;
use crate::error::{Result, UpgradeError};
use crate::replay::{ReplayPlan, ReplayStats};

/// PostgreSQL repository store.
pub struct PostgresStore {
    pool: Pool,
    schema: String,
    dialect: PostgresDialect,
}

impl PostgresStore {
    /// Connect using the repository configuration and test the connection.
    pub async fn connect(config: &RepositoryConfig) -> Result<Self> {
        let port = config.effective_port();
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("cms-upgrade");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match make_tls_connector(SslMode::parse(&config.ssl_mode)?)? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.max_connections)
                    .build()
                    .map_err(|e| UpgradeError::pool(e, "creating PostgreSQL repository pool"))?
            }
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.max_connections)
                    .build()
                    .map_err(|e| UpgradeError::pool(e, "creating PostgreSQL repository pool"))?
            }
        };

        let store = Self {
            pool,
            schema: config.effective_schema(),
            dialect: PostgresDialect,
        };

        let client = store.get_client("testing PostgreSQL connection").await?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL repository: {}:{}/{}",
            config.host, port, config.database
        );

        Ok(store)
    }

    async fn get_client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| UpgradeError::pool(e, context))
    }
}

#[async_trait]
impl TableStore for PostgresStore {
    fn db_type(&self) -> &str {
        "postgres"
    }

    fn default_schema(&self) -> &str {
        &self.schema
    }

    async fn describe_table(&self, schema: &str, table: &str) -> Result<Option<TableSchema>> {
        let client = self.get_client("getting connection for describe_table").await?;

        // Unquoted identifiers fold to lower case, so look the table up
        // case-insensitively and continue with the catalog spelling.
        let tables_query = r#"
            SELECT table_schema::text, table_name::text
            FROM information_schema.tables
            WHERE lower(table_schema) = lower($1) AND lower(table_name) = lower($2)
        "#;
        let candidates: Vec<(String, String)> = client
            .query(tables_query, &[&schema, &table])
            .await?
            .iter()
            .map(|row| (row.get(0), row.get(1)))
            .collect();
        let Some((schema, table)) = pick_catalog_table(&candidates, schema, table)? else {
            return Ok(None);
        };

        let query = r#"
            SELECT
                column_name,
                udt_name,
                COALESCE(character_maximum_length, 0)::int4,
                COALESCE(numeric_precision, 0)::int4,
                COALESCE(numeric_scale, 0)::int4,
                CASE WHEN is_nullable = 'YES' THEN true ELSE false END,
                ordinal_position::int4
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = client.query(query, &[&schema, &table]).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut result = TableSchema::new(&schema, &table);
        for row in rows {
            result.columns.push(ColumnDef {
                name: row.get::<_, String>(0),
                data_type: row.get::<_, String>(1),
                max_length: row.get::<_, i32>(2),
                precision: row.get::<_, i32>(3),
                scale: row.get::<_, i32>(4),
                is_nullable: row.get::<_, bool>(5),
                is_primary_key: false,
                ordinal_pos: row.get::<_, i32>(6),
            });
        }

        let pk_query = r#"
            SELECT a.attname
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
            WHERE n.nspname = $1
              AND t.relname = $2
              AND c.contype = 'p'
              AND a.attnum = ANY(c.conkey)
            ORDER BY array_position(c.conkey, a.attnum)
        "#;

        for row in client.query(pk_query, &[&schema, &table]).await? {
            let name: String = row.get(0);
            if let Some(col) = result.columns.iter_mut().find(|c| c.name == name) {
                col.is_primary_key = true;
            }
        }

        debug!(
            "Loaded {} columns for {} (pk: {:?})",
            result.columns.len(),
            result.full_name(),
            result.primary_key()
        );
        Ok(Some(result))
    }

    async fn fetch_rows(
        &self,
        table: &TableSchema,
        order_by: &[SortKey],
    ) -> Result<Vec<Vec<SqlValue>>> {
        let sql = self.dialect.build_select(table, order_by)?;
        let client = self.get_client("getting connection for fetch_rows").await?;
        debug!("{}", sql);

        let rows = client.query(sql.as_str(), &[]).await?;
        rows.iter()
            .map(|row| {
                table
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| convert_pg_row_value(row, idx, col))
                    .collect()
            })
            .collect()
    }

    async fn apply_plan(&self, plan: &ReplayPlan) -> Result<ReplayStats> {
        let table = plan.table.full_name();
        let statements = plan.to_statements(&self.dialect)?;
        let mut client = self.get_client("getting connection for apply_plan").await?;

        let tx = client
            .transaction()
            .await
            .map_err(|e| UpgradeError::replay(&table, e))?;

        for stmt in &statements {
            let params: Vec<Option<String>> = stmt.params.iter().map(sql_value_to_param).collect();
            let refs: Vec<&(dyn ToSql + Sync)> =
                params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

            let affected = tx
                .execute(stmt.sql.as_str(), &refs)
                .await
                .map_err(|e| UpgradeError::replay(&table, format!("{}: {}", stmt.sql, e)))?;
            // Returning early drops the transaction, which rolls it back.
            stmt.check_affected(&table, affected)?;
        }

        tx.commit()
            .await
            .map_err(|e| UpgradeError::replay(&table, e))?;

        Ok(ReplayStats::from_plan(plan))
    }

    async fn server_version(&self) -> Result<DatabaseVersion> {
        let client = self.get_client("getting connection for server_version").await?;
        let row = client.query_one("SHOW server_version", &[]).await?;
        let raw: String = row.get(0);
        DatabaseVersion::parse(&raw).ok_or_else(|| {
            UpgradeError::Config(format!("unrecognised PostgreSQL version '{}'", raw))
        })
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Bind every value as text; the placeholder casts it to the column type.
fn sql_value_to_param(value: &SqlValue) -> Option<String> {
    value.to_text()
}

fn get<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> Result<Option<T>>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    Ok(row.try_get::<_, Option<T>>(idx)?)
}

/// Convert one PostgreSQL cell. Non-native types were cast to text by the select.
fn convert_pg_row_value(row: &tokio_postgres::Row, idx: usize, column: &ColumnDef) -> Result<SqlValue> {
    if !PostgresDialect::is_native_type(&column.data_type) {
        return Ok(get::<String>(row, idx)?
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null(SqlNullType::String)));
    }

    let ty = column.value_type();
    let value = match column.data_type.to_lowercase().as_str() {
        "bool" | "boolean" => get::<bool>(row, idx)?.map(SqlValue::Bool),
        "int2" | "smallint" => get::<i16>(row, idx)?.map(SqlValue::I16),
        "int4" | "integer" => get::<i32>(row, idx)?.map(SqlValue::I32),
        "int8" | "bigint" => get::<i64>(row, idx)?.map(SqlValue::I64),
        "float4" | "real" => get::<f32>(row, idx)?.map(|f| SqlValue::F64(f as f64)),
        "float8" | "double precision" => get::<f64>(row, idx)?.map(SqlValue::F64),
        "numeric" | "decimal" => get::<rust_decimal::Decimal>(row, idx)?.map(SqlValue::Decimal),
        "uuid" => get::<uuid::Uuid>(row, idx)?.map(SqlValue::Uuid),
        "timestamp" | "timestamp without time zone" => {
            get::<chrono::NaiveDateTime>(row, idx)?.map(SqlValue::DateTime)
        }
        "date" => get::<chrono::NaiveDate>(row, idx)?.map(SqlValue::Date),
        "bytea" => get::<Vec<u8>>(row, idx)?.map(SqlValue::Bytes),
        _ => get::<String>(row, idx)?.map(SqlValue::Text),
    };

    Ok(value.unwrap_or(SqlValue::Null(ty)))
}
