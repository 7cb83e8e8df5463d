//! SQL Server table store.

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tiberius::numeric::Numeric;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dialect::MssqlDialect;
use crate::config::RepositoryConfig;
use crate::core::schema::{ColumnDef, TableSchema};
use crate::core::snapshot::SortKey;
use crate::core::traits::{Dialect, Statement, TableStore};
use crate::core::value::{SqlNullType, SqlValue};
use crate::core::version::DatabaseVersion;
use crate::drivers::pick_catalog_table;
use crate::error::{Result, UpgradeError};
use crate::replay::{ReplayPlan, ReplayStats};

type MssqlClient = Client<Compat<TcpStream>>;

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: RepositoryConfig,
}

impl TiberiusConnectionManager {
    fn new(config: RepositoryConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.effective_port());
        config.database(&self.config.database);
        config.application_name("cms-upgrade");
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));

        if self.config.encrypt_enabled() {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// SQL Server repository store.
pub struct MssqlStore {
    pool: Pool<TiberiusConnectionManager>,
    schema: String,
    dialect: MssqlDialect,
}

impl MssqlStore {
    /// Connect using the repository configuration and test the connection.
    pub async fn connect(config: &RepositoryConfig) -> Result<Self> {
        if !config.encrypt_enabled() {
            warn!("SQL Server encryption is disabled. Credentials will be transmitted in plaintext.");
        }

        let max_size = u32::try_from(config.max_connections).unwrap_or(u32::MAX);
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .await
            .map_err(|e| UpgradeError::pool(e, "creating SQL Server repository pool"))?;

        let store = Self {
            pool,
            schema: config.effective_schema(),
            dialect: MssqlDialect,
        };

        {
            let mut conn = store.get_client("testing SQL Server connection").await?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to SQL Server repository: {}:{}/{} (pool_size={})",
            config.host,
            config.effective_port(),
            config.database,
            max_size
        );

        Ok(store)
    }

    async fn get_client(
        &self,
        context: &str,
    ) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| UpgradeError::pool(e, context))
    }
}

#[async_trait]
impl TableStore for MssqlStore {
    fn db_type(&self) -> &str {
        "mssql"
    }

    fn default_schema(&self) -> &str {
        &self.schema
    }

    async fn describe_table(&self, schema: &str, table: &str) -> Result<Option<TableSchema>> {
        let mut conn = self.get_client("getting connection for describe_table").await?;

        // Resolve the catalog spelling first; a case-sensitive collation
        // would otherwise miss differently-cased names.
        let tables_query = r#"
            SELECT TABLE_SCHEMA, TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE LOWER(TABLE_SCHEMA) = LOWER(@P1) AND LOWER(TABLE_NAME) = LOWER(@P2)
        "#;
        let mut lookup = Query::new(tables_query);
        lookup.bind(schema);
        lookup.bind(table);
        let candidates: Vec<(String, String)> = lookup
            .query(&mut *conn)
            .await?
            .into_first_result()
            .await?
            .iter()
            .map(|row| {
                (
                    row.get::<&str, _>(0).unwrap_or_default().to_string(),
                    row.get::<&str, _>(1).unwrap_or_default().to_string(),
                )
            })
            .collect();
        let Some((schema, table)) = pick_catalog_table(&candidates, schema, table)? else {
            return Ok(None);
        };

        let query = r#"
            SELECT
                COLUMN_NAME,
                DATA_TYPE,
                CAST(ISNULL(CHARACTER_MAXIMUM_LENGTH, 0) AS INT),
                CAST(ISNULL(NUMERIC_PRECISION, 0) AS INT),
                CAST(ISNULL(NUMERIC_SCALE, 0) AS INT),
                CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END,
                ORDINAL_POSITION
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#;

        let mut query = Query::new(query);
        query.bind(schema.clone());
        query.bind(table.clone());
        let rows = query.query(&mut *conn).await?.into_first_result().await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut result = TableSchema::new(&schema, &table);
        for row in rows {
            result.columns.push(ColumnDef {
                name: row.get::<&str, _>(0).unwrap_or_default().to_string(),
                data_type: row.get::<&str, _>(1).unwrap_or_default().to_string(),
                max_length: row.get::<i32, _>(2).unwrap_or(0),
                precision: row.get::<i32, _>(3).unwrap_or(0),
                scale: row.get::<i32, _>(4).unwrap_or(0),
                is_nullable: row.get::<i32, _>(5).unwrap_or(0) == 1,
                is_primary_key: false,
                ordinal_pos: row.get::<i32, _>(6).unwrap_or(0),
            });
        }

        let pk_query = r#"
            SELECT kcu.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
                ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
                AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA
                AND tc.TABLE_NAME = kcu.TABLE_NAME
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
                AND tc.TABLE_SCHEMA = @P1
                AND tc.TABLE_NAME = @P2
            ORDER BY kcu.ORDINAL_POSITION
        "#;

        let mut pk = Query::new(pk_query);
        pk.bind(schema.clone());
        pk.bind(table.clone());
        for row in pk.query(&mut *conn).await?.into_first_result().await? {
            let name = row.get::<&str, _>(0).unwrap_or_default();
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
        let mut conn = self.get_client("getting connection for fetch_rows").await?;
        debug!("{}", sql);

        let rows = conn.simple_query(sql).await?.into_first_result().await?;
        rows.iter()
            .map(|row| {
                table
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| convert_mssql_row_value(row, idx, col))
                    .collect()
            })
            .collect()
    }

    async fn apply_plan(&self, plan: &ReplayPlan) -> Result<ReplayStats> {
        let table = plan.table.full_name();
        let statements = plan.to_statements(&self.dialect)?;
        let mut conn = self.get_client("getting connection for apply_plan").await?;

        conn.simple_query("BEGIN TRANSACTION")
            .await
            .map_err(|e| UpgradeError::replay(&table, e))?
            .into_results()
            .await
            .map_err(|e| UpgradeError::replay(&table, e))?;

        match execute_all(&mut conn, &table, &statements).await {
            Ok(()) => {
                conn.simple_query("COMMIT TRANSACTION")
                    .await
                    .map_err(|e| UpgradeError::replay(&table, e))?
                    .into_results()
                    .await
                    .map_err(|e| UpgradeError::replay(&table, e))?;
                Ok(ReplayStats::from_plan(plan))
            }
            Err(e) => {
                if let Err(rollback) = rollback(&mut conn).await {
                    warn!("{}: rollback failed: {}", table, rollback);
                }
                Err(e)
            }
        }
    }

    async fn server_version(&self) -> Result<DatabaseVersion> {
        let mut conn = self.get_client("getting connection for server_version").await?;
        let row = conn
            .simple_query("SELECT CAST(SERVERPROPERTY('ProductVersion') AS nvarchar(128))")
            .await?
            .into_row()
            .await?;
        let raw = row
            .as_ref()
            .and_then(|r| r.get::<&str, _>(0))
            .unwrap_or_default()
            .to_string();
        DatabaseVersion::parse(&raw).ok_or_else(|| {
            UpgradeError::Config(format!("unrecognised SQL Server version '{}'", raw))
        })
    }

    async fn close(&self) {
        // bb8 closes idle connections when the pool is dropped.
    }
}

async fn execute_all(conn: &mut MssqlClient, table: &str, statements: &[Statement]) -> Result<()> {
    for stmt in statements {
        let mut query = Query::new(stmt.sql.as_str());
        for param in &stmt.params {
            bind_param(&mut query, param);
        }
        let result = query
            .execute(&mut *conn)
            .await
            .map_err(|e| UpgradeError::replay(table, format!("{}: {}", stmt.sql, e)))?;
        stmt.check_affected(table, result.total())?;
    }
    Ok(())
}

async fn rollback(conn: &mut MssqlClient) -> std::result::Result<(), tiberius::error::Error> {
    conn.simple_query("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION")
        .await?
        .into_results()
        .await?;
    Ok(())
}

/// Bind a value with its own SQL type; NULLs keep the column's type.
fn bind_param(query: &mut Query<'_>, value: &SqlValue) {
    match value {
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Bytes(v) => query.bind(v.clone()),
        SqlValue::Uuid(v) => query.bind(*v),
        SqlValue::Decimal(v) => query.bind(Numeric::new_with_scale(v.mantissa(), v.scale() as u8)),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Null(ty) => match ty {
            SqlNullType::Bool => query.bind(Option::<bool>::None),
            SqlNullType::I16 => query.bind(Option::<i16>::None),
            SqlNullType::I32 => query.bind(Option::<i32>::None),
            SqlNullType::I64 => query.bind(Option::<i64>::None),
            SqlNullType::F64 => query.bind(Option::<f64>::None),
            SqlNullType::String => query.bind(Option::<String>::None),
            SqlNullType::Bytes => query.bind(Option::<Vec<u8>>::None),
            SqlNullType::Uuid => query.bind(Option::<Uuid>::None),
            SqlNullType::Decimal => query.bind(Option::<Numeric>::None),
            SqlNullType::DateTime => query.bind(Option::<NaiveDateTime>::None),
            SqlNullType::Date => query.bind(Option::<NaiveDate>::None),
        },
    }
}

/// Convert one SQL Server cell. Non-native types were cast to nvarchar by the select.
fn convert_mssql_row_value(row: &Row, idx: usize, column: &ColumnDef) -> Result<SqlValue> {
    if !MssqlDialect::is_native_type(&column.data_type) {
        return Ok(row
            .try_get::<&str, _>(idx)?
            .map(|s| SqlValue::Text(s.to_string()))
            .unwrap_or(SqlValue::Null(SqlNullType::String)));
    }

    let ty = column.value_type();
    let value = match column.data_type.to_lowercase().as_str() {
        "bit" => row.try_get::<bool, _>(idx)?.map(SqlValue::Bool),
        "tinyint" => row.try_get::<u8, _>(idx)?.map(|v| SqlValue::I16(v as i16)),
        "smallint" => row.try_get::<i16, _>(idx)?.map(SqlValue::I16),
        "int" => row.try_get::<i32, _>(idx)?.map(SqlValue::I32),
        "bigint" => row.try_get::<i64, _>(idx)?.map(SqlValue::I64),
        "real" => row.try_get::<f32, _>(idx)?.map(|f| SqlValue::F64(f as f64)),
        "float" => row.try_get::<f64, _>(idx)?.map(SqlValue::F64),
        "decimal" | "numeric" => row.try_get::<Decimal, _>(idx)?.map(SqlValue::Decimal),
        "uniqueidentifier" => row.try_get::<Uuid, _>(idx)?.map(SqlValue::Uuid),
        "datetime" | "datetime2" | "smalldatetime" => {
            row.try_get::<NaiveDateTime, _>(idx)?.map(SqlValue::DateTime)
        }
        "date" => row.try_get::<NaiveDate, _>(idx)?.map(SqlValue::Date),
        "binary" | "varbinary" | "image" => row
            .try_get::<&[u8], _>(idx)?
            .map(|b| SqlValue::Bytes(b.to_vec())),
        _ => row
            .try_get::<&str, _>(idx)?
            .map(|s| SqlValue::Text(s.to_string())),
    };

    Ok(value.unwrap_or(SqlValue::Null(ty)))
}
