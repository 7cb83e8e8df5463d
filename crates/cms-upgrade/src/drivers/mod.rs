//! Database driver implementations.
//!
//! Each driver provides a [`Dialect`](crate::core::Dialect) and a
//! [`TableStore`]:
//!
//! - [`postgres`]: PostgreSQL via deadpool-postgres
//! - [`mssql`]: Microsoft SQL Server via tiberius and bb8
//! - [`memory`]: in-process tables for dry runs and tests
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `Dialect` and `TableStore`
//! 3. Add its aliases to [`normalize_db_type`] and a branch to [`connect`]

pub mod memory;
pub mod mssql;
pub mod postgres;

use std::sync::Arc;

pub use memory::MemoryStore;
pub use mssql::{MssqlDialect, MssqlStore};
pub use postgres::{PostgresDialect, PostgresStore, SslMode};

use crate::config::RepositoryConfig;
use crate::core::traits::TableStore;
use crate::error::{Result, UpgradeError};

/// Canonical name of a repository type, or `None` if it is not supported.
pub fn normalize_db_type(db_type: &str) -> Option<&'static str> {
    match db_type.trim().to_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => Some("postgres"),
        "mssql" | "sqlserver" | "sql_server" => Some("mssql"),
        "memory" | "mem" => Some("memory"),
        _ => None,
    }
}

/// Pick the catalog spelling of `schema.table` among candidate tables.
///
/// An exact match wins. Otherwise a single case-insensitive match is
/// used; several differently-cased matches are an error.
pub fn pick_catalog_table(
    candidates: &[(String, String)],
    schema: &str,
    table: &str,
) -> Result<Option<(String, String)>> {
    if let Some(exact) = candidates.iter().find(|(s, t)| s == schema && t == table) {
        return Ok(Some(exact.clone()));
    }

    let folded: Vec<&(String, String)> = candidates
        .iter()
        .filter(|(s, t)| s.eq_ignore_ascii_case(schema) && t.eq_ignore_ascii_case(table))
        .collect();
    match folded.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some((*only).clone())),
        many => {
            let names: Vec<String> = many.iter().map(|(s, t)| format!("{}.{}", s, t)).collect();
            Err(UpgradeError::Config(format!(
                "table name '{}.{}' is ambiguous: {}",
                schema,
                table,
                names.join(", ")
            )))
        }
    }
}

/// Open a store for the configured repository.
pub async fn connect(config: &RepositoryConfig) -> Result<Arc<dyn TableStore>> {
    match normalize_db_type(&config.r#type) {
        Some("postgres") => Ok(Arc::new(PostgresStore::connect(config).await?)),
        Some("mssql") => Ok(Arc::new(MssqlStore::connect(config).await?)),
        Some("memory") => Ok(Arc::new(MemoryStore::new())),
        _ => Err(UpgradeError::Config(format!(
            "Unknown repository type: '{}'. Supported types: postgres, mssql, memory",
            config.r#type
        ))),
    }
}
