//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax for PostgreSQL
//! - [`PostgresStore`]: pooled repository store
//! - [`SslMode`]: `sslmode` handling for the connection

mod dialect;
mod store;
mod tls;

pub use dialect::PostgresDialect;
pub use store::PostgresStore;
pub use tls::{make_tls_connector, SslMode};
