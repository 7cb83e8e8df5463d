//! SQL Server driver.

mod dialect;
mod store;

pub use dialect::MssqlDialect;
pub use store::MssqlStore;
