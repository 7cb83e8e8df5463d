//! Error types for the upgrade framework.

use thiserror::Error;

/// Main error type for upgrade operations.
#[derive(Error, Debug)]
pub enum UpgradeError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The plugin document is structurally invalid.
    #[error("Invalid plugin document: {0}")]
    PluginDocument(String),

    /// XML parse error
    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// PostgreSQL connection or query error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server connection or query error
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A snapshot violated its own schema.
    #[error("Snapshot of {table} is inconsistent: {message}")]
    Snapshot { table: String, message: String },

    /// A transform could not be applied to a snapshot.
    #[error("Transform failed for table {table}: {message}")]
    Transform { table: String, message: String },

    /// Writing a replay plan back to the database failed.
    #[error("Replay failed for table {table}: {message}")]
    Replay { table: String, message: String },

    /// No plugin is registered under the requested identifier.
    #[error("No plugin registered for class '{0}'")]
    UnknownPlugin(String),

    /// A plugin reported an error of its own.
    #[error("Plugin {plugin} failed: {message}")]
    Plugin { plugin: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpgradeError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        UpgradeError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Snapshot error
    pub fn snapshot(table: impl Into<String>, message: impl Into<String>) -> Self {
        UpgradeError::Snapshot {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Transform error
    pub fn transform(table: impl Into<String>, message: impl Into<String>) -> Self {
        UpgradeError::Transform {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Replay error
    pub fn replay(table: impl Into<String>, message: impl ToString) -> Self {
        UpgradeError::Replay {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Plugin error
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        UpgradeError::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    ///
    /// Configuration problems exit with 2 so an installer can tell them apart
    /// from a failed upgrade step (1).
    pub fn exit_code(&self) -> u8 {
        match self {
            UpgradeError::Config(_)
            | UpgradeError::PluginDocument(_)
            | UpgradeError::Xml(_)
            | UpgradeError::Yaml(_) => 2,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for upgrade operations.
pub type Result<T> = std::result::Result<T, UpgradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(UpgradeError::Config("x".into()).exit_code(), 2);
        assert_eq!(UpgradeError::PluginDocument("x".into()).exit_code(), 2);
        assert_eq!(UpgradeError::replay("T", "boom").exit_code(), 1);
        assert_eq!(UpgradeError::UnknownPlugin("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = UpgradeError::transform("RXCOMMUNITY", "column NAME not found");
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Transform failed for table RXCOMMUNITY"));
        assert!(detailed.contains("column NAME not found"));
    }
}
