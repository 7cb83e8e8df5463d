//! Identifier validation and quoting.
//!
//! Table and column names reach SQL text from the plugin document, so they are
//! validated and quoted here rather than at each call site. Values never go
//! through this module; they are always bound as parameters.

use crate::error::{Result, UpgradeError};

/// SQL Server allows 128 characters, PostgreSQL 63 bytes. Use the larger bound
/// and let the server reject what it cannot store.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Reject identifiers that are empty, too long or carry a NUL byte.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(UpgradeError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(UpgradeError::Config(format!(
            "Identifier contains a null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(UpgradeError::Config(format!(
            "Identifier exceeds {} bytes: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier, doubling embedded double quotes.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a SQL Server identifier, doubling embedded closing brackets.
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Reject column type names that could carry more than a type.
///
/// Types come from the plugin document and are spliced into DDL, so only
/// letters, digits, underscores, spaces, parentheses and commas pass.
pub fn validate_type_name(data_type: &str) -> Result<()> {
    let ok = !data_type.trim().is_empty()
        && data_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ','));
    if ok {
        Ok(())
    } else {
        Err(UpgradeError::Config(format!(
            "Invalid column type {:?}",
            data_type
        )))
    }
}

/// Split `schema.table` into its parts. A bare name has no schema.
///
/// Only the first dot separates; quoting in the plugin document is not
/// supported, table names there are plain.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, table)) if !schema.is_empty() => (Some(schema.trim()), table.trim()),
        Some((_, table)) => (None, table.trim()),
        None => (None, name.trim()),
    }
}
