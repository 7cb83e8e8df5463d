//! Configuration validation.

use super::Config;
use crate::drivers::{normalize_db_type, SslMode};
use crate::error::{Result, UpgradeError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if let Some(repo) = &config.repository {
        let db_type = normalize_db_type(&repo.r#type).ok_or_else(|| {
            UpgradeError::Config(format!(
                "repository.type must be 'postgres', 'mssql' or 'memory', got '{}'",
                repo.r#type
            ))
        })?;

        if db_type != "memory" {
            if repo.host.is_empty() {
                return Err(UpgradeError::Config("repository.host is required".into()));
            }
            if repo.database.is_empty() {
                return Err(UpgradeError::Config(
                    "repository.database is required".into(),
                ));
            }
            if repo.user.is_empty() {
                return Err(UpgradeError::Config("repository.user is required".into()));
            }
        }

        if db_type == "postgres" {
            SslMode::parse(&repo.ssl_mode)?;
        }

        if repo.max_connections == 0 {
            return Err(UpgradeError::Config(
                "repository.max_connections must be at least 1".into(),
            ));
        }
    }

    if config.upgrade.plugins.as_os_str().is_empty() {
        return Err(UpgradeError::Config("upgrade.plugins is required".into()));
    }

    if config.upgrade.modules.iter().any(|m| m.trim().is_empty()) {
        return Err(UpgradeError::Config(
            "upgrade.modules cannot contain empty names".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RepositoryConfig, UpgradeSettings};

    fn repository() -> RepositoryConfig {
        RepositoryConfig {
            r#type: "postgres".to_string(),
            host: "localhost".to_string(),
            port: None,
            database: "cms".to_string(),
            user: "cms".to_string(),
            password: "password".to_string(),
            schema: None,
            ssl_mode: "disable".to_string(),
            encrypt: "true".to_string(),
            trust_server_cert: false,
            max_connections: 4,
        }
    }

    fn valid_config() -> Config {
        Config {
            repository: Some(repository()),
            upgrade: UpgradeSettings::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_host() {
        let mut config = valid_config();
        if let Some(repo) = config.repository.as_mut() {
            repo.host = String::new();
        }
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("repository.host is required"));
    }

    #[test]
    fn test_unknown_type() {
        let mut config = valid_config();
        if let Some(repo) = config.repository.as_mut() {
            repo.r#type = "oracle".to_string();
        }
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_type_aliases() {
        let mut config = valid_config();
        if let Some(repo) = config.repository.as_mut() {
            repo.r#type = "SqlServer".to_string();
        }
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_memory_needs_no_host() {
        let mut config = valid_config();
        if let Some(repo) = config.repository.as_mut() {
            repo.r#type = "memory".to_string();
            repo.host = String::new();
            repo.database = String::new();
            repo.user = String::new();
        }
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_bad_ssl_mode() {
        let mut config = valid_config();
        if let Some(repo) = config.repository.as_mut() {
            repo.ssl_mode = "sometimes".to_string();
        }
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_connections() {
        let mut config = valid_config();
        if let Some(repo) = config.repository.as_mut() {
            repo.max_connections = 0;
        }
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_no_repository_is_valid() {
        let config = Config {
            repository: None,
            upgrade: UpgradeSettings::default(),
        };
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_module_name() {
        let mut config = valid_config();
        config.upgrade.modules = vec!["  ".to_string()];
        assert!(validate(&config).is_err());
    }
}
