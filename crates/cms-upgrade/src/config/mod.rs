//! Configuration loading and validation.
//!
//! Two documents drive a run: the YAML runner configuration ([`Config`]) and
//! the XML plugin document ([`PluginDocument`]) it points at.

mod plugins;
mod types;
mod validation;

pub use plugins::{ModuleDef, PluginDescriptor, PluginDocument, XmlContent, XmlElement};
pub use types::*;

use crate::error::{Result, UpgradeError};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// Relative paths in `upgrade` are resolved against the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            UpgradeError::Config(format!(
                "cannot read configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration for the run report.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Load the plugin document named by `upgrade.plugins`.
    pub fn load_plugins(&self) -> Result<PluginDocument> {
        PluginDocument::load(&self.upgrade.plugins)
    }

    /// Make relative `upgrade` paths absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &PathBuf| -> PathBuf {
            if p.is_absolute() {
                p.clone()
            } else {
                base.join(p)
            }
        };
        self.upgrade.plugins = resolve(&self.upgrade.plugins);
        self.upgrade.install_root = resolve(&self.upgrade.install_root);
        self.upgrade.log_dir = self.upgrade.log_dir.as_ref().map(resolve);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
repository:
  type: postgres
  host: localhost
  database: cms
  user: cms
  password: hunter2
upgrade:
  plugins: plugins/upgrade.xml
  log_dir: logs
  modules: [pre-upgrade]
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        let repo = config.repository.as_ref().unwrap();
        assert_eq!(repo.effective_port(), 5432);
        assert_eq!(repo.effective_schema(), "public");
        assert_eq!(repo.ssl_mode, "require");
        assert_eq!(repo.max_connections, 4);
        assert!(!config.upgrade.dry_run);
        assert_eq!(config.upgrade.modules, vec!["pre-upgrade"]);
    }

    #[test]
    fn test_mssql_defaults() {
        let config = Config::from_yaml(
            "repository:\n  type: mssql\n  host: db\n  database: cms\n  user: sa\n",
        )
        .unwrap();
        let repo = config.repository.unwrap();
        assert_eq!(repo.effective_port(), 1433);
        assert_eq!(repo.effective_schema(), "dbo");
        assert!(repo.encrypt_enabled());
    }

    #[test]
    fn test_repository_is_optional() {
        let config = Config::from_yaml("upgrade:\n  install_root: /opt/cms\n").unwrap();
        assert!(config.repository.is_none());
        assert_eq!(config.upgrade.plugins, PathBuf::from("upgrade-plugins.xml"));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upgrade.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.upgrade.plugins, dir.path().join("plugins/upgrade.xml"));
        assert_eq!(config.upgrade.log_dir, Some(dir.path().join("logs")));
        assert_eq!(config.upgrade.install_root, dir.path().join("."));
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Config::from_yaml(YAML).unwrap();
        let b = Config::from_yaml(YAML).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = Config::from_yaml(YAML).unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_invalid_yaml_is_config_class_error() {
        let err = Config::from_yaml("repository: [").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
