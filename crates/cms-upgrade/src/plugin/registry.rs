//! Plugin registry.
//!
//! Maps class identifiers from the plugin document to constructors. The
//! registry is filled at startup and read-only afterwards; callers add their
//! own plugins next to the built-in ones.

use std::collections::HashMap;

use super::builtin::{
    CheckDbVersion, EnsureTransitionNotification, RemoveFiles, TableMigrationPlugin,
    VerifyChecksums,
};
use super::Plugin;
use crate::error::{Result, UpgradeError};

/// Builds a fresh plugin instance for one invocation.
pub type PluginFactory = Box<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Registry of plugin constructors keyed by class identifier.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in plugin.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_default::<TableMigrationPlugin>("table-migration");
        registry.register_default::<CheckDbVersion>("check-db-version");
        registry.register_default::<EnsureTransitionNotification>("ensure-transition-notification");
        registry.register_default::<RemoveFiles>("remove-files");
        registry.register_default::<VerifyChecksums>("verify-checksums");
        registry
    }

    /// Register a constructor. Replaces any existing entry for `class`.
    pub fn register<F>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(class.into(), Box::new(factory));
    }

    /// Register a plugin built with `Default::default()`.
    pub fn register_default<P>(&mut self, class: impl Into<String>)
    where
        P: Plugin + Default + 'static,
    {
        self.register(class, || Box::new(P::default()) as Box<dyn Plugin>);
    }

    /// Construct the plugin registered for `class`.
    pub fn create(&self, class: &str) -> Result<Box<dyn Plugin>> {
        self.factories
            .get(class)
            .map(|factory| factory())
            .ok_or_else(|| UpgradeError::UnknownPlugin(class.to_string()))
    }

    pub fn has(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}
