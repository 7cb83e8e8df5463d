//! Plugin dispatch for install and upgrade phases.
//!
//! The [`Dispatcher`] runs the modules of a plugin document in order. Each
//! module gets its own [`ModuleLog`]; each plugin is constructed from the
//! registry, run to completion and its response recorded. Errors and panics
//! become `EXCEPTION` responses so the remaining plugins still run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info};

use crate::config::{Config, ModuleDef, PluginDescriptor, PluginDocument};
use crate::core::traits::TableStore;
use crate::drivers;
use crate::error::Result;
use crate::plugin::{
    LogLevel, ModuleLog, PluginContext, PluginRegistry, PluginResponse, ResponseKind,
};

/// Response of one plugin invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PluginReport {
    pub plugin: String,
    pub class: String,

    /// `None` when the plugin had nothing to report.
    pub response: Option<PluginResponse>,

    pub duration_ms: u64,
}

impl PluginReport {
    pub fn kind(&self) -> Option<ResponseKind> {
        self.response.as_ref().map(|r| r.kind)
    }
}

/// Responses of one module, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub plugins: Vec<PluginReport>,

    /// Module log file, when logging to disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Module-level failure, such as an unwritable log. Counts as EXCEPTION.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ModuleReport {
    /// Worst response of the module, `None` if no plugin reported anything.
    pub fn worst(&self) -> Option<ResponseKind> {
        if self.failure.is_some() {
            return Some(ResponseKind::Exception);
        }
        self.plugins.iter().filter_map(PluginReport::kind).max()
    }

    /// WARNING and EXCEPTION responses.
    pub fn issues(&self) -> impl Iterator<Item = &PluginReport> {
        self.plugins
            .iter()
            .filter(|p| p.response.as_ref().is_some_and(PluginResponse::is_issue))
    }

    pub fn has_exception(&self) -> bool {
        self.worst() == Some(ResponseKind::Exception)
    }
}

/// Result of a dispatcher run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    /// SHA-256 of the runner configuration, empty when run without one.
    pub config_hash: String,

    pub dry_run: bool,
    pub modules: Vec<ModuleReport>,
}

impl RunReport {
    /// Whether any plugin reported EXCEPTION. This is the upgrade error
    /// indicator the installer acts on.
    pub fn has_exception(&self) -> bool {
        self.modules.iter().any(ModuleReport::has_exception)
    }

    /// Worst response across all modules.
    pub fn worst(&self) -> Option<ResponseKind> {
        self.modules.iter().filter_map(ModuleReport::worst).max()
    }

    /// Modules that failed outside any plugin, with the failure message.
    pub fn module_failures(&self) -> Vec<(&str, &str)> {
        self.modules
            .iter()
            .filter_map(|m| m.failure.as_deref().map(|f| (m.module.as_str(), f)))
            .collect()
    }

    /// Every WARNING and EXCEPTION with the module it came from.
    pub fn issues(&self) -> Vec<(&str, &PluginReport)> {
        self.modules
            .iter()
            .flat_map(|m| m.issues().map(move |p| (m.module.as_str(), p)))
            .collect()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs plugin modules.
pub struct Dispatcher {
    registry: PluginRegistry,
    store: Option<Arc<dyn TableStore>>,
    install_root: PathBuf,
    log_dir: Option<PathBuf>,
    dry_run: bool,
    config_hash: String,
}

impl Dispatcher {
    /// A dispatcher with no repository, rooted at the current directory.
    pub fn new(registry: PluginRegistry) -> Self {
        Self {
            registry,
            store: None,
            install_root: PathBuf::from("."),
            log_dir: None,
            dry_run: false,
            config_hash: String::new(),
        }
    }

    /// Build from a runner configuration, connecting to its repository.
    pub async fn from_config(config: &Config, registry: PluginRegistry) -> Result<Self> {
        let store = match &config.repository {
            Some(repo) => Some(drivers::connect(repo).await?),
            None => None,
        };

        let mut dispatcher = Self::new(registry)
            .with_install_root(config.upgrade.install_root.clone())
            .dry_run(config.upgrade.dry_run)
            .with_config_hash(config.hash());
        dispatcher.store = store;
        dispatcher.log_dir = config.upgrade.log_dir.clone();
        Ok(dispatcher)
    }

    pub fn with_store(mut self, store: Arc<dyn TableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_install_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.install_root = root.into();
        self
    }

    /// Write one `<module>.log` per module into `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run the selected modules (all when `only` is empty) in document order.
    pub async fn run(&self, document: &PluginDocument, only: &[String]) -> Result<RunReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let modules = document.select(only)?;
        info!(
            "Starting upgrade run {} ({} modules{})",
            run_id,
            modules.len(),
            if self.dry_run { ", dry run" } else { "" }
        );

        let mut reports = Vec::with_capacity(modules.len());
        for module in modules {
            reports.push(self.run_module(module).await);
        }

        let completed_at = Utc::now();
        let report = RunReport {
            run_id,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            config_hash: self.config_hash.clone(),
            dry_run: self.dry_run,
            modules: reports,
        };

        let issues = report.issues().len() + report.module_failures().len();
        if report.has_exception() {
            error!(
                "Upgrade run {} finished with errors ({} issues)",
                report.run_id, issues
            );
        } else {
            info!(
                "Upgrade run {} finished in {:.1}s ({} issues)",
                report.run_id, report.duration_seconds, issues
            );
        }
        Ok(report)
    }

    /// Run every plugin of one module with a fresh module log.
    ///
    /// A module whose log cannot be opened runs none of its plugins and is
    /// reported as a module failure; the run moves on to the next module.
    pub async fn run_module(&self, module: &ModuleDef) -> ModuleReport {
        let opened = match &self.log_dir {
            Some(dir) => ModuleLog::open(dir, &module.name),
            None => Ok(ModuleLog::discard(&module.name)),
        };
        let mut log = match opened {
            Ok(log) => log,
            Err(e) => {
                let failure = format!("cannot open module log: {}", e);
                error!("Module {}: {}", module.name, failure);
                return ModuleReport {
                    module: module.name.clone(),
                    plugins: Vec::new(),
                    log_file: None,
                    failure: Some(failure),
                };
            }
        };

        let mut report = self.run_module_with_log(module, &mut log).await;
        if let Err(e) = log.close() {
            let failure = format!("cannot write module log: {}", e);
            error!("Module {}: {}", module.name, failure);
            report.failure = Some(failure);
        }
        report
    }

    /// Run a module writing into a caller-provided log.
    pub async fn run_module_with_log(&self, module: &ModuleDef, log: &mut ModuleLog) -> ModuleReport {
        info!("Module {}: {} plugins", module.name, module.plugins.len());
        let mut plugins = Vec::with_capacity(module.plugins.len());
        for descriptor in &module.plugins {
            plugins.push(self.run_plugin(&module.name, descriptor, log).await);
        }
        ModuleReport {
            module: module.name.clone(),
            plugins,
            log_file: log.path().map(|p| p.to_path_buf()),
            failure: None,
        }
    }

    /// Resolve, construct and run one plugin. Never fails: errors and panics
    /// are converted into an `EXCEPTION` response.
    pub async fn run_plugin(
        &self,
        module: &str,
        descriptor: &PluginDescriptor,
        log: &mut ModuleLog,
    ) -> PluginReport {
        let start = Instant::now();
        let name = descriptor.name.as_str();
        log.write(
            LogLevel::Info,
            name,
            &format!("starting ({})", descriptor.class),
        );

        let response = match self.registry.create(&descriptor.class) {
            Err(e) => {
                log.write(LogLevel::Error, name, &e.format_detailed());
                Some(PluginResponse::exception(e.to_string()))
            }
            Ok(plugin) => {
                let mut ctx = PluginContext::new(
                    module,
                    name,
                    log,
                    self.store.clone(),
                    &self.install_root,
                    self.dry_run,
                );
                let outcome = AssertUnwindSafe(plugin.process(&mut ctx, &descriptor.payload))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        ctx.error(e.format_detailed());
                        Some(PluginResponse::exception(e.to_string()))
                    }
                    Err(panic) => {
                        let message = format!("plugin panicked: {}", panic_message(&*panic));
                        ctx.error(&message);
                        Some(PluginResponse::exception(message))
                    }
                }
            }
        };

        match &response {
            Some(r) => {
                let level = match r.kind {
                    ResponseKind::Success => LogLevel::Info,
                    ResponseKind::Warning => LogLevel::Warn,
                    ResponseKind::Exception => LogLevel::Error,
                };
                log.write(level, name, &r.to_string());
            }
            None => log.write(LogLevel::Info, name, "finished"),
        }

        PluginReport {
            plugin: descriptor.name.clone(),
            class: descriptor.class.clone(),
            response,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Release the repository connections.
    pub async fn close(&self) {
        if let Some(store) = &self.store {
            store.close().await;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::XmlElement;
    use crate::error::UpgradeError;
    use crate::plugin::Plugin;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Fails;

    #[async_trait]
    impl Plugin for Fails {
        async fn process(
            &self,
            _ctx: &mut PluginContext<'_>,
            _payload: &XmlElement,
        ) -> Result<Option<PluginResponse>> {
            Err(UpgradeError::Plugin {
                plugin: "fails".into(),
                message: "boom".into(),
            })
        }
    }

    #[derive(Default)]
    struct Panics;

    #[async_trait]
    impl Plugin for Panics {
        async fn process(
            &self,
            _ctx: &mut PluginContext<'_>,
            _payload: &XmlElement,
        ) -> Result<Option<PluginResponse>> {
            panic!("index out of range")
        }
    }

    #[derive(Default)]
    struct Quiet;

    #[async_trait]
    impl Plugin for Quiet {
        async fn process(
            &self,
            ctx: &mut PluginContext<'_>,
            _payload: &XmlElement,
        ) -> Result<Option<PluginResponse>> {
            ctx.info("ran");
            Ok(None)
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = PluginRegistry::new();
        registry.register_default::<Fails>("fails");
        registry.register_default::<Panics>("panics");
        registry.register_default::<Quiet>("quiet");
        Dispatcher::new(registry)
    }

    fn module(classes: &[&str]) -> ModuleDef {
        ModuleDef {
            name: "upgrade".into(),
            plugins: classes
                .iter()
                .enumerate()
                .map(|(i, class)| PluginDescriptor {
                    name: format!("P{}", i),
                    class: class.to_string(),
                    payload: XmlElement::empty("PluginData"),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_module() {
        let d = dispatcher();
        let mut log = ModuleLog::memory("upgrade");
        let report = d
            .run_module_with_log(&module(&["fails", "panics", "missing", "quiet"]), &mut log)
            .await;

        let kinds: Vec<Option<ResponseKind>> = report.plugins.iter().map(PluginReport::kind).collect();
        assert_eq!(
            kinds,
            vec![
                Some(ResponseKind::Exception),
                Some(ResponseKind::Exception),
                Some(ResponseKind::Exception),
                None,
            ]
        );
        assert!(report.plugins[1]
            .response
            .as_ref()
            .unwrap()
            .message
            .contains("index out of range"));
        assert!(log.lines().iter().any(|l| l.ends_with("P3: ran")));
        assert!(report.has_exception());
        assert_eq!(report.issues().count(), 3);
    }

    #[tokio::test]
    async fn test_run_report_aggregates() {
        let d = dispatcher();
        let doc = PluginDocument {
            modules: vec![
                ModuleDef {
                    name: "pre".into(),
                    ..module(&["quiet"])
                },
                ModuleDef {
                    name: "post".into(),
                    ..module(&["fails"])
                },
            ],
        };

        let report = d.run(&doc, &[]).await.unwrap();
        assert_eq!(report.modules.len(), 2);
        assert!(report.has_exception());
        assert_eq!(report.worst(), Some(ResponseKind::Exception));
        let issues = report.issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].0, "post");

        let only = d.run(&doc, &["pre".to_string()]).await.unwrap();
        assert!(!only.has_exception());
        assert_eq!(only.worst(), None);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["modules"][1]["plugins"][0]["response"]["kind"], "EXCEPTION");
    }

    #[tokio::test]
    async fn test_module_log_written_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher().with_log_dir(dir.path());
        let report = d.run_module(&module(&["quiet"])).await;
        let path = report.log_file.unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("P0: ran"));
    }

    #[tokio::test]
    async fn test_unwritable_log_dir_fails_module_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("logs");
        std::fs::write(&not_a_dir, b"occupied").unwrap();

        let d = dispatcher().with_log_dir(&not_a_dir);
        let doc = PluginDocument {
            modules: vec![
                ModuleDef {
                    name: "pre".into(),
                    ..module(&["quiet"])
                },
                ModuleDef {
                    name: "post".into(),
                    ..module(&["quiet"])
                },
            ],
        };

        let report = d.run(&doc, &[]).await.unwrap();
        assert_eq!(report.modules.len(), 2);
        assert!(report.has_exception());
        for module in &report.modules {
            assert!(module.plugins.is_empty());
            assert_eq!(module.worst(), Some(ResponseKind::Exception));
        }
        let failures = report.module_failures();
        assert_eq!(failures[1].0, "post");
        assert!(failures[1].1.contains("cannot open module log"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert!(json["modules"][0]["failure"].is_string());
    }
}
