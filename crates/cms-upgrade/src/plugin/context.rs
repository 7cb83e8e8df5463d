//! Per-module log and the context handed to each plugin.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::core::traits::TableStore;
use crate::error::{Result, UpgradeError};

/// Level of a module log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.pad(s)
    }
}

enum Sink {
    File { path: PathBuf, writer: BufWriter<File> },
    Memory(Vec<String>),
    Discard,
}

/// Log stream of one module.
///
/// Opened when the module starts and closed when it ends. Every line is also
/// emitted through `tracing`.
pub struct ModuleLog {
    module: String,
    sink: Sink,
}

impl ModuleLog {
    /// Append to `<dir>/<module>.log`, creating the directory if needed.
    pub fn open(dir: &Path, module: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", file_stem(module)));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            module: module.to_string(),
            sink: Sink::File {
                path,
                writer: BufWriter::new(file),
            },
        })
    }

    /// Keep lines in memory; see [`ModuleLog::lines`].
    pub fn memory(module: &str) -> Self {
        Self {
            module: module.to_string(),
            sink: Sink::Memory(Vec::new()),
        }
    }

    /// Only mirror to `tracing`.
    pub fn discard(module: &str) -> Self {
        Self {
            module: module.to_string(),
            sink: Sink::Discard,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// File backing this log, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.sink {
            Sink::File { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Lines written so far to a memory log. Empty for other sinks.
    pub fn lines(&self) -> &[String] {
        match &self.sink {
            Sink::Memory(lines) => lines,
            _ => &[],
        }
    }

    /// Write one line as `HH:MM:SS [LEVEL] plugin: message`.
    pub fn write(&mut self, level: LogLevel, plugin: &str, message: &str) {
        match level {
            LogLevel::Info => info!(module = %self.module, plugin, "{}", message),
            LogLevel::Warn => warn!(module = %self.module, plugin, "{}", message),
            LogLevel::Error => error!(module = %self.module, plugin, "{}", message),
        }

        let line = format!(
            "{} [{:5}] {}: {}",
            chrono::Local::now().format("%H:%M:%S"),
            level,
            plugin,
            message
        );
        match &mut self.sink {
            Sink::File { path, writer } => {
                if let Err(e) = writeln!(writer, "{}", line) {
                    warn!("cannot write module log {}: {}", path.display(), e);
                }
            }
            Sink::Memory(lines) => lines.push(line),
            Sink::Discard => {}
        }
    }

    /// Flush buffered lines. Called when the module ends.
    pub fn close(&mut self) -> Result<()> {
        if let Sink::File { writer, .. } = &mut self.sink {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for ModuleLog {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for ModuleLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sink = match &self.sink {
            Sink::File { path, .. } => format!("file({})", path.display()),
            Sink::Memory(lines) => format!("memory({} lines)", lines.len()),
            Sink::Discard => "discard".to_string(),
        };
        f.debug_struct("ModuleLog")
            .field("module", &self.module)
            .field("sink", &sink)
            .finish()
    }
}

fn file_stem(module: &str) -> String {
    module
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Everything a plugin may use while it runs.
pub struct PluginContext<'a> {
    module: &'a str,
    plugin: &'a str,
    log: &'a mut ModuleLog,
    store: Option<Arc<dyn TableStore>>,
    install_root: &'a Path,
    dry_run: bool,
}

impl<'a> PluginContext<'a> {
    pub fn new(
        module: &'a str,
        plugin: &'a str,
        log: &'a mut ModuleLog,
        store: Option<Arc<dyn TableStore>>,
        install_root: &'a Path,
        dry_run: bool,
    ) -> Self {
        Self {
            module,
            plugin,
            log,
            store,
            install_root,
            dry_run,
        }
    }

    pub fn module(&self) -> &str {
        self.module
    }

    pub fn plugin_name(&self) -> &str {
        self.plugin
    }

    /// The repository store. Fails when no repository is configured.
    pub fn store(&self) -> Result<Arc<dyn TableStore>> {
        self.store.clone().ok_or_else(|| UpgradeError::Plugin {
            plugin: self.plugin.to_string(),
            message: "no repository is configured".to_string(),
        })
    }

    pub fn install_root(&self) -> &Path {
        self.install_root
    }

    /// When set, plugins report what they would change without writing.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        self.log.write(LogLevel::Info, self.plugin, message.as_ref());
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        self.log.write(LogLevel::Warn, self.plugin, message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        self.log.write(LogLevel::Error, self.plugin, message.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_log_format() {
        let mut log = ModuleLog::memory("pre-upgrade");
        log.write(LogLevel::Warn, "CheckDatabase", "version too old");
        let line = &log.lines()[0];
        assert!(line.ends_with("[WARN ] CheckDatabase: version too old"), "{}", line);
        assert_eq!(line.as_bytes()[2], b':');
    }

    #[test]
    fn test_file_log_appends_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = ModuleLog::open(dir.path(), "post upgrade").unwrap();
            log.write(LogLevel::Info, "A", "first");
            log.close().unwrap();
        }
        {
            let mut log = ModuleLog::open(dir.path(), "post upgrade").unwrap();
            log.write(LogLevel::Error, "B", "second");
            log.close().unwrap();
        }
        let text = std::fs::read_to_string(dir.path().join("post_upgrade.log")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("A: first"));
        assert!(lines[1].contains("[ERROR] B: second"));
    }

    #[test]
    fn test_store_requires_repository() {
        let mut log = ModuleLog::discard("m");
        let ctx = PluginContext::new("m", "p", &mut log, None, Path::new("."), false);
        let err = ctx.store().err().unwrap();
        assert!(err.to_string().contains("no repository"));
    }
}
