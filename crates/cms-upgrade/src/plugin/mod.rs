//! Upgrade plugins.
//!
//! A plugin is a single install or upgrade step. The dispatcher resolves it
//! by class identifier through a [`PluginRegistry`], hands it a
//! [`PluginContext`] and its `PluginData` payload, and records the
//! [`PluginResponse`] it returns.

pub mod builtin;
mod context;
mod registry;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

pub use context::{LogLevel, ModuleLog, PluginContext};
pub use registry::{PluginFactory, PluginRegistry};

use crate::config::XmlElement;
use crate::error::Result;

/// Severity of a plugin response. Ordered so the worst of a set is its max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseKind {
    Success,
    Warning,
    Exception,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseKind::Success => "SUCCESS",
            ResponseKind::Warning => "WARNING",
            ResponseKind::Exception => "EXCEPTION",
        };
        f.write_str(s)
    }
}

/// Outcome reported by one plugin invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginResponse {
    pub kind: ResponseKind,
    pub message: String,
}

impl PluginResponse {
    pub fn new(kind: ResponseKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ResponseKind::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ResponseKind::Warning, message)
    }

    pub fn exception(message: impl Into<String>) -> Self {
        Self::new(ResponseKind::Exception, message)
    }

    /// Whether the operator needs to look at this response.
    pub fn is_issue(&self) -> bool {
        self.kind > ResponseKind::Success
    }
}

impl fmt::Display for PluginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A single install or upgrade step.
///
/// `Ok(None)` means the plugin has nothing to report. An `Err` is turned
/// into an `EXCEPTION` response by the dispatcher.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn process(
        &self,
        ctx: &mut PluginContext<'_>,
        payload: &XmlElement,
    ) -> Result<Option<PluginResponse>>;
}
