//! `check-db-version`: refuse to upgrade an outdated database server.

use async_trait::async_trait;

use crate::config::XmlElement;
use crate::core::version::DatabaseVersion;
use crate::drivers::normalize_db_type;
use crate::error::{Result, UpgradeError};
use crate::plugin::{Plugin, PluginContext, PluginResponse};

/// Compares the server version with `<MinimumVersion type="...">`.
///
/// An element without `type` applies to every database type; a typed
/// element wins over an untyped one.
#[derive(Debug, Default)]
pub struct CheckDbVersion;

impl CheckDbVersion {
    fn minimum_for<'a>(payload: &'a XmlElement, db_type: &str) -> Option<&'a XmlElement> {
        let mut fallback = None;
        for el in payload.children_named("MinimumVersion") {
            match el.attr("type") {
                Some(t) if normalize_db_type(t) == Some(db_type) => return Some(el),
                Some(_) => {}
                None => fallback = fallback.or(Some(el)),
            }
        }
        fallback
    }
}

#[async_trait]
impl Plugin for CheckDbVersion {
    async fn process(
        &self,
        ctx: &mut PluginContext<'_>,
        payload: &XmlElement,
    ) -> Result<Option<PluginResponse>> {
        let store = ctx.store()?;
        let db_type = store.db_type().to_string();

        let Some(el) = Self::minimum_for(payload, &db_type) else {
            return Ok(Some(PluginResponse::warning(format!(
                "no minimum version declared for {}",
                db_type
            ))));
        };
        let minimum = DatabaseVersion::parse(&el.text).ok_or_else(|| {
            UpgradeError::PluginDocument(format!("invalid minimum version '{}'", el.text))
        })?;

        let actual = store.server_version().await?;
        ctx.info(format!(
            "{} server version {} (minimum {})",
            db_type, actual, minimum
        ));

        if actual.at_least(&minimum) {
            Ok(Some(PluginResponse::success(format!(
                "{} {} satisfies minimum {}",
                db_type, actual, minimum
            ))))
        } else {
            let message = format!(
                "{} server version {} is below the required {}; upgrade the database before continuing",
                db_type, actual, minimum
            );
            ctx.error(&message);
            Ok(Some(PluginResponse::exception(message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryStore;
    use crate::plugin::{ModuleLog, ResponseKind};
    use std::path::Path;
    use std::sync::Arc;

    async fn check(server: &str, xml: &str) -> PluginResponse {
        let store = MemoryStore::new().with_version(DatabaseVersion::parse(server).unwrap());
        let payload = XmlElement::parse(xml).unwrap();
        let mut log = ModuleLog::memory("pre");
        let mut ctx = PluginContext::new(
            "pre",
            "CheckDatabase",
            &mut log,
            Some(Arc::new(store)),
            Path::new("."),
            false,
        );
        CheckDbVersion
            .process(&mut ctx, &payload)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_version_satisfied() {
        let r = check(
            "15.4",
            r#"<PluginData><MinimumVersion>12.0</MinimumVersion></PluginData>"#,
        )
        .await;
        assert_eq!(r.kind, ResponseKind::Success);
    }

    #[tokio::test]
    async fn test_version_too_old() {
        let r = check(
            "11.9",
            r#"<PluginData><MinimumVersion>12</MinimumVersion></PluginData>"#,
        )
        .await;
        assert_eq!(r.kind, ResponseKind::Exception);
        assert!(r.message.contains("below"));
    }

    #[tokio::test]
    async fn test_typed_minimum_wins() {
        let r = check(
            "12.0",
            r#"<PluginData>
                 <MinimumVersion>10</MinimumVersion>
                 <MinimumVersion type="mem">13</MinimumVersion>
                 <MinimumVersion type="postgres">9</MinimumVersion>
               </PluginData>"#,
        )
        .await;
        assert_eq!(r.kind, ResponseKind::Exception);
    }

    #[tokio::test]
    async fn test_no_matching_minimum() {
        let r = check(
            "12.0",
            r#"<PluginData><MinimumVersion type="mssql">16</MinimumVersion></PluginData>"#,
        )
        .await;
        assert_eq!(r.kind, ResponseKind::Warning);
    }
}
