//! `verify-checksums`: check installed files against expected digests.
//!
//! ```xml
//! <PluginData>
//!   <File path="lib/cms-core.jar" sha256="9f86d0..."/>
//! </PluginData>
//! ```

use async_trait::async_trait;

use super::resolve_under;
use crate::checksum::{digest_matches, sha256_file};
use crate::config::XmlElement;
use crate::error::Result;
use crate::plugin::{Plugin, PluginContext, PluginResponse};

/// Compares files under the install root with their expected SHA-256.
/// Mismatched, missing or unreadable files are a warning.
#[derive(Debug, Default)]
pub struct VerifyChecksums;

#[async_trait]
impl Plugin for VerifyChecksums {
    async fn process(
        &self,
        ctx: &mut PluginContext<'_>,
        payload: &XmlElement,
    ) -> Result<Option<PluginResponse>> {
        let root = ctx.install_root().to_path_buf();
        let mut verified = 0usize;
        let mut problems = Vec::new();

        for el in payload.children_named("File") {
            let relative = el.required_attr("path")?;
            let expected = el.required_attr("sha256")?;

            let Some(path) = resolve_under(&root, relative) else {
                problems.push(format!("{}: outside the install root", relative));
                continue;
            };

            match sha256_file(&path) {
                Ok(actual) if digest_matches(expected, &actual) => verified += 1,
                Ok(actual) => {
                    ctx.warn(format!(
                        "{}: expected {} but found {}",
                        relative, expected, actual
                    ));
                    problems.push(format!("{}: checksum mismatch", relative));
                }
                Err(e) => {
                    ctx.warn(format!("{}: {}", relative, e));
                    problems.push(format!("{}: {}", relative, e));
                }
            }
        }

        if verified == 0 && problems.is_empty() {
            return Ok(None);
        }
        if problems.is_empty() {
            let msg = format!("{} files verified", verified);
            ctx.info(&msg);
            Ok(Some(PluginResponse::success(msg)))
        } else {
            Ok(Some(PluginResponse::warning(problems.join("; "))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{ModuleLog, ResponseKind};

    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    async fn run(root: &std::path::Path, xml: &str) -> Option<PluginResponse> {
        let payload = XmlElement::parse(xml).unwrap();
        let mut log = ModuleLog::memory("verify");
        let mut ctx = PluginContext::new("verify", "checksums", &mut log, None, root, false);
        VerifyChecksums.process(&mut ctx, &payload).await.unwrap()
    }

    #[tokio::test]
    async fn test_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"abc").unwrap();
        let xml = format!(r#"<PluginData><File path="a.txt" sha256="{}"/></PluginData>"#, ABC);
        let r = run(dir.path(), &xml).await.unwrap();
        assert_eq!(r.kind, ResponseKind::Success);
        assert_eq!(r.message, "1 files verified");
    }

    #[tokio::test]
    async fn test_mismatch_and_missing_warn() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"abd").unwrap();
        let xml = format!(
            r#"<PluginData>
                 <File path="a.txt" sha256="{}"/>
                 <File path="missing.txt" sha256="{}"/>
               </PluginData>"#,
            ABC, ABC
        );
        let r = run(dir.path(), &xml).await.unwrap();
        assert_eq!(r.kind, ResponseKind::Warning);
        assert!(r.message.contains("a.txt: checksum mismatch"));
        assert!(r.message.contains("missing.txt"));
    }
}
