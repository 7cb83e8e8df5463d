//! `remove-files`: delete deprecated files from the install tree.
//!
//! ```xml
//! <PluginData>
//!   <File path="lib/legacy-search.jar"/>
//!   <Directory path="web/old-editor"/>
//! </PluginData>
//! ```

use std::fs;

use async_trait::async_trait;

use super::resolve_under;
use crate::config::XmlElement;
use crate::error::Result;
use crate::plugin::{Plugin, PluginContext, PluginResponse};

/// Removes files and directories listed in the payload, relative to the
/// install root. Paths outside the root are refused.
#[derive(Debug, Default)]
pub struct RemoveFiles;

#[async_trait]
impl Plugin for RemoveFiles {
    async fn process(
        &self,
        ctx: &mut PluginContext<'_>,
        payload: &XmlElement,
    ) -> Result<Option<PluginResponse>> {
        let entries: Vec<&XmlElement> = payload
            .children
            .iter()
            .filter(|c| c.name == "File" || c.name == "Directory")
            .collect();
        if entries.is_empty() {
            return Ok(None);
        }

        let root = ctx.install_root().to_path_buf();
        let mut removed = 0usize;
        let mut absent = 0usize;
        let mut problems = Vec::new();

        for el in entries {
            let relative = el.required_attr("path")?;
            let Some(path) = resolve_under(&root, relative) else {
                let msg = format!("refusing to remove {}: outside the install root", relative);
                ctx.warn(&msg);
                problems.push(msg);
                continue;
            };

            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    ctx.info(format!("{} already absent", relative));
                    absent += 1;
                    continue;
                }
                Err(e) => {
                    let msg = format!("cannot inspect {}: {}", relative, e);
                    ctx.warn(&msg);
                    problems.push(msg);
                    continue;
                }
            };

            let want_dir = el.name == "Directory";
            if meta.is_dir() != want_dir {
                let msg = format!(
                    "{} is not a {}",
                    relative,
                    if want_dir { "directory" } else { "file" }
                );
                ctx.warn(&msg);
                problems.push(msg);
                continue;
            }

            if ctx.dry_run() {
                ctx.info(format!("would remove {}", relative));
                removed += 1;
                continue;
            }

            let result = if want_dir {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => {
                    ctx.info(format!("removed {}", relative));
                    removed += 1;
                }
                Err(e) => {
                    let msg = format!("cannot remove {}: {}", relative, e);
                    ctx.warn(&msg);
                    problems.push(msg);
                }
            }
        }

        if problems.is_empty() {
            Ok(Some(PluginResponse::success(format!(
                "{} removed, {} already absent",
                removed, absent
            ))))
        } else {
            Ok(Some(PluginResponse::warning(problems.join("; "))))
        }
    }
}
