//! Built-in plugins.
//!
//! | identifier | type |
//! |---|---|
//! | `table-migration` | [`TableMigrationPlugin`] |
//! | `check-db-version` | [`CheckDbVersion`] |
//! | `ensure-transition-notification` | [`EnsureTransitionNotification`] |
//! | `remove-files` | [`RemoveFiles`] |
//! | `verify-checksums` | [`VerifyChecksums`] |

mod db_version;
mod remove_files;
mod table_migration;
mod transition_notification;
mod verify_checksums;

use std::path::{Component, Path, PathBuf};

pub use db_version::CheckDbVersion;
pub use remove_files::RemoveFiles;
pub use table_migration::TableMigrationPlugin;
pub use transition_notification::EnsureTransitionNotification;
pub use verify_checksums::VerifyChecksums;

/// Join a relative path onto `root`. `None` if it is absolute or climbs out
/// of the root.
pub(crate) fn resolve_under(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative.trim());
    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1)?,
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if depth == 0 {
        return None;
    }
    Some(root.join(relative))
}
