use std::fs;
use std::path::Path;

use tracing::{debug, info};

/// Renames the only entry of `dir` to `file_name` if it is a regular file.
///
/// Nothing happens unless `dir` has exactly one child, that child is a
/// regular file (symlinks are not followed) and it is not already called
/// `file_name`. This is a convenience, not a contract: listing or rename
/// failures are logged and otherwise ignored.
///
/// Returns whether a rename took place.
pub fn rename_single_file(dir: &Path, file_name: &str) -> bool {
    let mut children = match fs::read_dir(dir) {
        Ok(children) => children,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cannot list volume");
            return false;
        }
    };
    let child = match (children.next(), children.next()) {
        (Some(Ok(child)), None) => child,
        _ => return false,
    };

    let is_file = child.file_type().map(|t| t.is_file()).unwrap_or(false);
    if !is_file || child.file_name() == file_name {
        return false;
    }

    let dst = dir.join(file_name);
    match fs::rename(child.path(), &dst) {
        Ok(()) => {
            info!(
                from = %child.path().display(),
                to = %dst.display(),
                "renamed single file"
            );
            true
        }
        Err(e) => {
            debug!(
                from = %child.path().display(),
                error = %e,
                "cannot rename single file"
            );
            false
        }
    }
}
