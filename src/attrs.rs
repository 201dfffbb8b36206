//! Restores ownership, permission bits, extended attributes and (optionally)
//! modification times on an object the materializer just created.

use std::io;
use std::io::prelude::*;
use std::path::Path;

use filetime::{self, FileTime};
use tracing::warn;

use crate::error::ExtractError;
use crate::extract::{AttrPolicy, ExtractOptions};
use crate::{Entry, EntryKind};

pub(crate) fn restore<R: Read>(
    entry: &Entry<'_, R>,
    dst: &Path,
    options: &ExtractOptions,
) -> Result<(), ExtractError> {
    let kind = entry.kind();

    tolerate(options.ownership, dst, set_ownership(dst, entry.uid(), entry.gid())).map_err(|e| {
        ExtractError::io(
            format!(
                "failed to set ownership to {}:{} for `{}`",
                entry.uid(),
                entry.gid(),
                dst.display()
            ),
            e,
        )
    })?;

    // chown may have cleared setuid/setgid, so the mode goes on afterwards.
    // Symlink permissions are meaningless and never changed.
    if kind != EntryKind::Symlink {
        set_perms(dst, entry.permissions()).map_err(|e| {
            ExtractError::io(
                format!(
                    "failed to set permissions to {:o} for `{}`",
                    entry.permissions(),
                    dst.display()
                ),
                e,
            )
        })?;
    }

    for (key, value) in entry.xattrs() {
        tolerate(options.xattrs, dst, set_xattr(dst, key.as_os_str(), value)).map_err(|e| {
            ExtractError::io(
                format!(
                    "failed to set extended attribute `{}` on `{}`",
                    key.to_string_lossy(),
                    dst.display()
                ),
                e,
            )
        })?;
    }

    if options.preserve_mtime && kind == EntryKind::FileOrSpecial {
        let mtime = FileTime::from_unix_time(entry.mtime() as i64, 0);
        filetime::set_file_times(dst, mtime, mtime).map_err(|e| {
            ExtractError::io(format!("failed to set mtime for `{}`", dst.display()), e)
        })?;
    }

    Ok(())
}

fn tolerate(policy: AttrPolicy, dst: &Path, result: io::Result<()>) -> io::Result<()> {
    match (policy, result) {
        (AttrPolicy::Warn, Err(e)) => {
            warn!(path = %dst.display(), error = %e, "ignoring attribute restore failure");
            Ok(())
        }
        (_, result) => result,
    }
}

#[cfg(unix)]
fn set_ownership(dst: &Path, uid: u64, gid: u64) -> io::Result<()> {
    let uid: u32 = uid
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("UID {} is too large", uid)))?;
    let gid: u32 = gid
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("GID {} is too large", gid)))?;

    // lchown so that a symlink is re-owned itself rather than its target.
    std::os::unix::fs::lchown(dst, Some(uid), Some(gid))
}

#[cfg(not(unix))]
fn set_ownership(_dst: &Path, _uid: u64, _gid: u64) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_perms(dst: &Path, mode: u32) -> io::Result<()> {
    use std::fs;
    use std::os::unix::prelude::*;

    fs::set_permissions(dst, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_perms(dst: &Path, mode: u32) -> io::Result<()> {
    use std::fs;

    let mut perm = fs::metadata(dst)?.permissions();
    perm.set_readonly(mode & 0o200 != 0o200);
    fs::set_permissions(dst, perm)
}

#[cfg(all(unix, feature = "xattr"))]
fn set_xattr(dst: &Path, key: &std::ffi::OsStr, value: &[u8]) -> io::Result<()> {
    // `xattr::set` does not dereference symlinks.
    xattr::set(dst, key, value)
}

#[cfg(not(all(unix, feature = "xattr")))]
fn set_xattr(_dst: &Path, _key: &std::ffi::OsStr, _value: &[u8]) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "extended attributes are not supported by this build",
    ))
}
