use std::io::Read;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::attrs;
use crate::error::ExtractError;
use crate::normalize::rename_single_file;
use crate::{Archive, Entry};

/// What to do when ownership or an extended attribute cannot be restored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AttrPolicy {
    /// Abort the extraction with the failure.
    #[default]
    Fatal,
    /// Log a warning and carry on with the entry.
    Warn,
}

/// Knobs of the extraction engine.
#[derive(Clone, Debug)]
pub struct ExtractOptions {
    /// Name a lone regular file is renamed to after extraction.
    pub single_file_name: String,
    /// Track the `.` root entry and run single-file normalization when it is
    /// absent. When disabled, normalization never runs and `.` is unpacked
    /// onto the volume directory like any other entry.
    pub root_marker_aware: bool,
    /// Reaction to `lchown` failures.
    pub ownership: AttrPolicy,
    /// Reaction to extended attribute failures.
    pub xattrs: AttrPolicy,
    /// Restore modification times of regular (and flattened special) files.
    pub preserve_mtime: bool,
}

impl ExtractOptions {
    /// Strict options: root-marker aware, every attribute failure fatal,
    /// modification times left alone.
    pub fn new(single_file_name: impl Into<String>) -> ExtractOptions {
        ExtractOptions {
            single_file_name: single_file_name.into(),
            root_marker_aware: true,
            ownership: AttrPolicy::Fatal,
            xattrs: AttrPolicy::Fatal,
            preserve_mtime: false,
        }
    }
}

/// Outcome of a successful extraction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Number of entries written to disk.
    pub entries: u64,
    /// Whether a `.` entry naming the archive root was seen.
    pub root_marker: bool,
    /// Whether a lone file was renamed to the single-file name.
    pub normalized: bool,
}

enum Destination {
    /// The entry names the archive root itself.
    RootMarker,
    /// Only slashes: effectively an empty file name.
    Empty,
    Path(PathBuf),
}

/// Unpacks `reader` into `volume` and then normalizes a lone file.
///
/// This is [`unpack`] followed by [`rename_single_file`] when the options
/// are root-marker aware and the archive carried no `.` entry.
pub fn populate_volume<R: Read>(
    reader: R,
    volume: &Path,
    options: &ExtractOptions,
) -> Result<ExtractSummary, ExtractError> {
    let mut summary = unpack(reader, volume, options)?;
    if options.root_marker_aware && !summary.root_marker {
        summary.normalized = rename_single_file(volume, &options.single_file_name);
    }
    Ok(summary)
}

/// Unpacks every entry of the tar stream `reader` into `volume`.
///
/// Entries are applied in stream order. The first failure aborts the
/// extraction; whatever was written before it stays on disk.
///
/// Leading `/` characters are stripped from entry names. Names containing a
/// `..` component, or reaching outside of `volume` through a symlink created
/// earlier, fail with [`ExtractError::Traversal`]. Parent directories are not
/// created implicitly; the archive has to list them first.
pub fn unpack<R: Read>(
    reader: R,
    volume: &Path,
    options: &ExtractOptions,
) -> Result<ExtractSummary, ExtractError> {
    let volume = volume.canonicalize().map_err(|e| {
        ExtractError::io(format!("failed to resolve volume `{}`", volume.display()), e)
    })?;

    let mut archive = Archive::new(reader);
    let mut summary = ExtractSummary::default();
    for entry in archive.entries().map_err(ExtractError::Decode)? {
        let mut entry = entry.map_err(ExtractError::Decode)?;

        let file_dst = match destination(&volume, &entry)? {
            Destination::RootMarker if options.root_marker_aware => {
                debug!("archive carries a root directory entry");
                summary.root_marker = true;
                continue;
            }
            // Without root marker tracking `.` is an ordinary entry naming
            // the volume itself.
            Destination::RootMarker => volume.clone(),
            Destination::Empty => {
                warn!(
                    entry = %String::from_utf8_lossy(entry.path_bytes()),
                    "skipping entry with an empty name"
                );
                continue;
            }
            Destination::Path(path) => path,
        };

        debug!(
            path = %file_dst.display(),
            kind = ?entry.kind(),
            mode = format_args!("{:o}", entry.permissions()),
            uid = entry.uid(),
            gid = entry.gid(),
            "unpacking entry"
        );
        entry.unpack(&file_dst)?;
        attrs::restore(&entry, &file_dst, options)?;
        summary.entries += 1;
    }
    Ok(summary)
}

fn destination<R: Read>(volume: &Path, entry: &Entry<'_, R>) -> Result<Destination, ExtractError> {
    let traversal = || ExtractError::Traversal {
        entry: String::from_utf8_lossy(entry.path_bytes()).into_owned(),
        volume: volume.to_path_buf(),
    };

    let path = entry.path().map_err(ExtractError::Decode)?;
    let mut file_dst = volume.to_path_buf();
    let mut saw_curdir = false;
    for part in path.components() {
        match part {
            // Leading '/' characters and root paths are just ignored and
            // treated as "empty components"
            Component::Prefix(..) | Component::RootDir => continue,
            Component::CurDir => saw_curdir = true,
            Component::ParentDir => return Err(traversal()),
            Component::Normal(part) => file_dst.push(part),
        }
    }

    if file_dst == volume {
        return Ok(if saw_curdir {
            Destination::RootMarker
        } else {
            Destination::Empty
        });
    }
    let (Some(parent), Some(file_name)) = (file_dst.parent(), file_dst.file_name()) else {
        return Ok(Destination::Empty);
    };

    // Abort if the target (canonical) parent is outside of the volume, which
    // happens when an earlier entry planted a symlink on the way.
    let canon_parent = parent.canonicalize().map_err(|e| {
        ExtractError::io(
            format!("failed to resolve the parent directory of `{}`", file_dst.display()),
            e,
        )
    })?;
    if !canon_parent.starts_with(volume) {
        return Err(traversal());
    }
    Ok(Destination::Path(canon_parent.join(file_name)))
}
