use std::borrow::Cow;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use crate::archive::ArchiveInner;
use crate::error::ExtractError;
use crate::sparse::{Chunk, SparseReader};
use crate::{bytes2path, EntryKind, EntryType, Header};

/// A read-only view into an entry of an archive.
///
/// This structure is a window into a portion of a borrowed archive which can
/// be inspected. It acts as a file handle by implementing the Reader trait,
/// yielding the entry's payload. Sparse entries read as the expanded file,
/// holes included. Whatever part of the payload is left unread is skipped
/// when the next entry is requested.
pub struct Entry<'a, R: Read> {
    fields: EntryFields,
    data: io::Take<&'a ArchiveInner<R>>,
    sparse: Option<SparseReader>,
}

// Metadata of an entry after GNU and pax extensions have been applied to the
// raw header.
pub(crate) struct EntryFields {
    pub entry_type: EntryType,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub mtime: u64,
    pub size: u64,
    pub path: Vec<u8>,
    pub link_name: Option<Vec<u8>>,
    pub xattrs: HashMap<OsString, Vec<u8>>,
    pub header: Header,
}

impl<'a, R: Read> Entry<'a, R> {
    pub(crate) fn new(
        fields: EntryFields,
        data: io::Take<&'a ArchiveInner<R>>,
        sparse: Option<SparseReader>,
    ) -> Entry<'a, R> {
        Entry {
            fields,
            data,
            sparse,
        }
    }

    /// Returns the path name for this entry.
    ///
    /// Long names recorded through GNU or pax extensions take precedence over
    /// the name field of the header.
    pub fn path(&self) -> io::Result<Cow<'_, Path>> {
        bytes2path(&self.fields.path)
    }

    /// Returns the raw bytes listed for this entry.
    pub fn path_bytes(&self) -> &[u8] {
        &self.fields.path
    }

    /// Returns the link name for this entry, if any is found.
    pub fn link_name(&self) -> io::Result<Option<Cow<'_, Path>>> {
        match self.fields.link_name {
            Some(ref bytes) => bytes2path(bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the link name for this entry, in bytes, if listed.
    pub fn link_name_bytes(&self) -> Option<&[u8]> {
        self.fields.link_name.as_deref()
    }

    /// Returns the type flag of this entry.
    pub fn entry_type(&self) -> EntryType {
        self.fields.entry_type
    }

    /// Returns which filesystem object unpacking this entry creates.
    pub fn kind(&self) -> EntryKind {
        EntryKind::classify(self.fields.entry_type, self.fields.mode)
    }

    /// Returns the full mode word, including any file type bits.
    pub fn mode(&self) -> u32 {
        self.fields.mode
    }

    /// Returns the permission bits (including setuid, setgid and sticky).
    pub fn permissions(&self) -> u32 {
        self.fields.mode & 0o7777
    }

    /// Returns the numeric owner of this entry.
    pub fn uid(&self) -> u64 {
        self.fields.uid
    }

    /// Returns the numeric group of this entry.
    pub fn gid(&self) -> u64 {
        self.fields.gid
    }

    /// Returns the modification time in seconds since the Unix epoch.
    pub fn mtime(&self) -> u64 {
        self.fields.mtime
    }

    /// Returns the size of the file this entry describes.
    ///
    /// For sparse entries this is the expanded size, which is larger than
    /// the data stored in the archive.
    pub fn size(&self) -> u64 {
        self.fields.size
    }

    /// Returns whether this entry is a sparse file.
    pub fn is_sparse(&self) -> bool {
        self.sparse.is_some()
    }

    /// Returns the extended attributes recorded for this entry.
    ///
    /// The mapping is unordered; callers must not rely on iteration order.
    pub fn xattrs(&self) -> &HashMap<OsString, Vec<u8>> {
        &self.fields.xattrs
    }

    /// Returns access to the raw header of this entry in the archive.
    pub fn header(&self) -> &Header {
        &self.fields.header
    }

    /// Creates the filesystem object this entry describes at `dst`.
    ///
    /// Only the object itself is created: symlinks point at the recorded
    /// link name without it being resolved, directories that already exist
    /// are accepted as they are, and everything else becomes a regular file
    /// holding the payload. Ownership and extended attributes are left to the
    /// caller. Parent directories are expected to exist.
    pub fn unpack(&mut self, dst: &Path) -> Result<(), ExtractError> {
        match self.kind() {
            EntryKind::Symlink => self.unpack_symlink(dst),
            EntryKind::Directory => self.unpack_dir(dst),
            EntryKind::FileOrSpecial => self.unpack_file(dst),
        }
    }

    fn unpack_symlink(&self, dst: &Path) -> Result<(), ExtractError> {
        let src = match self.link_name() {
            Ok(Some(name)) => name,
            Ok(None) => {
                return Err(ExtractError::io(
                    format!("failed to create symlink `{}`", dst.display()),
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        "symlink listed but no link name found",
                    ),
                ))
            }
            Err(e) => {
                return Err(ExtractError::io(
                    format!("invalid link name for `{}`", dst.display()),
                    e,
                ))
            }
        };

        return symlink(&src, dst).map_err(|e| {
            ExtractError::io(
                format!(
                    "failed to create symlink `{}` -> `{}`",
                    dst.display(),
                    src.display()
                ),
                e,
            )
        });

        #[cfg(windows)]
        fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
            ::std::os::windows::fs::symlink_file(src, dst)
        }
        #[cfg(unix)]
        fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
            ::std::os::unix::fs::symlink(src, dst)
        }
    }

    fn unpack_dir(&self, dst: &Path) -> Result<(), ExtractError> {
        match create_dir(dst, self.permissions()) {
            Ok(()) => Ok(()),
            // If the directory already exists just let it slide
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                match fs::symlink_metadata(dst) {
                    Ok(m) if m.is_dir() => Ok(()),
                    _ => Err(ExtractError::io(
                        format!("failed to create directory `{}`", dst.display()),
                        e,
                    )),
                }
            }
            Err(e) => Err(ExtractError::io(
                format!("failed to create directory `{}`", dst.display()),
                e,
            )),
        }
    }

    fn unpack_file(&mut self, dst: &Path) -> Result<(), ExtractError> {
        let mut f = open_file(dst, self.permissions()).map_err(|e| {
            ExtractError::io(format!("failed to open `{}`", dst.display()), e)
        })?;
        let mut src = ReadSide {
            inner: &mut self.data,
            failed: false,
        };
        let complete = match self.sparse {
            Some(ref sparse) => copy_sparse(&mut src, &mut f, sparse.chunks(), self.fields.size),
            None => io::copy(&mut src, &mut f).map(|n| n == self.fields.size),
        };
        let read_failed = src.failed;

        let name = String::from_utf8_lossy(self.path_bytes());
        match complete {
            Ok(true) => Ok(()),
            Ok(false) => Err(ExtractError::Decode(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("archive ends inside the payload of `{}`", name),
            ))),
            Err(e) if read_failed => Err(ExtractError::Decode(io::Error::new(
                e.kind(),
                format!("failed to read the payload of `{}`: {}", name, e),
            ))),
            Err(e) => Err(ExtractError::io(
                format!("failed to unpack `{}` into `{}`", name, dst.display()),
                e,
            )),
        }
    }
}

impl<'a, R: Read> Read for Entry<'a, R> {
    fn read(&mut self, into: &mut [u8]) -> io::Result<usize> {
        match self.sparse {
            Some(ref mut sparse) => sparse.read_from(&mut self.data, into),
            None => self.data.read(into),
        }
    }
}

/// Records whether a read failed, so that a failed copy can be blamed on the
/// archive rather than on the destination.
struct ReadSide<'r, T> {
    inner: &'r mut T,
    failed: bool,
}

impl<T: Read> Read for ReadSide<'_, T> {
    fn read(&mut self, into: &mut [u8]) -> io::Result<usize> {
        let res = self.inner.read(into);
        if let Err(ref e) = res {
            // `io::copy` retries interrupted reads.
            if e.kind() != io::ErrorKind::Interrupted {
                self.failed = true;
            }
        }
        res
    }
}

/// Writes each stored chunk at its offset and extends `f` to `size`, leaving
/// holes unwritten. Returns whether all stored data was present.
fn copy_sparse<T: Read>(
    src: &mut T,
    f: &mut fs::File,
    chunks: &[Chunk],
    size: u64,
) -> io::Result<bool> {
    for &(offset, length) in chunks {
        f.seek(io::SeekFrom::Start(offset))?;
        if io::copy(&mut src.by_ref().take(length), f)? != length {
            return Ok(false);
        }
    }
    f.set_len(size)?;
    Ok(true)
}

#[cfg(unix)]
fn create_dir(dst: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().mode(mode & 0o777).create(dst)
}

#[cfg(not(unix))]
fn create_dir(dst: &Path, _mode: u32) -> io::Result<()> {
    fs::create_dir(dst)
}

// An existing symlink at `dst` is never followed; writing through it could
// escape the volume.
#[cfg(unix)]
fn open_file(dst: &Path, mode: u32) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode & 0o777)
        .custom_flags(libc::O_NOFOLLOW)
        .open(dst)
}

#[cfg(not(unix))]
fn open_file(dst: &Path, _mode: u32) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)
}
