//! Seed storage volumes from uploaded TAR streams.
//!
//! This library decodes a TAR archive [1] from any reader and reproduces it
//! inside an existing directory (a "volume"), restoring permission bits,
//! numeric ownership and extended attributes as recorded in the archive.
//! Entries are processed strictly in stream order and payloads are copied
//! straight from the reader to disk, so an upload never needs to be resident
//! in memory all at once.
//!
//! The [`server`] module wraps the extraction engine in a small HTTP service
//! that authenticates uploads with a shared secret.
//!
//! [1]: http://en.wikipedia.org/wiki/Tar_%28computing%29

#![deny(missing_docs)]

use std::borrow::Cow;
use std::io::{Error, ErrorKind};
use std::path::Path;

pub use crate::archive::{Archive, Entries};
pub use crate::entry::Entry;
pub use crate::entry_type::{EntryKind, EntryType};
pub use crate::error::ExtractError;
pub use crate::extract::{populate_volume, unpack, AttrPolicy, ExtractOptions, ExtractSummary};
pub use crate::header::Header;
pub use crate::normalize::rename_single_file;
pub use crate::pax::{PaxExtension, PaxExtensions};

mod archive;
mod attrs;
pub mod config;
mod entry;
mod entry_type;
mod error;
mod extract;
mod header;
mod normalize;
mod pax;
mod sparse;
pub mod server;

fn other(msg: &str) -> Error {
    Error::new(ErrorKind::InvalidData, msg)
}

#[cfg(unix)]
fn bytes2path(bytes: &[u8]) -> std::io::Result<Cow<'_, Path>> {
    use std::ffi::OsStr;
    use std::os::unix::prelude::*;

    Ok(Cow::Borrowed(Path::new(OsStr::from_bytes(bytes))))
}

#[cfg(not(unix))]
fn bytes2path(bytes: &[u8]) -> std::io::Result<Cow<'_, Path>> {
    std::str::from_utf8(bytes)
        .map(|s| Cow::Borrowed(Path::new(s)))
        .map_err(|_| other("only unicode paths are supported on this platform"))
}
