use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::str;

use crate::other;
use crate::sparse::{self, Chunk};

// Keywords for PAX extended header records.
pub const PAX_PATH: &str = "path";
pub const PAX_LINKPATH: &str = "linkpath";
pub const PAX_SIZE: &str = "size";
pub const PAX_UID: &str = "uid";
pub const PAX_GID: &str = "gid";
pub const PAX_MTIME: &str = "mtime";

pub const PAX_SCHILYXATTR: &str = "SCHILY.xattr.";

// Keywords for GNU sparse files in a PAX extended header.
pub const PAX_GNUSPARSENUMBLOCKS: &str = "GNU.sparse.numblocks";
pub const PAX_GNUSPARSEOFFSET: &str = "GNU.sparse.offset";
pub const PAX_GNUSPARSENUMBYTES: &str = "GNU.sparse.numbytes";
pub const PAX_GNUSPARSEMAP: &str = "GNU.sparse.map";
pub const PAX_GNUSPARSENAME: &str = "GNU.sparse.name";
pub const PAX_GNUSPARSEMAJOR: &str = "GNU.sparse.major";
pub const PAX_GNUSPARSEMINOR: &str = "GNU.sparse.minor";
pub const PAX_GNUSPARSESIZE: &str = "GNU.sparse.size";
pub const PAX_GNUSPARSEREALSIZE: &str = "GNU.sparse.realsize";

/// An iterator over the pax extensions in an archive entry.
///
/// This iterator yields structures which can themselves be parsed into
/// key/value pairs.
pub struct PaxExtensions<'entry> {
    data: &'entry [u8],
}

impl<'entry> PaxExtensions<'entry> {
    /// Create new pax extensions iterator from the given entry data.
    pub fn new(a: &'entry [u8]) -> Self {
        PaxExtensions { data: a }
    }
}

/// A key/value pair corresponding to a pax extension.
pub struct PaxExtension<'entry> {
    key: &'entry [u8],
    value: &'entry [u8],
}

impl<'entry> Iterator for PaxExtensions<'entry> {
    type Item = io::Result<PaxExtension<'entry>>;

    // Records look like "%d %s=%s\n" where the leading decimal is the length of
    // the whole record. Values may carry raw bytes, newlines included, so the
    // length is what delimits records rather than the trailing newline.
    fn next(&mut self) -> Option<io::Result<PaxExtension<'entry>>> {
        if self.data.is_empty() {
            return None;
        }

        let record = self
            .data
            .iter()
            .position(|b| *b == b' ')
            .and_then(|i| {
                str::from_utf8(&self.data[..i])
                    .ok()
                    .and_then(|len| len.parse::<usize>().ok())
                    .map(|len| (i + 1, len))
            })
            .filter(|&(kvstart, len)| len > kvstart && len <= self.data.len())
            .and_then(|(kvstart, len)| {
                let line = &self.data[..len];
                if line[len - 1] != b'\n' {
                    return None;
                }
                let kv = &line[kvstart..len - 1];
                kv.iter().position(|b| *b == b'=').map(|equals| {
                    let ext = PaxExtension {
                        key: &kv[..equals],
                        value: &kv[equals + 1..],
                    };
                    (ext, len)
                })
            });

        match record {
            Some((ext, len)) => {
                self.data = &self.data[len..];
                Some(Ok(ext))
            }
            None => {
                self.data = &[];
                Some(Err(other("malformed pax extension")))
            }
        }
    }
}

impl<'entry> PaxExtension<'entry> {
    /// Returns the key for this key/value pair parsed as a string.
    ///
    /// May fail if the key isn't actually utf-8.
    pub fn key(&self) -> Result<&'entry str, str::Utf8Error> {
        str::from_utf8(self.key)
    }

    /// Returns the underlying raw bytes for the key of this key/value pair.
    pub fn key_bytes(&self) -> &'entry [u8] {
        self.key
    }

    /// Returns the value for this key/value pair parsed as a string.
    ///
    /// May fail if the value isn't actually utf-8.
    pub fn value(&self) -> Result<&'entry str, str::Utf8Error> {
        str::from_utf8(self.value)
    }

    /// Returns the underlying raw bytes for this value of this key/value pair.
    pub fn value_bytes(&self) -> &'entry [u8] {
        self.value
    }
}

/// The subset of pax records that override header fields of an entry.
///
/// Local (`x`) records apply to the next entry only; global (`g`) records
/// apply to every entry that follows, with local records taking precedence.
#[derive(Clone, Debug, Default)]
pub(crate) struct PaxFields {
    pub path: Option<Vec<u8>>,
    pub link_path: Option<Vec<u8>>,
    pub size: Option<u64>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub mtime: Option<u64>,
    pub xattrs: HashMap<OsString, Vec<u8>>,
    pub sparse: PaxSparse,
}

/// The `GNU.sparse.*` records of an extended header.
#[derive(Clone, Debug, Default)]
pub(crate) struct PaxSparse {
    pub major: Option<u64>,
    pub minor: Option<u64>,
    pub name: Option<Vec<u8>>,
    pub real_size: Option<u64>,
    pub num_blocks: Option<u64>,
    pub map: Option<Vec<u64>>,
}

/// Where a pax sparse entry keeps its map.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SparseLayout {
    /// Formats 0.0 and 0.1 list the map in the pax records.
    Records(Vec<Chunk>),
    /// Format 1.0 stores the map in front of the entry data.
    InData,
}

impl PaxSparse {
    /// Identifies the sparse format, if any. Unknown versions are treated as
    /// ordinary files.
    pub fn layout(&self) -> io::Result<Option<SparseLayout>> {
        match (self.major, self.minor) {
            (Some(1), Some(0)) => Ok(Some(SparseLayout::InData)),
            (Some(0), Some(0 | 1)) => self.records().map(Some),
            (Some(_), _) | (_, Some(_)) => Ok(None),
            // 0.0 and 0.1 had no version records; a map is the tell.
            (None, None) if self.map.is_some() => self.records().map(Some),
            (None, None) => Ok(None),
        }
    }

    fn records(&self) -> io::Result<SparseLayout> {
        let map = self.map.as_deref().unwrap_or_default();
        if let Some(n) = self.num_blocks {
            if n.checked_mul(2) != Some(map.len() as u64) {
                return Err(other("sparse map does not match `GNU.sparse.numblocks`"));
            }
        }
        sparse::pair_up(map).map(SparseLayout::Records)
    }
}

impl PaxFields {
    /// Folds every record of an extended header into this set.
    pub fn merge(&mut self, data: &[u8]) -> io::Result<()> {
        for extension in PaxExtensions::new(data) {
            let extension = extension?;
            let key = extension.key().map_err(|_| other("pax key is not utf-8"))?;
            let value = extension.value_bytes();
            match key {
                PAX_PATH => self.path = Some(value.to_vec()),
                PAX_LINKPATH => self.link_path = Some(value.to_vec()),
                PAX_SIZE => self.size = Some(parse_decimal(key, value)?),
                PAX_UID => self.uid = Some(parse_decimal(key, value)?),
                PAX_GID => self.gid = Some(parse_decimal(key, value)?),
                PAX_MTIME => self.mtime = Some(parse_seconds(value)?),
                PAX_GNUSPARSEMAJOR => self.sparse.major = Some(parse_decimal(key, value)?),
                PAX_GNUSPARSEMINOR => self.sparse.minor = Some(parse_decimal(key, value)?),
                PAX_GNUSPARSENAME => self.sparse.name = Some(value.to_vec()),
                PAX_GNUSPARSESIZE | PAX_GNUSPARSEREALSIZE => {
                    self.sparse.real_size = Some(parse_decimal(key, value)?)
                }
                PAX_GNUSPARSENUMBLOCKS => {
                    self.sparse.num_blocks = Some(parse_decimal(key, value)?)
                }
                // Format 0.0 repeats these two records once per chunk.
                PAX_GNUSPARSEOFFSET | PAX_GNUSPARSENUMBYTES => self
                    .sparse
                    .map
                    .get_or_insert_with(Vec::new)
                    .push(parse_decimal(key, value)?),
                PAX_GNUSPARSEMAP => {
                    let map = self.sparse.map.get_or_insert_with(Vec::new);
                    let value = str::from_utf8(value).map_err(|_| other("pax sparse map is not utf-8"))?;
                    for field in value.split(',').filter(|f| !f.is_empty()) {
                        map.push(parse_decimal(key, field.as_bytes())?);
                    }
                }
                _ => {
                    if let Some(name) = key.strip_prefix(PAX_SCHILYXATTR) {
                        self.xattrs.insert(name.into(), value.to_vec());
                    }
                }
            }
        }
        Ok(())
    }

    /// Layers `local` on top of these (global) fields.
    ///
    /// Sparse records describe a single file and are only taken from `local`.
    pub fn overlay(&self, local: PaxFields) -> PaxFields {
        let mut xattrs = self.xattrs.clone();
        xattrs.extend(local.xattrs);
        PaxFields {
            path: local.path.or_else(|| self.path.clone()),
            link_path: local.link_path.or_else(|| self.link_path.clone()),
            size: local.size.or(self.size),
            uid: local.uid.or(self.uid),
            gid: local.gid.or(self.gid),
            mtime: local.mtime.or(self.mtime),
            xattrs,
            sparse: local.sparse,
        }
    }
}

fn parse_decimal(key: &str, value: &[u8]) -> io::Result<u64> {
    str::from_utf8(value)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| other(&format!("pax record `{}` is not a valid number", key)))
}

// Timestamps may carry a fractional part ("1350244992.023960108"); only whole
// seconds are kept.
fn parse_seconds(value: &[u8]) -> io::Result<u64> {
    let value = str::from_utf8(value).map_err(|_| other("pax mtime is not utf-8"))?;
    let whole = value.split('.').next().unwrap_or_default();
    whole
        .parse::<u64>()
        .map_err(|_| other("pax record `mtime` is not a valid timestamp"))
}
