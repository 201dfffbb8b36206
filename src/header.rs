use std::borrow::Cow;
use std::fmt;
use std::io;
use std::mem;
use std::path::Path;
use std::str;

use crate::{bytes2path, other, EntryType};

/// Representation of the header of an entry in an archive.
///
/// This is a read-only view over one 512-byte block. The same layout covers
/// the old (v7), UStar and GNU flavors; the `magic` and `version` fields tell
/// them apart.
#[repr(C)]
#[allow(missing_docs)]
pub struct Header {
    pub name: [u8; 100],
    pub mode: [u8; 8],
    pub owner_id: [u8; 8],
    pub group_id: [u8; 8],
    pub size: [u8; 12],
    pub mtime: [u8; 12],
    pub cksum: [u8; 8],
    pub link: [u8; 1],
    pub linkname: [u8; 100],

    // UStar and GNU formats
    pub magic: [u8; 6],
    pub version: [u8; 2],
    pub owner_name: [u8; 32],
    pub group_name: [u8; 32],
    pub dev_major: [u8; 8],
    pub dev_minor: [u8; 8],
    pub prefix: [u8; 155],
    _rest: [u8; 12],
}

const _: () = assert!(mem::size_of::<Header>() == 512);

impl Header {
    /// Creates a header with every byte zeroed, ready to be filled from a
    /// stream with `as_mut_bytes`.
    pub fn new() -> Header {
        Header::from_bytes(&[0; 512])
    }

    /// Creates a header from a raw block.
    pub fn from_bytes(bytes: &[u8; 512]) -> Header {
        let mut header = Header {
            name: [0; 100],
            mode: [0; 8],
            owner_id: [0; 8],
            group_id: [0; 8],
            size: [0; 12],
            mtime: [0; 12],
            cksum: [0; 8],
            link: [0; 1],
            linkname: [0; 100],
            magic: [0; 6],
            version: [0; 2],
            owner_name: [0; 32],
            group_name: [0; 32],
            dev_major: [0; 8],
            dev_minor: [0; 8],
            prefix: [0; 155],
            _rest: [0; 12],
        };
        header.as_mut_bytes().copy_from_slice(bytes);
        header
    }

    /// Returns a view into this header as a byte array.
    pub fn as_bytes(&self) -> &[u8; 512] {
        // SAFETY: `Header` is `repr(C)`, consists only of byte arrays and is
        // exactly 512 bytes long.
        unsafe { &*(self as *const Header as *const [u8; 512]) }
    }

    /// Returns a mutable view into this header as a byte array.
    pub fn as_mut_bytes(&mut self) -> &mut [u8; 512] {
        // SAFETY: see `as_bytes`.
        unsafe { &mut *(self as *mut Header as *mut [u8; 512]) }
    }

    /// Returns whether every byte of this block is zero, which marks the end
    /// of an archive.
    pub fn is_zero(&self) -> bool {
        self.as_bytes().iter().all(|b| *b == 0)
    }

    /// Returns whether this is a POSIX UStar header.
    pub fn is_ustar(&self) -> bool {
        self.magic == *b"ustar\0" && self.version == *b"00"
    }

    /// Returns whether this is a GNU header.
    pub fn is_gnu(&self) -> bool {
        self.magic == *b"ustar " && self.version == *b" \0"
    }

    /// Returns the pathname stored in this header as a byte array.
    ///
    /// For UStar headers the `prefix` field is joined in front of the name.
    /// GNU headers reuse that area for other metadata, so it is ignored there.
    pub fn path_bytes(&self) -> Cow<'_, [u8]> {
        let prefix = truncate(&self.prefix);
        if !self.is_ustar() || prefix.is_empty() {
            Cow::Borrowed(truncate(&self.name))
        } else {
            let mut bytes = prefix.to_vec();
            bytes.push(b'/');
            bytes.extend_from_slice(truncate(&self.name));
            Cow::Owned(bytes)
        }
    }

    /// Returns the pathname stored in this header.
    ///
    /// This method may fail if the pathname is not valid unicode and this is
    /// called on a platform without byte paths.
    pub fn path(&self) -> io::Result<Cow<'_, Path>> {
        match self.path_bytes() {
            Cow::Borrowed(bytes) => bytes2path(bytes),
            Cow::Owned(bytes) => bytes2path(&bytes).map(|p| Cow::Owned(p.into_owned())),
        }
    }

    /// Returns the link name stored in this header as a byte array, if any.
    pub fn link_name_bytes(&self) -> Option<&[u8]> {
        match truncate(&self.linkname) {
            [] => None,
            bytes => Some(bytes),
        }
    }

    /// Returns the mode bits for this file.
    ///
    /// May return an error if the field is corrupted.
    pub fn mode(&self) -> io::Result<u32> {
        num_field(&self.mode, "mode").map(|u| u as u32)
    }

    /// Returns the value of the owner's user ID field.
    pub fn uid(&self) -> io::Result<u64> {
        num_field(&self.owner_id, "uid")
    }

    /// Returns the value of the group's user ID field.
    pub fn gid(&self) -> io::Result<u64> {
        num_field(&self.group_id, "gid")
    }

    /// Returns the file size this header represents.
    pub fn size(&self) -> io::Result<u64> {
        num_field(&self.size, "size")
    }

    /// Returns the last modification time in Unix time format.
    pub fn mtime(&self) -> io::Result<u64> {
        num_field(&self.mtime, "mtime")
    }

    /// Returns the checksum field of this header.
    pub fn cksum(&self) -> io::Result<u32> {
        num_field(&self.cksum, "checksum").map(|u| u as u32)
    }

    /// Returns the type of file described by this header.
    pub fn entry_type(&self) -> EntryType {
        EntryType::new(self.link[0])
    }

    /// Returns whether the checksum field matches the block contents.
    ///
    /// The checksum is the sum of all header bytes with the checksum field
    /// itself taken as spaces. Some historic writers summed signed bytes, so
    /// both interpretations are accepted.
    pub fn verify_cksum(&self) -> io::Result<()> {
        let expected = self.cksum()?;
        let bytes = self.as_bytes();
        let rest = bytes[..148].iter().chain(&bytes[156..]);
        let unsigned = rest.clone().fold(8 * 32, |a, b| a + u32::from(*b));
        let signed = rest.fold(8 * 32, |a, b| a + i64::from(*b as i8));
        if expected == unsigned || i64::from(expected) == signed {
            Ok(())
        } else {
            Err(other("archive header checksum mismatch"))
        }
    }
}

impl Default for Header {
    fn default() -> Header {
        Header::new()
    }
}

impl Clone for Header {
    fn clone(&self) -> Header {
        Header::from_bytes(self.as_bytes())
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Header")
            .field("path", &String::from_utf8_lossy(&self.path_bytes()))
            .field("entry_type", &self.entry_type())
            .field("mode", &self.mode().ok())
            .field("uid", &self.uid().ok())
            .field("gid", &self.gid().ok())
            .field("size", &self.size().ok())
            .finish()
    }
}

/// Decodes a numeric header field.
///
/// Fields are normally NUL or space terminated octal. GNU tar switches to a
/// big-endian base-256 encoding, flagged by the high bit of the first byte,
/// once a value no longer fits.
pub(crate) fn num_field(src: &[u8], what: &str) -> io::Result<u64> {
    if src.first().is_some_and(|b| b & 0x80 != 0) {
        return base256_from(src)
            .ok_or_else(|| other(&format!("numeric field `{}` overflows", what)));
    }
    octal_from(src).map_err(|_| {
        other(&format!(
            "numeric field `{}` is not valid octal: {:?}",
            what,
            String::from_utf8_lossy(truncate(src))
        ))
    })
}

fn octal_from(slice: &[u8]) -> io::Result<u64> {
    let trun = truncate(slice);
    let num = str::from_utf8(trun).map_err(|_| other("non-utf8 numeric field"))?;
    let num = num.trim_matches(|c| c == ' ' || c == '\0');
    if num.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(num, 8).map_err(|_| other("invalid octal digit"))
}

fn base256_from(slice: &[u8]) -> Option<u64> {
    // A set second-highest bit means a negative number, which makes no sense
    // for any field we read.
    if slice[0] & 0x40 != 0 {
        return None;
    }
    let mut value = u64::from(slice[0] & 0x3f);
    for b in &slice[1..] {
        value = value.checked_mul(256)?.checked_add(u64::from(*b))?;
    }
    Some(value)
}

fn truncate(slice: &[u8]) -> &[u8] {
    match slice.iter().position(|i| *i == 0) {
        Some(i) => &slice[..i],
        None => slice,
    }
}
