use std::cell::{Cell, RefCell};
use std::cmp;
use std::io;
use std::io::prelude::*;

use crate::entry::{Entry, EntryFields};
use crate::other;
use crate::pax::{PaxFields, SparseLayout};
use crate::sparse::{self, SparseReader};
use crate::{EntryType, Header};

/// Upper bound on GNU long name and pax records, and on sparse maps, which
/// are buffered whole.
pub(crate) const MAX_METADATA_SIZE: u64 = 1 << 20;

/// A top-level representation of an archive file.
///
/// The archive is consumed front to back; entries can only be visited once
/// and in stream order.
pub struct Archive<R: Read> {
    inner: ArchiveInner<R>,
}

pub(crate) struct ArchiveInner<R> {
    pos: Cell<u64>,
    obj: RefCell<R>,
}

/// An iterator over the entries of an archive.
///
/// Metadata records (GNU long names, pax headers) are folded into the entry
/// they describe and never yielded on their own.
pub struct Entries<'a, R: Read> {
    archive: &'a Archive<R>,
    next: u64,
    done: bool,
    global: PaxFields,
}

impl<R: Read> Archive<R> {
    /// Create a new archive with the underlying object as the reader.
    pub fn new(obj: R) -> Archive<R> {
        Archive {
            inner: ArchiveInner {
                obj: RefCell::new(obj),
                pos: Cell::new(0),
            },
        }
    }

    /// Unwrap this archive, returning the underlying object.
    pub fn into_inner(self) -> R {
        self.inner.obj.into_inner()
    }

    /// Construct an iterator over the entries in this archive.
    ///
    /// Note that care must be taken to consider each entry within an archive in
    /// sequence. If entries are processed out of sequence (from what the
    /// iterator returns), then the contents read for each entry may be
    /// corrupted.
    pub fn entries(&mut self) -> io::Result<Entries<'_, R>> {
        if self.inner.pos.get() != 0 {
            return Err(other(
                "cannot call entries unless archive is at position 0",
            ));
        }
        Ok(Entries {
            archive: self,
            done: false,
            next: 0,
            global: PaxFields::default(),
        })
    }

    fn skip(&self, mut amt: u64) -> io::Result<()> {
        let mut buf = [0u8; 4096 * 8];
        while amt > 0 {
            let n = cmp::min(amt, buf.len() as u64);
            let n = (&self.inner).read(&mut buf[..n as usize])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected EOF during skip",
                ));
            }
            amt -= n as u64;
        }
        Ok(())
    }
}

impl<'a, R: Read> Iterator for Entries<'a, R> {
    type Item = io::Result<Entry<'a, R>>;

    fn next(&mut self) -> Option<io::Result<Entry<'a, R>>> {
        // If we hit a previous error, or we reached the end, we're done here
        if self.done {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a, R: Read> Entries<'a, R> {
    fn next_entry(&mut self) -> io::Result<Option<Entry<'a, R>>> {
        let mut long_pathname = None;
        let mut long_linkname = None;
        let mut local: Option<PaxFields> = None;

        loop {
            let header = match self.next_header()? {
                Some(header) => header,
                None if long_pathname.is_some() || long_linkname.is_some() || local.is_some() => {
                    return Err(other("archive ends with a dangling metadata record"));
                }
                None => return Ok(None),
            };

            match header.entry_type() {
                EntryType::GNULongName => {
                    long_pathname = Some(until_nul(self.read_metadata(&header)?));
                    continue;
                }
                EntryType::GNULongLink => {
                    long_linkname = Some(until_nul(self.read_metadata(&header)?));
                    continue;
                }
                EntryType::XHeader => {
                    let data = self.read_metadata(&header)?;
                    local.get_or_insert_with(PaxFields::default).merge(&data)?;
                    continue;
                }
                EntryType::XGlobalHeader => {
                    let data = self.read_metadata(&header)?;
                    self.global.merge(&data)?;
                    continue;
                }
                _ => {}
            }

            let mut pax = self.global.overlay(local.unwrap_or_default());
            let layout = pax.sparse.layout()?;
            if layout.is_some() {
                if let Some(name) = pax.sparse.name.take() {
                    pax.path = Some(name);
                }
            }
            let path = pax
                .path
                .or(long_pathname)
                .unwrap_or_else(|| header.path_bytes().into_owned());
            let link_name = pax
                .link_path
                .or(long_linkname)
                .or_else(|| header.link_name_bytes().map(|b| b.to_vec()));
            // Bytes of payload following the header in the archive, and the
            // size of the file they describe. Both differ only for sparse
            // entries.
            let mut stored = match pax.size {
                Some(size) => size,
                None => header.size()?,
            };
            let mut size = stored;

            let mut chunks = None;
            if header.entry_type() == EntryType::GNUSparse {
                chunks = Some(self.read_gnu_sparse_map(&header)?);
                size = sparse::gnu_real_size(&header)?;
            }
            match layout {
                Some(SparseLayout::Records(map)) => {
                    chunks = Some(map);
                    size = pax.sparse.real_size.unwrap_or(size);
                }
                Some(SparseLayout::InData) => {
                    let (map, consumed) =
                        sparse::read_data_map(&mut (&self.archive.inner).take(stored))?;
                    self.next = advance(self.next, consumed)?;
                    stored -= consumed;
                    chunks = Some(map);
                    size = pax.sparse.real_size.unwrap_or(size);
                }
                None => {}
            }
            if let Some(ref chunks) = chunks {
                sparse::validate(chunks, size, stored)?;
            }

            // Old-style archives mark directories with a trailing slash only.
            let mut entry_type = header.entry_type();
            if entry_type == EntryType::Regular && path.ends_with(b"/") {
                entry_type = EntryType::Directory;
            }

            let fields = EntryFields {
                entry_type,
                mode: header.mode()?,
                uid: match pax.uid {
                    Some(uid) => uid,
                    None => header.uid()?,
                },
                gid: match pax.gid {
                    Some(gid) => gid,
                    None => header.gid()?,
                },
                mtime: match pax.mtime {
                    Some(mtime) => mtime,
                    None => header.mtime()?,
                },
                size,
                path,
                link_name,
                xattrs: pax.xattrs,
                header,
            };

            // Store where the next entry is, rounding up by 512 bytes (the
            // size of a header);
            self.next = advance(self.next, round_up(stored)?)?;

            let archive = self.archive;
            let data = (&archive.inner).take(stored);
            let sparse = chunks.map(|chunks| SparseReader::new(chunks, size));
            return Ok(Some(Entry::new(fields, data, sparse)));
        }
    }

    fn next_header(&mut self) -> io::Result<Option<Header>> {
        // Seek to the start of the next header in the archive
        let delta = self
            .next
            .checked_sub(self.archive.inner.pos.get())
            .ok_or_else(|| other("archive read past the next header"))?;
        self.archive.skip(delta)?;

        let mut header = Header::new();
        if !read_block(&mut &self.archive.inner, header.as_mut_bytes())? {
            // A clean EOF on a block boundary is accepted as the end of the
            // archive, as GNU tar does for streams missing their trailer.
            return Ok(None);
        }
        self.next = advance(self.next, 512)?;

        // If we have an all 0 block, then this should be the start of the end
        // of the archive. A block of 0s is never valid as a header (because of
        // the checksum), so if it's all zero it must be the first of the two
        // end blocks
        if header.is_zero() {
            if !read_block(&mut &self.archive.inner, header.as_mut_bytes())? || header.is_zero() {
                return Ok(None);
            }
            return Err(other(
                "found block of 0s not followed by a second block of 0s",
            ));
        }

        header.verify_cksum()?;
        Ok(Some(header))
    }

    fn read_metadata(&mut self, header: &Header) -> io::Result<Vec<u8>> {
        let size = header.size()?;
        if size > MAX_METADATA_SIZE {
            return Err(other("metadata record exceeds 1 MiB"));
        }
        let mut data = Vec::with_capacity(size as usize);
        (&self.archive.inner).take(size).read_to_end(&mut data)?;
        if data.len() as u64 != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected EOF in metadata record",
            ));
        }
        self.next = advance(self.next, round_up(size)?)?;
        Ok(data)
    }

    // The old GNU sparse map starts in the header and continues in extension
    // blocks placed between the header and the data.
    fn read_gnu_sparse_map(&mut self, header: &Header) -> io::Result<Vec<sparse::Chunk>> {
        let mut chunks = Vec::new();
        let mut extended = sparse::gnu_header_chunks(header, &mut chunks)?;
        let mut read = 0;
        while extended {
            read += 512;
            if read > MAX_METADATA_SIZE {
                return Err(other("sparse map exceeds 1 MiB"));
            }
            let mut block = [0; 512];
            if !read_block(&mut &self.archive.inner, &mut block)? {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected EOF in sparse map",
                ));
            }
            self.next = advance(self.next, 512)?;
            extended = sparse::gnu_extension_chunks(&block, &mut chunks)?;
        }
        Ok(chunks)
    }
}

impl<R: Read> Read for &ArchiveInner<R> {
    fn read(&mut self, into: &mut [u8]) -> io::Result<usize> {
        self.obj.borrow_mut().read(into).map(|i| {
            self.pos.set(self.pos.get() + i as u64);
            i
        })
    }
}

fn round_up(size: u64) -> io::Result<u64> {
    size.checked_add(511)
        .map(|n| n & !(512 - 1))
        .ok_or_else(|| other("entry size overflows"))
}

fn advance(pos: u64, amt: u64) -> io::Result<u64> {
    pos.checked_add(amt)
        .ok_or_else(|| other("archive offset overflows"))
}

fn until_nul(mut bytes: Vec<u8>) -> Vec<u8> {
    if let Some(i) = bytes.iter().position(|b| *b == 0) {
        bytes.truncate(i);
    }
    bytes
}

/// Fills `buf` completely. Returns `Ok(false)` if the reader was already at
/// EOF, and an error if it ran dry part way through the block.
fn read_block<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        match r.read(&mut buf[read..]) {
            Ok(0) if read == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to read entire block",
                ))
            }
            Ok(n) => read += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
