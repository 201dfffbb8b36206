//! GNU sparse files.
//!
//! A sparse entry stores only the data regions of a file. A map lists where
//! each stored chunk belongs in the expanded file; everything in between is a
//! hole that reads back as zeros. The map comes in three flavors: inside an
//! old-style GNU header (`S` type flag) plus extension blocks, as pax records
//! (formats 0.0 and 0.1), or in front of the entry data (format 1.0).

use std::cmp;
use std::io;
use std::io::prelude::*;
use std::str;

use crate::archive::MAX_METADATA_SIZE;
use crate::header::num_field;
use crate::{other, Header};

/// A stored run of data: its offset in the expanded file and its length.
pub(crate) type Chunk = (u64, u64);

// Layout of the old-style GNU header: four 24-byte descriptors (12-byte
// offset, 12-byte length), the extension flag and the real file size.
const GNU_SPARSE: usize = 386;
const GNU_SPARSE_ENTRIES: usize = 4;
const GNU_IS_EXTENDED: usize = 482;
const GNU_REAL_SIZE: usize = 483;

// Extension blocks hold 21 more descriptors followed by their own flag.
const EXT_SPARSE_ENTRIES: usize = 21;
const EXT_IS_EXTENDED: usize = 504;

const DESCRIPTOR: usize = 24;

/// Reads the descriptors of an old-style GNU sparse header. Returns whether
/// an extension block follows.
pub(crate) fn gnu_header_chunks(header: &Header, chunks: &mut Vec<Chunk>) -> io::Result<bool> {
    if !header.is_gnu() {
        return Err(other("sparse entry without a GNU header"));
    }
    descriptors(
        header.as_bytes(),
        GNU_SPARSE,
        GNU_SPARSE_ENTRIES,
        GNU_IS_EXTENDED,
        chunks,
    )
}

/// Reads the descriptors of a sparse extension block. Returns whether yet
/// another extension block follows.
pub(crate) fn gnu_extension_chunks(block: &[u8; 512], chunks: &mut Vec<Chunk>) -> io::Result<bool> {
    descriptors(block, 0, EXT_SPARSE_ENTRIES, EXT_IS_EXTENDED, chunks)
}

/// Returns the expanded size recorded in an old-style GNU sparse header.
pub(crate) fn gnu_real_size(header: &Header) -> io::Result<u64> {
    num_field(
        &header.as_bytes()[GNU_REAL_SIZE..GNU_REAL_SIZE + 12],
        "realsize",
    )
}

fn descriptors(
    block: &[u8; 512],
    start: usize,
    count: usize,
    extended_at: usize,
    chunks: &mut Vec<Chunk>,
) -> io::Result<bool> {
    for i in 0..count {
        let at = start + i * DESCRIPTOR;
        let descriptor = &block[at..at + DESCRIPTOR];
        // An empty offset ends the list, as GNU tar reads it.
        if descriptor[0] == 0 {
            break;
        }
        let offset = num_field(&descriptor[..12], "sparse offset")?;
        let length = num_field(&descriptor[12..], "sparse length")?;
        chunks.push((offset, length));
    }
    Ok(block[extended_at] != 0)
}

/// Parses the flat `offset,length,...` list of pax sparse formats 0.0 and
/// 0.1 into chunks.
pub(crate) fn pair_up(numbers: &[u64]) -> io::Result<Vec<Chunk>> {
    if numbers.len() % 2 != 0 {
        return Err(other("sparse map has an odd number of fields"));
    }
    Ok(numbers.chunks_exact(2).map(|p| (p[0], p[1])).collect())
}

/// Reads the map a pax 1.0 sparse entry stores in front of its data.
///
/// The map is a newline separated list of decimals: the number of chunks,
/// then an offset and a length per chunk, padded to a whole block. Returns
/// the chunks and the number of bytes the map occupies.
pub(crate) fn read_data_map<R: Read>(r: &mut R) -> io::Result<(Vec<Chunk>, u64)> {
    let mut buf = Vec::new();
    let mut numbers = Vec::new();
    let mut wanted = 1;
    let mut start = 0;
    while numbers.len() < wanted {
        match buf[start..].iter().position(|b| *b == b'\n') {
            Some(i) => {
                let n = decimal(&buf[start..start + i])?;
                start += i + 1;
                if numbers.is_empty() {
                    // Every chunk takes at least four bytes ("0\n0\n").
                    if n > MAX_METADATA_SIZE / 4 {
                        return Err(other("sparse map lists too many chunks"));
                    }
                    wanted = 1 + 2 * n as usize;
                }
                numbers.push(n);
            }
            None => {
                if buf.len() as u64 >= MAX_METADATA_SIZE {
                    return Err(other("sparse map exceeds 1 MiB"));
                }
                let len = buf.len();
                buf.resize(len + 512, 0);
                r.read_exact(&mut buf[len..]).map_err(|e| {
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        io::Error::new(e.kind(), "unexpected EOF in sparse map")
                    } else {
                        e
                    }
                })?;
            }
        }
    }
    Ok((pair_up(&numbers[1..])?, buf.len() as u64))
}

fn decimal(token: &[u8]) -> io::Result<u64> {
    str::from_utf8(token)
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| other("sparse map holds an invalid number"))
}

/// Checks that `chunks` are ordered, do not overlap, fit in a file of
/// `size` bytes and account for exactly the `stored` bytes in the archive.
pub(crate) fn validate(chunks: &[Chunk], size: u64, stored: u64) -> io::Result<()> {
    let mut end = 0;
    let mut total = 0;
    for &(offset, length) in chunks {
        let chunk_end = offset
            .checked_add(length)
            .ok_or_else(|| other("sparse chunk overflows"))?;
        if offset < end || chunk_end > size {
            return Err(other("sparse map is out of order or exceeds the file size"));
        }
        end = chunk_end;
        total += length;
    }
    if total != stored {
        return Err(other("sparse map does not match the stored data"));
    }
    Ok(())
}

/// Expands a sparse entry while it is read: stored chunks are passed
/// through and holes come out as zeros.
pub(crate) struct SparseReader {
    chunks: Vec<Chunk>,
    next: usize,
    pos: u64,
    size: u64,
}

impl SparseReader {
    /// `chunks` must have passed [`validate`] against `size`.
    pub fn new(chunks: Vec<Chunk>, size: u64) -> SparseReader {
        SparseReader {
            chunks,
            next: 0,
            pos: 0,
            size,
        }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Reads expanded bytes into `into`, pulling stored bytes from `data`.
    pub fn read_from<R: Read>(&mut self, data: &mut R, into: &mut [u8]) -> io::Result<usize> {
        if into.is_empty() || self.pos >= self.size {
            return Ok(0);
        }
        while let Some(&(offset, length)) = self.chunks.get(self.next) {
            if self.pos < offset + length {
                break;
            }
            self.next += 1;
        }
        let (data_start, data_end) = match self.chunks.get(self.next) {
            Some(&(offset, length)) => (offset, offset + length),
            None => (self.size, self.size),
        };

        let n = if self.pos < data_start {
            let n = cmp::min(data_start - self.pos, into.len() as u64) as usize;
            into[..n].fill(0);
            n
        } else {
            let max = cmp::min(data_end - self.pos, into.len() as u64) as usize;
            let n = data.read(&mut into[..max])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected EOF in sparse entry data",
                ));
            }
            n
        };
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_block(text: &str) -> Vec<u8> {
        let mut block = text.as_bytes().to_vec();
        block.resize(512 * block.len().div_ceil(512), 0);
        block
    }

    #[test]
    fn data_map() {
        let mut data = map_block("2\n4096\n6\n12192\n6\n");
        data.extend_from_slice(b"hello\nworld\n");
        let mut r = &data[..];
        let (chunks, consumed) = read_data_map(&mut r).unwrap();
        assert_eq!(chunks, vec![(4096, 6), (12192, 6)]);
        assert_eq!(consumed, 512);
        assert_eq!(r, b"hello\nworld\n");
    }

    #[test]
    fn data_map_spanning_blocks() {
        let mut text = String::from("100\n");
        for i in 0..100 {
            text.push_str(&format!("{}\n1\n", i * 1000));
        }
        let data = map_block(&text);
        let (chunks, consumed) = read_data_map(&mut &data[..]).unwrap();
        assert_eq!(chunks.len(), 100);
        assert_eq!(chunks[99], (99_000, 1));
        assert_eq!(consumed, data.len() as u64);
        assert!(consumed > 512);
    }

    #[test]
    fn bad_data_maps() {
        assert!(read_data_map(&mut &map_block("1\n-4\n2\n")[..]).is_err());
        assert!(read_data_map(&mut &map_block("1\n4\n")[..]).is_err());
        assert!(read_data_map(&mut &map_block("99999999999999\n")[..]).is_err());
        assert!(read_data_map(&mut &b"2\n"[..]).is_err());
    }

    #[test]
    fn validation() {
        assert!(validate(&[(0, 5), (10, 5)], 20, 10).is_ok());
        assert!(validate(&[(0, 5), (20, 0)], 20, 5).is_ok());
        assert!(validate(&[(10, 5), (0, 5)], 20, 10).is_err());
        assert!(validate(&[(0, 5), (4, 5)], 20, 10).is_err());
        assert!(validate(&[(0, 5), (18, 5)], 20, 10).is_err());
        assert!(validate(&[(0, 5)], 20, 6).is_err());
        assert!(validate(&[(u64::MAX, 5)], u64::MAX, 5).is_err());
    }

    #[test]
    fn reader_fills_holes() {
        let stored = b"abcxy";
        let mut sparse = SparseReader::new(vec![(2, 3), (8, 2)], 12);
        let mut data = &stored[..];
        let mut out = Vec::new();
        let mut buf = [0xffu8; 3];
        loop {
            let n = sparse.read_from(&mut data, &mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"\0\0abc\0\0\0xy\0\0");
    }

    #[test]
    fn reader_reports_missing_data() {
        let mut sparse = SparseReader::new(vec![(0, 4)], 4);
        let mut buf = [0u8; 4];
        let err = sparse.read_from(&mut &b""[..], &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
