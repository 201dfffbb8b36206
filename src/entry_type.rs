// See https://en.wikipedia.org/wiki/Tar_%28computing%29#UStar_format
/// Indicate for the type of file described by a header.
///
/// Each `Header` has an `entry_type` method returning an instance of this type
/// which can be used to inspect what the header is describing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntryType {
    /// Regular file
    Regular,
    /// Hard link
    Link,
    /// Symbolic link
    Symlink,
    /// Character device
    Char,
    /// Block device
    Block,
    /// Directory
    Directory,
    /// Named pipe (fifo)
    Fifo,
    /// Implementation-defined 'high-performance' type, treated as regular file
    Continuous,
    /// GNU extension - long file name
    GNULongName,
    /// GNU extension - long link name (link target)
    GNULongLink,
    /// GNU extension - sparse file
    GNUSparse,
    /// Global extended header
    XGlobalHeader,
    /// Extended Header
    XHeader,
    /// Unknown header
    Other(u8),
}

/// What has to be created on disk for an entry.
///
/// The set is closed: every type flag the format defines maps onto exactly one
/// of these.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntryKind {
    /// A symbolic link pointing at the entry's link name.
    Symlink,
    /// A directory.
    Directory,
    /// A regular file holding the entry's payload. Special files (devices,
    /// fifos, hard links) are flattened into regular files as well.
    FileOrSpecial,
}

impl EntryType {
    /// Creates a new entry type from a raw byte.
    pub fn new(byte: u8) -> EntryType {
        match byte {
            b'\x00' | b'0' => EntryType::Regular,
            b'1' => EntryType::Link,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::Char,
            b'4' => EntryType::Block,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            b'7' => EntryType::Continuous,
            b'x' => EntryType::XHeader,
            b'g' => EntryType::XGlobalHeader,
            b'L' => EntryType::GNULongName,
            b'K' => EntryType::GNULongLink,
            b'S' => EntryType::GNUSparse,
            b => EntryType::Other(b),
        }
    }

    /// Returns the raw underlying byte that this entry type represents.
    pub fn as_byte(&self) -> u8 {
        match *self {
            EntryType::Regular => b'0',
            EntryType::Link => b'1',
            EntryType::Symlink => b'2',
            EntryType::Char => b'3',
            EntryType::Block => b'4',
            EntryType::Directory => b'5',
            EntryType::Fifo => b'6',
            EntryType::Continuous => b'7',
            EntryType::XHeader => b'x',
            EntryType::XGlobalHeader => b'g',
            EntryType::GNULongName => b'L',
            EntryType::GNULongLink => b'K',
            EntryType::GNUSparse => b'S',
            EntryType::Other(other) => other,
        }
    }

    /// Returns whether this type is a metadata record describing the entry
    /// that follows it rather than a filesystem object of its own.
    pub fn is_metadata(&self) -> bool {
        matches!(
            *self,
            EntryType::GNULongName
                | EntryType::GNULongLink
                | EntryType::XHeader
                | EntryType::XGlobalHeader
        )
    }
}

/// File type bits of a mode word, as laid out by `stat(2)`.
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

impl EntryKind {
    /// Decides which filesystem operation an entry requires.
    ///
    /// The type flag wins when it names a symlink or a directory. Otherwise
    /// the file type bits some writers leave in the mode field are honored,
    /// and everything else lands in `FileOrSpecial`: a POSIX-compliant
    /// implementation must treat any unrecognized typeflag value as a regular
    /// file.
    pub fn classify(entry_type: EntryType, mode: u32) -> EntryKind {
        match entry_type {
            EntryType::Symlink => EntryKind::Symlink,
            EntryType::Directory => EntryKind::Directory,
            _ => match mode & S_IFMT {
                S_IFDIR => EntryKind::Directory,
                S_IFLNK => EntryKind::Symlink,
                _ => EntryKind::FileOrSpecial,
            },
        }
    }
}
