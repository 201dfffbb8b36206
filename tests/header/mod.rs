use std::path::Path;

use volinit::{EntryType, Header};

fn decode(h: &tar::Header) -> Header {
    Header::from_bytes(h.as_bytes())
}

#[test]
fn gnu_fields() {
    let mut h = tar::Header::new_gnu();
    t!(h.set_path("foo/bar"));
    h.set_mode(0o4755);
    h.set_uid(1000);
    h.set_gid(100);
    h.set_size(42);
    h.set_mtime(1_700_000_000);
    h.set_entry_type(tar::EntryType::Regular);
    h.set_cksum();

    let h = decode(&h);
    assert!(h.is_gnu());
    assert!(!h.is_ustar());
    t!(h.verify_cksum());
    assert_eq!(t!(h.path()), Path::new("foo/bar"));
    assert_eq!(t!(h.mode()), 0o4755);
    assert_eq!(t!(h.uid()), 1000);
    assert_eq!(t!(h.gid()), 100);
    assert_eq!(t!(h.size()), 42);
    assert_eq!(t!(h.mtime()), 1_700_000_000);
    assert_eq!(h.entry_type(), EntryType::Regular);
    assert!(h.link_name_bytes().is_none());
}

#[test]
fn link_name() {
    let mut h = tar::Header::new_gnu();
    t!(h.set_path("foo"));
    t!(h.set_link_name("../bar/baz"));
    h.set_entry_type(tar::EntryType::Symlink);
    h.set_cksum();

    let h = decode(&h);
    assert_eq!(h.entry_type(), EntryType::Symlink);
    assert_eq!(h.link_name_bytes(), Some(&b"../bar/baz"[..]));
}

#[test]
fn ustar_prefix() {
    let long = format!("{}/{}", "a".repeat(120), "b".repeat(60));
    let mut h = tar::Header::new_ustar();
    t!(h.set_path(&long));
    h.set_cksum();

    let h = decode(&h);
    assert!(h.is_ustar());
    assert_eq!(&*h.path_bytes(), long.as_bytes());
}

#[test]
fn prefix_ignored_without_ustar_magic() {
    let mut h = tar::Header::new_gnu();
    t!(h.set_path("name"));
    // GNU headers keep other data where ustar has its prefix.
    h.as_gnu_mut().unwrap().atime[0] = b'x';
    h.set_cksum();

    let h = decode(&h);
    assert_eq!(&*h.path_bytes(), b"name");
}

#[test]
fn large_numbers() {
    let mut h = tar::Header::new_gnu();
    t!(h.set_path("big"));
    h.set_size(0o1_000_000_000_000);
    h.set_uid(0x7fff_ffff_ffff);
    h.set_cksum();

    let h = decode(&h);
    t!(h.verify_cksum());
    assert_eq!(t!(h.size()), 0o1_000_000_000_000);
    assert_eq!(t!(h.uid()), 0x7fff_ffff_ffff);
}

#[test]
fn bad_checksum() {
    let mut h = tar::Header::new_gnu();
    t!(h.set_path("foo"));
    h.set_cksum();
    h.as_old_mut().name[0] = b'g';

    assert!(decode(&h).verify_cksum().is_err());
}

#[test]
fn entry_types() {
    let cases = [
        (tar::EntryType::Regular, EntryType::Regular),
        (tar::EntryType::Directory, EntryType::Directory),
        (tar::EntryType::Symlink, EntryType::Symlink),
        (tar::EntryType::Link, EntryType::Link),
        (tar::EntryType::Fifo, EntryType::Fifo),
        (tar::EntryType::Char, EntryType::Char),
        (tar::EntryType::Block, EntryType::Block),
        (tar::EntryType::XHeader, EntryType::XHeader),
        (tar::EntryType::XGlobalHeader, EntryType::XGlobalHeader),
        (tar::EntryType::GNULongName, EntryType::GNULongName),
    ];
    for (encoded, expected) in cases {
        let mut h = tar::Header::new_gnu();
        h.set_entry_type(encoded);
        h.set_cksum();
        assert_eq!(decode(&h).entry_type(), expected);
    }
}

#[test]
fn zeroed_block() {
    let h = Header::from_bytes(&[0; 512]);
    assert!(h.is_zero());
    assert!(h.verify_cksum().is_err());
}
