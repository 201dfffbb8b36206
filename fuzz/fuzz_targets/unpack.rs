#![no_main]

use libfuzzer_sys::fuzz_target;

use tempfile::tempdir;
use volinit::{populate_volume, AttrPolicy, ExtractOptions};

fuzz_target!(|data: &[u8]| {
    let root = tempdir().unwrap();
    let volume = root.path().join("vol");
    std::fs::create_dir(&volume).unwrap();

    // Arbitrary ownership and xattrs are expected to fail when not running
    // as root; keep going so the rest of the stream gets exercised.
    let mut options = ExtractOptions::new("disk.img");
    options.ownership = AttrPolicy::Warn;
    options.xattrs = AttrPolicy::Warn;
    let _ = populate_volume(data, &volume, &options);

    // Whatever happened, nothing may land next to the volume.
    let siblings: Vec<_> = std::fs::read_dir(root.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(siblings, ["vol"]);
});
