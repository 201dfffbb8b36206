#![no_main]

use libfuzzer_sys::fuzz_target;

use std::io::Read;
use volinit::Archive;

fuzz_target!(|data: &[u8]| {
    let mut archive = Archive::new(data);
    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(_) => return,
        };
        let _ = entry.path();
        let _ = entry.link_name();
        let _ = entry.kind();
        let _ = entry.xattrs().len();
        // Sparse entries may claim an enormous expanded size.
        let mut buf = Vec::new();
        if entry.by_ref().take(1 << 20).read_to_end(&mut buf).is_err() {
            return;
        }
        assert!(buf.len() as u64 <= entry.size());
    }
});
