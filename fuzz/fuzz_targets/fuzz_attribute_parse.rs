#![no_main]
use libfuzzer_sys::fuzz_target;

use twincall::core::codec::attributes::{read_attributes, MAX_SIGNED_ATTRIBUTES};
use twincall::core::codec::wire::{Encoding, WireReader};

fuzz_target!(|data: &[u8]| {
    for encoding in [Encoding::Verbose, Encoding::Compact] {
        let mut reader = WireReader::new(encoding, data);
        let _ = read_attributes(&mut reader, MAX_SIGNED_ATTRIBUTES);
    }
});
