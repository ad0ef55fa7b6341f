#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Inflation is bounded; hostile streams must neither panic nor
    // exhaust memory.
    let _ = twincall::core::sdp::decompress(data);
});
