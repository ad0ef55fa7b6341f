#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Wire packets from the broker are untrusted; decoding must never
    // panic, whatever the bytes.
    let _ = twincall::signaling::schemas::Packet::decode(data);
});
