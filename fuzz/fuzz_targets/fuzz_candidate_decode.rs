#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = twincall::core::sdp::candidates::TransportCandidateList::decode(text);
        let _ = twincall::core::sdp::candidates::unpack_candidate(text);
    }
});
