// Copyright (c) 2026 Twincall
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

use twincall::core::sdp::filter::filter_codecs;
use twincall::core::sdp::{compress, decompress, Sdp};
use twincall::core::types::Offer;
use twincall::signaling::schemas::{offer_word, sdp_from_word};
use uuid::Uuid;

#[test]
fn repetitive_sdp_compresses_and_restores() {
    let mut text = String::new();
    for _ in 0..100 {
        text.push_str("a=ice-options:trickle renomination");
        text.push_str(&Uuid::new_v4().to_string());
    }

    let sdp = Sdp::from_text(&text, 256).expect("compress");
    assert!(sdp.compressed);
    assert!(sdp.data.len() < text.len());

    let restored = sdp.to_text().expect("decompress");
    assert_eq!(restored, text);
}

#[test]
fn raw_deflate_roundtrip() {
    let body = b"v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n".repeat(40);
    let packed = compress(&body).expect("compress");
    assert!(packed.len() < body.len());
    assert_eq!(decompress(&packed).expect("decompress"), body);
}

#[test]
fn compressed_bit_travels_in_offer_word() {
    let sdp = Sdp {
        data: vec![1, 2, 3],
        compressed: true,
        key_index: 2,
    };
    let word = offer_word(Offer::AUDIO | Offer::VIDEO, &sdp);
    assert_eq!(word & 0x40, 0x40);
    assert_eq!((word & 0x0FF00) >> 8, 2);

    let (flags, decoded) = sdp_from_word(vec![1, 2, 3], word);
    assert_eq!(flags, Offer::AUDIO | Offer::VIDEO);
    assert!(decoded.compressed);
    assert_eq!(decoded.key_index, 2);
}

#[test]
fn filter_is_idempotent_on_real_offer() {
    let offer = "v=0\r\n\
        o=- 1 2 IN IP4 0.0.0.0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111 0 8 110\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        a=rtpmap:8 PCMA/8000\r\n\
        a=rtpmap:110 speex/16000\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96 98\r\n\
        a=rtpmap:96 VP8/90000\r\n\
        a=rtpmap:98 H265/90000\r\n\
        a=rtcp-fb:98 nack pli\r\n";
    let once = filter_codecs(offer);
    assert!(!once.contains("speex"));
    assert!(!once.contains("H265"));
    assert!(once.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111 0 8\r\n"));
    assert!(once.contains("m=video 9 UDP/TLS/RTP/SAVPF 96\r\n"));
    assert_eq!(filter_codecs(&once), once);
}
