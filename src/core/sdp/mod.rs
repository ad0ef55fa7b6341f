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
#![warn(missing_docs)]

//! SDP handling. The SDP body is an opaque UTF-8 blob; the only
//! transformations applied here are deflate compression, AEAD key-index
//! tagging, ICE candidate packing and the interop codec filter.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use thiserror::Error;

/// Candidate dictionary codec and candidate lists.
pub mod candidates;
/// Interop codec allow-list filter.
pub mod filter;

/// SDP codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdpError {
    #[error("compression")]
    Compress,
    #[error("decompression")]
    Decompress,
    #[error("bad candidate line")]
    BadCandidate,
}

/// Key index marking a plaintext SDP body.
pub const KEY_INDEX_PLAINTEXT: u8 = 0;
/// Key index marking secret slot 1.
pub const KEY_INDEX_SECRET1: u8 = 1;
/// Key index marking secret slot 2.
pub const KEY_INDEX_SECRET2: u8 = 2;
/// Key index marking an ECDH-wrapped body (public key in the header).
/// Sessions without an established secret relation reuse index 1; the
/// receiver disambiguates by the absence of stored peer secrets.
pub const KEY_INDEX_ECDH: u8 = 1;

/// An SDP body as transported: possibly deflated, possibly AEAD-wrapped.
///
/// `key_index` 0 means plaintext; greater values select the peer-side key
/// used to open the body (see the `KEY_INDEX_*` constants).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sdp {
    /// Body bytes (UTF-8 when plaintext, ciphertext otherwise).
    pub data: Vec<u8>,
    /// The body bytes are deflate-compressed (before any encryption).
    pub compressed: bool,
    /// AEAD key selector, 0 for plaintext.
    pub key_index: u8,
}

impl Sdp {
    /// Wrap an SDP text, compressing it when larger than `threshold`.
    pub fn from_text(text: &str, threshold: usize) -> Result<Self, SdpError> {
        if text.len() > threshold {
            let compressed = compress(text.as_bytes())?;
            // A pathological SDP can inflate; keep whichever is smaller.
            if compressed.len() < text.len() {
                return Ok(Self {
                    data: compressed,
                    compressed: true,
                    key_index: KEY_INDEX_PLAINTEXT,
                });
            }
        }
        Ok(Self {
            data: text.as_bytes().to_vec(),
            compressed: false,
            key_index: KEY_INDEX_PLAINTEXT,
        })
    }

    /// Recover the SDP text. Fails on an encrypted body.
    pub fn to_text(&self) -> Result<String, SdpError> {
        if self.key_index != KEY_INDEX_PLAINTEXT {
            return Err(SdpError::Decompress);
        }
        let raw = if self.compressed {
            decompress(&self.data)?
        } else {
            self.data.clone()
        };
        String::from_utf8(raw).map_err(|_| SdpError::Decompress)
    }
}

/// Raw deflate.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, SdpError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|_| SdpError::Compress)?;
    encoder.finish().map_err(|_| SdpError::Compress)
}

/// Raw inflate with a size cap against decompression bombs.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, SdpError> {
    const MAX_SDP: u64 = 1 << 20;
    let mut decoder = DeflateDecoder::new(data).take(MAX_SDP + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| SdpError::Decompress)?;
    if out.len() as u64 > MAX_SDP {
        return Err(SdpError::Decompress);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn large_repetitive_sdp_compresses() {
        let mut text = String::new();
        for _ in 0..100 {
            text.push_str("a=ice-options:trickle renomination");
            text.push_str(&Uuid::new_v4().to_string());
        }
        let sdp = Sdp::from_text(&text, 256).unwrap();
        assert!(sdp.compressed);
        assert!(sdp.data.len() < text.len());
        assert_eq!(sdp.to_text().unwrap(), text);
    }

    #[test]
    fn small_sdp_stays_plain() {
        let text = "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\n";
        let sdp = Sdp::from_text(text, 256).unwrap();
        assert!(!sdp.compressed);
        assert_eq!(sdp.to_text().unwrap(), text);
    }

    #[test]
    fn truncated_deflate_stream_fails() {
        let compressed = compress(b"some sdp body, long enough to matter").unwrap();
        assert_eq!(
            decompress(&compressed[..compressed.len() / 2]),
            Err(SdpError::Decompress)
        );
    }
}
