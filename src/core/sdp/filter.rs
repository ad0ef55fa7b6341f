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

//! Interop codec filter: strips media payload types outside a fixed
//! allow-list from the m-lines and drops the attribute lines that
//! reference them. Pure text transform, idempotent.

use std::collections::{BTreeMap, BTreeSet};

/// Codecs kept for browser/mobile interop.
pub const ALLOWED_CODECS: [&str; 13] = [
    "opus",
    "ISAC",
    "G722",
    "PCMU",
    "PCMA",
    "CN",
    "telephone-event",
    "VP8",
    "VP9",
    "H264",
    "red",
    "rtx",
    "ulpfec",
];

fn rtpmap_entry(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("a=rtpmap:")?;
    let mut parts = rest.splitn(2, ' ');
    let pt = parts.next()?.to_string();
    let codec = parts.next()?.split('/').next()?.to_string();
    Some((pt, codec))
}

fn fmtp_apt(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("a=fmtp:")?;
    let mut parts = rest.splitn(2, ' ');
    let pt = parts.next()?.to_string();
    let apt = parts
        .next()?
        .split(';')
        .find_map(|p| p.trim().strip_prefix("apt="))?
        .to_string();
    Some((pt, apt))
}

fn attribute_payload_type(line: &str) -> Option<&str> {
    for prefix in ["a=rtpmap:", "a=fmtp:", "a=rtcp-fb:"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return rest.split(' ').next();
        }
    }
    None
}

/// Remove payload types advertising codecs outside [`ALLOWED_CODECS`].
///
/// `rtx` payloads whose `apt` target is removed are removed with it.
/// Payload types without an `a=rtpmap` entry are left untouched.
pub fn filter_codecs(sdp: &str) -> String {
    // Payload type -> codec name, across the whole body.
    let mut codec_of: BTreeMap<String, String> = BTreeMap::new();
    let mut apt_of: BTreeMap<String, String> = BTreeMap::new();
    for line in sdp.lines() {
        if let Some((pt, codec)) = rtpmap_entry(line) {
            codec_of.insert(pt, codec);
        }
        if let Some((pt, apt)) = fmtp_apt(line) {
            apt_of.insert(pt, apt);
        }
    }

    let mut dropped: BTreeSet<String> = codec_of
        .iter()
        .filter(|(_, codec)| !ALLOWED_CODECS.contains(&codec.as_str()))
        .map(|(pt, _)| pt.clone())
        .collect();
    for (pt, apt) in &apt_of {
        if dropped.contains(apt) {
            dropped.insert(pt.clone());
        }
    }

    let mut out = String::with_capacity(sdp.len());
    for line in sdp.lines() {
        if line.starts_with("m=audio ") || line.starts_with("m=video ") {
            let mut fields = line.split(' ');
            let mut kept: Vec<&str> = fields.by_ref().take(3).collect();
            for pt in fields {
                if !dropped.contains(pt) {
                    kept.push(pt);
                }
            }
            out.push_str(&kept.join(" "));
        } else if let Some(pt) = attribute_payload_type(line) {
            if dropped.contains(pt) {
                continue;
            }
            out.push_str(line);
        } else {
            out.push_str(line);
        }
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "v=0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111 103 9 0\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=rtpmap:103 ISAC/16000\r\n\
        a=rtpmap:9 G722/8000\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96 97 98 127\r\n\
        a=rtpmap:96 VP8/90000\r\n\
        a=rtpmap:97 rtx/90000\r\n\
        a=fmtp:97 apt=96\r\n\
        a=rtpmap:98 AV1/90000\r\n\
        a=rtcp-fb:98 nack\r\n\
        a=rtpmap:127 rtx/90000\r\n\
        a=fmtp:127 apt=98\r\n";

    #[test]
    fn strips_disallowed_codec_and_its_rtx() {
        let filtered = filter_codecs(SAMPLE);
        assert!(filtered.contains("m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n"));
        assert!(!filtered.contains("AV1"));
        assert!(!filtered.contains("a=rtcp-fb:98"));
        assert!(!filtered.contains("a=fmtp:127"));
        assert!(filtered.contains("a=rtpmap:96 VP8/90000"));
        assert!(filtered.contains("a=fmtp:97 apt=96"));
    }

    #[test]
    fn audio_line_untouched_when_all_allowed() {
        let filtered = filter_codecs(SAMPLE);
        assert!(filtered.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111 103 9 0\r\n"));
    }

    #[test]
    fn is_idempotent() {
        let once = filter_codecs(SAMPLE);
        let twice = filter_codecs(&once);
        assert_eq!(once, twice);
    }
}
