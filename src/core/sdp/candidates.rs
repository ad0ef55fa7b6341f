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

//! ICE candidate packing. Frequent `candidate:` substrings are replaced
//! by one-byte sentinels (0x01..=0x12) from a fixed dictionary; the
//! substitution is lossless. A candidate list is one line per candidate,
//! `+<mid>\t<index>\t<packed>`, with removed candidates prefixed by `-`.

use super::SdpError;

/// Substitution dictionary. Entry `i` is encoded as byte `i + 1`.
///
/// The ordering is wire-contractual: changing an index changes the
/// packed bytes and breaks interop with deployed peers.
pub const DICTIONARY: [&str; 18] = [
    "candidate:",
    " udp ",
    " tcp ",
    " ssltcp ",
    " typ",
    " host",
    " srflx",
    " prflx",
    " relay",
    " raddr",
    " ufrag",
    " rport",
    " active",
    " tcptype",
    " passive",
    " network-cost",
    " network-id",
    " generation",
];

/// Byte of the first dictionary sentinel.
const SENTINEL_BASE: u8 = 1;

/// Sentinel byte for dictionary entry `index`, if valid.
pub fn sentinel_for(index: usize) -> Option<u8> {
    if index < DICTIONARY.len() {
        Some(SENTINEL_BASE + index as u8)
    } else {
        None
    }
}

/// Dictionary index for a sentinel byte, if valid.
pub fn index_for(sentinel: u8) -> Option<usize> {
    if (SENTINEL_BASE..SENTINEL_BASE + DICTIONARY.len() as u8).contains(&sentinel) {
        Some((sentinel - SENTINEL_BASE) as usize)
    } else {
        None
    }
}

/// Pack one candidate line. Longest dictionary match wins at each
/// position, so entries sharing a prefix (` network-id` / ` network-cost`,
/// ` tcp ` / ` tcptype`) encode unambiguously.
pub fn pack_candidate(sdp: &str) -> String {
    // Indexes ordered by entry length, longest first.
    let mut order: Vec<usize> = (0..DICTIONARY.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(DICTIONARY[i].len()));

    let mut out = String::with_capacity(sdp.len());
    let mut rest = sdp;
    'outer: while !rest.is_empty() {
        for &i in &order {
            if let Some(stripped) = rest.strip_prefix(DICTIONARY[i]) {
                out.push((SENTINEL_BASE + i as u8) as char);
                rest = stripped;
                continue 'outer;
            }
        }
        if let Some(c) = rest.chars().next() {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}

/// Reverse the sentinel substitution.
pub fn unpack_candidate(packed: &str) -> String {
    let mut out = String::with_capacity(packed.len() * 2);
    for c in packed.chars() {
        let code = c as u32;
        if code >= SENTINEL_BASE as u32 && code < SENTINEL_BASE as u32 + DICTIONARY.len() as u32 {
            out.push_str(DICTIONARY[(code - SENTINEL_BASE as u32) as usize]);
        } else {
            out.push(c);
        }
    }
    out
}

/// One ICE transport candidate as signaled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportCandidate {
    /// Media stream identification tag (`mid`).
    pub label: String,
    /// m-line index.
    pub id: i32,
    /// The raw `candidate:` line.
    pub sdp: String,
    /// True when the candidate was withdrawn.
    pub removed: bool,
}

/// An ordered set of candidates carried by one transport-info exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportCandidateList {
    /// Candidates in signaling order.
    pub candidates: Vec<TransportCandidate>,
}

impl TransportCandidateList {
    /// Encode as `{+|-}<mid>\t<index>\t<packed>` lines.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, candidate) in self.candidates.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push(if candidate.removed { '-' } else { '+' });
            out.push_str(&candidate.label);
            out.push('\t');
            out.push_str(&candidate.id.to_string());
            out.push('\t');
            out.push_str(&pack_candidate(&candidate.sdp));
        }
        out
    }

    /// Decode a candidate block produced by [`encode`](Self::encode).
    pub fn decode(text: &str) -> Result<Self, SdpError> {
        let mut candidates = Vec::new();
        for line in text.split('\n') {
            if line.is_empty() {
                continue;
            }
            let removed = match line.as_bytes()[0] {
                b'+' => false,
                b'-' => true,
                _ => return Err(SdpError::BadCandidate),
            };
            let body = &line[1..];
            let mut parts = body.splitn(3, '\t');
            let label = parts.next().ok_or(SdpError::BadCandidate)?;
            let id = parts
                .next()
                .ok_or(SdpError::BadCandidate)?
                .parse::<i32>()
                .map_err(|_| SdpError::BadCandidate)?;
            let packed = parts.next().ok_or(SdpError::BadCandidate)?;
            candidates.push(TransportCandidate {
                label: label.to_string(),
                id,
                sdp: unpack_candidate(packed),
                removed,
            });
        }
        Ok(Self { candidates })
    }
}
