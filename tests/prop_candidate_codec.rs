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

use proptest::prelude::*;
use twincall::core::sdp::candidates::{
    index_for, pack_candidate, sentinel_for, unpack_candidate, TransportCandidate,
    TransportCandidateList, DICTIONARY,
};

#[test]
fn dictionary_maps_are_inverse() {
    for (i, _) in DICTIONARY.iter().enumerate() {
        let sentinel = sentinel_for(i).expect("sentinel");
        assert_eq!(index_for(sentinel), Some(i));
    }
    assert_eq!(sentinel_for(DICTIONARY.len()), None);
    assert_eq!(index_for(0x00), None);
    assert_eq!(index_for(0x7f), None);
}

#[test]
fn reference_tcp_candidate_packs_exactly() {
    let input = "candidate:1052210311 1 tcp 1518280447 192.168.0.72 50417 typ host \
                 tcptype passive generation 0 ufrag KjZR network-id 1 network-cost 10";
    let list = TransportCandidateList {
        candidates: vec![TransportCandidate {
            label: "data".into(),
            id: 1,
            sdp: input.into(),
            removed: false,
        }],
    };
    let encoded = list.encode();
    assert_eq!(
        encoded,
        "+data\t1\t\u{1}1052210311 1\u{3}1518280447 192.168.0.72 50417\u{5}\u{6}\u{e}\u{f}\u{12} 0\u{b} KjZR\u{11} 1\u{10} 10"
    );

    let decoded = TransportCandidateList::decode(&encoded).expect("decode");
    assert_eq!(decoded.candidates.len(), 1);
    let candidate = &decoded.candidates[0];
    assert_eq!(candidate.sdp, input);
    assert_eq!(candidate.label, "data");
    assert_eq!(candidate.id, 1);
    assert!(!candidate.removed);
}

fn arb_candidate_line() -> impl Strategy<Value = String> {
    (
        (any::<u32>(), 1u8..3, prop_oneof![Just("udp"), Just("tcp")]),
        (any::<u32>(), 0u8..255, 0u8..255, 1024u16..65535),
        (
            prop_oneof![Just("host"), Just("srflx"), Just("prflx"), Just("relay")],
            0u8..3,
        ),
        ("[a-zA-Z0-9]{4}", 0u8..5, 0u16..1000),
    )
        .prop_map(
            |(
                (foundation, component, proto),
                (prio, ip_a, ip_b, port),
                (typ, generation),
                (ufrag, net_id, cost),
            )| {
                format!(
                    "candidate:{foundation} {component} {proto} {prio} 192.{ip_a}.{ip_b}.7 {port} \
                     typ {typ} generation {generation} ufrag {ufrag} network-id {net_id} network-cost {cost}"
                )
            },
        )
}

proptest! {
    #[test]
    fn prop_pack_unpack_is_identity(line in arb_candidate_line()) {
        let packed = pack_candidate(&line);
        prop_assert_eq!(unpack_candidate(&packed), line);
    }

    #[test]
    fn prop_packing_never_grows(line in arb_candidate_line()) {
        prop_assert!(pack_candidate(&line).len() <= line.len());
    }

    #[test]
    fn prop_list_roundtrip(lines in prop::collection::vec(arb_candidate_line(), 1..6),
                           removed in prop::collection::vec(any::<bool>(), 1..6)) {
        let candidates: Vec<TransportCandidate> = lines
            .iter()
            .zip(removed.iter().cycle())
            .enumerate()
            .map(|(i, (line, removed))| TransportCandidate {
                label: if i % 2 == 0 { "audio".into() } else { "data".into() },
                id: i as i32,
                sdp: line.clone(),
                removed: *removed,
            })
            .collect();
        let list = TransportCandidateList { candidates };
        let decoded = TransportCandidateList::decode(&list.encode()).unwrap();
        prop_assert_eq!(decoded, list);
    }
}
