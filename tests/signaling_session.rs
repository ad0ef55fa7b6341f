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

//! Two complete stacks wired back-to-back through an in-memory pipe:
//! offer, ringing, answer and teardown flow end to end, SDPs sealed
//! with the ECDH session cipher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use twincall::core::sdp::candidates::TransportCandidateList;
use twincall::core::sdp::Sdp;
use twincall::core::security::keystore::KeyStore;
use twincall::core::security::primitives::KeyKind;
use twincall::core::types::{CoreConfig, ErrorCode, Offer, TerminateReason};
use twincall::monitoring::metrics::Metrics;
use twincall::runtime::executor::SerialExecutor;
use twincall::signaling::call_room::CallRoomService;
use twincall::signaling::schemas::{offer_word, Packet, TransportInfoIQ};
use twincall::signaling::service::{Connection, SignalingService};
use twincall::signaling::session::{SessionObserver, SessionService, SessionState};
use twincall::signaling::CoreHandler;
use uuid::Uuid;

/// Forwards every sent packet into the peer stack's dispatcher and
/// keeps a transcript for assertions.
struct PipeConnection {
    peer: Mutex<Option<Arc<SignalingService>>>,
    transcript: Mutex<Vec<Vec<u8>>>,
}

impl PipeConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            peer: Mutex::new(None),
            transcript: Mutex::new(Vec::new()),
        })
    }

    fn attach(&self, peer: Arc<SignalingService>) {
        *self.peer.lock().unwrap() = Some(peer);
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.transcript.lock().unwrap().clone()
    }
}

impl Connection for PipeConnection {
    fn send(&self, bytes: &[u8], _timeout: Duration) -> Result<(), ErrorCode> {
        self.transcript.lock().unwrap().push(bytes.to_vec());
        match &*self.peer.lock().unwrap() {
            Some(peer) => {
                peer.on_packet(bytes.to_vec());
                Ok(())
            }
            None => Err(ErrorCode::Disconnected),
        }
    }

    fn is_connected(&self) -> bool {
        self.peer.lock().unwrap().is_some()
    }
}

#[derive(Default)]
struct Events {
    initiates: AtomicUsize,
    ringings: AtomicUsize,
    accepts: AtomicUsize,
    updates: AtomicUsize,
    terminates: AtomicUsize,
    candidates: Mutex<Vec<TransportCandidateList>>,
    last_sdp: Mutex<Option<String>>,
    last_session: Mutex<Option<Uuid>>,
    last_reason: Mutex<Option<TerminateReason>>,
}

struct RecordingObserver(Arc<Events>);

impl SessionObserver for RecordingObserver {
    fn on_session_initiate(
        &self,
        session_id: Uuid,
        _from: Uuid,
        sdp: String,
        _offer: Offer,
        _offer_to_receive: Offer,
    ) {
        *self.0.last_sdp.lock().unwrap() = Some(sdp);
        *self.0.last_session.lock().unwrap() = Some(session_id);
        self.0.initiates.fetch_add(1, Ordering::SeqCst);
    }

    fn on_session_ringing(&self, _session_id: Uuid) {
        self.0.ringings.fetch_add(1, Ordering::SeqCst);
    }

    fn on_session_accept(&self, _session_id: Uuid, sdp: String, _offer: Offer) {
        *self.0.last_sdp.lock().unwrap() = Some(sdp);
        self.0.accepts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_session_update(&self, _session_id: Uuid, sdp: String, _offer: Offer) {
        *self.0.last_sdp.lock().unwrap() = Some(sdp);
        self.0.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn on_transport_info(
        &self,
        _session_id: Uuid,
        candidates: TransportCandidateList,
    ) -> ErrorCode {
        self.0.candidates.lock().unwrap().push(candidates);
        ErrorCode::Success
    }

    fn on_session_terminate(&self, _session_id: Uuid, reason: TerminateReason) {
        *self.0.last_reason.lock().unwrap() = Some(reason);
        self.0.terminates.fetch_add(1, Ordering::SeqCst);
    }
}

struct Stack {
    twincode: Uuid,
    keystore: Arc<KeyStore>,
    connection: Arc<PipeConnection>,
    signaling: Arc<SignalingService>,
    sessions: Arc<SessionService>,
    events: Arc<Events>,
    _dir: tempfile::TempDir,
}

fn build_stack(name: &str) -> Stack {
    let dir = tempfile::tempdir().expect("tempdir");
    let keystore = Arc::new(KeyStore::open(dir.path().to_str().unwrap()).expect("keystore"));
    let twincode = Uuid::new_v4();
    keystore
        .insert_key(&twincode, KeyKind::Curve25519)
        .expect("identity");

    let (executor, _join) = SerialExecutor::start();
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let connection = PipeConnection::new();
    let signaling = SignalingService::new(
        connection.clone(),
        executor,
        metrics.clone(),
        Duration::from_secs(2),
    );

    let mut config = CoreConfig::with_data_dir(dir.path().to_str().unwrap());
    config.ping_interval_ms = 10_000;
    let sessions = SessionService::new(
        signaling.clone(),
        keystore.clone(),
        metrics.clone(),
        config,
    );
    let rooms = CallRoomService::new(signaling.clone(), metrics);
    sessions.install_merge_hook(&rooms);
    signaling.set_handler(CoreHandler::new(rooms, sessions.clone()));

    let events = Arc::new(Events::default());
    sessions.set_observer(Arc::new(RecordingObserver(events.clone())));

    let _ = name;
    Stack {
        twincode,
        keystore,
        connection,
        signaling,
        sessions,
        events,
        _dir: dir,
    }
}

/// Store each side's public keys in the other side's key store.
fn exchange_keys(a: &Stack, b: &Stack) {
    for (from, to) in [(a, b), (b, a)] {
        let info = from
            .keystore
            .load_peer_encryption_key(&from.twincode)
            .expect("load")
            .expect("own key");
        let signing = info.verifying_key().expect("signing");
        let agreement = info.agreement_public().expect("agreement");
        to.keystore
            .save_peer_key(&from.twincode, KeyKind::Curve25519, &signing, &agreement)
            .expect("save peer");
    }
}

async fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let mut waited = 0;
    while waited < deadline_ms {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 10;
    }
    check()
}

const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\n";
const ANSWER_SDP: &str = "v=0\r\no=- 2 2 IN IP4 0.0.0.0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\n";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_initiate_emits_audio_offer_and_correlates_ack() {
    let alice = build_stack("alice");
    let bob = build_stack("bob");
    exchange_keys(&alice, &bob);
    alice.connection.attach(bob.signaling.clone());
    bob.connection.attach(alice.signaling.clone());

    let session_id = alice
        .sessions
        .initiate(
            alice.twincode,
            bob.twincode,
            OFFER_SDP,
            Offer::AUDIO,
            Offer::AUDIO,
        )
        .expect("initiate");

    // One SessionInitiate with an audio-only offer word left Alice.
    let sent = alice.connection.sent();
    let initiate = sent
        .iter()
        .find_map(|bytes| match Packet::decode(bytes) {
            Ok((_, Packet::SessionInitiate(iq))) => Some(iq),
            _ => None,
        })
        .expect("initiate emitted");
    assert_eq!(initiate.session_id, session_id);
    // Audio only: bit 1. The ECDH key index rides in bits 8..16.
    assert_eq!(offer_word(initiate.offer, &initiate.sdp) & 0xFF, 0x02);

    // Bob saw the decrypted offer; Alice's pending entry was consumed
    // by the ack exactly once.
    assert!(wait_until(2_000, || alice.signaling.pending_count() == 0).await);
    assert!(wait_until(2_000, || bob.events.initiates.load(Ordering::SeqCst) == 1).await);
    assert_eq!(
        bob.events.last_sdp.lock().unwrap().as_deref(),
        Some(OFFER_SDP)
    );
    assert_eq!(
        alice.sessions.session_state(&session_id),
        Some(SessionState::Initiated)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_call_flow_ring_accept_update_terminate() {
    let alice = build_stack("alice");
    let bob = build_stack("bob");
    exchange_keys(&alice, &bob);
    alice.connection.attach(bob.signaling.clone());
    bob.connection.attach(alice.signaling.clone());

    let session_id = alice
        .sessions
        .initiate(
            alice.twincode,
            bob.twincode,
            OFFER_SDP,
            Offer::AUDIO | Offer::VIDEO,
            Offer::AUDIO | Offer::VIDEO,
        )
        .expect("initiate");
    assert!(wait_until(2_000, || bob.events.initiates.load(Ordering::SeqCst) == 1).await);

    // Callee rings; caller observes RINGING.
    bob.sessions.ringing(session_id).expect("ringing");
    assert!(wait_until(2_000, || alice.events.ringings.load(Ordering::SeqCst) == 1).await);
    assert_eq!(
        alice.sessions.session_state(&session_id),
        Some(SessionState::Ringing)
    );

    // Callee accepts; both sides reach ACCEPTED and the caller sees the
    // decrypted answer.
    bob.sessions
        .accept(session_id, ANSWER_SDP, Offer::AUDIO, Offer::AUDIO)
        .expect("accept");
    assert!(wait_until(2_000, || alice.events.accepts.load(Ordering::SeqCst) == 1).await);
    assert_eq!(
        alice.events.last_sdp.lock().unwrap().as_deref(),
        Some(ANSWER_SDP)
    );
    assert_eq!(
        alice.sessions.session_state(&session_id),
        Some(SessionState::Accepted)
    );
    assert_eq!(
        bob.sessions.session_state(&session_id),
        Some(SessionState::Accepted)
    );

    // Candidates flow as transport-info.
    let candidates = TransportCandidateList {
        candidates: vec![twincall::core::sdp::candidates::TransportCandidate {
            label: "audio".into(),
            id: 0,
            sdp: "candidate:1 1 udp 2122260223 10.0.0.2 56143 typ host generation 0".into(),
            removed: false,
        }],
    };
    alice
        .sessions
        .send_transport_info(session_id, &candidates)
        .expect("candidates");
    assert!(wait_until(2_000, || !bob.events.candidates.lock().unwrap().is_empty()).await);
    assert_eq!(bob.events.candidates.lock().unwrap()[0], candidates);

    // Renegotiation.
    alice
        .sessions
        .update(session_id, OFFER_SDP, Offer::AUDIO | Offer::ANSWER)
        .expect("update");
    assert!(wait_until(2_000, || bob.events.updates.load(Ordering::SeqCst) == 1).await);
    assert!(
        wait_until(2_000, || alice.sessions.session_state(&session_id)
            == Some(SessionState::Accepted))
        .await
    );

    // Hangup: Bob observes the reason, both tables drain.
    alice
        .sessions
        .terminate(session_id, TerminateReason::Success)
        .expect("terminate");
    assert!(wait_until(2_000, || bob.events.terminates.load(Ordering::SeqCst) == 1).await);
    assert_eq!(
        *bob.events.last_reason.lock().unwrap(),
        Some(TerminateReason::Success)
    );
    assert!(wait_until(2_000, || alice.sessions.session_count() == 0).await);
    assert!(wait_until(2_000, || bob.sessions.session_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chained_transport_info_stops_on_empty_inner_frame() {
    let alice = build_stack("alice");
    let bob = build_stack("bob");
    exchange_keys(&alice, &bob);
    alice.connection.attach(bob.signaling.clone());
    bob.connection.attach(alice.signaling.clone());

    let session_id = alice
        .sessions
        .initiate(alice.twincode, bob.twincode, OFFER_SDP, Offer::AUDIO, Offer::AUDIO)
        .expect("initiate");
    assert!(wait_until(2_000, || bob.events.initiates.load(Ordering::SeqCst) == 1).await);

    // An inner frame with an empty body is a framing error.
    let iq = TransportInfoIQ {
        session_id,
        to: bob.twincode,
        frames: vec![
            Sdp {
                data: b"+audio\t0\tX".to_vec(),
                compressed: false,
                key_index: 0,
            },
            Sdp {
                data: Vec::new(),
                compressed: false,
                key_index: 0,
            },
        ],
    };
    let code = bob.sessions.handle_transport_info(&iq);
    assert_eq!(code, ErrorCode::BadEncryptionFormat);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_initiate_is_rejected() {
    let alice = build_stack("alice");
    let bob = build_stack("bob");
    exchange_keys(&alice, &bob);

    let iq = twincall::signaling::schemas::SessionInitiateIQ {
        session_id: Uuid::new_v4(),
        from: alice.twincode,
        to: bob.twincode,
        sdp: Sdp {
            data: OFFER_SDP.as_bytes().to_vec(),
            compressed: false,
            key_index: 0,
        },
        offer: Offer::AUDIO,
        offer_to_receive: Offer::AUDIO,
        max_version: 2,
        min_version: 1,
        expiration: 1, // long past
    };
    assert_eq!(bob.sessions.handle_initiate(&iq), ErrorCode::Expired);
    assert_eq!(bob.sessions.session_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sign_out_closes_every_pending_request_once() {
    let alice = build_stack("alice");
    // Pings for unknown sessions come back EXPIRED from the peer stack.
    let sink = build_stack("sink");
    alice.connection.attach(sink.signaling.clone());
    sink.connection.attach(alice.signaling.clone());

    let completions = Arc::new(AtomicUsize::new(0));
    for _ in 0..4 {
        let seen = completions.clone();
        alice.signaling.request(
            Packet::SessionPing(twincall::signaling::schemas::SessionPingIQ {
                session_id: Uuid::new_v4(),
                to: Uuid::new_v4(),
                expiration: 0,
            }),
            Box::new(move |code, _| {
                assert_eq!(code, ErrorCode::Expired);
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
    // Unknown sessions are answered EXPIRED; all four complete exactly once.
    assert!(wait_until(2_000, || completions.load(Ordering::SeqCst) == 4).await);
    assert_eq!(alice.signaling.pending_count(), 0);

    // Now queue requests that will never be answered and sign out.
    struct BlackholeConnection;
    impl Connection for BlackholeConnection {
        fn send(&self, _bytes: &[u8], _timeout: Duration) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
    }
    let disconnected = Arc::new(AtomicUsize::new(0));
    let (executor, _join) = SerialExecutor::start();
    let metrics = Arc::new(Metrics::new().unwrap());
    let lonely = SignalingService::new(
        Arc::new(BlackholeConnection),
        executor,
        metrics,
        Duration::from_secs(30),
    );
    for _ in 0..3 {
        let seen = disconnected.clone();
        lonely.request(
            Packet::SessionPing(twincall::signaling::schemas::SessionPingIQ {
                session_id: Uuid::new_v4(),
                to: Uuid::new_v4(),
                expiration: 0,
            }),
            Box::new(move |code, _| {
                assert_eq!(code, ErrorCode::Disconnected);
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
    lonely.on_sign_out();
    assert!(wait_until(2_000, || disconnected.load(Ordering::SeqCst) == 3).await);
    assert_eq!(lonely.pending_count(), 0);
}
