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

//! Per-P2P-session state machine.
//!
//! ```text
//!   (none) --initiate-sent--> INITIATED
//!   INITIATED --device-ringing--> RINGING
//!   INITIATED|RINGING --accept-received--> ACCEPTED
//!   ACCEPTED --update-sent--> UPDATING --ack--> ACCEPTED
//!   ACCEPTED --transport-info--> ACCEPTED
//!   any --terminate--> TERMINATING --ack--> CLOSED
//!   any --expiration reached--> CLOSED (reason=TIMEOUT)
//! ```
//!
//! Inbound packets are gated on the expiration deadline they carry;
//! late ones are answered with `EXPIRED`. A session-ping is issued
//! after silence longer than the configured interval. Transport-info
//! is best-effort; every other request retries up to three times with
//! exponential backoff before the session is torn down.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::sdp::candidates::TransportCandidateList;
use crate::core::sdp::filter::filter_codecs;
use crate::core::sdp::Sdp;
use crate::core::security::keystore::{KeyStore, KeyStoreError, SecretOption, NONCE_LEASE};
use crate::core::security::session_keys::SessionKeyPair;
use crate::core::types::{now_ms, CoreConfig, ErrorCode, Offer, TerminateReason, TwincodeId};
use crate::monitoring::metrics::Metrics;
use crate::runtime::executor::ScheduledHandle;
use crate::signaling::call_room::CallRoomService;
use crate::signaling::schemas::{
    DeviceRingingIQ, Packet, SessionAcceptIQ, SessionInitiateIQ, SessionPingIQ,
    SessionTerminateIQ, SessionUpdateIQ, TransportInfoIQ,
};
use crate::signaling::service::SignalingService;

/// Offer validity window stamped on outbound session IQs.
const SESSION_OFFER_TTL_MS: u64 = 120_000;
/// Highest session protocol version we speak.
const SESSION_VERSION_MAX: i32 = 2;
/// Lowest session protocol version we accept.
const SESSION_VERSION_MIN: i32 = 1;
/// Retry budget for session requests (transport-info excluded).
const MAX_ATTEMPTS: u32 = 3;

/// P2P session lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Offer sent or received, no answer yet.
    Initiated,
    /// The remote device signalled ringing.
    Ringing,
    /// Answer exchanged; media may flow.
    Accepted,
    /// Renegotiation in flight.
    Updating,
    /// Terminate sent, ack outstanding.
    Terminating,
    /// Session is gone.
    Closed,
}

/// Application-facing session events. All but
/// [`on_transport_info`](SessionObserver::on_transport_info) are
/// dispatched asynchronously on the serial executor; transport-info is
/// delivered synchronously so candidate processing can stop the chain.
pub trait SessionObserver: Send + Sync {
    /// Inbound offer; the application decides to ring, accept, decline.
    fn on_session_initiate(
        &self,
        session_id: Uuid,
        from: Uuid,
        sdp: String,
        offer: Offer,
        offer_to_receive: Offer,
    );
    /// The callee device is ringing.
    fn on_session_ringing(&self, session_id: Uuid);
    /// The peer accepted; the answer SDP is decrypted and inflated.
    fn on_session_accept(&self, session_id: Uuid, sdp: String, offer: Offer);
    /// The peer renegotiated.
    fn on_session_update(&self, session_id: Uuid, sdp: String, offer: Offer);
    /// One candidate list of a transport-info chain. A non-`SUCCESS`
    /// return stops the walk and becomes the ack code.
    fn on_transport_info(&self, session_id: Uuid, candidates: TransportCandidateList) -> ErrorCode;
    /// The session ended.
    fn on_session_terminate(&self, session_id: Uuid, reason: TerminateReason);
}

struct P2PSession {
    local_twincode: Uuid,
    peer_twincode: Uuid,
    local_id: TwincodeId,
    peer_id: TwincodeId,
    state: SessionState,
    key_pair: SessionKeyPair,
    expiration: u64,
    last_activity: u64,
    ping_handle: Option<ScheduledHandle>,
    expire_handle: Option<ScheduledHandle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RequestKind {
    Initiate,
    Accept,
    Update,
    Terminate,
}

/// P2P session service. Holds the session table and drives the
/// signaling and crypto for each entry; constructed with its
/// collaborators so sessions never reach back into the layers that
/// created them.
pub struct SessionService {
    me: Weak<SessionService>,
    signaling: Arc<SignalingService>,
    keystore: Arc<KeyStore>,
    metrics: Arc<Metrics>,
    config: CoreConfig,
    sessions: Mutex<BTreeMap<Uuid, P2PSession>>,
    observer: Mutex<Option<Arc<dyn SessionObserver>>>,
}

fn reason_from_code(code: ErrorCode) -> TerminateReason {
    match code {
        ErrorCode::Timeout | ErrorCode::Expired => TerminateReason::Timeout,
        ErrorCode::Disconnected => TerminateReason::Disconnected,
        ErrorCode::NotAuthorized | ErrorCode::NoPermission => TerminateReason::NotAuthorized,
        ErrorCode::NoPrivateKey | ErrorCode::InvalidPrivateKey => TerminateReason::NoPrivateKey,
        ErrorCode::NoPublicKey | ErrorCode::InvalidPublicKey => TerminateReason::NoPublicKey,
        ErrorCode::NoSecretKey => TerminateReason::NoSecretKey,
        ErrorCode::DecryptError | ErrorCode::BadEncryptionFormat | ErrorCode::BadSignature => {
            TerminateReason::DecryptError
        }
        ErrorCode::EncryptError => TerminateReason::EncryptError,
        ErrorCode::ItemNotFound => TerminateReason::Gone,
        _ => TerminateReason::GeneralError,
    }
}

fn retryable(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::Timeout | ErrorCode::ServiceUnavailable | ErrorCode::Disconnected
    )
}

impl SessionService {
    /// Build the service with its capability set.
    pub fn new(
        signaling: Arc<SignalingService>,
        keystore: Arc<KeyStore>,
        metrics: Arc<Metrics>,
        config: CoreConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            signaling,
            keystore,
            metrics,
            config,
            sessions: Mutex::new(BTreeMap::new()),
            observer: Mutex::new(None),
        })
    }

    fn strong(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }

    /// Register the application observer.
    pub fn set_observer(&self, observer: Arc<dyn SessionObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    /// Wire the room-merge hook: a replaced member's earlier session is
    /// terminated with `MERGE`.
    pub fn install_merge_hook(&self, rooms: &CallRoomService) {
        let Some(svc) = self.strong() else {
            return;
        };
        rooms.set_merge_hook(Box::new(move |session_id| {
            let _ = svc.terminate(session_id, TerminateReason::Merge);
        }));
    }

    fn observer(&self) -> Option<Arc<dyn SessionObserver>> {
        self.observer.lock().unwrap().clone()
    }

    fn dispatch(&self, f: impl FnOnce(Arc<dyn SessionObserver>) + Send + 'static) {
        if let Some(observer) = self.observer() {
            self.signaling.executor().execute(move || f(observer));
        }
    }

    /// Current state of a session.
    pub fn session_state(&self, session_id: &Uuid) -> Option<SessionState> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|s| s.state)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn build_key_pair(
        &self,
        session_id: Uuid,
        local_id: TwincodeId,
        peer_id: TwincodeId,
        peer_uuid: &Uuid,
        option: SecretOption,
    ) -> Result<SessionKeyPair, ErrorCode> {
        let keys = self
            .keystore
            .load_twincode_key_with_secret(local_id, peer_id, NONCE_LEASE, option)
            .map_err(|e| match e {
                KeyStoreError::NoPrivateKey | KeyStoreError::NotFound => ErrorCode::NoPrivateKey,
                KeyStoreError::Database => ErrorCode::DatabaseError,
                _ => ErrorCode::LibraryError,
            })?;
        let peer_public = self
            .keystore
            .load_peer_encryption_key(peer_uuid)
            .ok()
            .flatten()
            .and_then(|info| info.agreement_public().ok());
        Ok(SessionKeyPair::from_keys(
            session_id,
            keys,
            peer_public,
            self.config.secret_renew_ms,
        ))
    }

    /// Encrypt an SDP under the session cipher, refreshing the nonce
    /// lease once when the block is exhausted. Falls back to plaintext
    /// only when the cipher has neither a secret nor a peer key.
    fn seal_sdp(
        &self,
        session: &mut P2PSession,
        session_id: Uuid,
        sdp: &Sdp,
    ) -> Result<Sdp, ErrorCode> {
        match session.key_pair.encrypt(sdp) {
            Ok(sealed) => Ok(sealed),
            Err(ErrorCode::Expired) => {
                let start = self
                    .keystore
                    .refresh_session(
                        session.local_id,
                        session.peer_id,
                        NONCE_LEASE,
                        session.key_pair.is_secret_backed(),
                    )
                    .map_err(|_| ErrorCode::DatabaseError)?;
                session.key_pair.refresh(start);
                session.key_pair.encrypt(sdp).map_err(|code| {
                    self.metrics.crypto_encrypt_fail_total.inc();
                    code
                })
            }
            Err(ErrorCode::NoPublicKey) => {
                // No relation keys at all: the protocol allows plaintext
                // (key index 0); the peer applies NOT_ENCRYPTED policy.
                debug!(%session_id, "no peer key, sending plaintext sdp");
                Ok(sdp.clone())
            }
            Err(code) => {
                self.metrics.crypto_encrypt_fail_total.inc();
                Err(code)
            }
        }
    }

    fn open_sdp(&self, session: &mut P2PSession, sdp: &Sdp) -> Result<String, ErrorCode> {
        let plain = if sdp.key_index == 0 {
            sdp.clone()
        } else {
            session.key_pair.decrypt(sdp).map_err(|code| {
                self.metrics.crypto_decrypt_fail_total.inc();
                code
            })?
        };
        plain.to_text().map_err(|_| ErrorCode::BadEncryptionFormat)
    }

    /// Open an outbound P2P session towards `peer`. Returns the new
    /// session id; progress arrives through the observer.
    pub fn initiate(
        &self,
        local: Uuid,
        peer: Uuid,
        sdp_text: &str,
        offer: Offer,
        offer_to_receive: Offer,
    ) -> Result<Uuid, ErrorCode> {
        let local_id = self
            .keystore
            .twincode_id(&local)
            .map_err(|_| ErrorCode::DatabaseError)?
            .ok_or(ErrorCode::NoPrivateKey)?;
        let peer_id = self
            .keystore
            .register_twincode(&peer)
            .map_err(|_| ErrorCode::DatabaseError)?;

        let session_id = Uuid::new_v4();
        let filtered = filter_codecs(sdp_text);
        let sdp = Sdp::from_text(&filtered, self.config.sdp_compress_threshold)
            .map_err(|_| ErrorCode::LibraryError)?;

        // Bootstrap the rotation handshake on first contact.
        let key_pair = self.build_key_pair(
            session_id,
            local_id,
            peer_id,
            &peer,
            SecretOption::CreateFirstSecret,
        )?;
        if key_pair.needs_renew() {
            if let Err(e) =
                self.keystore
                    .update_secret(local_id, peer_id, SecretOption::CreateNextSecret)
            {
                warn!(?e, "secret rotation proposal failed");
            }
        }

        let expiration = now_ms() + SESSION_OFFER_TTL_MS;
        let mut session = P2PSession {
            local_twincode: local,
            peer_twincode: peer,
            local_id,
            peer_id,
            state: SessionState::Initiated,
            key_pair,
            expiration,
            last_activity: now_ms(),
            ping_handle: None,
            expire_handle: None,
        };

        let sealed = self.seal_sdp(&mut session, session_id, &sdp)?;

        let packet = Packet::SessionInitiate(SessionInitiateIQ {
            session_id,
            from: local,
            to: peer,
            sdp: sealed,
            offer,
            offer_to_receive,
            max_version: SESSION_VERSION_MAX,
            min_version: SESSION_VERSION_MIN,
            expiration: expiration as i64,
        });

        self.insert_session(session_id, session);
        self.arm_expire_watchdog(session_id, expiration);
        self.send_with_retry(session_id, RequestKind::Initiate, packet, 0);
        info!(%session_id, %peer, "session initiated");
        Ok(session_id)
    }

    fn insert_session(&self, session_id: Uuid, session: P2PSession) {
        self.sessions.lock().unwrap().insert(session_id, session);
        self.metrics.sessions_active.inc();
    }

    fn arm_expire_watchdog(&self, session_id: Uuid, deadline: u64) {
        let Some(svc) = self.strong() else {
            return;
        };
        let delay = deadline.saturating_sub(now_ms());
        let handle = self
            .signaling
            .executor()
            .schedule(Duration::from_millis(delay), move || {
                svc.on_session_expired(session_id);
            });
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&session_id) {
            if let Some(old) = session.expire_handle.replace(handle) {
                old.cancel();
            }
        }
    }

    fn on_session_expired(&self, session_id: Uuid) {
        let expired = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .get(&session_id)
                .map(|s| {
                    matches!(s.state, SessionState::Initiated | SessionState::Ringing)
                        && now_ms() >= s.expiration
                })
                .unwrap_or(false)
        };
        if expired {
            self.close_session(session_id, TerminateReason::Timeout, true);
        }
    }

    fn send_with_retry(&self, session_id: Uuid, kind: RequestKind, packet: Packet, attempt: u32) {
        let Some(svc) = self.strong() else {
            return;
        };
        let retry_packet = packet.clone();
        self.signaling.request(
            packet,
            Box::new(move |code, _payload| {
                svc.on_request_done(session_id, kind, retry_packet, attempt, code);
            }),
        );
    }

    fn on_request_done(
        &self,
        session_id: Uuid,
        kind: RequestKind,
        packet: Packet,
        attempt: u32,
        code: ErrorCode,
    ) {
        if code == ErrorCode::Success {
            let close_after = {
                let mut sessions = self.sessions.lock().unwrap();
                match sessions.get_mut(&session_id) {
                    Some(session) => {
                        session.last_activity = now_ms();
                        if kind == RequestKind::Update && session.state == SessionState::Updating {
                            session.state = SessionState::Accepted;
                        }
                        kind == RequestKind::Terminate
                    }
                    None => false,
                }
            };
            if close_after {
                self.close_session(session_id, TerminateReason::Success, false);
            }
            return;
        }

        if retryable(code) && attempt + 1 < MAX_ATTEMPTS {
            let delay = Duration::from_secs(1 << attempt);
            debug!(%session_id, ?kind, attempt, ?code, "retrying session request");
            if let Some(svc) = self.strong() {
                let _ = self.signaling.executor().schedule(delay, move || {
                    // The session may have closed while we backed off.
                    if svc.session_state(&session_id).is_some() {
                        svc.send_with_retry(session_id, kind, packet, attempt + 1);
                    }
                });
            }
            return;
        }

        warn!(%session_id, ?kind, ?code, "session request failed");
        let notify = kind != RequestKind::Terminate;
        self.close_session(session_id, reason_from_code(code), notify);
    }

    /// Callee-side hint that the incoming session reached the ringer.
    pub fn ringing(&self, session_id: Uuid) -> Result<(), ErrorCode> {
        let peer = {
            let sessions = self.sessions.lock().unwrap();
            let session = sessions.get(&session_id).ok_or(ErrorCode::ItemNotFound)?;
            session.peer_twincode
        };
        self.signaling
            .notify(Packet::DeviceRinging(DeviceRingingIQ {
                session_id,
                to: peer,
            }));
        Ok(())
    }

    /// Accept an inbound session with an answer SDP.
    pub fn accept(
        &self,
        session_id: Uuid,
        sdp_text: &str,
        offer: Offer,
        offer_to_receive: Offer,
    ) -> Result<(), ErrorCode> {
        let filtered = filter_codecs(sdp_text);
        let sdp = Sdp::from_text(&filtered, self.config.sdp_compress_threshold)
            .map_err(|_| ErrorCode::LibraryError)?;

        let packet = {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(ErrorCode::ItemNotFound)?;
            if !matches!(
                session.state,
                SessionState::Initiated | SessionState::Ringing
            ) {
                return Err(ErrorCode::Expired);
            }
            let sealed = self.seal_sdp(session, session_id, &sdp)?;
            session.state = SessionState::Accepted;
            session.last_activity = now_ms();
            Packet::SessionAccept(SessionAcceptIQ {
                session_id,
                to: session.peer_twincode,
                sdp: sealed,
                offer,
                offer_to_receive,
                expiration: (now_ms() + SESSION_OFFER_TTL_MS) as i64,
            })
        };
        self.cancel_expire_watchdog(session_id);
        self.send_with_retry(session_id, RequestKind::Accept, packet, 0);
        self.arm_ping(session_id);
        Ok(())
    }

    fn cancel_expire_watchdog(&self, session_id: Uuid) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&session_id) {
            if let Some(handle) = session.expire_handle.take() {
                handle.cancel();
            }
        }
    }

    /// Renegotiate an accepted session.
    pub fn update(&self, session_id: Uuid, sdp_text: &str, offer: Offer) -> Result<(), ErrorCode> {
        let filtered = filter_codecs(sdp_text);
        let sdp = Sdp::from_text(&filtered, self.config.sdp_compress_threshold)
            .map_err(|_| ErrorCode::LibraryError)?;
        let packet = {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(ErrorCode::ItemNotFound)?;
            if session.state != SessionState::Accepted {
                return Err(ErrorCode::Expired);
            }
            let sealed = self.seal_sdp(session, session_id, &sdp)?;
            session.state = SessionState::Updating;
            session.last_activity = now_ms();
            Packet::SessionUpdate(SessionUpdateIQ {
                session_id,
                to: session.peer_twincode,
                sdp: sealed,
                offer,
                expiration: (now_ms() + SESSION_OFFER_TTL_MS) as i64,
            })
        };
        self.send_with_retry(session_id, RequestKind::Update, packet, 0);
        Ok(())
    }

    /// Send ICE candidates. Best-effort: no retry, failures are logged.
    pub fn send_transport_info(
        &self,
        session_id: Uuid,
        candidates: &TransportCandidateList,
    ) -> Result<(), ErrorCode> {
        let text = candidates.encode();
        let sdp = Sdp::from_text(&text, self.config.sdp_compress_threshold)
            .map_err(|_| ErrorCode::LibraryError)?;
        let packet = {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(ErrorCode::ItemNotFound)?;
            let sealed = self.seal_sdp(session, session_id, &sdp)?;
            session.last_activity = now_ms();
            Packet::TransportInfo(TransportInfoIQ {
                session_id,
                to: session.peer_twincode,
                frames: vec![sealed],
            })
        };
        self.signaling.request(
            packet,
            Box::new(move |code, _| {
                if code != ErrorCode::Success {
                    debug!(%session_id, ?code, "transport-info not delivered");
                }
            }),
        );
        Ok(())
    }

    /// Terminate a session with `reason`.
    pub fn terminate(&self, session_id: Uuid, reason: TerminateReason) -> Result<(), ErrorCode> {
        let packet = {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get_mut(&session_id)
                .ok_or(ErrorCode::ItemNotFound)?;
            if matches!(
                session.state,
                SessionState::Terminating | SessionState::Closed
            ) {
                return Ok(());
            }
            session.state = SessionState::Terminating;
            Packet::SessionTerminate(SessionTerminateIQ {
                session_id,
                to: session.peer_twincode,
                reason,
            })
        };
        self.send_with_retry(session_id, RequestKind::Terminate, packet, 0);
        Ok(())
    }

    fn arm_ping(&self, session_id: Uuid) {
        let Some(svc) = self.strong() else {
            return;
        };
        let interval = Duration::from_millis(self.config.ping_interval_ms);
        let handle = self
            .signaling
            .executor()
            .schedule(interval, move || {
                svc.on_ping_tick(session_id);
            });
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&session_id) {
            if let Some(old) = session.ping_handle.replace(handle) {
                old.cancel();
            }
        }
    }

    fn on_ping_tick(&self, session_id: Uuid) {
        let peer = {
            let sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.get(&session_id) else {
                return;
            };
            if session.state != SessionState::Accepted && session.state != SessionState::Updating {
                return;
            }
            // Recent traffic makes the probe unnecessary.
            if now_ms().saturating_sub(session.last_activity) < self.config.ping_interval_ms {
                None
            } else {
                Some(session.peer_twincode)
            }
        };

        match peer {
            None => self.arm_ping(session_id),
            Some(peer) => {
                let Some(svc) = self.strong() else {
                    return;
                };
                self.signaling.request(
                    Packet::SessionPing(SessionPingIQ {
                        session_id,
                        to: peer,
                        expiration: (now_ms() + self.config.request_timeout_ms) as i64,
                    }),
                    Box::new(move |code, _| match code {
                        ErrorCode::Success => {
                            if let Some(session) =
                                svc.sessions.lock().unwrap().get_mut(&session_id)
                            {
                                session.last_activity = now_ms();
                            }
                            svc.arm_ping(session_id);
                        }
                        other => {
                            info!(%session_id, ?other, "ping failed, closing session");
                            svc.close_session(session_id, reason_from_code(other), true);
                        }
                    }),
                );
            }
        }
    }

    fn close_session(&self, session_id: Uuid, reason: TerminateReason, notify: bool) {
        let session = self.sessions.lock().unwrap().remove(&session_id);
        let Some(session) = session else {
            return;
        };
        if let Some(handle) = session.ping_handle {
            handle.cancel();
        }
        if let Some(handle) = session.expire_handle {
            handle.cancel();
        }
        session.key_pair.dispose();
        self.metrics.sessions_active.dec();
        info!(%session_id, ?reason, "session closed");
        if notify {
            self.dispatch(move |observer| observer.on_session_terminate(session_id, reason));
        }
    }

    fn gate_expiration(expiration: i64) -> Result<(), ErrorCode> {
        if expiration > 0 && (expiration as u64) < now_ms() {
            return Err(ErrorCode::Expired);
        }
        Ok(())
    }

    /// Inbound offer (from the packet handler).
    pub fn handle_initiate(&self, iq: &SessionInitiateIQ) -> ErrorCode {
        if let Err(code) = Self::gate_expiration(iq.expiration) {
            return code;
        }
        if iq.min_version > SESSION_VERSION_MAX {
            return ErrorCode::NotAuthorized;
        }
        if self.sessions.lock().unwrap().contains_key(&iq.session_id) {
            return ErrorCode::Success;
        }

        let local_id = match self.keystore.twincode_id(&iq.to) {
            Ok(Some(id)) => id,
            Ok(None) => return ErrorCode::ItemNotFound,
            Err(_) => return ErrorCode::DatabaseError,
        };
        let peer_id = match self.keystore.register_twincode(&iq.from) {
            Ok(id) => id,
            Err(_) => return ErrorCode::DatabaseError,
        };

        let key_pair = match self.build_key_pair(
            iq.session_id,
            local_id,
            peer_id,
            &iq.from,
            SecretOption::None,
        ) {
            Ok(kp) => kp,
            Err(code) => return code,
        };

        let mut session = P2PSession {
            local_twincode: iq.to,
            peer_twincode: iq.from,
            local_id,
            peer_id,
            state: SessionState::Initiated,
            key_pair,
            expiration: iq.expiration.max(0) as u64,
            last_activity: now_ms(),
            ping_handle: None,
            expire_handle: None,
        };

        let sdp_text = match self.open_sdp(&mut session, &iq.sdp) {
            Ok(text) => text,
            Err(code) => {
                session.key_pair.dispose();
                return code;
            }
        };

        let session_id = iq.session_id;
        let (from, offer, offer_to_receive) = (iq.from, iq.offer, iq.offer_to_receive);
        self.insert_session(session_id, session);
        self.arm_expire_watchdog(session_id, iq.expiration.max(0) as u64);
        self.dispatch(move |observer| {
            observer.on_session_initiate(session_id, from, sdp_text, offer, offer_to_receive)
        });
        ErrorCode::Success
    }

    /// Inbound answer (caller side).
    pub fn handle_accept(&self, iq: &SessionAcceptIQ) -> ErrorCode {
        if let Err(code) = Self::gate_expiration(iq.expiration) {
            return code;
        }
        let opened = {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(&iq.session_id) else {
                return ErrorCode::ItemNotFound;
            };
            if !matches!(
                session.state,
                SessionState::Initiated | SessionState::Ringing
            ) {
                return ErrorCode::Success; // replay after accept
            }
            match self.open_sdp(session, &iq.sdp) {
                Ok(text) => {
                    session.state = SessionState::Accepted;
                    session.last_activity = now_ms();
                    Ok(text)
                }
                Err(code) => Err(code),
            }
        };
        let sdp_text = match opened {
            Ok(text) => text,
            Err(code) => {
                self.close_session(iq.session_id, reason_from_code(code), true);
                return code;
            }
        };
        self.cancel_expire_watchdog(iq.session_id);
        self.arm_ping(iq.session_id);
        let (session_id, offer) = (iq.session_id, iq.offer);
        self.dispatch(move |observer| observer.on_session_accept(session_id, sdp_text, offer));
        ErrorCode::Success
    }

    /// Inbound renegotiation.
    pub fn handle_update(&self, iq: &SessionUpdateIQ) -> ErrorCode {
        if let Err(code) = Self::gate_expiration(iq.expiration) {
            return code;
        }
        let opened = {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(&iq.session_id) else {
                return ErrorCode::ItemNotFound;
            };
            if !matches!(
                session.state,
                SessionState::Accepted | SessionState::Updating
            ) {
                return ErrorCode::Expired;
            }
            match self.open_sdp(session, &iq.sdp) {
                Ok(text) => {
                    session.last_activity = now_ms();
                    Ok(text)
                }
                Err(code) => Err(code),
            }
        };
        let sdp_text = match opened {
            Ok(text) => text,
            Err(code) => {
                self.close_session(iq.session_id, reason_from_code(code), true);
                return code;
            }
        };
        let (session_id, offer) = (iq.session_id, iq.offer);
        self.dispatch(move |observer| observer.on_session_update(session_id, sdp_text, offer));
        ErrorCode::Success
    }

    /// Inbound candidate chain. The walk stops at the first frame the
    /// observer rejects; an empty inner frame is a framing error.
    pub fn handle_transport_info(&self, iq: &TransportInfoIQ) -> ErrorCode {
        let observer = self.observer();
        for frame in &iq.frames {
            if frame.data.is_empty() {
                return ErrorCode::BadEncryptionFormat;
            }
            let text = {
                let mut sessions = self.sessions.lock().unwrap();
                let Some(session) = sessions.get_mut(&iq.session_id) else {
                    return ErrorCode::ItemNotFound;
                };
                match self.open_sdp(session, frame) {
                    Ok(text) => {
                        session.last_activity = now_ms();
                        text
                    }
                    Err(code) => return code,
                }
            };
            let candidates = match TransportCandidateList::decode(&text) {
                Ok(list) => list,
                Err(_) => return ErrorCode::BadEncryptionFormat,
            };
            if let Some(observer) = observer.as_ref() {
                let code = observer.on_transport_info(iq.session_id, candidates);
                if code != ErrorCode::Success {
                    return code;
                }
            }
        }
        ErrorCode::Success
    }

    /// Inbound termination.
    pub fn handle_terminate(&self, iq: &SessionTerminateIQ) -> ErrorCode {
        if self.session_state(&iq.session_id).is_none() {
            return ErrorCode::ItemNotFound;
        }
        self.close_session(iq.session_id, iq.reason, true);
        ErrorCode::Success
    }

    /// Inbound liveness probe: `SUCCESS` for a live session, `EXPIRED`
    /// otherwise.
    pub fn handle_ping(&self, iq: &SessionPingIQ) -> ErrorCode {
        if Self::gate_expiration(iq.expiration).is_err() {
            return ErrorCode::Expired;
        }
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(&iq.session_id) {
            Some(session) if session.state != SessionState::Closed => {
                session.last_activity = now_ms();
                ErrorCode::Success
            }
            _ => ErrorCode::Expired,
        }
    }

    /// Inbound ringing hint (caller side).
    pub fn handle_device_ringing(&self, iq: &DeviceRingingIQ) {
        let mut ringing = false;
        {
            let mut sessions = self.sessions.lock().unwrap();
            if let Some(session) = sessions.get_mut(&iq.session_id) {
                if session.state == SessionState::Initiated {
                    session.state = SessionState::Ringing;
                    session.last_activity = now_ms();
                    ringing = true;
                }
            }
        }
        if ringing {
            let session_id = iq.session_id;
            self.dispatch(move |observer| observer.on_session_ringing(session_id));
        }
    }
}
