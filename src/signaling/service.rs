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

//! Request/response correlation and inbound dispatch.
//!
//! Every outbound IQ gets a fresh request id and a pending entry holding
//! its continuation; a watchdog completes the entry with `TIMEOUT` when
//! the deadline passes. Inbound packets are decoded, routed by schema to
//! the registered [`PacketHandler`], and answered with an ack carrying
//! the handler's error code. A bounded window of recently seen request
//! ids suppresses duplicate notifications.
//!
//! The single monitor guards the pending map and the duplicate window;
//! it is never held across connection I/O.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::security::primitives;
use crate::core::types::ErrorCode;
use crate::monitoring::metrics::Metrics;
use crate::runtime::executor::{ScheduledHandle, SerialExecutor};
use crate::signaling::schemas::{
    AckIQ, DeviceRingingIQ, InviteCallRoomIQ, MemberNotificationIQ, Packet, SessionAcceptIQ,
    SessionInitiateIQ, SessionPingIQ, SessionTerminateIQ, SessionUpdateIQ, TransportInfoIQ,
};

/// Reliable, ordered, authenticated transport to the broker.
pub trait Connection: Send + Sync {
    /// Send one packet; blocks at most `timeout`.
    fn send(&self, bytes: &[u8], timeout: Duration) -> Result<(), ErrorCode>;
    /// Transport liveness.
    fn is_connected(&self) -> bool;
}

/// Completion of an outbound request: error code plus the response
/// payload for request/response pairs (`None` for plain acks).
pub type Continuation = Box<dyn FnOnce(ErrorCode, Option<Packet>) + Send>;

/// Core-side handlers for inbound request packets. Implemented by the
/// call-room and session services; the returned code goes into the ack.
pub trait PacketHandler: Send + Sync {
    /// Room invitation push.
    fn on_invite_call_room(&self, iq: &InviteCallRoomIQ) -> ErrorCode;
    /// Roster change push.
    fn on_member_notification(&self, iq: &MemberNotificationIQ) -> ErrorCode;
    /// Inbound session offer.
    fn on_session_initiate(&self, iq: &SessionInitiateIQ) -> ErrorCode;
    /// Inbound session answer.
    fn on_session_accept(&self, iq: &SessionAcceptIQ) -> ErrorCode;
    /// Inbound renegotiation.
    fn on_session_update(&self, iq: &SessionUpdateIQ) -> ErrorCode;
    /// Inbound ICE candidates.
    fn on_transport_info(&self, iq: &TransportInfoIQ) -> ErrorCode;
    /// Inbound termination.
    fn on_session_terminate(&self, iq: &SessionTerminateIQ) -> ErrorCode;
    /// Liveness probe; `SUCCESS` or `EXPIRED`.
    fn on_session_ping(&self, iq: &SessionPingIQ) -> ErrorCode;
    /// Callee-side ringing hint (no reply).
    fn on_device_ringing(&self, iq: &DeviceRingingIQ);
}

struct PendingRequest {
    continuation: Continuation,
    watchdog: Option<ScheduledHandle>,
}

struct State {
    pending: BTreeMap<i64, PendingRequest>,
    seen: BTreeSet<i64>,
    seen_order: VecDeque<i64>,
}

const SEEN_WINDOW: usize = 1024;

/// The signaling front end.
pub struct SignalingService {
    me: Weak<SignalingService>,
    connection: Arc<dyn Connection>,
    executor: SerialExecutor,
    metrics: Arc<Metrics>,
    request_id: AtomicI64,
    send_timeout: Duration,
    request_timeout: Duration,
    state: Mutex<State>,
    handler: Mutex<Option<Arc<dyn PacketHandler>>>,
}

impl SignalingService {
    /// Build the service. The request-id counter is seeded from the
    /// CSPRNG and increases monotonically.
    pub fn new(
        connection: Arc<dyn Connection>,
        executor: SerialExecutor,
        metrics: Arc<Metrics>,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let seed = primitives::random_u64().unwrap_or(1) >> 2;
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            connection,
            executor,
            metrics,
            request_id: AtomicI64::new(seed as i64),
            send_timeout: Duration::from_secs(5),
            request_timeout,
            state: Mutex::new(State {
                pending: BTreeMap::new(),
                seen: BTreeSet::new(),
                seen_order: VecDeque::new(),
            }),
            handler: Mutex::new(None),
        })
    }

    fn strong(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }

    /// Register the inbound packet handler (room + session services).
    pub fn set_handler(&self, handler: Arc<dyn PacketHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    /// The serial executor shared with the rest of the core.
    pub fn executor(&self) -> &SerialExecutor {
        &self.executor
    }

    fn next_request_id(&self) -> i64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of outstanding requests (tests and diagnostics).
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Emit a request IQ and park `continuation` until the response,
    /// an error, or the watchdog fires. Returns the request id.
    pub fn request(&self, packet: Packet, continuation: Continuation) -> i64 {
        let request_id = self.next_request_id();
        let bytes = packet.encode(request_id);

        let watchdog = self.strong().map(|svc| {
            self.executor.schedule(self.request_timeout, move || {
                if svc.complete(request_id, ErrorCode::Timeout, None) {
                    svc.metrics.signaling_timeout_total.inc();
                }
            })
        });

        {
            let mut state = self.state.lock().unwrap();
            state.pending.insert(
                request_id,
                PendingRequest {
                    continuation,
                    watchdog,
                },
            );
        }

        // Monitor dropped before I/O.
        match self.connection.send(&bytes, self.send_timeout) {
            Ok(()) => {
                self.metrics.signaling_out_total.inc();
            }
            Err(code) => {
                warn!(request_id, ?code, "signaling send failed");
                self.complete(request_id, code, None);
            }
        }
        request_id
    }

    /// Emit a fire-and-forget IQ (device-ringing, invites). Returns the
    /// request id used on the wire.
    pub fn notify(&self, packet: Packet) -> i64 {
        let request_id = self.next_request_id();
        let bytes = packet.encode(request_id);
        match self.connection.send(&bytes, self.send_timeout) {
            Ok(()) => self.metrics.signaling_out_total.inc(),
            Err(code) => debug!(request_id, ?code, "notify dropped"),
        }
        request_id
    }

    /// Remove a pending entry and run its continuation on the executor.
    /// A missing entry is a no-op (late response after cancel/timeout);
    /// returns whether an entry was consumed.
    fn complete(&self, request_id: i64, code: ErrorCode, payload: Option<Packet>) -> bool {
        let entry = {
            let mut state = self.state.lock().unwrap();
            state.pending.remove(&request_id)
        };
        let Some(entry) = entry else {
            return false;
        };
        if let Some(watchdog) = entry.watchdog {
            watchdog.cancel();
        }
        let continuation = entry.continuation;
        self.executor.execute(move || continuation(code, payload));
        true
    }

    /// Cancel an in-flight request. The peer side is not aborted; a
    /// late response is routed to a no-op.
    pub fn cancel(&self, request_id: i64) {
        let entry = {
            let mut state = self.state.lock().unwrap();
            state.pending.remove(&request_id)
        };
        if let Some(entry) = entry {
            if let Some(watchdog) = entry.watchdog {
                watchdog.cancel();
            }
        }
    }

    /// Complete every outstanding continuation with `DISCONNECTED` and
    /// clear the correlation state.
    pub fn on_sign_out(&self) {
        let pending = {
            let mut state = self.state.lock().unwrap();
            state.seen.clear();
            state.seen_order.clear();
            std::mem::take(&mut state.pending)
        };
        for (_, entry) in pending {
            if let Some(watchdog) = entry.watchdog {
                watchdog.cancel();
            }
            let continuation = entry.continuation;
            self.executor
                .execute(move || continuation(ErrorCode::Disconnected, None));
        }
    }

    /// Entry point for bytes delivered by the connection. Decoding and
    /// handling run as one executor task.
    pub fn on_packet(&self, bytes: Vec<u8>) {
        let Some(svc) = self.strong() else {
            return;
        };
        self.executor.execute(move || svc.handle_packet(&bytes));
    }

    /// True when `request_id` already produced a handler call.
    fn check_duplicate(&self, request_id: i64) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.seen.contains(&request_id) {
            return true;
        }
        state.seen.insert(request_id);
        state.seen_order.push_back(request_id);
        if state.seen_order.len() > SEEN_WINDOW {
            if let Some(old) = state.seen_order.pop_front() {
                state.seen.remove(&old);
            }
        }
        false
    }

    fn send_ack(&self, request_id: i64, code: ErrorCode) {
        let bytes = Packet::Ack(AckIQ { error_code: code }).encode(request_id);
        if let Err(err) = self.connection.send(&bytes, self.send_timeout) {
            debug!(request_id, ?err, "ack send failed");
        } else {
            self.metrics.signaling_out_total.inc();
        }
    }

    fn handle_packet(&self, bytes: &[u8]) {
        let (request_id, packet) = match Packet::decode(bytes) {
            Ok(v) => v,
            Err(err) => {
                // Malformed packets are dropped; the peer retries or expires.
                self.metrics.signaling_invalid_total.inc();
                debug!(?err, "dropping undecodable packet");
                return;
            }
        };
        self.metrics.signaling_in_total.inc();

        let request = match packet {
            Packet::Ack(iq) => {
                self.complete(request_id, iq.error_code, None);
                return;
            }
            response @ (Packet::OnCreateCallRoom(_)
            | Packet::OnJoinCallRoom(_)
            | Packet::OnLeaveCallRoom(_)
            | Packet::OnDestroyCallRoom(_)) => {
                self.complete(request_id, ErrorCode::Success, Some(response));
                return;
            }
            request => request,
        };

        // Ping is exempt from duplicate suppression: a replayed probe
        // still deserves a fresh liveness answer.
        let is_ping = matches!(request, Packet::SessionPing(_));
        if !is_ping && self.check_duplicate(request_id) {
            self.metrics.signaling_duplicate_total.inc();
            self.send_ack(request_id, ErrorCode::Success);
            return;
        }

        let handler = self.handler.lock().unwrap().clone();
        let Some(handler) = handler else {
            self.send_ack(request_id, ErrorCode::ServiceUnavailable);
            return;
        };

        match request {
            Packet::InviteCallRoom(iq) => {
                let code = handler.on_invite_call_room(&iq);
                self.send_ack(request_id, code);
            }
            Packet::MemberNotification(iq) => {
                let code = handler.on_member_notification(&iq);
                self.send_ack(request_id, code);
            }
            Packet::SessionInitiate(iq) => {
                let code = handler.on_session_initiate(&iq);
                self.send_ack(request_id, code);
            }
            Packet::SessionAccept(iq) => {
                let code = handler.on_session_accept(&iq);
                self.send_ack(request_id, code);
            }
            Packet::SessionUpdate(iq) => {
                let code = handler.on_session_update(&iq);
                self.send_ack(request_id, code);
            }
            Packet::TransportInfo(iq) => {
                let code = handler.on_transport_info(&iq);
                self.send_ack(request_id, code);
            }
            Packet::SessionTerminate(iq) => {
                let code = handler.on_session_terminate(&iq);
                self.send_ack(request_id, code);
            }
            Packet::SessionPing(iq) => {
                let code = handler.on_session_ping(&iq);
                self.send_ack(request_id, code);
            }
            Packet::DeviceRinging(iq) => {
                handler.on_device_ringing(&iq);
            }
            // Requests we never receive as a client are dropped.
            other => {
                debug!(schema = %other.schema_id(), "unexpected inbound packet");
                self.metrics.signaling_invalid_total.inc();
            }
        }
    }
}
