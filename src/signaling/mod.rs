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

//! Signaling stack: wire schemas, the request/response front end, and
//! the call-room and P2P-session state machines.

use std::sync::Arc;

use crate::core::types::ErrorCode;

/// Call-room lifecycle.
pub mod call_room;
/// IQ catalogue.
pub mod schemas;
/// Per-session state machine.
pub mod session;
/// Correlation table and dispatch.
pub mod service;

/// Routes inbound request packets to the room and session services.
/// Register it on the [`service::SignalingService`] after wiring both.
pub struct CoreHandler {
    rooms: Arc<call_room::CallRoomService>,
    sessions: Arc<session::SessionService>,
}

impl CoreHandler {
    /// Bundle the two services.
    pub fn new(
        rooms: Arc<call_room::CallRoomService>,
        sessions: Arc<session::SessionService>,
    ) -> Arc<Self> {
        Arc::new(Self { rooms, sessions })
    }
}

impl service::PacketHandler for CoreHandler {
    fn on_invite_call_room(&self, iq: &schemas::InviteCallRoomIQ) -> ErrorCode {
        self.rooms.handle_invite(iq)
    }

    fn on_member_notification(&self, iq: &schemas::MemberNotificationIQ) -> ErrorCode {
        self.rooms.handle_member_notification(iq)
    }

    fn on_session_initiate(&self, iq: &schemas::SessionInitiateIQ) -> ErrorCode {
        self.sessions.handle_initiate(iq)
    }

    fn on_session_accept(&self, iq: &schemas::SessionAcceptIQ) -> ErrorCode {
        self.sessions.handle_accept(iq)
    }

    fn on_session_update(&self, iq: &schemas::SessionUpdateIQ) -> ErrorCode {
        self.sessions.handle_update(iq)
    }

    fn on_transport_info(&self, iq: &schemas::TransportInfoIQ) -> ErrorCode {
        self.sessions.handle_transport_info(iq)
    }

    fn on_session_terminate(&self, iq: &schemas::SessionTerminateIQ) -> ErrorCode {
        self.sessions.handle_terminate(iq)
    }

    fn on_session_ping(&self, iq: &schemas::SessionPingIQ) -> ErrorCode {
        self.sessions.handle_ping(iq)
    }

    fn on_device_ringing(&self, iq: &schemas::DeviceRingingIQ) {
        self.sessions.handle_device_ringing(iq)
    }
}
