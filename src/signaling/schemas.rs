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

//! The signaling IQ catalogue: one schema UUID per packet kind, with
//! compact-encoded bodies behind the common
//! `schemaId || schemaVersion || requestId` header.

use crate::core::codec::wire::{Encoding, PacketHeader, WireError, WireReader, WireWriter};
use crate::core::sdp::Sdp;
use crate::core::types::{ErrorCode, Offer, TerminateReason};
use uuid::Uuid;

/// Create a call room.
pub const SCHEMA_CREATE_CALL_ROOM: Uuid = Uuid::from_u128(0x7a1d04c2_5b2f_4d6e_9a41_0c80d1e52a01);
/// Response to [`SCHEMA_CREATE_CALL_ROOM`].
pub const SCHEMA_ON_CREATE_CALL_ROOM: Uuid =
    Uuid::from_u128(0x7a1d04c2_5b2f_4d6e_9a41_0c80d1e52a02);
/// Room invitation (server push or outbound invite).
pub const SCHEMA_INVITE_CALL_ROOM: Uuid = Uuid::from_u128(0x7a1d04c2_5b2f_4d6e_9a41_0c80d1e52a03);
/// Join a room.
pub const SCHEMA_JOIN_CALL_ROOM: Uuid = Uuid::from_u128(0x7a1d04c2_5b2f_4d6e_9a41_0c80d1e52a04);
/// Response to [`SCHEMA_JOIN_CALL_ROOM`].
pub const SCHEMA_ON_JOIN_CALL_ROOM: Uuid = Uuid::from_u128(0x7a1d04c2_5b2f_4d6e_9a41_0c80d1e52a05);
/// Leave a room.
pub const SCHEMA_LEAVE_CALL_ROOM: Uuid = Uuid::from_u128(0x7a1d04c2_5b2f_4d6e_9a41_0c80d1e52a06);
/// Response to [`SCHEMA_LEAVE_CALL_ROOM`].
pub const SCHEMA_ON_LEAVE_CALL_ROOM: Uuid =
    Uuid::from_u128(0x7a1d04c2_5b2f_4d6e_9a41_0c80d1e52a07);
/// Destroy a room (owner only).
pub const SCHEMA_DESTROY_CALL_ROOM: Uuid = Uuid::from_u128(0x7a1d04c2_5b2f_4d6e_9a41_0c80d1e52a08);
/// Response to [`SCHEMA_DESTROY_CALL_ROOM`].
pub const SCHEMA_ON_DESTROY_CALL_ROOM: Uuid =
    Uuid::from_u128(0x7a1d04c2_5b2f_4d6e_9a41_0c80d1e52a09);
/// Member change push.
pub const SCHEMA_MEMBER_NOTIFICATION: Uuid =
    Uuid::from_u128(0x7a1d04c2_5b2f_4d6e_9a41_0c80d1e52a0a);

/// P2P session-initiate.
pub const SCHEMA_SESSION_INITIATE: Uuid = Uuid::from_u128(0x3fb8e6d0_914a_4c27_8d05_62aa7b9ce101);
/// P2P session-accept.
pub const SCHEMA_SESSION_ACCEPT: Uuid = Uuid::from_u128(0x3fb8e6d0_914a_4c27_8d05_62aa7b9ce102);
/// P2P session-update.
pub const SCHEMA_SESSION_UPDATE: Uuid = Uuid::from_u128(0x3fb8e6d0_914a_4c27_8d05_62aa7b9ce103);
/// P2P transport-info (ICE candidates).
pub const SCHEMA_TRANSPORT_INFO: Uuid = Uuid::from_u128(0x3fb8e6d0_914a_4c27_8d05_62aa7b9ce104);
/// P2P session-terminate.
pub const SCHEMA_SESSION_TERMINATE: Uuid = Uuid::from_u128(0x3fb8e6d0_914a_4c27_8d05_62aa7b9ce105);
/// P2P session-ping.
pub const SCHEMA_SESSION_PING: Uuid = Uuid::from_u128(0x3fb8e6d0_914a_4c27_8d05_62aa7b9ce106);
/// Device-ringing hint.
pub const SCHEMA_DEVICE_RINGING: Uuid = Uuid::from_u128(0x3fb8e6d0_914a_4c27_8d05_62aa7b9ce107);
/// Generic ack carrying an error code.
pub const SCHEMA_ACK: Uuid = Uuid::from_u128(0x3fb8e6d0_914a_4c27_8d05_62aa7b9ce1ff);

/// Current schema version, common to the catalogue.
pub const SCHEMA_VERSION: i32 = 1;

/// Marker bit chaining another `(mode, sdp)` pair inside a
/// transport-info body.
pub const HAS_NEXT_MARKER: u32 = 0x8000_0000;

/// A member joined; a P2P session to it already exists.
pub const MEMBER_NEW: u32 = 0;
/// A member joined and needs a P2P session from us.
pub const MEMBER_NEW_NEED_SESSION: u32 = 1;
/// A member left.
pub const MEMBER_DEL: u32 = 2;

/// Pack flags plus the SDP transport bits into the 32-bit offer word.
pub fn offer_word(flags: Offer, sdp: &Sdp) -> u32 {
    let mut flags = flags;
    if sdp.compressed {
        flags |= Offer::COMPRESSED;
    }
    flags.pack(sdp.key_index)
}

/// Split an offer word back into flags and an [`Sdp`] around `data`.
pub fn sdp_from_word(data: Vec<u8>, word: u32) -> (Offer, Sdp) {
    let (flags, key_index) = Offer::unpack(word);
    let compressed = flags.contains(Offer::COMPRESSED);
    (
        flags & !Offer::COMPRESSED,
        Sdp {
            data,
            compressed,
            key_index,
        },
    )
}

/// Create-room request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateCallRoomIQ {
    /// Owner twincode.
    pub twincode: Uuid,
    /// Room mode bits.
    pub mode: u32,
    /// Requested roster cap.
    pub max_members: i32,
}

/// Create-room response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnCreateCallRoomIQ {
    /// New room id.
    pub room_id: Uuid,
    /// Our member id in the roster.
    pub member_id: Uuid,
    /// Granted roster cap.
    pub max_members: i32,
}

/// Invitation (push to the invitee, request from the inviter).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InviteCallRoomIQ {
    /// Room id.
    pub room_id: Uuid,
    /// Inviting twincode.
    pub from_twincode: Uuid,
    /// Invited twincode.
    pub to_twincode: Uuid,
    /// Room mode bits.
    pub mode: u32,
}

/// Join-room request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinCallRoomIQ {
    /// Room id.
    pub room_id: Uuid,
    /// Joining twincode.
    pub twincode: Uuid,
    /// P2P session already open towards the room, if any.
    pub p2p_session_id: Option<Uuid>,
}

/// One roster entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberInfo {
    /// Member id.
    pub member_id: Uuid,
    /// Member twincode.
    pub twincode: Uuid,
    /// `MEMBER_*` status.
    pub status: u32,
    /// P2P session towards the member, if established.
    pub p2p_session_id: Option<Uuid>,
}

/// Join-room response with the current roster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnJoinCallRoomIQ {
    /// Room id.
    pub room_id: Uuid,
    /// Our member id.
    pub member_id: Uuid,
    /// Roster cap.
    pub max_members: i32,
    /// Other members.
    pub members: Vec<MemberInfo>,
}

/// Leave-room request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaveCallRoomIQ {
    /// Room id.
    pub room_id: Uuid,
    /// Our member id.
    pub member_id: Uuid,
}

/// Leave-room response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnLeaveCallRoomIQ {
    /// Room id.
    pub room_id: Uuid,
}

/// Destroy-room request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestroyCallRoomIQ {
    /// Room id.
    pub room_id: Uuid,
}

/// Destroy-room response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnDestroyCallRoomIQ {
    /// Room id.
    pub room_id: Uuid,
}

/// Roster change push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberNotificationIQ {
    /// Room id.
    pub room_id: Uuid,
    /// `MEMBER_*` event.
    pub event: u32,
    /// Member id.
    pub member_id: Uuid,
    /// Member twincode.
    pub twincode: Uuid,
    /// P2P session hint.
    pub p2p_session_id: Option<Uuid>,
}

/// Session-initiate request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInitiateIQ {
    /// Session id chosen by the caller.
    pub session_id: Uuid,
    /// Caller twincode.
    pub from: Uuid,
    /// Callee twincode.
    pub to: Uuid,
    /// Offer SDP.
    pub sdp: Sdp,
    /// Offered media.
    pub offer: Offer,
    /// Media we accept from the peer.
    pub offer_to_receive: Offer,
    /// Highest protocol version we speak.
    pub max_version: i32,
    /// Lowest protocol version we accept.
    pub min_version: i32,
    /// Deadline (ms since epoch) after which the offer is stale.
    pub expiration: i64,
}

/// Session-accept request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionAcceptIQ {
    /// Session id.
    pub session_id: Uuid,
    /// Peer twincode.
    pub to: Uuid,
    /// Answer SDP.
    pub sdp: Sdp,
    /// Accepted media.
    pub offer: Offer,
    /// Media we accept from the peer.
    pub offer_to_receive: Offer,
    /// Deadline (ms since epoch).
    pub expiration: i64,
}

/// Session-update request (renegotiation).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionUpdateIQ {
    /// Session id.
    pub session_id: Uuid,
    /// Peer twincode.
    pub to: Uuid,
    /// Offer or answer SDP ([`Offer::ANSWER`] set for answers).
    pub sdp: Sdp,
    /// Updated media flags.
    pub offer: Offer,
    /// Deadline (ms since epoch).
    pub expiration: i64,
}

/// Transport-info request: one or more candidate payloads chained by
/// [`HAS_NEXT_MARKER`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportInfoIQ {
    /// Session id.
    pub session_id: Uuid,
    /// Peer twincode.
    pub to: Uuid,
    /// Candidate payloads (encoded candidate lists, possibly sealed).
    pub frames: Vec<Sdp>,
}

/// Session-terminate request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionTerminateIQ {
    /// Session id.
    pub session_id: Uuid,
    /// Peer twincode.
    pub to: Uuid,
    /// Why the session ends.
    pub reason: TerminateReason,
}

/// Session-ping request (liveness probe).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionPingIQ {
    /// Session id.
    pub session_id: Uuid,
    /// Peer twincode.
    pub to: Uuid,
    /// Deadline (ms since epoch).
    pub expiration: i64,
}

/// Device-ringing hint (no reply expected).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRingingIQ {
    /// Session id.
    pub session_id: Uuid,
    /// Peer twincode.
    pub to: Uuid,
}

/// Ack carrying an [`ErrorCode`], correlated by the header request id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckIQ {
    /// Result of the acked request.
    pub error_code: ErrorCode,
}

/// Any packet of the catalogue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    /// Create-room request.
    CreateCallRoom(CreateCallRoomIQ),
    /// Create-room response.
    OnCreateCallRoom(OnCreateCallRoomIQ),
    /// Invitation.
    InviteCallRoom(InviteCallRoomIQ),
    /// Join request.
    JoinCallRoom(JoinCallRoomIQ),
    /// Join response.
    OnJoinCallRoom(OnJoinCallRoomIQ),
    /// Leave request.
    LeaveCallRoom(LeaveCallRoomIQ),
    /// Leave response.
    OnLeaveCallRoom(OnLeaveCallRoomIQ),
    /// Destroy request.
    DestroyCallRoom(DestroyCallRoomIQ),
    /// Destroy response.
    OnDestroyCallRoom(OnDestroyCallRoomIQ),
    /// Roster change push.
    MemberNotification(MemberNotificationIQ),
    /// Session-initiate.
    SessionInitiate(SessionInitiateIQ),
    /// Session-accept.
    SessionAccept(SessionAcceptIQ),
    /// Session-update.
    SessionUpdate(SessionUpdateIQ),
    /// Transport-info.
    TransportInfo(TransportInfoIQ),
    /// Session-terminate.
    SessionTerminate(SessionTerminateIQ),
    /// Session-ping.
    SessionPing(SessionPingIQ),
    /// Device-ringing hint.
    DeviceRinging(DeviceRingingIQ),
    /// Ack.
    Ack(AckIQ),
}

fn write_sdp(w: &mut WireWriter, sdp: &Sdp, flags: Offer) {
    w.write_int(offer_word(flags, sdp) as i32);
    w.write_bytes(&sdp.data);
}

fn read_sdp(r: &mut WireReader<'_>) -> Result<(Offer, Sdp), WireError> {
    let word = r.read_int()? as u32;
    let data = r.read_bytes()?;
    Ok(sdp_from_word(data, word))
}

impl Packet {
    /// Schema UUID of this packet.
    pub fn schema_id(&self) -> Uuid {
        match self {
            Packet::CreateCallRoom(_) => SCHEMA_CREATE_CALL_ROOM,
            Packet::OnCreateCallRoom(_) => SCHEMA_ON_CREATE_CALL_ROOM,
            Packet::InviteCallRoom(_) => SCHEMA_INVITE_CALL_ROOM,
            Packet::JoinCallRoom(_) => SCHEMA_JOIN_CALL_ROOM,
            Packet::OnJoinCallRoom(_) => SCHEMA_ON_JOIN_CALL_ROOM,
            Packet::LeaveCallRoom(_) => SCHEMA_LEAVE_CALL_ROOM,
            Packet::OnLeaveCallRoom(_) => SCHEMA_ON_LEAVE_CALL_ROOM,
            Packet::DestroyCallRoom(_) => SCHEMA_DESTROY_CALL_ROOM,
            Packet::OnDestroyCallRoom(_) => SCHEMA_ON_DESTROY_CALL_ROOM,
            Packet::MemberNotification(_) => SCHEMA_MEMBER_NOTIFICATION,
            Packet::SessionInitiate(_) => SCHEMA_SESSION_INITIATE,
            Packet::SessionAccept(_) => SCHEMA_SESSION_ACCEPT,
            Packet::SessionUpdate(_) => SCHEMA_SESSION_UPDATE,
            Packet::TransportInfo(_) => SCHEMA_TRANSPORT_INFO,
            Packet::SessionTerminate(_) => SCHEMA_SESSION_TERMINATE,
            Packet::SessionPing(_) => SCHEMA_SESSION_PING,
            Packet::DeviceRinging(_) => SCHEMA_DEVICE_RINGING,
            Packet::Ack(_) => SCHEMA_ACK,
        }
    }

    /// Serialize header plus body with the compact encoding.
    pub fn encode(&self, request_id: i64) -> Vec<u8> {
        let mut w = WireWriter::new(Encoding::Compact);
        PacketHeader {
            schema_id: self.schema_id(),
            version: SCHEMA_VERSION,
            request_id,
        }
        .write(&mut w);
        self.write_body(&mut w);
        w.into_bytes()
    }

    fn write_body(&self, w: &mut WireWriter) {
        match self {
            Packet::CreateCallRoom(iq) => {
                w.write_uuid(&iq.twincode);
                w.write_int(iq.mode as i32);
                w.write_int(iq.max_members);
            }
            Packet::OnCreateCallRoom(iq) => {
                w.write_uuid(&iq.room_id);
                w.write_uuid(&iq.member_id);
                w.write_int(iq.max_members);
            }
            Packet::InviteCallRoom(iq) => {
                w.write_uuid(&iq.room_id);
                w.write_uuid(&iq.from_twincode);
                w.write_uuid(&iq.to_twincode);
                w.write_int(iq.mode as i32);
            }
            Packet::JoinCallRoom(iq) => {
                w.write_uuid(&iq.room_id);
                w.write_uuid(&iq.twincode);
                w.write_optional(iq.p2p_session_id.as_ref(), |w, v| w.write_uuid(v));
            }
            Packet::OnJoinCallRoom(iq) => {
                w.write_uuid(&iq.room_id);
                w.write_uuid(&iq.member_id);
                w.write_int(iq.max_members);
                w.write_int(iq.members.len() as i32);
                for m in &iq.members {
                    w.write_uuid(&m.member_id);
                    w.write_uuid(&m.twincode);
                    w.write_int(m.status as i32);
                    w.write_optional(m.p2p_session_id.as_ref(), |w, v| w.write_uuid(v));
                }
            }
            Packet::LeaveCallRoom(iq) => {
                w.write_uuid(&iq.room_id);
                w.write_uuid(&iq.member_id);
            }
            Packet::OnLeaveCallRoom(iq) => w.write_uuid(&iq.room_id),
            Packet::DestroyCallRoom(iq) => w.write_uuid(&iq.room_id),
            Packet::OnDestroyCallRoom(iq) => w.write_uuid(&iq.room_id),
            Packet::MemberNotification(iq) => {
                w.write_uuid(&iq.room_id);
                w.write_int(iq.event as i32);
                w.write_uuid(&iq.member_id);
                w.write_uuid(&iq.twincode);
                w.write_optional(iq.p2p_session_id.as_ref(), |w, v| w.write_uuid(v));
            }
            Packet::SessionInitiate(iq) => {
                w.write_uuid(&iq.session_id);
                w.write_uuid(&iq.from);
                w.write_uuid(&iq.to);
                write_sdp(w, &iq.sdp, iq.offer);
                w.write_int(iq.offer_to_receive.pack(0) as i32);
                w.write_int(iq.max_version);
                w.write_int(iq.min_version);
                w.write_long(iq.expiration);
            }
            Packet::SessionAccept(iq) => {
                w.write_uuid(&iq.session_id);
                w.write_uuid(&iq.to);
                write_sdp(w, &iq.sdp, iq.offer);
                w.write_int(iq.offer_to_receive.pack(0) as i32);
                w.write_long(iq.expiration);
            }
            Packet::SessionUpdate(iq) => {
                w.write_uuid(&iq.session_id);
                w.write_uuid(&iq.to);
                write_sdp(w, &iq.sdp, iq.offer);
                w.write_long(iq.expiration);
            }
            Packet::TransportInfo(iq) => {
                w.write_uuid(&iq.session_id);
                w.write_uuid(&iq.to);
                for (i, frame) in iq.frames.iter().enumerate() {
                    let mut word = offer_word(Offer::empty(), frame);
                    if i + 1 < iq.frames.len() {
                        word |= HAS_NEXT_MARKER;
                    }
                    w.write_int(word as i32);
                    w.write_bytes(&frame.data);
                }
            }
            Packet::SessionTerminate(iq) => {
                w.write_uuid(&iq.session_id);
                w.write_uuid(&iq.to);
                w.write_int(iq.reason.value() as i32);
            }
            Packet::SessionPing(iq) => {
                w.write_uuid(&iq.session_id);
                w.write_uuid(&iq.to);
                w.write_long(iq.expiration);
            }
            Packet::DeviceRinging(iq) => {
                w.write_uuid(&iq.session_id);
                w.write_uuid(&iq.to);
            }
            Packet::Ack(iq) => {
                w.write_int(iq.error_code.value() as i32);
            }
        }
    }

    /// Parse a packet. Unknown schema ids fail with `UnknownSchema`,
    /// trailing garbage with `bad format`.
    pub fn decode(bytes: &[u8]) -> Result<(i64, Packet), WireError> {
        let mut r = WireReader::new(Encoding::Compact, bytes);
        let header = PacketHeader::read(&mut r)?;
        if header.version > SCHEMA_VERSION {
            return Err(WireError::BadFormat);
        }
        let packet = Self::read_body(header.schema_id, &mut r)?;
        r.expect_end()?;
        Ok((header.request_id, packet))
    }

    fn read_body(schema_id: Uuid, r: &mut WireReader<'_>) -> Result<Packet, WireError> {
        let packet = match schema_id {
            id if id == SCHEMA_CREATE_CALL_ROOM => Packet::CreateCallRoom(CreateCallRoomIQ {
                twincode: r.read_uuid()?,
                mode: r.read_int()? as u32,
                max_members: r.read_int()?,
            }),
            id if id == SCHEMA_ON_CREATE_CALL_ROOM => {
                Packet::OnCreateCallRoom(OnCreateCallRoomIQ {
                    room_id: r.read_uuid()?,
                    member_id: r.read_uuid()?,
                    max_members: r.read_int()?,
                })
            }
            id if id == SCHEMA_INVITE_CALL_ROOM => Packet::InviteCallRoom(InviteCallRoomIQ {
                room_id: r.read_uuid()?,
                from_twincode: r.read_uuid()?,
                to_twincode: r.read_uuid()?,
                mode: r.read_int()? as u32,
            }),
            id if id == SCHEMA_JOIN_CALL_ROOM => Packet::JoinCallRoom(JoinCallRoomIQ {
                room_id: r.read_uuid()?,
                twincode: r.read_uuid()?,
                p2p_session_id: r.read_optional(|r| r.read_uuid())?,
            }),
            id if id == SCHEMA_ON_JOIN_CALL_ROOM => {
                let room_id = r.read_uuid()?;
                let member_id = r.read_uuid()?;
                let max_members = r.read_int()?;
                let count = r.read_int()?;
                if count < 0 || count > 1024 {
                    return Err(WireError::BadFormat);
                }
                let mut members = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    members.push(MemberInfo {
                        member_id: r.read_uuid()?,
                        twincode: r.read_uuid()?,
                        status: r.read_int()? as u32,
                        p2p_session_id: r.read_optional(|r| r.read_uuid())?,
                    });
                }
                Packet::OnJoinCallRoom(OnJoinCallRoomIQ {
                    room_id,
                    member_id,
                    max_members,
                    members,
                })
            }
            id if id == SCHEMA_LEAVE_CALL_ROOM => Packet::LeaveCallRoom(LeaveCallRoomIQ {
                room_id: r.read_uuid()?,
                member_id: r.read_uuid()?,
            }),
            id if id == SCHEMA_ON_LEAVE_CALL_ROOM => Packet::OnLeaveCallRoom(OnLeaveCallRoomIQ {
                room_id: r.read_uuid()?,
            }),
            id if id == SCHEMA_DESTROY_CALL_ROOM => Packet::DestroyCallRoom(DestroyCallRoomIQ {
                room_id: r.read_uuid()?,
            }),
            id if id == SCHEMA_ON_DESTROY_CALL_ROOM => {
                Packet::OnDestroyCallRoom(OnDestroyCallRoomIQ {
                    room_id: r.read_uuid()?,
                })
            }
            id if id == SCHEMA_MEMBER_NOTIFICATION => {
                Packet::MemberNotification(MemberNotificationIQ {
                    room_id: r.read_uuid()?,
                    event: r.read_int()? as u32,
                    member_id: r.read_uuid()?,
                    twincode: r.read_uuid()?,
                    p2p_session_id: r.read_optional(|r| r.read_uuid())?,
                })
            }
            id if id == SCHEMA_SESSION_INITIATE => {
                let session_id = r.read_uuid()?;
                let from = r.read_uuid()?;
                let to = r.read_uuid()?;
                let (offer, sdp) = read_sdp(r)?;
                let (offer_to_receive, _) = Offer::unpack(r.read_int()? as u32);
                Packet::SessionInitiate(SessionInitiateIQ {
                    session_id,
                    from,
                    to,
                    sdp,
                    offer,
                    offer_to_receive,
                    max_version: r.read_int()?,
                    min_version: r.read_int()?,
                    expiration: r.read_long()?,
                })
            }
            id if id == SCHEMA_SESSION_ACCEPT => {
                let session_id = r.read_uuid()?;
                let to = r.read_uuid()?;
                let (offer, sdp) = read_sdp(r)?;
                let (offer_to_receive, _) = Offer::unpack(r.read_int()? as u32);
                Packet::SessionAccept(SessionAcceptIQ {
                    session_id,
                    to,
                    sdp,
                    offer,
                    offer_to_receive,
                    expiration: r.read_long()?,
                })
            }
            id if id == SCHEMA_SESSION_UPDATE => {
                let session_id = r.read_uuid()?;
                let to = r.read_uuid()?;
                let (offer, sdp) = read_sdp(r)?;
                Packet::SessionUpdate(SessionUpdateIQ {
                    session_id,
                    to,
                    sdp,
                    offer,
                    expiration: r.read_long()?,
                })
            }
            id if id == SCHEMA_TRANSPORT_INFO => {
                let session_id = r.read_uuid()?;
                let to = r.read_uuid()?;
                let mut frames = Vec::new();
                loop {
                    let word = r.read_int()? as u32;
                    let data = r.read_bytes()?;
                    let (_, sdp) = sdp_from_word(data, word & !HAS_NEXT_MARKER);
                    frames.push(sdp);
                    if word & HAS_NEXT_MARKER == 0 {
                        break;
                    }
                }
                Packet::TransportInfo(TransportInfoIQ {
                    session_id,
                    to,
                    frames,
                })
            }
            id if id == SCHEMA_SESSION_TERMINATE => Packet::SessionTerminate(SessionTerminateIQ {
                session_id: r.read_uuid()?,
                to: r.read_uuid()?,
                reason: TerminateReason::from_value(r.read_int()? as u32),
            }),
            id if id == SCHEMA_SESSION_PING => Packet::SessionPing(SessionPingIQ {
                session_id: r.read_uuid()?,
                to: r.read_uuid()?,
                expiration: r.read_long()?,
            }),
            id if id == SCHEMA_DEVICE_RINGING => Packet::DeviceRinging(DeviceRingingIQ {
                session_id: r.read_uuid()?,
                to: r.read_uuid()?,
            }),
            id if id == SCHEMA_ACK => Packet::Ack(AckIQ {
                error_code: ErrorCode::from_value(r.read_int()? as u32),
            }),
            _ => return Err(WireError::UnknownSchema),
        };
        Ok(packet)
    }
}
