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

//! Multi-party call-room lifecycle.
//!
//! ```text
//!   absent  --create--> owned
//!   absent  --invite-received--> invited
//!   invited --join--> member
//!   owned   --invite--> owned (members grow)
//!   member  --member-notification(del self)--> absent
//!   owned   --destroy--> absent
//!   member  --leave--> absent
//! ```
//!
//! A member joining twice replaces its earlier roster entry; the
//! earlier P2P session is terminated with `MERGE` through the hook
//! installed by the session service. Only the owning twincode may
//! destroy a room. Trust of the inviter is evaluated upstream: the
//! invitation is always delivered to the observer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};
use uuid::Uuid;

use crate::core::types::ErrorCode;
use crate::monitoring::metrics::Metrics;
use crate::signaling::schemas::{
    CreateCallRoomIQ, DestroyCallRoomIQ, InviteCallRoomIQ, JoinCallRoomIQ, LeaveCallRoomIQ,
    MemberNotificationIQ, Packet, MEMBER_DEL, MEMBER_NEW, MEMBER_NEW_NEED_SESSION,
};
use crate::signaling::service::SignalingService;

/// Local relationship with a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomState {
    /// We created the room.
    Owned,
    /// We received an invitation but have not joined.
    Invited,
    /// We joined the roster.
    Member,
}

/// One roster entry as tracked locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomMember {
    /// Member id assigned by the broker.
    pub member_id: Uuid,
    /// Member twincode.
    pub twincode: Uuid,
    /// P2P session towards the member, if any.
    pub p2p_session_id: Option<Uuid>,
}

struct CallRoom {
    state: RoomState,
    local_twincode: Uuid,
    owner_twincode: Uuid,
    mode: u32,
    max_members: i32,
    member_id: Option<Uuid>,
    // Keyed by twincode so a rejoin replaces the earlier entry.
    members: BTreeMap<Uuid, RoomMember>,
}

/// Application-facing room events, dispatched on the serial executor.
pub trait CallRoomObserver: Send + Sync {
    /// Room creation completed.
    fn on_create_call_room(&self, code: ErrorCode, room_id: Option<Uuid>, member_id: Option<Uuid>);
    /// An invitation arrived.
    fn on_invite_call_room(&self, room_id: Uuid, from_twincode: Uuid, mode: u32);
    /// Join completed; `members` is the roster at join time.
    fn on_join_call_room(&self, code: ErrorCode, room_id: Uuid, members: Vec<RoomMember>);
    /// Leave completed.
    fn on_leave_call_room(&self, code: ErrorCode, room_id: Uuid);
    /// Destroy completed.
    fn on_destroy_call_room(&self, code: ErrorCode, room_id: Uuid);
    /// A member joined; `need_session` asks us to open a P2P session.
    fn on_member_join(&self, room_id: Uuid, member: RoomMember, need_session: bool);
    /// A member left.
    fn on_member_leave(&self, room_id: Uuid, member_id: Uuid, twincode: Uuid);
}

/// Hook terminating a replaced P2P session with reason `MERGE`; wired
/// by the session service so the room layer never reaches into it.
pub type MergeHook = Box<dyn Fn(Uuid) + Send + Sync>;

/// Call-room service: local room table plus the signaling glue.
pub struct CallRoomService {
    me: Weak<CallRoomService>,
    signaling: Arc<SignalingService>,
    metrics: Arc<Metrics>,
    rooms: Mutex<BTreeMap<Uuid, CallRoom>>,
    observer: Mutex<Option<Arc<dyn CallRoomObserver>>>,
    merge_hook: Mutex<Option<MergeHook>>,
}

impl CallRoomService {
    /// Build the service on top of the signaling front end.
    pub fn new(signaling: Arc<SignalingService>, metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            signaling,
            metrics,
            rooms: Mutex::new(BTreeMap::new()),
            observer: Mutex::new(None),
            merge_hook: Mutex::new(None),
        })
    }

    fn strong(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }

    /// Register the application observer.
    pub fn set_observer(&self, observer: Arc<dyn CallRoomObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    /// Install the session-merge hook (called by the session service).
    pub fn set_merge_hook(&self, hook: MergeHook) {
        *self.merge_hook.lock().unwrap() = Some(hook);
    }

    fn observer(&self) -> Option<Arc<dyn CallRoomObserver>> {
        self.observer.lock().unwrap().clone()
    }

    fn dispatch(&self, f: impl FnOnce(Arc<dyn CallRoomObserver>) + Send + 'static) {
        if let Some(observer) = self.observer() {
            self.signaling.executor().execute(move || f(observer));
        }
    }

    fn sync_gauge(&self, rooms: &BTreeMap<Uuid, CallRoom>) {
        self.metrics.call_rooms_active.set(rooms.len() as i64);
    }

    /// Local room state, `None` when absent.
    pub fn room_state(&self, room_id: &Uuid) -> Option<RoomState> {
        self.rooms.lock().unwrap().get(room_id).map(|r| r.state)
    }

    /// Roster snapshot.
    pub fn members(&self, room_id: &Uuid) -> Vec<RoomMember> {
        self.rooms
            .lock()
            .unwrap()
            .get(room_id)
            .map(|r| r.members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Create a room owned by `local_twincode`.
    pub fn create_room(&self, local_twincode: Uuid, mode: u32, max_members: i32) -> i64 {
        let Some(svc) = self.strong() else {
            return 0;
        };
        self.signaling.request(
            Packet::CreateCallRoom(CreateCallRoomIQ {
                twincode: local_twincode,
                mode,
                max_members,
            }),
            Box::new(move |code, payload| {
                let Some(Packet::OnCreateCallRoom(response)) = payload else {
                    svc.dispatch(move |observer| observer.on_create_call_room(code, None, None));
                    return;
                };
                info!(room_id = %response.room_id, "call room created");
                {
                    let mut rooms = svc.rooms.lock().unwrap();
                    rooms.insert(
                        response.room_id,
                        CallRoom {
                            state: RoomState::Owned,
                            local_twincode,
                            owner_twincode: local_twincode,
                            mode,
                            max_members: response.max_members,
                            member_id: Some(response.member_id),
                            members: BTreeMap::new(),
                        },
                    );
                    svc.sync_gauge(&rooms);
                }
                svc.dispatch(move |observer| {
                    observer.on_create_call_room(
                        code,
                        Some(response.room_id),
                        Some(response.member_id),
                    )
                });
            }),
        )
    }

    /// Invite `peer` into an owned room. The invite is relayed by the
    /// broker as a push; no reply is expected.
    pub fn invite(&self, room_id: Uuid, peer_twincode: Uuid) -> Result<(), ErrorCode> {
        let (local, mode) = {
            let rooms = self.rooms.lock().unwrap();
            let room = rooms.get(&room_id).ok_or(ErrorCode::ItemNotFound)?;
            if room.state != RoomState::Owned {
                return Err(ErrorCode::NoPermission);
            }
            (room.local_twincode, room.mode)
        };
        self.signaling
            .notify(Packet::InviteCallRoom(InviteCallRoomIQ {
                room_id,
                from_twincode: local,
                to_twincode: peer_twincode,
                mode,
            }));
        Ok(())
    }

    /// Join a room we were invited to (or re-join an owned room from
    /// another device).
    pub fn join(&self, room_id: Uuid, local_twincode: Uuid, p2p_session_id: Option<Uuid>) -> i64 {
        let Some(svc) = self.strong() else {
            return 0;
        };
        self.signaling.request(
            Packet::JoinCallRoom(JoinCallRoomIQ {
                room_id,
                twincode: local_twincode,
                p2p_session_id,
            }),
            Box::new(move |code, payload| {
                let Some(Packet::OnJoinCallRoom(response)) = payload else {
                    svc.dispatch(move |observer| {
                        observer.on_join_call_room(code, room_id, Vec::new())
                    });
                    return;
                };
                let roster: Vec<RoomMember> = response
                    .members
                    .iter()
                    .map(|m| RoomMember {
                        member_id: m.member_id,
                        twincode: m.twincode,
                        p2p_session_id: m.p2p_session_id,
                    })
                    .collect();
                {
                    let mut rooms = svc.rooms.lock().unwrap();
                    let room = rooms.entry(response.room_id).or_insert_with(|| CallRoom {
                        state: RoomState::Invited,
                        local_twincode,
                        owner_twincode: local_twincode,
                        mode: 0,
                        max_members: response.max_members,
                        member_id: None,
                        members: BTreeMap::new(),
                    });
                    room.state = RoomState::Member;
                    room.member_id = Some(response.member_id);
                    room.max_members = response.max_members;
                    for member in &roster {
                        room.members.insert(member.twincode, member.clone());
                    }
                    svc.sync_gauge(&rooms);
                }
                svc.dispatch(move |observer| {
                    observer.on_join_call_room(code, response.room_id, roster)
                });
            }),
        )
    }

    /// Leave a joined room.
    pub fn leave(&self, room_id: Uuid) -> i64 {
        let member_id = {
            let rooms = self.rooms.lock().unwrap();
            rooms.get(&room_id).and_then(|r| r.member_id)
        };
        let Some(member_id) = member_id else {
            self.dispatch(move |observer| {
                observer.on_leave_call_room(ErrorCode::ItemNotFound, room_id)
            });
            return 0;
        };
        let Some(svc) = self.strong() else {
            return 0;
        };
        self.signaling.request(
            Packet::LeaveCallRoom(LeaveCallRoomIQ { room_id, member_id }),
            Box::new(move |code, _payload| {
                if code == ErrorCode::Success {
                    let mut rooms = svc.rooms.lock().unwrap();
                    rooms.remove(&room_id);
                    svc.sync_gauge(&rooms);
                }
                svc.dispatch(move |observer| observer.on_leave_call_room(code, room_id));
            }),
        )
    }

    /// Destroy an owned room. Rooms we merely joined cannot be
    /// destroyed locally.
    pub fn destroy(&self, room_id: Uuid) -> i64 {
        let owned = {
            let rooms = self.rooms.lock().unwrap();
            rooms
                .get(&room_id)
                .map(|r| r.state == RoomState::Owned && r.owner_twincode == r.local_twincode)
                .unwrap_or(false)
        };
        if !owned {
            self.dispatch(move |observer| {
                observer.on_destroy_call_room(ErrorCode::NoPermission, room_id)
            });
            return 0;
        }
        let Some(svc) = self.strong() else {
            return 0;
        };
        self.signaling.request(
            Packet::DestroyCallRoom(DestroyCallRoomIQ { room_id }),
            Box::new(move |code, _payload| {
                if code == ErrorCode::Success {
                    let mut rooms = svc.rooms.lock().unwrap();
                    rooms.remove(&room_id);
                    svc.sync_gauge(&rooms);
                }
                svc.dispatch(move |observer| observer.on_destroy_call_room(code, room_id));
            }),
        )
    }

    /// Inbound invitation push (from the packet handler).
    pub fn handle_invite(&self, iq: &InviteCallRoomIQ) -> ErrorCode {
        {
            let mut rooms = self.rooms.lock().unwrap();
            if !rooms.contains_key(&iq.room_id) {
                rooms.insert(
                    iq.room_id,
                    CallRoom {
                        state: RoomState::Invited,
                        local_twincode: iq.to_twincode,
                        owner_twincode: iq.from_twincode,
                        mode: iq.mode,
                        max_members: 0,
                        member_id: None,
                        members: BTreeMap::new(),
                    },
                );
                self.sync_gauge(&rooms);
            }
        }
        let (room_id, from, mode) = (iq.room_id, iq.from_twincode, iq.mode);
        self.dispatch(move |observer| observer.on_invite_call_room(room_id, from, mode));
        ErrorCode::Success
    }

    /// Inbound roster change (from the packet handler).
    pub fn handle_member_notification(&self, iq: &MemberNotificationIQ) -> ErrorCode {
        let room_id = iq.room_id;
        match iq.event {
            MEMBER_NEW | MEMBER_NEW_NEED_SESSION => {
                let member = RoomMember {
                    member_id: iq.member_id,
                    twincode: iq.twincode,
                    p2p_session_id: iq.p2p_session_id,
                };
                let merged_session = {
                    let mut rooms = self.rooms.lock().unwrap();
                    let Some(room) = rooms.get_mut(&room_id) else {
                        return ErrorCode::ItemNotFound;
                    };
                    match room.members.get(&iq.twincode) {
                        Some(existing) if *existing == member => {
                            // Replayed notification: roster unchanged.
                            return ErrorCode::Success;
                        }
                        Some(existing) => {
                            let old = existing.p2p_session_id;
                            room.members.insert(iq.twincode, member.clone());
                            old.filter(|old| Some(*old) != iq.p2p_session_id)
                        }
                        None => {
                            room.members.insert(iq.twincode, member.clone());
                            None
                        }
                    }
                };
                if let Some(old_session) = merged_session {
                    debug!(%old_session, "member rejoined, merging earlier session");
                    if let Some(hook) = self.merge_hook.lock().unwrap().as_ref() {
                        hook(old_session);
                    }
                }
                let need_session = iq.event == MEMBER_NEW_NEED_SESSION;
                self.dispatch(move |observer| observer.on_member_join(room_id, member, need_session));
                ErrorCode::Success
            }
            MEMBER_DEL => {
                let (removed, self_left) = {
                    let mut rooms = self.rooms.lock().unwrap();
                    let Some(room) = rooms.get_mut(&room_id) else {
                        return ErrorCode::ItemNotFound;
                    };
                    let self_left = room.member_id == Some(iq.member_id);
                    let removed = room.members.remove(&iq.twincode).is_some();
                    if self_left {
                        rooms.remove(&room_id);
                    }
                    self.sync_gauge(&rooms);
                    (removed, self_left)
                };
                if self_left {
                    self.dispatch(move |observer| {
                        observer.on_leave_call_room(ErrorCode::Success, room_id)
                    });
                    return ErrorCode::Success;
                }
                if !removed {
                    return ErrorCode::Success;
                }
                let (member_id, twincode) = (iq.member_id, iq.twincode);
                self.dispatch(move |observer| {
                    observer.on_member_leave(room_id, member_id, twincode)
                });
                ErrorCode::Success
            }
            _ => ErrorCode::ItemNotFound,
        }
    }
}
