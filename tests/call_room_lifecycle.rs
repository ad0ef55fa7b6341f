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

//! Call-room lifecycle against a scripted broker: create, member
//! notifications, destroy, and the duplicate/rejoin tie-breaks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use twincall::core::security::keystore::KeyStore;
use twincall::core::types::{CoreConfig, ErrorCode};
use twincall::monitoring::metrics::Metrics;
use twincall::runtime::executor::SerialExecutor;
use twincall::signaling::call_room::{CallRoomObserver, CallRoomService, RoomMember, RoomState};
use twincall::signaling::schemas::{
    MemberNotificationIQ, OnCreateCallRoomIQ, OnDestroyCallRoomIQ, Packet, MEMBER_DEL,
    MEMBER_NEW_NEED_SESSION,
};
use twincall::signaling::service::{Connection, SignalingService};
use twincall::signaling::session::SessionService;
use twincall::signaling::CoreHandler;
use uuid::Uuid;

struct RecordingConnection {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl RecordingConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn find_request(&self, want: fn(&Packet) -> bool) -> Option<(i64, Packet)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|bytes| Packet::decode(bytes).ok())
            .find(|(_, packet)| want(packet))
    }
}

impl Connection for RecordingConnection {
    fn send(&self, bytes: &[u8], _timeout: Duration) -> Result<(), ErrorCode> {
        self.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct RoomEvents {
    created: AtomicUsize,
    joins: AtomicUsize,
    leaves: AtomicUsize,
    destroys: AtomicUsize,
    last_create_code: Mutex<Option<ErrorCode>>,
    last_destroy_code: Mutex<Option<ErrorCode>>,
    last_leave_code: Mutex<Option<ErrorCode>>,
    joined_members: Mutex<Vec<RoomMember>>,
}

struct RecordingRoomObserver(Arc<RoomEvents>);

impl CallRoomObserver for RecordingRoomObserver {
    fn on_create_call_room(
        &self,
        code: ErrorCode,
        _room_id: Option<Uuid>,
        _member_id: Option<Uuid>,
    ) {
        *self.0.last_create_code.lock().unwrap() = Some(code);
        self.0.created.fetch_add(1, Ordering::SeqCst);
    }
    fn on_invite_call_room(&self, _room_id: Uuid, _from: Uuid, _mode: u32) {}
    fn on_join_call_room(&self, _code: ErrorCode, _room_id: Uuid, _members: Vec<RoomMember>) {}
    fn on_leave_call_room(&self, code: ErrorCode, _room_id: Uuid) {
        *self.0.last_leave_code.lock().unwrap() = Some(code);
        self.0.leaves.fetch_add(1, Ordering::SeqCst);
    }
    fn on_destroy_call_room(&self, code: ErrorCode, _room_id: Uuid) {
        *self.0.last_destroy_code.lock().unwrap() = Some(code);
        self.0.destroys.fetch_add(1, Ordering::SeqCst);
    }
    fn on_member_join(&self, _room_id: Uuid, member: RoomMember, _need_session: bool) {
        self.0.joined_members.lock().unwrap().push(member);
        self.0.joins.fetch_add(1, Ordering::SeqCst);
    }
    fn on_member_leave(&self, _room_id: Uuid, _member_id: Uuid, _twincode: Uuid) {}
}

struct Fixture {
    connection: Arc<RecordingConnection>,
    signaling: Arc<SignalingService>,
    rooms: Arc<CallRoomService>,
    events: Arc<RoomEvents>,
    merges: Arc<Mutex<Vec<Uuid>>>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let connection = RecordingConnection::new();
    let (executor, _join) = SerialExecutor::start();
    let metrics = Arc::new(Metrics::new().unwrap());
    let signaling = SignalingService::new(
        connection.clone(),
        executor,
        metrics.clone(),
        Duration::from_secs(5),
    );
    let rooms = CallRoomService::new(signaling.clone(), metrics.clone());
    let events = Arc::new(RoomEvents::default());
    rooms.set_observer(Arc::new(RecordingRoomObserver(events.clone())));

    let merges = Arc::new(Mutex::new(Vec::new()));
    let sink = merges.clone();
    rooms.set_merge_hook(Box::new(move |session| {
        sink.lock().unwrap().push(session);
    }));

    // Dispatch needs the full handler pair even though these tests only
    // exercise the room half.
    let dir = tempfile::tempdir().expect("tempdir");
    let keystore = Arc::new(KeyStore::open(dir.path().to_str().unwrap()).expect("keystore"));
    let sessions = SessionService::new(
        signaling.clone(),
        keystore,
        metrics,
        CoreConfig::with_data_dir(dir.path().to_str().unwrap()),
    );
    signaling.set_handler(CoreHandler::new(rooms.clone(), sessions));

    Fixture {
        connection,
        signaling,
        rooms,
        events,
        merges,
        _dir: dir,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Drive the broker side of a successful create.
async fn create_room(fx: &Fixture, owner: Uuid) -> (Uuid, Uuid) {
    fx.rooms.create_room(owner, 0, 16);
    let (request_id, _) = fx
        .connection
        .find_request(|p| matches!(p, Packet::CreateCallRoom(_)))
        .expect("create sent");

    let room_id = Uuid::new_v4();
    let member_id = Uuid::new_v4();
    fx.signaling.on_packet(
        Packet::OnCreateCallRoom(OnCreateCallRoomIQ {
            room_id,
            member_id,
            max_members: 16,
        })
        .encode(request_id),
    );
    settle().await;
    assert_eq!(fx.events.created.load(Ordering::SeqCst), 1);
    assert_eq!(fx.rooms.room_state(&room_id), Some(RoomState::Owned));
    (room_id, member_id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn owner_lifecycle_create_members_destroy() {
    let fx = fixture();
    let owner = Uuid::new_v4();
    let (room_id, _member_id) = create_room(&fx, owner).await;

    // Two peers join; the owner is told to open sessions towards them.
    for request_id in [9001, 9002] {
        fx.signaling.on_packet(
            Packet::MemberNotification(MemberNotificationIQ {
                room_id,
                event: MEMBER_NEW_NEED_SESSION,
                member_id: Uuid::new_v4(),
                twincode: Uuid::new_v4(),
                p2p_session_id: None,
            })
            .encode(request_id),
        );
    }
    settle().await;
    assert_eq!(fx.events.joins.load(Ordering::SeqCst), 2);
    assert_eq!(fx.rooms.members(&room_id).len(), 2);

    // Destroy: the room becomes absent.
    fx.rooms.destroy(room_id);
    let (request_id, _) = fx
        .connection
        .find_request(|p| matches!(p, Packet::DestroyCallRoom(_)))
        .expect("destroy sent");
    fx.signaling
        .on_packet(Packet::OnDestroyCallRoom(OnDestroyCallRoomIQ { room_id }).encode(request_id));
    settle().await;
    assert_eq!(fx.events.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(
        *fx.events.last_destroy_code.lock().unwrap(),
        Some(ErrorCode::Success)
    );
    assert_eq!(fx.rooms.room_state(&room_id), None);

    // Referencing the destroyed room now fails with ITEM_NOT_FOUND.
    assert_eq!(
        fx.rooms.invite(room_id, Uuid::new_v4()),
        Err(ErrorCode::ItemNotFound)
    );
    fx.rooms.leave(room_id);
    settle().await;
    assert_eq!(
        *fx.events.last_leave_code.lock().unwrap(),
        Some(ErrorCode::ItemNotFound)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_member_notification_yields_one_observer_call() {
    let fx = fixture();
    let (room_id, _) = create_room(&fx, Uuid::new_v4()).await;

    let push = Packet::MemberNotification(MemberNotificationIQ {
        room_id,
        event: MEMBER_NEW_NEED_SESSION,
        member_id: Uuid::new_v4(),
        twincode: Uuid::new_v4(),
        p2p_session_id: None,
    })
    .encode(5555);

    // Same request id twice: the duplicate window suppresses the second.
    fx.signaling.on_packet(push.clone());
    fx.signaling.on_packet(push);
    settle().await;
    assert_eq!(fx.events.joins.load(Ordering::SeqCst), 1);
    assert_eq!(fx.rooms.members(&room_id).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejoin_replaces_member_and_merges_old_session() {
    let fx = fixture();
    let (room_id, _) = create_room(&fx, Uuid::new_v4()).await;

    let twincode = Uuid::new_v4();
    let first_session = Uuid::new_v4();
    let second_session = Uuid::new_v4();

    fx.signaling.on_packet(
        Packet::MemberNotification(MemberNotificationIQ {
            room_id,
            event: MEMBER_NEW_NEED_SESSION,
            member_id: Uuid::new_v4(),
            twincode,
            p2p_session_id: Some(first_session),
        })
        .encode(7001),
    );
    settle().await;
    assert_eq!(fx.rooms.members(&room_id).len(), 1);

    // The same twincode joins again with a new session: the earlier
    // entry is replaced and its session handed to the merge hook.
    fx.signaling.on_packet(
        Packet::MemberNotification(MemberNotificationIQ {
            room_id,
            event: MEMBER_NEW_NEED_SESSION,
            member_id: Uuid::new_v4(),
            twincode,
            p2p_session_id: Some(second_session),
        })
        .encode(7002),
    );
    settle().await;

    let members = fx.rooms.members(&room_id);
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].p2p_session_id, Some(second_session));
    assert_eq!(*fx.merges.lock().unwrap(), vec![first_session]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn self_deletion_makes_room_absent() {
    let fx = fixture();
    let (room_id, member_id) = create_room(&fx, Uuid::new_v4()).await;

    fx.signaling.on_packet(
        Packet::MemberNotification(MemberNotificationIQ {
            room_id,
            event: MEMBER_DEL,
            member_id,
            twincode: Uuid::new_v4(),
            p2p_session_id: None,
        })
        .encode(8801),
    );
    settle().await;
    assert_eq!(fx.rooms.room_state(&room_id), None);
    assert_eq!(fx.events.leaves.load(Ordering::SeqCst), 1);
}
