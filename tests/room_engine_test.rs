//! Tests for the room engine's read-modify-write discipline.

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use squarely::{
    CommitListener, Committed, DEFAULT_ROOM_TTL, EngineError, MAX_ID_ATTEMPTS,
    MAX_WRITE_ATTEMPTS, MemoryRoomStore, RoomEngine, RoomStore, StoreError, StoreFailure,
};
use squarely_rules::{
    ActionError, ConnectionId, GameRules, MoveFault, Participant, Rect, RoomEvent, RoomId,
    RoomState, Slot,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn conn(id: &str) -> ConnectionId {
    ConnectionId::new(id)
}

fn engine() -> RoomEngine {
    RoomEngine::with_defaults(Arc::new(MemoryRoomStore::new()))
}

/// Memory store whose writes can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryRoomStore,
    fail_writes: AtomicBool,
    writes: AtomicU32,
}

impl FlakyStore {
    fn write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::new(StoreFailure::Unavailable, "write refused"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RoomStore for FlakyStore {
    async fn get(&self, room_id: &RoomId) -> Result<Option<RoomState>, StoreError> {
        self.inner.get(room_id).await
    }

    async fn set(&self, state: &RoomState, ttl: Duration) -> Result<(), StoreError> {
        self.write()?;
        self.inner.set(state, ttl).await
    }

    async fn insert(&self, state: &RoomState, ttl: Duration) -> Result<bool, StoreError> {
        self.write()?;
        self.inner.insert(state, ttl).await
    }

    async fn replace(
        &self,
        state: &RoomState,
        expected: u64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.write()?;
        self.inner.replace(state, expected, ttl).await
    }

    async fn exists(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        self.inner.exists(room_id).await
    }

    async fn delete(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        self.inner.delete(room_id).await
    }

    async fn list_all(&self) -> Result<Vec<RoomState>, StoreError> {
        self.inner.list_all().await
    }
}

async fn seated(engine: &RoomEngine) -> RoomId {
    let room = engine.create_room().await.expect("create failed");
    for (id, name) in [("s0", "Ann"), ("s1", "Ben"), ("s2", "Cy")] {
        engine
            .join_room(room.room_id(), Participant::new(id, name), None)
            .await
            .expect("join failed");
    }
    room.room_id().clone()
}

#[tokio::test]
async fn test_create_then_fetch() {
    let engine = engine();
    let created = engine.create_room().await.unwrap();
    let fetched = engine.fetch_room(created.room_id()).await.unwrap();
    assert_eq!(fetched, created);
    assert!(fetched.roster().is_empty());
    assert_eq!(fetched.game().rules(), GameRules::default());
}

#[tokio::test]
async fn test_fetch_unknown_room() {
    let engine = engine();
    let id = RoomId::parse("123456").unwrap();
    let err = engine.fetch_room(&id).await.unwrap_err();
    assert!(matches!(err, EngineError::RoomNotFound(ref missing) if *missing == id));
    assert_eq!(
        err.rejection(),
        Some(RoomEvent::ActionRejected {
            reason: "Room not found".to_string()
        })
    );
}

#[tokio::test]
async fn test_actions_on_unknown_room_are_not_found() {
    let engine = engine();
    let id = RoomId::parse("654321").unwrap();
    assert!(matches!(
        engine.place_number(&id, &conn("x"), 0, 0, 1).await,
        Err(EngineError::RoomNotFound(_))
    ));
    assert!(matches!(
        engine.reset_room(&id).await,
        Err(EngineError::RoomNotFound(_))
    ));
}

#[tokio::test]
async fn test_join_reports_event_and_persists() {
    let engine = engine();
    let room = engine.create_room().await.unwrap();
    let committed = engine
        .join_room(room.room_id(), Participant::new("c1", "Ada"), Some(Slot::ALL[2]))
        .await
        .unwrap();

    assert_eq!(
        committed.events,
        vec![RoomEvent::PlayerJoined {
            slot: Slot::ALL[2],
            name: "Ada".to_string(),
            total_players: 1,
        }]
    );
    let stored = engine.fetch_room(room.room_id()).await.unwrap();
    assert_eq!(stored, committed.state);
}

#[tokio::test]
async fn test_fourth_join_is_room_full() {
    let engine = engine();
    let room_id = seated(&engine).await;
    let err = engine
        .join_room(&room_id, Participant::new("s3", "Dee"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Rejected(ActionError::RoomFull)));
}

#[tokio::test]
async fn test_turn_cycle_through_engine() {
    let engine = engine();
    let room_id = seated(&engine).await;

    engine
        .place_number(&room_id, &conn("s0"), 0, 0, 4)
        .await
        .unwrap();
    let committed = engine
        .circle_area(&room_id, &conn("s0"), Rect::new(0, 1, 0, 1))
        .await
        .unwrap();

    assert!(matches!(
        committed.events.as_slice(),
        [RoomEvent::AreaScored { sum: 4, .. }]
    ));
    let state = engine.fetch_room(&room_id).await.unwrap();
    assert_eq!(*state.game().scores(), [4.0, 0.0, 0.0]);
    assert_eq!(*state.game().current_slot(), Slot::ALL[1]);

    engine
        .place_number(&room_id, &conn("s1"), 7, 7, 2)
        .await
        .unwrap();
    engine.skip_turn(&room_id, &conn("s1")).await.unwrap();
    let state = engine.fetch_room(&room_id).await.unwrap();
    assert_eq!(*state.game().turns(), [1, 1, 0]);
}

#[tokio::test]
async fn test_rejected_action_writes_nothing() {
    let store = Arc::new(FlakyStore::default());
    let engine = RoomEngine::with_defaults(store.clone());
    let room_id = seated(&engine).await;
    let before = engine.fetch_room(&room_id).await.unwrap();
    let writes = store.writes.load(Ordering::SeqCst);

    let err = engine
        .place_number(&room_id, &conn("s1"), 0, 0, 5)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Rejected(ActionError::NotYourTurn { .. })
    ));
    assert_eq!(store.writes.load(Ordering::SeqCst), writes);
    assert_eq!(engine.fetch_room(&room_id).await.unwrap(), before);
}

#[tokio::test]
async fn test_store_failure_surfaces() {
    let store = Arc::new(FlakyStore::default());
    let engine = RoomEngine::with_defaults(store.clone());
    let room_id = seated(&engine).await;
    let before = engine.fetch_room(&room_id).await.unwrap();

    store.fail_writes.store(true, Ordering::SeqCst);
    let err = engine
        .place_number(&room_id, &conn("s0"), 3, 3, 9)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Store(_)));
    assert!(err.rejection().is_none());
    assert_eq!(engine.fetch_room(&room_id).await.unwrap(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_placements_only_one_wins() {
    let engine = engine();
    let room_id = seated(&engine).await;

    let first = {
        let engine = engine.clone();
        let room_id = room_id.clone();
        tokio::spawn(async move { engine.place_number(&room_id, &conn("s0"), 1, 1, 3).await })
    };
    let second = {
        let engine = engine.clone();
        let room_id = room_id.clone();
        tokio::spawn(async move { engine.place_number(&room_id, &conn("s0"), 2, 2, 6).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    let failure = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one placement must fail");
    assert!(matches!(
        failure,
        EngineError::Rejected(ActionError::InvalidMove(MoveFault::AlreadyPlaced))
    ));

    let state = engine.fetch_room(&room_id).await.unwrap();
    assert_eq!(state.game().board().occupied_count(), 1);
    assert!(*state.game().has_placed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_fill_distinct_slots() {
    let engine = engine();
    let room = engine.create_room().await.unwrap();

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let engine = engine.clone();
            let room_id = room.room_id().clone();
            tokio::spawn(async move {
                engine
                    .join_room(&room_id, Participant::new(format!("c{}", i), ""), None)
                    .await
            })
        })
        .collect();

    let mut joined = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => joined += 1,
            Err(EngineError::Rejected(ActionError::RoomFull)) => full += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((joined, full), (3, 2));

    let state = engine.fetch_room(room.room_id()).await.unwrap();
    let slots: Vec<Slot> = state
        .roster()
        .seats_by_slot()
        .iter()
        .map(|seat| *seat.slot())
        .collect();
    assert_eq!(slots, Slot::ALL.to_vec());
}

#[tokio::test]
async fn test_create_skips_taken_ids() {
    let store = Arc::new(MemoryRoomStore::new());
    let taken = RoomState::create(
        RoomId::parse("100001").unwrap(),
        GameRules::default(),
        Utc::now(),
    );
    store.set(&taken, DEFAULT_ROOM_TTL).await.unwrap();

    let next = Arc::new(AtomicU32::new(100_001));
    let source = next.clone();
    let engine = RoomEngine::with_defaults(store)
        .with_id_source(move || source.fetch_add(1, Ordering::SeqCst));

    let created = engine.create_room().await.unwrap();
    assert_eq!(created.room_id().as_str(), "100002");
    assert_eq!(next.load(Ordering::SeqCst), 100_003);
}

#[tokio::test]
async fn test_create_gives_up_when_ids_exhausted() {
    let store = Arc::new(MemoryRoomStore::new());
    let taken = RoomState::create(
        RoomId::parse("777777").unwrap(),
        GameRules::default(),
        Utc::now(),
    );
    store.set(&taken, DEFAULT_ROOM_TTL).await.unwrap();
    let engine = RoomEngine::with_defaults(store).with_id_source(|| 777_777);

    let err = engine.create_room().await.unwrap_err();
    assert!(matches!(err, EngineError::IdSpaceExhausted(n) if n == MAX_ID_ATTEMPTS));
}

#[tokio::test]
async fn test_out_of_range_candidates_are_skipped() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let engine = engine().with_id_source(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            42
        } else {
            500_000
        }
    });
    let created = engine.create_room().await.unwrap();
    assert_eq!(created.room_id().as_str(), "500000");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_list_rooms_newest_first_with_totals() {
    let store = Arc::new(MemoryRoomStore::new());
    let now = Utc::now();
    for (id, age_minutes) in [("200000", 30), ("300000", 5), ("400000", 60)] {
        let mut state = RoomState::create(
            RoomId::parse(id).unwrap(),
            GameRules::default(),
            now - TimeDelta::minutes(age_minutes),
        );
        state.join(&Participant::new("p", "Pat"), None).unwrap();
        store.set(&state, DEFAULT_ROOM_TTL).await.unwrap();
    }
    let engine = RoomEngine::with_defaults(store);

    let lobby = engine.list_rooms().await.unwrap();
    let order: Vec<&str> = lobby.rooms.iter().map(|r| r.room_id.as_str()).collect();
    assert_eq!(order, vec!["300000", "200000", "400000"]);
    assert_eq!(lobby.total_rooms, 3);
    assert_eq!(lobby.total_players, 3);
    assert_eq!(lobby.rooms[0].players[0].name, "Pat");
}

#[tokio::test]
async fn test_rooms_expire_after_ttl() {
    let store = Arc::new(MemoryRoomStore::new());
    let stale = RoomState::create(
        RoomId::parse("808080").unwrap(),
        GameRules::default(),
        Utc::now() - TimeDelta::hours(25),
    );
    store.set(&stale, DEFAULT_ROOM_TTL).await.unwrap();
    let engine = RoomEngine::with_defaults(store);

    assert!(matches!(
        engine.fetch_room(stale.room_id()).await,
        Err(EngineError::RoomNotFound(_))
    ));
    assert_eq!(engine.list_rooms().await.unwrap().total_rooms, 0);
}

#[tokio::test]
async fn test_reset_keeps_players() {
    let engine = engine();
    let room_id = seated(&engine).await;
    engine
        .place_number(&room_id, &conn("s0"), 0, 0, 1)
        .await
        .unwrap();
    engine.skip_turn(&room_id, &conn("s0")).await.unwrap();

    let committed = engine.reset_room(&room_id).await.unwrap();
    assert_eq!(committed.events, vec![RoomEvent::RoomReset]);
    assert_eq!(committed.state.roster().len(), 3);
    assert_eq!(committed.state.game().board().occupied_count(), 0);
    assert_eq!(*committed.state.game().turns(), [0, 0, 0]);
    assert_eq!(*committed.state.game().current_slot(), Slot::FIRST);
}

#[tokio::test]
async fn test_delete_room() {
    let engine = engine();
    let room = engine.create_room().await.unwrap();
    engine.delete_room(room.room_id()).await.unwrap();
    assert!(matches!(
        engine.fetch_room(room.room_id()).await,
        Err(EngineError::RoomNotFound(_))
    ));
    assert!(matches!(
        engine.delete_room(room.room_id()).await,
        Err(EngineError::RoomNotFound(_))
    ));
}

#[tokio::test]
async fn test_leave_frees_slot_for_newcomer() {
    let engine = engine();
    let room_id = seated(&engine).await;
    let committed = engine.leave_room(&room_id, &conn("s1")).await.unwrap();
    assert!(matches!(
        committed.events.as_slice(),
        [RoomEvent::PlayerLeft { total_players: 2, .. }]
    ));

    let committed = engine
        .join_room(&room_id, Participant::new("s9", "Zed"), None)
        .await
        .unwrap();
    assert!(matches!(
        committed.events.as_slice(),
        [RoomEvent::PlayerJoined { slot, .. }] if *slot == Slot::ALL[1]
    ));
}

/// Memory store where another writer commits first on the first
/// `intrusions` conditional writes.
struct InterferingStore {
    inner: MemoryRoomStore,
    intrusions: AtomicU32,
    replaces: AtomicU32,
}

impl InterferingStore {
    fn new(intrusions: u32) -> Self {
        Self {
            inner: MemoryRoomStore::new(),
            intrusions: AtomicU32::new(intrusions),
            replaces: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RoomStore for InterferingStore {
    async fn get(&self, room_id: &RoomId) -> Result<Option<RoomState>, StoreError> {
        self.inner.get(room_id).await
    }

    async fn set(&self, state: &RoomState, ttl: Duration) -> Result<(), StoreError> {
        self.inner.set(state, ttl).await
    }

    async fn insert(&self, state: &RoomState, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.insert(state, ttl).await
    }

    async fn replace(
        &self,
        state: &RoomState,
        expected: u64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let call = self.replaces.fetch_add(1, Ordering::SeqCst);
        if call < self.intrusions.load(Ordering::SeqCst) {
            if let Some(mut current) = self.inner.get(state.room_id()).await? {
                let expected = *current.revision();
                let name = format!("other-{}", call);
                // Refused once the room is full; the revision still moves.
                let _ = current.join(&Participant::new(name.as_str(), name.as_str()), None);
                current.advance_revision();
                assert!(self.inner.replace(&current, expected, ttl).await?);
            }
        }
        self.inner.replace(state, expected, ttl).await
    }

    async fn exists(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        self.inner.exists(room_id).await
    }

    async fn delete(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        self.inner.delete(room_id).await
    }

    async fn list_all(&self) -> Result<Vec<RoomState>, StoreError> {
        self.inner.list_all().await
    }
}

/// Records what the engine announces.
#[derive(Default)]
struct RecordingListener {
    revisions: Mutex<Vec<u64>>,
    closed: Mutex<Vec<RoomId>>,
}

impl CommitListener for RecordingListener {
    fn committed(&self, _room_id: &RoomId, committed: &Committed) {
        self.revisions
            .lock()
            .unwrap()
            .push(*committed.state.revision());
    }

    fn closed(&self, room_id: &RoomId) {
        self.closed.lock().unwrap().push(room_id.clone());
    }
}

#[tokio::test]
async fn test_commits_advance_revision() {
    let engine = engine();
    let room = engine.create_room().await.unwrap();
    assert_eq!(*room.revision(), 0);
    let committed = engine
        .join_room(room.room_id(), Participant::new("c1", "Ada"), None)
        .await
        .unwrap();
    assert_eq!(*committed.state.revision(), 1);
    engine
        .place_number(room.room_id(), &conn("c1"), 0, 0, 1)
        .await
        .unwrap();
    assert_eq!(*engine.fetch_room(room.room_id()).await.unwrap().revision(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_listener_hears_commits_in_order() {
    let listener = Arc::new(RecordingListener::default());
    let engine = engine().with_listener(listener.clone());
    let room = engine.create_room().await.unwrap();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let engine = engine.clone();
            let room_id = room.room_id().clone();
            tokio::spawn(async move { engine.reset_room(&room_id).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let heard = listener.revisions.lock().unwrap().clone();
    assert_eq!(heard, (1..=20).collect::<Vec<u64>>());

    engine.delete_room(room.room_id()).await.unwrap();
    assert_eq!(*listener.closed.lock().unwrap(), vec![room.room_id().clone()]);
}

#[tokio::test]
async fn test_refused_action_is_not_announced() {
    let listener = Arc::new(RecordingListener::default());
    let engine = engine().with_listener(listener.clone());
    let room_id = seated(&engine).await;
    listener.revisions.lock().unwrap().clear();

    engine.skip_turn(&room_id, &conn("s0")).await.unwrap_err();
    assert!(listener.revisions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_lost_write_is_reapplied() {
    let store = Arc::new(InterferingStore::new(1));
    let engine = RoomEngine::with_defaults(store.clone());
    let room = engine.create_room().await.unwrap();

    let committed = engine
        .join_room(room.room_id(), Participant::new("c1", "Ada"), None)
        .await
        .unwrap();

    assert_eq!(store.replaces.load(Ordering::SeqCst), 2);
    assert_eq!(*committed.state.revision(), 2);
    let stored = engine.fetch_room(room.room_id()).await.unwrap();
    assert_eq!(stored.roster().len(), 2);
    assert!(stored.roster().seat(&conn("other-0")).is_some());
    assert!(stored.roster().seat(&conn("c1")).is_some());
}

#[tokio::test]
async fn test_retry_after_revision_bump() {
    let store = Arc::new(InterferingStore::new(0));
    let engine = RoomEngine::with_defaults(store.clone());
    let room_id = seated(&engine).await;
    store.replaces.store(0, Ordering::SeqCst);
    store.intrusions.store(1, Ordering::SeqCst);

    // The other writer's join fails on the full room but still bumps the
    // revision, so the engine re-reads and re-applies.
    engine
        .place_number(&room_id, &conn("s0"), 0, 0, 5)
        .await
        .unwrap();
    assert_eq!(store.replaces.load(Ordering::SeqCst), 2);
    let state = engine.fetch_room(&room_id).await.unwrap();
    assert_eq!(*state.revision(), 5);
    assert_eq!(state.game().board().occupied_count(), 1);
}

#[tokio::test]
async fn test_endless_contention_gives_up() {
    let store = Arc::new(InterferingStore::new(u32::MAX));
    let engine = RoomEngine::with_defaults(store.clone());
    let room = engine.create_room().await.unwrap();

    let err = engine.reset_room(room.room_id()).await.unwrap_err();
    assert!(matches!(err, EngineError::Contended(n) if n == MAX_WRITE_ATTEMPTS));
    assert!(err.rejection().is_none());
    assert_eq!(
        store.replaces.load(Ordering::SeqCst),
        MAX_WRITE_ATTEMPTS as u32
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_engines_sharing_a_store_never_lose_updates() {
    // Separate engines have separate lock tables, like two server processes.
    let store = Arc::new(MemoryRoomStore::new());
    let first = RoomEngine::with_defaults(store.clone());
    let second = RoomEngine::with_defaults(store.clone());
    let room = first.create_room().await.unwrap();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let engine = if i % 2 == 0 { first.clone() } else { second.clone() };
            let room_id = room.room_id().clone();
            tokio::spawn(async move {
                engine
                    .join_room(&room_id, Participant::new(format!("c{}", i), ""), None)
                    .await
            })
        })
        .collect();

    let mut joined = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => joined += 1,
            Err(EngineError::Rejected(ActionError::RoomFull)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(joined, 3);

    let state = second.fetch_room(room.room_id()).await.unwrap();
    assert_eq!(state.roster().len(), 3);
    assert_eq!(*state.revision(), 3);
}

#[tokio::test]
async fn test_close_if_gone_only_closes_missing_rooms() {
    let store = Arc::new(MemoryRoomStore::new());
    let stale = RoomState::create(
        RoomId::parse("909090").unwrap(),
        GameRules::default(),
        Utc::now() - TimeDelta::hours(25),
    );
    store.set(&stale, DEFAULT_ROOM_TTL).await.unwrap();
    let listener = Arc::new(RecordingListener::default());
    let engine = RoomEngine::with_defaults(store).with_listener(listener.clone());
    let live = engine.create_room().await.unwrap();

    assert!(engine.close_if_gone(stale.room_id()).await.unwrap());
    assert!(!engine.close_if_gone(live.room_id()).await.unwrap());
    assert_eq!(*listener.closed.lock().unwrap(), vec![stale.room_id().clone()]);
}
