// ABOUTME: Behavioral tests for per-room container sharing and reference counting

use crate::fixtures::{connection, FakeRuntime, TestRooms};
use futures_util::future::join_all;
use roomshell::session::SessionKey;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Test 1: Two users joining an empty room at once get one container
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_users_join_empty_room_share_one_container() {
    // Arrange
    let rooms = TestRooms::new(FakeRuntime::new());
    let alice = SessionKey::from_parts("r1", "alice");
    let bob = SessionKey::from_parts("r1", "bob");
    let (conn_a, _rx_a) = connection();
    let (conn_b, _rx_b) = connection();

    // Act: both init-terminal requests race
    let (a, b) = tokio::join!(
        rooms.registry.start(alice.clone(), "r1", "alice", conn_a),
        rooms.registry.start(bob.clone(), "r1", "bob", conn_b),
    );

    // Assert
    a.unwrap();
    b.unwrap();
    assert_eq!(rooms.runtime.creates(), 1);
    assert_eq!(rooms.pool().ref_count("r1").await, Some(2));

    // Act: both leave
    rooms.registry.cleanup(&alice).await;
    assert_eq!(rooms.pool().ref_count("r1").await, Some(1));
    assert!(rooms.runtime.removed().is_empty());

    rooms.registry.cleanup(&bob).await;

    // Assert: removed exactly once
    assert_eq!(rooms.pool().ref_count("r1").await, None);
    assert_eq!(rooms.runtime.removed().len(), 1);
    assert_eq!(rooms.runtime.live_containers(), 0);
}

// =============================================================================
// Test 2: Different rooms never share or wait on each other
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rooms_get_separate_containers() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let (conn_a, _rx_a) = connection();
    let (conn_b, _rx_b) = connection();

    let (a, b) = tokio::join!(
        rooms.registry.start(SessionKey::from_parts("r1", "u"), "r1", "u", conn_a),
        rooms.registry.start(SessionKey::from_parts("r2", "u"), "r2", "u", conn_b),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(rooms.runtime.creates(), 2);
    let mut active = rooms.pool().rooms();
    active.sort();
    assert_eq!(active, vec!["r1".to_string(), "r2".to_string()]);
}

// =============================================================================
// Test 3: Repeated acquire/release rounds remove once per zero-crossing
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_acquire_release_rounds() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let pool = rooms.pool();
    let path = Path::new("/rooms/r1");

    for round in 1..=3 {
        let acquired = join_all((0..5).map(|_| pool.acquire("r1", path))).await;
        assert!(acquired.iter().all(Result::is_ok));
        assert_eq!(pool.ref_count("r1").await, Some(5));
        assert_eq!(rooms.runtime.creates(), round);

        join_all((0..5).map(|_| pool.release("r1"))).await;
        assert_eq!(pool.ref_count("r1").await, None);
        assert_eq!(rooms.runtime.removed().len(), round);
    }

    // Releases past zero change nothing
    pool.release("r1").await;
    assert_eq!(rooms.runtime.removed().len(), 3);
}

// =============================================================================
// Test 4: A rejoin inside the release grace window keeps the container
// =============================================================================

#[tokio::test]
async fn test_release_grace_keeps_container_for_quick_rejoin() {
    let rooms = TestRooms::with_config(FakeRuntime::new(), |config| {
        config.container.release_grace_ms = 300;
    });
    let key = SessionKey::from_parts("r1", "u1");

    let (conn, _rx) = connection();
    rooms.registry.start(key.clone(), "r1", "u1", conn).await.unwrap();
    rooms.registry.cleanup(&key).await;
    assert_eq!(rooms.pool().ref_count("r1").await, Some(0));

    let (conn, _rx) = connection();
    rooms.registry.start(key.clone(), "r1", "u1", conn).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(rooms.runtime.creates(), 1);
    assert!(rooms.runtime.removed().is_empty());

    rooms.registry.cleanup(&key).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(rooms.runtime.removed().len(), 1);
}

// =============================================================================
// Test 5: Shutdown ends sessions and sweeps containers
// =============================================================================

#[tokio::test]
async fn test_shutdown_sweeps_everything() {
    let rooms = TestRooms::new(FakeRuntime::new());
    for room in ["r1", "r2"] {
        let (conn, _rx) = connection();
        rooms
            .registry
            .start(SessionKey::from_parts(room, "u"), room, "u", conn)
            .await
            .unwrap();
    }

    rooms.registry.shutdown().await;
    rooms.pool().sweep_all().await;

    assert!(rooms.registry.is_empty());
    assert!(rooms.pool().rooms().is_empty());
    assert_eq!(rooms.runtime.live_containers(), 0);
}
