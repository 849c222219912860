// ABOUTME: Behavioral tests for terminal session start, replacement, cleanup and fallback

use crate::fixtures::{connection, drain_text, wait_until, FakeRuntime, TestRooms};
use pretty_assertions::assert_eq;
use roomshell::session::{PlacementKind, SessionKey, SessionState};
use std::time::Duration;

// =============================================================================
// Test 1: Init commands and user input reach the container shell in order
// =============================================================================

#[tokio::test]
async fn test_input_follows_init_commands() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let key = SessionKey::from_parts("r1", "u1");
    let (conn, _rx) = connection();

    let kind = rooms.registry.start(key.clone(), "r1", "u1", conn).await.unwrap();
    assert_eq!(kind, PlacementKind::Container);
    assert!(rooms.dir.path().join("r1").is_dir());

    rooms.registry.input(&key, "ls -la\n").await.unwrap();
    rooms.registry.cleanup(&key).await;

    let written = rooms.runtime.shell_input_to_eof(0).await;
    assert_eq!(written, "export TERM=xterm-256color\nstty -ixon\nclear\nls -la\n");
}

// =============================================================================
// Test 2: Shell output is forwarded to the owning connection only
// =============================================================================

#[tokio::test]
async fn test_output_goes_to_owning_connection() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let (conn_a, mut rx_a) = connection();
    let (conn_b, mut rx_b) = connection();
    rooms
        .registry
        .start(SessionKey::from_parts("r1", "alice"), "r1", "alice", conn_a)
        .await
        .unwrap();
    rooms
        .registry
        .start(SessionKey::from_parts("r1", "bob"), "r1", "bob", conn_b)
        .await
        .unwrap();

    rooms.runtime.shell_output(0, b"alice$ ");
    rooms.runtime.shell_output(1, b"bob$ ");

    assert_eq!(drain_text(&mut rx_a, Duration::from_millis(200)).await, "alice$ ");
    assert_eq!(drain_text(&mut rx_b, Duration::from_millis(200)).await, "bob$ ");
}

// =============================================================================
// Test 3: A second init for the same key replaces the first session
// =============================================================================

#[tokio::test]
async fn test_reinit_replaces_session_without_leaking() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let key = SessionKey::from_parts("r1", "alice");
    let (bob_conn, _bob_rx) = connection();
    rooms
        .registry
        .start(SessionKey::from_parts("r1", "bob"), "r1", "bob", bob_conn)
        .await
        .unwrap();

    let (first, _rx1) = connection();
    rooms.registry.start(key.clone(), "r1", "alice", first).await.unwrap();
    let (second, mut rx2) = connection();
    rooms.registry.start(key.clone(), "r1", "alice", second).await.unwrap();

    // The first shell's stdin is closed, the room keeps one container
    rooms.runtime.shell_input_to_eof(1).await;
    assert_eq!(rooms.registry.len(), 2);
    assert_eq!(rooms.runtime.creates(), 1);
    assert_eq!(rooms.pool().ref_count("r1").await, Some(2));

    // Output of the replacement reaches the new connection
    rooms.runtime.shell_output(2, b"fresh prompt");
    assert_eq!(drain_text(&mut rx2, Duration::from_millis(200)).await, "fresh prompt");
}

// =============================================================================
// Test 4: Concurrent leave and disconnect clean up exactly once
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cleanup_is_idempotent() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let key = SessionKey::from_parts("r1", "u1");
    let (conn, _rx) = connection();
    rooms.registry.start(key.clone(), "r1", "u1", conn).await.unwrap();

    let (a, b, c) = tokio::join!(
        rooms.registry.cleanup(&key),
        rooms.registry.cleanup(&key),
        rooms.registry.cleanup(&key),
    );

    assert_eq!([a, b, c].iter().filter(|cleaned| **cleaned).count(), 1);
    assert_eq!(rooms.registry.state(&key), SessionState::Removed);
    assert_eq!(rooms.runtime.removed().len(), 1);
}

// =============================================================================
// Test 5: The exec ending on its own notifies the user and cleans up
// =============================================================================

#[tokio::test]
async fn test_exec_end_terminates_session() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let key = SessionKey::from_parts("r1", "u1");
    let (conn, mut rx) = connection();
    rooms.registry.start(key.clone(), "r1", "u1", conn).await.unwrap();

    rooms.runtime.end_shell(0);

    let text = drain_text(&mut rx, Duration::from_millis(300)).await;
    assert!(text.contains("Session terminated by container"), "got: {text}");
    let registry = rooms.registry.clone();
    wait_until(move || registry.state(&key) == SessionState::Removed).await;
    assert_eq!(rooms.runtime.removed().len(), 1);
}

// =============================================================================
// Test 6: Resize is forwarded to the session's exec
// =============================================================================

#[tokio::test]
async fn test_resize_reaches_exec() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let key = SessionKey::from_parts("r1", "u1");
    let (conn, _rx) = connection();
    rooms.registry.start(key.clone(), "r1", "u1", conn).await.unwrap();

    rooms.registry.resize(&key, 132, 43).await;
    rooms.registry.resize(&SessionKey::from_parts("r1", "ghost"), 10, 10).await;

    let exec_id = rooms.registry.session(&key).map(|session| match session.placement() {
        roomshell::session::Placement::Container(shell) => shell.exec_id.clone(),
        roomshell::session::Placement::Local(_) => panic!("expected container placement"),
    });
    assert_eq!(rooms.runtime.resizes(), vec![(exec_id.unwrap(), 132, 43)]);
}

// =============================================================================
// Test 7: An unreachable runtime falls back to a local shell
// =============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_local_fallback_when_runtime_unreachable() {
    let rooms = TestRooms::new(FakeRuntime::unreachable());
    let key = SessionKey::from_parts("r1", "u1");
    let (conn, mut rx) = connection();

    let kind = rooms.registry.start(key.clone(), "r1", "u1", conn).await.unwrap();
    assert_eq!(kind, PlacementKind::Local);
    assert_eq!(rooms.runtime.creates(), 0);

    rooms.registry.input(&key, "echo local-$((40 + 2))\n").await.unwrap();
    let text = drain_text(&mut rx, Duration::from_millis(500)).await;
    assert!(text.contains("local-42"), "got: {text}");

    assert!(rooms.registry.cleanup(&key).await);
    assert_eq!(rooms.registry.state(&key), SessionState::Removed);
}

// =============================================================================
// Test 8: Idle sessions are closed after the configured timeout
// =============================================================================

#[tokio::test]
async fn test_idle_session_is_closed() {
    let rooms = TestRooms::with_config(FakeRuntime::new(), |config| {
        config.session.idle_timeout_secs = Some(1);
    });
    let key = SessionKey::from_parts("r1", "u1");
    let (conn, mut rx) = connection();
    rooms.registry.start(key.clone(), "r1", "u1", conn).await.unwrap();

    let registry = rooms.registry.clone();
    let idle_key = key.clone();
    wait_until(move || registry.state(&idle_key) == SessionState::Removed).await;

    let text = drain_text(&mut rx, Duration::from_millis(200)).await;
    assert!(text.contains("Session closed after inactivity"), "got: {text}");
    assert_eq!(rooms.runtime.removed().len(), 1);
}
