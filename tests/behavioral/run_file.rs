// ABOUTME: Behavioral tests for run-file dispatch through the connection handler

use crate::fixtures::{connection, drain_text, FakeRuntime, TestRooms};
use bytes::Bytes;
use pretty_assertions::assert_eq;
use roomshell::demux::{encode_frame, StreamKind};
use roomshell::events::{FileRef, InboundEvent, OutboundEvent};
use roomshell::ConnectionHandler;
use std::time::Duration;
use tokio::sync::mpsc;

const WINDOW: Duration = Duration::from_millis(300);

fn init(room: &str, user: &str) -> InboundEvent {
    InboundEvent::InitTerminal {
        room_id: room.to_string(),
        user_id: user.to_string(),
        session_key: format!("{room}-{user}"),
    }
}

fn run(name: &str, path: &str, room: &str, user: &str) -> InboundEvent {
    InboundEvent::RunFile {
        file: FileRef {
            name: name.to_string(),
            path: path.to_string(),
        },
        room_id: room.to_string(),
        user_id: user.to_string(),
    }
}

async fn handler(rooms: &TestRooms) -> (ConnectionHandler, mpsc::Receiver<OutboundEvent>) {
    let (conn, rx) = connection();
    (ConnectionHandler::new(rooms.registry.clone(), conn), rx)
}

// =============================================================================
// Test 1: Running a Python file prints markers around demultiplexed output
// =============================================================================

#[tokio::test]
async fn test_run_python_in_container() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let (mut handler, mut rx) = handler(&rooms).await;

    handler.handle(init("r1", "u1")).await;
    handler
        .handle(run("main.py", "/rooms/r1/src/main.py", "r1", "u1"))
        .await;

    let text = drain_text(&mut rx, WINDOW).await;
    assert_eq!(rooms.runtime.one_shot_commands(), vec!["python3 src/main.py".to_string()]);

    let running = text.find("ᐅ Running: python3 src/main.py").expect("running marker");
    let stdout = text.find("hello from run").expect("stdout");
    let stderr = text.find("warning: unused").expect("stderr");
    let done = text.find("✅ Execution completed").expect("completed marker");
    assert!(running < stdout && stdout < stderr && stderr < done, "got: {text}");
}

// =============================================================================
// Test 2: Frames split across chunks are reassembled
// =============================================================================

#[tokio::test]
async fn test_split_frames_are_reassembled() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let framed = [
        encode_frame(StreamKind::Stdout, b"compiled ok\n"),
        encode_frame(StreamKind::Stdout, b"result: 42\n"),
    ]
    .concat();
    rooms.runtime.set_one_shot_output(vec![
        Bytes::copy_from_slice(&framed[..3]),
        Bytes::copy_from_slice(&framed[3..14]),
        Bytes::copy_from_slice(&framed[14..]),
    ]);
    let (mut handler, mut rx) = handler(&rooms).await;

    handler.handle(init("r1", "u1")).await;
    handler.handle(run("Main.java", "r1/Main.java", "r1", "u1")).await;

    let text = drain_text(&mut rx, WINDOW).await;
    assert!(text.contains("compiled ok\nresult: 42\n"), "got: {text:?}");
    assert_eq!(
        rooms.runtime.one_shot_commands(),
        vec![r#"javac $(find . -name "*.java") && java Main"#.to_string()]
    );
}

// =============================================================================
// Test 3: Files outside the room are rejected before any exec
// =============================================================================

#[tokio::test]
async fn test_path_outside_room_is_unsupported() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let (mut handler, mut rx) = handler(&rooms).await;

    handler.handle(init("r1", "u1")).await;
    handler
        .handle(run("main.py", "/rooms/r10/main.py", "r1", "u1"))
        .await;

    let text = drain_text(&mut rx, WINDOW).await;
    assert!(text.contains("Unsupported file type"), "got: {text}");
    assert!(rooms.runtime.one_shot_commands().is_empty());
}

// =============================================================================
// Test 4: Unknown languages are rejected
// =============================================================================

#[tokio::test]
async fn test_language_without_template_is_unsupported() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let (mut handler, mut rx) = handler(&rooms).await;

    handler.handle(init("r1", "u1")).await;
    handler.handle(run("notes.md", "r1/notes.md", "r1", "u1")).await;

    let text = drain_text(&mut rx, WINDOW).await;
    assert!(text.contains("Unsupported file type"), "got: {text}");
    assert!(rooms.runtime.one_shot_commands().is_empty());
}

// =============================================================================
// Test 5: Running without a session reports it
// =============================================================================

#[tokio::test]
async fn test_run_without_session() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let (mut handler, mut rx) = handler(&rooms).await;

    handler.handle(run("main.py", "r1/main.py", "r1", "u1")).await;

    assert_eq!(rx.recv().await, Some(OutboundEvent::error("Session not initialized")));
    assert_eq!(rooms.runtime.creates(), 0);
}

// =============================================================================
// Test 6: Local sessions get the command typed into their shell
// =============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_run_in_local_shell() {
    let rooms = TestRooms::new(FakeRuntime::unreachable());
    let (mut handler, mut rx) = handler(&rooms).await;

    handler.handle(init("r1", "u1")).await;
    handler.handle(run("app.ts", "r1/web/app.ts", "r1", "u1")).await;

    let text = drain_text(&mut rx, Duration::from_millis(500)).await;
    assert!(text.contains("ᐅ Running: tsc web/app.ts && node web/app.js"), "got: {text}");
    assert!(rooms.runtime.one_shot_commands().is_empty());
}

// =============================================================================
// Test 7: Disconnect ends the connection's session
// =============================================================================

#[tokio::test]
async fn test_disconnect_cleans_up_session() {
    let rooms = TestRooms::new(FakeRuntime::new());
    let (handler, _rx) = handler(&rooms).await;
    let (tx, inbound) = mpsc::channel(8);

    let task = tokio::spawn(handler.run(inbound));
    tx.send(init("r1", "u1")).await.unwrap();
    // Closing the inbound side counts as a disconnect
    drop(tx);
    task.await.unwrap();

    assert!(rooms.registry.is_empty());
    assert_eq!(rooms.runtime.removed().len(), 1);
}
