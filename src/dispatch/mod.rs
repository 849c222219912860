// ABOUTME: Execution dispatcher - turns a room file into a run command and runs it in the user's session
//
// Container sessions get a one-shot exec whose framed output is demultiplexed
// and relayed with completion markers. Local sessions get the command typed
// into their shell.

pub mod language;

pub use language::Language;

use crate::demux::Demuxer;
use crate::events::{FileRef, OutboundEvent};
use crate::runtime::{ContainerError, ExecOutput, ExecSpec};
use crate::session::{Placement, Session, SessionError, SessionKey, SessionRegistry};
use bytes::Bytes;
use futures_util::stream::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Session not initialized")]
    SessionNotFound(SessionKey),
    #[error("Unsupported file type")]
    Unsupported(String),
    #[error(transparent)]
    Exec(#[from] ContainerError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Room-relative command for `file`, or `None` when the path is outside the
/// room or the language has no run template.
///
/// Pure: the same inputs always give the same command.
pub fn resolve_command(file: &FileRef, room_id: &str) -> Option<String> {
    if room_id.is_empty() {
        return None;
    }

    let normalized = file.path.replace('\\', "/");
    let segments: Vec<&str> = normalized.split('/').collect();
    let room_at = segments.iter().position(|segment| *segment == room_id)?;
    let relative = segments[room_at + 1..].join("/");
    let relative = relative.trim_start_matches('/');

    Language::from_file_name(&file.name).run_command(relative)
}

fn running_marker(command: &str) -> String {
    format!("\r\n\x1b[36mᐅ Running: {command}\x1b[0m\r\n")
}

const COMPLETED_MARKER: &str = "\r\n\x1b[32m✅ Execution completed\x1b[0m\r\n";

fn failed_marker(message: &str) -> String {
    format!("\r\n\x1b[31m❌ Execution failed: {message}\x1b[0m\r\n")
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Run `file` in the active session for `key`. For container sessions
    /// this returns once the exec has started; output keeps flowing to the
    /// session's connection until the exec ends or the session does.
    pub async fn run(&self, key: &SessionKey, file: &FileRef, room_id: &str) -> Result<(), DispatchError> {
        let session = self
            .registry
            .session(key)
            .ok_or_else(|| DispatchError::SessionNotFound(key.clone()))?;

        let command = resolve_command(file, room_id).ok_or_else(|| {
            debug!(session = %key, file = %file.path, "No run command for file");
            DispatchError::Unsupported(file.name.clone())
        })?;

        info!(session = %key, room = %room_id, command = %command, "Running file");
        session.emit(OutboundEvent::output(running_marker(&command))).await;

        match session.placement() {
            Placement::Local(_) => {
                session.write_input(format!("{command}\n")).await?;
                Ok(())
            }
            Placement::Container(shell) => {
                let output = match self.start_one_shot(&shell.container_id, &command).await {
                    Ok(output) => output,
                    Err(e) => {
                        error!(session = %key, error = %e, "Failed to start exec");
                        session.emit(OutboundEvent::output(failed_marker(&e.to_string()))).await;
                        return Err(e.into());
                    }
                };
                tokio::spawn(relay_exec(Arc::clone(&session), output));
                Ok(())
            }
        }
    }

    async fn start_one_shot(&self, container_id: &str, command: &str) -> Result<ExecOutput, ContainerError> {
        let runtime = self.registry.pool().runtime();
        let exec_id = runtime.create_exec(container_id, &ExecSpec::one_shot(command)).await?;
        let io = runtime.start_exec(&exec_id).await?;
        Ok(io.output)
    }
}

/// Demultiplex a one-shot exec's output into the session until the exec
/// ends; stops early if the session ends
async fn relay_exec(session: Arc<Session>, mut output: ExecOutput) {
    let cancel = session.cancel_token().clone();

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let stderr_tx = tx.clone();
    let mut demuxer = Demuxer::new(
        move |data| {
            let _ = tx.send(data);
        },
        move |data| {
            let _ = stderr_tx.send(data);
        },
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(session = %session.key(), "Session ended during run");
                return;
            }
            item = output.next() => match item {
                Some(Ok(chunk)) => {
                    demuxer.push(&chunk);
                    while let Ok(data) = rx.try_recv() {
                        session.emit(OutboundEvent::output(data)).await;
                    }
                }
                Some(Err(e)) => {
                    warn!(session = %session.key(), error = %e, "Exec stream failed");
                    session.emit(OutboundEvent::output(failed_marker(&e.to_string()))).await;
                    return;
                }
                None => {
                    if demuxer.pending() > 0 {
                        debug!(session = %session.key(), pending = demuxer.pending(), "Exec ended mid-frame");
                    }
                    session.emit(OutboundEvent::output(COMPLETED_MARKER)).await;
                    return;
                }
            },
        }
    }
}
