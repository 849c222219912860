// ABOUTME: Per-user terminal sessions - keys, placement variants and the session record
//
// A session is either a local PTY shell or an interactive exec inside the
// room's container. The registry owns them; everything else looks them up.

pub mod registry;

pub use registry::SessionRegistry;

use crate::events::{Connection, ConnectionId, OutboundEvent};
use crate::local::LocalShell;
use crate::runtime::{ContainerError, ExecInput};
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Commands written to a fresh container shell before the user sees it
pub const CONTAINER_SHELL_INIT: &[&str] = &["export TERM=xterm-256color", "stty -ixon", "clear"];

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error("Failed to start local shell: {0}")]
    LocalSpawn(String),
    #[error("Session {0} was replaced or ended during initialization")]
    Superseded(SessionKey),
    #[error("Failed to write to session {key}: {source}")]
    Input {
        key: SessionKey,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid room id: {0:?}")]
    InvalidRoom(String),
}

/// Identifies one user's terminal in one room
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key clients derive from a room and user, `<room>-<user>`
    pub fn from_parts(room_id: &str, user_id: &str) -> Self {
        Self(format!("{room_id}-{user_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a session key as the registry reports it. Keys with no
/// entry, including ones never started, report `Removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Active,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementKind {
    Local,
    Container,
}

impl fmt::Display for PlacementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// Interactive exec attached to a room container
pub struct ContainerShell {
    pub container_id: String,
    pub exec_id: String,
    input: Mutex<Option<ExecInput>>,
}

impl fmt::Debug for ContainerShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerShell")
            .field("container_id", &self.container_id)
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

impl ContainerShell {
    pub fn new(container_id: String, exec_id: String, input: Option<ExecInput>) -> Self {
        Self {
            container_id,
            exec_id,
            input: Mutex::new(input),
        }
    }

    async fn write(&self, data: &[u8]) -> std::io::Result<()> {
        let mut input = self.input.lock().await;
        match input.as_mut() {
            Some(writer) => {
                writer.write_all(data).await?;
                writer.flush().await
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "exec input is closed",
            )),
        }
    }

    /// Close the exec's stdin; the shell exits on EOF
    async fn close(&self) {
        if let Some(mut writer) = self.input.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

#[derive(Debug)]
pub enum Placement {
    Local(LocalShell),
    Container(ContainerShell),
}

impl Placement {
    pub fn kind(&self) -> PlacementKind {
        match self {
            Self::Local(_) => PlacementKind::Local,
            Self::Container(_) => PlacementKind::Container,
        }
    }
}

/// A live terminal session.
///
/// Exactly one connection is attached: the one that sent `init-terminal`.
/// Another init for the same key, from any connection, replaces the session
/// and moves output to the new connection.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    room_id: String,
    user_id: String,
    generation: u64,
    workdir: PathBuf,
    placement: Placement,
    connection: Connection,
    cancel: CancellationToken,
    last_activity: StdMutex<Instant>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: SessionKey,
        room_id: &str,
        user_id: &str,
        generation: u64,
        workdir: PathBuf,
        placement: Placement,
        connection: Connection,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key,
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            generation,
            workdir,
            placement,
            connection,
            cancel,
            last_activity: StdMutex::new(Instant::now()),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn kind(&self) -> PlacementKind {
        self.placement.kind()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Id of the attached connection
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Cancelled when the session ends
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_ended(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deliver an event to the owning connection unless the session ends
    /// first. Returns false if it was not delivered.
    pub async fn emit(&self, event: OutboundEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.connection.send(event) => sent,
        }
    }

    /// Forward raw bytes to the underlying shell
    pub async fn write_input(&self, data: impl Into<Bytes>) -> Result<(), SessionError> {
        let data = data.into();
        self.touch();
        match &self.placement {
            Placement::Local(shell) => {
                if shell.write(data) {
                    Ok(())
                } else {
                    Err(SessionError::Input {
                        key: self.key.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "local shell input is closed",
                        ),
                    })
                }
            }
            Placement::Container(shell) => shell.write(&data).await.map_err(|source| SessionError::Input {
                key: self.key.clone(),
                source,
            }),
        }
    }

    pub(crate) fn touch(&self) {
        let mut last = self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *last = Instant::now();
    }

    pub(crate) fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Stop the I/O pumps and end the underlying process. The caller is
    /// responsible for the pool reference of container sessions.
    pub(crate) async fn shut_down(&self) {
        self.cancel.cancel();
        match &self.placement {
            Placement::Local(shell) => shell.kill(),
            Placement::Container(shell) => shell.close().await,
        }
    }
}
