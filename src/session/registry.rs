// ABOUTME: Session registry - owns every live terminal session and drives their lifecycle
//
// Map discipline: the entry for a key is always removed before that
// session's resources are released, and only the caller that removed it does
// the releasing. A concurrent second cleanup finds nothing and returns.

use super::{
    ContainerShell, Placement, PlacementKind, Session, SessionError, SessionKey, SessionState,
    CONTAINER_SHELL_INIT,
};
use crate::config::{is_valid_room_id, AppConfig};
use crate::events::{Connection, OutboundEvent};
use crate::local::{LocalShell, LocalShellIo, UNKNOWN_EXIT_CODE};
use crate::pool::ContainerPool;
use crate::runtime::{ContainerError, ExecOutput, ExecSpec};
use bytes::Bytes;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long to keep reading PTY output after the shell process has exited
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

enum SessionSlot {
    Initializing {
        generation: u64,
        cancel: CancellationToken,
    },
    Active(Arc<Session>),
}

impl SessionSlot {
    fn generation(&self) -> u64 {
        match self {
            Self::Initializing { generation, .. } => *generation,
            Self::Active(session) => session.generation(),
        }
    }
}

/// Output side of a session under construction
enum SessionIo {
    Local(LocalShellIo),
    Container(ExecOutput),
}

pub struct SessionRegistry {
    pool: ContainerPool,
    config: AppConfig,
    sessions: StdMutex<HashMap<SessionKey, SessionSlot>>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    pub fn new(pool: ContainerPool, config: AppConfig) -> Arc<Self> {
        Arc::new(Self {
            pool,
            config,
            sessions: StdMutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        })
    }

    pub fn pool(&self) -> &ContainerPool {
        &self.pool
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start a session for `key`, retiring any existing one first. Output
    /// and termination notices go to `connection`.
    pub async fn start(
        self: &Arc<Self>,
        key: SessionKey,
        room_id: &str,
        user_id: &str,
        connection: Connection,
    ) -> Result<PlacementKind, SessionError> {
        if !is_valid_room_id(room_id) {
            warn!(session = %key, room = %room_id, "Rejecting invalid room id");
            return Err(SessionError::InvalidRoom(room_id.to_string()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();

        let previous = self.lock_sessions().insert(
            key.clone(),
            SessionSlot::Initializing {
                generation,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            info!(session = %key, "Replacing existing session");
            self.retire(&key, previous).await;
        }

        let built = self
            .build_session(&key, room_id, user_id, generation, connection, cancel)
            .await;

        match built {
            Ok((session, io)) => self.activate(session, io).await,
            Err(e) => {
                error!(session = %key, room = %room_id, error = %e, "Terminal initialization failed");
                self.remove_generation(&key, generation);
                Err(e)
            }
        }
    }

    /// Forward raw input to the session's shell. Unknown keys are ignored.
    pub async fn input(&self, key: &SessionKey, data: impl Into<Bytes>) -> Result<(), SessionError> {
        let Some(session) = self.session(key) else {
            warn!(session = %key, "Session not found for input");
            return Ok(());
        };
        session.write_input(data).await
    }

    /// Change the terminal size. Unknown keys and resize failures are logged
    /// and otherwise ignored.
    pub async fn resize(&self, key: &SessionKey, cols: u16, rows: u16) {
        let Some(session) = self.session(key) else {
            debug!(session = %key, "Resize for unknown session");
            return;
        };

        match session.placement() {
            Placement::Local(shell) => {
                if let Err(e) = shell.resize(cols, rows) {
                    warn!(session = %key, error = %e, "Resize failed");
                }
            }
            Placement::Container(shell) => {
                if let Err(e) = self
                    .pool
                    .runtime()
                    .resize_exec(&shell.exec_id, cols, rows)
                    .await
                {
                    warn!(session = %key, error = %e, "Resize failed");
                }
            }
        }
    }

    /// End the session for `key`. Idempotent; returns false when there was
    /// nothing to clean up.
    pub async fn cleanup(&self, key: &SessionKey) -> bool {
        let removed = self.lock_sessions().remove(key);
        match removed {
            Some(slot) => {
                self.retire(key, slot).await;
                true
            }
            None => {
                debug!(session = %key, "Session already cleaned up");
                false
            }
        }
    }

    /// End every session. Used at shutdown before sweeping containers.
    pub async fn shutdown(&self) {
        let drained: Vec<(SessionKey, SessionSlot)> = self.lock_sessions().drain().collect();
        info!(count = drained.len(), "Shutting down sessions");
        for (key, slot) in drained {
            self.retire(&key, slot).await;
        }
    }

    /// The active session for `key`
    pub fn session(&self, key: &SessionKey) -> Option<Arc<Session>> {
        match self.lock_sessions().get(key) {
            Some(SessionSlot::Active(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    pub fn state(&self, key: &SessionKey) -> SessionState {
        match self.lock_sessions().get(key) {
            Some(SessionSlot::Initializing { .. }) => SessionState::Initializing,
            Some(SessionSlot::Active(_)) => SessionState::Active,
            None => SessionState::Removed,
        }
    }

    pub fn len(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn build_session(
        &self,
        key: &SessionKey,
        room_id: &str,
        user_id: &str,
        generation: u64,
        connection: Connection,
        cancel: CancellationToken,
    ) -> Result<(Session, SessionIo), SessionError> {
        let host_path = self.config.host_path_for(room_id);
        if let Err(e) = tokio::fs::create_dir_all(&host_path).await {
            warn!(room = %room_id, path = %host_path.display(), error = %e, "Could not create room directory");
        }

        if !self.pool.runtime().ping().await {
            warn!(session = %key, "Container runtime unreachable, using local shell");
            return self.build_local(key, room_id, user_id, generation, host_path, connection, cancel);
        }

        let bind_path = self.config.bind_path_for(room_id);
        let container_id = match self.pool.acquire(room_id, &bind_path).await {
            Ok(container_id) => container_id,
            Err(ContainerError::Unavailable) => {
                warn!(session = %key, "Container runtime went away during placement, using local shell");
                return self.build_local(key, room_id, user_id, generation, host_path, connection, cancel);
            }
            Err(e) => return Err(e.into()),
        };

        match self.open_container_shell(container_id).await {
            Ok((shell, output)) => {
                let session = Session::new(
                    key.clone(),
                    room_id,
                    user_id,
                    generation,
                    PathBuf::from(&self.pool.settings().workspace),
                    Placement::Container(shell),
                    connection,
                    cancel,
                );
                Ok((session, SessionIo::Container(output)))
            }
            Err(e) => {
                self.pool.release(room_id).await;
                Err(e.into())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_local(
        &self,
        key: &SessionKey,
        room_id: &str,
        user_id: &str,
        generation: u64,
        host_path: PathBuf,
        connection: Connection,
        cancel: CancellationToken,
    ) -> Result<(Session, SessionIo), SessionError> {
        let (shell, io) = LocalShell::spawn(&self.config.local, &host_path)
            .map_err(|e| SessionError::LocalSpawn(e.to_string()))?;
        let session = Session::new(
            key.clone(),
            room_id,
            user_id,
            generation,
            host_path,
            Placement::Local(shell),
            connection,
            cancel,
        );
        Ok((session, SessionIo::Local(io)))
    }

    async fn open_container_shell(
        &self,
        container_id: String,
    ) -> Result<(ContainerShell, ExecOutput), ContainerError> {
        let runtime = self.pool.runtime();
        let spec = ExecSpec::interactive_shell(&self.pool.settings().workspace);
        let exec_id = runtime.create_exec(&container_id, &spec).await?;
        let io = runtime.start_exec(&exec_id).await?;

        let shell = ContainerShell::new(container_id, exec_id, io.input);
        let init = format!("{}\n", CONTAINER_SHELL_INIT.join("\n"));
        if let Err(e) = shell.write(init.as_bytes()).await {
            warn!(exec = %shell.exec_id, error = %e, "Unable to write init commands to exec stream");
        }

        Ok((shell, io.output))
    }

    /// Promote a built session to Active, unless it was replaced or cleaned
    /// up while initializing, in which case it is torn down here
    async fn activate(
        self: &Arc<Self>,
        session: Session,
        io: SessionIo,
    ) -> Result<PlacementKind, SessionError> {
        let session = Arc::new(session);
        let key = session.key().clone();

        let still_current = {
            let mut sessions = self.lock_sessions();
            let current = matches!(
                sessions.get(&key),
                Some(SessionSlot::Initializing { generation, .. }) if *generation == session.generation()
            );
            if current {
                sessions.insert(key.clone(), SessionSlot::Active(Arc::clone(&session)));
            }
            current
        };

        if !still_current {
            info!(session = %key, "Session superseded during initialization");
            self.release_session(&session).await;
            return Err(SessionError::Superseded(key));
        }

        match io {
            SessionIo::Local(io) => {
                tokio::spawn(Arc::clone(self).pump_local(Arc::clone(&session), io));
            }
            SessionIo::Container(output) => {
                tokio::spawn(Arc::clone(self).pump_container(Arc::clone(&session), output));
            }
        }

        if let Some(timeout) = self.config.session.idle_timeout() {
            tokio::spawn(Arc::clone(self).watch_idle(Arc::clone(&session), timeout));
        }

        let kind = session.kind();
        info!(session = %key, room = %session.room_id(), placement = %kind, "Terminal session initialized");
        Ok(kind)
    }

    async fn retire(&self, key: &SessionKey, slot: SessionSlot) {
        match slot {
            SessionSlot::Initializing { cancel, .. } => {
                // The in-flight start sees its slot gone and tears down what it built
                debug!(session = %key, "Cancelling session still initializing");
                cancel.cancel();
            }
            SessionSlot::Active(session) => self.release_session(&session).await,
        }
    }

    async fn release_session(&self, session: &Session) {
        session.shut_down().await;
        if session.kind() == PlacementKind::Container {
            self.pool.release(session.room_id()).await;
        }
        info!(session = %session.key(), "Session cleaned up");
    }

    fn remove_generation(&self, key: &SessionKey, generation: u64) -> Option<SessionSlot> {
        let mut sessions = self.lock_sessions();
        if sessions.get(key).is_some_and(|slot| slot.generation() == generation) {
            sessions.remove(key)
        } else {
            None
        }
    }

    /// Clean up `key` only if it still belongs to the given session instance
    async fn cleanup_generation(&self, key: &SessionKey, generation: u64) {
        if let Some(slot) = self.remove_generation(key, generation) {
            self.retire(key, slot).await;
        }
    }

    async fn forward(&self, session: &Session, chunk: Bytes) {
        session.touch();
        session.emit(OutboundEvent::output(chunk)).await;
    }

    async fn pump_local(self: Arc<Self>, session: Arc<Session>, mut io: LocalShellIo) {
        let cancel = session.cancel_token().clone();

        let code = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                chunk = io.output.recv() => match chunk {
                    Some(chunk) => self.forward(&session, chunk).await,
                    None => {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            code = &mut io.exit => break code.unwrap_or(UNKNOWN_EXIT_CODE),
                        }
                    }
                },
                code = &mut io.exit => {
                    while let Ok(Some(chunk)) = tokio::time::timeout(EXIT_DRAIN_TIMEOUT, io.output.recv()).await {
                        self.forward(&session, chunk).await;
                    }
                    break code.unwrap_or(UNKNOWN_EXIT_CODE);
                }
            }
        };

        info!(session = %session.key(), code, "Local shell exited");
        session
            .emit(OutboundEvent::output(format!(
                "\r\n\x1b[33m⚙️ Session terminated (code: {code})\x1b[0m\r\n"
            )))
            .await;
        self.cleanup_generation(session.key(), session.generation()).await;
    }

    async fn pump_container(self: Arc<Self>, session: Arc<Session>, mut output: ExecOutput) {
        let cancel = session.cancel_token().clone();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                item = output.next() => match item {
                    Some(Ok(chunk)) => self.forward(&session, chunk).await,
                    Some(Err(e)) => {
                        error!(session = %session.key(), error = %e, "Container stream error");
                        session
                            .emit(OutboundEvent::output(format!(
                                "\r\n\x1b[31m⚠️ Container error: {e}\x1b[0m\r\n"
                            )))
                            .await;
                        break;
                    }
                    None => {
                        info!(session = %session.key(), "Container exec stream ended");
                        session
                            .emit(OutboundEvent::error(
                                "\r\n\x1b[33m⚙️ Session terminated by container\x1b[0m\r\n",
                            ))
                            .await;
                        break;
                    }
                },
            }
        }

        self.cleanup_generation(session.key(), session.generation()).await;
    }

    async fn watch_idle(self: Arc<Self>, session: Arc<Session>, timeout: Duration) {
        let cancel = session.cancel_token().clone();

        loop {
            let deadline = session.last_activity() + timeout;
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            if session.last_activity() + timeout <= Instant::now() {
                break;
            }
        }

        info!(session = %session.key(), ?timeout, "Session idle, closing");
        session
            .emit(OutboundEvent::output(
                "\r\n\x1b[33m⚙️ Session closed after inactivity\x1b[0m\r\n",
            ))
            .await;
        self.cleanup_generation(session.key(), session.generation()).await;
    }
}
