// ABOUTME: Routes one connection's inbound events into the session registry and dispatcher
//
// Every failure becomes a terminal-error on this connection only; nothing a
// connection sends can take down other sessions.

use crate::dispatch::{DispatchError, Dispatcher};
use crate::events::{Connection, InboundEvent};
use crate::session::{SessionError, SessionKey, SessionRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct ConnectionHandler {
    registry: Arc<SessionRegistry>,
    dispatcher: Dispatcher,
    connection: Connection,
    /// Room and user of the last init-terminal, used on disconnect
    current: Option<(String, String)>,
}

impl ConnectionHandler {
    pub fn new(registry: Arc<SessionRegistry>, connection: Connection) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
            connection,
            current: None,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Process events until `disconnect` or until the inbound side closes,
    /// which counts as a disconnect
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundEvent>) {
        info!(connection = %self.connection.id(), "Connection opened");

        while let Some(event) = inbound.recv().await {
            let disconnect = matches!(event, InboundEvent::Disconnect);
            self.handle(event).await;
            if disconnect {
                return;
            }
        }

        self.handle(InboundEvent::Disconnect).await;
    }

    pub async fn handle(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::InitTerminal {
                room_id,
                user_id,
                session_key,
            } => {
                self.current = Some((room_id.clone(), user_id.clone()));
                let key = SessionKey::new(session_key);
                let result = self
                    .registry
                    .start(key, &room_id, &user_id, self.connection.clone())
                    .await;

                match result {
                    Ok(_) => {}
                    Err(SessionError::Superseded(key)) => {
                        debug!(session = %key, "Init superseded by a newer request");
                    }
                    Err(e) => {
                        self.connection.error(e.to_string()).await;
                    }
                }
            }
            InboundEvent::TerminalInput { session_key, data } => {
                let key = SessionKey::new(session_key);
                if let Err(e) = self.registry.input(&key, data).await {
                    warn!(session = %key, error = %e, "Error handling terminal input");
                    self.connection.error(e.to_string()).await;
                }
            }
            InboundEvent::ResizeTerminal {
                room_id,
                user_id,
                cols,
                rows,
            } => {
                let key = SessionKey::from_parts(&room_id, &user_id);
                self.registry.resize(&key, cols, rows).await;
            }
            InboundEvent::RunFile {
                file,
                room_id,
                user_id,
            } => {
                let key = SessionKey::from_parts(&room_id, &user_id);
                match self.dispatcher.run(&key, &file, &room_id).await {
                    Ok(()) => {}
                    Err(e @ (DispatchError::SessionNotFound(_) | DispatchError::Unsupported(_))) => {
                        warn!(session = %key, file = %file.path, error = %e, "Run rejected");
                        self.connection.error(e.to_string()).await;
                    }
                    Err(e) => {
                        warn!(session = %key, file = %file.path, error = %e, "File execution failed");
                        self.connection.error(e.to_string()).await;
                    }
                }
            }
            InboundEvent::LeaveTerminal { room_id, user_id } => {
                let key = SessionKey::from_parts(&room_id, &user_id);
                self.registry.cleanup(&key).await;
                info!(room = %room_id, user = %user_id, "User left terminal");
            }
            InboundEvent::Disconnect => {
                if let Some((room_id, user_id)) = self.current.take() {
                    let key = SessionKey::from_parts(&room_id, &user_id);
                    self.registry.cleanup(&key).await;
                    info!(room = %room_id, user = %user_id, "User disconnected from terminal");
                }
                debug!(connection = %self.connection.id(), "Connection closed");
            }
        }
    }
}
