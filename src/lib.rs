// ABOUTME: Library crate for roomshell - sandboxed per-room terminal sessions for collaborative coding

#![allow(missing_docs)]

pub mod config;
pub mod demux;
pub mod dispatch;
pub mod events;
pub mod handler;
pub mod local;
pub mod pool;
pub mod runtime;
pub mod session;

pub use config::AppConfig;
pub use dispatch::{resolve_command, Dispatcher};
pub use events::{Connection, InboundEvent, OutboundEvent};
pub use handler::ConnectionHandler;
pub use pool::ContainerPool;
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use session::{SessionKey, SessionRegistry};
