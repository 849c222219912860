// ABOUTME: Isolated runtime driver - the capability surface over the container engine
//
// The pool, registry and dispatcher only talk to the engine through the
// `ContainerRuntime` trait, so tests can swap in a mock engine.

pub mod builder;
pub mod docker;

pub use builder::ImageBuilder;
pub use docker::DockerRuntime;

use crate::config::ContainerSettings;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncWrite;

/// Label put on every container this system creates
pub const MANAGED_LABEL: &str = "roomshell-managed";
pub const ROOM_LABEL: &str = "roomshell-room";

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Docker connection error: {0}")]
    Connection(#[from] bollard::errors::Error),
    #[error("Container runtime is not available")]
    Unavailable,
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Image build failed: {0}")]
    ImageBuild(String),
    #[error("Container operation failed: {0}")]
    OperationFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to create one room's container
#[derive(Debug, Clone, PartialEq)]
pub struct RoomContainerSpec {
    pub room_id: String,
    pub name: String,
    pub image: String,
    /// Host path bound read-write at `workspace`
    pub bind_source: PathBuf,
    pub workspace: String,
    pub memory_bytes: i64,
    pub memory_swap_bytes: i64,
    pub cpu_shares: i64,
    pub network_mode: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
}

impl RoomContainerSpec {
    pub fn for_room(settings: &ContainerSettings, room_id: &str, bind_source: PathBuf) -> Self {
        Self {
            room_id: room_id.to_string(),
            name: settings.container_name(room_id),
            image: settings.image.clone(),
            bind_source,
            workspace: settings.workspace.clone(),
            memory_bytes: settings.memory_bytes,
            memory_swap_bytes: settings.memory_swap_bytes,
            cpu_shares: settings.cpu_shares,
            network_mode: settings.network_mode.clone(),
            cmd: settings.shell.clone(),
            env: vec![
                "TERM=xterm-256color".to_string(),
                "PS1=\\u@\\h:\\w\\$ ".to_string(),
                "LANG=C.UTF-8".to_string(),
                "LC_ALL=C.UTF-8".to_string(),
            ],
        }
    }

    /// Bind string in the engine's `source:target` form
    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_source.to_string_lossy(), self.workspace)
    }

    pub fn labels(&self) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(ROOM_LABEL.to_string(), self.room_id.clone());
        labels
    }
}

/// A command to run inside an already running container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub tty: bool,
    pub attach_stdin: bool,
    pub working_dir: Option<String>,
    pub env: Vec<String>,
}

impl ExecSpec {
    /// Interactive shell with a TTY; its output is raw, un-framed bytes
    pub fn interactive_shell(workspace: &str) -> Self {
        Self {
            cmd: vec!["/bin/bash".to_string()],
            tty: true,
            attach_stdin: true,
            working_dir: Some(workspace.to_string()),
            env: vec!["TERM=xterm-256color".to_string()],
        }
    }

    /// One-shot `bash -c` without a TTY; its output is framed
    pub fn one_shot(command: &str) -> Self {
        Self {
            cmd: vec!["/bin/bash".to_string(), "-c".to_string(), command.to_string()],
            tty: false,
            attach_stdin: false,
            working_dir: None,
            env: Vec::new(),
        }
    }
}

/// Engine wire bytes coming out of an exec
pub type ExecOutput = BoxStream<'static, Result<Bytes, ContainerError>>;
/// Writable side of an exec attached with stdin
pub type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// I/O handles of a started exec
pub struct ExecIo {
    pub output: ExecOutput,
    pub input: Option<ExecInput>,
}

impl std::fmt::Debug for ExecIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecIo")
            .field("input", &self.input.is_some())
            .finish_non_exhaustive()
    }
}

/// Summary of a container the engine knows about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// True when the engine answers
    async fn ping(&self) -> bool;

    /// Make sure `image` exists locally, building it if missing
    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError>;

    /// Create a container and return its id
    async fn create_container(&self, spec: &RoomContainerSpec) -> Result<String, ContainerError>;

    async fn start_container(&self, container_id: &str) -> Result<(), ContainerError>;

    /// Stop with a grace period, after which the engine kills the container
    async fn stop_container(&self, container_id: &str, grace_secs: i64)
        -> Result<(), ContainerError>;

    /// Force-remove; a missing container counts as removed
    async fn remove_container(&self, container_id: &str) -> Result<(), ContainerError>;

    /// Containers (running or not) whose name contains `name_prefix`
    async fn list_containers(
        &self,
        name_prefix: &str,
    ) -> Result<Vec<ContainerSummary>, ContainerError>;

    /// Create an exec and return its id
    async fn create_exec(&self, container_id: &str, spec: &ExecSpec)
        -> Result<String, ContainerError>;

    async fn start_exec(&self, exec_id: &str) -> Result<ExecIo, ContainerError>;

    async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16)
        -> Result<(), ContainerError>;
}
