// ABOUTME: Configuration management for roomshell
// Handles room paths, container runtime settings, local shell fallback and session limits

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where room file trees live
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Docker engine connection
    #[serde(default)]
    pub docker: DockerConfig,

    /// Per-room container settings
    #[serde(default)]
    pub container: ContainerSettings,

    /// Local PTY fallback settings
    #[serde(default)]
    pub local: LocalShellConfig,

    /// Session limits
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Root directory holding one directory per room
    #[serde(default = "default_rooms_path")]
    pub rooms_path: PathBuf,

    /// Set when the orchestrator itself runs inside a container
    #[serde(default)]
    pub running_in_docker: bool,

    /// Host-side project directory, used to compute bind paths when
    /// `running_in_docker` is set
    #[serde(default)]
    pub project_dir: Option<PathBuf>,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            rooms_path: default_rooms_path(),
            running_in_docker: false,
            project_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker host connection string
    /// Examples:
    /// - unix:///var/run/docker.sock
    /// - tcp://localhost:2376
    pub host: Option<String>,

    /// Connection timeout in seconds
    #[serde(default = "default_docker_timeout")]
    pub timeout: u64,

    /// Extra socket locations tried before the built-in ones
    #[serde(default)]
    pub socket_paths: Vec<PathBuf>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout: default_docker_timeout(),
            socket_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Execution image tag
    pub image: String,
    /// Directory containing the Dockerfile for the execution image
    pub build_context: PathBuf,
    /// Container names are `<name_prefix><room id>`
    pub name_prefix: String,
    /// Bind target for the room's files inside the container
    pub workspace: String,
    pub memory_bytes: i64,
    pub memory_swap_bytes: i64,
    pub cpu_shares: i64,
    pub network_mode: String,
    /// Entry command of the room container
    pub shell: Vec<String>,
    /// Seconds given to the container to stop before it is killed
    pub stop_grace_secs: i64,
    /// Delay before tearing down a room container whose last session left.
    /// Zero tears down immediately.
    pub release_grace_ms: u64,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            image: "collab-terminal-image".to_string(),
            build_context: PathBuf::from("."),
            name_prefix: "collab-room-".to_string(),
            workspace: "/workspace".to_string(),
            memory_bytes: 512 * 1024 * 1024,
            memory_swap_bytes: 1024 * 1024 * 1024,
            cpu_shares: 512,
            network_mode: "none".to_string(),
            shell: vec!["/bin/bash".to_string(), "-l".to_string()],
            stop_grace_secs: 1,
            release_grace_ms: 0,
        }
    }
}

impl ContainerSettings {
    pub fn container_name(&self, room_id: &str) -> String {
        format!("{}{}", self.name_prefix, room_id)
    }

    pub fn release_grace(&self) -> Duration {
        Duration::from_millis(self.release_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalShellConfig {
    /// Shell program; platform default when unset
    pub shell: Option<String>,
    pub cols: u16,
    pub rows: u16,
}

impl Default for LocalShellConfig {
    fn default() -> Self {
        Self {
            shell: None,
            cols: 80,
            rows: 30,
        }
    }
}

impl LocalShellConfig {
    pub fn shell_program(&self) -> String {
        self.shell.clone().unwrap_or_else(|| {
            if cfg!(target_os = "windows") {
                "powershell.exe".to_string()
            } else {
                "bash".to_string()
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions with no input or output for this long are ended.
    /// Unset means shells live until explicitly ended.
    pub idle_timeout_secs: Option<u64>,
    /// Capacity of each connection's outbound queue
    pub output_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: None,
            output_buffer: 256,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.filter(|secs| *secs > 0).map(Duration::from_secs)
    }
}

/// A room id must name exactly one directory under the rooms root
pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty()
        && room_id != "."
        && room_id != ".."
        && !room_id.contains(['/', '\\', '\0'])
        && !room_id.contains(':')
}

fn set_if_changed<T: PartialEq>(target: &mut T, value: T, default: &T) {
    if value != *default {
        *target = value;
    }
}

fn default_rooms_path() -> PathBuf {
    PathBuf::from("rooms")
}

fn default_docker_timeout() -> u64 {
    60
}

impl AppConfig {
    /// Load configuration from the standard locations, then `explicit` if given
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let standard: Vec<PathBuf> = Self::get_config_paths()
            .into_iter()
            .filter(|path| path.exists())
            .collect();

        Self::load_layered(
            standard
                .iter()
                .map(PathBuf::as_path)
                .chain(explicit),
        )
    }

    /// Merge the given files over the defaults, later files winning field
    /// by field. Every file must exist.
    pub fn load_layered<'a>(layers: impl IntoIterator<Item = &'a Path>) -> Result<Self> {
        let mut config = Self::default();
        for path in layers {
            config.merge(Self::load_file(path)?);
        }
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Get configuration file paths in order of precedence
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/roomshell/config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("roomshell").join("config.toml"));
        }

        paths
    }

    /// Merge another config into this one field by field; every field of
    /// `other` that differs from its default wins
    pub fn merge(&mut self, other: Self) {
        let defaults = Self::default();

        let rooms = other.rooms;
        set_if_changed(&mut self.rooms.rooms_path, rooms.rooms_path, &defaults.rooms.rooms_path);
        set_if_changed(
            &mut self.rooms.running_in_docker,
            rooms.running_in_docker,
            &defaults.rooms.running_in_docker,
        );
        set_if_changed(&mut self.rooms.project_dir, rooms.project_dir, &defaults.rooms.project_dir);

        if other.docker.host.is_some() {
            self.docker.host = other.docker.host;
        }
        if other.docker.timeout != defaults.docker.timeout {
            self.docker.timeout = other.docker.timeout;
        }
        self.docker.socket_paths.extend(other.docker.socket_paths);

        let (ours, theirs, base) = (&mut self.container, other.container, &defaults.container);
        set_if_changed(&mut ours.image, theirs.image, &base.image);
        set_if_changed(&mut ours.build_context, theirs.build_context, &base.build_context);
        set_if_changed(&mut ours.name_prefix, theirs.name_prefix, &base.name_prefix);
        set_if_changed(&mut ours.workspace, theirs.workspace, &base.workspace);
        set_if_changed(&mut ours.memory_bytes, theirs.memory_bytes, &base.memory_bytes);
        set_if_changed(&mut ours.memory_swap_bytes, theirs.memory_swap_bytes, &base.memory_swap_bytes);
        set_if_changed(&mut ours.cpu_shares, theirs.cpu_shares, &base.cpu_shares);
        set_if_changed(&mut ours.network_mode, theirs.network_mode, &base.network_mode);
        set_if_changed(&mut ours.shell, theirs.shell, &base.shell);
        set_if_changed(&mut ours.stop_grace_secs, theirs.stop_grace_secs, &base.stop_grace_secs);
        set_if_changed(&mut ours.release_grace_ms, theirs.release_grace_ms, &base.release_grace_ms);

        let local = other.local;
        set_if_changed(&mut self.local.shell, local.shell, &defaults.local.shell);
        set_if_changed(&mut self.local.cols, local.cols, &defaults.local.cols);
        set_if_changed(&mut self.local.rows, local.rows, &defaults.local.rows);

        let session = other.session;
        set_if_changed(
            &mut self.session.idle_timeout_secs,
            session.idle_timeout_secs,
            &defaults.session.idle_timeout_secs,
        );
        set_if_changed(
            &mut self.session.output_buffer,
            session.output_buffer,
            &defaults.session.output_buffer,
        );
    }

    /// Resolve a room id to its file root on this machine. Callers check the
    /// id with `is_valid_room_id` first.
    pub fn host_path_for(&self, room_id: &str) -> PathBuf {
        self.rooms.rooms_path.join(room_id)
    }

    /// Path handed to the engine as the bind source for a room.
    ///
    /// When the orchestrator runs inside a container, its own view of the
    /// rooms directory is not what the engine sees, so the path is rebuilt
    /// from the host-side project directory.
    pub fn bind_path_for(&self, room_id: &str) -> PathBuf {
        let host_path = self.host_path_for(room_id);

        if self.rooms.running_in_docker {
            if let Some(project_dir) = &self.rooms.project_dir {
                return project_dir.join("rooms").join(room_id);
            }
        }

        std::path::absolute(&host_path).unwrap_or(host_path)
    }
}
