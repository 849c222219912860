// ABOUTME: Docker-backed runtime driver using Bollard

use super::{
    ContainerError, ContainerRuntime, ContainerSummary, ExecIo, ExecSpec, ImageBuilder,
    RoomContainerSpec,
};
use crate::config::{AppConfig, DockerConfig};
use crate::demux::{encode_frame, StreamKind};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Socket locations tried when neither the config nor `DOCKER_HOST` names one
const DEFAULT_SOCKET_PATHS: &[&str] = &[
    "/var/run/docker.sock",
    "/mnt/wsl/docker-desktop/shared-sockets/guest-services/docker.sock",
];

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    timeout: Duration,
    build_context: PathBuf,
}

impl DockerRuntime {
    /// Build a client for the configured engine. This does not talk to the
    /// engine yet; use `ping` for that.
    pub fn connect(config: &AppConfig) -> Result<Self, ContainerError> {
        let docker = Self::connect_to_docker(&config.docker)?;

        Ok(Self {
            docker,
            timeout: Duration::from_secs(config.docker.timeout),
            build_context: config.container.build_context.clone(),
        })
    }

    pub fn get_docker_client(&self) -> Docker {
        self.docker.clone()
    }

    pub fn connect_to_docker(config: &DockerConfig) -> Result<Docker, bollard::errors::Error> {
        // Try configuration file first
        if let Some(docker_host) = &config.host {
            info!("Using Docker host from config: {}", docker_host);
            match Self::connect_to_host(docker_host, config.timeout) {
                Ok(docker) => return Ok(docker),
                Err(e) => {
                    warn!(
                        "Failed to connect to configured Docker host {}: {}",
                        docker_host, e
                    );
                }
            }
        }

        // Try environment variable next
        if let Ok(docker_host) = std::env::var("DOCKER_HOST") {
            info!("Using DOCKER_HOST: {}", docker_host);
            return Docker::connect_with_local_defaults();
        }

        let candidates = config
            .socket_paths
            .iter()
            .cloned()
            .chain(DEFAULT_SOCKET_PATHS.iter().map(PathBuf::from));

        for socket_path in candidates {
            if !socket_path.exists() {
                continue;
            }

            info!("Found Docker socket at: {}", socket_path.display());
            match Self::connect_to_socket(&socket_path, config.timeout) {
                Ok(docker) => return Ok(docker),
                Err(e) => {
                    warn!(
                        "Failed to connect to Docker socket {}: {}",
                        socket_path.display(),
                        e
                    );
                }
            }
        }

        // Fall back to default connection
        warn!("No Docker socket found, trying default connection");
        Docker::connect_with_local_defaults()
    }

    fn connect_to_host(host: &str, timeout: u64) -> Result<Docker, bollard::errors::Error> {
        match host.strip_prefix("unix://") {
            Some(path) => Self::connect_to_socket(Path::new(path), timeout),
            None => Docker::connect_with_http(host, timeout, API_DEFAULT_VERSION),
        }
    }

    #[cfg(unix)]
    fn connect_to_socket(path: &Path, timeout: u64) -> Result<Docker, bollard::errors::Error> {
        Docker::connect_with_unix(&path.to_string_lossy(), timeout, API_DEFAULT_VERSION)
    }

    #[cfg(not(unix))]
    fn connect_to_socket(_path: &Path, _timeout: u64) -> Result<Docker, bollard::errors::Error> {
        Docker::connect_with_local_defaults()
    }

    /// Convert one bollard output record back into engine wire bytes.
    ///
    /// Bollard splits non-TTY output into records already; re-framing keeps
    /// the driver contract byte-level for every caller.
    fn to_wire(output: LogOutput) -> bytes::Bytes {
        match output {
            LogOutput::StdOut { message } => encode_frame(StreamKind::Stdout, &message),
            LogOutput::StdErr { message } => encode_frame(StreamKind::Stderr, &message),
            LogOutput::StdIn { message } => encode_frame(StreamKind::Stdin, &message),
            LogOutput::Console { message } => message,
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.docker.ping()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!("Docker not running: {}", e);
                false
            }
            Err(_) => {
                warn!("Docker ping timeout - daemon may be unresponsive");
                false
            }
        }
    }

    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!("Image {} already exists locally", image);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                info!("Image {} missing, building it", image);
                ImageBuilder::new(self.docker.clone())
                    .build_from_context(image, &self.build_context)
                    .await
            }
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    async fn create_container(&self, spec: &RoomContainerSpec) -> Result<String, ContainerError> {
        let host_config = HostConfig {
            binds: Some(vec![spec.bind()]),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            memory: Some(spec.memory_bytes),
            memory_swap: Some(spec.memory_swap_bytes),
            cpu_shares: Some(spec.cpu_shares),
            network_mode: Some(spec.network_mode.clone()),
            auto_remove: Some(false), // We want to manage lifecycle manually
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            working_dir: Some(spec.workspace.clone()),
            env: Some(spec.env.clone()),
            cmd: Some(spec.cmd.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            stdin_once: Some(false),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            labels: Some(spec.labels()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(create_options), container_config)
            .await?;

        info!("Created container {} with ID {}", spec.name, response.id);
        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<(), ContainerError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;

        info!("Successfully started container {}", container_id);
        Ok(())
    }

    async fn stop_container(
        &self,
        container_id: &str,
        grace_secs: i64,
    ) -> Result<(), ContainerError> {
        let stop_options = StopContainerOptions { t: grace_secs };

        match self.docker.stop_container(container_id, Some(stop_options)).await {
            Ok(()) => {
                info!("Successfully stopped container {}", container_id);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {
                debug!("Container {} was already stopped", container_id);
                Ok(())
            }
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), ContainerError> {
        let remove_options = RemoveContainerOptions {
            force: true,
            v: true, // Remove associated volumes
            ..Default::default()
        };

        match self.docker.remove_container(container_id, Some(remove_options)).await {
            Ok(()) => {
                info!("Successfully removed container {}", container_id);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} was already removed", container_id);
                Ok(())
            }
            Err(e) => Err(ContainerError::Connection(e)),
        }
    }

    async fn list_containers(
        &self,
        name_prefix: &str,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters: {
                    let mut filters = HashMap::new();
                    filters.insert("name".to_string(), vec![name_prefix.to_string()]);
                    filters
                },
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerSummary {
                    id: c.id?,
                    names: c.names.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn create_exec(
        &self,
        container_id: &str,
        spec: &ExecSpec,
    ) -> Result<String, ContainerError> {
        let exec_options = CreateExecOptions {
            cmd: Some(spec.cmd.clone()),
            attach_stdin: Some(spec.attach_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(spec.tty),
            working_dir: spec.working_dir.clone(),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            ..Default::default()
        };

        let exec = self.docker.create_exec(container_id, exec_options).await?;
        debug!("Created exec {} in container {}", exec.id, container_id);
        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecIo, ContainerError> {
        let options = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        match self.docker.start_exec(exec_id, Some(options)).await? {
            StartExecResults::Attached { output, input } => Ok(ExecIo {
                output: output
                    .map(|item| item.map(Self::to_wire).map_err(ContainerError::Connection))
                    .boxed(),
                input: Some(input),
            }),
            StartExecResults::Detached => Err(ContainerError::OperationFailed(format!(
                "Exec {exec_id} started detached"
            ))),
        }
    }

    async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<(), ContainerError> {
        self.docker
            .resize_exec(
                exec_id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await?;
        Ok(())
    }
}
