use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

use super::{ContainerEngine, ContainerSpec, ContainerState, EngineError};

/// Seconds bollard waits on the socket before giving up on a request.
const SOCKET_TIMEOUT_SECS: u64 = 120;

/// `ContainerEngine` backed by the local Docker daemon.
pub(crate) struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to Docker, either through an explicit unix socket or the
    /// local defaults (`DOCKER_HOST`, then `/var/run/docker.sock`).
    pub fn connect(socket: Option<&str>) -> Result<Self, EngineError> {
        let docker = match socket {
            Some(path) => {
                Docker::connect_with_socket(path, SOCKET_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| EngineError::unavailable(format!("Failed to connect to Docker: {e}")))?;

        Ok(Self { docker })
    }

    /// Checks that the daemon answers.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::unavailable(format!("Cannot ping Docker daemon: {e}")))
    }

    fn build_container_config(spec: &ContainerSpec) -> ContainerConfig<String> {
        ContainerConfig {
            image: Some(spec.image.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(spec.container_path.clone()),
            user: spec.user.clone(),
            cmd: Some(spec.command.clone()),
            host_config: Some(HostConfig {
                binds: Some(vec![spec.bind()]),
                memory: Some(spec.memory_bytes),
                cpu_period: Some(spec.cpu_period),
                cpu_quota: Some(spec.cpu_quota),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerState>, EngineError> {
        match self
            .docker
            .inspect_container(name_or_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(Some(ContainerState {
                id: info.id.unwrap_or_default(),
                name: info
                    .name
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| name_or_id.to_string()),
                running: info.state.and_then(|s| s.running).unwrap_or(false),
            })),
            Err(e) => match map_error("inspect", name_or_id, e) {
                EngineError::NotFound { .. } => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        debug!(container = %spec.name, image = %spec.image, bind = %spec.bind(), "Creating container");
        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                Self::build_container_config(spec),
            )
            .await
            .map_err(|e| match map_error("create", &spec.name, e) {
                EngineError::NotFound { .. } => EngineError::no_such_image(&spec.image),
                other => other,
            })?;

        for warning in &response.warnings {
            debug!(container = %spec.name, "Docker warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_error("start", id, e))
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<(), EngineError> {
        let t = i64::try_from(grace.as_secs()).unwrap_or(i64::MAX);
        self.docker
            .stop_container(id, Some(StopContainerOptions { t }))
            .await
            .map_err(|e| map_error("stop", id, e))
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_error("remove", id, e))
    }

    async fn pull(&self, image: &str) -> Result<(), EngineError> {
        info!("Pulling image {}...", image);

        let pull_options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(pull_options), None, None);

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(EngineError::api("pull", error));
                    }
                    if let Some(status) = output.status {
                        let progress = output.progress.unwrap_or_default();
                        debug!(image, "{} {}", status.trim(), progress.trim());
                    }
                }
                Err(e) => return Err(map_error("pull", image, e)),
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }
}

/// Maps bollard's error onto the engine taxonomy. 404 and 409 responses
/// become `NotFound` and `Conflict`; a 404 mentioning an image becomes
/// `NoSuchImage`.
fn map_error(operation: &'static str, target: &str, error: BollardError) -> EngineError {
    match error {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 if message.contains("No such image") => EngineError::no_such_image(target),
            404 => EngineError::not_found(target),
            409 => EngineError::conflict(target, message),
            _ => EngineError::api(operation, format!("{status_code}: {message}")),
        },
        other => EngineError::api(operation, other.to_string()),
    }
}
