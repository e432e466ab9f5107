use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{ContainerEngine, ContainerSpec, ContainerState};
use crate::error::PlaygroundError;
use crate::worker::WorkerPool;

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopOutcome {
    /// The container was running and is now stopped.
    Stopped,
    /// The container exists but was not running.
    AlreadyStopped,
    /// The engine has no such container.
    Gone,
}

/// How a remove request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoveOutcome {
    /// The container was removed.
    Removed,
    /// The engine has no such container.
    Gone,
}

/// Container engine whose every call runs on the worker pool.
#[derive(Clone)]
pub(crate) struct IsolatedEngine {
    engine: Arc<dyn ContainerEngine>,
    workers: WorkerPool,
    stop_grace: Duration,
    stop_timeout: Duration,
}

impl IsolatedEngine {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        workers: WorkerPool,
        stop_grace: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            workers,
            stop_grace,
            stop_timeout,
        }
    }

    /// Inspects a container by name or id; absence is `Ok(None)`.
    pub async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerState>, PlaygroundError> {
        let engine = Arc::clone(&self.engine);
        let target = name_or_id.to_string();
        self.workers
            .run("inspect", self.workers.default_timeout(), move || async move {
                Ok(engine.inspect(&target).await?)
            })
            .await
    }

    /// Creates a container and returns the engine id.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<String, PlaygroundError> {
        let engine = Arc::clone(&self.engine);
        let spec = spec.clone();
        self.workers
            .run("create", self.workers.default_timeout(), move || async move {
                Ok(engine.create(&spec).await?)
            })
            .await
    }

    /// Starts a container.
    pub async fn start(&self, id: &str) -> Result<(), PlaygroundError> {
        let engine = Arc::clone(&self.engine);
        let id = id.to_string();
        self.workers
            .run("start", self.workers.default_timeout(), move || async move {
                Ok(engine.start(&id).await?)
            })
            .await
    }

    /// Stops a container if it is running.
    ///
    /// The engine gets `stop_grace` to stop it politely; the whole worker is
    /// bounded by `stop_timeout` so a wedged daemon cannot hold the caller.
    pub async fn stop(&self, id: &str) -> Result<StopOutcome, PlaygroundError> {
        let engine = Arc::clone(&self.engine);
        let id = id.to_string();
        let grace = self.stop_grace;
        self.workers
            .run("stop", Some(self.stop_timeout), move || async move {
                let Some(state) = engine.inspect(&id).await? else {
                    debug!(container = %id, "Container not found, likely already removed");
                    return Ok(StopOutcome::Gone);
                };
                if !state.running {
                    debug!(container = %id, "Container already stopped");
                    return Ok(StopOutcome::AlreadyStopped);
                }
                info!(container = %id, "Stopping container");
                match engine.stop(&id, grace).await {
                    Ok(()) => Ok(StopOutcome::Stopped),
                    Err(e) if e.is_not_found() => Ok(StopOutcome::Gone),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// Removes a container; a 404 is reported as `Gone`.
    pub async fn remove(&self, id: &str) -> Result<RemoveOutcome, PlaygroundError> {
        let engine = Arc::clone(&self.engine);
        let id = id.to_string();
        self.workers
            .run("remove", self.workers.default_timeout(), move || async move {
                match engine.remove(&id).await {
                    Ok(()) => Ok(RemoveOutcome::Removed),
                    Err(e) if e.is_not_found() => Ok(RemoveOutcome::Gone),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// Pulls an image. Pulls are not time-bounded.
    pub async fn pull(&self, image: &str) -> Result<(), PlaygroundError> {
        let engine = Arc::clone(&self.engine);
        let image = image.to_string();
        self.workers
            .run("pull", None, move || async move { Ok(engine.pull(&image).await?) })
            .await
    }
}
