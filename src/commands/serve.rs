//! Long-running control loop.
//!
//! Reads one JSON request per line from stdin and writes one JSON response
//! per line to stdout. Requests run concurrently; the per-project locks
//! serialize requests for the same project. On EOF or SIGINT/SIGTERM the
//! loop stops reading and lets in-flight requests run to completion, so no
//! project is left mid-save. It then sweeps every container it started and
//! exits non-zero if the sweep could not remove one.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::PlaygroundError;
use crate::orchestrator::Orchestrator;
use crate::sweeper::{shutdown_signal, SweepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Op {
    Open,
    Close,
    Delete,
    Status,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Delete => "delete",
            Self::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Request {
    pub op: Op,
    pub project_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Response {
    pub ok: bool,
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn success(op: &str, project_id: Option<&str>, data: Value) -> Self {
        Self {
            ok: true,
            op: op.to_string(),
            project_id: project_id.map(str::to_string),
            data: Some(data),
            error: None,
        }
    }

    fn failure(op: &str, project_id: Option<&str>, error: impl ToString) -> Self {
        Self {
            ok: false,
            op: op.to_string(),
            project_id: project_id.map(str::to_string),
            data: None,
            error: Some(error.to_string()),
        }
    }

    fn shutdown(report: &SweepReport) -> Self {
        let data = serde_json::to_value(report).unwrap_or(Value::Null);
        if report.is_success() {
            Self::success("shutdown", None, data)
        } else {
            Self {
                data: Some(data),
                ..Self::failure("shutdown", None, "some containers could not be removed")
            }
        }
    }
}

/// Parses and runs one request line.
pub(crate) async fn handle_line(orchestrator: &Orchestrator, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle(orchestrator, request).await,
        Err(e) => Response::failure("unknown", None, format!("Invalid request: {e}")),
    }
}

async fn handle(orchestrator: &Orchestrator, request: Request) -> Response {
    let op = request.op.name();
    let project_id = request.project_id.as_str();
    debug!(op, project_id, "Handling request");

    let result = match (request.op, request.user_id.as_deref()) {
        (Op::Status, _) => match orchestrator.status(project_id).await {
            Ok(Some(view)) => serde_json::to_value(view).map_err(|e| e.to_string()),
            Ok(None) => Err(PlaygroundError::not_found("Project", project_id).to_string()),
            Err(e) => Err(e.to_string()),
        },
        (_, None) => Err(format!("user_id is required for {op}")),
        (Op::Open, Some(user_id)) => orchestrator
            .lifecycle()
            .open(project_id, user_id)
            .await
            .map(|container_id| json!({ "container_id": container_id }))
            .map_err(|e| e.to_string()),
        (Op::Close, Some(user_id)) => orchestrator
            .lifecycle()
            .close(project_id, user_id)
            .await
            .map_err(|e| e.to_string())
            .and_then(|closed| serde_json::to_value(closed).map_err(|e| e.to_string())),
        (Op::Delete, Some(user_id)) => orchestrator
            .lifecycle()
            .delete(project_id, user_id)
            .await
            .map_err(|e| e.to_string())
            .and_then(|deleted| serde_json::to_value(deleted).map_err(|e| e.to_string())),
    };

    match result {
        Ok(data) => Response::success(op, Some(project_id), data),
        Err(message) => {
            warn!(op, project_id, "Request failed: {}", message);
            Response::failure(op, Some(project_id), message)
        }
    }
}

/// Reads stdin on a plain thread so a pending read never holds up exit.
fn spawn_stdin_reader() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn write_response(stdout: &mut tokio::io::Stdout, response: &Response) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response).map_err(std::io::Error::other)?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await
}

/// Dispatches requests until input ends or `shutdown` resolves, then waits
/// for every accepted request to finish. Returns true if interrupted.
async fn serve_requests<S>(
    orchestrator: &Arc<Orchestrator>,
    mut requests: mpsc::Receiver<std::io::Result<String>>,
    shutdown: S,
    responses: &mpsc::UnboundedSender<Response>,
) -> bool
where
    S: Future<Output = ()>,
{
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    let interrupted = loop {
        tokio::select! {
            () = &mut shutdown => break true,
            line = requests.recv() => match line {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let orchestrator = Arc::clone(orchestrator);
                    let tx = responses.clone();
                    tasks.spawn(async move {
                        let response = handle_line(&orchestrator, &line).await;
                        let _ = tx.send(response);
                    });
                }
                Some(Err(e)) => {
                    error!("Failed to read request: {e}");
                    break false;
                }
                None => break false,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("Request task failed: {e}");
                }
            }
        }
    };

    // Stop accepting input; the reader thread exits on its next send.
    drop(requests);
    if interrupted {
        info!(in_flight = tasks.len(), "Shutdown signal received, finishing in-flight requests");
    } else {
        info!(in_flight = tasks.len(), "Input closed, finishing in-flight requests");
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Request task failed: {e}");
        }
    }
    interrupted
}

/// Entry point: serves requests until EOF or a shutdown signal
pub async fn run(config: &Config) -> Result<ExitCode> {
    let orchestrator = Arc::new(Orchestrator::connect(config).await?);
    info!("Serving requests on stdin");

    let (tx, mut responses) = mpsc::unbounded_channel::<Response>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = responses.recv().await {
            if let Err(e) = write_response(&mut stdout, &response).await {
                error!("Failed to write response: {e}");
                break;
            }
        }
        stdout
    });

    serve_requests(&orchestrator, spawn_stdin_reader(), shutdown_signal(), &tx).await;

    let report = orchestrator.sweeper().sweep().await;
    let _ = tx.send(Response::shutdown(&report));
    drop(tx);
    if let Ok(mut stdout) = writer.await {
        let _ = stdout.flush().await;
    }

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        for (project_id, reason) in &report.failed {
            error!(project_id, "Container left behind: {}", reason);
        }
        Ok(ExitCode::FAILURE)
    }
}
