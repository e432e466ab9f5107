//! Save a project's files and tear its container down.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;
use std::process::ExitCode;

use crate::config::Config;
use crate::lifecycle::ClosedProject;
use crate::orchestrator::Orchestrator;

/// Format the close result as a displayable string
pub(crate) fn format_closed(project_id: &str, closed: &ClosedProject) -> String {
    let mut out = String::new();
    match &closed.container_id {
        Some(container_id) => {
            let _ = writeln!(
                &mut out,
                "\n{} Project {} closed and saved",
                "✓".green(),
                project_id.cyan()
            );
            let _ = writeln!(&mut out, "  Container:  {}", container_id.dimmed());
            let _ = writeln!(&mut out, "  Saved:      {} file(s)", closed.files_saved.to_string().cyan());
        }
        None => {
            let _ = writeln!(
                &mut out,
                "\n{} Project {} had no container, marked stopped",
                "ℹ".blue(),
                project_id.cyan()
            );
        }
    }
    out
}

/// Entry point: closes one project
pub async fn run(config: &Config, project_id: &str, user_id: &str) -> Result<ExitCode> {
    let orchestrator = Orchestrator::connect(config).await?;
    let closed = orchestrator.lifecycle().close(project_id, user_id).await?;
    print!("{}", format_closed(project_id, &closed));
    Ok(ExitCode::SUCCESS)
}
