//! Open a project once and leave its container running.

use anyhow::Result;
use colored::Colorize;
use std::process::ExitCode;

use crate::config::Config;
use crate::orchestrator::Orchestrator;

/// Format a successful open
pub fn format_opened(project_id: &str, container_id: &str) -> String {
    format!(
        "\n{} Project {} is running in container {}",
        "✓".green(),
        project_id.cyan(),
        container_id.yellow()
    )
}

/// Entry point: opens the project and exits; the container keeps running
pub async fn run(config: &Config, project_id: &str, user_id: &str) -> Result<ExitCode> {
    let orchestrator = Orchestrator::connect(config).await?;
    let container_id = orchestrator.lifecycle().open(project_id, user_id).await?;
    println!("{}", format_opened(project_id, &container_id));
    Ok(ExitCode::SUCCESS)
}
