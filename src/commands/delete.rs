//! Delete a project and everything it owns.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;
use std::process::ExitCode;

use crate::config::Config;
use crate::lifecycle::DeletedProject;
use crate::orchestrator::Orchestrator;

pub(crate) fn format_deleted(project_id: &str, deleted: &DeletedProject) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "\n{} Project {} deleted", "✓".green(), project_id.cyan());
    if let Some(container_id) = &deleted.container_id {
        let _ = writeln!(&mut out, "  {} container {}", "✗".red(), container_id.dimmed());
    }
    let _ = writeln!(
        &mut out,
        "  {} {} stored file(s)",
        "✗".red(),
        deleted.files_deleted.to_string().dimmed()
    );
    if deleted.files_failed > 0 {
        let _ = writeln!(
            &mut out,
            "  {} {} file(s) could not be deleted",
            "⚠".yellow(),
            deleted.files_failed
        );
    }
    out
}

/// Entry point: deletes one project
pub async fn run(config: &Config, project_id: &str, user_id: &str) -> Result<ExitCode> {
    let orchestrator = Orchestrator::connect(config).await?;
    let deleted = orchestrator.lifecycle().delete(project_id, user_id).await?;
    print!("{}", format_deleted(project_id, &deleted));
    Ok(ExitCode::SUCCESS)
}
