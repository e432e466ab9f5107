use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;
use std::process::ExitCode;

use crate::config::Config;
use crate::records::{Project, ProjectRecordStore, ProjectStatus, TomlRecordStore};

fn format_status_word(status: ProjectStatus) -> colored::ColoredString {
    match status {
        ProjectStatus::Running | ProjectStatus::Active => status.to_string().green().bold(),
        ProjectStatus::Loading | ProjectStatus::Saving => status.to_string().yellow(),
        ProjectStatus::Stopped | ProjectStatus::Inactive => status.to_string().dimmed(),
        ProjectStatus::Removed => status.to_string().red(),
    }
}

/// Format one project record as a status panel
pub(crate) fn format_project(project: &Project) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "\n{}", "━".repeat(50).dimmed());
    let _ = writeln!(&mut out, "{}", format!("   📦 {}", project.name).yellow().bold());
    let _ = writeln!(&mut out, "{}", "━".repeat(50).dimmed());
    let _ = writeln!(&mut out, "  Project:    {}", project.project_id.cyan());
    let _ = writeln!(&mut out, "  Owner:      {}", project.user_id.cyan());
    let _ = writeln!(&mut out, "  Template:   {}", project.template_id.cyan());
    let _ = writeln!(&mut out, "  Status:     {}", format_status_word(project.status));
    let _ = writeln!(
        &mut out,
        "  Container:  {}",
        project.container_id.as_deref().unwrap_or("none").cyan()
    );
    let _ = writeln!(
        &mut out,
        "  Seeded:     {}",
        if project.initialized_with_template { "yes" } else { "no" }.cyan()
    );
    if let Some(last) = project.last_active_at {
        let _ = writeln!(
            &mut out,
            "  Active:     {}",
            last.format("%Y-%m-%d %H:%M:%S UTC").to_string().cyan()
        );
    }
    let _ = writeln!(&mut out, "{}", "━".repeat(50).dimmed());
    out
}

/// Entry point: prints a project's record without touching Docker
pub async fn run(config: &Config, project_id: &str) -> Result<ExitCode> {
    let records = TomlRecordStore::new(config.records.path()?);

    match records.get_project(project_id).await? {
        Some(project) => {
            print!("{}", format_project(&project));
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("\n{} No project found with id {}", "ℹ".blue(), project_id.cyan());
            Ok(ExitCode::FAILURE)
        }
    }
}
