//! Project command handlers
//!
//! Stored tool locations and the recorded run history.

use anyhow::Result;
use colored::*;

use crate::config::Config;
use metrun_core::domain::history::ProjectHistory;

/// List stored tool locations
pub async fn list_paths(config: &Config) -> Result<()> {
    let mut client = config.connect(false).await?;
    let paths = client.paths().await?;

    if paths.is_empty() {
        println!("{}", "No paths bound.".yellow());
    } else {
        for binding in paths {
            println!("  {} {}", binding.name.cyan(), binding.path);
        }
    }

    Ok(())
}

/// Store the location of a tool
///
/// # Arguments
/// * `name` - Tool name as used in pipeline commands
/// * `path` - Executable location
pub async fn bind(config: &Config, name: &str, path: &str) -> Result<()> {
    let mut client = config.connect(true).await?;
    client.bind(name, path).await?;
    println!("{} {} {}", "✓ Bound".green(), name.cyan(), path);
    Ok(())
}

/// List recorded projects and their steps
pub async fn history(config: &Config) -> Result<()> {
    let mut client = config.connect(false).await?;
    let projects = client.projects().await?;

    if projects.is_empty() {
        println!("{}", "No projects recorded.".yellow());
    } else {
        println!("{}", format!("Found {} project(s):", projects.len()).bold());
        for project in &projects {
            println!();
            print_project(project);
        }
    }

    Ok(())
}

/// Print a project with its steps
fn print_project(project: &ProjectHistory) {
    let record = &project.record;
    let finished = match record.finished_at {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string().green(),
        None => "unfinished".yellow(),
    };

    println!("{} {}", format!("#{}", record.id).dimmed(), record.name.bold());
    println!("  {} {}", "Directory:".dimmed(), record.directory);
    println!(
        "  {} {}",
        "Started:".dimmed(),
        record.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("  {} {}", "Finished:".dimmed(), finished);
    for step in &project.steps {
        println!("    {}", step);
    }
}
