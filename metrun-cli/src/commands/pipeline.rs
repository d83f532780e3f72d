//! Pipeline command handlers
//!
//! Loads a pipeline definition, applies command-line overrides and either
//! prints the resolved commands or queues them on the controller.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use std::path::{Path, PathBuf};

use crate::config::Config;
use metrun_pipeline::{InputKind, PipelineDefinition, find_tool};

/// Pipeline file plus the overrides applied before resolution
#[derive(Args)]
pub struct PipelineArgs {
    /// Path to the pipeline JSON file
    pub file: PathBuf,

    /// Set a variable (e.g., --set sample=S1)
    #[arg(short, long, value_parser = parse_key_val)]
    pub set: Vec<(String, String)>,

    /// Set a declared input; relative file paths are made absolute
    #[arg(short, long, value_parser = parse_key_val)]
    pub input: Vec<(String, String)>,

    /// Toggle an optional group by index
    #[arg(short, long)]
    pub toggle: Vec<usize>,

    /// Override a command option as GROUP.COMMAND.KEY=value (indices from 0)
    #[arg(short, long, value_parser = parse_option)]
    pub option: Vec<OptionOverride>,
}

/// One `--option` override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionOverride {
    pub group: usize,
    pub command: usize,
    pub key: String,
    pub value: String,
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Parse a GROUP.COMMAND.KEY=value override
fn parse_option(s: &str) -> Result<OptionOverride> {
    let (target, value) = parse_key_val(s)?;
    let mut parts = target.splitn(3, '.');

    let (Some(group), Some(command), Some(key)) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("invalid GROUP.COMMAND.KEY=value: `{}`", s);
    };

    Ok(OptionOverride {
        group: group
            .parse()
            .with_context(|| format!("invalid group index `{}`", group))?,
        command: command
            .parse()
            .with_context(|| format!("invalid command index `{}`", command))?,
        key: key.to_string(),
        value,
    })
}

/// Loads the pipeline and applies every override
fn load_pipeline(args: PipelineArgs) -> Result<PipelineDefinition> {
    let mut definition = PipelineDefinition::load(&args.file)
        .with_context(|| format!("Failed to load pipeline {}", args.file.display()))?;
    let cwd = std::env::current_dir().context("Failed to read working directory")?;

    for index in args.toggle {
        definition
            .toggle_group(index)
            .with_context(|| format!("Failed to toggle group {}", index))?;
    }
    for (key, value) in args.set {
        definition.set_variable(key, value);
    }
    for (name, value) in args.input {
        if !definition.inputs().contains_key(&name) {
            println!(
                "{}",
                format!("⚠ '{}' is not a declared input", name).yellow()
            );
        }
        definition.set_input(&name, &value, &cwd);
    }
    for option in args.option {
        definition
            .set_option(option.group, option.command, &option.key, option.value)
            .context("Failed to set option")?;
    }

    Ok(definition)
}

/// File inputs the user has not supplied
fn missing_inputs(definition: &PipelineDefinition) -> Vec<&str> {
    definition
        .inputs()
        .iter()
        .filter(|(name, kind)| {
            **kind == InputKind::File && !definition.variables().contains(name)
        })
        .map(|(name, _)| name.as_str())
        .collect()
}

/// Project name derived from the pipeline file
fn default_project_name(file: &Path) -> String {
    file.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pipeline".to_string())
}

/// Resolve a pipeline and queue its commands
pub async fn run_pipeline(
    config: &Config,
    args: PipelineArgs,
    name: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let name = name
        .unwrap_or_else(|| default_project_name(&args.file))
        .replace(' ', "_");
    let mut definition = load_pipeline(args)?;

    let missing = missing_inputs(&definition);
    if !missing.is_empty() {
        anyhow::bail!("Missing required input(s): {}", missing.join(", "));
    }

    let commands = definition.resolved_commands();
    if commands.is_empty() {
        println!("{}", "No enabled commands to run.".yellow());
        return Ok(());
    }

    if dry_run {
        for command in &commands {
            println!("{} {}", format!("[{}]", command.group).dimmed(), command.line);
        }
        return Ok(());
    }

    let mut client = config.connect(true).await?;
    client.set_wd(name.as_str()).await?;
    client.new_project(name.as_str()).await?;
    println!("{} {}", "✓ Project".green(), name.cyan());

    for command in commands {
        let pid = client.start(command.argv()).await?;
        println!(
            "  {} {} {}",
            format!("#{}", pid).cyan(),
            format!("[{}]", command.group).dimmed(),
            command.line
        );
    }

    client.close(false).await?;
    Ok(())
}

/// Show groups and resolved commands
pub fn show_pipeline(args: PipelineArgs) -> Result<()> {
    let mut definition = load_pipeline(args)?;

    if let Some(version) = definition.version() {
        println!("{} {}", "Version:".bold(), version);
    }

    println!("{}", "Inputs:".bold());
    for (name, kind) in definition.inputs() {
        let value = definition.variables().get(name).unwrap_or("");
        match kind {
            InputKind::File => println!("  {} (file) = {}", name.cyan(), value),
            InputKind::Text(_) => println!("  {} = {}", name.cyan(), value),
        }
    }

    println!("\n{}", "Groups:".bold());
    for (index, group) in definition.groups().iter().enumerate() {
        let marker = if group.is_enabled() {
            "✓".green()
        } else {
            "✗".red()
        };
        let optional = if group.is_optional() { " (optional)" } else { "" };
        println!("  {} {} {}{}", index, marker, group.name(), optional.dimmed());
        for command in group.commands() {
            for (key, value) in command.options() {
                println!("      {} = {}", key.dimmed(), value);
            }
        }
    }

    println!("\n{}", "Commands:".bold());
    for command in definition.resolved_commands() {
        println!("  {} {}", format!("[{}]", command.group).dimmed(), command.line);
    }

    Ok(())
}

/// Check tool availability against stored paths and `$PATH`
pub async fn check_pipeline(config: &Config, args: PipelineArgs) -> Result<()> {
    let definition = load_pipeline(args)?;

    let bindings = match config.connect(false).await {
        Ok(mut client) => {
            let paths = client.paths().await?;
            client.close(false).await?;
            paths
        }
        Err(_) => {
            println!(
                "{}",
                "Controller not running; checking $PATH only.".dimmed()
            );
            Vec::new()
        }
    };

    let mut missing = 0;
    for tool in definition.tools() {
        match find_tool(&tool, &bindings) {
            Some(path) => println!("  {} {} {}", "✓".green(), tool, path.display().to_string().dimmed()),
            None => {
                missing += 1;
                println!("  {} {}", "✗".red(), tool);
            }
        }
    }

    if missing > 0 {
        anyhow::bail!("{} tool(s) not found", missing);
    }
    println!("{}", "All tools found.".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("sample=S1=a").unwrap(),
            ("sample".to_string(), "S1=a".to_string())
        );
        assert!(parse_key_val("sample").is_err());
    }

    #[test]
    fn test_parse_option() {
        assert_eq!(
            parse_option("1.0.threads=8").unwrap(),
            OptionOverride {
                group: 1,
                command: 0,
                key: "threads".to_string(),
                value: "8".to_string(),
            }
        );
        assert!(parse_option("1.threads=8").is_err());
        assert!(parse_option("x.0.threads=8").is_err());
    }

    #[test]
    fn test_default_project_name() {
        assert_eq!(default_project_name(Path::new("/p/kraken run.json")), "kraken run");
    }
}
