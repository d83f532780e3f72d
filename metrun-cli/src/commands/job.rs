//! Job command handlers
//!
//! Inspects and controls the steps queued on the controller, and offers a
//! raw request line for everything else.

use anyhow::{Context, Result};
use colored::*;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;
use metrun_core::domain::controller::ControllerState;
use metrun_core::domain::queue::{QueueItem, QueueItemStatus};
use metrun_core::protocol::FAREWELL;

/// Show the controller state
pub async fn show_status(config: &Config) -> Result<()> {
    let mut client = config.connect(false).await?;
    let state = client.status().await?;
    println!("{} {}", "Status:".bold(), colorize_state(state));
    Ok(())
}

/// List the running and waiting steps
pub async fn show_queue(config: &Config) -> Result<()> {
    let mut client = config.connect(false).await?;
    let items = client.queue().await?;

    if items.is_empty() {
        println!("{}", "Queue is empty.".yellow());
    } else {
        println!("{}", format!("{} step(s):", items.len()).bold());
        for item in items {
            print_queue_item(&item);
        }
    }

    Ok(())
}

/// Show the captured output of a step
///
/// # Arguments
/// * `pid` - Pid returned when the step was queued
pub async fn show_retval(config: &Config, pid: u64) -> Result<()> {
    let mut client = config.connect(false).await?;
    match client.retval(pid).await? {
        Some(output) => println!("{}", output),
        None => println!("{}", format!("No output for step {}.", pid).yellow()),
    }
    Ok(())
}

/// Stop the running step and discard the queue
pub async fn stop(config: &Config) -> Result<()> {
    let mut client = config.connect(false).await?;
    client.stop().await?;
    println!("{}", "✓ Stop requested".green());
    Ok(())
}

/// Send one raw request line
///
/// # Arguments
/// * `words` - Request words, re-quoted before sending
pub async fn send(config: &Config, words: Vec<String>) -> Result<()> {
    if words.iter().any(|word| word.contains('\n')) {
        anyhow::bail!("Request words cannot contain newlines");
    }
    let line = shell_words::join(&words);

    let mut client = config.connect(true).await?;
    let reply = client.ask(&line).await?;
    println!("{}", reply);
    Ok(())
}

/// Interactive request prompt
///
/// Each line read from stdin is sent as-is; the session ends when the
/// controller says goodbye or stdin closes.
pub async fn shell(config: &Config) -> Result<()> {
    let mut client = config.connect(true).await?;
    println!(
        "{}",
        format!("Connected to {}", client.socket_path().display()).dimmed()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".cyan());
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(client.close(false).await?);
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = client.ask(&line).await?;
        println!("{} {}", "<".cyan(), reply);
        if reply == FAREWELL {
            return Ok(());
        }
    }
}

/// Disconnect, shutting the controller down when it is idle
///
/// # Arguments
/// * `force` - Shut down even while a step is running
pub async fn close(config: &Config, force: bool) -> Result<()> {
    let client = config.connect(false).await?;
    client.close(force).await?;
    println!("{}", "✓ Disconnected".green());
    Ok(())
}

/// Print one queue entry
fn print_queue_item(item: &QueueItem) {
    let status = match item.status {
        QueueItemStatus::Running => item.status.to_string().green(),
        QueueItemStatus::Waiting => item.status.to_string().yellow(),
    };
    println!("  {} {}", item.name.cyan(), status);
}

/// Colorize a controller state
fn colorize_state(state: ControllerState) -> ColoredString {
    match state {
        ControllerState::Idle => state.as_str().white(),
        ControllerState::Running => state.as_str().yellow(),
        ControllerState::Finished => state.as_str().green(),
    }
}
