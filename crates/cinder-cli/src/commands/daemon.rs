//! Daemon control commands.

use anyhow::{Context, Result};
use cinder_config::SystemConfig;
use cinder_daemon::{DaemonSupervisor, daemon_status, stop_daemon};
use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

/// Spawn `cinder daemonise` detached from the terminal.
pub fn start(
    config: &SystemConfig,
    config_path: &Path,
    database_url: Option<&str>,
    verbose: bool,
) -> Result<()> {
    let status = daemon_status(&config.daemon.lock_file)?;
    if status.is_running() {
        println!("Already started ({})", status);
        return Ok(());
    }

    let log_file = &config.daemon.log_file;
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open daemon log: {}", log_file.display()))?;

    let exe = std::env::current_exe().context("Failed to locate the cinder binary")?;
    let mut command = Command::new(exe);
    command
        .arg("--config")
        .arg(config_path)
        .arg("daemonise")
        .current_dir(&config.home)
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log)
        .process_group(0);
    if let Some(url) = database_url {
        command.env("CINDER_DATABASE_URL", url);
    }
    if verbose {
        command.arg("--verbose");
    }

    let child = command.spawn().context("Failed to spawn daemon")?;
    println!("Daemon started (pid {})", child.id());
    Ok(())
}

pub fn stop(config: &SystemConfig) -> Result<()> {
    match stop_daemon(&config.daemon.lock_file)? {
        Some(pid) => println!("Stopping daemon (pid {})", pid),
        None => println!("Daemon is not running"),
    }
    Ok(())
}

pub fn status(config: &SystemConfig) -> Result<()> {
    println!("Daemon is {}", daemon_status(&config.daemon.lock_file)?);
    Ok(())
}

/// Hold the daemon lock and run scheduler cycles until signalled.
pub async fn daemonise(config: &SystemConfig) -> Result<()> {
    let mut supervisor = DaemonSupervisor::start(&config.daemon.lock_file, config.daemon.interval)?;
    let cancel = supervisor.install_signal_handlers()?;

    let scheduler = super::connect(config, cancel).await?;
    supervisor.run(&scheduler).await?;
    Ok(())
}
