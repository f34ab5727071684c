//! Shell channels: process-spawned ssh and the dry-run stand-in

use crate::{ExecutorError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Transport for MTA control commands and file pushes.
#[async_trait]
pub trait ShellChannel: Send + Sync {
    /// Run one command on the MTA host, returning stdout.
    async fn run(&self, command: &str) -> Result<String>;

    /// Push a local file to `remote_path` atomically: the content lands in
    /// `<remote_path>.tmp` first and is renamed into place. Both steps are
    /// sudo-wrapped on the remote side.
    async fn upload(&self, local: &Path, remote_path: &str) -> Result<()>;
}

/// Dry-run channel used when no MTA host is configured: logs every command
/// and reports success. Keeps the command log for inspection.
#[derive(Default)]
pub struct DryRunChannel {
    commands: Mutex<Vec<String>>,
}

impl DryRunChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands that would have been sent.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl ShellChannel for DryRunChannel {
    async fn run(&self, command: &str) -> Result<String> {
        info!(command, "dry-run: mta command");
        self.commands.lock().push(command.to_string());
        Ok(String::new())
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<()> {
        info!(local = %local.display(), remote = remote_path, "dry-run: file push");
        self.commands.lock().push(format!("upload {} -> {}", local.display(), remote_path));
        Ok(())
    }
}

/// Shell channel over a spawned `ssh` process. Host keys are checked with
/// `accept-new` rather than ignored. The first failed invocation is retried
/// once, which covers a dropped control connection.
pub struct SshShellChannel {
    host: String,
    port: u16,
    user: String,
    key_path: String,
}

impl SshShellChannel {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        key_path: impl Into<String>,
    ) -> Self {
        Self { host: host.into(), port, user: user.into(), key_path: key_path.into() }
    }

    fn ssh_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("ConnectTimeout=10");
        if !self.key_path.is_empty() {
            cmd.arg("-i").arg(&self.key_path);
        }
        cmd.arg(format!("{}@{}", self.user, self.host));
        cmd
    }

    async fn run_once(&self, command: &str, stdin: Option<&[u8]>) -> Result<String> {
        let mut cmd = self.ssh_command();
        cmd.arg(command);
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|err| ExecutorError::Channel(err.to_string()))?;
        if let Some(bytes) = stdin {
            let mut handle = child
                .stdin
                .take()
                .ok_or_else(|| ExecutorError::Channel("stdin unavailable".into()))?;
            handle.write_all(bytes).await?;
            drop(handle);
        }

        let output =
            child.wait_with_output().await.map_err(|err| ExecutorError::Channel(err.to_string()))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ExecutorError::CommandFailed {
                command: command.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    async fn run_with_retry(&self, command: &str, stdin: Option<&[u8]>) -> Result<String> {
        match self.run_once(command, stdin).await {
            Ok(stdout) => Ok(stdout),
            Err(err) => {
                warn!(command, error = %err, "ssh command failed, reconnecting once");
                self.run_once(command, stdin).await
            }
        }
    }
}

#[async_trait]
impl ShellChannel for SshShellChannel {
    async fn run(&self, command: &str) -> Result<String> {
        debug!(command, host = %self.host, "mta command");
        self.run_with_retry(command, None).await
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<()> {
        let content = tokio::fs::read(local).await?;
        let tmp = format!("{}.tmp", remote_path);
        let command = format!("sudo tee {} > /dev/null && sudo mv {} {}", tmp, tmp, remote_path);
        self.run_with_retry(&command, Some(&content)).await?;
        Ok(())
    }
}
