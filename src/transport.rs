//! Remote command execution
//!
//! The dispatcher consumes remote execution as a capability: the
//! [`Transport`] trait takes a host and a command and returns the combined
//! output text. [`SshTransport`] implements it by shelling out to the
//! system `ssh` client, which keeps key agents, jump hosts, and ssh config
//! working exactly as they do interactively.
//!
//! Authentication mechanics, host-key verification, and retry policy are
//! the transport's responsibility, not the dispatcher's.

use crate::error::TransportError;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// Remote execution capability: run `command` on `host`, returning the
/// combined stdout+stderr text.
pub trait Transport: Send + Sync {
    fn execute(&self, host: &str, command: &str) -> Result<String, TransportError>;
}

/// Exit status the ssh client reserves for its own failures
/// (connection, authentication, DNS). A remote command that itself exits
/// 255 is indistinguishable from this.
const SSH_FAILURE_STATUS: i32 = 255;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport backed by the system `ssh` binary
#[derive(Debug, Clone)]
pub struct SshTransport {
    username: Option<String>,
    key_file: Option<PathBuf>,
    connect_timeout: Duration,
    check_exit_status: bool,
}

impl SshTransport {
    pub fn new() -> Self {
        Self {
            username: None,
            key_file: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            check_exit_status: false,
        }
    }

    /// Log in as `username` instead of the current user.
    pub fn username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Use an explicit identity file instead of the agent's keys.
    pub fn key_file(mut self, key_file: Option<PathBuf>) -> Self {
        self.key_file = key_file;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Treat a non-zero remote exit status as a task failure.
    pub fn check_exit_status(mut self, check: bool) -> Self {
        self.check_exit_status = check;
        self
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SshTransport {
    fn execute(&self, host: &str, command: &str) -> Result<String, TransportError> {
        let mut ssh = Command::new("ssh");
        ssh.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()));

        if let Some(username) = &self.username {
            ssh.arg("-l").arg(username);
        }
        if let Some(key_file) = &self.key_file {
            ssh.arg("-i").arg(key_file);
        }

        // sudo wants a tty to read the piped password from
        if command.contains("sudo ") {
            ssh.arg("-tt");
        }

        ssh.arg(host).arg(command);

        debug!(host, "Running remote command");

        let output = ssh.output().map_err(|e| TransportError::SpawnFailed {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let status = output.status.code().unwrap_or(-1);

        if status == SSH_FAILURE_STATUS {
            return Err(TransportError::ConnectionFailed {
                host: host.to_string(),
                command: command.to_string(),
                reason: text.trim().to_string(),
            });
        }

        if self.check_exit_status && status != 0 {
            return Err(TransportError::RemoteExit {
                host: host.to_string(),
                status,
                output: text,
            });
        }

        Ok(text)
    }
}
