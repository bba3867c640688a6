//! Error types for fleet-exec
//!
//! This module defines the error hierarchy that covers:
//! - SSH transport failures (per-worker, isolated in async dispatch)
//! - Configuration and CLI errors (always fatal, surfaced before dispatch)
//! - Interrupted waits
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include host and command context
//! - A per-task transport failure never escalates past its own task in the
//!   async strategies; only serial mode propagates it

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the fleet-exec application
#[derive(Error, Debug)]
pub enum FleetError {
    /// SSH transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The controlling thread was interrupted while awaiting completion.
    /// In-flight tasks are not stopped.
    #[error("Interrupted while waiting for tasks to complete")]
    Interrupted,

    /// Submission after the runner stopped accepting work
    #[error("Task runner is shut down")]
    RunnerShutDown,

    /// I/O errors (hosts file, terminal, thread spawn)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote execution errors for a single worker
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The ssh client process could not be started at all
    #[error("Failed to launch ssh for '{host}': {reason}")]
    SpawnFailed { host: String, reason: String },

    /// ssh itself failed: connection refused, authentication, DNS, etc.
    #[error("SSH failed ({host})\n{command}\n{reason}")]
    ConnectionFailed {
        host: String,
        command: String,
        reason: String,
    },

    /// The remote command exited non-zero (only when exit checking is on)
    #[error("Remote command exited with status {status} on '{host}':\n{output}")]
    RemoteExit {
        host: String,
        status: i32,
        output: String,
    },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Neither --hosts nor --file was given
    #[error("No worker selector: use --hosts or --file")]
    MissingSelector,

    /// No command to dispatch
    #[error("No command given: use --cmd or --ps")]
    MissingCommand,

    /// Discovery produced an empty fleet
    #[error("No workers resolved from {selector}")]
    NoWorkers { selector: String },

    /// Bad `-w` subset filter
    #[error("Invalid worker filter '{value}': {reason}")]
    InvalidWorkerFilter { value: String, reason: String },

    /// Invalid pool size
    #[error("Invalid pool size {size}: must be between 1 and {max}")]
    InvalidPoolSize { size: usize, max: usize },

    /// Invalid task-count print cadence
    #[error("Invalid print cadence {tasks_per_print}: must be at least 1")]
    InvalidPrintCadence { tasks_per_print: u64 },

    /// Invalid time-based print gate
    #[error("Invalid print interval {millis}ms: must not be negative")]
    InvalidPrintInterval { millis: i64 },

    /// Invalid runner queue capacity
    #[error("Invalid queue capacity {capacity}: must be at least 1")]
    InvalidQueueCapacity { capacity: usize },

    /// Hosts file could not be read
    #[error("Failed to read hosts file '{path}': {reason}")]
    HostsFileRead { path: PathBuf, reason: String },

    /// A runner builder constructs exactly one runner
    #[error("Runner builder already consumed")]
    BuilderConsumed,
}

/// Result type alias for FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_context() {
        let err = TransportError::ConnectionFailed {
            host: "web1".into(),
            command: "uptime".into(),
            reason: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("web1"));
        assert!(msg.contains("uptime"));
    }

    #[test]
    fn test_error_conversion() {
        let transport = TransportError::SpawnFailed {
            host: "db1".into(),
            reason: "No such file".into(),
        };
        let fleet: FleetError = transport.into();
        assert!(matches!(fleet, FleetError::Transport(_)));
    }
}
