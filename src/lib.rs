//! fleet-exec - Concurrent Fleet Command Dispatcher
//!
//! Runs one shell command across a fleet of remote workers over SSH, with
//! live progress reporting. Built for operational sweeps against tens to
//! hundreds of hosts: check a version everywhere, restart a service
//! everywhere, grep the process table everywhere.
//!
//! # Features
//!
//! - **Three dispatch strategies**: one worker at a time stopping at the
//!   first failure, the whole fleet concurrently with output in fleet
//!   order, or concurrently with output in completion order.
//!
//! - **Bounded back-pressure**: the task queue feeding the worker pool is
//!   bounded; submitters block rather than pile up work.
//!
//! - **Live progress**: every finished task can print a timestamped status
//!   line with counts, throughput and an estimated time to completion.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      FleetDispatcher                      │
//! │   worker list + command + strategy                        │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │ submit
//!                             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                      MonitoredRunner                      │
//! │            ┌──────────────────────────┐                   │
//! │            │      Task Queue          │                   │
//! │            │  (crossbeam bounded)     │                   │
//! │            │  - back-pressure         │                   │
//! │            └────────────┬─────────────┘                   │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐    ┌─────────┐    │
//! │  │Runner 1 │  │Runner 2 │  │Runner 3 │ .. │Runner N │    │
//! │  │  ssh    │  │  ssh    │  │  ssh    │    │  ssh    │    │
//! │  └────┬────┘  └────┬────┘  └────┬────┘    └────┬────┘    │
//! │       │            │            │               │         │
//! │       └──── ProgressTracker (atomics) ──────────┘         │
//! │             status line per completion                    │
//! └──────────────────────────────────────────────────────────┘
//!                             │ outcomes
//!                             ▼
//!              ordered channels / completion channel
//! ```
//!
//! # Example
//!
//! ```bash
//! # Kernel version across three hosts, output in fleet order
//! fleet-exec --hosts 'web1 web2 web3' --cmd 'uname -r' -v
//!
//! # Serial restart, stop at the first failure
//! fleet-exec --file prod.txt --cmd 'systemctl restart nginx' --serial --sudo
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fleet;
pub mod pretty;
pub mod progress;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod transport;

pub use config::{CliArgs, DispatchConfig};
pub use dispatch::{DetachedJob, DispatchReport, FleetDispatcher, Strategy};
pub use error::{ConfigError, FleetError, Result, TransportError};
pub use fleet::{Worker, WorkerSource};
pub use runner::{MonitoredRunner, RunnerBuilder, Task, TaskOutcome};
pub use transport::{SshTransport, Transport};
