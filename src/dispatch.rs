//! Fleet command dispatch
//!
//! Runs one shell command across a fleet of workers using one of three
//! strategies: one worker at a time stopping at the first failure, the
//! whole fleet concurrently with results printed in discovery order, or
//! concurrently with results surfacing in whatever order they complete.

use crate::error::{FleetError, Result};
use crate::fleet::Worker;
use crate::runner::{MonitoredRunner, RunnerBuilder, Task, TaskOutcome, WaitOutcome};
use crate::transport::Transport;
use crossbeam_channel::{bounded, unbounded, Receiver};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Ceiling on how long a dispatch waits for stragglers
const MAX_DRAIN_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// How a dispatch walks the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One worker at a time; the first failure stops the run
    Serial,
    /// All workers concurrently; results print in discovery order
    Ordered,
    /// All workers concurrently; results surface as they complete
    NoWait,
}

/// What a finished dispatch produced
#[derive(Debug)]
pub struct DispatchReport {
    pub outcomes: Vec<TaskOutcome>,
    pub completed: u64,
    pub failed: u64,
}

/// Rewrite a command to run under sudo, feeding the password on stdin.
/// Applied once per dispatch, before any worker sees the command.
pub fn elevate(command: &str, password: &str) -> String {
    format!("echo {} | sudo -S {}", password, command)
}

/// Dispatches one command across a fleet over a shared transport
pub struct FleetDispatcher {
    transport: Arc<dyn Transport>,
    fleet: Vec<Worker>,
    verbose: bool,
    quiet: bool,
    pool_size: Option<usize>,
    tasks_per_print: u64,
    millis_per_print: i64,
    shutdown: Arc<AtomicBool>,
}

impl FleetDispatcher {
    pub fn new(transport: Arc<dyn Transport>, fleet: Vec<Worker>) -> Self {
        Self {
            transport,
            fleet,
            verbose: false,
            quiet: false,
            pool_size: None,
            tasks_per_print: 1,
            millis_per_print: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Print each worker's full output, not just progress counters.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Suppress per-task progress lines.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Cap on concurrent connections; defaults to the fleet size.
    pub fn pool_size(mut self, size: Option<usize>) -> Self {
        self.pool_size = size;
        self
    }

    /// Progress line every N finished tasks.
    pub fn tasks_per_print(mut self, tasks: u64) -> Self {
        self.tasks_per_print = tasks;
        self
    }

    /// Minimum milliseconds between progress lines.
    pub fn millis_per_print(mut self, millis: i64) -> Self {
        self.millis_per_print = millis;
        self
    }

    /// Flag that aborts waiting (not in-flight work) when raised, e.g.
    /// from a SIGINT handler.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn fleet(&self) -> &[Worker] {
        &self.fleet
    }

    /// Dispatch and block until a full report is available, whatever the
    /// strategy. Callers who want control back at submission use
    /// [`run_detached`](Self::run_detached) directly.
    pub fn run(&self, command: &str, strategy: Strategy) -> Result<DispatchReport> {
        match strategy {
            Strategy::Serial => self.run_serial(command),
            Strategy::Ordered => self.run_ordered(command),
            Strategy::NoWait => {
                let job = self.run_detached(command)?;
                if self.verbose {
                    job.wait_verbose()
                } else {
                    job.wait()
                }
            }
        }
    }

    /// Walk the fleet one worker at a time, stopping at the first failure.
    pub fn run_serial(&self, command: &str) -> Result<DispatchReport> {
        let mut outcomes = Vec::with_capacity(self.fleet.len());
        let mut completed = 0u64;

        for worker in &self.fleet {
            println!("{}\n", worker);
            let output = self
                .transport
                .execute(&worker.host, command)
                .map_err(|e| {
                    warn!(worker = %worker, "Serial dispatch stopped");
                    FleetError::Transport(e)
                })?;
            if self.verbose {
                println!("{}", output);
            }
            completed += 1;
            outcomes.push(TaskOutcome {
                worker: worker.clone(),
                result: Ok(output),
            });
        }

        Ok(DispatchReport {
            outcomes,
            completed,
            failed: 0,
        })
    }

    /// Run the whole fleet concurrently, printing results in the order the
    /// workers were discovered. A slow early worker delays the printing of
    /// later ones but never their execution.
    pub fn run_ordered(&self, command: &str) -> Result<DispatchReport> {
        let total = self.fleet.len();
        let runner = self.build_runner(total)?;

        // One single-slot channel per task keeps retrieval in fleet order
        let mut slots: Vec<(Worker, Receiver<TaskOutcome>)> = Vec::with_capacity(total);
        for worker in &self.fleet {
            let (tx, rx) = bounded(1);
            runner.submit(self.make_task(worker.clone(), command, tx))?;
            slots.push((worker.clone(), rx));
        }

        let wait = runner.await_completion(MAX_DRAIN_WAIT)?;
        if wait == WaitOutcome::TimedOut {
            warn!("Dispatch still draining after {:?}", MAX_DRAIN_WAIT);
        }

        let mut outcomes = Vec::with_capacity(total);
        for (worker, rx) in slots {
            match rx.try_recv() {
                Ok(outcome) => {
                    if self.verbose {
                        print_outcome(&outcome);
                    } else if let Err(e) = &outcome.result {
                        eprintln!("{}; {}", outcome.worker, e);
                    }
                    outcomes.push(outcome);
                }
                Err(_) => {
                    warn!(worker = %worker, "No result delivered");
                }
            }
        }

        let completed = runner.tracker().completed_count();
        let failed = runner.tracker().exception_count();
        runner.finish();

        Ok(DispatchReport {
            outcomes,
            completed,
            failed,
        })
    }

    /// Start the whole fleet concurrently and return immediately. Results
    /// surface through the job handle in completion order; dropping the
    /// handle waits for the fleet to drain.
    pub fn run_detached(&self, command: &str) -> Result<DetachedJob> {
        let total = self.fleet.len();
        let runner = self.build_runner(total)?;

        let (tx, rx) = unbounded();
        for worker in &self.fleet {
            runner.submit(self.make_task(worker.clone(), command, tx.clone()))?;
        }
        drop(tx);

        debug!(workers = total, "Detached dispatch started");

        Ok(DetachedJob {
            runner: Some(runner),
            completions: rx,
            total,
            collected: Vec::with_capacity(total),
        })
    }

    fn build_runner(&self, total: usize) -> Result<MonitoredRunner> {
        RunnerBuilder::new()
            .pool_size(self.pool_size.unwrap_or(total).max(1))
            .expected_tasks(total as u64)
            .print_enabled(!self.quiet)
            .tasks_per_print(self.tasks_per_print)
            .millis_per_print(self.millis_per_print)
            .verbose_print(true)
            .print_errors(false)
            .label_formatter(Box::new(|worker, _result| worker.to_string()))
            .interrupt_flag(Arc::clone(&self.shutdown))
            .build()
    }

    fn make_task(
        &self,
        worker: Worker,
        command: &str,
        outcome_tx: crossbeam_channel::Sender<TaskOutcome>,
    ) -> Task {
        let transport = Arc::clone(&self.transport);
        let host = worker.host.clone();
        let command = command.to_string();
        Task::new(
            worker,
            move || transport.execute(&host, &command),
            outcome_tx,
        )
    }
}

fn print_outcome(outcome: &TaskOutcome) {
    println!("{}\n", outcome.worker);
    match &outcome.result {
        Ok(output) => println!("{}", output),
        Err(e) => println!("{}", e),
    }
}

/// Handle to an in-flight fire-and-forget dispatch. Dropping it blocks
/// until every task has finished.
pub struct DetachedJob {
    runner: Option<MonitoredRunner>,
    completions: Receiver<TaskOutcome>,
    total: usize,
    collected: Vec<TaskOutcome>,
}

impl DetachedJob {
    /// Pull whatever outcomes have already arrived, without blocking.
    pub fn drain(&mut self) -> usize {
        let before = self.collected.len();
        while let Ok(outcome) = self.completions.try_recv() {
            self.collected.push(outcome);
        }
        self.collected.len() - before
    }

    /// Block until every outcome has arrived, in completion order.
    fn drain_all(&mut self, print: bool) -> Result<()> {
        while self.collected.len() < self.total {
            match self.completions.recv() {
                Ok(outcome) => {
                    if print {
                        print_outcome(&outcome);
                    } else if let Err(e) = &outcome.result {
                        eprintln!("{}; {}", outcome.worker, e);
                    }
                    self.collected.push(outcome);
                }
                Err(_) => break,
            }
        }
        Ok(())
    }

    /// Wait for the fleet to drain and return the report.
    pub fn wait(mut self) -> Result<DispatchReport> {
        self.drain_all(false)?;
        self.into_report()
    }

    /// Like [`wait`](Self::wait) but prints each worker's output as it
    /// completes.
    pub fn wait_verbose(mut self) -> Result<DispatchReport> {
        self.drain_all(true)?;
        self.into_report()
    }

    fn into_report(mut self) -> Result<DispatchReport> {
        let runner = match self.runner.take() {
            Some(r) => r,
            None => return Err(FleetError::RunnerShutDown),
        };
        let wait = runner.await_completion(MAX_DRAIN_WAIT)?;
        if wait == WaitOutcome::TimedOut {
            warn!("Detached dispatch still draining after {:?}", MAX_DRAIN_WAIT);
        }
        let completed = runner.tracker().completed_count();
        let failed = runner.tracker().exception_count();
        runner.finish();

        Ok(DispatchReport {
            outcomes: std::mem::take(&mut self.collected),
            completed,
            failed,
        })
    }
}

impl Drop for DetachedJob {
    fn drop(&mut self) {
        // Fire-and-forget still means finish-before-destroy
        if let Some(runner) = self.runner.take() {
            if runner.await_completion(MAX_DRAIN_WAIT).is_err() {
                warn!("Interrupted while draining detached dispatch");
            }
            runner.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevate_wraps_command() {
        assert_eq!(
            elevate("systemctl restart nginx", "hunter2"),
            "echo hunter2 | sudo -S systemctl restart nginx"
        );
    }

    #[test]
    fn test_strategy_equality() {
        assert_ne!(Strategy::Serial, Strategy::NoWait);
        assert_eq!(Strategy::Ordered, Strategy::Ordered);
    }
}
