//! Recurring background jobs
//!
//! Each scheduled job gets its own thread that fires on a fixed period.
//! A compare-and-set running flag guarantees a job never overlaps itself,
//! whether triggered by the timer or by hand.

use crate::progress::now_millis;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

type JobFn = Arc<dyn Fn() -> std::result::Result<String, Box<dyn std::error::Error>> + Send + Sync>;

/// Counters for one recurring job
#[derive(Debug)]
pub struct JobStats {
    running: AtomicBool,
    runs: AtomicU64,
    errors: AtomicU64,
    last_end_millis: AtomicI64,
    last_millis_taken: AtomicI64,
    total_millis_taken: AtomicI64,
}

impl JobStats {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_end_millis: AtomicI64::new(-1),
            last_millis_taken: AtomicI64::new(-1),
            total_millis_taken: AtomicI64::new(0),
        }
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// -1 until the job has run at least once
    pub fn last_millis_taken(&self) -> i64 {
        self.last_millis_taken.load(Ordering::SeqCst)
    }

    pub fn last_end_millis(&self) -> i64 {
        self.last_end_millis.load(Ordering::SeqCst)
    }

    pub fn total_millis_taken(&self) -> i64 {
        self.total_millis_taken.load(Ordering::SeqCst)
    }
}

struct Job {
    name: String,
    stats: Arc<JobStats>,
    run: JobFn,
}

impl Job {
    /// Execute once unless already mid-run; returns false when skipped.
    fn fire(&self) -> bool {
        if self
            .stats
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(job = %self.name, "Previous run still in progress, skipping");
            return false;
        }

        let start = now_millis();
        match (self.run)() {
            Ok(summary) => {
                debug!(job = %self.name, %summary, "Job finished");
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::SeqCst);
                error!(job = %self.name, error = %e, "Job failed");
            }
        }
        let end = now_millis();

        self.stats.runs.fetch_add(1, Ordering::SeqCst);
        self.stats.last_end_millis.store(end, Ordering::SeqCst);
        self.stats
            .last_millis_taken
            .store(end - start, Ordering::SeqCst);
        self.stats
            .total_millis_taken
            .fetch_add(end - start, Ordering::SeqCst);
        self.stats.running.store(false, Ordering::SeqCst);
        true
    }
}

/// Runs named jobs on fixed periods, one thread per job
pub struct BackgroundScheduler {
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl BackgroundScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            threads: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a job and start its timer thread. With `run_immediately`
    /// the first firing happens right away instead of after one period.
    pub fn schedule<F>(
        &self,
        name: &str,
        period: Duration,
        run_immediately: bool,
        run: F,
    ) -> std::io::Result<Arc<JobStats>>
    where
        F: Fn() -> std::result::Result<String, Box<dyn std::error::Error>>
            + Send
            + Sync
            + 'static,
    {
        let job = Arc::new(Job {
            name: name.to_string(),
            stats: Arc::new(JobStats::new()),
            run: Arc::new(run),
        });
        let stats = Arc::clone(&job.stats);

        {
            let mut jobs = self
                .jobs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            jobs.insert(name.to_string(), Arc::clone(&job));
        }

        let shutdown = Arc::clone(&self.shutdown);
        let handle = thread::Builder::new()
            .name(format!("sched-{}", name))
            .spawn(move || {
                info!(job = %job.name, period_ms = period.as_millis() as u64, "Job scheduled");
                if run_immediately && !shutdown.load(Ordering::SeqCst) {
                    job.fire();
                }
                loop {
                    // Sleep in slices so shutdown is noticed quickly
                    let mut remaining = period;
                    while remaining > Duration::ZERO {
                        if shutdown.load(Ordering::SeqCst) {
                            return;
                        }
                        let slice = remaining.min(Duration::from_millis(100));
                        thread::sleep(slice);
                        remaining = remaining.saturating_sub(slice);
                    }
                    if shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    job.fire();
                }
            })?;

        self.threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);

        Ok(stats)
    }

    /// Fire a job by name outside its normal period. Returns false when
    /// the job is unknown or already mid-run.
    pub fn run_now(&self, name: &str) -> bool {
        let job = {
            let jobs = self
                .jobs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            jobs.get(name).cloned()
        };
        match job {
            Some(job) => job.fire(),
            None => {
                warn!(job = name, "No such job");
                false
            }
        }
    }

    pub fn stats(&self, name: &str) -> Option<Arc<JobStats>> {
        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        jobs.get(name).map(|job| Arc::clone(&job.stats))
    }

    /// Signal every job thread to stop and join them. Mid-run jobs finish
    /// their current firing first.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let threads = std::mem::take(
            &mut *self
                .threads
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in threads {
            if handle.join().is_err() {
                warn!("Scheduler thread panicked");
            }
        }
    }
}

impl Default for BackgroundScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_periodic_firing_counts_runs() {
        let scheduler = BackgroundScheduler::new();
        let stats = scheduler
            .schedule("tick", Duration::from_millis(50), true, || {
                Ok("ticked".to_string())
            })
            .unwrap();

        thread::sleep(Duration::from_millis(180));
        scheduler.shutdown();

        // Immediate firing plus at least two periods
        assert!(stats.runs() >= 3, "runs = {}", stats.runs());
        assert_eq!(stats.errors(), 0);
        assert!(stats.last_millis_taken() >= 0);
        assert!(stats.last_end_millis() > 0);
    }

    #[test]
    fn test_errors_are_counted_not_fatal() {
        let scheduler = BackgroundScheduler::new();
        let stats = scheduler
            .schedule("flaky", Duration::from_millis(40), true, || {
                Err("boom".into())
            })
            .unwrap();

        thread::sleep(Duration::from_millis(150));
        scheduler.shutdown();

        assert!(stats.runs() >= 2);
        assert_eq!(stats.errors(), stats.runs());
    }

    #[test]
    fn test_run_now_respects_running_guard() {
        let scheduler = BackgroundScheduler::new();
        let stats = scheduler
            .schedule("slow", Duration::from_secs(3600), true, || {
                thread::sleep(Duration::from_millis(300));
                Ok("slept".to_string())
            })
            .unwrap();

        // Give the immediate firing a moment to acquire the guard
        thread::sleep(Duration::from_millis(50));
        assert!(stats.is_running());
        assert!(!scheduler.run_now("slow"));

        thread::sleep(Duration::from_millis(400));
        assert!(!stats.is_running());
        assert!(scheduler.run_now("slow"));
        assert_eq!(stats.runs(), 2);
        scheduler.shutdown();
    }

    #[test]
    fn test_run_now_unknown_job() {
        let scheduler = BackgroundScheduler::new();
        assert!(!scheduler.run_now("nope"));
        scheduler.shutdown();
    }
}
