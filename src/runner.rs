//! Monitored task runner
//!
//! A fixed-size pool of OS threads that executes submitted tasks and, after
//! each completion (success or failure), updates the shared
//! [`ProgressTracker`] and conditionally prints a status line.
//!
//! Each task is a closure wrapped with an explicit post-execution hook, and
//! its outcome is delivered on a channel chosen by the submitter: a
//! dedicated channel per task gives ordered retrieval, a shared channel
//! gives completion-ordered retrieval.
//!
//! One task's failure never cancels or blocks its siblings; the runner
//! never retries.

use crate::error::{ConfigError, FleetError, Result, TransportError};
use crate::fleet::Worker;
use crate::progress::{now_millis, ProgressTracker};
use crate::queue::{TaskQueue, TaskReceiver, TaskSender};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Hard cap on pool size; a fleet larger than this should be dispatched in
/// slices anyway.
pub const MAX_POOL_SIZE: usize = 4096;

const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// How long a task's rendered result may get in a verbose status line
const MAX_LABEL_LEN: usize = 120;

/// The result of one executed task
#[derive(Debug)]
pub struct TaskOutcome {
    pub worker: Worker,
    pub result: std::result::Result<String, TransportError>,
}

/// One unit of work: a closure bound to a worker, plus the channel its
/// outcome is delivered on. Single-shot; never retried.
pub struct Task {
    worker: Worker,
    run: Box<dyn FnOnce() -> std::result::Result<String, TransportError> + Send>,
    outcome_tx: Sender<TaskOutcome>,
}

impl Task {
    pub fn new<F>(worker: Worker, run: F, outcome_tx: Sender<TaskOutcome>) -> Self
    where
        F: FnOnce() -> std::result::Result<String, TransportError> + Send + 'static,
    {
        Self {
            worker,
            run: Box::new(run),
            outcome_tx,
        }
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }
}

/// Customizes how a completed task renders in a verbose status line
pub type LabelFormatter = Box<
    dyn Fn(&Worker, &std::result::Result<String, TransportError>) -> String + Send + Sync,
>;

/// How waiting for the pool to drain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every submitted task finished
    Completed,
    /// The timeout elapsed first; in-flight tasks keep running
    TimedOut,
}

/// Builder for [`MonitoredRunner`]. Constructs exactly one runner; a second
/// `build` call returns [`ConfigError::BuilderConsumed`].
pub struct RunnerBuilder {
    pool_size: usize,
    queue_capacity: usize,
    print_enabled: bool,
    tasks_per_print: u64,
    millis_per_print: i64,
    verbose_print: bool,
    print_errors: bool,
    expected_tasks: u64,
    label_formatter: Option<LabelFormatter>,
    interrupt: Option<Arc<AtomicBool>>,
    consumed: bool,
}

impl RunnerBuilder {
    pub fn new() -> Self {
        Self {
            pool_size: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            print_enabled: true,
            tasks_per_print: 1,
            millis_per_print: 0,
            verbose_print: false,
            print_errors: true,
            expected_tasks: 0,
            label_formatter: None,
            interrupt: None,
            consumed: false,
        }
    }

    /// Number of concurrent runner threads.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Capacity of the internal queue; a full queue blocks submitters.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Enable or disable status-line printing entirely.
    pub fn print_enabled(mut self, enabled: bool) -> Self {
        self.print_enabled = enabled;
        self
    }

    /// Print a status line every N finished tasks.
    pub fn tasks_per_print(mut self, tasks: u64) -> Self {
        self.tasks_per_print = tasks;
        self
    }

    /// Minimum milliseconds between status lines; 0 disables the gate.
    pub fn millis_per_print(mut self, millis: i64) -> Self {
        self.millis_per_print = millis;
        self
    }

    /// Suffix each status line with the finishing task's label.
    pub fn verbose_print(mut self, verbose: bool) -> Self {
        self.verbose_print = verbose;
        self
    }

    /// Print task errors immediately as they happen.
    pub fn print_errors(mut self, print: bool) -> Self {
        self.print_errors = print;
        self
    }

    /// Total tasks this runner will see; used only for the ETC and for
    /// counter column widths.
    pub fn expected_tasks(mut self, expected: u64) -> Self {
        self.expected_tasks = expected;
        self
    }

    pub fn label_formatter(mut self, formatter: LabelFormatter) -> Self {
        self.label_formatter = Some(formatter);
        self
    }

    /// Flag checked while awaiting completion; raising it fails the wait
    /// without stopping in-flight tasks.
    pub fn interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn build(&mut self) -> Result<MonitoredRunner> {
        if self.consumed {
            return Err(ConfigError::BuilderConsumed.into());
        }
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(ConfigError::InvalidPoolSize {
                size: self.pool_size,
                max: MAX_POOL_SIZE,
            }
            .into());
        }
        if self.tasks_per_print == 0 {
            return Err(ConfigError::InvalidPrintCadence {
                tasks_per_print: self.tasks_per_print,
            }
            .into());
        }
        if self.millis_per_print < 0 {
            return Err(ConfigError::InvalidPrintInterval {
                millis: self.millis_per_print,
            }
            .into());
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity {
                capacity: self.queue_capacity,
            }
            .into());
        }
        self.consumed = true;

        MonitoredRunner::spawn(
            self.pool_size,
            self.queue_capacity,
            RunnerShared {
                tracker: ProgressTracker::new(self.expected_tasks),
                print_enabled: self.print_enabled,
                tasks_per_print: self.tasks_per_print,
                millis_per_print: self.millis_per_print,
                verbose_print: self.verbose_print,
                print_errors: self.print_errors,
                label_formatter: self.label_formatter.take(),
                state: (Mutex::new(CompletionState::default()), Condvar::new()),
            },
            self.interrupt.take().unwrap_or_default(),
        )
    }
}

impl Default for RunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct CompletionState {
    submitted: u64,
    finished: u64,
}

struct RunnerShared {
    tracker: ProgressTracker,
    print_enabled: bool,
    tasks_per_print: u64,
    millis_per_print: i64,
    verbose_print: bool,
    print_errors: bool,
    label_formatter: Option<LabelFormatter>,
    state: (Mutex<CompletionState>, Condvar),
}

/// Bounded worker pool that tracks and reports progress as tasks complete
pub struct MonitoredRunner {
    sender: TaskSender<Task>,
    threads: Vec<JoinHandle<()>>,
    shared: Arc<RunnerShared>,
    interrupt: Arc<AtomicBool>,
}

impl std::fmt::Debug for MonitoredRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoredRunner")
            .field("threads", &self.threads.len())
            .finish_non_exhaustive()
    }
}

impl MonitoredRunner {
    fn spawn(
        pool_size: usize,
        queue_capacity: usize,
        shared: RunnerShared,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self> {
        let shared = Arc::new(shared);
        let queue = TaskQueue::new(queue_capacity);
        let sender = queue.sender();

        let mut threads = Vec::with_capacity(pool_size);
        for id in 0..pool_size {
            let receiver = queue.receiver();
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("runner-{}", id))
                .spawn(move || runner_loop(id, receiver, shared))?;
            threads.push(handle);
        }

        // The queue struct holds its own sender half; drop it so that
        // releasing `self.sender` is what disconnects the pool.
        drop(queue);

        debug!(pool_size, queue_capacity, "Runner pool spawned");

        Ok(Self {
            sender,
            threads,
            shared,
            interrupt,
        })
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.shared.tracker
    }

    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Submit a task for execution.
    ///
    /// The first submission stamps the tracker's start time. Blocks when
    /// the internal queue is full (back-pressure); never rejects.
    pub fn submit(&self, task: Task) -> Result<()> {
        self.shared.tracker.mark_started(now_millis());

        {
            let mut state = lock(&self.shared.state.0);
            state.submitted += 1;
        }

        if self.sender.enqueue(task).is_err() {
            let mut state = lock(&self.shared.state.0);
            state.submitted -= 1;
            return Err(FleetError::RunnerShutDown);
        }
        Ok(())
    }

    /// Block until every submitted task has finished or the timeout
    /// elapses, reporting which occurred. Raising the interrupt flag fails
    /// the wait with [`FleetError::Interrupted`]; in-flight tasks are not
    /// stopped either way.
    pub fn await_completion(&self, timeout: Duration) -> Result<WaitOutcome> {
        let deadline = Instant::now() + timeout;
        let (mutex, condvar) = &self.shared.state;
        let mut state = lock(mutex);

        loop {
            if state.finished >= state.submitted {
                return Ok(WaitOutcome::Completed);
            }
            if self.interrupt.load(Ordering::SeqCst) {
                return Err(FleetError::Interrupted);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }

            // Short slices so an interrupt is noticed promptly
            let wait = (deadline - now).min(Duration::from_millis(100));
            let (guard, _timed_out) = condvar
                .wait_timeout(state, wait)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
        }
    }

    /// Stop accepting submissions and join the pool threads. In-flight and
    /// queued tasks still run to completion.
    pub fn finish(self) {
        let MonitoredRunner {
            sender, threads, ..
        } = self;
        drop(sender);

        for handle in threads {
            if handle.join().is_err() {
                warn!("Runner thread panicked");
            }
        }
    }
}

// A poisoned lock only means another thread panicked mid-update; the
// counters underneath are still usable.
fn lock<'a>(mutex: &'a Mutex<CompletionState>) -> MutexGuard<'a, CompletionState> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn runner_loop(id: usize, receiver: TaskReceiver<Task>, shared: Arc<RunnerShared>) {
    debug!(runner = id, "Runner thread starting");

    while let Some(task) = receiver.dequeue() {
        let Task {
            worker,
            run,
            outcome_tx,
        } = task;

        let result = run();

        // The cadence check takes this thread's own recorded count, not a
        // re-read: siblings finishing in between must not steal the print
        // due at a multiple.
        let done = match &result {
            Ok(_) => shared.tracker.record_success() + shared.tracker.exception_count(),
            Err(e) => {
                let exceptions = shared.tracker.record_failure();
                if shared.print_errors {
                    eprintln!("{}; {}", worker, e);
                }
                exceptions + shared.tracker.completed_count()
            }
        };

        if shared.print_enabled {
            let now = now_millis();
            if shared
                .tracker
                .should_print(done, now, shared.tasks_per_print, shared.millis_per_print)
            {
                let mut line = shared
                    .tracker
                    .format_status(now, shared.tracker.expected_tasks());
                if shared.verbose_print {
                    let label = match &shared.label_formatter {
                        Some(formatter) => formatter(&worker, &result),
                        None => default_label(&worker, &result),
                    };
                    line.push_str("; ");
                    line.push_str(&label);
                }
                println!("{}", line);
            }
        }

        // Deliver after the counters update, so a consumer holding the
        // outcome also sees it counted. A dropped receiver is fine.
        let _ = outcome_tx.send(TaskOutcome { worker, result });

        let (mutex, condvar) = &shared.state;
        let mut state = lock(mutex);
        state.finished += 1;
        condvar.notify_all();
    }

    debug!(runner = id, "Runner thread exiting");
}

fn default_label(
    worker: &Worker,
    result: &std::result::Result<String, TransportError>,
) -> String {
    let rendered = match result {
        Ok(output) => truncate_line(output),
        Err(e) => truncate_line(&e.to_string()),
    };
    format!("{}; {}", worker, rendered)
}

/// First line of a result, clipped for status-line use.
fn truncate_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > MAX_LABEL_LEN {
        let clipped: String = line.chars().take(MAX_LABEL_LEN).collect();
        format!("{}...", clipped)
    } else {
        line.to_string()
    }
}
