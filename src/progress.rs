//! Progress tracking for long-running fan-out dispatches
//!
//! [`ProgressTracker`] turns raw completion counters into a status line and
//! an estimate of remaining time. It holds no I/O: callers decide when to
//! print by asking [`ProgressTracker::should_print`].
//!
//! The counters are the only state mutated by concurrent task-completion
//! callbacks, so every mutation here is a lock-free atomic.

use crate::pretty;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Shared, thread-safe dispatch counters plus status-line formatting.
///
/// Owned by exactly one runner and never reused across dispatches.
/// `completed + exceptions` never exceeds the number of submitted tasks;
/// both counters only grow.
#[derive(Debug)]
pub struct ProgressTracker {
    completed: AtomicU64,
    exceptions: AtomicU64,

    /// Epoch millis of the first submission; 0 until then, set exactly once
    start_millis: AtomicI64,

    last_print_millis: AtomicI64,

    /// Used only for the ETC and counter column widths
    expected_tasks: u64,

    count_width: usize,
}

impl ProgressTracker {
    pub fn new(expected_tasks: u64) -> Self {
        let count_width = if expected_tasks > 0 {
            expected_tasks.to_string().len()
        } else {
            10
        };

        Self {
            completed: AtomicU64::new(0),
            exceptions: AtomicU64::new(0),
            start_millis: AtomicI64::new(0),
            last_print_millis: AtomicI64::new(0),
            expected_tasks,
            count_width,
        }
    }

    /// Record the dispatch start time. Only the first call wins.
    pub fn mark_started(&self, now: i64) {
        let _ = self
            .start_millis
            .compare_exchange(0, now, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn record_success(&self) -> u64 {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_failure(&self) -> u64 {
        self.exceptions.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn exception_count(&self) -> u64 {
        self.exceptions.load(Ordering::SeqCst)
    }

    /// Total tasks finished, successfully or not.
    pub fn done(&self) -> u64 {
        self.completed_count() + self.exception_count()
    }

    pub fn start_time_millis(&self) -> i64 {
        self.start_millis.load(Ordering::SeqCst)
    }

    pub fn expected_tasks(&self) -> u64 {
        self.expected_tasks
    }

    /// Decide whether a status line is due, given the finished count the
    /// caller observed when recording its own completion.
    ///
    /// True iff `done` hits the `tasks_per_print` cadence AND
    /// (`millis_per_print` is 0 OR at least that long has passed since the
    /// last print). The caller must pass the count returned by its
    /// `record_success`/`record_failure` call (plus the other counter)
    /// rather than re-reading: sibling completions landing in between
    /// would push a fresh read past the multiple and the due line would
    /// never print. A true time-gated result updates the last-print time;
    /// the load-then-store is not a single atomic step, so two callers
    /// straddling the gate may both print. A double print is harmless; a
    /// lost print would not be.
    pub fn should_print(&self, done: u64, now: i64, tasks_per_print: u64, millis_per_print: i64) -> bool {
        if done % tasks_per_print != 0 {
            return false;
        }

        if millis_per_print != 0 {
            let last = self.last_print_millis.load(Ordering::SeqCst);
            if now - last < millis_per_print {
                return false;
            }
            self.last_print_millis.store(now, Ordering::SeqCst);
        }

        true
    }

    /// Estimate milliseconds to completion by linear extrapolation from the
    /// current throughput: `elapsed / done * left`. Cheap estimate, not a
    /// guarantee; zero when nothing has finished yet.
    pub fn estimate_remaining_millis(&self, now: i64, total_expected: u64) -> i64 {
        let done = self.done();
        if done == 0 {
            return 0;
        }

        let elapsed = (now - self.start_time_millis()) as f64;
        let left = total_expected.saturating_sub(done) as f64;
        (elapsed / done as f64 * left) as i64
    }

    /// Format the status line:
    /// `<timestamp> <done> tasks complete; <exceptions> exceptions; taken
    /// <elapsed> (<rate> per hour)` plus `; ETC <estimate>` when the total
    /// is known. Counter columns are right-aligned to the expected-task
    /// digit count so consecutive lines line up.
    pub fn format_status(&self, now: i64, total_expected: u64) -> String {
        let exceptions = self.exception_count();
        let done = self.completed_count() + exceptions;

        let elapsed = (now - self.start_time_millis()).max(1);
        let per_hour = (3_600_000 * done) as f64 / elapsed as f64;

        let w = self.count_width;
        let mut line = format!(
            "{} {:>w$} tasks complete; {:>w$} exceptions; taken {:<12} ({:>6} per hour)",
            format_timestamp(now),
            done,
            exceptions,
            pretty::time(elapsed),
            pretty::metric(per_hour),
            w = w,
        );

        if total_expected > 0 {
            let etc = self.estimate_remaining_millis(now, total_expected);
            line.push_str(&format!("; ETC {:<12}", pretty::time(etc)));
        }

        line
    }
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .format("%F %T%.3f")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let tracker = ProgressTracker::new(10);
        tracker.record_success();
        tracker.record_success();
        tracker.record_failure();

        assert_eq!(tracker.completed_count(), 2);
        assert_eq!(tracker.exception_count(), 1);
        assert_eq!(tracker.done(), 3);
    }

    #[test]
    fn test_start_time_set_once() {
        let tracker = ProgressTracker::new(0);
        tracker.mark_started(1000);
        tracker.mark_started(2000);
        assert_eq!(tracker.start_time_millis(), 1000);
    }

    #[test]
    fn test_should_print_cadence() {
        let tracker = ProgressTracker::new(100);
        tracker.mark_started(0);

        // Mix successes and failures; a line is due exactly every 5th finish
        let mut prints = 0;
        for i in 1..=20u64 {
            let done = if i % 3 == 0 {
                tracker.record_failure() + tracker.completed_count()
            } else {
                tracker.record_success() + tracker.exception_count()
            };
            if tracker.should_print(done, i as i64, 5, 0) {
                prints += 1;
                assert_eq!(done % 5, 0);
            }
        }
        assert_eq!(prints, 4);
    }

    /// A line due at a cadence multiple must survive sibling completions
    /// racing in between one thread's record and its cadence check.
    #[test]
    fn test_cadence_survives_concurrent_completions() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let tracker = Arc::new(ProgressTracker::new(3));
        tracker.mark_started(0);
        let barrier = Arc::new(Barrier::new(3));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let tracker = Arc::clone(&tracker);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                let done = tracker.record_success() + tracker.exception_count();
                // Every thread records before any checks the cadence
                barrier.wait();
                tracker.should_print(done, 1, 2, 0)
            }));
        }

        let prints = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|due| *due)
            .count();

        // The line due at done=2 is never lost; each snapshot is distinct,
        // so exactly the thread that observed 2 prints it
        assert_eq!(prints, 1);
    }

    #[test]
    fn test_should_print_time_gate() {
        let tracker = ProgressTracker::new(0);
        tracker.mark_started(0);

        let done = tracker.record_success();
        assert!(tracker.should_print(done, 1000, 1, 500));

        // Too soon after the last print
        let done = tracker.record_success();
        assert!(!tracker.should_print(done, 1200, 1, 500));

        // Gate reopens once the interval has passed
        let done = tracker.record_success();
        assert!(tracker.should_print(done, 1500, 1, 500));
    }

    #[test]
    fn test_zero_millis_disables_time_gate() {
        let tracker = ProgressTracker::new(0);
        tracker.mark_started(0);
        let done = tracker.record_success();
        assert!(tracker.should_print(done, 1, 1, 0));
        let done = tracker.record_success();
        assert!(tracker.should_print(done, 2, 1, 0));
    }

    #[test]
    fn test_estimate_zero_when_nothing_done() {
        let tracker = ProgressTracker::new(100);
        tracker.mark_started(0);
        assert_eq!(tracker.estimate_remaining_millis(5000, 100), 0);
    }

    #[test]
    fn test_estimate_linear_extrapolation() {
        let tracker = ProgressTracker::new(100);
        tracker.mark_started(0);
        for _ in 0..10 {
            tracker.record_success();
        }

        // 10 done in 10s leaves 90 at 1s each
        let etc = tracker.estimate_remaining_millis(10_000, 100);
        assert!((etc - 90_000).abs() < 100, "etc = {}", etc);
        assert!(etc >= 0);
    }

    #[test]
    fn test_status_line_contents() {
        let tracker = ProgressTracker::new(100);
        tracker.mark_started(0);
        for _ in 0..9 {
            tracker.record_success();
        }
        tracker.record_failure();

        let line = tracker.format_status(10_000, 100);
        assert!(line.contains("tasks complete"), "line = {}", line);
        assert!(line.contains("exceptions"));
        assert!(line.contains("taken"));
        assert!(line.contains("per hour"));
        assert!(line.contains("ETC"));
    }

    #[test]
    fn test_status_line_omits_etc_when_total_unknown() {
        let tracker = ProgressTracker::new(0);
        tracker.mark_started(0);
        tracker.record_success();
        let line = tracker.format_status(1000, 0);
        assert!(!line.contains("ETC"));
    }

    /// The integer counters must survive a format/parse round trip.
    #[test]
    fn test_status_line_round_trip() {
        let tracker = ProgressTracker::new(500);
        tracker.mark_started(0);
        for _ in 0..123 {
            tracker.record_success();
        }
        for _ in 0..45 {
            tracker.record_failure();
        }

        let line = tracker.format_status(60_000, 500);
        let (done, exceptions) = parse_counts(&line);
        assert_eq!(done, 168);
        assert_eq!(exceptions, 45);
    }

    fn parse_counts(line: &str) -> (u64, u64) {
        let mut segments = line.split("; ");
        let first = segments.next().unwrap();
        let second = segments.next().unwrap();

        // "<date> <time> <done> tasks complete"
        let done = first
            .split_whitespace()
            .nth(2)
            .unwrap()
            .parse()
            .unwrap();
        // "<exceptions> exceptions"
        let exceptions = second
            .split_whitespace()
            .next()
            .unwrap()
            .parse()
            .unwrap();
        (done, exceptions)
    }
}
