//! Bounded task queue with back-pressure
//!
//! The runner's internal queue is bounded: when it is full, [`TaskSender::enqueue`]
//! blocks the submitter until capacity frees up. Work is never rejected or
//! dropped, so dispatching against a very large fleet cannot grow memory
//! without bound.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Statistics for a task queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total tasks enqueued
    pub enqueued: AtomicU64,

    /// Total tasks dequeued
    pub dequeued: AtomicU64,
}

impl QueueStats {
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dequeued_count(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }
}

/// Bounded blocking queue feeding the runner threads
pub struct TaskQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
    stats: Arc<QueueStats>,
}

impl<T> TaskQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);

        Self {
            sender,
            receiver,
            capacity,
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Get a sender handle (clone per producer)
    pub fn sender(&self) -> TaskSender<T> {
        TaskSender {
            sender: self.sender.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Get a receiver handle (clone per runner thread)
    pub fn receiver(&self) -> TaskReceiver<T> {
        TaskReceiver {
            receiver: self.receiver.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Handle for enqueuing tasks
pub struct TaskSender<T> {
    sender: Sender<T>,
    stats: Arc<QueueStats>,
}

impl<T> Clone for TaskSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> TaskSender<T> {
    /// Enqueue a task, blocking until capacity is available.
    ///
    /// Returns `Err` only when every receiver is gone.
    pub fn enqueue(&self, task: T) -> Result<(), ()> {
        self.sender.send(task).map_err(|_| ())?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Enqueue without blocking.
    ///
    /// Returns `Ok(true)` if enqueued, `Ok(false)` if the queue is full,
    /// `Err` if disconnected.
    pub fn try_enqueue(&self, task: T) -> Result<bool, ()> {
        match self.sender.try_send(task) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(()),
        }
    }
}

/// Handle for dequeuing tasks
pub struct TaskReceiver<T> {
    receiver: Receiver<T>,
    stats: Arc<QueueStats>,
}

impl<T> Clone for TaskReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> TaskReceiver<T> {
    /// Receive the next task, blocking until one is available.
    ///
    /// Returns `None` once the queue is disconnected and drained.
    pub fn dequeue(&self) -> Option<T> {
        match self.receiver.recv() {
            Ok(task) => {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                Some(task)
            }
            Err(_) => None,
        }
    }

    /// Receive with a timeout.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(task) => {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                Some(task)
            }
            Err(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fifo_order() {
        let queue = TaskQueue::new(10);
        let sender = queue.sender();
        let receiver = queue.receiver();

        sender.enqueue(1).unwrap();
        sender.enqueue(2).unwrap();
        sender.enqueue(3).unwrap();

        assert_eq!(receiver.dequeue(), Some(1));
        assert_eq!(receiver.dequeue(), Some(2));
        assert_eq!(receiver.dequeue(), Some(3));
    }

    #[test]
    fn test_try_enqueue_full() {
        let queue = TaskQueue::new(2);
        let sender = queue.sender();

        assert!(sender.try_enqueue(1).unwrap());
        assert!(sender.try_enqueue(2).unwrap());
        assert!(!sender.try_enqueue(3).unwrap());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_enqueue_blocks_until_capacity() {
        let queue = TaskQueue::new(1);
        let sender = queue.sender();
        let receiver = queue.receiver();

        sender.enqueue(1).unwrap();

        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            receiver.dequeue()
        });

        // Full queue: this enqueue must block until the consumer drains a slot
        let start = Instant::now();
        sender.enqueue(2).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));

        assert_eq!(consumer.join().unwrap(), Some(1));
    }

    #[test]
    fn test_dequeue_after_disconnect() {
        let queue = TaskQueue::new(4);
        let sender = queue.sender();
        let receiver = queue.receiver();

        sender.enqueue("a").unwrap();
        drop(sender);
        drop(queue);

        // Remaining items drain, then the receiver reports disconnection
        assert_eq!(receiver.dequeue(), Some("a"));
        assert_eq!(receiver.dequeue(), None);
    }

    #[test]
    fn test_stats() {
        let queue = TaskQueue::new(10);
        let sender = queue.sender();
        let receiver = queue.receiver();
        let stats = queue.stats();

        sender.enqueue(1).unwrap();
        sender.enqueue(2).unwrap();
        receiver.dequeue().unwrap();

        assert_eq!(stats.enqueued_count(), 2);
        assert_eq!(stats.dequeued_count(), 1);
    }
}
