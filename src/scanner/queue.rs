//! Staggered task queue shared by the scanner and the remover
//!
//! Tasks are held in an unbounded channel so that a worker can always hand
//! back the subdirectories it found without blocking on its peers. Every
//! submitted task is counted as pending until the worker that took it drops
//! its [`TaskGuard`]; the queue is idle when that count reaches zero.
//!
//! Submissions are spaced by a fixed delay: each task gets a start slot no
//! earlier than the previous slot plus the delay, and the worker that takes
//! it sleeps until that slot. This keeps a burst of new subdirectories from
//! turning into a burst of simultaneous remote calls.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

/// A task with the earliest instant it may start
#[derive(Debug)]
struct Scheduled<T> {
    task: T,
    not_before: Instant,
}

/// Statistics for the task queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total tasks submitted
    pub submitted: AtomicU64,

    /// Total tasks taken by workers
    pub taken: AtomicU64,

    /// Total time workers spent waiting for their start slot, in ms
    pub stagger_wait_ms: AtomicU64,
}

impl QueueStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn taken(&self) -> u64 {
        self.taken.load(Ordering::Relaxed)
    }
}

/// Queue of tasks with pending-work accounting and staggered starts
pub struct TaskQueue<T> {
    sender: Sender<Scheduled<T>>,
    receiver: Receiver<Scheduled<T>>,

    /// Submitted and not yet finished
    pending: Arc<AtomicUsize>,

    /// Last start slot handed out
    last_slot: Arc<Mutex<Option<Instant>>>,

    /// Spacing between consecutive start slots
    stagger: Duration,

    stats: Arc<QueueStats>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            pending: Arc::clone(&self.pending),
            last_slot: Arc::clone(&self.last_slot),
            stagger: self.stagger,
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> TaskQueue<T> {
    /// Create a queue whose task starts are spaced by `stagger`
    pub fn new(stagger: Duration) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            pending: Arc::new(AtomicUsize::new(0)),
            last_slot: Arc::new(Mutex::new(None)),
            stagger,
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Next start slot: `max(now, last + stagger)`
    fn next_slot(&self) -> Instant {
        let now = Instant::now();
        let mut last = self.last_slot.lock();
        let slot = match *last {
            Some(prev) => (prev + self.stagger).max(now),
            None => now,
        };
        *last = Some(slot);
        slot
    }

    /// Submit a task
    pub fn submit(&self, task: T) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let scheduled = Scheduled {
            task,
            not_before: self.next_slot(),
        };
        if self.sender.send(scheduled).is_err() {
            // The queue owns a receiver, so this only happens during teardown
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Task queue disconnected, task dropped");
            return;
        }
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Take the next task, waiting up to `timeout` for one to arrive.
    ///
    /// Once a task is taken the caller sleeps until its start slot. The
    /// task stays pending until the returned guard is dropped.
    pub fn take(&self, timeout: Duration) -> Option<TaskGuard<T>> {
        let scheduled = self.receiver.recv_timeout(timeout).ok()?;
        self.stats.taken.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        if scheduled.not_before > now {
            let wait = scheduled.not_before - now;
            self.stats
                .stagger_wait_ms
                .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
            thread::sleep(wait);
        }

        Some(TaskGuard {
            task: scheduled.task,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Tasks submitted and not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Tasks waiting to be taken
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// No task is queued or running
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Block until the queue is idle, checking every `poll`
    pub fn wait_idle(&self, poll: Duration) {
        while !self.is_idle() {
            thread::sleep(poll);
        }
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

/// RAII guard for a taken task: the task is finished when the guard drops
pub struct TaskGuard<T> {
    task: T,
    pending: Arc<AtomicUsize>,
}

impl<T> TaskGuard<T> {
    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut T {
        &mut self.task
    }
}

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_until_guard_drops() {
        let queue = TaskQueue::new(Duration::ZERO);
        assert!(queue.is_idle());

        queue.submit("/a".to_string());
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.queued(), 1);

        let guard = queue.take(Duration::from_millis(10)).unwrap();
        assert_eq!(guard.task(), "/a");
        assert_eq!(queue.queued(), 0);
        assert!(!queue.is_idle());

        // A running task may submit children before it finishes
        queue.submit("/a/b".to_string());
        drop(guard);
        assert_eq!(queue.pending(), 1);

        let child = queue.take(Duration::from_millis(10)).unwrap();
        drop(child);
        assert!(queue.is_idle());
        assert_eq!(queue.stats().submitted(), 2);
        assert_eq!(queue.stats().taken(), 2);
    }

    #[test]
    fn test_take_times_out_when_empty() {
        let queue: TaskQueue<u32> = TaskQueue::new(Duration::ZERO);
        assert!(queue.take(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_starts_are_staggered() {
        let stagger = Duration::from_millis(30);
        let queue = TaskQueue::new(stagger);
        for i in 0..4 {
            queue.submit(i);
        }

        let start = Instant::now();
        for _ in 0..4 {
            drop(queue.take(Duration::from_millis(10)).unwrap());
        }
        // Four slots: now, +30, +60, +90
        assert!(start.elapsed() >= Duration::from_millis(85));
    }

    #[test]
    fn test_wait_idle_across_threads() {
        let queue = TaskQueue::new(Duration::ZERO);
        for i in 0..10 {
            queue.submit(i);
        }

        let worker_queue = queue.clone();
        let handle = thread::spawn(move || {
            let mut sum = 0;
            while let Some(guard) = worker_queue.take(Duration::from_millis(50)) {
                sum += *guard.task();
            }
            sum
        });

        queue.wait_idle(Duration::from_millis(5));
        assert_eq!(handle.join().unwrap(), 45);
    }
}
