//! Timer services.
//!
//! - [`ThreadTimer`]: a worker thread waiting on a deadline heap
//! - [`ManualTimer`]: virtual time advanced by the caller, for tests and
//!   simulations

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tmtc_common::{Task, TimerHandle, TimerService};
use tracing::trace;

// ============================================================================
// Scheduled Tasks
// ============================================================================

struct ScheduledTask<T> {
    deadline: T,
    seq: u64,
    handle: TimerHandle,
    task: Task,
}

impl<T: Ord> PartialEq for ScheduledTask<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T: Ord> Eq for ScheduledTask<T> {}

impl<T: Ord> PartialOrd for ScheduledTask<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for ScheduledTask<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline, then first scheduled)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> ScheduledTask<T> {
    fn run(self) {
        if !self.handle.is_cancelled() {
            (self.task)();
        }
    }
}

// ============================================================================
// Thread Timer
// ============================================================================

enum TimerCommand {
    Schedule(ScheduledTask<Instant>),
    Shutdown,
}

/// Runs scheduled tasks on a dedicated thread.
///
/// Tasks run one at a time on the timer thread and should hand long work to
/// an executor.
pub struct ThreadTimer {
    tx: Sender<TimerCommand>,
    seq: Mutex<u64>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadTimer {
    /// Spawn the timer thread.
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name(format!("timer-{}", name))
            .spawn(move || timer_thread_main(rx))?;
        Ok(ThreadTimer {
            tx,
            seq: Mutex::new(0),
            thread: Some(thread),
        })
    }

    /// Stop the timer thread and wait for it. Pending tasks are dropped.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(TimerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for ThreadTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadTimer").finish_non_exhaustive()
    }
}

impl TimerService for ThreadTimer {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let seq = {
            let mut seq = self.seq.lock();
            *seq += 1;
            *seq
        };
        let scheduled = ScheduledTask {
            deadline: Instant::now() + delay,
            seq,
            handle: handle.clone(),
            task,
        };
        if self.tx.send(TimerCommand::Schedule(scheduled)).is_err() {
            // Timer thread gone: the task can never run.
            handle.cancel();
        }
        handle
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        let _ = self.tx.send(TimerCommand::Shutdown);
        // Don't wait for the thread in drop, the last owner may be a task.
    }
}

fn timer_thread_main(rx: Receiver<TimerCommand>) {
    let mut heap: BinaryHeap<ScheduledTask<Instant>> = BinaryHeap::new();
    loop {
        let received = match heap.peek() {
            Some(next) => {
                let now = Instant::now();
                if next.deadline <= now {
                    if let Some(due) = heap.pop() {
                        trace!("Timer task {} due", due.seq);
                        due.run();
                    }
                    continue;
                }
                rx.recv_timeout(next.deadline - now)
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(TimerCommand::Schedule(task)) => heap.push(task),
            Ok(TimerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

// ============================================================================
// Manual Timer
// ============================================================================

#[derive(Default)]
struct ManualState {
    now: Duration,
    seq: u64,
    heap: BinaryHeap<ScheduledTask<Duration>>,
}

/// A timer driven by explicit calls instead of the wall clock.
///
/// Tasks run on the thread calling [`advance`](ManualTimer::advance) or
/// [`fire_all`](ManualTimer::fire_all), outside the internal lock, so they
/// may schedule further tasks.
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of scheduled tasks not yet run or cancelled.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .heap
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .count()
    }

    /// Move virtual time forward, running every task that falls due.
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now + by;
        let mut fired = 0;
        loop {
            let due = {
                let mut state = self.state.lock();
                match state.heap.peek() {
                    Some(next) if next.deadline <= target => {
                        let due = state.heap.pop();
                        if let Some(task) = &due {
                            state.now = state.now.max(task.deadline);
                        }
                        due
                    }
                    _ => {
                        state.now = target;
                        None
                    }
                }
            };
            match due {
                Some(task) => {
                    if !task.handle.is_cancelled() {
                        fired += 1;
                    }
                    task.run();
                }
                None => return fired,
            }
        }
    }

    /// Run every task scheduled so far, whatever its deadline.
    pub fn fire_all(&self) -> usize {
        let deadline = {
            let state = self.state.lock();
            state.heap.iter().map(|t| t.deadline).max()
        };
        match deadline {
            Some(deadline) => self.advance(deadline.saturating_sub(self.now())),
            None => 0,
        }
    }
}

impl std::fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualTimer")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

impl TimerService for ManualTimer {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let mut state = self.state.lock();
        state.seq += 1;
        let scheduled = ScheduledTask {
            deadline: state.now + delay,
            seq: state.seq,
            handle: handle.clone(),
            task,
        };
        state.heap.push(scheduled);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Task) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |n: u32| -> Task {
                let log = Arc::clone(&log);
                Box::new(move || log.lock().push(n))
            }
        };
        (log, make)
    }

    #[test]
    fn test_manual_timer_order_and_cancel() {
        let timer = ManualTimer::new();
        let (log, task) = recorder();
        timer.schedule(Duration::from_secs(3), task(3));
        timer.schedule(Duration::from_secs(1), task(1));
        let cancelled = timer.schedule(Duration::from_secs(2), task(2));
        timer.schedule(Duration::from_secs(1), task(11));
        assert!(cancelled.cancel());
        assert_eq!(timer.pending(), 3);

        assert_eq!(timer.advance(Duration::from_secs(2)), 2);
        assert_eq!(*log.lock(), vec![1, 11]);
        assert_eq!(timer.now(), Duration::from_secs(2));

        assert_eq!(timer.fire_all(), 1);
        assert_eq!(*log.lock(), vec![1, 11, 3]);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_manual_timer_reschedule_from_task() {
        let timer = Arc::new(ManualTimer::new());
        let (log, task) = recorder();
        let inner = Arc::clone(&timer);
        let follow_up = task(2);
        timer.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                inner.schedule(Duration::from_secs(1), follow_up);
            }),
        );
        timer.advance(Duration::from_secs(5));
        assert_eq!(*log.lock(), vec![2]);
    }

    #[test]
    fn test_thread_timer_runs_and_cancels() {
        let timer = ThreadTimer::new("test").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let tx_cancelled = tx.clone();
        let handle = timer.schedule(
            Duration::from_millis(50),
            Box::new(move || {
                let _ = tx_cancelled.send("cancelled");
            }),
        );
        handle.cancel();
        timer.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send("fired");
            }),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok("fired"));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        timer.shutdown();
    }
}
