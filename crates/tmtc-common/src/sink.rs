//! Collaborator contracts: the processing-model sink and the timer service.

use crate::records::{ActivityProgress, EventOccurrence, ParameterSample, RawData};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A deferred unit of work run by a [`TimerService`] or an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation handle for a scheduled timer task.
///
/// Cloning the handle shares the cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Create a fresh, armed handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the task. Returns `true` if this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    /// Check whether the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Shared one-shot timer facility.
pub trait TimerService: Send + Sync {
    /// Run `task` once after `delay`, unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// The processing model a route reports to.
pub trait DataProcessor: Send + Sync {
    /// Archive a raw message.
    fn forward_raw_data(&self, raw: RawData);

    /// Inject parameter samples.
    fn forward_parameters(&self, samples: Vec<ParameterSample>);

    /// Raise event occurrences.
    fn forward_events(&self, events: Vec<EventOccurrence>);

    /// Report activity progress.
    fn forward_activity_progress(&self, progress: ActivityProgress);

    /// Allocate the next raw data identifier.
    fn next_raw_data_id(&self) -> u64;

    /// The timer service used for verification timeouts.
    fn timer_service(&self) -> Arc<dyn TimerService>;

    /// Name stamped on produced raw data.
    fn handler_name(&self) -> &str {
        "tmtc"
    }

    /// Run asynchronous work. The default runs it on the calling thread.
    fn execute(&self, task: Task) {
        task()
    }
}
