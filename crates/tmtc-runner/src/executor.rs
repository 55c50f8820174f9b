//! Single worker thread running deferred tasks in submission order.

use crossbeam_channel::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use tmtc_common::Task;
use tracing::trace;

enum WorkerCommand {
    Run(Task),
    Stop,
}

/// Runs tasks on a dedicated thread, one at a time.
pub struct Executor {
    tx: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl Executor {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name(format!("exec-{}", name))
            .spawn(move || worker_main(rx))?;
        Ok(Executor {
            tx,
            thread: Some(thread),
        })
    }

    /// Queue a task. Tasks submitted after shutdown are dropped.
    pub fn execute(&self, task: Task) {
        if self.tx.send(WorkerCommand::Run(task)).is_err() {
            trace!("Executor stopped, task dropped");
        }
    }

    /// Run the queued tasks, then stop the worker and wait for it.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(WorkerCommand::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerCommand::Stop);
    }
}

fn worker_main(rx: Receiver<WorkerCommand>) {
    while let Ok(command) = rx.recv() {
        match command {
            WorkerCommand::Run(task) => task(),
            WorkerCommand::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_tasks_run_in_order() {
        let executor = Executor::new("test").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for n in 0..10 {
            let log = Arc::clone(&log);
            executor.execute(Box::new(move || log.lock().push(n)));
        }
        executor.shutdown();
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }
}
