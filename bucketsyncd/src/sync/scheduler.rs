use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::queue::{Task, TaskQueue};

/// Executes every task kind except [`Task::Sleep`], which the dispatcher
/// handles itself.
#[async_trait]
pub trait TaskRunner: Send + Sync + 'static {
    async fn run(&self, task: Task);
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub idle: Duration,
}

/// Cheap handle used to feed the dispatcher from outside.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    queue: Arc<TaskQueue>,
    wake: Arc<Notify>,
}

impl SchedulerHandle {
    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Queues a reconcile pass and cuts the current or next idle sleep short.
    pub fn request_reconcile(&self) -> bool {
        let queued = self.queue.push(Task::Reconcile);
        self.wake.notify_one();
        queued
    }
}

/// Single dispatcher over a fixed pool of worker permits.
///
/// Pooled tasks hold one permit while they run. Exclusive tasks take all of
/// them, so they start only once every pooled task has finished.
pub struct Scheduler {
    queue: Arc<TaskQueue>,
    wake: Arc<Notify>,
    permits: Arc<Semaphore>,
    workers: u32,
    idle: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(queue: Arc<TaskQueue>, config: SchedulerConfig, cancel: CancellationToken) -> Self {
        let workers = config.workers.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize));
        Self {
            queue,
            wake: Arc::new(Notify::new()),
            permits: Arc::new(Semaphore::new(workers)),
            workers: workers as u32,
            idle: config.idle,
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            queue: Arc::clone(&self.queue),
            wake: Arc::clone(&self.wake),
        }
    }

    /// Runs until the cancellation token fires, then waits for abandoned
    /// workers to unwind.
    pub async fn run<R: TaskRunner>(self, runner: Arc<R>) {
        info!(workers = self.workers, "dispatcher started");
        loop {
            let task = tokio::select! {
                _ = self.cancel.cancelled() => break,
                task = self.queue.pop() => task,
            };

            if task.is_exclusive() {
                let permits = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    permits = Arc::clone(&self.permits).acquire_many_owned(self.workers) => permits,
                };
                let Ok(_all) = permits else {
                    break;
                };
                match task {
                    Task::Sleep => self.sleep().await,
                    task => {
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = runner.run(task) => {}
                        }
                    }
                }
            } else {
                let permit = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    permit = Arc::clone(&self.permits).acquire_owned() => permit,
                };
                let Ok(permit) = permit else {
                    break;
                };
                let runner = Arc::clone(&runner);
                let cancel = self.cancel.clone();
                self.tracker.spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = runner.run(task) => {}
                    }
                    drop(permit);
                });
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        info!("dispatcher stopped");
    }

    async fn sleep(&self) {
        debug!(secs = self.idle.as_secs(), "idle sleep");
        let woken = self.wake.notified();
        tokio::select! {
            _ = tokio::time::sleep(self.idle) => {}
            _ = woken => debug!("idle sleep interrupted"),
            _ = self.cancel.cancelled() => {}
        }
    }
}
