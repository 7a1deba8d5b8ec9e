use std::collections::VecDeque;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::Notify;

use super::local_fs::LocalFile;
use super::remote::RemoteFile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Reconcile,
    Sleep,
    Download(RemoteFile),
    Upload(LocalFile),
    DeleteRemote(RemoteFile),
    DeleteLocal(LocalFile),
    CreateRemoteDir(LocalFile),
    CreateLocalDir(RemoteFile),
}

impl Task {
    /// Exclusive tasks only run while no other task is in flight.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Task::Reconcile | Task::Sleep)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Task::Reconcile => "reconcile",
            Task::Sleep => "sleep",
            Task::Download(_) => "download",
            Task::Upload(_) => "upload",
            Task::DeleteRemote(_) => "delete_remote",
            Task::DeleteLocal(_) => "delete_local",
            Task::CreateRemoteDir(_) => "create_remote_dir",
            Task::CreateLocalDir(_) => "create_local_dir",
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Task::Reconcile | Task::Sleep => None,
            Task::Download(file)
            | Task::DeleteRemote(file)
            | Task::CreateLocalDir(file) => Some(&file.name),
            Task::Upload(file) | Task::DeleteLocal(file) | Task::CreateRemoteDir(file) => {
                Some(&file.name)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue is empty")]
    Empty,
}

/// FIFO of pending tasks. At most one [`Task::Reconcile`] is queued at a time.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<VecDeque<Task>>,
    ready: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the task was dropped as a duplicate reconcile.
    pub fn push(&self, task: Task) -> bool {
        {
            let mut inner = self.lock();
            if task == Task::Reconcile && inner.contains(&Task::Reconcile) {
                return false;
            }
            inner.push_back(task);
        }
        self.ready.notify_one();
        true
    }

    /// Queues the output of a reconcile pass followed by the next pass.
    ///
    /// A reconcile that was requested while the pass ran is moved behind the
    /// new tasks. The idle sleep is only added when the pass produced nothing
    /// and nobody asked for another pass in the meantime.
    pub fn rearm(&self, tasks: Vec<Task>) {
        {
            let mut inner = self.lock();
            let before = inner.len();
            inner.retain(|task| *task != Task::Reconcile);
            let requested = inner.len() != before;
            let idle = tasks.is_empty() && !requested;
            inner.extend(tasks);
            if idle {
                inner.push_back(Task::Sleep);
            }
            inner.push_back(Task::Reconcile);
        }
        self.ready.notify_one();
    }

    pub fn try_pop(&self) -> Result<Task, QueueError> {
        self.lock().pop_front().ok_or(QueueError::Empty)
    }

    /// Waits until a task is available.
    pub async fn pop(&self) -> Task {
        loop {
            let notified = self.ready.notified();
            if let Ok(task) = self.try_pop() {
                return task;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Task>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    fn local(name: &str) -> LocalFile {
        LocalFile {
            name: name.into(),
            path: PathBuf::from("/sync").join(name),
            modified: 1,
            size: 1,
            is_dir: false,
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let queue = TaskQueue::new();
        queue.push(Task::Upload(local("A")));
        queue.push(Task::DeleteLocal(local("B")));

        let first = queue.try_pop().unwrap();
        let second = queue.try_pop().unwrap();

        assert_eq!(first.name(), Some("A"));
        assert_eq!(second.name(), Some("B"));
        assert!(queue.is_empty());
    }

    #[test]
    fn dequeue_on_empty_returns_error() {
        let queue = TaskQueue::new();
        assert!(matches!(queue.try_pop(), Err(QueueError::Empty)));
    }

    #[test]
    fn second_reconcile_is_rejected() {
        let queue = TaskQueue::new();
        assert!(queue.push(Task::Reconcile));
        assert!(queue.push(Task::Sleep));
        assert!(!queue.push(Task::Reconcile));
        assert_eq!(queue.len(), 2);

        queue.try_pop().unwrap();
        assert!(!queue.push(Task::Reconcile));
        queue.try_pop().unwrap();
        assert!(queue.push(Task::Reconcile));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn exclusivity_follows_task_kind() {
        assert!(Task::Reconcile.is_exclusive());
        assert!(Task::Sleep.is_exclusive());
        assert!(!Task::Upload(local("a")).is_exclusive());
        assert_eq!(Task::CreateRemoteDir(local("d")).kind(), "create_remote_dir");
    }

    #[test]
    fn rearm_appends_sleep_only_for_an_idle_pass() {
        let queue = TaskQueue::new();
        queue.rearm(Vec::new());
        assert_eq!(queue.try_pop().unwrap(), Task::Sleep);
        assert_eq!(queue.try_pop().unwrap(), Task::Reconcile);

        queue.rearm(vec![Task::Upload(local("a"))]);
        assert_eq!(queue.try_pop().unwrap().name(), Some("a"));
        assert_eq!(queue.try_pop().unwrap(), Task::Reconcile);
        assert!(queue.is_empty());
    }

    #[test]
    fn rearm_moves_requested_reconcile_behind_new_tasks() {
        let queue = TaskQueue::new();
        queue.push(Task::Reconcile);
        queue.rearm(vec![Task::Upload(local("a")), Task::Upload(local("b"))]);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop().unwrap().name(), Some("a"));
        assert_eq!(queue.try_pop().unwrap().name(), Some("b"));
        assert_eq!(queue.try_pop().unwrap(), Task::Reconcile);

        queue.push(Task::Reconcile);
        queue.rearm(Vec::new());
        assert_eq!(queue.try_pop().unwrap(), Task::Reconcile);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = Arc::new(TaskQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(Task::Sleep);

        let task = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task, Task::Sleep);
    }
}
