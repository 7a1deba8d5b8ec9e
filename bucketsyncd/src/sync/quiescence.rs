use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::scheduler::SchedulerHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsActivity {
    /// Created or modified; the file may still be growing.
    Changed(PathBuf),
    Removed(PathBuf),
}

/// Shared view of whether local writes are still settling.
#[derive(Debug, Clone, Default)]
pub struct LocalActivity {
    in_progress: Arc<AtomicBool>,
}

impl LocalActivity {
    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    fn set(&self, value: bool) {
        self.in_progress.store(value, Ordering::SeqCst);
    }
}

pub fn start_notify_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<FsActivity>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            for activity in map_event(event) {
                let _ = tx.send(activity);
            }
        }
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

fn map_event(event: Event) -> Vec<FsActivity> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            event.paths.into_iter().map(FsActivity::Changed).collect()
        }
        EventKind::Remove(_) => event.paths.into_iter().map(FsActivity::Removed).collect(),
        _ => Vec::new(),
    }
}

/// Debounces filesystem activity and asks for a reconcile pass once the
/// tree has been quiet for a full window and no tracked file is growing.
#[derive(Debug)]
pub struct QuiescenceDetector {
    window: Duration,
    last_event: Option<Instant>,
    copying: HashMap<PathBuf, Option<u64>>,
    activity: LocalActivity,
}

impl QuiescenceDetector {
    pub fn new(window: Duration, activity: LocalActivity) -> Self {
        Self {
            window,
            last_event: None,
            copying: HashMap::new(),
            activity,
        }
    }

    pub fn record(&mut self, activity: FsActivity, now: Instant) {
        self.last_event = Some(now);
        self.activity.set(true);
        if let FsActivity::Changed(path) = activity {
            let size = current_size(&path);
            self.copying.insert(path, size);
        }
    }

    /// Returns `true` when quiescence is declared on this tick.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(last_event) = self.last_event else {
            return false;
        };
        if now.saturating_duration_since(last_event) < self.window {
            return false;
        }

        let mut stable = true;
        for (path, size) in self.copying.iter_mut() {
            let current = current_size(path);
            if current != *size {
                debug!(path = %path.display(), "file still changing");
                *size = current;
                stable = false;
            }
        }
        if !stable {
            return false;
        }

        self.last_event = None;
        self.copying.clear();
        self.activity.set(false);
        true
    }

    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<FsActivity>,
        scheduler: SchedulerHandle,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.record(event, Instant::now()),
                    None => break,
                },
                _ = ticker.tick() => {
                    if self.tick(Instant::now()) {
                        info!("local changes settled");
                        scheduler.request_reconcile();
                    }
                }
            }
        }
        self.activity.set(false);
    }
}

fn current_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|metadata| metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::sync::queue::{Task, TaskQueue};
    use crate::sync::scheduler::{Scheduler, SchedulerConfig};

    const WINDOW: Duration = Duration::from_secs(3);

    #[test]
    fn maps_create_modify_and_remove() {
        let created = Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/sync/a.txt")],
            attrs: Default::default(),
        };
        let removed = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/sync/b.txt")],
            attrs: Default::default(),
        };
        let accessed = Event {
            kind: EventKind::Access(notify::event::AccessKind::Any),
            paths: vec![PathBuf::from("/sync/c.txt")],
            attrs: Default::default(),
        };

        assert_eq!(
            map_event(created),
            vec![FsActivity::Changed(PathBuf::from("/sync/a.txt"))]
        );
        assert_eq!(
            map_event(removed),
            vec![FsActivity::Removed(PathBuf::from("/sync/b.txt"))]
        );
        assert!(map_event(accessed).is_empty());
    }

    #[test]
    fn quiet_window_must_elapse() {
        let activity = LocalActivity::default();
        let mut detector = QuiescenceDetector::new(WINDOW, activity.clone());
        let start = Instant::now();

        assert!(!detector.tick(start));
        detector.record(FsActivity::Removed(PathBuf::from("/nowhere")), start);
        assert!(activity.in_progress());

        assert!(!detector.tick(start + Duration::from_secs(1)));
        assert!(activity.in_progress());
        assert!(detector.tick(start + WINDOW));
        assert!(!activity.in_progress());
        assert!(!detector.tick(start + WINDOW * 2));
    }

    #[test]
    fn growing_file_delays_quiescence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.iso");
        std::fs::write(&path, vec![0u8; 10]).unwrap();

        let activity = LocalActivity::default();
        let mut detector = QuiescenceDetector::new(WINDOW, activity.clone());
        let start = Instant::now();
        detector.record(FsActivity::Changed(path.clone()), start);

        std::fs::write(&path, vec![0u8; 20]).unwrap();
        assert!(!detector.tick(start + WINDOW));
        assert!(activity.in_progress());

        assert!(detector.tick(start + WINDOW * 2));
        assert!(!activity.in_progress());
    }

    #[tokio::test]
    async fn settled_activity_queues_reconcile() {
        let queue = Arc::new(TaskQueue::new());
        let scheduler = Scheduler::new(
            Arc::clone(&queue),
            SchedulerConfig {
                workers: 1,
                idle: Duration::from_secs(1),
            },
            CancellationToken::new(),
        );
        let activity = LocalActivity::default();
        let detector = QuiescenceDetector::new(Duration::from_millis(30), activity.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let running = tokio::spawn(detector.run(rx, scheduler.handle(), cancel.clone()));

        tx.send(FsActivity::Removed(PathBuf::from("/nowhere")))
            .unwrap();
        for _ in 0..100 {
            if !queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(queue.try_pop().unwrap(), Task::Reconcile);
        assert!(!activity.in_progress());
        cancel.cancel();
        running.await.unwrap();
    }
}
