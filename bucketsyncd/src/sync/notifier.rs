use tokio::sync::mpsc;
use tracing::{debug, info};

use super::index::SyncState;

/// Receives sync status transitions and per-path refresh hints.
pub trait SyncNotifier: Send + Sync {
    fn synchronizing(&self);
    fn idle(&self);
    /// `state` is `None` once the record has been removed.
    fn path_changed(&self, name: &str, state: Option<SyncState>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl SyncNotifier for LogNotifier {
    fn synchronizing(&self) {
        info!("synchronizing");
    }

    fn idle(&self) {
        info!("idle");
    }

    fn path_changed(&self, name: &str, state: Option<SyncState>) {
        debug!(
            name,
            state = state.map(SyncState::as_str).unwrap_or("untracked"),
            "path state changed"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierEvent {
    Synchronizing,
    Idle,
    PathChanged {
        name: String,
        state: Option<SyncState>,
    },
}

/// Forwards every notification into a channel drained by the D-Bus service.
#[derive(Debug, Clone)]
pub struct DbusNotifier {
    tx: mpsc::UnboundedSender<NotifierEvent>,
}

impl DbusNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotifierEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SyncNotifier for DbusNotifier {
    fn synchronizing(&self) {
        info!("synchronizing");
        let _ = self.tx.send(NotifierEvent::Synchronizing);
    }

    fn idle(&self) {
        info!("idle");
        let _ = self.tx.send(NotifierEvent::Idle);
    }

    fn path_changed(&self, name: &str, state: Option<SyncState>) {
        let _ = self.tx.send(NotifierEvent::PathChanged {
            name: name.to_string(),
            state,
        });
    }
}
