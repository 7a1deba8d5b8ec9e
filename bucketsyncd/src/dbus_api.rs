use std::sync::Arc;

use bucketsync_integrations::emblem_for_sync_state;
use bucketsync_integrations::ids::{
    DBUS_ERROR_FAILED, DBUS_ERROR_INVALID_PATH, DBUS_ERROR_NOT_FOUND, STATUS_IDLE,
    STATUS_SYNCHRONIZING,
};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use zbus::{interface, object_server::SignalEmitter};

use crate::sync::index::{StateStore, SyncState};
use crate::sync::notifier::NotifierEvent;

#[derive(Debug, Error)]
pub enum DbusServiceError {
    #[error("path is not tracked")]
    NotFound,
    #[error("invalid path")]
    InvalidPath,
    #[error("operation failed")]
    Failed,
}

pub fn dbus_error_name(err: &DbusServiceError) -> &'static str {
    match err {
        DbusServiceError::NotFound => DBUS_ERROR_NOT_FOUND,
        DbusServiceError::InvalidPath => DBUS_ERROR_INVALID_PATH,
        DbusServiceError::Failed => DBUS_ERROR_FAILED,
    }
}

fn map_to_fdo(err: DbusServiceError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}: {}", dbus_error_name(&err), err))
}

/// Emblem for a path's state; untracked paths get none.
pub fn emblem_for(state: Option<SyncState>) -> &'static str {
    state
        .map(|state| emblem_for_sync_state(state.as_str()))
        .unwrap_or("")
}

/// Accepts `Docs/a.txt` as well as `/Docs/a.txt`.
fn canonical_query_name(name: &str) -> Result<String, DbusServiceError> {
    let trimmed = name.trim_matches('/');
    if trimmed.is_empty()
        || trimmed
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(DbusServiceError::InvalidPath);
    }
    Ok(trimmed.to_string())
}

pub struct SyncDbusService {
    store: StateStore,
    status: Arc<RwLock<String>>,
}

impl SyncDbusService {
    pub fn new(store: StateStore, status: Arc<RwLock<String>>) -> Self {
        Self { store, status }
    }
}

#[interface(name = "io.bucketsync.Sync1")]
impl SyncDbusService {
    async fn get_status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status.read().await.clone())
    }

    async fn get_state(&self, name: &str) -> zbus::fdo::Result<String> {
        let name = canonical_query_name(name).map_err(map_to_fdo)?;
        match self.store.get(&name).await {
            Ok(Some(record)) => Ok(record.state.as_str().to_string()),
            Ok(None) => Err(map_to_fdo(DbusServiceError::NotFound)),
            Err(err) => {
                debug!(name = %name, error = %err, "state lookup failed");
                Err(map_to_fdo(DbusServiceError::Failed))
            }
        }
    }

    #[zbus(signal)]
    pub async fn status_changed(ctxt: &SignalEmitter<'_>, status: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn state_changed(
        ctxt: &SignalEmitter<'_>,
        name: &str,
        state: &str,
        emblem: &str,
    ) -> zbus::Result<()>;
}

/// Drains notifier events into D-Bus signals until every sender is gone.
pub async fn forward_notifications(
    mut rx: mpsc::UnboundedReceiver<NotifierEvent>,
    emitter: SignalEmitter<'static>,
    status: Arc<RwLock<String>>,
) {
    while let Some(event) = rx.recv().await {
        let result = match event {
            NotifierEvent::Synchronizing => {
                *status.write().await = STATUS_SYNCHRONIZING.to_string();
                SyncDbusService::status_changed(&emitter, STATUS_SYNCHRONIZING).await
            }
            NotifierEvent::Idle => {
                *status.write().await = STATUS_IDLE.to_string();
                SyncDbusService::status_changed(&emitter, STATUS_IDLE).await
            }
            NotifierEvent::PathChanged { name, state } => {
                let label = state.map(SyncState::as_str).unwrap_or("untracked");
                SyncDbusService::state_changed(&emitter, &name, label, emblem_for(state)).await
            }
        };
        if let Err(err) = result {
            debug!(error = %err, "failed to emit D-Bus signal");
        }
    }
}
