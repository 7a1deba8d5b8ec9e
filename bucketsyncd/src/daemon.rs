use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bucketsync_core::BucketClient;
use bucketsync_integrations::ids::{DBUS_NAME_SYNC, DBUS_OBJECT_PATH_SYNC, STATUS_IDLE};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;
use zbus::connection::Builder as ConnectionBuilder;
use zbus::object_server::SignalEmitter;

use crate::dbus_api::{SyncDbusService, forward_notifications};
use crate::sync::backoff::Backoff;
use crate::sync::engine::{EngineConfig, SyncEngine};
use crate::sync::index::{StateStore, default_db_path};
use crate::sync::notifier::{DbusNotifier, LogNotifier, NotifierEvent, SyncNotifier};
use crate::sync::paths::ExclusionFilter;
use crate::sync::queue::TaskQueue;
use crate::sync::quiescence::{LocalActivity, QuiescenceDetector, start_notify_watcher};
use crate::sync::remote::BucketRemote;
use crate::sync::scheduler::{Scheduler, SchedulerConfig};

const DEFAULT_SYNC_DIR_NAME: &str = "Bucket Sync";
const DEFAULT_API_URL: &str = "https://api.bucketsync.invalid";
const DEFAULT_IDLE_SECS: u64 = 30;
const DEFAULT_QUIESCENCE_SECS: u64 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 3_000;
const DEFAULT_EXCLUDE: &str = ".~lock.*#,~$*,*.swp,*.tmp";
const RETRY_AFTER_CAP: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub sync_root: PathBuf,
    pub bucket: String,
    pub api_url: Url,
    pub token: String,
    pub db_path: PathBuf,
    pub idle_interval: Duration,
    pub quiescence_window: Duration,
    pub retry_delay: Duration,
    pub retry_limit: u32,
    pub workers: usize,
    pub exclude: Vec<String>,
    pub enable_watcher: bool,
    pub enable_dbus: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Self::from_lookup_with_home(lookup, &home)
    }

    fn from_lookup_with_home<F>(lookup: F, home: &Path) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sync_root = lookup("BUCKETSYNC_SYNC_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| home.join(DEFAULT_SYNC_DIR_NAME));
        let bucket = lookup("BUCKETSYNC_BUCKET")
            .filter(|value| !value.trim().is_empty())
            .context("BUCKETSYNC_BUCKET is not set")?;
        let token = lookup("BUCKETSYNC_TOKEN")
            .filter(|value| !value.trim().is_empty())
            .context("BUCKETSYNC_TOKEN is not set")?;
        let api_url = lookup("BUCKETSYNC_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url =
            Url::parse(&api_url).with_context(|| format!("invalid BUCKETSYNC_API_URL: {api_url}"))?;
        let db_path = match lookup("BUCKETSYNC_DB_PATH") {
            Some(value) => expand_with_home(&value, home),
            None => default_db_path().context("failed to resolve state database path")?,
        };
        let idle_interval = Duration::from_secs(read_u64_env(
            &lookup,
            "BUCKETSYNC_IDLE_SECS",
            DEFAULT_IDLE_SECS,
        ));
        let quiescence_window = Duration::from_secs(read_u64_env(
            &lookup,
            "BUCKETSYNC_QUIESCENCE_SECS",
            DEFAULT_QUIESCENCE_SECS,
        ));
        let retry_delay = Duration::from_millis(read_u64_env(
            &lookup,
            "BUCKETSYNC_RETRY_DELAY_MS",
            DEFAULT_RETRY_DELAY_MS,
        ));
        let retry_limit = read_u64_env(&lookup, "BUCKETSYNC_RETRY_LIMIT", 0).min(u32::MAX as u64) as u32;
        let workers = read_u64_env(&lookup, "BUCKETSYNC_WORKERS", default_workers() as u64) as usize;
        let exclude = split_patterns(
            &lookup("BUCKETSYNC_EXCLUDE").unwrap_or_else(|| DEFAULT_EXCLUDE.to_string()),
        );
        let enable_watcher = read_bool_env(&lookup, "BUCKETSYNC_ENABLE_WATCHER", true);
        let enable_dbus = read_bool_env(&lookup, "BUCKETSYNC_ENABLE_DBUS", true);

        Ok(Self {
            sync_root,
            bucket,
            api_url,
            token,
            db_path,
            idle_interval,
            quiescence_window,
            retry_delay,
            retry_limit,
            workers,
            exclude,
            enable_watcher,
            enable_dbus,
        })
    }

    fn backoff(&self) -> Backoff {
        Backoff::fixed(self.retry_delay)
            .with_limit(self.retry_limit)
            .with_max(RETRY_AFTER_CAP)
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    store: StateStore,
    engine: Arc<SyncEngine>,
    queue: Arc<TaskQueue>,
    activity: LocalActivity,
    notifications: Option<mpsc::UnboundedReceiver<NotifierEvent>>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.sync_root)
            .await
            .with_context(|| format!("failed to create sync root at {:?}", config.sync_root))?;

        let client = BucketClient::with_base_url(config.api_url.as_str(), config.token.clone())
            .context("failed to create bucket client")?;
        let (notifier, notifications): (Arc<dyn SyncNotifier>, _) = if config.enable_dbus {
            let (notifier, rx) = DbusNotifier::new();
            (Arc::new(notifier), Some(rx))
        } else {
            (Arc::new(LogNotifier), None)
        };
        let store = StateStore::open(&config.db_path, Arc::clone(&notifier))
            .await
            .with_context(|| format!("failed to open state store at {:?}", config.db_path))?;
        let filter = ExclusionFilter::new(config.exclude.as_slice()).context("invalid exclude pattern")?;

        let queue = Arc::new(TaskQueue::new());
        let activity = LocalActivity::default();
        let engine = Arc::new(SyncEngine::new(
            EngineConfig {
                bucket: config.bucket.clone(),
                sync_root: config.sync_root.clone(),
                filter,
                backoff: config.backoff(),
            },
            store.clone(),
            Arc::new(BucketRemote::new(client)),
            notifier,
            Arc::clone(&queue),
            activity.clone(),
        ));

        Ok(Self {
            config,
            store,
            engine,
            queue,
            activity,
            notifications,
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            sync_root = %self.config.sync_root.display(),
            bucket = %self.config.bucket,
            workers = self.config.workers,
            watcher = self.config.enable_watcher,
            dbus = self.config.enable_dbus,
            "started"
        );

        let cancel = CancellationToken::new();
        let signal_handle = match self.notifications.take() {
            Some(rx) => Some(self.start_dbus(rx).await?),
            None => None,
        };

        let scheduler = Scheduler::new(
            Arc::clone(&self.queue),
            SchedulerConfig {
                workers: self.config.workers,
                idle: self.config.idle_interval,
            },
            cancel.clone(),
        );
        let handle = scheduler.handle();
        handle.request_reconcile();
        let dispatcher = tokio::spawn(scheduler.run(Arc::clone(&self.engine)));

        let (watcher, detector_handle) = if self.config.enable_watcher {
            match start_notify_watcher(&self.config.sync_root) {
                Ok((watcher, rx)) => {
                    let detector = QuiescenceDetector::new(
                        self.config.quiescence_window,
                        self.activity.clone(),
                    );
                    let detector_handle =
                        tokio::spawn(detector.run(rx, handle.clone(), cancel.clone()));
                    (Some(watcher), Some(detector_handle))
                }
                Err(err) => {
                    warn!(error = %err, "failed to start local watcher");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        info!("shutting down");

        cancel.cancel();
        drop(watcher);
        if let Err(err) = dispatcher.await {
            warn!(error = %err, "dispatcher task failed");
        }
        if let Some(handle) = detector_handle
            && let Err(err) = handle.await
        {
            warn!(error = %err, "quiescence detector task failed");
        }
        if let Some(handle) = signal_handle {
            handle.abort();
        }
        self.store
            .close()
            .await
            .context("failed to close state store")?;
        info!("stopped");
        Ok(())
    }

    async fn start_dbus(
        &self,
        rx: mpsc::UnboundedReceiver<NotifierEvent>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let status = Arc::new(RwLock::new(STATUS_IDLE.to_string()));
        let connection = ConnectionBuilder::session()?
            .name(DBUS_NAME_SYNC)?
            .serve_at(
                DBUS_OBJECT_PATH_SYNC,
                SyncDbusService::new(self.store.clone(), Arc::clone(&status)),
            )?
            .build()
            .await
            .context("failed to start D-Bus object server")?;
        let emitter = SignalEmitter::new(&connection, DBUS_OBJECT_PATH_SYNC)
            .context("failed to create D-Bus signal emitter")?
            .into_owned();
        Ok(tokio::spawn(async move {
            let _connection = connection;
            forward_notifications(rx, emitter, status).await;
        }))
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
