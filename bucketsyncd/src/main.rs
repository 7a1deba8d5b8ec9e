use std::path::PathBuf;

use bucketsyncd::daemon::{DaemonConfig, DaemonRuntime};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Keeps a local directory and a storage bucket in two-way sync.
#[derive(Debug, Parser)]
#[command(name = "bucketsyncd", version)]
struct Cli {
    /// Local directory to synchronize.
    #[arg(long)]
    sync_dir: Option<PathBuf>,

    /// Bucket to synchronize with.
    #[arg(long)]
    bucket: Option<String>,

    /// Base URL of the bucket API.
    #[arg(long)]
    api_url: Option<String>,

    /// Path of the sync state database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Number of concurrent transfers.
    #[arg(long)]
    workers: Option<u64>,

    /// Do not watch the sync directory for local changes.
    #[arg(long)]
    no_watcher: bool,

    /// Do not publish the D-Bus status service.
    #[arg(long)]
    no_dbus: bool,
}

impl Cli {
    /// Value a flag supplies for a configuration variable, if any.
    fn override_for(&self, name: &str) -> Option<String> {
        match name {
            "BUCKETSYNC_SYNC_DIR" => self.sync_dir.as_ref().map(|p| p.display().to_string()),
            "BUCKETSYNC_BUCKET" => self.bucket.clone(),
            "BUCKETSYNC_API_URL" => self.api_url.clone(),
            "BUCKETSYNC_DB_PATH" => self.db_path.as_ref().map(|p| p.display().to_string()),
            "BUCKETSYNC_WORKERS" => self.workers.map(|workers| workers.to_string()),
            "BUCKETSYNC_ENABLE_WATCHER" => self.no_watcher.then(|| "false".to_string()),
            "BUCKETSYNC_ENABLE_DBUS" => self.no_dbus.then(|| "false".to_string()),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = DaemonConfig::from_lookup(|name| {
        cli.override_for(name)
            .or_else(|| std::env::var(name).ok())
    })?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    daemon.run().await
}
