//! Shared application state: one instance of every core service, built
//! once at `serve` startup and cloned (cheaply — every field is itself a
//! cloneable handle) into each request handler via `axum::extract::State`.

use anyhow::Result;
use mvault_core::config::VaultConfig;
use mvault_core::dedupe::Dedupe;
use mvault_core::differ::Differ;
use mvault_core::download::{Downloader, DownloaderConfig};
use mvault_core::events::Bus;
use mvault_core::hasher::Hasher;
use mvault_core::indexer::Indexer;
use mvault_core::queue::Queue;
use mvault_core::remote::RemoteBroker;
use mvault_core::resolver::AssetResolver;
use mvault_core::store::Store;
use mvault_core::worker::{Ctx, Worker, WorkerRoots};
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub config: VaultConfig,
    pub store: Store,
    pub bus: Bus,
    pub queue: Queue,
    pub indexer: Indexer,
    pub differ: Differ,
    pub hasher: Hasher,
    pub dedupe: Dedupe,
    pub downloader: Downloader,
    pub resolver: AssetResolver,
    pub remote: RemoteBroker,
    pub roots: WorkerRoots,
}

impl AppState {
    pub async fn build(config: VaultConfig) -> Result<Self> {
        let app_data_dir = mvault_core::config::app_data_dir(&config)?;
        let store = Store::open(&app_data_dir).await?;
        let bus = Bus::new();
        let queue = Queue::new(store.clone());
        let indexer = Indexer::new(store.clone());
        let differ = Differ::new(store.clone());
        let hasher = Hasher::new(store.clone(), config.hash_workers);
        let dedupe = Dedupe::new(store.clone(), hasher.clone());
        let roots = WorkerRoots { local: config.local_models_root.clone(), lake: config.lake_models_root.clone() };

        let downloader_config = DownloaderConfig {
            stall_timeout: Duration::from_secs(config.downloader_stall_timeout_seconds),
            connect_timeout: Duration::from_secs(config.downloader_connect_timeout_seconds),
            max_concurrent: config.downloader_max_concurrent,
            civitai_api_key: config.civitai_api_key.clone(),
            huggingface_api_key: config.huggingface_api_key.clone(),
        };
        let downloader = Downloader::new(store.clone(), bus.clone(), queue.clone(), downloader_config);
        let resolver = AssetResolver::new(store.clone(), config.remote_base_url.clone());
        let remote = RemoteBroker::new();

        Ok(AppState {
            config,
            store,
            bus,
            queue,
            indexer,
            differ,
            hasher,
            dedupe,
            downloader,
            resolver,
            remote,
            roots,
        })
    }

    /// Spawns the Worker loop and the Downloader's scheduler loop as
    /// background tasks, both stopped by the shared `shutdown` watch
    ///.
    pub fn spawn_background_loops(&self, shutdown: tokio::sync::watch::Receiver<bool>) {
        let ctx = Ctx {
            store: self.store.clone(),
            queue: self.queue.clone(),
            bus: self.bus.clone(),
            hasher: self.hasher.clone(),
            dedupe: self.dedupe.clone(),
            roots: self.roots.clone(),
            retry_count: self.config.queue_retry_count,
        };
        let worker = Worker::new(ctx);
        let worker_shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(worker_shutdown).await });

        let downloader = self.downloader.clone();
        tokio::spawn(async move { downloader.run_scheduler(shutdown).await });
    }
}
