use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::bus::{Bus, Envelope, Event, ExternalPort, NullPort};
use crate::cloud::{CloudFavorites, FileCloud};
use crate::config::EngineConfig;
use crate::error::{GifError, Result};
use crate::favorites::{Reconciler, SyncReport};
use crate::feed::FeedRegistry;
use crate::gif::Gif;
use crate::http::http_client;
use crate::retention::Retention;
use crate::selection::Selector;
use crate::settings::{Settings, SettingsHandle};
use crate::store::GifStore;

/// One window's view of the shared gif pool.
pub struct GifPool {
    config: EngineConfig,
    store: GifStore,
    settings: SettingsHandle,
    aggregator: Aggregator,
    retention: Retention,
    selector: Selector,
    reconciler: Reconciler,
    receiver: JoinHandle<()>,
}

impl GifPool {
    pub async fn open(
        config: EngineConfig,
        feeds: FeedRegistry,
        cloud: Arc<dyn CloudFavorites>,
        port: Arc<dyn ExternalPort>,
    ) -> Result<Self> {
        let bus = Bus::new(port);
        // Subscribe before anything can be posted.
        let remote = bus.subscribe_remote();
        let store = GifStore::open(&config.store_dir, config.schema_version, bus.clone()).await?;
        let settings = SettingsHandle::load(
            store.database().clone(),
            bus.clone(),
            Settings::with_feeds(feeds.names()),
        )
        .await?;
        let aggregator = Aggregator::new(
            feeds,
            store.clone(),
            settings.clone(),
            config.max_per_feed,
        );
        let retention = Retention::new(
            store.clone(),
            settings.clone(),
            aggregator.clone(),
            config.history_window,
            config.refresh_interval_ms(),
        );
        let selector = Selector::new(
            store.clone(),
            settings.clone(),
            config.max_pick_attempts,
            config.max_rejections,
        );
        let reconciler = Reconciler::new(store.clone(), aggregator.clone(), cloud);
        let receiver = tokio::spawn(receive(remote, bus, store.clone(), settings.clone()));
        info!("gif pool open at {}", config.store_dir.display());

        Ok(Self {
            config,
            store,
            settings,
            aggregator,
            retention,
            selector,
            reconciler,
            receiver,
        })
    }

    /// The stock feeds, a file-backed cloud next to the store, and no
    /// other windows.
    pub async fn open_default(config: EngineConfig) -> Result<Self> {
        let client = http_client().map_err(|e| GifError::InvalidFeed(e.to_string()))?;
        let feeds = FeedRegistry::with_defaults(client, &config.endpoints)?;
        let cloud = Arc::new(FileCloud::new(config.store_dir.join("sync").join("favorites.json")));
        Self::open(config, feeds, cloud, Arc::new(NullPort::new())).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &Bus {
        self.store.bus()
    }

    /// Call `handler` whenever `event` happens here or in another window.
    pub fn subscribe(&self, event: Event, handler: impl Fn(&Value) + Send + Sync + 'static) {
        self.bus().add_listener(event, handler);
    }

    pub async fn get(&self, id: &str) -> Result<Gif> {
        self.store.get(id).await
    }

    pub async fn count(&self) -> usize {
        self.store.count().await
    }

    pub async fn get_pool(&self) -> Result<Vec<Gif>> {
        self.store.pool().await
    }

    pub async fn get_favorites(&self) -> Result<Vec<Gif>> {
        self.store.favorites().await
    }

    pub async fn get_history(&self) -> Result<Vec<Gif>> {
        self.retention.get_history().await
    }

    pub async fn is_favorite(&self, id: &str) -> Result<bool> {
        self.store.is_favorite(id).await
    }

    pub async fn in_history(&self, id: &str) -> Result<bool> {
        self.store.in_history(id).await
    }

    pub async fn random(&self) -> Result<Gif> {
        self.selector.random().await
    }

    /// Mark a stored gif as just viewed.
    pub async fn add_to_history(&self, id: &str) -> Result<Gif> {
        let gif = self.store.get(id).await?;
        self.retention.add_to_history(&gif).await
    }

    pub async fn add_to_favorites(&self, id: &str) -> Result<Gif> {
        let gif = self.store.get(id).await?;
        self.reconciler.add_to_favorites(&gif).await
    }

    pub async fn remove_favorite(&self, id: &str) -> Result<Gif> {
        let gif = self.store.get(id).await?;
        self.reconciler.remove_favorite(&gif).await
    }

    /// Favorite a gif that may not be stored yet, e.g. one from
    /// [`GifPool::fetch_by_ids`].
    pub async fn favorite_gif(&self, gif: &Gif) -> Result<Gif> {
        self.reconciler.add_to_favorites(gif).await
    }

    pub async fn sync_favorites(&self) -> Result<SyncReport> {
        self.reconciler.sync_favorites().await
    }

    pub async fn load_new_gifs(&self, force: bool) -> Result<Vec<Gif>> {
        self.retention.load_new_gifs(force).await
    }

    pub async fn clear_feed_gifs(&self) -> Result<usize> {
        self.retention.clear_feed_gifs().await
    }

    pub async fn remove_gifs_by_feed(&self, feed: &str) -> Result<usize> {
        self.retention.remove_gifs_by_feed(feed).await
    }

    /// Look gifs up at their sources without storing them.
    pub async fn fetch_by_ids(&self, ids: &[String]) -> Vec<Gif> {
        self.aggregator.get(ids).await
    }

    pub async fn settings(&self) -> Settings {
        self.settings.get().await
    }

    pub async fn set_theme(&self, theme: &str) -> Result<()> {
        self.settings.set_theme(theme).await
    }

    /// Disabling drops the feed's transient gifs; enabling pulls fresh ones.
    pub async fn set_feed_enabled(&self, feed: &str, enabled: bool) -> Result<()> {
        self.settings.set_feed_enabled(feed, enabled).await?;
        if enabled {
            self.load_new_gifs(true).await?;
        } else {
            self.remove_gifs_by_feed(feed).await?;
        }
        Ok(())
    }

    /// Wait for feed loads still running in the background.
    pub async fn settle(&self) {
        self.aggregator.settle().await;
    }

    pub async fn shutdown(&self) {
        self.receiver.abort();
        self.settle().await;
        debug!("gif pool closed");
    }
}

impl Drop for GifPool {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

/// Apply other windows' changes to this window's caches, then tell local
/// listeners.
async fn receive(
    mut remote: broadcast::Receiver<Envelope>,
    bus: Bus,
    store: GifStore,
    settings: SettingsHandle,
) {
    loop {
        match remote.recv().await {
            Ok(envelope) => {
                if bus.is_own(&envelope) {
                    continue;
                }
                let refreshed = if envelope.event.touches_gifs() {
                    store.refresh().await
                } else {
                    settings.reload().await
                };
                if let Err(e) = refreshed {
                    warn!("failed to pick up remote {}: {}", envelope.event, e);
                }
                bus.dispatch(envelope.event, &envelope.payload);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("missed {} cross-window messages, reloading", skipped);
                if let Err(e) = store.refresh().await {
                    warn!("failed to refresh gifs: {}", e);
                }
                if let Err(e) = settings.reload().await {
                    warn!("failed to reload settings: {}", e);
                }
                let current = serde_json::to_value(settings.get().await).unwrap_or_default();
                bus.dispatch(Event::GifsUpdated, &Value::Null);
                bus.dispatch(Event::SettingsUpdated, &current);
                bus.dispatch(Event::ConfigUpdated, &Value::from("settings"));
            }
            Err(RecvError::Closed) => break,
        }
    }
}
