use std::sync::Arc;

use futures_util::future::join_all;
use itertools::Itertools;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{GifError, Result};
use crate::feed::{self, Feed, FeedRegistry};
use crate::gif::{Gif, split_id};
use crate::settings::SettingsHandle;
use crate::store::GifStore;

/// Fans loads and lookups out over the enabled feeds.
#[derive(Clone)]
pub struct Aggregator {
    registry: FeedRegistry,
    store: GifStore,
    settings: SettingsHandle,
    max_per_feed: usize,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Aggregator {
    pub fn new(
        registry: FeedRegistry,
        store: GifStore,
        settings: SettingsHandle,
        max_per_feed: usize,
    ) -> Self {
        Self {
            registry,
            store,
            settings,
            max_per_feed,
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn registry(&self) -> &FeedRegistry {
        &self.registry
    }

    /// Start a load on every enabled feed and resolve with the first batch
    /// to succeed. The others keep running and insert when they finish.
    pub async fn load_all(&self) -> Result<Vec<Gif>> {
        let settings = self.settings.get().await;
        let enabled: Vec<Arc<dyn Feed>> = self
            .registry
            .iter()
            .filter(|f| settings.is_enabled(f.name()))
            .cloned()
            .collect();
        if enabled.is_empty() {
            warn!("no feeds enabled, nothing to load");
            return Ok(Vec::new());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.retain(|task| !task.is_finished());
            for feed in enabled {
                let tx = tx.clone();
                let store = self.store.clone();
                let max = self.max_per_feed;
                in_flight.push(tokio::spawn(async move {
                    let result = feed::load(feed.as_ref(), &store, max).await;
                    if let Err(e) = &result {
                        warn!("loading {} failed: {}", feed.name(), e);
                    }
                    let _ = tx.send(result);
                }));
            }
        }
        drop(tx);

        let mut last_error = None;
        while let Some(result) = rx.recv().await {
            match result {
                Ok(gifs) => return Ok(gifs),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| GifError::FeedFetchFailed {
            feed: "all".to_string(),
            source: anyhow::anyhow!("every feed load was aborted"),
        }))
    }

    /// Wait for loads still running after `load_all` resolved.
    pub async fn settle(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.in_flight.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!("feed load task ended abnormally: {}", e);
            }
        }
    }

    /// Look records up by id at their sources. Ids with an unknown prefix
    /// and lookups that fail are left out.
    pub async fn get(&self, ids: &[String]) -> Vec<Gif> {
        let groups = ids
            .iter()
            .unique()
            .filter_map(|id| match split_id(id) {
                Some((prefix, native)) if self.registry.by_prefix(prefix).is_some() => {
                    Some((prefix, native.to_string()))
                }
                _ => {
                    warn!("gif {} does not have a known feed prefix", id);
                    None
                }
            })
            .into_group_map();

        let lookups = groups.into_iter().filter_map(|(prefix, natives)| {
            let feed = self.registry.by_prefix(prefix)?;
            Some(async move {
                match feed.get(&natives).await {
                    Ok(gifs) => gifs,
                    Err(e) => {
                        warn!("lookup on {} failed: {:#}", feed.name(), e);
                        Vec::new()
                    }
                }
            })
        });
        let gifs: Vec<Gif> = join_all(lookups).await.into_iter().flatten().collect();
        info!("resolved {} of {} ids", gifs.len(), ids.len());
        gifs
    }
}
