//! Favorites, kept in step with the cloud copy.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use shelf::Write;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::bus::Event;
use crate::cloud::{CloudFavorites, CloudMap};
use crate::error::{GifError, Result};
use crate::gif::{Gif, now_ms};
use crate::store::{GifStore, Marker};

/// What a sync changed locally.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    /// Favorited here but gone from the cloud.
    pub demoted: Vec<String>,
    /// Stored here and favorited in the cloud.
    pub promoted: Vec<String>,
    /// Not stored here; looked up at the source and inserted.
    pub fetched: Vec<String>,
    /// In the cloud but no source could resolve them.
    pub unresolved: Vec<String>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.demoted.is_empty() && self.promoted.is_empty() && self.fetched.is_empty()
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: GifStore,
    aggregator: Aggregator,
    cloud: Arc<dyn CloudFavorites>,
}

impl Reconciler {
    pub fn new(store: GifStore, aggregator: Aggregator, cloud: Arc<dyn CloudFavorites>) -> Self {
        Self {
            store,
            aggregator,
            cloud,
        }
    }

    /// Favorite `gif` locally and mirror it to the cloud. A cloud failure
    /// is logged; the local favorite stands.
    pub async fn add_to_favorites(&self, gif: &Gif) -> Result<Gif> {
        let now = now_ms();
        let favorited = self.store.set_marker(gif, Marker::Favorited, now).await?;
        self.store.bus().send(Event::FavoritesUpdated, json!(favorited.id));

        let id = favorited.id.clone();
        let mirrored = self
            .mirror(move |favs| {
                if favs.contains_key(&id) {
                    return false;
                }
                favs.insert(id, now);
                true
            })
            .await;
        if let Err(e) = mirrored {
            warn!("favorite {} kept locally only: {}", favorited.id, e);
        }
        Ok(favorited)
    }

    pub async fn remove_favorite(&self, gif: &Gif) -> Result<Gif> {
        let cleared = self.store.set_marker(gif, Marker::Favorited, 0).await?;
        self.store.bus().send(Event::FavoritesUpdated, json!(cleared.id));

        let id = cleared.id.clone();
        if let Err(e) = self.mirror(move |favs| favs.remove(&id).is_some()).await {
            warn!("unfavorite of {} kept locally only: {}", cleared.id, e);
        }
        Ok(cleared)
    }

    async fn mirror<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut CloudMap) -> bool,
    {
        let mut favorites = self.cloud.load().await.map_err(GifError::CloudSyncFailed)?;
        if edit(&mut favorites) {
            self.cloud
                .store(&favorites)
                .await
                .map_err(GifError::CloudSyncFailed)?;
        }
        Ok(())
    }

    /// Make local favorites match the cloud. The cloud wins both ways:
    /// local favorites missing there are cleared, and cloud favorites
    /// missing here are looked up at their source and inserted.
    pub async fn sync_favorites(&self) -> Result<SyncReport> {
        let cloud = self.cloud.load().await.map_err(GifError::CloudSyncFailed)?;
        let local: HashMap<String, Gif> = self
            .store
            .favorites()
            .await?
            .into_iter()
            .map(|g| (g.id.clone(), g))
            .collect();
        let mut report = SyncReport::default();
        let mut writes = Vec::new();

        for (id, gif) in &local {
            if !cloud.contains_key(id) {
                let mut demoted = gif.clone();
                demoted.favorited = 0;
                writes.push(Write::Put(demoted));
                report.demoted.push(id.clone());
            }
        }

        let mut missing = Vec::new();
        for (id, &timestamp) in &cloud {
            if local.contains_key(id) {
                continue;
            }
            match self.store.get(id).await {
                Ok(mut gif) => {
                    gif.favorited = timestamp.max(1);
                    writes.push(Write::Put(gif));
                    report.promoted.push(id.clone());
                }
                Err(GifError::NotFound(_)) => missing.push(id.clone()),
                Err(e) => return Err(e),
            }
        }
        self.store.run_transaction(writes).await?;

        if !missing.is_empty() {
            debug!("fetching {} favorites from their feeds", missing.len());
            let mut fetched = self.aggregator.get(&missing).await;
            for gif in &mut fetched {
                gif.favorited = cloud.get(&gif.id).copied().unwrap_or(1).max(1);
            }
            let added = self.store.add_gifs(fetched).await?;
            report.fetched = added.into_iter().map(|g| g.id).collect();
            report.unresolved = missing
                .into_iter()
                .filter(|id| !report.fetched.contains(id))
                .collect();
        }

        report.demoted.sort();
        if !report.is_empty() {
            self.store.bus().send(Event::FavoritesUpdated, serde_json::Value::Null);
        }
        info!(
            "favorites synced: {} demoted, {} promoted, {} fetched, {} unresolved",
            report.demoted.len(),
            report.promoted.len(),
            report.fetched.len(),
            report.unresolved.len()
        );
        Ok(report)
    }
}
