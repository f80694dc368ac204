pub mod giphy;
pub mod imgur;
pub mod reddit;
pub mod replygif;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::info;

use crate::config::Endpoints;
use crate::error::{GifError, Result};
use crate::gif::{Gif, ID_SEPARATOR};
use crate::store::GifStore;

/// One external gif source.
pub trait Feed: Send + Sync {
    /// Settings key and the `feed` field of every record it produces.
    fn name(&self) -> &'static str;
    /// Prepended to native ids; unique across feeds.
    fn prefix(&self) -> &'static str;
    /// Map one raw item to a record, or `None` to drop it.
    fn normalize(&self, raw: &Value) -> Option<Gif>;
    /// Up to `max` normalized records.
    fn fetch(&self, max: usize) -> BoxFuture<'_, anyhow::Result<Vec<Gif>>>;
    /// Records for the given native ids. Ids the source can't resolve are
    /// left out.
    fn get<'a>(&'a self, native_ids: &'a [String]) -> BoxFuture<'a, anyhow::Result<Vec<Gif>>>;
}

/// Fetch up to `max` gifs from `feed`, insert the ones not stored yet, and
/// return the whole batch.
pub async fn load(feed: &dyn Feed, store: &GifStore, max: usize) -> Result<Vec<Gif>> {
    let mut gifs = feed
        .fetch(max)
        .await
        .map_err(|source| GifError::FeedFetchFailed {
            feed: feed.name().to_string(),
            source,
        })?;
    gifs.truncate(max);
    let added = store.add_gifs(gifs.clone()).await?;
    info!("loaded {} gifs from {} ({} new)", gifs.len(), feed.name(), added.len());
    Ok(gifs)
}

/// The feeds a window knows about, keyed by prefix.
#[derive(Clone, Default)]
pub struct FeedRegistry {
    feeds: BTreeMap<&'static str, Arc<dyn Feed>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// giphy, imgur, reddit and replygif against `endpoints`.
    pub fn with_defaults(client: reqwest::Client, endpoints: &Endpoints) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(giphy::Giphy::new(
            client.clone(),
            &endpoints.giphy,
            &endpoints.giphy_api_key,
        )))?;
        registry.register(Arc::new(imgur::Imgur::new(
            client.clone(),
            &endpoints.imgur,
            &endpoints.imgur_client_id,
        )))?;
        registry.register(Arc::new(reddit::Reddit::new(client.clone(), &endpoints.reddit)))?;
        registry.register(Arc::new(replygif::ReplyGif::new(
            client,
            &endpoints.replygif,
            &endpoints.replygif_api_key,
        )))?;
        Ok(registry)
    }

    pub fn register(&mut self, feed: Arc<dyn Feed>) -> Result<()> {
        let prefix = feed.prefix();
        if prefix.is_empty() || prefix.contains(ID_SEPARATOR) {
            return Err(GifError::InvalidFeed(format!(
                "{} has an unusable prefix {:?}",
                feed.name(),
                prefix
            )));
        }
        if let Some(existing) = self.feeds.get(prefix) {
            return Err(GifError::InvalidFeed(format!(
                "{} and {} share the prefix {:?}",
                existing.name(),
                feed.name(),
                prefix
            )));
        }
        if self.feeds.values().any(|f| f.name() == feed.name()) {
            return Err(GifError::InvalidFeed(format!(
                "{} is already registered",
                feed.name()
            )));
        }
        self.feeds.insert(prefix, feed);
        Ok(())
    }

    pub fn by_prefix(&self, prefix: &str) -> Option<&Arc<dyn Feed>> {
        self.feeds.get(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Feed>> {
        self.feeds.values()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.feeds.values().map(|f| f.name()).collect()
    }
}

/// A non-empty string at `pointer`.
pub(crate) fn text<'a>(raw: &'a Value, pointer: &str) -> Option<&'a str> {
    raw.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
