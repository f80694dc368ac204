//! Which records survive a refresh, and how long history is kept.

use serde_json::json;
use shelf::Write;
use tracing::{debug, info};

use crate::aggregator::Aggregator;
use crate::bus::Event;
use crate::error::Result;
use crate::gif::{Gif, now_ms};
use crate::settings::SettingsHandle;
use crate::store::{GifStore, Marker};

#[derive(Clone)]
pub struct Retention {
    store: GifStore,
    settings: SettingsHandle,
    aggregator: Aggregator,
    history_window: usize,
    refresh_interval_ms: i64,
}

impl Retention {
    pub fn new(
        store: GifStore,
        settings: SettingsHandle,
        aggregator: Aggregator,
        history_window: usize,
        refresh_interval_ms: i64,
    ) -> Self {
        Self {
            store,
            settings,
            aggregator,
            history_window,
            refresh_interval_ms,
        }
    }

    /// Replace the transient part of the pool with fresh gifs. Without
    /// `force` this only happens once the pool runs low or the last pull
    /// is older than the refresh interval.
    pub async fn load_new_gifs(&self, force: bool) -> Result<Vec<Gif>> {
        let now = now_ms();
        let since_update = now - self.settings.get().await.last_feed_update;
        let pool_size = self.store.count().await;
        debug!("pool has {} gifs, last pull {}ms ago", pool_size, since_update);
        if !force && pool_size > self.history_window && since_update < self.refresh_interval_ms {
            return Ok(Vec::new());
        }

        self.settings.set_last_feed_update(now).await?;
        let cleared = self.clear_feed_gifs().await?;
        info!("refreshing pool, cleared {} transient gifs", cleared);
        self.aggregator.load_all().await
    }

    /// Delete every record that is neither viewed nor favorited.
    pub async fn clear_feed_gifs(&self) -> Result<usize> {
        self.store.delete_transient(None).await
    }

    /// Delete the transient records of one feed.
    pub async fn remove_gifs_by_feed(&self, feed: &str) -> Result<usize> {
        self.store.delete_transient(Some(feed)).await
    }

    /// Mark `gif` as the latest view, then trim history back to the window.
    pub async fn add_to_history(&self, gif: &Gif) -> Result<Gif> {
        // Strictly after the newest entry, so view order survives same-ms calls.
        let newest = self
            .store
            .history()
            .await?
            .first()
            .map(|g| g.history)
            .unwrap_or(0);
        let stamp = now_ms().max(newest + 1);
        let viewed = self.store.set_marker(gif, Marker::History, stamp).await?;
        self.trim_history().await?;
        self.store.bus().send(Event::HistoryUpdated, json!(viewed.id));
        Ok(viewed)
    }

    /// The newest `history_window` viewed records. Anything older loses
    /// its history marker on the way.
    pub async fn get_history(&self) -> Result<Vec<Gif>> {
        let (history, trimmed) = self.trim_history().await?;
        if trimmed {
            self.store.bus().send(Event::HistoryUpdated, serde_json::Value::Null);
        }
        Ok(history)
    }

    /// Demote everything past the window. Reports whether anything changed.
    async fn trim_history(&self) -> Result<(Vec<Gif>, bool)> {
        let mut history = self.store.history().await?;
        if history.len() <= self.history_window {
            return Ok((history, false));
        }
        let expired = history.split_off(self.history_window);
        debug!("dropping {} gifs from history", expired.len());
        let writes = expired
            .into_iter()
            .map(|mut gif| {
                gif.history = 0;
                Write::Put(gif)
            })
            .collect();
        self.store.run_transaction(writes).await?;
        Ok((history, true))
    }
}
