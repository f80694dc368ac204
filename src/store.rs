use std::path::Path;

use itertools::Itertools;
use serde_json::json;
use shelf::{Database, IndexValue, KeyRange, StoreError, Table, Write};
use tracing::{debug, info};

use crate::bus::{Bus, Event};
use crate::error::{GifError, Result};
use crate::gif::{Gif, index, migrate, now_ms};

/// Which marker a write touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Marker {
    History,
    Favorited,
}

/// The gif table plus the bus that announces changes to it.
#[derive(Clone)]
pub struct GifStore {
    db: Database,
    gifs: Table<Gif>,
    bus: Bus,
}

fn unavailable(e: StoreError) -> GifError {
    GifError::StoreUnavailable(e.to_string())
}

impl GifStore {
    pub async fn open(path: &Path, version: u32, bus: Bus) -> Result<Self> {
        let db = Database::open(path, version, migrate)
            .await
            .map_err(unavailable)?;
        let gifs = db.table::<Gif>().await.map_err(unavailable)?;
        info!("opened gif store at {} with {} gifs", path.display(), gifs.count().await);
        Ok(Self { db, gifs, bus })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Pick up commits made by other windows.
    pub async fn refresh(&self) -> Result<()> {
        Ok(self.gifs.refresh().await?)
    }

    pub async fn get(&self, id: &str) -> Result<Gif> {
        Ok(self.gifs.get(id).await?)
    }

    pub async fn count(&self) -> usize {
        self.gifs.count().await
    }

    /// Records in `index` within `range`, highest key first.
    pub async fn query(&self, index: &str, range: KeyRange) -> Result<Vec<Gif>> {
        Ok(self.gifs.query(index, range).await?)
    }

    /// Every record, newest first.
    pub async fn pool(&self) -> Result<Vec<Gif>> {
        self.query(index::ADDED_ON, KeyRange::All).await
    }

    /// Favorited records, most recently favorited first.
    pub async fn favorites(&self) -> Result<Vec<Gif>> {
        self.query(index::FAVORITED, KeyRange::at_least(1)).await
    }

    /// Viewed records, most recent first. Not trimmed to the history window.
    pub async fn history(&self) -> Result<Vec<Gif>> {
        self.query(index::HISTORY, KeyRange::at_least(1)).await
    }

    pub async fn is_favorite(&self, id: &str) -> Result<bool> {
        self.has_marker(index::ID_FAVORITED, id).await
    }

    pub async fn in_history(&self, id: &str) -> Result<bool> {
        self.has_marker(index::ID_HISTORY, id).await
    }

    async fn has_marker(&self, index: &str, id: &str) -> Result<bool> {
        let range = KeyRange::Bound(
            vec![id.into(), IndexValue::Int(1)],
            vec![id.into(), IndexValue::Int(i64::MAX)],
        );
        Ok(self.gifs.count_in(index, range).await? > 0)
    }

    /// Insert freshly fetched gifs. Ids already stored are left untouched;
    /// the rest are stamped with `addedOn` and a cleared history marker.
    /// Returns what was inserted.
    pub async fn add_gifs(&self, gifs: Vec<Gif>) -> Result<Vec<Gif>> {
        match self.insert_new(gifs.clone()).await {
            Err(GifError::TransactionFailed(e)) if matches!(e.root_cause(), StoreError::Conflict(_)) => {
                // Another window inserted some of these since our last refresh.
                debug!("retrying insert after conflict: {}", e.root_cause());
                self.gifs.refresh().await?;
                self.insert_new(gifs).await
            }
            other => other,
        }
    }

    async fn insert_new(&self, gifs: Vec<Gif>) -> Result<Vec<Gif>> {
        let now = now_ms();
        let mut added: Vec<Gif> = Vec::new();
        for mut gif in gifs {
            if self.gifs.contains(&gif.id).await || added.iter().any(|g| g.id == gif.id) {
                continue;
            }
            gif.added_on = now;
            gif.history = 0;
            added.push(gif);
        }
        if added.is_empty() {
            return Ok(added);
        }
        let writes = added.iter().cloned().map(Write::Add).collect();
        self.gifs.run_transaction(writes).await?;
        let feeds: Vec<&str> = added.iter().map(|g| g.feed.as_str()).unique().collect();
        debug!("added {} gifs", added.len());
        self.bus.send(Event::GifsUpdated, json!(feeds));
        Ok(added)
    }

    /// Set one marker on `gif`, starting from the stored record when there
    /// is one. Callers announce the change.
    pub(crate) async fn set_marker(&self, gif: &Gif, marker: Marker, value: i64) -> Result<Gif> {
        let mut row = match self.gifs.get(&gif.id).await {
            Ok(stored) => stored,
            Err(StoreError::NotFound(_)) => gif.clone(),
            Err(e) => return Err(e.into()),
        };
        match marker {
            Marker::History => row.history = value,
            Marker::Favorited => row.favorited = value,
        }
        self.gifs.put(row.clone()).await?;
        Ok(row)
    }

    pub(crate) async fn run_transaction(&self, writes: Vec<Write<Gif>>) -> Result<()> {
        Ok(self.gifs.run_transaction(writes).await?)
    }

    /// Delete records carrying neither marker, from one feed or all of them,
    /// and announce it when anything went.
    pub(crate) async fn delete_transient(&self, feed: Option<&str>) -> Result<usize> {
        let range = match feed {
            Some(feed) => KeyRange::only([feed.into(), IndexValue::Int(0), IndexValue::Int(0)]),
            None => KeyRange::only([IndexValue::Int(0), IndexValue::Int(0)]),
        };
        let by = match feed {
            Some(_) => index::FEED_FAVORITED_HISTORY,
            None => index::FAVORITED_HISTORY,
        };
        let doomed = self.gifs.query(by, range).await?;
        let writes: Vec<Write<Gif>> = doomed.into_iter().map(|g| Write::Delete(g.id)).collect();
        let deleted = writes.len();
        self.gifs.run_transaction(writes).await?;
        if deleted > 0 {
            info!("deleted {} transient gifs from {}", deleted, feed.unwrap_or("all feeds"));
            self.bus.send(Event::GifsUpdated, json!(feed));
        }
        Ok(deleted)
    }
}
