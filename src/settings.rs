use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use shelf::Database;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::bus::{Bus, Event};
use crate::error::{GifError, Result};

pub const DEFAULT_THEME: &str = "light_gray";
const BLOB_NAME: &str = "config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_theme")]
    pub theme: String,
    /// When feeds were last pulled (ms since epoch).
    #[serde(default)]
    pub last_feed_update: i64,
    /// Feed name to enabled flag.
    #[serde(flatten)]
    pub feeds: BTreeMap<String, bool>,
}

fn default_theme() -> String {
    DEFAULT_THEME.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_feeds(["giphy", "reddit", "replygif"])
    }
}

impl Settings {
    pub fn with_feeds<I, S>(feeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            theme: default_theme(),
            last_feed_update: 0,
            feeds: feeds.into_iter().map(|f| (f.into(), true)).collect(),
        }
    }

    /// Feeds absent from the map count as enabled.
    pub fn is_enabled(&self, feed: &str) -> bool {
        self.feeds.get(feed).copied().unwrap_or(true)
    }

    pub fn enabled_feeds(&self) -> impl Iterator<Item = &str> {
        self.feeds
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.as_str())
    }

    /// Stored values win; defaults fill whatever is missing.
    fn merged_over(mut self, defaults: &Settings) -> Self {
        for (feed, enabled) in &defaults.feeds {
            self.feeds.entry(feed.clone()).or_insert(*enabled);
        }
        self
    }
}

/// Shared, persisted settings for one window.
#[derive(Clone)]
pub struct SettingsHandle {
    db: Database,
    bus: Bus,
    defaults: Arc<Settings>,
    current: Arc<RwLock<Settings>>,
}

impl SettingsHandle {
    pub(crate) async fn load(db: Database, bus: Bus, defaults: Settings) -> Result<Self> {
        let current = read(&db, &defaults).await?;
        Ok(Self {
            db,
            bus,
            defaults: Arc::new(defaults),
            current: Arc::new(RwLock::new(current)),
        })
    }

    /// Re-read from the store after another window changed it.
    pub async fn reload(&self) -> Result<()> {
        let fresh = read(&self.db, &self.defaults).await?;
        *self.current.write().await = fresh;
        debug!("reloaded settings");
        Ok(())
    }

    pub async fn get(&self) -> Settings {
        self.current.read().await.clone()
    }

    pub async fn is_enabled(&self, feed: &str) -> bool {
        self.current.read().await.is_enabled(feed)
    }

    pub async fn set_theme(&self, theme: &str) -> Result<()> {
        let saved = self
            .update(|s| {
                s.theme = theme.to_string();
                Ok(())
            })
            .await?;
        self.announce_settings(&saved);
        Ok(())
    }

    /// Refuses to disable the last enabled feed.
    pub async fn set_feed_enabled(&self, feed: &str, enabled: bool) -> Result<()> {
        let saved = self
            .update(|s| {
                s.feeds.insert(feed.to_string(), enabled);
                if s.enabled_feeds().next().is_none() {
                    return Err(GifError::InvalidSetting(
                        "at least one feed must stay enabled".to_string(),
                    ));
                }
                Ok(())
            })
            .await?;
        info!("feed {} {}", feed, if enabled { "enabled" } else { "disabled" });
        self.announce_settings(&saved);
        Ok(())
    }

    pub(crate) async fn set_last_feed_update(&self, at: i64) -> Result<()> {
        self.update(|s| {
            s.last_feed_update = at;
            Ok(())
        })
        .await?;
        self.bus.send(Event::ConfigUpdated, json!("lastFeedUpdate"));
        Ok(())
    }

    async fn update<F>(&self, edit: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings) -> Result<()>,
    {
        let mut current = self.current.write().await;
        // Another window may have written since our last reload.
        let mut next = read(&self.db, &self.defaults).await?;
        edit(&mut next)?;
        self.db.write_blob(BLOB_NAME, &next).await?;
        *current = next.clone();
        Ok(next)
    }

    fn announce_settings(&self, saved: &Settings) {
        let payload = serde_json::to_value(saved).unwrap_or_default();
        self.bus.send(Event::SettingsUpdated, payload);
        self.bus.send(Event::ConfigUpdated, json!("settings"));
    }
}

async fn read(db: &Database, defaults: &Settings) -> Result<Settings> {
    let stored: Option<Settings> = db.read_blob(BLOB_NAME).await?;
    Ok(stored
        .map(|s| s.merged_over(defaults))
        .unwrap_or_else(|| defaults.clone()))
}
