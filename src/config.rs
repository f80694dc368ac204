use std::path::PathBuf;
use std::time::Duration;

/// Overrides the store location.
pub const STORE_ENV: &str = "GIFTAB_STORE";

pub const SCHEMA_VERSION: u32 = 1;
/// Most records allowed to carry a history marker at once.
pub const HISTORY_WINDOW: usize = 20;
pub const MAX_PER_FEED: usize = 200;
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
pub const MAX_PICK_ATTEMPTS: usize = 20;
pub const MAX_REJECTIONS: usize = 10;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub store_dir: PathBuf,
    pub schema_version: u32,
    pub history_window: usize,
    pub max_per_feed: usize,
    pub refresh_interval: Duration,
    pub max_pick_attempts: usize,
    pub max_rejections: usize,
    pub endpoints: Endpoints,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            schema_version: SCHEMA_VERSION,
            history_window: HISTORY_WINDOW,
            max_per_feed: MAX_PER_FEED,
            refresh_interval: REFRESH_INTERVAL,
            max_pick_attempts: MAX_PICK_ATTEMPTS,
            max_rejections: MAX_REJECTIONS,
            endpoints: Endpoints::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_store_dir(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            ..Default::default()
        }
    }

    pub(crate) fn refresh_interval_ms(&self) -> i64 {
        i64::try_from(self.refresh_interval.as_millis()).unwrap_or(i64::MAX)
    }
}

pub fn default_store_dir() -> PathBuf {
    std::env::var(STORE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_dir()
                .map(|d| d.join("giftab"))
                .unwrap_or_else(|| PathBuf::from("."))
        })
}

/// Where each source lives. Tests point these at a mock server.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub giphy: String,
    pub giphy_api_key: String,
    pub reddit: String,
    pub imgur: String,
    pub imgur_client_id: String,
    pub replygif: String,
    pub replygif_api_key: String,
}

fn env_or_empty(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            giphy: "https://api.giphy.com".to_string(),
            giphy_api_key: env_or_empty("GIFTAB_GIPHY_KEY"),
            reddit: "https://www.reddit.com".to_string(),
            imgur: "https://api.imgur.com/3".to_string(),
            imgur_client_id: env_or_empty("GIFTAB_IMGUR_CLIENT_ID"),
            replygif: "http://replygif.net/api".to_string(),
            replygif_api_key: env_or_empty("GIFTAB_REPLYGIF_KEY"),
        }
    }
}

impl Endpoints {
    /// Every source rooted at `base`, e.g. a local mock server.
    pub fn all_at(base: &str) -> Self {
        Self {
            giphy: base.to_string(),
            reddit: base.to_string(),
            imgur: base.to_string(),
            replygif: base.to_string(),
            ..Default::default()
        }
    }
}
