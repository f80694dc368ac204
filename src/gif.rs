use serde::{Deserialize, Serialize};
use shelf::{Schema, TableRow};

/// Separates a feed's prefix from the source's native id, e.g. `r-t3_abc`.
pub const ID_SEPARATOR: char = '-';

/// Index names, matching the serialized field names they cover.
pub mod index {
    pub const FEED: &str = "feed";
    pub const FAVORITED: &str = "favorited";
    pub const HISTORY: &str = "history";
    pub const ADDED_ON: &str = "addedOn";
    pub const ID_HISTORY: &str = "id, history";
    pub const ID_FAVORITED: &str = "id, favorited";
    pub const FAVORITED_HISTORY: &str = "favorited, history";
    pub const FEED_FAVORITED_HISTORY: &str = "feed, favorited, history";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gif {
    pub id: String,
    pub url: String,
    pub thumb_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    pub feed: String,
    #[serde(default)]
    pub added_on: i64,
    /// 0, or when the gif was last viewed (ms since epoch).
    #[serde(default)]
    pub history: i64,
    /// 0, or when the gif was favorited (ms since epoch).
    #[serde(default)]
    pub favorited: i64,
}

impl TableRow for Gif {
    const TABLE_NAME: &'static str = "gifs";
    const SHARD_CHARACTERS: usize = 1;

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Gif {
    pub fn new(prefix: &str, native_id: &str, feed: &str, url: &str) -> Self {
        Self {
            id: gif_id(prefix, native_id),
            url: url.to_string(),
            thumb_url: url.to_string(),
            title: String::new(),
            description: None,
            sources: Vec::new(),
            feed: feed.to_string(),
            added_on: 0,
            history: 0,
            favorited: 0,
        }
    }

    /// Neither viewed nor favorited; dropped on the next refresh.
    pub fn is_transient(&self) -> bool {
        self.history == 0 && self.favorited == 0
    }
}

pub fn gif_id(prefix: &str, native_id: &str) -> String {
    format!("{prefix}{ID_SEPARATOR}{native_id}")
}

/// Split an id into `(prefix, native id)` at the first separator.
pub fn split_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(ID_SEPARATOR)
        .filter(|(prefix, _)| !prefix.is_empty())
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn migrate(schema: &mut Schema, old_version: u32) -> shelf::Result<()> {
    if old_version < 1 {
        schema
            .create_table(Gif::TABLE_NAME)
            .create_index(index::FEED, &["feed"])
            .create_index(index::FAVORITED, &["favorited"])
            .create_index(index::HISTORY, &["history"])
            .create_index(index::ADDED_ON, &["addedOn"])
            .create_index(index::ID_HISTORY, &["id", "history"])
            .create_index(index::ID_FAVORITED, &["id", "favorited"])
            .create_index(index::FAVORITED_HISTORY, &["favorited", "history"])
            .create_index(
                index::FEED_FAVORITED_HISTORY,
                &["feed", "favorited", "history"],
            );
    }
    Ok(())
}
