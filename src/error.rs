use shelf::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum GifError {
    /// The store could not be opened or migrated. Fatal for the window.
    #[error("gif store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("no gif with id {0}")]
    NotFound(String),
    #[error("transaction failed")]
    TransactionFailed(#[source] StoreError),
    #[error("failed to fetch from {feed}")]
    FeedFetchFailed {
        feed: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("no gifs available from the enabled feeds")]
    EmptyPool,
    #[error("failed to sync favorites with the cloud")]
    CloudSyncFailed(#[source] anyhow::Error),
    #[error("a gif with id {0} already exists")]
    Conflict(String),
    #[error("{0}")]
    InvalidSetting(String),
    #[error("invalid feed registration: {0}")]
    InvalidFeed(String),
}

pub type Result<T> = std::result::Result<T, GifError>;

impl From<StoreError> for GifError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => GifError::StoreUnavailable(msg),
            StoreError::NotFound(id) => GifError::NotFound(id),
            StoreError::Conflict(id) => GifError::Conflict(id),
            other => GifError::TransactionFailed(other),
        }
    }
}
