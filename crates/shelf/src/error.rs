#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("no record with key {0}")]
    NotFound(String),
    #[error("a record with key {0} already exists")]
    Conflict(String),
    #[error("transaction failed: {cause}")]
    TransactionFailed {
        #[source]
        cause: Box<StoreError>,
    },
    #[error("unknown index {0}")]
    UnknownIndex(String),
    #[error("table {0} is not part of the schema")]
    UnknownTable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn aborted(cause: StoreError) -> Self {
        match cause {
            already @ StoreError::TransactionFailed { .. } => already,
            cause => StoreError::TransactionFailed {
                cause: Box::new(cause),
            },
        }
    }

    /// The innermost error of an aborted transaction, or `self`.
    pub fn root_cause(&self) -> &StoreError {
        match self {
            StoreError::TransactionFailed { cause } => cause.root_cause(),
            other => other,
        }
    }
}
