//! A small embedded table store.
//!
//! Rows live in JSONL shard files (`<table>/items_<shard>.jsonl`), one row per
//! line, sorted by primary key. Every table keeps its secondary indices in
//! memory and rebuilds them on load. Writes go through [`Table::run_transaction`],
//! which is serialized per table and only publishes a batch after every
//! touched shard has been written to disk.

mod blob;
mod database;
mod error;
mod index;
mod schema;
mod table;

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

pub use database::Database;
pub use error::{Result, StoreError};
pub use index::{IndexKey, IndexValue, KeyRange};
pub use schema::{Schema, TableSchema};
pub use table::{Table, Write};

pub trait TableRow: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE_NAME: &'static str;
    const SHARD_CHARACTERS: usize;

    /// Primary key. Must be stable for the lifetime of the row.
    fn key(&self) -> String;
}

pub fn hash_id(raw: &str, id_length: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..id_length.min(hex.len())].to_string()
}

pub(crate) fn shard_of<T: TableRow>(key: &str) -> String {
    hash_id(key, T::SHARD_CHARACTERS)
}

/// Write `bytes` next to `path` and rename it into place.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = staging_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

pub(crate) fn staging_path(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|f| f.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
