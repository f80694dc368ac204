use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Result, write_atomic};

const BLOB_DIR: &str = "blobs";

fn blob_path(root: &Path, name: &str) -> PathBuf {
    root.join(BLOB_DIR).join(format!("{name}.json"))
}

pub(crate) async fn read<T: DeserializeOwned>(root: &Path, name: &str) -> Result<Option<T>> {
    match tokio::fs::read(blob_path(root, name)).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn write<T: Serialize>(root: &Path, name: &str, value: &T) -> Result<()> {
    let path = blob_path(root, name);
    tokio::fs::create_dir_all(root.join(BLOB_DIR)).await?;
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(&path, &bytes).await?;
    Ok(())
}
