use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::schema::Schema;
use crate::table::Table;
use crate::{Result, StoreError, TableRow, blob, write_atomic};

const SCHEMA_FILE: &str = "schema.json";

/// Handle to an opened store directory.
#[derive(Clone)]
pub struct Database {
    root: PathBuf,
    schema: Arc<Schema>,
}

fn unavailable(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("{context}: {e}"))
}

impl Database {
    /// Open (or create) the store at `root`.
    ///
    /// When the persisted schema is older than `version`, `upgrade` runs with
    /// the old version number and the result is persisted before any table is
    /// opened. Opening a store that is newer than `version` fails.
    pub async fn open<F>(root: &Path, version: u32, upgrade: F) -> Result<Self>
    where
        F: FnOnce(&mut Schema, u32) -> Result<()>,
    {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| unavailable(&format!("failed to create {}", root.display()), e))?;

        let schema_path = root.join(SCHEMA_FILE);
        let mut schema: Schema = match tokio::fs::read(&schema_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| unavailable("corrupted schema file", e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Schema::default(),
            Err(e) => return Err(unavailable("failed to read schema file", e)),
        };

        if schema.version > version {
            return Err(StoreError::Unavailable(format!(
                "store is at version {} but version {} was requested",
                schema.version, version
            )));
        }

        if schema.version < version {
            let old_version = schema.version;
            upgrade(&mut schema, old_version)
                .map_err(|e| unavailable(&format!("migration from version {old_version} failed"), e))?;
            schema.version = version;
            for name in schema.tables.keys() {
                tokio::fs::create_dir_all(root.join(name))
                    .await
                    .map_err(|e| unavailable(&format!("failed to create table {name}"), e))?;
            }
            let bytes = serde_json::to_vec_pretty(&schema)?;
            write_atomic(&schema_path, &bytes)
                .await
                .map_err(|e| unavailable("failed to write schema file", e))?;
            info!(
                "migrated store at {} from version {} to {}",
                root.display(),
                old_version,
                version
            );
        }

        Ok(Self {
            root: root.to_path_buf(),
            schema: Arc::new(schema),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Load a table declared by the schema.
    pub async fn table<T: TableRow>(&self) -> Result<Table<T>> {
        let table_schema = self
            .schema
            .table(T::TABLE_NAME)
            .ok_or_else(|| StoreError::UnknownTable(T::TABLE_NAME.to_string()))?;
        Table::open(self.root.join(T::TABLE_NAME), table_schema).await
    }

    pub async fn read_blob<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        blob::read(&self.root, name).await
    }

    pub async fn write_blob<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        blob::write(&self.root, name, value).await
    }
}
