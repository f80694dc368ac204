use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::index::{Index, KeyRange, extract_key};
use crate::schema::TableSchema;
use crate::{IndexKey, Result, StoreError, TableRow, shard_of, staging_path};

/// A single write inside a transaction.
#[derive(Debug, Clone)]
pub enum Write<T> {
    /// Insert or replace.
    Put(T),
    /// Insert; the transaction fails with `Conflict` if the key exists.
    Add(T),
    Delete(String),
}

impl<T: TableRow> Write<T> {
    fn key(&self) -> String {
        match self {
            Write::Put(row) | Write::Add(row) => row.key(),
            Write::Delete(key) => key.clone(),
        }
    }
}

struct TableState<T> {
    rows: HashMap<String, T>,
    /// Index keys per row, aligned with `indices`.
    row_keys: HashMap<String, Vec<Option<IndexKey>>>,
    indices: Vec<Index>,
}

impl<T: TableRow> TableState<T> {
    fn new(schema: &TableSchema) -> Self {
        Self {
            rows: HashMap::new(),
            row_keys: HashMap::new(),
            indices: schema
                .indices
                .iter()
                .map(|(name, key_path)| Index::new(name, key_path))
                .collect(),
        }
    }

    fn insert(&mut self, row: T) -> Result<()> {
        let key = row.key();
        self.remove(&key);
        let value = serde_json::to_value(&row)?;
        let keys: Vec<Option<IndexKey>> = self
            .indices
            .iter()
            .map(|index| extract_key(&value, &index.key_path))
            .collect();
        for (index, index_key) in self.indices.iter_mut().zip(&keys) {
            if let Some(index_key) = index_key {
                index.insert(index_key.clone(), &key);
            }
        }
        self.row_keys.insert(key.clone(), keys);
        self.rows.insert(key, row);
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        if self.rows.remove(key).is_none() {
            return;
        }
        if let Some(keys) = self.row_keys.remove(key) {
            for (index, index_key) in self.indices.iter_mut().zip(keys) {
                if let Some(index_key) = index_key {
                    index.remove(index_key, key);
                }
            }
        }
    }

    fn replace_shard(&mut self, shard: &str, rows: HashMap<String, T>) -> Result<()> {
        let stale: Vec<String> = self
            .rows
            .keys()
            .filter(|key| shard_of::<T>(key) == shard)
            .cloned()
            .collect();
        for key in stale {
            self.remove(&key);
        }
        for row in rows.into_values() {
            self.insert(row)?;
        }
        Ok(())
    }

    fn index(&self, name: &str) -> Result<&Index> {
        self.indices
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| StoreError::UnknownIndex(name.to_string()))
    }
}

struct Inner<T> {
    dir: PathBuf,
    schema: TableSchema,
    state: RwLock<TableState<T>>,
    /// Held for the whole of a commit; later transactions queue behind it.
    write_queue: Mutex<()>,
}

/// Cloneable handle to one table. Clones share state and the write queue.
pub struct Table<T: TableRow> {
    inner: Arc<Inner<T>>,
}

impl<T: TableRow> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn is_shard_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|f| f.to_str())
        .is_some_and(|f| f.starts_with("items_") && f.ends_with(".jsonl"))
}

async fn read_shard<T: TableRow>(path: &Path) -> Result<HashMap<String, T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let mut rows = HashMap::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let row: T = serde_json::from_str(line)?;
        rows.insert(row.key(), row);
    }
    Ok(rows)
}

fn encode_shard<T: TableRow>(rows: &HashMap<String, T>) -> Result<String> {
    let mut sorted: Vec<(&String, &T)> = rows.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let mut out = String::new();
    for (_, row) in sorted {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    Ok(out)
}

async fn load_state<T: TableRow>(dir: &Path, schema: &TableSchema) -> Result<TableState<T>> {
    let mut state = TableState::new(schema);
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(state),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_shard_file(&path) {
            continue;
        }
        for row in read_shard::<T>(&path).await?.into_values() {
            state.insert(row)?;
        }
    }
    Ok(state)
}

impl<T: TableRow> Table<T> {
    pub(crate) async fn open(dir: PathBuf, schema: &TableSchema) -> Result<Self> {
        let state = load_state(&dir, schema).await?;
        debug!("loaded {} rows from {}", state.rows.len(), dir.display());
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                schema: schema.clone(),
                state: RwLock::new(state),
                write_queue: Mutex::new(()),
            }),
        })
    }

    fn shard_path(&self, shard: &str) -> PathBuf {
        self.inner.dir.join(format!("items_{shard}.jsonl"))
    }

    /// Re-read every shard from disk, picking up writes made by other handles
    /// on the same directory.
    pub async fn refresh(&self) -> Result<()> {
        let _queue = self.inner.write_queue.lock().await;
        let fresh = load_state(&self.inner.dir, &self.inner.schema).await?;
        *self.inner.state.write().await = fresh;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<T> {
        self.inner
            .state
            .read()
            .await
            .rows
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.state.read().await.rows.contains_key(key)
    }

    pub async fn count(&self) -> usize {
        self.inner.state.read().await.rows.len()
    }

    /// Rows whose `index` key falls in `range`, highest key first.
    pub async fn query(&self, index: &str, range: KeyRange) -> Result<Vec<T>> {
        let state = self.inner.state.read().await;
        let hits = state.index(index)?.scan(&range);
        Ok(hits
            .iter()
            .filter_map(|key| state.rows.get(key).cloned())
            .collect())
    }

    /// Number of rows whose `index` key falls in `range`.
    pub async fn count_in(&self, index: &str, range: KeyRange) -> Result<usize> {
        let state = self.inner.state.read().await;
        Ok(state.index(index)?.scan(&range).len())
    }

    pub async fn put(&self, row: T) -> Result<()> {
        self.run_transaction(vec![Write::Put(row)]).await
    }

    pub async fn add(&self, row: T) -> Result<()> {
        self.run_transaction(vec![Write::Add(row)])
            .await
            .map_err(|e| match e {
                StoreError::TransactionFailed { cause } if matches!(*cause, StoreError::Conflict(_)) => *cause,
                other => other,
            })
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.run_transaction(vec![Write::Delete(key.to_string())])
            .await
    }

    /// Apply `writes` atomically. Resolves once the batch is on disk and
    /// visible to readers; on any error nothing is published. The one
    /// exception is a rename failing after earlier shards of the batch
    /// landed: those shards are reloaded so readers match the disk.
    pub async fn run_transaction(&self, writes: Vec<Write<T>>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let _queue = self.inner.write_queue.lock().await;
        self.commit(writes).await.map_err(StoreError::aborted)
    }

    async fn commit(&self, writes: Vec<Write<T>>) -> Result<()> {
        // Start from what is on disk so concurrent handles resolve per row.
        let mut shards: BTreeMap<String, HashMap<String, T>> = BTreeMap::new();
        for write in &writes {
            let shard = shard_of::<T>(&write.key());
            if !shards.contains_key(&shard) {
                let rows = read_shard(&self.shard_path(&shard)).await?;
                shards.insert(shard, rows);
            }
        }

        for write in writes {
            let key = write.key();
            let rows = shards.entry(shard_of::<T>(&key)).or_default();
            match write {
                Write::Put(row) => {
                    rows.insert(key, row);
                }
                Write::Add(row) => {
                    if rows.contains_key(&key) {
                        return Err(StoreError::Conflict(key));
                    }
                    rows.insert(key, row);
                }
                Write::Delete(_) => {
                    rows.remove(&key);
                }
            }
        }

        let mut staged = Vec::new();
        for (shard, rows) in &shards {
            let path = self.shard_path(shard);
            if rows.is_empty() {
                staged.push((None, path));
                continue;
            }
            let tmp = staging_path(&path);
            if let Err(e) = tokio::fs::write(&tmp, encode_shard(rows)?).await {
                discard(&staged).await;
                return Err(e.into());
            }
            staged.push((Some(tmp), path));
        }

        for (landed, (tmp, path)) in staged.iter().enumerate() {
            let result = match tmp {
                Some(tmp) => tokio::fs::rename(tmp, path).await,
                None => match tokio::fs::remove_file(path).await {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            if let Err(e) = result {
                discard(&staged[landed..]).await;
                let done: Vec<String> = shards.keys().take(landed).cloned().collect();
                self.resync(&done).await;
                return Err(e.into());
            }
        }

        let mut state = self.inner.state.write().await;
        for (shard, rows) in shards {
            state.replace_shard(&shard, rows)?;
        }
        Ok(())
    }
}

impl<T: TableRow> Table<T> {
    async fn resync(&self, shards: &[String]) {
        let mut state = self.inner.state.write().await;
        for shard in shards {
            let reloaded = read_shard::<T>(&self.shard_path(shard))
                .await
                .and_then(|rows| state.replace_shard(shard, rows));
            if let Err(e) = reloaded {
                warn!("failed to reload shard {}: {}", shard, e);
            }
        }
    }
}

async fn discard(staged: &[(Option<PathBuf>, PathBuf)]) {
    for tmp in staged.iter().filter_map(|(tmp, _)| tmp.as_ref()) {
        if let Err(e) = tokio::fs::remove_file(tmp).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("failed to remove staged shard {}: {}", tmp.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, IndexValue, Schema};
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Clip {
        id: String,
        feed: String,
        seen: i64,
    }

    impl TableRow for Clip {
        const TABLE_NAME: &'static str = "clips";
        const SHARD_CHARACTERS: usize = 1;

        fn key(&self) -> String {
            self.id.clone()
        }
    }

    fn clip(id: &str, feed: &str, seen: i64) -> Clip {
        Clip {
            id: id.to_string(),
            feed: feed.to_string(),
            seen,
        }
    }

    fn schema(schema: &mut Schema, _old: u32) -> crate::Result<()> {
        schema
            .create_table("clips")
            .create_index("seen", &["seen"])
            .create_index("feed, seen", &["feed", "seen"]);
        Ok(())
    }

    async fn open(dir: &TempDir) -> Table<Clip> {
        let db = Database::open(dir.path(), 1, schema).await.unwrap();
        db.table::<Clip>().await.unwrap()
    }

    fn shard_files(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path().join("clips"))
            .unwrap()
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        table.put(clip("a", "giphy", 0)).await.unwrap();
        assert_eq!(table.get("a").await.unwrap(), clip("a", "giphy", 0));
        assert_eq!(table.count().await, 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        assert!(matches!(
            table.get("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_put_overwrites_existing() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        table.put(clip("a", "giphy", 0)).await.unwrap();
        table.put(clip("a", "giphy", 9)).await.unwrap();
        assert_eq!(table.count().await, 1);
        assert_eq!(table.get("a").await.unwrap().seen, 9);
        let seen = table.query("seen", KeyRange::only([IndexValue::Int(0)])).await.unwrap();
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_add_existing_is_conflict() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        table.add(clip("a", "giphy", 0)).await.unwrap();
        let result = table.add(clip("a", "reddit", 0)).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(table.get("a").await.unwrap().feed, "giphy");
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back_whole_batch() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        table.put(clip("a", "giphy", 0)).await.unwrap();

        let result = table
            .run_transaction(vec![
                Write::Put(clip("b", "giphy", 0)),
                Write::Delete("a".into()),
                Write::Add(clip("a", "reddit", 0)),
                Write::Add(clip("b", "reddit", 0)),
            ])
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, StoreError::TransactionFailed { .. }));
        assert!(matches!(err.root_cause(), StoreError::Conflict(k) if k == "b"));
        assert!(!table.contains("b").await);
        assert_eq!(table.get("a").await.unwrap().feed, "giphy");

        let reopened = open(&dir).await;
        assert!(!reopened.contains("b").await);
        assert_eq!(reopened.count().await, 1);
    }

    #[tokio::test]
    async fn test_resync_picks_up_landed_shard() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        let other = open(&dir).await;
        table.put(clip("x", "giphy", 1)).await.unwrap();
        other.put(clip("x", "giphy", 5)).await.unwrap();

        let landed = vec![shard_of::<Clip>("x")];
        table.resync(&landed).await;
        assert_eq!(table.get("x").await.unwrap().seen, 5);
        let reindexed = table.count_in("seen", KeyRange::only([IndexValue::Int(5)]));
        assert_eq!(reindexed.await.unwrap(), 1);
        assert_eq!(table.count_in("seen", KeyRange::only([IndexValue::Int(1)])).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_is_descending() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        table
            .run_transaction(vec![
                Write::Put(clip("a", "giphy", 10)),
                Write::Put(clip("b", "giphy", 30)),
                Write::Put(clip("c", "giphy", 20)),
                Write::Put(clip("d", "giphy", 0)),
            ])
            .await
            .unwrap();
        let ids: Vec<String> = table
            .query("seen", KeyRange::at_least(1i64))
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_compound_index_query() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        table
            .run_transaction(vec![
                Write::Put(clip("a", "reddit", 0)),
                Write::Put(clip("b", "reddit", 5)),
                Write::Put(clip("c", "giphy", 0)),
            ])
            .await
            .unwrap();
        let hits = table
            .query(
                "feed, seen",
                KeyRange::only([IndexValue::from("reddit"), IndexValue::Int(0)]),
            )
            .await
            .unwrap();
        assert_eq!(hits, vec![clip("a", "reddit", 0)]);
        assert_eq!(
            table.count_in("feed, seen", KeyRange::All).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_unknown_index() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        assert!(matches!(
            table.query("missing", KeyRange::All).await,
            Err(StoreError::UnknownIndex(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_empty_shard_file() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        table.put(clip("a", "giphy", 0)).await.unwrap();
        assert_eq!(shard_files(&dir).len(), 1);
        table.delete("a").await.unwrap();
        assert!(!table.contains("a").await);
        assert!(shard_files(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        for i in 0..20 {
            table.put(clip(&format!("id-{i}"), "giphy", i)).await.unwrap();
        }
        let reopened = open(&dir).await;
        assert_eq!(reopened.count().await, 20);
        assert_eq!(reopened.get("id-7").await.unwrap().seen, 7);
        assert!(shard_files(&dir).iter().all(|f| f.starts_with("items_") && f.ends_with(".jsonl")));
    }

    #[tokio::test]
    async fn test_shard_lines_are_sorted_by_key() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        for id in ["zz", "aa", "mm", "bb", "yy"] {
            table.put(clip(id, "giphy", 0)).await.unwrap();
        }
        for name in shard_files(&dir) {
            let content = std::fs::read_to_string(dir.path().join("clips").join(name)).unwrap();
            let ids: Vec<String> = content
                .lines()
                .map(|l| serde_json::from_str::<Clip>(l).unwrap().id)
                .collect();
            let mut sorted = ids.clone();
            sorted.sort();
            assert_eq!(ids, sorted);
        }
    }

    #[tokio::test]
    async fn test_refresh_sees_writes_from_another_handle() {
        let dir = TempDir::new().unwrap();
        let first = open(&dir).await;
        let second = open(&dir).await;
        second.put(clip("a", "giphy", 0)).await.unwrap();
        assert!(!first.contains("a").await);
        first.refresh().await.unwrap();
        assert!(first.contains("a").await);
    }

    #[tokio::test]
    async fn test_commit_keeps_other_handles_rows_in_same_shard() {
        let dir = TempDir::new().unwrap();
        let first = open(&dir).await;
        let second = open(&dir).await;
        // Shard width 1 over 16 hex digits: enough ids guarantee a shared shard.
        for i in 0..40 {
            second.put(clip(&format!("other-{i}"), "giphy", 0)).await.unwrap();
        }
        first.put(clip("mine", "giphy", 0)).await.unwrap();
        let reopened = open(&dir).await;
        assert_eq!(reopened.count().await, 41);
    }

    #[tokio::test]
    async fn test_concurrent_transactions_are_serialized() {
        let dir = TempDir::new().unwrap();
        let table = open(&dir).await;
        let mut handles = Vec::new();
        for i in 0..16 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                table.put(clip(&format!("c{i}"), "giphy", i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(table.count().await, 16);
        assert_eq!(open(&dir).await.count().await, 16);
    }
}
