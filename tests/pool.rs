use std::sync::{Arc, Once};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use giftab::{
    CloudMap, EngineConfig, Event, Feed, FeedRegistry, Gif, GifError, GifPool, LocalChannel,
    MemoryCloud, NullPort,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;

static LOGGING: Once = Once::new();

fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Serves `count` gifs numbered from zero.
struct NumberedFeed {
    name: &'static str,
    prefix: &'static str,
    count: usize,
}

impl NumberedFeed {
    fn gif(&self, n: &str) -> Gif {
        let mut gif = Gif::new(self.prefix, n, self.name, &format!("https://{}/{n}.gif", self.name));
        gif.title = format!("{} #{n}", self.name);
        gif
    }
}

impl Feed for NumberedFeed {
    fn name(&self) -> &'static str {
        self.name
    }

    fn prefix(&self) -> &'static str {
        self.prefix
    }

    fn normalize(&self, raw: &Value) -> Option<Gif> {
        raw.as_u64().map(|n| self.gif(&n.to_string()))
    }

    fn fetch(&self, max: usize) -> BoxFuture<'_, anyhow::Result<Vec<Gif>>> {
        async move {
            Ok((0..self.count.min(max))
                .filter_map(|n| self.normalize(&Value::from(n as u64)))
                .collect())
        }
        .boxed()
    }

    fn get<'a>(&'a self, native_ids: &'a [String]) -> BoxFuture<'a, anyhow::Result<Vec<Gif>>> {
        async move {
            Ok(native_ids
                .iter()
                .filter(|id| id.parse::<usize>().is_ok_and(|n| n < self.count))
                .map(|id| self.gif(id))
                .collect())
        }
        .boxed()
    }
}

fn registry() -> FeedRegistry {
    let mut registry = FeedRegistry::new();
    registry
        .register(Arc::new(NumberedFeed { name: "alpha", prefix: "a", count: 30 }))
        .unwrap();
    registry
        .register(Arc::new(NumberedFeed { name: "beta", prefix: "b", count: 30 }))
        .unwrap();
    registry
}

fn config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::with_store_dir(dir.path());
    config.history_window = 5;
    config
}

async fn window(dir: &TempDir, cloud: &Arc<MemoryCloud>, channel: &Arc<LocalChannel>) -> GifPool {
    GifPool::open(config(dir), registry(), cloud.clone(), channel.clone())
        .await
        .unwrap()
}

/// Forward every `event` seen by `pool` into a channel.
fn watch(pool: &GifPool, event: Event) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    pool.subscribe(event, move |payload| {
        let _ = tx.send(payload.clone());
    });
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Poll until `pool` holds `expected` gifs.
async fn wait_for_count(pool: &GifPool, expected: usize) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while pool.count().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "pool never reached {expected} gifs, has {}", pool.count().await);
}

#[tokio::test]
async fn test_load_then_pick_then_view() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let pool = GifPool::open(
        config(&dir),
        registry(),
        Arc::new(MemoryCloud::new()),
        Arc::new(NullPort::new()),
    )
    .await
    .unwrap();

    assert!(matches!(pool.random().await, Err(GifError::EmptyPool)));

    let first = pool.load_new_gifs(false).await.unwrap();
    assert_eq!(first.len(), 30);
    pool.settle().await;
    assert_eq!(pool.count().await, 60);

    let gif = pool.random().await.unwrap();
    pool.add_to_history(&gif.id).await.unwrap();
    assert!(pool.in_history(&gif.id).await.unwrap());
    assert_eq!(pool.get_history().await.unwrap()[0].id, gif.id);

    // Fresh pool, recent pull: nothing to do.
    assert!(pool.load_new_gifs(false).await.unwrap().is_empty());
    pool.shutdown().await;
}

#[tokio::test]
async fn test_history_window_is_enforced() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let pool = GifPool::open(
        config(&dir),
        registry(),
        Arc::new(MemoryCloud::new()),
        Arc::new(NullPort::new()),
    )
    .await
    .unwrap();
    pool.load_new_gifs(true).await.unwrap();
    pool.settle().await;

    let viewed: Vec<Gif> = pool.get_pool().await.unwrap().into_iter().take(8).collect();
    for gif in &viewed {
        pool.add_to_history(&gif.id).await.unwrap();
    }

    let history: Vec<String> = pool.get_history().await.unwrap().into_iter().map(|g| g.id).collect();
    let expected: Vec<String> = viewed.iter().rev().take(5).map(|g| g.id.clone()).collect();
    assert_eq!(history, expected);
    for gif in &viewed[..3] {
        assert!(!pool.in_history(&gif.id).await.unwrap());
    }
}

#[tokio::test]
async fn test_refresh_keeps_marked_gifs() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(MemoryCloud::new());
    let pool = GifPool::open(config(&dir), registry(), cloud.clone(), Arc::new(NullPort::new()))
        .await
        .unwrap();
    pool.load_new_gifs(true).await.unwrap();
    pool.settle().await;

    pool.add_to_history("a-1").await.unwrap();
    pool.add_to_favorites("b-2").await.unwrap();

    assert_eq!(pool.clear_feed_gifs().await.unwrap(), 58);
    let mut left: Vec<String> = pool.get_pool().await.unwrap().into_iter().map(|g| g.id).collect();
    left.sort();
    assert_eq!(left, vec!["a-1", "b-2"]);
    assert_eq!(pool.get_favorites().await.unwrap()[0].id, "b-2");
    assert!(cloud.snapshot().contains_key("b-2"));
}

#[tokio::test]
async fn test_reload_returns_full_batch_when_some_are_kept() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let pool = GifPool::open(
        config(&dir),
        registry(),
        Arc::new(MemoryCloud::new()),
        Arc::new(NullPort::new()),
    )
    .await
    .unwrap();
    pool.load_new_gifs(true).await.unwrap();
    pool.settle().await;
    pool.add_to_favorites("a-0").await.unwrap();
    pool.add_to_favorites("b-0").await.unwrap();
    pool.add_to_history("a-1").await.unwrap();
    pool.add_to_history("b-1").await.unwrap();

    let reloaded = pool.load_new_gifs(true).await.unwrap();
    assert_eq!(reloaded.len(), 30);
    pool.settle().await;
    assert_eq!(pool.count().await, 60);
}

#[tokio::test]
async fn test_clear_in_one_window_empties_the_other() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(MemoryCloud::new());
    let channel = Arc::new(LocalChannel::new());
    let a = window(&dir, &cloud, &channel).await;
    let b = window(&dir, &cloud, &channel).await;

    a.load_new_gifs(true).await.unwrap();
    a.settle().await;
    wait_for_count(&b, 60).await;

    assert_eq!(a.clear_feed_gifs().await.unwrap(), 60);
    wait_for_count(&b, 0).await;
    assert!(matches!(b.random().await, Err(GifError::EmptyPool)));
}

#[tokio::test]
async fn test_lagging_window_reloads_and_tells_listeners() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(MemoryCloud::new());
    let channel = Arc::new(LocalChannel::new());
    let a = window(&dir, &cloud, &channel).await;
    let b = window(&dir, &cloud, &channel).await;
    let mut settings_seen_by_b = watch(&b, Event::SettingsUpdated);
    let mut config_seen_by_b = watch(&b, Event::ConfigUpdated);

    // More than the channel holds, without yielding to b's receiver.
    for _ in 0..300 {
        a.bus().send(Event::HistoryUpdated, Value::Null);
    }

    let settings = next(&mut settings_seen_by_b).await;
    assert_eq!(settings["theme"], "light_gray");
    assert_eq!(next(&mut config_seen_by_b).await, Value::from("settings"));
}

#[tokio::test]
async fn test_disabling_a_feed_removes_its_transient_gifs() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let pool = GifPool::open(
        config(&dir),
        registry(),
        Arc::new(MemoryCloud::new()),
        Arc::new(NullPort::new()),
    )
    .await
    .unwrap();
    pool.load_new_gifs(true).await.unwrap();
    pool.settle().await;
    pool.add_to_favorites("b-0").await.unwrap();

    pool.set_feed_enabled("beta", false).await.unwrap();
    assert!(!pool.settings().await.is_enabled("beta"));
    assert_eq!(pool.count().await, 31);
    for _ in 0..20 {
        assert_eq!(pool.random().await.unwrap().feed, "alpha");
    }

    let err = pool.set_feed_enabled("alpha", false).await.unwrap_err();
    assert!(matches!(err, GifError::InvalidSetting(_)));
}

#[tokio::test]
async fn test_favorite_in_one_window_reaches_the_other() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(MemoryCloud::new());
    let channel = Arc::new(LocalChannel::new());
    let a = window(&dir, &cloud, &channel).await;
    let b = window(&dir, &cloud, &channel).await;

    let mut gifs_seen_by_b = watch(&b, Event::GifsUpdated);
    a.load_new_gifs(true).await.unwrap();
    a.settle().await;
    next(&mut gifs_seen_by_b).await;

    let mut favorites_seen_by_b = watch(&b, Event::FavoritesUpdated);
    a.add_to_favorites("a-3").await.unwrap();
    assert_eq!(next(&mut favorites_seen_by_b).await, Value::from("a-3"));

    assert!(b.is_favorite("a-3").await.unwrap());
    assert_eq!(b.get_favorites().await.unwrap()[0].id, "a-3");
}

#[tokio::test]
async fn test_settings_follow_other_windows() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(MemoryCloud::new());
    let channel = Arc::new(LocalChannel::new());
    let a = window(&dir, &cloud, &channel).await;
    let b = window(&dir, &cloud, &channel).await;

    let mut config_seen_by_b = watch(&b, Event::ConfigUpdated);
    let mut config_seen_by_a = watch(&a, Event::ConfigUpdated);
    a.set_theme("dark").await.unwrap();

    assert_eq!(next(&mut config_seen_by_b).await, Value::from("settings"));
    assert_eq!(b.settings().await.theme, "dark");
    // Local listeners fire exactly once per send.
    assert_eq!(next(&mut config_seen_by_a).await, Value::from("settings"));
    assert!(config_seen_by_a.try_recv().is_err());
}

#[tokio::test]
async fn test_sync_pulls_cloud_favorites_from_feeds() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let cloud = Arc::new(MemoryCloud::with_favorites(CloudMap::from([
        ("a-7".to_string(), 700),
        ("b-100".to_string(), 800),
    ])));
    let pool = GifPool::open(config(&dir), registry(), cloud, Arc::new(NullPort::new()))
        .await
        .unwrap();

    let report = pool.sync_favorites().await.unwrap();
    assert_eq!(report.fetched, vec!["a-7"]);
    assert_eq!(report.unresolved, vec!["b-100"]);
    let favorite = pool.get("a-7").await.unwrap();
    assert_eq!(favorite.favorited, 700);
    assert_eq!(favorite.history, 0);
}

#[tokio::test]
async fn test_store_survives_reopen() {
    init_logging();
    let dir = TempDir::new().unwrap();
    {
        let pool = GifPool::open(
            config(&dir),
            registry(),
            Arc::new(MemoryCloud::new()),
            Arc::new(NullPort::new()),
        )
        .await
        .unwrap();
        pool.load_new_gifs(true).await.unwrap();
        pool.settle().await;
        pool.set_theme("dark").await.unwrap();
        pool.shutdown().await;
    }

    let pool = GifPool::open(
        config(&dir),
        registry(),
        Arc::new(MemoryCloud::new()),
        Arc::new(NullPort::new()),
    )
    .await
    .unwrap();
    assert_eq!(pool.count().await, 60);
    assert_eq!(pool.settings().await.theme, "dark");
    assert!(pool.settings().await.last_feed_update > 0);
}
