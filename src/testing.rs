use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::bus::{Bus, NullPort};
use crate::feed::Feed;
use crate::gif::{Gif, gif_id};
use crate::store::GifStore;

pub(crate) async fn open_store(path: &Path) -> GifStore {
    GifStore::open(path, 1, Bus::new(Arc::new(NullPort::new())))
        .await
        .unwrap()
}

/// A feed serving a fixed list, optionally slow or broken.
pub(crate) struct StaticFeed {
    name: &'static str,
    prefix: &'static str,
    gifs: Vec<Gif>,
    delay: Duration,
    fail: bool,
}

impl StaticFeed {
    pub fn new(name: &'static str, prefix: &'static str) -> Self {
        Self {
            name,
            prefix,
            gifs: Vec::new(),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn with_gifs(mut self, n: usize) -> Self {
        self.gifs = (0..n)
            .map(|i| {
                Gif::new(
                    self.prefix,
                    &i.to_string(),
                    self.name,
                    &format!("https://{}/{}.gif", self.name, i),
                )
            })
            .collect();
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Feed for StaticFeed {
    fn name(&self) -> &'static str {
        self.name
    }

    fn prefix(&self) -> &'static str {
        self.prefix
    }

    fn normalize(&self, raw: &Value) -> Option<Gif> {
        serde_json::from_value(raw.clone()).ok()
    }

    fn fetch(&self, max: usize) -> BoxFuture<'_, anyhow::Result<Vec<Gif>>> {
        async move {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                anyhow::bail!("{} is down", self.name);
            }
            Ok(self.gifs.iter().take(max).cloned().collect())
        }
        .boxed()
    }

    fn get<'a>(&'a self, native_ids: &'a [String]) -> BoxFuture<'a, anyhow::Result<Vec<Gif>>> {
        async move {
            if self.fail {
                anyhow::bail!("{} is down", self.name);
            }
            Ok(self
                .gifs
                .iter()
                .filter(|g| native_ids.iter().any(|n| gif_id(self.prefix, n) == g.id))
                .cloned()
                .collect())
        }
        .boxed()
    }
}
