use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::Rng;
use serde_json::Value;
use tracing::info;
use url::Url;

use super::{Feed, text};
use crate::gif::Gif;
use crate::http::get_json;

pub struct ReplyGif {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ReplyGif {
    pub const NAME: &'static str = "replygif";
    pub const PREFIX: &'static str = "rg";

    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// The whole catalogue; the API has no paging.
    async fn catalogue(&self) -> anyhow::Result<Vec<Value>> {
        let url = Url::parse_with_params(
            &format!("{}/gifs", self.base_url),
            &[("tag", ""), ("api-key", self.api_key.as_str())],
        )?;
        match get_json(self.client.get(url)).await? {
            Value::Array(items) => Ok(items),
            _ => anyhow::bail!("replygif response is not a list"),
        }
    }
}

/// Ids arrive as numbers or strings.
fn native_id(raw: &Value) -> Option<String> {
    match raw.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// A random contiguous run of at most `max` items.
fn random_chunk<T, R: Rng + ?Sized>(mut items: Vec<T>, max: usize, rng: &mut R) -> Vec<T> {
    if items.len() <= max {
        return items;
    }
    let start = rng.gen_range(0..=items.len() - max);
    items.drain(start..start + max).collect()
}

impl Feed for ReplyGif {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn prefix(&self) -> &'static str {
        Self::PREFIX
    }

    fn normalize(&self, raw: &Value) -> Option<Gif> {
        let id = native_id(raw)?;
        let file = text(raw, "/file")?;
        let mut gif = Gif::new(Self::PREFIX, &id, Self::NAME, file);
        gif.title = text(raw, "/caption").unwrap_or_default().to_string();
        gif.sources = text(raw, "/url").map(str::to_string).into_iter().collect();
        Some(gif)
    }

    fn fetch(&self, max: usize) -> BoxFuture<'_, anyhow::Result<Vec<Gif>>> {
        async move {
            let gifs: Vec<Gif> = self
                .catalogue()
                .await?
                .iter()
                .filter_map(|raw| self.normalize(raw))
                .collect();
            Ok(random_chunk(gifs, max, &mut rand::thread_rng()))
        }
        .boxed()
    }

    fn get<'a>(&'a self, native_ids: &'a [String]) -> BoxFuture<'a, anyhow::Result<Vec<Gif>>> {
        async move {
            let gifs: Vec<Gif> = self
                .catalogue()
                .await?
                .iter()
                .filter(|raw| native_id(raw).is_some_and(|id| native_ids.contains(&id)))
                .filter_map(|raw| self.normalize(raw))
                .collect();
            info!("GET {} from {}", gifs.len(), Self::NAME);
            Ok(gifs)
        }
        .boxed()
    }
}
