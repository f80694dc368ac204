use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::info;
use url::Url;

use super::{Feed, text};
use crate::gif::Gif;
use crate::http::get_json;

pub struct Giphy {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl Giphy {
    pub const NAME: &'static str = "giphy";
    pub const PREFIX: &'static str = "g";

    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn gifs_at(&self, path: &str, params: &[(&str, &str)]) -> anyhow::Result<Vec<Gif>> {
        let mut query = vec![("api_key", self.api_key.as_str())];
        query.extend_from_slice(params);
        let url = Url::parse_with_params(&format!("{}{}", self.base_url, path), &query)?;
        let body = get_json(self.client.get(url)).await?;
        let data = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow::anyhow!("giphy response has no data array"))?;
        Ok(data.iter().filter_map(|raw| self.normalize(raw)).collect())
    }
}

/// Restricted and adult ratings.
fn is_adult(rating: &str) -> bool {
    rating
        .chars()
        .any(|c| matches!(c.to_ascii_lowercase(), 'r' | 'x'))
}

impl Feed for Giphy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn prefix(&self) -> &'static str {
        Self::PREFIX
    }

    fn normalize(&self, raw: &Value) -> Option<Gif> {
        let id = text(raw, "/id")?;
        if is_adult(text(raw, "/rating").unwrap_or_default()) {
            return None;
        }
        let url = text(raw, "/images/original/webp").or_else(|| text(raw, "/images/original/url"))?;

        let mut gif = Gif::new(Self::PREFIX, id, Self::NAME, url);
        if let Some(thumb) = text(raw, "/images/fixed_height_still/url") {
            gif.thumb_url = thumb.to_string();
        }
        gif.title = text(raw, "/title").unwrap_or_default().to_string();
        gif.sources = [text(raw, "/url"), text(raw, "/source")]
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        Some(gif)
    }

    fn fetch(&self, max: usize) -> BoxFuture<'_, anyhow::Result<Vec<Gif>>> {
        async move {
            let limit = max.to_string();
            self.gifs_at("/v1/gifs/trending", &[("limit", limit.as_str())])
                .await
        }
        .boxed()
    }

    fn get<'a>(&'a self, native_ids: &'a [String]) -> BoxFuture<'a, anyhow::Result<Vec<Gif>>> {
        async move {
            let ids = native_ids.join(",");
            let gifs = self.gifs_at("/v1/gifs", &[("ids", ids.as_str())]).await?;
            info!("GET {} from {}", gifs.len(), Self::NAME);
            Ok(gifs)
        }
        .boxed()
    }
}
