use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use serde_json::Value;
use tracing::{debug, info};

use super::{Feed, text};
use crate::gif::Gif;
use crate::http::get_json;

pub struct Imgur {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl Imgur {
    pub const NAME: &'static str = "imgur";
    pub const PREFIX: &'static str = "i";

    pub fn new(client: reqwest::Client, base_url: &str, client_id: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
        }
    }

    async fn data(&self, path: &str) -> anyhow::Result<Value> {
        let request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Client-ID {}", self.client_id));
        let mut body = get_json(request).await?;
        match body.get_mut("data") {
            Some(data) => Ok(data.take()),
            None => anyhow::bail!("imgur response has no data"),
        }
    }
}

fn flag(raw: &Value, key: &str) -> bool {
    raw.get(key).and_then(Value::as_bool).unwrap_or(false)
}

impl Feed for Imgur {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn prefix(&self) -> &'static str {
        Self::PREFIX
    }

    fn normalize(&self, raw: &Value) -> Option<Gif> {
        if !flag(raw, "animated") || flag(raw, "nsfw") {
            return None;
        }
        let id = text(raw, "/id")?;
        let link = text(raw, "/link");
        let gifv = text(raw, "/gifv");
        let url = text(raw, "/mp4")
            .or_else(|| text(raw, "/webm"))
            .or(gifv)
            .or(link)?;

        let mut gif = Gif::new(Self::PREFIX, id, Self::NAME, url);
        match (link, gifv) {
            (Some(link), _) => gif.thumb_url = link.to_string(),
            (None, Some(gifv)) => {
                gif.thumb_url = match gifv.len().checked_sub(4) {
                    Some(cut) if gifv.is_char_boundary(cut) && gifv[cut..].eq_ignore_ascii_case("gifv") => {
                        format!("{}gif", &gifv[..cut])
                    }
                    _ => gifv.to_string(),
                }
            }
            (None, None) => {}
        }
        gif.title = text(raw, "/title").unwrap_or_default().to_string();
        gif.description = text(raw, "/description").map(str::to_string);
        gif.sources = vec![format!("https://imgur.com/{id}")];
        Some(gif)
    }

    fn fetch(&self, max: usize) -> BoxFuture<'_, anyhow::Result<Vec<Gif>>> {
        async move {
            let mut gifs = Vec::new();
            for page in 0.. {
                let data = self.data(&format!("/gallery/hot/viral/{page}.json")).await?;
                let items = data.as_array().map(Vec::as_slice).unwrap_or_default();
                gifs.extend(items.iter().filter_map(|raw| self.normalize(raw)));
                debug!("imgur page {} with {} items", page, items.len());
                if items.is_empty() || gifs.len() >= max {
                    break;
                }
            }
            gifs.truncate(max);
            Ok(gifs)
        }
        .boxed()
    }

    fn get<'a>(&'a self, native_ids: &'a [String]) -> BoxFuture<'a, anyhow::Result<Vec<Gif>>> {
        async move {
            let lookups = native_ids.iter().map(|id| async move {
                match self.data(&format!("/image/{id}")).await {
                    Ok(raw) => self.normalize(&raw),
                    Err(e) => {
                        debug!("imgur image {} unavailable: {}", id, e);
                        None
                    }
                }
            });
            let gifs: Vec<Gif> = join_all(lookups).await.into_iter().flatten().collect();
            info!("GET {} from {}", gifs.len(), Self::NAME);
            Ok(gifs)
        }
        .boxed()
    }
}
