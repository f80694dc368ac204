use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::{Feed, text};
use crate::gif::Gif;
use crate::http::get_json;

const SUBREDDIT: &str = "gifs";

pub struct Reddit {
    client: reqwest::Client,
    base_url: String,
}

/// One listing page: normalized posts and the cursor for the next page.
struct Page {
    gifs: Vec<Gif>,
    children: usize,
    after: Option<String>,
}

impl Reddit {
    pub const NAME: &'static str = "reddit";
    pub const PREFIX: &'static str = "r";

    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn listing(&self, url: Url) -> anyhow::Result<Page> {
        let body = get_json(self.client.get(url)).await?;
        let children = body
            .pointer("/data/children")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow::anyhow!("reddit response has no listing"))?;
        Ok(Page {
            gifs: children
                .iter()
                .filter_map(|child| child.get("data"))
                .filter_map(|post| self.normalize(post))
                .collect(),
            children: children.len(),
            after: text(&body, "/data/after").map(str::to_string),
        })
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// The `src` of an embedded player, made absolute.
fn embed_src(content: &str) -> Option<String> {
    let html = decode_entities(content);
    let start = html.find("src=\"")? + "src=\"".len();
    let len = html[start..].find('"')?;
    let src = &html[start..start + len];
    if src.is_empty() {
        return None;
    }
    Some(match src.strip_prefix("//") {
        Some(rest) => format!("http://{rest}"),
        None => src.to_string(),
    })
}

fn preview_thumb(post: &Value) -> Option<String> {
    let resolutions = post
        .pointer("/preview/images/0/resolutions")
        .and_then(Value::as_array)?;
    let pick = resolutions.get(1).or_else(|| resolutions.first())?;
    text(pick, "/url").map(|u| u.replace("&amp;", "&"))
}

impl Feed for Reddit {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn prefix(&self) -> &'static str {
        Self::PREFIX
    }

    fn normalize(&self, post: &Value) -> Option<Gif> {
        let name = text(post, "/name")?;
        let url = text(post, "/url")?;
        let (_, ext) = url.rsplit_once('.')?;
        let over_18 = post.get("over_18").and_then(Value::as_bool).unwrap_or(false);
        let thumbnail = text(post, "/thumbnail");
        if over_18 || thumbnail == Some("nsfw") || !matches!(ext, "gif" | "gifv") {
            return None;
        }

        let mut gif = Gif::new(Self::PREFIX, name, Self::NAME, url);
        if let Some(thumb) = preview_thumb(post).as_deref().or(thumbnail) {
            gif.thumb_url = thumb.to_string();
        }
        if let Some(src) = text(post, "/media_embed/content").and_then(embed_src) {
            gif.url = src;
        }
        gif.title = text(post, "/title").unwrap_or_default().to_string();
        if let Some(permalink) = text(post, "/permalink") {
            gif.sources = vec![format!("https://www.reddit.com{permalink}")];
        }
        Some(gif)
    }

    fn fetch(&self, max: usize) -> BoxFuture<'_, anyhow::Result<Vec<Gif>>> {
        async move {
            let hot = format!("{}/r/{}/hot.json", self.base_url, SUBREDDIT);
            let mut gifs = Vec::new();
            let mut after: Option<String> = None;
            loop {
                let url = match &after {
                    Some(cursor) => Url::parse_with_params(&hot, &[("after", cursor.as_str())])?,
                    None => Url::parse(&hot)?,
                };
                let page = self.listing(url).await?;
                debug!("reddit page with {} posts, {} usable", page.children, page.gifs.len());
                gifs.extend(page.gifs);
                match page.after {
                    Some(next)
                        if page.children > 0
                            && gifs.len() < max
                            && after.as_deref() != Some(next.as_str()) =>
                    {
                        after = Some(next)
                    }
                    _ => break,
                }
            }
            gifs.truncate(max);
            Ok(gifs)
        }
        .boxed()
    }

    fn get<'a>(&'a self, native_ids: &'a [String]) -> BoxFuture<'a, anyhow::Result<Vec<Gif>>> {
        async move {
            let url = Url::parse(&format!(
                "{}/by_id/{}.json",
                self.base_url,
                native_ids.join(",")
            ))?;
            let gifs = self.listing(url).await?.gifs;
            info!("GET {} from {}", gifs.len(), Self::NAME);
            Ok(gifs)
        }
        .boxed()
    }
}
