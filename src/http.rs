use anyhow::Context;
use serde_json::Value;

pub fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("giftab/{}", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))
}

pub(crate) async fn get_json(request: reqwest::RequestBuilder) -> anyhow::Result<Value> {
    let response = request.send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).context("response is not valid JSON")
}
