use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, info};

use super::error::FastError;
use super::types::{DiscoveryConfig, EndpointSet};

const FAST_PAGE_URL: &str = "https://fast.com/";
const FAST_API_URL: &str = "https://api.fast.com/netflix/speedtest/v2";

static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<script[^>]*\ssrc="([^"]*app-[^"]*\.js)""#).expect("valid script regex")
});
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"token:"([A-Za-z0-9]+)""#).expect("valid token regex"));

/// Produces the download targets for one measurement run.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve_targets(&self) -> Result<EndpointSet, FastError>;
}

/// Discovers targets through the fast.com web app and its API.
pub struct FastComResolver {
    client: Client,
    page_url: String,
    api_url: String,
    url_count: u32,
}

impl FastComResolver {
    pub fn new(client: Client, config: &DiscoveryConfig) -> Self {
        Self::with_urls(client, FAST_PAGE_URL, FAST_API_URL, config.url_count)
    }

    pub fn with_urls(client: Client, page_url: &str, api_url: &str, url_count: u32) -> Self {
        Self {
            client,
            page_url: page_url.to_string(),
            api_url: api_url.to_string(),
            url_count,
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String, FastError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FastError::Discovery(format!("{url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FastError::Discovery(format!("{url} returned {status}")));
        }
        resp.text()
            .await
            .map_err(|e| FastError::Discovery(format!("{url}: {e}")))
    }

    /// Scrape the API token out of the web app bundle.
    async fn fetch_token(&self) -> Result<String, FastError> {
        let page = self.fetch_text(&self.page_url).await?;
        let script = parse_script_path(&page)
            .ok_or_else(|| FastError::Discovery("app script not found on page".to_string()))?;
        let script_url = Url::parse(&self.page_url)
            .and_then(|base| base.join(script))
            .map_err(|e| FastError::Discovery(format!("invalid script url {script}: {e}")))?;
        debug!("Fetching token from {script_url}");

        let bundle = self.fetch_text(script_url.as_str()).await?;
        parse_token(&bundle)
            .map(str::to_string)
            .ok_or_else(|| FastError::Discovery("token not found in app script".to_string()))
    }
}

#[async_trait]
impl TargetResolver for FastComResolver {
    async fn resolve_targets(&self) -> Result<EndpointSet, FastError> {
        let token = self.fetch_token().await?;
        let api_url = format!(
            "{}?https=true&token={token}&urlCount={}",
            self.api_url, self.url_count
        );
        let body = self.fetch_text(&api_url).await?;
        let endpoints = parse_targets(&body)?;
        info!("Discovered {} endpoints", endpoints.len());
        Ok(endpoints)
    }
}

#[derive(Debug, Deserialize)]
struct Target {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TargetsResponse {
    V2 { targets: Vec<Target> },
    V1(Vec<Target>),
}

fn parse_script_path(page: &str) -> Option<&str> {
    SCRIPT_RE
        .captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn parse_token(bundle: &str) -> Option<&str> {
    TOKEN_RE
        .captures(bundle)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Parse the API response, keeping http(s) URLs in provider order.
fn parse_targets(body: &str) -> Result<EndpointSet, FastError> {
    let response: TargetsResponse = serde_json::from_str(body)
        .map_err(|e| FastError::Discovery(format!("malformed target list: {e}")))?;
    let targets = match response {
        TargetsResponse::V2 { targets } => targets,
        TargetsResponse::V1(targets) => targets,
    };

    let urls = targets
        .into_iter()
        .filter_map(|t| match Url::parse(&t.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
            _ => {
                debug!("Skipping unusable endpoint {}", t.url);
                None
            }
        })
        .collect();
    EndpointSet::new(urls)
}
