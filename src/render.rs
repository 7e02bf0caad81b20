use std::path::PathBuf;
use std::time::Duration;

use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::{debug, warn};

use crate::config::{RendererKind, Settings};
use crate::error::RenderError;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// A loaded page, ready for extraction.
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub html: String,
}

/// Turns a query URL into a loaded document. Timeouts are the renderer's
/// concern; the engine only sees success or a `RenderError`.
#[allow(async_fn_in_trait)]
pub trait Renderer {
    async fn load(&self, url: &str) -> Result<Document, RenderError>;
}

// ── Plain HTTP ──

pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(HttpRenderer { client })
    }
}

impl Renderer for HttpRenderer {
    async fn load(&self, url: &str) -> Result<Document, RenderError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RenderError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let html = resp.text().await?;
        if html.trim().is_empty() {
            return Err(RenderError::Empty(url.to_string()));
        }
        Ok(Document {
            url: url.to_string(),
            html,
        })
    }
}

// ── spider.cloud (renders JavaScript) ──

pub struct SpiderRenderer {
    spider: Spider,
}

impl SpiderRenderer {
    pub fn from_env() -> Result<Self, RenderError> {
        let api_key = std::env::var("SPIDER_API_KEY")
            .map_err(|_| RenderError::Spider("SPIDER_API_KEY environment variable must be set".into()))?;
        let spider = Spider::new(Some(api_key))
            .map_err(|e| RenderError::Spider(format!("failed to create client: {}", e)))?;
        Ok(SpiderRenderer { spider })
    }

    async fn scrape_once(&self, url: &str) -> Result<Document, RenderError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| RenderError::Spider(e.to_string()))?;

        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };
        let first = parsed.as_array().and_then(|arr| arr.first());

        if let Some(status) = first.and_then(|obj| obj.get("status")).and_then(|s| s.as_u64()) {
            if !(200..300).contains(&status) {
                return Err(RenderError::Status {
                    url: url.to_string(),
                    status: status as u16,
                });
            }
        }

        let html = first
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| RenderError::Empty(url.to_string()))?;

        Ok(Document {
            url: url.to_string(),
            html: html.to_string(),
        })
    }
}

impl Renderer for SpiderRenderer {
    async fn load(&self, url: &str) -> Result<Document, RenderError> {
        for attempt in 0..MAX_RETRIES {
            match self.scrape_once(url).await {
                Err(e) if is_transient(&e) => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "Rate limited on {} (attempt {}/{}), backing off {:.1}s",
                        url,
                        attempt + 1,
                        MAX_RETRIES,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
        self.scrape_once(url).await
    }
}

/// 429 and 5xx answers are worth another attempt; anything else is final.
fn is_transient(err: &RenderError) -> bool {
    match err {
        RenderError::Status { status, .. } => *status == 429 || *status >= 500,
        RenderError::Spider(msg) => {
            msg.contains("429")
                || msg.contains("rate")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
        }
        _ => false,
    }
}

// ── Saved snapshots ──

/// Reads pages saved to disk. Accepts `file://` URLs or plain paths.
pub struct FileRenderer;

impl Renderer for FileRenderer {
    async fn load(&self, url: &str) -> Result<Document, RenderError> {
        let path = snapshot_path(url);
        debug!("Reading snapshot {}", path.display());
        let html = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| RenderError::Io {
                path: path.clone(),
                source,
            })?;
        if html.trim().is_empty() {
            return Err(RenderError::Empty(url.to_string()));
        }
        Ok(Document {
            url: url.to_string(),
            html,
        })
    }
}

fn snapshot_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

fn is_local(url: &str) -> bool {
    url.starts_with("file://") || !(url.starts_with("http://") || url.starts_with("https://"))
}

// ── Selection ──

/// The renderer chosen by configuration. Local paths always go to disk, so a
/// saved page can be replayed whatever the configured kind.
pub enum AnyRenderer {
    Http(HttpRenderer),
    Spider(SpiderRenderer),
    File(FileRenderer),
}

impl AnyRenderer {
    pub fn from_settings(settings: &Settings) -> Result<Self, RenderError> {
        Ok(match settings.renderer {
            RendererKind::Http => AnyRenderer::Http(HttpRenderer::new(
                &settings.user_agent,
                Duration::from_secs(settings.request_timeout_secs),
            )?),
            RendererKind::Spider => AnyRenderer::Spider(SpiderRenderer::from_env()?),
            RendererKind::File => AnyRenderer::File(FileRenderer),
        })
    }
}

impl Renderer for AnyRenderer {
    async fn load(&self, url: &str) -> Result<Document, RenderError> {
        if is_local(url) {
            return FileRenderer.load(url).await;
        }
        match self {
            AnyRenderer::Http(r) => r.load(url).await,
            AnyRenderer::Spider(r) => r.load(url).await,
            AnyRenderer::File(r) => r.load(url).await,
        }
    }
}

/// Display form of a query URL for logs and progress output.
pub fn short_url(url: &str) -> String {
    if is_local(url) {
        return snapshot_path(url)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.to_string());
    }
    match reqwest::Url::parse(url) {
        Ok(u) => match u.query() {
            Some(q) => format!("{}?{}", u.path(), q),
            None => u.path().to_string(),
        },
        Err(_) => url.to_string(),
    }
}
