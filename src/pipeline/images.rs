//! Image placeholder resolution.
//!
//! Generated notes mark where a picture belongs with
//! `!!!IMG short description!!!`. Each placeholder is looked up with an
//! image search and replaced by a Markdown image: the first candidate URL,
//! or, when embedding is requested, the first candidate that downloads and
//! sniffs as an image, inlined as a base64 `data:` URI so the note renders
//! offline.
//!
//! ## Failure policy
//!
//! | Situation                           | Outcome                              |
//! |-------------------------------------|--------------------------------------|
//! | candidate fetch fails / not image   | try the next candidate               |
//! | every candidate fails               | placeholder removed                  |
//! | search transport error              | placeholder removed                  |
//! | search rate-limited                 | back off `base * 2^n`, retry         |
//! | still rate-limited after ceiling    | whole pass fails with `RateLimited`  |
//!
//! A rate limit is the only condition that aborts the pass, because it
//! affects every remaining placeholder equally. Raw marker syntax never
//! survives a successful pass.

use crate::config::PipelineConfig;
use crate::error::{NoteCraftError, SearchFailure};
use crate::pipeline::encode::{data_uri, sniff_image_mime};
use crate::prompts::{IMAGE_PLACEHOLDER_CLOSE, IMAGE_PLACEHOLDER_OPEN};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "{}(.*?){}",
        regex::escape(IMAGE_PLACEHOLDER_OPEN),
        regex::escape(IMAGE_PLACEHOLDER_CLOSE)
    ))
    .unwrap()
});

static RE_VQD: Lazy<Regex> = Lazy::new(|| Regex::new(r#"vqd=["']?([0-9-]+)"#).unwrap());

// ── Capabilities ─────────────────────────────────────────────────────────────

/// Keyword image search returning candidate URLs, best first.
#[async_trait]
pub trait ImageSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, SearchFailure>;
}

/// Downloads a candidate image.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Returns the bytes and their MIME type.
    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, String), String>;
}

/// Waits between retries; injectable so tests run without real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-indexed): `base * 2^retry`.
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }
}

// ── DuckDuckGo implementation ────────────────────────────────────────────────

const DDG_URL: &str = "https://duckduckgo.com/";
const DDG_IMAGES_URL: &str = "https://duckduckgo.com/i.js";
const USER_AGENT: &str = concat!("notecraft/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct DdgResponse {
    #[serde(default)]
    results: Vec<DdgResult>,
}

#[derive(Deserialize)]
struct DdgResult {
    image: String,
}

/// DuckDuckGo image search (no API key).
///
/// Two requests per query: the HTML search page yields a `vqd` token, and
/// the JSON image endpoint takes it. DuckDuckGo answers throttled clients
/// with 403 or 429.
pub struct DuckDuckGoImages {
    client: reqwest::Client,
}

impl DuckDuckGoImages {
    pub fn new(timeout_secs: u64) -> Result<Self, NoteCraftError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| NoteCraftError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn check_status(status: StatusCode) -> Result<(), SearchFailure> {
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            Err(SearchFailure::RateLimited)
        } else if !status.is_success() {
            Err(SearchFailure::Transport(format!("HTTP {status}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ImageSearch for DuckDuckGoImages {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, SearchFailure> {
        let transport = |e: reqwest::Error| SearchFailure::Transport(e.to_string());

        let page = self
            .client
            .get(DDG_URL)
            .query(&[("q", query), ("iax", "images"), ("ia", "images")])
            .send()
            .await
            .map_err(transport)?;
        Self::check_status(page.status())?;
        let html = page.text().await.map_err(transport)?;
        let vqd = RE_VQD
            .captures(&html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| SearchFailure::Transport("search token not found".into()))?;

        let response = self
            .client
            .get(DDG_IMAGES_URL)
            .header("Referer", DDG_URL)
            .query(&[
                ("l", "us-en"),
                ("o", "json"),
                ("q", query),
                ("vqd", vqd.as_str()),
                ("f", ",,,,,"),
                ("p", "1"),
            ])
            .send()
            .await
            .map_err(transport)?;
        Self::check_status(response.status())?;
        let body: DdgResponse = response.json().await.map_err(transport)?;

        Ok(body
            .results
            .into_iter()
            .map(|r| r.image)
            .take(max_results)
            .collect())
    }
}

/// Fetches images over HTTP with reqwest.
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, NoteCraftError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| NoteCraftError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, String), String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let declared = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = response.bytes().await.map_err(|e| e.to_string())?.to_vec();

        // Servers lie about content types; trust the bytes first.
        let mime = sniff_image_mime(&bytes)
            .map(str::to_string)
            .or(declared.filter(|m| m.starts_with("image/")))
            .ok_or_else(|| "response is not an image".to_string())?;
        Ok((bytes, mime))
    }
}

// ── Resolver ─────────────────────────────────────────────────────────────────

/// Result of one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResolution {
    pub text: String,
    pub resolved: usize,
    pub dropped: usize,
}

/// Replaces image placeholders using a search and a fetcher.
#[derive(Clone)]
pub struct ImageResolver {
    search: Arc<dyn ImageSearch>,
    fetcher: Arc<dyn ImageFetcher>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    candidates: usize,
}

impl ImageResolver {
    pub fn new(
        search: Arc<dyn ImageSearch>,
        fetcher: Arc<dyn ImageFetcher>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
        candidates: usize,
    ) -> Self {
        Self {
            search,
            fetcher,
            sleeper,
            policy,
            candidates: candidates.max(1),
        }
    }

    /// DuckDuckGo search, HTTP fetcher and real sleeps, configured from `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, NoteCraftError> {
        Ok(Self::new(
            Arc::new(DuckDuckGoImages::new(config.download_timeout_secs)?),
            Arc::new(HttpImageFetcher::new(config.download_timeout_secs)?),
            Arc::new(TokioSleeper),
            RetryPolicy {
                max_retries: config.search_max_retries,
                base_delay: Duration::from_millis(config.search_backoff_ms),
            },
            config.image_candidates,
        ))
    }

    /// Number of placeholders in `text`.
    pub fn count_placeholders(text: &str) -> usize {
        RE_PLACEHOLDER.find_iter(text).count()
    }

    /// Resolve every placeholder in `text`, in order.
    pub async fn resolve(&self, text: &str, embed: bool) -> Result<ImageResolution, NoteCraftError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut resolved = 0;
        let mut dropped = 0;

        for caps in RE_PLACEHOLDER.captures_iter(text) {
            let (Some(whole), Some(desc)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&text[last..whole.start()]);
            last = whole.end();

            let description = desc.as_str().trim();
            match self.resolve_one(description, embed).await? {
                Some(url) => {
                    out.push_str(&format!("![{}]({})", alt_text(description), url));
                    resolved += 1;
                }
                None => dropped += 1,
            }
        }
        out.push_str(&text[last..]);

        if resolved + dropped > 0 {
            info!("Images: {} resolved, {} dropped", resolved, dropped);
        }
        Ok(ImageResolution {
            text: out,
            resolved,
            dropped,
        })
    }

    /// URL (or data URI) for one description; `None` drops the placeholder.
    async fn resolve_one(&self, description: &str, embed: bool) -> Result<Option<String>, NoteCraftError> {
        if description.is_empty() {
            return Ok(None);
        }
        let candidates = self.search_with_backoff(description).await?;

        for url in candidates.iter().filter(|u| u.starts_with("http")) {
            if !embed {
                return Ok(Some(url.clone()));
            }
            match self.fetcher.fetch(url).await {
                Ok((bytes, mime)) => {
                    debug!("Embedded {} ({} bytes) for '{}'", mime, bytes.len(), description);
                    return Ok(Some(data_uri(&bytes, &mime)));
                }
                Err(e) => debug!("Candidate {} failed: {}", url, e),
            }
        }
        warn!("No usable image for '{}', dropping placeholder", description);
        Ok(None)
    }

    async fn search_with_backoff(&self, query: &str) -> Result<Vec<String>, NoteCraftError> {
        let mut retry = 0u32;
        loop {
            match self.search.search(query, self.candidates).await {
                Ok(urls) => return Ok(urls),
                Err(SearchFailure::Transport(e)) => {
                    warn!("Image search failed for '{}': {}", query, e);
                    return Ok(Vec::new());
                }
                Err(SearchFailure::RateLimited) => {
                    if retry >= self.policy.max_retries {
                        return Err(NoteCraftError::RateLimited { attempts: retry + 1 });
                    }
                    let delay = self.policy.delay(retry);
                    warn!(
                        "Image search rate-limited; retry {}/{} after {:?}",
                        retry + 1,
                        self.policy.max_retries,
                        delay
                    );
                    self.sleeper.sleep(delay).await;
                    retry += 1;
                }
            }
        }
    }
}

/// Remove every placeholder without searching, for notes generated without images.
pub fn strip_placeholders(text: &str) -> String {
    RE_PLACEHOLDER.replace_all(text, "").into_owned()
}

/// Alt text with brackets removed so it cannot close the link early.
fn alt_text(description: &str) -> String {
    description.replace(['[', ']'], "")
}
