use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::cookie::Jar;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Parameter lists longer than this go out as a POST body even for reads.
const MAX_GET_PARAMS_BYTES: usize = 1_500;

/// The single seam between the wire and every component above it.
pub trait ApiTransport {
    /// Side-effect free call (`action=query`, token fetches).
    fn read(&mut self, params: &[(&str, String)]) -> Result<Value, ApiError>;
    /// State-changing call (`login`, `logout`, `edit`).
    fn write(&mut self, params: &[(&str, String)]) -> Result<Value, ApiError>;
    fn endpoint(&self) -> &str;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub read_delay_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
    /// Cookies seeded into the jar before the first request (SSO pair).
    pub cookies: Vec<(String, String)>,
}

impl MediaWikiClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
            timeout_ms: crate::config::DEFAULT_TIMEOUT_MS,
            read_delay_ms: crate::config::DEFAULT_READ_DELAY_MS,
            max_retries: 2,
            max_write_retries: 1,
            retry_delay_ms: 500,
            cookies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Read,
    Write,
}

pub struct MediaWikiClient {
    client: Client,
    api_url: Url,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let api_url = Url::parse(&config.api_url)
            .with_context(|| format!("invalid MediaWiki API URL: {}", config.api_url))?;

        let jar = Jar::default();
        for (name, value) in &config.cookies {
            jar.add_cookie_str(&format!("{name}={value}"), &api_url);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_provider(Arc::new(jar))
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            api_url,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn send(&mut self, params: &[(&str, String)], kind: RequestKind) -> Result<Value, ApiError> {
        let max_retries = match kind {
            RequestKind::Read => self.config.max_retries,
            RequestKind::Write => self.config.max_write_retries,
        };
        let pairs = encode_params(params);
        let use_post = kind == RequestKind::Write || encoded_len(&pairs) > MAX_GET_PARAMS_BYTES;

        for attempt in 0..=max_retries {
            self.apply_rate_limit();
            let response = self.build_request(&pairs, use_post).send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            warn!(%status, attempt, "retrying MediaWiki request");
                            self.wait_before_retry(attempt, kind);
                            continue;
                        }
                        return Err(ApiError::HttpStatus(status.as_u16()));
                    }

                    let payload: Value = response.json().map_err(|error| {
                        ApiError::malformed(format!("failed to decode JSON response: {error}"))
                    })?;
                    return check_payload(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        warn!(%error, attempt, "retrying MediaWiki request");
                        self.wait_before_retry(attempt, kind);
                        continue;
                    }
                    return Err(error.into());
                }
            }
        }

        Err(ApiError::Transport(
            "MediaWiki API request exhausted retry budget".to_string(),
        ))
    }

    fn build_request(&self, pairs: &[(String, String)], use_post: bool) -> RequestBuilder {
        let builder = if use_post {
            self.client.post(self.api_url.clone()).form(pairs)
        } else {
            self.client.get(self.api_url.clone()).query(pairs)
        };
        builder.header("User-Agent", self.config.user_agent.clone())
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.read_delay_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, kind: RequestKind) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = match kind {
            RequestKind::Read => 1u64,
            RequestKind::Write => 2u64,
        };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }
}

impl ApiTransport for MediaWikiClient {
    fn read(&mut self, params: &[(&str, String)]) -> Result<Value, ApiError> {
        self.send(params, RequestKind::Read)
    }

    fn write(&mut self, params: &[(&str, String)]) -> Result<Value, ApiError> {
        self.send(params, RequestKind::Write)
    }

    fn endpoint(&self) -> &str {
        &self.config.api_url
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Prefix the JSON format selectors. Values are sent verbatim, empty ones
/// included, since an empty continuation cursor is still a cursor.
pub fn encode_params(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    pairs.extend(
        params
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone())),
    );
    pairs
}

fn encoded_len(pairs: &[(String, String)]) -> usize {
    pairs
        .iter()
        .map(|(key, value)| key.len() + value.len() + 2)
        .sum()
}

/// Surface an API-level `error` object as a typed error.
pub fn check_payload(payload: Value) -> Result<Value, ApiError> {
    if let Some(error) = payload.get("error") {
        return Err(ApiError::from_error_object(error));
    }
    if let Some(warnings) = payload.get("warnings") {
        debug!(%warnings, "MediaWiki API warnings");
    }
    Ok(payload)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}
