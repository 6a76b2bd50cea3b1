//! Outbound HTTP client with pacing and retry
//!
//! Consecutive requests are spaced by `request_delay`. Network errors and
//! HTTP 403 (which the protocol APIs return transiently under load) are
//! retried with exponential backoff plus random jitter, capped at
//! `max_delay`. Other non-success statuses fail immediately.

use defirates_common::config::HttpSettings;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, ORIGIN, REFERER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::SourceError;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Longest error body kept in a [`SourceError::Status`]
const MAX_ERROR_BODY: usize = 200;

pub struct ResilientHttpClient {
    client: reqwest::Client,
    settings: HttpSettings,
    last_request: Mutex<Option<Instant>>,
}

impl ResilientHttpClient {
    pub fn new(settings: HttpSettings) -> Result<Self, SourceError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout);

        if let Some(proxy_url) = &settings.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| SourceError::Http {
                url: proxy_url.clone(),
                message: format!("invalid proxy: {}", e),
            })?;
            info!("Using proxy: {}", proxy_url);
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| SourceError::Http {
            url: String::new(),
            message: e.to_string(),
        })?;

        Ok(Self {
            client,
            settings,
            last_request: Mutex::new(None),
        })
    }

    /// GET `url` and decode the JSON body
    ///
    /// `site` is the protocol's web app origin, sent as `Origin`/`Referer`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, site: &str) -> Result<T, SourceError> {
        self.pace().await;

        let attempts = self.settings.max_retries + 1;
        let mut delay = self.settings.initial_delay;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            debug!(url, attempt, "GET");

            match self.client.get(url).headers(browser_headers(site)).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body = response.bytes().await.map_err(|e| SourceError::Http {
                            url: url.to_string(),
                            message: e.to_string(),
                        })?;
                        return serde_json::from_slice(&body).map_err(|e| SourceError::Decode {
                            url: url.to_string(),
                            message: e.to_string(),
                        });
                    }

                    if status == StatusCode::FORBIDDEN && attempt < attempts {
                        let wait = with_jitter(delay);
                        warn!(url, "Attempt {}/{} got 403, retrying in {:?}", attempt, attempts, wait);
                        tokio::time::sleep(wait).await;
                        delay = (delay * 2).min(self.settings.max_delay);
                        last_error = "status 403".to_string();
                        continue;
                    }

                    let mut body = response.text().await.unwrap_or_default();
                    truncate_on_char_boundary(&mut body, MAX_ERROR_BODY);
                    return Err(SourceError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        let wait = with_jitter(delay);
                        warn!(url, "Attempt {}/{} failed: {}, retrying in {:?}", attempt, attempts, e, wait);
                        tokio::time::sleep(wait).await;
                        delay = (delay * 2).min(self.settings.max_delay);
                    }
                }
            }
        }

        Err(SourceError::Http {
            url: url.to_string(),
            message: format!("failed after {} attempts: {}", attempts, last_error),
        })
    }

    /// Wait until `request_delay` has passed since the previous request
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.settings.request_delay {
                let wait = self.settings.request_delay - elapsed;
                debug!("Pacing: waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// `delay` plus up to half of it again
fn with_jitter(delay: Duration) -> Duration {
    let half_ms = (delay.as_millis() / 2) as u64;
    if half_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..half_ms))
}

fn browser_headers(site: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    if let Ok(origin) = HeaderValue::from_str(site) {
        headers.insert(ORIGIN, origin);
    }
    if let Ok(referer) = HeaderValue::from_str(&format!("{}/", site.trim_end_matches('/'))) {
        headers.insert(REFERER, referer);
    }
    headers
}

fn truncate_on_char_boundary(text: &mut String, max: usize) {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(1000);
        for _ in 0..50 {
            let wait = with_jitter(base);
            assert!(wait >= base && wait < Duration::from_millis(1500));
        }
        assert_eq!(with_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_browser_headers() {
        let headers = browser_headers("https://app.pendle.finance");
        assert_eq!(headers[ORIGIN], "https://app.pendle.finance");
        assert_eq!(headers[REFERER], "https://app.pendle.finance/");
        assert_eq!(headers[ACCEPT], "application/json");
    }

    #[test]
    fn test_truncate_respects_utf8() {
        let mut text = "ééééé".to_string();
        truncate_on_char_boundary(&mut text, 3);
        assert_eq!(text, "é");
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let settings = HttpSettings {
            proxy_url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(ResilientHttpClient::new(settings).is_err());
    }
}
