//! Transport boundary: one request, one response, with a per-call deadline
//! and cooperative cancellation.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

const USER_AGENT: &str = concat!("stargazers/", env!("CARGO_PKG_VERSION"));

/// HTTP headers as key/value pairs. Lookups are case-insensitive.
pub type HttpHeaders = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HttpHeaders,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// First header value matching `name`, ignoring ASCII case.
pub fn header_get<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("cancelled")]
    Cancelled,

    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Transport(String),
}

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError>;
}

/// Cooperative stop flag shared between a session's owner and its task.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        loop {
            // Registered before the flag check so a concurrent stop is not missed.
            let notified = self.inner.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Sleeps for `delay` unless stopped first. Returns `false` when stopped.
    pub async fn sleep(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.is_stopped();
        }
        tokio::select! {
            _ = self.stopped() => false,
            _ = tokio::time::sleep(delay) => !self.is_stopped(),
        }
    }
}

/// Issues `request` with a deadline, resolving as `Cancelled` if `stop`
/// fires first. Either way the pending request future is dropped, which
/// aborts the underlying connection.
pub async fn fetch(
    fetcher: &dyn HttpFetcher,
    request: HttpRequest,
    timeout: Duration,
    stop: &StopSignal,
) -> Result<HttpResponse, FetchError> {
    if stop.is_stopped() {
        return Err(FetchError::Cancelled);
    }

    let url = request.url.clone();
    tokio::select! {
        biased;
        _ = stop.stopped() => {
            debug!(%url, "Request cancelled");
            Err(FetchError::Cancelled)
        }
        result = tokio::time::timeout(timeout, fetcher.send(request)) => match result {
            Ok(response) => response,
            Err(_) => {
                debug!(%url, timeout_secs = timeout.as_secs_f64(), "Request timed out");
                Err(FetchError::Timeout)
            }
        }
    }
}

/// Client-level timeouts and connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetcherSettings {
    /// Time allowed to establish the connection.
    pub request_timeout: Duration,
    /// Time allowed for the whole exchange, body included.
    pub resource_timeout: Duration,
    /// Idle connections kept in the pool per host. Does not limit how many
    /// requests run at once.
    pub max_idle_per_host: usize,
}

impl FetcherSettings {
    /// Stargazer list pages: serialized, generous timeouts.
    pub fn stargazers() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            resource_timeout: Duration::from_secs(120),
            max_idle_per_host: 1,
        }
    }

    /// Avatar images: a few in parallel, shorter timeouts.
    pub fn avatars() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            resource_timeout: Duration::from_secs(60),
            max_idle_per_host: 5,
        }
    }
}

/// `HttpFetcher` backed by reqwest.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(settings: FetcherSettings) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(settings.request_timeout)
            .timeout(settings.resource_timeout)
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .build()
            .map_err(|e| crate::error::StargazersError::NetworkError(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        let headers: HttpHeaders = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let body = response.bytes().await.map_err(transport_error)?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Never;

    #[async_trait]
    impl HttpFetcher for Never {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, FetchError> {
            futures::future::pending().await
        }
    }

    #[test]
    fn header_lookup_ignores_case() {
        let headers = vec![("X-RateLimit-Limit".to_string(), "60".to_string())];
        assert_eq!(header_get(&headers, "x-ratelimit-limit"), Some("60"));
        assert_eq!(header_get(&headers, "x-ratelimit-reset"), None);
    }

    #[test]
    fn avatar_client_keeps_more_idle_connections() {
        assert_eq!(FetcherSettings::stargazers().max_idle_per_host, 1);
        assert_eq!(FetcherSettings::avatars().max_idle_per_host, 5);
        assert!(ReqwestFetcher::new(FetcherSettings::avatars()).is_ok());
    }

    #[tokio::test]
    async fn deadline_resolves_as_timeout() {
        let stop = StopSignal::new();
        let result = fetch(
            &Never,
            HttpRequest::get("http://localhost/"),
            Duration::from_millis(20),
            &stop,
        )
        .await;
        assert_eq!(result, Err(FetchError::Timeout));
    }

    #[tokio::test]
    async fn stop_resolves_as_cancelled() {
        let stop = StopSignal::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.stop();
        });

        let result = fetch(
            &Never,
            HttpRequest::get("http://localhost/"),
            Duration::from_secs(30),
            &stop,
        )
        .await;
        assert_eq!(result, Err(FetchError::Cancelled));
    }

    #[tokio::test]
    async fn already_stopped_never_sends() {
        let stop = StopSignal::new();
        stop.stop();
        let result = fetch(
            &Never,
            HttpRequest::get("http://localhost/"),
            Duration::from_secs(30),
            &stop,
        )
        .await;
        assert_eq!(result, Err(FetchError::Cancelled));
        assert!(!stop.sleep(Duration::from_secs(5)).await);
    }
}
