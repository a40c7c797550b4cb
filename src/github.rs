use crate::config::Configuration;
use crate::error::{Result, StargazersError};
use crate::http::{self, FetchError, HttpFetcher, HttpRequest, HttpResponse, StopSignal};
use crate::models::{RateLimitState, Stargazer};
use crate::rate_limit::RateLimitInspector;
use crate::types::GitHubStargazer;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const PAGE_TIMEOUT: Duration = Duration::from_secs(30);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(20);

const ACCEPT: &str = "application/vnd.github.v3+json";
const LOW_RATE_LIMIT: u32 = 10;

/// One page of stargazers after filtering.
#[derive(Debug, Clone)]
pub struct StargazerPage {
    pub page: u32,
    pub stargazers: Vec<Stargazer>,
    /// Entries dropped because they were not users or lacked a login/avatar.
    pub skipped: usize,
    pub rate_limit: Option<RateLimitState>,
}

#[derive(Clone)]
pub struct GitHubClient {
    fetcher: Arc<dyn HttpFetcher>,
    page_timeout: Duration,
}

impl GitHubClient {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        GitHubClient {
            fetcher,
            page_timeout: PAGE_TIMEOUT,
        }
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    fn request(&self, config: &Configuration, url: &Url) -> HttpRequest {
        let request = HttpRequest::get(url.as_str()).header("Accept", ACCEPT);
        if config.has_token() {
            request.header("Authorization", format!("token {}", config.auth_token))
        } else {
            request
        }
    }

    /// Fetch a page of stargazers for the configured repository
    pub async fn fetch_stargazers_page(
        &self,
        config: &Configuration,
        page: u32,
        per_page: u32,
        stop: &StopSignal,
    ) -> Result<StargazerPage> {
        let url = config.page_url(page, per_page)?;
        let request = self.request(config, &url);

        info!(%url, "Requesting stargazers");

        let response = http::fetch(self.fetcher.as_ref(), request, self.page_timeout, stop)
            .await
            .map_err(|e| fetch_error(e, &url))?;

        let rate_limit = RateLimitInspector::from_headers(&response.headers, Utc::now());
        if let Some(state) = rate_limit.as_ref().filter(|s| s.remaining < LOW_RATE_LIMIT) {
            warn!(
                remaining = state.remaining,
                limit = state.limit,
                "Rate limit low"
            );
        }

        let (stargazers, skipped) = parse_stargazers(&response)?;

        debug!(
            page,
            loaded = stargazers.len(),
            skipped,
            "Parsed stargazers page"
        );

        Ok(StargazerPage {
            page,
            stargazers,
            skipped,
            rate_limit,
        })
    }

    /// Checks that the configured URL answers with a stargazer array,
    /// requesting a single item. Returns the URL that was probed.
    pub async fn probe(&self, config: &Configuration) -> Result<Url> {
        let url = config.page_url(1, 1)?;
        let request = self.request(config, &url);

        info!(%url, "Probing configuration");

        let response = http::fetch(
            self.fetcher.as_ref(),
            request,
            PROBE_TIMEOUT,
            &StopSignal::new(),
        )
        .await
        .map_err(|e| fetch_error(e, &url))?;

        parse_stargazers(&response)?;
        Ok(url)
    }
}

fn fetch_error(error: FetchError, url: &Url) -> StargazersError {
    match error {
        FetchError::Cancelled => StargazersError::Cancelled,
        FetchError::Timeout => StargazersError::Timeout,
        FetchError::Transport(description) => {
            StargazersError::NetworkError(format!("{}\nURL: {}", description, url))
        }
    }
}

/// Splits a page body into usable stargazers and a count of skipped entries.
/// Anything but an array is classified as an API failure.
fn parse_stargazers(response: &HttpResponse) -> Result<(Vec<Stargazer>, usize)> {
    let entries = match serde_json::from_slice::<serde_json::Value>(&response.body) {
        Ok(serde_json::Value::Array(entries)) => entries,
        _ => {
            let failure =
                RateLimitInspector::classify(&response.body, &response.headers, Utc::now());
            return Err(failure.into());
        }
    };

    let mut stargazers = Vec::with_capacity(entries.len());
    let mut skipped = 0;

    for entry in entries {
        let parsed: GitHubStargazer = match serde_json::from_value(entry.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(%entry, "Invalid stargazer: {}", e);
                skipped += 1;
                continue;
            }
        };

        if !parsed.is_user() {
            warn!(%entry, "Invalid stargazer");
            skipped += 1;
            continue;
        }

        match (parsed.login.as_deref(), parsed.avatar_url.as_deref()) {
            (Some(login), Some(avatar)) if !login.is_empty() && !avatar.is_empty() => {
                let stargazer = Stargazer::new(login, avatar);
                if stargazer.avatar_url.is_none() {
                    debug!(login, avatar, "Avatar URL does not parse");
                }
                stargazers.push(stargazer);
            }
            _ => {
                warn!(%entry, "Stargazer without login or avatar");
                skipped += 1;
            }
        }
    }

    Ok((stargazers, skipped))
}
