use crate::error::StargazersError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// A GitHub user who starred the target repository.
///
/// The login is the identity; avatar state lives in the
/// [`AvatarCache`](crate::avatar::AvatarCache) keyed by that login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stargazer {
    pub login: String,
    pub avatar_url: Option<Url>,
}

impl Stargazer {
    pub fn new(login: impl Into<String>, avatar: &str) -> Self {
        Self {
            login: login.into(),
            avatar_url: Url::parse(avatar).ok(),
        }
    }
}

impl fmt::Display for Stargazer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.avatar_url {
            Some(url) => write!(f, "{} {}", self.login, url),
            None => write!(f, "{} (no avatar)", self.login),
        }
    }
}

/// Target size of a rendered avatar, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DisplaySize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A downloaded avatar, resized and re-encoded as PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarImage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub enum AvatarState {
    #[default]
    Unfetched,
    Fetching,
    Loaded(Arc<AvatarImage>),
    Errored,
}

impl AvatarState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, AvatarState::Loaded(_))
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, AvatarState::Errored)
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self, AvatarState::Fetching)
    }
}

/// Rate limit information parsed from `x-ratelimit-*` headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitState {
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    /// Seconds until `reset_time`, measured when the response was inspected.
    pub wait_seconds: i64,
}

impl RateLimitState {
    pub fn is_limited(&self) -> bool {
        self.remaining == 0
    }
}

impl fmt::Display for RateLimitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "API rate limit ({}) exceeded, {} remaining. Must wait {} seconds.",
            self.limit, self.remaining, self.wait_seconds
        )
    }
}

/// How a load session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// `count` stargazers were appended by this session.
    Success { count: usize },
    Error(StargazersError),
    /// Stopped on request; the list was discarded.
    Cancelled,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Success { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionOutcome::Cancelled)
    }

    pub fn error(&self) -> Option<&StargazersError> {
        match self {
            SessionOutcome::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Success { count } => write!(f, "Loaded {} stargazers", count),
            SessionOutcome::Error(e) => write!(f, "{}", e),
            SessionOutcome::Cancelled => write!(f, "Stopped"),
        }
    }
}
