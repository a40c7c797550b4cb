use crate::error::StargazersError;
use crate::http::{header_get, HttpHeaders};
use crate::models::RateLimitState;
use crate::types::GitHubErrorBody;
use chrono::{DateTime, Utc};
use tracing::debug;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

const RATE_LIMIT_MARKER: &str = "API rate limit";
const GENERIC_MESSAGE: &str = "Generic error";

/// What a non-array GitHub response means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFailure {
    RateLimited(RateLimitState),
    GenericApiError { message: String },
    MalformedResponse,
}

impl From<ApiFailure> for StargazersError {
    fn from(failure: ApiFailure) -> Self {
        match failure {
            ApiFailure::RateLimited(state) => StargazersError::RateLimitExceeded(state),
            ApiFailure::GenericApiError { message } => StargazersError::ApiError(message),
            ApiFailure::MalformedResponse => StargazersError::MalformedResponse(
                "expected a JSON array or error object".to_string(),
            ),
        }
    }
}

pub struct RateLimitInspector;

impl RateLimitInspector {
    /// Classifies an error body. A JSON object whose `message` mentions the
    /// API rate limit is throttling; any other object is a generic API error.
    pub fn classify(body: &[u8], headers: &HttpHeaders, now: DateTime<Utc>) -> ApiFailure {
        let error: GitHubErrorBody = match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(value @ serde_json::Value::Object(_)) => match serde_json::from_value(value) {
                Ok(error) => error,
                Err(e) => {
                    debug!("Unexpected error object shape: {}", e);
                    GitHubErrorBody::default()
                }
            },
            Ok(_) => return ApiFailure::MalformedResponse,
            Err(e) => {
                debug!("Response body is not JSON: {}", e);
                return ApiFailure::MalformedResponse;
            }
        };

        let message = error.message.unwrap_or_default();
        if message.contains(RATE_LIMIT_MARKER) {
            let state = Self::state(headers, now);
            debug!(
                limit = state.limit,
                remaining = state.remaining,
                wait_seconds = state.wait_seconds,
                "Rate limit exceeded"
            );
            ApiFailure::RateLimited(state)
        } else if message.is_empty() {
            ApiFailure::GenericApiError {
                message: GENERIC_MESSAGE.to_string(),
            }
        } else {
            ApiFailure::GenericApiError { message }
        }
    }

    /// Rate limit headers of a successful response, if GitHub sent them.
    pub fn from_headers(headers: &HttpHeaders, now: DateTime<Utc>) -> Option<RateLimitState> {
        header_get(headers, REMAINING_HEADER)?;
        Some(Self::state(headers, now))
    }

    // Missing or unparsable headers read as 0.
    fn state(headers: &HttpHeaders, now: DateTime<Utc>) -> RateLimitState {
        let number = |name: &str| {
            header_get(headers, name)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(0)
        };

        let limit = u32::try_from(number(LIMIT_HEADER)).unwrap_or(0);
        let remaining = u32::try_from(number(REMAINING_HEADER)).unwrap_or(0);
        let reset = number(RESET_HEADER);
        let reset_time = DateTime::from_timestamp(reset, 0).unwrap_or_default();

        RateLimitState {
            limit,
            remaining,
            reset_time,
            wait_seconds: reset.saturating_sub(now.timestamp()),
        }
    }
}
