use crate::config::ConfigError;
use crate::models::RateLimitState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StargazersError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("{0}")]
    RateLimitExceeded(RateLimitState),

    #[error("GitHub API error: {0}")]
    ApiError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Configuration not saved: {0}")]
    PersistenceFailure(String),

    #[error("No stargazers found for repository {repo} of user {owner}")]
    NoStargazersFound { owner: String, repo: String },

    /// The request was cancelled by our own stop request. Not a failure.
    #[error("Request cancelled")]
    Cancelled,

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Controller error: {0}")]
    ControllerError(String),
}

impl StargazersError {
    /// Rate-limit details, when this error came from GitHub throttling.
    pub fn rate_limit(&self) -> Option<&RateLimitState> {
        match self {
            StargazersError::RateLimitExceeded(state) => Some(state),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StargazersError>;
