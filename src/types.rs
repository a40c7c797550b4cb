use serde::Deserialize;

// GitHub API response structures

/// One element of the stargazers array. Every field is optional so that a
/// single malformed entry can be skipped without rejecting the whole page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubStargazer {
    pub login: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl GitHubStargazer {
    pub fn is_user(&self) -> bool {
        self.kind.as_deref() == Some("User")
    }
}

/// Error object GitHub returns instead of an array.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubErrorBody {
    pub message: Option<String>,
}
