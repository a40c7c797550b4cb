//! Paginated loading of a GitHub repository's stargazers, with lazy avatar
//! downloads and a single-flight session controller.

pub mod actors;
pub mod avatar;
pub mod config;
pub mod error;
pub mod github;
pub mod http;
pub mod loader;
pub mod models;
pub mod rate_limit;
pub mod types;

pub use actors::{LoadObserver, StargazerController};
pub use config::{Configuration, JsonFileStore, MemoryStore, SettingsStore};
pub use error::{Result, StargazersError};
pub use models::{AvatarState, SessionOutcome, Stargazer};
