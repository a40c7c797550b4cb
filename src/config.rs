//! Runtime settings: the key-value store contract, the stores that implement
//! it, and the `Configuration` snapshot the loader works from.

use crate::error::{Result, StargazersError};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

pub const DEFAULT_GITHUB_URL: &str = "https://api.github.com/repos/[owner]/[repo]/stargazers";
pub const DEFAULT_OWNER: &str = "octocat";
pub const DEFAULT_REPO: &str = "hello-world";

pub const AUTH_TOKEN_LEN: usize = 40;
pub const MAX_LOAD_DELAY_SECS: f64 = 5.0;
pub const MAX_SPINNER_DELAY_SECS: f64 = 10.0;

/// Page size used when every stargazer is requested.
pub const LOAD_ALL_PAGE_SIZE: u32 = 100;
/// Smallest page size requested for interactive paging.
pub const MIN_BATCH_SIZE: u32 = 10;

const PAGE_QUERY: &str = "page=[page]&per_page=[per_page]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingsKey {
    GithubUrl,
    Owner,
    Repo,
    AuthToken,
    LoadDelay,
    LoadAvatarDelay,
    SpinnerDelay,
    LoadAll,
}

impl SettingsKey {
    pub const ALL: [SettingsKey; 8] = [
        SettingsKey::GithubUrl,
        SettingsKey::Owner,
        SettingsKey::Repo,
        SettingsKey::AuthToken,
        SettingsKey::LoadDelay,
        SettingsKey::LoadAvatarDelay,
        SettingsKey::SpinnerDelay,
        SettingsKey::LoadAll,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingsKey::GithubUrl => "GithubUrl",
            SettingsKey::Owner => "Owner",
            SettingsKey::Repo => "Repo",
            SettingsKey::AuthToken => "AuthToken",
            SettingsKey::LoadDelay => "LoadDelay",
            SettingsKey::LoadAvatarDelay => "LoadAvatarDelay",
            SettingsKey::SpinnerDelay => "SpinnerDelay",
            SettingsKey::LoadAll => "LoadAll",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Text(String),
    Flag(bool),
}

impl SettingValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            SettingValue::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            SettingValue::Flag(b) => Some(*b),
            SettingValue::Text(s) => s.parse().ok(),
        }
    }
}

/// Key-value persistence for settings.
///
/// `set` returns `false` when the value could not be persisted.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: SettingsKey) -> Option<SettingValue>;
    fn set(&self, key: SettingsKey, value: SettingValue) -> bool;
}

/// Process-local store, mostly for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<SettingsKey, SettingValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configuration(config: &Configuration) -> Self {
        let store = Self::new();
        for (key, value) in config.to_values() {
            store.set(key, value);
        }
        store
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: SettingsKey) -> Option<SettingValue> {
        self.values.lock().ok()?.get(&key).cloned()
    }

    fn set(&self, key: SettingsKey, value: SettingValue) -> bool {
        match self.values.lock() {
            Ok(mut values) => {
                values.insert(key, value);
                true
            }
            Err(_) => false,
        }
    }
}

/// Settings kept in a JSON object on disk, rewritten on every `set`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let raw = std::fs::read(&path)?;
            if raw.iter().all(u8::is_ascii_whitespace) {
                BTreeMap::new()
            } else {
                serde_json::from_slice(&raw)?
            }
        } else {
            debug!(path = %path.display(), "Settings file not found, starting with defaults");
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> std::io::Result<()> {
        let raw = serde_json::to_vec_pretty(values)?;
        std::fs::write(&self.path, raw)
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: SettingsKey) -> Option<SettingValue> {
        let values = self.values.lock().ok()?;
        match values.get(key.as_str())? {
            Value::Bool(b) => Some(SettingValue::Flag(*b)),
            Value::String(s) => Some(SettingValue::Text(s.clone())),
            Value::Number(n) => Some(SettingValue::Text(n.to_string())),
            other => {
                warn!(key = key.as_str(), value = %other, "Ignoring unsupported setting value");
                None
            }
        }
    }

    fn set(&self, key: SettingsKey, value: SettingValue) -> bool {
        let Ok(mut values) = self.values.lock() else {
            return false;
        };
        let json = match value {
            SettingValue::Text(s) => Value::String(s),
            SettingValue::Flag(b) => Value::Bool(b),
        };
        values.insert(key.as_str().to_string(), json);

        match self.persist(&values) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), "Failed to write settings: {}", e);
                false
            }
        }
    }
}

/// Validation failures, worded for display to the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("The github URL can't be empty.")]
    EmptyUrl,

    #[error("The token can be empty or 40 chars long (got {0}).")]
    InvalidTokenLength(usize),

    #[error("The user-name of the repository owner can't be empty.")]
    EmptyOwner,

    #[error("The repository name can't be empty.")]
    EmptyRepo,

    #[error("The stargazers load delay can be between 0 and 5 seconds (decimals allowed).")]
    LoadDelayOutOfRange(f64),

    #[error("The avatar load delay can be between 0 and 5 seconds (decimals allowed).")]
    AvatarDelayOutOfRange(f64),

    #[error("The spinner wait delay can be between 0 and 10 seconds (decimals allowed).")]
    SpinnerDelayOutOfRange(f64),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Throttling delays, in seconds. Passed through unchanged to the loader,
/// the avatar cache and the spinner timer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Delays {
    pub load: f64,
    pub load_avatar: f64,
    pub spinner: f64,
}

impl Delays {
    pub fn load(&self) -> Duration {
        secs(self.load)
    }

    pub fn load_avatar(&self) -> Duration {
        secs(self.load_avatar)
    }

    pub fn spinner(&self) -> Duration {
        secs(self.spinner)
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Snapshot of the settings a load session works from.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub github_url: String,
    pub owner: String,
    pub repo: String,
    pub auth_token: String,
    pub load_all: bool,
    pub delays: Delays,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            github_url: DEFAULT_GITHUB_URL.to_string(),
            owner: DEFAULT_OWNER.to_string(),
            repo: DEFAULT_REPO.to_string(),
            auth_token: String::new(),
            load_all: false,
            delays: Delays::default(),
        }
    }
}

impl Configuration {
    /// Reads every key, falling back to the defaults for missing ones.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let defaults = Self::default();
        let text = |key: SettingsKey, default: &str| {
            store
                .get(key)
                .and_then(|v| v.as_text().map(str::to_string))
                .unwrap_or_else(|| default.to_string())
        };
        let delay = |key: SettingsKey| {
            store
                .get(key)
                .and_then(|v| v.as_text().map(|s| parse_delay(key, s)))
                .unwrap_or(0.0)
        };

        Self {
            github_url: text(SettingsKey::GithubUrl, &defaults.github_url),
            owner: text(SettingsKey::Owner, &defaults.owner),
            repo: text(SettingsKey::Repo, &defaults.repo),
            auth_token: text(SettingsKey::AuthToken, &defaults.auth_token),
            load_all: store
                .get(SettingsKey::LoadAll)
                .and_then(|v| v.as_flag())
                .unwrap_or(defaults.load_all),
            delays: Delays {
                load: delay(SettingsKey::LoadDelay),
                load_avatar: delay(SettingsKey::LoadAvatarDelay),
                spinner: delay(SettingsKey::SpinnerDelay),
            },
        }
    }

    /// Writes every key. Fails when the store reports any write as lost.
    pub fn save(&self, store: &dyn SettingsStore) -> Result<()> {
        let failed: Vec<&str> = self
            .to_values()
            .into_iter()
            .filter_map(|(key, value)| (!store.set(key, value)).then_some(key.as_str()))
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StargazersError::PersistenceFailure(format!(
                "could not write {}",
                failed.join(", ")
            )))
        }
    }

    fn to_values(&self) -> Vec<(SettingsKey, SettingValue)> {
        vec![
            (SettingsKey::GithubUrl, SettingValue::Text(self.github_url.clone())),
            (SettingsKey::Owner, SettingValue::Text(self.owner.clone())),
            (SettingsKey::Repo, SettingValue::Text(self.repo.clone())),
            (SettingsKey::AuthToken, SettingValue::Text(self.auth_token.clone())),
            (SettingsKey::LoadDelay, SettingValue::Text(self.delays.load.to_string())),
            (
                SettingsKey::LoadAvatarDelay,
                SettingValue::Text(self.delays.load_avatar.to_string()),
            ),
            (SettingsKey::SpinnerDelay, SettingValue::Text(self.delays.spinner.to_string())),
            (SettingsKey::LoadAll, SettingValue::Flag(self.load_all)),
        ]
    }

    /// Full check used by the settings editor before saving.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.github_url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }

        let token_len = self.auth_token.chars().count();
        if token_len != 0 && token_len != AUTH_TOKEN_LEN {
            return Err(ConfigError::InvalidTokenLength(token_len));
        }

        if self.owner.is_empty() {
            return Err(ConfigError::EmptyOwner);
        }

        if self.repo.is_empty() {
            return Err(ConfigError::EmptyRepo);
        }

        if !(0.0..=MAX_LOAD_DELAY_SECS).contains(&self.delays.load) {
            return Err(ConfigError::LoadDelayOutOfRange(self.delays.load));
        }

        if !(0.0..=MAX_LOAD_DELAY_SECS).contains(&self.delays.load_avatar) {
            return Err(ConfigError::AvatarDelayOutOfRange(self.delays.load_avatar));
        }

        if !(0.0..=MAX_SPINNER_DELAY_SECS).contains(&self.delays.spinner) {
            return Err(ConfigError::SpinnerDelayOutOfRange(self.delays.spinner));
        }

        Ok(())
    }

    /// Minimal check a load session needs before touching the network.
    pub fn ensure_loadable(&self) -> std::result::Result<(), ConfigError> {
        if self.github_url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if self.owner.is_empty() {
            return Err(ConfigError::EmptyOwner);
        }
        if self.repo.is_empty() {
            return Err(ConfigError::EmptyRepo);
        }
        self.page_url(1, 1).map(|_| ())
    }

    /// Whether the source settings differ enough from `previous` that the
    /// new URL should be probed before saving. Owner and repo compare
    /// case-insensitively, as GitHub does.
    pub fn requires_probe(&self, previous: &Configuration) -> bool {
        self.github_url != previous.github_url
            || self.auth_token != previous.auth_token
            || !self.owner.eq_ignore_ascii_case(&previous.owner)
            || !self.repo.eq_ignore_ascii_case(&previous.repo)
    }

    /// Page size for one request.
    pub fn batch_size(&self, viewport_rows: usize) -> u32 {
        if self.load_all {
            LOAD_ALL_PAGE_SIZE
        } else {
            let rows = u32::try_from(viewport_rows.saturating_mul(2)).unwrap_or(u32::MAX);
            rows.max(MIN_BATCH_SIZE)
        }
    }

    /// Expands the URL template for one page.
    pub fn page_url(&self, page: u32, per_page: u32) -> std::result::Result<Url, ConfigError> {
        let mut template = self.github_url.clone();
        if !template.contains("[page]") {
            template.push(if template.contains('?') { '&' } else { '?' });
            template.push_str(PAGE_QUERY);
        }

        let expanded = template
            .replace("[owner]", &self.owner)
            .replace("[repo]", &self.repo)
            .replace("[per_page]", &per_page.to_string())
            .replace("[page]", &page.to_string());

        Url::parse(&expanded).map_err(|e| ConfigError::InvalidUrl {
            url: expanded.clone(),
            reason: e.to_string(),
        })
    }

    pub fn has_token(&self) -> bool {
        !self.auth_token.is_empty()
    }
}

fn parse_delay(key: SettingsKey, raw: &str) -> f64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0.0;
    }
    raw.parse().unwrap_or_else(|_| {
        warn!(key = key.as_str(), value = raw, "Delay is not a number, using 0");
        0.0
    })
}
