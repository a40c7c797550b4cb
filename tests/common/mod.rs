#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use stargazers::actors::{ControllerArgs, LoadObserver, StargazerController};
use stargazers::avatar::AvatarCache;
use stargazers::config::{Configuration, Delays, MemoryStore};
use stargazers::error::StargazersError;
use stargazers::github::GitHubClient;
use stargazers::http::{FetchError, HttpFetcher, HttpRequest, HttpResponse};
use stargazers::loader::{LoadGate, StargazerListLoader};
use stargazers::models::{AvatarState, RateLimitState, SessionOutcome, Stargazer};
use std::collections::VecDeque;
use std::io::Cursor;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

pub const TEST_URL: &str = "https://api.example.com/repos/[owner]/[repo]/stargazers";
const WAIT: Duration = Duration::from_secs(5);

/// One scripted reply, consumed in request order.
pub enum Reply {
    Respond(HttpResponse),
    Fail(FetchError),
    /// Never answers; only a stop or a timeout ends the request.
    Hang,
    /// Answers once the notify is signalled.
    Gated(Arc<Notify>, HttpResponse),
    /// Panics inside the request.
    Panic,
}

/// Fetcher that plays back a script and records every request.
/// When the script runs out it answers with an empty array.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub async fn wait_for_requests(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.request_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {} requests, saw {}", count, self.request_count()));
    }
}

#[async_trait]
impl HttpFetcher for ScriptedFetcher {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        self.requests.lock().unwrap().push(request);
        let reply = self.script.lock().unwrap().pop_front();

        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::Hang) => futures::future::pending().await,
            Some(Reply::Gated(gate, response)) => {
                gate.notified().await;
                Ok(response)
            }
            Some(Reply::Panic) => panic!("scripted fetcher panic"),
            None => Ok(json_response(json!([]))),
        }
    }
}

pub fn json_response(body: Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        body: body.to_string().into_bytes(),
    }
}

pub fn user(login: &str) -> Value {
    json!({
        "login": login,
        "id": 1,
        "avatar_url": format!("https://avatars.example.com/u/{}", login),
        "html_url": format!("https://github.com/{}", login),
        "type": "User"
    })
}

pub fn organization(login: &str) -> Value {
    json!({
        "login": login,
        "id": 2,
        "avatar_url": format!("https://avatars.example.com/o/{}", login),
        "type": "Organization"
    })
}

/// A page of `count` users named `{prefix}-{n}`.
pub fn users(prefix: &str, count: usize) -> Value {
    Value::Array((0..count).map(|n| user(&format!("{}-{}", prefix, n))).collect())
}

pub fn page(prefix: &str, count: usize) -> Reply {
    Reply::Respond(json_response(users(prefix, count)))
}

pub fn empty_page() -> Reply {
    Reply::Respond(json_response(json!([])))
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn image_response(bytes: Vec<u8>) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![("Content-Type".to_string(), "image/png".to_string())],
        body: bytes,
    }
}

pub fn test_config() -> Configuration {
    Configuration {
        github_url: TEST_URL.to_string(),
        owner: "octocat".to_string(),
        repo: "hello-world".to_string(),
        auth_token: String::new(),
        load_all: false,
        delays: Delays {
            load: 0.0,
            load_avatar: 0.0,
            spinner: 5.0,
        },
    }
}

/// Session outcome reduced to something comparable.
#[derive(Debug, Clone, PartialEq)]
pub enum Ended {
    Success(usize),
    Cancelled,
    RateLimited(RateLimitState),
    NoStargazers,
    Timeout,
    Failed(String),
}

impl From<&SessionOutcome> for Ended {
    fn from(outcome: &SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Success { count } => Ended::Success(*count),
            SessionOutcome::Cancelled => Ended::Cancelled,
            SessionOutcome::Error(StargazersError::RateLimitExceeded(state)) => {
                Ended::RateLimited(state.clone())
            }
            SessionOutcome::Error(StargazersError::NoStargazersFound { .. }) => Ended::NoStargazers,
            SessionOutcome::Error(StargazersError::Timeout) => Ended::Timeout,
            SessionOutcome::Error(e) => Ended::Failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Cleared,
    Inserted {
        logins: Vec<String>,
        positions: Range<usize>,
    },
    Ended(Ended),
    SpinnerShown(String),
    SpinnerMessage(String),
    SpinnerHidden,
    Avatar {
        login: String,
        loaded: bool,
    },
}

pub struct RecordingObserver {
    rows: usize,
    events: mpsc::UnboundedSender<Observed>,
}

impl RecordingObserver {
    pub fn new(rows: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<Observed>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { rows, events }), receiver)
    }

    fn record(&self, event: Observed) {
        let _ = self.events.send(event);
    }
}

impl LoadObserver for RecordingObserver {
    fn viewport_rows(&self) -> usize {
        self.rows
    }

    fn on_list_cleared(&self) {
        self.record(Observed::Cleared);
    }

    fn on_batch_inserted(&self, stargazers: &[Stargazer], positions: Range<usize>) {
        self.record(Observed::Inserted {
            logins: stargazers.iter().map(|s| s.login.clone()).collect(),
            positions,
        });
    }

    fn on_session_ended(&self, outcome: &SessionOutcome) {
        self.record(Observed::Ended(outcome.into()));
    }

    fn on_spinner_show(&self, _after: Duration, message: &str) {
        self.record(Observed::SpinnerShown(message.to_string()));
    }

    fn on_spinner_message(&self, message: &str) {
        self.record(Observed::SpinnerMessage(message.to_string()));
    }

    fn on_spinner_hide(&self) {
        self.record(Observed::SpinnerHidden);
    }

    fn on_avatar_updated(&self, login: &str, state: &AvatarState) {
        self.record(Observed::Avatar {
            login: login.to_string(),
            loaded: state.is_loaded(),
        });
    }
}

/// Collects observer events up to and including the next session end.
pub async fn until_ended(events: &mut mpsc::UnboundedReceiver<Observed>) -> (Vec<Observed>, Ended) {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("session did not end in time")
            .expect("observer channel closed");
        if let Observed::Ended(ended) = event {
            return (seen, ended);
        }
        seen.push(event);
    }
}

pub fn inserted_logins(events: &[Observed]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            Observed::Inserted { logins, .. } => Some(logins.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

pub struct TestContext {
    pub controller: StargazerController,
    pub fetcher: Arc<ScriptedFetcher>,
    pub avatar_fetcher: Arc<ScriptedFetcher>,
    pub store: Arc<MemoryStore>,
    pub events: mpsc::UnboundedReceiver<Observed>,
}

impl TestContext {
    pub async fn new(config: Configuration, script: Vec<Reply>) -> Self {
        Self::with_page_timeout(config, script, Duration::from_secs(30)).await
    }

    pub async fn with_page_timeout(
        config: Configuration,
        script: Vec<Reply>,
        page_timeout: Duration,
    ) -> Self {
        let fetcher = ScriptedFetcher::new(script);
        let avatar_fetcher = ScriptedFetcher::new(Vec::new());
        let store = Arc::new(MemoryStore::with_configuration(&config));
        let (observer, events) = RecordingObserver::new(15);

        let loader = StargazerListLoader::new(
            GitHubClient::new(fetcher.clone()).with_page_timeout(page_timeout),
        );
        let (avatars, avatar_updates) = AvatarCache::new(avatar_fetcher.clone());

        let controller = StargazerController::spawn_with(ControllerArgs {
            store: store.clone(),
            loader,
            avatars,
            avatar_updates,
            observer,
            gate: LoadGate::new(),
        })
        .await
        .expect("controller should spawn");

        Self {
            controller,
            fetcher,
            avatar_fetcher,
            store,
            events,
        }
    }
}
