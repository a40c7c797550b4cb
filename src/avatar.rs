//! Avatar downloads, one per login, at most `AVATAR_CONCURRENCY` at a time.

use crate::error::{Result, StargazersError};
use crate::http::{self, HttpFetcher, HttpRequest, StopSignal};
use crate::models::{AvatarImage, AvatarState, DisplaySize, Stargazer};
use image::imageops::FilterType;
use image::ImageFormat;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, warn};
use url::Url;

pub const AVATAR_CONCURRENCY: usize = 5;
pub const AVATAR_TIMEOUT: Duration = Duration::from_secs(60);

/// Sent when a fetch started by [`AvatarCache::ensure`] completes.
///
/// Rows may have been recycled in the meantime; receivers must check that
/// they still show `login` before applying the new state.
#[derive(Debug, Clone)]
pub struct AvatarUpdate {
    pub login: String,
    pub state: AvatarState,
}

#[derive(Clone)]
pub struct AvatarCache {
    inner: Arc<Inner>,
}

struct Inner {
    fetcher: Arc<dyn HttpFetcher>,
    entries: Mutex<Entries>,
    permits: Arc<Semaphore>,
    updates: mpsc::UnboundedSender<AvatarUpdate>,
    delay: Mutex<Duration>,
    timeout: Duration,
    fetches_started: AtomicUsize,
    // Signalled whenever `in_flight` drops to zero.
    idle: Notify,
}

#[derive(Default)]
struct Entries {
    // Bumped by `reset`; completions from an older generation are dropped.
    generation: u64,
    states: HashMap<String, AvatarState>,
    in_flight: usize,
}

impl AvatarCache {
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> (Self, mpsc::UnboundedReceiver<AvatarUpdate>) {
        Self::with_timeout(fetcher, AVATAR_TIMEOUT)
    }

    pub fn with_timeout(
        fetcher: Arc<dyn HttpFetcher>,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<AvatarUpdate>) {
        let (updates, receiver) = mpsc::unbounded_channel();
        let cache = Self {
            inner: Arc::new(Inner {
                fetcher,
                entries: Mutex::new(Entries::default()),
                permits: Arc::new(Semaphore::new(AVATAR_CONCURRENCY)),
                updates,
                delay: Mutex::new(Duration::ZERO),
                timeout,
                fetches_started: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        };
        (cache, receiver)
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Throttle applied after every avatar response.
    pub fn set_delay(&self, delay: Duration) {
        *self
            .inner
            .delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    fn delay(&self) -> Duration {
        *self
            .inner
            .delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, login: &str) -> AvatarState {
        self.entries().states.get(login).cloned().unwrap_or_default()
    }

    /// Returns the current state for `stargazer`, starting a download when
    /// none has been attempted yet. `display` is the size the image will be
    /// scaled to, captured now so later layout changes do not affect it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure(&self, stargazer: &Stargazer, display: DisplaySize) -> AvatarState {
        let mut entries = self.entries();
        let current = entries
            .states
            .get(&stargazer.login)
            .cloned()
            .unwrap_or_default();

        if !matches!(current, AvatarState::Unfetched) {
            return current;
        }

        let Some(url) = stargazer.avatar_url.clone() else {
            debug!(login = %stargazer.login, "No avatar URL");
            entries
                .states
                .insert(stargazer.login.clone(), AvatarState::Errored);
            return AvatarState::Errored;
        };

        entries
            .states
            .insert(stargazer.login.clone(), AvatarState::Fetching);
        entries.in_flight += 1;
        let generation = entries.generation;
        drop(entries);

        self.inner.fetches_started.fetch_add(1, Ordering::Relaxed);

        let cache = self.clone();
        let login = stargazer.login.clone();
        tokio::spawn(async move {
            cache.download(login, url, display, generation).await;
        });

        AvatarState::Fetching
    }

    /// Forgets every entry. Downloads still running finish but are discarded.
    pub fn reset(&self) {
        let mut entries = self.entries();
        entries.generation += 1;
        entries.states.clear();
        entries.in_flight = 0;
        drop(entries);
        self.inner.idle.notify_waiters();
    }

    /// Downloads started and not yet completed in the current generation.
    pub fn in_flight(&self) -> usize {
        self.entries().in_flight
    }

    /// Resolves once no download of the current generation is running.
    pub async fn wait_idle(&self) {
        loop {
            // Registered before the check so a completion in between is not missed.
            let notified = self.inner.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Downloads started since creation, across resets.
    pub fn fetches_started(&self) -> usize {
        self.inner.fetches_started.load(Ordering::Relaxed)
    }

    async fn download(&self, login: String, url: Url, display: DisplaySize, generation: u64) {
        let state = match self.inner.permits.clone().acquire_owned().await {
            Ok(_permit) => {
                let result = self.fetch_image(&url, display).await;

                let delay = self.delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                match result {
                    Ok(image) => AvatarState::Loaded(Arc::new(image)),
                    Err(e) => {
                        warn!(%login, %url, "Avatar download error: {}", e);
                        AvatarState::Errored
                    }
                }
            }
            Err(_) => AvatarState::Errored,
        };

        let mut entries = self.entries();
        if entries.generation != generation {
            debug!(%login, "Dropping avatar from a previous list");
            return;
        }
        entries.in_flight = entries.in_flight.saturating_sub(1);
        entries.states.insert(login.clone(), state.clone());
        let idle = entries.in_flight == 0;
        drop(entries);

        if idle {
            self.inner.idle.notify_waiters();
        }

        if self.inner.updates.send(AvatarUpdate { login, state }).is_err() {
            debug!("No receiver for avatar updates");
        }
    }

    async fn fetch_image(&self, url: &Url, display: DisplaySize) -> Result<AvatarImage> {
        let response = http::fetch(
            self.inner.fetcher.as_ref(),
            HttpRequest::get(url.as_str()),
            self.inner.timeout,
            &StopSignal::new(),
        )
        .await
        .map_err(|e| StargazersError::NetworkError(e.to_string()))?;

        if !response.is_success() {
            return Err(StargazersError::NetworkError(format!(
                "HTTP {}",
                response.status
            )));
        }

        resize(&response.body, display)
    }
}

/// Decodes `bytes` and scales the image to exactly `display`, as PNG.
pub fn resize(bytes: &[u8], display: DisplaySize) -> Result<AvatarImage> {
    let image = image::load_from_memory(bytes)?;
    let resized = image.resize_exact(
        display.width.max(1),
        display.height.max(1),
        FilterType::Triangle,
    );

    let mut png = Vec::new();
    resized.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    Ok(AvatarImage {
        width: resized.width(),
        height: resized.height(),
        png,
    })
}
