//! The paging state machine behind one "load" trigger.

use crate::config::Configuration;
use crate::error::StargazersError;
use crate::github::GitHubClient;
use crate::http::StopSignal;
use crate::models::Stargazer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Single-flight gate. Acquisition never waits: a trigger that finds the
/// gate taken is simply ignored.
#[derive(Debug, Clone, Default)]
pub struct LoadGate {
    busy: Arc<AtomicBool>,
}

impl LoadGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<LoadPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LoadPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of holding the gate. Dropping it releases the gate.
#[derive(Debug)]
pub struct LoadPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for LoadPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Everything a session needs, captured when it starts.
#[derive(Debug, Clone)]
pub struct LoaderPlan {
    pub session: u64,
    pub config: Configuration,
    pub viewport_rows: usize,
    pub first_page: u32,
}

/// Messages from a running session to its owner.
#[derive(Debug)]
pub enum LoaderEvent {
    /// A page produced new stargazers, in API order.
    Batch {
        session: u64,
        page: u32,
        stargazers: Vec<Stargazer>,
    },
    Finished {
        session: u64,
        outcome: LoaderOutcome,
    },
}

#[derive(Debug)]
pub enum LoaderOutcome {
    /// `added` stargazers were emitted; `next_page` is where a later
    /// session should continue.
    Success { added: usize, next_page: u32 },
    Error(StargazersError),
    Cancelled,
}

#[derive(Clone)]
pub struct StargazerListLoader {
    client: GitHubClient,
}

impl StargazerListLoader {
    pub fn new(client: GitHubClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GitHubClient {
        &self.client
    }

    /// Runs one session to completion, emitting a `Batch` per non-empty page
    /// followed by exactly one `Finished`.
    pub async fn run(
        &self,
        plan: LoaderPlan,
        stop: StopSignal,
        events: mpsc::UnboundedSender<LoaderEvent>,
    ) {
        let session = plan.session;
        let outcome = self.load(&plan, &stop, &events).await;

        match &outcome {
            LoaderOutcome::Success { added, next_page } => {
                info!(session, added, next_page, "Stargazers loaded")
            }
            LoaderOutcome::Error(e) => warn!(session, "Stargazers load failed: {}", e),
            LoaderOutcome::Cancelled => info!(session, "Stargazers load stopped"),
        }

        if events
            .send(LoaderEvent::Finished { session, outcome })
            .is_err()
        {
            debug!(session, "Session owner went away before the load finished");
        }
    }

    async fn load(
        &self,
        plan: &LoaderPlan,
        stop: &StopSignal,
        events: &mpsc::UnboundedSender<LoaderEvent>,
    ) -> LoaderOutcome {
        let config = &plan.config;

        if let Err(e) = config.ensure_loadable() {
            return LoaderOutcome::Error(e.into());
        }

        let batch_size = config.batch_size(plan.viewport_rows);
        let mut page = plan.first_page.max(1);
        let mut added = 0;

        debug!(
            session = plan.session,
            batch_size,
            page,
            load_all = config.load_all,
            "Starting stargazers load"
        );

        loop {
            if stop.is_stopped() {
                return LoaderOutcome::Cancelled;
            }

            let result = self
                .client
                .fetch_stargazers_page(config, page, batch_size, stop)
                .await;

            let fetched = match result {
                Ok(fetched) => fetched,
                Err(StargazersError::Cancelled) => return LoaderOutcome::Cancelled,
                Err(e) => return LoaderOutcome::Error(e),
            };

            if !stop.sleep(config.delays.load()).await {
                return LoaderOutcome::Cancelled;
            }

            if fetched.skipped > 0 {
                debug!(page, skipped = fetched.skipped, "Skipped invalid stargazers");
            }

            let count = fetched.stargazers.len();
            if count == 0 {
                info!(page, added, "All stargazers loaded");
                return LoaderOutcome::Success {
                    added,
                    next_page: page,
                };
            }

            added += count;
            info!(page, loaded = count, "Loaded stargazers page");

            if events
                .send(LoaderEvent::Batch {
                    session: plan.session,
                    page,
                    stargazers: fetched.stargazers,
                })
                .is_err()
            {
                return LoaderOutcome::Cancelled;
            }

            page += 1;

            if !config.load_all {
                return LoaderOutcome::Success {
                    added,
                    next_page: page,
                };
            }
        }
    }
}
