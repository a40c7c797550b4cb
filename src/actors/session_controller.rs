use crate::avatar::{AvatarCache, AvatarUpdate};
use crate::config::{Configuration, SettingsStore};
use crate::error::{Result, StargazersError};
use crate::github::GitHubClient;
use crate::http::{HttpFetcher, StopSignal};
use crate::loader::{
    LoadGate, LoadPermit, LoaderEvent, LoaderOutcome, LoaderPlan, StargazerListLoader,
};
use crate::models::{AvatarState, SessionOutcome, Stargazer};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Rows from the end of the list at which a displayed row asks for more.
pub const NEAR_END_ROWS: usize = 3;

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);
const LOADING_MESSAGE: &str = "Loading stargazers";
const LOADING_ALL_MESSAGE: &str = "Loading all stargazers";

/// The presentation side. Every call is made from the controller actor, one
/// at a time, so implementations never see the list change mid-call.
pub trait LoadObserver: Send + Sync + 'static {
    /// How many rows fit on screen; drives the page size.
    fn viewport_rows(&self) -> usize;

    /// The whole list was discarded (new session or stop).
    fn on_list_cleared(&self) {}

    /// `stargazers` were appended at `positions`.
    fn on_batch_inserted(&self, stargazers: &[Stargazer], positions: Range<usize>);

    fn on_session_ended(&self, outcome: &SessionOutcome);

    /// The session outlived the spinner delay.
    fn on_spinner_show(&self, _after: Duration, _message: &str) {}

    /// Progress text for a visible spinner (load-all mode).
    fn on_spinner_message(&self, _message: &str) {}

    fn on_spinner_hide(&self) {}

    /// An avatar download finished. The row may show someone else by now.
    fn on_avatar_updated(&self, _login: &str, _state: &AvatarState) {}
}

/// Coordinates load sessions. Owns the stargazer list; all list mutation and
/// observer notification happens in this actor.
pub struct SessionController;

pub struct ControllerState {
    store: Arc<dyn SettingsStore>,
    loader: StargazerListLoader,
    avatars: AvatarCache,
    observer: Arc<dyn LoadObserver>,
    gate: LoadGate,
    config: Configuration,
    stargazers: Vec<Stargazer>,
    next_page: u32,
    session: Option<ActiveSession>,
    sessions_started: u64,
    events: mpsc::UnboundedSender<LoaderEvent>,
}

struct ActiveSession {
    id: u64,
    stop: StopSignal,
    permit: LoadPermit,
    load_all: bool,
    spinner_delay: Duration,
    spinner_message: &'static str,
    spinner_timer: JoinHandle<()>,
    spinner_visible: bool,
    _task: JoinHandle<()>,
}

/// Messages the controller can handle
pub enum ControllerMessage {
    /// Clear the list and load from the first page
    Start(LoadPermit),
    /// Load from the current page cursor
    LoadMore(LoadPermit),
    /// A row was rendered; loads more when it is near the end
    RowDisplayed(usize),
    Stop,
    /// Clear the list when idle, stop the session otherwise
    ClearOrStop,
    /// Settings were saved; re-read them and optionally reload
    ConfigurationChanged { reload: bool },
    Snapshot(RpcReplyPort<Vec<Stargazer>>),
    Loader(LoaderEvent),
    SpinnerDue { session: u64 },
    AvatarUpdated(AvatarUpdate),
}

/// Arguments for starting the controller
pub struct ControllerArgs {
    pub store: Arc<dyn SettingsStore>,
    pub loader: StargazerListLoader,
    pub avatars: AvatarCache,
    pub avatar_updates: mpsc::UnboundedReceiver<AvatarUpdate>,
    pub observer: Arc<dyn LoadObserver>,
    pub gate: LoadGate,
}

#[ractor::async_trait]
impl Actor for SessionController {
    type Msg = ControllerMessage;
    type State = ControllerState;
    type Arguments = ControllerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> std::result::Result<Self::State, ActorProcessingErr> {
        let config = Configuration::load(args.store.as_ref());
        args.avatars.set_delay(config.delays.load_avatar());

        info!(
            owner = %config.owner,
            repo = %config.repo,
            load_all = config.load_all,
            "Starting session controller"
        );

        // Forward loader events into the mailbox
        let (events, mut receiver) = mpsc::unbounded_channel();
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if myself_clone
                    .send_message(ControllerMessage::Loader(event))
                    .is_err()
                {
                    break;
                }
            }
            debug!("Loader event forwarder ended");
        });

        // Forward avatar completions the same way
        let myself_clone = myself.clone();
        let mut avatar_updates = args.avatar_updates;
        tokio::spawn(async move {
            while let Some(update) = avatar_updates.recv().await {
                if myself_clone
                    .send_message(ControllerMessage::AvatarUpdated(update))
                    .is_err()
                {
                    break;
                }
            }
            debug!("Avatar update forwarder ended");
        });

        Ok(ControllerState {
            store: args.store,
            loader: args.loader,
            avatars: args.avatars,
            observer: args.observer,
            gate: args.gate,
            config,
            stargazers: Vec::new(),
            next_page: 1,
            session: None,
            sessions_started: 0,
            events,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        match message {
            ControllerMessage::Start(permit) => {
                self.begin(&myself, state, permit, true);
            }

            ControllerMessage::LoadMore(permit) => {
                self.begin(&myself, state, permit, false);
            }

            ControllerMessage::RowDisplayed(index) => {
                let len = state.stargazers.len();
                if index < len && index + NEAR_END_ROWS >= len {
                    if let Some(permit) = state.gate.try_acquire() {
                        debug!(index, len, "Near the end of the list, loading more");
                        self.begin(&myself, state, permit, false);
                    }
                }
            }

            ControllerMessage::Stop => {
                if let Some(session) = &state.session {
                    info!(session = session.id, "Stop requested");
                    session.stop.stop();
                }
            }

            ControllerMessage::ClearOrStop => match state.gate.try_acquire() {
                Some(_permit) => self.clear(state),
                None => {
                    if let Some(session) = &state.session {
                        info!(session = session.id, "Stop requested");
                        session.stop.stop();
                    }
                }
            },

            ControllerMessage::ConfigurationChanged { reload } => {
                state.config = Configuration::load(state.store.as_ref());
                state
                    .avatars
                    .set_delay(state.config.delays.load_avatar());

                info!(
                    owner = %state.config.owner,
                    repo = %state.config.repo,
                    load_all = state.config.load_all,
                    reload,
                    "Configuration changed"
                );

                if reload {
                    if let Some(permit) = state.gate.try_acquire() {
                        self.begin(&myself, state, permit, true);
                    }
                }
            }

            ControllerMessage::Snapshot(reply) => {
                if reply.send(state.stargazers.clone()).is_err() {
                    debug!("Snapshot requester went away");
                }
            }

            ControllerMessage::Loader(event) => {
                self.on_loader_event(state, event);
            }

            ControllerMessage::SpinnerDue { session } => {
                if let Some(active) = state.session.as_mut().filter(|s| s.id == session) {
                    if !active.spinner_visible {
                        active.spinner_visible = true;
                        state
                            .observer
                            .on_spinner_show(active.spinner_delay, active.spinner_message);
                    }
                }
            }

            ControllerMessage::AvatarUpdated(update) => {
                state.observer.on_avatar_updated(&update.login, &update.state);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        if let Some(session) = state.session.take() {
            session.stop.stop();
            session.spinner_timer.abort();
        }
        info!(
            sessions = state.sessions_started,
            stargazers = state.stargazers.len(),
            "Session controller stopped"
        );
        Ok(())
    }
}

impl SessionController {
    fn begin(
        &self,
        myself: &ActorRef<ControllerMessage>,
        state: &mut ControllerState,
        permit: LoadPermit,
        reset: bool,
    ) {
        if reset {
            self.clear(state);
        }

        state.sessions_started += 1;
        let id = state.sessions_started;
        let load_all = state.config.load_all;

        let plan = LoaderPlan {
            session: id,
            config: state.config.clone(),
            viewport_rows: state.observer.viewport_rows(),
            first_page: state.next_page,
        };

        info!(
            session = id,
            page = plan.first_page,
            load_all,
            "Starting load session"
        );

        let stop = StopSignal::new();
        let task = {
            let loader = state.loader.clone();
            let stop = stop.clone();
            let events = state.events.clone();
            tokio::spawn(async move {
                let run = tokio::spawn({
                    let events = events.clone();
                    async move { loader.run(plan, stop, events).await }
                });

                // A panicking session still has to end, or the gate stays held.
                if let Err(e) = run.await {
                    error!(session = id, "Load session failed: {}", e);
                    let outcome = LoaderOutcome::Error(StargazersError::ControllerError(format!(
                        "Load session failed: {}",
                        e
                    )));
                    let _ = events.send(LoaderEvent::Finished {
                        session: id,
                        outcome,
                    });
                }
            })
        };

        let spinner_delay = state.config.delays.spinner();
        let spinner_timer = {
            let myself = myself.clone();
            tokio::spawn(async move {
                tokio::time::sleep(spinner_delay).await;
                let _ = myself.send_message(ControllerMessage::SpinnerDue { session: id });
            })
        };

        state.session = Some(ActiveSession {
            id,
            stop,
            permit,
            load_all,
            spinner_delay,
            spinner_message: if load_all {
                LOADING_ALL_MESSAGE
            } else {
                LOADING_MESSAGE
            },
            spinner_timer,
            spinner_visible: false,
            _task: task,
        });
    }

    fn clear(&self, state: &mut ControllerState) {
        state.stargazers.clear();
        state.next_page = 1;
        state.avatars.reset();
        state.observer.on_list_cleared();
    }

    fn on_loader_event(&self, state: &mut ControllerState, event: LoaderEvent) {
        match event {
            LoaderEvent::Batch {
                session,
                page,
                stargazers,
            } => {
                let Some(active) = state.session.as_ref().filter(|s| s.id == session) else {
                    debug!(session, "Discarding batch from a finished session");
                    return;
                };
                if active.stop.is_stopped() {
                    debug!(session, "Discarding batch after stop");
                    return;
                }

                let start = state.stargazers.len();
                state.stargazers.extend(stargazers);
                let positions = start..state.stargazers.len();
                state.next_page = page + 1;

                state
                    .observer
                    .on_batch_inserted(&state.stargazers[positions.clone()], positions);

                if active.load_all && active.spinner_visible {
                    let message =
                        format!("{}: {}", LOADING_ALL_MESSAGE, state.stargazers.len());
                    state.observer.on_spinner_message(&message);
                }
            }

            LoaderEvent::Finished { session, outcome } => {
                let active = match state.session.take() {
                    Some(active) if active.id == session => active,
                    other => {
                        state.session = other;
                        debug!(session, "Ignoring end of a superseded session");
                        return;
                    }
                };

                active.spinner_timer.abort();
                let stopped = active.stop.is_stopped();

                let outcome = match outcome {
                    _ if stopped => SessionOutcome::Cancelled,
                    LoaderOutcome::Cancelled => SessionOutcome::Cancelled,
                    LoaderOutcome::Error(e) => SessionOutcome::Error(e),
                    LoaderOutcome::Success { added, next_page } => {
                        state.next_page = next_page;
                        if state.stargazers.is_empty() {
                            info!("No stargazers found");
                            SessionOutcome::Error(StargazersError::NoStargazersFound {
                                owner: state.config.owner.clone(),
                                repo: state.config.repo.clone(),
                            })
                        } else {
                            SessionOutcome::Success { count: added }
                        }
                    }
                };

                if outcome.is_cancelled() {
                    info!(
                        session,
                        discarded = state.stargazers.len(),
                        "Stopped, discarding stargazers"
                    );
                    self.clear(state);
                }

                if active.spinner_visible {
                    state.observer.on_spinner_hide();
                }

                // Release the gate before reporting, so the observer can
                // trigger the next load from its callback.
                drop(active.permit);

                info!(
                    session,
                    total = state.stargazers.len(),
                    "Session ended: {}",
                    outcome
                );
                state.observer.on_session_ended(&outcome);
            }
        }
    }
}

/// Handle used by the presentation layer. Cheap to clone.
#[derive(Clone)]
pub struct StargazerController {
    actor: ActorRef<ControllerMessage>,
    gate: LoadGate,
    avatars: AvatarCache,
}

impl StargazerController {
    /// Spawns a controller with the default page timeout.
    pub async fn spawn(
        store: Arc<dyn SettingsStore>,
        list_fetcher: Arc<dyn HttpFetcher>,
        avatar_fetcher: Arc<dyn HttpFetcher>,
        observer: Arc<dyn LoadObserver>,
    ) -> Result<Self> {
        let loader = StargazerListLoader::new(GitHubClient::new(list_fetcher));
        let (avatars, avatar_updates) = AvatarCache::new(avatar_fetcher);

        Self::spawn_with(ControllerArgs {
            store,
            loader,
            avatars,
            avatar_updates,
            observer,
            gate: LoadGate::new(),
        })
        .await
    }

    pub async fn spawn_with(args: ControllerArgs) -> Result<Self> {
        let gate = args.gate.clone();
        let avatars = args.avatars.clone();

        let (actor, _handle) = Actor::spawn(None, SessionController, args)
            .await
            .map_err(|e| {
                StargazersError::ControllerError(format!("Failed to spawn controller: {:?}", e))
            })?;

        Ok(Self {
            actor,
            gate,
            avatars,
        })
    }

    fn send(&self, message: ControllerMessage) -> bool {
        if self.actor.send_message(message).is_err() {
            warn!("Session controller is not running");
            return false;
        }
        true
    }

    fn trigger(&self, message: fn(LoadPermit) -> ControllerMessage) -> bool {
        match self.gate.try_acquire() {
            Some(permit) => self.send(message(permit)),
            None => {
                debug!("Load in progress, ignoring trigger");
                false
            }
        }
    }

    /// Clears the list and loads from the first page. Returns `false` when
    /// a load is already running, in which case nothing happens.
    pub fn start(&self) -> bool {
        self.trigger(ControllerMessage::Start)
    }

    /// Pull-to-refresh; same as `start`.
    pub fn refresh(&self) -> bool {
        self.start()
    }

    /// Loads the next page (or every remaining page in load-all mode).
    pub fn load_more(&self) -> bool {
        self.trigger(ControllerMessage::LoadMore)
    }

    /// Report that the row at `index` is on screen.
    pub fn row_displayed(&self, index: usize) {
        if !self.gate.is_busy() {
            self.send(ControllerMessage::RowDisplayed(index));
        }
    }

    pub fn stop(&self) {
        self.send(ControllerMessage::Stop);
    }

    pub fn clear_or_stop(&self) {
        self.send(ControllerMessage::ClearOrStop);
    }

    pub fn configuration_changed(&self, reload: bool) {
        self.send(ControllerMessage::ConfigurationChanged { reload });
    }

    pub fn is_loading(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn avatars(&self) -> &AvatarCache {
        &self.avatars
    }

    pub async fn snapshot(&self) -> Result<Vec<Stargazer>> {
        match self
            .actor
            .call(ControllerMessage::Snapshot, Some(SNAPSHOT_TIMEOUT))
            .await
        {
            Ok(CallResult::Success(stargazers)) => Ok(stargazers),
            Ok(_) => Err(StargazersError::ControllerError(
                "Snapshot request timed out".to_string(),
            )),
            Err(_) => Err(StargazersError::ControllerError(
                "Session controller is not running".to_string(),
            )),
        }
    }

    /// Stops any running session and the actor itself.
    pub fn shutdown(&self) {
        self.actor.stop(None);
    }
}
