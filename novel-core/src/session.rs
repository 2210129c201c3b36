//! GameSession - the primary public API for playing.
//!
//! A session owns the current game state and wires the narrator, the image
//! pipeline and the save slot together. Each call to
//! [`GameSession::player_action`] runs one complete turn.

use crate::effects::EffectCue;
use crate::merge::{apply_step, record_choice};
use crate::persist::{Autosave, FileSaveStore, PersistError, SaveStore, AUTOSAVE_INTERVAL};
use crate::resolver::{
    CancelToken, FallbackReason, GeminiGenerator, RetryPolicy, StoryGenerator, TurnResolver,
    DEFAULT_TEMPERATURE,
};
use crate::state::{Choice, GameState, Player};
use crate::visuals::{HttpPreloader, ImagePreloader, ImageRequest, ImageUrlBuilder};
use gemini::Gemini;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

/// Errors from GameSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("No API key configured - set GEMINI_API_KEY environment variable")]
    NoApiKey,

    #[error("Action is empty")]
    EmptyAction,

    #[error("A turn is already in progress")]
    TurnInProgress,

    #[error("Turn was cancelled")]
    Cancelled,
}

/// Configuration for creating a new game session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Player character name.
    pub player_name: String,

    /// Player appearance, used in narrator context.
    pub appearance: Option<String>,

    /// Narrator model. `None` uses the client default.
    pub model: Option<String>,

    /// Narrator sampling temperature.
    pub temperature: f32,

    /// Retry schedule for narrator calls.
    pub retry: RetryPolicy,

    /// Directory holding the save slot.
    pub save_dir: PathBuf,

    /// Period of the background autosave.
    pub autosave_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("Player")
    }
}

impl SessionConfig {
    /// Create a new session config for a named player.
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            appearance: None,
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            retry: RetryPolicy::default(),
            save_dir: PathBuf::from("."),
            autosave_interval: AUTOSAVE_INTERVAL,
        }
    }

    pub fn with_appearance(mut self, appearance: impl Into<String>) -> Self {
        self.appearance = Some(appearance.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = dir.into();
        self
    }

    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    /// The player described by this config.
    pub fn player(&self) -> Player {
        let player = Player::new(self.player_name.clone());
        match &self.appearance {
            Some(appearance) => player.with_appearance(appearance.clone()),
            None => player,
        }
    }
}

/// What happened during one turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub narrative: String,
    pub speaker: Option<String>,
    pub choices: Vec<Choice>,
    /// Effect to show, if any.
    pub effect: Option<EffectCue>,
    /// Set when the scene needs a new background. Pass it to
    /// [`GameSession::commit_image`] once the scene has been shown.
    pub refresh: Option<ImageRequest>,
    /// Set when the narrator was unavailable and a fallback step was shown.
    pub fallback: Option<FallbackReason>,
    /// Narrator calls made this turn.
    pub attempts: u32,
}

/// A single-player game session.
pub struct GameSession {
    config: SessionConfig,
    resolver: TurnResolver,
    images: ImageUrlBuilder,
    preloader: Arc<dyn ImagePreloader>,
    store: Arc<dyn SaveStore>,
    state: GameState,
    snapshots: watch::Sender<GameState>,
}

impl GameSession {
    /// Create a session from explicit collaborators, starting a new game.
    pub fn new(
        config: SessionConfig,
        generator: Arc<dyn StoryGenerator>,
        preloader: Arc<dyn ImagePreloader>,
        store: Arc<dyn SaveStore>,
    ) -> Self {
        let resolver = TurnResolver::new(generator)
            .with_retry(config.retry)
            .with_temperature(config.temperature);
        let state = GameState::new(config.player());
        let (snapshots, _) = watch::channel(state.clone());

        Self {
            config,
            resolver,
            images: ImageUrlBuilder::new(),
            preloader,
            store,
            state,
            snapshots,
        }
    }

    /// Create a session backed by Gemini, HTTP image preloading and a save
    /// file in the configured directory.
    ///
    /// Requires `GEMINI_API_KEY` (or `API_KEY`) to be set.
    pub fn from_env(config: SessionConfig) -> Result<Self, SessionError> {
        let mut client = Gemini::from_env().map_err(|_| SessionError::NoApiKey)?;
        if let Some(model) = &config.model {
            client = client.with_model(model.clone());
        }

        let store = Arc::new(FileSaveStore::new(&config.save_dir));
        Ok(Self::new(
            config,
            Arc::new(GeminiGenerator::new(client)),
            Arc::new(HttpPreloader::new()),
            store,
        ))
    }

    /// Use a different image service.
    pub fn with_image_urls(mut self, images: ImageUrlBuilder) -> Self {
        self.images = images;
        self
    }

    /// Throw away the current game and start over with `player`.
    pub fn start_new(&mut self, player: Player) {
        tracing::info!(player = %player.name, "starting new game");
        self.commit(GameState::new(player));
    }

    /// Continue from an existing state.
    pub fn resume(&mut self, state: GameState) {
        tracing::info!(
            player = %state.player.name,
            location = %state.current_scene.location,
            "resuming game"
        );
        self.commit(state);
    }

    /// Resume from the save slot. Returns `false` if nothing was saved.
    pub async fn load_saved(&mut self) -> Result<bool, SessionError> {
        match self.store.load().await? {
            Some(state) => {
                self.resume(state);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Write the current state to the save slot.
    pub async fn save(&self) -> Result<(), SessionError> {
        self.store.save(&self.state).await?;
        Ok(())
    }

    /// Empty the save slot.
    pub async fn clear_save(&self) -> Result<(), SessionError> {
        self.store.clear().await?;
        Ok(())
    }

    /// Process a player action and run one turn.
    ///
    /// The narrator never makes this fail: if it is unavailable the turn
    /// shows a fallback step instead. The new background is not fetched
    /// here, see [`TurnReport::refresh`].
    pub async fn player_action(&mut self, input: &str) -> Result<TurnReport, SessionError> {
        self.player_action_with_cancel(input, &CancelToken::new())
            .await
    }

    /// Like [`player_action`](Self::player_action), but the turn can be
    /// abandoned through `cancel`. A cancelled turn leaves the state as it
    /// was.
    pub async fn player_action_with_cancel(
        &mut self,
        input: &str,
        cancel: &CancelToken,
    ) -> Result<TurnReport, SessionError> {
        let action = input.trim();
        if action.is_empty() {
            return Err(SessionError::EmptyAction);
        }

        let mut staged = self.state.clone();
        record_choice(&mut staged.history, action);

        let resolution = self
            .resolver
            .resolve_turn_with_cancel(&staged.history, action, &staged, cancel)
            .await;
        if resolution.fallback == Some(FallbackReason::Cancelled) {
            return Err(SessionError::Cancelled);
        }

        let outcome = apply_step(&staged, &resolution.step);
        self.commit(outcome.state);

        let scene = &self.state.current_scene;
        Ok(TurnReport {
            narrative: scene.narrative.clone(),
            speaker: scene.speaker.clone(),
            choices: scene.choices.clone(),
            effect: outcome.effect,
            refresh: outcome.refresh,
            fallback: resolution.fallback,
            attempts: resolution.attempts,
        })
    }

    /// Fetch a background for a state that has none yet, such as a fresh
    /// game. Returns the committed URL.
    pub async fn refresh_initial_image(&mut self) -> Option<String> {
        if self.state.background_image_url.is_some() {
            return None;
        }
        let request = ImageRequest::new(&self.state.current_scene.background_description, None);
        self.commit_image(&request).await
    }

    /// Preload a new background and commit its URL. Returns the committed
    /// URL; on failure the previous background stays.
    pub async fn commit_image(&mut self, request: &ImageRequest) -> Option<String> {
        let url = match self.images.random_url(request) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "could not build image URL");
                return None;
            }
        };

        if let Err(e) = self.preloader.preload(&url).await {
            tracing::warn!(error = %e, "image preload failed, keeping previous background");
            return None;
        }

        let mut next = self.state.clone();
        next.background_image_url = Some(url.clone());
        self.commit(next);
        Some(url)
    }

    fn commit(&mut self, state: GameState) {
        self.state = state;
        self.snapshots.send_replace(self.state.clone());
    }

    /// Get the current game state.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Watch committed states. Half-applied turns are never published.
    pub fn subscribe(&self) -> watch::Receiver<GameState> {
        self.snapshots.subscribe()
    }

    /// Start saving committed states in the background.
    pub fn spawn_autosave(&self) -> Autosave {
        Autosave::spawn(
            self.store.clone(),
            self.subscribe(),
            self.config.autosave_interval,
        )
    }

    /// Get the player's name.
    pub fn player_name(&self) -> &str {
        &self.state.player.name
    }

    /// Get the current location name.
    pub fn current_location(&self) -> &str {
        &self.state.current_scene.location
    }
}

/// A session that several tasks can submit turns to.
///
/// Only one turn runs at a time. Submitting while a turn is in flight fails
/// with [`SessionError::TurnInProgress`] instead of queueing.
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<GameSession>>,
    snapshots: watch::Receiver<GameState>,
}

impl SharedSession {
    pub fn new(session: GameSession) -> Self {
        let snapshots = session.subscribe();
        Self {
            inner: Arc::new(Mutex::new(session)),
            snapshots,
        }
    }

    pub async fn submit(&self, input: &str) -> Result<TurnReport, SessionError> {
        self.submit_with_cancel(input, &CancelToken::new()).await
    }

    pub async fn submit_with_cancel(
        &self,
        input: &str,
        cancel: &CancelToken,
    ) -> Result<TurnReport, SessionError> {
        let mut session = self
            .inner
            .try_lock()
            .map_err(|_| SessionError::TurnInProgress)?;
        session.player_action_with_cancel(input, cancel).await
    }

    /// Whether a turn is currently running.
    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// The latest committed state, readable while a turn is running.
    pub fn snapshot(&self) -> GameState {
        self.snapshots.borrow().clone()
    }

    /// Exclusive access to the session, waiting for any running turn.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, GameSession> {
        self.inner.lock().await
    }
}
