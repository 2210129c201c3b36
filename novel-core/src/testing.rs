//! Testing utilities.
//!
//! This module provides tools for integration testing:
//! - `ScriptedGenerator` for deterministic turns without API calls
//! - `RecordingPreloader` for checking which images were fetched
//! - `TestHarness` for wiring a session around both

use crate::persist::MemorySaveStore;
use crate::resolver::{GenerationError, GenerationRequest, StoryGenerator};
use crate::session::{GameSession, SessionConfig};
use crate::state::ChoiceKind;
use crate::step::{StepChoice, StoryStep};
use crate::visuals::{ImagePreloader, VisualError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// One scripted narrator reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Raw response text, parsed like a real reply.
    Text(String),
    /// A successful call with no text.
    Empty,
    /// A failed call.
    Error { message: String, rate_limited: bool },
}

impl ScriptedReply {
    pub fn step(step: &StoryStep) -> Self {
        ScriptedReply::Text(step_json(step))
    }

    pub fn error(message: impl Into<String>) -> Self {
        ScriptedReply::Error {
            message: message.into(),
            rate_limited: false,
        }
    }

    pub fn rate_limited() -> Self {
        ScriptedReply::Error {
            message: "429 RESOURCE_EXHAUSTED".to_string(),
            rate_limited: true,
        }
    }
}

/// A narrator that returns scripted replies in order.
///
/// Once the script runs out every call fails.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl ScriptedGenerator {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Make every call wait for a permit on `gate` before replying.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Add a reply to the end of the script.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl StoryGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<String>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match reply {
            Some(ScriptedReply::Text(text)) => Ok(Some(text)),
            Some(ScriptedReply::Empty) => Ok(None),
            Some(ScriptedReply::Error {
                message,
                rate_limited: true,
            }) => Err(GenerationError::rate_limited(message)),
            Some(ScriptedReply::Error { message, .. }) => Err(GenerationError::failed(message)),
            None => Err(GenerationError::failed("script exhausted")),
        }
    }
}

/// An image preloader that records URLs instead of downloading them.
#[derive(Debug, Default)]
pub struct RecordingPreloader {
    urls: Mutex<Vec<String>>,
    failing: AtomicBool,
    delay: Duration,
}

impl RecordingPreloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `delay` to finish every preload, like a slow image server.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// A preloader whose every preload fails.
    pub fn failing() -> Self {
        let preloader = Self::default();
        preloader.set_failing(true);
        preloader
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every URL requested, in order, including failed ones.
    pub fn urls(&self) -> Vec<String> {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ImagePreloader for RecordingPreloader {
    async fn preload(&self, url: &str) -> Result<(), VisualError> {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(VisualError::Status(503));
        }
        Ok(())
    }
}

/// Serialize a step the way the narrator would send it.
pub fn step_json(step: &StoryStep) -> String {
    serde_json::to_string(step).unwrap_or_default()
}

/// A minimal valid step at `location`.
pub fn sample_step(location: &str, narrative: &str) -> StoryStep {
    StoryStep {
        narrative: narrative.to_string(),
        location: location.to_string(),
        visual_description: format!("A view of the {location}"),
        speaker: None,
        speaker_emotion: None,
        speaker_visual: None,
        choices: vec![
            StepChoice::new("Look around", ChoiceKind::Action),
            StepChoice::new("Leave", ChoiceKind::Action),
        ],
        stat_updates: None,
        npc_updates: None,
        effect: None,
    }
}

/// A session wired to scripted collaborators.
pub struct TestHarness {
    pub generator: Arc<ScriptedGenerator>,
    pub preloader: Arc<RecordingPreloader>,
    pub store: Arc<MemorySaveStore>,
    pub session: GameSession,
}

impl TestHarness {
    /// Create a harness with the default config and the given script.
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self::with_generator(SessionConfig::new("Test Hero"), ScriptedGenerator::new(replies))
    }

    /// Create a harness around a prepared generator.
    pub fn with_generator(config: SessionConfig, generator: ScriptedGenerator) -> Self {
        Self::with_parts(config, generator, RecordingPreloader::new())
    }

    /// Create a harness around a prepared generator and preloader.
    pub fn with_parts(
        config: SessionConfig,
        generator: ScriptedGenerator,
        preloader: RecordingPreloader,
    ) -> Self {
        let generator = Arc::new(generator);
        let preloader = Arc::new(preloader);
        let store = Arc::new(MemorySaveStore::new());
        let session = GameSession::new(
            config,
            generator.clone(),
            preloader.clone(),
            store.clone(),
        );

        Self {
            generator,
            preloader,
            store,
            session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::TurnResolver;
    use crate::state::{GameState, Player};

    #[tokio::test]
    async fn test_scripted_generator_order() {
        let generator = Arc::new(ScriptedGenerator::new([
            ScriptedReply::Empty,
            ScriptedReply::step(&sample_step("Beach", "Waves roll in.")),
        ]));
        let resolver = TurnResolver::new(generator.clone());
        let state = GameState::new(Player::new("Hero"));

        let resolution = resolver.resolve_turn(&[], "Go to the beach", &state).await;

        assert_eq!(resolution.step.location, "Beach");
        assert_eq!(resolution.attempts, 2);
        assert_eq!(generator.calls(), 2);
        assert!(generator.requests()[0].context.contains("Go to the beach"));
    }

    #[tokio::test]
    async fn test_recording_preloader() {
        let preloader = RecordingPreloader::new();
        preloader.preload("https://example.com/a").await.unwrap();

        preloader.set_failing(true);
        assert!(preloader.preload("https://example.com/b").await.is_err());
        assert_eq!(preloader.urls().len(), 2);
    }

    #[test]
    fn test_sample_step_parses() {
        let step = sample_step("Gym", "You arrive.");
        assert_eq!(StoryStep::parse(&step_json(&step)).unwrap(), step);
    }
}
