//! The turn resolver.
//!
//! Sends the player's action to the narrator, retries with backoff when the
//! call fails, and falls back to a locally built step once retries run out,
//! so a turn always produces something to show.

use crate::prompts::{build_context, SYSTEM_INSTRUCTION};
use crate::state::GameState;
use crate::step::{response_schema, StepError, StoryStep};
use async_trait::async_trait;
use gemini::{Gemini, Request, SafetySetting};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Default sampling temperature for the narrator.
pub const DEFAULT_TEMPERATURE: f32 = 0.9;

/// Errors a narrator backend can report.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Gemini API error: {0}")]
    Api(#[from] gemini::Error),

    #[error("Generation failed: {message}")]
    Failed { message: String, rate_limited: bool },
}

impl GenerationError {
    /// A failure that is not rate limiting.
    pub fn failed(message: impl Into<String>) -> Self {
        GenerationError::Failed {
            message: message.into(),
            rate_limited: false,
        }
    }

    /// A rate-limit failure.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        GenerationError::Failed {
            message: message.into(),
            rate_limited: true,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            GenerationError::Api(e) => e.is_rate_limited(),
            GenerationError::Failed {
                message,
                rate_limited,
            } => *rate_limited || gemini::mentions_rate_limit(message),
        }
    }
}

/// Everything a narrator backend needs for one call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub context: String,
    pub schema: Value,
    pub temperature: f32,
}

/// A structured-generation backend.
#[async_trait]
pub trait StoryGenerator: Send + Sync {
    /// Run one generation. `Ok(None)` means the call succeeded but
    /// produced no text (e.g. the candidate was blocked).
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<String>, GenerationError>;
}

/// [`StoryGenerator`] backed by the Gemini API.
#[derive(Clone)]
pub struct GeminiGenerator {
    client: Gemini,
}

impl GeminiGenerator {
    pub fn new(client: Gemini) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StoryGenerator for GeminiGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<String>, GenerationError> {
        let response = self.client.generate(api_request(request)).await?;
        let text = response.text();
        if text.is_none() {
            tracing::debug!(
                finish_reason = response.finish_reason().unwrap_or("unknown"),
                candidates = response.candidates.len(),
                "narrator returned no text"
            );
        }
        Ok(text)
    }
}

/// The Gemini request for one narrator call. Safety filtering is off on
/// every category and output is constrained to the step schema.
fn api_request(request: &GenerationRequest) -> Request {
    Request::new(request.context.clone())
        .with_system_instruction(request.system_instruction.clone())
        .with_json_schema(request.schema.clone())
        .with_temperature(request.temperature)
        .with_safety_settings(SafetySetting::block_none_all())
}

/// Retry schedule for narrator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// First wait after an ordinary failure; doubles per attempt.
    pub base_delay: Duration,
    /// First wait after a rate-limit failure; doubles per attempt.
    pub rate_limited_base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
            rate_limited_base_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Wait after the failure of zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32, rate_limited: bool) -> Duration {
        let base = if rate_limited {
            self.rate_limited_base_delay
        } else {
            self.base_delay
        };
        base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Lets a caller abandon a turn that is still retrying.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Why a turn ended on the fallback step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Every attempt failed.
    Exhausted,
    /// Every attempt failed and the last failure was rate limiting.
    RateLimited,
    /// The caller cancelled the turn.
    Cancelled,
}

/// Result of resolving one turn.
#[derive(Debug, Clone)]
pub struct TurnResolution {
    pub step: StoryStep,
    /// Narrator calls made.
    pub attempts: u32,
    /// Set when `step` was synthesized locally.
    pub fallback: Option<FallbackReason>,
}

impl TurnResolution {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Malformed(#[from] StepError),
}

impl AttemptError {
    fn is_rate_limited(&self) -> bool {
        match self {
            AttemptError::Generation(e) => e.is_rate_limited(),
            AttemptError::Malformed(_) => false,
        }
    }
}

/// Resolves player actions into story steps.
pub struct TurnResolver {
    generator: Arc<dyn StoryGenerator>,
    retry: RetryPolicy,
    temperature: f32,
}

impl TurnResolver {
    pub fn new(generator: Arc<dyn StoryGenerator>) -> Self {
        Self {
            generator,
            retry: RetryPolicy::default(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Build the narrator request for this turn.
    ///
    /// `history` must already include the player's choice.
    pub fn build_request(
        &self,
        history: &[String],
        action: &str,
        state: &GameState,
    ) -> GenerationRequest {
        GenerationRequest {
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            context: build_context(history, action, state),
            schema: response_schema(),
            temperature: self.temperature,
        }
    }

    /// Resolve a turn. Never fails: see [`TurnResolution::fallback`].
    pub async fn resolve_turn(
        &self,
        history: &[String],
        action: &str,
        state: &GameState,
    ) -> TurnResolution {
        self.resolve_turn_with_cancel(history, action, state, &CancelToken::new())
            .await
    }

    /// Resolve a turn, giving up early if `cancel` fires.
    pub async fn resolve_turn_with_cancel(
        &self,
        history: &[String],
        action: &str,
        state: &GameState,
        cancel: &CancelToken,
    ) -> TurnResolution {
        let request = self.build_request(history, action, state);
        let mut last_error: Option<AttemptError> = None;
        let mut attempts = 0;

        for attempt in 0..self.retry.max_attempts {
            if cancel.is_cancelled() {
                return self.cancelled(state, attempts);
            }
            attempts = attempt + 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(state, attempts),
                result = self.generator.generate(&request) => result,
            };

            let failure = match result {
                Ok(Some(text)) => match StoryStep::parse(&text) {
                    Ok(step) => {
                        tracing::debug!(attempt = attempts, location = %step.location, "turn resolved");
                        return TurnResolution {
                            step,
                            attempts,
                            fallback: None,
                        };
                    }
                    Err(e) => AttemptError::from(e),
                },
                Ok(None) => {
                    // Counts as an attempt but is retried without waiting.
                    tracing::warn!(attempt = attempts, "narrator returned an empty response");
                    continue;
                }
                Err(e) => AttemptError::from(e),
            };

            let rate_limited = failure.is_rate_limited();
            let delay = self.retry.delay_for(attempt, rate_limited);
            tracing::warn!(
                attempt = attempts,
                rate_limited,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "narrator attempt failed"
            );
            last_error = Some(failure);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(state, attempts),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let rate_limited = last_error
            .as_ref()
            .map(AttemptError::is_rate_limited)
            .unwrap_or(false);
        match &last_error {
            Some(e) => tracing::error!(attempts, error = %e, "all narrator attempts failed"),
            None => tracing::error!(attempts, "all narrator attempts returned empty responses"),
        }

        TurnResolution {
            step: StoryStep::fallback(&state.current_scene, rate_limited),
            attempts,
            fallback: Some(if rate_limited {
                FallbackReason::RateLimited
            } else {
                FallbackReason::Exhausted
            }),
        }
    }

    fn cancelled(&self, state: &GameState, attempts: u32) -> TurnResolution {
        tracing::info!(attempts, "turn cancelled");
        TurnResolution {
            step: StoryStep::fallback(&state.current_scene, false),
            attempts,
            fallback: Some(FallbackReason::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(0, false), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1, false), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2, false), Duration::from_secs(8));
    }

    #[test]
    fn test_rate_limited_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0, true), Duration::from_secs(5));
        assert_eq!(policy.delay_for(1, true), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2, true), Duration::from_secs(20));
    }

    #[test]
    fn test_generation_error_rate_limit() {
        assert!(GenerationError::rate_limited("slow down").is_rate_limited());
        assert!(GenerationError::failed("HTTP 429 Too Many Requests").is_rate_limited());
        assert!(GenerationError::failed("RESOURCE_EXHAUSTED").is_rate_limited());
        assert!(!GenerationError::failed("connection reset").is_rate_limited());

        let api = GenerationError::from(gemini::Error::Api {
            status: 429,
            message: String::new(),
        });
        assert!(api.is_rate_limited());
    }

    #[test]
    fn test_api_request_settings() {
        let resolver = TurnResolver::new(Arc::new(GeminiGenerator::new(Gemini::new("k"))));
        let state = GameState::new(crate::state::Player::new("Alex"));
        let history = vec!["User Choice: Look around".to_string()];
        let request = api_request(&resolver.build_request(&history, "Look around", &state));

        assert_eq!(request.contents, build_context(&history, "Look around", &state));
        assert_eq!(request.system_instruction.as_deref(), Some(SYSTEM_INSTRUCTION));
        assert_eq!(request.response_mime_type.as_deref(), Some("application/json"));
        assert_eq!(request.response_schema, Some(response_schema()));
        assert_eq!(request.temperature, Some(0.9));
        assert!(request.model.is_none());

        assert_eq!(request.safety_settings.len(), 4);
        for category in gemini::HarmCategory::ALL {
            assert!(request.safety_settings.contains(&SafetySetting {
                category,
                threshold: gemini::BlockThreshold::BlockNone,
            }));
        }
    }

    #[test]
    fn test_malformed_is_not_rate_limited() {
        let err = AttemptError::from(StepError::NoChoices);
        assert!(!err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let clone = token.clone();
        let waiter = tokio::spawn(async move { clone.cancelled().await });
        token.cancel();
        waiter.await.unwrap();
        assert!(token.is_cancelled());
    }
}
