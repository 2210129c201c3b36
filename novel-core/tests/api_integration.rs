//! Integration tests that call the real Gemini API.
//!
//! These tests require GEMINI_API_KEY to be set (via .env file or environment).
//! Run with: `cargo test -p novel-core --test api_integration -- --ignored`

use gemini::{Gemini, Request};
use novel_core::resolver::{GeminiGenerator, TurnResolver};
use novel_core::state::{GameState, Player};
use std::sync::Arc;

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    gemini::api_key_from(|var| std::env::var(var).ok()).is_some()
}

#[tokio::test]
#[ignore]
async fn test_plain_generation() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: GEMINI_API_KEY not set");
        return;
    }

    let client = Gemini::from_env().expect("Failed to create client");
    let response = client
        .generate(Request::new("Reply with the single word: ready"))
        .await
        .expect("Generation failed");

    let text = response.text().expect("Response should have text");
    assert!(text.to_lowercase().contains("ready"), "got: {text}");
}

#[tokio::test]
#[ignore]
async fn test_resolver_produces_structured_step() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: GEMINI_API_KEY not set");
        return;
    }

    let client = Gemini::from_env().expect("Failed to create client");
    let resolver = TurnResolver::new(Arc::new(GeminiGenerator::new(client)));
    let state = GameState::new(Player::new("Alex"));
    let history = vec!["User Choice: Look around".to_string()];

    let resolution = resolver.resolve_turn(&history, "Look around", &state).await;

    println!("Narrative: {}", resolution.step.narrative);
    println!("Location: {}", resolution.step.location);
    assert!(
        !resolution.is_fallback(),
        "narrator failed after {} attempts",
        resolution.attempts
    );
    assert!(!resolution.step.narrative.is_empty());
    assert!(!resolution.step.choices.is_empty());
}
