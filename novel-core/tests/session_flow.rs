//! End-to-end turns through `GameSession` with scripted collaborators.

use novel_core::persist::SaveStore;
use novel_core::resolver::{CancelToken, FallbackReason};
use novel_core::session::{SessionConfig, SessionError, SharedSession};
use novel_core::state::{GameState, Player, VisualEffect};
use novel_core::step::{NpcStatUpdates, NpcUpdate, Patch, StatUpdates, RATE_LIMITED_CHOICE};
use novel_core::testing::{
    sample_step, RecordingPreloader, ScriptedGenerator, ScriptedReply, TestHarness,
};
use novel_core::visuals::ImageKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn at_beach() -> GameState {
    let mut state = GameState::new(Player::new("Test Hero"));
    state.current_scene.location = "Beach".to_string();
    state.background_image_url = Some("https://example.com/beach.png".to_string());
    state
}

// =============================================================================
// BASIC TURNS
// =============================================================================

#[tokio::test]
async fn test_beach_to_gym_refreshes_image() {
    let mut harness = TestHarness::new([ScriptedReply::step(&sample_step(
        "Gym",
        "You push open the gym doors.",
    ))]);
    harness.session.resume(at_beach());

    let report = harness.session.player_action("Walk to the gym").await.unwrap();

    assert_eq!(report.narrative, "You push open the gym doors.");
    assert!(report.fallback.is_none());
    assert_eq!(report.choices.len(), 2);
    assert_eq!(report.choices[0].id, "c_0");

    let request = report.refresh.expect("new location should refresh the image");
    assert!(harness.preloader.urls().is_empty());
    assert_eq!(
        harness.session.state().background_image_url.as_deref(),
        Some("https://example.com/beach.png")
    );

    let url = harness.session.commit_image(&request).await.unwrap();
    assert_eq!(harness.preloader.urls(), vec![url.clone()]);
    assert!(url.contains("Gym"));

    let state = harness.session.state();
    assert_eq!(state.current_scene.location, "Gym");
    assert_eq!(state.background_image_url.as_deref(), Some(url.as_str()));
    assert_eq!(
        state.history,
        vec![
            "User Choice: Walk to the gym".to_string(),
            "System: You push open the gym doors.".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_same_scene_keeps_image() {
    let mut harness = TestHarness::new([ScriptedReply::step(&sample_step(
        "Beach",
        "The tide comes in.",
    ))]);
    harness.session.resume(at_beach());

    let report = harness.session.player_action("Wait").await.unwrap();

    assert!(report.refresh.is_none());
    assert!(harness.preloader.urls().is_empty());
    assert_eq!(
        harness.session.state().background_image_url.as_deref(),
        Some("https://example.com/beach.png")
    );
}

#[tokio::test]
async fn test_speaker_visual_refreshes_scene_image() {
    let mut step = sample_step("Beach", "A lifeguard waves.");
    step.speaker = Some("Jenny".to_string());
    step.speaker_visual = Some("Blonde lifeguard in a red swimsuit".to_string());
    let mut harness = TestHarness::new([ScriptedReply::step(&step)]);
    harness.session.resume(at_beach());

    let report = harness.session.player_action("Wave back").await.unwrap();

    assert_eq!(report.speaker.as_deref(), Some("Jenny"));
    let request = report.refresh.expect("speaker visual should refresh the image");
    assert_eq!(request.kind, ImageKind::Scene);
    let url = harness.session.commit_image(&request).await.unwrap();
    assert!(url.contains("lifeguard"));
}

#[tokio::test]
async fn test_failed_preload_keeps_previous_image() {
    let mut harness = TestHarness::new([ScriptedReply::step(&sample_step(
        "Gym",
        "You push open the gym doors.",
    ))]);
    harness.session.resume(at_beach());
    harness.preloader.set_failing(true);

    let report = harness.session.player_action("Walk to the gym").await.unwrap();
    let request = report.refresh.expect("new location should refresh the image");

    assert!(harness.session.commit_image(&request).await.is_none());
    assert_eq!(harness.preloader.urls().len(), 1);
    let state = harness.session.state();
    assert_eq!(state.current_scene.location, "Gym");
    assert_eq!(
        state.background_image_url.as_deref(),
        Some("https://example.com/beach.png")
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_preload_does_not_delay_narrative() {
    let generator = ScriptedGenerator::new([ScriptedReply::step(&sample_step(
        "Gym",
        "You push open the gym doors.",
    ))]);
    let preloader = RecordingPreloader::new().with_delay(Duration::from_secs(60));
    let mut harness =
        TestHarness::with_parts(SessionConfig::new("Test Hero"), generator, preloader);
    harness.session.resume(at_beach());

    let started = tokio::time::Instant::now();
    let report = harness.session.player_action("Walk to the gym").await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.narrative, "You push open the gym doors.");
    assert_eq!(harness.session.state().current_scene.location, "Gym");

    let request = report.refresh.expect("new location should refresh the image");
    let url = harness.session.commit_image(&request).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(
        harness.session.state().background_image_url.as_deref(),
        Some(url.as_str())
    );
}

#[tokio::test]
async fn test_stats_and_npcs_merge() {
    let mut step = sample_step("Gym", "Jenny spots you.");
    step.speaker = Some("Jenny".to_string());
    step.stat_updates = Some(StatUpdates {
        strength: Patch::Set(105.0),
        ..Default::default()
    });
    step.npc_updates = Some(vec![NpcUpdate {
        name: "Jenny".to_string(),
        stats: NpcStatUpdates {
            affection: Patch::Set(10.0),
            mood: Patch::Set("impressed".to_string()),
            ..Default::default()
        },
    }]);
    step.effect = Some(VisualEffect::Flash);
    let mut harness = TestHarness::new([ScriptedReply::step(&step)]);

    let report = harness.session.player_action("Lift weights").await.unwrap();

    let state = harness.session.state();
    assert_eq!(state.player.stats.strength, 105.0);
    assert_eq!(state.player.stats.charisma, 100.0);

    let jenny = state.current_npc().expect("Jenny should be registered");
    assert_eq!(jenny.affection, 10.0);
    assert_eq!(jenny.mood, "impressed");
    assert_eq!(jenny.description, "Met in Gym");

    let effect = report.effect.expect("flash should be cued");
    assert_eq!(effect.effect, VisualEffect::Flash);
    assert_eq!(effect.duration, Duration::from_millis(1000));
}

#[tokio::test]
async fn test_empty_action_rejected() {
    let mut harness = TestHarness::new([]);

    let result = harness.session.player_action("   ").await;

    assert!(matches!(result, Err(SessionError::EmptyAction)));
    assert_eq!(harness.generator.calls(), 0);
    assert!(harness.session.state().history.is_empty());
}

// =============================================================================
// FALLBACK
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_fallback_turn_is_committed() {
    let mut harness = TestHarness::new([]);
    harness.session.resume(at_beach());
    let before = harness.session.state().clone();

    let report = harness.session.player_action("Look around").await.unwrap();

    assert_eq!(report.fallback, Some(FallbackReason::Exhausted));
    assert_eq!(report.attempts, 3);
    assert!(report.refresh.is_none());

    let state = harness.session.state();
    assert_eq!(state.current_scene.location, "Beach");
    assert_eq!(state.current_scene.choices.len(), 1);
    assert_eq!(state.player, before.player);
    assert_eq!(state.history.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_turn() {
    let mut harness = TestHarness::new([
        ScriptedReply::rate_limited(),
        ScriptedReply::rate_limited(),
        ScriptedReply::rate_limited(),
    ]);

    let report = harness.session.player_action("Look around").await.unwrap();

    assert_eq!(report.fallback, Some(FallbackReason::RateLimited));
    assert_eq!(report.choices[0].text, RATE_LIMITED_CHOICE);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_turn_leaves_state() {
    let mut harness = TestHarness::new([ScriptedReply::error("boom")]);
    let before = harness.session.state().clone();
    let cancel = CancelToken::new();

    let (result, _) = tokio::join!(
        harness.session.player_action_with_cancel("Look around", &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        }
    );

    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(harness.session.state(), &before);
}

// =============================================================================
// OVERLAPPING TURNS
// =============================================================================

#[tokio::test]
async fn test_overlapping_turn_rejected() {
    let gate = Arc::new(Notify::new());
    let generator = ScriptedGenerator::new([ScriptedReply::step(&sample_step(
        "Gym",
        "You arrive at the gym.",
    ))])
    .with_gate(gate.clone());
    let harness = TestHarness::with_generator(SessionConfig::new("Test Hero"), generator);
    let calls = harness.generator.clone();
    let shared = SharedSession::new(harness.session);

    let first = {
        let shared = shared.clone();
        tokio::spawn(async move { shared.submit("Walk to the gym").await })
    };
    while calls.calls() == 0 {
        tokio::task::yield_now().await;
    }

    assert!(shared.is_busy());
    let second = shared.submit("Go home").await;
    assert!(matches!(second, Err(SessionError::TurnInProgress)));

    // Readers see only the last committed state mid-turn.
    assert!(shared.snapshot().history.is_empty());

    gate.notify_one();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.narrative, "You arrive at the gym.");
    assert_eq!(calls.calls(), 1);
    assert!(!shared.is_busy());
    assert_eq!(shared.snapshot().current_scene.location, "Gym");
}

// =============================================================================
// PERSISTENCE
// =============================================================================

#[tokio::test]
async fn test_save_and_load_saved() {
    let mut harness = TestHarness::new([ScriptedReply::step(&sample_step(
        "Gym",
        "You arrive at the gym.",
    ))]);
    harness.session.player_action("Walk to the gym").await.unwrap();
    harness.session.save().await.unwrap();
    let saved = harness.session.state().clone();

    harness.session.start_new(Player::new("Someone Else"));
    assert_eq!(harness.session.current_location(), "City Center");

    assert!(harness.session.load_saved().await.unwrap());
    assert_eq!(harness.session.state(), &saved);
    assert_eq!(harness.session.player_name(), "Test Hero");
}

#[tokio::test]
async fn test_load_saved_without_save() {
    let mut harness = TestHarness::new([]);
    assert!(!harness.session.load_saved().await.unwrap());
    assert_eq!(harness.session.current_location(), "City Center");
}

#[tokio::test(start_paused = true)]
async fn test_autosave_captures_committed_turn() {
    let mut harness = TestHarness::new([ScriptedReply::step(&sample_step(
        "Gym",
        "You arrive at the gym.",
    ))]);
    let autosave = harness.session.spawn_autosave();

    harness.session.player_action("Walk to the gym").await.unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;

    let saved = harness.store.load().await.unwrap().expect("autosave should have run");
    assert_eq!(saved.current_scene.location, "Gym");
    assert_eq!(&saved, harness.session.state());
    assert_eq!(harness.store.save_count(), 1);

    autosave.stop();
}

// =============================================================================
// INITIAL IMAGE
// =============================================================================

#[tokio::test]
async fn test_refresh_initial_image() {
    let mut harness = TestHarness::new([]);

    let url = harness
        .session
        .refresh_initial_image()
        .await
        .expect("a fresh game has no background yet");
    assert!(url.starts_with("https://image.pollinations.ai/prompt/"));
    assert_eq!(
        harness.session.state().background_image_url.as_deref(),
        Some(url.as_str())
    );

    assert!(harness.session.refresh_initial_image().await.is_none());
    assert_eq!(harness.preloader.urls().len(), 1);
}

#[tokio::test]
async fn test_subscribers_see_committed_image() {
    let mut harness = TestHarness::new([]);
    let mut snapshots = harness.session.subscribe();

    harness.session.refresh_initial_image().await.unwrap();

    assert!(snapshots.has_changed().unwrap());
    assert!(snapshots
        .borrow_and_update()
        .background_image_url
        .is_some());
}
