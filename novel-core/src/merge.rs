//! Folding a narrator step into the game state.

use crate::effects::EffectCue;
use crate::state::{Choice, GameState, Npc, SceneData};
use crate::step::StoryStep;
use crate::visuals::{needs_refresh, ImageRequest};

/// History prefix for the player's choice.
pub const USER_CHOICE_PREFIX: &str = "User Choice: ";

/// History prefix for the narrator's reply.
pub const SYSTEM_PREFIX: &str = "System: ";

/// The result of applying one step.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The new state. The input state is never modified.
    pub state: GameState,
    /// Set when the scene image should be regenerated.
    pub refresh: Option<ImageRequest>,
    /// Set when a screen effect should play.
    pub effect: Option<EffectCue>,
}

/// Record the player's choice in the log before the narrator is called.
pub fn record_choice(history: &mut Vec<String>, action: &str) {
    history.push(format!("{USER_CHOICE_PREFIX}{action}"));
}

/// Apply `step` to `state`.
///
/// Stats and NPCs are shallow-merged, the scene is replaced, and the
/// narrative is appended to the log. The refresh decision compares the
/// step with the scene it replaces.
pub fn apply_step(state: &GameState, step: &StoryStep) -> TurnOutcome {
    let mut next = state.clone();

    if let Some(updates) = &step.stat_updates {
        updates.apply(&mut next.player.stats);
    }

    for update in step.npc_updates.iter().flatten() {
        let npc = next
            .npcs
            .entry(update.name.clone())
            .or_insert_with(|| Npc::met_in(update.name.clone(), &step.location));
        update.stats.apply(npc);
    }

    let refresh = needs_refresh(&state.current_scene, step).then(|| ImageRequest::for_step(step));

    next.current_scene = scene_from_step(step);
    next.history.push(format!("{SYSTEM_PREFIX}{}", step.narrative));

    TurnOutcome {
        state: next,
        refresh,
        effect: EffectCue::for_effect(step.effect()),
    }
}

fn scene_from_step(step: &StoryStep) -> SceneData {
    SceneData {
        location: step.location.clone(),
        background_description: step.visual_description.clone(),
        narrative: step.narrative.clone(),
        speaker: step.speaker.clone(),
        speaker_emotion: step.speaker_emotion.clone(),
        choices: step
            .choices
            .iter()
            .enumerate()
            .map(|(i, choice)| Choice {
                id: format!("c_{i}"),
                text: choice.text.clone(),
                kind: choice.kind,
            })
            .collect(),
        visual_effects: step.effect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChoiceKind, Player, VisualEffect};
    use crate::step::{NpcStatUpdates, NpcUpdate, Patch, StatUpdates, StepChoice};

    fn base_state() -> GameState {
        let mut state = GameState::new(Player::new("Hero"));
        state.current_scene.location = "Beach".to_string();
        record_choice(&mut state.history, "Walk to the gym");
        state
    }

    fn step_to(location: &str) -> StoryStep {
        StoryStep {
            narrative: "You push open the gym doors.".to_string(),
            location: location.to_string(),
            visual_description: "A bright gym".to_string(),
            speaker: None,
            speaker_emotion: None,
            speaker_visual: None,
            choices: vec![
                StepChoice::new("Lift weights", ChoiceKind::Action),
                StepChoice::new("Say hi", ChoiceKind::Dialogue),
            ],
            stat_updates: None,
            npc_updates: None,
            effect: None,
        }
    }

    #[test]
    fn test_partial_stats_leave_others_unchanged() {
        let state = base_state();
        let mut step = step_to("Gym");
        step.stat_updates = Some(StatUpdates {
            strength: Patch::Set(120.0),
            ..Default::default()
        });

        let next = apply_step(&state, &step).state;

        assert_eq!(next.player.stats.strength, 120.0);
        assert_eq!(next.player.stats.intelligence, state.player.stats.intelligence);
        assert_eq!(next.player.stats.charisma, state.player.stats.charisma);
        assert_eq!(next.player.stats.money, state.player.stats.money);
    }

    #[test]
    fn test_unknown_npc_created_with_defaults() {
        let state = base_state();
        let mut step = step_to("Gym");
        step.npc_updates = Some(vec![NpcUpdate {
            name: "Jenny".to_string(),
            stats: NpcStatUpdates {
                affection: Patch::Set(5.0),
                ..Default::default()
            },
        }]);

        let next = apply_step(&state, &step).state;
        let jenny = &next.npcs["Jenny"];

        assert_eq!(jenny.name, "Jenny");
        assert_eq!(jenny.description, "Met in Gym");
        assert_eq!(jenny.affection, 5.0);
        assert_eq!(jenny.compliance, 0.0);
        assert_eq!(jenny.sexual_rating, 0.0);
        assert_eq!(jenny.mood, "Neutral");
    }

    #[test]
    fn test_known_npc_merged() {
        let mut state = base_state();
        let mut jenny = Npc::met_in("Jenny", "Beach");
        jenny.compliance = 40.0;
        jenny.affection = 10.0;
        state.npcs.insert("Jenny".to_string(), jenny);

        let mut step = step_to("Gym");
        step.npc_updates = Some(vec![NpcUpdate {
            name: "Jenny".to_string(),
            stats: NpcStatUpdates {
                mood: Patch::Set("flirty".to_string()),
                affection: Patch::Set(15.0),
                ..Default::default()
            },
        }]);

        let next = apply_step(&state, &step).state;
        let jenny = &next.npcs["Jenny"];

        assert_eq!(jenny.description, "Met in Beach");
        assert_eq!(jenny.compliance, 40.0);
        assert_eq!(jenny.affection, 15.0);
        assert_eq!(jenny.mood, "flirty");
        assert_eq!(next.npcs.len(), 1);
    }

    #[test]
    fn test_scene_replaced_and_history_appended() {
        let state = base_state();
        let mut step = step_to("Gym");
        step.speaker = Some("Coach".to_string());
        step.speaker_emotion = Some("stern".to_string());
        step.effect = Some(VisualEffect::Shake);

        let outcome = apply_step(&state, &step);
        let scene = &outcome.state.current_scene;

        assert_eq!(scene.location, "Gym");
        assert_eq!(scene.background_description, "A bright gym");
        assert_eq!(scene.speaker.as_deref(), Some("Coach"));
        assert_eq!(scene.speaker_emotion.as_deref(), Some("stern"));
        assert_eq!(scene.visual_effects, VisualEffect::Shake);
        assert_eq!(scene.choices[0].id, "c_0");
        assert_eq!(scene.choices[1].id, "c_1");
        assert_eq!(scene.choices[1].kind, ChoiceKind::Dialogue);

        assert_eq!(
            outcome.state.history,
            vec![
                "User Choice: Walk to the gym".to_string(),
                "System: You push open the gym doors.".to_string(),
            ]
        );
        assert_eq!(outcome.effect.map(|c| c.effect), Some(VisualEffect::Shake));
    }

    #[test]
    fn test_input_state_untouched() {
        let state = base_state();
        let snapshot = state.clone();
        let mut step = step_to("Gym");
        step.stat_updates = Some(StatUpdates {
            money: Patch::Set(0.0),
            ..Default::default()
        });

        let _ = apply_step(&state, &step);
        assert_eq!(state, snapshot);
    }

    #[test]
    fn test_apply_is_deterministic() {
        let state = base_state();
        let mut step = step_to("Gym");
        step.npc_updates = Some(vec![
            NpcUpdate {
                name: "Mia".to_string(),
                stats: NpcStatUpdates::default(),
            },
            NpcUpdate {
                name: "Jenny".to_string(),
                stats: NpcStatUpdates {
                    compliance: Patch::Set(3.0),
                    ..Default::default()
                },
            },
        ]);

        assert_eq!(apply_step(&state, &step), apply_step(&state, &step));
    }

    #[test]
    fn test_beach_to_gym_refreshes_background() {
        let state = base_state();
        let outcome = apply_step(&state, &step_to("Gym"));

        let refresh = outcome.refresh.expect("location change should refresh");
        assert_eq!(refresh.prompt, "A bright gym");
        assert!(outcome.effect.is_none());
    }

    #[test]
    fn test_same_scene_no_refresh() {
        let state = base_state();
        let outcome = apply_step(&state, &step_to("Beach"));
        assert!(outcome.refresh.is_none());
    }

    #[test]
    fn test_fallback_step_commits_as_scene() {
        let state = base_state();
        let fallback = StoryStep::fallback(&state.current_scene, false);

        let next = apply_step(&state, &fallback).state;

        assert_eq!(next.current_scene.location, "Beach");
        assert_eq!(next.current_scene.choices.len(), 1);
        assert_eq!(next.current_scene.choices[0].text, "Try again");
        assert_eq!(next.player, state.player);
        assert_eq!(next.npcs, state.npcs);
    }
}
