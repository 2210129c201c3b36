//! Persistent game state: the player, the NPC registry, the narrative log
//! and the scene currently on screen.
//!
//! Field names serialize in camelCase so saved games stay readable by
//! older front-ends that wrote the same blob.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Starting value for strength, intelligence and charisma.
pub const STARTING_STAT: f64 = 100.0;

/// Starting money.
pub const STARTING_MONEY: f64 = 9_999_999.0;

/// Appearance used when the player does not describe themselves.
pub const DEFAULT_PLAYER_APPEARANCE: &str =
    "A handsome young bachelor with tapered black hairstyle, athletic but lean built body.";

/// Mood given to an NPC the first time they are mentioned.
pub const DEFAULT_NPC_MOOD: &str = "Neutral";

/// The player's numeric stats.
///
/// Stats are plain numbers; the narrator may push them anywhere,
/// including below zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub strength: f64,
    pub intelligence: f64,
    pub charisma: f64,
    pub money: f64,
}

impl Default for PlayerStats {
    fn default() -> Self {
        Self {
            strength: STARTING_STAT,
            intelligence: STARTING_STAT,
            charisma: STARTING_STAT,
            money: STARTING_MONEY,
        }
    }
}

/// The player character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub appearance: String,
    pub stats: PlayerStats,
}

impl Player {
    /// Create a player with the default appearance and starting stats.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            appearance: DEFAULT_PLAYER_APPEARANCE.to_string(),
            stats: PlayerStats::default(),
        }
    }

    pub fn with_appearance(mut self, appearance: impl Into<String>) -> Self {
        self.appearance = appearance.into();
        self
    }
}

/// A non-player character, keyed by name in [`GameState::npcs`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Npc {
    pub name: String,
    pub description: String,
    pub compliance: f64,
    pub affection: f64,
    /// 0-100 by convention, not enforced.
    pub sexual_rating: f64,
    pub mood: String,
}

impl Npc {
    /// The record created the first time an NPC is mentioned.
    pub fn met_in(name: impl Into<String>, location: &str) -> Self {
        Self {
            name: name.into(),
            description: format!("Met in {location}"),
            compliance: 0.0,
            affection: 0.0,
            sexual_rating: 0.0,
            mood: DEFAULT_NPC_MOOD.to_string(),
        }
    }
}

/// Category tag on a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceKind {
    Dialogue,
    Action,
    Travel,
    Intimacy,
}

impl ChoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChoiceKind::Dialogue => "dialogue",
            ChoiceKind::Action => "action",
            ChoiceKind::Travel => "travel",
            ChoiceKind::Intimacy => "intimacy",
        }
    }
}

/// A short-lived screen effect requested by the narrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualEffect {
    Shake,
    Flash,
    Bloom,
    #[default]
    None,
}

/// A choice offered in the current scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
    #[serde(rename = "actionType")]
    pub kind: ChoiceKind,
}

/// What is currently on screen. Replaced wholesale every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneData {
    pub location: String,
    pub background_description: String,
    pub narrative: String,
    pub speaker: Option<String>,
    pub speaker_emotion: Option<String>,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub visual_effects: VisualEffect,
}

impl SceneData {
    /// The scene a new game opens on.
    pub fn opening() -> Self {
        Self {
            location: "City Center".to_string(),
            background_description: "A bustling modern city center with skyscrapers and parks."
                .to_string(),
            narrative: "You arrive in the city, ready for a new life.".to_string(),
            speaker: None,
            speaker_emotion: None,
            choices: vec![Choice {
                id: "start".to_string(),
                text: "Look around".to_string(),
                kind: ChoiceKind::Action,
            }],
            visual_effects: VisualEffect::None,
        }
    }
}

/// Everything that makes up a game in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub player: Player,
    #[serde(default)]
    pub npcs: BTreeMap<String, Npc>,
    /// Append-only narrative log ("User Choice: ..." / "System: ..." lines).
    #[serde(default)]
    pub history: Vec<String>,
    pub current_scene: SceneData,
    #[serde(default)]
    pub background_image_url: Option<String>,
}

impl GameState {
    /// Start a new game for `player` on the opening scene.
    pub fn new(player: Player) -> Self {
        Self {
            player,
            npcs: BTreeMap::new(),
            history: Vec::new(),
            current_scene: SceneData::opening(),
            background_image_url: None,
        }
    }

    /// The registry entry for whoever is speaking right now, if known.
    pub fn current_npc(&self) -> Option<&Npc> {
        self.current_scene
            .speaker
            .as_ref()
            .and_then(|name| self.npcs.get(name))
    }

    /// Number of turns played, counted from the narrative log.
    pub fn turn_count(&self) -> usize {
        self.history
            .iter()
            .filter(|line| line.starts_with(crate::merge::SYSTEM_PREFIX))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_game_defaults() {
        let state = GameState::new(Player::new("Hero"));

        assert_eq!(state.player.name, "Hero");
        assert_eq!(state.player.appearance, DEFAULT_PLAYER_APPEARANCE);
        assert_eq!(state.player.stats.strength, 100.0);
        assert_eq!(state.player.stats.money, 9_999_999.0);
        assert_eq!(state.current_scene.location, "City Center");
        assert_eq!(state.current_scene.choices.len(), 1);
        assert_eq!(state.current_scene.choices[0].id, "start");
        assert_eq!(state.current_scene.choices[0].kind, ChoiceKind::Action);
        assert!(state.npcs.is_empty());
        assert!(state.history.is_empty());
        assert!(state.background_image_url.is_none());
    }

    #[test]
    fn test_npc_defaults() {
        let npc = Npc::met_in("Jenny", "Beach");
        assert_eq!(npc.description, "Met in Beach");
        assert_eq!(npc.compliance, 0.0);
        assert_eq!(npc.affection, 0.0);
        assert_eq!(npc.sexual_rating, 0.0);
        assert_eq!(npc.mood, "Neutral");
    }

    #[test]
    fn test_current_npc() {
        let mut state = GameState::new(Player::new("Hero"));
        assert!(state.current_npc().is_none());

        state
            .npcs
            .insert("Jenny".to_string(), Npc::met_in("Jenny", "Gym"));
        state.current_scene.speaker = Some("Jenny".to_string());
        assert_eq!(state.current_npc().map(|n| n.name.as_str()), Some("Jenny"));

        state.current_scene.speaker = Some("Stranger".to_string());
        assert!(state.current_npc().is_none());
    }

    #[test]
    fn test_save_blob_field_names() {
        let mut state = GameState::new(Player::new("Hero"));
        state
            .npcs
            .insert("Jenny".to_string(), Npc::met_in("Jenny", "Gym"));

        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("currentScene").is_some());
        assert!(json.get("backgroundImageUrl").is_some());
        assert_eq!(json["currentScene"]["choices"][0]["actionType"], "action");
        assert_eq!(json["currentScene"]["visualEffects"], "none");
        assert_eq!(json["npcs"]["Jenny"]["sexualRating"], 0.0);
    }
}
