//! The structured result of one narrator call.
//!
//! A [`StoryStep`] mirrors the JSON the narrator is asked to produce.
//! Stat changes arrive as partial updates: every field is a [`Patch`],
//! either left alone or set to a new value.

use crate::state::{ChoiceKind, Npc, PlayerStats, SceneData, VisualEffect};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;

/// Narrative shown when the narrator could not be reached.
pub const FALLBACK_NARRATIVE: &str = "The world seems to pause... (AI Error. Please try again.)";

/// Narrative shown when the narrator is throttling us.
pub const RATE_LIMITED_NARRATIVE: &str = "The city is too busy right now (Rate Limit Exceeded). Please wait a few seconds before making your next choice.";

pub const FALLBACK_CHOICE: &str = "Try again";
pub const RATE_LIMITED_CHOICE: &str = "Wait and Continue";

/// Errors from parsing narrator output.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Malformed story step: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Story step offers no choices")]
    NoChoices,
}

/// A single field of a partial update.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Unchanged,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Unchanged
    }
}

impl<T: Clone> Patch<T> {
    /// Overwrite `target` if this patch carries a value.
    pub fn apply(&self, target: &mut T) {
        if let Patch::Set(value) = self {
            *target = value.clone();
        }
    }
}

impl<T> Patch<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Patch::Unchanged)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Patch::Set(value) => Some(value),
            Patch::Unchanged => None,
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Patch::Unchanged, Patch::Set)
    }
}

// `null` and a missing key both mean "leave it alone".
impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Patch::from)
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Patch::Unchanged => serializer.serialize_none(),
            Patch::Set(value) => value.serialize(serializer),
        }
    }
}

/// Partial update over [`PlayerStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatUpdates {
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub strength: Patch<f64>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub intelligence: Patch<f64>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub charisma: Patch<f64>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub money: Patch<f64>,
}

impl StatUpdates {
    /// Apply the provided fields; everything else keeps its value.
    pub fn apply(&self, stats: &mut PlayerStats) {
        self.strength.apply(&mut stats.strength);
        self.intelligence.apply(&mut stats.intelligence);
        self.charisma.apply(&mut stats.charisma);
        self.money.apply(&mut stats.money);
    }
}

/// Partial update over the mutable fields of an [`Npc`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NpcStatUpdates {
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub compliance: Patch<f64>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub affection: Patch<f64>,
    #[serde(
        default,
        rename = "sexualRating",
        skip_serializing_if = "Patch::is_unchanged"
    )]
    pub sexual_rating: Patch<f64>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub mood: Patch<String>,
}

impl NpcStatUpdates {
    pub fn apply(&self, npc: &mut Npc) {
        self.compliance.apply(&mut npc.compliance);
        self.affection.apply(&mut npc.affection);
        self.sexual_rating.apply(&mut npc.sexual_rating);
        self.mood.apply(&mut npc.mood);
    }
}

/// A change to one NPC, created on first mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcUpdate {
    pub name: String,
    #[serde(default)]
    pub stats: NpcStatUpdates,
}

/// A choice as the narrator phrases it (no id yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepChoice {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: ChoiceKind,
}

impl StepChoice {
    pub fn new(text: impl Into<String>, kind: ChoiceKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

/// One narrator response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryStep {
    pub narrative: String,
    pub location: String,
    /// Background description, without characters.
    pub visual_description: String,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub speaker_emotion: Option<String>,
    /// What the speaker looks like, for image generation.
    #[serde(default)]
    pub speaker_visual: Option<String>,
    pub choices: Vec<StepChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_updates: Option<StatUpdates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npc_updates: Option<Vec<NpcUpdate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<VisualEffect>,
}

impl StoryStep {
    /// Parse narrator output.
    ///
    /// Strict: anything that does not match the schema is an error, so the
    /// caller can retry. A stray Markdown code fence is tolerated.
    pub fn parse(raw: &str) -> Result<Self, StepError> {
        let step: StoryStep = serde_json::from_str(strip_code_fence(raw))?;
        if step.choices.is_empty() {
            return Err(StepError::NoChoices);
        }
        Ok(step)
    }

    /// The locally synthesized step used when the narrator is unavailable.
    ///
    /// The player stays where they are, nobody is speaking, and exactly one
    /// choice is offered so the game can always move on.
    pub fn fallback(scene: &SceneData, rate_limited: bool) -> Self {
        let (narrative, choice) = if rate_limited {
            (RATE_LIMITED_NARRATIVE, RATE_LIMITED_CHOICE)
        } else {
            (FALLBACK_NARRATIVE, FALLBACK_CHOICE)
        };

        Self {
            narrative: narrative.to_string(),
            location: scene.location.clone(),
            visual_description: scene.background_description.clone(),
            speaker: None,
            speaker_emotion: None,
            speaker_visual: None,
            choices: vec![StepChoice::new(choice, ChoiceKind::Action)],
            stat_updates: None,
            npc_updates: None,
            effect: Some(VisualEffect::None),
        }
    }

    /// The effect tag, treating absence as `none`.
    pub fn effect(&self) -> VisualEffect {
        self.effect.unwrap_or_default()
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// The response schema sent with every narrator request.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "narrative": { "type": "STRING" },
            "location": { "type": "STRING" },
            "visual_description": { "type": "STRING" },
            "speaker": { "type": "STRING", "nullable": true },
            "speaker_emotion": { "type": "STRING", "nullable": true },
            "speaker_visual": { "type": "STRING", "nullable": true },
            "choices": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "text": { "type": "STRING" },
                        "type": {
                            "type": "STRING",
                            "enum": ["dialogue", "action", "travel", "intimacy"]
                        }
                    },
                    "required": ["text", "type"]
                }
            },
            "stat_updates": {
                "type": "OBJECT",
                "nullable": true,
                "properties": {
                    "strength": { "type": "NUMBER", "nullable": true },
                    "intelligence": { "type": "NUMBER", "nullable": true },
                    "charisma": { "type": "NUMBER", "nullable": true },
                    "money": { "type": "NUMBER", "nullable": true }
                }
            },
            "npc_updates": {
                "type": "ARRAY",
                "nullable": true,
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING" },
                        "stats": {
                            "type": "OBJECT",
                            "properties": {
                                "compliance": { "type": "NUMBER", "nullable": true },
                                "affection": { "type": "NUMBER", "nullable": true },
                                "sexualRating": { "type": "NUMBER", "nullable": true },
                                "mood": { "type": "STRING", "nullable": true }
                            }
                        }
                    }
                }
            },
            "effect": {
                "type": "STRING",
                "enum": ["shake", "flash", "bloom", "none"],
                "nullable": true
            }
        },
        "required": ["narrative", "location", "visual_description", "choices"]
    })
}
