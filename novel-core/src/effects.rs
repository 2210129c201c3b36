//! Transient screen effects.
//!
//! The engine only reports which effect to show and for how long. Clearing
//! it afterwards is up to whoever owns the screen.

use crate::state::VisualEffect;
use std::time::Duration;

/// How long an effect stays on screen.
pub const EFFECT_DURATION: Duration = Duration::from_millis(1000);

/// An effect to display for a fixed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectCue {
    pub effect: VisualEffect,
    pub duration: Duration,
}

impl EffectCue {
    /// A cue for `effect`, or `None` when there is nothing to show.
    pub fn for_effect(effect: VisualEffect) -> Option<Self> {
        match effect {
            VisualEffect::None => None,
            effect => Some(Self {
                effect,
                duration: EFFECT_DURATION,
            }),
        }
    }

    /// Resolves once the effect should be cleared.
    pub async fn expired(&self) {
        tokio::time::sleep(self.duration).await;
    }
}
