//! Visual novel engine with an AI narrator.
//!
//! This crate provides:
//! - A turn resolver that calls the narrator with retries and a fallback
//! - Partial state merging for player stats and the NPC registry
//! - Scene image refresh decisions and preloading
//! - Single-slot save games with autosave
//!
//! # Quick Start
//!
//! ```ignore
//! use novel_core::{GameSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new("Alex").with_save_dir("saves");
//!
//!     let mut session = GameSession::from_env(config)?;
//!     let _autosave = session.spawn_autosave();
//!
//!     let report = session.player_action("Look around").await?;
//!     println!("{}", report.narrative);
//!
//!     session.save().await?;
//!     Ok(())
//! }
//! ```

pub mod effects;
pub mod merge;
pub mod persist;
pub mod prompts;
pub mod resolver;
pub mod session;
pub mod state;
pub mod step;
pub mod testing;
pub mod visuals;

// Primary public API
pub use effects::EffectCue;
pub use merge::{apply_step, TurnOutcome};
pub use persist::{Autosave, FileSaveStore, MemorySaveStore, PersistError, SaveStore};
pub use resolver::{
    CancelToken, FallbackReason, GeminiGenerator, RetryPolicy, StoryGenerator, TurnResolution,
    TurnResolver,
};
pub use session::{GameSession, SessionConfig, SessionError, SharedSession, TurnReport};
pub use state::{Choice, ChoiceKind, GameState, Npc, Player, SceneData, VisualEffect};
pub use step::StoryStep;
pub use testing::{RecordingPreloader, ScriptedGenerator, ScriptedReply, TestHarness};
pub use visuals::{HttpPreloader, ImagePreloader, ImageRequest, ImageUrlBuilder};
