//! Save-game persistence.
//!
//! One installation has one save slot. The state is stored as an opaque
//! JSON blob wrapped in a small versioned envelope.

use crate::state::GameState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Current save format version.
pub const SAVE_VERSION: u32 = 1;

/// File name of the single save slot.
pub const SAVE_SLOT_FILE: &str = "sca_save_state.json";

/// How often the autosave task writes the current state.
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Summary of a save, readable without loading the whole state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub player_name: String,
    pub location: String,
    pub known_npcs: usize,
    pub turns: usize,
}

impl SaveMetadata {
    fn from_state(state: &GameState) -> Self {
        Self {
            player_name: state.player.name.clone(),
            location: state.current_scene.location.clone(),
            known_npcs: state.npcs.len(),
            turns: state.turn_count(),
        }
    }
}

/// The on-disk envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedGame {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub metadata: SaveMetadata,
    pub state: GameState,
}

impl SavedGame {
    pub fn new(state: GameState) -> Self {
        Self {
            version: SAVE_VERSION,
            saved_at: Utc::now(),
            metadata: SaveMetadata::from_state(&state),
            state,
        }
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self, PersistError> {
        let saved: Self = serde_json::from_str(content)?;
        check_version(saved.version)?;
        Ok(saved)
    }
}

fn check_version(found: u32) -> Result<(), PersistError> {
    if found != SAVE_VERSION {
        return Err(PersistError::VersionMismatch {
            expected: SAVE_VERSION,
            found,
        });
    }
    Ok(())
}

/// Key-value persistence for the single save slot.
#[async_trait]
pub trait SaveStore: Send + Sync {
    async fn save(&self, state: &GameState) -> Result<(), PersistError>;

    /// The saved state, or `None` if nothing has been saved.
    async fn load(&self) -> Result<Option<GameState>, PersistError>;

    async fn clear(&self) -> Result<(), PersistError>;
}

/// Saves to a JSON file in a directory.
#[derive(Debug, Clone)]
pub struct FileSaveStore {
    dir: PathBuf,
}

impl FileSaveStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the save slot.
    pub fn path(&self) -> PathBuf {
        self.dir.join(SAVE_SLOT_FILE)
    }

    /// Read the save metadata without deserializing the game state.
    pub async fn peek_metadata(&self) -> Result<Option<SaveMetadata>, PersistError> {
        let path = self.path();
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SaveMetadata,
        }

        let content = fs::read_to_string(&path).await?;
        let partial: Partial = serde_json::from_str(&content)?;
        check_version(partial.version)?;
        Ok(Some(partial.metadata))
    }
}

#[async_trait]
impl SaveStore for FileSaveStore {
    async fn save(&self, state: &GameState) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path();
        let temp_path = path.with_extension("json.tmp");
        let content = SavedGame::new(state.clone()).to_json()?;

        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!(path = %path.display(), "saved game");
        Ok(())
    }

    async fn load(&self) -> Result<Option<GameState>, PersistError> {
        let path = self.path();
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let saved = SavedGame::from_json(&content)?;
        tracing::debug!(path = %path.display(), saved_at = %saved.saved_at, "loaded game");
        Ok(Some(saved.state))
    }

    async fn clear(&self) -> Result<(), PersistError> {
        let path = self.path();
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }
}

/// In-memory save slot.
#[derive(Debug, Default)]
pub struct MemorySaveStore {
    slot: Mutex<Option<String>>,
    saves: Mutex<usize>,
}

impl MemorySaveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl SaveStore for MemorySaveStore {
    async fn save(&self, state: &GameState) -> Result<(), PersistError> {
        let content = SavedGame::new(state.clone()).to_json()?;
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(content);
        }
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }

    async fn load(&self) -> Result<Option<GameState>, PersistError> {
        let content = self.slot.lock().ok().and_then(|slot| slot.clone());
        content
            .map(|c| SavedGame::from_json(&c).map(|saved| saved.state))
            .transpose()
    }

    async fn clear(&self) -> Result<(), PersistError> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
        Ok(())
    }
}

/// Periodically saves the most recently committed state.
///
/// Only fully applied turns are published on the channel, so a tick that
/// lands mid-turn saves the previous turn's state.
pub struct Autosave {
    handle: JoinHandle<()>,
}

impl Autosave {
    /// Start saving every `period`. The task ends when the channel's sender
    /// is dropped or the `Autosave` is stopped.
    pub fn spawn(
        store: Arc<dyn SaveStore>,
        mut snapshots: watch::Receiver<GameState>,
        period: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if snapshots.has_changed().is_err() {
                    break;
                }
                let state = snapshots.borrow_and_update().clone();
                match store.save(&state).await {
                    Ok(()) => tracing::debug!("auto-saved"),
                    Err(e) => tracing::warn!(error = %e, "auto-save failed"),
                }
            }
        });

        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Autosave {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
