//! File-backed store for the shared game state document.

use crate::bus::ChangeBus;
use crate::error::{Result, StoreError};
use crate::types::{GameState, PlayerUpdate, Timestamp};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory holding the document and the lock file.
    pub path: PathBuf,

    /// File name of the document inside `path`.
    pub file_name: String,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data"),
            file_name: "gameState.json".to_string(),
            create_if_missing: true,
        }
    }
}

/// Lock file guarding the directory against a second store handle.
const LOCK_FILE: &str = "LOCK";

/// Suffix of the scratch file a document is written to before being renamed into place.
const TEMP_SUFFIX: &str = "tmp";

/// Why the persisted document could not be used.
#[derive(Debug)]
enum ReadFailure {
    Missing,
    Corrupt(String),
}

/// The single-document state store.
///
/// Writers are serialized by one mutex, so read-modify-write operations never
/// lose an interleaved update. Plain reads take no lock: documents are replaced
/// by rename, so a reader sees either the old or the new file.
///
/// Every successful write publishes one change on the bus, after the writer
/// lock has been released.
pub struct StateStore {
    /// Store configuration.
    config: StoreConfig,

    /// Full path of the persisted document.
    document_path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Where changes are announced.
    bus: Arc<dyn ChangeBus>,

    /// Lock for write operations to ensure atomicity.
    write_lock: Mutex<()>,

    /// Last `lastUpdated` this store handed out.
    last_stamp: Mutex<Option<Timestamp>>,
}

impl StateStore {
    /// Open the store directory, creating it if configured to.
    pub fn open(config: StoreConfig, bus: Arc<dyn ChangeBus>) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(StoreError::NotInitialized);
            }
            fs::create_dir_all(&config.path)?;
        }

        let lock_file = Self::acquire_lock(&config.path)?;
        let document_path = config.path.join(&config.file_name);

        let store = Self {
            config,
            document_path,
            _lock_file: lock_file,
            bus,
            write_lock: Mutex::new(()),
            last_stamp: Mutex::new(None),
        };

        // Keep stamps monotonic across restarts.
        if let Ok(existing) = store.read_document() {
            *store.last_stamp.lock() = Some(existing.last_updated);
        }

        tracing::debug!(path = %store.document_path.display(), "state store opened");
        Ok(store)
    }

    /// Directory holding the document.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Full path of the persisted document.
    pub fn document_path(&self) -> &Path {
        &self.document_path
    }

    /// The bus this store publishes to.
    pub fn bus(&self) -> &Arc<dyn ChangeBus> {
        &self.bus
    }

    // --- Reads ---

    /// Return the current document.
    ///
    /// A missing or unparsable document is replaced by the default one, which is
    /// persisted before being returned. Initialization does not publish.
    pub fn load(&self) -> Result<GameState> {
        match self.read_document() {
            Ok(state) => Ok(state),
            Err(_) => {
                let _lock = self.write_lock.lock();
                self.load_locked()
            }
        }
    }

    /// Load while holding the writer lock.
    fn load_locked(&self) -> Result<GameState> {
        // Another writer may have initialized the document while we waited.
        match self.read_document() {
            Ok(state) => Ok(state),
            Err(failure) => {
                match failure {
                    ReadFailure::Missing => {
                        tracing::info!(path = %self.document_path.display(), "no game state found, creating default")
                    }
                    ReadFailure::Corrupt(reason) => {
                        tracing::warn!(path = %self.document_path.display(), %reason, "game state unreadable, replacing with default")
                    }
                }

                let mut state = GameState::initial();
                state.last_updated = self.next_stamp();
                self.persist(&state)?;
                Ok(state)
            }
        }
    }

    fn read_document(&self) -> std::result::Result<GameState, ReadFailure> {
        let data = match fs::read_to_string(&self.document_path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ReadFailure::Missing),
            Err(e) => return Err(ReadFailure::Corrupt(e.to_string())),
        };

        let state: GameState =
            serde_json::from_str(&data).map_err(|e| ReadFailure::Corrupt(e.to_string()))?;

        if let Some(id) = state.duplicate_id() {
            return Err(ReadFailure::Corrupt(format!("duplicate player ID {}", id)));
        }

        Ok(state)
    }

    // --- Writes ---

    /// Stamp `lastUpdated`, persist the whole document and publish the change.
    ///
    /// Returns the document as written. Nothing is published if persisting fails.
    pub fn save(&self, state: GameState) -> Result<GameState> {
        let saved = {
            let _lock = self.write_lock.lock();
            self.save_locked(state)?
        };

        self.bus.publish();
        Ok(saved)
    }

    /// Save only if the persisted document is still the one stamped `expected`.
    pub fn save_if_current(&self, state: GameState, expected: Timestamp) -> Result<GameState> {
        let saved = {
            let _lock = self.write_lock.lock();
            let current = self.load_locked()?;
            if current.last_updated != expected {
                return Err(StoreError::Conflict {
                    expected,
                    found: current.last_updated,
                });
            }
            self.save_locked(state)?
        };

        self.bus.publish();
        Ok(saved)
    }

    /// Run a read-modify-write cycle under the writer lock.
    ///
    /// If `f` fails nothing is written and nothing is published.
    pub fn update<F>(&self, f: F) -> Result<GameState>
    where
        F: FnOnce(&mut GameState) -> Result<()>,
    {
        let saved = {
            let _lock = self.write_lock.lock();
            let mut state = self.load_locked()?;
            f(&mut state)?;
            self.save_locked(state)?
        };

        self.bus.publish();
        Ok(saved)
    }

    /// Merge the present fields of `update` into player `id`.
    pub fn update_player(&self, id: u32, update: &PlayerUpdate) -> Result<GameState> {
        self.update(|state| {
            let player = state.player_mut(id).ok_or(StoreError::PlayerNotFound(id))?;
            player.apply(update);
            Ok(())
        })
    }

    /// Restore every player's points, health and active flag. Ids, names and order are kept.
    pub fn reset_all_players(&self) -> Result<GameState> {
        self.update(|state| {
            for player in state.players.iter_mut() {
                player.reset();
            }
            Ok(())
        })
    }

    pub fn update_game_title(&self, title: impl Into<String>) -> Result<GameState> {
        let title = title.into();
        self.update(move |state| {
            state.game_title = title;
            Ok(())
        })
    }

    fn save_locked(&self, mut state: GameState) -> Result<GameState> {
        if let Some(id) = state.duplicate_id() {
            return Err(StoreError::DuplicatePlayer(id));
        }

        state.last_updated = self.next_stamp();
        self.persist(&state)?;

        tracing::debug!(last_updated = %state.last_updated, "game state saved");
        Ok(state)
    }

    fn next_stamp(&self) -> Timestamp {
        let mut last = self.last_stamp.lock();
        let stamp = Timestamp::now_after(*last);
        *last = Some(stamp);
        stamp
    }

    // --- Private Helpers ---

    fn persist(&self, state: &GameState) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(state)?;
        let temp_path = self.document_path.with_extension(TEMP_SUFFIX);

        Self::write_replace(&temp_path, &self.document_path, &encoded).map_err(|source| {
            let _ = fs::remove_file(&temp_path);
            StoreError::Write {
                path: self.document_path.clone(),
                source,
            }
        })
    }

    /// Write `bytes` to `temp`, sync, then rename over `target`.
    fn write_replace(temp: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp)?;

        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(temp, target)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join(LOCK_FILE);
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}
