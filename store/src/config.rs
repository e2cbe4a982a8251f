//! Configuration: the on-disk layout the store opens against, and the
//! user-facing settings it consumes from its collaborator.

use crate::events::{Event, EventBus, Subscription};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// Paths for a single store instance. Redirectable so tests never touch a
/// real Application Support directory.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub base_path: PathBuf,
}

impl StoreConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.base_path.join("clipboard.db")
    }

    pub fn content_path(&self) -> PathBuf {
        self.base_path.join("content")
    }

    pub fn thumbnails_path(&self) -> PathBuf {
        self.base_path.join("thumbnails")
    }

    pub fn fullindex_path(&self) -> PathBuf {
        self.base_path.join("clipboard.db.fullindex.v2.plist")
    }

    pub fn fullindex_checksum_path(&self) -> PathBuf {
        self.base_path.join("clipboard.db.fullindex.v2.sha256")
    }

    pub fn shortindex_path(&self) -> PathBuf {
        self.base_path.join("clipboard.db.shortindex.v2.plist")
    }

    pub fn shortindex_checksum_path(&self) -> PathBuf {
        self.base_path.join("clipboard.db.shortindex.v2.sha256")
    }
}

/// Default search mode, mirrored from the settings collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Exact,
    #[default]
    Fuzzy,
    FuzzyPlus,
    Regex,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchMode::Exact => "exact",
            SearchMode::Fuzzy => "fuzzy",
            SearchMode::FuzzyPlus => "fuzzy_plus",
            SearchMode::Regex => "regex",
        };
        write!(f, "{s}")
    }
}

/// Single source of truth for configuration the storage/search core
/// consumes. Persisted as `settings.toml` by the owning [`SettingsStore`].
///
/// `hotkey_*`, `show_image_thumbnails`, `thumbnail_height` and
/// `image_preview_delay` are carried opaquely: the core never reads them,
/// they exist purely so the UI collaborator has one persisted blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub max_items: u64,
    pub max_small_storage_mb: u64,
    pub max_large_storage_mb: u64,
    pub cleanup_images_only: bool,
    pub save_images: bool,
    pub save_files: bool,
    pub default_search_mode: SearchMode,
    pub hotkey_key_code: u32,
    pub hotkey_modifiers: u32,
    pub show_image_thumbnails: bool,
    pub thumbnail_height: u32,
    pub image_preview_delay: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_items: 2000,
            max_small_storage_mb: 64,
            max_large_storage_mb: 512,
            cleanup_images_only: false,
            save_images: true,
            save_files: true,
            default_search_mode: SearchMode::default(),
            hotkey_key_code: 0,
            hotkey_modifiers: 0,
            show_image_thumbnails: true,
            thumbnail_height: 48,
            image_preview_delay: 0.3,
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file. Returns [`Settings::default`] if the
    /// file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Saves settings to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Owns the canonical in-memory `Settings`, persists it to `path` on every
/// update, and broadcasts [`Event::SettingsChanged`] to subscribers — the
/// core never writes settings itself, it only reads the snapshot a
/// collaborator (typically the UI) hands it via [`SettingsStore::get`].
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
    events: EventBus,
}

impl SettingsStore {
    /// Loads `path` (or defaults, if absent) as the starting snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let current = Settings::load(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(current),
            events: EventBus::new(32),
        })
    }

    pub fn get(&self) -> Settings {
        self.current.read().unwrap().clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Applies `mutate` to a copy of the current settings, persists it, then
    /// swaps it in and broadcasts. The write only takes effect if both the
    /// mutation and the save succeed.
    pub fn update(&self, mutate: impl FnOnce(&mut Settings)) -> Result<Settings, SettingsError> {
        let mut next = self.get();
        mutate(&mut next);
        next.save(&self.path)?;
        *self.current.write().unwrap() = next.clone();
        self.events.publish(Event::SettingsChanged);
        Ok(next)
    }
}

#[cfg(test)]
mod settings_store_tests {
    use super::*;

    #[test]
    fn update_persists_and_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let store = SettingsStore::open(&path).unwrap();
        let sub = store.subscribe();

        let updated = store.update(|s| s.max_items = 10).unwrap();
        assert_eq!(updated.max_items, 10);
        assert_eq!(store.get().max_items, 10);
        assert_eq!(Settings::load(&path).unwrap().max_items, 10);
        assert!(matches!(
            sub.recv_timeout(std::time::Duration::from_millis(100)),
            Some(Event::SettingsChanged)
        ));
    }

    #[test]
    fn open_with_no_file_starts_from_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let store = SettingsStore::open(&path).unwrap();
        assert_eq!(store.get(), Settings::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, Settings::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut settings = Settings::default();
        settings.max_items = 50;
        settings.default_search_mode = SearchMode::Regex;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }
}
