//! Persisted audit settings
//!
//! Stored as pretty JSON in the app data directory. Missing keys fall back
//! to their defaults so older files keep loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::TagLayout;

/// What Keep does when the track has no Engine DJ record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRecordPolicy {
    /// Insert a new row for the track
    CreateIfMissing,
    /// Leave the store alone
    #[default]
    SkipIfMissing,
}

/// Application-wide settings
///
/// Persisted to `<data dir>/DJ Library Audit/settings.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// TXXX description of the resume marker frame
    pub marker_tag: String,
    /// Value written to the marker frame on Keep
    pub marker_value: String,
    /// TXXX description of the rating frame
    pub rating_tag: String,
    /// Owner email of the POPM rating frame
    pub popm_email: String,
    /// Genres reviewed when `--configured-genres` is given
    pub genres: Vec<String>,
    pub worker_threads: usize,
    /// Queued waveform jobs; 0 means twice the worker count
    pub prefetch_depth: usize,
    pub cache_capacity: usize,
    pub waveform_columns: usize,
    /// Stars used when Keep is chosen without a rating
    pub default_rating: u8,
    pub engine_db_path: Option<PathBuf>,
    /// Root folder Engine DJ paths are relative to
    pub dj_pool_folder: Option<PathBuf>,
    pub missing_record_policy: MissingRecordPolicy,
    pub api_url: Option<String>,
    pub api_enabled: bool,
    pub notify_timeout_secs: u64,
    /// Private trash directory; the operating system's trash when unset
    pub trash_dir: Option<PathBuf>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            marker_tag: "AUDIT_DECIDED".to_string(),
            marker_value: "true".to_string(),
            rating_tag: "RATING".to_string(),
            popm_email: "changeme@pulzwave.com".to_string(),
            genres: [
                "House",
                "Afro House",
                "Deep House",
                "Melodic House",
                "Minimal House",
                "Tech House",
                "Progressive House",
                "Funky House",
                "Big Room",
            ]
            .iter()
            .map(|g| g.to_string())
            .collect(),
            worker_threads: 4,
            prefetch_depth: 0,
            cache_capacity: 32,
            waveform_columns: 1160,
            default_rating: 3,
            engine_db_path: None,
            dj_pool_folder: None,
            missing_record_policy: MissingRecordPolicy::default(),
            api_url: None,
            api_enabled: false,
            notify_timeout_secs: 5,
            trash_dir: None,
        }
    }
}

impl AuditSettings {
    const SETTINGS_FILE: &'static str = "settings.json";
    const APP_DIR_NAME: &'static str = "DJ Library Audit";

    /// Get the app data directory (`<data dir>/DJ Library Audit/`)
    pub fn app_data_dir() -> Result<PathBuf, String> {
        let data_dir =
            dirs::data_dir().ok_or_else(|| "Could not determine data directory".to_string())?;

        let app_dir = data_dir.join(Self::APP_DIR_NAME);

        if !app_dir.exists() {
            std::fs::create_dir_all(&app_dir)
                .map_err(|e| format!("Failed to create app data directory: {}", e))?;
        }

        Ok(app_dir)
    }

    pub fn settings_path() -> Result<PathBuf, String> {
        Ok(Self::app_data_dir()?.join(Self::SETTINGS_FILE))
    }

    /// Load settings from disk, or return defaults if not found
    ///
    /// On first run the defaults are written out so there is a file to edit.
    pub fn load() -> Self {
        let path = match Self::settings_path() {
            Ok(path) => path,
            Err(e) => {
                log::warn!("Using default audit settings: {}", e);
                return Self::default();
            }
        };

        if !path.exists() {
            let settings = Self::default();
            match settings.save_to(&path) {
                Ok(()) => log::info!("Wrote default settings to {}", path.display()),
                Err(e) => log::warn!("Could not write default settings: {}", e),
            }
            return settings;
        }

        match Self::load_from(&path) {
            Ok(settings) => {
                log::debug!("Loaded audit settings from disk");
                settings
            }
            Err(e) => {
                log::warn!("Using default audit settings: {}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Err("Settings file not found".to_string());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings: {}", e))?;

        serde_json::from_str(&contents).map_err(|e| format!("Failed to parse settings: {}", e))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        std::fs::write(path, json).map_err(|e| format!("Failed to write settings: {}", e))?;

        log::debug!("Saved audit settings to {:?}", path);
        Ok(())
    }

    pub fn tag_layout(&self) -> TagLayout {
        TagLayout {
            rating_tag: self.rating_tag.clone(),
            marker_tag: self.marker_tag.clone(),
            popm_email: self.popm_email.clone(),
        }
    }

    /// Explicit prefetch depth, None to derive it from the worker count
    pub fn configured_prefetch_depth(&self) -> Option<usize> {
        (self.prefetch_depth > 0).then_some(self.prefetch_depth)
    }

    /// The configured notification endpoint, if notifications are on
    pub fn active_api_url(&self) -> Option<&str> {
        if !self.api_enabled {
            return None;
        }
        self.api_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    /// Check values that would otherwise fail deep inside a session
    pub fn validate(&self) -> Result<(), String> {
        if crate::core::Rating::new(self.default_rating).is_none() {
            return Err(format!(
                "default_rating must be between 1 and 5, got {}",
                self.default_rating
            ));
        }
        if self.worker_threads == 0 {
            return Err("worker_threads must be at least 1".to_string());
        }
        if self.marker_tag.trim().is_empty() || self.rating_tag.trim().is_empty() {
            return Err("marker_tag and rating_tag must not be empty".to_string());
        }
        if self.marker_tag == self.rating_tag {
            return Err("marker_tag and rating_tag must differ".to_string());
        }
        if self.popm_email.trim().is_empty() {
            return Err("popm_email must not be empty".to_string());
        }
        if self.engine_db_path.is_some() != self.dj_pool_folder.is_some() {
            return Err("engine_db_path and dj_pool_folder must be set together".to_string());
        }
        Ok(())
    }
}
