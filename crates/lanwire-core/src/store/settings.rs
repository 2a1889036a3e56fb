// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Settings persistence
//
// Settings live in settings.json. No cloud sync, no tracking, just
// simple local persistence.

use crate::error::{EngineError, EngineResult};
use crate::types::AppSettings;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

/// In-memory cache of settings, rewritten to disk on every change
pub struct SettingsStore {
    settings: RwLock<AppSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    /// Create a settings store at the default config location
    pub fn new() -> EngineResult<Self> {
        let file_path = super::default_config_dir()?.join("settings.json");
        Self::with_path(file_path)
    }

    /// Create a settings store backed by an explicit file path
    pub fn with_path(file_path: PathBuf) -> EngineResult<Self> {
        let settings = if file_path.exists() {
            let content = fs::read_to_string(&file_path)
                .map_err(|e| EngineError::FileIo(format!("Failed to read settings: {}", e)))?;

            serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse settings, using defaults: {}", e);
                AppSettings::default()
            })
        } else {
            tracing::info!("No settings file at {:?}, using defaults", file_path);
            AppSettings::default()
        };

        let store = Self {
            settings: RwLock::new(settings),
            file_path,
        };

        if !store.file_path.exists() {
            let settings = store.settings.read().unwrap();
            store.persist_locked(&settings)?;
        }

        Ok(store)
    }

    /// Serialize and write the full document. Called with the lock
    /// held, so concurrent mutators cannot interleave their writes.
    fn persist_locked(&self, settings: &AppSettings) -> EngineResult<()> {
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| EngineError::Persistence(format!("Failed to serialize settings: {}", e)))?;

        fs::write(&self.file_path, content)
            .map_err(|e| EngineError::Persistence(format!("Failed to write settings: {}", e)))
    }

    /// Get a copy of the current settings
    pub fn get(&self) -> AppSettings {
        self.settings.read().unwrap().clone()
    }

    /// Replace settings and persist
    pub fn update(&self, new_settings: AppSettings) -> EngineResult<()> {
        let mut settings = self.settings.write().unwrap();
        *settings = new_settings;
        self.persist_locked(&settings)
    }

    /// Add a trusted host (no-op if already present)
    pub fn add_trusted_host(&self, host: String) -> EngineResult<()> {
        let mut settings = self.settings.write().unwrap();
        if !settings.trusted_hosts.contains(&host) {
            settings.trusted_hosts.push(host);
        }
        self.persist_locked(&settings)
    }

    /// Remove a trusted host
    pub fn remove_trusted_host(&self, host: &str) -> EngineResult<()> {
        let mut settings = self.settings.write().unwrap();
        settings.trusted_hosts.retain(|h| h != host);
        self.persist_locked(&settings)
    }
}
