// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Persistent JSON document stores
//
// Each store owns one pretty-printed JSON file, loaded once at startup
// and rewritten in full on every mutation. Mutation and disk write
// happen under the store's write lock, so in-process readers observe
// either the old or the new document, never a torn one.

mod favorites;
mod history;
mod settings;

pub use favorites::FavoritesStore;
pub use history::HistoryStore;
pub use settings::SettingsStore;

use crate::error::{EngineError, EngineResult};
use std::path::PathBuf;

/// Default config directory for store files
pub(crate) fn default_config_dir() -> EngineResult<PathBuf> {
    let config_dir = directories::ProjectDirs::from("io", "lanwire", "lanwire")
        .ok_or_else(|| EngineError::FileIo("Could not determine config directory".to_string()))?
        .config_dir()
        .to_path_buf();

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| EngineError::FileIo(format!("Failed to create config dir: {}", e)))?;

    Ok(config_dir)
}
