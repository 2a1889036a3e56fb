// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Favorites persistence
//
// Favorites are created, edited, and deleted by user action only; the
// orchestrator never mutates them.

use crate::error::{EngineError, EngineResult};
use crate::types::Favorite;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

/// File-backed favorites store
pub struct FavoritesStore {
    favorites: RwLock<Vec<Favorite>>,
    file_path: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct FavoritesFile {
    favorites: Vec<Favorite>,
}

impl FavoritesStore {
    /// Create a favorites store at the default config location
    pub fn new() -> EngineResult<Self> {
        let file_path = super::default_config_dir()?.join("favorites.json");
        Self::with_path(file_path)
    }

    /// Create a favorites store backed by an explicit file path
    pub fn with_path(file_path: PathBuf) -> EngineResult<Self> {
        let favorites = if file_path.exists() {
            let content = fs::read_to_string(&file_path)
                .map_err(|e| EngineError::FileIo(format!("Failed to read favorites: {}", e)))?;

            let file: FavoritesFile = serde_json::from_str(&content).map_err(|e| {
                EngineError::Serialization(format!("Failed to parse favorites: {}", e))
            })?;

            file.favorites
        } else {
            Vec::new()
        };

        Ok(Self {
            favorites: RwLock::new(favorites),
            file_path,
        })
    }

    /// Serialize and write the full document. Called with the write
    /// lock held, so concurrent mutators cannot interleave their
    /// writes.
    fn persist_locked(&self, favorites: &[Favorite]) -> EngineResult<()> {
        let file = FavoritesFile {
            favorites: favorites.to_vec(),
        };

        let content = serde_json::to_string_pretty(&file).map_err(|e| {
            EngineError::Persistence(format!("Failed to serialize favorites: {}", e))
        })?;

        fs::write(&self.file_path, content)
            .map_err(|e| EngineError::Persistence(format!("Failed to write favorites: {}", e)))
    }

    /// List all favorites
    pub fn list(&self) -> Vec<Favorite> {
        self.favorites.read().unwrap().clone()
    }

    /// Get a favorite by id
    pub fn get(&self, id: &str) -> Option<Favorite> {
        self.favorites
            .read()
            .unwrap()
            .iter()
            .find(|f| f.id == id)
            .cloned()
    }

    /// Add a new favorite
    pub fn add(&self, name: String, address: String) -> EngineResult<Favorite> {
        let favorite = Favorite::new(name, address);
        let mut favorites = self.favorites.write().unwrap();
        favorites.push(favorite.clone());
        self.persist_locked(&favorites)?;
        Ok(favorite)
    }

    /// Update a favorite's label and/or address, touching last_used
    pub fn update(
        &self,
        id: &str,
        name: Option<String>,
        address: Option<String>,
    ) -> EngineResult<Favorite> {
        let mut favorites = self.favorites.write().unwrap();
        let favorite = favorites
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("Favorite not found: {}", id)))?;

        if let Some(name) = name {
            favorite.name = name;
        }
        if let Some(address) = address {
            favorite.address = address;
            favorite.last_resolved_ip = None;
        }
        favorite.last_used = Some(Utc::now());
        let updated = favorite.clone();

        self.persist_locked(&favorites)?;
        Ok(updated)
    }

    /// Delete a favorite
    pub fn delete(&self, id: &str) -> EngineResult<()> {
        let mut favorites = self.favorites.write().unwrap();
        let original_len = favorites.len();
        favorites.retain(|f| f.id != id);

        if favorites.len() == original_len {
            return Err(EngineError::NotFound(format!("Favorite not found: {}", id)));
        }
        self.persist_locked(&favorites)
    }

    /// Cache the last resolved IP for every favorite matching `address`
    pub fn update_resolved_ip(&self, address: &str, ip: &str) -> EngineResult<()> {
        let mut favorites = self.favorites.write().unwrap();
        for favorite in favorites.iter_mut() {
            if favorite.address == address {
                favorite.last_resolved_ip = Some(ip.to_string());
            }
        }
        self.persist_locked(&favorites)
    }
}
