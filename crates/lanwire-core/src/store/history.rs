// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Transfer history persistence
//
// Terminal transfer records, appended in completion order and capped.

use crate::error::{EngineError, EngineResult};
use crate::types::TransferRecord;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

/// Maximum number of history entries to keep
const MAX_HISTORY_ENTRIES: usize = 100;

/// File-backed transfer history
pub struct HistoryStore {
    records: RwLock<Vec<TransferRecord>>,
    file_path: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct HistoryFile {
    records: Vec<TransferRecord>,
}

impl HistoryStore {
    /// Create a history store at the default config location
    pub fn new() -> EngineResult<Self> {
        let file_path = super::default_config_dir()?.join("history.json");
        Self::with_path(file_path)
    }

    /// Create a history store backed by an explicit file path
    pub fn with_path(file_path: PathBuf) -> EngineResult<Self> {
        let records = if file_path.exists() {
            let content = fs::read_to_string(&file_path)
                .map_err(|e| EngineError::FileIo(format!("Failed to read history: {}", e)))?;

            let file: HistoryFile = serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse history, starting fresh: {}", e);
                HistoryFile {
                    records: Vec::new(),
                }
            });

            file.records
        } else {
            Vec::new()
        };

        Ok(Self {
            records: RwLock::new(records),
            file_path,
        })
    }

    /// Serialize and write the full document. Called with the write
    /// lock held, so concurrent finalizing transfers cannot interleave
    /// their writes.
    fn persist_locked(&self, records: &[TransferRecord]) -> EngineResult<()> {
        let file = HistoryFile {
            records: records.to_vec(),
        };

        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| EngineError::Persistence(format!("Failed to serialize history: {}", e)))?;

        fs::write(&self.file_path, content)
            .map_err(|e| EngineError::Persistence(format!("Failed to write history: {}", e)))
    }

    /// All records, oldest first
    pub fn list(&self) -> Vec<TransferRecord> {
        self.records.read().unwrap().clone()
    }

    /// Append a terminal record, evicting the oldest beyond the cap
    pub fn add(&self, record: TransferRecord) -> EngineResult<()> {
        let mut records = self.records.write().unwrap();
        records.push(record);

        if records.len() > MAX_HISTORY_ENTRIES {
            let excess = records.len() - MAX_HISTORY_ENTRIES;
            records.drain(0..excess);
        }
        self.persist_locked(&records)
    }

    /// Clear all history
    pub fn clear(&self) -> EngineResult<()> {
        let mut records = self.records.write().unwrap();
        records.clear();
        self.persist_locked(&records)
    }

    /// Number of retained entries
    pub fn count(&self) -> usize {
        self.records.read().unwrap().len()
    }
}
