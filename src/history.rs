use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::models::Generation;

/// Only the five most recent generations are kept.
pub const HISTORY_CAPACITY: usize = 5;

pub const DEFAULT_HISTORY_FILE: &str = "studio-history.json";

/// Ordered newest-first list of past generations, mirrored to a single
/// JSON file. Storage trouble is logged and degrades to in-memory-only;
/// it never propagates to callers.
pub struct HistoryStore {
    path: PathBuf,
    entries: RwLock<Vec<Generation>>,
}

impl HistoryStore {
    /// Read persisted history once at startup. Missing or corrupt storage
    /// yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<Generation>>(&bytes) {
                Ok(mut entries) => {
                    entries.truncate(HISTORY_CAPACITY);
                    info!("📦 Loaded {} saved generations from {}", entries.len(), path.display());
                    entries
                }
                Err(e) => {
                    warn!("⚠️ Ignoring corrupt history at {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("⚠️ Could not read history at {}: {}", path.display(), e);
                Vec::new()
            }
        };
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    /// Prepend a generation, evicting the oldest entry beyond capacity,
    /// and rewrite the whole file.
    pub fn record(&self, generation: Generation) {
        let snapshot = {
            let mut entries = self.entries.write();
            entries.insert(0, generation);
            entries.truncate(HISTORY_CAPACITY);
            entries.clone()
        };
        if let Err(e) = self.persist(&snapshot) {
            warn!("⚠️ Could not persist history to {}: {}", self.path.display(), e);
        }
    }

    pub fn current(&self) -> Vec<Generation> {
        self.entries.read().clone()
    }

    /// Pure read: returns the stored entry unchanged, leaving history as is.
    pub fn restore(&self, id: &str) -> Option<Generation> {
        self.entries.read().iter().find(|g| g.id == id).cloned()
    }

    fn persist(&self, entries: &[Generation]) -> std::io::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let json = serde_json::to_vec_pretty(entries)?;
        // Write-then-rename keeps the file whole even if we die mid-write.
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
