use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::atomic::write_atomic;
use crate::error::{FleetError, Result};
use crate::models::{now, FleetState, ProxyRecord};

/// Repository for the line-oriented inventory file
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    path: PathBuf,
}

impl InventoryRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record in the file; all loaded records are active
    pub async fn load(&self) -> Result<FleetState> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| FleetError::InventoryUnreadable {
                path: self.path.clone(),
                source,
            })?;

        let state = self.parse(&raw)?;
        info!(
            path = %self.path.display(),
            proxies = state.len(),
            "Loaded inventory"
        );
        Ok(state)
    }

    fn parse(&self, raw: &str) -> Result<FleetState> {
        let loaded_at = now();
        let mut records = BTreeMap::new();

        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let malformed = |reason: String| FleetError::MalformedInventory {
                path: self.path.clone(),
                line: idx + 1,
                reason,
            };

            let record = ProxyRecord::parse_line(line, loaded_at).map_err(malformed)?;
            match records.entry(record.address) {
                Entry::Occupied(_) => {
                    return Err(malformed(format!("duplicate address {}", record.address)))
                }
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
            }
        }

        let mut state = FleetState::new();
        for record in records.into_values() {
            state.insert(record);
        }
        Ok(state)
    }

    /// Overwrite the file with the active records, or all records if `include_inactive`
    pub async fn persist(&self, state: &FleetState, include_inactive: bool) -> Result<()> {
        let lines: Vec<String> = state
            .records()
            .filter(|r| include_inactive || r.active)
            .map(ProxyRecord::to_line)
            .collect();

        let mut contents = lines.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, contents.as_bytes()))
            .await
            .map_err(|e| FleetError::Io(std::io::Error::other(e)))??;

        debug!(
            path = %self.path.display(),
            lines = lines.len(),
            "Persisted inventory"
        );
        Ok(())
    }
}
