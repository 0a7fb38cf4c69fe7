//! Persistence of the candidate list across reboots.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::api::DevicePortConfigList;

const LIST_FILE_NAME: &str = "dpc-list.json";

/// JSON file store for the candidate list plus its current index. Writes go
/// through a temporary file and an atomic rename so a crash never leaves a
/// truncated list behind.
#[derive(Debug, Clone)]
pub struct DpcListStore {
    path: PathBuf,
}

impl DpcListStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(LIST_FILE_NAME),
        }
    }

    /// Load the persisted list; `None` when nothing was persisted yet.
    pub fn load(&self) -> anyhow::Result<Option<DevicePortConfigList>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let list = serde_json::from_str(&raw)
            .with_context(|| format!("failed to decode {}", self.path.display()))?;
        Ok(Some(list))
    }

    pub fn save(&self, list: &DevicePortConfigList) -> anyhow::Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("invalid persist path: missing parent dir"))?;
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let rendered = serde_json::to_vec_pretty(list)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&rendered)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .with_context(|| format!("failed to persist {}", self.path.display()))?;
        Ok(())
    }
}
