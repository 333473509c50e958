use crate::error::RegistryError;
use std::path::{Path, PathBuf};
use toolforge_core::ToolRecord;
use tracing::warn;

/// JSON-lines snapshot of the registry, rewritten atomically on every
/// mutation (write to a temp file, then rename over the live one).
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, RegistryError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            path: data_dir.join("tools.jsonl"),
        })
    }

    pub async fn load(&self) -> Result<Vec<ToolRecord>, RegistryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ToolRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping corrupt registry line: {}", e),
            }
        }
        Ok(records)
    }

    pub async fn save(&self, records: &[ToolRecord]) -> Result<(), RegistryError> {
        let mut content = String::new();
        for record in records {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
