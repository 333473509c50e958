use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Pipeline decisions are appended here as JSON lines. Logging must never
/// fail the operation being logged.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: Value);
}

pub struct FileAudit {
    file: Mutex<File>,
}

impl FileAudit {
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl AuditSink for FileAudit {
    async fn record(&self, entry: Value) {
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{}", entry) {
            warn!("Audit write failed: {}", e);
        }
    }
}

/// No-op sink for tests.
pub struct NullAudit;

#[async_trait]
impl AuditSink for NullAudit {
    async fn record(&self, _entry: Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_audit_appends_lines() {
        let dir = std::env::temp_dir().join(format!("toolforge_audit_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("audit.jsonl");

        let audit = FileAudit::new(&path).unwrap();
        audit.record(json!({"decision": "promote", "tool": "square"})).await;
        audit.record(json!({"decision": "reject", "tool": "div"})).await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("promote"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
