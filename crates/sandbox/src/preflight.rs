use crate::error::SandboxError;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::System;
use tokio::process::Command;
use tokio::time::timeout;

const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(5);

/// Verify the sandbox interpreter exists and answers. Returns its version
/// line; failure means no isolation boundary can be established.
pub async fn check_interpreter(python_bin: &str) -> Result<String, SandboxError> {
    let mut cmd = Command::new(python_bin);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| SandboxError::Isolation(format!("cannot spawn {}: {}", python_bin, e)))?;

    let output = timeout(PREFLIGHT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| SandboxError::Isolation(format!("{} did not respond", python_bin)))?
        .map_err(|e| SandboxError::Isolation(e.to_string()))?;

    if !output.status.success() {
        return Err(SandboxError::Isolation(format!(
            "{} exited with {}",
            python_bin, output.status
        )));
    }

    let mut version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if version.is_empty() {
        version = String::from_utf8_lossy(&output.stderr).trim().to_string();
    }
    Ok(version)
}

#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub timestamp: i64,
    pub memory_total_mb: u64,
    pub memory_available_mb: u64,
}

impl HostSnapshot {
    pub fn capture() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        Self {
            timestamp: chrono::Utc::now().timestamp(),
            memory_total_mb: sys.total_memory() / 1024 / 1024,
            memory_available_mb: sys.available_memory() / 1024 / 1024,
        }
    }

    pub fn to_concise_string(&self) -> String {
        format!(
            "Memory: {}/{} MB available",
            self.memory_available_mb, self.memory_total_mb
        )
    }
}
