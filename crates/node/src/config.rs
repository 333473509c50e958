use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use toolforge_core::ExecLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    /// Peer intake address. None disables the subscriber entirely.
    pub listen_addr: Option<String>,
    /// Addresses announcements are pushed to.
    pub peers: Vec<String>,
    pub limits: ExecLimits,
    pub max_cases: usize,
    pub pool_size: usize,
    pub resource_kill_budget: usize,
    pub lock_timeout_ms: u64,
    pub peer_silence_secs: u64,
    pub broadcast_timeout_ms: u64,
    /// Sandbox interpreter override; defaults to python3 on PATH.
    pub python_bin: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("toolforge_data"),
            listen_addr: None,
            peers: Vec::new(),
            limits: ExecLimits::default(),
            max_cases: 24,
            pool_size: 4,
            resource_kill_budget: 3,
            lock_timeout_ms: 60_000,
            peer_silence_secs: 900,
            broadcast_timeout_ms: 2_000,
            python_bin: None,
        }
    }
}

impl NodeConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(&path).await?;
        let mut config: NodeConfig = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("TOOLFORGE_LISTEN") {
            self.listen_addr = Some(addr);
        }
        if let Ok(dir) = std::env::var("TOOLFORGE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(bin) = std::env::var("TOOLFORGE_PYTHON") {
            self.python_bin = Some(bin);
        }
    }

    /// Hard configuration problems. An empty list means the node can start.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.max_cases == 0 {
            issues.push("max_cases must be at least 1".to_string());
        }
        if self.pool_size == 0 {
            issues.push("pool_size must be at least 1".to_string());
        }
        if self.limits.wallclock_millis == 0 {
            issues.push("limits.wallclock_millis must be positive".to_string());
        }
        if self.limits.memory_bytes < 16 * 1024 * 1024 {
            issues.push("limits.memory_bytes is too small for the interpreter".to_string());
        }
        if self.peers.iter().any(|p| p.trim().is_empty()) {
            issues.push("peers must not contain empty addresses".to_string());
        }

        issues
    }
}
