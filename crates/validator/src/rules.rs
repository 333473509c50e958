use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// One denied capability class. A needle ending in `*` matches as a prefix
/// (`os.exec*` covers execv, execve, ...); any other needle must sit on an
/// identifier boundary so `socket` does not fire on `websocket`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyRule {
    pub id: String,
    pub needles: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub deny: Vec<DenyRule>,
}

impl RuleSet {
    pub fn builtin() -> Self {
        Self {
            deny: vec![
                DenyRule {
                    id: "deny/process".to_string(),
                    needles: vec![
                        "subprocess".to_string(),
                        "os.system".to_string(),
                        "os.popen".to_string(),
                        "os.exec*".to_string(),
                        "os.spawn*".to_string(),
                        "os.fork".to_string(),
                        "pty.".to_string(),
                    ],
                    message: "process spawning is not allowed".to_string(),
                },
                DenyRule {
                    id: "deny/filesystem".to_string(),
                    needles: vec![
                        "open(".to_string(),
                        "io.open(".to_string(),
                        "os.remove".to_string(),
                        "os.unlink".to_string(),
                        "os.rename".to_string(),
                        "os.rmdir".to_string(),
                        "os.mkdir*".to_string(),
                        "os.makedirs".to_string(),
                        "shutil.".to_string(),
                        "pathlib.".to_string(),
                    ],
                    message: "filesystem access is not allowed".to_string(),
                },
                DenyRule {
                    id: "deny/import".to_string(),
                    needles: vec!["__import__".to_string(), "importlib".to_string()],
                    message: "dynamic import is not allowed".to_string(),
                },
                DenyRule {
                    id: "deny/network".to_string(),
                    needles: vec![
                        "socket".to_string(),
                        "urllib".to_string(),
                        "http.client".to_string(),
                        "requests".to_string(),
                        "ftplib".to_string(),
                        "smtplib".to_string(),
                    ],
                    message: "network access is not allowed".to_string(),
                },
                DenyRule {
                    id: "deny/eval".to_string(),
                    needles: vec![
                        "eval(".to_string(),
                        "exec(".to_string(),
                        "compile(".to_string(),
                    ],
                    message: "evaluating strings as code is not allowed".to_string(),
                },
                DenyRule {
                    id: "deny/reflection".to_string(),
                    needles: vec![
                        "getattr(".to_string(),
                        "setattr(".to_string(),
                        "delattr(".to_string(),
                        "globals(".to_string(),
                        "vars(".to_string(),
                        "__builtins__".to_string(),
                        "__subclasses__".to_string(),
                        "__globals__".to_string(),
                    ],
                    message: "reflective access is not allowed".to_string(),
                },
            ],
        }
    }

    /// Load extra deny rules from a YAML file and append them to the
    /// builtin set. The builtin rules are never removed by configuration.
    pub async fn load_extra<P: AsRef<Path>>(path: P) -> Result<Self, RuleFileError> {
        let content = tokio::fs::read_to_string(&path).await?;
        let extra: RuleSet = serde_yaml::from_str(&content)?;
        let mut rules = Self::builtin();
        rules.deny.extend(extra.deny);
        Ok(rules)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::builtin()
    }
}
