use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    DuplicateName(String),

    #[error("Registration conflict: {0}")]
    Conflict(String),

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Lock timeout for tool: {0}")]
    LockTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
