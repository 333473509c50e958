use crate::types::{TestVerdict, ValidationFinding};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Static validation blocked candidate ({} finding(s))", .0.len())]
    ValidationBlocked(Vec<ValidationFinding>),

    #[error("Synthesized tests failed ({} failure(s))", .0.failures.len())]
    TestFailure(TestVerdict),

    #[error("Candidate faulted in sandbox: {kind}: {message}")]
    SandboxFault { kind: String, message: String },

    #[error("Resource limit exceeded")]
    ResourceExceeded,

    #[error("Registration conflict: {0}")]
    Conflict(String),

    #[error("Tool already registered: {0}")]
    DuplicateName(String),

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool is not active: {0}")]
    NotActive(String),

    #[error("Pipeline run cancelled: {0}")]
    Cancelled(String),

    #[error("Sandbox isolation unavailable: {0}")]
    Isolation(String),

    #[error("Registry error: {0}")]
    Registry(String),
}
