pub mod error;
pub mod types;

pub use error::PipelineError;
pub use types::{
    Candidate, CaseFailure, ExecLimits, Origin, Outcome, Param, PeerRecord, Property, Severity,
    TestCase, TestVerdict, ToolRecord, ToolSignature, ToolStatus, ValidationFinding,
    ValidationReport, ValueShape,
};
