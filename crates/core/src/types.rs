use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolStatus {
    Pending,
    Validated,
    Rejected,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Origin {
    Local,
    Peer(String),
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }
}

/// A candidate as handed over by the Planner: opaque, untrusted source text
/// plus the declared signature the test synthesizer works from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub description: String,
    pub source: String,
    pub signature: ToolSignature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub name: String,
    pub description: String,
    pub source: String,
    pub status: ToolStatus,
    pub origin: Origin,
    pub created_at: i64,
    pub validation_report: Option<ValidationReport>,
}

impl ToolRecord {
    pub fn pending(candidate: &Candidate, origin: Origin) -> Self {
        Self {
            name: candidate.name.clone(),
            description: candidate.description.clone(),
            source: candidate.source.clone(),
            status: ToolStatus::Pending,
            origin,
            created_at: chrono::Utc::now().timestamp(),
            validation_report: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ToolStatus::Active
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Block,
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationFinding {
    pub rule_id: String,
    pub severity: Severity,
    pub line: Option<usize>,
    pub message: String,
}

impl ValidationFinding {
    pub fn block(rule_id: &str, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity: Severity::Block,
            line,
            message: message.into(),
        }
    }

    pub fn warn(rule_id: &str, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity: Severity::Warn,
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<ValidationFinding>,
    pub verdict: Option<TestVerdict>,
}

impl ValidationReport {
    pub fn from_findings(findings: Vec<ValidationFinding>) -> Self {
        Self {
            findings,
            verdict: None,
        }
    }

    pub fn has_blocker(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == Severity::Block)
    }
}

/// Declared shape of a parameter or return value. The test synthesizer
/// switches on this tag to pick a generator; no runtime introspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValueShape {
    Number,
    Text,
    Boolean,
    Structured(Vec<Param>),
}

impl ValueShape {
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            ValueShape::Number => value.is_number(),
            ValueShape::Text => value.is_string(),
            ValueShape::Boolean => value.is_boolean(),
            ValueShape::Structured(fields) => match value.as_object() {
                Some(map) => fields.iter().all(|field| {
                    map.get(&field.name)
                        .map(|v| field.shape.matches(v))
                        .unwrap_or(false)
                }),
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub shape: ValueShape,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSignature {
    pub params: Vec<Param>,
    pub returns: ValueShape,
    /// Tools are assumed pure unless the Planner marks them stochastic.
    #[serde(default = "default_true")]
    pub deterministic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Property {
    ReturnsShape(ValueShape),
    NoFault,
    Deterministic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub inputs: Vec<serde_json::Value>,
    pub property: Property,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseFailure {
    pub case: TestCase,
    pub observed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestVerdict {
    pub passed: bool,
    pub failures: Vec<CaseFailure>,
}

impl TestVerdict {
    pub fn passed() -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
        }
    }

    pub fn failed(failures: Vec<CaseFailure>) -> Self {
        Self {
            passed: false,
            failures,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: String,
    pub address: String,
    pub last_seen_at: i64,
}

/// Result of one sandboxed invocation. Candidate faults are data, never
/// control-flow errors on the host side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Outcome {
    Returned(serde_json::Value),
    Faulted { kind: String, message: String },
    TimedOut,
    LimitExceeded,
}

impl Outcome {
    pub fn is_resource_kill(&self) -> bool {
        matches!(self, Outcome::TimedOut | Outcome::LimitExceeded)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecLimits {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    pub wallclock_millis: u64,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            cpu_millis: 2_000,
            memory_bytes: 256 * 1024 * 1024,
            wallclock_millis: 5_000,
        }
    }
}
