pub mod rules;
pub mod scanner;

pub use rules::{DenyRule, RuleFileError, RuleSet};
pub use scanner::{entry_point_defined, validate};
