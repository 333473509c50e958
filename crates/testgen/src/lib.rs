pub mod runner;
pub mod synth;

pub use runner::TestRunner;
pub use synth::TestSynthesizer;
