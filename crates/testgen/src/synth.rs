use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use toolforge_core::{Property, TestCase, ToolSignature, ValueShape};

const TEXT_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 _-";
const LONG_TEXT_LEN: usize = 1024;
const STRUCT_BOUNDARY_ROWS: usize = 4;

/// Derives test cases from a declared signature: boundary rows first, then
/// seeded random sampling. Every case records its seed so a failure can be
/// replayed exactly.
pub struct TestSynthesizer {
    max_cases: usize,
}

impl TestSynthesizer {
    pub fn new(max_cases: usize) -> Self {
        Self {
            max_cases: max_cases.max(2),
        }
    }

    pub fn synthesize(&self, signature: &ToolSignature, base_seed: u64) -> Vec<TestCase> {
        let mut cases = Vec::new();
        let reserve = usize::from(signature.deterministic);
        let fill = self.max_cases.saturating_sub(reserve).max(1);

        // Boundary rows: step every parameter through its boundary set in
        // lockstep. Harsh inputs must not crash the candidate. Boundaries
        // take at most half the budget so shape-checking cases always run.
        let boundary_sets: Vec<Vec<Value>> = signature
            .params
            .iter()
            .map(|p| boundary_values(&p.shape))
            .collect();
        let rows = boundary_sets
            .iter()
            .map(|s| s.len())
            .max()
            .unwrap_or(0)
            .min(fill / 2);
        for row in 0..rows {
            if cases.len() >= fill {
                break;
            }
            let inputs = boundary_sets
                .iter()
                .map(|set| set[row % set.len()].clone())
                .collect();
            cases.push(TestCase {
                inputs,
                property: Property::NoFault,
                seed: base_seed,
            });
        }

        // Random rows: well-typed input must yield the declared shape.
        let mut rng = StdRng::seed_from_u64(base_seed);
        if signature.params.is_empty() {
            if cases.len() < fill {
                cases.push(TestCase {
                    inputs: Vec::new(),
                    property: Property::ReturnsShape(signature.returns.clone()),
                    seed: base_seed,
                });
            }
        } else {
            while cases.len() < fill {
                let case_seed = rng.gen::<u64>();
                let mut case_rng = StdRng::seed_from_u64(case_seed);
                let inputs = signature
                    .params
                    .iter()
                    .map(|p| random_value(&p.shape, &mut case_rng))
                    .collect();
                cases.push(TestCase {
                    inputs,
                    property: Property::ReturnsShape(signature.returns.clone()),
                    seed: case_seed,
                });
            }
        }

        if signature.deterministic {
            let seed = base_seed.wrapping_add(1);
            let mut rng = StdRng::seed_from_u64(seed);
            let inputs = signature
                .params
                .iter()
                .map(|p| random_value(&p.shape, &mut rng))
                .collect();
            cases.push(TestCase {
                inputs,
                property: Property::Deterministic,
                seed,
            });
        }

        cases
    }
}

fn boundary_values(shape: &ValueShape) -> Vec<Value> {
    match shape {
        ValueShape::Number => vec![
            json!(0),
            json!(1),
            json!(-1),
            json!(1_000_000_000),
            json!(-1_000_000_000),
            json!(0.5),
        ],
        ValueShape::Text => vec![
            json!(""),
            json!("a"),
            json!("x".repeat(LONG_TEXT_LEN)),
            json!("0"),
            json!("  padded  "),
        ],
        ValueShape::Boolean => vec![json!(false), json!(true)],
        ValueShape::Structured(fields) => {
            let sets: Vec<(String, Vec<Value>)> = fields
                .iter()
                .map(|f| (f.name.clone(), boundary_values(&f.shape)))
                .collect();
            let rows = sets
                .iter()
                .map(|(_, s)| s.len())
                .max()
                .unwrap_or(1)
                .min(STRUCT_BOUNDARY_ROWS);
            (0..rows)
                .map(|row| {
                    let mut obj = serde_json::Map::new();
                    for (name, set) in &sets {
                        obj.insert(name.clone(), set[row % set.len()].clone());
                    }
                    Value::Object(obj)
                })
                .collect()
        }
    }
}

fn random_value(shape: &ValueShape, rng: &mut StdRng) -> Value {
    match shape {
        ValueShape::Number => {
            if rng.gen_bool(0.5) {
                json!(rng.gen_range(-1_000_000_i64..=1_000_000))
            } else {
                json!(rng.gen_range(-1.0e6_f64..1.0e6))
            }
        }
        ValueShape::Text => {
            let len = rng.gen_range(0..=32);
            let text: String = (0..len)
                .map(|_| TEXT_CHARSET[rng.gen_range(0..TEXT_CHARSET.len())] as char)
                .collect();
            json!(text)
        }
        ValueShape::Boolean => json!(rng.gen::<bool>()),
        ValueShape::Structured(fields) => {
            let mut obj = serde_json::Map::new();
            for field in fields {
                obj.insert(field.name.clone(), random_value(&field.shape, rng));
            }
            Value::Object(obj)
        }
    }
}
