//! Case generation from operation schemas
//!
//! Positive cases conform to the declared parameter and body schemas.
//! Negative cases carry exactly one type-confused parameter or body property.
//! Values from the previous step's response are reused for matching path
//! parameters, which is what chains steps into a stateful scenario.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use stateprobe_core::case::value_to_string;
use stateprobe_core::{Case, GenerationMode, OperationRef};

use crate::datagen::ValueGenerator;
use crate::schema::{Operation, ParamLocation, Parameter};
use crate::targets::TargetFeedback;

/// Probability of starting from the best-scoring case of an operation.
const TARGET_REUSE_PROBABILITY: f64 = 0.2;

/// Probability of sending an optional parameter or body.
const OPTIONAL_PROBABILITY: f64 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Cannot generate data for {operation}: {reason}")]
    Unsatisfiable { operation: String, reason: String },
}

/// Seeded source of [`Case`] values.
pub struct CaseGenerator {
    rng: SmallRng,
    document: Arc<Value>,
    base_url: String,
    negative_ratio: f64,
    operations: HashMap<String, Arc<OperationRef>>,
    /// Best target score per (operation label, metric) with the case that reached it
    best: HashMap<(String, String), (f64, Case)>,
}

impl CaseGenerator {
    #[must_use]
    pub fn new(document: Arc<Value>, base_url: impl Into<String>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            rng,
            document,
            base_url: base_url.into(),
            negative_ratio: 0.0,
            operations: HashMap::new(),
            best: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_negative_ratio(mut self, ratio: f64) -> Self {
        self.negative_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Random index below `len`, used by the engine to pick the next operation.
    pub fn choose_index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len.max(1))
    }

    /// Build a case for `operation`.
    ///
    /// `previous` is the JSON body of the preceding step in the same scenario.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Unsatisfiable`] when a required parameter
    /// declares an empty `enum`.
    pub fn generate(
        &mut self,
        operation: &Operation,
        previous: Option<&Value>,
    ) -> Result<Case, GenerationError> {
        let label = operation.label();
        for param in &operation.parameters {
            let empty_enum = param
                .schema
                .get("enum")
                .and_then(Value::as_array)
                .is_some_and(Vec::is_empty);
            if param.required && empty_enum {
                return Err(GenerationError::Unsatisfiable {
                    operation: label,
                    reason: format!("parameter `{}` has an empty enum", param.name),
                });
            }
        }

        let id = format!("{:016x}", self.rng.r#gen::<u64>());
        let op_ref = self.operation_ref(operation);

        let seed = self.target_seed(&label);
        let mut case = match seed {
            Some(mut seeded) => {
                seeded.id = id;
                // Re-roll one value so the seed is explored, not replayed
                self.reroll_one(&mut seeded, operation);
                seeded
            }
            None => self.positive_case(id, op_ref, operation),
        };

        if let Some(previous) = previous {
            apply_links(&mut case, operation, previous);
        }

        if self.negative_ratio > 0.0 && self.rng.gen_bool(self.negative_ratio) {
            self.make_negative(&mut case, operation);
        }

        Ok(case)
    }

    fn operation_ref(&mut self, operation: &Operation) -> Arc<OperationRef> {
        let base_url = &self.base_url;
        Arc::clone(
            self.operations
                .entry(operation.label())
                .or_insert_with(|| {
                    Arc::new(OperationRef::new(&operation.method, &operation.path, base_url))
                }),
        )
    }

    fn target_seed(&mut self, label: &str) -> Option<Case> {
        if self.best.is_empty() || !self.rng.gen_bool(TARGET_REUSE_PROBABILITY) {
            return None;
        }
        let mut candidates: Vec<&(f64, Case)> = self
            .best
            .iter()
            .filter(|((op, _), _)| op == label)
            .map(|(_, best)| best)
            .collect();
        // HashMap order is arbitrary; keep seeded runs reproducible
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        let mut case = candidates.first().map(|(_, case)| case.partial_deepcopy())?;
        case.mode = GenerationMode::Positive;
        Some(case)
    }

    fn positive_case(&mut self, id: String, op_ref: Arc<OperationRef>, operation: &Operation) -> Case {
        let document = Arc::clone(&self.document);
        let values = ValueGenerator::new(&document);
        let mut case = Case::new(id, op_ref);

        for param in &operation.parameters {
            let send = param.required
                || param.location == ParamLocation::Path
                || self.rng.gen_bool(OPTIONAL_PROBABILITY);
            if send {
                let value = values.generate(&param.schema, &mut self.rng);
                set_parameter(&mut case, param, value);
            }
        }

        if let Some(body) = &operation.request_body {
            if body.required || self.rng.gen_bool(OPTIONAL_PROBABILITY) {
                case.body = Some(values.generate(&body.schema, &mut self.rng));
                case.media_type = Some(body.media_type.clone());
            }
        }
        case
    }

    fn reroll_one(&mut self, case: &mut Case, operation: &Operation) {
        let document = Arc::clone(&self.document);
        let values = ValueGenerator::new(&document);
        let slots = operation.parameters.len() + usize::from(operation.request_body.is_some());
        if slots == 0 {
            return;
        }
        let slot = self.rng.gen_range(0..slots);
        match operation.parameters.get(slot) {
            Some(param) => {
                let value = values.generate(&param.schema, &mut self.rng);
                set_parameter(case, param, value);
            }
            None => {
                if let Some(body) = &operation.request_body {
                    case.body = Some(values.generate(&body.schema, &mut self.rng));
                    case.media_type = Some(body.media_type.clone());
                }
            }
        }
    }

    /// Replace one parameter or body property with a value of the wrong type.
    /// The case stays positive when nothing can be confused.
    fn make_negative(&mut self, case: &mut Case, operation: &Operation) {
        let document = Arc::clone(&self.document);
        let values = ValueGenerator::new(&document);

        let mut slots: Vec<Slot<'_>> = operation.parameters.iter().map(Slot::Parameter).collect();
        if let Some(body) = &operation.request_body {
            let properties = values.object_properties(&body.schema);
            if properties.is_empty() {
                slots.push(Slot::Body(&body.schema, &body.media_type));
            } else {
                slots.extend(
                    properties
                        .into_iter()
                        .map(|(name, schema)| Slot::BodyProperty(name, schema, &body.media_type)),
                );
            }
        }
        slots.shuffle(&mut self.rng);

        for slot in slots {
            let confused = match &slot {
                Slot::Parameter(param) => values.confused(&param.schema, &mut self.rng),
                Slot::Body(schema, _) => values.confused(schema, &mut self.rng),
                Slot::BodyProperty(_, schema, _) => values.confused(schema, &mut self.rng),
            };
            let Some(confused) = confused else { continue };
            match slot {
                Slot::Parameter(param) => set_parameter(case, param, confused),
                Slot::Body(_, media_type) => {
                    case.body = Some(confused);
                    case.media_type = Some(media_type.clone());
                }
                Slot::BodyProperty(name, _, media_type) => {
                    let mut body = match case.body.take() {
                        Some(Value::Object(map)) => map,
                        _ => serde_json::Map::new(),
                    };
                    body.insert(name, confused);
                    case.body = Some(Value::Object(body));
                    case.media_type = Some(media_type.clone());
                }
            }
            case.mode = GenerationMode::Negative;
            return;
        }
    }
}

impl TargetFeedback for CaseGenerator {
    fn target(&mut self, label: &str, value: f64, case: &Case) {
        let key = (case.operation().label(), label.to_string());
        let better = self.best.get(&key).is_none_or(|(best, _)| value > *best);
        if better {
            tracing::debug!(operation = %key.0, metric = label, value, "new best target score");
            self.best.insert(key, (value, case.partial_deepcopy()));
        }
    }
}

enum Slot<'a> {
    Parameter(&'a Parameter),
    Body(&'a Value, &'a String),
    BodyProperty(String, Value, &'a String),
}

fn set_parameter(case: &mut Case, param: &Parameter, value: Value) {
    match param.location {
        ParamLocation::Path => {
            case.path_parameters.insert(param.name.clone(), value);
        }
        ParamLocation::Query => {
            case.query.insert(param.name.clone(), value);
        }
        ParamLocation::Header => {
            case.headers.insert(param.name.clone(), value_to_string(&value));
        }
        ParamLocation::Cookie => {
            case.cookies.insert(param.name.clone(), value_to_string(&value));
        }
    }
}

/// Reuse values from the previous response for path parameters: an exact
/// field name match first, then `id` for parameters named like `petId`.
fn apply_links(case: &mut Case, operation: &Operation, previous: &Value) {
    let Some(fields) = previous.as_object() else {
        return;
    };
    for param in operation.parameters_in(ParamLocation::Path) {
        let linked = fields.get(&param.name).or_else(|| {
            let lower = param.name.to_ascii_lowercase();
            if lower.ends_with("id") {
                fields.get("id")
            } else {
                None
            }
        });
        if let Some(value) = linked.filter(|v| !v.is_null() && !v.is_object() && !v.is_array()) {
            case.path_parameters.insert(param.name.clone(), value.clone());
        }
    }
}
