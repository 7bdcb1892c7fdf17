//! JSON Schema → random `serde_json::Value` generator
//!
//! Handles the OpenAPI 3.x / JSON Schema Draft 7 subset:
//! string, integer, number, boolean, array, object, enum, $ref, anyOf, oneOf, allOf

use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::{Value, json};

use crate::schema::resolve_ref;

/// Maximum recursion depth for schema traversal (prevents stack overflow on circular `$ref`).
const MAX_DEPTH: u32 = 20;

/// Maximum string length for generation (prevents OOM on absurd maxLength values).
const MAX_STRING_LEN: usize = 10_000;

/// Sentinel used when an enum must be violated.
const INVALID_ENUM_VALUE: &str = "__INVALID_ENUM_VALUE__";

/// Generates values for schemas taken from one API document.
///
/// `$ref`s are JSON pointers into `document`.
#[derive(Debug, Clone, Copy)]
pub struct ValueGenerator<'a> {
    document: &'a Value,
}

impl<'a> ValueGenerator<'a> {
    #[must_use]
    pub fn new(document: &'a Value) -> Self {
        Self { document }
    }

    /// A random value conforming to `schema`.
    pub fn generate(&self, schema: &Value, rng: &mut impl Rng) -> Value {
        self.generate_inner(schema, rng, 0)
    }

    /// A random value that violates `schema`'s declared type or enum.
    ///
    /// `None` when the schema accepts any value.
    pub fn confused(&self, schema: &Value, rng: &mut impl Rng) -> Option<Value> {
        self.type_confusion_values(schema, 0).choose(rng).cloned()
    }

    /// Property schemas of an object schema, `$ref` resolved.
    #[must_use]
    pub fn object_properties(&self, schema: &Value) -> Vec<(String, Value)> {
        let resolved = self.resolve(schema, 0);
        resolved
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| (name.clone(), schema.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn resolve(&self, schema: &Value, depth: u32) -> Value {
        match schema.get("$ref").and_then(Value::as_str) {
            Some(reference) if depth <= MAX_DEPTH => match resolve_ref(reference, self.document) {
                Some(resolved) => self.resolve(&resolved, depth + 1),
                None => Value::Null,
            },
            Some(_) => Value::Null,
            None => schema.clone(),
        }
    }

    fn generate_inner(&self, schema: &Value, rng: &mut impl Rng, depth: u32) -> Value {
        if depth > MAX_DEPTH {
            return Value::Null;
        }

        // $ref
        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            if let Some(resolved) = resolve_ref(reference, self.document) {
                return self.generate_inner(&resolved, rng, depth + 1);
            }
            return Value::Null;
        }

        if let Some(constant) = schema.get("const") {
            return constant.clone();
        }

        // enum
        if let Some(enum_values) = schema.get("enum").and_then(Value::as_array) {
            if let Some(choice) = enum_values.choose(rng) {
                return choice.clone();
            }
        }

        // anyOf / oneOf: pick one non-null variant
        for key in ["anyOf", "oneOf"] {
            if let Some(variants) = schema.get(key).and_then(Value::as_array) {
                let non_null: Vec<_> = variants
                    .iter()
                    .filter(|s| s.get("type").and_then(Value::as_str) != Some("null"))
                    .collect();
                return match non_null.choose(rng) {
                    Some(variant) => self.generate_inner(variant, rng, depth + 1),
                    None => Value::Null,
                };
            }
        }

        // allOf: merge objects
        if let Some(all_of) = schema.get("allOf").and_then(Value::as_array) {
            let mut merged = serde_json::Map::new();
            for sub in all_of {
                if let Value::Object(obj) = self.generate_inner(sub, rng, depth + 1) {
                    merged.extend(obj);
                }
            }
            return Value::Object(merged);
        }

        match declared_type(schema) {
            "string" => gen_string(schema, rng),
            "integer" => gen_integer(schema, rng),
            "number" => gen_number(schema, rng),
            "boolean" => Value::Bool(rng.gen_bool(0.5)),
            "array" => self.gen_array(schema, rng, depth + 1),
            "object" => self.gen_object(schema, rng, depth + 1),
            "null" => Value::Null,
            _ => {
                // Infer from structure
                if schema.get("properties").is_some() {
                    self.gen_object(schema, rng, depth + 1)
                } else if schema.get("items").is_some() {
                    self.gen_array(schema, rng, depth + 1)
                } else {
                    Value::String(random_alnum(rng, 8))
                }
            }
        }
    }

    fn gen_array(&self, schema: &Value, rng: &mut impl Rng, depth: u32) -> Value {
        let min = schema.get("minItems").and_then(Value::as_u64).unwrap_or(0) as usize;
        let max = schema.get("maxItems").and_then(Value::as_u64).unwrap_or(3) as usize;
        let count = rng.gen_range(min..=max.max(min));
        let items_schema = schema
            .get("items")
            .cloned()
            .unwrap_or(json!({"type": "string"}));
        Value::Array(
            (0..count)
                .map(|_| self.generate_inner(&items_schema, rng, depth))
                .collect(),
        )
    }

    fn gen_object(&self, schema: &Value, rng: &mut impl Rng, depth: u32) -> Value {
        let mut obj = serde_json::Map::new();
        let required = required_properties(schema);

        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (key, prop_schema) in props {
                if required.contains(key) || rng.gen_bool(0.5) {
                    obj.insert(key.clone(), self.generate_inner(prop_schema, rng, depth));
                }
            }
        }
        Value::Object(obj)
    }

    /// Values of types DIFFERENT from the schema's declared type.
    ///
    /// Covers coercion bugs: string "123" where an integer is expected, null
    /// where an object is expected, an array where a string is expected.
    #[allow(clippy::approx_constant)] // 3.14 is a probe, not PI
    fn type_confusion_values(&self, schema: &Value, depth: u32) -> Vec<Value> {
        if depth > MAX_DEPTH {
            return vec![];
        }

        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            return match resolve_ref(reference, self.document) {
                Some(resolved) => self.type_confusion_values(&resolved, depth + 1),
                None => vec![],
            };
        }

        // enum: a value outside the declared set
        if let Some(enum_values) = schema.get("enum").and_then(Value::as_array) {
            let mut values = vec![json!(INVALID_ENUM_VALUE), json!(-1)];
            values.retain(|v| !enum_values.contains(v));
            return values;
        }

        let declared = declared_type(schema);
        let declared = if declared.is_empty() && schema.get("properties").is_some() {
            "object"
        } else {
            declared
        };
        if declared.is_empty() {
            return vec![];
        }

        let mut values = Vec::new();

        if declared != "string" {
            values.push(json!(""));
            values.push(json!("123"));
            values.push(json!("true"));
        }

        if declared != "integer" && declared != "number" {
            values.push(json!(0));
            values.push(json!(42));
        }

        // An integer schema receiving a float is confusion too
        if declared != "number" {
            values.push(json!(3.14));
        }

        if declared != "boolean" {
            values.push(json!(true));
            values.push(json!(false));
        }

        if declared != "null" && schema.get("nullable").and_then(Value::as_bool) != Some(true) {
            values.push(Value::Null);
        }

        if declared != "array" {
            values.push(json!([]));
            values.push(json!([1]));
        }

        if declared != "object" {
            values.push(json!({}));
        }

        values
    }
}

fn declared_type(schema: &Value) -> &str {
    match schema.get("type") {
        Some(Value::String(t)) => t.as_str(),
        // `type: [string, null]`: first non-null entry
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or(""),
        _ => "",
    }
}

fn required_properties(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn gen_string(schema: &Value, rng: &mut impl Rng) -> Value {
    let format = schema.get("format").and_then(Value::as_str);
    match format {
        Some("email") => Value::String(format!("user{}@example.com", rng.gen_range(1..9999_u32))),
        Some("uri" | "url") => Value::String("https://example.com".into()),
        Some("date") => Value::String("2024-01-15".into()),
        Some("date-time") => Value::String("2024-01-15T12:00:00Z".into()),
        Some("uuid") => Value::String(format!(
            "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
            rng.r#gen::<u32>(),
            rng.r#gen::<u16>(),
            rng.r#gen::<u16>() & 0x0FFF,
            (rng.r#gen::<u16>() & 0x3FFF) | 0x8000,
            rng.r#gen::<u64>() & 0xFFFF_FFFF_FFFF,
        )),
        _ => {
            let min = schema
                .get("minLength")
                .and_then(Value::as_u64)
                .map_or(1, |v| (v as usize).min(MAX_STRING_LEN));
            let max = schema
                .get("maxLength")
                .and_then(Value::as_u64)
                .map_or(20, |v| (v as usize).min(MAX_STRING_LEN));
            let len = rng.gen_range(min..=max.max(min));
            Value::String(random_alnum(rng, len))
        }
    }
}

fn gen_integer(schema: &Value, rng: &mut impl Rng) -> Value {
    let has_min = schema.get("minimum").is_some();
    let has_max = schema.get("maximum").is_some();
    let min = schema.get("minimum").and_then(Value::as_i64).unwrap_or(-1000);
    let max = schema
        .get("maximum")
        .and_then(Value::as_i64)
        .unwrap_or(1000)
        .max(min);

    // 20% chance: boundary values
    if rng.gen_bool(0.2) {
        let edges: Vec<i64> = if has_min && has_max {
            vec![min, max]
        } else if has_min {
            vec![min, min.saturating_add(1)]
        } else if has_max {
            vec![max, max.saturating_sub(1)]
        } else {
            vec![0, -1, 1, i64::MIN, i64::MAX]
        };
        if let Some(edge) = edges.choose(rng) {
            return Value::Number((*edge).into());
        }
    }

    Value::Number(rng.gen_range(min..=max).into())
}

fn gen_number(schema: &Value, rng: &mut impl Rng) -> Value {
    let min = schema.get("minimum").and_then(Value::as_f64).unwrap_or(0.0);
    let max = schema
        .get("maximum")
        .and_then(Value::as_f64)
        .unwrap_or(1000.0)
        .max(min);
    json!(rng.gen_range(min..=max))
}

fn random_alnum(rng: &mut impl Rng, len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}
