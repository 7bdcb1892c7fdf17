//! Generated request descriptions

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of the API operation a case targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationRef {
    pub method: String,
    /// Path template, e.g. `/users/{user_id}`
    pub path: String,
    pub base_url: String,
}

impl OperationRef {
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            base_url: base_url.into(),
        }
    }

    /// "POST /users"
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Whether generated data is meant to conform to the schema.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    #[default]
    Positive,
    Negative,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => f.write_str("positive"),
            Self::Negative => f.write_str("negative"),
        }
    }
}

/// One generated request for a target operation.
///
/// The engine never mutates a case once it is built; checks and events share
/// it behind an `Arc`. The operation identity is shared between copies and is
/// only cloned when a copy asks for write access (see [`Case::operation_mut`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub id: String,
    operation: Arc<OperationRef>,
    pub path_parameters: BTreeMap<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub query: BTreeMap<String, Value>,
    pub body: Option<Value>,
    pub media_type: Option<String>,
    pub mode: GenerationMode,
}

impl Case {
    #[must_use]
    pub fn new(id: impl Into<String>, operation: Arc<OperationRef>) -> Self {
        Self {
            id: id.into(),
            operation,
            path_parameters: BTreeMap::new(),
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
            media_type: None,
            mode: GenerationMode::Positive,
        }
    }

    #[must_use]
    pub fn operation(&self) -> &OperationRef {
        &self.operation
    }

    #[must_use]
    pub fn operation_arc(&self) -> &Arc<OperationRef> {
        &self.operation
    }

    /// Write access to the operation identity. Copies it first if it is
    /// shared with another case.
    pub fn operation_mut(&mut self) -> &mut OperationRef {
        Arc::make_mut(&mut self.operation)
    }

    /// Snapshot taken before handing the case to code that may mutate it.
    ///
    /// Every container (parameters, headers, cookies, query, body) is copied;
    /// the operation identity stays shared until written through
    /// [`Case::operation_mut`].
    #[must_use]
    pub fn partial_deepcopy(&self) -> Self {
        Self {
            id: self.id.clone(),
            operation: Arc::clone(&self.operation),
            path_parameters: self.path_parameters.clone(),
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
            query: self.query.clone(),
            body: self.body.clone(),
            media_type: self.media_type.clone(),
            mode: self.mode,
        }
    }

    /// Path with parameters substituted: `/users/{id}` → `/users/42`
    #[must_use]
    pub fn formatted_path(&self) -> String {
        let mut path = self.operation.path.clone();
        for (name, value) in &self.path_parameters {
            path = path.replace(&format!("{{{name}}}"), &encode_component(&value_to_string(value)));
        }
        path
    }

    /// Full URL including the query string.
    #[must_use]
    pub fn url(&self) -> String {
        let mut url = format!(
            "{}{}",
            self.operation.base_url.trim_end_matches('/'),
            self.formatted_path()
        );
        let pairs: Vec<String> = self
            .query
            .iter()
            .flat_map(|(name, value)| {
                query_values(value)
                    .into_iter()
                    .map(move |v| format!("{}={}", encode_component(name), encode_component(&v)))
            })
            .collect();
        if !pairs.is_empty() {
            url.push('?');
            url.push_str(&pairs.join("&"));
        }
        url
    }

    /// Deterministic structural fingerprint over every field except `id`.
    ///
    /// Two cases with equal fields always share a fingerprint. Distinct cases
    /// sharing one is possible in principle (256-bit hash) and is not
    /// detected.
    #[must_use]
    pub fn fingerprint(&self) -> CaseFingerprint {
        let canonical = serde_json::json!({
            "method": self.operation.method,
            "path": self.operation.path,
            "path_parameters": self.path_parameters,
            "headers": self.headers,
            "cookies": self.cookies,
            "query": self.query,
            "body": self.body,
            "media_type": self.media_type,
            "mode": self.mode,
        });
        let mut hasher = blake3::Hasher::new();
        // Map keys serialize in sorted order, so equal cases give equal bytes
        hasher.update(canonical.to_string().as_bytes());
        CaseFingerprint(*hasher.finalize().as_bytes())
    }
}

/// Structural hash of a [`Case`], used to memoize step outcomes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaseFingerprint([u8; 32]);

impl fmt::Display for CaseFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CaseFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CaseFingerprint({self})")
    }
}

/// Render a parameter value the way it goes on the wire.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Query values may be scalars or arrays; arrays become repeated keys.
#[must_use]
pub fn query_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(value_to_string).collect(),
        other => vec![value_to_string(other)],
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(char::from(b));
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
