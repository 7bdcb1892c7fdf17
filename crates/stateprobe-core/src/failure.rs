//! Failure types and structured representation

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type of failure - determines the title shown in reports
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Server error (5xx)
    ServerError,
    /// Status code not declared for the operation
    StatusCodeConformance,
    /// Response Content-Type does not match the declared media types
    ContentTypeConformance,
    /// Response body does not match the declared schema
    SchemaViolation,
    /// Invalid input accepted with success status (negative testing)
    NegativeDataAccepted,
    /// Response took longer than the configured limit
    ResponseTimeExceeded,
    /// Raised by a user-registered check
    Custom,
}

impl FailureKind {
    /// Human-readable description
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ServerError => "Server error",
            Self::StatusCodeConformance => "Undocumented HTTP status code",
            Self::ContentTypeConformance => "Undocumented Content-Type",
            Self::SchemaViolation => "Response violates schema",
            Self::NegativeDataAccepted => "API accepted schema-violating request",
            Self::ResponseTimeExceeded => "Response time limit exceeded",
            Self::Custom => "Custom check failed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// One validation violation.
///
/// Two failures are equal when they describe the same defect on the same
/// operation: kind, title, message and every structured field match. The
/// response that exposed it is not part of the identity; grouping by
/// reproduction sample and status code happens in
/// [`crate::grouping::group_failures_by_code_sample`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Failure {
    /// Operation label, e.g. "POST /users"
    pub operation: String,
    pub kind: FailureKind,
    /// Short title
    pub title: String,
    /// Detailed message
    pub message: String,
    /// Path inside the declared schema, e.g. `["properties", "id", "type"]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_path: Vec<String>,
    /// Path inside the observed instance, e.g. `["items", "0", "id"]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_path: Vec<String>,
    /// Observed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<Value>,
    /// Declared constraint the value violated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Value>,
    /// Additional context
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl Eq for Failure {}

impl Hash for Failure {
    // JSON values are left out; equal failures still hash equally.
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.operation.hash(state);
        self.kind.hash(state);
        self.title.hash(state);
        self.message.hash(state);
        self.schema_path.hash(state);
        self.instance_path.hash(state);
        self.context.hash(state);
    }
}

impl Failure {
    #[must_use]
    pub fn new(
        operation: impl Into<String>,
        kind: FailureKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            kind,
            title: title.into(),
            message: message.into(),
            schema_path: Vec::new(),
            instance_path: Vec::new(),
            instance: None,
            constraint: None,
            context: BTreeMap::new(),
        }
    }

    /// A 5xx response. The title carries the status so distinct codes stay
    /// distinct failures.
    #[must_use]
    pub fn server_error(operation: impl Into<String>, status_code: u16) -> Self {
        Self::new(
            operation,
            FailureKind::ServerError,
            FailureKind::ServerError.description(),
            format!("Received a response with {status_code} status code"),
        )
        .with_context("status_code", status_code.to_string())
    }

    #[must_use]
    pub fn with_schema_path(mut self, path: Vec<String>) -> Self {
        self.schema_path = path;
        self
    }

    #[must_use]
    pub fn with_instance_path(mut self, path: Vec<String>) -> Self {
        self.instance_path = path;
        self
    }

    #[must_use]
    pub fn with_instance(mut self, instance: Value) -> Self {
        self.instance = Some(instance);
        self
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: Value) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Add context entry
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Total order consistent with equality; breaks ties when grouping.
    pub(crate) fn cmp_identity(&self, other: &Self) -> Ordering {
        (&self.operation, self.kind, &self.title, &self.message)
            .cmp(&(&other.operation, other.kind, &other.title, &other.message))
            .then_with(|| self.schema_path.cmp(&other.schema_path))
            .then_with(|| self.instance_path.cmp(&other.instance_path))
            .then_with(|| self.context.cmp(&other.context))
            .then_with(|| render(&self.instance).cmp(&render(&other.instance)))
            .then_with(|| render(&self.constraint).cmp(&render(&other.constraint)))
    }
}

fn render(value: &Option<Value>) -> Option<String> {
    value.as_ref().map(Value::to_string)
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}
