//! Response checks
//!
//! A check is any [`ResponseCheck`]: it looks at one request/response pair
//! and either passes, reports a [`Failure`] or errors. Built-in and
//! user-supplied checks share the same interface and live in one ordered
//! [`CheckRegistry`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stateprobe_core::{Case, Check, Failure, FailureKind, GenerationMode, Request, Response, Status};

use crate::schema::Operation;

/// What a check gets to look at
#[derive(Debug, Clone, Copy)]
pub struct CheckInput<'a> {
    pub case: &'a Case,
    pub request: &'a Request,
    pub response: &'a Response,
    pub operation: &'a Operation,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CheckError {
    /// The response violates a declared contract
    #[error("{}", .0.title)]
    Failed(Failure),
    /// The check itself could not run
    #[error("{0}")]
    Errored(String),
}

pub trait ResponseCheck: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// [`CheckError::Failed`] on a contract violation,
    /// [`CheckError::Errored`] when the check cannot decide.
    fn evaluate(&self, input: &CheckInput<'_>) -> Result<(), CheckError>;
}

/// A check backed by a closure
pub struct FnCheck<F> {
    name: String,
    func: F,
}

impl<F> ResponseCheck for FnCheck<F>
where
    F: Fn(&CheckInput<'_>) -> Result<(), CheckError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, input: &CheckInput<'_>) -> Result<(), CheckError> {
        (self.func)(input)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckSelectionError {
    #[error("Unknown check `{name}` (known: {known})")]
    Unknown { name: String, known: String },
    #[error("Check `max_response_time` needs a limit (`[checks] max_response_time`)")]
    MissingLimit,
}

pub const BUILTIN_CHECKS: [&str; 6] = [
    "not_a_server_error",
    "status_code_conformance",
    "content_type_conformance",
    "response_schema_conformance",
    "negative_data_rejection",
    "max_response_time",
];

/// Results of all checks for one response.
#[derive(Debug, Default)]
pub struct StepChecks {
    pub checks: Vec<Check>,
    /// `(check name, message)` for checks that errored
    pub errors: Vec<(String, String)>,
}

impl StepChecks {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.checks.iter().any(|c| c.status == Status::Failure)
    }
}

/// Ordered collection of checks
#[derive(Default)]
pub struct CheckRegistry {
    checks: Vec<Box<dyn ResponseCheck>>,
}

impl std::fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl CheckRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in check. `max_response_time` is included only with a limit.
    #[must_use]
    pub fn builtin(max_response_time: Option<Duration>) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(NotAServerError));
        registry.register(Box::new(StatusCodeConformance));
        registry.register(Box::new(ContentTypeConformance));
        registry.register(Box::new(ResponseSchemaConformance));
        registry.register(Box::new(NegativeDataRejection));
        if let Some(limit) = max_response_time {
            registry.register(Box::new(MaxResponseTime { limit }));
        }
        registry
    }

    /// Built-ins by name; an empty list or `"all"` selects every built-in.
    ///
    /// # Errors
    ///
    /// Returns [`CheckSelectionError`] for unknown names, or when
    /// `max_response_time` is named without a limit.
    pub fn select(
        names: &[String],
        max_response_time: Option<Duration>,
    ) -> Result<Self, CheckSelectionError> {
        if names.is_empty() || names.iter().any(|n| n == "all") {
            return Ok(Self::builtin(max_response_time));
        }
        let mut registry = Self::new();
        for name in names {
            let check: Box<dyn ResponseCheck> = match name.as_str() {
                "not_a_server_error" => Box::new(NotAServerError),
                "status_code_conformance" => Box::new(StatusCodeConformance),
                "content_type_conformance" => Box::new(ContentTypeConformance),
                "response_schema_conformance" => Box::new(ResponseSchemaConformance),
                "negative_data_rejection" => Box::new(NegativeDataRejection),
                "max_response_time" => {
                    let limit = max_response_time.ok_or(CheckSelectionError::MissingLimit)?;
                    Box::new(MaxResponseTime { limit })
                }
                other => {
                    return Err(CheckSelectionError::Unknown {
                        name: other.to_string(),
                        known: BUILTIN_CHECKS.join(", "),
                    });
                }
            };
            registry.register(check);
        }
        Ok(registry)
    }

    pub fn register(&mut self, check: Box<dyn ResponseCheck>) {
        self.checks.push(check);
    }

    /// Register a closure as a check.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&CheckInput<'_>) -> Result<(), CheckError> + Send + Sync + 'static,
    {
        self.register(Box::new(FnCheck {
            name: name.into(),
            func,
        }));
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check in registration order.
    #[must_use]
    pub fn run(
        &self,
        case: &Arc<Case>,
        request: &Arc<Request>,
        response: &Arc<Response>,
        operation: &Operation,
    ) -> StepChecks {
        let input = CheckInput {
            case,
            request,
            response,
            operation,
        };
        let mut results = StepChecks::default();
        for check in &self.checks {
            let (status, failure) = match check.evaluate(&input) {
                Ok(()) => (Status::Success, None),
                Err(CheckError::Failed(failure)) => (Status::Failure, Some(failure)),
                Err(CheckError::Errored(message)) => {
                    tracing::warn!(check = check.name(), %message, "check errored");
                    results.errors.push((check.name().to_string(), message));
                    (Status::Error, None)
                }
            };
            results.checks.push(Check::new(
                check.name(),
                status,
                Arc::clone(request),
                Arc::clone(response),
                Arc::clone(case),
                failure,
            ));
        }
        results
    }
}

// ── Built-in checks ──

struct NotAServerError;

impl ResponseCheck for NotAServerError {
    fn name(&self) -> &str {
        "not_a_server_error"
    }

    fn evaluate(&self, input: &CheckInput<'_>) -> Result<(), CheckError> {
        let status = input.response.status_code;
        if status >= 500 {
            return Err(CheckError::Failed(Failure::server_error(
                input.operation.label(),
                status,
            )));
        }
        Ok(())
    }
}

struct StatusCodeConformance;

impl ResponseCheck for StatusCodeConformance {
    fn name(&self) -> &str {
        "status_code_conformance"
    }

    fn evaluate(&self, input: &CheckInput<'_>) -> Result<(), CheckError> {
        let op = input.operation;
        let nothing_declared = op.expected_statuses.is_empty()
            && op.status_classes.is_empty()
            && !op.has_default_response;
        let status = input.response.status_code;
        if nothing_declared || op.declares_status(status) {
            return Ok(());
        }
        Err(CheckError::Failed(
            Failure::new(
                op.label(),
                FailureKind::StatusCodeConformance,
                FailureKind::StatusCodeConformance.description(),
                format!(
                    "Received: {status}\nDocumented: {}",
                    op.documented_statuses()
                ),
            )
            .with_context("status_code", status.to_string()),
        ))
    }
}

struct ContentTypeConformance;

impl ResponseCheck for ContentTypeConformance {
    fn name(&self) -> &str {
        "content_type_conformance"
    }

    fn evaluate(&self, input: &CheckInput<'_>) -> Result<(), CheckError> {
        let status = input.response.status_code;
        let Some(documented) = input
            .operation
            .response_content_types
            .get(&status)
            .filter(|types| !types.is_empty())
        else {
            return Ok(());
        };
        let label = input.operation.label();
        let Some(actual) = input.response.media_type() else {
            return Err(CheckError::Failed(Failure::new(
                label,
                FailureKind::ContentTypeConformance,
                "Missing Content-Type header",
                format!(
                    "The following media types are documented in the schema:\n{}",
                    documented.join("\n")
                ),
            )));
        };
        if actual.split_once('/').is_none() {
            return Err(CheckError::Failed(Failure::new(
                label,
                FailureKind::ContentTypeConformance,
                "Malformed media type",
                format!("Media type for the response is malformed: {actual}"),
            )));
        }
        if documented.iter().any(|d| media_type_matches(d, actual)) {
            return Ok(());
        }
        Err(CheckError::Failed(
            Failure::new(
                label,
                FailureKind::ContentTypeConformance,
                FailureKind::ContentTypeConformance.description(),
                format!("Received: {actual}\nDocumented: {}", documented.join(", ")),
            )
            .with_context("status_code", status.to_string()),
        ))
    }
}

/// `application/*` and `*/*` match any subtype; comparison ignores case.
fn media_type_matches(documented: &str, actual: &str) -> bool {
    let documented = documented.split(';').next().unwrap_or("").trim();
    let (Some((dt, ds)), Some((at, as_))) = (documented.split_once('/'), actual.split_once('/'))
    else {
        return documented.eq_ignore_ascii_case(actual);
    };
    (dt == "*" || dt.eq_ignore_ascii_case(at)) && (ds == "*" || ds.eq_ignore_ascii_case(as_))
}

fn is_json_media_type(media: &str) -> bool {
    media == "application/json" || media.ends_with("+json") || media.ends_with("/json")
}

struct ResponseSchemaConformance;

impl ResponseCheck for ResponseSchemaConformance {
    fn name(&self) -> &str {
        "response_schema_conformance"
    }

    fn evaluate(&self, input: &CheckInput<'_>) -> Result<(), CheckError> {
        let response = input.response;
        let Some(schema) = input
            .operation
            .response_schemas
            .get(&response.status_code)
            .filter(|s| s.as_object().is_some_and(|o| !o.is_empty()))
        else {
            return Ok(());
        };
        if response.content.is_empty() {
            return Ok(());
        }
        // Only JSON bodies are validated; a missing header is assumed JSON
        if response.media_type().is_some_and(|m| !is_json_media_type(m)) {
            return Ok(());
        }
        let label = input.operation.label();
        let body: Value = match serde_json::from_slice(&response.content) {
            Ok(body) => body,
            Err(e) => {
                return Err(CheckError::Failed(
                    Failure::new(
                        label,
                        FailureKind::SchemaViolation,
                        "JSON deserialization error",
                        e.to_string(),
                    )
                    .with_context("status_code", response.status_code.to_string()),
                ));
            }
        };
        let validator = match jsonschema::validator_for(schema) {
            Ok(validator) => validator,
            Err(e) => {
                // Left-over circular `$ref`s and unsupported keywords end up here
                tracing::debug!(operation = %label, error = %e, "response schema not validated");
                return Ok(());
            }
        };
        let errors: Vec<String> = validator
            .iter_errors(&body)
            .take(5)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            return Ok(());
        }
        Err(CheckError::Failed(
            Failure::new(
                label,
                FailureKind::SchemaViolation,
                FailureKind::SchemaViolation.description(),
                errors.join("\n"),
            )
            .with_instance(body)
            .with_constraint(schema.clone())
            .with_context("status_code", response.status_code.to_string()),
        ))
    }
}

struct NegativeDataRejection;

impl ResponseCheck for NegativeDataRejection {
    fn name(&self) -> &str {
        "negative_data_rejection"
    }

    fn evaluate(&self, input: &CheckInput<'_>) -> Result<(), CheckError> {
        if input.case.mode != GenerationMode::Negative || !input.response.is_success() {
            return Ok(());
        }
        Err(CheckError::Failed(
            Failure::new(
                input.operation.label(),
                FailureKind::NegativeDataAccepted,
                FailureKind::NegativeDataAccepted.description(),
                format!(
                    "Invalid data should have been rejected\nExpected: 400, 401, 403, 404, 422, 428, 5xx\nReceived: {}",
                    input.response.status_code
                ),
            )
            .with_context("status_code", input.response.status_code.to_string()),
        ))
    }
}

struct MaxResponseTime {
    limit: Duration,
}

impl ResponseCheck for MaxResponseTime {
    fn name(&self) -> &str {
        "max_response_time"
    }

    fn evaluate(&self, input: &CheckInput<'_>) -> Result<(), CheckError> {
        let elapsed = input.response.elapsed;
        if elapsed <= self.limit {
            return Ok(());
        }
        Err(CheckError::Failed(
            Failure::new(
                input.operation.label(),
                FailureKind::ResponseTimeExceeded,
                FailureKind::ResponseTimeExceeded.description(),
                format!(
                    "Actual: {:.2}ms\nLimit: {:.2}ms",
                    elapsed.as_secs_f64() * 1000.0,
                    self.limit.as_secs_f64() * 1000.0
                ),
            )
            .with_context("limit_ms", self.limit.as_millis().to_string()),
        ))
    }
}
