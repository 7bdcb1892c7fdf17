//! Serialized report types: checks, requests, responses and cases
//!
//! These are the stable machine-readable shapes written to cassettes, JUnit
//! attachments and JSON output. A JSON Schema for them is exported with
//! [`generate_schema`].

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::case::{Case, GenerationMode, query_values, value_to_string};
use crate::check::Status;
use crate::failure::Failure;
use crate::http::{Request, Response};

/// A check with everything needed to explain it without re-running it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SerializedCheck {
    /// Check name, e.g. "not_a_server_error"
    pub name: String,
    pub status: Status,
    pub request: SerializedRequest,
    pub response: SerializedResponse,
    pub case: SerializedCase,
    /// Present when the check failed
    pub failure: Option<Failure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SerializedRequest {
    pub method: String,
    pub uri: String,
    /// Body as text (lossy for non UTF-8 payloads)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
}

impl SerializedRequest {
    #[must_use]
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method.clone(),
            uri: request.uri.clone(),
            body: request.encoded_body(),
            headers: request.headers.to_map(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SerializedResponse {
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    pub http_version: String,
    /// Seconds
    pub elapsed: f64,
    pub verify: bool,
}

impl SerializedResponse {
    #[must_use]
    pub fn from_response(response: &Response) -> Self {
        Self {
            status_code: response.status_code,
            message: response.message.clone(),
            headers: response.headers.to_map(),
            body: (!response.content.is_empty()).then(|| response.text()),
            encoding: response.encoding(),
            http_version: response.http_version.clone(),
            elapsed: response.elapsed.as_secs_f64(),
            verify: response.verify,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SerializedCase {
    pub id: String,
    pub method: String,
    pub path_template: String,
    /// Values rendered as strings
    #[serde(default)]
    pub path_parameters: BTreeMap<String, String>,
    /// Every value rendered as a list of strings
    #[serde(default)]
    pub query: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub generation_mode: GenerationMode,
}

impl SerializedCase {
    #[must_use]
    pub fn from_case(case: &Case) -> Self {
        Self {
            id: case.id.clone(),
            method: case.operation().method.clone(),
            path_template: case.operation().path.clone(),
            path_parameters: stringify_path_parameters(&case.path_parameters),
            query: prepare_query(&case.query),
            headers: case.headers.clone(),
            cookies: case.cookies.clone(),
            body: case.body.clone(),
            media_type: case.media_type.clone(),
            generation_mode: case.mode,
        }
    }
}

/// Path parameter values may be of any JSON type; reports show strings.
#[must_use]
pub fn stringify_path_parameters(
    params: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), value_to_string(v)))
        .collect()
}

/// Query values may be scalars or lists; reports always show lists of strings.
#[must_use]
pub fn prepare_query(
    query: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, Vec<String>> {
    query
        .iter()
        .map(|(k, v)| (k.clone(), query_values(v)))
        .collect()
}

/// Generate JSON Schema for the serialized check format.
#[must_use]
pub fn generate_schema() -> String {
    let schema = schemars::schema_for!(SerializedCheck);
    serde_json::to_string_pretty(&schema).expect("schema serialization should not fail")
}
