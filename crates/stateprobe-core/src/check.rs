//! Check results bound to the request, response and case that produced them

use std::cell::OnceCell;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::case::Case;
use crate::failure::Failure;
use crate::http::{Request, Response};
use crate::report::{SerializedCase, SerializedCheck, SerializedRequest, SerializedResponse};

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Failure,
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure => f.write_str("failure"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Single check run result.
///
/// `code_sample` is derived on first access and cached for the lifetime of
/// the value. The cache is not synchronized: a `Check` is read by one thread
/// at a time.
#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub status: Status,
    pub request: Arc<Request>,
    pub response: Arc<Response>,
    pub case: Arc<Case>,
    pub failure: Option<Failure>,
    code_sample: OnceCell<String>,
}

impl Check {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        status: Status,
        request: Arc<Request>,
        response: Arc<Response>,
        case: Arc<Case>,
        failure: Option<Failure>,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            request,
            response,
            case,
            failure,
            code_sample: OnceCell::new(),
        }
    }

    /// Command that reproduces the request behind this check.
    pub fn code_sample(&self) -> &str {
        self.code_sample.get_or_init(|| {
            self.case
                .as_curl_command(&self.request.headers.first_values(), self.response.verify)
        })
    }

    /// Structured form for machine-readable reports.
    #[must_use]
    pub fn serialize(&self) -> SerializedCheck {
        SerializedCheck {
            name: self.name.clone(),
            status: self.status,
            request: SerializedRequest::from_request(&self.request),
            response: SerializedResponse::from_response(&self.response),
            case: SerializedCase::from_case(&self.case),
            failure: self.failure.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::OperationRef;
    use crate::http::Headers;
    use std::time::Duration;

    fn check_with(verify: bool) -> Check {
        let op = Arc::new(OperationRef::new("GET", "/items/{id}", "http://127.0.0.1"));
        let mut case = Case::new("c1", op);
        case.path_parameters.insert("id".into(), serde_json::json!(7));
        let request = Request {
            method: "GET".into(),
            uri: "http://127.0.0.1/items/7".into(),
            headers: Headers::from_iter([("Accept", "*/*"), ("Accept", "application/json")]),
            body: None,
        };
        let response = Response {
            status_code: 500,
            message: "Internal Server Error".into(),
            headers: Headers::new(),
            content: b"boom".to_vec(),
            http_version: "HTTP/1.1".into(),
            elapsed: Duration::from_millis(3),
            verify,
        };
        Check::new(
            "not_a_server_error",
            Status::Failure,
            Arc::new(request),
            Arc::new(response),
            Arc::new(case),
            Some(Failure::server_error("GET /items/{id}", 500)),
        )
    }

    #[test]
    fn code_sample_uses_first_header_value() {
        let check = check_with(true);
        assert_eq!(
            check.code_sample(),
            "curl -X GET -H 'Accept: */*' 'http://127.0.0.1/items/7'"
        );
    }

    #[test]
    fn code_sample_is_cached() {
        let check = check_with(false);
        let first = check.code_sample();
        let second = check.code_sample();
        assert!(std::ptr::eq(first, second));
        assert!(first.contains("--insecure"));
    }

    #[test]
    fn serialize_includes_all_parts() {
        let value = serde_json::to_value(check_with(true).serialize()).unwrap();
        assert_eq!(value["name"], "not_a_server_error");
        assert_eq!(value["status"], "failure");
        assert_eq!(value["request"]["uri"], "http://127.0.0.1/items/7");
        assert_eq!(value["request"]["headers"]["Accept"][1], "application/json");
        assert_eq!(value["response"]["status_code"], 500);
        assert_eq!(value["response"]["body"], "boom");
        assert_eq!(value["case"]["path_parameters"]["id"], "7");
        assert_eq!(value["failure"]["kind"], "server_error");
    }

    #[test]
    fn serialize_without_failure_is_null() {
        let mut check = check_with(true);
        check.failure = None;
        check.status = Status::Success;
        let value = serde_json::to_value(check.serialize()).unwrap();
        assert!(value["failure"].is_null());
        assert_eq!(value["status"], "success");
    }
}
