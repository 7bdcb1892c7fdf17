//! Sending cases over the network

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use stateprobe_core::{Case, Headers, Request, Response};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Request timed out after {0:.2}s")]
    Timeout(f64),
    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Sends one case and returns what went over the wire.
///
/// Implementations do not retry.
pub trait Transport: Send {
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no response was received.
    fn send(&self, case: &Case) -> Result<(Request, Response), TransportError>;
}

/// Blocking HTTP transport
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    headers: BTreeMap<String, String>,
    timeout: Duration,
    verify: bool,
}

impl HttpTransport {
    /// `headers` are sent with every request; case headers win on conflict.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] when the client cannot be built.
    pub fn new(
        timeout: Duration,
        headers: BTreeMap<String, String>,
        verify: bool,
    ) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self {
            client,
            headers,
            timeout,
            verify,
        })
    }
}

/// Headers and body exactly as they will be sent.
pub fn prepare_request(case: &Case, defaults: &BTreeMap<String, String>) -> Request {
    let mut headers: Headers = defaults.iter().collect();
    for (name, value) in &case.headers {
        headers.insert(name, value);
    }
    if !case.cookies.is_empty() {
        let cookie = case
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        headers.insert("Cookie", cookie);
    }
    let body = case.body.as_ref().map(|body| {
        let media_type = case.media_type.as_deref().unwrap_or("application/json");
        if !headers.contains("content-type") {
            headers.insert("Content-Type", media_type);
        }
        match body {
            serde_json::Value::String(text) if !media_type.contains("json") => {
                text.as_bytes().to_vec()
            }
            other => other.to_string().into_bytes(),
        }
    });
    Request {
        method: case.operation().method.clone(),
        uri: case.url(),
        headers,
        body,
    }
}

impl Transport for HttpTransport {
    fn send(&self, case: &Case) -> Result<(Request, Response), TransportError> {
        let request = prepare_request(case, &self.headers);
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("invalid HTTP method '{}'", request.method)))?;

        let mut builder = self.client.request(method, &request.uri);
        for (name, values) in request.headers.iter() {
            for value in values {
                // Values that are invalid in HTTP (\0, \r\n) never reach the server
                if reqwest::header::HeaderValue::from_str(value).is_ok() {
                    builder = builder.header(name, value);
                }
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let start = Instant::now();
        let resp = builder.send().map_err(|e| self.classify(&e))?;

        let status = resp.status();
        let http_version = format!("{:?}", resp.version());
        let headers: Headers = resp
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let content = resp.bytes().map_err(|e| self.classify(&e))?.to_vec();
        let elapsed = start.elapsed();

        tracing::debug!(
            method = %request.method,
            uri = %request.uri,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "response received"
        );

        let response = Response {
            status_code: status.as_u16(),
            message: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            content,
            http_version,
            elapsed,
            verify: self.verify,
        };
        Ok((request, response))
    }
}

impl HttpTransport {
    fn classify(&self, error: &reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout.as_secs_f64())
        } else if error.is_connect() {
            TransportError::Connection(error.to_string())
        } else if error.is_builder() {
            TransportError::InvalidRequest(error.to_string())
        } else {
            TransportError::Client(error.to_string())
        }
    }
}
