//! Cassette writer: every executed step, appended as it happens
//!
//! Two formats: a VCR-style YAML document with an `interactions` list, or
//! one JSON object per line.

use std::fs::File;
use std::io::{BufWriter, Write};

use serde::Serialize;
use stateprobe_core::sanitize::mask_headers;
use stateprobe_core::{CassetteConfig, CassetteFormat, SerializedRequest, SerializedResponse, Status};

use super::{EventHandler, HandlerError};
use crate::context::StepStatus;
use crate::events::{EngineEvent, Event};
use crate::execution::ExecutionContext;
use crate::time::to_iso8601;

#[derive(Debug, Serialize)]
struct Interaction<'a> {
    id: usize,
    status: StepStatus,
    operation: &'a str,
    recorded_at: String,
    /// Seconds
    elapsed: f64,
    request: SerializedRequest,
    response: SerializedResponse,
    checks: Vec<RecordedCheck<'a>>,
}

#[derive(Debug, Serialize)]
struct RecordedCheck<'a> {
    name: &'a str,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

pub struct CassetteWriter {
    config: CassetteConfig,
    out: Option<BufWriter<File>>,
    recorded: usize,
}

impl CassetteWriter {
    #[must_use]
    pub fn new(config: CassetteConfig) -> Self {
        Self {
            config,
            out: None,
            recorded: 0,
        }
    }

    fn record(&mut self, interaction: &Interaction<'_>) -> Result<(), HandlerError> {
        let Some(out) = self.out.as_mut() else {
            return Ok(());
        };
        match self.config.format {
            CassetteFormat::Vcr => {
                let item = serde_yml::to_string(&[interaction])
                    .map_err(|e| HandlerError::Failed(format!("cassette serialization: {e}")))?;
                out.write_all(item.as_bytes())?;
            }
            CassetteFormat::Jsonl => {
                let line = serde_json::to_string(interaction)
                    .map_err(|e| HandlerError::Failed(format!("cassette serialization: {e}")))?;
                writeln!(out, "{line}")?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

impl EventHandler for CassetteWriter {
    fn name(&self) -> &str {
        "cassette"
    }

    fn start(&mut self, _ctx: &ExecutionContext) -> Result<(), HandlerError> {
        let path = &self.config.path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)
            .map_err(|e| HandlerError::Io(format!("{}: {e}", path.display())))?;
        let mut out = BufWriter::new(file);
        if self.config.format == CassetteFormat::Vcr {
            writeln!(out, "command: stateprobe run")?;
            writeln!(out, "recorded_with: stateprobe {}", env!("CARGO_PKG_VERSION"))?;
            writeln!(out, "interactions:")?;
            out.flush()?;
        }
        self.out = Some(out);
        Ok(())
    }

    fn handle_event(&mut self, _ctx: &ExecutionContext, event: &Event) -> Result<(), HandlerError> {
        let Event::Engine(EngineEvent::StepFinished {
            status,
            target,
            request: Some(request),
            response: Some(response),
            checks,
            timestamp,
            ..
        }) = event
        else {
            return Ok(());
        };

        let mut request = SerializedRequest::from_request(request);
        let mut serialized_response = SerializedResponse::from_response(response);
        if self.config.mask_sensitive_headers {
            mask_headers(&mut request.headers);
            mask_headers(&mut serialized_response.headers);
        }
        let interaction = Interaction {
            id: self.recorded,
            status: *status,
            operation: target,
            recorded_at: to_iso8601(*timestamp),
            elapsed: response.elapsed.as_secs_f64(),
            request,
            response: serialized_response,
            checks: checks
                .iter()
                .map(|check| RecordedCheck {
                    name: &check.name,
                    status: check.status,
                    message: check.failure.as_ref().map(|f| f.message.as_str()),
                })
                .collect(),
        };
        self.record(&interaction)?;
        self.recorded += 1;
        Ok(())
    }

    fn shutdown(&mut self, _ctx: &ExecutionContext) -> Result<(), HandlerError> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
            tracing::debug!(
                path = %self.config.path.display(),
                interactions = self.recorded,
                "cassette closed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use stateprobe_core::{Case, Check, Headers, OperationRef, Request, Response};

    fn step() -> Event {
        let op = Arc::new(OperationRef::new("get", "/users", "http://localhost"));
        let case = Arc::new(Case::new("c1", op));
        let mut headers = Headers::new();
        headers.insert("Authorization", "Bearer secret");
        headers.insert("Accept", "application/json");
        let request = Arc::new(Request {
            method: "GET".into(),
            uri: "http://localhost/users".into(),
            headers,
            body: None,
        });
        let response = Arc::new(Response {
            status_code: 200,
            message: "OK".into(),
            content: br#"[{"id":1}]"#.to_vec(),
            elapsed: Duration::from_millis(12),
            ..Response::default()
        });
        let check = Check::new(
            "not_a_server_error",
            Status::Success,
            Arc::clone(&request),
            Arc::clone(&response),
            Arc::clone(&case),
            None,
        );
        EngineEvent::StepFinished {
            suite: 0,
            scenario: 0,
            step: 0,
            status: StepStatus::Success,
            target: "GET /users".into(),
            case,
            request: Some(request),
            response: Some(response),
            checks: vec![check],
            error: None,
            timestamp: 0.0,
        }
        .into()
    }

    fn write(format: CassetteFormat, mask: bool) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cassette.out");
        let ctx = ExecutionContext::new();
        let mut writer = CassetteWriter::new(CassetteConfig {
            path: path.clone(),
            format,
            mask_sensitive_headers: mask,
        });
        writer.start(&ctx).unwrap();
        writer.handle_event(&ctx, &step()).unwrap();
        writer.handle_event(&ctx, &step()).unwrap();
        writer.shutdown(&ctx).unwrap();
        std::fs::read_to_string(&path).unwrap()
    }

    #[test]
    fn jsonl_has_one_line_per_step() {
        let text = write(CassetteFormat::Jsonl, true);
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["id"], 1);
        assert_eq!(lines[0]["recorded_at"], "1970-01-01T00:00:00Z");
        assert_eq!(lines[0]["response"]["status_code"], 200);
        assert_eq!(lines[0]["checks"][0]["name"], "not_a_server_error");
        assert!(!text.contains("Bearer secret"));
    }

    #[test]
    fn vcr_cassette_is_valid_yaml() {
        let text = write(CassetteFormat::Vcr, false);
        let doc: serde_json::Value = serde_yml::from_str(&text).unwrap();
        assert_eq!(doc["command"], "stateprobe run");
        let interactions = doc["interactions"].as_array().unwrap();
        assert_eq!(interactions.len(), 2);
        assert_eq!(interactions[0]["operation"], "GET /users");
        assert!(text.contains("Bearer secret"));
    }

    #[test]
    fn steps_without_response_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.jsonl");
        let ctx = ExecutionContext::new();
        let mut writer = CassetteWriter::new(CassetteConfig {
            path: path.clone(),
            format: CassetteFormat::Jsonl,
            mask_sensitive_headers: true,
        });
        writer.start(&ctx).unwrap();
        writer.handle_event(&ctx, &Event::loading_started("x")).unwrap();
        writer.shutdown(&ctx).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().is_empty());
    }
}
