//! JUnit XML report, one `<testcase>` per operation

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use stateprobe_core::sanitize::sanitized_code_sample;

use super::{EventHandler, HandlerError};
use crate::context::StepStatus;
use crate::events::{EngineEvent, Event};
use crate::execution::ExecutionContext;

#[derive(Debug, Default)]
struct TestCase {
    time: f64,
    /// (title, body)
    failures: Vec<(String, String)>,
    errors: Vec<String>,
}

pub struct JunitXmlHandler {
    path: PathBuf,
    file: Option<File>,
    cases: BTreeMap<String, TestCase>,
    written: bool,
}

impl JunitXmlHandler {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            cases: BTreeMap::new(),
            written: false,
        }
    }

    fn write(&mut self, ctx: &ExecutionContext) -> Result<(), HandlerError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        self.written = true;
        let mut out = BufWriter::new(file);
        out.write_all(render(&self.cases, ctx.running_time).as_bytes())?;
        out.flush()?;
        tracing::debug!(path = %self.path.display(), "JUnit report written");
        Ok(())
    }
}

fn render(cases: &BTreeMap<String, TestCase>, time: f64) -> String {
    let tests = cases.len();
    let failures = cases.values().filter(|c| !c.failures.is_empty()).count();
    let errors = cases
        .values()
        .filter(|c| c.failures.is_empty() && !c.errors.is_empty())
        .count();

    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push('\n');
    out.push_str(&format!(
        r#"<testsuites name="stateprobe" tests="{tests}" failures="{failures}" errors="{errors}" time="{time:.3}">"#
    ));
    out.push('\n');
    out.push_str(&format!(
        r#"<testsuite name="stateprobe" tests="{tests}" failures="{failures}" errors="{errors}" time="{time:.3}">"#
    ));
    out.push('\n');
    for (label, case) in cases {
        let name = xml_escape(label);
        if case.failures.is_empty() && case.errors.is_empty() {
            out.push_str(&format!(
                r#"<testcase name="{name}" classname="stateprobe" time="{:.3}"/>"#,
                case.time
            ));
            out.push('\n');
            continue;
        }
        out.push_str(&format!(
            r#"<testcase name="{name}" classname="stateprobe" time="{:.3}">"#,
            case.time
        ));
        out.push('\n');
        for (title, body) in &case.failures {
            out.push_str(&format!(
                r#"<failure type="failure" message="{}">{}</failure>"#,
                xml_escape(title),
                xml_escape(body)
            ));
            out.push('\n');
        }
        for error in &case.errors {
            out.push_str(&format!(
                r#"<error type="error" message="{}">{}</error>"#,
                xml_escape(error),
                xml_escape(error)
            ));
            out.push('\n');
        }
        out.push_str("</testcase>\n");
    }
    out.push_str("</testsuite>\n</testsuites>\n");
    out
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

impl EventHandler for JunitXmlHandler {
    fn name(&self) -> &str {
        "junit"
    }

    fn start(&mut self, _ctx: &ExecutionContext) -> Result<(), HandlerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.path)
            .map_err(|e| HandlerError::Io(format!("{}: {e}", self.path.display())))?;
        self.file = Some(file);
        Ok(())
    }

    fn handle_event(&mut self, ctx: &ExecutionContext, event: &Event) -> Result<(), HandlerError> {
        match event {
            Event::Engine(EngineEvent::StepStarted { operation, .. }) => {
                self.cases.entry(operation.clone()).or_default();
            }
            Event::Engine(EngineEvent::StepFinished {
                target,
                status,
                response,
                error,
                ..
            }) => {
                let case = self.cases.entry(target.clone()).or_default();
                if let Some(response) = response {
                    case.time += response.elapsed.as_secs_f64();
                }
                if *status == StepStatus::Error {
                    if let Some(error) = error {
                        if !case.errors.contains(error) {
                            case.errors.push(error.clone());
                        }
                    }
                }
            }
            Event::Engine(EngineEvent::SuiteFinished { failures, .. }) => {
                for check in failures {
                    let Some(failure) = &check.failure else {
                        continue;
                    };
                    let body = format!(
                        "{}\n\nReproduce with:\n\n    {}",
                        failure.message,
                        sanitized_code_sample(check)
                    );
                    self.cases
                        .entry(check.case.operation().label())
                        .or_default()
                        .failures
                        .push((failure.title.clone(), body));
                }
            }
            Event::Engine(EngineEvent::RunFinished { .. }) => self.write(ctx)?,
            _ => {}
        }
        Ok(())
    }

    fn shutdown(&mut self, ctx: &ExecutionContext) -> Result<(), HandlerError> {
        if !self.written {
            self.write(ctx)?;
        }
        Ok(())
    }
}
