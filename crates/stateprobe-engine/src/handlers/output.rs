//! Console output: progress characters and the final summary

use std::io::Write;

use stateprobe_core::sanitize::sanitized_code_sample;
use stateprobe_core::{Check, OutputConfig, group_failures_by_code_sample};

use super::{EventHandler, HandlerError};
use crate::context::ScenarioStatus;
use crate::events::{EngineEvent, Event, Phase};
use crate::execution::ExecutionContext;

pub struct OutputHandler<W: Write> {
    out: W,
    config: OutputConfig,
    /// Characters printed on the current progress line
    progress: usize,
    terminal_reported: bool,
    summary_printed: bool,
}

impl<W: Write> OutputHandler<W> {
    pub fn new(out: W, config: OutputConfig) -> Self {
        Self {
            out,
            config,
            progress: 0,
            terminal_reported: false,
            summary_printed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn end_progress_line(&mut self) -> std::io::Result<()> {
        if self.progress > 0 {
            writeln!(self.out)?;
            self.progress = 0;
        }
        Ok(())
    }

    fn write_summary(&mut self, ctx: &ExecutionContext) -> std::io::Result<()> {
        self.summary_printed = true;
        self.end_progress_line()?;

        let groups: Vec<(&str, Vec<&Check>)> = group_failures_by_code_sample(&ctx.failures).collect();
        if !groups.is_empty() {
            writeln!(self.out, "\nFAILURES:")?;
            for (sample, checks) in &groups {
                self.write_group(sample, checks)?;
            }
        }

        if !ctx.errors.is_empty() {
            writeln!(self.out, "\nERRORS:")?;
            for (i, error) in ctx.errors.iter().enumerate() {
                writeln!(self.out, "  {}. {error}", i + 1)?;
            }
        }

        let scenarios = &ctx.scenarios;
        writeln!(self.out, "\nSUMMARY:")?;
        writeln!(
            self.out,
            "  Scenarios: {} ({} passed, {} failed, {} errored, {} rejected)",
            scenarios.total(),
            scenarios.success,
            scenarios.failure,
            scenarios.error,
            scenarios.rejected,
        )?;
        writeln!(self.out, "  Steps:     {}", ctx.steps)?;
        writeln!(
            self.out,
            "  Checks:    {} ({} failed)",
            ctx.checks_total, ctx.checks_failed
        )?;
        writeln!(
            self.out,
            "  Failures:  {} unique, {} total",
            groups.iter().map(|(_, checks)| checks.len()).sum::<usize>(),
            ctx.failures_count
        )?;
        if let Some(status) = ctx.run_status {
            writeln!(self.out, "  Status:    {status:?}")?;
        }
        writeln!(self.out, "  Time:      {:.2}s", ctx.running_time)?;
        self.out.flush()
    }

    fn write_group(&mut self, sample: &str, checks: &[&Check]) -> std::io::Result<()> {
        let Some(first) = checks.first() else {
            return Ok(());
        };
        writeln!(self.out, "\n__ {} __", first.case.operation().label())?;
        for (i, check) in checks.iter().enumerate() {
            if let Some(failure) = &check.failure {
                writeln!(self.out, "\n{}. {}", i + 1, failure.title)?;
                for line in failure.message.lines() {
                    writeln!(self.out, "    {line}")?;
                }
            }
        }

        let response = &first.response;
        writeln!(
            self.out,
            "\n[{}] {}:",
            response.status_code, response.message
        )?;
        if response.content.is_empty() {
            writeln!(self.out, "\n    <EMPTY>")?;
        } else {
            let body = truncate(&response.text(), self.config.truncate_body);
            writeln!(self.out, "\n    `{body}`")?;
        }

        let sample = if self.config.sanitize {
            sanitized_code_sample(first)
        } else {
            sample.to_string()
        };
        writeln!(self.out, "\nReproduce with:\n\n    {sample}")
    }
}

/// First `limit` characters of `text`; 0 keeps everything.
fn truncate(text: &str, limit: usize) -> String {
    if limit == 0 || text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str(" ...");
    out
}

fn status_char(status: ScenarioStatus) -> char {
    match status {
        ScenarioStatus::Success => '.',
        ScenarioStatus::Failure => 'F',
        ScenarioStatus::Error => 'E',
        ScenarioStatus::Rejected => 'S',
        ScenarioStatus::Interrupted => '!',
    }
}

impl<W: Write> EventHandler for OutputHandler<W> {
    fn name(&self) -> &str {
        "output"
    }

    fn handle_event(&mut self, ctx: &ExecutionContext, event: &Event) -> Result<(), HandlerError> {
        match event {
            Event::LoadingStarted { location, .. } => {
                writeln!(self.out, "Loading schema: {location}")?;
            }
            Event::LoadingFinished {
                base_url,
                specification,
                statistic,
                duration,
                ..
            } => {
                writeln!(self.out, "  Base URL:      {base_url}")?;
                writeln!(self.out, "  Specification: {specification}")?;
                writeln!(
                    self.out,
                    "  Operations:    {} selected / {} total",
                    statistic.operations_selected, statistic.operations_total
                )?;
                writeln!(self.out, "  Loaded in {duration:.2}s\n")?;
            }
            Event::FatalError { exception, .. } => {
                if !self.terminal_reported {
                    self.terminal_reported = true;
                    self.end_progress_line()?;
                    writeln!(self.out, "\nError: {exception}")?;
                }
            }
            Event::Interrupted { phase, .. } => {
                if !self.terminal_reported {
                    self.terminal_reported = true;
                    self.end_progress_line()?;
                    match phase {
                        Some(Phase::Stateful) => writeln!(self.out, "\nInterrupted during stateful testing")?,
                        None => writeln!(self.out, "\nInterrupted")?,
                    }
                }
            }
            Event::Engine(EngineEvent::RunStarted { .. }) => {
                writeln!(self.out, "Stateful tests")?;
            }
            Event::Engine(EngineEvent::ScenarioFinished { status, .. }) => {
                write!(self.out, "{}", status_char(*status))?;
                self.progress += 1;
                if self.progress >= 80 {
                    self.end_progress_line()?;
                }
            }
            Event::Engine(EngineEvent::Errored { message, .. }) => {
                self.end_progress_line()?;
                writeln!(self.out, "Error: {message}")?;
            }
            Event::Engine(EngineEvent::RunFinished { .. }) => self.write_summary(ctx)?,
            Event::Engine(_) => {}
        }
        self.out.flush()?;
        Ok(())
    }

    fn shutdown(&mut self, ctx: &ExecutionContext) -> Result<(), HandlerError> {
        // Early termination after loading still gets the counters
        if !self.summary_printed && ctx.loading.is_some() {
            self.write_summary(ctx)?;
        }
        self.out.flush()?;
        Ok(())
    }
}
