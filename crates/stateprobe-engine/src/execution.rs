//! Run-wide state seen by handlers
//!
//! The dispatch loop feeds every event to [`ExecutionContext::on_event`]
//! before any handler sees it; handlers only read.

use stateprobe_core::Check;

use crate::context::{ScenarioStatus, StepStatus};
use crate::events::{EngineEvent, Event, RunStatus};
use crate::schema::ApiStatistic;

/// Scenario counts by final status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScenarioCounts {
    pub success: usize,
    pub failure: usize,
    pub error: usize,
    pub rejected: usize,
    pub interrupted: usize,
}

impl ScenarioCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.success + self.failure + self.error + self.rejected + self.interrupted
    }

    fn record(&mut self, status: ScenarioStatus) {
        match status {
            ScenarioStatus::Success => self.success += 1,
            ScenarioStatus::Failure => self.failure += 1,
            ScenarioStatus::Error => self.error += 1,
            ScenarioStatus::Rejected => self.rejected += 1,
            ScenarioStatus::Interrupted => self.interrupted += 1,
        }
    }
}

/// What the schema loading phase reported
#[derive(Debug, Clone)]
pub struct LoadingInfo {
    pub location: String,
    pub base_url: String,
    pub specification: String,
    pub statistic: ApiStatistic,
    pub duration: f64,
}

#[derive(Debug, Default)]
pub struct ExecutionContext {
    pub location: Option<String>,
    pub loading: Option<LoadingInfo>,
    pub scenarios: ScenarioCounts,
    pub steps: usize,
    pub checks_total: usize,
    pub checks_failed: usize,
    /// Unique failures, in the order suites reported them
    pub failures: Vec<Check>,
    pub errors: Vec<String>,
    pub fatal_error: Option<String>,
    pub interrupted: bool,
    pub run_status: Option<RunStatus>,
    pub failures_count: usize,
    pub completed_scenarios: usize,
    pub running_time: f64,
}

impl ExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, event: &Event) {
        match event {
            Event::LoadingStarted { location, .. } => self.location = Some(location.clone()),
            Event::LoadingFinished {
                location,
                duration,
                base_url,
                specification,
                statistic,
                ..
            } => {
                self.loading = Some(LoadingInfo {
                    location: location.clone(),
                    base_url: base_url.clone(),
                    specification: specification.to_string(),
                    statistic: *statistic,
                    duration: *duration,
                });
            }
            Event::FatalError { exception, .. } => self.fatal_error = Some(exception.clone()),
            Event::Interrupted { .. } => self.interrupted = true,
            Event::Engine(event) => self.on_engine_event(event),
        }
    }

    fn on_engine_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::StepFinished {
                status,
                checks,
                error,
                ..
            } => {
                self.steps += 1;
                self.checks_total += checks.len();
                self.checks_failed += checks.iter().filter(|c| c.failure.is_some()).count();
                if *status == StepStatus::Error {
                    if let Some(error) = error {
                        self.errors.push(error.clone());
                    }
                }
            }
            EngineEvent::ScenarioFinished { status, .. } => self.scenarios.record(*status),
            EngineEvent::SuiteFinished { failures, .. } => {
                self.failures.extend(failures.iter().cloned());
            }
            EngineEvent::RunFinished {
                status,
                failures_count,
                completed_scenarios,
                running_time,
                ..
            } => {
                self.run_status = Some(*status);
                self.failures_count = *failures_count;
                self.completed_scenarios = *completed_scenarios;
                self.running_time = *running_time;
            }
            EngineEvent::Errored { message, .. } => self.errors.push(message.clone()),
            EngineEvent::RunStarted { .. }
            | EngineEvent::SuiteStarted { .. }
            | EngineEvent::ScenarioStarted { .. }
            | EngineEvent::StepStarted { .. } => {}
        }
    }

    #[must_use]
    pub fn has_problems(&self) -> bool {
        !self.failures.is_empty()
            || self.failures_count > 0
            || !self.errors.is_empty()
            || self.fatal_error.is_some()
            || self.interrupted
            || matches!(
                self.run_status,
                Some(RunStatus::Failure | RunStatus::Error | RunStatus::Interrupted)
            )
    }

    /// 0 when every check passed, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_problems())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Phase;

    fn run_finished(status: RunStatus, failures_count: usize) -> Event {
        EngineEvent::RunFinished {
            status,
            failures_count,
            completed_scenarios: 3,
            running_time: 0.25,
            timestamp: 0.0,
        }
        .into()
    }

    #[test]
    fn clean_run_exits_zero() {
        let mut ctx = ExecutionContext::new();
        ctx.on_event(&Event::loading_started("openapi.json"));
        ctx.on_event(&run_finished(RunStatus::Success, 0));
        assert_eq!(ctx.location.as_deref(), Some("openapi.json"));
        assert_eq!(ctx.completed_scenarios, 3);
        assert_eq!(ctx.exit_code(), 0);
    }

    #[test]
    fn failures_exit_non_zero() {
        let mut ctx = ExecutionContext::new();
        ctx.on_event(&run_finished(RunStatus::Failure, 2));
        assert_eq!(ctx.exit_code(), 1);
    }

    #[test]
    fn fatal_and_interrupted_exit_non_zero() {
        let mut fatal = ExecutionContext::new();
        fatal.on_event(&Event::fatal_error("unreachable"));
        assert_eq!(fatal.exit_code(), 1);

        let mut interrupted = ExecutionContext::new();
        interrupted.on_event(&Event::interrupted(Some(Phase::Stateful)));
        assert!(interrupted.interrupted);
        assert_eq!(interrupted.exit_code(), 1);
    }

    #[test]
    fn scenario_statuses_are_counted() {
        let mut ctx = ExecutionContext::new();
        for status in [
            ScenarioStatus::Success,
            ScenarioStatus::Success,
            ScenarioStatus::Rejected,
            ScenarioStatus::Error,
        ] {
            ctx.on_event(
                &EngineEvent::ScenarioFinished {
                    suite: 0,
                    scenario: 0,
                    status,
                    steps: 1,
                    timestamp: 0.0,
                }
                .into(),
            );
        }
        assert_eq!(ctx.scenarios.success, 2);
        assert_eq!(ctx.scenarios.rejected, 1);
        assert_eq!(ctx.scenarios.error, 1);
        assert_eq!(ctx.scenarios.total(), 4);
    }

    #[test]
    fn engine_errors_are_kept() {
        let mut ctx = ExecutionContext::new();
        ctx.on_event(
            &EngineEvent::Errored {
                message: "No operations".into(),
                timestamp: 0.0,
            }
            .into(),
        );
        assert_eq!(ctx.errors, ["No operations"]);
        assert_eq!(ctx.exit_code(), 1);
    }
}
