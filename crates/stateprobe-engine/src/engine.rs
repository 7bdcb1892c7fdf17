//! Stateful execution: suites of scenarios of dependent steps
//!
//! Each scenario picks operations at random and feeds every response body to
//! the next step's case generation. A suite is repeated while it keeps
//! finding failures the run has not seen yet.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde_json::Value;
use stateprobe_core::{Case, EngineConfig};

use crate::checks::CheckRegistry;
use crate::context::{RunnerContext, ScenarioStatus, StepError, StepOutcome, StepStatus};
use crate::events::{EngineEvent, EventSink, Halted, RunStatus};
use crate::generation::CaseGenerator;
use crate::schema::{Operation, Schema};
use crate::targets::TargetMetric;
use crate::time::unix_now;
use crate::transport::Transport;

/// Shared cancellation flag, set from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum SuiteEnd {
    Completed,
    StopRequested,
    Interrupted,
}

pub struct StatefulEngine<'a> {
    schema: &'a Schema,
    transport: &'a dyn Transport,
    checks: &'a CheckRegistry,
    config: &'a EngineConfig,
    generator: CaseGenerator,
    context: RunnerContext,
    interrupt: Interrupt,
}

impl<'a> StatefulEngine<'a> {
    #[must_use]
    pub fn new(
        schema: &'a Schema,
        transport: &'a dyn Transport,
        checks: &'a CheckRegistry,
        config: &'a EngineConfig,
        targets: Vec<TargetMetric>,
        interrupt: Interrupt,
    ) -> Self {
        let generator = CaseGenerator::new(
            Arc::new(schema.document().clone()),
            schema.get_base_url(),
            config.seed,
        )
        .with_negative_ratio(config.negative_ratio);
        Self {
            schema,
            transport,
            checks,
            config,
            generator,
            context: RunnerContext::new(targets),
            interrupt,
        }
    }

    #[must_use]
    pub fn context(&self) -> &RunnerContext {
        &self.context
    }

    /// Drive the whole run, emitting events into `sink`.
    ///
    /// # Errors
    ///
    /// [`Halted`] when the sink stops accepting events.
    pub fn run(&mut self, sink: &mut dyn EventSink) -> Result<(), Halted> {
        let started = Instant::now();
        let started_at = unix_now();
        sink.emit(
            EngineEvent::RunStarted {
                started_at,
                timestamp: started_at,
            }
            .into(),
        )?;

        let operations = self.schema.operations();
        let mut status = RunStatus::Success;
        if operations.is_empty() {
            tracing::warn!("no operations selected");
            sink.emit(
                EngineEvent::Errored {
                    message: "No operations left after applying filters".into(),
                    timestamp: unix_now(),
                }
                .into(),
            )?;
            status = RunStatus::Error;
        }

        let mut suite = 0;
        while !operations.is_empty() && suite < self.config.max_suites {
            if self.interrupt.is_set() {
                status = RunStatus::Interrupted;
                break;
            }
            self.context.reset();
            sink.emit(
                EngineEvent::SuiteStarted {
                    suite,
                    timestamp: unix_now(),
                }
                .into(),
            )?;
            tracing::info!(suite, "suite started");

            let (end, suite_status) = self.run_suite(suite, &operations, sink)?;
            let failures = self.context.failures_for_suite().to_vec();
            let found_new = !failures.is_empty();
            self.context.mark_current_suite_as_seen_in_run();
            tracing::info!(suite, status = ?suite_status, failures = failures.len(), "suite finished");
            sink.emit(
                EngineEvent::SuiteFinished {
                    suite,
                    status: suite_status,
                    failures,
                    timestamp: unix_now(),
                }
                .into(),
            )?;
            status = status.merge(suite_status);
            suite += 1;

            match end {
                SuiteEnd::Interrupted | SuiteEnd::StopRequested => break,
                SuiteEnd::Completed if !found_new => break,
                SuiteEnd::Completed => {}
            }
        }

        let running_time = started.elapsed().as_secs_f64();
        tracing::info!(
            status = ?status,
            failures = self.context.failures_count(),
            scenarios = self.context.completed_scenarios(),
            "run finished"
        );
        sink.emit(
            EngineEvent::RunFinished {
                status,
                failures_count: self.context.failures_count(),
                completed_scenarios: self.context.completed_scenarios(),
                running_time,
                timestamp: unix_now(),
            }
            .into(),
        )
    }

    fn run_suite(
        &mut self,
        suite: usize,
        operations: &[Arc<Operation>],
        sink: &mut dyn EventSink,
    ) -> Result<(SuiteEnd, RunStatus), Halted> {
        let mut status = RunStatus::Success;
        for scenario in 0..self.config.scenarios_per_suite {
            if self.interrupt.is_set() {
                return Ok((SuiteEnd::Interrupted, status.merge(RunStatus::Interrupted)));
            }
            sink.emit(
                EngineEvent::ScenarioStarted {
                    suite,
                    scenario,
                    timestamp: unix_now(),
                }
                .into(),
            )?;

            let steps = self.run_scenario(suite, scenario, operations, sink)?;

            let scenario_status = self.context.current_scenario_status();
            self.context.maximize_metrics(&mut self.generator);
            sink.emit(
                EngineEvent::ScenarioFinished {
                    suite,
                    scenario,
                    status: scenario_status,
                    steps,
                    timestamp: unix_now(),
                }
                .into(),
            )?;
            self.context.reset_scenario();
            status = status.merge(scenario_status.into());

            match scenario_status {
                ScenarioStatus::Interrupted => return Ok((SuiteEnd::Interrupted, status)),
                ScenarioStatus::Failure if self.config.stop_on_failure => {
                    return Ok((SuiteEnd::StopRequested, status));
                }
                _ => {}
            }
        }
        Ok((SuiteEnd::Completed, status))
    }

    /// Returns the number of steps that ran.
    fn run_scenario(
        &mut self,
        suite: usize,
        scenario: usize,
        operations: &[Arc<Operation>],
        sink: &mut dyn EventSink,
    ) -> Result<usize, Halted> {
        let mut previous: Option<Value> = None;
        let mut steps = 0;
        let length = if self.config.max_steps == 0 {
            0
        } else {
            1 + self.generator.choose_index(self.config.max_steps)
        };
        for step in 0..length {
            if self.interrupt.is_set() {
                self.context.step_interrupted();
                break;
            }
            let operation = &operations[self.generator.choose_index(operations.len())];
            let case = match self.generator.generate(operation, previous.as_ref()) {
                Ok(case) => case,
                Err(e) => {
                    tracing::warn!(operation = %operation.label(), error = %e, "case rejected");
                    continue;
                }
            };

            self.context.reset_step();
            sink.emit(
                EngineEvent::StepStarted {
                    suite,
                    scenario,
                    step,
                    operation: operation.label(),
                    timestamp: unix_now(),
                }
                .into(),
            )?;
            steps += 1;

            let memoized = match self.context.get_step_outcome(&case) {
                StepOutcome::NotFound => None,
                StepOutcome::Succeeded => Some(None),
                StepOutcome::Failed(error) => Some(Some(error.clone())),
            };
            let finished = match memoized {
                None => self.execute_step(operation, case, &mut previous),
                Some(error) => self.replay_step(error, case),
            };
            let status = finished.status;
            sink.emit(
                EngineEvent::StepFinished {
                    suite,
                    scenario,
                    step,
                    status,
                    target: operation.label(),
                    case: finished.case,
                    request: finished.request,
                    response: finished.response,
                    checks: finished.checks,
                    error: finished.error,
                    timestamp: unix_now(),
                }
                .into(),
            )?;
            tracing::debug!(suite, scenario, step, operation = %operation.label(), status = ?status, "step finished");

            if status != StepStatus::Success {
                break;
            }
        }
        Ok(steps)
    }

    /// Report a memoized outcome without sending the case again.
    fn replay_step(&mut self, memoized: Option<StepError>, case: Case) -> FinishedStep {
        let (status, error) = match memoized {
            Some(StepError::ChecksFailed { .. }) => (StepStatus::Failure, None),
            Some(error) => (StepStatus::Error, Some(error.to_string())),
            None => (StepStatus::Success, None),
        };
        tracing::debug!(case = %case.fingerprint(), "identical case already executed in this scenario");
        match status {
            StepStatus::Failure => self.context.step_failed(),
            StepStatus::Error => self.context.step_errored(),
            _ => self.context.step_succeeded(),
        }
        FinishedStep {
            status,
            case: Arc::new(case),
            request: None,
            response: None,
            checks: Vec::new(),
            error,
        }
    }

    fn execute_step(
        &mut self,
        operation: &Operation,
        case: Case,
        previous: &mut Option<Value>,
    ) -> FinishedStep {
        let (request, response) = match self.transport.send(&case) {
            Ok(exchange) => exchange,
            Err(e) => {
                let error = StepError::Transport(e.to_string());
                tracing::warn!(operation = %operation.label(), error = %e, "request failed");
                self.context.step_errored();
                self.context.store_step_outcome(&case, Some(error.clone()));
                return FinishedStep {
                    status: StepStatus::Error,
                    case: Arc::new(case),
                    request: None,
                    response: None,
                    checks: Vec::new(),
                    error: Some(error.to_string()),
                };
            }
        };

        let case = Arc::new(case);
        let request = Arc::new(request);
        let response = Arc::new(response);
        self.context.set_current_response(Arc::clone(&response));
        self.context.collect_metric(&case, &response);

        let results = self.checks.run(&case, &request, &response, operation);
        let mut failed = 0;
        for check in &results.checks {
            self.context.record_check(check.clone());
            if check.failure.is_some() {
                failed += 1;
                self.context.record_failure(check.clone());
            }
        }

        let outcome = if let Some((name, message)) = results.errors.first() {
            Some(StepError::CheckErrored {
                name: name.clone(),
                message: message.clone(),
            })
        } else if failed > 0 {
            Some(StepError::ChecksFailed { count: failed })
        } else {
            None
        };
        let status = match &outcome {
            None => {
                self.context.step_succeeded();
                StepStatus::Success
            }
            Some(StepError::ChecksFailed { .. }) => {
                self.context.step_failed();
                StepStatus::Failure
            }
            Some(_) => {
                self.context.step_errored();
                StepStatus::Error
            }
        };
        self.context.store_step_outcome(&case, outcome.clone());
        *previous = response.json();

        FinishedStep {
            status,
            case,
            request: Some(request),
            response: Some(response),
            checks: results.checks,
            error: match outcome {
                Some(error @ StepError::CheckErrored { .. }) => Some(error.to_string()),
                _ => None,
            },
        }
    }
}

struct FinishedStep {
    status: StepStatus,
    case: Arc<Case>,
    request: Option<Arc<stateprobe_core::Request>>,
    response: Option<Arc<stateprobe_core::Response>>,
    checks: Vec<stateprobe_core::Check>,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_is_shared_between_clones() {
        let interrupt = Interrupt::new();
        let handle = interrupt.clone();
        assert!(!interrupt.is_set());
        handle.trigger();
        assert!(interrupt.is_set());
    }
}
