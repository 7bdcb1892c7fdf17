//! Runner state for one stateful run
//!
//! A run is made of suites, a suite of scenarios, a scenario of steps. The
//! context tracks step and scenario status, deduplicates failures per suite
//! and per run, and memoizes step outcomes so an identical case is executed at
//! most once per scenario.
//!
//! Not synchronized: exactly one flow of control drives a context.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use stateprobe_core::{Case, CaseFingerprint, Check, Failure, Response};

use crate::targets::{MetricCollector, TargetFeedback, TargetMetric};

/// Terminal status of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Error,
    Interrupted,
}

/// Status of a scenario, derived from its last step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Success,
    Failure,
    Error,
    Interrupted,
    /// No step reached a conclusion
    Rejected,
}

impl From<Option<StepStatus>> for ScenarioStatus {
    fn from(status: Option<StepStatus>) -> Self {
        match status {
            Some(StepStatus::Success) => Self::Success,
            Some(StepStatus::Failure) => Self::Failure,
            Some(StepStatus::Error) => Self::Error,
            Some(StepStatus::Interrupted) => Self::Interrupted,
            None => Self::Rejected,
        }
    }
}

/// Why a step did not succeed. Kept to replay an identical case.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("{count} check(s) failed")]
    ChecksFailed { count: usize },
    #[error("{0}")]
    Transport(String),
    #[error("Check `{name}` errored: {message}")]
    CheckErrored { name: String, message: String },
}

/// Result of looking up a memoized step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome<'a> {
    /// The case was not executed in this scenario
    NotFound,
    Succeeded,
    Failed(&'a StepError),
}

#[derive(Debug, Default)]
pub struct RunnerContext {
    seen_in_run: HashSet<Failure>,
    seen_in_suite: HashSet<Failure>,
    failures_for_suite: Vec<Check>,
    checks_for_step: Vec<Check>,
    current_step_status: Option<StepStatus>,
    current_response: Option<Arc<Response>>,
    failures_count: usize,
    completed_scenarios: usize,
    metric_collector: MetricCollector,
    /// Collisions between distinct cases are possible and not detected
    step_outcomes: HashMap<CaseFingerprint, Option<StepError>>,
}

impl RunnerContext {
    #[must_use]
    pub fn new(targets: Vec<TargetMetric>) -> Self {
        Self {
            metric_collector: MetricCollector::new(targets),
            ..Self::default()
        }
    }

    // ── Step status ──

    pub fn step_succeeded(&mut self) {
        self.current_step_status = Some(StepStatus::Success);
    }

    pub fn step_failed(&mut self) {
        self.current_step_status = Some(StepStatus::Failure);
    }

    pub fn step_errored(&mut self) {
        self.current_step_status = Some(StepStatus::Error);
    }

    pub fn step_interrupted(&mut self) {
        self.current_step_status = Some(StepStatus::Interrupted);
    }

    #[must_use]
    pub fn current_step_status(&self) -> Option<StepStatus> {
        self.current_step_status
    }

    #[must_use]
    pub fn current_scenario_status(&self) -> ScenarioStatus {
        self.current_step_status.into()
    }

    // ── Boundaries ──

    /// Start of every step.
    pub fn reset_step(&mut self) {
        self.checks_for_step.clear();
    }

    /// End of every scenario, whatever its status.
    pub fn reset_scenario(&mut self) {
        self.completed_scenarios += 1;
        self.current_step_status = None;
        self.current_response = None;
        self.step_outcomes.clear();
    }

    /// Start of every suite. Clears suite state and runs a full
    /// [`reset_scenario`](Self::reset_scenario), so `completed_scenarios`
    /// also counts one per suite boundary. `failures_count` is kept.
    pub fn reset(&mut self) {
        self.failures_for_suite.clear();
        self.seen_in_suite.clear();
        self.reset_scenario();
        self.metric_collector.reset();
    }

    // ── Failure accounting ──

    #[must_use]
    pub fn is_seen_in_run(&self, failure: &Failure) -> bool {
        self.seen_in_run.contains(failure)
    }

    #[must_use]
    pub fn is_seen_in_suite(&self, failure: &Failure) -> bool {
        self.seen_in_suite.contains(failure)
    }

    pub fn mark_as_seen_in_run(&mut self, failure: Failure) {
        self.seen_in_run.insert(failure);
    }

    pub fn mark_as_seen_in_suite(&mut self, failure: Failure) {
        self.seen_in_suite.insert(failure);
    }

    /// End of every suite.
    pub fn mark_current_suite_as_seen_in_run(&mut self) {
        self.seen_in_run.extend(self.seen_in_suite.iter().cloned());
    }

    /// Append to the suite's failures. Counts every call.
    pub fn add_failed_check(&mut self, check: Check) {
        self.failures_for_suite.push(check);
        self.failures_count += 1;
    }

    /// Count a failed check and keep it if its failure is new to both the
    /// suite and the run. Returns whether it was kept.
    pub fn record_failure(&mut self, check: Check) -> bool {
        let Some(failure) = &check.failure else {
            return false;
        };
        if self.is_seen_in_suite(failure) || self.is_seen_in_run(failure) {
            self.failures_count += 1;
            return false;
        }
        self.mark_as_seen_in_suite(failure.clone());
        self.add_failed_check(check);
        true
    }

    pub fn record_check(&mut self, check: Check) {
        self.checks_for_step.push(check);
    }

    #[must_use]
    pub fn checks_for_step(&self) -> &[Check] {
        &self.checks_for_step
    }

    #[must_use]
    pub fn failures_for_suite(&self) -> &[Check] {
        &self.failures_for_suite
    }

    #[must_use]
    pub fn failures_count(&self) -> usize {
        self.failures_count
    }

    #[must_use]
    pub fn completed_scenarios(&self) -> usize {
        self.completed_scenarios
    }

    // ── Responses and metrics ──

    pub fn set_current_response(&mut self, response: Arc<Response>) {
        self.current_response = Some(response);
    }

    #[must_use]
    pub fn current_response(&self) -> Option<&Arc<Response>> {
        self.current_response.as_ref()
    }

    pub fn collect_metric(&mut self, case: &Arc<Case>, response: &Response) {
        self.metric_collector.store(case, response);
    }

    pub fn maximize_metrics(&self, feedback: &mut dyn TargetFeedback) {
        self.metric_collector.maximize(feedback);
    }

    #[must_use]
    pub fn metric_collector(&self) -> &MetricCollector {
        &self.metric_collector
    }

    // ── Step memoization ──

    /// `None` records a success.
    pub fn store_step_outcome(&mut self, case: &Case, outcome: Option<StepError>) {
        self.step_outcomes.insert(case.fingerprint(), outcome);
    }

    #[must_use]
    pub fn get_step_outcome(&self, case: &Case) -> StepOutcome<'_> {
        match self.step_outcomes.get(&case.fingerprint()) {
            None => StepOutcome::NotFound,
            Some(None) => StepOutcome::Succeeded,
            Some(Some(error)) => StepOutcome::Failed(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stateprobe_core::{Headers, OperationRef, Request, Status};
    use std::time::Duration;

    fn case(value: i64) -> Case {
        let mut case = Case::new("c", Arc::new(OperationRef::new("GET", "/items", "http://x")));
        case.query.insert("v".into(), json!(value));
        case
    }

    fn failed_check(message: &str) -> Check {
        let response = Response {
            status_code: 500,
            message: String::new(),
            headers: Headers::new(),
            content: Vec::new(),
            http_version: "HTTP/1.1".into(),
            elapsed: Duration::ZERO,
            verify: true,
        };
        let request = Request {
            method: "GET".into(),
            uri: "http://x/items".into(),
            headers: Headers::new(),
            body: None,
        };
        Check::new(
            "not_a_server_error",
            Status::Failure,
            Arc::new(request),
            Arc::new(response),
            Arc::new(case(1)),
            Some(Failure::new(
                "GET /items",
                stateprobe_core::FailureKind::Custom,
                "t",
                message,
            )),
        )
    }

    #[test]
    fn reset_scenario_makes_status_rejected() {
        let mut ctx = RunnerContext::default();
        ctx.step_failed();
        ctx.reset_scenario();
        assert_eq!(ctx.current_scenario_status(), ScenarioStatus::Rejected);
        assert_eq!(ctx.completed_scenarios(), 1);
    }

    #[test]
    fn scenario_status_follows_last_step() {
        let mut ctx = RunnerContext::default();
        ctx.step_succeeded();
        assert_eq!(ctx.current_scenario_status(), ScenarioStatus::Success);
        ctx.step_errored();
        assert_eq!(ctx.current_scenario_status(), ScenarioStatus::Error);
        ctx.step_interrupted();
        assert_eq!(ctx.current_scenario_status(), ScenarioStatus::Interrupted);
        ctx.step_failed();
        assert_eq!(ctx.current_scenario_status(), ScenarioStatus::Failure);
    }

    #[test]
    fn add_failed_check_counts_duplicates() {
        let mut ctx = RunnerContext::default();
        for _ in 0..4 {
            ctx.add_failed_check(failed_check("same"));
        }
        assert_eq!(ctx.failures_count(), 4);
        assert_eq!(ctx.failures_for_suite().len(), 4);
    }

    #[test]
    fn suite_reset_completes_the_open_scenario() {
        let mut ctx = RunnerContext::default();
        ctx.reset_scenario();
        let before = ctx.completed_scenarios();
        ctx.step_errored();
        ctx.store_step_outcome(&case(1), None);
        ctx.reset();
        assert_eq!(ctx.completed_scenarios(), before + 1);
        assert_eq!(ctx.current_scenario_status(), ScenarioStatus::Rejected);
        assert_eq!(ctx.get_step_outcome(&case(1)), StepOutcome::NotFound);
    }

    #[test]
    fn failures_seen_in_run_are_not_kept_again() {
        let mut ctx = RunnerContext::default();
        let failure = failed_check("a").failure.unwrap();
        ctx.mark_as_seen_in_run(failure.clone());
        assert!(ctx.is_seen_in_run(&failure));
        assert!(!ctx.is_seen_in_suite(&failure));
        assert!(!ctx.record_failure(failed_check("a")));
        assert!(ctx.failures_for_suite().is_empty());
        assert_eq!(ctx.failures_count(), 1);
    }

    #[test]
    fn run_scope_survives_suite_reset() {
        let mut ctx = RunnerContext::default();
        let failure = failed_check("a").failure.unwrap();
        ctx.mark_as_seen_in_suite(failure.clone());
        ctx.mark_current_suite_as_seen_in_run();
        ctx.reset();
        assert!(ctx.is_seen_in_run(&failure));
        assert!(!ctx.is_seen_in_suite(&failure));
    }

    #[test]
    fn record_failure_suppresses_duplicates() {
        let mut ctx = RunnerContext::default();
        assert!(ctx.record_failure(failed_check("a")));
        assert!(ctx.record_failure(failed_check("b")));
        assert!(!ctx.record_failure(failed_check("a")));
        assert_eq!(ctx.failures_for_suite().len(), 2);
        assert_eq!(ctx.failures_count(), 3);

        // A later suite does not report it again
        ctx.mark_current_suite_as_seen_in_run();
        ctx.reset();
        assert!(!ctx.record_failure(failed_check("a")));
        assert!(ctx.failures_for_suite().is_empty());
        assert_eq!(ctx.failures_count(), 4);
    }

    #[test]
    fn step_outcome_sentinels() {
        let mut ctx = RunnerContext::default();
        ctx.store_step_outcome(&case(1), None);
        ctx.store_step_outcome(&case(2), Some(StepError::Transport("refused".into())));
        assert_eq!(ctx.get_step_outcome(&case(1)), StepOutcome::Succeeded);
        assert_eq!(
            ctx.get_step_outcome(&case(2)),
            StepOutcome::Failed(&StepError::Transport("refused".into()))
        );
        assert_eq!(ctx.get_step_outcome(&case(3)), StepOutcome::NotFound);

        // Scenario-scoped
        ctx.reset_scenario();
        assert_eq!(ctx.get_step_outcome(&case(1)), StepOutcome::NotFound);
    }

    #[test]
    fn step_outcome_ignores_case_id() {
        let mut ctx = RunnerContext::default();
        let mut replay = case(1);
        replay.id = "other".into();
        ctx.store_step_outcome(&case(1), None);
        assert_eq!(ctx.get_step_outcome(&replay), StepOutcome::Succeeded);
    }

    #[test]
    fn reset_step_clears_checks_only() {
        let mut ctx = RunnerContext::default();
        ctx.step_succeeded();
        ctx.record_check(failed_check("a"));
        ctx.reset_step();
        assert!(ctx.checks_for_step().is_empty());
        assert_eq!(ctx.current_step_status(), Some(StepStatus::Success));
    }

    #[test]
    fn suite_reset_keeps_counters() {
        let mut ctx = RunnerContext::new(vec![TargetMetric::ResponseSize]);
        ctx.record_failure(failed_check("a"));
        ctx.reset_scenario();
        ctx.collect_metric(&Arc::new(case(1)), &failed_check("a").response);
        ctx.reset();
        assert_eq!(ctx.failures_count(), 1);
        assert_eq!(ctx.completed_scenarios(), 2);
        assert!(ctx.failures_for_suite().is_empty());
        assert!(ctx.metric_collector().is_empty());
        assert!(ctx.current_response().is_none());
    }
}
