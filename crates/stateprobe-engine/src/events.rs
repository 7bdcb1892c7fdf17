//! Events emitted during a run
//!
//! Every event serializes to an externally tagged JSON object:
//! `{"SuiteFinished": {"suite": 0, ...}}`.

use std::sync::Arc;
use std::sync::mpsc::SyncSender;

use serde::{Serialize, Serializer};
use stateprobe_core::{
    Case, Check, Request, Response, SerializedCase, SerializedRequest, SerializedResponse,
};

use crate::context::{ScenarioStatus, StepStatus};
use crate::schema::{ApiStatistic, Specification};
use crate::time::unix_now;

/// Phase of the run an interruption happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Stateful,
}

/// Overall status of a suite or the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Error,
    Interrupted,
}

impl RunStatus {
    /// The more severe of two statuses.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if other.severity() > self.severity() { other } else { self }
    }

    fn severity(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Error => 2,
            Self::Interrupted => 3,
        }
    }
}

impl From<ScenarioStatus> for RunStatus {
    fn from(status: ScenarioStatus) -> Self {
        match status {
            ScenarioStatus::Success | ScenarioStatus::Rejected => Self::Success,
            ScenarioStatus::Failure => Self::Failure,
            ScenarioStatus::Error => Self::Error,
            ScenarioStatus::Interrupted => Self::Interrupted,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum Event {
    LoadingStarted {
        location: String,
        timestamp: f64,
    },
    LoadingFinished {
        location: String,
        start_time: f64,
        duration: f64,
        base_url: String,
        specification: Specification,
        statistic: ApiStatistic,
        timestamp: f64,
    },
    FatalError {
        exception: String,
        timestamp: f64,
    },
    Interrupted {
        phase: Option<Phase>,
        timestamp: f64,
    },
    #[serde(untagged)]
    Engine(EngineEvent),
}

#[derive(Debug, Clone, Serialize)]
pub enum EngineEvent {
    RunStarted {
        started_at: f64,
        timestamp: f64,
    },
    SuiteStarted {
        suite: usize,
        timestamp: f64,
    },
    ScenarioStarted {
        suite: usize,
        scenario: usize,
        timestamp: f64,
    },
    StepStarted {
        suite: usize,
        scenario: usize,
        step: usize,
        operation: String,
        timestamp: f64,
    },
    StepFinished {
        suite: usize,
        scenario: usize,
        step: usize,
        status: StepStatus,
        /// Operation label
        target: String,
        #[serde(serialize_with = "serialize_case")]
        case: Arc<Case>,
        #[serde(serialize_with = "serialize_request")]
        request: Option<Arc<Request>>,
        #[serde(serialize_with = "serialize_response")]
        response: Option<Arc<Response>>,
        #[serde(serialize_with = "serialize_checks")]
        checks: Vec<Check>,
        error: Option<String>,
        timestamp: f64,
    },
    ScenarioFinished {
        suite: usize,
        scenario: usize,
        status: ScenarioStatus,
        steps: usize,
        timestamp: f64,
    },
    SuiteFinished {
        suite: usize,
        status: RunStatus,
        /// Unique failures first seen in this suite
        #[serde(serialize_with = "serialize_checks")]
        failures: Vec<Check>,
        timestamp: f64,
    },
    RunFinished {
        status: RunStatus,
        failures_count: usize,
        completed_scenarios: usize,
        running_time: f64,
        timestamp: f64,
    },
    Errored {
        message: String,
        timestamp: f64,
    },
}

impl Event {
    #[must_use]
    pub fn loading_started(location: impl Into<String>) -> Self {
        Self::LoadingStarted {
            location: location.into(),
            timestamp: unix_now(),
        }
    }

    #[must_use]
    pub fn fatal_error(exception: impl Into<String>) -> Self {
        Self::FatalError {
            exception: exception.into(),
            timestamp: unix_now(),
        }
    }

    #[must_use]
    pub fn interrupted(phase: Option<Phase>) -> Self {
        Self::Interrupted {
            phase,
            timestamp: unix_now(),
        }
    }

    /// Events that end the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FatalError { .. }
                | Self::Interrupted { .. }
                | Self::Engine(EngineEvent::RunFinished { .. })
        )
    }

    /// Variant name, for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoadingStarted { .. } => "LoadingStarted",
            Self::LoadingFinished { .. } => "LoadingFinished",
            Self::FatalError { .. } => "FatalError",
            Self::Interrupted { .. } => "Interrupted",
            Self::Engine(event) => match event {
                EngineEvent::RunStarted { .. } => "RunStarted",
                EngineEvent::SuiteStarted { .. } => "SuiteStarted",
                EngineEvent::ScenarioStarted { .. } => "ScenarioStarted",
                EngineEvent::StepStarted { .. } => "StepStarted",
                EngineEvent::StepFinished { .. } => "StepFinished",
                EngineEvent::ScenarioFinished { .. } => "ScenarioFinished",
                EngineEvent::SuiteFinished { .. } => "SuiteFinished",
                EngineEvent::RunFinished { .. } => "RunFinished",
                EngineEvent::Errored { .. } => "Errored",
            },
        }
    }

    /// # Errors
    ///
    /// Returns the serializer error; events hold only JSON-safe data.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<EngineEvent> for Event {
    fn from(event: EngineEvent) -> Self {
        Self::Engine(event)
    }
}

fn serialize_case<S: Serializer>(case: &Arc<Case>, serializer: S) -> Result<S::Ok, S::Error> {
    SerializedCase::from_case(case).serialize(serializer)
}

fn serialize_request<S: Serializer>(
    request: &Option<Arc<Request>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    request
        .as_deref()
        .map(SerializedRequest::from_request)
        .serialize(serializer)
}

fn serialize_response<S: Serializer>(
    response: &Option<Arc<Response>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    response
        .as_deref()
        .map(SerializedResponse::from_response)
        .serialize(serializer)
}

#[allow(clippy::ptr_arg)]
fn serialize_checks<S: Serializer>(checks: &Vec<Check>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(checks.iter().map(Check::serialize))
}

/// The receiving side went away; the producer should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event stream consumer stopped")]
pub struct Halted;

/// Where the engine sends events.
pub trait EventSink {
    /// # Errors
    ///
    /// [`Halted`] once nobody listens anymore.
    fn emit(&mut self, event: Event) -> Result<(), Halted>;
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) -> Result<(), Halted> {
        self.push(event);
        Ok(())
    }
}

impl EventSink for SyncSender<Event> {
    fn emit(&mut self, event: Event) -> Result<(), Halted> {
        self.send(event).map_err(|_| Halted)
    }
}
