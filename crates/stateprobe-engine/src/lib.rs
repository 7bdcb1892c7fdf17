//! stateprobe-engine: stateful execution, event stream and reporting
//!
//! A run loads a schema, drives suites of multi-step scenarios against a
//! [`Transport`], and streams [`Event`]s to an ordered list of
//! [`EventHandler`]s.

pub mod checks;
pub mod context;
pub mod datagen;
pub mod engine;
pub mod events;
pub mod execution;
pub mod generation;
pub mod handlers;
pub mod schema;
pub mod stream;
pub mod targets;
pub mod time;
pub mod transport;

pub use checks::{CheckError, CheckInput, CheckRegistry, CheckSelectionError, ResponseCheck};
pub use context::{RunnerContext, ScenarioStatus, StepError, StepOutcome, StepStatus};
pub use engine::{Interrupt, StatefulEngine};
pub use events::{EngineEvent, Event, EventSink, Halted, Phase, RunStatus};
pub use execution::ExecutionContext;
pub use generation::{CaseGenerator, GenerationError};
pub use handlers::{
    DispatchError, EventHandler, HandlerError, ReportConfig, build_handlers, execute,
};
pub use schema::{FilterSet, LoaderConfig, LoaderError, Operation, Schema, load_schema};
pub use stream::{EventStream, RunConfig, into_event_stream};
pub use targets::{MetricCollector, TargetFeedback, TargetMetric};
pub use transport::{HttpTransport, Transport, TransportError};
