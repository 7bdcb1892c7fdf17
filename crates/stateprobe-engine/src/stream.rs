//! The event stream: schema loading followed by the stateful run
//!
//! Events are produced on a worker thread and handed over through a bounded
//! channel, so the consumer sees them strictly in emission order.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::JoinHandle;
use std::time::Instant;

use stateprobe_core::EngineConfig;

use crate::checks::CheckRegistry;
use crate::engine::{Interrupt, StatefulEngine};
use crate::events::{Event, EventSink, Halted, Phase};
use crate::schema::{FilterSet, LoaderConfig, load_schema};
use crate::targets::TargetMetric;
use crate::time::unix_now;
use crate::transport::Transport;

const CHANNEL_CAPACITY: usize = 16;

/// Everything needed to produce one run's events.
#[derive(Debug)]
pub struct RunConfig {
    pub loader: LoaderConfig,
    pub filters: FilterSet,
    pub engine: EngineConfig,
    pub checks: CheckRegistry,
    pub targets: Vec<TargetMetric>,
    pub interrupt: Interrupt,
}

impl RunConfig {
    #[must_use]
    pub fn new(loader: LoaderConfig) -> Self {
        Self {
            loader,
            filters: FilterSet::new(),
            engine: EngineConfig::default(),
            checks: CheckRegistry::builtin(None),
            targets: Vec::new(),
            interrupt: Interrupt::new(),
        }
    }
}

/// Start producing events in the background.
pub fn into_event_stream<T>(config: RunConfig, transport: T) -> EventStream
where
    T: Transport + 'static,
{
    let (sender, receiver) = mpsc::sync_channel(CHANNEL_CAPACITY);
    let worker = std::thread::Builder::new()
        .name("stateprobe-engine".into())
        .spawn(move || {
            let mut sink = sender.clone();
            let outcome = catch_unwind(AssertUnwindSafe(|| produce(&config, &transport, &mut sink)));
            if let Err(panic) = outcome {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "engine panicked".to_string());
                tracing::error!(%message, "engine panicked");
                let _ = sender.send(Event::fatal_error(message));
            }
        });
    match worker {
        Ok(handle) => EventStream {
            receiver: Some(receiver),
            worker: Some(handle),
            finished: false,
        },
        Err(e) => {
            let (sender, receiver) = mpsc::sync_channel(1);
            let _ = sender.send(Event::fatal_error(format!("failed to spawn engine thread: {e}")));
            EventStream {
                receiver: Some(receiver),
                worker: None,
                finished: false,
            }
        }
    }
}

fn produce(config: &RunConfig, transport: &dyn Transport, sink: &mut SyncSender<Event>) -> Result<(), Halted> {
    let location = config.loader.location.clone();
    sink.emit(Event::loading_started(&location))?;
    if config.interrupt.is_set() {
        return sink.emit(Event::interrupted(None));
    }

    let start_time = unix_now();
    let started = Instant::now();
    let loaded = load_schema(&config.loader);
    if config.interrupt.is_set() {
        return sink.emit(Event::interrupted(None));
    }
    let mut schema = match loaded {
        Ok(schema) => schema,
        Err(e) => {
            tracing::error!(location = %location, error = %e, "schema loading failed");
            return sink.emit(Event::fatal_error(e.to_string()));
        }
    };
    schema.set_filter_set(config.filters.clone());

    sink.emit(Event::LoadingFinished {
        location,
        start_time,
        duration: started.elapsed().as_secs_f64(),
        base_url: schema.get_base_url(),
        specification: schema.specification().clone(),
        statistic: schema.statistic(),
        timestamp: unix_now(),
    })?;

    let mut engine = StatefulEngine::new(
        &schema,
        transport,
        &config.checks,
        &config.engine,
        config.targets.clone(),
        config.interrupt.clone(),
    );
    engine.run(sink)?;

    if config.interrupt.is_set() {
        sink.emit(Event::interrupted(Some(Phase::Stateful)))?;
    }
    Ok(())
}

/// Ordered, forward-only sequence of run events.
///
/// Dropping the stream stops the producer at its next emission.
pub struct EventStream {
    receiver: Option<Receiver<Event>>,
    worker: Option<JoinHandle<()>>,
    finished: bool,
}

impl Iterator for EventStream {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        if self.finished {
            return None;
        }
        let event = self.receiver.as_ref()?.recv().ok();
        match &event {
            None => self.finished = true,
            Some(event) if matches!(event, Event::FatalError { .. } | Event::Interrupted { .. }) => {
                self.finished = true;
            }
            Some(_) => {}
        }
        event
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        // Closing the channel first unblocks a producer waiting on a full buffer
        self.receiver.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use stateprobe_core::{Case, Request, Response};

    struct Unused;

    impl Transport for Unused {
        fn send(&self, _case: &Case) -> Result<(Request, Response), TransportError> {
            Err(TransportError::Client("not used".into()))
        }
    }

    #[test]
    fn missing_schema_is_a_fatal_error() {
        let config = RunConfig::new(LoaderConfig::new("/nonexistent/openapi.json"));
        let events: Vec<Event> = into_event_stream(config, Unused).collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::LoadingStarted { .. }));
        assert!(matches!(events[1], Event::FatalError { .. }));
    }

    #[test]
    fn interrupt_before_loading_has_no_phase() {
        let config = RunConfig::new(LoaderConfig::new("/nonexistent/openapi.json"));
        config.interrupt.trigger();
        let events: Vec<Event> = into_event_stream(config, Unused).collect();
        assert!(matches!(events.last(), Some(Event::Interrupted { phase: None, .. })));
    }

    #[test]
    fn dropping_the_stream_early_does_not_hang() {
        let config = RunConfig::new(LoaderConfig::new("/nonexistent/openapi.json"));
        let mut stream = into_event_stream(config, Unused);
        assert!(stream.next().is_some());
        drop(stream);
    }
}
