//! Event handlers and the dispatch loop
//!
//! Handlers see every event in emission order. A handler error stops
//! dispatch, but every handler still gets its `shutdown` call.

pub mod cassette;
pub mod junit;
pub mod output;

use std::path::PathBuf;

use stateprobe_core::{CassetteConfig, OutputConfig};

use crate::events::Event;
use crate::execution::ExecutionContext;

pub use cassette::CassetteWriter;
pub use junit::JunitXmlHandler;
pub use output::OutputHandler;

/// Why a handler stopped the run.
///
/// `Ok(())` from a handler means "continue"; [`HandlerError::Abort`] stops
/// quietly because the handler already told the user what happened; any
/// other variant stops with a diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("aborted")]
    Abort,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("{0}")]
    Failed(String),
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub trait EventHandler {
    fn name(&self) -> &str;

    /// Called once before the first event.
    ///
    /// # Errors
    ///
    /// An error prevents any event from being dispatched.
    fn start(&mut self, _ctx: &ExecutionContext) -> Result<(), HandlerError> {
        Ok(())
    }

    /// # Errors
    ///
    /// An error halts dispatch of this and all later events.
    fn handle_event(&mut self, ctx: &ExecutionContext, event: &Event) -> Result<(), HandlerError>;

    /// Always called, even after another handler failed.
    ///
    /// # Errors
    ///
    /// Reported; does not prevent other handlers from shutting down.
    fn shutdown(&mut self, _ctx: &ExecutionContext) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Handler `{handler}` failed to start: {source}")]
    Start {
        handler: String,
        source: HandlerError,
    },
    #[error("Handler `{handler}` failed: {source}")]
    Handler {
        handler: String,
        source: HandlerError,
    },
    #[error("Run aborted by `{handler}`")]
    Aborted { handler: String },
    #[error("Handler `{handler}` failed to shut down: {source}")]
    Shutdown {
        handler: String,
        source: HandlerError,
    },
}

impl DispatchError {
    fn from_handler(handler: &str, source: HandlerError) -> Self {
        let handler = handler.to_string();
        match source {
            HandlerError::Abort => Self::Aborted { handler },
            source => Self::Handler { handler, source },
        }
    }

    /// The user was already told what happened.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Feed `events` to `handlers` in order and return the process exit code.
///
/// The execution context is updated before the handlers see each event.
///
/// # Errors
///
/// The first handler failure. Shutdown has already run for every handler
/// when this returns.
pub fn execute<I>(
    events: I,
    handlers: &mut [Box<dyn EventHandler>],
    ctx: &mut ExecutionContext,
) -> Result<i32, DispatchError>
where
    I: IntoIterator<Item = Event>,
{
    let mut outcome = start_all(handlers, ctx);
    if outcome.is_ok() {
        outcome = dispatch(events, handlers, ctx);
    }

    for handler in handlers.iter_mut() {
        if let Err(source) = handler.shutdown(ctx) {
            tracing::error!(handler = handler.name(), error = %source, "handler shutdown failed");
            if outcome.is_ok() {
                outcome = Err(DispatchError::Shutdown {
                    handler: handler.name().to_string(),
                    source,
                });
            }
        }
    }

    outcome.map(|()| ctx.exit_code())
}

fn start_all(
    handlers: &mut [Box<dyn EventHandler>],
    ctx: &ExecutionContext,
) -> Result<(), DispatchError> {
    for handler in handlers.iter_mut() {
        if let Err(source) = handler.start(ctx) {
            tracing::error!(handler = handler.name(), error = %source, "handler failed to start");
            return Err(match source {
                HandlerError::Abort => DispatchError::Aborted {
                    handler: handler.name().to_string(),
                },
                source => DispatchError::Start {
                    handler: handler.name().to_string(),
                    source,
                },
            });
        }
    }
    Ok(())
}

fn dispatch<I>(
    events: I,
    handlers: &mut [Box<dyn EventHandler>],
    ctx: &mut ExecutionContext,
) -> Result<(), DispatchError>
where
    I: IntoIterator<Item = Event>,
{
    for event in events {
        ctx.on_event(&event);
        for handler in handlers.iter_mut() {
            if let Err(source) = handler.handle_event(ctx, &event) {
                if !matches!(source, HandlerError::Abort) {
                    tracing::error!(
                        handler = handler.name(),
                        event = event.name(),
                        error = %source,
                        "handler failed"
                    );
                }
                return Err(DispatchError::from_handler(handler.name(), source));
            }
        }
    }
    Ok(())
}

/// Which built-in handlers to install
#[derive(Default)]
pub struct ReportConfig {
    pub junit_xml: Option<PathBuf>,
    pub cassette: Option<CassetteConfig>,
    /// Console output on stdout; `None` keeps stdout quiet
    pub output: Option<OutputConfig>,
    /// User handlers, run after the file writers and before console output
    pub custom: Vec<Box<dyn EventHandler>>,
}

/// Handlers in dispatch order: JUnit, cassette, custom, console output.
#[must_use]
pub fn build_handlers(config: ReportConfig) -> Vec<Box<dyn EventHandler>> {
    let mut handlers: Vec<Box<dyn EventHandler>> = Vec::new();
    if let Some(path) = config.junit_xml {
        handlers.push(Box::new(JunitXmlHandler::new(path)));
    }
    if let Some(cassette) = config.cassette {
        handlers.push(Box::new(CassetteWriter::new(cassette)));
    }
    handlers.extend(config.custom);
    if let Some(output) = config.output {
        handlers.push(Box::new(OutputHandler::new(std::io::stdout(), output)));
    }
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Journal {
        started: Vec<String>,
        seen: Vec<(String, &'static str)>,
        shut_down: Vec<String>,
    }

    struct Probe {
        name: String,
        journal: Rc<RefCell<Journal>>,
        fail_on: Option<usize>,
        quiet: bool,
        fail_start: bool,
        calls: usize,
    }

    impl Probe {
        fn boxed(name: &str, journal: &Rc<RefCell<Journal>>) -> Box<Self> {
            Box::new(Self {
                name: name.into(),
                journal: Rc::clone(journal),
                fail_on: None,
                quiet: false,
                fail_start: false,
                calls: 0,
            })
        }
    }

    impl EventHandler for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn start(&mut self, _ctx: &ExecutionContext) -> Result<(), HandlerError> {
            self.journal.borrow_mut().started.push(self.name.clone());
            if self.fail_start {
                return Err(HandlerError::Failed("cannot open".into()));
            }
            Ok(())
        }

        fn handle_event(&mut self, _ctx: &ExecutionContext, event: &Event) -> Result<(), HandlerError> {
            self.calls += 1;
            self.journal
                .borrow_mut()
                .seen
                .push((self.name.clone(), event.name()));
            match self.fail_on {
                Some(n) if n == self.calls && self.quiet => Err(HandlerError::Abort),
                Some(n) if n == self.calls => Err(HandlerError::Failed("boom".into())),
                _ => Ok(()),
            }
        }

        fn shutdown(&mut self, _ctx: &ExecutionContext) -> Result<(), HandlerError> {
            self.journal.borrow_mut().shut_down.push(self.name.clone());
            Ok(())
        }
    }

    fn events() -> Vec<Event> {
        vec![
            Event::loading_started("a.json"),
            Event::loading_started("b.json"),
            Event::loading_started("c.json"),
        ]
    }

    #[test]
    fn every_handler_sees_every_event_in_order() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut handlers: Vec<Box<dyn EventHandler>> = Vec::new();
        handlers.push(Probe::boxed("a", &journal));
        handlers.push(Probe::boxed("b", &journal));
        let mut ctx = ExecutionContext::new();
        let code = execute(events(), &mut handlers, &mut ctx).unwrap();
        assert_eq!(code, 0);
        let journal = journal.borrow();
        assert_eq!(journal.seen.len(), 6);
        assert_eq!(journal.seen[0].0, "a");
        assert_eq!(journal.seen[1].0, "b");
        assert_eq!(journal.shut_down, ["a", "b"]);
        assert_eq!(ctx.location.as_deref(), Some("c.json"));
    }

    #[test]
    fn quiet_abort_still_shuts_everything_down() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut first = Probe::boxed("first", &journal);
        first.fail_on = Some(1);
        first.quiet = true;
        let mut handlers: Vec<Box<dyn EventHandler>> = Vec::new();
        handlers.push(first);
        handlers.push(Probe::boxed("second", &journal));
        let mut ctx = ExecutionContext::new();
        let err = execute(events(), &mut handlers, &mut ctx).unwrap_err();
        assert!(err.is_quiet());
        assert_eq!(err.exit_code(), 1);
        let journal = journal.borrow();
        assert_eq!(journal.seen.len(), 1);
        assert_eq!(journal.shut_down, ["first", "second"]);
    }

    #[test]
    fn start_failure_skips_dispatch() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut broken = Probe::boxed("junit", &journal);
        broken.fail_start = true;
        let mut handlers: Vec<Box<dyn EventHandler>> = Vec::new();
        handlers.push(broken);
        handlers.push(Probe::boxed("output", &journal));
        let mut ctx = ExecutionContext::new();
        let err = execute(events(), &mut handlers, &mut ctx).unwrap_err();
        assert!(matches!(err, DispatchError::Start { .. }));
        assert!(!err.is_quiet());
        let journal = journal.borrow();
        assert!(journal.seen.is_empty());
        assert_eq!(journal.started, ["junit"]);
        assert_eq!(journal.shut_down, ["junit", "output"]);
    }

    #[test]
    fn builtin_handlers_are_ordered() {
        let handlers = build_handlers(ReportConfig {
            junit_xml: Some(PathBuf::from("report.xml")),
            output: Some(OutputConfig::default()),
            ..ReportConfig::default()
        });
        let names: Vec<&str> = handlers.iter().map(|h| h.name()).collect();
        assert_eq!(names, ["junit", "output"]);
        assert!(build_handlers(ReportConfig::default()).is_empty());
    }
}
