//! Log event channel for the RPC server.
//!
//! The channel is the server's only reporting surface: lifecycle moments and
//! per-request activity are emitted as [`LogEvent`]s. Observers are invoked
//! synchronously, in registration order, in the emitting context; with none
//! registered the event is still mirrored into `tracing`, so the server
//! stays observable by default.

use std::sync::{Arc, RwLock};

use tracing::{error, info, warn};

/// Severity of a log event emitted by the RPC classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Information,
    Warning,
    Error,
}

/// A severity-tagged message describing server lifecycle or per-request
/// activity. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub message: String,
    pub severity: LogSeverity,
}

type Observer = Arc<dyn Fn(&LogEvent) + Send + Sync>;

/// Fire-and-forget emission point for [`LogEvent`]s.
///
/// Cheap to clone; clones share the observer list.
#[derive(Clone, Default)]
pub struct LogChannel {
    observers: Arc<RwLock<Vec<Observer>>>,
}

impl LogChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer invoked synchronously for every emitted event.
    pub fn subscribe(&self, observer: impl Fn(&LogEvent) + Send + Sync + 'static) {
        let mut observers = match self.observers.write() {
            Ok(guard) => guard,
            // A panicking observer must not take the channel down.
            Err(poisoned) => poisoned.into_inner(),
        };
        observers.push(Arc::new(observer));
    }

    /// Emit an event to `tracing` and to every registered observer.
    ///
    /// Never fails and never blocks beyond the observers' own run time. The
    /// observer list is snapshotted before delivery, so an observer may
    /// subscribe further observers without deadlocking; additions take
    /// effect from the next emission.
    pub fn emit(&self, severity: LogSeverity, message: impl Into<String>) {
        let event = LogEvent {
            message: message.into(),
            severity,
        };

        match event.severity {
            LogSeverity::Information => info!("{}", event.message),
            LogSeverity::Warning => warn!("{}", event.message),
            LogSeverity::Error => error!("{}", event.message),
        }

        let observers: Vec<Observer> = {
            let guard = match self.observers.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };
        for observer in &observers {
            observer(&event);
        }
    }
}
