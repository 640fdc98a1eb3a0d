use std::{
    collections::HashMap,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use log::{debug, error};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::{error::TimerError, models::SessionType};

const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerEventKind {
    SessionStarted,
    SessionPaused,
    SessionResumed,
    SessionCompleted,
    SessionCancelled,
    SessionInterrupted,
    WarningTriggered,
    TimeUpdated,
}

impl TimerEventKind {
    pub const ALL: [TimerEventKind; 8] = [
        TimerEventKind::SessionStarted,
        TimerEventKind::SessionPaused,
        TimerEventKind::SessionResumed,
        TimerEventKind::SessionCompleted,
        TimerEventKind::SessionCancelled,
        TimerEventKind::SessionInterrupted,
        TimerEventKind::WarningTriggered,
        TimerEventKind::TimeUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimerEventKind::SessionStarted => "SESSION_STARTED",
            TimerEventKind::SessionPaused => "SESSION_PAUSED",
            TimerEventKind::SessionResumed => "SESSION_RESUMED",
            TimerEventKind::SessionCompleted => "SESSION_COMPLETED",
            TimerEventKind::SessionCancelled => "SESSION_CANCELLED",
            TimerEventKind::SessionInterrupted => "SESSION_INTERRUPTED",
            TimerEventKind::WarningTriggered => "WARNING_TRIGGERED",
            TimerEventKind::TimeUpdated => "TIME_UPDATED",
        }
    }
}

impl fmt::Display for TimerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification published by the engine. Times are seconds unless the field
/// name says minutes.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum TimerEvent {
    SessionStarted {
        session_id: String,
        duration_minutes: u32,
        session_type: SessionType,
    },
    SessionPaused {
        session_id: String,
        elapsed_time: f64,
    },
    SessionResumed {
        session_id: String,
        remaining_time: f64,
    },
    SessionCompleted {
        session_id: String,
        duration_minutes: u32,
        actual_duration_minutes: f64,
        effective_work_minutes: f64,
        interruptions_count: u32,
    },
    SessionCancelled {
        session_id: String,
        duration_minutes: u32,
        actual_duration_minutes: f64,
    },
    SessionInterrupted {
        session_id: String,
        interruptions_count: u32,
    },
    WarningTriggered {
        session_id: String,
        remaining_minutes: f64,
        warning_threshold: u32,
    },
    TimeUpdated {
        session_id: String,
        elapsed_seconds: f64,
        remaining_seconds: f64,
        progress_percentage: f64,
    },
}

impl TimerEvent {
    pub fn kind(&self) -> TimerEventKind {
        match self {
            TimerEvent::SessionStarted { .. } => TimerEventKind::SessionStarted,
            TimerEvent::SessionPaused { .. } => TimerEventKind::SessionPaused,
            TimerEvent::SessionResumed { .. } => TimerEventKind::SessionResumed,
            TimerEvent::SessionCompleted { .. } => TimerEventKind::SessionCompleted,
            TimerEvent::SessionCancelled { .. } => TimerEventKind::SessionCancelled,
            TimerEvent::SessionInterrupted { .. } => TimerEventKind::SessionInterrupted,
            TimerEvent::WarningTriggered { .. } => TimerEventKind::WarningTriggered,
            TimerEvent::TimeUpdated { .. } => TimerEventKind::TimeUpdated,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            TimerEvent::SessionStarted { session_id, .. }
            | TimerEvent::SessionPaused { session_id, .. }
            | TimerEvent::SessionResumed { session_id, .. }
            | TimerEvent::SessionCompleted { session_id, .. }
            | TimerEvent::SessionCancelled { session_id, .. }
            | TimerEvent::SessionInterrupted { session_id, .. }
            | TimerEvent::WarningTriggered { session_id, .. }
            | TimerEvent::TimeUpdated { session_id, .. } => session_id,
        }
    }

    /// Flat key/value view of the event fields.
    pub fn payload(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&TimerEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Registry of observers keyed by event kind.
///
/// Handlers run synchronously on the emitting task, in registration order.
/// A failing or panicking handler is logged and skipped. After the handlers,
/// the event is also published on a broadcast channel for async consumers.
pub struct EventDispatcher {
    handlers: RwLock<HashMap<TimerEventKind, Vec<(HandlerId, EventHandler)>>>,
    next_id: AtomicU64,
    broadcast: broadcast::Sender<TimerEvent>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            broadcast,
        }
    }

    pub fn add_handler<F>(&self, kind: TimerEventKind, handler: F) -> HandlerId
    where
        F: Fn(&TimerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.entry(kind).or_default().push((id, Arc::new(handler)));
        id
    }

    pub fn remove_handler(&self, kind: TimerEventKind, id: HandlerId) -> bool {
        let mut guard = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(list) = guard.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        list.len() != before
    }

    pub fn handler_count(&self, kind: TimerEventKind) -> usize {
        let guard = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        let mut guard = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.broadcast.subscribe()
    }

    pub fn emit(&self, event: TimerEvent) {
        let kind = event.kind();

        // Snapshot so handlers may register or remove handlers themselves.
        let handlers: Vec<EventHandler> = {
            let guard = match self.handlers.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard
                .get(&kind)
                .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            let failure = match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("{err:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };
            error!(
                "{}",
                TimerError::HandlerFailure {
                    kind,
                    message: failure,
                }
            );
        }

        if self.broadcast.send(event).is_err() {
            debug!("no subscribers for {kind}");
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    fn paused(id: &str) -> TimerEvent {
        TimerEvent::SessionPaused {
            session_id: id.to_string(),
            elapsed_time: 12.5,
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            dispatcher.add_handler(TimerEventKind::SessionPaused, move |_| {
                calls.lock().unwrap().push(label);
                Ok(())
            });
        }

        dispatcher.emit(paused("s1"));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_block_delivery() {
        let dispatcher = EventDispatcher::new();
        let delivered = Arc::new(Mutex::new(0));

        dispatcher.add_handler(TimerEventKind::SessionPaused, |_| Err(anyhow!("boom")));
        dispatcher.add_handler(TimerEventKind::SessionPaused, |_| panic!("handler blew up"));
        {
            let delivered = Arc::clone(&delivered);
            dispatcher.add_handler(TimerEventKind::SessionPaused, move |_| {
                *delivered.lock().unwrap() += 1;
                Ok(())
            });
        }

        dispatcher.emit(paused("s1"));
        assert_eq!(*delivered.lock().unwrap(), 1);
    }

    #[test]
    fn handlers_only_see_their_kind() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            dispatcher.add_handler(TimerEventKind::SessionResumed, move |event| {
                seen.lock().unwrap().push(event.kind());
                Ok(())
            });
        }

        dispatcher.emit(paused("s1"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn removed_handler_is_not_called() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(Mutex::new(0));
        let id = {
            let count = Arc::clone(&count);
            dispatcher.add_handler(TimerEventKind::SessionPaused, move |_| {
                *count.lock().unwrap() += 1;
                Ok(())
            })
        };

        assert!(dispatcher.remove_handler(TimerEventKind::SessionPaused, id));
        assert!(!dispatcher.remove_handler(TimerEventKind::SessionPaused, id));
        assert!(!dispatcher.remove_handler(TimerEventKind::TimeUpdated, id));

        dispatcher.emit(paused("s1"));
        assert_eq!(*count.lock().unwrap(), 0);
        assert_eq!(dispatcher.handler_count(TimerEventKind::SessionPaused), 0);
    }

    #[test]
    fn clear_drops_every_handler() {
        let dispatcher = EventDispatcher::new();
        for kind in TimerEventKind::ALL {
            dispatcher.add_handler(kind, |_| Ok(()));
        }
        dispatcher.clear();
        for kind in TimerEventKind::ALL {
            assert_eq!(dispatcher.handler_count(kind), 0);
        }
    }

    #[test]
    fn payload_is_a_flat_map_with_documented_keys() {
        let event = TimerEvent::WarningTriggered {
            session_id: "abc".into(),
            remaining_minutes: 1.5,
            warning_threshold: 2,
        };
        let payload = event.payload();

        assert_eq!(payload.len(), 3);
        assert_eq!(payload["session_id"], "abc");
        assert_eq!(payload["remaining_minutes"], 1.5);
        assert_eq!(payload["warning_threshold"], 2);

        let started = TimerEvent::SessionStarted {
            session_id: "abc".into(),
            duration_minutes: 25,
            session_type: SessionType::LongBreak,
        };
        assert_eq!(started.payload()["session_type"], "long_break");
        assert_eq!(started.kind().as_str(), "SESSION_STARTED");
        assert_eq!(started.session_id(), "abc");
    }

    #[tokio::test]
    async fn subscribers_receive_events_after_handlers() {
        let dispatcher = EventDispatcher::new();
        let mut rx = dispatcher.subscribe();

        dispatcher.emit(paused("s1"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event, paused("s1"));
    }
}
