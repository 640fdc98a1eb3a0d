use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::SessionSink,
    error::{TimerError, TimerResult},
    models::{SessionRecord, SessionStatus, SessionType},
    settings::TimerConfig,
};

use super::{events::panic_message, ActiveSession, EventDispatcher, SessionManager, TimerEvent};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const TICK_INTERVAL: Duration = Duration::from_millis(100);
const PAUSE_POLL: Duration = Duration::from_millis(100);
const TIME_UPDATE_EVERY: Duration = Duration::from_secs(1);
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);
const FAULT_BACKOFF: Duration = Duration::from_millis(500);
const MAX_CONSECUTIVE_FAULTS: u32 = 20;
const PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub session_type: SessionType,
    pub duration_minutes: u32,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub remaining_seconds: f64,
    pub is_completed: bool,
    pub is_paused: bool,
    pub interruptions_count: u32,
    pub warning_triggered: bool,
    pub progress_percentage: f64,
}

impl SessionSnapshot {
    fn capture(session: &ActiveSession) -> Self {
        let now = Instant::now();
        let record = session.record();
        let elapsed = session.elapsed_at(now);
        Self {
            session_id: record.id.clone(),
            session_type: record.session_type,
            duration_minutes: record.duration_minutes,
            status: record.status,
            start_time: record.start_time,
            elapsed_seconds: elapsed.as_secs_f64(),
            remaining_seconds: session.remaining_at(now).as_secs_f64(),
            is_completed: elapsed >= record.planned_duration(),
            is_paused: session.is_paused(),
            interruptions_count: record.interruptions_count,
            warning_triggered: record.warning_triggered,
            progress_percentage: session.progress_at(now),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Finish {
    Complete,
    Cancel,
}

enum TickFlow {
    Continue { last_update: Instant },
    Paused,
    Finished,
}

enum Step {
    Exit,
    Paused,
    Complete,
    Running {
        warning: Option<TimerEvent>,
        update: Option<TimerEvent>,
    },
}

struct Ticker {
    session_id: String,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    /// Set once the ticker has taken its session out of the manager.
    finalizing: Arc<AtomicBool>,
}

struct EngineInner {
    config: RwLock<Arc<TimerConfig>>,
    manager: Mutex<SessionManager>,
    dispatcher: EventDispatcher,
    ticker: Mutex<Option<Ticker>>,
    resume: Notify,
    /// Taken while the manager lock is still held and kept until the event is
    /// delivered, so events reach handlers in the order they were built.
    emit_gate: Mutex<()>,
    warning_active: AtomicBool,
    sink: Option<Arc<dyn SessionSink>>,
    #[cfg(test)]
    injected_faults: std::sync::atomic::AtomicU32,
}

/// Drives the active session through time.
///
/// Lifecycle calls and the background ticker share the session manager
/// behind one mutex. Events are emitted after the lock is released.
#[derive(Clone)]
pub struct TimerEngine {
    inner: Arc<EngineInner>,
}

impl TimerEngine {
    pub fn new(config: TimerConfig) -> Self {
        Self::build(config, None)
    }

    /// Engine that hands every finalized record to `sink`.
    pub fn with_sink(config: TimerConfig, sink: Arc<dyn SessionSink>) -> Self {
        Self::build(config, Some(sink))
    }

    fn build(config: TimerConfig, sink: Option<Arc<dyn SessionSink>>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config: RwLock::new(Arc::new(config)),
                manager: Mutex::new(SessionManager::new()),
                dispatcher: EventDispatcher::new(),
                ticker: Mutex::new(None),
                resume: Notify::new(),
                emit_gate: Mutex::new(()),
                warning_active: AtomicBool::new(false),
                sink,
                #[cfg(test)]
                injected_faults: std::sync::atomic::AtomicU32::new(0),
            }),
        }
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    pub fn config(&self) -> Arc<TimerConfig> {
        let guard = match self.inner.config.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(&guard)
    }

    /// Swaps the configuration. A session that has not started yet picks up
    /// the new default duration; running sessions keep their length.
    pub async fn update_config(&self, config: TimerConfig) {
        let default_duration = config.default_duration;
        {
            let mut guard = match self.inner.config.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Arc::new(config);
        }

        let mut manager = self.inner.manager.lock().await;
        if let Some(session) = manager.active_session_mut() {
            if session.set_duration(default_duration) {
                log_info!(
                    "Session {} resized to {} minutes before start",
                    session.id(),
                    default_duration
                );
            }
        }
    }

    pub fn is_warning_active(&self) -> bool {
        self.inner.warning_active.load(Ordering::SeqCst)
    }

    pub async fn has_active_session(&self) -> bool {
        self.inner.manager.lock().await.has_active_session()
    }

    pub async fn get_session_info(&self) -> Option<SessionSnapshot> {
        let manager = self.inner.manager.lock().await;
        manager.active_session().map(SessionSnapshot::capture)
    }

    pub async fn recent_sessions(&self, count: usize) -> Vec<SessionRecord> {
        self.inner.manager.lock().await.get_recent_sessions(count)
    }

    pub async fn session_history(&self) -> Vec<SessionRecord> {
        self.inner.manager.lock().await.session_history().to_vec()
    }

    /// Starts a session of `duration_minutes`, or the configured default when
    /// `None`. A zero-minute session completes on the first tick.
    ///
    /// If the previous session's ticker is still delivering its completion,
    /// this waits for it so the old `SESSION_COMPLETED` precedes the new
    /// `SESSION_STARTED`.
    pub async fn start_session(
        &self,
        duration_minutes: Option<u32>,
        session_type: SessionType,
    ) -> TimerResult<SessionSnapshot> {
        let duration = duration_minutes.unwrap_or(self.config().default_duration);
        self.reap_finished_ticker().await;

        let snapshot = {
            let mut manager = self.inner.manager.lock().await;
            let session = manager.create_session(duration, session_type)?;
            session.start();
            SessionSnapshot::capture(session)
        };

        self.inner.warning_active.store(false, Ordering::SeqCst);
        log_info!(
            "Started {} session {} ({} min)",
            session_type,
            snapshot.session_id,
            duration
        );

        self.inner.dispatcher.emit(TimerEvent::SessionStarted {
            session_id: snapshot.session_id.clone(),
            duration_minutes: duration,
            session_type,
        });

        self.spawn_ticker(snapshot.session_id.clone()).await;

        Ok(snapshot)
    }

    /// Returns false when there is nothing to pause.
    pub async fn pause_session(&self) -> bool {
        let (event, _gate) = {
            let mut manager = self.inner.manager.lock().await;
            let Some(session) = manager.active_session_mut() else {
                return false;
            };
            if !session.pause() {
                return false;
            }
            let event = TimerEvent::SessionPaused {
                session_id: session.id().to_string(),
                elapsed_time: session.elapsed_time().as_secs_f64(),
            };
            (event, self.inner.emit_gate.lock().await)
        };

        log_info!("Paused session {}", event.session_id());
        self.inner.dispatcher.emit(event);
        true
    }

    /// Returns false when there is no paused session.
    pub async fn resume_session(&self) -> bool {
        let (event, _gate) = {
            let mut manager = self.inner.manager.lock().await;
            let Some(session) = manager.active_session_mut() else {
                return false;
            };
            if !session.is_paused() || !session.start() {
                return false;
            }
            let event = TimerEvent::SessionResumed {
                session_id: session.id().to_string(),
                remaining_time: session.remaining_time().as_secs_f64(),
            };
            (event, self.inner.emit_gate.lock().await)
        };

        self.inner.resume.notify_one();
        log_info!("Resumed session {}", event.session_id());
        self.inner.dispatcher.emit(event);
        true
    }

    /// Records an interruption; the countdown is not affected.
    pub async fn interrupt_session(&self) -> TimerResult<u32> {
        let (event, count, _gate) = {
            let mut manager = self.inner.manager.lock().await;
            manager.interrupt_session()?;
            let session = manager
                .active_session()
                .ok_or(TimerError::NoActiveSession)?;
            let count = session.record().interruptions_count;
            let event = TimerEvent::SessionInterrupted {
                session_id: session.id().to_string(),
                interruptions_count: count,
            };
            (event, count, self.inner.emit_gate.lock().await)
        };

        self.inner.dispatcher.emit(event);
        Ok(count)
    }

    pub async fn complete_session(&self) -> TimerResult<SessionRecord> {
        self.finish(Finish::Complete, false).await
    }

    pub async fn cancel_session(&self) -> TimerResult<SessionRecord> {
        self.finish(Finish::Cancel, false).await
    }

    /// Cancels any active session, stops the ticker and drops every handler.
    /// A ticker that is still delivering its own completion is waited for.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        match self.cancel_session().await {
            Ok(record) => log_info!("Cancelled session {} during shutdown", record.id),
            Err(TimerError::NoActiveSession) => {}
            Err(err) => log_warn!("Failed to cancel session during shutdown: {err}"),
        }
        self.stop_ticker().await;
        self.inner.dispatcher.clear();
    }

    /// Finalizes the active session, hands it to the sink, then emits the
    /// terminal event. The ticker calls this with `from_ticker` set and keeps
    /// its slot until it returns.
    async fn finish(&self, finish: Finish, from_ticker: bool) -> TimerResult<SessionRecord> {
        let record = {
            let mut manager = self.inner.manager.lock().await;
            match finish {
                Finish::Complete => manager.complete_session()?,
                Finish::Cancel => manager.cancel_session()?,
            }
        };
        self.inner.warning_active.store(false, Ordering::SeqCst);

        if !from_ticker {
            self.stop_ticker().await;
        }

        if let Some(sink) = &self.inner.sink {
            match time::timeout(PERSIST_TIMEOUT, sink.persist(&record)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log_error!("Failed to persist session {}: {err:#}", record.id),
                Err(_) => log_error!(
                    "Persisting session {} did not finish within {:?}",
                    record.id,
                    PERSIST_TIMEOUT
                ),
            }
        }

        let event = match finish {
            Finish::Complete => TimerEvent::SessionCompleted {
                session_id: record.id.clone(),
                duration_minutes: record.duration_minutes,
                actual_duration_minutes: record.actual_duration_minutes(),
                effective_work_minutes: record.effective_work_minutes(),
                interruptions_count: record.interruptions_count,
            },
            Finish::Cancel => TimerEvent::SessionCancelled {
                session_id: record.id.clone(),
                duration_minutes: record.duration_minutes,
                actual_duration_minutes: record.actual_duration_minutes(),
            },
        };

        log_info!("Session {} {}", record.id, record.status);
        self.inner.dispatcher.emit(event);
        Ok(record)
    }

    async fn spawn_ticker(&self, session_id: String) {
        let mut ticker_guard = self.inner.ticker.lock().await;
        if let Some(previous) = ticker_guard.take() {
            log_warn!(
                "Replacing ticker for session {} that was still registered",
                previous.session_id
            );
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let finalizing = Arc::new(AtomicBool::new(false));
        let engine = self.clone();
        let token = cancel.clone();
        let flag = Arc::clone(&finalizing);
        let id = session_id.clone();
        let handle = tokio::spawn(async move { engine.run_ticker(id, token, flag).await });

        *ticker_guard = Some(Ticker {
            session_id,
            handle,
            cancel,
            finalizing,
        });
    }

    /// Stops whichever ticker holds the slot, whatever session it serves.
    async fn stop_ticker(&self) {
        let ticker = self.inner.ticker.lock().await.take();
        if let Some(ticker) = ticker {
            self.join_ticker(ticker).await;
        }
    }

    /// Joins a ticker whose session is no longer active. Such a ticker is
    /// persisting or emitting the session it completed.
    async fn reap_finished_ticker(&self) {
        let stale = {
            let manager = self.inner.manager.lock().await;
            let active_id = manager.active_session().map(|session| session.id().to_string());
            let mut ticker_guard = self.inner.ticker.lock().await;
            match ticker_guard.as_ref() {
                Some(ticker) if active_id.as_deref() != Some(ticker.session_id.as_str()) => {
                    ticker_guard.take()
                }
                _ => None,
            }
        };
        if let Some(ticker) = stale {
            self.join_ticker(ticker).await;
        }
    }

    /// Signals the ticker and waits for it to exit. A ticker that is not
    /// finalizing gets `JOIN_TIMEOUT`; one that is also gets `PERSIST_TIMEOUT`
    /// for its sink. Past that it is aborted.
    async fn join_ticker(&self, ticker: Ticker) {
        ticker.cancel.cancel();
        self.inner.resume.notify_one();

        let limit = if ticker.finalizing.load(Ordering::SeqCst) {
            JOIN_TIMEOUT + PERSIST_TIMEOUT
        } else {
            JOIN_TIMEOUT
        };

        let mut handle = ticker.handle;
        if time::timeout(limit, &mut handle).await.is_err() {
            log_warn!(
                "Ticker for session {} did not stop within {:?}; aborting it",
                ticker.session_id,
                limit
            );
            handle.abort();
        }
    }

    /// Last step of a ticker: clears the slot if it still holds this ticker.
    async fn release_ticker(&self, session_id: &str) {
        let mut ticker_guard = self.inner.ticker.lock().await;
        if ticker_guard
            .as_ref()
            .is_some_and(|ticker| ticker.session_id == session_id)
        {
            ticker_guard.take();
        }
    }

    async fn run_ticker(
        self,
        session_id: String,
        cancel: CancellationToken,
        finalizing: Arc<AtomicBool>,
    ) {
        let mut interval = time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_update = Instant::now();
        let mut faults: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            // Each iteration runs as its own task so a panic surfaces as a
            // JoinError instead of killing the ticker.
            let iteration = tokio::spawn(self.clone().tick(
                session_id.clone(),
                last_update,
                Arc::clone(&finalizing),
            ));
            let outcome = match iteration.await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => Err(TimerError::LoopFault(panic_message(
                    err.into_panic().as_ref(),
                ))),
                Err(err) => Err(TimerError::LoopFault(err.to_string())),
            };

            match outcome {
                Ok(TickFlow::Continue { last_update: updated }) => {
                    last_update = updated;
                    faults = 0;
                }
                Ok(TickFlow::Paused) => {
                    faults = 0;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.inner.resume.notified() => {}
                        _ = time::sleep(PAUSE_POLL) => {}
                    }
                }
                Ok(TickFlow::Finished) => break,
                Err(err) => {
                    faults += 1;
                    log_error!(
                        "Session {}: {err} ({faults}/{MAX_CONSECUTIVE_FAULTS})",
                        session_id
                    );
                    if faults >= MAX_CONSECUTIVE_FAULTS {
                        log_error!(
                            "Ticker for session {} giving up after {} consecutive faults",
                            session_id,
                            faults
                        );
                        break;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = time::sleep(FAULT_BACKOFF) => {}
                    }
                }
            }
        }

        self.release_ticker(&session_id).await;
        log_info!("Ticker for session {} stopped", session_id);
    }

    /// One iteration: completion, then warning, then the time update.
    async fn tick(
        self,
        session_id: String,
        mut last_update: Instant,
        finalizing: Arc<AtomicBool>,
    ) -> TimerResult<TickFlow> {
        #[cfg(test)]
        {
            let injected = self.inner.injected_faults.fetch_update(
                Ordering::SeqCst,
                Ordering::SeqCst,
                |pending| pending.checked_sub(1),
            );
            if injected.is_ok() {
                panic!("injected tick fault");
            }
        }

        let config = self.config();

        let (step, gate) = {
            let mut manager = self.inner.manager.lock().await;
            let step = match manager.active_session_mut() {
                None => Step::Exit,
                Some(session) if session.id() != session_id => Step::Exit,
                Some(session) if session.is_paused() => Step::Paused,
                Some(session) if session.is_completed() => {
                    finalizing.store(true, Ordering::SeqCst);
                    Step::Complete
                }
                Some(session) => {
                    let now = Instant::now();
                    let mut warning = None;

                    if !session.record().warning_triggered {
                        let remaining_minutes = session.remaining_at(now).as_secs_f64() / 60.0;
                        if remaining_minutes <= f64::from(config.warning_minutes) {
                            session.trigger_warning();
                            warning = Some(TimerEvent::WarningTriggered {
                                session_id: session_id.clone(),
                                remaining_minutes,
                                warning_threshold: config.warning_minutes,
                            });
                        }
                    }

                    let update = if now.saturating_duration_since(last_update) >= TIME_UPDATE_EVERY
                    {
                        last_update = now;
                        Some(TimerEvent::TimeUpdated {
                            session_id: session_id.clone(),
                            elapsed_seconds: session.elapsed_at(now).as_secs_f64(),
                            remaining_seconds: session.remaining_at(now).as_secs_f64(),
                            progress_percentage: session.progress_at(now),
                        })
                    } else {
                        None
                    };

                    Step::Running { warning, update }
                }
            };
            let gate = match &step {
                Step::Running { warning, update } if warning.is_some() || update.is_some() => {
                    Some(self.inner.emit_gate.lock().await)
                }
                _ => None,
            };
            (step, gate)
        };

        let flow = match step {
            Step::Exit => TickFlow::Finished,
            Step::Paused => TickFlow::Paused,
            Step::Complete => match self.finish(Finish::Complete, true).await {
                Ok(_) | Err(TimerError::NoActiveSession) => TickFlow::Finished,
                Err(err) => return Err(TimerError::LoopFault(err.to_string())),
            },
            Step::Running { warning, update } => {
                if let Some(event) = warning {
                    self.inner.warning_active.store(true, Ordering::SeqCst);
                    log_info!("Warning threshold reached for session {}", session_id);
                    self.inner.dispatcher.emit(event);
                }
                if let Some(event) = update {
                    self.inner.dispatcher.emit(event);
                }
                TickFlow::Continue { last_update }
            }
        };
        drop(gate);
        Ok(flow)
    }
}
