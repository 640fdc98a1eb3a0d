use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::models::{SessionRecord, SessionStatus};

/// Live wrapper around the record of the session currently being timed.
///
/// Elapsed time is measured on the monotonic clock: `active_baseline` holds
/// time accumulated in earlier running windows and `running_anchor` marks the
/// start of the current one. Wall-clock timestamps only appear on the record.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    record: SessionRecord,
    created_at: Instant,
    /// Set iff the session is paused.
    pause_time: Option<Instant>,
    last_warning_time: Option<Instant>,
    warning_count: u32,
    active_baseline: Duration,
    running_anchor: Option<Instant>,
}

impl ActiveSession {
    pub fn new(record: SessionRecord) -> Self {
        Self {
            record,
            created_at: Instant::now(),
            pause_time: None,
            last_warning_time: None,
            warning_count: 0,
            active_baseline: Duration::ZERO,
            running_anchor: None,
        }
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn status(&self) -> SessionStatus {
        self.record.status
    }

    pub fn is_running(&self) -> bool {
        self.record.status.is_counting()
    }

    pub fn is_paused(&self) -> bool {
        self.record.status == SessionStatus::Paused
    }

    pub fn pause_time(&self) -> Option<Instant> {
        self.pause_time
    }

    pub fn last_warning_time(&self) -> Option<Instant> {
        self.last_warning_time
    }

    pub fn warning_count(&self) -> u32 {
        self.warning_count
    }

    pub fn elapsed_time(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    /// Active time only: counting begins at `start()` and paused intervals
    /// are left out, so the value is frozen while paused and resumes from there.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        match self.running_anchor {
            Some(anchor) => self
                .active_baseline
                .saturating_add(now.saturating_duration_since(anchor)),
            None => self.active_baseline,
        }
    }

    pub fn remaining_time(&self) -> Duration {
        self.remaining_at(Instant::now())
    }

    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.record
            .planned_duration()
            .saturating_sub(self.elapsed_at(now))
    }

    pub fn is_completed(&self) -> bool {
        self.elapsed_time() >= self.record.planned_duration()
    }

    /// Share of the planned duration already elapsed, in `0.0..=100.0`.
    pub fn progress_at(&self, now: Instant) -> f64 {
        let planned = self.record.planned_duration().as_secs_f64();
        if planned <= 0.0 {
            return 100.0;
        }
        (self.elapsed_at(now).as_secs_f64() / planned * 100.0).min(100.0)
    }

    /// Changes the planned length. Only honoured before the session starts.
    pub fn set_duration(&mut self, duration_minutes: u32) -> bool {
        if self.record.status != SessionStatus::Created {
            return false;
        }
        self.record.duration_minutes = duration_minutes;
        true
    }

    /// Starts a created session or resumes a paused one. No-op otherwise.
    pub fn start(&mut self) -> bool {
        let now = Instant::now();
        match self.record.status {
            SessionStatus::Created => {}
            SessionStatus::Paused => {
                if let Some(paused_at) = self.pause_time.take() {
                    self.record.paused_duration = self
                        .record
                        .paused_duration
                        .saturating_add(now.saturating_duration_since(paused_at));
                }
            }
            _ => return false,
        }

        self.record.status = SessionStatus::Running;
        self.running_anchor = Some(now);
        true
    }

    /// Freezes the countdown. No-op unless the countdown is advancing.
    pub fn pause(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }

        let now = Instant::now();
        self.active_baseline = self.elapsed_at(now);
        self.running_anchor = None;
        self.pause_time = Some(now);
        self.record.status = SessionStatus::Paused;
        true
    }

    pub fn trigger_warning(&mut self) {
        self.record.status = SessionStatus::Warning;
        self.record.warning_triggered = true;
        self.last_warning_time = Some(Instant::now());
        self.warning_count += 1;
    }

    /// Annotates an interruption. Time keeps advancing; a paused session
    /// stays paused and only the counter moves.
    pub fn interrupt(&mut self) {
        self.record.interruptions_count += 1;
        if self.is_running() {
            self.record.status = SessionStatus::Interrupted;
        }
    }

    pub fn complete(self) -> SessionRecord {
        self.finalize(SessionStatus::Completed)
    }

    pub fn cancel(self) -> SessionRecord {
        self.finalize(SessionStatus::Cancelled)
    }

    fn finalize(mut self, status: SessionStatus) -> SessionRecord {
        let now = Instant::now();
        if let Some(paused_at) = self.pause_time.take() {
            self.record.paused_duration = self
                .record
                .paused_duration
                .saturating_add(now.saturating_duration_since(paused_at));
        }
        self.record.actual_duration = now.saturating_duration_since(self.created_at);
        self.record.end_time = Some(Utc::now());
        self.record.status = status;
        self.record
    }
}
