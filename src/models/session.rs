use std::{collections::HashMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Work,
    Break,
    LongBreak,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Work => "work",
            SessionType::Break => "break",
            SessionType::LongBreak => "long_break",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SessionType::Work => "Work",
            SessionType::Break => "Break",
            SessionType::LongBreak => "Long Break",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Running,
    Paused,
    Completed,
    Cancelled,
    Interrupted,
    /// Warning threshold reached; the countdown keeps going.
    Warning,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::Warning => "warning",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    /// Statuses in which the countdown advances.
    pub fn is_counting(&self) -> bool {
        matches!(
            self,
            SessionStatus::Running | SessionStatus::Warning | SessionStatus::Interrupted
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan and outcome of a single session.
///
/// Owned by an [`ActiveSession`](crate::timer::ActiveSession) while live; once
/// completed or cancelled it moves into the manager's history and is only
/// handed out by value from there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub session_type: SessionType,
    pub start_time: DateTime<Utc>,
    /// Set exactly once, when the session reaches a terminal status.
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub status: SessionStatus,
    pub interruptions_count: u32,
    pub total_interruption_time: Duration,
    pub warning_triggered: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Monotonic span from creation to finalization, pauses included.
    #[serde(default)]
    pub actual_duration: Duration,
    /// Sum of all paused intervals.
    #[serde(default)]
    pub paused_duration: Duration,
}

impl SessionRecord {
    pub fn new(duration_minutes: u32, session_type: SessionType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_type,
            start_time: Utc::now(),
            end_time: None,
            duration_minutes,
            status: SessionStatus::Created,
            interruptions_count: 0,
            total_interruption_time: Duration::ZERO,
            warning_triggered: false,
            metadata: HashMap::new(),
            actual_duration: Duration::ZERO,
            paused_duration: Duration::ZERO,
        }
    }

    pub fn planned_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.duration_minutes) * 60)
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn actual_duration_minutes(&self) -> f64 {
        if self.end_time.is_none() {
            return 0.0;
        }
        self.actual_duration.as_secs_f64() / 60.0
    }

    pub fn effective_work_minutes(&self) -> f64 {
        let interrupted = self.total_interruption_time.as_secs_f64() / 60.0;
        (self.actual_duration_minutes() - interrupted).max(0.0)
    }
}
