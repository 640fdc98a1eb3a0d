use std::{convert::TryFrom, time::Duration};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{SessionStatus, SessionType};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

pub fn duration_to_ms(value: Duration) -> Result<i64> {
    to_i64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

pub fn ms_to_duration(value: i64, field: &str) -> Result<Duration> {
    to_u64(value, field).map(Duration::from_millis)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_status(value: &str) -> Result<SessionStatus> {
    match value {
        "created" => Ok(SessionStatus::Created),
        "running" => Ok(SessionStatus::Running),
        "paused" => Ok(SessionStatus::Paused),
        "completed" => Ok(SessionStatus::Completed),
        "cancelled" => Ok(SessionStatus::Cancelled),
        "interrupted" => Ok(SessionStatus::Interrupted),
        "warning" => Ok(SessionStatus::Warning),
        other => Err(anyhow!("unknown session status {other}")),
    }
}

pub fn parse_session_type(value: &str) -> Result<SessionType> {
    match value {
        "work" => Ok(SessionType::Work),
        "break" => Ok(SessionType::Break),
        "long_break" => Ok(SessionType::LongBreak),
        other => Err(anyhow!("unknown session type {other}")),
    }
}
