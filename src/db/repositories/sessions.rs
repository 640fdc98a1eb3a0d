use anyhow::{anyhow, Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{
            duration_to_ms, ms_to_duration, parse_datetime, parse_session_type, parse_status,
            to_i64, to_u32,
        },
    },
    models::SessionRecord,
};

const SELECT_COLUMNS: &str = "id, session_type, start_time, end_time, duration_minutes, status,
    interruptions_count, total_interruption_ms, warning_triggered, actual_duration_ms,
    paused_duration_ms, metadata";

fn row_to_record(row: &Row) -> Result<SessionRecord> {
    let session_type: String = row.get("session_type")?;
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;
    let status: String = row.get("status")?;
    let metadata: String = row.get("metadata")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        session_type: parse_session_type(&session_type)?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: Some(parse_datetime(&end_time, "end_time")?),
        duration_minutes: to_u32(row.get("duration_minutes")?, "duration_minutes")?,
        status: parse_status(&status)?,
        interruptions_count: to_u32(row.get("interruptions_count")?, "interruptions_count")?,
        total_interruption_time: ms_to_duration(
            row.get("total_interruption_ms")?,
            "total_interruption_ms",
        )?,
        warning_triggered: row.get::<_, i64>("warning_triggered")? != 0,
        metadata: serde_json::from_str(&metadata).context("failed to parse metadata")?,
        actual_duration: ms_to_duration(row.get("actual_duration_ms")?, "actual_duration_ms")?,
        paused_duration: ms_to_duration(row.get("paused_duration_ms")?, "paused_duration_ms")?,
    })
}

impl Database {
    /// Stores a finalized record. Records without an end time are refused.
    pub async fn insert_session_record(&self, record: &SessionRecord) -> Result<()> {
        let record = record.clone();
        let end_time = record
            .end_time
            .ok_or_else(|| anyhow!("session {} is not finalized", record.id))?;

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO session_records (id, session_type, start_time, end_time, duration_minutes,
                    status, interruptions_count, total_interruption_ms, warning_triggered,
                    actual_duration_ms, paused_duration_ms, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id,
                    record.session_type.as_str(),
                    record.start_time.to_rfc3339(),
                    end_time.to_rfc3339(),
                    i64::from(record.duration_minutes),
                    record.status.as_str(),
                    i64::from(record.interruptions_count),
                    duration_to_ms(record.total_interruption_time)?,
                    record.warning_triggered,
                    duration_to_ms(record.actual_duration)?,
                    duration_to_ms(record.paused_duration)?,
                    serde_json::to_string(&record.metadata)?,
                ],
            )
            .with_context(|| format!("failed to insert session record {}", record.id))?;
            Ok(())
        })
        .await
    }

    pub async fn get_session_record(&self, id: &str) -> Result<Option<SessionRecord>> {
        let id = id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM session_records WHERE id = ?1"
            ))?;
            let raw = stmt
                .query_row(params![id], |row| Ok(row_to_record(row)))
                .optional()?;
            raw.transpose()
        })
        .await
    }

    /// Most recently finished records first.
    pub async fn list_recent_records(&self, limit: u64) -> Result<Vec<SessionRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM session_records
                 ORDER BY end_time DESC, rowid DESC
                 LIMIT ?1"
            ))?;
            let mut rows = stmt.query(params![to_i64(limit)?])?;

            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }
}
