use anyhow::Result;
use async_trait::async_trait;

use crate::models::SessionRecord;

use super::Database;

/// Receives every record the engine finalizes, completed or cancelled.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn persist(&self, record: &SessionRecord) -> Result<()>;
}

#[async_trait]
impl SessionSink for Database {
    async fn persist(&self, record: &SessionRecord) -> Result<()> {
        self.insert_session_record(record).await
    }
}
