use crate::{
    error::{TimerError, TimerResult},
    models::{SessionRecord, SessionType},
};

use super::ActiveSession;

/// Holds at most one active session plus the finalized history, oldest first.
#[derive(Debug, Default)]
pub struct SessionManager {
    active: Option<ActiveSession>,
    history: Vec<SessionRecord>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_active_session(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_session(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn active_session_mut(&mut self) -> Option<&mut ActiveSession> {
        self.active.as_mut()
    }

    pub fn session_history(&self) -> &[SessionRecord] {
        &self.history
    }

    pub fn create_session(
        &mut self,
        duration_minutes: u32,
        session_type: SessionType,
    ) -> TimerResult<&mut ActiveSession> {
        if self.active.is_some() {
            return Err(TimerError::AlreadyActive);
        }

        let record = SessionRecord::new(duration_minutes, session_type);
        Ok(self.active.insert(ActiveSession::new(record)))
    }

    pub fn start_session(&mut self) -> TimerResult<()> {
        self.require_active()?.start();
        Ok(())
    }

    pub fn pause_session(&mut self) -> TimerResult<()> {
        self.require_active()?.pause();
        Ok(())
    }

    pub fn interrupt_session(&mut self) -> TimerResult<()> {
        self.require_active()?.interrupt();
        Ok(())
    }

    pub fn complete_session(&mut self) -> TimerResult<SessionRecord> {
        let session = self.active.take().ok_or(TimerError::NoActiveSession)?;
        Ok(self.archive(session.complete()))
    }

    pub fn cancel_session(&mut self) -> TimerResult<SessionRecord> {
        let session = self.active.take().ok_or(TimerError::NoActiveSession)?;
        Ok(self.archive(session.cancel()))
    }

    /// Up to `count` finalized records, most recent first.
    pub fn get_recent_sessions(&self, count: usize) -> Vec<SessionRecord> {
        self.history.iter().rev().take(count).cloned().collect()
    }

    fn require_active(&mut self) -> TimerResult<&mut ActiveSession> {
        self.active.as_mut().ok_or(TimerError::NoActiveSession)
    }

    fn archive(&mut self, record: SessionRecord) -> SessionRecord {
        self.history.push(record.clone());
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;

    #[tokio::test]
    async fn create_while_active_fails_and_leaves_state_untouched() {
        let mut manager = SessionManager::new();
        let first_id = manager
            .create_session(25, SessionType::Work)
            .unwrap()
            .id()
            .to_string();
        manager.start_session().unwrap();

        let err = manager.create_session(5, SessionType::Break).unwrap_err();
        assert_eq!(err, TimerError::AlreadyActive);

        let active = manager.active_session().unwrap();
        assert_eq!(active.id(), first_id);
        assert_eq!(active.record().duration_minutes, 25);
        assert_eq!(active.status(), SessionStatus::Running);
        assert!(manager.session_history().is_empty());
    }

    #[tokio::test]
    async fn operations_without_active_session_fail() {
        let mut manager = SessionManager::new();

        assert_eq!(manager.start_session(), Err(TimerError::NoActiveSession));
        assert_eq!(manager.pause_session(), Err(TimerError::NoActiveSession));
        assert_eq!(manager.interrupt_session(), Err(TimerError::NoActiveSession));
        assert_eq!(
            manager.complete_session().unwrap_err(),
            TimerError::NoActiveSession
        );
        assert_eq!(
            manager.cancel_session().unwrap_err(),
            TimerError::NoActiveSession
        );
    }

    #[tokio::test]
    async fn cancel_after_pause_archives_once() {
        let mut manager = SessionManager::new();
        manager.create_session(25, SessionType::Work).unwrap();
        manager.start_session().unwrap();
        manager.pause_session().unwrap();

        let record = manager.cancel_session().unwrap();
        assert_eq!(record.status, SessionStatus::Cancelled);
        assert!(record.end_time.is_some());
        assert!(!manager.has_active_session());

        let matching = manager
            .session_history()
            .iter()
            .filter(|r| r.id == record.id)
            .count();
        assert_eq!(matching, 1);
    }

    #[tokio::test]
    async fn complete_clears_slot_so_a_new_session_can_start() {
        let mut manager = SessionManager::new();
        manager.create_session(1, SessionType::Work).unwrap();
        manager.start_session().unwrap();

        let record = manager.complete_session().unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
        assert!(manager.create_session(5, SessionType::Break).is_ok());
    }

    #[tokio::test]
    async fn recent_sessions_are_most_recent_first() {
        let mut manager = SessionManager::new();
        let mut ids = Vec::new();
        for minutes in [5, 10, 15] {
            manager.create_session(minutes, SessionType::Work).unwrap();
            manager.start_session().unwrap();
            ids.push(manager.complete_session().unwrap().id);
        }

        let recent = manager.get_recent_sessions(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, ids[2]);
        assert_eq!(recent[1].id, ids[1]);

        assert_eq!(manager.get_recent_sessions(10).len(), 3);
        assert_eq!(manager.session_history().len(), 3);
    }

    #[tokio::test]
    async fn interrupt_counts_and_marks_status() {
        let mut manager = SessionManager::new();
        manager.create_session(25, SessionType::Work).unwrap();
        manager.start_session().unwrap();
        manager.interrupt_session().unwrap();
        manager.interrupt_session().unwrap();

        let active = manager.active_session().unwrap();
        assert_eq!(active.record().interruptions_count, 2);
        assert_eq!(active.status(), SessionStatus::Interrupted);
    }
}
