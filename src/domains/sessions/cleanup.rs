//! `Cleanup`/`StalePurge` (`spec.md` §4.6). A session is stale iff it is
//! abandoned, has zero commits, and lived for under a minute — the
//! signature of a launch that was immediately aborted.

use super::store::SessionStore;
use crate::errors::CoreError;

pub struct StalePurge<'a> {
    store: &'a dyn SessionStore,
}

impl<'a> StalePurge<'a> {
    pub fn new(store: &'a dyn SessionStore) -> Self {
        Self { store }
    }

    /// Delete every stale session across all projects. Returns the count
    /// deleted.
    pub fn purge_stale(&self) -> Result<u64, CoreError> {
        self.store.delete_all_stale_sessions()
    }

    /// Delete stale sessions for a single `(project_id, branch)`. Called
    /// from `Launch` step 4 so a fresh session can be created on the same
    /// branch without violating the live-session uniqueness invariant.
    pub fn purge_stale_for_branch(&self, project_id: &str, branch: &str) -> Result<u64, CoreError> {
        self.store.delete_stale_sessions(project_id, branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::sessions::entity::{AgentSession, SessionStatus, SessionType};
    use crate::domains::sessions::store::fakes::InMemorySessionStore;
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn purge_stale_removes_short_lived_abandoned_sessions_with_no_commits() {
        let store = InMemorySessionStore::new();
        let mut session = AgentSession::new_active(
            "s1".into(),
            "p1".into(),
            None,
            "feature/aborted".into(),
            PathBuf::from("/does/not/exist"),
            SessionType::Implementation,
            Utc::now(),
        );
        session.status = SessionStatus::Abandoned;
        session.ended_at = Some(Utc::now());
        session.commit_count = 0;
        store.create_session(&session).unwrap();

        let purge = StalePurge::new(&store);
        let deleted = purge.purge_stale().unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_session("s1").is_err());
    }

    #[test]
    fn purge_stale_for_branch_is_scoped() {
        let store = InMemorySessionStore::new();
        let mut a = AgentSession::new_active(
            "a".into(),
            "p1".into(),
            None,
            "feature/aborted".into(),
            PathBuf::from("/does/not/exist"),
            SessionType::Implementation,
            Utc::now(),
        );
        a.status = SessionStatus::Abandoned;
        a.ended_at = Some(Utc::now());
        store.create_session(&a).unwrap();

        let mut b = AgentSession::new_active(
            "b".into(),
            "p1".into(),
            None,
            "feature/other".into(),
            PathBuf::from("/does/not/exist"),
            SessionType::Implementation,
            Utc::now(),
        );
        b.status = SessionStatus::Abandoned;
        b.ended_at = Some(Utc::now());
        store.create_session(&b).unwrap();

        let purge = StalePurge::new(&store);
        let deleted = purge.purge_stale_for_branch("p1", "feature/aborted").unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_session("a").is_err());
        assert!(store.get_session("b").is_ok());
    }
}
