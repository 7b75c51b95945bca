//! Session storage: the capability trait and the in-memory reference store.

use std::collections::HashMap;

use linkforge_protocol::{OwnerId, SessionId};
use parking_lot::RwLock;
use tracing::trace;

use crate::{Session, SessionError};

/// Thread-safe keyed storage for [`Session`] records.
///
/// Every method is synchronous and never suspends: lock acquisition is
/// the only wait point. Records go in and come out by value, so no caller
/// ever holds a reference into live state.
///
/// [`MemoryStore`] is the reference implementation. A persistent backend
/// satisfies the same contract and reports its own failures as
/// [`SessionError::Storage`].
pub trait SessionStore: Send + Sync + 'static {
    /// Insert or overwrite the record keyed by `session.id`.
    fn add(&self, session: Session) -> Result<(), SessionError>;

    /// A copy of the record, or [`SessionError::NotFound`].
    fn get(&self, id: &SessionId) -> Result<Session, SessionError>;

    /// Every record owned by `owner`, keyed by id. Empty when there are
    /// none.
    fn get_by_owner(&self, owner: &OwnerId) -> Result<HashMap<SessionId, Session>, SessionError>;

    /// Full replace. Same insert-or-overwrite semantics as
    /// [`add`](Self::add).
    fn update(&self, session: Session) -> Result<(), SessionError>;

    /// Set the record's `last_token` to `token` in one atomic step.
    ///
    /// With `expected` set, the swap only happens while the current token
    /// still equals it. This never creates a record, so a session deleted
    /// concurrently stays deleted.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]: no record under `id`
    /// - [`SessionError::ExpiredToken`]: the current token is not `expected`
    fn replace_token(&self, id: &SessionId, expected: Option<&str>, token: String) -> Result<(), SessionError>;

    /// Remove the record if present. Returns whether anything was
    /// removed; deleting an absent id is not an error.
    fn delete(&self, id: &SessionId) -> Result<bool, SessionError>;

    /// Remove every record with `expires_on < now` and return how many
    /// were removed.
    fn gc(&self, now: i64) -> Result<usize, SessionError>;

    /// A consistent copy of every record.
    fn export(&self) -> Result<Vec<Session>, SessionError>;

    /// Replace the whole contents with `sessions`. Returns the number of
    /// records stored afterwards (duplicate ids collapse to the last one).
    fn import(&self, sessions: Vec<Session>) -> Result<usize, SessionError>;

    /// Number of stored records, expired ones included.
    fn len(&self) -> usize;

    /// `true` if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process [`SessionStore`] guarded by one reader/writer lock.
///
/// Readers (`get`, `get_by_owner`, `export`) proceed in parallel; writers
/// are exclusive with everyone. `parking_lot`'s lock doesn't poison, so a
/// panic in one request can't wedge the store for the rest.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn add(&self, session: Session) -> Result<(), SessionError> {
        self.sessions.write().insert(session.id.clone(), session);
        Ok(())
    }

    fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    fn get_by_owner(&self, owner: &OwnerId) -> Result<HashMap<SessionId, Session>, SessionError> {
        Ok(self
            .sessions
            .read()
            .iter()
            .filter(|(_, s)| s.owner_id == *owner)
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect())
    }

    fn update(&self, session: Session) -> Result<(), SessionError> {
        self.add(session)
    }

    fn replace_token(&self, id: &SessionId, expected: Option<&str>, token: String) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        if expected.is_some_and(|current| session.last_token != current) {
            return Err(SessionError::ExpiredToken);
        }
        session.last_token = token;
        Ok(())
    }

    fn delete(&self, id: &SessionId) -> Result<bool, SessionError> {
        Ok(self.sessions.write().remove(id).is_some())
    }

    fn gc(&self, now: i64) -> Result<usize, SessionError> {
        // Scan under the shared lock so readers keep flowing.
        let candidates: Vec<SessionId> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.expires_on < now)
            .map(|s| s.id.clone())
            .collect();

        // Re-check under the exclusive lock: a candidate may have been
        // refreshed or deleted since the scan.
        let mut removed = 0;
        for id in candidates {
            let mut sessions = self.sessions.write();
            if sessions.get(&id).is_some_and(|s| s.expires_on < now) {
                sessions.remove(&id);
                removed += 1;
            }
        }

        trace!(removed, now, "memory store gc pass");
        Ok(removed)
    }

    fn export(&self) -> Result<Vec<Session>, SessionError> {
        Ok(self.sessions.read().values().cloned().collect())
    }

    fn import(&self, sessions: Vec<Session>) -> Result<usize, SessionError> {
        let fresh: HashMap<SessionId, Session> =
            sessions.into_iter().map(|s| (s.id.clone(), s)).collect();
        let count = fresh.len();
        *self.sessions.write() = fresh;
        Ok(count)
    }

    fn len(&self) -> usize {
        self.sessions.read().len()
    }
}

// =========================================================================
// Tests
// =========================================================================
