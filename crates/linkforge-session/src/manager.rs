//! The session manager: the single entry point for session lifecycle.
//!
//! It is responsible for:
//! - Creating sessions when a principal logs in
//! - Answering "is this session valid for this owner?"
//! - Issuing, validating, and rotating renewable tokens
//! - Running the background GC and snapshot jobs
//!
//! # Concurrency note
//!
//! Every method takes `&self`. The store does its own locking, and the two
//! job slots sit behind their own mutexes, so one `SessionManager` is
//! shared across request tasks behind an `Arc` with no outer lock.
//!
//! Token renewal is read-then-write against the store, not a
//! compare-and-swap. Two requests renewing the same token at the same
//! moment both succeed; the later write wins and the other caller's new
//! token is already stale, which revokes the session on its next use.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use linkforge_protocol::{OwnerId, SessionId};
use linkforge_tick::{PeriodicTask, TaskHandle, TickConfig, TickError, TickMetrics};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::session::expiry_after;
use crate::{
    MemoryStore, PersistenceError, Session, SessionConfig, SessionError, SessionStore, TokenSigner,
    now_secs, snapshot,
};

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// The background jobs a manager can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// Periodic removal of expired sessions.
    Gc,
    /// Periodic snapshot dump.
    Snapshot,
}

impl Job {
    fn task_name(self) -> &'static str {
        match self {
            Self::Gc => "auto-gc",
            Self::Snapshot => "auto-snapshot",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.task_name())
    }
}

/// Outcome of [`SessionManager::check_valid_session`].
///
/// None of these is an error: "not valid" is an ordinary answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCheck {
    /// No such session.
    Missing,
    /// The session exists but belongs to someone else.
    WrongOwner(Session),
    /// The session had expired. It has been removed from the store.
    Expired(Session),
    /// The session exists, is unexpired, and belongs to the claimed owner.
    Valid(Session),
}

impl SessionCheck {
    /// `true` only for [`SessionCheck::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The record that was looked at, if there was one.
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Missing => None,
            Self::WrongOwner(s) | Self::Expired(s) | Self::Valid(s) => Some(s),
        }
    }

    /// Short machine-readable reason, for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::WrongOwner(_) => "wrong_owner",
            Self::Expired(_) => "expired",
            Self::Valid(_) => "valid",
        }
    }
}

/// Result of a successful [`SessionManager::validate_and_renew`].
#[derive(Clone, PartialEq, Eq)]
pub struct Renewal {
    /// The owner of the session the token was bound to.
    pub owner_id: OwnerId,
    /// That session.
    pub session_id: SessionId,
    /// The new current token. The one presented is now superseded.
    pub token: String,
}

impl fmt::Debug for Renewal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renewal")
            .field("owner_id", &self.owner_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Filter and page for [`SessionManager::list`].
///
/// ```rust
/// use linkforge_protocol::OwnerId;
/// use linkforge_session::SessionQuery;
///
/// let page = SessionQuery::all().owned_by(OwnerId::new("u1")).limit(20).offset(40);
/// assert_eq!(page.limit, Some(20));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionQuery {
    /// Only sessions of this owner. `None` means everyone.
    pub owner: Option<OwnerId>,
    /// At most this many results.
    pub limit: Option<usize>,
    /// Skip this many results first.
    pub offset: usize,
}

impl SessionQuery {
    /// Every session, unpaged.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one owner.
    pub fn owned_by(mut self, owner: OwnerId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Cap the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `offset` results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Manages every session in one store.
///
/// ## Lifecycle
///
/// ```text
/// create() ──→ generate_token() ──→ validate_and_renew() ──→ (new token) ──┐
///                                          ↑                               │
///                                          └───────────────────────────────┘
///
/// exits: delete()              explicit logout
///        gc() / auto-gc        expires_on < now
///        validate_and_renew()  expired, or a superseded token was presented
///        check_valid_session() expired
/// ```
///
/// Dropping the manager stops its background jobs.
pub struct SessionManager<S: SessionStore = MemoryStore> {
    store: Arc<S>,
    config: SessionConfig,
    signer: TokenSigner,
    gc_job: Mutex<Option<TaskHandle>>,
    snapshot_job: Mutex<Option<TaskHandle>>,
}

impl SessionManager<MemoryStore> {
    /// A manager over a fresh, empty [`MemoryStore`].
    pub fn new(config: SessionConfig) -> Self {
        Self::with_store(MemoryStore::new(), config)
    }
}

impl<S: SessionStore> SessionManager<S> {
    /// A manager over an existing store.
    pub fn with_store(store: S, config: SessionConfig) -> Self {
        let signer = if config.token_secret.is_empty() {
            warn!("no token secret configured, using a random key; tokens will not survive a restart");
            TokenSigner::random()
        } else {
            TokenSigner::new(config.token_secret.as_bytes())
        };

        Self {
            store: Arc::new(store),
            config,
            signer,
            gc_job: Mutex::new(None),
            snapshot_job: Mutex::new(None),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // -- Creation ---------------------------------------------------------

    /// Creates and stores a session for `owner_id` that expires after
    /// `expire_after` (zero means never).
    ///
    /// The id is 128 random bits as 32 lowercase hex characters, redrawn
    /// if it is already taken.
    ///
    /// # Errors
    /// - [`SessionError::InvalidOwner`]: `owner_id` is empty
    /// - store failures propagate
    pub fn create(&self, owner_id: OwnerId, expire_after: Duration) -> Result<Session, SessionError> {
        if owner_id.is_empty() {
            return Err(SessionError::InvalidOwner);
        }
        let id = self.fresh_id()?;
        let now = now_secs();
        let session = Session::new(id, owner_id, now, expiry_after(now, expire_after));

        self.store.add(session.clone())?;

        info!(
            session_id = %session.id,
            owner_id = %session.owner_id,
            expires_on = session.expires_on,
            "session created"
        );
        Ok(session)
    }

    /// [`create`](Self::create) with the configured default lifetime.
    pub fn create_default(&self, owner_id: OwnerId) -> Result<Session, SessionError> {
        self.create(owner_id, self.config.default_ttl())
    }

    fn fresh_id(&self) -> Result<SessionId, SessionError> {
        loop {
            let bytes: [u8; 16] = rand::rng().random();
            let id = SessionId::new(hex::encode(bytes));
            match self.store.get(&id) {
                Err(SessionError::NotFound(_)) => return Ok(id),
                Ok(_) => warn!(session_id = %id, "session id collision, drawing again"),
                Err(e) => return Err(e),
            }
        }
    }

    // -- Store pass-through ----------------------------------------------

    /// See [`SessionStore::get`].
    pub fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        self.store.get(id)
    }

    /// See [`SessionStore::get_by_owner`].
    pub fn get_by_owner(
        &self,
        owner: &OwnerId,
    ) -> Result<std::collections::HashMap<SessionId, Session>, SessionError> {
        self.store.get_by_owner(owner)
    }

    /// See [`SessionStore::add`].
    pub fn add(&self, session: Session) -> Result<(), SessionError> {
        self.store.add(session)
    }

    /// See [`SessionStore::update`].
    pub fn update(&self, session: Session) -> Result<(), SessionError> {
        self.store.update(session)
    }

    /// Removes a session (logout). Deleting an absent id is fine.
    pub fn delete(&self, id: &SessionId) -> Result<(), SessionError> {
        if self.store.delete(id)? {
            info!(session_id = %id, "session deleted");
        }
        Ok(())
    }

    /// Runs one GC sweep now. Returns how many sessions were removed.
    pub fn gc(&self) -> Result<usize, SessionError> {
        let evicted = self.store.gc(now_secs())?;
        if evicted > 0 {
            info!(evicted, "expired sessions collected");
        } else {
            debug!("gc found nothing to collect");
        }
        Ok(evicted)
    }

    /// Number of stored sessions, expired ones included.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// `true` if no sessions are stored.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    // -- Ownership --------------------------------------------------------

    /// Looks up `session_id` and checks it belongs to `claimed_owner`.
    ///
    /// An expired session is reported as [`SessionCheck::Expired`] and
    /// removed on the spot, whether or not auto-GC is running.
    ///
    /// # Errors
    /// Only store failures. A missing session is [`SessionCheck::Missing`].
    pub fn check_valid_session(
        &self,
        session_id: &SessionId,
        claimed_owner: &OwnerId,
    ) -> Result<SessionCheck, SessionError> {
        let session = match self.store.get(session_id) {
            Ok(session) => session,
            Err(SessionError::NotFound(_)) => return Ok(SessionCheck::Missing),
            Err(e) => return Err(e),
        };

        if session.is_expired_at(now_secs()) {
            self.store.delete(session_id)?;
            info!(%session_id, owner_id = %session.owner_id, "expired session removed on access");
            return Ok(SessionCheck::Expired(session));
        }
        if session.owner_id != *claimed_owner {
            return Ok(SessionCheck::WrongOwner(session));
        }
        Ok(SessionCheck::Valid(session))
    }

    /// Deletes `session_id` on behalf of `requester`.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]: no such session
    /// - [`SessionError::Forbidden`]: it belongs to someone else
    pub fn delete_owned(&self, requester: &OwnerId, session_id: &SessionId) -> Result<(), SessionError> {
        let session = self.store.get(session_id)?;
        if session.owner_id != *requester {
            return Err(SessionError::Forbidden(session_id.clone()));
        }
        self.delete(session_id)
    }

    /// Deletes every session of `owner` ("log out everywhere"). Returns
    /// how many were removed.
    pub fn delete_by_owner(&self, owner: &OwnerId) -> Result<usize, SessionError> {
        let mut removed = 0;
        for id in self.store.get_by_owner(owner)?.into_keys() {
            if self.store.delete(&id)? {
                removed += 1;
            }
        }
        info!(owner_id = %owner, removed, "sessions deleted for owner");
        Ok(removed)
    }

    /// Sessions matching `query`, oldest first (ties broken by id).
    pub fn list(&self, query: &SessionQuery) -> Result<Vec<Session>, SessionError> {
        let mut sessions: Vec<Session> = match &query.owner {
            Some(owner) => self.store.get_by_owner(owner)?.into_values().collect(),
            None => self.store.export()?,
        };
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(sessions
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    // -- Token protocol ---------------------------------------------------

    /// Returns the owner of the session `token` is bound to.
    ///
    /// This only checks the signature and the session's expiry. It does
    /// not check that `token` is the current one and never rotates it;
    /// that is [`validate_and_renew`](Self::validate_and_renew)'s job.
    ///
    /// # Errors
    /// - [`SessionError::InvalidToken`]: malformed or not signed by us
    /// - [`SessionError::NotFound`]: the session is gone
    /// - [`SessionError::ExpiredToken`]: the session has expired
    pub fn validate_token(&self, token: &str) -> Result<OwnerId, SessionError> {
        let session_id = self.signer.verify(token)?;
        let session = self.store.get(&session_id)?;
        if session.is_expired_at(now_secs()) {
            return Err(SessionError::ExpiredToken);
        }
        Ok(session.owner_id)
    }

    /// Issues a new token for `session_id`, making it the only accepted
    /// one, and returns it.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the session doesn't exist. A session
    /// deleted concurrently is never brought back.
    pub fn generate_token(&self, session_id: &SessionId) -> Result<String, SessionError> {
        let token = self.signer.issue(session_id)?;
        self.store.replace_token(session_id, None, token.clone())?;

        debug!(%session_id, "token issued");
        Ok(token)
    }

    /// Validates `token` and rotates it.
    ///
    /// 1. Malformed or unsigned → [`SessionError::InvalidToken`].
    /// 2. Session absent → [`SessionError::NotFound`].
    /// 3. Session expired → session deleted, [`SessionError::ExpiredToken`].
    /// 4. `token` is not the session's current token → session deleted,
    ///    [`SessionError::ExpiredToken`]. A superseded token showing up
    ///    means it was copied or replayed.
    /// 5. Otherwise a new token is issued and returned with the owner.
    ///
    /// The swap in step 5 is conditional on `token` still being current,
    /// so of two requests presenting the same token only one is renewed.
    /// The other is treated as step 4. A session removed between the
    /// lookup and the swap stays removed ([`SessionError::NotFound`]).
    pub fn validate_and_renew(&self, token: &str) -> Result<Renewal, SessionError> {
        let session_id = self.signer.verify(token)?;
        let session = self.store.get(&session_id)?;

        if session.is_expired_at(now_secs()) {
            self.store.delete(&session_id)?;
            info!(%session_id, owner_id = %session.owner_id, "expired session removed on renewal");
            return Err(SessionError::ExpiredToken);
        }

        if session.last_token != token {
            self.store.delete(&session_id)?;
            warn!(%session_id, owner_id = %session.owner_id, "superseded token presented, session revoked");
            return Err(SessionError::ExpiredToken);
        }

        let renewed = self.signer.issue(&session_id)?;
        match self.store.replace_token(&session_id, Some(token), renewed.clone()) {
            Ok(()) => {}
            Err(SessionError::ExpiredToken) => {
                self.store.delete(&session_id)?;
                warn!(%session_id, owner_id = %session.owner_id, "token used concurrently, session revoked");
                return Err(SessionError::ExpiredToken);
            }
            Err(e) => return Err(e),
        }

        debug!(%session_id, "token renewed");
        Ok(Renewal {
            owner_id: session.owner_id,
            session_id,
            token: renewed,
        })
    }

    // -- Background jobs --------------------------------------------------

    /// Starts a job that runs [`gc`](SessionStore::gc) every `interval`.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyRunning`] if auto-GC is already on
    /// - [`SessionError::NoRuntime`] outside a Tokio runtime
    pub fn enable_auto_gc(&self, interval: Duration) -> Result<(), SessionError> {
        self.enable_auto_gc_with(TickConfig::with_interval(interval))
    }

    /// [`enable_auto_gc`](Self::enable_auto_gc) with full control over the
    /// schedule (first-run jitter, run-time metrics).
    pub fn enable_auto_gc_with(&self, tick: TickConfig) -> Result<(), SessionError> {
        let mut slot = self.gc_job.lock();
        if slot.is_some() {
            return Err(SessionError::AlreadyRunning(Job::Gc));
        }

        let store = Arc::clone(&self.store);
        let interval = tick.interval;
        let handle = PeriodicTask::spawn(Job::Gc.task_name(), tick, move || {
            let store = Arc::clone(&store);
            async move {
                let evicted = store.gc(now_secs())?;
                if evicted > 0 {
                    info!(evicted, "auto-gc collected expired sessions");
                }
                Ok::<(), SessionError>(())
            }
        })
        .map_err(no_runtime)?;

        *slot = Some(handle);
        info!(interval_ms = interval.as_millis() as u64, "auto-gc enabled");
        Ok(())
    }

    /// Stops auto-GC. A sweep already running finishes; no new one starts.
    ///
    /// # Errors
    /// [`SessionError::NotRunning`] if auto-GC is off.
    pub fn disable_auto_gc(&self) -> Result<(), SessionError> {
        Self::disable(&self.gc_job, Job::Gc)
    }

    /// Whether auto-GC is on.
    pub fn is_auto_gc_running(&self) -> bool {
        self.gc_job.lock().is_some()
    }

    /// Starts a job that dumps a snapshot to `path` every `interval`.
    ///
    /// A failed dump is logged and retried on the next tick.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyRunning`] if auto-snapshot is already on
    /// - [`SessionError::NoRuntime`] outside a Tokio runtime
    pub fn enable_auto_snapshot(&self, path: impl Into<PathBuf>, interval: Duration) -> Result<(), SessionError> {
        self.enable_auto_snapshot_with(path, TickConfig::with_interval(interval))
    }

    /// [`enable_auto_snapshot`](Self::enable_auto_snapshot) with full
    /// control over the schedule.
    pub fn enable_auto_snapshot_with(&self, path: impl Into<PathBuf>, tick: TickConfig) -> Result<(), SessionError> {
        let mut slot = self.snapshot_job.lock();
        if slot.is_some() {
            return Err(SessionError::AlreadyRunning(Job::Snapshot));
        }

        let path = path.into();
        let store = Arc::clone(&self.store);
        let job_path = path.clone();
        let interval = tick.interval;
        let handle = PeriodicTask::spawn(Job::Snapshot.task_name(), tick, move || {
            let dump = dump_blocking(Arc::clone(&store), job_path.clone());
            async move { dump.await.map(|_| ()) }
        })
        .map_err(no_runtime)?;

        *slot = Some(handle);
        info!(path = %path.display(), interval_ms = interval.as_millis() as u64, "auto-snapshot enabled");
        Ok(())
    }

    /// Stops auto-snapshot. A dump already running finishes.
    ///
    /// # Errors
    /// [`SessionError::NotRunning`] if auto-snapshot is off.
    pub fn disable_auto_snapshot(&self) -> Result<(), SessionError> {
        Self::disable(&self.snapshot_job, Job::Snapshot)
    }

    /// Whether auto-snapshot is on.
    pub fn is_auto_snapshot_running(&self) -> bool {
        self.snapshot_job.lock().is_some()
    }

    /// Run counters of `job` as of its last completed run, or `None` if
    /// it is off.
    pub fn job_metrics(&self, job: Job) -> Option<TickMetrics> {
        let slot = match job {
            Job::Gc => &self.gc_job,
            Job::Snapshot => &self.snapshot_job,
        };
        slot.lock().as_ref().map(TaskHandle::metrics)
    }

    /// Stops whichever jobs are running and waits for any in-flight sweep
    /// or dump to finish. Used on shutdown, before the final snapshot.
    pub async fn stop_background_jobs(&self) {
        // Take the handles out first: the slot locks must not be held
        // across an await.
        let gc = self.gc_job.lock().take();
        let snapshot = self.snapshot_job.lock().take();
        for handle in [gc, snapshot].into_iter().flatten() {
            handle.shutdown().await;
        }
    }

    fn disable(slot: &Mutex<Option<TaskHandle>>, job: Job) -> Result<(), SessionError> {
        let handle = slot.lock().take().ok_or(SessionError::NotRunning(job))?;
        handle.stop();
        info!(job = %job, "background job disabled");
        Ok(())
    }

    // -- Snapshots --------------------------------------------------------

    /// Dumps the store to `path` now. Returns the number of records
    /// written. The file work runs on Tokio's blocking pool.
    pub async fn dump_snapshot(&self, path: impl AsRef<Path>) -> Result<usize, SessionError> {
        dump_blocking(Arc::clone(&self.store), path.as_ref().to_path_buf()).await
    }

    /// Replaces the store contents with the snapshot at `path`. Meant for
    /// startup, before any traffic is served.
    pub async fn restore_snapshot(&self, path: impl AsRef<Path>) -> Result<usize, SessionError> {
        let store = Arc::clone(&self.store);
        let path = path.as_ref().to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || snapshot::restore(&*store, &path))
            .await
            .map_err(join_failure)??;
        info!(sessions = loaded, "sessions restored from snapshot");
        Ok(loaded)
    }
}

impl<S: SessionStore> fmt::Debug for SessionManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.store.len())
            .field("config", &self.config)
            .field("auto_gc", &self.is_auto_gc_running())
            .field("auto_snapshot", &self.is_auto_snapshot_running())
            .finish()
    }
}

async fn dump_blocking<S: SessionStore>(store: Arc<S>, path: PathBuf) -> Result<usize, SessionError> {
    tokio::task::spawn_blocking(move || snapshot::dump(&*store, &path))
        .await
        .map_err(join_failure)?
}

fn join_failure(e: tokio::task::JoinError) -> SessionError {
    PersistenceError::Io(std::io::Error::other(e)).into()
}

fn no_runtime(_: TickError) -> SessionError {
    SessionError::NoRuntime
}

// =========================================================================
// Tests
// =========================================================================
