//! End-to-end tests for the session lifecycle: store properties, the
//! renewal protocol, background jobs, and snapshot recovery.
//!
//! Background-job tests run on real time because session expiry is
//! wall-clock epoch seconds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use linkforge_protocol::{Credential, OwnerId, SessionId};
use linkforge_session::{
    Authenticator, Job, MemoryStore, Session, SessionCheck, SessionConfig, SessionError, SessionManager,
    SessionStore, now_secs,
};

// =========================================================================
// Helpers
// =========================================================================

fn manager() -> SessionManager {
    SessionManager::new(SessionConfig::default().with_token_secret("integration-secret"))
}

fn owner(id: &str) -> OwnerId {
    OwnerId::new(id)
}

const HOUR: Duration = Duration::from_secs(3600);

// =========================================================================
// Store properties
// =========================================================================

#[test]
fn test_create_many_sessions_ids_are_unique() {
    let mgr = manager();

    let ids: HashSet<SessionId> = (0..1_000)
        .map(|i| mgr.create(owner(&format!("u{}", i % 7)), HOUR).unwrap().id)
        .collect();

    assert_eq!(ids.len(), 1_000);
    assert_eq!(mgr.len(), 1_000);
}

#[test]
fn test_get_after_update_reads_own_write() {
    let mgr = manager();
    let mut s = mgr.create(owner("u1"), HOUR).unwrap();

    s.expires_on += 60;
    s.last_token = "manually-set".into();
    mgr.update(s.clone()).unwrap();

    assert_eq!(mgr.get(&s.id).unwrap(), s);
}

#[test]
fn test_gc_removes_only_past_sessions() {
    let mgr = manager();
    let now = now_secs();
    let dead = Session::new(SessionId::new("dead"), owner("u1"), now - 10, now - 1);
    let alive = Session::new(SessionId::new("alive"), owner("u1"), now, now + 3600);
    mgr.add(dead.clone()).unwrap();
    mgr.add(alive.clone()).unwrap();

    assert_eq!(mgr.gc().unwrap(), 1);

    assert!(matches!(mgr.get(&dead.id), Err(SessionError::NotFound(_))));
    assert!(mgr.get(&alive.id).is_ok());
}

#[test]
fn test_delete_twice_is_not_an_error() {
    let mgr = manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();

    mgr.delete(&s.id).unwrap();
    mgr.delete(&s.id).unwrap();

    assert!(mgr.is_empty());
}

#[test]
fn test_get_by_owner_through_manager() {
    let mgr = manager();
    let a = mgr.create(owner("u1"), HOUR).unwrap();
    let b = mgr.create(owner("u1"), HOUR).unwrap();
    mgr.create(owner("u2"), HOUR).unwrap();

    let owned = mgr.get_by_owner(&owner("u1")).unwrap();

    assert_eq!(owned.len(), 2);
    assert_eq!(owned[&a.id], a);
    assert_eq!(owned[&b.id], b);
    assert!(mgr.get_by_owner(&owner("u3")).unwrap().is_empty());
}

#[test]
fn test_concurrent_readers_and_writers_never_see_torn_records() {
    let mgr = Arc::new(manager());
    let seed = mgr.create(owner("u1"), HOUR).unwrap();

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let mgr = Arc::clone(&mgr);
            std::thread::spawn(move || {
                for i in 0..200 {
                    let s = mgr.create(owner(&format!("w{w}")), HOUR).unwrap();
                    if i % 2 == 0 {
                        mgr.delete(&s.id).unwrap();
                    }
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let mgr = Arc::clone(&mgr);
            let seed = seed.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let got = mgr.get(&seed.id).unwrap();
                    assert_eq!(got, seed);
                }
            })
        })
        .collect();

    for t in writers.into_iter().chain(readers) {
        t.join().unwrap();
    }
    assert_eq!(mgr.len(), 1 + 4 * 100);
}

// =========================================================================
// check_valid_session()
// =========================================================================

#[test]
fn test_check_valid_session_owner_and_stranger() {
    let mgr = manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();

    let mine = mgr.check_valid_session(&s.id, &owner("u1")).unwrap();
    let theirs = mgr.check_valid_session(&s.id, &owner("u2")).unwrap();

    assert_eq!(mine, SessionCheck::Valid(s.clone()));
    assert!(!theirs.is_valid());
    assert_eq!(theirs.session(), Some(&s));
}

#[test]
fn test_check_valid_session_expired_without_gc_is_rejected_and_removed() {
    let mgr = manager();
    assert!(!mgr.is_auto_gc_running());
    let now = now_secs();
    let stale = Session::new(SessionId::new("stale"), owner("u1"), now - 100, now - 1);
    mgr.add(stale.clone()).unwrap();

    let check = mgr.check_valid_session(&stale.id, &owner("u1")).unwrap();

    assert_eq!(check, SessionCheck::Expired(stale.clone()));
    assert!(matches!(mgr.get(&stale.id), Err(SessionError::NotFound(_))));
    assert_eq!(
        mgr.check_valid_session(&stale.id, &owner("u1")).unwrap(),
        SessionCheck::Missing
    );
}

// =========================================================================
// Token renewal protocol
// =========================================================================

#[test]
fn test_validate_and_renew_expired_session_fails_and_deletes() {
    let mgr = manager();
    let now = now_secs();
    let s = Session::new(SessionId::new(hex_id(1)), owner("u1"), now - 100, now - 1);
    mgr.add(s.clone()).unwrap();
    let token = mgr.generate_token(&s.id).unwrap();

    let result = mgr.validate_and_renew(&token);

    assert!(matches!(result, Err(SessionError::ExpiredToken)));
    assert!(matches!(mgr.get(&s.id), Err(SessionError::NotFound(_))));
}

#[test]
fn test_validate_and_renew_superseded_token_revokes_session() {
    let mgr = manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();
    let first = mgr.generate_token(&s.id).unwrap();
    let _second = mgr.generate_token(&s.id).unwrap();

    let result = mgr.validate_and_renew(&first);

    assert!(matches!(result, Err(SessionError::ExpiredToken)));
    assert!(matches!(mgr.get(&s.id), Err(SessionError::NotFound(_))));
}

#[test]
fn test_validate_and_renew_current_token_yields_third_token() {
    let mgr = manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();
    let first = mgr.generate_token(&s.id).unwrap();
    let second = mgr.generate_token(&s.id).unwrap();

    let renewal = mgr.validate_and_renew(&second).unwrap();

    assert_eq!(renewal.owner_id, owner("u1"));
    assert_ne!(renewal.token, first);
    assert_ne!(renewal.token, second);
    assert_eq!(mgr.get(&s.id).unwrap().last_token, renewal.token);
}

#[test]
fn test_renewal_chain_then_replay_revokes() {
    let mgr = manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();
    let mut token = mgr.generate_token(&s.id).unwrap();
    let mut history = vec![token.clone()];

    for _ in 0..5 {
        token = mgr.validate_and_renew(&token).unwrap().token;
        history.push(token.clone());
    }

    // Replaying any older token in the chain tears the session down.
    assert!(matches!(mgr.validate_and_renew(&history[2]), Err(SessionError::ExpiredToken)));
    assert!(matches!(mgr.validate_and_renew(&token), Err(SessionError::NotFound(_))));
}

#[test]
fn test_tokens_from_another_manager_are_invalid() {
    let issuer = SessionManager::new(SessionConfig::default().with_token_secret("other-secret"));
    let s = issuer.create(owner("u1"), HOUR).unwrap();
    let token = issuer.generate_token(&s.id).unwrap();

    let verifier = manager();
    verifier.add(s).unwrap();

    assert!(matches!(verifier.validate_and_renew(&token), Err(SessionError::InvalidToken)));
}

fn hex_id(n: u8) -> String {
    format!("{n:02x}").repeat(16)
}

// =========================================================================
// Renewal under interleaving writers
// =========================================================================

type Hook = Box<dyn FnOnce(&MemoryStore) + Send>;

/// A [`MemoryStore`] that runs one armed hook right after the next `get`,
/// standing in for another request that lands between the manager's read
/// and its write.
#[derive(Default)]
struct InterleavingStore {
    inner: MemoryStore,
    after_get: parking_lot::Mutex<Option<Hook>>,
}

impl InterleavingStore {
    fn arm(&self, hook: impl FnOnce(&MemoryStore) + Send + 'static) {
        *self.after_get.lock() = Some(Box::new(hook));
    }
}

impl SessionStore for InterleavingStore {
    fn add(&self, session: Session) -> Result<(), SessionError> {
        self.inner.add(session)
    }

    fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        let found = self.inner.get(id);
        let hook = self.after_get.lock().take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        found
    }

    fn get_by_owner(&self, owner: &OwnerId) -> Result<HashMap<SessionId, Session>, SessionError> {
        self.inner.get_by_owner(owner)
    }

    fn update(&self, session: Session) -> Result<(), SessionError> {
        self.inner.update(session)
    }

    fn replace_token(&self, id: &SessionId, expected: Option<&str>, token: String) -> Result<(), SessionError> {
        self.inner.replace_token(id, expected, token)
    }

    fn delete(&self, id: &SessionId) -> Result<bool, SessionError> {
        self.inner.delete(id)
    }

    fn gc(&self, now: i64) -> Result<usize, SessionError> {
        self.inner.gc(now)
    }

    fn export(&self) -> Result<Vec<Session>, SessionError> {
        self.inner.export()
    }

    fn import(&self, sessions: Vec<Session>) -> Result<usize, SessionError> {
        self.inner.import(sessions)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

fn interleaving_manager() -> SessionManager<InterleavingStore> {
    SessionManager::with_store(
        InterleavingStore::default(),
        SessionConfig::default().with_token_secret("integration-secret"),
    )
}

#[test]
fn test_validate_and_renew_logout_mid_renewal_stays_logged_out() {
    let mgr = interleaving_manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();
    let token = mgr.generate_token(&s.id).unwrap();
    let id = s.id.clone();
    mgr.store().arm(move |store| {
        store.delete(&id).unwrap();
    });

    let result = mgr.validate_and_renew(&token);

    assert!(matches!(result, Err(SessionError::NotFound(_))));
    assert!(mgr.get(&s.id).is_err(), "a logged-out session must not come back");
}

#[test]
fn test_validate_and_renew_gc_mid_renewal_stays_collected() {
    let mgr = interleaving_manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();
    let token = mgr.generate_token(&s.id).unwrap();
    mgr.store().arm(|store| {
        // Collect everything, as if the clock had passed every expiry.
        store.gc(i64::MAX).unwrap();
    });

    assert!(mgr.validate_and_renew(&token).is_err());
    assert!(mgr.is_empty());
}

#[test]
fn test_validate_and_renew_duplicate_use_revokes_session() {
    let mgr = interleaving_manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();
    let token = mgr.generate_token(&s.id).unwrap();
    let id = s.id.clone();
    // Another presenter of the same token renews first.
    mgr.store().arm(move |store| {
        store.replace_token(&id, None, "renewed-elsewhere".into()).unwrap();
    });

    let result = mgr.validate_and_renew(&token);

    assert!(matches!(result, Err(SessionError::ExpiredToken)));
    assert!(matches!(mgr.get(&s.id), Err(SessionError::NotFound(_))));
}

#[test]
fn test_validate_and_renew_concurrent_presenters_at_most_one_wins() {
    let mgr = Arc::new(manager());
    let s = mgr.create(owner("u1"), HOUR).unwrap();
    let token = mgr.generate_token(&s.id).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mgr = Arc::clone(&mgr);
            let token = token.clone();
            std::thread::spawn(move || mgr.validate_and_renew(&token).is_ok())
        })
        .collect();
    let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();

    assert!(winners <= 1, "{winners} presenters of one token were all renewed");
    if winners == 0 {
        assert!(mgr.get(&s.id).is_err());
    }
}

// =========================================================================
// Authenticator
// =========================================================================

#[tokio::test]
async fn test_authenticate_session_pair_for_owner_returns_identity() {
    let mgr = manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();
    let cred = Credential::SessionPair {
        session_id: s.id.clone(),
        owner_id: owner("u1"),
    };

    let identity = mgr.authenticate(&cred).await.unwrap();

    assert_eq!(identity.owner_id, owner("u1"));
    assert_eq!(identity.session_id, s.id);
    assert_eq!(identity.renewed_token, None);
}

#[tokio::test]
async fn test_authenticate_session_pair_wrong_owner_is_auth_failure() {
    let mgr = manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();
    let cred = Credential::SessionPair {
        session_id: s.id,
        owner_id: owner("mallory"),
    };

    let err = mgr.authenticate(&cred).await.unwrap_err();

    assert!(matches!(err, SessionError::AuthFailed(_)));
    assert!(err.is_auth_failure());
}

#[tokio::test]
async fn test_authenticate_token_returns_rotated_token() {
    let mgr = Arc::new(manager());
    let s = mgr.create(owner("u1"), HOUR).unwrap();
    let token = mgr.generate_token(&s.id).unwrap();

    let identity = mgr.authenticate(&Credential::Token(token.clone())).await.unwrap();

    let renewed = identity.renewed_token.unwrap();
    assert_ne!(renewed, token);
    assert_eq!(mgr.get(&s.id).unwrap().last_token, renewed);
}

// =========================================================================
// Background jobs
// =========================================================================

#[tokio::test]
async fn test_auto_gc_removes_expired_session_without_explicit_gc() {
    let mgr = manager();
    let s = mgr.create(owner("u1"), Duration::from_millis(500)).unwrap();

    mgr.enable_auto_gc(Duration::from_secs(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(2_600)).await;

    assert!(matches!(mgr.get(&s.id), Err(SessionError::NotFound(_))));
    mgr.disable_auto_gc().unwrap();
}

#[tokio::test]
async fn test_auto_gc_disabled_leaves_expired_session_stored() {
    let mgr = manager();
    let now = now_secs();
    let stale = Session::new(SessionId::new("stale"), owner("u1"), now - 10, now - 5);
    mgr.add(stale.clone()).unwrap();

    mgr.enable_auto_gc(Duration::from_millis(50)).unwrap();
    mgr.disable_auto_gc().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(mgr.get(&stale.id).is_ok());
}

#[tokio::test]
async fn test_auto_snapshot_writes_restorable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let mgr = manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();

    mgr.enable_auto_snapshot(&path, Duration::from_millis(100)).unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    mgr.stop_background_jobs().await;

    let recovered = manager();
    assert_eq!(recovered.restore_snapshot(&path).await.unwrap(), 1);
    assert_eq!(recovered.get(&s.id).unwrap(), s);
}

#[tokio::test]
async fn test_auto_snapshot_survives_failing_dumps() {
    let dir = tempfile::tempdir().unwrap();
    let bad_path = dir.path().join("missing-dir").join("sessions.json");
    let mgr = manager();

    mgr.enable_auto_snapshot(&bad_path, Duration::from_millis(50)).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Still scheduled after several failed dumps, each one counted.
    assert!(mgr.is_auto_snapshot_running());
    let metrics = mgr.job_metrics(Job::Snapshot).unwrap();
    assert!(metrics.total_failures >= 2, "{metrics:?}");
    assert_eq!(metrics.total_failures, metrics.total_ticks);
    mgr.disable_auto_snapshot().unwrap();
}

#[tokio::test]
async fn test_dropping_manager_stops_jobs() {
    let shared_store;
    {
        let mgr = manager();
        shared_store = Arc::clone(mgr.store());
        mgr.enable_auto_gc(Duration::from_millis(50)).unwrap();
    }
    let now = now_secs();
    shared_store
        .add(Session::new(SessionId::new("late"), owner("u1"), now - 10, now - 5))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(shared_store.len(), 1, "no GC should run once the manager is gone");
}

#[tokio::test]
async fn test_two_managers_have_independent_jobs() {
    let a = manager();
    let b = manager();

    a.enable_auto_gc(Duration::from_secs(60)).unwrap();
    b.enable_auto_gc(Duration::from_secs(60)).unwrap();
    a.disable_auto_gc().unwrap();

    assert!(!a.is_auto_gc_running());
    assert!(b.is_auto_gc_running());
}

// =========================================================================
// Snapshots through the manager
// =========================================================================

#[tokio::test]
async fn test_dump_then_restore_is_observationally_equal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let mgr = manager();
    for i in 0..25 {
        let s = mgr.create(owner(&format!("u{}", i % 3)), HOUR).unwrap();
        if i % 4 == 0 {
            mgr.generate_token(&s.id).unwrap();
        }
    }
    mgr.create(owner("forever"), Duration::ZERO).unwrap();

    assert_eq!(mgr.dump_snapshot(&path).await.unwrap(), 26);
    let restored = SessionManager::with_store(
        MemoryStore::new(),
        SessionConfig::default().with_token_secret("integration-secret"),
    );
    restored.restore_snapshot(&path).await.unwrap();

    let mut before = mgr.store().export().unwrap();
    let mut after = restored.store().export().unwrap();
    before.sort_by(|x, y| x.id.cmp(&y.id));
    after.sort_by(|x, y| x.id.cmp(&y.id));
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_restored_tokens_keep_working_with_same_secret() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let mgr = manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();
    let token = mgr.generate_token(&s.id).unwrap();
    mgr.dump_snapshot(&path).await.unwrap();

    let restarted = manager();
    restarted.restore_snapshot(&path).await.unwrap();

    assert_eq!(restarted.validate_and_renew(&token).unwrap().owner_id, owner("u1"));
}

#[tokio::test]
async fn test_restore_corrupt_snapshot_keeps_live_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    std::fs::write(&path, b"{\"sessions\": [ {\"id\": ").unwrap();
    let mgr = manager();
    let s = mgr.create(owner("u1"), HOUR).unwrap();

    let result = mgr.restore_snapshot(&path).await;

    assert!(matches!(result, Err(SessionError::Persistence(_))));
    assert_eq!(mgr.get(&s.id).unwrap(), s);
}
