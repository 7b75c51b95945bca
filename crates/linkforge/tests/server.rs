//! Integration tests for the Linkforge server over real sockets: startup
//! restore, gated requests, and the shutdown snapshot.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{Extension, Router, routing::get};
use linkforge::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

// =========================================================================
// Helpers
// =========================================================================

async fn me(Extension(identity): Extension<Identity>) -> String {
    identity.owner_id.to_string()
}

fn builder(snapshot: &std::path::Path) -> LinkforgeServerBuilder {
    LinkforgeServer::builder()
        .bind("127.0.0.1:0")
        .session_config(SessionConfig::default().with_token_secret("server-secret"))
        .no_auto_gc()
        .auto_snapshot(snapshot, Duration::from_secs(3600))
}

/// Minimal HTTP/1.1 GET; returns the raw response.
async fn http_get(addr: SocketAddr, path: &str, headers: &[(&str, &str)]) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("should connect");
    let mut request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_serve_gated_route_then_snapshot_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let server = builder(&path).build().await.expect("server should build");
    let addr = server.local_addr().unwrap();
    let session = server
        .manager()
        .create(OwnerId::new("u1"), Duration::from_secs(3600))
        .unwrap();
    assert!(server.manager().is_auto_snapshot_running());

    let app = server.protect(Router::new().route("/me", get(me)));
    let (stop, stopped) = oneshot::channel::<()>();
    let running = tokio::spawn(server.run_until(app, async move {
        let _ = stopped.await;
    }));

    let credential = Credential::encode_pair(&session.id, &OwnerId::new("u1"));
    let ok = http_get(addr, "/me", &[("X-Auth", &credential)]).await;
    let denied = http_get(addr, "/me", &[]).await;

    assert!(ok.starts_with("HTTP/1.1 200"), "got: {ok}");
    assert!(ok.ends_with("u1"));
    assert!(denied.starts_with("HTTP/1.1 401"), "got: {denied}");

    stop.send(()).unwrap();
    running.await.unwrap().expect("clean shutdown");
    assert!(path.exists(), "shutdown should write a final snapshot");

    // A fresh server on the same snapshot knows the session.
    let restarted = builder(&path).build().await.unwrap();
    assert_eq!(restarted.manager().get(&session.id).unwrap(), session);
}

#[tokio::test]
async fn test_build_without_snapshot_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();

    let server = builder(&dir.path().join("absent.json")).build().await.unwrap();

    assert!(server.manager().is_empty());
    assert!(!server.manager().is_auto_gc_running());
}

#[tokio::test]
async fn test_build_with_corrupt_snapshot_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    std::fs::write(&path, b"not json").unwrap();

    let result = builder(&path).build().await;

    assert!(matches!(result, Err(LinkforgeError::Session(SessionError::Persistence(_)))));
}

#[tokio::test]
async fn test_build_enables_auto_gc_by_default() {
    let server = LinkforgeServer::builder().bind("127.0.0.1:0").build().await.unwrap();

    assert!(server.manager().is_auto_gc_running());
    assert!(!server.manager().is_auto_snapshot_running());
}

#[tokio::test]
async fn test_build_with_jitter_still_starts_both_jobs() {
    let dir = tempfile::tempdir().unwrap();

    let server = builder(&dir.path().join("s.json"))
        .auto_gc(Duration::from_secs(30))
        .job_jitter(Duration::from_secs(5))
        .build()
        .await
        .unwrap();

    assert!(server.manager().is_auto_gc_running());
    assert!(server.manager().is_auto_snapshot_running());
    assert_eq!(server.manager().job_metrics(Job::Gc).unwrap().total_ticks, 0);
}

#[tokio::test]
async fn test_build_on_taken_port_is_io_error() {
    let first = LinkforgeServer::builder().bind("127.0.0.1:0").build().await.unwrap();
    let taken = first.local_addr().unwrap().to_string();

    let result = LinkforgeServer::builder().bind(&taken).build().await;

    assert!(matches!(result, Err(LinkforgeError::Io(_))));
}
