//! `LinkforgeServer` builder and serve loop.
//!
//! This is the entry point for running the session core behind HTTP. It
//! ties the layers together: snapshot recovery, background jobs, the auth
//! gate, and an axum server with graceful shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use linkforge_session::{SessionConfig, SessionManager, TickConfig};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::LinkforgeError;
use crate::gate::{AuthGate, GateConfig};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where and how often to snapshot the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshot file. Restored at startup if it exists.
    pub path: PathBuf,
    /// Seconds between background dumps.
    pub interval_secs: u64,
}

/// Everything the server needs, in one deserializable struct.
///
/// Loading it (file, env, flags) is up to the binary embedding Linkforge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on. Default: `127.0.0.1:8080`.
    pub bind_addr: String,
    /// Session lifetime and token key.
    pub session: SessionConfig,
    /// Seconds between GC sweeps; `None` disables auto-GC. Default: 60.
    pub gc_interval_secs: Option<u64>,
    /// Snapshot persistence; `None` keeps sessions in memory only.
    pub snapshot: Option<SnapshotConfig>,
    /// Up to this many milliseconds of random delay before each background
    /// job's first run, so replicas started together don't sweep and dump
    /// in lockstep. Default: 0.
    pub job_jitter_ms: u64,
    /// Auth gate settings.
    pub gate: GateConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            session: SessionConfig::default(),
            gc_interval_secs: Some(60),
            snapshot: None,
            job_jitter_ms: 0,
            gate: GateConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a Linkforge server.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use axum::{Router, routing::get};
/// use linkforge::prelude::*;
///
/// # async fn run() -> Result<(), LinkforgeError> {
/// let server = LinkforgeServer::builder()
///     .bind("0.0.0.0:8080")
///     .auto_gc(Duration::from_secs(30))
///     .auto_snapshot("/var/lib/linkforge/sessions.json", Duration::from_secs(300))
///     .build()
///     .await?;
///
/// let app = server.protect(Router::new().route("/links", get(|| async { "[]" })));
/// server.run(app).await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LinkforgeServerBuilder {
    config: ServerConfig,
}

impl LinkforgeServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a complete config, e.g. one deserialized from a file.
    pub fn from_config(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Sweeps expired sessions every `interval` (rounded down to whole
    /// seconds, at least one).
    pub fn auto_gc(mut self, interval: Duration) -> Self {
        self.config.gc_interval_secs = Some(interval.as_secs().max(1));
        self
    }

    /// Turns auto-GC off.
    pub fn no_auto_gc(mut self) -> Self {
        self.config.gc_interval_secs = None;
        self
    }

    /// Restores from `path` at startup and dumps to it every `interval`
    /// (whole seconds, at least one) and on shutdown.
    pub fn auto_snapshot(mut self, path: impl Into<PathBuf>, interval: Duration) -> Self {
        self.config.snapshot = Some(SnapshotConfig {
            path: path.into(),
            interval_secs: interval.as_secs().max(1),
        });
        self
    }

    /// Delays each background job's first run by a random amount up to
    /// `jitter`.
    pub fn job_jitter(mut self, jitter: Duration) -> Self {
        self.config.job_jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the auth gate configuration.
    pub fn gate_config(mut self, config: GateConfig) -> Self {
        self.config.gate = config;
        self
    }

    /// Restores the snapshot (if configured and present), starts the
    /// background jobs, and binds the listener.
    ///
    /// # Errors
    /// A corrupt snapshot, a job that can't start, or a bind failure.
    pub async fn build(self) -> Result<LinkforgeServer, LinkforgeError> {
        let config = self.config;
        let manager = Arc::new(SessionManager::new(config.session.clone()));

        if let Some(snapshot) = &config.snapshot {
            restore_if_present(&manager, &snapshot.path).await?;
        }
        let jitter = Duration::from_millis(config.job_jitter_ms);
        if let Some(secs) = config.gc_interval_secs {
            manager.enable_auto_gc_with(TickConfig::with_interval(Duration::from_secs(secs)).with_jitter(jitter))?;
        }
        if let Some(snapshot) = &config.snapshot {
            let tick = TickConfig::with_interval(Duration::from_secs(snapshot.interval_secs)).with_jitter(jitter);
            manager.enable_auto_snapshot_with(snapshot.path.clone(), tick)?;
        }

        let listener = TcpListener::bind(&config.bind_addr).await?;

        Ok(LinkforgeServer {
            listener,
            manager,
            config,
        })
    }
}

async fn restore_if_present(manager: &SessionManager, path: &Path) -> Result<(), LinkforgeError> {
    if tokio::fs::try_exists(path).await? {
        manager.restore_snapshot(path).await?;
    } else {
        info!(path = %path.display(), "no snapshot found, starting with an empty store");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A bound Linkforge server.
///
/// Call [`run()`](Self::run) to start serving.
pub struct LinkforgeServer {
    listener: TcpListener,
    manager: Arc<SessionManager>,
    config: ServerConfig,
}

impl LinkforgeServer {
    /// Creates a new builder.
    pub fn builder() -> LinkforgeServerBuilder {
        LinkforgeServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The shared session manager, for login/logout handlers.
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// An auth gate backed by this server's manager.
    pub fn gate(&self) -> AuthGate<SessionManager> {
        AuthGate::new(Arc::clone(&self.manager), self.config.gate.clone())
    }

    /// Puts every route of `router` behind the auth gate. Merge
    /// unauthenticated routes (login, health) in afterwards.
    pub fn protect(&self, router: Router) -> Router {
        self.gate().protect(router)
    }

    /// Serves `router` until Ctrl-C.
    pub async fn run(self, router: Router) -> Result<(), LinkforgeError> {
        self.run_until(router, ctrl_c()).await
    }

    /// Serves `router` until `shutdown` resolves, then stops the
    /// background jobs and writes a final snapshot.
    pub async fn run_until(
        self,
        router: Router,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), LinkforgeError> {
        info!(addr = ?self.listener.local_addr().ok(), "linkforge server running");

        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("linkforge server stopping");
        self.manager.stop_background_jobs().await;
        if let Some(snapshot) = &self.config.snapshot {
            let written = self.manager.dump_snapshot(&snapshot.path).await?;
            info!(path = %snapshot.path.display(), sessions = written, "final snapshot written");
        }
        Ok(())
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C, serving until the process is killed");
        std::future::pending::<()>().await;
    }
}
