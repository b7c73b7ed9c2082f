//! Relay Manager
//!
//! Owns the local SOCKS5 listener, tracks live sessions, and reclaims the
//! ones that have gone idle or finished.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{lookup_host, TcpListener};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use anyhow::{anyhow, Context};

use crate::config::Config;
use crate::crypto::{lookup_cipher, CipherSpec};
use crate::error::RelayError;
use crate::Result;

use super::tcp::TcpRelaySession;
use super::ActivityTracker;

/// One tracked session: the relay task plus its activity clock.
struct SessionHandle {
    peer_addr: SocketAddr,
    activity: Arc<ActivityTracker>,
    task: JoinHandle<()>,
}

/// Accepts SOCKS5 clients and drives their relay sessions to completion.
pub struct RelayManager {
    config: Config,
    spec: &'static CipherSpec,
    server_addr: SocketAddr,
    // Taken by `run`, so the socket is released as soon as the accept
    // loop stops instead of lingering until the manager is dropped.
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    sessions: Arc<Mutex<HashMap<u64, SessionHandle>>>,
    next_session_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayManager {
    /// Resolve the remote server and bind the local listener.
    pub async fn bind(config: Config) -> Result<Self> {
        let spec = lookup_cipher(&config.profile.method)
            .ok_or_else(|| anyhow!("unsupported cipher method '{}'", config.profile.method))?;

        let server_host = format!(
            "{}:{}",
            config.profile.server, config.profile.server_port
        );
        let server_addr = lookup_host(&server_host)
            .await
            .with_context(|| format!("Failed to resolve server address {}", server_host))?
            .next()
            .ok_or_else(|| anyhow!("DNS resolution returned no addresses for {}", server_host))?;
        debug!("Resolved relay server {} to {}", server_host, server_addr);

        let bind_addr = format!("0.0.0.0:{}", config.profile.local_port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind local listener on {}", bind_addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read local listener address")?;

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            "Relay listening on {} using {} via {}",
            local_addr, spec.name, server_addr
        );

        Ok(Self {
            config,
            spec,
            server_addr,
            listener: Mutex::new(Some(listener)),
            local_addr,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_session_id: AtomicU64::new(1),
            shutdown_tx,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of sessions currently tracked.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Accept loop. Runs until `terminate` is called; the listening
    /// socket is closed when the loop stops.
    pub async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("relay manager is already running or terminated"))?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut sweep_tick = tokio::time::interval(self.config.relay.sweep_interval);
        sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => self.spawn_session(stream, peer_addr),
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = sweep_tick.tick() => {
                    self.sweep();
                }
                _ = shutdown_rx.recv() => {
                    info!("Relay manager shutting down");
                    break;
                }
            }
        }

        drop(listener);
        debug!("Listener closed");
        Ok(())
    }

    /// Hand an accepted client off to its own session task.
    fn spawn_session(&self, stream: tokio::net::TcpStream, peer_addr: SocketAddr) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let activity = Arc::new(ActivityTracker::new());
        activity.touch();

        let session = TcpRelaySession::new(
            session_id,
            stream,
            peer_addr,
            self.server_addr,
            self.spec,
            &self.config,
            activity.clone(),
        );

        let shutdown_rx = self.shutdown_tx.subscribe();
        let sessions = self.sessions.clone();
        let task = tokio::spawn(async move {
            debug!(session_id, %peer_addr, "Session started");
            if let Err(e) = session.run(shutdown_rx).await {
                warn!(session_id, %peer_addr, "Session ended with error: {:#}", e);
            } else {
                debug!(session_id, %peer_addr, "Session completed");
            }
            sessions.lock().unwrap().remove(&session_id);
        });

        self.sessions.lock().unwrap().insert(
            session_id,
            SessionHandle {
                peer_addr,
                activity,
                task,
            },
        );
    }

    /// Drop sessions whose task has finished or that exceeded the idle
    /// timeout. Idle sessions are aborted; their task cleanup already ran
    /// or will observe the abort.
    fn sweep(&self) {
        let timeout = self.config.profile.timeout;
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|session_id, handle| {
            if handle.task.is_finished() {
                debug!(session_id, "Sweeping finished session");
                return false;
            }
            let idle = handle.activity.idle_for();
            if idle > timeout {
                info!(
                    session_id,
                    peer_addr = %handle.peer_addr,
                    "Terminating session: {}",
                    RelayError::IdleTimeout(idle)
                );
                handle.task.abort();
                return false;
            }
            true
        });
    }

    /// Stop the accept loop, close the listener and tear down every live
    /// session.
    pub fn terminate(&self) {
        // Receivers may already be gone when nothing is running.
        let _ = self.shutdown_tx.send(());

        // If `run` was never started the listener is still here.
        drop(self.listener.lock().unwrap().take());

        let mut sessions = self.sessions.lock().unwrap();
        for (session_id, handle) in sessions.drain() {
            debug!(session_id, peer_addr = %handle.peer_addr, "Aborting session");
            handle.task.abort();
        }
        info!("All sessions terminated");
    }
}
