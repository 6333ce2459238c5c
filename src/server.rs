//! TCP server for the socket policy protocol.
//!
//! Owns the listening endpoint and the bounded pool of connection
//! handlers, and exposes the host lifecycle contract:
//! init/start/pause/resume/stop/destroy plus a string-keyed attribute bag
//! and an opaque adapter reference the server itself never invokes.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::handler::handle_connection;
use crate::policy::{PolicyDocument, PolicyError};

/// Socket policy server instance
pub struct PolicyServer {
    config: Config,
    attributes: HashMap<String, String>,
    adapter: Option<Box<dyn Any + Send + Sync>>,
    policy: Option<PolicyDocument>,
    running: Option<RunningServer>,
}

/// State held while the acceptor loop is live
struct RunningServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    acceptor: JoinHandle<()>,
}

impl PolicyServer {
    /// Create a new server instance. Call `init` before `start`.
    pub fn new(config: Config) -> Self {
        PolicyServer {
            config,
            attributes: HashMap::new(),
            adapter: None,
            policy: None,
            running: None,
        }
    }

    /// Configured listening port.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Configured policy file path, if any.
    pub fn policy_file(&self) -> Option<&Path> {
        self.config.policy_file.as_deref()
    }

    /// Address actually bound, once started (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Store the host-supplied adapter. The server never invokes it.
    pub fn set_adapter(&mut self, adapter: Box<dyn Any + Send + Sync>) {
        self.adapter = Some(adapter);
    }

    pub fn adapter(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.adapter.as_deref()
    }

    /// Load the policy document. Must complete before `start`.
    ///
    /// An unreadable policy file is a fatal initialization error.
    pub fn init(&mut self) -> Result<(), PolicyError> {
        info!(
            port = self.config.port,
            policy_file = ?self.config.policy_file,
            "Initializing socket policy handler"
        );
        let policy = PolicyDocument::load(self.config.policy_file.as_deref())?;
        self.policy = Some(policy);
        Ok(())
    }

    /// Bind the listening endpoint and spawn the acceptor loop.
    ///
    /// Returns once the endpoint is bound; a bind failure is fatal and
    /// propagates to the caller.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        let policy = self.policy.clone().ok_or(ServerError::NotInitialized)?;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind(addr.clone(), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(addr, e))?;
        info!(address = %local_addr, "Policy server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let max_connections = self.config.max_connections;
        let limit = Arc::new(Semaphore::new(max_connections));
        let acceptor = tokio::spawn(accept_loop(
            listener,
            policy,
            limit,
            max_connections,
            shutdown_rx,
        ));

        self.running = Some(RunningServer {
            local_addr,
            shutdown: shutdown_tx,
            acceptor,
        });
        Ok(())
    }

    /// No degraded-serving mode exists; accepted as a no-op.
    pub fn pause(&self) {}

    /// Counterpart to `pause`; also a no-op.
    pub fn resume(&self) {}

    /// Stop accepting, close the listening endpoint, and wait for
    /// in-flight handlers to finish. In-flight handlers are not
    /// interrupted, so a slow client delays return.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.acceptor.await {
                error!(error = %e, "Acceptor task failed");
            }
            info!("Policy server stopped");
        }
    }

    /// Stop the server and release the policy document.
    pub async fn destroy(&mut self) {
        self.stop().await;
        self.policy = None;
    }
}

/// Accept connections until shutdown is signaled, handing each one to a
/// permit-holding handler task. Saturation rejects: a connection that
/// cannot get a permit is closed immediately, never queued.
async fn accept_loop(
    listener: TcpListener,
    policy: PolicyDocument,
    limit: Arc<Semaphore>,
    max_connections: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        match limit.clone().try_acquire_owned() {
                            Ok(permit) => {
                                debug!(peer = %addr, "New connection");
                                let policy = policy.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, policy).await {
                                        debug!(peer = %addr, error = %e, "Connection error");
                                    }
                                    drop(permit);
                                });
                            }
                            Err(_) => {
                                warn!(peer = %addr, "Connection limit reached, rejecting");
                                drop(stream);
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }
    }

    // Close the endpoint, then drain: taking every permit waits for all
    // in-flight handlers without interrupting them.
    drop(listener);
    if let Ok(permits) = limit.acquire_many(max_connections as u32).await {
        permits.forget();
    }
    debug!("Acceptor loop drained");
}

/// Server lifecycle errors
#[derive(Debug)]
pub enum ServerError {
    /// `start` was called before `init` loaded the policy document.
    NotInitialized,
    /// `start` was called while the acceptor loop is already live.
    AlreadyRunning,
    /// Binding the listening endpoint failed.
    Bind(String, std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::NotInitialized => {
                write!(f, "Server not initialized: call init() before start()")
            }
            ServerError::AlreadyRunning => write!(f, "Server already running"),
            ServerError::Bind(addr, e) => {
                write!(f, "Could not listen on {}: {}", addr, e)
            }
        }
    }
}

impl std::error::Error for ServerError {}
