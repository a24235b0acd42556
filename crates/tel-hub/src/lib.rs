//! Websocket broadcast hub exposed as a distributor sink.
//!
//! Clients connect to the configured endpoint and must send
//! `{"name":"authentication_message","payload":"<secret>"}` within the
//! authentication grace period. Only authenticated clients receive events.

mod connection;
mod registry;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tel_core::{Sink, SinkContext, SinkError};
use tel_protocol::Event;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use connection::{accept_loop, sweep_loop, ConnectionSettings};
use registry::ClientRegistry;

pub use connection::AUTHENTICATION_MESSAGE;

pub const HUB_SINK_KEY: &str = "websocket";

#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("hub is not running")]
    NotRunning,
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{failed} of {attempted} clients could not be reached")]
    Delivery { failed: usize, attempted: usize },
}

impl From<HubError> for SinkError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Bind { .. } => SinkError::Setup(err.to_string()),
            HubError::NotRunning => SinkError::NotInitialized,
            HubError::Encode(_) => SinkError::Delivery(err.to_string()),
            HubError::Delivery { failed, attempted } => SinkError::Partial {
                failed,
                attempted,
                last: err.to_string(),
            },
        }
    }
}

#[derive(Clone)]
pub struct HubConfig {
    pub addr: String,
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub pong_wait: Duration,
    pub auth_grace: Duration,
    pub sweep_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9000".to_string(),
            endpoint: "/ws".to_string(),
            username: String::new(),
            password: String::new(),
            pong_wait: Duration::from_secs(10),
            auth_grace: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConfig")
            .field("addr", &self.addr)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("pong_wait", &self.pong_wait)
            .field("auth_grace", &self.auth_grace)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

impl HubConfig {
    /// Pings go out at nine tenths of the pong wait.
    pub fn ping_interval(&self) -> Duration {
        self.pong_wait * 9 / 10
    }

    pub fn secret(&self) -> String {
        shared_secret(&self.username, &self.password)
    }
}

/// Base64 of `username:password`.
pub fn shared_secret(username: &str, password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"))
}

struct HubRuntime {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct BroadcastHub {
    config: HubConfig,
    registry: Arc<ClientRegistry>,
    runtime: Mutex<Option<HubRuntime>>,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ClientRegistry::default()),
            runtime: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Bound address once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|runtime| runtime.local_addr)
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn authenticated_count(&self) -> usize {
        self.registry.authenticated_len()
    }

    fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    async fn start(&self, ctx: &SinkContext) -> Result<(), HubError> {
        let listener = TcpListener::bind(&self.config.addr)
            .await
            .map_err(|source| HubError::Bind {
                addr: self.config.addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| HubError::Bind {
            addr: self.config.addr.clone(),
            source,
        })?;
        let shutdown = ctx.shutdown_token().child_token();
        let settings = Arc::new(ConnectionSettings {
            endpoint: self.config.endpoint.clone(),
            secret: self.config.secret(),
            pong_wait: self.config.pong_wait,
            ping_interval: self.config.ping_interval(),
        });

        let tasks = vec![
            tokio::spawn(accept_loop(
                listener,
                Arc::clone(&self.registry),
                settings,
                shutdown.clone(),
            )),
            tokio::spawn(sweep_loop(
                Arc::clone(&self.registry),
                self.config.auth_grace,
                self.config.sweep_interval,
                shutdown.clone(),
            )),
        ];
        info!(
            addr = %local_addr,
            endpoint = %self.config.endpoint,
            "websocket hub listening"
        );

        let previous = self
            .runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(HubRuntime {
                local_addr,
                shutdown,
                tasks,
            });
        if let Some(previous) = previous {
            previous.shutdown.cancel();
        }
        Ok(())
    }

    fn broadcast(&self, event: &Event) -> Result<usize, HubError> {
        if !self.is_running() {
            return Err(HubError::NotRunning);
        }
        let text = serde_json::to_string(event)?;
        let delivery = self.registry.broadcast(&text);
        if delivery.failed > 0 {
            return Err(HubError::Delivery {
                failed: delivery.failed,
                attempted: delivery.attempted,
            });
        }
        Ok(delivery.attempted)
    }
}

#[async_trait]
impl Sink for BroadcastHub {
    fn key(&self) -> &str {
        HUB_SINK_KEY
    }

    async fn initialize(&self, ctx: &SinkContext) -> Result<(), SinkError> {
        self.start(ctx).await.map_err(SinkError::from)
    }

    async fn publish(&self, _ctx: &SinkContext, event: &Event) -> Result<(), SinkError> {
        self.broadcast(event).map(|_| ()).map_err(SinkError::from)
    }

    async fn shutdown(&self, _ctx: &SinkContext) -> Result<(), SinkError> {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(runtime) = runtime else {
            return Ok(());
        };
        runtime.shutdown.cancel();
        let closed = self.registry.remove_all("shutdown");
        for task in runtime.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "hub task failed");
            }
        }
        info!(clients = closed, "websocket hub stopped");
        Ok(())
    }
}
