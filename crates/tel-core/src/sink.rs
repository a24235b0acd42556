use async_trait::async_trait;
use tel_protocol::Event;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink is not initialized")]
    NotInitialized,
    #[error("sink setup failed: {0}")]
    Setup(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("{failed} of {attempted} deliveries failed, last error: {last}")]
    Partial {
        failed: usize,
        attempted: usize,
        last: String,
    },
    #[error("sink teardown failed: {0}")]
    Teardown(String),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Process-scoped context handed to every sink call.
#[derive(Clone, Debug, Default)]
pub struct SinkContext {
    shutdown: CancellationToken,
}

impl SinkContext {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }

    /// Background tasks started by a sink stop when this token fires.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Export backend driven by the distributor.
#[async_trait]
pub trait Sink: Send + Sync {
    fn key(&self) -> &str;

    async fn initialize(&self, ctx: &SinkContext) -> Result<(), SinkError>;

    async fn publish(&self, ctx: &SinkContext, event: &Event) -> Result<(), SinkError>;

    async fn shutdown(&self, ctx: &SinkContext) -> Result<(), SinkError>;
}
