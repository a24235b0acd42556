//! PostgreSQL / TimescaleDB sink. Each event becomes one row; the table is
//! provisioned outside the gateway.

mod sql;

use std::sync::Mutex;

use async_trait::async_trait;
use deadpool_postgres::{
    Config as PoolSettings, CreatePoolError, ManagerConfig, Pool, PoolConfig, PoolError,
    RecyclingMethod, Runtime,
};
use tel_core::{Sink, SinkContext, SinkError};
use tel_protocol::Event;
use thiserror::Error;
use tokio_postgres::NoTls;
use tracing::{debug, info};

pub use sql::insert_statement;

pub const STORE_SINK_KEY: &str = "timescale";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is not connected")]
    NotConnected,
    #[error("failed to create pool for {url}: {source}")]
    CreatePool {
        url: String,
        #[source]
        source: CreatePoolError,
    },
    #[error("failed to check out connection: {0}")]
    Checkout(#[from] PoolError),
    #[error("query failed: {0}")]
    Query(#[from] tokio_postgres::Error),
    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<StoreError> for SinkError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotConnected => SinkError::NotInitialized,
            StoreError::CreatePool { .. } => SinkError::Setup(err.to_string()),
            other => SinkError::Delivery(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub table: String,
    pub pool_size: usize,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.redacted_url())
            .field("table", &self.table)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

impl StoreConfig {
    /// Connection URL with the password masked, for logs and errors.
    pub fn redacted_url(&self) -> String {
        format!(
            "postgresql://{}:***@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    fn pool_settings(&self) -> PoolSettings {
        let mut settings = PoolSettings::new();
        settings.host = Some(self.host.clone());
        settings.port = Some(self.port);
        settings.user = Some(self.username.clone());
        if !self.password.is_empty() {
            settings.password = Some(self.password.clone());
        }
        settings.dbname = Some(self.database.clone());
        settings.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        settings.pool = Some(PoolConfig::new(self.pool_size.max(1)));
        settings
    }
}

pub struct TimescaleSink {
    config: StoreConfig,
    insert: String,
    pool: Mutex<Option<Pool>>,
}

impl TimescaleSink {
    pub fn new(config: StoreConfig) -> Self {
        let insert = insert_statement(&config.table);
        Self {
            config,
            insert,
            pool: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn pool(&self) -> Option<Pool> {
        self.pool
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn connect(&self) -> Result<(), StoreError> {
        let pool = self
            .config
            .pool_settings()
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|source| StoreError::CreatePool {
                url: self.config.redacted_url(),
                source,
            })?;
        // One checkout proves the database is reachable.
        let client = match pool.get().await {
            Ok(client) => client,
            Err(err) => {
                pool.close();
                return Err(err.into());
            }
        };
        drop(client);

        let previous = self
            .pool
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(pool);
        if let Some(previous) = previous {
            previous.close();
        }
        info!(
            url = %self.config.redacted_url(),
            table = %self.config.table,
            "store connected"
        );
        Ok(())
    }

    async fn insert(&self, event: &Event) -> Result<u64, StoreError> {
        let pool = self.pool().ok_or(StoreError::NotConnected)?;
        let value = serde_json::to_value(&event.value)?;
        let client = pool.get().await?;
        let statement = client.prepare_cached(&self.insert).await?;
        let rows = client
            .execute(
                &statement,
                &[
                    &event.timestamp,
                    &event.id,
                    &event.name,
                    &event.datatype.as_str(),
                    &event.source,
                    &value,
                ],
            )
            .await?;
        debug!(node_id = %event.id, rows, "event stored");
        Ok(rows)
    }
}

#[async_trait]
impl Sink for TimescaleSink {
    fn key(&self) -> &str {
        STORE_SINK_KEY
    }

    async fn initialize(&self, _ctx: &SinkContext) -> Result<(), SinkError> {
        self.connect().await.map_err(|err| match err {
            StoreError::CreatePool { .. } => SinkError::from(err),
            other => SinkError::Setup(other.to_string()),
        })
    }

    async fn publish(&self, _ctx: &SinkContext, event: &Event) -> Result<(), SinkError> {
        self.insert(event).await.map(|_| ()).map_err(SinkError::from)
    }

    async fn shutdown(&self, _ctx: &SinkContext) -> Result<(), SinkError> {
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(pool) = pool {
            pool.close();
            info!(url = %self.config.redacted_url(), "store closed");
        }
        Ok(())
    }
}
