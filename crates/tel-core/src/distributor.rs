use std::sync::atomic::{AtomicBool, Ordering};

use tel_protocol::Event;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{Sink, SinkContext, SinkError};

#[derive(Debug, Error)]
pub enum DistributorError {
    #[error("duplicate sink key: {0}")]
    DuplicateKey(String),
    #[error("failed to build sink {key}: {source}")]
    Build {
        key: String,
        #[source]
        source: SinkError,
    },
    #[error("failed to initialize sink {key}: {source}")]
    Initialize {
        key: String,
        #[source]
        source: SinkError,
    },
}

struct RegisteredSink {
    key: String,
    sink: Box<dyn Sink>,
}

/// Keyed sink registry with isolated fan-out. Registration happens before
/// the distributor is shared; afterwards the set is fixed.
pub struct Distributor {
    source: String,
    context: SinkContext,
    sinks: Vec<RegisteredSink>,
    shut_down: AtomicBool,
}

impl Distributor {
    pub fn new(source: impl Into<String>, context: SinkContext) -> Self {
        Self {
            source: source.into(),
            context,
            sinks: Vec::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Builds the registry from the configured exporter keys. Keys the
    /// factory does not know are logged and skipped.
    pub fn from_selection<F>(
        source: impl Into<String>,
        context: SinkContext,
        keys: &[String],
        mut factory: F,
    ) -> Result<Self, DistributorError>
    where
        F: FnMut(&str) -> Result<Option<Box<dyn Sink>>, SinkError>,
    {
        let mut distributor = Self::new(source, context);
        for key in keys {
            match factory(key) {
                Ok(Some(sink)) => distributor.register(sink)?,
                Ok(None) => warn!(%key, "no exporter registered for key, ignoring"),
                Err(source) => {
                    return Err(DistributorError::Build {
                        key: key.clone(),
                        source,
                    })
                }
            }
        }
        Ok(distributor)
    }

    pub fn register(&mut self, sink: Box<dyn Sink>) -> Result<(), DistributorError> {
        let key = sink.key().to_string();
        if self.sinks.iter().any(|entry| entry.key == key) {
            return Err(DistributorError::DuplicateKey(key));
        }
        debug!(%key, "sink registered");
        self.sinks.push(RegisteredSink { key, sink });
        Ok(())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.sinks.iter().map(|entry| entry.key.as_str()).collect()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn context(&self) -> &SinkContext {
        &self.context
    }

    /// Initializes every sink in registration order. The first failure is
    /// returned after the sinks already started are torn down again.
    pub async fn initialize(&self) -> Result<(), DistributorError> {
        for (index, entry) in self.sinks.iter().enumerate() {
            if let Err(source) = entry.sink.initialize(&self.context).await {
                for started in self.sinks[..index].iter().rev() {
                    if let Err(err) = started.sink.shutdown(&self.context).await {
                        warn!(key = %started.key, error = %err, "sink shutdown after failed startup failed");
                    }
                }
                return Err(DistributorError::Initialize {
                    key: entry.key.clone(),
                    source,
                });
            }
            info!(key = %entry.key, "sink initialized");
        }
        Ok(())
    }

    /// Stamps the event source and hands it to every sink. Returns the number
    /// of sinks that failed; failures are logged and never stop delivery.
    pub async fn publish(&self, mut event: Event) -> usize {
        event.source.clone_from(&self.source);
        let mut failed = 0;
        for entry in &self.sinks {
            if let Err(err) = entry.sink.publish(&self.context, &event).await {
                failed += 1;
                warn!(key = %entry.key, node = %event.id, error = %err, "sink publish failed");
            }
        }
        failed
    }

    /// Tears every sink down once; later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for entry in &self.sinks {
            match entry.sink.shutdown(&self.context).await {
                Ok(()) => debug!(key = %entry.key, "sink shut down"),
                Err(err) => warn!(key = %entry.key, error = %err, "sink shutdown failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests;
