use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use opcua::client::Session as UaSession;
use opcua::types as ua;
use tel_protocol::{
    ChangeHandler, NodeMonitor, Session, SourceError, SubscriptionParameters,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::subscription::OpcUaSubscription;

/// A connected session plus the task driving its event loop.
pub struct OpcUaSession {
    session: Arc<UaSession>,
    event_loop: Mutex<Option<JoinHandle<ua::StatusCode>>>,
    cancel: CancellationToken,
}

impl OpcUaSession {
    pub(crate) fn new(session: Arc<UaSession>, event_loop: JoinHandle<ua::StatusCode>) -> Self {
        Self {
            session,
            event_loop: Mutex::new(Some(event_loop)),
            cancel: CancellationToken::new(),
        }
    }

    fn stop_event_loop(&self) {
        if let Some(handle) = self
            .event_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl Session for OpcUaSession {
    type Monitor = OpcUaMonitor;

    async fn monitor(&self) -> Result<OpcUaMonitor, SourceError> {
        if self.cancel.is_cancelled() {
            return Err(SourceError::Closed);
        }
        Ok(OpcUaMonitor {
            session: self.session.clone(),
            cancel: self.cancel.clone(),
        })
    }

    async fn close(&self) -> Result<(), SourceError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.cancel.cancel();
        let result = self.session.disconnect().await;
        self.stop_event_loop();
        debug!("opc ua session closed");
        result.map_err(|status| SourceError::Session(format!("disconnect: {status}")))
    }
}

impl Drop for OpcUaSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.stop_event_loop();
    }
}

pub struct OpcUaMonitor {
    session: Arc<UaSession>,
    cancel: CancellationToken,
}

#[async_trait]
impl NodeMonitor for OpcUaMonitor {
    type Subscription = OpcUaSubscription;

    async fn subscribe(
        &self,
        params: SubscriptionParameters,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<OpcUaSubscription, SourceError> {
        if self.cancel.is_cancelled() {
            return Err(SourceError::Closed);
        }
        OpcUaSubscription::create(
            self.session.clone(),
            self.cancel.child_token(),
            params.interval,
            handler,
        )
        .await
    }
}
