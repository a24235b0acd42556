use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tel_protocol::Event;

use crate::{Sink, SinkContext, SinkError};

#[derive(Clone, Default)]
pub(crate) struct Probe {
    events: Arc<Mutex<Vec<Event>>>,
    init_calls: Arc<AtomicUsize>,
    publish_calls: Arc<AtomicUsize>,
    shutdown_calls: Arc<AtomicUsize>,
}

impl Probe {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().expect("probe lock").clone()
    }

    pub(crate) fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

pub(crate) struct RecordingSink {
    key: String,
    probe: Probe,
    fail_init: bool,
    fail_publish: bool,
}

impl RecordingSink {
    pub(crate) fn new(key: &str) -> (Self, Probe) {
        let probe = Probe::default();
        (
            Self {
                key: key.to_string(),
                probe: probe.clone(),
                fail_init: false,
                fail_publish: false,
            },
            probe,
        )
    }

    pub(crate) fn failing_init(key: &str) -> (Self, Probe) {
        let (mut sink, probe) = Self::new(key);
        sink.fail_init = true;
        (sink, probe)
    }

    pub(crate) fn failing_publish(key: &str) -> (Self, Probe) {
        let (mut sink, probe) = Self::new(key);
        sink.fail_publish = true;
        (sink, probe)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn key(&self) -> &str {
        &self.key
    }

    async fn initialize(&self, _ctx: &SinkContext) -> Result<(), SinkError> {
        self.probe.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(SinkError::Setup(format!("{} refused to start", self.key)));
        }
        Ok(())
    }

    async fn publish(&self, _ctx: &SinkContext, event: &Event) -> Result<(), SinkError> {
        self.probe.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish {
            return Err(SinkError::Delivery(format!("{} is down", self.key)));
        }
        self.probe
            .events
            .lock()
            .expect("probe lock")
            .push(event.clone());
        Ok(())
    }

    async fn shutdown(&self, _ctx: &SinkContext) -> Result<(), SinkError> {
        self.probe.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
