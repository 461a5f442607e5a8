#![allow(dead_code)]

use async_trait::async_trait;
use harness_backend::loopback::{FaultPlan, LoopbackBackend};
use harness_backend::{
    AsyncHandler, BackendError, CommitCounters, MessagingBackend, PollOutcome, ReceivedMsg,
    SessionId, TopicAddress,
};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use topic_harness::config::TopicRecord;
use topic_harness::loopback::loopback_for;
use topic_harness::poller::PollSubscriberArgs;
use topic_harness::publisher::PublisherArgs;
use topic_harness::RunSettings;

pub const DOMAIN: &str = "DomainA";
pub const CONNECTION: &str = "NATSConn1";

/// A topic record on the shared test connection. An empty mode turns that
/// direction off.
pub fn record(topic: &str, publish: &str, subscribe: &str) -> TopicRecord {
    TopicRecord {
        topic_number: None,
        logical_unique_name: topic.to_lowercase(),
        domain: DOMAIN.to_string(),
        connection: CONNECTION.to_string(),
        topic_name: topic.to_string(),
        enabled: true,
        disabled: false,
        publish: !publish.is_empty(),
        subscribe: !subscribe.is_empty(),
        publish_type: publish.to_string(),
        subscribe_type: subscribe.to_string(),
        poll_timeout_us: 1000,
    }
}

/// Settings that keep a run to a few seconds.
pub fn fast_settings(num_msgs: u64) -> RunSettings {
    RunSettings {
        publisher: PublisherArgs {
            num_msgs,
            msg_size: 128,
            delay: Duration::ZERO,
        },
        poller: PollSubscriberArgs::new(1, Duration::ZERO),
        wait_time: Duration::from_secs(1),
        settle: Duration::ZERO,
    }
}

pub fn backend_for(records: &[TopicRecord], faults: FaultPlan) -> Arc<LoopbackBackend> {
    Arc::new(loopback_for(records, faults))
}

pub fn write_topic_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(json.as_bytes()).expect("write topic file");
    file.flush().expect("flush topic file");
    file
}

/// A loopback whose `connect_all` always fails. Records whether
/// `shutdown` was reached.
pub struct FailingConnect {
    inner: LoopbackBackend,
    shut_down: AtomicBool,
}

impl FailingConnect {
    pub fn new(records: &[TopicRecord]) -> Self {
        Self {
            inner: loopback_for(records, FaultPlan::default()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingBackend for FailingConnect {
    fn lookup(&self, address: &TopicAddress) -> Result<SessionId, BackendError> {
        self.inner.lookup(address)
    }

    fn publish_key(&self, session: SessionId) -> Option<String> {
        self.inner.publish_key(session)
    }

    fn subscribe_key(&self, session: SessionId) -> Option<String> {
        self.inner.subscribe_key(session)
    }

    async fn connect_all(&self) -> Result<(), BackendError> {
        Err(BackendError::Injected("connection refused".to_string()))
    }

    async fn subscribe_async(&self, session: SessionId) -> Result<(), BackendError> {
        self.inner.subscribe_async(session).await
    }

    async fn subscribe_sync(&self, session: SessionId) -> Result<(), BackendError> {
        self.inner.subscribe_sync(session).await
    }

    async fn subscribe_queued(&self, session: SessionId) -> Result<(), BackendError> {
        self.inner.subscribe_queued(session).await
    }

    fn publish(&self, session: SessionId, payload: &[u8]) -> Result<(), BackendError> {
        self.inner.publish(session, payload)
    }

    fn poll(&self, session: SessionId, timeout: Duration) -> Result<PollOutcome, BackendError> {
        self.inner.poll(session, timeout)
    }

    fn poll_queue(
        &self,
        session: SessionId,
        timeout: Duration,
    ) -> Result<PollOutcome, BackendError> {
        self.inner.poll_queue(session, timeout)
    }

    fn commit_last(&self, session: SessionId) -> Result<(), BackendError> {
        self.inner.commit_last(session)
    }

    fn last_received(&self, session: SessionId) -> Option<ReceivedMsg> {
        self.inner.last_received(session)
    }

    fn commit_counters(&self, session: SessionId) -> CommitCounters {
        self.inner.commit_counters(session)
    }

    fn register_async_handler(&self, handler: AsyncHandler) {
        self.inner.register_async_handler(handler)
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.inner.shutdown().await
    }
}
