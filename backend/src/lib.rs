use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod loopback;

/// Separator used when rendering a topic address as a single path.
pub const PATH_SEPARATOR: char = '^';

/// Fully qualified name of a topic as the messaging layer knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicAddress {
    pub domain: String,
    pub connection: String,
    pub topic: String,
}

impl TopicAddress {
    pub fn new(
        domain: impl Into<String>,
        connection: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            connection: connection.into(),
            topic: topic.into(),
        }
    }

    /// `domain^connection^topic`
    pub fn path(&self) -> String {
        format!(
            "{}{PATH_SEPARATOR}{}{PATH_SEPARATOR}{}",
            self.domain, self.connection, self.topic
        )
    }
}

impl fmt::Display for TopicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}, {}>", self.domain, self.connection, self.topic)
    }
}

/// Key into the backend's side table of per-topic session state.
///
/// The harness never sees backend internals, only this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub usize);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Result of a single poll attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Exactly one message was obtained and is now the topic's last received message.
    Message,
    /// The timeout elapsed with nothing to deliver.
    Timeout,
}

/// A message as last seen on a topic.
#[derive(Debug, Clone)]
pub struct ReceivedMsg {
    pub topic: String,
    /// Count of messages received on the topic, including this one.
    pub sequence: u64,
    pub body: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl ReceivedMsg {
    pub fn size(&self) -> usize {
        self.body.len()
    }

    pub fn body_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitCounters {
    pub commits: u64,
    pub acks: u64,
    pub failed_acks: u64,
}

/// Callback invoked from the backend's own execution context whenever a
/// push subscription delivers a message.
pub type AsyncHandler = Arc<dyn Fn(SessionId, ReceivedMsg) + Send + Sync>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Domain not found! <{0}>")]
    UnknownDomain(String),
    #[error("Connection not found! <{domain}, {connection}>")]
    UnknownConnection { domain: String, connection: String },
    #[error("Topic not found! {0}")]
    UnknownTopic(String),
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),
    #[error("Connection for {0} is not established")]
    NotConnected(String),
    #[error("No subscription exists for {0}")]
    NotSubscribed(String),
    #[error("Subscription for {topic} is {actual}, expected {expected}")]
    WrongSubscription {
        topic: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("{0} is already subscribed")]
    AlreadySubscribed(String),
    #[error("No uncommitted message on {0}")]
    NothingToCommit(String),
    #[error("Failed to deliver message on {topic}: {reason}")]
    Delivery { topic: String, reason: String },
    #[error("Injected failure: {0}")]
    Injected(String),
}

/// The operations the harness consumes from a messaging layer.
///
/// Publishing, polling and committing are blocking calls made from worker
/// threads. Connection and subscription setup happen once, before any worker
/// starts, and may spawn backend-owned tasks.
#[async_trait]
pub trait MessagingBackend: Send + Sync {
    /// Resolve a topic address to its session key.
    fn lookup(&self, address: &TopicAddress) -> Result<SessionId, BackendError>;

    /// Key used to publish on the topic, if the topic is publishable.
    fn publish_key(&self, session: SessionId) -> Option<String>;

    /// Key used to subscribe to the topic, if the topic is subscribable.
    fn subscribe_key(&self, session: SessionId) -> Option<String>;

    async fn connect_all(&self) -> Result<(), BackendError>;

    /// Push delivery through the registered [`AsyncHandler`].
    async fn subscribe_async(&self, session: SessionId) -> Result<(), BackendError>;

    /// Pull delivery through [`MessagingBackend::poll`].
    async fn subscribe_sync(&self, session: SessionId) -> Result<(), BackendError>;

    /// Asynchronous delivery into a local queue drained by [`MessagingBackend::poll_queue`].
    async fn subscribe_queued(&self, session: SessionId) -> Result<(), BackendError>;

    fn publish(&self, session: SessionId, payload: &[u8]) -> Result<(), BackendError>;

    fn poll(&self, session: SessionId, timeout: Duration) -> Result<PollOutcome, BackendError>;

    fn poll_queue(&self, session: SessionId, timeout: Duration)
        -> Result<PollOutcome, BackendError>;

    /// Acknowledge the last received message.
    fn commit_last(&self, session: SessionId) -> Result<(), BackendError>;

    fn last_received(&self, session: SessionId) -> Option<ReceivedMsg>;

    fn commit_counters(&self, session: SessionId) -> CommitCounters;

    fn register_async_handler(&self, handler: AsyncHandler);

    async fn shutdown(&self);
}
