//! Mapping from a topic's configured modes to the backend operations it uses.
//!
//! Resolution happens once, at load time. The resulting [`Dispatch`] is plain
//! data and is shared freely between workers.

use harness_backend::{BackendError, MessagingBackend, PollOutcome, SessionId};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized mode <{0}>")]
pub struct UnknownMode(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishType {
    Nats,
    Js,
}

impl FromStr for PublishType {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NATS" => Ok(PublishType::Nats),
            "JS" => Ok(PublishType::Js),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for PublishType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PublishType::Nats => "NATS",
            PublishType::Js => "JS",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscribeType {
    /// Subscribing is off for the topic.
    #[default]
    Unknown,
    NatsAsync,
    NatsPoll,
    JsPush,
    JsPull,
    QAsync,
}

impl SubscribeType {
    /// True for every mode the poll worker drives.
    pub fn is_poll_activity(self) -> bool {
        matches!(
            self,
            SubscribeType::NatsPoll | SubscribeType::JsPull | SubscribeType::QAsync
        )
    }
}

impl FromStr for SubscribeType {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NATSAsync" => Ok(SubscribeType::NatsAsync),
            "NATSPoll" => Ok(SubscribeType::NatsPoll),
            "JSPush" => Ok(SubscribeType::JsPush),
            "JSPull" => Ok(SubscribeType::JsPull),
            "QAsync" => Ok(SubscribeType::QAsync),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for SubscribeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubscribeType::Unknown => "Unknown",
            SubscribeType::NatsAsync => "NATSAsync",
            SubscribeType::NatsPoll => "NATSPoll",
            SubscribeType::JsPush => "JSPush",
            SubscribeType::JsPull => "JSPull",
            SubscribeType::QAsync => "QAsync",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOp {
    Nats,
    Js,
}

impl PublishOp {
    pub fn name(self) -> &'static str {
        match self {
            PublishOp::Nats => "nats_publish",
            PublishOp::Js => "js_publish",
        }
    }

    pub fn invoke(
        self,
        backend: &dyn MessagingBackend,
        session: SessionId,
        payload: &[u8],
    ) -> Result<(), BackendError> {
        match self {
            PublishOp::Nats | PublishOp::Js => backend.publish(session, payload),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOp {
    NatsAsync,
    NatsSync,
    JsAsync,
    JsSync,
    AsyncQueue,
}

impl SubscribeOp {
    pub fn name(self) -> &'static str {
        match self {
            SubscribeOp::NatsAsync => "nats_subscribe_async",
            SubscribeOp::NatsSync => "nats_subscribe_sync",
            SubscribeOp::JsAsync => "js_subscribe_async",
            SubscribeOp::JsSync => "js_subscribe_sync",
            SubscribeOp::AsyncQueue => "asyncq_subscribe",
        }
    }

    pub async fn invoke(
        self,
        backend: &dyn MessagingBackend,
        session: SessionId,
    ) -> Result<(), BackendError> {
        match self {
            SubscribeOp::NatsAsync | SubscribeOp::JsAsync => backend.subscribe_async(session).await,
            SubscribeOp::NatsSync | SubscribeOp::JsSync => backend.subscribe_sync(session).await,
            SubscribeOp::AsyncQueue => backend.subscribe_queued(session).await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOp {
    Nats,
    Js,
    AsyncQueue,
}

impl PollOp {
    pub fn name(self) -> &'static str {
        match self {
            PollOp::Nats => "nats_poll",
            PollOp::Js => "js_poll",
            PollOp::AsyncQueue => "asyncq_poll",
        }
    }

    pub fn invoke(
        self,
        backend: &dyn MessagingBackend,
        session: SessionId,
        timeout: Duration,
    ) -> Result<PollOutcome, BackendError> {
        match self {
            PollOp::Nats | PollOp::Js => backend.poll(session, timeout),
            PollOp::AsyncQueue => backend.poll_queue(session, timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOp {
    Nats,
    Js,
    AsyncQueue,
}

impl CommitOp {
    pub fn name(self) -> &'static str {
        match self {
            CommitOp::Nats => "nats_commit",
            CommitOp::Js => "js_commit",
            CommitOp::AsyncQueue => "asyncq_commit",
        }
    }

    pub fn invoke(
        self,
        backend: &dyn MessagingBackend,
        session: SessionId,
    ) -> Result<(), BackendError> {
        match self {
            CommitOp::Nats | CommitOp::Js | CommitOp::AsyncQueue => backend.commit_last(session),
        }
    }
}

/// The operations a topic resolved to. `None` means the direction is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dispatch {
    pub publish: Option<PublishOp>,
    pub subscribe: Option<SubscribeOp>,
    pub poll: Option<PollOp>,
    pub commit: Option<CommitOp>,
}

impl Dispatch {
    pub fn resolve(publish: Option<PublishType>, subscribe: SubscribeType) -> Self {
        let publish = publish.map(|mode| match mode {
            PublishType::Nats => PublishOp::Nats,
            PublishType::Js => PublishOp::Js,
        });

        let (subscribe, poll, commit) = match subscribe {
            SubscribeType::Unknown => (None, None, None),
            SubscribeType::NatsAsync => (Some(SubscribeOp::NatsAsync), None, Some(CommitOp::Nats)),
            SubscribeType::NatsPoll => (
                Some(SubscribeOp::NatsSync),
                Some(PollOp::Nats),
                Some(CommitOp::Nats),
            ),
            SubscribeType::JsPush => (Some(SubscribeOp::JsAsync), None, Some(CommitOp::Js)),
            SubscribeType::JsPull => (
                Some(SubscribeOp::JsSync),
                Some(PollOp::Js),
                Some(CommitOp::Js),
            ),
            SubscribeType::QAsync => (
                Some(SubscribeOp::AsyncQueue),
                Some(PollOp::AsyncQueue),
                Some(CommitOp::AsyncQueue),
            ),
        };

        Self {
            publish,
            subscribe,
            poll,
            commit,
        }
    }

    /// Diagnostic names, `-` for an unset slot.
    pub fn names(&self) -> [&'static str; 4] {
        [
            self.publish.map_or("-", PublishOp::name),
            self.subscribe.map_or("-", SubscribeOp::name),
            self.poll.map_or("-", PollOp::name),
            self.commit.map_or("-", CommitOp::name),
        ]
    }
}
