use crate::config::TopicRecord;
use crate::dispatch::{Dispatch, PublishType, SubscribeType};
use crate::error::HarnessError;
use harness_backend::{CommitCounters, MessagingBackend, SessionId, TopicAddress};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Runtime counters of one topic.
///
/// Every field is atomic because the async receive path runs on backend
/// threads while the workers run on their own.
#[derive(Debug, Default)]
pub struct TopicCounters {
    pub published: AtomicU64,
    pub received: AtomicU64,
    pub commits: AtomicU64,
    pub acks: AtomicU64,
    pub failed_acks: AtomicU64,
    /// Last sequence number handed out. Written by the publisher only.
    pub sequence: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicSnapshot {
    pub published: u64,
    pub received: u64,
    pub commits: u64,
    pub acks: u64,
    pub failed_acks: u64,
}

impl TopicCounters {
    /// Copy the backend's view of commit activity onto the topic.
    pub fn refresh_commits(&self, counters: CommitCounters) {
        self.commits.store(counters.commits, Ordering::Relaxed);
        self.acks.store(counters.acks, Ordering::Relaxed);
        self.failed_acks.store(counters.failed_acks, Ordering::Relaxed);
    }

    pub fn reset_sequence(&self) {
        self.sequence.store(0, Ordering::Relaxed);
    }

    /// Hand out the next sequence number, starting at 1.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> TopicSnapshot {
        TopicSnapshot {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
            failed_acks: self.failed_acks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct Topic {
    /// Number shown in the report.
    pub number: usize,
    pub logical_name: String,
    pub address: TopicAddress,
    pub active: bool,
    pub publish_enabled: bool,
    pub subscribe_enabled: bool,
    pub publish_type: Option<PublishType>,
    pub subscribe_type: SubscribeType,
    pub poll_timeout: Duration,
    pub dispatch: Dispatch,
    pub counters: TopicCounters,
    session: Option<SessionId>,
}

impl Topic {
    fn from_record(position: usize, record: &TopicRecord) -> Result<Self, HarnessError> {
        let address = TopicAddress::new(
            record.domain.as_str(),
            record.connection.as_str(),
            record.topic_name.as_str(),
        );
        let active = record.is_active();
        let publish_enabled = active && record.publish;
        let subscribe_enabled = active && record.subscribe;

        let publish_type = if publish_enabled {
            let mode = record.publish_type.parse::<PublishType>().map_err(|e| {
                HarnessError::InvalidPublishType {
                    topic: record.topic_name.clone(),
                    value: e.0,
                }
            })?;
            Some(mode)
        } else {
            None
        };

        let subscribe_type = if subscribe_enabled {
            record.subscribe_type.parse::<SubscribeType>().map_err(|e| {
                HarnessError::InvalidSubscribeType {
                    topic: record.topic_name.clone(),
                    value: e.0,
                }
            })?
        } else {
            SubscribeType::Unknown
        };

        Ok(Self {
            number: record.topic_number.unwrap_or(position + 1),
            logical_name: record.logical_unique_name.clone(),
            address,
            active,
            publish_enabled,
            subscribe_enabled,
            publish_type,
            subscribe_type,
            poll_timeout: Duration::from_micros(record.poll_timeout_us),
            dispatch: Dispatch::resolve(publish_type, subscribe_type),
            counters: TopicCounters::default(),
            session: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.address.topic
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn is_poll_activity(&self) -> bool {
        self.subscribe_enabled && self.subscribe_type.is_poll_activity()
    }
}

/// Load-time counts used to decide which workers are needed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub num_topics: usize,
    pub num_publications: usize,
    pub num_subscriptions: usize,
    pub num_poll_subscriptions: usize,
}

#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: Vec<Topic>,
    by_session: HashMap<SessionId, usize>,
    summary: LoadSummary,
}

impl TopicRegistry {
    /// Build the registry from topic records, resolving each topic's dispatch.
    ///
    /// Any unrecognized mode string rejects the whole load.
    pub fn load(records: &[TopicRecord]) -> Result<Self, HarnessError> {
        if records.is_empty() {
            return Err(HarnessError::NoTopics);
        }

        let mut summary = LoadSummary {
            num_topics: records.len(),
            ..LoadSummary::default()
        };

        let topics = records
            .iter()
            .enumerate()
            .map(|(position, record)| {
                let topic = Topic::from_record(position, record)?;
                if topic.publish_enabled {
                    summary.num_publications += 1;
                }
                if topic.subscribe_enabled {
                    summary.num_subscriptions += 1;
                    if topic.is_poll_activity() {
                        summary.num_poll_subscriptions += 1;
                    }
                }
                Ok(topic)
            })
            .collect::<Result<Vec<_>, HarnessError>>()?;

        if summary.num_publications == 0 && summary.num_subscriptions == 0 {
            return Err(HarnessError::NothingEnabled);
        }

        Ok(Self {
            topics,
            by_session: HashMap::new(),
            summary,
        })
    }

    /// Resolve a session for every active topic. One failed lookup fails the lot.
    pub fn attach_sessions(&mut self, backend: &dyn MessagingBackend) -> Result<(), HarnessError> {
        let mut by_session = HashMap::with_capacity(self.topics.len());

        for (index, topic) in self.topics.iter_mut().enumerate() {
            if !topic.active {
                continue;
            }

            let session =
                backend
                    .lookup(&topic.address)
                    .map_err(|source| HarnessError::SessionLookup {
                        address: topic.address.to_string(),
                        source,
                    })?;

            debug!("Resolved {} to {session}", topic.address);
            topic.session = Some(session);
            by_session.insert(session, index);
        }

        self.by_session = by_session;
        Ok(())
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn get(&self, index: usize) -> Option<&Topic> {
        self.topics.get(index)
    }

    pub fn by_session(&self, session: SessionId) -> Option<&Topic> {
        self.by_session
            .get(&session)
            .and_then(|index| self.topics.get(*index))
    }

    pub fn summary(&self) -> LoadSummary {
        self.summary
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn publish_topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter().filter(|t| t.publish_enabled)
    }

    pub fn poll_topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter().filter(|t| t.is_poll_activity())
    }

    pub fn subscribe_topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter().filter(|t| t.subscribe_enabled)
    }

    pub fn log_configuration(&self) {
        for topic in &self.topics {
            let [publish, subscribe, poll, commit] = topic.dispatch.names();
            info!(
                "Topic [{}] {} ({}) active<{}> publish<{}> subscribe<{}> publish_type<{}> subscribe_type<{}> poll_timeout_us<{}> ops<{publish}, {subscribe}, {poll}, {commit}>",
                topic.number,
                topic.address,
                topic.logical_name,
                topic.active,
                topic.publish_enabled,
                topic.subscribe_enabled,
                topic.publish_type.map_or_else(|| "-".to_string(), |t| t.to_string()),
                topic.subscribe_type,
                topic.poll_timeout.as_micros(),
            );
        }

        let summary = self.summary;
        info!(
            "num_topics<{}> num_publications<{}> num_subscriptions<{}> num_poll_subscriptions<{}>",
            summary.num_topics,
            summary.num_publications,
            summary.num_subscriptions,
            summary.num_poll_subscriptions
        );
    }
}
