//! In-process messaging layer.
//!
//! Every declared topic lives in a side table indexed by [`SessionId`].
//! Pull subscriptions buffer published payloads in an unbounded channel.
//! Push and queued subscriptions are each served by a delivery actor, so the
//! async handler runs on the actor's task rather than on the publishing thread.

use crate::{
    AsyncHandler, BackendError, CommitCounters, MessagingBackend, PollOutcome, ReceivedMsg,
    SessionId, TopicAddress,
};
use async_trait::async_trait;
use chrono::Local;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub const DELIVERY_ACTOR_PREFIX: &str = "loopback.delivery";
pub const NO_HANDLER_TXT: &str = "No async message handler registered, message left uncommitted";

/// Which directions a declared topic supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub publish: bool,
    pub subscribe: bool,
}

impl Endpoints {
    pub fn both() -> Self {
        Self {
            publish: true,
            subscribe: true,
        }
    }

    pub fn publish_only() -> Self {
        Self {
            publish: true,
            subscribe: false,
        }
    }
}

/// Failures the loopback injects on purpose.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Every Nth publish attempt on a topic fails. Zero disables.
    pub fail_every_nth_publish: u64,
    pub fail_commits: bool,
    pub fail_polls: bool,
}

#[derive(Default)]
pub struct LoopbackBuilder {
    topics: Vec<(TopicAddress, Endpoints)>,
    faults: FaultPlan,
}

impl LoopbackBuilder {
    pub fn topic(mut self, address: TopicAddress, endpoints: Endpoints) -> Self {
        self.topics.push((address, endpoints));
        self
    }

    pub fn faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    pub fn build(self) -> LoopbackBackend {
        let mut slots = Vec::with_capacity(self.topics.len());
        let mut index: HashMap<String, HashMap<String, HashMap<String, SessionId>>> =
            HashMap::new();

        for (address, endpoints) in self.topics {
            let topics = index
                .entry(address.domain.clone())
                .or_default()
                .entry(address.connection.clone())
                .or_default();

            if topics.contains_key(&address.topic) {
                warn!("Ignoring duplicate declaration of {address}");
                continue;
            }

            let session = SessionId(slots.len());
            topics.insert(address.topic.clone(), session);
            slots.push(TopicSlot::new(address, endpoints));
        }

        LoopbackBackend {
            shared: Arc::new(Shared {
                slots,
                index,
                connected: AtomicBool::new(false),
                handler: RwLock::new(None),
                faults: self.faults,
            }),
        }
    }
}

/// Buffered payloads waiting for `poll` or `poll_queue`.
#[derive(Clone)]
struct Inbox {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl Inbox {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Take the oldest payload, waiting up to `timeout` for one to arrive.
    fn take(&self, timeout: Duration) -> Result<Option<Vec<u8>>, &'static str> {
        if timeout.is_zero() {
            return match self.rx.try_recv() {
                Ok(body) => Ok(Some(body)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err("inbox disconnected"),
            };
        }

        match self.rx.recv_timeout(timeout) {
            Ok(body) => Ok(Some(body)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err("inbox disconnected"),
        }
    }
}

enum Subscription {
    Pull(Inbox),
    Push(Delivery),
    Queued {
        delivery: Delivery,
        inbox: Inbox,
    },
}

impl Subscription {
    fn kind(&self) -> &'static str {
        match self {
            Subscription::Pull(_) => "pull",
            Subscription::Push(_) => "push",
            Subscription::Queued { .. } => "queued",
        }
    }
}

struct Delivery {
    actor: ActorRef<DeliveryMsg>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SlotState {
    subscription: Option<Subscription>,
    last: Option<ReceivedMsg>,
    uncommitted: bool,
    received: u64,
    counters: CommitCounters,
}

struct TopicSlot {
    address: TopicAddress,
    publish_key: Option<String>,
    subscribe_key: Option<String>,
    publish_attempts: AtomicU64,
    published: AtomicU64,
    state: Mutex<SlotState>,
}

impl TopicSlot {
    fn new(address: TopicAddress, endpoints: Endpoints) -> Self {
        let key = || Some(uuid::Uuid::new_v4().to_string());
        Self {
            address,
            publish_key: if endpoints.publish { key() } else { None },
            subscribe_key: if endpoints.subscribe { key() } else { None },
            publish_attempts: AtomicU64::new(0),
            published: AtomicU64::new(0),
            state: Mutex::new(SlotState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `body` the last received message, pending commit.
    fn record_received(&self, body: Vec<u8>) -> ReceivedMsg {
        let mut state = self.state();
        state.received += 1;
        let msg = ReceivedMsg {
            topic: self.address.topic.clone(),
            sequence: state.received,
            body,
            received_at: Local::now(),
        };
        state.last = Some(msg.clone());
        state.uncommitted = true;
        msg
    }
}

struct Shared {
    slots: Vec<TopicSlot>,
    index: HashMap<String, HashMap<String, HashMap<String, SessionId>>>,
    connected: AtomicBool,
    handler: RwLock<Option<AsyncHandler>>,
    faults: FaultPlan,
}

impl Shared {
    fn slot(&self, session: SessionId) -> Result<&TopicSlot, BackendError> {
        self.slots
            .get(session.0)
            .ok_or(BackendError::UnknownSession(session))
    }

    fn ensure_connected(&self, slot: &TopicSlot) -> Result<(), BackendError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BackendError::NotConnected(slot.address.path()))
        }
    }

    fn handler(&self) -> Option<AsyncHandler> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// In-process [`MessagingBackend`].
#[derive(Clone)]
pub struct LoopbackBackend {
    shared: Arc<Shared>,
}

impl LoopbackBackend {
    pub fn builder() -> LoopbackBuilder {
        LoopbackBuilder::default()
    }

    /// Number of payloads accepted by `publish` on the topic.
    pub fn published_count(&self, session: SessionId) -> u64 {
        self.shared
            .slot(session)
            .map(|slot| slot.published.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Number of messages handed to a consumer of the topic.
    pub fn received_count(&self, session: SessionId) -> u64 {
        self.shared
            .slot(session)
            .map(|slot| slot.state().received)
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn spawn_delivery(
        &self,
        session: SessionId,
        mode: DeliveryMode,
    ) -> Result<Delivery, BackendError> {
        let slot = self.shared.slot(session)?;
        let name = format!(
            "{DELIVERY_ACTOR_PREFIX}.{}.{}",
            slot.address.path(),
            uuid::Uuid::new_v4()
        );

        let (actor, handle) = Actor::spawn(
            Some(name),
            DeliveryAgent,
            DeliveryArgs {
                shared: Arc::downgrade(&self.shared),
                session,
                mode,
            },
        )
        .await
        .map_err(|e| BackendError::Delivery {
            topic: slot.address.path(),
            reason: e.to_string(),
        })?;

        Ok(Delivery { actor, handle })
    }

    /// Checks shared by every subscribe variant.
    fn check_subscribable(&self, session: SessionId) -> Result<&TopicSlot, BackendError> {
        let slot = self.shared.slot(session)?;
        self.shared.ensure_connected(slot)?;

        if slot.subscribe_key.is_none() {
            return Err(BackendError::NotSubscribed(slot.address.path()));
        }
        if slot.state().subscription.is_some() {
            return Err(BackendError::AlreadySubscribed(slot.address.path()));
        }
        Ok(slot)
    }

    fn install(&self, slot: &TopicSlot, subscription: Subscription) {
        debug!(
            "Subscribed to {} ({} delivery)",
            slot.address,
            subscription.kind()
        );
        slot.state().subscription = Some(subscription);
    }

    fn poll_kind(
        &self,
        session: SessionId,
        timeout: Duration,
        expected: &'static str,
    ) -> Result<PollOutcome, BackendError> {
        let slot = self.shared.slot(session)?;

        if self.shared.faults.fail_polls {
            return Err(BackendError::Injected(format!(
                "poll on {}",
                slot.address.path()
            )));
        }

        let inbox = {
            let state = slot.state();
            match (&state.subscription, expected) {
                (Some(Subscription::Pull(inbox)), "pull") => inbox.clone(),
                (Some(Subscription::Queued { inbox, .. }), "queued") => inbox.clone(),
                (Some(other), _) => {
                    return Err(BackendError::WrongSubscription {
                        topic: slot.address.path(),
                        expected,
                        actual: other.kind(),
                    })
                }
                (None, _) => return Err(BackendError::NotSubscribed(slot.address.path())),
            }
        };

        let taken = inbox.take(timeout).map_err(|reason| BackendError::Delivery {
            topic: slot.address.path(),
            reason: reason.to_string(),
        })?;

        match taken {
            Some(body) => {
                let msg = slot.record_received(body);
                trace!("Polled message {} on {}", msg.sequence, slot.address);
                Ok(PollOutcome::Message)
            }
            None => Ok(PollOutcome::Timeout),
        }
    }
}

#[async_trait]
impl MessagingBackend for LoopbackBackend {
    fn lookup(&self, address: &TopicAddress) -> Result<SessionId, BackendError> {
        let connections = self
            .shared
            .index
            .get(&address.domain)
            .ok_or_else(|| BackendError::UnknownDomain(address.domain.clone()))?;

        let topics = connections.get(&address.connection).ok_or_else(|| {
            BackendError::UnknownConnection {
                domain: address.domain.clone(),
                connection: address.connection.clone(),
            }
        })?;

        topics
            .get(&address.topic)
            .copied()
            .ok_or_else(|| BackendError::UnknownTopic(address.path()))
    }

    fn publish_key(&self, session: SessionId) -> Option<String> {
        self.shared.slot(session).ok()?.publish_key.clone()
    }

    fn subscribe_key(&self, session: SessionId) -> Option<String> {
        self.shared.slot(session).ok()?.subscribe_key.clone()
    }

    async fn connect_all(&self) -> Result<(), BackendError> {
        for (domain, connections) in &self.shared.index {
            for connection in connections.keys() {
                info!("Connected <{domain}, {connection}>");
            }
        }
        self.shared.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn subscribe_async(&self, session: SessionId) -> Result<(), BackendError> {
        let slot = self.check_subscribable(session)?;
        let delivery = self.spawn_delivery(session, DeliveryMode::Push).await?;
        self.install(slot, Subscription::Push(delivery));
        Ok(())
    }

    async fn subscribe_sync(&self, session: SessionId) -> Result<(), BackendError> {
        let slot = self.check_subscribable(session)?;
        self.install(slot, Subscription::Pull(Inbox::new()));
        Ok(())
    }

    async fn subscribe_queued(&self, session: SessionId) -> Result<(), BackendError> {
        let slot = self.check_subscribable(session)?;
        let inbox = Inbox::new();
        let delivery = self
            .spawn_delivery(session, DeliveryMode::Queue(inbox.tx.clone()))
            .await?;
        self.install(slot, Subscription::Queued { delivery, inbox });
        Ok(())
    }

    fn publish(&self, session: SessionId, payload: &[u8]) -> Result<(), BackendError> {
        let slot = self.shared.slot(session)?;
        self.shared.ensure_connected(slot)?;

        if slot.publish_key.is_none() {
            return Err(BackendError::Delivery {
                topic: slot.address.path(),
                reason: "topic is not publishable".to_string(),
            });
        }

        let attempt = slot.publish_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let nth = self.shared.faults.fail_every_nth_publish;
        if nth > 0 && attempt % nth == 0 {
            return Err(BackendError::Injected(format!(
                "publish attempt {attempt} on {}",
                slot.address.path()
            )));
        }

        {
            let state = slot.state();
            match &state.subscription {
                Some(Subscription::Pull(inbox)) => {
                    inbox
                        .tx
                        .send(payload.to_vec())
                        .map_err(|e| BackendError::Delivery {
                            topic: slot.address.path(),
                            reason: e.to_string(),
                        })?;
                }
                Some(Subscription::Push(delivery)) | Some(Subscription::Queued { delivery, .. }) => {
                    delivery
                        .actor
                        .send_message(DeliveryMsg::Deliver(payload.to_vec()))
                        .map_err(|e| BackendError::Delivery {
                            topic: slot.address.path(),
                            reason: e.to_string(),
                        })?;
                }
                // nobody listening, the message is gone
                None => trace!("No subscription on {}, dropping message", slot.address),
            }
        }

        slot.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn poll(&self, session: SessionId, timeout: Duration) -> Result<PollOutcome, BackendError> {
        self.poll_kind(session, timeout, "pull")
    }

    fn poll_queue(
        &self,
        session: SessionId,
        timeout: Duration,
    ) -> Result<PollOutcome, BackendError> {
        self.poll_kind(session, timeout, "queued")
    }

    fn commit_last(&self, session: SessionId) -> Result<(), BackendError> {
        let slot = self.shared.slot(session)?;
        let mut state = slot.state();

        if self.shared.faults.fail_commits {
            state.counters.failed_acks += 1;
            return Err(BackendError::Injected(format!(
                "commit on {}",
                slot.address.path()
            )));
        }

        if !state.uncommitted {
            state.counters.failed_acks += 1;
            return Err(BackendError::NothingToCommit(slot.address.path()));
        }

        state.uncommitted = false;
        state.counters.commits += 1;
        state.counters.acks += 1;
        Ok(())
    }

    fn last_received(&self, session: SessionId) -> Option<ReceivedMsg> {
        self.shared.slot(session).ok()?.state().last.clone()
    }

    fn commit_counters(&self, session: SessionId) -> CommitCounters {
        self.shared
            .slot(session)
            .map(|slot| slot.state().counters)
            .unwrap_or_default()
    }

    fn register_async_handler(&self, handler: AsyncHandler) {
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    async fn shutdown(&self) {
        let mut deliveries = Vec::new();

        for slot in &self.shared.slots {
            match slot.state().subscription.take() {
                Some(Subscription::Push(delivery)) | Some(Subscription::Queued { delivery, .. }) => {
                    deliveries.push(delivery)
                }
                _ => (),
            }
        }

        for delivery in deliveries {
            delivery.actor.stop(Some("SHUTDOWN".to_string()));
            if let Err(e) = delivery.handle.await {
                warn!("Delivery actor did not stop cleanly: {e}");
            }
        }

        self.shared.connected.store(false, Ordering::Release);
        debug!("Loopback backend shut down");
    }
}

// ============================== Delivery Actor ============================== //

enum DeliveryMode {
    /// Hand each message to the registered async handler.
    Push,
    /// Park each message in the inbox drained by `poll_queue`.
    Queue(Sender<Vec<u8>>),
}

pub enum DeliveryMsg {
    Deliver(Vec<u8>),
}

struct DeliveryArgs {
    shared: Weak<Shared>,
    session: SessionId,
    mode: DeliveryMode,
}

struct DeliveryAgent;

#[async_trait]
impl Actor for DeliveryAgent {
    type Msg = DeliveryMsg;
    type State = DeliveryArgs;
    type Arguments = DeliveryArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: DeliveryArgs,
    ) -> Result<Self::State, ActorProcessingErr> {
        debug!("{myself:?} starting for {}", args.session);
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let Some(shared) = state.shared.upgrade() else {
            myself.stop(Some("BACKEND_DROPPED".to_string()));
            return Ok(());
        };

        match message {
            DeliveryMsg::Deliver(body) => match &state.mode {
                DeliveryMode::Queue(tx) => {
                    if tx.send(body).is_err() {
                        warn!("Inbox for {} is gone, dropping message", state.session);
                    }
                }
                DeliveryMode::Push => {
                    let slot = shared.slot(state.session)?;
                    let msg = slot.record_received(body);

                    match shared.handler() {
                        Some(handler) => handler(state.session, msg),
                        None => warn!("{NO_HANDLER_TXT}: {}", slot.address),
                    }
                }
            },
        }

        Ok(())
    }
}
