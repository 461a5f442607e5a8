use crate::context::RunContext;
use crate::dispatch::{CommitOp, PollOp};
use crate::gate::StartGate;
use crate::outcome::{WorkerFailure, WorkerOutcome};
use crate::topic::Topic;
use harness_backend::{PollOutcome, SessionId};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 6;

#[derive(Debug, Clone)]
pub struct PollSubscriberArgs {
    /// How long every poll topic may stay silent before the worker stops.
    pub idle_timeout: Duration,
    /// Pause between poll cycles.
    pub poll_delay: Duration,
}

impl PollSubscriberArgs {
    /// A zero timeout falls back to [`DEFAULT_IDLE_TIMEOUT_SECS`].
    pub fn new(idle_timeout_secs: u64, poll_delay: Duration) -> Self {
        let secs = if idle_timeout_secs == 0 {
            DEFAULT_IDLE_TIMEOUT_SECS
        } else {
            idle_timeout_secs
        };
        Self {
            idle_timeout: Duration::from_secs(secs),
            poll_delay,
        }
    }
}

/// Edge-triggered idle timer.
///
/// The clock starts at the first cycle that yields nothing and is cleared by
/// any cycle that yields a message.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    timeout: Duration,
    idle_since: Option<Instant>,
}

impl IdleTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            idle_since: None,
        }
    }

    /// Feed one finished cycle. Returns true once silence has lasted longer
    /// than the timeout.
    pub fn observe(&mut self, cycle_start: Instant, received: bool) -> bool {
        if received {
            self.idle_since = None;
            return false;
        }

        match self.idle_since {
            None => {
                self.idle_since = Some(cycle_start);
                false
            }
            Some(since) => cycle_start.saturating_duration_since(since) > self.timeout,
        }
    }

    pub fn idle_since(&self) -> Option<Instant> {
        self.idle_since
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    WaitingForStart,
    /// The last cycle produced at least one message.
    Polling,
    /// The idle timer is running.
    Draining,
    Stopped(WorkerOutcome),
}

impl PollState {
    /// Next state after a finished cycle that yielded `received` messages.
    ///
    /// The idle timer runs only while `Draining`: the first empty cycle
    /// starts it, a message clears it, and it stops the worker once it fires.
    pub fn after_cycle(self, received: u64, timer: &mut IdleTimer, cycle_start: Instant) -> Self {
        match self {
            PollState::Polling if received > 0 => PollState::Polling,
            PollState::Polling => {
                timer.observe(cycle_start, false);
                PollState::Draining
            }
            PollState::Draining if received > 0 => {
                timer.observe(cycle_start, true);
                PollState::Polling
            }
            PollState::Draining => {
                if timer.observe(cycle_start, false) {
                    PollState::Stopped(WorkerOutcome::Idle)
                } else {
                    PollState::Draining
                }
            }
            other => other,
        }
    }
}

struct PollTarget<'a> {
    topic: &'a Topic,
    session: SessionId,
    poll: PollOp,
    commit: CommitOp,
}

fn missing(topic: &Topic, op: &'static str) -> WorkerOutcome {
    error!("Missing {op} operation for {}", topic.address);
    WorkerOutcome::Failed(WorkerFailure::MissingOperation {
        topic: topic.name().to_string(),
        op,
    })
}

/// Check every poll topic before the start signal.
fn poll_targets(ctx: &RunContext) -> Result<Vec<PollTarget<'_>>, WorkerOutcome> {
    let mut targets = Vec::new();

    for topic in ctx.registry.poll_topics() {
        let Some(session) = topic.session() else {
            error!("Session not set for {}", topic.address);
            return Err(WorkerOutcome::Failed(WorkerFailure::MissingSession {
                topic: topic.name().to_string(),
            }));
        };

        if ctx.backend.subscribe_key(session).is_none() {
            debug!("No subscribe key for {}, not polling", topic.address);
            continue;
        }

        if topic.dispatch.subscribe.is_none() {
            return Err(missing(topic, "subscribe"));
        }
        let Some(poll) = topic.dispatch.poll else {
            return Err(missing(topic, "poll"));
        };
        let Some(commit) = topic.dispatch.commit else {
            return Err(missing(topic, "commit"));
        };

        targets.push(PollTarget {
            topic,
            session,
            poll,
            commit,
        });
    }

    Ok(targets)
}

/// Poll every target once. Returns how many messages arrived.
fn poll_cycle(ctx: &RunContext, targets: &[PollTarget<'_>]) -> Result<u64, WorkerFailure> {
    let backend = ctx.backend.as_ref();
    let mut received = 0;

    for target in targets {
        let topic = target.topic;

        match target.poll.invoke(backend, target.session, topic.poll_timeout) {
            Ok(PollOutcome::Timeout) => (),
            Ok(PollOutcome::Message) => {
                received += 1;
                topic.counters.received.fetch_add(1, Ordering::Relaxed);
                ctx.counters.poll_received.fetch_add(1, Ordering::AcqRel);

                let last = backend.last_received(target.session);
                if let Some(msg) = &last {
                    if ctx.should_print(msg.sequence) {
                        info!(
                            "<<< Received POLL Message: [{}, {}] msg_size<{}> ON {}",
                            topic.name(),
                            msg.sequence,
                            msg.size(),
                            topic.address
                        );
                    }
                }

                let committed = target.commit.invoke(backend, target.session);
                topic
                    .counters
                    .refresh_commits(backend.commit_counters(target.session));

                if let Err(source) = committed {
                    error!(
                        "Failed to commit message! msg_size<{}> on {}: {source}",
                        last.as_ref().map_or(0, |msg| msg.size()),
                        topic.address
                    );
                    return Err(WorkerFailure::Commit {
                        topic: topic.name().to_string(),
                        source,
                    });
                }
            }
            Err(source) => {
                error!(
                    "{} failed on {}: {source}",
                    target.poll.name(),
                    topic.address
                );
                return Err(WorkerFailure::Poll {
                    topic: topic.name().to_string(),
                    source,
                });
            }
        }
    }

    Ok(received)
}

/// Poll-subscriber worker body. Runs on its own thread.
pub fn run_poll_subscriber(
    ctx: &RunContext,
    gate: &StartGate,
    args: &PollSubscriberArgs,
) -> WorkerOutcome {
    if ctx.registry.summary().num_poll_subscriptions == 0 {
        info!("NOTE: There are no polling subscriptions enabled");
        return WorkerOutcome::Completed;
    }

    let targets = match poll_targets(ctx) {
        Ok(targets) => targets,
        Err(outcome) => return outcome,
    };

    if targets.is_empty() {
        warn!("No subscriptions to poll");
        return WorkerOutcome::Completed;
    }

    let mut timer = IdleTimer::new(args.idle_timeout);
    let mut state = PollState::WaitingForStart;

    loop {
        state = match state {
            PollState::WaitingForStart => {
                info!("Subscriber thread waiting for start signal...");
                gate.wait();
                info!(
                    "Subscriber thread got start signal, polling {} topics",
                    targets.len()
                );
                PollState::Polling
            }
            PollState::Polling | PollState::Draining => {
                let cycle_start = Instant::now();

                match poll_cycle(ctx, &targets) {
                    Err(failure) => PollState::Stopped(WorkerOutcome::Failed(failure)),
                    Ok(received) => match state.after_cycle(received, &mut timer, cycle_start) {
                        PollState::Stopped(outcome) => {
                            info!(
                                "Subscriber timeout: no message received on any topic in {} seconds.",
                                args.idle_timeout.as_secs()
                            );
                            PollState::Stopped(outcome)
                        }
                        next => {
                            if !args.poll_delay.is_zero() {
                                std::thread::sleep(args.poll_delay);
                            }
                            next
                        }
                    },
                }
            }
            PollState::Stopped(outcome) => return outcome,
        };
    }
}
