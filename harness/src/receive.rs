use crate::context::RunContext;
use harness_backend::{AsyncHandler, ReceivedMsg, SessionId};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info};

/// Receives push deliveries on the backend's own threads.
///
/// Holds only a weak reference into the run, so a late delivery after the run
/// is torn down is ignored.
#[derive(Clone)]
pub struct AsyncReceiver {
    ctx: Weak<RunContext>,
}

impl AsyncReceiver {
    pub fn new(ctx: &Arc<RunContext>) -> Self {
        Self {
            ctx: Arc::downgrade(ctx),
        }
    }

    pub fn into_handler(self) -> AsyncHandler {
        Arc::new(move |session: SessionId, msg: ReceivedMsg| {
            self.on_message(session, msg)
        })
    }

    pub fn on_message(&self, session: SessionId, msg: ReceivedMsg) {
        let Some(ctx) = self.ctx.upgrade() else {
            debug!("Run finished, ignoring message on {session}");
            return;
        };

        // The transport has already consumed the message. Nothing is
        // counted or acknowledged for an unknown session.
        let Some(topic) = ctx.registry.by_session(session) else {
            error!(
                "Failed to find topic for {session}, dropping message on <{}>",
                msg.topic
            );
            return;
        };

        let received = topic.counters.received.fetch_add(1, Ordering::Relaxed) + 1;
        ctx.counters.async_received.fetch_add(1, Ordering::AcqRel);

        if ctx.should_print(received) {
            info!(
                "Message received on topic {} [{received}] payload ({} bytes): {}",
                topic.address,
                msg.size(),
                msg.body_lossy()
            );
        }

        let Some(commit) = topic.dispatch.commit else {
            error!("No commit operation for {}", topic.address);
            return;
        };

        let backend = ctx.backend.as_ref();
        if let Err(e) = commit.invoke(backend, session) {
            error!("Failed to CommitLastMsg on {}: {e}", topic.address);
        }
        topic.counters.refresh_commits(backend.commit_counters(session));
    }
}
