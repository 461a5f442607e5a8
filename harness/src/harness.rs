use crate::config::TopicRecord;
use crate::context::{print_frequency, RunContext};
use crate::detector::wait_for_quiescence;
use crate::error::HarnessError;
use crate::gate::start_gate;
use crate::outcome::{WorkerFailure, WorkerOutcome};
use crate::poller::{run_poll_subscriber, PollSubscriberArgs};
use crate::publisher::{run_publisher, PublisherArgs};
use crate::receive::AsyncReceiver;
use crate::stats::{format_timestamp, StatisticsReport, Totals};
use crate::topic::TopicRegistry;
use chrono::Local;
use harness_backend::MessagingBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub const START_LABEL: &str = "Start Time => ";
pub const END_LABEL: &str = "End Time =>   ";

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub publisher: PublisherArgs,
    pub poller: PollSubscriberArgs,
    /// Sampling interval of the completion detector.
    pub wait_time: Duration,
    /// Pause between the subscribe phase and the start signal.
    pub settle: Duration,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report: StatisticsReport,
    pub totals: Totals,
    /// `None` when the worker had nothing to do and was never started.
    pub publisher: Option<WorkerOutcome>,
    pub poller: Option<WorkerOutcome>,
    pub detector_rounds: u64,
}

/// A loaded, resolved run waiting to be started.
pub struct Harness {
    ctx: Arc<RunContext>,
    settings: RunSettings,
}

impl Harness {
    /// Load the registry, resolve every session and register the async
    /// receive path. Fails closed: nothing is started on error.
    pub fn prepare(
        records: &[TopicRecord],
        backend: Arc<dyn MessagingBackend>,
        settings: RunSettings,
    ) -> Result<Self, HarnessError> {
        let mut registry = TopicRegistry::load(records)?;
        registry.log_configuration();
        registry.attach_sessions(backend.as_ref())?;

        let frequency = print_frequency(settings.publisher.num_msgs);
        info!("print_frequency_modulo<{frequency}>");

        let ctx = RunContext::new(registry, backend, frequency);
        ctx.backend
            .register_async_handler(AsyncReceiver::new(&ctx).into_handler());

        Ok(Self { ctx, settings })
    }

    async fn subscribe(&self) -> Result<(), HarnessError> {
        info!("BEGIN: Subscribing...");
        let backend = self.ctx.backend.as_ref();

        for topic in self.ctx.registry.subscribe_topics() {
            let Some(session) = topic.session() else {
                continue;
            };
            if backend.subscribe_key(session).is_none() {
                continue;
            }
            let Some(op) = topic.dispatch.subscribe else {
                continue;
            };

            info!("Subscribing to {} using {}", topic.address, op.name());
            op.invoke(backend, session)
                .await
                .map_err(|source| HarnessError::Subscribe {
                    address: topic.address.to_string(),
                    op: op.name(),
                    source,
                })?;
        }

        info!("END: Subscribing...");
        Ok(())
    }

    /// Drive one full run and return its statistics.
    pub async fn run(self) -> Result<RunSummary, HarnessError> {
        let backend = self.ctx.backend.clone();

        if let Err(e) = backend.connect_all().await {
            error!("Failed to connect: {e}");
            backend.shutdown().await;
            return Err(HarnessError::Connect(e));
        }

        if let Err(e) = self.subscribe().await {
            error!("Failed to subscribe: {e}");
            backend.shutdown().await;
            return Err(e);
        }

        let summary = self.ctx.registry.summary();
        info!(
            "Publisher Thread Args: NumMsgs<{}> MsgSize<{}> delay_us<{}>",
            self.settings.publisher.num_msgs,
            self.settings.publisher.msg_size,
            self.settings.publisher.delay.as_micros()
        );
        info!(
            "Subscriber Thread Args: timeout_sec<{}>",
            self.settings.poller.idle_timeout.as_secs()
        );

        tokio::time::sleep(self.settings.settle).await;

        let start = format_timestamp(START_LABEL, Local::now());
        let (trigger, gate) = start_gate();

        let publisher = (summary.num_publications > 0).then(|| {
            let ctx = self.ctx.clone();
            let gate = gate.clone();
            let args = self.settings.publisher.clone();
            tokio::task::spawn_blocking(move || run_publisher(&ctx, &gate, &args))
        });

        let poller = (summary.num_poll_subscriptions > 0).then(|| {
            let ctx = self.ctx.clone();
            let gate = gate.clone();
            let args = self.settings.poller.clone();
            tokio::task::spawn_blocking(move || run_poll_subscriber(&ctx, &gate, &args))
        });

        trigger.open();

        let publisher = join_worker("publisher", publisher).await;
        let poller = join_worker("poll subscriber", poller).await;

        let quiescence = wait_for_quiescence(&self.ctx.counters, self.settings.wait_time).await;
        let end = format_timestamp(END_LABEL, Local::now());

        let report = StatisticsReport::collect(&self.ctx.registry, &self.ctx.counters, start, end);
        info!("At end: total received<{}>", report.totals.received());

        backend.shutdown().await;

        Ok(RunSummary {
            totals: report.totals,
            report,
            publisher,
            poller,
            detector_rounds: quiescence.rounds,
        })
    }
}

async fn join_worker(
    name: &str,
    handle: Option<JoinHandle<WorkerOutcome>>,
) -> Option<WorkerOutcome> {
    let outcome = match handle?.await {
        Ok(outcome) => outcome,
        Err(e) => WorkerOutcome::Failed(WorkerFailure::Panicked(e.to_string())),
    };

    match &outcome {
        WorkerOutcome::Failed(failure) => {
            error!("{name} worker stopped: {failure} ret_code<{}>", outcome.ret_code())
        }
        _ => info!("{name} worker finished: {outcome:?} ret_code<{}>", outcome.ret_code()),
    }

    Some(outcome)
}
