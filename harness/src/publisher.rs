use crate::context::RunContext;
use crate::gate::StartGate;
use crate::outcome::{WorkerFailure, WorkerOutcome};
use serde_json::{Map, Value};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, error, info};

pub const SAMPLE_MESSAGE: &str = "Sample Message";
const PAD_VALUE_LEN: usize = 99;

#[derive(Debug, Clone)]
pub struct PublisherArgs {
    /// Messages per topic.
    pub num_msgs: u64,
    /// Target body size in bytes.
    pub msg_size: usize,
    /// Pause after each successful publish.
    pub delay: Duration,
}

/// Build a JSON test body of at least `target_size` bytes.
///
/// The body carries the topic name, a fixed message and the sequence number,
/// padded with `key_N` fields of 99 `x` characters.
pub fn build_test_message(topic: &str, message: &str, sequence: u64, target_size: usize) -> Vec<u8> {
    let mut obj = Map::new();
    obj.insert("Topic".to_string(), Value::from(topic));
    obj.insert("message".to_string(), Value::from(message));
    obj.insert("sequencer_number".to_string(), Value::from(sequence));

    let mut size = serde_json::to_string(&obj).map_or(0, |header| header.len());

    let pad = "x".repeat(PAD_VALUE_LEN);
    let mut i = 0usize;
    while size < target_size {
        let key = format!("key_{i}");
        // ,"key_N":"<99 x>"
        size += key.len() + PAD_VALUE_LEN + 6;
        obj.insert(key, Value::from(pad.as_str()));
        i += 1;
    }

    Value::Object(obj).to_string().into_bytes()
}

/// Publisher worker body. Runs on its own thread.
pub fn run_publisher(ctx: &RunContext, gate: &StartGate, args: &PublisherArgs) -> WorkerOutcome {
    let registry = &ctx.registry;

    if registry.summary().num_publications == 0 {
        return WorkerOutcome::Completed;
    }

    info!(
        "Publisher Args: num_topics<{}> num_msgs<{}> msg_size<{}> delay_us<{}>",
        registry.len(),
        args.num_msgs,
        args.msg_size,
        args.delay.as_micros()
    );

    let mut targets = Vec::new();
    for topic in registry.publish_topics() {
        let Some(session) = topic.session() else {
            error!("Session not set for {}", topic.address);
            return WorkerOutcome::Failed(WorkerFailure::MissingSession {
                topic: topic.name().to_string(),
            });
        };
        let Some(op) = topic.dispatch.publish else {
            error!("No publish operation for {}", topic.address);
            return WorkerOutcome::Failed(WorkerFailure::MissingOperation {
                topic: topic.name().to_string(),
                op: "publish",
            });
        };

        topic.counters.reset_sequence();

        if ctx.backend.publish_key(session).is_none() {
            debug!("No publish key for {}, skipping", topic.address);
            continue;
        }
        targets.push((topic, session, op));
    }

    info!("Total Number of Active Topics to Publish to is = {}", targets.len());
    info!("Publisher waiting for signal...");
    gate.wait();
    info!("Publisher started...");

    for _ in 0..args.num_msgs {
        for (topic, session, op) in &targets {
            let sequence = topic.counters.next_sequence();
            let payload = build_test_message(topic.name(), SAMPLE_MESSAGE, sequence, args.msg_size);

            if let Err(e) = op.invoke(ctx.backend.as_ref(), *session, &payload) {
                error!(
                    "{} failed! sequence_number<{sequence}> for {}: {e}",
                    op.name(),
                    topic.address
                );
                continue;
            }

            if ctx.should_print(sequence - 1) {
                info!(
                    ">>> Published Message: sequence_number<{sequence}> data_size<{}> on {}",
                    payload.len(),
                    topic.address
                );
            }

            topic.counters.published.fetch_add(1, Ordering::Relaxed);
            ctx.counters.published.fetch_add(1, Ordering::AcqRel);

            if !args.delay.is_zero() {
                std::thread::sleep(args.delay);
            }
        }
    }

    info!("Publisher finished");
    WorkerOutcome::Completed
}
