mod common;

use common::*;
use harness_backend::loopback::{Endpoints, FaultPlan, LoopbackBackend};
use harness_backend::{MessagingBackend, TopicAddress};
use std::sync::Arc;
use std::time::{Duration, Instant};
use topic_harness::config::load_topic_file;
use topic_harness::context::RunContext;
use topic_harness::gate::start_gate;
use topic_harness::outcome::{WorkerFailure, WorkerOutcome};
use topic_harness::poller::{run_poll_subscriber, PollSubscriberArgs};
use topic_harness::topic::TopicRegistry;
use topic_harness::{Harness, HarnessError};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_poll_topic_five_messages() {
    let mut orders = record("ACME.Orders", "NATS", "NATSPoll");
    orders.poll_timeout_us = 1000;
    let records = vec![orders];

    let mut settings = fast_settings(5);
    settings.wait_time = Duration::from_secs(2);

    let backend = backend_for(&records, FaultPlan::default());
    let harness = Harness::prepare(&records, backend, settings).unwrap();

    let started = Instant::now();
    let summary = harness.run().await.unwrap();

    let line = summary.report.line("ACME.Orders").unwrap();
    assert_eq!(line.counts.published, 5);
    assert_eq!(line.counts.received, 5);
    assert_eq!(line.counts.commits, 5);
    assert_eq!(line.counts.acks, 5);
    assert_eq!(line.counts.failed_acks, 0);

    assert_eq!(summary.totals.published, 5);
    assert_eq!(summary.totals.poll_received, 5);
    assert_eq!(summary.totals.async_received, 0);
    assert_eq!(summary.publisher, Some(WorkerOutcome::Completed));
    assert_eq!(summary.poller, Some(WorkerOutcome::Idle));

    // idle timeout plus one quiet detector round
    assert_eq!(summary.detector_rounds, 1);
    assert!(started.elapsed() < Duration::from_secs(1 + 2 + 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_poll_worker_stops_one_idle_timeout_after_last_message() {
    let records = vec![record("ACME.Orders", "NATS", "NATSPoll")];
    let backend = backend_for(&records, FaultPlan::default());

    let mut registry = TopicRegistry::load(&records).unwrap();
    registry.attach_sessions(backend.as_ref()).unwrap();
    let session = registry.topics()[0].session().unwrap();
    let ctx = RunContext::new(registry, backend.clone(), 1);

    backend.connect_all().await.unwrap();
    backend.subscribe_sync(session).await.unwrap();

    let (trigger, gate) = start_gate();
    let worker = {
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || {
            let outcome =
                run_poll_subscriber(&ctx, &gate, &PollSubscriberArgs::new(1, Duration::ZERO));
            (outcome, Instant::now())
        })
    };
    trigger.open();

    // gaps shorter than the idle timeout must not stop the worker
    let mut last_publish = Instant::now();
    for i in 0..3 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        backend
            .publish(session, format!("order {i}").as_bytes())
            .unwrap();
        last_publish = Instant::now();
    }

    let (outcome, stopped_at) = worker.await.unwrap();
    let quiet = stopped_at.duration_since(last_publish);

    assert_eq!(outcome, WorkerOutcome::Idle);
    assert!(quiet >= Duration::from_secs(1), "stopped after {quiet:?}");
    assert!(quiet < Duration::from_millis(1750), "stopped after {quiet:?}");
    assert_eq!(ctx.counters.totals().poll_received, 3);

    backend.shutdown().await;
}

#[tokio::test]
async fn test_connect_failure_shuts_backend_down() {
    let records = vec![record("ACME.Alerts", "", "NATSAsync")];
    let backend = Arc::new(FailingConnect::new(&records));
    let harness = Harness::prepare(&records, backend.clone(), fast_settings(1)).unwrap();

    let err = harness.run().await.err().unwrap();

    assert!(matches!(err, HarnessError::Connect(_)));
    assert!(backend.was_shut_down());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subscribe_only_async_topic_reaches_quiescence() {
    let address = TopicAddress::new(DOMAIN, CONNECTION, "ACME.Alerts");
    let backend = Arc::new(
        LoopbackBackend::builder()
            .topic(address.clone(), Endpoints::both())
            .build(),
    );
    let records = vec![record("ACME.Alerts", "", "NATSAsync")];

    let mut settings = fast_settings(1);
    settings.settle = Duration::from_millis(500);

    let harness = Harness::prepare(&records, backend.clone(), settings).unwrap();

    // stands in for a producer outside the harness
    let producer = {
        let backend = backend.clone();
        std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !backend.is_connected() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            std::thread::sleep(Duration::from_millis(200));

            let session = backend.lookup(&address).unwrap();
            for i in 0..10 {
                backend
                    .publish(session, format!("alert {i}").as_bytes())
                    .unwrap();
            }
        })
    };

    let summary = harness.run().await.unwrap();
    producer.join().unwrap();

    assert_eq!(summary.publisher, None);
    assert_eq!(summary.poller, None);
    assert_eq!(summary.totals.published, 0);
    assert_eq!(summary.totals.async_received, 10);
    assert_eq!(summary.totals.poll_received, 0);

    let line = summary.report.line("ACME.Alerts").unwrap();
    assert_eq!(line.counts.received, 10);
    assert_eq!(line.counts.commits, 10);
    assert_eq!(line.counts.failed_acks, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_counts_are_per_topic_times_topics() {
    let records = vec![
        record("ACME.Orders", "NATS", ""),
        record("ACME.Invoices", "JS", ""),
        record("ACME.Audit", "NATS", ""),
    ];
    let backend = backend_for(&records, FaultPlan::default());
    let harness = Harness::prepare(&records, backend, fast_settings(7)).unwrap();

    let summary = harness.run().await.unwrap();

    for line in &summary.report.lines {
        assert_eq!(line.counts.published, 7, "{}", line.name);
        assert_eq!(line.counts.received, 0, "{}", line.name);
    }
    assert_eq!(summary.totals.published, 21);
    assert_eq!(summary.poller, None);
    assert_eq!(summary.detector_rounds, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_publish_skips_only_that_message() {
    let records = vec![record("ACME.Orders", "NATS", "NATSPoll")];
    let backend = backend_for(
        &records,
        FaultPlan {
            fail_every_nth_publish: 3,
            ..FaultPlan::default()
        },
    );
    let harness = Harness::prepare(&records, backend, fast_settings(6)).unwrap();

    let summary = harness.run().await.unwrap();

    let line = summary.report.line("ACME.Orders").unwrap();
    assert_eq!(line.counts.published, 4);
    assert_eq!(line.counts.received, 4);
    assert_eq!(summary.publisher, Some(WorkerOutcome::Completed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_commit_failure_stops_poll_worker() {
    let records = vec![record("ACME.Orders", "NATS", "NATSPoll")];
    let backend = backend_for(
        &records,
        FaultPlan {
            fail_commits: true,
            ..FaultPlan::default()
        },
    );
    let harness = Harness::prepare(&records, backend, fast_settings(3)).unwrap();

    let summary = harness.run().await.unwrap();

    assert!(matches!(
        summary.poller,
        Some(WorkerOutcome::Failed(WorkerFailure::Commit { .. }))
    ));
    assert_eq!(summary.publisher, Some(WorkerOutcome::Completed));

    let line = summary.report.line("ACME.Orders").unwrap();
    assert_eq!(line.counts.published, 3);
    assert_eq!(line.counts.received, 1);
    assert_eq!(line.counts.commits, 0);
    assert_eq!(line.counts.failed_acks, 1);
    assert_eq!(summary.totals.poll_received, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hard_poll_error_stops_poll_worker() {
    let records = vec![record("ACME.Orders", "NATS", "JSPull")];
    let backend = backend_for(
        &records,
        FaultPlan {
            fail_polls: true,
            ..FaultPlan::default()
        },
    );
    let harness = Harness::prepare(&records, backend, fast_settings(2)).unwrap();

    let summary = harness.run().await.unwrap();

    assert!(matches!(
        summary.poller,
        Some(WorkerOutcome::Failed(WorkerFailure::Poll { .. }))
    ));
    assert_eq!(summary.poller.as_ref().map(WorkerOutcome::ret_code), Some(-1));
    assert_eq!(summary.totals.published, 2);
    assert_eq!(summary.totals.poll_received, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queued_async_topic_is_polled() {
    let records = vec![record("ACME.Shipments", "NATS", "QAsync")];
    let backend = backend_for(&records, FaultPlan::default());
    let harness = Harness::prepare(&records, backend, fast_settings(4)).unwrap();

    let summary = harness.run().await.unwrap();

    let line = summary.report.line("ACME.Shipments").unwrap();
    assert_eq!(line.counts.published, 4);
    assert_eq!(line.counts.received, 4);
    assert_eq!(line.counts.acks, 4);
    assert_eq!(summary.totals.poll_received, 4);
    assert_eq!(summary.totals.async_received, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_and_poll_receipts_add_up() {
    let records = vec![
        record("ACME.Orders", "NATS", "NATSPoll"),
        record("ACME.Invoices", "JS", "JSPush"),
    ];
    let backend = backend_for(&records, FaultPlan::default());
    let harness = Harness::prepare(&records, backend, fast_settings(5)).unwrap();

    let summary = harness.run().await.unwrap();

    assert_eq!(summary.totals.published, 10);
    assert_eq!(summary.totals.poll_received, 5);
    assert_eq!(summary.totals.async_received, 5);

    let per_topic: u64 = summary
        .report
        .lines
        .iter()
        .map(|line| line.counts.received)
        .sum();
    assert_eq!(per_topic, summary.totals.received());

    let invoices = summary.report.line("ACME.Invoices").unwrap();
    assert_eq!(invoices.counts.commits, 5);
}

#[tokio::test]
async fn test_lookup_failure_is_fatal() {
    let records = vec![
        record("ACME.Orders", "NATS", "NATSPoll"),
        record("ACME.Missing", "NATS", ""),
    ];
    let backend = backend_for(&records[..1], FaultPlan::default());

    let err = Harness::prepare(&records, backend, fast_settings(1))
        .err()
        .unwrap();
    assert!(matches!(err, HarnessError::SessionLookup { .. }));
}

#[tokio::test]
async fn test_invalid_mode_is_fatal() {
    let records = vec![record("ACME.Orders", "NATS", "NATSPush")];
    let backend = backend_for(&records, FaultPlan::default());

    let err = Harness::prepare(&records, backend, fast_settings(1))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        HarnessError::InvalidSubscribeType { ref value, .. } if value == "NATSPush"
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_from_topic_file_skips_disabled_topics() {
    let file = write_topic_file(
        r#"{
            "AppConfig": {
                "AppName": "PubSub",
                "Topics": [
                    {
                        "TopicNumber": 1,
                        "LogicalUniqueName": "orders",
                        "Domain": "DomainA",
                        "Connection": "NATSConn1",
                        "TopicName": "ACME.Orders",
                        "Publish": true,
                        "Subscribe": true,
                        "PublishType": "NATS",
                        "SubscribeType": "NATSPoll",
                        "PollTimeoutus": 500
                    },
                    {
                        "TopicNumber": 2,
                        "LogicalUniqueName": "legacy",
                        "Domain": "DomainA",
                        "Connection": "NATSConn1",
                        "TopicName": "ACME.Legacy",
                        "Disabled": true,
                        "Publish": true,
                        "PublishType": "NOT_A_MODE"
                    }
                ]
            }
        }"#,
    );

    let app = load_topic_file(file.path()).unwrap();
    let backend = backend_for(&app.topics, FaultPlan::default());
    let harness = Harness::prepare(&app.topics, backend, fast_settings(3)).unwrap();

    let summary = harness.run().await.unwrap();

    assert_eq!(summary.report.lines.len(), 1);
    assert!(summary.report.line("ACME.Legacy").is_none());

    let text = summary.report.to_string();
    assert!(text.contains(
        "[1] <ACME.Orders> ==> msg_published_count<3> msg_received_count<3> commits<3> acks<3> failed_acks<0>"
    ));
    assert!(text.contains("TOTALS: Published<3> AsyncReceived<0> PollReceived<3>"));
}
