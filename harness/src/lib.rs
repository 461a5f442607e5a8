//! Multi-topic publish/subscribe exercise harness.
//!
//! A run loads a topic file into a [`topic::TopicRegistry`], resolves each
//! topic's operations, then drives one publisher thread and one poll thread
//! against a [`harness_backend::MessagingBackend`] while push deliveries
//! arrive through [`receive::AsyncReceiver`]. The run ends when
//! [`detector::wait_for_quiescence`] sees the receive totals stop moving.

pub mod cli;
pub mod config;
pub mod context;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod harness;
pub mod loopback;
pub mod outcome;
pub mod poller;
pub mod publisher;
pub mod receive;
pub mod stats;
pub mod topic;

pub use error::HarnessError;
pub use harness::{Harness, RunSettings, RunSummary};

pub const LOG_ENV: &str = "HARNESS_LOG";

/// Install the console logger. Filter directives come from `HARNESS_LOG`,
/// defaulting to `info`.
pub fn init_logging() {
    use std::io::stderr;
    use std::io::IsTerminal;
    use tracing_glog::Glog;
    use tracing_glog::GlogFields;
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt = tracing_subscriber::fmt::Layer::default()
        .with_ansi(stderr().is_terminal())
        .with_writer(std::io::stderr)
        .event_format(Glog::default().with_timer(tracing_glog::LocalTime::default()))
        .fmt_fields(GlogFields::default().compact());

    let subscriber = Registry::default().with(filter).with(fmt);
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Logging already initialised: {e}");
    }
}
