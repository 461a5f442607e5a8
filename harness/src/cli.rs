use crate::config::TOPIC_FILE_ENV;
use crate::error::HarnessError;
use crate::harness::RunSettings;
use crate::poller::PollSubscriberArgs;
use crate::publisher::PublisherArgs;
use clap::{value_parser, Parser};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Topic harness CLI, publishes and consumes test traffic on every configured topic
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Messages to publish per topic
    #[arg(short = 'm', long, default_value_t = 1, value_parser = value_parser!(u64).range(1..))]
    pub max_msgs: u64,

    /// Target message size in bytes
    #[arg(short = 'b', long, default_value_t = 1024, value_parser = value_parser!(u64).range(1..))]
    pub bytes_size: u64,

    /// Seconds between completion samples
    #[arg(short = 'w', long, default_value_t = 6, value_parser = value_parser!(u64).range(1..))]
    pub wait_time: u64,

    /// Delay after each publish, in microseconds
    #[arg(long, default_value_t = 0)]
    pub delay_us: u64,

    /// Seconds of silence before the poll worker stops (0 selects 6)
    #[arg(long, default_value_t = 1)]
    pub idle_timeout: u64,

    /// Delay between poll cycles, in microseconds
    #[arg(long, default_value_t = 0)]
    pub poll_delay_us: u64,

    /// Milliseconds to wait after subscribing before workers are released
    #[arg(long, default_value_t = 1000)]
    pub settle_ms: u64,

    /// Path of the JSON topic file
    #[arg(long, env = TOPIC_FILE_ENV)]
    pub topic_file: Option<PathBuf>,
}

impl Args {
    pub fn topic_file(&self) -> Result<&Path, HarnessError> {
        self.topic_file
            .as_deref()
            .ok_or(HarnessError::MissingTopicFile(TOPIC_FILE_ENV))
    }

    pub fn settings(&self) -> RunSettings {
        RunSettings {
            publisher: PublisherArgs {
                num_msgs: self.max_msgs,
                msg_size: usize::try_from(self.bytes_size).unwrap_or(usize::MAX),
                delay: Duration::from_micros(self.delay_us),
            },
            poller: PollSubscriberArgs::new(
                self.idle_timeout,
                Duration::from_micros(self.poll_delay_us),
            ),
            wait_time: Duration::from_secs(self.wait_time),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}
