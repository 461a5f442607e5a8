use crate::topic::{TopicRegistry, TopicSnapshot};
use chrono::{DateTime, Local, Timelike};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide totals for one run. Only ever incremented.
#[derive(Debug, Default)]
pub struct GlobalCounters {
    pub published: AtomicU64,
    pub async_received: AtomicU64,
    pub poll_received: AtomicU64,
}

impl GlobalCounters {
    pub fn totals(&self) -> Totals {
        Totals {
            published: self.published.load(Ordering::Acquire),
            async_received: self.async_received.load(Ordering::Acquire),
            poll_received: self.poll_received.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub published: u64,
    pub async_received: u64,
    pub poll_received: u64,
}

impl Totals {
    pub fn received(&self) -> u64 {
        self.async_received + self.poll_received
    }
}

/// `[<label>] HH:MM:SS:ms:us:ns hh:mm:ss:mmm:uuu:nnn`
pub fn format_timestamp(label: &str, at: DateTime<Local>) -> String {
    let nanos = at.nanosecond() % 1_000_000_000;
    format!(
        "[{label}] HH:MM:SS:ms:us:ns {:02}:{:02}:{:02}:{:03}:{:03}:{:03}",
        at.hour(),
        at.minute(),
        at.second(),
        nanos / 1_000_000,
        (nanos / 1_000) % 1_000,
        nanos % 1_000
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLine {
    pub number: usize,
    pub name: String,
    pub counts: TopicSnapshot,
}

/// Final per-topic and global figures of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsReport {
    pub lines: Vec<TopicLine>,
    pub start: String,
    pub end: String,
    pub totals: Totals,
}

impl StatisticsReport {
    /// Read the registry and global counters. Inactive topics are left out.
    pub fn collect(
        registry: &TopicRegistry,
        counters: &GlobalCounters,
        start: String,
        end: String,
    ) -> Self {
        let lines = registry
            .topics()
            .iter()
            .filter(|topic| topic.active)
            .map(|topic| TopicLine {
                number: topic.number,
                name: topic.name().to_string(),
                counts: topic.counters.snapshot(),
            })
            .collect();

        Self {
            lines,
            start,
            end,
            totals: counters.totals(),
        }
    }

    pub fn line(&self, name: &str) -> Option<&TopicLine> {
        self.lines.iter().find(|line| line.name == name)
    }
}

impl fmt::Display for TopicLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] <{}> ==> msg_published_count<{}> msg_received_count<{}> commits<{}> acks<{}> failed_acks<{}>",
            self.number,
            self.name,
            self.counts.published,
            self.counts.received,
            self.counts.commits,
            self.counts.acks,
            self.counts.failed_acks
        )
    }
}

impl fmt::Display for StatisticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n---------------- BEGIN: STATISTICS ---------------------")?;
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        writeln!(f, "Start Time {}", self.start)?;
        writeln!(f, "End Time   {}", self.end)?;
        writeln!(
            f,
            "\nTOTALS: Published<{}> AsyncReceived<{}> PollReceived<{}>",
            self.totals.published, self.totals.async_received, self.totals.poll_received
        )?;
        writeln!(f, "\n---------------- END: STATISTICS ---------------------")
    }
}
