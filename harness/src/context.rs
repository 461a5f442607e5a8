use crate::stats::GlobalCounters;
use crate::topic::TopicRegistry;
use harness_backend::MessagingBackend;
use std::sync::Arc;

/// Everything a run shares between the orchestrator, the workers and the
/// async receive path.
pub struct RunContext {
    pub registry: TopicRegistry,
    pub counters: GlobalCounters,
    pub backend: Arc<dyn MessagingBackend>,
    pub print_frequency: u64,
}

impl RunContext {
    pub fn new(
        registry: TopicRegistry,
        backend: Arc<dyn MessagingBackend>,
        print_frequency: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            counters: GlobalCounters::default(),
            backend,
            print_frequency: print_frequency.max(1),
        })
    }

    /// Whether the message with this ordinal gets a progress line.
    pub fn should_print(&self, ordinal: u64) -> bool {
        ordinal % self.print_frequency == 0
    }
}

/// Progress-line spacing for a given number of messages per topic.
pub fn print_frequency(max_msgs: u64) -> u64 {
    match max_msgs {
        0..=100 => 1,
        101..=1_000 => 100,
        1_001..=10_000 => 1_000,
        10_001..=100_000 => 10_000,
        100_001..=1_000_000 => 100_000,
        1_000_001..=3_000_000 => 300_000,
        _ => 1_000_000,
    }
}
