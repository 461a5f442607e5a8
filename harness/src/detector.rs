use crate::stats::{GlobalCounters, Totals};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quiescence {
    /// Second of the two matching samples.
    pub totals: Totals,
    /// Sampling rounds it took, at least one.
    pub rounds: u64,
}

/// Two samples taken one interval apart show no new receipts.
///
/// Published totals do not take part.
pub fn is_drained(prev: Totals, cur: Totals) -> bool {
    prev.received() == cur.received()
}

/// Sample the global totals every `interval` until one full interval passes
/// without a single new receipt.
pub async fn wait_for_quiescence(counters: &GlobalCounters, interval: Duration) -> Quiescence {
    let mut rounds = 0;

    loop {
        rounds += 1;
        let prev = counters.totals();
        info!(
            "Before Sleep<{}s>: total_published<{}> prev_received<{}>",
            interval.as_secs_f64(),
            prev.published,
            prev.received()
        );

        tokio::time::sleep(interval).await;

        let cur = counters.totals();
        info!(
            "After Sleep<{}s>: total_published<{}> prev_received<{}> received<{}>",
            interval.as_secs_f64(),
            cur.published,
            prev.received(),
            cur.received()
        );

        if is_drained(prev, cur) {
            return Quiescence {
                totals: cur,
                rounds,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn totals(published: u64, async_received: u64, poll_received: u64) -> Totals {
        Totals {
            published,
            async_received,
            poll_received,
        }
    }

    #[test]
    fn test_drained_ignores_published() {
        assert!(is_drained(totals(1, 2, 3), totals(10, 2, 3)));
        assert!(is_drained(totals(0, 5, 0), totals(0, 0, 5)));
        assert!(!is_drained(totals(10, 2, 3), totals(10, 2, 4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_counters_drain_in_one_round() {
        let counters = GlobalCounters::default();
        let result = wait_for_quiescence(&counters, Duration::from_secs(2)).await;
        assert_eq!(result.rounds, 1);
        assert_eq!(result.totals, Totals::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_sampling_while_receipts_grow() {
        let interval = Duration::from_secs(2);
        let counters = Arc::new(GlobalCounters::default());

        let bumper = {
            let counters = counters.clone();
            tokio::spawn(async move {
                tokio::time::sleep(interval / 2).await;
                for _ in 0..3 {
                    counters.poll_received.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(interval).await;
                }
            })
        };

        let result = wait_for_quiescence(&counters, interval).await;
        bumper.await.unwrap();

        assert_eq!(result.rounds, 4);
        assert_eq!(result.totals.received(), 3);
    }
}
