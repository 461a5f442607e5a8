use crate::config::TopicRecord;
use harness_backend::loopback::{Endpoints, FaultPlan, LoopbackBackend};
use harness_backend::TopicAddress;

/// Declare every active topic of the file on an in-process backend.
pub fn loopback_for(records: &[TopicRecord], faults: FaultPlan) -> LoopbackBackend {
    records
        .iter()
        .filter(|record| record.is_active())
        .fold(
            LoopbackBackend::builder().faults(faults),
            |builder, record| {
                builder.topic(
                    TopicAddress::new(
                        record.domain.as_str(),
                        record.connection.as_str(),
                        record.topic_name.as_str(),
                    ),
                    Endpoints {
                        publish: record.publish,
                        subscribe: record.subscribe,
                    },
                )
            },
        )
        .build()
}
