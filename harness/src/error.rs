use harness_backend::BackendError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a run before any worker starts.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Failed to read topic file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse topic file '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid PublishType <{value}> for topic <{topic}>")]
    InvalidPublishType { topic: String, value: String },
    #[error("Invalid SubscribeType <{value}> for topic <{topic}>")]
    InvalidSubscribeType { topic: String, value: String },
    #[error("No topics declared in the topic file")]
    NoTopics,
    #[error("There are NO Publications or Subscriptions enabled")]
    NothingEnabled,
    #[error("Failed to resolve session for {address}: {source}")]
    SessionLookup {
        address: String,
        #[source]
        source: BackendError,
    },
    #[error("Failed to make connections: {0}")]
    Connect(#[source] BackendError),
    #[error("Subscription failed for {address} using {op}: {source}")]
    Subscribe {
        address: String,
        op: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("No topic file given, set --topic-file or {0}")]
    MissingTopicFile(&'static str),
}
