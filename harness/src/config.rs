use crate::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub const TOPIC_FILE_ENV: &str = "HARNESS_TOPIC_FILE";

/// Root of the topic file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicFile {
    #[serde(rename = "AppConfig")]
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppConfig {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub topics: Vec<TopicRecord>,
}

/// One declared topic, exactly as written in the topic file.
///
/// Mode strings stay raw here. They are validated when the registry is built,
/// and only for the directions that are turned on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopicRecord {
    #[serde(default)]
    pub topic_number: Option<usize>,
    #[serde(default)]
    pub logical_unique_name: String,
    pub domain: String,
    pub connection: String,
    pub topic_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub subscribe: bool,
    #[serde(default)]
    pub publish_type: String,
    #[serde(default)]
    pub subscribe_type: String,
    #[serde(default, alias = "PollTimeoutus")]
    pub poll_timeout_us: u64,
}

fn default_true() -> bool {
    true
}

impl TopicRecord {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.disabled
    }
}

impl TopicFile {
    pub fn from_json(path: &Path, json: &str) -> Result<Self, HarnessError> {
        serde_json::from_str(json).map_err(|source| HarnessError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Read and parse the topic file at `path`.
pub fn load_topic_file(path: &Path) -> Result<AppConfig, HarnessError> {
    debug!("Reading topic file {}", path.display());

    let json = std::fs::read_to_string(path).map_err(|source| HarnessError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;

    let file = TopicFile::from_json(path, &json)?;

    if let Ok(pretty) = serde_json::to_string_pretty(&file) {
        info!("Using configuration:\n{pretty}");
    }

    Ok(file.app)
}
