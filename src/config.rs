//! Recording configuration
//!
//! All timing knobs of the recording process live here so that embedders
//! (and the test suite) can scale them. The defaults match the cadence
//! the recorder has always used in production.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Output flavor of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Single chunked container file.
    Xdf,
    /// One data file and one metadata file per stream.
    Csv,
}

/// Configuration of one recording run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Post-processing flags per stream, keyed by `"name (hostname)"`.
    pub sync_options: HashMap<String, i32>,

    /// Post-processing flags for streams without an entry in
    /// `sync_options`. Negative disables the default.
    pub sync_default: i32,

    /// Collect periodic clock-offset measurements per stream.
    pub collect_offsets: bool,

    /// Append a wall-clock recording timestamp to every sample.
    pub recording_timestamps: bool,

    /// Interval between chunk pulls from each inlet.
    #[serde(with = "duration_ms")]
    pub chunk_interval: Duration,

    /// Approximate interval between boundary chunks.
    #[serde(with = "duration_ms")]
    pub boundary_interval: Duration,

    /// Approximate interval between clock-offset measurements.
    #[serde(with = "duration_ms")]
    pub offset_interval: Duration,

    /// Interval between re-resolves of each watch query.
    #[serde(with = "duration_ms")]
    pub resolve_interval: Duration,

    /// Maximum wait for a stream subscription before flagging it delayed.
    #[serde(with = "duration_ms")]
    pub max_open_wait: Duration,

    /// Maximum wait for all initial streams to finish their headers.
    #[serde(with = "duration_ms")]
    pub max_headers_wait: Duration,

    /// Maximum wait for all initial streams to finish streaming.
    #[serde(with = "duration_ms")]
    pub max_footers_wait: Duration,

    /// Maximum wait for a worker thread to join before detaching it.
    #[serde(with = "duration_ms")]
    pub max_join_wait: Duration,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sync_options: HashMap::new(),
            sync_default: -1,
            collect_offsets: false,
            recording_timestamps: false,
            chunk_interval: Duration::from_millis(500),
            boundary_interval: Duration::from_secs(10),
            offset_interval: Duration::from_secs(5),
            resolve_interval: Duration::from_secs(5),
            max_open_wait: Duration::from_secs(5),
            max_headers_wait: Duration::from_secs(10),
            max_footers_wait: Duration::from_secs(2),
            max_join_wait: Duration::from_secs(5),
        }
    }
}

impl RecordingConfig {
    /// Load a configuration from a JSON file. Missing fields take their
    /// default values.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid config file {}: {e}", path.display())))
    }

    /// Effective post-processing flags for a stream, if any.
    pub fn postprocessing_for(&self, name: &str, hostname: &str) -> Option<i32> {
        let key = format!("{name} ({hostname})");
        match self.sync_options.get(&key) {
            Some(flags) => Some(*flags),
            None if self.sync_default >= 0 => Some(self.sync_default),
            None => None,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
