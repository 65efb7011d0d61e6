//! Engine settings.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tuning knobs for one prediction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Organisation units per analytics window. One bulk analytics query is
    /// issued per window; 500 balances round trips against result-set size.
    pub analytics_batch_size: usize,

    /// Organisation units per write chunk. All insert/update/soft-delete
    /// operations for a chunk are flushed as one batch.
    pub org_unit_chunk_size: usize,

    /// Maximum time to wait on the data value queue before treating the
    /// producer as dead.
    pub queue_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            analytics_batch_size: 500,
            org_unit_chunk_size: 500,
            queue_timeout_secs: 300,
        }
    }
}

impl EngineSettings {
    /// Load settings from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_batch_sizes() {
        let settings = EngineSettings::default();
        assert_eq!(settings.analytics_batch_size, 500);
        assert_eq!(settings.org_unit_chunk_size, 500);
        assert_eq!(settings.queue_timeout_secs, 300);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{"analytics_batch_size": 10}"#).unwrap();
        assert_eq!(settings.analytics_batch_size, 10);
        assert_eq!(settings.org_unit_chunk_size, 500);
    }
}
