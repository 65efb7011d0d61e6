//! Run summary reported back to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionStatus {
    Success,
    Error,
}

/// Counts and terminal status of one prediction run. Counts accumulated
/// before a failure are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub status: PredictionStatus,
    pub description: String,
    pub predictors: u32,
    pub inserted: u32,
    pub updated: u32,
    pub deleted: u32,
    pub unchanged: u32,
}

impl Default for PredictionSummary {
    fn default() -> Self {
        Self {
            status: PredictionStatus::Success,
            description: String::new(),
            predictors: 0,
            inserted: 0,
            updated: 0,
            deleted: 0,
            unchanged: 0,
        }
    }
}

impl fmt::Display for PredictionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {} predictors, {} inserted, {} updated, {} deleted, {} unchanged",
            self.status, self.predictors, self.inserted, self.updated, self.deleted, self.unchanged
        )
    }
}
