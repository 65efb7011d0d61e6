//! Reconciling new predictions against stored ones.
//!
//! New predictions are diffed per organisation unit against the prior
//! predictions found for it, producing the minimal set of changes: inserts
//! for new dimension keys, updates for changed (or previously soft-deleted)
//! values, soft-deletes for prior predictions no longer produced. All
//! operations for one chunk of organisation units are flushed together.

use crate::data::{DataValue, DataValueKey};
use crate::error::Result;
use crate::metadata::DataElement;
use crate::stores::PredictionStore;
use crate::summary::PredictionSummary;
use std::collections::HashMap;
use std::sync::Arc;

pub struct PredictionWriter {
    store: Arc<dyn PredictionStore>,
    output_element: DataElement,
    inserts: Vec<DataValue>,
    updates: Vec<DataValue>,
    deletes: Vec<DataValue>,
}

impl PredictionWriter {
    pub fn new(store: Arc<dyn PredictionStore>, output_element: DataElement) -> Self {
        Self {
            store,
            output_element,
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Diffs one organisation unit's new predictions against its prior ones
    /// and queues the resulting operations.
    pub fn write(
        &mut self,
        predictions: Vec<DataValue>,
        old_predictions: Vec<DataValue>,
        summary: &mut PredictionSummary,
    ) {
        enum Prior {
            Absent,
            Unchanged,
            Changed,
        }

        let mut old_by_key: HashMap<DataValueKey, DataValue> =
            old_predictions.into_iter().map(|dv| (dv.key(), dv)).collect();

        for prediction in predictions {
            let insignificant = self.is_insignificant(&prediction.value);
            let key = prediction.key();

            let prior = match old_by_key.get(&key) {
                None => Prior::Absent,
                Some(old) if old.value == prediction.value && !old.deleted => Prior::Unchanged,
                Some(_) => Prior::Changed,
            };

            match prior {
                Prior::Absent => {
                    // An insignificant value with no prior entry leaves no
                    // trace at all.
                    if !insignificant {
                        self.inserts.push(prediction);
                        summary.inserted += 1;
                    }
                }
                Prior::Unchanged => {
                    old_by_key.remove(&key);
                    summary.unchanged += 1;
                }
                Prior::Changed if !insignificant => {
                    old_by_key.remove(&key);
                    self.updates.push(prediction);
                    summary.updated += 1;
                }
                Prior::Changed => {
                    // Insignificant new value: the prior entry stays in the
                    // map so the cleanup below can soft-delete it (or leave
                    // it alone if it is already deleted).
                }
            }
        }

        for (_, old) in old_by_key {
            if !old.deleted {
                self.deletes.push(DataValue { deleted: true, ..old });
                summary.deleted += 1;
            }
        }
    }

    /// Flushes every queued operation as one batch per kind.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.inserts.is_empty() {
            self.store.insert_values(std::mem::take(&mut self.inserts)).await?;
        }
        if !self.updates.is_empty() {
            self.store.update_values(std::mem::take(&mut self.updates)).await?;
        }
        if !self.deletes.is_empty() {
            self.store.soft_delete_values(std::mem::take(&mut self.deletes)).await?;
        }
        Ok(())
    }

    fn is_insignificant(&self, value: &str) -> bool {
        value
            .parse::<f64>()
            .map(|v| self.output_element.zero_is_insignificant(v))
            .unwrap_or(false)
    }
}
