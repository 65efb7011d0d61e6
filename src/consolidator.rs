//! Consolidating both value sources, one organisation unit at a time.
//!
//! The master unit list is merge-joined against the ordered row-fetcher
//! stream in batches: units without row data get empty value lists, one
//! analytics fetch covers exactly the units of the batch, and the merged
//! entries are handed out one by one. Exactly one `PredictionData` is
//! produced per organisation unit.

use crate::analytics_fetcher::AnalyticsFetcher;
use crate::data::PredictionData;
use crate::error::Result;
use crate::metadata::OrgUnit;
use crate::row_fetcher::RowValueFetcher;
use std::collections::VecDeque;

pub struct DataConsolidator {
    row_fetcher: RowValueFetcher,
    analytics_fetcher: AnalyticsFetcher,
    units: VecDeque<OrgUnit>,
    batch_size: usize,
    queue: VecDeque<PredictionData>,
    pending_row_data: Option<PredictionData>,
}

impl DataConsolidator {
    /// `org_units` is the full level list in ascending path order; the row
    /// fetcher must stream (a subset of) the same units in the same order.
    pub fn new(
        row_fetcher: RowValueFetcher,
        analytics_fetcher: AnalyticsFetcher,
        org_units: Vec<OrgUnit>,
        batch_size: usize,
    ) -> Self {
        Self {
            row_fetcher,
            analytics_fetcher,
            units: org_units.into(),
            batch_size: batch_size.max(1),
            queue: VecDeque::new(),
            pending_row_data: None,
        }
    }

    /// The next organisation unit's consolidated data, or `None` when every
    /// unit has been produced.
    pub async fn next_data(&mut self) -> Result<Option<PredictionData>> {
        if self.queue.is_empty() {
            self.fill_queue().await?;
        }
        Ok(self.queue.pop_front())
    }

    async fn fill_queue(&mut self) -> Result<()> {
        let mut batch = Vec::new();

        while batch.len() < self.batch_size {
            let Some(unit) = self.units.pop_front() else {
                break;
            };

            if self.pending_row_data.is_none() {
                self.pending_row_data = self.row_fetcher.next_data().await?;
            }

            let data = match self.pending_row_data.take() {
                Some(ready) if ready.org_unit.uid == unit.uid => ready,
                not_ready => {
                    self.pending_row_data = not_ready;
                    PredictionData::empty(unit)
                }
            };
            batch.push(data);
        }

        for data in &mut batch {
            let analytics_values = self.analytics_fetcher.values_for(&data.org_unit).await?;
            data.values.extend(analytics_values);
        }

        self.queue.extend(batch);
        Ok(())
    }
}
