//! Streaming consumption of row-level data values.
//!
//! A background task runs the store query, pushing deflated rows through a
//! bounded channel of depth 1 so I/O is decoupled from consumption without
//! buffering the result set. The consumer pulls one lookahead row at a time
//! and folds consecutive rows whose paths truncate to the same organisation
//! unit into one `PredictionData`.
//!
//! Contract (not re-validated here): rows arrive in ascending path order,
//! and each organisation unit is consumed at most once per fetcher.

use crate::data::{DataValue, DeflatedValue, FoundValue, PredictionData, PeriodValueMap};
use crate::data::DimensionalItem;
use crate::error::{PredictionError, Result};
use crate::metadata::{truncate_path, DataElement, OrgUnit};
use crate::period::Period;
use crate::stores::{MetadataProvider, RowValueQuery, RowValueStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

/// What the fetcher extracts from the row stream.
#[derive(Debug, Clone, Default)]
pub struct RowFetcherSpec {
    /// Hierarchy level rows are consolidated to.
    pub level: u32,
    /// The organisation units at that level, for path lookup.
    pub org_units: Vec<OrgUnit>,
    /// Persisted periods of the query, for id lookup.
    pub periods: Vec<Period>,
    /// Queried data elements, for id lookup.
    pub elements: Vec<DataElement>,
    /// Element uids wanted as plain-element items (summed over combos).
    pub element_items: HashSet<String>,
    /// (element, option combo) pairs wanted as operand items.
    pub operand_items: HashSet<(String, String)>,
    /// (element, option combo) pairs prior predictions are stored under.
    pub prediction_operands: HashSet<(String, String)>,
    /// Output periods; prior predictions are captured only for these.
    pub output_periods: HashSet<Period>,
}

pub struct RowValueFetcher {
    rx: mpsc::Receiver<DeflatedValue>,
    /// Error slot: the producer's result, sent after the stream closes.
    done: Option<oneshot::Receiver<Result<()>>>,
    queue_timeout: Duration,
    spec: RowFetcherSpec,
    units_by_path: HashMap<String, OrgUnit>,
    periods_by_id: HashMap<i64, Period>,
    elements_by_id: HashMap<i64, DataElement>,
    metadata: Arc<dyn MetadataProvider>,
    /// Option-combo uid lookup, built lazily once per fetcher.
    option_combo_uids: HashMap<i64, Option<String>>,
    lookahead: Option<DeflatedValue>,
    exhausted: bool,
}

impl RowValueFetcher {
    /// Starts the background producer and returns the consuming side.
    pub fn start(
        store: Arc<dyn RowValueStore>,
        metadata: Arc<dyn MetadataProvider>,
        query: RowValueQuery,
        spec: RowFetcherSpec,
        queue_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            // Dropping `tx` inside the store call closes the channel: that
            // close is the end-of-data marker, and the result lands in the
            // error slot for the consumer's next pull.
            let result = store.stream_values(query, tx).await;
            let _ = done_tx.send(result);
        });

        let units_by_path =
            spec.org_units.iter().map(|ou| (ou.path.clone(), ou.clone())).collect();
        let periods_by_id = spec
            .periods
            .iter()
            .filter_map(|p| p.id.map(|id| (id, p.clone())))
            .collect();
        let elements_by_id = spec.elements.iter().map(|de| (de.id, de.clone())).collect();

        Self {
            rx,
            done: Some(done_rx),
            queue_timeout,
            spec,
            units_by_path,
            periods_by_id,
            elements_by_id,
            metadata,
            option_combo_uids: HashMap::new(),
            lookahead: None,
            exhausted: false,
        }
    }

    /// The next organisation unit's data, or `None` when the stream ends.
    pub async fn next_data(&mut self) -> Result<Option<PredictionData>> {
        if self.lookahead.is_none() {
            self.lookahead = self.pull().await?;
        }

        let Some(first) = self.lookahead.take() else {
            return Ok(None);
        };

        let unit_path = truncate_path(&first.org_unit_path, self.spec.level).to_string();
        let org_unit = self.units_by_path.get(&unit_path).cloned().ok_or_else(|| {
            PredictionError::Stream(format!("no organisation unit for path {unit_path}"))
        })?;

        let mut sums: HashMap<String, PeriodValueMap> = HashMap::new();
        let mut old_predictions = Vec::new();

        let mut record = Some(first);
        loop {
            let Some(row) = record else {
                break;
            };
            if truncate_path(&row.org_unit_path, self.spec.level) != unit_path {
                self.lookahead = Some(row);
                break;
            }
            self.absorb(row, &org_unit, &mut sums, &mut old_predictions).await?;
            record = self.pull().await?;
        }

        let mut values = Vec::new();
        for (attribute_combo, period_values) in sums {
            for (period, items) in period_values.iter() {
                for (item, value) in items {
                    values.push(FoundValue {
                        org_unit: org_unit.uid.clone(),
                        period: period.clone(),
                        attribute_combo: Some(attribute_combo.clone()),
                        item: item.clone(),
                        value: *value,
                    });
                }
            }
        }

        Ok(Some(PredictionData { org_unit, values, old_predictions }))
    }

    /// Folds one row into the running sums and/or the prior predictions.
    async fn absorb(
        &mut self,
        row: DeflatedValue,
        org_unit: &OrgUnit,
        sums: &mut HashMap<String, PeriodValueMap>,
        old_predictions: &mut Vec<DataValue>,
    ) -> Result<()> {
        let element = self.elements_by_id.get(&row.element_id).cloned().ok_or_else(|| {
            PredictionError::Stream(format!("unexpected data element id {}", row.element_id))
        })?;
        let period = self.periods_by_id.get(&row.period_id).cloned().ok_or_else(|| {
            PredictionError::Stream(format!("unexpected period id {}", row.period_id))
        })?;
        let Some(option_combo) = self.option_combo_uid(row.option_combo_id).await? else {
            return Err(PredictionError::Metadata(format!(
                "unknown category option combo id {}",
                row.option_combo_id
            )));
        };
        let Some(attribute_combo) = self.option_combo_uid(row.attribute_combo_id).await? else {
            return Err(PredictionError::Metadata(format!(
                "unknown attribute option combo id {}",
                row.attribute_combo_id
            )));
        };

        // A row at exactly the requested level may be a prior prediction;
        // rows from descendants never are.
        if row.org_unit_path == org_unit.path
            && self.spec.output_periods.contains(&period)
            && self
                .spec
                .prediction_operands
                .contains(&(element.uid.clone(), option_combo.clone()))
        {
            old_predictions.push(DataValue {
                element: element.uid.clone(),
                period: period.clone(),
                org_unit: org_unit.uid.clone(),
                option_combo: option_combo.clone(),
                attribute_combo: attribute_combo.clone(),
                value: row.value.clone(),
                stored_by: None,
                created: None,
                deleted: row.deleted,
            });
        }

        if row.deleted {
            return Ok(());
        }

        // Unparsable payloads are treated as absent, never fatal.
        let Ok(value) = row.value.parse::<f64>() else {
            return Ok(());
        };

        let period_values = sums.entry(attribute_combo).or_default();

        if self.spec.operand_items.contains(&(element.uid.clone(), option_combo.clone())) {
            let item = DimensionalItem::operand(element.uid.clone(), option_combo);
            period_values.add(&period, &item, value);
        }
        if self.spec.element_items.contains(&element.uid) {
            let item = DimensionalItem::DataElement(element.uid.clone());
            period_values.add(&period, &item, value);
        }

        Ok(())
    }

    /// Pulls the next row, bounded by the queue timeout. A closed channel
    /// resolves the producer's result from the error slot: failures raised
    /// on the background task re-surface here, synchronously.
    async fn pull(&mut self) -> Result<Option<DeflatedValue>> {
        if self.exhausted {
            return Ok(None);
        }

        let received = timeout(self.queue_timeout, self.rx.recv())
            .await
            .map_err(|_| PredictionError::QueueTimeout(self.queue_timeout.as_secs()))?;

        match received {
            Some(row) => Ok(Some(row)),
            None => {
                self.exhausted = true;
                let done = self.done.take().ok_or_else(|| {
                    PredictionError::Stream("data value producer finished twice".to_string())
                })?;
                match timeout(self.queue_timeout, done).await {
                    Err(_) => Err(PredictionError::QueueTimeout(self.queue_timeout.as_secs())),
                    Ok(Err(_)) => Err(PredictionError::Stream(
                        "data value producer dropped without result".to_string(),
                    )),
                    Ok(Ok(result)) => result.map(|_| None),
                }
            }
        }
    }

    /// Resolves an option-combo uid by numeric id, caching per fetcher.
    async fn option_combo_uid(&mut self, id: i64) -> Result<Option<String>> {
        if let Some(cached) = self.option_combo_uids.get(&id) {
            return Ok(cached.clone());
        }
        let uid = self.metadata.option_combo_by_id(id).await?.map(|coc| coc.uid);
        self.option_combo_uids.insert(id, uid.clone());
        Ok(uid)
    }
}
