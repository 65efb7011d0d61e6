//! Data values and the maps they are consolidated into.

use crate::metadata::OrgUnit;
use crate::period::Period;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a value measures.
///
/// The three forms map to the two value sources: elements and operands come
/// from the row-level fact store, analytics items from the pre-aggregated
/// store (with or without an attribute-option dimension).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimensionalItem {
    /// A data element, summed over all of its category option combos.
    DataElement(String),
    /// One (data element, category option combo) pair.
    DataElementOperand { element: String, option_combo: String },
    /// An item answered by the analytics store.
    Analytics { uid: String, with_attribute_options: bool },
}

impl DimensionalItem {
    pub fn operand(element: impl Into<String>, option_combo: impl Into<String>) -> Self {
        Self::DataElementOperand { element: element.into(), option_combo: option_combo.into() }
    }
}

/// One raw fact row, as streamed from the row-level store.
///
/// Carries numeric ids rather than hydrated objects to keep the stream cheap;
/// the row fetcher resolves them against per-run lookup tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeflatedValue {
    pub element_id: i64,
    pub period_id: i64,
    pub org_unit_id: i64,
    pub org_unit_path: String,
    pub option_combo_id: i64,
    pub attribute_combo_id: i64,
    pub value: String,
    pub deleted: bool,
}

/// One consolidated input value: the atomic unit of data fed to evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundValue {
    /// Uid of the organisation unit the value was consolidated under.
    pub org_unit: String,
    pub period: Period,
    /// Attribute option combo uid; `None` when the value is not stored
    /// disaggregated by attribute option and applies to every combo.
    pub attribute_combo: Option<String>,
    pub item: DimensionalItem,
    pub value: f64,
}

/// A stored prediction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValue {
    pub element: String,
    pub period: Period,
    pub org_unit: String,
    pub option_combo: String,
    pub attribute_combo: String,
    pub value: String,
    /// Audit fields; absent on records hydrated from deflated rows.
    pub stored_by: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub deleted: bool,
}

impl DataValue {
    pub fn key(&self) -> DataValueKey {
        DataValueKey {
            element: self.element.clone(),
            period_start: self.period.start,
            org_unit: self.org_unit.clone(),
            option_combo: self.option_combo.clone(),
            attribute_combo: self.attribute_combo.clone(),
        }
    }
}

/// The dimension key a prediction is reconciled under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataValueKey {
    pub element: String,
    pub period_start: chrono::NaiveDate,
    pub org_unit: String,
    pub option_combo: String,
    pub attribute_combo: String,
}

/// Everything known about one organisation unit for one predictor run.
#[derive(Debug, Clone)]
pub struct PredictionData {
    pub org_unit: OrgUnit,
    pub values: Vec<FoundValue>,
    pub old_predictions: Vec<DataValue>,
}

impl PredictionData {
    pub fn empty(org_unit: OrgUnit) -> Self {
        Self { org_unit, values: Vec::new(), old_predictions: Vec::new() }
    }
}

/// Values indexed by period, then by dimensional item.
///
/// A named wrapper instead of a bare nested map so call sites read as
/// operations (`add`, `value`, `values_for`) rather than map plumbing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodValueMap {
    by_period: HashMap<Period, HashMap<DimensionalItem, f64>>,
}

impl PeriodValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds to the running sum for (period, item).
    pub fn add(&mut self, period: &Period, item: &DimensionalItem, value: f64) {
        *self
            .by_period
            .entry(period.clone())
            .or_default()
            .entry(item.clone())
            .or_insert(0.0) += value;
    }

    /// Replaces the value for (period, item).
    pub fn insert(&mut self, period: Period, item: DimensionalItem, value: f64) {
        self.by_period.entry(period).or_default().insert(item, value);
    }

    pub fn value(&self, period: &Period, item: &DimensionalItem) -> Option<f64> {
        self.by_period.get(period).and_then(|m| m.get(item)).copied()
    }

    pub fn values_for(&self, period: &Period) -> Option<&HashMap<DimensionalItem, f64>> {
        self.by_period.get(period)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Period, &HashMap<DimensionalItem, f64>)> {
        self.by_period.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Period, &mut HashMap<DimensionalItem, f64>)> {
        self.by_period.iter_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.by_period.is_empty()
    }

    /// Merges another map in, overriding values for colliding (period, item).
    pub fn extend_from(&mut self, other: &PeriodValueMap) {
        for (period, values) in other.iter() {
            let target = self.by_period.entry(period.clone()).or_default();
            for (item, value) in values {
                target.insert(item.clone(), *value);
            }
        }
    }
}
