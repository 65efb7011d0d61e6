//! Prediction contexts.
//!
//! A context is the exact input for one formula invocation: one attribute
//! option combo, one output period, the full sample-period value map and the
//! slice of values for the output period itself.

use crate::data::{DimensionalItem, FoundValue, PeriodValueMap};
use crate::period::Period;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct PredictionContext {
    /// Attribute option combo the prediction is made for.
    pub attribute_combo: String,
    /// Category option combo the prediction is written to. The disaggregator
    /// re-targets this when predicting per option combo.
    pub output_combo: String,
    pub output_period: Period,
    /// Values for every period, sample and output alike.
    pub period_values: PeriodValueMap,
    /// Values for the output period only.
    pub current_values: HashMap<DimensionalItem, f64>,
}

/// Groups consolidated values into one context per (attribute option combo ×
/// output period).
///
/// Values without an attribute option combo are stored regardless of
/// attribute option, so they are replicated into every combo's bucket. When
/// no value carries an attribute option combo at all, a single bucket under
/// the default combo keeps never-skip predictors producing output.
pub fn build_contexts(
    values: &[FoundValue],
    output_periods: &[Period],
    default_attribute_combo: &str,
    output_combo: &str,
) -> Vec<PredictionContext> {
    let mut by_attribute: BTreeMap<String, PeriodValueMap> = BTreeMap::new();
    let mut without_attribute = PeriodValueMap::new();

    for value in values {
        match &value.attribute_combo {
            Some(aoc) => by_attribute
                .entry(aoc.clone())
                .or_default()
                .insert(value.period.clone(), value.item.clone(), value.value),
            None => without_attribute.insert(value.period.clone(), value.item.clone(), value.value),
        }
    }

    if by_attribute.is_empty() {
        by_attribute.insert(default_attribute_combo.to_string(), PeriodValueMap::new());
    }

    let mut contexts = Vec::new();

    for (attribute_combo, mut period_values) in by_attribute {
        period_values.extend_from(&without_attribute);

        for output_period in output_periods {
            let current_values = period_values
                .values_for(output_period)
                .cloned()
                .unwrap_or_default();

            contexts.push(PredictionContext {
                attribute_combo: attribute_combo.clone(),
                output_combo: output_combo.to_string(),
                output_period: output_period.clone(),
                period_values: period_values.clone(),
                current_values,
            });
        }
    }

    contexts
}
