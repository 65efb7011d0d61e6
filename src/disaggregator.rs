//! Predicting independently per output category option combo.
//!
//! Normally a predictor writes to a single option combo. When its output
//! element carries a non-default category combo and no output combo was
//! chosen, one independent prediction is made per option combo of that
//! combo: plain-element input items are expanded into one operand per option
//! combo, and every built context is expanded into one context per output
//! option combo.

use crate::context::PredictionContext;
use crate::data::DimensionalItem;
use crate::mapper::DisaggregationMap;
use crate::metadata::{CategoryCombo, Predictor};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct Disaggregator {
    active: bool,
    output_option_combos: Vec<String>,
    /// Disaggregated operand → (the plain element it came from, the output
    /// option combo its own option combo maps to).
    restorations: HashMap<DimensionalItem, (DimensionalItem, String)>,
}

impl Disaggregator {
    /// True when the predictor must predict per output option combo.
    pub fn is_active(predictor: &Predictor, output_category_combo: &CategoryCombo) -> bool {
        predictor.output_combo.is_none() && !output_category_combo.is_default
    }

    /// An inactive disaggregator: contexts and items pass through untouched.
    pub fn inactive() -> Self {
        Self { active: false, output_option_combos: Vec::new(), restorations: HashMap::new() }
    }

    /// Prepares disaggregation and expands the item set.
    ///
    /// `combos_by_element` maps each plain-element item's uid to its category
    /// combo. Elements whose combo has a complete entry in the
    /// disaggregation map are replaced by one operand per option combo of
    /// their own combo; everything else passes through.
    pub fn prepare(
        predictor: &Predictor,
        items: &HashSet<DimensionalItem>,
        output_category_combo: &CategoryCombo,
        combos_by_element: &HashMap<String, CategoryCombo>,
    ) -> (Self, HashSet<DimensionalItem>) {
        if !Self::is_active(predictor, output_category_combo) {
            return (Self::inactive(), items.clone());
        }

        let input_combos: Vec<CategoryCombo> = combos_by_element.values().cloned().collect();
        let map = DisaggregationMap::build(output_category_combo, &input_combos);

        let mut expanded = HashSet::new();
        let mut restorations = HashMap::new();

        for item in items {
            let element_combo = match item {
                DimensionalItem::DataElement(uid) => {
                    combos_by_element.get(uid).filter(|combo| map.contains_combo(&combo.uid))
                }
                _ => None,
            };

            match (item, element_combo) {
                (DimensionalItem::DataElement(uid), Some(combo)) => {
                    for option_combo in &combo.option_combos {
                        let operand = DimensionalItem::operand(uid.clone(), option_combo.uid.clone());
                        if let Some(output) = map.output_combo(&combo.uid, &option_combo.uid) {
                            restorations.insert(
                                operand.clone(),
                                (item.clone(), output.to_string()),
                            );
                        }
                        expanded.insert(operand);
                    }
                }
                _ => {
                    expanded.insert(item.clone());
                }
            }
        }

        let disaggregator = Self {
            active: true,
            output_option_combos: output_category_combo
                .option_combos
                .iter()
                .map(|coc| coc.uid.clone())
                .collect(),
            restorations,
        };

        (disaggregator, expanded)
    }

    pub fn is_enabled(&self) -> bool {
        self.active
    }

    /// The (element, option combo) pairs prior predictions are stored under.
    pub fn prediction_operands(
        &self,
        output_element_uid: &str,
        effective_output_combo: &str,
    ) -> HashSet<(String, String)> {
        if self.active {
            self.output_option_combos
                .iter()
                .map(|coc| (output_element_uid.to_string(), coc.clone()))
                .collect()
        } else {
            std::iter::once((output_element_uid.to_string(), effective_output_combo.to_string()))
                .collect()
        }
    }

    /// Expands each context into one per output option combo, restoring
    /// plain-element values for the operands that map to that combo.
    pub fn expand_contexts(&self, contexts: Vec<PredictionContext>) -> Vec<PredictionContext> {
        if !self.active {
            return contexts;
        }

        let mut expanded = Vec::with_capacity(contexts.len() * self.output_option_combos.len());

        for context in contexts {
            for output_combo in &self.output_option_combos {
                let mut ctx = context.clone();
                ctx.output_combo = output_combo.clone();

                for (operand, (element, mapped_combo)) in &self.restorations {
                    if mapped_combo != output_combo {
                        continue;
                    }
                    for (_, values) in ctx.period_values.iter_mut() {
                        if let Some(value) = values.get(operand).copied() {
                            values.insert(element.clone(), value);
                        }
                    }
                    if let Some(value) = ctx.current_values.get(operand).copied() {
                        ctx.current_values.insert(element.clone(), value);
                    }
                }

                expanded.push(ctx);
            }
        }

        expanded
    }
}
