//! The run orchestrator.
//!
//! Iterates predictors, organisation-unit levels and fixed-size chunks,
//! wiring the planner, fetchers, consolidator, context builder,
//! disaggregator, evaluator, formatter and writer together, and accumulating
//! the run summary.

use crate::analytics_fetcher::AnalyticsFetcher;
use crate::config::EngineSettings;
use crate::consolidator::DataConsolidator;
use crate::context::{build_contexts, PredictionContext};
use crate::data::{DataValue, DimensionalItem, PeriodValueMap, PredictionData};
use crate::disaggregator::Disaggregator;
use crate::error::{PredictionError, Result};
use crate::evaluator::{EvaluationRequest, FormulaEvaluator, ParseKind, Value};
use crate::formatter::format_prediction;
use crate::metadata::{CategoryCombo, MissingValueStrategy, Predictor};
use crate::period::Period;
use crate::planner::PeriodPlan;
use crate::row_fetcher::{RowFetcherSpec, RowValueFetcher};
use crate::stores::{
    AnalyticsStore, MetadataProvider, PredictionStore, RowValueQuery, RowValueStore,
};
use crate::summary::{PredictionStatus, PredictionSummary};
use crate::writer::PredictionWriter;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};

/// What to predict, and over which date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Predictor uids to run; combined with group members.
    #[serde(default)]
    pub predictors: Vec<String>,
    /// Predictor group uids whose members to run.
    #[serde(default)]
    pub predictor_groups: Vec<String>,
    /// Recorded on written values; defaults to "system-process".
    #[serde(default)]
    pub stored_by: Option<String>,
}

pub struct PredictionRunner {
    metadata: Arc<dyn MetadataProvider>,
    row_store: Arc<dyn RowValueStore>,
    analytics_store: Arc<dyn AnalyticsStore>,
    prediction_store: Arc<dyn PredictionStore>,
    evaluator: Arc<dyn FormulaEvaluator>,
    settings: EngineSettings,
}

/// Everything resolved once per predictor and shared by every unit.
struct PredictorRun<'a> {
    predictor: &'a Predictor,
    plan: &'a PeriodPlan,
    constants: HashMap<String, f64>,
    default_combo_uid: String,
    effective_output_combo: String,
    disaggregator: Disaggregator,
    forward_item: Option<DimensionalItem>,
    output_period_items: HashSet<DimensionalItem>,
    sampled_items: HashSet<DimensionalItem>,
    stored_by: String,
    now: DateTime<Utc>,
}

impl PredictionRunner {
    pub fn new(
        metadata: Arc<dyn MetadataProvider>,
        row_store: Arc<dyn RowValueStore>,
        analytics_store: Arc<dyn AnalyticsStore>,
        prediction_store: Arc<dyn PredictionStore>,
        evaluator: Arc<dyn FormulaEvaluator>,
        settings: EngineSettings,
    ) -> Self {
        Self { metadata, row_store, analytics_store, prediction_store, evaluator, settings }
    }

    /// Runs the requested predictors. Never returns an error: failures are
    /// reported through the summary, with counts accumulated so far kept.
    pub async fn run(&self, request: RunRequest) -> PredictionSummary {
        let mut summary = PredictionSummary::default();

        match self.run_internal(&request, &mut summary).await {
            Ok(()) => {
                summary.description = "Predictions done".to_string();
                info!("Finished predicting from {} to {}: {}", request.start_date, request.end_date, summary);
            }
            Err(err) => {
                error!("Prediction run failed: {err}");
                summary.status = PredictionStatus::Error;
                summary.description = format!("Predictions failed: {err}");
            }
        }

        summary
    }

    async fn run_internal(
        &self,
        request: &RunRequest,
        summary: &mut PredictionSummary,
    ) -> Result<()> {
        let predictors = self.resolve_predictors(request).await?;

        info!(
            "Running {} predictors from {} to {}",
            predictors.len(),
            request.start_date,
            request.end_date
        );

        for predictor in &predictors {
            self.predict(predictor, request, summary).await?;
        }

        Ok(())
    }

    async fn resolve_predictors(&self, request: &RunRequest) -> Result<Vec<Predictor>> {
        if request.predictors.is_empty() && request.predictor_groups.is_empty() {
            return self.metadata.all_predictors().await;
        }

        let mut predictors = Vec::new();
        if !request.predictors.is_empty() {
            predictors.extend(self.metadata.predictors_by_uid(&request.predictors).await?);
        }
        if !request.predictor_groups.is_empty() {
            for group in self.metadata.predictor_groups_by_uid(&request.predictor_groups).await? {
                predictors.extend(group.members);
            }
        }
        Ok(predictors)
    }

    /// Runs one predictor over all of its organisation unit levels.
    pub async fn predict(
        &self,
        predictor: &Predictor,
        request: &RunRequest,
        summary: &mut PredictionSummary,
    ) -> Result<()> {
        debug!("Predicting {} ({})", predictor.name, predictor.uid);
        summary.predictors += 1;

        let generator_items = self
            .evaluator
            .expression_items(&predictor.generator.expression, ParseKind::PredictorExpression)?;
        let output_period_items = generator_items.output_period_items;
        let mut sampled_items = generator_items.sampled_items;
        if let Some(skip_test) = &predictor.sample_skip_test {
            let skip_items = self
                .evaluator
                .expression_items(&skip_test.expression, ParseKind::PredictorSkipTest)?;
            sampled_items.extend(skip_items.all());
        }
        let mut items: HashSet<DimensionalItem> =
            output_period_items.union(&sampled_items).cloned().collect();

        let plan = PeriodPlan::build(
            &self.metadata,
            predictor,
            request.start_date,
            request.end_date,
            !sampled_items.is_empty(),
            !output_period_items.is_empty(),
        )
        .await?;

        if plan.output_periods.is_empty() {
            debug!("No output periods for {} in the requested range", predictor.uid);
            return Ok(());
        }

        let constants = self.metadata.constants().await?;
        let default_coc = self.metadata.default_option_combo().await?;
        let output_category_combo = self
            .metadata
            .category_combo(&predictor.output.category_combo)
            .await?
            .ok_or_else(|| {
                PredictionError::Metadata(format!(
                    "category combo {} of output element {} not found",
                    predictor.output.category_combo, predictor.output.uid
                ))
            })?;

        let (disaggregator, expanded_items) =
            if Disaggregator::is_active(predictor, &output_category_combo) {
                let combos_by_element = self.element_combos(&items).await?;
                Disaggregator::prepare(predictor, &items, &output_category_combo, &combos_by_element)
            } else {
                (Disaggregator::inactive(), items)
            };
        items = expanded_items;

        let effective_output_combo =
            predictor.output_combo.clone().unwrap_or_else(|| default_coc.uid.clone());

        // A prediction feeding later periods of the same run is handled by
        // carrying the raw value forward; see `evaluate_unit`.
        let forward_item = if disaggregator.is_enabled() {
            None
        } else {
            forward_reference(&predictor.output.uid, &effective_output_combo, &sampled_items)
        };

        let mut element_items: HashSet<String> = HashSet::new();
        let mut operand_items: HashSet<(String, String)> = HashSet::new();
        for item in &items {
            match item {
                DimensionalItem::DataElement(uid) => {
                    element_items.insert(uid.clone());
                }
                DimensionalItem::DataElementOperand { element, option_combo } => {
                    operand_items.insert((element.clone(), option_combo.clone()));
                }
                DimensionalItem::Analytics { .. } => {}
            }
        }

        let prediction_operands =
            disaggregator.prediction_operands(&predictor.output.uid, &effective_output_combo);

        let mut query_element_uids: BTreeSet<String> = element_items.iter().cloned().collect();
        query_element_uids.extend(operand_items.iter().map(|(element, _)| element.clone()));
        query_element_uids.insert(predictor.output.uid.clone());

        let query_uids: Vec<String> = query_element_uids.iter().cloned().collect();
        let data_elements = self.metadata.data_elements_by_uid(&query_uids).await?;

        let row_query_periods: Vec<Period> = plan.row_query_periods.iter().cloned().collect();
        let analytics_periods: Vec<Period> =
            plan.analytics_query_periods.iter().cloned().collect();
        let output_period_set: HashSet<Period> = plan.output_periods.iter().cloned().collect();

        let run = PredictorRun {
            predictor,
            plan: &plan,
            constants,
            default_combo_uid: default_coc.uid.clone(),
            effective_output_combo,
            disaggregator,
            forward_item,
            output_period_items,
            sampled_items,
            stored_by: request
                .stored_by
                .clone()
                .unwrap_or_else(|| "system-process".to_string()),
            now: Utc::now(),
        };

        let mut writer =
            PredictionWriter::new(Arc::clone(&self.prediction_store), predictor.output.clone());

        // Each level is processed independently: predictions at a level may
        // aggregate data from all descendants, so levels never share fetches.
        for level in &predictor.org_unit_levels {
            let mut org_units = self.metadata.org_units_at_level(*level).await?;
            org_units.sort_by(|a, b| a.path.cmp(&b.path));

            if org_units.is_empty() {
                continue;
            }

            let query = RowValueQuery {
                element_uids: query_element_uids.clone(),
                periods: row_query_periods.clone(),
                org_units: org_units.clone(),
                include_descendants: true,
                include_deleted: true,
            };
            let spec = RowFetcherSpec {
                level: *level,
                org_units: org_units.clone(),
                periods: row_query_periods.clone(),
                elements: data_elements.clone(),
                element_items: element_items.clone(),
                operand_items: operand_items.clone(),
                prediction_operands: prediction_operands.clone(),
                output_periods: output_period_set.clone(),
            };

            let row_fetcher = RowValueFetcher::start(
                Arc::clone(&self.row_store),
                Arc::clone(&self.metadata),
                query,
                spec,
                self.settings.queue_timeout(),
            );
            let analytics_fetcher = AnalyticsFetcher::new(
                Arc::clone(&self.analytics_store),
                org_units.clone(),
                analytics_periods.clone(),
                &items,
                self.settings.analytics_batch_size,
            );
            let mut consolidator = DataConsolidator::new(
                row_fetcher,
                analytics_fetcher,
                org_units,
                self.settings.analytics_batch_size,
            );

            let mut units_in_chunk = 0usize;
            while let Some(data) = consolidator.next_data().await? {
                let predictions = self.evaluate_unit(&run, &data)?;
                writer.write(predictions, data.old_predictions, summary);

                units_in_chunk += 1;
                if units_in_chunk >= self.settings.org_unit_chunk_size {
                    writer.flush().await?;
                    units_in_chunk = 0;
                }
            }
            writer.flush().await?;
        }

        Ok(())
    }

    /// Builds, expands and evaluates the contexts of one organisation unit.
    fn evaluate_unit(&self, run: &PredictorRun<'_>, data: &PredictionData) -> Result<Vec<DataValue>> {
        let contexts = build_contexts(
            &data.values,
            &run.plan.output_periods,
            &run.default_combo_uid,
            &run.effective_output_combo,
        );
        let mut contexts = run.disaggregator.expand_contexts(contexts);

        let require_data = run.predictor.generator.missing_value_strategy
            != MissingValueStrategy::NeverSkip
            && !(run.output_period_items.is_empty() && run.sampled_items.is_empty());

        let mut predictions = Vec::new();

        for index in 0..contexts.len() {
            let raw = {
                let context = &contexts[index];

                let skipped = self.skipped_periods(run, context)?;
                let sample_periods: Vec<Period> = run
                    .plan
                    .sample_periods_by_output
                    .get(&context.output_period)
                    .map(|periods| {
                        periods.iter().filter(|p| !skipped.contains(p)).cloned().collect()
                    })
                    .unwrap_or_default();

                if require_data
                    && !data_is_present(
                        &run.output_period_items,
                        &context.current_values,
                        &run.sampled_items,
                        &sample_periods,
                        &context.period_values,
                    )
                {
                    continue;
                }

                self.evaluator.evaluate(EvaluationRequest {
                    expression: &run.predictor.generator.expression,
                    parse: ParseKind::PredictorExpression,
                    values: &context.current_values,
                    constants: &run.constants,
                    days_in_period: context.output_period.days_in_period(),
                    missing_value_strategy: run.predictor.generator.missing_value_strategy,
                    sample_periods: &sample_periods,
                    sample_values: &context.period_values,
                })?
            };

            if let (Some(forward), Some(number)) =
                (&run.forward_item, raw.as_ref().and_then(Value::as_number))
            {
                if number.is_finite() {
                    carry_forward(&mut contexts, index, forward, number);
                }
            }

            let context = &contexts[index];
            if let Some(value) = format_prediction(raw.as_ref(), &run.predictor.output) {
                predictions.push(DataValue {
                    element: run.predictor.output.uid.clone(),
                    period: context.output_period.clone(),
                    org_unit: data.org_unit.uid.clone(),
                    option_combo: context.output_combo.clone(),
                    attribute_combo: context.attribute_combo.clone(),
                    value,
                    stored_by: Some(run.stored_by.clone()),
                    created: Some(run.now),
                    deleted: false,
                });
            }
        }

        Ok(predictions)
    }

    /// Sample periods whose data makes the skip test true for this context.
    fn skipped_periods(
        &self,
        run: &PredictorRun<'_>,
        context: &PredictionContext,
    ) -> Result<HashSet<Period>> {
        let Some(skip_test) = &run.predictor.sample_skip_test else {
            return Ok(HashSet::new());
        };
        if skip_test.expression.is_empty() {
            return Ok(HashSet::new());
        }

        let no_samples = PeriodValueMap::new();
        let mut skipped = HashSet::new();

        for period in &run.plan.all_sample_periods {
            let Some(values) = context.period_values.values_for(period) else {
                continue;
            };

            let result = self.evaluator.evaluate(EvaluationRequest {
                expression: &skip_test.expression,
                parse: ParseKind::PredictorSkipTest,
                values,
                constants: &run.constants,
                days_in_period: period.days_in_period(),
                missing_value_strategy: skip_test.missing_value_strategy,
                sample_periods: &[],
                sample_values: &no_samples,
            })?;

            if matches!(result, Some(Value::Bool(true))) {
                skipped.insert(period.clone());
            }
        }

        Ok(skipped)
    }

    /// Category combos of the plain-element items, for disaggregation.
    async fn element_combos(
        &self,
        items: &HashSet<DimensionalItem>,
    ) -> Result<HashMap<String, CategoryCombo>> {
        let uids: Vec<String> = items
            .iter()
            .filter_map(|item| match item {
                DimensionalItem::DataElement(uid) => Some(uid.clone()),
                _ => None,
            })
            .collect();

        if uids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut combos = HashMap::new();
        for element in self.metadata.data_elements_by_uid(&uids).await? {
            if let Some(combo) = self.metadata.category_combo(&element.category_combo).await? {
                combos.insert(element.uid, combo);
            }
        }
        Ok(combos)
    }
}

/// The sampled item, if any, that the predictor's own output feeds: the
/// output element itself, or the output operand.
fn forward_reference(
    output_element: &str,
    output_combo: &str,
    sampled_items: &HashSet<DimensionalItem>,
) -> Option<DimensionalItem> {
    sampled_items
        .iter()
        .find(|item| match item {
            DimensionalItem::DataElement(uid) => uid == output_element,
            DimensionalItem::DataElementOperand { element, option_combo } => {
                element == output_element && option_combo == output_combo
            }
            DimensionalItem::Analytics { .. } => false,
        })
        .cloned()
}

/// Inserts a predicted value into the sample maps of every later context for
/// the same attribute option combo, so later output periods can sample it.
fn carry_forward(
    contexts: &mut [PredictionContext],
    index: usize,
    item: &DimensionalItem,
    value: f64,
) {
    let period = contexts[index].output_period.clone();
    let attribute_combo = contexts[index].attribute_combo.clone();

    for later in contexts[index + 1..]
        .iter_mut()
        .filter(|c| c.attribute_combo == attribute_combo)
    {
        later.period_values.insert(period.clone(), item.clone(), value);
    }
}

/// True if any output-period item has a current value, or any sampled item
/// has a value in any sample period. Saves evaluating expressions that
/// cannot produce anything.
fn data_is_present(
    output_period_items: &HashSet<DimensionalItem>,
    current_values: &HashMap<DimensionalItem, f64>,
    sampled_items: &HashSet<DimensionalItem>,
    sample_periods: &[Period],
    period_values: &PeriodValueMap,
) -> bool {
    if output_period_items.iter().any(|item| current_values.contains_key(item)) {
        return true;
    }

    sample_periods.iter().any(|period| {
        period_values
            .values_for(period)
            .is_some_and(|values| sampled_items.iter().any(|item| values.contains_key(item)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::PeriodKind;

    fn monthly(y: i32, m: u32) -> Period {
        Period::containing(
            PeriodKind::Monthly,
            NaiveDate::from_ymd_opt(y, m, 1).unwrap(),
        )
    }

    #[test]
    fn forward_reference_matches_element_or_output_operand() {
        let element = DimensionalItem::DataElement("deout000001".into());
        let matching_operand = DimensionalItem::operand("deout000001", "cocout00001");
        let other_operand = DimensionalItem::operand("deout000001", "cocother001");

        let items = HashSet::from([element.clone()]);
        assert_eq!(forward_reference("deout000001", "cocout00001", &items), Some(element));

        let items = HashSet::from([matching_operand.clone()]);
        assert_eq!(
            forward_reference("deout000001", "cocout00001", &items),
            Some(matching_operand)
        );

        let items = HashSet::from([other_operand]);
        assert_eq!(forward_reference("deout000001", "cocout00001", &items), None);
    }

    #[test]
    fn data_presence_checks_current_then_samples() {
        let item = DimensionalItem::DataElement("de000000001".into());
        let sample_period = monthly(2024, 1);
        let items = HashSet::from([item.clone()]);

        let mut period_values = PeriodValueMap::new();
        period_values.insert(sample_period.clone(), item.clone(), 1.0);

        let empty_current = HashMap::new();
        let periods = [sample_period.clone()];

        assert!(data_is_present(&HashSet::new(), &empty_current, &items, &periods, &period_values));
        assert!(!data_is_present(&HashSet::new(), &empty_current, &items, &[], &period_values));

        let current = HashMap::from([(item.clone(), 2.0)]);
        assert!(data_is_present(&items, &current, &HashSet::new(), &[], &PeriodValueMap::new()));
        assert!(!data_is_present(
            &items,
            &empty_current,
            &HashSet::new(),
            &[],
            &PeriodValueMap::new()
        ));
    }

    #[test]
    fn carry_forward_reaches_only_later_contexts_of_the_same_combo() {
        let item = DimensionalItem::DataElement("deout000001".into());
        let p1 = monthly(2024, 1);
        let p2 = monthly(2024, 2);

        let context = |aoc: &str, period: &Period| PredictionContext {
            attribute_combo: aoc.to_string(),
            output_combo: "cocout00001".into(),
            output_period: period.clone(),
            period_values: PeriodValueMap::new(),
            current_values: HashMap::new(),
        };

        let mut contexts = vec![
            context("aoc00000001", &p1),
            context("aoc00000001", &p2),
            context("aoc00000002", &p2),
        ];

        carry_forward(&mut contexts, 0, &item, 42.0);

        assert_eq!(contexts[1].period_values.value(&p1, &item), Some(42.0));
        assert_eq!(contexts[2].period_values.value(&p1, &item), None);
        assert!(contexts[0].period_values.is_empty());
    }
}
