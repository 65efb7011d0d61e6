//! Period planning.
//!
//! Works out which periods a predictor writes to, which historical periods
//! feed each output period's samples, and which of all those periods are
//! persisted (only persisted periods can hold row-level data).

use crate::error::Result;
use crate::metadata::Predictor;
use crate::period::{Period, PeriodKind};
use crate::stores::MetadataProvider;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// All periods of `kind` fully contained in the closed range
/// `[start, end]`, in ascending order. The periods are transient.
pub fn periods_between(kind: PeriodKind, start: NaiveDate, end: NaiveDate) -> Vec<Period> {
    let mut periods = Vec::new();

    let mut period = Period::containing(kind, start);
    if period.start >= start && period.end <= end {
        periods.push(period.clone());
    }

    period = period.next();
    while period.end <= end {
        periods.push(period.clone());
        period = period.next();
    }

    periods
}

/// Maps each output period to the sample periods its formula may draw from:
/// the `sequential_sample_count` periods immediately before it (after
/// skipping the `sequential_skip_count` most recent), plus, for each of
/// `annual_sample_count` prior years, the period one year back together with
/// a window of `sequential_sample_count` periods on each side.
pub fn sample_periods_map(
    output_periods: &[Period],
    predictor: &Predictor,
) -> HashMap<Period, Vec<Period>> {
    let sequential = predictor.sequential_sample_count;
    let annual = predictor.annual_sample_count;
    let skip = predictor.sequential_skip_count;

    let mut map = HashMap::new();

    for output in output_periods {
        let mut samples = Vec::new();

        let mut period = output.previous_by(skip);
        for _ in skip..sequential {
            period = period.previous();
            samples.push(period.clone());
        }

        for year in 1..=annual {
            let anchor = output.previous_years(year);
            let mut before = anchor.clone();
            let mut after = anchor.clone();
            samples.push(anchor);

            for _ in 0..sequential {
                before = before.previous();
                after = after.next();
                samples.push(before.clone());
                samples.push(after.clone());
            }
        }

        map.insert(output.clone(), samples);
    }

    map
}

/// The full period plan for one predictor run.
#[derive(Debug, Clone)]
pub struct PeriodPlan {
    /// Output periods, persisted and carrying ids.
    pub output_periods: Vec<Period>,
    pub sample_periods_by_output: HashMap<Period, Vec<Period>>,
    pub all_sample_periods: HashSet<Period>,
    /// Output periods that were already persisted before this run. Only
    /// these can hold prior predictions.
    pub existing_output_periods: HashSet<Period>,
    pub existing_sample_periods: HashSet<Period>,
    /// Periods for the row-level query: persisted periods only, plus the
    /// output periods needed to capture prior predictions.
    pub row_query_periods: HashSet<Period>,
    /// Periods for analytics queries; transient periods are fine there.
    pub analytics_query_periods: HashSet<Period>,
}

impl PeriodPlan {
    /// Builds the plan. `has_sampled_items` / `has_output_items` say whether
    /// the predictor's expressions actually read sampled respectively
    /// current-period data; query period sets only cover what is read.
    pub async fn build(
        metadata: &Arc<dyn MetadataProvider>,
        predictor: &Predictor,
        start: NaiveDate,
        end: NaiveDate,
        has_sampled_items: bool,
        has_output_items: bool,
    ) -> Result<Self> {
        let transient_outputs = periods_between(predictor.period_kind, start, end);
        let sample_periods_by_output = sample_periods_map(&transient_outputs, predictor);

        let all_sample_periods: HashSet<Period> =
            sample_periods_by_output.values().flatten().cloned().collect();

        let existing_sample_periods = existing_periods(metadata, &all_sample_periods).await?;
        let existing_output_periods =
            existing_periods(metadata, &transient_outputs.iter().cloned().collect()).await?;

        // Predictions must reference persisted periods, so the output
        // periods are created now if missing.
        let output_periods = metadata.reload_periods(transient_outputs).await?;

        let mut row_query_periods: HashSet<Period> = output_periods.iter().cloned().collect();
        if has_sampled_items {
            row_query_periods.extend(existing_sample_periods.iter().cloned());
        }
        if has_output_items {
            row_query_periods.extend(existing_output_periods.iter().cloned());
        }

        let mut analytics_query_periods = HashSet::new();
        if has_sampled_items {
            analytics_query_periods.extend(all_sample_periods.iter().cloned());
        }
        if has_output_items {
            analytics_query_periods.extend(output_periods.iter().cloned());
        }

        Ok(Self {
            output_periods,
            sample_periods_by_output,
            all_sample_periods,
            existing_output_periods,
            existing_sample_periods,
            row_query_periods,
            analytics_query_periods,
        })
    }
}

async fn existing_periods(
    metadata: &Arc<dyn MetadataProvider>,
    periods: &HashSet<Period>,
) -> Result<HashSet<Period>> {
    let mut existing = HashSet::new();
    for period in periods {
        if let Some(found) = metadata.find_period(period).await? {
            existing.insert(found);
        }
    }
    Ok(existing)
}
