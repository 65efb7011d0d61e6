//! Formula evaluation boundary.
//!
//! Parsing and evaluating predictor expressions is the job of an external
//! engine; this module only fixes the contract the prediction engine relies
//! on.

use crate::data::{DimensionalItem, PeriodValueMap};
use crate::error::Result;
use crate::metadata::MissingValueStrategy;
use crate::period::Period;
use std::collections::{HashMap, HashSet};

/// How an expression is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseKind {
    /// A predictor generator: may reference current and sampled values.
    PredictorExpression,
    /// A sample skip test: boolean, evaluated per sample period.
    PredictorSkipTest,
}

/// A raw evaluation result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// The dimensional items an expression references, split by sampling role.
#[derive(Debug, Clone, Default)]
pub struct ExpressionItems {
    /// Items read from the output period itself.
    pub output_period_items: HashSet<DimensionalItem>,
    /// Items read from sample periods.
    pub sampled_items: HashSet<DimensionalItem>,
}

impl ExpressionItems {
    pub fn all(&self) -> HashSet<DimensionalItem> {
        self.output_period_items.union(&self.sampled_items).cloned().collect()
    }
}

/// Exact input for one formula invocation.
#[derive(Debug)]
pub struct EvaluationRequest<'a> {
    pub expression: &'a str,
    pub parse: ParseKind,
    /// Values for the period being evaluated.
    pub values: &'a HashMap<DimensionalItem, f64>,
    pub constants: &'a HashMap<String, f64>,
    pub days_in_period: i64,
    pub missing_value_strategy: MissingValueStrategy,
    /// Sample periods to aggregate over, already filtered by any skip test.
    pub sample_periods: &'a [Period],
    /// Values for every sample period.
    pub sample_values: &'a PeriodValueMap,
}

/// The external expression engine.
///
/// `evaluate` returning `None` (or a non-finite number) means "no
/// prediction"; the engine never reinterprets that contract.
pub trait FormulaEvaluator: Send + Sync {
    /// Extracts the dimensional items an expression references.
    fn expression_items(&self, expression: &str, parse: ParseKind) -> Result<ExpressionItems>;

    /// Evaluates an expression against one context.
    fn evaluate(&self, request: EvaluationRequest<'_>) -> Result<Option<Value>>;
}
