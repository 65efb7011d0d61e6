//! Metadata value objects.
//!
//! Plain immutable snapshots of the platform metadata a prediction run needs.
//! They are deliberately detached from any persistence layer: components copy
//! the fields they need instead of holding live store-backed objects.

use crate::period::PeriodKind;
use serde::{Deserialize, Serialize};

/// Length of one hierarchy-path block: a `/` plus an 11-character uid.
pub const PATH_LEVEL_LEN: usize = 12;

/// A node in the organisation unit hierarchy.
///
/// `path` encodes the full ancestry (`/uid/uid/...`), so lexicographic path
/// order is hierarchy order and a prefix of `PATH_LEVEL_LEN * level`
/// characters addresses the ancestor at `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnit {
    pub id: i64,
    pub uid: String,
    pub name: String,
    pub path: String,
}

impl OrgUnit {
    pub fn level(&self) -> u32 {
        (self.path.len() / PATH_LEVEL_LEN) as u32
    }
}

/// Truncates a hierarchy path to the given level.
pub fn truncate_path(path: &str, level: u32) -> &str {
    let len = PATH_LEVEL_LEN * level as usize;
    if path.len() <= len {
        path
    } else {
        &path[..len]
    }
}

/// A combination of category options on one axis of a fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOptionCombo {
    pub id: i64,
    pub uid: String,
    /// Uids of the category options combined.
    pub options: Vec<String>,
}

/// A set of categories together with all their option combos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCombo {
    pub uid: String,
    pub name: String,
    pub is_default: bool,
    /// Uids of the member categories.
    pub categories: Vec<String>,
    pub option_combos: Vec<CategoryOptionCombo>,
}

/// Declared type of the values stored for a data element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Number,
    Integer,
    IntegerPositive,
    IntegerZeroOrPositive,
    Percentage,
    UnitInterval,
    Text,
    LongText,
    Date,
    Boolean,
    TrueOnly,
}

impl ValueType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::Number
                | ValueType::Integer
                | ValueType::IntegerPositive
                | ValueType::IntegerZeroOrPositive
                | ValueType::Percentage
                | ValueType::UnitInterval
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ValueType::Integer | ValueType::IntegerPositive | ValueType::IntegerZeroOrPositive
        )
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ValueType::Text | ValueType::LongText)
    }

    pub fn is_date(&self) -> bool {
        matches!(self, ValueType::Date)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, ValueType::Boolean | ValueType::TrueOnly)
    }
}

/// The thing a value is recorded against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataElement {
    pub id: i64,
    pub uid: String,
    pub name: String,
    pub value_type: ValueType,
    /// Uid of the category combo that disaggregates this element.
    pub category_combo: String,
    /// When false, a stored zero carries no information and is not kept.
    pub zero_is_significant: bool,
}

impl DataElement {
    /// True if a computed value of zero should not be stored for this element.
    pub fn zero_is_insignificant(&self, value: f64) -> bool {
        value == 0.0 && !self.zero_is_significant && self.value_type.is_numeric()
    }
}

/// How the evaluator treats missing operand values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingValueStrategy {
    NeverSkip,
    SkipIfAnyValueMissing,
    SkipIfAllValuesMissing,
}

/// A formula together with its missing-value policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub expression: String,
    pub missing_value_strategy: MissingValueStrategy,
}

impl Expression {
    pub fn new(expression: impl Into<String>, strategy: MissingValueStrategy) -> Self {
        Self { expression: expression.into(), missing_value_strategy: strategy }
    }
}

/// Definition of one predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictor {
    pub uid: String,
    pub name: String,
    pub output: DataElement,
    /// Output category option combo uid. `None` means the default combo, or,
    /// when the output element's combo is non-default, one independent
    /// prediction per option combo of that combo.
    pub output_combo: Option<String>,
    pub period_kind: PeriodKind,
    pub org_unit_levels: Vec<u32>,
    pub generator: Expression,
    pub sample_skip_test: Option<Expression>,
    /// Count of immediately preceding sample periods.
    pub sequential_sample_count: u32,
    /// Count of prior years sampled around the same period.
    pub annual_sample_count: u32,
    /// Most recent periods to leave out of the sequential samples.
    pub sequential_skip_count: u32,
}

/// A named collection of predictors run together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorGroup {
    pub uid: String,
    pub name: String,
    pub members: Vec<Predictor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_truncation_addresses_ancestors() {
        let path = "/lvl1unit000/lvl2unit000/lvl3unit000";
        assert_eq!(truncate_path(path, 1), "/lvl1unit000");
        assert_eq!(truncate_path(path, 2), "/lvl1unit000/lvl2unit000");
        assert_eq!(truncate_path(path, 5), path);
    }

    #[test]
    fn org_unit_level_follows_path_length() {
        let unit = OrgUnit {
            id: 1,
            uid: "lvl2unit000".into(),
            name: "Two".into(),
            path: "/lvl1unit000/lvl2unit000".into(),
        };
        assert_eq!(unit.level(), 2);
    }

    #[test]
    fn value_type_classification() {
        assert!(ValueType::Percentage.is_numeric());
        assert!(ValueType::IntegerPositive.is_integer());
        assert!(!ValueType::Number.is_integer());
        assert!(ValueType::LongText.is_text());
        assert!(ValueType::TrueOnly.is_boolean());
    }

    #[test]
    fn zero_significance_depends_on_element_config() {
        let mut element = DataElement {
            id: 1,
            uid: "de000000001".into(),
            name: "Cases".into(),
            value_type: ValueType::Number,
            category_combo: "ccdefault01".into(),
            zero_is_significant: false,
        };
        assert!(element.zero_is_insignificant(0.0));
        assert!(!element.zero_is_insignificant(1.0));

        element.zero_is_significant = true;
        assert!(!element.zero_is_insignificant(0.0));
    }
}
