//! Store boundaries.
//!
//! The engine consumes four external collaborators: the row-level fact
//! store, the pre-aggregated analytics store, the prediction persistence
//! layer and the metadata provider. All are async traits held as
//! `Arc<dyn …>`; implementations (SQL, HTTP, in-memory test doubles) live
//! outside this crate.

use crate::data::{DataValue, DeflatedValue};
use crate::error::Result;
use crate::metadata::{
    CategoryCombo, CategoryOptionCombo, DataElement, OrgUnit, Predictor, PredictorGroup,
};
use crate::period::Period;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc;

/// A bulk query against the row-level fact store.
#[derive(Debug, Clone)]
pub struct RowValueQuery {
    /// Uids of the data elements whose rows are wanted.
    pub element_uids: BTreeSet<String>,
    /// Persisted periods to read; transient periods hold no row data.
    pub periods: Vec<Period>,
    /// Organisation units forming the query roots.
    pub org_units: Vec<OrgUnit>,
    /// Include rows stored under descendants of the roots.
    pub include_descendants: bool,
    /// Include soft-deleted rows.
    pub include_deleted: bool,
}

/// Streams deflated rows, ordered by ascending organisation-unit path.
///
/// The ordering is a contract: the consumer groups consecutive rows by
/// truncated path and never re-sorts. Implementations push rows into the
/// bounded `out` channel (blocking on backpressure) and return when the
/// stream is exhausted or failed.
#[async_trait]
pub trait RowValueStore: Send + Sync {
    async fn stream_values(
        &self,
        query: RowValueQuery,
        out: mpsc::Sender<DeflatedValue>,
    ) -> Result<()>;
}

/// A bulk query against the pre-aggregated store, covering one window of
/// organisation units.
#[derive(Debug, Clone)]
pub struct AnalyticsQuery {
    /// Uids of the analytics items requested.
    pub item_uids: Vec<String>,
    pub periods: Vec<Period>,
    pub org_units: Vec<OrgUnit>,
    /// Whether result rows carry the attribute-option-combo dimension.
    pub with_attribute_options: bool,
}

/// One row of a tabular analytics result.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsRow {
    pub item: String,
    /// ISO period name, e.g. `202401`.
    pub period: String,
    pub org_unit: String,
    pub attribute_combo: Option<String>,
    pub value: f64,
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn query(&self, query: AnalyticsQuery) -> Result<Vec<AnalyticsRow>>;
}

/// Batched persistence for predictions. Each call is one batch; the writer
/// issues at most one of each per organisation-unit chunk.
#[async_trait]
pub trait PredictionStore: Send + Sync {
    async fn insert_values(&self, values: Vec<DataValue>) -> Result<()>;
    /// Replaces the stored value and clears any soft-deletion.
    async fn update_values(&self, values: Vec<DataValue>) -> Result<()>;
    async fn soft_delete_values(&self, values: Vec<DataValue>) -> Result<()>;
}

/// Read access to platform metadata.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn all_predictors(&self) -> Result<Vec<Predictor>>;
    async fn predictors_by_uid(&self, uids: &[String]) -> Result<Vec<Predictor>>;
    async fn predictor_groups_by_uid(&self, uids: &[String]) -> Result<Vec<PredictorGroup>>;

    /// All organisation units at one hierarchy level.
    async fn org_units_at_level(&self, level: u32) -> Result<Vec<OrgUnit>>;

    /// The persisted twin of a period, if any.
    async fn find_period(&self, period: &Period) -> Result<Option<Period>>;

    /// Persists any of the given periods that do not yet exist and returns
    /// all of them carrying ids.
    async fn reload_periods(&self, periods: Vec<Period>) -> Result<Vec<Period>>;

    async fn data_elements_by_uid(&self, uids: &[String]) -> Result<Vec<DataElement>>;

    async fn category_combo(&self, uid: &str) -> Result<Option<CategoryCombo>>;

    async fn option_combo_by_id(&self, id: i64) -> Result<Option<CategoryOptionCombo>>;

    async fn default_option_combo(&self) -> Result<CategoryOptionCombo>;

    /// System constants usable in expressions.
    async fn constants(&self) -> Result<HashMap<String, f64>>;
}
