//! Windowed fetching from the pre-aggregated store.
//!
//! The organisation-unit list is cut into fixed-size windows; one bulk query
//! per window (and per item class) covers all requested items and periods.
//! Consumption is strictly sequential: a request for a unit past the current
//! window advances to the next one, and the fetcher never looks back.

use crate::data::{DimensionalItem, FoundValue};
use crate::error::{PredictionError, Result};
use crate::metadata::OrgUnit;
use crate::period::Period;
use crate::stores::{AnalyticsQuery, AnalyticsStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct AnalyticsFetcher {
    store: Arc<dyn AnalyticsStore>,
    org_units: Vec<OrgUnit>,
    periods: Vec<Period>,
    periods_by_iso: HashMap<String, Period>,
    /// Items whose results carry an attribute option combo.
    attribute_option_items: Vec<String>,
    /// Items stored without attribute options.
    plain_items: Vec<String>,
    items_by_uid: HashMap<String, DimensionalItem>,
    window_size: usize,
    window_start: usize,
    window_loaded: bool,
    values_by_unit: HashMap<String, Vec<FoundValue>>,
}

impl AnalyticsFetcher {
    pub fn new(
        store: Arc<dyn AnalyticsStore>,
        org_units: Vec<OrgUnit>,
        periods: Vec<Period>,
        items: &HashSet<DimensionalItem>,
        window_size: usize,
    ) -> Self {
        let mut attribute_option_items = Vec::new();
        let mut plain_items = Vec::new();
        let mut items_by_uid = HashMap::new();

        for item in items {
            if let DimensionalItem::Analytics { uid, with_attribute_options } = item {
                if *with_attribute_options {
                    attribute_option_items.push(uid.clone());
                } else {
                    plain_items.push(uid.clone());
                }
                items_by_uid.insert(uid.clone(), item.clone());
            }
        }
        attribute_option_items.sort();
        plain_items.sort();

        let periods_by_iso = periods.iter().map(|p| (p.iso_name(), p.clone())).collect();

        Self {
            store,
            org_units,
            periods,
            periods_by_iso,
            attribute_option_items,
            plain_items,
            items_by_uid,
            window_size: window_size.max(1),
            window_start: 0,
            window_loaded: false,
            values_by_unit: HashMap::new(),
        }
    }

    /// Analytics values for one organisation unit. Units must be requested
    /// in ascending path order.
    pub async fn values_for(&mut self, org_unit: &OrgUnit) -> Result<Vec<FoundValue>> {
        if self.periods.is_empty()
            || (self.attribute_option_items.is_empty() && self.plain_items.is_empty())
        {
            return Ok(Vec::new());
        }

        if !self.window_loaded {
            self.load_window().await?;
        }

        while self.past_current_window(org_unit) {
            self.window_start += self.window_size;
            self.load_window().await?;
        }

        Ok(self.values_by_unit.remove(&org_unit.uid).unwrap_or_default())
    }

    fn current_window(&self) -> &[OrgUnit] {
        let end = (self.window_start + self.window_size).min(self.org_units.len());
        &self.org_units[self.window_start.min(end)..end]
    }

    fn past_current_window(&self, org_unit: &OrgUnit) -> bool {
        match self.current_window().last() {
            Some(last) => org_unit.path > last.path,
            None => false,
        }
    }

    async fn load_window(&mut self) -> Result<()> {
        self.values_by_unit.clear();
        self.window_loaded = true;

        let window = self.current_window().to_vec();
        if window.is_empty() {
            return Ok(());
        }

        if !self.attribute_option_items.is_empty() {
            let rows = self
                .store
                .query(AnalyticsQuery {
                    item_uids: self.attribute_option_items.clone(),
                    periods: self.periods.clone(),
                    org_units: window.clone(),
                    with_attribute_options: true,
                })
                .await?;
            self.index_rows(rows, true)?;
        }

        if !self.plain_items.is_empty() {
            let rows = self
                .store
                .query(AnalyticsQuery {
                    item_uids: self.plain_items.clone(),
                    periods: self.periods.clone(),
                    org_units: window,
                    with_attribute_options: false,
                })
                .await?;
            self.index_rows(rows, false)?;
        }

        Ok(())
    }

    fn index_rows(&mut self, rows: Vec<crate::stores::AnalyticsRow>, with_attribute: bool) -> Result<()> {
        for row in rows {
            let item = self.items_by_uid.get(&row.item).cloned().ok_or_else(|| {
                PredictionError::Analytics(format!("unrequested item {} in result", row.item))
            })?;
            let period = self.periods_by_iso.get(&row.period).cloned().ok_or_else(|| {
                PredictionError::Analytics(format!("unrequested period {} in result", row.period))
            })?;

            let attribute_combo = if with_attribute {
                match row.attribute_combo {
                    Some(aoc) => Some(aoc),
                    None => {
                        return Err(PredictionError::Analytics(format!(
                            "missing attribute option combo for item {}",
                            row.item
                        )))
                    }
                }
            } else {
                None
            };

            self.values_by_unit.entry(row.org_unit.clone()).or_default().push(FoundValue {
                org_unit: row.org_unit,
                period,
                attribute_combo,
                item,
                value: row.value,
            });
        }
        Ok(())
    }
}
