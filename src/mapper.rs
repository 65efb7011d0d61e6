//! Mapping category option combos between equivalent category combos.
//!
//! Two category combos built from the same categories have distinct option
//! combos with the same option sets. Predictions made per input option combo
//! must land on the matching output option combo, so each option combo gets a
//! canonical key from its sorted option uids and input combos are mapped
//! through the output combo's key table.

use crate::metadata::{CategoryCombo, CategoryOptionCombo};
use itertools::Itertools;
use std::collections::HashMap;

/// Order-independent identity of an option combo: its option uids, sorted
/// and concatenated.
pub fn option_key(combo: &CategoryOptionCombo) -> String {
    combo.options.iter().sorted().join("")
}

/// Per input category combo, the mapping from its option-combo uids to the
/// output combo's option-combo uids.
///
/// An entry exists only when every option combo of the input combo maps;
/// partial mappings are never stored.
#[derive(Debug, Clone, Default)]
pub struct DisaggregationMap {
    by_combo: HashMap<String, HashMap<String, String>>,
}

impl DisaggregationMap {
    /// Builds the map from every candidate input combo into `output`.
    pub fn build(output: &CategoryCombo, input_combos: &[CategoryCombo]) -> Self {
        let output_by_key: HashMap<String, &str> = output
            .option_combos
            .iter()
            .map(|coc| (option_key(coc), coc.uid.as_str()))
            .collect();

        let mut by_combo = HashMap::new();

        for input in input_combos {
            if input.categories.len() != output.categories.len() {
                continue;
            }

            let mapped: Option<HashMap<String, String>> = input
                .option_combos
                .iter()
                .map(|coc| {
                    output_by_key
                        .get(&option_key(coc))
                        .map(|out| (coc.uid.clone(), out.to_string()))
                })
                .collect();

            if let Some(mapping) = mapped {
                by_combo.insert(input.uid.clone(), mapping);
            }
        }

        Self { by_combo }
    }

    /// True if the input combo mapped completely.
    pub fn contains_combo(&self, combo_uid: &str) -> bool {
        self.by_combo.contains_key(combo_uid)
    }

    /// The output option combo for an input (combo, option combo) pair.
    pub fn output_combo(&self, combo_uid: &str, option_combo_uid: &str) -> Option<&str> {
        self.by_combo
            .get(combo_uid)
            .and_then(|m| m.get(option_combo_uid))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_combo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coc(id: i64, uid: &str, options: &[&str]) -> CategoryOptionCombo {
        CategoryOptionCombo {
            id,
            uid: uid.to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn output_combo() -> CategoryCombo {
        CategoryCombo {
            uid: "ccoutput001".into(),
            name: "Sex and age".into(),
            is_default: false,
            categories: vec!["catsex00001".into(), "catage00001".into()],
            option_combos: vec![
                coc(1, "outMF000001", &["optm0000001", "optu5000001"]),
                coc(2, "outMO000001", &["optm0000001", "opto5000001"]),
                coc(3, "outFF000001", &["optf0000001", "optu5000001"]),
                coc(4, "outFO000001", &["optf0000001", "opto5000001"]),
            ],
        }
    }

    #[test]
    fn option_key_is_order_independent() {
        let a = coc(1, "a0000000001", &["optx0000001", "opty0000001"]);
        let b = coc(2, "b0000000001", &["opty0000001", "optx0000001"]);
        assert_eq!(option_key(&a), option_key(&b));
    }

    #[test]
    fn fully_matching_combo_maps_all_option_combos() {
        let input = CategoryCombo {
            uid: "ccinput0001".into(),
            name: "Sex and age (alt)".into(),
            is_default: false,
            categories: vec!["catsex00001".into(), "catage00001".into()],
            option_combos: vec![
                coc(11, "inMF0000001", &["optu5000001", "optm0000001"]),
                coc(12, "inMO0000001", &["opto5000001", "optm0000001"]),
                coc(13, "inFF0000001", &["optu5000001", "optf0000001"]),
                coc(14, "inFO0000001", &["opto5000001", "optf0000001"]),
            ],
        };

        let map = DisaggregationMap::build(&output_combo(), &[input]);

        assert!(map.contains_combo("ccinput0001"));
        assert_eq!(map.output_combo("ccinput0001", "inMF0000001"), Some("outMF000001"));
        assert_eq!(map.output_combo("ccinput0001", "inMO0000001"), Some("outMO000001"));
        assert_eq!(map.output_combo("ccinput0001", "inFF0000001"), Some("outFF000001"));
        assert_eq!(map.output_combo("ccinput0001", "inFO0000001"), Some("outFO000001"));
    }

    #[test]
    fn one_unmapped_option_combo_excludes_the_whole_combo() {
        let input = CategoryCombo {
            uid: "ccinput0002".into(),
            name: "Sex and age (broken)".into(),
            is_default: false,
            categories: vec!["catsex00001".into(), "catage00001".into()],
            option_combos: vec![
                coc(21, "inMF0000002", &["optu5000001", "optm0000001"]),
                coc(22, "inXX0000002", &["optxxxxxxxx", "optm0000001"]),
            ],
        };

        let map = DisaggregationMap::build(&output_combo(), &[input]);

        assert!(!map.contains_combo("ccinput0002"));
        assert_eq!(map.output_combo("ccinput0002", "inMF0000002"), None);
    }

    #[test]
    fn category_count_mismatch_is_skipped() {
        let input = CategoryCombo {
            uid: "ccinput0003".into(),
            name: "Sex only".into(),
            is_default: false,
            categories: vec!["catsex00001".into()],
            option_combos: vec![coc(31, "inM00000003", &["optm0000001"])],
        };

        let map = DisaggregationMap::build(&output_combo(), &[input]);
        assert!(map.is_empty());
    }
}
