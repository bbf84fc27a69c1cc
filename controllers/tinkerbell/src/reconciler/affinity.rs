//! Hardware affinity matching.
//!
//! Pure selection logic: required terms decide which hardware may be used,
//! preferred terms rank it. Ranking ties fall back to namespace then name so
//! that concurrent passes over the same candidates pick the same unit.

use crds::{
    Hardware, HardwareAffinity, HardwareAffinityTerm, Selector, HARDWARE_CLUSTER_NAME_LABEL,
    HARDWARE_OWNER_NAME_LABEL,
};
use kube::ResourceExt;
use std::cmp::Reverse;

/// One list selector per required term, each excluding claimed hardware
///
/// An empty required list behaves as a single empty term.
pub fn required_selectors(affinity: Option<&HardwareAffinity>) -> Vec<Selector> {
    let default_term = [HardwareAffinityTerm::default()];
    let terms = match affinity {
        Some(a) if !a.required.is_empty() => a.required.as_slice(),
        _ => &default_term,
    };
    terms
        .iter()
        .map(|term| {
            Selector::from(&term.label_selector)
                .without(HARDWARE_OWNER_NAME_LABEL)
                .without(HARDWARE_CLUSTER_NAME_LABEL)
        })
        .collect()
}

/// Score of `hardware`: weight of the heaviest matching preferred term, 0 if none
pub fn score(hardware: &Hardware, affinity: Option<&HardwareAffinity>) -> i32 {
    affinity
        .into_iter()
        .flat_map(|a| a.preferred.iter())
        .filter(|p| Selector::from(&p.hardware_affinity_term.label_selector).matches(hardware.labels()))
        .map(|p| p.weight)
        .max()
        .unwrap_or(0)
}

/// Orders candidates by descending score, then namespace, then name
///
/// Candidates returned by several required terms appear once.
pub fn select(candidates: Vec<Hardware>, affinity: Option<&HardwareAffinity>) -> Vec<Hardware> {
    let mut scored: Vec<(i32, Hardware)> = candidates
        .into_iter()
        .map(|hw| (score(&hw, affinity), hw))
        .collect();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        (Reverse(*score_a), a.namespace(), a.name_any())
            .cmp(&(Reverse(*score_b), b.namespace(), b.name_any()))
    });
    scored.dedup_by(|(_, a), (_, b)| a.namespace() == b.namespace() && a.name_any() == b.name_any());

    scored.into_iter().map(|(_, hw)| hw).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::hardware_with_labels;
    use crds::{LabelSelector, WeightedHardwareAffinityTerm};
    use std::collections::BTreeMap;

    fn term(pairs: &[(&str, &str)]) -> HardwareAffinityTerm {
        HardwareAffinityTerm {
            label_selector: LabelSelector {
                match_labels: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
                match_expressions: vec![],
            },
        }
    }

    fn preferred(weight: i32, pairs: &[(&str, &str)]) -> WeightedHardwareAffinityTerm {
        WeightedHardwareAffinityTerm {
            weight,
            hardware_affinity_term: term(pairs),
        }
    }

    fn names(hardware: &[Hardware]) -> Vec<String> {
        hardware.iter().map(|hw| hw.name_any()).collect()
    }

    #[test]
    fn test_empty_required_excludes_claimed() {
        let selectors = required_selectors(None);
        assert_eq!(selectors.len(), 1);
        assert_eq!(
            selectors[0].to_string(),
            "!v1alpha1.tinkerbell.org/ownerName,!v1alpha1.tinkerbell.org/clusterName"
        );
    }

    #[test]
    fn test_one_selector_per_required_term() {
        let affinity = HardwareAffinity {
            required: vec![term(&[("rack", "r1")]), term(&[("rack", "r2")])],
            preferred: vec![],
        };
        let selectors = required_selectors(Some(&affinity));
        assert_eq!(selectors.len(), 2);
        assert!(selectors[1].to_string().starts_with("rack=r2,"));
    }

    #[test]
    fn test_highest_matching_weight_wins() {
        let affinity = HardwareAffinity {
            required: vec![],
            preferred: vec![
                preferred(10, &[("disk", "ssd")]),
                preferred(50, &[("rack", "r1")]),
                preferred(-5, &[("gpu", "none")]),
            ],
        };
        let both = hardware_with_labels("hw-both", "default", &[("disk", "ssd"), ("rack", "r1")]);
        let ssd = hardware_with_labels("hw-ssd", "default", &[("disk", "ssd")]);
        let penalized = hardware_with_labels("hw-nogpu", "default", &[("gpu", "none")]);
        let plain = hardware_with_labels("hw-plain", "default", &[]);

        assert_eq!(score(&both, Some(&affinity)), 50);
        assert_eq!(score(&ssd, Some(&affinity)), 10);
        assert_eq!(score(&penalized, Some(&affinity)), -5);
        assert_eq!(score(&plain, Some(&affinity)), 0);

        let ordered = select(vec![plain, penalized, ssd, both], Some(&affinity));
        assert_eq!(names(&ordered), vec!["hw-both", "hw-ssd", "hw-plain", "hw-nogpu"]);
    }

    #[test]
    fn test_ties_break_on_namespace_then_name() {
        let candidates = vec![
            hardware_with_labels("hw-b", "zeta", &[]),
            hardware_with_labels("hw-c", "alpha", &[]),
            hardware_with_labels("hw-a", "zeta", &[]),
            hardware_with_labels("hw-a", "alpha", &[]),
        ];
        let ordered = select(candidates, None);
        let keys: Vec<(String, String)> = ordered
            .iter()
            .map(|hw| (hw.namespace().unwrap_or_default(), hw.name_any()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("alpha".to_string(), "hw-a".to_string()),
                ("alpha".to_string(), "hw-c".to_string()),
                ("zeta".to_string(), "hw-a".to_string()),
                ("zeta".to_string(), "hw-b".to_string()),
            ]
        );
    }

    #[test]
    fn test_ordering_independent_of_input_order() {
        let affinity = HardwareAffinity {
            required: vec![],
            preferred: vec![preferred(1, &[("zone", "a")])],
        };
        let build = || {
            vec![
                hardware_with_labels("hw-3", "default", &[("zone", "a")]),
                hardware_with_labels("hw-1", "default", &[]),
                hardware_with_labels("hw-2", "default", &[("zone", "a")]),
                hardware_with_labels("hw-0", "default", &[]),
            ]
        };
        let expected = names(&select(build(), Some(&affinity)));
        assert_eq!(expected, vec!["hw-2", "hw-3", "hw-0", "hw-1"]);

        for rotation in 0..4 {
            let mut input = build();
            input.rotate_left(rotation);
            input.swap(0, 3 - rotation.min(3));
            assert_eq!(names(&select(input, Some(&affinity))), expected);
        }
    }

    #[test]
    fn test_duplicates_from_overlapping_terms_collapse() {
        let candidates = vec![
            hardware_with_labels("hw-a", "default", &[]),
            hardware_with_labels("hw-a", "default", &[]),
            hardware_with_labels("hw-b", "default", &[]),
        ];
        assert_eq!(names(&select(candidates, None)), vec!["hw-a", "hw-b"]);
    }

    #[test]
    fn test_no_candidates_yields_empty_selection() {
        assert!(select(vec![], None).is_empty());
    }
}
