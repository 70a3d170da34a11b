//! Element-centric view: every analyzer fact about one place or transition,
//! keyed by its string id.
//!
//! Each analyzer writes its own fields only, and every collection is a
//! `BTreeMap` or a sorted `Vec`, so the view does not depend on the order in
//! which results are folded in. A field stays `None` when the analyzer that
//! produces it did not run or did not succeed.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::fairness::FairnessVerdict;
use crate::analysis::hubs::NodeKind;
use crate::analysis::liveness::LivenessLevel;
use crate::analysis::{AnalysisResult, AnalyzerKind, Payload};
use crate::net::Net;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub index: usize,
    pub weight: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleMembership {
    pub index: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegreeFact {
    pub in_degree: usize,
    pub out_degree: usize,
    pub is_hub: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_invariants: Option<Vec<Membership>>,
    /// Covered by some P-invariant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conserved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub siphons: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traps: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycles: Option<Vec<CycleMembership>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degree: Option<DegreeFact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounded: Option<bool>,
    /// Holds tokens in some deadlock state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marked_in_deadlock: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_invariants: Option<Vec<Membership>>,
    /// Covered by some T-invariant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycles: Option<Vec<CycleMembership>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degree: Option<DegreeFact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness: Option<LivenessLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_exact: Option<bool>,
    /// Fired last on the way into some deadlock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leads_to_deadlock: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fairness: Option<FairnessVerdict>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementView {
    pub places: BTreeMap<String, PlaceRecord>,
    pub transitions: BTreeMap<String, TransitionRecord>,
    /// Analyzer name → reason.
    pub blocked: BTreeMap<String, String>,
    /// Analyzer name → errors.
    pub failed: BTreeMap<String, Vec<String>>,
}

impl ElementView {
    /// Empty records for every element of `net`.
    pub fn with_roster(net: &Net) -> Self {
        Self {
            places: net
                .places
                .iter()
                .map(|p| (p.id.clone(), PlaceRecord::default()))
                .collect(),
            transitions: net
                .transitions
                .iter()
                .map(|t| (t.id.clone(), TransitionRecord::default()))
                .collect(),
            ..Self::default()
        }
    }

    fn place(&mut self, id: &str) -> &mut PlaceRecord {
        self.places.entry(id.to_string()).or_default()
    }

    fn transition(&mut self, id: &str) -> &mut TransitionRecord {
        self.transitions.entry(id.to_string()).or_default()
    }

    fn node(&mut self, id: &str, kind: NodeKind) -> NodeRecord<'_> {
        match kind {
            NodeKind::Place => NodeRecord::Place(self.place(id)),
            NodeKind::Transition => NodeRecord::Transition(self.transition(id)),
        }
    }

    /// Node ids without a kind tag are resolved against the known records.
    fn node_by_id(&mut self, id: &str) -> NodeRecord<'_> {
        if self.transitions.contains_key(id) && !self.places.contains_key(id) {
            NodeRecord::Transition(self.transition(id))
        } else {
            NodeRecord::Place(self.place(id))
        }
    }

    pub fn fold(&mut self, result: &AnalysisResult) {
        let name = result.analyzer.name().to_string();
        if result.metadata.blocked {
            self.blocked.insert(
                name,
                result.metadata.reason.clone().unwrap_or_default(),
            );
            return;
        }
        if !result.success {
            self.failed.insert(name, result.errors.clone());
            return;
        }
        match (&result.payload, result.analyzer) {
            (Payload::Invariants(report), AnalyzerKind::PInvariants) => {
                for record in self.places.values_mut() {
                    record.p_invariants = Some(Vec::new());
                    record.conserved = Some(false);
                }
                for (index, invariant) in report.invariants.iter().enumerate() {
                    for entry in &invariant.entries {
                        let record = self.place(&entry.id);
                        record
                            .p_invariants
                            .get_or_insert_with(Vec::new)
                            .push(Membership {
                                index,
                                weight: entry.weight,
                            });
                        record.conserved = Some(true);
                    }
                }
            }
            (Payload::Invariants(report), AnalyzerKind::TInvariants) => {
                for record in self.transitions.values_mut() {
                    record.t_invariants = Some(Vec::new());
                    record.repetitive = Some(false);
                }
                for (index, invariant) in report.invariants.iter().enumerate() {
                    for entry in &invariant.entries {
                        let record = self.transition(&entry.id);
                        record
                            .t_invariants
                            .get_or_insert_with(Vec::new)
                            .push(Membership {
                                index,
                                weight: entry.weight,
                            });
                        record.repetitive = Some(true);
                    }
                }
            }
            (Payload::PlaceSets(report), AnalyzerKind::Siphons) => {
                for record in self.places.values_mut() {
                    record.siphons = Some(Vec::new());
                }
                for (index, set) in report.sets.iter().enumerate() {
                    for place in &set.places {
                        self.place(place)
                            .siphons
                            .get_or_insert_with(Vec::new)
                            .push(index);
                    }
                }
            }
            (Payload::PlaceSets(report), AnalyzerKind::Traps) => {
                for record in self.places.values_mut() {
                    record.traps = Some(Vec::new());
                }
                for (index, set) in report.sets.iter().enumerate() {
                    for place in &set.places {
                        self.place(place)
                            .traps
                            .get_or_insert_with(Vec::new)
                            .push(index);
                    }
                }
            }
            (Payload::Cycles(report), _) => {
                for record in self.places.values_mut() {
                    record.cycles = Some(Vec::new());
                }
                for record in self.transitions.values_mut() {
                    record.cycles = Some(Vec::new());
                }
                for (index, cycle) in report.cycles.iter().enumerate() {
                    let membership = CycleMembership {
                        index,
                        length: cycle.length,
                    };
                    for id in &cycle.nodes {
                        match self.node_by_id(id) {
                            NodeRecord::Place(r) => {
                                r.cycles.get_or_insert_with(Vec::new).push(membership)
                            }
                            NodeRecord::Transition(r) => {
                                r.cycles.get_or_insert_with(Vec::new).push(membership)
                            }
                        }
                    }
                }
            }
            (Payload::Paths(report), _) => {
                for record in self.places.values_mut() {
                    record.path_count = Some(0);
                }
                for record in self.transitions.values_mut() {
                    record.path_count = Some(0);
                }
                for path in &report.paths {
                    for id in &path.nodes {
                        let count = match self.node_by_id(id) {
                            NodeRecord::Place(r) => &mut r.path_count,
                            NodeRecord::Transition(r) => &mut r.path_count,
                        };
                        *count.get_or_insert(0) += 1;
                    }
                }
            }
            (Payload::Hubs(report), _) => {
                for node in &report.ranking {
                    let fact = DegreeFact {
                        in_degree: node.in_degree,
                        out_degree: node.out_degree,
                        is_hub: node.is_hub,
                    };
                    match self.node(&node.id, node.kind) {
                        NodeRecord::Place(r) => r.degree = Some(fact),
                        NodeRecord::Transition(r) => r.degree = Some(fact),
                    }
                }
            }
            (Payload::Reachability(report), _) => {
                let mut max: BTreeMap<&str, u64> = BTreeMap::new();
                for state in &report.states {
                    for (place, tokens) in &state.marking {
                        let entry = max.entry(place.as_str()).or_default();
                        *entry = (*entry).max(*tokens);
                    }
                }
                for (place, tokens) in max {
                    let record = self.place(place);
                    if record.max_tokens.is_none() {
                        record.max_tokens = Some(tokens);
                    }
                }
            }
            (Payload::Boundedness(report), _) => {
                for bound in &report.places {
                    let record = self.place(&bound.place);
                    // observed maxima agree with the reachability payload
                    record.max_tokens = Some(bound.max_observed);
                    record.bounded = bound.bounded;
                }
            }
            (Payload::Liveness(report), _) => {
                for entry in &report.transitions {
                    let record = self.transition(&entry.transition);
                    record.liveness = entry.level;
                    record.liveness_exact = Some(entry.exact);
                }
            }
            (Payload::Deadlocks(report), _) => {
                for record in self.places.values_mut() {
                    record.marked_in_deadlock = Some(false);
                }
                for record in self.transitions.values_mut() {
                    record.leads_to_deadlock = Some(false);
                }
                for dead in &report.deadlocks {
                    for place in &dead.marked_places {
                        self.place(place).marked_in_deadlock = Some(true);
                    }
                    if let Some(last) = dead.path.last() {
                        self.transition(last).leads_to_deadlock = Some(true);
                    }
                }
            }
            (Payload::Fairness(report), _) => {
                for entry in &report.transitions {
                    self.transition(&entry.transition).fairness = Some(entry.verdict);
                }
            }
            (payload, analyzer) => {
                log::debug!("no element facts from {analyzer} ({payload:?})");
            }
        }
    }
}

enum NodeRecord<'a> {
    Place(&'a mut PlaceRecord),
    Transition(&'a mut TransitionRecord),
}

/// Builds the element view from one result per analyzer.
pub fn aggregate(net: Option<&Net>, results: &BTreeMap<AnalyzerKind, AnalysisResult>) -> ElementView {
    let mut view = net.map(ElementView::with_roster).unwrap_or_default();
    for result in results.values() {
        view.fold(result);
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{self, AnalysisContext, Deadline, Selection};
    use crate::config::AnalysisConfig;
    use crate::net::NetModel;

    fn chain() -> Net {
        let model = NetModel::new("chain")
            .place("p1", 1.0)
            .place("p2", 0.0)
            .transition("t1")
            .arc("p1", "t1")
            .arc("t1", "p2");
        Net::from_model(&model).unwrap()
    }

    #[test]
    fn facts_land_on_the_right_elements() {
        let net = chain();
        let config = AnalysisConfig::default();
        let results = analysis::run_all(&net, &config, &Selection::All, Deadline::none());
        let view = aggregate(Some(&net), &results);

        let p1 = &view.places["p1"];
        assert_eq!(p1.siphons, Some(vec![0]));
        assert_eq!(p1.traps, Some(vec![]));
        assert_eq!(p1.max_tokens, Some(1));
        assert_eq!(p1.marked_in_deadlock, Some(false));
        assert_eq!(p1.conserved, Some(true));
        assert_eq!(view.places["p2"].marked_in_deadlock, Some(true));
        assert_eq!(view.places["p2"].traps, Some(vec![0]));

        let t1 = &view.transitions["t1"];
        assert_eq!(t1.liveness, Some(LivenessLevel::L1));
        assert_eq!(t1.leads_to_deadlock, Some(true));
        assert_eq!(t1.repetitive, Some(false));
        assert_eq!(t1.degree.map(|d| d.in_degree), Some(1));
        assert!(view.blocked.is_empty());
        assert!(view.failed.is_empty());
    }

    #[test]
    fn missing_analyzer_leaves_fields_absent() {
        let net = chain();
        let config = AnalysisConfig::default();
        let ctx = AnalysisContext::new(&net, &config);
        let mut results = BTreeMap::new();
        results.insert(
            AnalyzerKind::Hubs,
            AnalyzerKind::Hubs.run(&ctx, Deadline::none()),
        );
        let view = aggregate(Some(&net), &results);
        let p1 = &view.places["p1"];
        assert!(p1.degree.is_some());
        assert!(p1.siphons.is_none());
        assert!(p1.max_tokens.is_none());
        assert!(view.transitions["t1"].liveness.is_none());
    }

    #[test]
    fn blocked_and_failed_are_recorded() {
        let mut results = BTreeMap::new();
        results.insert(
            AnalyzerKind::Cycles,
            AnalysisResult::failed(AnalyzerKind::Cycles, "boom"),
        );
        let mut blocked = AnalysisResult::failed(AnalyzerKind::Siphons, "x");
        blocked.metadata.blocked = true;
        blocked.metadata.reason = Some("too big".into());
        results.insert(AnalyzerKind::Siphons, blocked);
        let view = aggregate(None, &results);
        assert_eq!(view.failed["cycles"], vec!["boom".to_string()]);
        assert_eq!(view.blocked["siphons"], "too big");
    }
}
