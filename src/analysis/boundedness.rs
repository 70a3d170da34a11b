//! 有界性分析
//!
//! 依次使用三种依据：
//! 1. 完整的可达图：各库所的最大 token 数即为其界；
//! 2. 可达图中出现严格覆盖祖先的状态（仅对单调网有效）：网无界；
//! 3. 可达图被截断时，若每个库所都被某个 P-不变量覆盖且网中无复位弧，
//!    则由不变量给出结构界。
//!
//! 以上均不适用时结论为「无法确定」。
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analysis::invariants::{place_invariants, structural_bounds};
use crate::analysis::reachability::transition_ids;
use crate::analysis::{
    AnalysisContext, AnalysisResult, AnalyzerKind, Deadline, Payload, behavioral_warnings,
};
use crate::net::Idx;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Bounded,
    Unbounded,
    Undetermined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    ReachabilityGraph,
    Divergence,
    PlaceInvariants,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceBound {
    pub place: String,
    /// Largest token count seen in the explored states.
    pub max_observed: u64,
    /// Proven upper bound, when one is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounded: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundednessReport {
    pub verdict: Verdict,
    pub method: Method,
    pub places: Vec<PlaceBound>,
    /// Smallest `k` such that the net is k-bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe: Option<bool>,
    /// Transition sequence reaching a covering state, for unbounded nets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub witness: Vec<String>,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Bounded => write!(f, "bounded"),
            Verdict::Unbounded => write!(f, "unbounded"),
            Verdict::Undetermined => write!(f, "undetermined"),
        }
    }
}

pub fn analyze(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    let kind = AnalyzerKind::Boundedness;
    if let Err(blocked) = ctx.admit(kind) {
        return blocked;
    }
    let net = ctx.net;
    let graph = ctx.state_graph(deadline);
    let mut warnings = behavioral_warnings(net, &graph);

    let mut places: Vec<PlaceBound> = net
        .places
        .iter()
        .zip(graph.max_tokens.iter())
        .map(|(place, max)| PlaceBound {
            place: place.id.clone(),
            max_observed: *max,
            bound: None,
            bounded: None,
        })
        .collect();

    let (verdict, method, witness) = if graph.is_complete() {
        for place in places.iter_mut() {
            place.bound = Some(place.max_observed);
            place.bounded = Some(true);
        }
        (Verdict::Bounded, Method::ReachabilityGraph, Vec::new())
    } else if let Some(divergence) = &graph.divergence {
        for place in divergence.places.iter() {
            places[place.index()].bounded = Some(false);
        }
        (
            Verdict::Unbounded,
            Method::Divergence,
            transition_ids(net, &divergence.witness),
        )
    } else if !net.has_reset_arcs() {
        let invariants = match place_invariants(net, ctx.config.guard.invariant_max_rows, deadline)
        {
            Ok(invariants) => invariants,
            Err(err) => {
                warnings.push(format!(
                    "P-invariant bounds unavailable for the partial graph: {err}"
                ));
                Vec::new()
            }
        };
        let bounds = structural_bounds(net, &invariants);
        for (place, bound) in places.iter_mut().zip(bounds.iter()) {
            if let Some(bound) = bound {
                place.bound = Some(*bound);
                place.bounded = Some(true);
            }
        }
        if bounds.iter().all(Option::is_some) {
            (Verdict::Bounded, Method::PlaceInvariants, Vec::new())
        } else {
            (Verdict::Undetermined, Method::None, Vec::new())
        }
    } else {
        (Verdict::Undetermined, Method::None, Vec::new())
    };

    if verdict == Verdict::Undetermined && !net.is_monotone() {
        warnings.push(
            "inhibitor arcs, reset arcs or capacities make coverability unsound; unboundedness cannot be proven from a partial graph".to_string(),
        );
    }

    let k = (verdict == Verdict::Bounded)
        .then(|| places.iter().filter_map(|p| p.bound).max().unwrap_or(0));
    let report = BoundednessReport {
        verdict,
        method,
        k,
        safe: k.map(|k| k <= 1),
        places,
        witness,
    };
    log::info!("boundedness: {verdict} ({method:?})");
    let mut result =
        AnalysisResult::success(kind, Payload::Boundedness(report)).truncated(graph.truncated);
    result.metadata.timed_out = graph.timed_out;
    result.warnings = warnings;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::net::{Net, NetModel};

    fn run(model: &NetModel, max_states: usize) -> (AnalysisResult, BoundednessReport) {
        let net = Net::from_model(model).unwrap();
        let mut config = AnalysisConfig::default();
        config.guard.max_states = max_states;
        let ctx = AnalysisContext::new(&net, &config);
        let result = analyze(&ctx, Deadline::none());
        let Payload::Boundedness(report) = result.payload.clone() else {
            panic!("unexpected payload");
        };
        (result, report)
    }

    fn ring(tokens: f64) -> NetModel {
        NetModel::new("ring")
            .place("p1", tokens)
            .place("p2", 0.0)
            .transition("t1")
            .transition("t2")
            .arc("p1", "t1")
            .arc("t1", "p2")
            .arc("p2", "t2")
            .arc("t2", "p1")
    }

    #[test]
    fn complete_graph_is_bounded() {
        let (result, report) = run(&ring(2.0), 100);
        assert!(result.success);
        assert_eq!(report.verdict, Verdict::Bounded);
        assert_eq!(report.method, Method::ReachabilityGraph);
        assert_eq!(report.k, Some(2));
        assert_eq!(report.safe, Some(false));
    }

    #[test]
    fn truncated_graph_falls_back_to_invariants() {
        let (result, report) = run(&ring(5.0), 2);
        assert!(result.metadata.truncated);
        assert_eq!(report.verdict, Verdict::Bounded);
        assert_eq!(report.method, Method::PlaceInvariants);
        assert_eq!(report.k, Some(5));
    }

    #[test]
    fn failed_invariant_fallback_is_explained() {
        let net = Net::from_model(&ring(5.0)).unwrap();
        let mut config = AnalysisConfig::default();
        config.guard.max_states = 2;
        config.guard.invariant_max_rows = 0;
        let ctx = AnalysisContext::new(&net, &config);
        let result = analyze(&ctx, Deadline::none());
        let Payload::Boundedness(report) = &result.payload else {
            panic!("unexpected payload");
        };
        assert_eq!(report.verdict, Verdict::Undetermined);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.contains("P-invariant bounds unavailable") && w.contains("limit of 0"))
        );
    }

    #[test]
    fn pump_is_unbounded() {
        let model = NetModel::new("pump")
            .place("p", 1.0)
            .place("q", 0.0)
            .transition("t")
            .arc("p", "t")
            .arc("t", "p")
            .arc("t", "q");
        let (result, report) = run(&model, 20);
        assert!(result.success);
        assert_eq!(report.verdict, Verdict::Unbounded);
        assert_eq!(report.witness, vec!["t"]);
        assert_eq!(report.places[1].bounded, Some(false));
        assert_eq!(report.k, None);
    }
}
