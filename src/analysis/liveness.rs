//! 活性分级（L0–L4），基于可达图的强连通分量。
//!
//! * L0: never fires.
//! * L1: fires on some edge of the graph.
//! * L3: fires on an edge inside a strongly connected component, i.e. can
//!   fire infinitely often along some run. On a finite graph L2 and L3
//!   coincide, so L2 is never reported as the highest level.
//! * L4: fires inside every bottom component, so it stays fireable from
//!   every reachable state.
//!
//! On a truncated graph only lower bounds are sound: a transition is reported
//! as at least L1 or L3, never as L0 or L4.
use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::analysis::reachability::StateGraph;
use crate::analysis::{
    AnalysisContext, AnalysisResult, AnalyzerKind, Deadline, Payload, behavioral_warnings,
};
use crate::net::{Idx, Net};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LivenessLevel {
    L0,
    L1,
    L2,
    L3,
    L4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionLiveness {
    pub transition: String,
    /// `None` when the explored part of the graph proves nothing.
    pub level: Option<LivenessLevel>,
    /// `false` when `level` is only a lower bound.
    pub exact: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessReport {
    pub transitions: Vec<TransitionLiveness>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quasi_live: Option<bool>,
    pub dead: Vec<String>,
    pub complete: bool,
}

/// Per-transition facts read off the graph.
struct Occurrences {
    fired: Vec<bool>,
    in_cycle: Vec<bool>,
    in_every_bottom: Vec<bool>,
}

fn occurrences(net: &Net, graph: &StateGraph) -> Occurrences {
    let transitions = net.transitions_len();
    let components = tarjan_scc(&graph.graph);
    let mut component_of: FxHashMap<NodeIndex, usize> = FxHashMap::default();
    for (c, nodes) in components.iter().enumerate() {
        for node in nodes {
            component_of.insert(*node, c);
        }
    }

    let mut fired = vec![false; transitions];
    let mut in_cycle = vec![false; transitions];
    let mut bottom = vec![true; components.len()];
    let mut labels: Vec<Vec<bool>> = vec![vec![false; transitions]; components.len()];
    for edge in graph.graph.edge_references() {
        let t = edge.weight().transition.index();
        fired[t] = true;
        let from = component_of[&edge.source()];
        let to = component_of[&edge.target()];
        if from == to {
            in_cycle[t] = true;
            labels[from][t] = true;
        } else {
            bottom[from] = false;
        }
    }

    // a successor cut by the state cap leaves no edge, but the firing was possible
    for node in graph.graph.node_weights() {
        for t in &node.enabled {
            fired[t.index()] = true;
        }
    }

    let in_every_bottom = (0..transitions)
        .map(|t| {
            labels
                .iter()
                .zip(bottom.iter())
                .filter(|(_, is_bottom)| **is_bottom)
                .all(|(inside, _)| inside[t])
        })
        .collect();
    Occurrences {
        fired,
        in_cycle,
        in_every_bottom,
    }
}

pub fn classify(net: &Net, graph: &StateGraph) -> LivenessReport {
    let facts = occurrences(net, graph);
    let complete = graph.is_complete();
    let transitions: Vec<TransitionLiveness> = net
        .transitions
        .iter_enumerated()
        .map(|(t, transition)| {
            let t = t.index();
            let level = if complete && facts.in_every_bottom[t] {
                Some(LivenessLevel::L4)
            } else if facts.in_cycle[t] {
                Some(LivenessLevel::L3)
            } else if facts.fired[t] {
                Some(LivenessLevel::L1)
            } else if complete {
                Some(LivenessLevel::L0)
            } else {
                None
            };
            TransitionLiveness {
                transition: transition.id.clone(),
                level,
                exact: complete,
            }
        })
        .collect();

    let dead = transitions
        .iter()
        .filter(|t| t.level == Some(LivenessLevel::L0))
        .map(|t| t.transition.clone())
        .collect();
    let all_at_least =
        |level| transitions.iter().all(|t| t.level.is_some_and(|l| l >= level));
    let live = complete.then(|| all_at_least(LivenessLevel::L4));
    let quasi_live = if all_at_least(LivenessLevel::L1) {
        Some(true)
    } else {
        complete.then_some(false)
    };
    LivenessReport {
        transitions,
        live,
        quasi_live,
        dead,
        complete,
    }
}

pub fn analyze(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    let kind = AnalyzerKind::Liveness;
    if let Err(blocked) = ctx.admit(kind) {
        return blocked;
    }
    let graph = ctx.state_graph(deadline);
    let report = classify(ctx.net, &graph);
    log::info!(
        "liveness: live={:?}, {} dead transitions",
        report.live,
        report.dead.len()
    );
    let mut result =
        AnalysisResult::success(kind, Payload::Liveness(report)).truncated(graph.truncated);
    result.metadata.timed_out = graph.timed_out;
    result.warnings = behavioral_warnings(ctx.net, &graph);
    if graph.truncated {
        result
            .warnings
            .push("liveness levels are lower bounds on a partial state space".to_string());
    }
    result
}
