//! Weak-fairness check over the reachability graph.
//!
//! A transition `t` is unfair when some infinite run keeps `t` enabled in
//! every state yet never fires it: a cycle inside the states enabling `t`
//! that uses no `t`-labelled edge.
use petgraph::Graph;
use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::analysis::reachability::StateGraph;
use crate::analysis::{
    AnalysisContext, AnalysisResult, AnalyzerKind, Deadline, Payload, behavioral_warnings,
};
use crate::net::{Net, TransitionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairnessVerdict {
    Fair,
    Unfair,
    Undetermined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionFairness {
    pub transition: String,
    pub verdict: FairnessVerdict,
    /// Transitions firing on the starving cycle.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub starved_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairnessReport {
    pub transitions: Vec<TransitionFairness>,
    pub unfair: Vec<String>,
    pub complete: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct TimedOut;

/// Transition labels of a starving cycle for `transition`, if one exists.
fn starving_cycle(graph: &StateGraph, transition: TransitionId) -> Option<Vec<TransitionId>> {
    let mut sub: Graph<NodeIndex, TransitionId> = Graph::new();
    let mut local: FxHashMap<NodeIndex, NodeIndex> = FxHashMap::default();
    for (index, node) in graph.states() {
        if node.expanded && node.enabled.contains(&transition) {
            local.insert(index, sub.add_node(index));
        }
    }
    for edge in graph.graph.edge_references() {
        let label = edge.weight().transition;
        if label == transition {
            continue;
        }
        if let (Some(&from), Some(&to)) = (local.get(&edge.source()), local.get(&edge.target())) {
            sub.add_edge(from, to, label);
        }
    }

    for component in tarjan_scc(&sub) {
        let members: Vec<NodeIndex> = component;
        let nontrivial = members.len() > 1
            || sub
                .edges(members[0])
                .any(|edge| edge.target() == members[0]);
        if !nontrivial {
            continue;
        }
        let mut labels: Vec<TransitionId> = members
            .iter()
            .flat_map(|&node| {
                sub.edges(node)
                    .filter(|edge| members.contains(&edge.target()))
                    .map(|edge| *edge.weight())
                    .collect::<Vec<_>>()
            })
            .collect();
        labels.sort();
        labels.dedup();
        return Some(labels);
    }
    None
}

pub fn check(
    net: &Net,
    graph: &StateGraph,
    deadline: Deadline,
) -> Result<FairnessReport, TimedOut> {
    let complete = graph.is_complete();
    let mut transitions = Vec::with_capacity(net.transitions_len());
    for (t, transition) in net.transitions.iter_enumerated() {
        if deadline.expired() {
            return Err(TimedOut);
        }
        let (verdict, starved_by) = match starving_cycle(graph, t) {
            Some(labels) => (
                FairnessVerdict::Unfair,
                labels
                    .iter()
                    .map(|l| net.transitions[*l].id.clone())
                    .collect(),
            ),
            None if complete => (FairnessVerdict::Fair, Vec::new()),
            None => (FairnessVerdict::Undetermined, Vec::new()),
        };
        transitions.push(TransitionFairness {
            transition: transition.id.clone(),
            verdict,
            starved_by,
        });
    }
    let unfair = transitions
        .iter()
        .filter(|t| t.verdict == FairnessVerdict::Unfair)
        .map(|t| t.transition.clone())
        .collect();
    Ok(FairnessReport {
        transitions,
        unfair,
        complete,
    })
}

pub fn analyze(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    let kind = AnalyzerKind::Fairness;
    if let Err(blocked) = ctx.admit(kind) {
        return blocked;
    }
    let graph = ctx.state_graph(deadline);
    let report = match check(ctx.net, &graph, deadline) {
        Ok(report) => report,
        Err(TimedOut) => return AnalysisResult::timed_out(kind, "fairness check"),
    };
    log::info!("fairness: {} unfair transition(s)", report.unfair.len());
    let mut result =
        AnalysisResult::success(kind, Payload::Fairness(report)).truncated(graph.truncated);
    result.metadata.timed_out = graph.timed_out;
    result.warnings = behavioral_warnings(ctx.net, &graph);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::reachability::StateGraphConfig;
    use crate::net::NetModel;

    fn check_model(model: &NetModel, state_limit: usize) -> FairnessReport {
        let net = Net::from_model(model).unwrap();
        let graph = StateGraph::with_config(
            &net,
            StateGraphConfig {
                state_limit,
                deadline: Deadline::none(),
            },
        );
        check(&net, &graph, Deadline::none()).unwrap()
    }

    #[test]
    fn competing_loop_starves_exit() {
        // `spin` loops on p forever while `exit` stays enabled
        let model = NetModel::new("starve")
            .place("p", 1.0)
            .place("done", 0.0)
            .transition("spin")
            .transition("exit")
            .arc("p", "spin")
            .arc("spin", "p")
            .arc("p", "exit")
            .arc("exit", "done");
        let report = check_model(&model, 100);
        assert_eq!(report.unfair, vec!["exit".to_string()]);
        let exit = &report.transitions[1];
        assert_eq!(exit.verdict, FairnessVerdict::Unfair);
        assert_eq!(exit.starved_by, vec!["spin".to_string()]);
        assert_eq!(report.transitions[0].verdict, FairnessVerdict::Fair);
    }

    #[test]
    fn ring_is_fair() {
        let model = NetModel::new("ring")
            .place("p1", 1.0)
            .place("p2", 0.0)
            .transition("t1")
            .transition("t2")
            .arc("p1", "t1")
            .arc("t1", "p2")
            .arc("p2", "t2")
            .arc("t2", "p1");
        let report = check_model(&model, 100);
        assert!(report.unfair.is_empty());
        assert!(
            report
                .transitions
                .iter()
                .all(|t| t.verdict == FairnessVerdict::Fair)
        );
    }

    #[test]
    fn partial_graph_cannot_prove_fairness() {
        let model = NetModel::new("pump")
            .place("p", 1.0)
            .place("q", 0.0)
            .transition("t")
            .arc("p", "t")
            .arc("t", "p")
            .arc("t", "q");
        let report = check_model(&model, 4);
        assert!(!report.complete);
        assert_eq!(report.transitions[0].verdict, FairnessVerdict::Undetermined);
    }
}
