//! 可达图：从初始标识出发的广度优先状态空间探索。
//!
//! The graph is shared by the behavioral analyzers of one session. Exploration
//! stops at `state_limit` states or when the deadline expires; the graph is
//! then marked truncated and consumers must not draw conclusions that need
//! the full state space.
use std::collections::VecDeque;
use std::collections::hash_map::Entry;

use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::analysis::{
    AnalysisContext, AnalysisResult, AnalyzerKind, Deadline, Payload, behavioral_warnings,
};
use crate::net::{Marking, Net, PlaceId, TransitionId};

#[derive(Debug, Clone)]
pub struct StateNode {
    pub index: usize,
    pub marking: Marking,
    pub enabled: Vec<TransitionId>,
    /// Successors have been generated.
    pub expanded: bool,
    /// BFS tree edge leading here.
    pub parent: Option<(NodeIndex, TransitionId)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateEdge {
    pub transition: TransitionId,
}

/// A state strictly covering one of its BFS ancestors: repeating the
/// transitions between them pumps tokens without bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub places: Vec<PlaceId>,
    pub witness: Vec<TransitionId>,
}

#[derive(Debug, Clone, Copy)]
pub struct StateGraphConfig {
    pub state_limit: usize,
    pub deadline: Deadline,
}

#[derive(Debug)]
pub struct StateGraph {
    pub graph: StableGraph<StateNode, StateEdge>,
    pub initial: NodeIndex,
    /// Expanded states without enabled transitions, in discovery order.
    pub deadlocks: Vec<NodeIndex>,
    pub truncated: bool,
    pub timed_out: bool,
    pub state_limit: usize,
    pub markings: FxHashMap<Marking, NodeIndex>,
    /// Per-place maximum over the explored states.
    pub max_tokens: Vec<u64>,
    pub divergence: Option<Divergence>,
}

impl StateGraph {
    pub fn with_config(net: &Net, config: StateGraphConfig) -> Self {
        let mut graph = StableGraph::new();
        let mut markings: FxHashMap<Marking, NodeIndex> = FxHashMap::default();
        let mut queue = VecDeque::new();
        let mut deadlocks = Vec::new();
        let mut truncated = false;
        let mut timed_out = false;
        let mut divergence = None;
        let check_divergence = net.is_monotone();

        let initial_marking = net.initial_marking();
        let mut max_tokens: Vec<u64> = initial_marking.iter().map(|(_, t)| *t).collect();
        let initial_index = graph.add_node(StateNode {
            index: 0,
            marking: initial_marking.clone(),
            enabled: Vec::new(),
            expanded: false,
            parent: None,
        });
        markings.insert(initial_marking, initial_index);
        queue.push_back(initial_index);

        while let Some(state_index) = queue.pop_front() {
            if config.deadline.expired() {
                truncated = true;
                timed_out = true;
                break;
            }
            let current_marking = graph[state_index].marking.clone();
            let enabled = net.enabled_transitions(&current_marking);
            graph[state_index].enabled = enabled.clone();
            graph[state_index].expanded = true;

            if enabled.is_empty() {
                deadlocks.push(state_index);
                continue;
            }

            for transition_id in enabled {
                let next_marking = match net.fire_transition(&current_marking, transition_id) {
                    Ok(next) => next,
                    Err(err) => {
                        log::warn!("firing {transition_id:?} failed: {err}");
                        continue;
                    }
                };
                let target_index = match markings.entry(next_marking.clone()) {
                    Entry::Occupied(entry) => *entry.get(),
                    Entry::Vacant(entry) => {
                        if graph.node_count() >= config.state_limit {
                            truncated = true;
                            continue;
                        }
                        let index = graph.add_node(StateNode {
                            index: graph.node_count(),
                            marking: next_marking.clone(),
                            enabled: Vec::new(),
                            expanded: false,
                            parent: Some((state_index, transition_id)),
                        });
                        entry.insert(index);
                        queue.push_back(index);
                        for (max, (_, tokens)) in max_tokens.iter_mut().zip(next_marking.iter()) {
                            *max = (*max).max(*tokens);
                        }
                        if check_divergence && divergence.is_none() {
                            divergence = find_divergence(&graph, index);
                        }
                        index
                    }
                };
                graph.add_edge(
                    state_index,
                    target_index,
                    StateEdge {
                        transition: transition_id,
                    },
                );
            }
        }

        if truncated {
            log::debug!(
                "state graph truncated at {} states (timed out: {timed_out})",
                graph.node_count()
            );
        }

        Self {
            graph,
            initial: initial_index,
            deadlocks,
            truncated,
            timed_out,
            state_limit: config.state_limit,
            markings,
            max_tokens,
            divergence,
        }
    }

    pub fn state_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_complete(&self) -> bool {
        !self.truncated
    }

    pub fn node(&self, index: NodeIndex) -> &StateNode {
        &self.graph[index]
    }

    pub fn contains_marking(&self, marking: &Marking) -> bool {
        self.markings.contains_key(marking)
    }

    /// Transitions along the BFS tree from the initial state to `index`.
    pub fn path_to(&self, index: NodeIndex) -> Vec<TransitionId> {
        path_to(&self.graph, index)
    }

    /// States in discovery order.
    pub fn states(&self) -> impl Iterator<Item = (NodeIndex, &StateNode)> {
        let mut nodes: Vec<_> = self
            .graph
            .node_indices()
            .map(|idx| (idx, &self.graph[idx]))
            .collect();
        nodes.sort_by_key(|(_, node)| node.index);
        nodes.into_iter()
    }
}

fn path_to(graph: &StableGraph<StateNode, StateEdge>, index: NodeIndex) -> Vec<TransitionId> {
    let mut path = Vec::new();
    let mut current = index;
    while let Some((parent, transition)) = graph[current].parent {
        path.push(transition);
        current = parent;
    }
    path.reverse();
    path
}

fn find_divergence(
    graph: &StableGraph<StateNode, StateEdge>,
    index: NodeIndex,
) -> Option<Divergence> {
    let marking = &graph[index].marking;
    let mut ancestor = graph[index].parent.map(|(parent, _)| parent);
    while let Some(current) = ancestor {
        let earlier = &graph[current].marking;
        if marking.strictly_covers(earlier) {
            let places = marking
                .iter()
                .filter(|(place, tokens)| **tokens > earlier.tokens(*place))
                .map(|(place, _)| place)
                .collect();
            return Some(Divergence {
                places,
                witness: path_to(graph, index),
            });
        }
        ancestor = graph[current].parent.map(|(parent, _)| parent);
    }
    None
}

pub(crate) fn marking_map(net: &Net, marking: &Marking) -> IndexMap<String, u64> {
    marking
        .iter()
        .map(|(place, tokens)| (net.places[place].id.clone(), *tokens))
        .collect()
}

pub(crate) fn transition_ids(net: &Net, transitions: &[TransitionId]) -> Vec<String> {
    transitions
        .iter()
        .map(|t| net.transitions[*t].id.clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachableState {
    pub index: usize,
    pub marking: IndexMap<String, u64>,
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachEdge {
    pub from: usize,
    pub to: usize,
    pub transition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityReport {
    pub states: Vec<ReachableState>,
    pub edges: Vec<ReachEdge>,
    pub state_count: usize,
    pub edge_count: usize,
    pub deadlock_count: usize,
    pub complete: bool,
}

pub fn report(net: &Net, graph: &StateGraph) -> ReachabilityReport {
    let states = graph
        .states()
        .map(|(_, node)| ReachableState {
            index: node.index,
            marking: marking_map(net, &node.marking),
            enabled: transition_ids(net, &node.enabled),
        })
        .collect();
    let mut edges: Vec<ReachEdge> = graph
        .graph
        .edge_references()
        .map(|edge| ReachEdge {
            from: graph.graph[edge.source()].index,
            to: graph.graph[edge.target()].index,
            transition: net.transitions[edge.weight().transition].id.clone(),
        })
        .collect();
    edges.sort_by(|a, b| (a.from, a.to, &a.transition).cmp(&(b.from, b.to, &b.transition)));
    ReachabilityReport {
        states,
        edges,
        state_count: graph.state_count(),
        edge_count: graph.edge_count(),
        deadlock_count: graph.deadlocks.len(),
        complete: graph.is_complete(),
    }
}

pub fn analyze(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    let kind = AnalyzerKind::Reachability;
    if let Err(blocked) = ctx.admit(kind) {
        return blocked;
    }
    let graph = ctx.state_graph(deadline);
    let report = report(ctx.net, &graph);
    log::info!(
        "reachability graph: {} states, {} edges, complete={}",
        report.state_count,
        report.edge_count,
        report.complete
    );
    let mut result =
        AnalysisResult::success(kind, Payload::Reachability(report)).truncated(graph.truncated);
    result.metadata.timed_out = graph.timed_out;
    result.warnings = behavioral_warnings(ctx.net, &graph);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NetModel;

    fn build(model: &NetModel, state_limit: usize) -> (Net, StateGraph) {
        let net = Net::from_model(model).unwrap();
        let graph = StateGraph::with_config(
            &net,
            StateGraphConfig {
                state_limit,
                deadline: Deadline::none(),
            },
        );
        (net, graph)
    }

    fn chain() -> NetModel {
        NetModel::new("chain")
            .place("p0", 1.0)
            .place("p1", 0.0)
            .transition("t0")
            .arc("p0", "t0")
            .arc("t0", "p1")
    }

    #[test]
    fn state_limit_truncates_graph() {
        let (_, graph) = build(&chain(), 1);
        assert!(graph.truncated);
        assert_eq!(graph.state_count(), 1);
        assert!(graph.deadlocks.is_empty());
    }

    #[test]
    fn chain_ends_in_deadlock() {
        let (net, graph) = build(&chain(), 100);
        assert!(graph.is_complete());
        assert_eq!(graph.state_count(), 2);
        assert_eq!(graph.deadlocks.len(), 1);
        let path = graph.path_to(graph.deadlocks[0]);
        assert_eq!(transition_ids(&net, &path), vec!["t0"]);
        assert_eq!(graph.max_tokens, vec![1, 1]);
        assert!(graph.divergence.is_none());
    }

    #[test]
    fn producer_loop_diverges() {
        // t: p -> p + q, unbounded in q
        let model = NetModel::new("pump")
            .place("p", 1.0)
            .place("q", 0.0)
            .transition("t")
            .arc("p", "t")
            .arc("t", "p")
            .arc("t", "q");
        let (net, graph) = build(&model, 50);
        assert!(graph.truncated);
        let divergence = graph.divergence.as_ref().unwrap();
        assert_eq!(divergence.places, vec![net.place_index("q").unwrap()]);
        assert_eq!(transition_ids(&net, &divergence.witness), vec!["t"]);
    }

    #[test]
    fn expired_deadline_marks_timeout() {
        let net = Net::from_model(&chain()).unwrap();
        let graph = StateGraph::with_config(
            &net,
            StateGraphConfig {
                state_limit: 100,
                deadline: Deadline::after(std::time::Duration::ZERO),
            },
        );
        assert!(graph.truncated);
        assert!(graph.timed_out);
        assert!(!graph.node(graph.initial).expanded);
    }

    #[test]
    fn report_lists_states_in_discovery_order() {
        let (net, graph) = build(&chain(), 100);
        let report = report(&net, &graph);
        assert_eq!(report.states.len(), 2);
        assert_eq!(report.states[0].marking["p0"], 1);
        assert_eq!(report.states[1].marking["p1"], 1);
        assert_eq!(
            report.edges,
            vec![ReachEdge {
                from: 0,
                to: 1,
                transition: "t0".into()
            }]
        );
    }
}
