//! 死锁检测：可达图中无可发生迁移的状态，附带最短触发序列。
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::analysis::reachability::{StateGraph, marking_map, transition_ids};
use crate::analysis::{
    AnalysisContext, AnalysisResult, AnalyzerKind, Deadline, Payload, behavioral_warnings,
};
use crate::net::Net;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockState {
    pub state: usize,
    pub marking: IndexMap<String, u64>,
    /// Places holding tokens in the dead marking.
    pub marked_places: Vec<String>,
    /// Shortest firing sequence from the initial marking.
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockReport {
    pub deadlocks: Vec<DeadlockState>,
    /// `None` when no deadlock was found in a partial graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadlock_free: Option<bool>,
    pub complete: bool,
}

pub fn detect(net: &Net, graph: &StateGraph) -> DeadlockReport {
    let deadlocks: Vec<DeadlockState> = graph
        .deadlocks
        .iter()
        .map(|&index| {
            let node = graph.node(index);
            DeadlockState {
                state: node.index,
                marking: marking_map(net, &node.marking),
                marked_places: node
                    .marking
                    .iter()
                    .filter(|(_, tokens)| **tokens > 0)
                    .map(|(place, _)| net.places[place].id.clone())
                    .collect(),
                path: transition_ids(net, &graph.path_to(index)),
            }
        })
        .collect();
    let deadlock_free = if !deadlocks.is_empty() {
        Some(false)
    } else {
        graph.is_complete().then_some(true)
    };
    DeadlockReport {
        deadlocks,
        deadlock_free,
        complete: graph.is_complete(),
    }
}

pub fn analyze(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    let kind = AnalyzerKind::Deadlocks;
    if let Err(blocked) = ctx.admit(kind) {
        return blocked;
    }
    let graph = ctx.state_graph(deadline);
    let report = detect(ctx.net, &graph);
    if !report.deadlocks.is_empty() {
        log::warn!("found {} deadlock state(s)", report.deadlocks.len());
    }
    let mut result =
        AnalysisResult::success(kind, Payload::Deadlocks(report)).truncated(graph.truncated);
    result.metadata.timed_out = graph.timed_out;
    result.warnings = behavioral_warnings(ctx.net, &graph);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::net::NetModel;

    fn deadlocks_of(model: &NetModel, max_states: usize) -> (AnalysisResult, DeadlockReport) {
        let net = Net::from_model(model).unwrap();
        let mut config = AnalysisConfig::default();
        config.guard.max_states = max_states;
        let ctx = AnalysisContext::new(&net, &config);
        let result = analyze(&ctx, Deadline::none());
        let Payload::Deadlocks(report) = result.payload.clone() else {
            panic!("unexpected payload");
        };
        (result, report)
    }

    #[test]
    fn chain_deadlocks_after_one_step() {
        let model = NetModel::new("chain")
            .place("p1", 1.0)
            .place("p2", 0.0)
            .transition("t1")
            .arc("p1", "t1")
            .arc("t1", "p2");
        let (result, report) = deadlocks_of(&model, 100);
        assert!(result.success);
        assert_eq!(report.deadlock_free, Some(false));
        assert_eq!(report.deadlocks.len(), 1);
        let dead = &report.deadlocks[0];
        assert_eq!(dead.marking["p1"], 0);
        assert_eq!(dead.marking["p2"], 1);
        assert_eq!(dead.marked_places, vec!["p2"]);
        assert_eq!(dead.path, vec!["t1"]);
    }

    #[test]
    fn initial_deadlock_has_empty_path() {
        let model = NetModel::new("stuck")
            .place("p", 0.0)
            .transition("t")
            .arc("p", "t");
        let (_, report) = deadlocks_of(&model, 100);
        assert_eq!(report.deadlocks.len(), 1);
        assert!(report.deadlocks[0].path.is_empty());
    }

    #[test]
    fn partial_graph_without_deadlock_is_undetermined() {
        let model = NetModel::new("pump")
            .place("p", 1.0)
            .transition("t")
            .arc("p", "t")
            .arc("t", "p")
            .arc("t", "p");
        let (result, report) = deadlocks_of(&model, 3);
        assert!(result.metadata.truncated);
        assert!(report.deadlocks.is_empty());
        assert_eq!(report.deadlock_free, None);
    }
}
