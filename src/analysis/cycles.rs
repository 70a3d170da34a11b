//! 基本回路枚举（Johnson 算法，显式栈实现）。
//!
//! Works on the drawn place/transition graph with every arc kind. Each
//! elementary cycle is reported once, rotated to start at its smallest node
//! (places before transitions, declaration order).
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisContext, AnalysisResult, AnalyzerKind, Deadline, Payload};
use crate::net::{Net, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    /// Node ids in traversal order; the last node leads back to the first.
    pub nodes: Vec<String>,
    pub length: usize,
    pub places: usize,
    pub transitions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycles: Vec<Cycle>,
    pub truncated: bool,
    pub cap: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Stop {
    Exhausted,
    Cap,
    TimedOut,
}

struct Frame {
    node: usize,
    next: usize,
    closed: bool,
}

/// Nodes `>= start` lying on a common strongly connected component with
/// `start`, computed as forward ∩ backward reachability.
fn component_of(adjacency: &[Vec<usize>], reverse: &[Vec<usize>], start: usize) -> Vec<bool> {
    let reach = |edges: &[Vec<usize>]| {
        let mut seen = vec![false; edges.len()];
        let mut stack = vec![start];
        seen[start] = true;
        while let Some(node) = stack.pop() {
            for &next in &edges[node] {
                if next >= start && !seen[next] {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
        seen
    };
    let forward = reach(adjacency);
    let backward = reach(reverse);
    forward
        .iter()
        .zip(backward.iter())
        .map(|(f, b)| *f && *b)
        .collect()
}

fn unblock(start: usize, blocked: &mut [bool], blocked_by: &mut [FxHashSet<usize>]) {
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        if !blocked[node] {
            continue;
        }
        blocked[node] = false;
        stack.extend(blocked_by[node].drain());
    }
}

/// Elementary cycles of `adjacency` as dense node sequences. Stops after
/// `cap` cycles once another one is known to exist.
pub fn elementary_cycles(
    adjacency: &[Vec<usize>],
    cap: usize,
    deadline: Deadline,
) -> (Vec<Vec<usize>>, Stop) {
    let n = adjacency.len();
    let mut reverse = vec![Vec::new(); n];
    for (from, targets) in adjacency.iter().enumerate() {
        for &to in targets {
            reverse[to].push(from);
        }
    }

    let mut cycles = Vec::new();
    let mut steps: u64 = 0;
    for start in 0..n {
        let component = component_of(adjacency, &reverse, start);
        let has_cycle = adjacency[start].iter().any(|&w| w >= start && component[w]);
        if !has_cycle {
            continue;
        }

        let mut blocked = vec![false; n];
        let mut blocked_by: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); n];
        let mut path = vec![start];
        let mut stack = vec![Frame {
            node: start,
            next: 0,
            closed: false,
        }];
        blocked[start] = true;

        loop {
            steps += 1;
            if steps % 1024 == 0 && deadline.expired() {
                return (cycles, Stop::TimedOut);
            }
            let Some(top) = stack.last_mut() else {
                break;
            };
            let node = top.node;
            if let Some(&next) = adjacency[node].get(top.next) {
                top.next += 1;
                if next < start || !component[next] {
                    continue;
                }
                if next == start {
                    top.closed = true;
                    if cycles.len() == cap {
                        return (cycles, Stop::Cap);
                    }
                    cycles.push(path.clone());
                } else if !blocked[next] {
                    blocked[next] = true;
                    path.push(next);
                    stack.push(Frame {
                        node: next,
                        next: 0,
                        closed: false,
                    });
                }
                continue;
            }

            let Some(frame) = stack.pop() else {
                break;
            };
            if frame.closed {
                unblock(frame.node, &mut blocked, &mut blocked_by);
            } else {
                for &next in &adjacency[frame.node] {
                    if next >= start && component[next] {
                        blocked_by[next].insert(frame.node);
                    }
                }
            }
            path.pop();
            if let Some(parent) = stack.last_mut() {
                parent.closed |= frame.closed;
            }
        }
    }
    (cycles, Stop::Exhausted)
}

fn to_cycle(net: &Net, dense: &[usize]) -> Cycle {
    let places_len = net.places_len();
    let nodes: Vec<NodeId> = dense
        .iter()
        .map(|&index| NodeId::from_dense(index, places_len))
        .collect();
    let places = nodes.iter().filter(|node| node.is_place()).count();
    Cycle {
        nodes: nodes
            .iter()
            .map(|&node| net.node_label(node).to_string())
            .collect(),
        length: nodes.len(),
        places,
        transitions: nodes.len() - places,
    }
}

pub fn analyze(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    let kind = AnalyzerKind::Cycles;
    if let Err(blocked) = ctx.admit(kind) {
        return blocked;
    }
    let net = ctx.net;
    let cap = ctx.config.guard.max_cycles;
    let (found, stop) = elementary_cycles(&net.adjacency(), cap, deadline);
    let cycles: Vec<Cycle> = found.iter().map(|cycle| to_cycle(net, cycle)).collect();
    log::info!("found {} elementary cycles ({:?})", cycles.len(), stop);

    let truncated = stop != Stop::Exhausted;
    let report = CycleReport {
        cycles,
        truncated,
        cap,
    };
    let mut result = AnalysisResult::success(kind, Payload::Cycles(report)).truncated(truncated);
    match stop {
        Stop::Exhausted => {}
        Stop::Cap => {
            result = result.with_warning(format!(
                "stopped after {cap} cycles; more cycles exist (raise guard.max_cycles)"
            ));
        }
        Stop::TimedOut => {
            result.metadata.timed_out = true;
            result = result.with_warning("cycle enumeration ran out of time; the list is partial");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::net::NetModel;

    #[test]
    fn finds_all_elementary_cycles_of_small_graph() {
        // 0 -> 1 -> 2 -> 0, 1 -> 0, 2 -> 2
        let adjacency = vec![vec![1], vec![0, 2], vec![0, 2]];
        let (cycles, stop) = elementary_cycles(&adjacency, 100, Deadline::none());
        assert_eq!(stop, Stop::Exhausted);
        let mut cycles = cycles;
        cycles.sort();
        assert_eq!(cycles, vec![vec![0, 1], vec![0, 1, 2], vec![2]]);
    }

    #[test]
    fn complete_graph_cycle_count() {
        // K4 has 20 elementary cycles
        let adjacency: Vec<Vec<usize>> = (0..4)
            .map(|i| (0..4).filter(|&j| j != i).collect())
            .collect();
        let (cycles, stop) = elementary_cycles(&adjacency, 1000, Deadline::none());
        assert_eq!(stop, Stop::Exhausted);
        assert_eq!(cycles.len(), 20);
        let unique: FxHashSet<Vec<usize>> = cycles.into_iter().collect();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn cap_truncates_but_keeps_partial_results() {
        let adjacency: Vec<Vec<usize>> = (0..4)
            .map(|i| (0..4).filter(|&j| j != i).collect())
            .collect();
        let (cycles, stop) = elementary_cycles(&adjacency, 5, Deadline::none());
        assert_eq!(stop, Stop::Cap);
        assert_eq!(cycles.len(), 5);
    }

    #[test]
    fn ring_net_has_one_cycle() {
        let model = NetModel::new("ring")
            .place("p1", 1.0)
            .place("p2", 0.0)
            .transition("t1")
            .transition("t2")
            .arc("p1", "t1")
            .arc("t1", "p2")
            .arc("p2", "t2")
            .arc("t2", "p1");
        let net = Net::from_model(&model).unwrap();
        let config = AnalysisConfig::default();
        let ctx = AnalysisContext::new(&net, &config);
        let result = analyze(&ctx, Deadline::none());
        assert!(result.success);
        let Payload::Cycles(report) = result.payload else {
            panic!("unexpected payload");
        };
        assert!(!report.truncated);
        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.cycles[0].nodes, vec!["p1", "t1", "p2", "t2"]);
        assert_eq!(
            (report.cycles[0].places, report.cycles[0].transitions),
            (2, 2)
        );
    }

    #[test]
    fn cap_marks_result_truncated() {
        // two transitions each closing a loop with p
        let model = NetModel::new("double")
            .place("p", 1.0)
            .transition("a")
            .transition("b")
            .arc("p", "a")
            .arc("a", "p")
            .arc("p", "b")
            .arc("b", "p");
        let net = Net::from_model(&model).unwrap();
        let mut config = AnalysisConfig::default();
        config.guard.max_cycles = 1;
        let ctx = AnalysisContext::new(&net, &config);
        let result = analyze(&ctx, Deadline::none());
        assert!(result.success);
        assert!(result.metadata.truncated);
        assert_eq!(result.warnings.len(), 1);
        let Payload::Cycles(report) = result.payload else {
            panic!("unexpected payload");
        };
        assert_eq!(report.cycles.len(), 1);
    }
}
