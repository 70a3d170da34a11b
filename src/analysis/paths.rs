//! Simple directed paths of bounded length through the drawn net graph.
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisContext, AnalysisResult, AnalyzerKind, Deadline, Payload};
use crate::net::{Net, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub nodes: Vec<String>,
    /// Number of arcs.
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub paths: Vec<Path>,
    pub max_length: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_length: usize,
    pub max_paths: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Stop {
    Exhausted,
    Cap,
    TimedOut,
}

/// Depth-first enumeration of simple paths leaving `source` with at most
/// `limits.max_length` arcs. `target = None` records every path of length ≥ 1.
fn paths_from(
    adjacency: &[Vec<usize>],
    source: usize,
    target: Option<usize>,
    limits: Limits,
    deadline: Deadline,
    out: &mut Vec<Vec<usize>>,
) -> Stop {
    let mut on_path = vec![false; adjacency.len()];
    let mut path = vec![source];
    // (node, index of the next successor to try)
    let mut stack = vec![(source, 0usize)];
    on_path[source] = true;
    let mut steps: u64 = 0;

    while let Some((node, next)) = stack.last().copied() {
        steps += 1;
        if steps % 1024 == 0 && deadline.expired() {
            return Stop::TimedOut;
        }
        let depth = path.len() - 1;
        match adjacency[node].get(next) {
            Some(&succ) if depth < limits.max_length => {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if on_path[succ] {
                    continue;
                }
                let reached = target.is_none_or(|t| t == succ);
                if reached {
                    if out.len() == limits.max_paths {
                        return Stop::Cap;
                    }
                    let mut found = path.clone();
                    found.push(succ);
                    out.push(found);
                }
                // a path to the target never continues through it
                if target != Some(succ) {
                    on_path[succ] = true;
                    path.push(succ);
                    stack.push((succ, 0));
                }
            }
            _ => {
                stack.pop();
                if let Some(done) = path.pop() {
                    on_path[done] = false;
                }
            }
        }
    }
    Stop::Exhausted
}

pub fn enumerate(
    adjacency: &[Vec<usize>],
    endpoints: Option<(usize, usize)>,
    limits: Limits,
    deadline: Deadline,
) -> (Vec<Vec<usize>>, Stop) {
    let mut out = Vec::new();
    match endpoints {
        Some((source, target)) => {
            let stop = paths_from(adjacency, source, Some(target), limits, deadline, &mut out);
            (out, stop)
        }
        None => {
            for source in 0..adjacency.len() {
                let stop = paths_from(adjacency, source, None, limits, deadline, &mut out);
                if stop != Stop::Exhausted {
                    return (out, stop);
                }
            }
            (out, Stop::Exhausted)
        }
    }
}

fn resolve(net: &Net, id: &str) -> Option<usize> {
    let places = net.places_len();
    net.place_index(id)
        .map(|p| NodeId::Place(p).dense(places))
        .or_else(|| {
            net.transition_index(id)
                .map(|t| NodeId::Transition(t).dense(places))
        })
}

pub fn analyze(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    let kind = AnalyzerKind::Paths;
    if let Err(blocked) = ctx.admit(kind) {
        return blocked;
    }
    let net = ctx.net;
    let limits = Limits {
        max_length: ctx.config.guard.max_path_length,
        max_paths: ctx.config.guard.max_paths,
    };

    let endpoints = match &ctx.path_query {
        None => None,
        Some(query) => {
            let Some(source) = resolve(net, &query.source) else {
                return AnalysisResult::failed(kind, format!("unknown path source `{}`", query.source));
            };
            let Some(target) = resolve(net, &query.target) else {
                return AnalysisResult::failed(kind, format!("unknown path target `{}`", query.target));
            };
            Some((source, target))
        }
    };

    let (found, stop) = enumerate(&net.adjacency(), endpoints, limits, deadline);
    let places = net.places_len();
    let paths: Vec<Path> = found
        .iter()
        .map(|dense| Path {
            nodes: dense
                .iter()
                .map(|&i| net.node_label(NodeId::from_dense(i, places)).to_string())
                .collect(),
            length: dense.len() - 1,
        })
        .collect();
    log::info!("found {} paths ({:?})", paths.len(), stop);

    let truncated = stop != Stop::Exhausted;
    let report = PathReport {
        source: ctx.path_query.as_ref().map(|q| q.source.clone()),
        target: ctx.path_query.as_ref().map(|q| q.target.clone()),
        paths,
        max_length: limits.max_length,
        truncated,
    };
    let mut result = AnalysisResult::success(kind, Payload::Paths(report)).truncated(truncated);
    match stop {
        Stop::Exhausted => {}
        Stop::Cap => {
            result = result.with_warning(format!(
                "stopped after {} paths (raise guard.max_paths)",
                limits.max_paths
            ));
        }
        Stop::TimedOut => {
            result.metadata.timed_out = true;
            result = result.with_warning("path enumeration ran out of time; the list is partial");
        }
    }
    result
}
