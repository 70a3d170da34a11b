//! Degree ranking. A node is a hub when its degree exceeds
//! `hub_degree_multiplier × mean degree`.
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisContext, AnalysisResult, AnalyzerKind, Deadline, Payload};
use crate::net::{ArcDirection, Idx, Net};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Place,
    Transition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDegree {
    pub id: String,
    pub kind: NodeKind,
    pub in_degree: usize,
    pub out_degree: usize,
    pub degree: usize,
    pub is_hub: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubReport {
    /// Every node, highest degree first.
    pub ranking: Vec<NodeDegree>,
    pub mean_degree: f64,
    pub threshold: f64,
    pub hubs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedOut;

pub fn degrees(net: &Net, multiplier: f64, deadline: Deadline) -> Result<HubReport, TimedOut> {
    let mut place_io = vec![(0usize, 0usize); net.places_len()];
    let mut transition_io = vec![(0usize, 0usize); net.transitions_len()];
    for (i, arc) in net.arcs.iter().enumerate() {
        if i % 4096 == 0 && deadline.expired() {
            return Err(TimedOut);
        }
        let p = arc.place.index();
        let t = arc.transition.index();
        match arc.direction {
            ArcDirection::PlaceToTransition => {
                place_io[p].1 += 1;
                transition_io[t].0 += 1;
            }
            ArcDirection::TransitionToPlace => {
                transition_io[t].1 += 1;
                place_io[p].0 += 1;
            }
        }
    }

    let nodes = net.nodes_len();
    let mean_degree = if nodes == 0 {
        0.0
    } else {
        (2 * net.arcs.len()) as f64 / nodes as f64
    };
    let threshold = multiplier * mean_degree;

    let entry = |id: &str, kind, (in_degree, out_degree): (usize, usize)| {
        let degree = in_degree + out_degree;
        NodeDegree {
            id: id.to_string(),
            kind,
            in_degree,
            out_degree,
            degree,
            is_hub: degree as f64 > threshold,
        }
    };
    let mut ranking: Vec<NodeDegree> = net
        .places
        .iter()
        .zip(place_io)
        .map(|(place, io)| entry(&place.id, NodeKind::Place, io))
        .chain(
            net.transitions
                .iter()
                .zip(transition_io)
                .map(|(transition, io)| entry(&transition.id, NodeKind::Transition, io)),
        )
        .collect();
    if deadline.expired() {
        return Err(TimedOut);
    }
    ranking.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.id.cmp(&b.id)));
    let hubs = ranking
        .iter()
        .filter(|node| node.is_hub)
        .map(|node| node.id.clone())
        .collect();
    Ok(HubReport {
        ranking,
        mean_degree,
        threshold,
        hubs,
    })
}

pub fn analyze(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    let kind = AnalyzerKind::Hubs;
    if let Err(blocked) = ctx.admit(kind) {
        return blocked;
    }
    let report = match degrees(ctx.net, ctx.config.hub_degree_multiplier, deadline) {
        Ok(report) => report,
        Err(TimedOut) => return AnalysisResult::timed_out(kind, "degree ranking"),
    };
    log::info!(
        "{} hubs above degree {:.2}",
        report.hubs.len(),
        report.threshold
    );
    AnalysisResult::success(kind, Payload::Hubs(report))
}
