//! 模型内容哈希与配置指纹。
//!
//! The hash covers structure and marking only. Element order and the model's
//! display name do not change it.
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::analysis::PathQuery;
use crate::config::AnalysisConfig;
use crate::net::{ArcKind, NetModel, Snapshot, TransitionKind, Weight};

#[derive(Serialize)]
struct CanonicalPlace<'a> {
    id: &'a str,
    tokens: f64,
    capacity: Option<Weight>,
}

#[derive(Serialize)]
struct CanonicalTransition<'a> {
    id: &'a str,
    kind: TransitionKind,
    guard: Option<&'a str>,
}

#[derive(Serialize, PartialEq, Eq, PartialOrd, Ord)]
struct CanonicalArc<'a> {
    source: &'a str,
    target: &'a str,
    kind: ArcKind,
    weight: i64,
}

#[derive(Serialize)]
struct CanonicalModel<'a> {
    places: Vec<CanonicalPlace<'a>>,
    transitions: Vec<CanonicalTransition<'a>>,
    arcs: Vec<CanonicalArc<'a>>,
    snapshot: Option<&'a Snapshot>,
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of the canonical model content, hex encoded.
pub fn content_hash(model: &NetModel, snapshot: Option<&Snapshot>) -> String {
    let mut places: Vec<CanonicalPlace<'_>> = model
        .places
        .iter()
        .map(|p| CanonicalPlace {
            id: &p.id,
            tokens: p.tokens,
            capacity: p.capacity,
        })
        .collect();
    places.sort_by(|a, b| a.id.cmp(b.id));

    let mut transitions: Vec<CanonicalTransition<'_>> = model
        .transitions
        .iter()
        .map(|t| CanonicalTransition {
            id: &t.id,
            kind: t.kind,
            guard: t.guard.as_deref(),
        })
        .collect();
    transitions.sort_by(|a, b| a.id.cmp(b.id));

    let mut arcs: Vec<CanonicalArc<'_>> = model
        .arcs
        .iter()
        .map(|a| CanonicalArc {
            source: &a.source,
            target: &a.target,
            kind: a.kind,
            weight: a.weight,
        })
        .collect();
    arcs.sort();

    let canonical = CanonicalModel {
        places,
        transitions,
        arcs,
        snapshot: snapshot.filter(|s| !s.marking.is_empty()),
    };
    // Plain structs and BTreeMaps only, serialization cannot fail.
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    digest(&bytes)
}

fn short_digest<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let mut fingerprint = digest(&bytes);
    fingerprint.truncate(16);
    fingerprint
}

/// Short fingerprint of the settings that influence analyzer output.
/// Batch settings are excluded.
pub fn config_fingerprint(config: &AnalysisConfig) -> String {
    short_digest(&(&config.guard, config.hub_degree_multiplier))
}

/// [`config_fingerprint`] extended with the request parameters that change
/// analyzer output: the path query and the host's state estimate.
///
/// The timeout is left out; a run that timed out is never stored, and a run
/// that finished does not depend on its budget.
pub fn session_fingerprint(
    config: &AnalysisConfig,
    path_query: Option<&PathQuery>,
    estimated_states: Option<u64>,
) -> String {
    if path_query.is_none() && estimated_states.is_none() {
        return config_fingerprint(config);
    }
    short_digest(&(
        &config.guard,
        config.hub_degree_multiplier,
        path_query,
        estimated_states,
    ))
}
