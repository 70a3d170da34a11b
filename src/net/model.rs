//! 外部网描述（字符串标识）及其校验，转换为内部索引化的 [`Net`]。
//!
//! Hosts hand the engine a [`NetModel`]: places, transitions and arcs named by
//! string identifiers, exactly as they are stored in project files. Every
//! analyzer works on the validated [`Net`] produced by [`Net::from_model`].
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::net::core::Net;
use crate::net::ids::{PlaceId, TransitionId};
use crate::net::structure::{ArcDirection, ArcKind, Place, Transition, TransitionKind, Weight};

#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    DuplicateId(String),
    MissingEndpoint { arc: usize, id: String },
    SameKindEndpoints {
        arc: usize,
        source: String,
        target: String,
    },
    InvalidWeight { arc: usize, weight: i64 },
    SpecialArcDirection { arc: usize, kind: ArcKind },
    InvalidMarking { place: String, tokens: f64 },
    CapacityExceeded {
        place: String,
        tokens: Weight,
        capacity: Weight,
    },
    UnknownSnapshotPlace(String),
}

// Display is written by hand: `thiserror` would treat the `source` field of
// `SameKindEndpoints` as the error source, which a `String` cannot be.
impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::DuplicateId(id) => write!(f, "duplicate element id `{id}`"),
            ModelError::MissingEndpoint { arc, id } => {
                write!(f, "arc #{arc} references unknown element `{id}`")
            }
            ModelError::SameKindEndpoints { arc, source, target } => write!(
                f,
                "arc #{arc} connects `{source}` and `{target}`, which are of the same kind"
            ),
            ModelError::InvalidWeight { arc, weight } => {
                write!(f, "arc #{arc} has weight {weight}; weights must be at least 1")
            }
            ModelError::SpecialArcDirection { arc, kind } => {
                write!(f, "{kind:?} arc #{arc} must lead from a place to a transition")
            }
            ModelError::InvalidMarking { place, tokens } => write!(
                f,
                "place `{place}` has an invalid marking {tokens}: token counts must be non-negative integers"
            ),
            ModelError::CapacityExceeded { place, tokens, capacity } => write!(
                f,
                "place `{place}` holds {tokens} token(s) but its capacity is {capacity}"
            ),
            ModelError::UnknownSnapshotPlace(id) => {
                write!(f, "snapshot references unknown place `{id}`")
            }
        }
    }
}

impl std::error::Error for ModelError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tokens: f64,
    #[serde(default)]
    pub capacity: Option<Weight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: TransitionKind,
    #[serde(default)]
    pub guard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcSpec {
    pub source: String,
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default)]
    pub kind: ArcKind,
}

fn default_weight() -> i64 {
    1
}

/// Static net description as supplied by the host application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetModel {
    /// Display name of the model; not part of the content hash.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub places: Vec<PlaceSpec>,
    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,
    #[serde(default)]
    pub arcs: Vec<ArcSpec>,
}

/// Marking captured from a running simulation; replaces the initial marking
/// of the listed places for behavioral analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub marking: BTreeMap<String, f64>,
}

impl NetModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn place(mut self, id: &str, tokens: f64) -> Self {
        self.places.push(PlaceSpec {
            id: id.to_string(),
            name: None,
            tokens,
            capacity: None,
        });
        self
    }

    /// Caps the place declared last under `id`.
    pub fn capacity(mut self, place: &str, capacity: Weight) -> Self {
        if let Some(spec) = self.places.iter_mut().rev().find(|p| p.id == place) {
            spec.capacity = Some(capacity);
        }
        self
    }

    pub fn transition(mut self, id: &str) -> Self {
        self.transitions.push(TransitionSpec {
            id: id.to_string(),
            name: None,
            kind: TransitionKind::default(),
            guard: None,
        });
        self
    }

    pub fn arc(self, source: &str, target: &str) -> Self {
        self.weighted_arc(source, target, 1, ArcKind::Normal)
    }

    pub fn weighted_arc(mut self, source: &str, target: &str, weight: i64, kind: ArcKind) -> Self {
        self.arcs.push(ArcSpec {
            source: source.to_string(),
            target: target.to_string(),
            weight,
            kind,
        });
        self
    }

    pub fn arc_count(&self) -> usize {
        self.arcs.len()
    }

    /// Sum of initial tokens, ignoring malformed entries.
    pub fn token_count(&self) -> u64 {
        self.places
            .iter()
            .filter_map(|p| tokens_from_f64(&p.id, p.tokens).ok())
            .fold(0, u64::saturating_add)
    }
}

fn tokens_from_f64(place: &str, tokens: f64) -> Result<Weight, ModelError> {
    if !tokens.is_finite() || tokens < 0.0 || tokens.fract() != 0.0 || tokens > u64::MAX as f64 {
        return Err(ModelError::InvalidMarking {
            place: place.to_string(),
            tokens,
        });
    }
    Ok(tokens as Weight)
}

fn check_capacity(place: &Place) -> Result<(), ModelError> {
    match place.capacity {
        Some(capacity) if place.tokens > capacity => Err(ModelError::CapacityExceeded {
            place: place.id.clone(),
            tokens: place.tokens,
            capacity,
        }),
        _ => Ok(()),
    }
}

enum Endpoint {
    Place(PlaceId),
    Transition(TransitionId),
}

impl Net {
    pub fn from_model(model: &NetModel) -> Result<Self, ModelError> {
        Self::from_model_with_snapshot(model, None)
    }

    pub fn from_model_with_snapshot(
        model: &NetModel,
        snapshot: Option<&Snapshot>,
    ) -> Result<Self, ModelError> {
        let mut net = Net::empty();
        let mut index: FxHashMap<&str, Endpoint> = FxHashMap::default();

        for spec in &model.places {
            let tokens = tokens_from_f64(&spec.id, spec.tokens)?;
            let place = Place {
                id: spec.id.clone(),
                name: spec.name.clone().unwrap_or_else(|| spec.id.clone()),
                tokens,
                capacity: spec.capacity,
            };
            check_capacity(&place)?;
            let pid = net.add_place(place);
            if index.insert(spec.id.as_str(), Endpoint::Place(pid)).is_some() {
                return Err(ModelError::DuplicateId(spec.id.clone()));
            }
        }

        for spec in &model.transitions {
            let transition = Transition {
                id: spec.id.clone(),
                name: spec.name.clone().unwrap_or_else(|| spec.id.clone()),
                kind: spec.kind,
                guard: spec.guard.clone(),
            };
            let tid = net.add_transition(transition);
            if index
                .insert(spec.id.as_str(), Endpoint::Transition(tid))
                .is_some()
            {
                return Err(ModelError::DuplicateId(spec.id.clone()));
            }
        }

        for (arc_idx, spec) in model.arcs.iter().enumerate() {
            if spec.weight < 1 {
                return Err(ModelError::InvalidWeight {
                    arc: arc_idx,
                    weight: spec.weight,
                });
            }
            let weight = spec.weight as Weight;
            let source = index
                .get(spec.source.as_str())
                .ok_or_else(|| ModelError::MissingEndpoint {
                    arc: arc_idx,
                    id: spec.source.clone(),
                })?;
            let target = index
                .get(spec.target.as_str())
                .ok_or_else(|| ModelError::MissingEndpoint {
                    arc: arc_idx,
                    id: spec.target.clone(),
                })?;

            match (source, target) {
                (Endpoint::Place(p), Endpoint::Transition(t)) => {
                    net.add_arc(*p, *t, weight, ArcDirection::PlaceToTransition, spec.kind);
                }
                (Endpoint::Transition(t), Endpoint::Place(p)) => {
                    if spec.kind != ArcKind::Normal {
                        return Err(ModelError::SpecialArcDirection {
                            arc: arc_idx,
                            kind: spec.kind,
                        });
                    }
                    net.add_arc(*p, *t, weight, ArcDirection::TransitionToPlace, spec.kind);
                }
                _ => {
                    return Err(ModelError::SameKindEndpoints {
                        arc: arc_idx,
                        source: spec.source.clone(),
                        target: spec.target.clone(),
                    });
                }
            }
        }

        if let Some(snapshot) = snapshot {
            for (place_id, tokens) in &snapshot.marking {
                let Some(Endpoint::Place(pid)) = index.get(place_id.as_str()) else {
                    return Err(ModelError::UnknownSnapshotPlace(place_id.clone()));
                };
                net.places[*pid].tokens = tokens_from_f64(place_id, *tokens)?;
                check_capacity(&net.places[*pid])?;
            }
        }

        Ok(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_net_from_valid_model() {
        let model = NetModel::new("m")
            .place("p1", 1.0)
            .place("p2", 0.0)
            .transition("t1")
            .arc("p1", "t1")
            .arc("t1", "p2");
        let net = Net::from_model(&model).unwrap();
        assert_eq!(net.places_len(), 2);
        assert_eq!(net.transitions_len(), 1);
        assert_eq!(net.arcs.len(), 2);
        assert_eq!(net.place_index("p2"), Some(PlaceId::new(1)));
    }

    #[test]
    fn rejects_missing_endpoint() {
        let model = NetModel::new("m").place("p1", 1.0).arc("p1", "t9");
        assert_eq!(
            Net::from_model(&model).unwrap_err(),
            ModelError::MissingEndpoint {
                arc: 0,
                id: "t9".into()
            }
        );
    }

    #[test]
    fn rejects_bad_weight_kind_and_marking() {
        let base = NetModel::new("m").place("p1", 1.0).transition("t1");
        let zero = base.clone().weighted_arc("p1", "t1", 0, ArcKind::Normal);
        assert!(matches!(
            Net::from_model(&zero),
            Err(ModelError::InvalidWeight { weight: 0, .. })
        ));

        let same = base.clone().place("p2", 0.0).arc("p1", "p2");
        assert!(matches!(
            Net::from_model(&same),
            Err(ModelError::SameKindEndpoints { .. })
        ));

        let reset_out = base.clone().weighted_arc("t1", "p1", 1, ArcKind::Reset);
        assert!(matches!(
            Net::from_model(&reset_out),
            Err(ModelError::SpecialArcDirection { .. })
        ));

        let fractional = NetModel::new("m").place("p1", 0.5);
        assert!(matches!(
            Net::from_model(&fractional),
            Err(ModelError::InvalidMarking { .. })
        ));

        let dup = NetModel::new("m").place("x", 0.0).transition("x");
        assert_eq!(
            Net::from_model(&dup).unwrap_err(),
            ModelError::DuplicateId("x".into())
        );
    }

    #[test]
    fn snapshot_overrides_initial_marking() {
        let model = NetModel::new("m").place("p1", 1.0).place("p2", 0.0);
        let snapshot = Snapshot {
            marking: BTreeMap::from([("p2".to_string(), 3.0)]),
        };
        let net = Net::from_model_with_snapshot(&model, Some(&snapshot)).unwrap();
        assert_eq!(net.initial_marking().tokens(PlaceId::new(1)), 3);

        let bad = Snapshot {
            marking: BTreeMap::from([("zz".to_string(), 1.0)]),
        };
        assert!(Net::from_model_with_snapshot(&model, Some(&bad)).is_err());
    }

    #[test]
    fn rejects_marking_above_capacity() {
        let model = NetModel::new("m").place("p", 3.0).capacity("p", 1);
        assert_eq!(
            Net::from_model(&model).unwrap_err(),
            ModelError::CapacityExceeded {
                place: "p".into(),
                tokens: 3,
                capacity: 1
            }
        );
        let at_capacity = NetModel::new("m").place("p", 1.0).capacity("p", 1);
        assert!(Net::from_model(&at_capacity).is_ok());
    }

    #[test]
    fn rejects_snapshot_above_capacity() {
        let model = NetModel::new("m").place("p", 0.0).capacity("p", 2);
        let snapshot = Snapshot {
            marking: BTreeMap::from([("p".to_string(), 5.0)]),
        };
        assert_eq!(
            Net::from_model_with_snapshot(&model, Some(&snapshot)).unwrap_err(),
            ModelError::CapacityExceeded {
                place: "p".into(),
                tokens: 5,
                capacity: 2
            }
        );
    }

    #[test]
    fn token_count_sums_valid_markings() {
        let model = NetModel::new("m")
            .place("a", 2.0)
            .place("b", 0.5)
            .place("c", 3.0);
        assert_eq!(model.token_count(), 5);
    }
}
