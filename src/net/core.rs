//! 运行时：可发生判定与发生语义。
//!
//! 迁移 `t` 在标识 `M` 下可发生当且仅当：
//! * 对每条普通输入弧 `(p, t)`：`M[p] ≥ Pre[p, t]`；
//! * 对每条抑制弧 `(p, t)`：`M[p] < θ[p, t]`；
//! * 发生后的标识不超过任何库所的容量。
//!
//! 发生语义：先扣除 `Pre`，再将复位弧所连库所清零，最后加上 `Post`。
use thiserror::Error;

use crate::net::ids::{NodeId, PlaceId, TransitionId};
use crate::net::incidence::{Incidence, IncidenceBool};
use crate::net::index_vec::{Idx, IndexVec};
use crate::net::structure::{Arc, ArcDirection, ArcKind, Marking, Place, Transition, Weight};

#[derive(Debug, Error)]
pub enum FireError {
    #[error("transition {0:?} is out of bounds")]
    OutOfBounds(TransitionId),
    #[error("transition {0:?} is not enabled under the supplied marking")]
    NotEnabled(TransitionId),
    #[error("capacity exceeded at place {place:?}: {after} > {capacity}")]
    Capacity {
        place: PlaceId,
        after: Weight,
        capacity: Weight,
    },
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Net {
    pub places: IndexVec<PlaceId, Place>,
    pub transitions: IndexVec<TransitionId, Transition>,
    pub arcs: Vec<Arc>,
    /// Normal input weights.
    pub pre: Incidence<u64>,
    /// Normal output weights.
    pub post: Incidence<u64>,
    /// Inhibitor thresholds; `0` means no inhibitor arc.
    pub inhibitor: Incidence<u64>,
    pub reset: IncidenceBool,
}

impl Net {
    pub fn empty() -> Self {
        Self {
            places: IndexVec::new(),
            transitions: IndexVec::new(),
            arcs: Vec::new(),
            pre: Incidence::new(0, 0),
            post: Incidence::new(0, 0),
            inhibitor: Incidence::new(0, 0),
            reset: IncidenceBool::new(0, 0),
        }
    }

    pub fn add_place(&mut self, place: Place) -> PlaceId {
        let place_id = self.places.push(place);
        self.pre.push_place();
        self.post.push_place();
        self.inhibitor.push_place();
        self.reset.push_place();
        place_id
    }

    pub fn add_transition(&mut self, transition: Transition) -> TransitionId {
        let transition_id = self.transitions.push(transition);
        self.pre.push_transition();
        self.post.push_transition();
        self.inhibitor.push_transition();
        self.reset.push_transition();
        transition_id
    }

    pub fn add_arc(
        &mut self,
        place: PlaceId,
        transition: TransitionId,
        weight: Weight,
        direction: ArcDirection,
        kind: ArcKind,
    ) {
        if weight == 0 {
            return;
        }
        match (direction, kind) {
            (ArcDirection::PlaceToTransition, ArcKind::Normal) => {
                self.pre.add_weight(place, transition, weight)
            }
            (ArcDirection::TransitionToPlace, _) => {
                self.post.add_weight(place, transition, weight)
            }
            (ArcDirection::PlaceToTransition, ArcKind::Inhibitor) => {
                // parallel inhibitor arcs: the lowest threshold wins
                self.inhibitor.update(place, transition, |current| {
                    if current == 0 { weight } else { current.min(weight) }
                });
            }
            (ArcDirection::PlaceToTransition, ArcKind::Reset) => {
                self.reset.set(place, transition, true)
            }
        }
        self.arcs
            .push(Arc::new(place, transition, weight, direction, kind));
    }

    /// 输入弧: place -> transition
    pub fn add_input_arc(&mut self, place: PlaceId, transition: TransitionId, weight: Weight) {
        self.add_arc(
            place,
            transition,
            weight,
            ArcDirection::PlaceToTransition,
            ArcKind::Normal,
        );
    }

    /// 输出弧: transition -> place
    pub fn add_output_arc(&mut self, place: PlaceId, transition: TransitionId, weight: Weight) {
        self.add_arc(
            place,
            transition,
            weight,
            ArcDirection::TransitionToPlace,
            ArcKind::Normal,
        );
    }

    pub fn places_len(&self) -> usize {
        self.places.len()
    }

    pub fn transitions_len(&self) -> usize {
        self.transitions.len()
    }

    pub fn nodes_len(&self) -> usize {
        self.places_len() + self.transitions_len()
    }

    pub fn place_index(&self, id: &str) -> Option<PlaceId> {
        self.places
            .iter_enumerated()
            .find(|(_, place)| place.id == id)
            .map(|(pid, _)| pid)
    }

    pub fn transition_index(&self, id: &str) -> Option<TransitionId> {
        self.transitions
            .iter_enumerated()
            .find(|(_, transition)| transition.id == id)
            .map(|(tid, _)| tid)
    }

    pub fn node_label(&self, node: NodeId) -> &str {
        match node {
            NodeId::Place(p) => &self.places[p].id,
            NodeId::Transition(t) => &self.transitions[t].id,
        }
    }

    pub fn initial_marking(&self) -> Marking {
        Marking(IndexVec::from(
            self.places.iter().map(|p| p.tokens).collect::<Vec<_>>(),
        ))
    }

    /// Incidence matrix `C = Post - Pre` over normal arcs.
    pub fn c_matrix(&self) -> Incidence<i64> {
        self.post.difference(&self.pre)
    }

    pub fn has_inhibitor_arcs(&self) -> bool {
        self.arcs.iter().any(|arc| arc.kind == ArcKind::Inhibitor)
    }

    pub fn has_reset_arcs(&self) -> bool {
        self.reset.any(|reset| *reset)
    }

    pub fn has_capacities(&self) -> bool {
        self.places.iter().any(|p| p.capacity.is_some())
    }

    /// Firing is monotone in the marking: `M ≤ M'` and `t` enabled at `M`
    /// implies `t` enabled at `M'` with the same token effect.
    pub fn is_monotone(&self) -> bool {
        !self.has_inhibitor_arcs() && !self.has_reset_arcs() && !self.has_capacities()
    }

    pub fn has_guards(&self) -> bool {
        self.transitions.iter().any(|t| t.guard.is_some())
    }

    /// `•t`: places feeding `transition` through normal arcs.
    pub fn input_places(&self, transition: TransitionId) -> impl Iterator<Item = PlaceId> + '_ {
        self.pre
            .column(transition)
            .filter(|(_, w)| *w > 0)
            .map(|(p, _)| p)
    }

    /// `t•`: places fed by `transition`.
    pub fn output_places(&self, transition: TransitionId) -> impl Iterator<Item = PlaceId> + '_ {
        self.post
            .column(transition)
            .filter(|(_, w)| *w > 0)
            .map(|(p, _)| p)
    }

    /// `•p`: transitions that put tokens into `place`.
    pub fn producers(&self, place: PlaceId) -> impl Iterator<Item = TransitionId> + '_ {
        self.post
            .row(place)
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0)
            .map(|(t, _)| TransitionId::from_usize(t))
    }

    /// `p•`: transitions that take tokens from `place`.
    pub fn consumers(&self, place: PlaceId) -> impl Iterator<Item = TransitionId> + '_ {
        self.pre
            .row(place)
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0)
            .map(|(t, _)| TransitionId::from_usize(t))
    }

    /// Directed successors of `node` in the drawn graph, every arc kind included.
    pub fn successors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .arcs
            .iter()
            .filter_map(|arc| match (node, arc.direction) {
                (NodeId::Place(p), ArcDirection::PlaceToTransition) if arc.place == p => {
                    Some(NodeId::Transition(arc.transition))
                }
                (NodeId::Transition(t), ArcDirection::TransitionToPlace)
                    if arc.transition == t =>
                {
                    Some(NodeId::Place(arc.place))
                }
                _ => None,
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Dense adjacency list (places first) of the drawn graph.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let places = self.places_len();
        let mut adjacency = vec![Vec::new(); self.nodes_len()];
        for arc in &self.arcs {
            let p = NodeId::Place(arc.place).dense(places);
            let t = NodeId::Transition(arc.transition).dense(places);
            match arc.direction {
                ArcDirection::PlaceToTransition => adjacency[p].push(t),
                ArcDirection::TransitionToPlace => adjacency[t].push(p),
            }
        }
        for targets in adjacency.iter_mut() {
            targets.sort_unstable();
            targets.dedup();
        }
        adjacency
    }

    pub fn enabled_transitions(&self, marking: &Marking) -> Vec<TransitionId> {
        self.transitions
            .indices()
            .filter(|&transition| self.is_transition_enabled(transition, marking))
            .collect()
    }

    pub fn fire_transition(
        &self,
        marking: &Marking,
        transition: TransitionId,
    ) -> Result<Marking, FireError> {
        if transition.index() >= self.transitions_len() {
            return Err(FireError::OutOfBounds(transition));
        }
        if !self.tokens_allow(transition, marking) {
            return Err(FireError::NotEnabled(transition));
        }

        let mut next = marking.clone();
        for place in self.places.indices() {
            let weight = self.pre.get(place, transition);
            if weight > 0 {
                let tokens = next.tokens_mut(place);
                *tokens = tokens.saturating_sub(weight);
            }
            if self.reset.get(place, transition) {
                *next.tokens_mut(place) = 0;
            }
            let weight = self.post.get(place, transition);
            if weight > 0 {
                let tokens = next.tokens_mut(place);
                let after = tokens.saturating_add(weight);
                if let Some(capacity) = self.places[place].capacity {
                    if after > capacity {
                        return Err(FireError::Capacity {
                            place,
                            after,
                            capacity,
                        });
                    }
                }
                *tokens = after;
            }
        }
        Ok(next)
    }

    pub fn is_transition_enabled(&self, transition: TransitionId, marking: &Marking) -> bool {
        self.fire_transition(marking, transition).is_ok()
    }

    fn tokens_allow(&self, transition: TransitionId, marking: &Marking) -> bool {
        if transition.index() >= self.transitions_len() {
            return false;
        }
        for place in self.places.indices() {
            let tokens = marking.tokens(place);
            if tokens < self.pre.get(place, transition) {
                return false;
            }
            let threshold = self.inhibitor.get(place, transition);
            if threshold > 0 && tokens >= threshold {
                return false;
            }
        }
        true
    }
}

impl Default for Net {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Net, PlaceId, PlaceId, TransitionId) {
        let mut net = Net::empty();
        let p0 = net.add_place(Place::new("p0", 1));
        let p1 = net.add_place(Place::new("p1", 0));
        let t0 = net.add_transition(Transition::new("t0"));
        net.add_input_arc(p0, t0, 1);
        net.add_output_arc(p1, t0, 1);
        (net, p0, p1, t0)
    }

    #[test]
    fn fire_moves_token() {
        let (net, p0, p1, t0) = chain();
        let marking = net.initial_marking();
        assert_eq!(net.enabled_transitions(&marking), vec![t0]);
        let next = net.fire_transition(&marking, t0).unwrap();
        assert_eq!(next.tokens(p0), 0);
        assert_eq!(next.tokens(p1), 1);
        assert!(net.enabled_transitions(&next).is_empty());
        assert!(matches!(
            net.fire_transition(&next, t0),
            Err(FireError::NotEnabled(_))
        ));
    }

    #[test]
    fn inhibitor_blocks_when_threshold_reached() {
        let (mut net, _, p1, t0) = chain();
        net.add_arc(
            p1,
            t0,
            1,
            ArcDirection::PlaceToTransition,
            ArcKind::Inhibitor,
        );
        let mut marking = net.initial_marking();
        assert!(net.is_transition_enabled(t0, &marking));
        *marking.tokens_mut(p1) = 1;
        assert!(!net.is_transition_enabled(t0, &marking));
        assert_eq!(net.pre.get(p1, t0), 0);
        assert!(!net.is_monotone());
    }

    #[test]
    fn reset_empties_place_and_capacity_disables() {
        let mut net = Net::empty();
        let src = net.add_place(Place::new("src", 1));
        let bag = net.add_place(Place::new("bag", 5));
        let out = net.add_place(Place::new("out", 1).with_capacity(1));
        let t = net.add_transition(Transition::new("t"));
        net.add_input_arc(src, t, 1);
        net.add_arc(bag, t, 1, ArcDirection::PlaceToTransition, ArcKind::Reset);
        net.add_output_arc(out, t, 1);

        let marking = net.initial_marking();
        assert!(!net.is_transition_enabled(t, &marking));

        let mut relaxed = marking.clone();
        *relaxed.tokens_mut(out) = 0;
        let next = net.fire_transition(&relaxed, t).unwrap();
        assert_eq!(next.tokens(bag), 0);
        assert_eq!(next.tokens(out), 1);
    }

    #[test]
    fn adjacency_follows_arc_direction() {
        let (net, p0, p1, t0) = chain();
        let adjacency = net.adjacency();
        let places = net.places_len();
        assert_eq!(
            adjacency[p0.index()],
            vec![NodeId::Transition(t0).dense(places)]
        );
        assert!(adjacency[p1.index()].is_empty());
        assert_eq!(
            net.successors(NodeId::Transition(t0)),
            vec![NodeId::Place(p1)]
        );
        assert_eq!(net.producers(p1).collect::<Vec<_>>(), vec![t0]);
        assert_eq!(net.consumers(p0).collect::<Vec<_>>(), vec![t0]);
    }
}
