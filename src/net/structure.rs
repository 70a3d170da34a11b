//! P/T 网静态结构元素：库所、迁移、弧与标识。
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::index_vec::IndexVec;

pub type Weight = u64;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Debug)]
pub struct Place {
    /// Stable identifier, unique across the net.
    pub id: String,
    pub name: String,
    pub tokens: Weight,
    pub capacity: Option<Weight>,
}

impl Place {
    pub fn new(id: impl Into<String>, tokens: Weight) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            tokens,
            capacity: None,
        }
    }

    pub fn with_capacity(mut self, capacity: Weight) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

/// Firing discipline. Structural analysis ignores it; enablement is the same
/// for every kind.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    #[default]
    Immediate,
    Timed,
    Stochastic,
    Continuous,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Transition {
    pub id: String,
    pub name: String,
    pub kind: TransitionKind,
    /// Carried verbatim; never evaluated by the analyzers.
    pub guard: Option<String>,
}

impl Transition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind: TransitionKind::Immediate,
            guard: None,
        }
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transition").field(&self.id).finish()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArcKind {
    #[default]
    Normal,
    /// Transition enabled only while the place holds fewer tokens than the weight.
    Inhibitor,
    /// Place emptied when the transition fires.
    Reset,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ArcDirection {
    PlaceToTransition,
    TransitionToPlace,
}

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Arc {
    pub place: PlaceId,
    pub transition: TransitionId,
    pub weight: Weight,
    pub direction: ArcDirection,
    pub kind: ArcKind,
}

impl Arc {
    pub fn new(
        place: PlaceId,
        transition: TransitionId,
        weight: Weight,
        direction: ArcDirection,
        kind: ArcKind,
    ) -> Self {
        Self {
            place,
            transition,
            weight,
            direction,
            kind,
        }
    }
}

impl fmt::Debug for Arc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arc")
            .field("place", &self.place)
            .field("transition", &self.transition)
            .field("weight", &self.weight)
            .field("direction", &self.direction)
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Marking(pub IndexVec<PlaceId, Weight>);

impl Marking {
    pub fn new(initial: IndexVec<PlaceId, Weight>) -> Self {
        Self(initial)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlaceId, &Weight)> {
        self.0.iter_enumerated()
    }

    pub fn tokens(&self, place: PlaceId) -> Weight {
        self.0[place]
    }

    pub fn tokens_mut(&mut self, place: PlaceId) -> &mut Weight {
        &mut self.0[place]
    }

    pub fn total(&self) -> Weight {
        self.0.iter().fold(0, |acc, t| acc.saturating_add(*t))
    }

    /// `self >= other` component-wise with at least one strict component.
    pub fn strictly_covers(&self, other: &Marking) -> bool {
        matches!(self.partial_cmp(other), Some(Ordering::Greater))
    }
}

impl fmt::Debug for Marking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (place, tokens) in self.iter() {
            map.entry(&place, tokens);
        }
        map.finish()
    }
}

impl PartialOrd for Marking {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.len() != other.len() {
            return None;
        }
        let mut less = false;
        let mut greater = false;
        for (idx, left) in self.0.iter_enumerated() {
            let right = other.0[idx];
            if *left < right {
                less = true;
            } else if *left > right {
                greater = true;
            }
        }
        match (less, greater) {
            (true, true) => None,
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => Some(Ordering::Equal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covering_is_strict_and_partial() {
        let a = Marking::new(IndexVec::from(vec![1, 2]));
        let b = Marking::new(IndexVec::from(vec![1, 1]));
        let c = Marking::new(IndexVec::from(vec![0, 3]));
        assert!(a.strictly_covers(&b));
        assert!(!b.strictly_covers(&a));
        assert!(!a.strictly_covers(&a));
        assert!(!a.strictly_covers(&c));
        assert_eq!(a.total(), 3);
    }
}
