use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::index_vec::Idx;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl Idx for $name {
            fn index(self) -> usize {
                self.0 as usize
            }

            fn from_usize(idx: usize) -> Self {
                Self(idx as u32)
            }
        }
    };
}

define_id!(PlaceId, "p#");
define_id!(TransitionId, "t#");

/// A vertex of the bipartite place/transition graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum NodeId {
    Place(PlaceId),
    Transition(TransitionId),
}

impl NodeId {
    /// Dense index where places come first, then transitions.
    pub fn dense(self, places: usize) -> usize {
        match self {
            NodeId::Place(p) => p.index(),
            NodeId::Transition(t) => places + t.index(),
        }
    }

    pub fn from_dense(index: usize, places: usize) -> Self {
        if index < places {
            NodeId::Place(PlaceId::from_usize(index))
        } else {
            NodeId::Transition(TransitionId::from_usize(index - places))
        }
    }

    pub fn is_place(self) -> bool {
        matches!(self, NodeId::Place(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_index_round_trips_through_both_kinds() {
        let places = 3;
        let p = NodeId::Place(PlaceId::new(2));
        let t = NodeId::Transition(TransitionId::new(1));
        assert_eq!(p.dense(places), 2);
        assert_eq!(t.dense(places), 4);
        assert_eq!(NodeId::from_dense(4, places), t);
        assert!(NodeId::from_dense(0, places).is_place());
    }
}
