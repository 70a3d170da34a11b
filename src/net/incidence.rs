//! 稠密弧权矩阵：行 = 库所，列 = 迁移，按行连续存放。
//!
//! `Pre`, `Post` and the inhibitor thresholds are `Incidence<u64>`, reset arcs
//! are `Incidence<bool>`. The net grows one place or transition at a time
//! while a model is loaded; after that the matrices are read-only.
use serde::{Deserialize, Serialize};

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::index_vec::Idx;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Incidence<T> {
    cells: Vec<T>,
    places: usize,
    transitions: usize,
}

pub type IncidenceBool = Incidence<bool>;

impl<T: Copy + Default> Incidence<T> {
    pub fn new(places: usize, transitions: usize) -> Self {
        Self {
            cells: vec![T::default(); places * transitions],
            places,
            transitions,
        }
    }

    pub fn places(&self) -> usize {
        self.places
    }

    pub fn transitions(&self) -> usize {
        self.transitions
    }

    pub fn push_place(&mut self) -> PlaceId {
        self.cells
            .extend(std::iter::repeat_n(T::default(), self.transitions));
        self.places += 1;
        PlaceId::from_usize(self.places - 1)
    }

    pub fn push_transition(&mut self) -> TransitionId {
        let width = self.transitions;
        let mut cells = Vec::with_capacity(self.places * (width + 1));
        for p in 0..self.places {
            let start = p * width;
            cells.extend_from_slice(&self.cells[start..start + width]);
            cells.push(T::default());
        }
        self.cells = cells;
        self.transitions += 1;
        TransitionId::from_usize(width)
    }

    fn offset(&self, place: PlaceId, transition: TransitionId) -> usize {
        place.index() * self.transitions + transition.index()
    }

    pub fn get(&self, place: PlaceId, transition: TransitionId) -> T {
        self.cells[self.offset(place, transition)]
    }

    pub fn set(&mut self, place: PlaceId, transition: TransitionId, value: T) {
        let at = self.offset(place, transition);
        self.cells[at] = value;
    }

    pub fn update(&mut self, place: PlaceId, transition: TransitionId, f: impl FnOnce(T) -> T) {
        let at = self.offset(place, transition);
        self.cells[at] = f(self.cells[at]);
    }

    /// Entries of `place` indexed by transition.
    pub fn row(&self, place: PlaceId) -> &[T] {
        let start = place.index() * self.transitions;
        &self.cells[start..start + self.transitions]
    }

    pub fn column(&self, transition: TransitionId) -> impl Iterator<Item = (PlaceId, T)> + '_ {
        (0..self.places).map(move |p| {
            let place = PlaceId::from_usize(p);
            (place, self.get(place, transition))
        })
    }

    pub fn any(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.cells.iter().any(pred)
    }
}

impl Incidence<u64> {
    pub fn add_weight(&mut self, place: PlaceId, transition: TransitionId, weight: u64) {
        self.update(place, transition, |w| w.saturating_add(weight));
    }

    /// `self - other` with signed entries; both matrices have the same shape.
    pub fn difference(&self, other: &Self) -> Incidence<i64> {
        debug_assert_eq!(
            (self.places, self.transitions),
            (other.places, other.transitions)
        );
        Incidence {
            cells: self
                .cells
                .iter()
                .zip(&other.cells)
                .map(|(l, r)| *l as i64 - *r as i64)
                .collect(),
            places: self.places,
            transitions: self.transitions,
        }
    }
}

impl Incidence<i64> {
    /// Place-major rows, one per place.
    pub fn to_rows(&self) -> Vec<Vec<i64>> {
        (0..self.places)
            .map(|p| self.row(PlaceId::from_usize(p)).to_vec())
            .collect()
    }

    /// Transition-major rows, one per transition.
    pub fn transposed(&self) -> Vec<Vec<i64>> {
        (0..self.transitions)
            .map(|t| {
                self.column(TransitionId::from_usize(t))
                    .map(|(_, value)| value)
                    .collect()
            })
            .collect()
    }
}
