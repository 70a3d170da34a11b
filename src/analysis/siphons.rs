//! 虹吸（siphon）与陷阱（trap）的最小集枚举。
//!
//! A siphon `S` satisfies `•S ⊆ S•`: once empty it stays empty. A trap `Q`
//! satisfies `Q• ⊆ •Q`: once marked it stays marked. Candidate place sets are
//! packed into a `u64` and visited in order of increasing size, skipping every
//! superset of a set already found, so only minimal sets are reported.
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::analysis::{AnalysisContext, AnalysisResult, AnalyzerKind, Deadline, Payload};
use crate::config::SUBSET_ENUMERATION_LIMIT;
use crate::net::{Idx, Net, PlaceId};

type TransitionMask = SmallVec<[u64; 2]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetKind {
    Siphon,
    Trap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceSet {
    pub places: Vec<String>,
    pub initially_marked: bool,
    /// Siphons only: contains a trap that is marked initially.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_marked_trap: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceSetReport {
    pub kind: SetKind,
    pub sets: Vec<PlaceSet>,
    /// Siphons only: every minimal siphon contains an initially marked trap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commoner_holds: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration {
    pub sets: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnumerationError {
    #[error("time budget exceeded")]
    TimedOut,
    #[error("{places} places do not fit a {limit}-bit subset mask")]
    TooManyPlaces { places: usize, limit: usize },
}

/// `•p` and `p•` of every place as transition bit masks.
struct Neighbourhood {
    producers: Vec<TransitionMask>,
    consumers: Vec<TransitionMask>,
}

impl Neighbourhood {
    fn new(net: &Net) -> Self {
        let words = net.transitions_len().div_ceil(64).max(1);
        let mut producers = vec![SmallVec::from_elem(0u64, words); net.places_len()];
        let mut consumers = vec![SmallVec::from_elem(0u64, words); net.places_len()];
        for place in net.places.indices() {
            for t in net.producers(place) {
                producers[place.index()][t.index() / 64] |= 1 << (t.index() % 64);
            }
            for t in net.consumers(place) {
                consumers[place.index()][t.index() / 64] |= 1 << (t.index() % 64);
            }
        }
        Self {
            producers,
            consumers,
        }
    }

    fn union(masks: &[TransitionMask], set: u64) -> TransitionMask {
        let words = masks.first().map(|m| m.len()).unwrap_or(1);
        let mut out: TransitionMask = SmallVec::from_elem(0, words);
        let mut rest = set;
        while rest != 0 {
            let place = rest.trailing_zeros() as usize;
            rest &= rest - 1;
            for (word, bits) in out.iter_mut().zip(masks[place].iter()) {
                *word |= bits;
            }
        }
        out
    }

    fn included(small: &TransitionMask, large: &TransitionMask) -> bool {
        small.iter().zip(large.iter()).all(|(s, l)| s & !l == 0)
    }

    fn is_siphon(&self, set: u64) -> bool {
        Self::included(
            &Self::union(&self.producers, set),
            &Self::union(&self.consumers, set),
        )
    }

    fn is_trap(&self, set: u64) -> bool {
        Self::included(
            &Self::union(&self.consumers, set),
            &Self::union(&self.producers, set),
        )
    }

    /// Largest trap contained in `set`: repeatedly drop places with an output
    /// transition that puts nothing back into the set.
    fn maximal_trap(&self, set: u64) -> u64 {
        let mut current = set;
        loop {
            let producers = Self::union(&self.producers, current);
            let mut next = current;
            let mut rest = current;
            while rest != 0 {
                let place = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                if !Self::included(&self.consumers[place], &producers) {
                    next &= !(1u64 << place);
                }
            }
            if next == current {
                return current;
            }
            current = next;
        }
    }
}

/// Minimal place sets of the given kind, sizes ascending.
pub fn enumerate(
    net: &Net,
    kind: SetKind,
    deadline: Deadline,
) -> Result<Enumeration, EnumerationError> {
    let places = net.places_len();
    if places > SUBSET_ENUMERATION_LIMIT {
        return Err(EnumerationError::TooManyPlaces {
            places,
            limit: SUBSET_ENUMERATION_LIMIT,
        });
    }
    let neighbourhood = Neighbourhood::new(net);
    let mut found: Vec<u64> = Vec::new();
    let mut visited: u64 = 0;

    for size in 1..=places {
        let mut set: u64 = (1u64 << size) - 1;
        let end: u64 = 1u64 << places;
        while set < end {
            visited += 1;
            if visited % 4096 == 0 && deadline.expired() {
                return Err(EnumerationError::TimedOut);
            }
            if !found.iter().any(|minimal| set & minimal == *minimal) {
                let closed = match kind {
                    SetKind::Siphon => neighbourhood.is_siphon(set),
                    SetKind::Trap => neighbourhood.is_trap(set),
                };
                if closed {
                    found.push(set);
                }
            }
            // next subset with the same popcount
            let lowest = set & set.wrapping_neg();
            let ripple = set + lowest;
            set = (((ripple ^ set) >> 2) / lowest) | ripple;
        }
    }
    Ok(Enumeration { sets: found })
}

fn members(set: u64) -> impl Iterator<Item = PlaceId> {
    (0..64usize)
        .filter(move |i| set & (1u64 << i) != 0)
        .map(PlaceId::from_usize)
}

fn is_marked(net: &Net, set: u64) -> bool {
    members(set).any(|p| net.places[p].tokens > 0)
}

fn to_place_set(net: &Net, set: u64, contains_marked_trap: Option<bool>) -> PlaceSet {
    let mut places: Vec<String> = members(set).map(|p| net.places[p].id.clone()).collect();
    places.sort();
    PlaceSet {
        places,
        initially_marked: is_marked(net, set),
        contains_marked_trap,
    }
}

fn build_report(net: &Net, kind: SetKind, enumeration: &Enumeration) -> PlaceSetReport {
    let neighbourhood = Neighbourhood::new(net);
    let mut sets: Vec<PlaceSet> = enumeration
        .sets
        .iter()
        .map(|&set| {
            let marked_trap = (kind == SetKind::Siphon).then(|| {
                let trap = neighbourhood.maximal_trap(set);
                trap != 0 && is_marked(net, trap)
            });
            to_place_set(net, set, marked_trap)
        })
        .collect();
    sets.sort_by(|a, b| {
        a.places
            .len()
            .cmp(&b.places.len())
            .then_with(|| a.places.cmp(&b.places))
    });
    let commoner_holds = (kind == SetKind::Siphon)
        .then(|| sets.iter().all(|s| s.contains_marked_trap == Some(true)));
    PlaceSetReport {
        kind,
        sets,
        commoner_holds,
    }
}

fn run(ctx: &AnalysisContext<'_>, deadline: Deadline, kind: SetKind) -> AnalysisResult {
    let analyzer = match kind {
        SetKind::Siphon => AnalyzerKind::Siphons,
        SetKind::Trap => AnalyzerKind::Traps,
    };
    if let Err(blocked) = ctx.admit(analyzer) {
        return blocked;
    }
    let net = ctx.net;
    let enumeration = match enumerate(net, kind, deadline) {
        Ok(enumeration) => enumeration,
        Err(EnumerationError::TimedOut) => {
            return AnalysisResult::timed_out(analyzer, "subset enumeration");
        }
        Err(err @ EnumerationError::TooManyPlaces { .. }) => {
            return AnalysisResult::failed(analyzer, format!("subset enumeration refused: {err}"));
        }
    };
    let report = build_report(net, kind, &enumeration);
    log::info!("found {} minimal {:?} sets", report.sets.len(), kind);

    let unmarked = report.sets.iter().filter(|s| !s.initially_marked).count();
    let mut result = AnalysisResult::success(analyzer, Payload::PlaceSets(report));
    if kind == SetKind::Siphon && unmarked > 0 {
        result = result.with_warning(format!(
            "{unmarked} minimal siphon(s) are empty initially; their output transitions can never fire"
        ));
    }
    result
}

pub fn analyze_siphons(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    run(ctx, deadline, SetKind::Siphon)
}

pub fn analyze_traps(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    run(ctx, deadline, SetKind::Trap)
}
