//! P/T 不变量：Farkas 算法求最小支撑非负半流。
//!
//! A P-invariant `y ≥ 0` satisfies `yᵀ·C = 0`, so the weighted token sum
//! `y·M` is the same in every reachable marking. A T-invariant `x ≥ 0`
//! satisfies `C·x = 0`: firing every transition `x[t]` times returns to the
//! starting marking. Both are computed on the incidence matrix of normal arcs
//! with arbitrary-precision integers.
use num::{BigInt, Integer, One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::{AnalysisContext, AnalysisResult, AnalyzerKind, Deadline, Payload};
use crate::net::{Idx, Net, PlaceId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantEntry {
    pub id: String,
    pub weight: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invariant {
    pub entries: Vec<InvariantEntry>,
    /// `2*p1 + p2 = 3`, P-invariants only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Weighted token sum under the initial marking, P-invariants only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_sum: Option<u64>,
}

impl Invariant {
    pub fn weight_of(&self, id: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.weight)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantReport {
    pub invariants: Vec<Invariant>,
    /// Fraction of elements in the support of at least one invariant.
    pub coverage: f64,
    pub uncovered: Vec<String>,
}

impl InvariantReport {
    pub fn fully_covered(&self) -> bool {
        self.uncovered.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FarkasError {
    #[error("{rows} intermediate rows, above the limit of {limit}")]
    RowLimit { rows: usize, limit: usize },
    #[error("time budget exceeded")]
    TimedOut,
    /// A minimal invariant has a weight beyond `u64` at this element index.
    #[error("weight of element #{element} does not fit in 64 bits")]
    Overflow { element: usize },
}

/// Minimal-support non-negative integer solutions `y` of `yᵀ·A = 0`, where
/// `matrix` has one row per element and one column per constraint.
pub fn farkas(
    matrix: &[Vec<i64>],
    constraints: usize,
    max_rows: usize,
    deadline: Deadline,
) -> Result<Vec<Vec<u64>>, FarkasError> {
    let elements = matrix.len();
    let mut rows: Vec<(Vec<BigInt>, Vec<BigInt>)> = matrix
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let coeffs = (0..constraints)
                .map(|j| BigInt::from(row.get(j).copied().unwrap_or(0)))
                .collect();
            let mut ident = vec![BigInt::zero(); elements];
            ident[i] = BigInt::one();
            (coeffs, ident)
        })
        .collect();

    for column in 0..constraints {
        if deadline.expired() {
            return Err(FarkasError::TimedOut);
        }
        let mut next = Vec::new();
        let mut positive = Vec::new();
        let mut negative = Vec::new();
        for row in rows {
            match row.0[column].sign() {
                num::bigint::Sign::NoSign => next.push(row),
                num::bigint::Sign::Plus => positive.push(row),
                num::bigint::Sign::Minus => negative.push(row),
            }
        }
        for (pos_coeffs, pos_ident) in &positive {
            for (neg_coeffs, neg_ident) in &negative {
                let a = neg_coeffs[column].abs();
                let b = pos_coeffs[column].clone();
                let coeffs: Vec<BigInt> = pos_coeffs
                    .iter()
                    .zip(neg_coeffs)
                    .map(|(p, n)| p * &a + n * &b)
                    .collect();
                let ident: Vec<BigInt> = pos_ident
                    .iter()
                    .zip(neg_ident)
                    .map(|(p, n)| p * &a + n * &b)
                    .collect();
                next.push(normalize(coeffs, ident));
            }
            if deadline.expired() {
                return Err(FarkasError::TimedOut);
            }
        }
        rows = minimize(next);
        if rows.len() > max_rows {
            return Err(FarkasError::RowLimit {
                rows: rows.len(),
                limit: max_rows,
            });
        }
    }

    let mut result: Vec<Vec<u64>> = rows
        .into_iter()
        .filter(|(_, ident)| ident.iter().any(|v| !v.is_zero()))
        .map(|(_, ident)| {
            ident
                .iter()
                .enumerate()
                .map(|(element, v)| v.to_u64().ok_or(FarkasError::Overflow { element }))
                .collect::<Result<Vec<u64>, _>>()
        })
        .collect::<Result<_, _>>()?;
    result.sort_by(|a, b| support(a).cmp(&support(b)).then_with(|| a.cmp(b)));
    result.dedup();
    Ok(result)
}

fn normalize(coeffs: Vec<BigInt>, ident: Vec<BigInt>) -> (Vec<BigInt>, Vec<BigInt>) {
    let divisor = coeffs
        .iter()
        .chain(ident.iter())
        .fold(BigInt::zero(), |acc, v| acc.gcd(v));
    if divisor.is_zero() || divisor.is_one() {
        return (coeffs, ident);
    }
    (
        coeffs.into_iter().map(|v| v / &divisor).collect(),
        ident.into_iter().map(|v| v / &divisor).collect(),
    )
}

fn support_of(ident: &[BigInt]) -> Vec<usize> {
    ident
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_zero())
        .map(|(i, _)| i)
        .collect()
}

fn support(vector: &[u64]) -> Vec<usize> {
    vector
        .iter()
        .enumerate()
        .filter(|(_, v)| **v != 0)
        .map(|(i, _)| i)
        .collect()
}

fn is_subset(small: &[usize], large: &[usize]) -> bool {
    small.iter().all(|i| large.binary_search(i).is_ok())
}

/// Drops rows whose support contains the support of another row.
fn minimize(rows: Vec<(Vec<BigInt>, Vec<BigInt>)>) -> Vec<(Vec<BigInt>, Vec<BigInt>)> {
    let supports: Vec<Vec<usize>> = rows.iter().map(|(_, ident)| support_of(ident)).collect();
    let mut keep = vec![true; rows.len()];
    for i in 0..rows.len() {
        for j in 0..rows.len() {
            if i == j || !keep[j] {
                continue;
            }
            let contains = is_subset(&supports[j], &supports[i]);
            let strictly = supports[j].len() < supports[i].len();
            // equal supports: keep the earlier row
            if contains && (strictly || j < i) {
                keep[i] = false;
                break;
            }
        }
    }
    rows.into_iter()
        .zip(keep)
        .filter(|(_, keep)| *keep)
        .map(|(row, _)| row)
        .collect()
}

pub fn place_invariants(
    net: &Net,
    max_rows: usize,
    deadline: Deadline,
) -> Result<Vec<Vec<u64>>, FarkasError> {
    if net.transitions_len() == 0 {
        // no transition can move a token: the total token count is conserved
        return Ok(if net.places_len() == 0 {
            Vec::new()
        } else {
            vec![vec![1; net.places_len()]]
        });
    }
    farkas(
        &net.c_matrix().to_rows(),
        net.transitions_len(),
        max_rows,
        deadline,
    )
}

pub fn transition_invariants(
    net: &Net,
    max_rows: usize,
    deadline: Deadline,
) -> Result<Vec<Vec<u64>>, FarkasError> {
    farkas(
        &net.c_matrix().transposed(),
        net.places_len(),
        max_rows,
        deadline,
    )
}

fn place_expression(net: &Net, weights: &[u64]) -> (String, u64) {
    let mut terms = Vec::new();
    let mut sum: u64 = 0;
    for place in net.places.indices() {
        let weight = weights[place.index()];
        if weight == 0 {
            continue;
        }
        let name = &net.places[place].id;
        terms.push(if weight == 1 {
            name.clone()
        } else {
            format!("{weight}*{name}")
        });
        sum = sum.saturating_add(weight.saturating_mul(net.places[place].tokens));
    }
    (format!("{} = {}", terms.join(" + "), sum), sum)
}

fn build_report(ids: &[&str], invariants: Vec<Invariant>) -> InvariantReport {
    let uncovered: Vec<String> = ids
        .iter()
        .filter(|id| !invariants.iter().any(|inv| inv.weight_of(id).is_some()))
        .map(|id| id.to_string())
        .collect();
    let coverage = if ids.is_empty() {
        0.0
    } else {
        (ids.len() - uncovered.len()) as f64 / ids.len() as f64
    };
    InvariantReport {
        invariants,
        coverage,
        uncovered,
    }
}

fn special_arc_warning(net: &Net) -> Option<String> {
    (net.has_inhibitor_arcs() || net.has_reset_arcs()).then(|| {
        "inhibitor and reset arcs are not part of the incidence matrix; invariants describe the underlying P/T net only".to_string()
    })
}

fn farkas_failure(kind: AnalyzerKind, err: FarkasError) -> AnalysisResult {
    match err {
        FarkasError::TimedOut => AnalysisResult::timed_out(kind, "invariant computation"),
        FarkasError::RowLimit { rows, limit } => AnalysisResult::failed(
            kind,
            format!(
                "invariant computation produced {rows} intermediate rows, above the limit of {limit}; raise guard.invariant_max_rows"
            ),
        ),
        FarkasError::Overflow { .. } => {
            AnalysisResult::failed(kind, format!("invariant computation failed: {err}"))
        }
    }
}

pub fn analyze_places(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    let kind = AnalyzerKind::PInvariants;
    if let Err(blocked) = ctx.admit(kind) {
        return blocked;
    }
    let net = ctx.net;
    let vectors = match place_invariants(net, ctx.config.guard.invariant_max_rows, deadline) {
        Ok(vectors) => vectors,
        Err(err) => return farkas_failure(kind, err),
    };
    let invariants = vectors
        .iter()
        .map(|weights| {
            let (expression, sum) = place_expression(net, weights);
            Invariant {
                entries: net
                    .places
                    .iter_enumerated()
                    .filter(|(p, _)| weights[p.index()] > 0)
                    .map(|(p, place)| InvariantEntry {
                        id: place.id.clone(),
                        weight: weights[p.index()],
                    })
                    .collect(),
                expression: Some(expression),
                token_sum: Some(sum),
            }
        })
        .collect();
    let ids: Vec<&str> = net.places.iter().map(|p| p.id.as_str()).collect();
    let report = build_report(&ids, invariants);
    log::info!(
        "found {} P-invariants covering {:.0}% of places",
        report.invariants.len(),
        report.coverage * 100.0
    );
    let mut result = AnalysisResult::success(kind, Payload::Invariants(report));
    if let Some(warning) = special_arc_warning(net) {
        result = result.with_warning(warning);
    }
    result
}

pub fn analyze_transitions(ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    let kind = AnalyzerKind::TInvariants;
    if let Err(blocked) = ctx.admit(kind) {
        return blocked;
    }
    let net = ctx.net;
    let vectors = match transition_invariants(net, ctx.config.guard.invariant_max_rows, deadline)
    {
        Ok(vectors) => vectors,
        Err(err) => return farkas_failure(kind, err),
    };
    let invariants = vectors
        .iter()
        .map(|weights| Invariant {
            entries: net
                .transitions
                .iter_enumerated()
                .filter(|(t, _)| weights[t.index()] > 0)
                .map(|(t, transition)| InvariantEntry {
                    id: transition.id.clone(),
                    weight: weights[t.index()],
                })
                .collect(),
            expression: None,
            token_sum: None,
        })
        .collect();
    let ids: Vec<&str> = net.transitions.iter().map(|t| t.id.as_str()).collect();
    let report = build_report(&ids, invariants);
    log::info!("found {} T-invariants", report.invariants.len());
    let mut result = AnalysisResult::success(kind, Payload::Invariants(report));
    if let Some(warning) = special_arc_warning(net) {
        result = result.with_warning(warning);
    }
    result
}

/// Per-place structural bound `⌊y·M₀ / y[p]⌋`, minimised over the invariants
/// whose support contains `p`.
pub fn structural_bounds(net: &Net, invariants: &[Vec<u64>]) -> Vec<Option<u64>> {
    net.places
        .indices()
        .map(|place: PlaceId| {
            invariants
                .iter()
                .filter(|weights| weights[place.index()] > 0)
                .map(|weights| {
                    let sum = weights
                        .iter()
                        .zip(net.places.iter())
                        .fold(0u64, |acc, (w, p)| {
                            acc.saturating_add(w.saturating_mul(p.tokens))
                        });
                    sum / weights[place.index()]
                })
                .min()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::net::{ArcKind, NetModel};

    fn mutex() -> Net {
        let model = NetModel::new("mutex")
            .place("idle1", 1.0)
            .place("idle2", 1.0)
            .place("cs1", 0.0)
            .place("cs2", 0.0)
            .place("lock", 1.0)
            .transition("enter1")
            .transition("exit1")
            .transition("enter2")
            .transition("exit2")
            .arc("idle1", "enter1")
            .arc("lock", "enter1")
            .arc("enter1", "cs1")
            .arc("cs1", "exit1")
            .arc("exit1", "idle1")
            .arc("exit1", "lock")
            .arc("idle2", "enter2")
            .arc("lock", "enter2")
            .arc("enter2", "cs2")
            .arc("cs2", "exit2")
            .arc("exit2", "idle2")
            .arc("exit2", "lock");
        Net::from_model(&model).unwrap()
    }

    #[test]
    fn mutex_place_invariants() {
        let net = mutex();
        let invariants = place_invariants(&net, 1000, Deadline::none()).unwrap();
        // idle1+cs1, idle2+cs2, cs1+cs2+lock
        assert_eq!(invariants.len(), 3);
        assert!(invariants.contains(&vec![1, 0, 1, 0, 0]));
        assert!(invariants.contains(&vec![0, 1, 0, 1, 0]));
        assert!(invariants.contains(&vec![0, 0, 1, 1, 1]));
    }

    #[test]
    fn mutex_transition_invariants() {
        let net = mutex();
        let invariants = transition_invariants(&net, 1000, Deadline::none()).unwrap();
        assert_eq!(invariants.len(), 2);
        assert!(invariants.contains(&vec![1, 1, 0, 0]));
        assert!(invariants.contains(&vec![0, 0, 1, 1]));
    }

    #[test]
    fn weighted_invariant_is_normalized() {
        // t: 2 a -> 1 b
        let model = NetModel::new("w")
            .place("a", 4.0)
            .place("b", 0.0)
            .transition("t")
            .weighted_arc("a", "t", 2, Default::default())
            .arc("t", "b");
        let net = Net::from_model(&model).unwrap();
        let invariants = place_invariants(&net, 1000, Deadline::none()).unwrap();
        assert_eq!(invariants, vec![vec![1, 2]]);
        let (expression, sum) = place_expression(&net, &invariants[0]);
        assert_eq!(expression, "a + 2*b = 4");
        assert_eq!(sum, 4);
    }

    #[test]
    fn no_transitions_conserves_all_places() {
        let model = NetModel::new("idle").place("a", 1.0).place("b", 2.0);
        let net = Net::from_model(&model).unwrap();
        assert_eq!(
            place_invariants(&net, 10, Deadline::none()).unwrap(),
            vec![vec![1, 1]]
        );
        assert!(
            transition_invariants(&net, 10, Deadline::none())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn source_transition_has_no_invariant() {
        let model = NetModel::new("src")
            .place("p", 0.0)
            .transition("t")
            .arc("t", "p");
        let net = Net::from_model(&model).unwrap();
        let config = AnalysisConfig::default();
        let ctx = AnalysisContext::new(&net, &config);
        let result = analyze_places(&ctx, Deadline::none());
        assert!(result.success);
        let Payload::Invariants(report) = result.payload else {
            panic!("unexpected payload");
        };
        assert!(report.invariants.is_empty());
        assert_eq!(report.uncovered, vec!["p".to_string()]);
        assert_eq!(report.coverage, 0.0);
    }

    #[test]
    fn row_limit_is_reported() {
        let net = mutex();
        assert!(matches!(
            place_invariants(&net, 1, Deadline::none()),
            Err(FarkasError::RowLimit { limit: 1, .. })
        ));
        assert_eq!(
            place_invariants(&net, 1000, Deadline::after(std::time::Duration::ZERO)),
            Err(FarkasError::TimedOut)
        );
    }

    #[test]
    fn oversized_weights_are_an_error() {
        // each step multiplies the token value by 2^32, so p0 needs weight 2^64
        let step = 1_i64 << 32;
        let model = NetModel::new("amplifier")
            .place("p0", 1.0)
            .place("p1", 0.0)
            .place("p2", 0.0)
            .transition("t0")
            .transition("t1")
            .arc("p0", "t0")
            .weighted_arc("t0", "p1", step, ArcKind::Normal)
            .arc("p1", "t1")
            .weighted_arc("t1", "p2", step, ArcKind::Normal);
        let net = Net::from_model(&model).unwrap();
        assert_eq!(
            place_invariants(&net, 1000, Deadline::none()),
            Err(FarkasError::Overflow { element: 0 })
        );

        let config = AnalysisConfig::default();
        let ctx = AnalysisContext::new(&net, &config);
        let result = analyze_places(&ctx, Deadline::none());
        assert!(!result.success);
        assert!(result.errors[0].contains("64 bits"));
    }

    #[test]
    fn structural_bounds_from_invariants() {
        let net = mutex();
        let invariants = place_invariants(&net, 1000, Deadline::none()).unwrap();
        let bounds = structural_bounds(&net, &invariants);
        assert!(bounds.iter().all(|b| *b == Some(1)));
    }
}
