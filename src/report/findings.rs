//! Per-analyzer summaries and the ranked list of key findings.
use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::analysis::boundedness::Verdict;
use crate::analysis::liveness::LivenessLevel;
use crate::analysis::{AnalysisResult, AnalyzerKind, Payload};
use crate::report::{AnalyzerStatus, AnalyzerSummary};

/// Ranked `Warning > Success > Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Success,
    Info,
}

impl Severity {
    fn rank(self) -> u8 {
        match self {
            Severity::Warning => 0,
            Severity::Success => 1,
            Severity::Info => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub analyzer: AnalyzerKind,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "[warn]",
            Severity::Success => "[ok]  ",
            Severity::Info => "[info]",
        };
        write!(f, "{tag} {}: {}", self.analyzer, self.message)
    }
}

fn counts(result: &AnalysisResult) -> IndexMap<String, u64> {
    let mut counts = IndexMap::new();
    let mut put = |key: &str, value: usize| {
        counts.insert(key.to_string(), value as u64);
    };
    match &result.payload {
        Payload::None => {}
        Payload::Invariants(report) => {
            put("invariants", report.invariants.len());
            put("uncovered", report.uncovered.len());
        }
        Payload::PlaceSets(report) => put("sets", report.sets.len()),
        Payload::Cycles(report) => put("cycles", report.cycles.len()),
        Payload::Paths(report) => put("paths", report.paths.len()),
        Payload::Hubs(report) => put("hubs", report.hubs.len()),
        Payload::Reachability(report) => {
            put("states", report.state_count);
            put("edges", report.edge_count);
        }
        Payload::Boundedness(report) => {
            put(
                "unbounded_places",
                report
                    .places
                    .iter()
                    .filter(|p| p.bounded == Some(false))
                    .count(),
            );
            if let Some(k) = report.k {
                put("k", k as usize);
            }
        }
        Payload::Liveness(report) => {
            put(
                "live",
                report
                    .transitions
                    .iter()
                    .filter(|t| t.level == Some(LivenessLevel::L4))
                    .count(),
            );
            put("dead", report.dead.len());
        }
        Payload::Deadlocks(report) => put("deadlocks", report.deadlocks.len()),
        Payload::Fairness(report) => put("unfair", report.unfair.len()),
    }
    counts
}

pub fn summarize(result: &AnalysisResult) -> AnalyzerSummary {
    let status = AnalyzerStatus::of(result);
    let message = match status {
        AnalyzerStatus::Blocked => result.metadata.reason.clone(),
        AnalyzerStatus::Error => Some(result.errors.join("; ")),
        _ => None,
    };
    AnalyzerSummary {
        analyzer: result.analyzer,
        status,
        counts: counts(result),
        elapsed: result.metadata.elapsed_time,
        message,
    }
}

fn list(ids: &[String]) -> String {
    const SHOWN: usize = 5;
    if ids.len() <= SHOWN {
        ids.join(", ")
    } else {
        format!("{}, … ({} more)", ids[..SHOWN].join(", "), ids.len() - SHOWN)
    }
}

fn findings_of(result: &AnalysisResult, out: &mut Vec<Finding>) {
    let analyzer = result.analyzer;
    let mut push = |severity, message: String| {
        out.push(Finding {
            severity,
            analyzer,
            message,
        })
    };
    if result.metadata.blocked {
        push(
            Severity::Info,
            format!(
                "skipped: {}",
                result.metadata.reason.as_deref().unwrap_or("blocked")
            ),
        );
        return;
    }
    if !result.success {
        push(Severity::Warning, format!("failed: {}", result.errors.join("; ")));
        return;
    }
    match &result.payload {
        Payload::Invariants(report) if analyzer == AnalyzerKind::PInvariants => {
            if report.fully_covered() && !report.invariants.is_empty() {
                push(
                    Severity::Success,
                    "every place is covered by a P-invariant (conservative net)".to_string(),
                );
            } else {
                push(
                    Severity::Info,
                    format!(
                        "{} P-invariant(s), {:.0}% of places covered",
                        report.invariants.len(),
                        report.coverage * 100.0
                    ),
                );
            }
        }
        Payload::Invariants(report) => {
            if report.fully_covered() && !report.invariants.is_empty() {
                push(
                    Severity::Success,
                    "every transition is covered by a T-invariant".to_string(),
                );
            } else {
                push(
                    Severity::Info,
                    format!("{} T-invariant(s)", report.invariants.len()),
                );
            }
        }
        Payload::PlaceSets(report) => {
            let empty: Vec<String> = report
                .sets
                .iter()
                .filter(|s| !s.initially_marked)
                .map(|s| format!("{{{}}}", s.places.join(", ")))
                .collect();
            if analyzer == AnalyzerKind::Siphons && !empty.is_empty() {
                push(
                    Severity::Warning,
                    format!("initially empty siphon(s): {}", list(&empty)),
                );
            } else if report.commoner_holds == Some(true) && !report.sets.is_empty() {
                push(
                    Severity::Success,
                    "every minimal siphon contains an initially marked trap".to_string(),
                );
            } else {
                push(
                    Severity::Info,
                    format!("{} minimal {}", report.sets.len(), analyzer),
                );
            }
        }
        Payload::Cycles(report) => push(
            Severity::Info,
            if report.truncated {
                format!("at least {} elementary cycles", report.cycles.len())
            } else {
                format!("{} elementary cycle(s)", report.cycles.len())
            },
        ),
        Payload::Paths(report) => push(
            Severity::Info,
            format!(
                "{}{} path(s) of at most {} arcs",
                if report.truncated { "at least " } else { "" },
                report.paths.len(),
                report.max_length
            ),
        ),
        Payload::Hubs(report) => {
            if !report.hubs.is_empty() {
                push(Severity::Info, format!("hub nodes: {}", list(&report.hubs)));
            }
        }
        Payload::Reachability(report) => push(
            Severity::Info,
            if report.complete {
                format!("{} reachable states", report.state_count)
            } else {
                format!(
                    "explored {} states before stopping; the state space is larger",
                    report.state_count
                )
            },
        ),
        Payload::Boundedness(report) => match report.verdict {
            Verdict::Bounded => push(
                Severity::Success,
                match (report.k, report.safe) {
                    (Some(_), Some(true)) => "net is safe (1-bounded)".to_string(),
                    (Some(k), _) => format!("net is {k}-bounded"),
                    _ => "net is bounded".to_string(),
                },
            ),
            Verdict::Unbounded => {
                let places: Vec<String> = report
                    .places
                    .iter()
                    .filter(|p| p.bounded == Some(false))
                    .map(|p| p.place.clone())
                    .collect();
                push(
                    Severity::Warning,
                    format!("net is unbounded in {}", list(&places)),
                );
            }
            Verdict::Undetermined => push(
                Severity::Info,
                "boundedness could not be decided within the state limit".to_string(),
            ),
        },
        Payload::Liveness(report) => {
            if report.live == Some(true) {
                push(Severity::Success, "every transition is live (L4)".to_string());
            } else if !report.dead.is_empty() {
                push(
                    Severity::Warning,
                    format!("dead transition(s): {}", list(&report.dead)),
                );
            } else if report.live == Some(false) {
                push(
                    Severity::Info,
                    "no transition is dead, but not all are live".to_string(),
                );
            }
        }
        Payload::Deadlocks(report) => match report.deadlock_free {
            Some(true) => push(Severity::Success, "deadlock-free".to_string()),
            Some(false) => push(
                Severity::Warning,
                format!(
                    "{} reachable deadlock state(s); shortest trace: [{}]",
                    report.deadlocks.len(),
                    report
                        .deadlocks
                        .iter()
                        .min_by_key(|d| d.path.len())
                        .map(|d| d.path.join(", "))
                        .unwrap_or_default()
                ),
            ),
            None => push(
                Severity::Info,
                "no deadlock in the explored part of the state space".to_string(),
            ),
        },
        Payload::Fairness(report) => {
            if !report.unfair.is_empty() {
                push(
                    Severity::Warning,
                    format!("transition(s) can starve: {}", list(&report.unfair)),
                );
            }
        }
        Payload::None => {}
    }
}

/// Findings of all results, warnings first.
pub fn rank(results: &BTreeMap<AnalyzerKind, AnalysisResult>) -> Vec<Finding> {
    let mut out = Vec::new();
    for result in results.values() {
        findings_of(result, &mut out);
    }
    out.sort_by_key(|f| (f.severity.rank(), f.analyzer));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_rank_first() {
        let mut results = BTreeMap::new();
        results.insert(
            AnalyzerKind::Cycles,
            AnalysisResult::failed(AnalyzerKind::Cycles, "boom"),
        );
        let mut blocked = AnalysisResult::failed(AnalyzerKind::Siphons, "x");
        blocked.metadata.blocked = true;
        blocked.metadata.reason = Some("too many places".into());
        results.insert(AnalyzerKind::Siphons, blocked);

        let findings = rank(&results);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].analyzer, AnalyzerKind::Cycles);
        assert_eq!(findings[1].severity, Severity::Info);
        assert!(findings[1].message.contains("too many places"));
    }

    #[test]
    fn summary_status_follows_metadata() {
        let failed = AnalysisResult::failed(AnalyzerKind::Hubs, "bad");
        let summary = summarize(&failed);
        assert_eq!(summary.status, AnalyzerStatus::Error);
        assert_eq!(summary.message.as_deref(), Some("bad"));
    }

    #[test]
    fn long_lists_are_abbreviated() {
        let ids: Vec<String> = (0..7).map(|i| format!("p{i}")).collect();
        assert_eq!(list(&ids), "p0, p1, p2, p3, p4, … (2 more)");
    }
}
