//! 规模守卫：在分析器开始工作前判定网的规模是否可接受。
//!
//! The decision is a pure function of the analyzer kind, the size metrics and
//! the configured thresholds, so repeated checks with the same inputs always
//! agree.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analysis::AnalyzerKind;
use crate::config::{GuardConfig, SUBSET_ENUMERATION_LIMIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeMetrics {
    pub places: usize,
    pub transitions: usize,
    /// State-space estimate supplied by the host, if any.
    pub estimated_states: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: String,
    pub limit: u64,
    pub actual: u64,
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} > limit {}", self.metric, self.actual, self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub analyzer: AnalyzerKind,
    pub reason: String,
    pub threshold: Threshold,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeGuard {
    config: GuardConfig,
}

impl SizeGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn check(&self, kind: AnalyzerKind, metrics: &SizeMetrics) -> Result<(), Rejection> {
        match kind {
            AnalyzerKind::Siphons => self.check_places(
                kind,
                metrics.places,
                self.config.siphon_max_places,
                "siphon_max_places",
            ),
            AnalyzerKind::Traps => self.check_places(
                kind,
                metrics.places,
                self.config.trap_max_places,
                "trap_max_places",
            ),
            kind if kind.is_behavioral() => match metrics.estimated_states {
                Some(estimate) if estimate > self.config.max_states as u64 => Err(Rejection {
                    analyzer: kind,
                    reason: format!(
                        "estimated state space of {estimate} states exceeds the limit of {}",
                        self.config.max_states
                    ),
                    threshold: Threshold {
                        metric: "estimated_states".to_string(),
                        limit: self.config.max_states as u64,
                        actual: estimate,
                    },
                    suggestion: "raise guard.max_states or reduce the initial marking".to_string(),
                }),
                _ => Ok(()),
            },
            // Cycles and paths are bounded by their count caps while running.
            _ => Ok(()),
        }
    }

    fn check_places(
        &self,
        kind: AnalyzerKind,
        places: usize,
        configured: usize,
        setting: &str,
    ) -> Result<(), Rejection> {
        let limit = configured.min(SUBSET_ENUMERATION_LIMIT);
        if places <= limit {
            return Ok(());
        }
        Err(Rejection {
            analyzer: kind,
            reason: format!(
                "{kind} enumeration is exponential in the number of places; the net has {places} places, the limit is {limit}"
            ),
            threshold: Threshold {
                metric: "places".to_string(),
                limit: limit as u64,
                actual: places as u64,
            },
            suggestion: format!("raise guard.{setting} or analyze a reduced subnet"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(places: usize, estimated_states: Option<u64>) -> SizeMetrics {
        SizeMetrics {
            places,
            transitions: 4,
            estimated_states,
        }
    }

    #[test]
    fn siphons_blocked_above_place_limit() {
        let guard = SizeGuard::new(GuardConfig::default());
        assert!(guard.check(AnalyzerKind::Siphons, &metrics(20, None)).is_ok());

        let rejection = guard
            .check(AnalyzerKind::Siphons, &metrics(30, None))
            .unwrap_err();
        assert_eq!(rejection.analyzer, AnalyzerKind::Siphons);
        assert_eq!(
            rejection.threshold,
            Threshold {
                metric: "places".into(),
                limit: 20,
                actual: 30
            }
        );
        assert!(guard.check(AnalyzerKind::Traps, &metrics(30, None)).is_err());
        assert!(guard.check(AnalyzerKind::Hubs, &metrics(30, None)).is_ok());
    }

    #[test]
    fn behavioral_analyzers_blocked_only_by_estimate() {
        let guard = SizeGuard::new(GuardConfig::default());
        for kind in [
            AnalyzerKind::Reachability,
            AnalyzerKind::Liveness,
            AnalyzerKind::Fairness,
        ] {
            assert!(guard.check(kind, &metrics(500, None)).is_ok());
            assert!(guard.check(kind, &metrics(2, Some(10_000))).is_ok());
            assert!(guard.check(kind, &metrics(2, Some(10_001))).is_err());
        }
        assert!(
            guard
                .check(AnalyzerKind::Cycles, &metrics(2, Some(1_000_000)))
                .is_ok()
        );
    }

    #[test]
    fn decision_is_pure() {
        let guard = SizeGuard::new(GuardConfig::default());
        let m = metrics(25, Some(3));
        for kind in AnalyzerKind::ALL {
            assert_eq!(guard.check(kind, &m), guard.check(kind, &m));
        }
    }
}
