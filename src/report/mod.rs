//! 分析报告：单个模型一次会话的元数据包（MetadataBundle）。
//!
//! The bundle is what hosts display and what the cache persists: model
//! identity, per-analyzer summaries, ranked key findings, the element view
//! and timing.
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::aggregate::ElementView;
use crate::analysis::guard::Threshold;
use crate::analysis::{AnalysisResult, AnalyzerKind};
use crate::net::{ArcKind, NetModel};

pub mod findings;

pub use findings::{Finding, Severity};

/// Bumped whenever the persisted layout changes; older entries are ignored.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerStatus {
    Success,
    /// Succeeded on a truncated search.
    Partial,
    Blocked,
    Error,
}

impl AnalyzerStatus {
    pub fn of(result: &AnalysisResult) -> Self {
        if result.metadata.blocked {
            AnalyzerStatus::Blocked
        } else if !result.success {
            AnalyzerStatus::Error
        } else if result.metadata.truncated || result.metadata.timed_out {
            AnalyzerStatus::Partial
        } else {
            AnalyzerStatus::Success
        }
    }
}

impl fmt::Display for AnalyzerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AnalyzerStatus::Success => "success",
            AnalyzerStatus::Partial => "partial",
            AnalyzerStatus::Blocked => "blocked",
            AnalyzerStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub name: Option<String>,
    /// SHA-256 of the canonical model content.
    pub hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub places: usize,
    pub transitions: usize,
    pub arcs: usize,
    pub tokens: u64,
    pub inhibitor_arcs: usize,
    pub reset_arcs: usize,
    pub guarded_transitions: usize,
}

impl ModelSummary {
    pub fn of(model: &NetModel) -> Self {
        Self {
            places: model.places.len(),
            transitions: model.transitions.len(),
            arcs: model.arc_count(),
            tokens: model.token_count(),
            inhibitor_arcs: model
                .arcs
                .iter()
                .filter(|a| a.kind == ArcKind::Inhibitor)
                .count(),
            reset_arcs: model
                .arcs
                .iter()
                .filter(|a| a.kind == ArcKind::Reset)
                .count(),
            guarded_transitions: model
                .transitions
                .iter()
                .filter(|t| t.guard.is_some())
                .count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerSummary {
    pub analyzer: AnalyzerKind,
    pub status: AnalyzerStatus,
    pub counts: IndexMap<String, u64>,
    pub elapsed: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedAnalyzer {
    pub analyzer: AnalyzerKind,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub per_analyzer: BTreeMap<String, Duration>,
    pub total: Duration,
    /// Served from the cache without running any analyzer.
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataBundle {
    pub schema_version: u32,
    pub model: ModelIdentity,
    pub analyzed_at: DateTime<Utc>,
    /// Fingerprint of the thresholds and request parameters (path query,
    /// state estimate) the analyzers ran with.
    pub config_fingerprint: String,
    pub summary: ModelSummary,
    pub analyzers: Vec<AnalyzerSummary>,
    pub key_findings: Vec<Finding>,
    pub warnings: Vec<String>,
    pub blocked: Vec<BlockedAnalyzer>,
    pub elements: ElementView,
    pub performance: PerformanceMetrics,
}

pub struct BundleInputs<'a> {
    pub model: &'a NetModel,
    pub hash: String,
    pub config_fingerprint: String,
    pub results: &'a BTreeMap<AnalyzerKind, AnalysisResult>,
    pub elements: ElementView,
    pub total: Duration,
}

impl MetadataBundle {
    pub fn build(inputs: BundleInputs<'_>) -> Self {
        let results = inputs.results;
        let analyzers = results.values().map(findings::summarize).collect();
        let warnings = results
            .values()
            .flat_map(|r| r.warnings.iter().map(move |w| format!("{}: {w}", r.analyzer)))
            .collect();
        let blocked = results
            .values()
            .filter(|r| r.metadata.blocked)
            .map(|r| BlockedAnalyzer {
                analyzer: r.analyzer,
                reason: r.metadata.reason.clone().unwrap_or_default(),
                threshold: r.metadata.threshold.clone(),
                suggestion: r.metadata.suggestion.clone(),
            })
            .collect();
        let per_analyzer = results
            .values()
            .map(|r| (r.analyzer.name().to_string(), r.metadata.elapsed_time))
            .collect();

        Self {
            schema_version: SCHEMA_VERSION,
            model: ModelIdentity {
                name: inputs.model.name.clone(),
                hash: inputs.hash,
            },
            analyzed_at: Utc::now(),
            config_fingerprint: inputs.config_fingerprint,
            summary: ModelSummary::of(inputs.model),
            analyzers,
            key_findings: findings::rank(results),
            warnings,
            blocked,
            elements: inputs.elements,
            performance: PerformanceMetrics {
                per_analyzer,
                total: inputs.total,
                cached: false,
            },
        }
    }

    pub fn analyzer(&self, kind: AnalyzerKind) -> Option<&AnalyzerSummary> {
        self.analyzers.iter().find(|s| s.analyzer == kind)
    }

    /// Summaries exist for every analyzer in `kinds`.
    pub fn covers(&self, kinds: &[AnalyzerKind]) -> bool {
        kinds.iter().all(|kind| self.analyzer(*kind).is_some())
    }

    pub fn has_errors(&self) -> bool {
        self.analyzers
            .iter()
            .any(|s| s.status == AnalyzerStatus::Error)
    }

    /// Writes the text rendering to `path` and the JSON form to `<path>.json`.
    pub fn save_to_file(&self, path: &str) -> std::io::Result<()> {
        std::fs::write(path, self.to_string())?;
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(format!("{path}.json"), json)
    }
}

impl fmt::Display for MetadataBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Petri net analysis: {}",
            self.model.name.as_deref().unwrap_or("<unnamed>")
        )?;
        writeln!(f, "model hash: {}", self.model.hash)?;
        writeln!(f, "analyzed at: {}", self.analyzed_at.to_rfc3339())?;
        writeln!(
            f,
            "{} places, {} transitions, {} arcs, {} tokens",
            self.summary.places, self.summary.transitions, self.summary.arcs, self.summary.tokens
        )?;
        if self.performance.cached {
            writeln!(f, "(served from cache)")?;
        }

        writeln!(f, "\nanalyzers:")?;
        for summary in &self.analyzers {
            let counts = summary
                .counts
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .join(", ");
            writeln!(
                f,
                "  {:<14} {:<8} {:>10}  {}",
                summary.analyzer.name(),
                summary.status.to_string(),
                format!("{:.3?}", summary.elapsed),
                counts
            )?;
            if let Some(message) = &summary.message {
                writeln!(f, "      {message}")?;
            }
        }

        if !self.key_findings.is_empty() {
            writeln!(f, "\nkey findings:")?;
            for finding in &self.key_findings {
                writeln!(f, "  {finding}")?;
            }
        }

        if !self.blocked.is_empty() {
            writeln!(f, "\nblocked:")?;
            for blocked in &self.blocked {
                write!(f, "  {}: {}", blocked.analyzer, blocked.reason)?;
                if let Some(suggestion) = &blocked.suggestion {
                    write!(f, " ({suggestion})")?;
                }
                writeln!(f)?;
            }
        }

        if !self.warnings.is_empty() {
            writeln!(f, "\nwarnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  {warning}")?;
            }
        }

        writeln!(f, "\ntotal time: {:?}", self.performance.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::analysis::{self, Deadline, Selection};
    use crate::config::AnalysisConfig;
    use crate::net::Net;

    fn bundle() -> MetadataBundle {
        let model = NetModel::new("chain")
            .place("p1", 1.0)
            .place("p2", 0.0)
            .transition("t1")
            .arc("p1", "t1")
            .arc("t1", "p2");
        let net = Net::from_model(&model).unwrap();
        let config = AnalysisConfig::default();
        let results = analysis::run_all(&net, &config, &Selection::All, Deadline::none());
        let elements = aggregate(Some(&net), &results);
        MetadataBundle::build(BundleInputs {
            model: &model,
            hash: "abc".into(),
            config_fingerprint: "cfg".into(),
            results: &results,
            elements,
            total: Duration::from_millis(5),
        })
    }

    #[test]
    fn bundle_summarizes_every_analyzer() {
        let bundle = bundle();
        assert_eq!(bundle.schema_version, SCHEMA_VERSION);
        assert_eq!(bundle.analyzers.len(), AnalyzerKind::ALL.len());
        assert!(bundle.covers(&AnalyzerKind::ALL));
        assert!(!bundle.has_errors());
        assert_eq!(bundle.summary.places, 2);
        assert_eq!(bundle.summary.tokens, 1);
        let deadlocks = bundle.analyzer(AnalyzerKind::Deadlocks).unwrap();
        assert_eq!(deadlocks.counts["deadlocks"], 1);
        assert_eq!(bundle.key_findings[0].severity, Severity::Warning);
    }

    #[test]
    fn bundle_survives_json() {
        let bundle = bundle();
        let json = serde_json::to_string(&bundle).unwrap();
        let back: MetadataBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bundle);
    }

    #[test]
    fn display_mentions_findings() {
        let text = bundle().to_string();
        assert!(text.contains("Petri net analysis: chain"));
        assert!(text.contains("deadlock"));
    }
}
