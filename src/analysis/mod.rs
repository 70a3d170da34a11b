//! 分析器框架：十二种分析器共享的结果类型、上下文与分派表。
//!
//! The analyzer set is fixed, so dispatch is a `match` over [`AnalyzerKind`]
//! rather than a trait-object registry. Every analyzer module exposes
//! `analyze(&AnalysisContext, Deadline) -> AnalysisResult` and starts with a
//! [`guard::SizeGuard`] check.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::net::Net;

pub mod boundedness;
pub mod cycles;
pub mod deadlocks;
pub mod fairness;
pub mod guard;
pub mod hubs;
pub mod invariants;
pub mod liveness;
pub mod paths;
pub mod reachability;
pub mod siphons;

use guard::{Rejection, SizeGuard, SizeMetrics, Threshold};
use reachability::{StateGraph, StateGraphConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    PInvariants,
    TInvariants,
    Siphons,
    Traps,
    Cycles,
    Paths,
    Hubs,
    Reachability,
    Boundedness,
    Liveness,
    Deadlocks,
    Fairness,
}

impl AnalyzerKind {
    pub const ALL: [AnalyzerKind; 12] = [
        AnalyzerKind::PInvariants,
        AnalyzerKind::TInvariants,
        AnalyzerKind::Siphons,
        AnalyzerKind::Traps,
        AnalyzerKind::Cycles,
        AnalyzerKind::Paths,
        AnalyzerKind::Hubs,
        AnalyzerKind::Reachability,
        AnalyzerKind::Boundedness,
        AnalyzerKind::Liveness,
        AnalyzerKind::Deadlocks,
        AnalyzerKind::Fairness,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AnalyzerKind::PInvariants => "p_invariants",
            AnalyzerKind::TInvariants => "t_invariants",
            AnalyzerKind::Siphons => "siphons",
            AnalyzerKind::Traps => "traps",
            AnalyzerKind::Cycles => "cycles",
            AnalyzerKind::Paths => "paths",
            AnalyzerKind::Hubs => "hubs",
            AnalyzerKind::Reachability => "reachability",
            AnalyzerKind::Boundedness => "boundedness",
            AnalyzerKind::Liveness => "liveness",
            AnalyzerKind::Deadlocks => "deadlocks",
            AnalyzerKind::Fairness => "fairness",
        }
    }

    /// Needs the reachability graph.
    pub fn is_behavioral(self) -> bool {
        matches!(
            self,
            AnalyzerKind::Reachability
                | AnalyzerKind::Boundedness
                | AnalyzerKind::Liveness
                | AnalyzerKind::Deadlocks
                | AnalyzerKind::Fairness
        )
    }

    pub fn run(self, ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
        let started = Instant::now();
        let mut result = match self {
            AnalyzerKind::PInvariants => invariants::analyze_places(ctx, deadline),
            AnalyzerKind::TInvariants => invariants::analyze_transitions(ctx, deadline),
            AnalyzerKind::Siphons => siphons::analyze_siphons(ctx, deadline),
            AnalyzerKind::Traps => siphons::analyze_traps(ctx, deadline),
            AnalyzerKind::Cycles => cycles::analyze(ctx, deadline),
            AnalyzerKind::Paths => paths::analyze(ctx, deadline),
            AnalyzerKind::Hubs => hubs::analyze(ctx, deadline),
            AnalyzerKind::Reachability => reachability::analyze(ctx, deadline),
            AnalyzerKind::Boundedness => boundedness::analyze(ctx, deadline),
            AnalyzerKind::Liveness => liveness::analyze(ctx, deadline),
            AnalyzerKind::Deadlocks => deadlocks::analyze(ctx, deadline),
            AnalyzerKind::Fairness => fairness::analyze(ctx, deadline),
        };
        result.metadata.elapsed_time = started.elapsed();
        log::debug!(
            "{} finished in {:?} (success={}, blocked={})",
            self,
            result.metadata.elapsed_time,
            result.success,
            result.metadata.blocked
        );
        result
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AnalyzerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        AnalyzerKind::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| format!("unknown analyzer `{s}`"))
    }
}

/// Which analyzers a session runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    All,
    Only(Vec<AnalyzerKind>),
}

impl Selection {
    pub fn kinds(&self) -> Vec<AnalyzerKind> {
        match self {
            Selection::All => AnalyzerKind::ALL.to_vec(),
            Selection::Only(kinds) => {
                let mut kinds = kinds.clone();
                kinds.sort();
                kinds.dedup();
                kinds
            }
        }
    }

    /// Parses `all` or a comma separated list of analyzer names.
    pub fn parse(spec: &str) -> Result<Self, String> {
        if spec.trim().eq_ignore_ascii_case("all") {
            return Ok(Selection::All);
        }
        let kinds = spec
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(AnalyzerKind::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if kinds.is_empty() {
            return Err("empty analyzer selection".to_string());
        }
        Ok(Selection::Only(kinds))
    }
}

/// Cooperative cancellation point checked inside long-running loops.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_default()
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }
}

/// Source/target pair restricting path enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathQuery {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub blocked: bool,
    pub elapsed_time: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Stopped at a cap; the payload is partial.
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    None,
    Invariants(invariants::InvariantReport),
    PlaceSets(siphons::PlaceSetReport),
    Cycles(cycles::CycleReport),
    Paths(paths::PathReport),
    Hubs(hubs::HubReport),
    Reachability(reachability::ReachabilityReport),
    Boundedness(boundedness::BoundednessReport),
    Liveness(liveness::LivenessReport),
    Deadlocks(deadlocks::DeadlockReport),
    Fairness(fairness::FairnessReport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analyzer: AnalyzerKind,
    pub success: bool,
    pub payload: Payload,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub metadata: ResultMetadata,
}

impl AnalysisResult {
    pub fn success(analyzer: AnalyzerKind, payload: Payload) -> Self {
        Self {
            analyzer,
            success: true,
            payload,
            warnings: Vec::new(),
            errors: Vec::new(),
            metadata: ResultMetadata::default(),
        }
    }

    pub fn failed(analyzer: AnalyzerKind, error: impl Into<String>) -> Self {
        Self {
            analyzer,
            success: false,
            payload: Payload::None,
            warnings: Vec::new(),
            errors: vec![error.into()],
            metadata: ResultMetadata::default(),
        }
    }

    pub fn blocked(rejection: Rejection) -> Self {
        Self {
            analyzer: rejection.analyzer,
            success: false,
            payload: Payload::None,
            warnings: Vec::new(),
            errors: Vec::new(),
            metadata: ResultMetadata {
                blocked: true,
                reason: Some(rejection.reason),
                threshold: Some(rejection.threshold),
                suggestion: Some(rejection.suggestion),
                ..ResultMetadata::default()
            },
        }
    }

    pub fn timed_out(analyzer: AnalyzerKind, what: &str) -> Self {
        let mut result = Self::failed(
            analyzer,
            format!("{what} exceeded its time budget and was stopped"),
        );
        result.metadata.timed_out = true;
        result
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn truncated(mut self, truncated: bool) -> Self {
        self.metadata.truncated |= truncated;
        self
    }

    pub fn is_blocked(&self) -> bool {
        self.metadata.blocked
    }
}

/// Everything an analyzer may read during one session. The reachability
/// graph is built at most once and shared by the behavioral analyzers.
pub struct AnalysisContext<'a> {
    pub net: &'a Net,
    pub config: &'a AnalysisConfig,
    pub guard: SizeGuard,
    pub path_query: Option<PathQuery>,
    pub estimated_states: Option<u64>,
    state_graph: OnceCell<Arc<StateGraph>>,
}

impl<'a> AnalysisContext<'a> {
    pub fn new(net: &'a Net, config: &'a AnalysisConfig) -> Self {
        Self {
            net,
            config,
            guard: SizeGuard::new(config.guard.clone()),
            path_query: None,
            estimated_states: None,
            state_graph: OnceCell::new(),
        }
    }

    pub fn with_path_query(mut self, query: Option<PathQuery>) -> Self {
        self.path_query = query;
        self
    }

    pub fn with_estimated_states(mut self, estimate: Option<u64>) -> Self {
        self.estimated_states = estimate;
        self
    }

    pub fn metrics(&self) -> SizeMetrics {
        SizeMetrics {
            places: self.net.places_len(),
            transitions: self.net.transitions_len(),
            estimated_states: self.estimated_states,
        }
    }

    /// Admission check every analyzer performs before doing any work.
    pub fn admit(&self, kind: AnalyzerKind) -> Result<(), AnalysisResult> {
        self.guard.check(kind, &self.metrics()).map_err(|rejection| {
            log::warn!("{kind} blocked: {}", rejection.reason);
            AnalysisResult::blocked(rejection)
        })
    }

    /// Shared reachability graph, explored on first use.
    pub fn state_graph(&self, deadline: Deadline) -> Arc<StateGraph> {
        self.state_graph
            .get_or_init(|| {
                let config = StateGraphConfig {
                    state_limit: self.config.guard.max_states,
                    deadline,
                };
                Arc::new(StateGraph::with_config(self.net, config))
            })
            .clone()
    }

    pub fn has_state_graph(&self) -> bool {
        self.state_graph.get().is_some()
    }
}

/// Warnings shared by every analyzer that reads the reachability graph.
pub(crate) fn behavioral_warnings(net: &Net, graph: &StateGraph) -> Vec<String> {
    let mut warnings = Vec::new();
    if graph.truncated {
        warnings.push(if graph.timed_out {
            format!(
                "state-space exploration ran out of time after {} states; results are partial",
                graph.state_count()
            )
        } else {
            format!(
                "state-space exploration stopped at the cap of {} states; results are partial",
                graph.state_limit
            )
        });
    }
    if net.has_guards() {
        warnings.push(
            "transition guards are not evaluated; guarded transitions are treated as unguarded"
                .to_string(),
        );
    }
    warnings
}

/// Convenience: run every selected analyzer against one net with one deadline.
pub fn run_all(
    net: &Net,
    config: &AnalysisConfig,
    selection: &Selection,
    deadline: Deadline,
) -> BTreeMap<AnalyzerKind, AnalysisResult> {
    let ctx = AnalysisContext::new(net, config);
    selection
        .kinds()
        .into_iter()
        .map(|kind| (kind, kind.run(&ctx, deadline)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyzer_names_round_trip() {
        for kind in AnalyzerKind::ALL {
            assert_eq!(kind.name().parse::<AnalyzerKind>().unwrap(), kind);
        }
        assert_eq!(
            "P-Invariants".parse::<AnalyzerKind>().unwrap(),
            AnalyzerKind::PInvariants
        );
        assert!("nope".parse::<AnalyzerKind>().is_err());
    }

    #[test]
    fn selection_parsing() {
        assert_eq!(Selection::parse("all").unwrap(), Selection::All);
        let only = Selection::parse("siphons, hubs,siphons").unwrap();
        assert_eq!(
            only.kinds(),
            vec![AnalyzerKind::Siphons, AnalyzerKind::Hubs]
        );
        assert!(Selection::parse(" , ").is_err());
    }

    #[test]
    fn deadline_semantics() {
        assert!(!Deadline::none().expired());
        assert!(Deadline::after(Duration::ZERO).expired());
        assert!(!Deadline::after(Duration::from_secs(3600)).expired());
    }
}
