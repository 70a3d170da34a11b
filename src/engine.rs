//! 分析引擎：一次会话的完整流程。
//!
//! model → content hash → cache lookup → validated [`Net`] → analyzers →
//! element view → [`MetadataBundle`] → cache store.
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crate::aggregate::{ElementView, aggregate};
use crate::analysis::{
    AnalysisContext, AnalysisResult, AnalyzerKind, Deadline, PathQuery, Selection,
};
use crate::cache::{AnalysisCache, content_hash, session_fingerprint};
use crate::config::AnalysisConfig;
use crate::net::{Net, NetModel, Snapshot};
use crate::report::{BundleInputs, MetadataBundle};

/// One analysis session request.
#[derive(Debug, Clone)]
pub struct AnalysisRequest<'a> {
    pub model: &'a NetModel,
    pub snapshot: Option<&'a Snapshot>,
    pub selection: Selection,
    /// Skip the cache lookup; the fresh bundle still replaces the stored one.
    pub force: bool,
    /// Budget for each analyzer, not for the whole session.
    pub timeout: Option<Duration>,
    /// Extra attempts for an analyzer that failed or panicked.
    pub retries: u32,
    pub path_query: Option<PathQuery>,
    /// Host estimate of the reachable state count, checked by the size guard.
    pub estimated_states: Option<u64>,
}

impl<'a> AnalysisRequest<'a> {
    pub fn new(model: &'a NetModel) -> Self {
        Self {
            model,
            snapshot: None,
            selection: Selection::All,
            force: false,
            timeout: None,
            retries: 0,
            path_query: None,
            estimated_states: None,
        }
    }

    pub fn snapshot(mut self, snapshot: Option<&'a Snapshot>) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn path_query(mut self, query: Option<PathQuery>) -> Self {
        self.path_query = query;
        self
    }

    pub fn estimated_states(mut self, estimate: Option<u64>) -> Self {
        self.estimated_states = estimate;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub bundle: MetadataBundle,
    /// Raw analyzer output; `None` when the bundle came from the cache.
    pub results: Option<BTreeMap<AnalyzerKind, AnalysisResult>>,
}

impl AnalysisOutcome {
    pub fn cached(&self) -> bool {
        self.bundle.performance.cached
    }

    pub fn elements(&self) -> &ElementView {
        &self.bundle.elements
    }

    pub fn result(&self, kind: AnalyzerKind) -> Option<&AnalysisResult> {
        self.results.as_ref()?.get(&kind)
    }
}

#[derive(Clone, Default)]
pub struct Engine {
    config: AnalysisConfig,
    cache: Option<AnalysisCache>,
}

impl Engine {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: AnalysisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&AnalysisCache> {
        self.cache.as_ref()
    }

    /// Runs a single analyzer without touching the cache.
    pub fn analyze(&self, model: &NetModel, kind: AnalyzerKind) -> AnalysisResult {
        let request = AnalysisRequest::new(model).selection(Selection::Only(vec![kind]));
        let net = match Net::from_model(model) {
            Ok(net) => net,
            Err(e) => return AnalysisResult::failed(kind, format!("malformed model: {e}")),
        };
        self.run_kinds(&net, &[kind], &request)
            .remove(&kind)
            .unwrap_or_else(|| AnalysisResult::failed(kind, "analyzer produced no result"))
    }

    pub fn analyze_all(
        &self,
        model: &NetModel,
        selection: &Selection,
        force: bool,
    ) -> AnalysisOutcome {
        self.run(
            &AnalysisRequest::new(model)
                .selection(selection.clone())
                .force(force),
        )
    }

    ///执行一次完整的分析会话
    pub fn run(&self, request: &AnalysisRequest<'_>) -> AnalysisOutcome {
        let hash = content_hash(request.model, request.snapshot);
        let fingerprint = session_fingerprint(
            &self.config,
            request.path_query.as_ref(),
            request.estimated_states,
        );
        let kinds = request.selection.kinds();

        let session_lock = self.cache.as_ref().map(|cache| cache.lock_for(&hash));
        let _session = session_lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));

        if let Some(cache) = &self.cache {
            if !request.force {
                if let Some(bundle) = cache.lookup(&hash, &fingerprint, &kinds) {
                    log::info!(
                        "cache hit for {} ({})",
                        request.model.name.as_deref().unwrap_or("<unnamed>"),
                        hash
                    );
                    return AnalysisOutcome {
                        bundle,
                        results: None,
                    };
                }
            }
        }

        let started = Instant::now();
        let (results, elements) =
            match Net::from_model_with_snapshot(request.model, request.snapshot) {
                Ok(net) => {
                    let results = self.run_kinds(&net, &kinds, request);
                    let elements = aggregate(Some(&net), &results);
                    (results, elements)
                }
                Err(e) => {
                    log::warn!("model rejected: {e}");
                    let results: BTreeMap<AnalyzerKind, AnalysisResult> = kinds
                        .iter()
                        .map(|&kind| {
                            (
                                kind,
                                AnalysisResult::failed(kind, format!("malformed model: {e}")),
                            )
                        })
                        .collect();
                    let elements = aggregate(None, &results);
                    (results, elements)
                }
            };

        let bundle = MetadataBundle::build(BundleInputs {
            model: request.model,
            hash,
            config_fingerprint: fingerprint,
            results: &results,
            elements,
            total: started.elapsed(),
        });
        log::info!(
            "analyzed {} in {:?}: {} analyzer(s), {} blocked",
            request.model.name.as_deref().unwrap_or("<unnamed>"),
            bundle.performance.total,
            bundle.analyzers.len(),
            bundle.blocked.len()
        );

        if let Some(cache) = &self.cache {
            if bundle.has_errors() {
                log::debug!("not caching {}: some analyzers failed", bundle.model.hash);
            } else if results.values().any(|result| result.metadata.timed_out) {
                log::debug!("not caching {}: some analyzers ran out of time", bundle.model.hash);
            } else if let Err(e) = cache.insert(&bundle) {
                log::warn!("failed to store bundle {}: {e}", bundle.model.hash);
            }
        }

        AnalysisOutcome {
            bundle,
            results: Some(results),
        }
    }

    fn run_kinds(
        &self,
        net: &Net,
        kinds: &[AnalyzerKind],
        request: &AnalysisRequest<'_>,
    ) -> BTreeMap<AnalyzerKind, AnalysisResult> {
        let fresh_context = || {
            AnalysisContext::new(net, &self.config)
                .with_path_query(request.path_query.clone())
                .with_estimated_states(request.estimated_states)
        };
        let mut ctx = fresh_context();
        let mut results = BTreeMap::new();
        for &kind in kinds {
            let mut attempt = 0;
            let result = loop {
                let deadline = Deadline::from_timeout(request.timeout);
                let result = run_isolated(kind, &ctx, deadline);
                if result.success || result.is_blocked() || attempt >= request.retries {
                    break result;
                }
                attempt += 1;
                log::warn!(
                    "{kind} failed ({}), retrying ({attempt}/{})",
                    result.errors.join("; "),
                    request.retries
                );
                // a failed attempt may have left a partial state graph behind
                ctx = fresh_context();
            };
            results.insert(kind, result);
        }
        results
    }
}

/// A panicking analyzer turns into a failed result; the session goes on.
fn run_isolated(kind: AnalyzerKind, ctx: &AnalysisContext<'_>, deadline: Deadline) -> AnalysisResult {
    match panic::catch_unwind(AssertUnwindSafe(|| kind.run(ctx, deadline))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("{kind} panicked: {message}");
            AnalysisResult::failed(kind, format!("analyzer panicked: {message}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Payload;

    fn ring() -> NetModel {
        NetModel::new("ring")
            .place("p1", 1.0)
            .place("p2", 0.0)
            .transition("t1")
            .transition("t2")
            .arc("p1", "t1")
            .arc("t1", "p2")
            .arc("p2", "t2")
            .arc("t2", "p1")
    }

    #[test]
    fn single_analyzer() {
        let engine = Engine::default();
        let result = engine.analyze(&ring(), AnalyzerKind::TInvariants);
        assert!(result.success);
        let Payload::Invariants(report) = result.payload else {
            panic!("unexpected payload");
        };
        assert_eq!(report.invariants.len(), 1);
    }

    #[test]
    fn malformed_model_fails_every_requested_analyzer() {
        let model = NetModel::new("bad").place("p", 1.0).arc("p", "ghost");
        let engine = Engine::default();
        let outcome = engine.analyze_all(&model, &Selection::All, false);
        let results = outcome.results.unwrap();
        assert_eq!(results.len(), AnalyzerKind::ALL.len());
        assert!(results.values().all(|r| !r.success && !r.errors.is_empty()));
        assert_eq!(outcome.bundle.elements.failed.len(), AnalyzerKind::ALL.len());
        assert!(outcome.bundle.has_errors());
    }

    #[test]
    fn second_run_is_served_from_cache() {
        let engine = Engine::default().with_cache(AnalysisCache::in_memory());
        let first = engine.analyze_all(&ring(), &Selection::All, false);
        assert!(!first.cached());
        let second = engine.analyze_all(&ring(), &Selection::All, false);
        assert!(second.cached());
        assert!(second.results.is_none());
        assert_eq!(second.elements(), first.elements());

        let forced = engine.analyze_all(&ring(), &Selection::All, true);
        assert!(!forced.cached());
    }

    #[test]
    fn narrower_selection_hits_wider_bundle() {
        let engine = Engine::default().with_cache(AnalysisCache::in_memory());
        engine.analyze_all(&ring(), &Selection::All, false);
        let hubs = Selection::Only(vec![AnalyzerKind::Hubs]);
        assert!(engine.analyze_all(&ring(), &hubs, false).cached());

        let engine = Engine::default().with_cache(AnalysisCache::in_memory());
        engine.analyze_all(&ring(), &hubs, false);
        assert!(!engine.analyze_all(&ring(), &Selection::All, false).cached());
    }

    #[test]
    fn expired_budget_stops_behavioral_exploration() {
        let model = NetModel::new("pump")
            .place("p", 1.0)
            .transition("t")
            .arc("p", "t")
            .weighted_arc("t", "p", 2, crate::net::ArcKind::Normal);
        let engine = Engine::default();
        let outcome = engine.run(
            &AnalysisRequest::new(&model)
                .selection(Selection::Only(vec![AnalyzerKind::Reachability]))
                .timeout(Some(Duration::ZERO)),
        );
        let result = outcome.result(AnalyzerKind::Reachability).unwrap();
        assert!(result.metadata.timed_out);
    }

    #[test]
    fn state_estimate_is_part_of_the_cache_key() {
        let engine = Engine::default().with_cache(AnalysisCache::in_memory());
        let model = ring();
        let reachability = Selection::Only(vec![AnalyzerKind::Reachability]);
        let estimated = engine.run(
            &AnalysisRequest::new(&model)
                .selection(reachability.clone())
                .estimated_states(Some(10_000_000)),
        );
        assert!(estimated.result(AnalyzerKind::Reachability).unwrap().is_blocked());

        let plain = engine.run(&AnalysisRequest::new(&model).selection(reachability.clone()));
        assert!(!plain.cached());
        let result = plain.result(AnalyzerKind::Reachability).unwrap();
        assert!(result.success && !result.is_blocked());

        let again = engine.run(&AnalysisRequest::new(&model).selection(reachability));
        assert!(again.cached());
    }

    #[test]
    fn path_query_is_part_of_the_cache_key() {
        let engine = Engine::default().with_cache(AnalysisCache::in_memory());
        let model = ring();
        let paths = |source: &str, target: &str| {
            AnalysisRequest::new(&model)
                .selection(Selection::Only(vec![AnalyzerKind::Paths]))
                .path_query(Some(PathQuery {
                    source: source.into(),
                    target: target.into(),
                }))
        };
        assert!(!engine.run(&paths("p1", "p2")).cached());
        let other = engine.run(&paths("p2", "t1"));
        assert!(!other.cached());
        let Payload::Paths(report) = &other.result(AnalyzerKind::Paths).unwrap().payload else {
            panic!("unexpected payload");
        };
        assert!(!report.paths.is_empty());
        assert!(report.paths.iter().all(|path| path.nodes.first().map(String::as_str) == Some("p2")));
        assert!(engine.run(&paths("p2", "t1")).cached());
    }

    #[test]
    fn timed_out_runs_are_not_cached() {
        let cache = AnalysisCache::in_memory();
        let engine = Engine::default().with_cache(cache.clone());
        let model = ring();
        let request = AnalysisRequest::new(&model)
            .selection(Selection::Only(vec![AnalyzerKind::Reachability]))
            .timeout(Some(Duration::ZERO));
        let outcome = engine.run(&request);
        assert!(outcome.result(AnalyzerKind::Reachability).unwrap().metadata.timed_out);
        assert!(cache.entries().unwrap().is_empty());
        assert!(!engine.run(&request).cached());
    }

    #[test]
    fn snapshot_drives_behavioral_analysis() {
        let engine = Engine::default().with_cache(AnalysisCache::in_memory());
        let model = ring();
        let empty = Snapshot {
            marking: BTreeMap::from([("p1".to_string(), 0.0)]),
        };
        let selection = Selection::Only(vec![AnalyzerKind::Reachability, AnalyzerKind::Deadlocks]);
        let live = engine.run(&AnalysisRequest::new(&model).selection(selection.clone()));
        let frozen = engine.run(
            &AnalysisRequest::new(&model)
                .selection(selection)
                .snapshot(Some(&empty)),
        );
        assert!(!frozen.cached());
        assert_ne!(frozen.bundle.model.hash, live.bundle.model.hash);

        let Payload::Reachability(r) = &frozen.result(AnalyzerKind::Reachability).unwrap().payload
        else {
            panic!("unexpected payload");
        };
        assert_eq!(r.state_count, 1);
        let Payload::Deadlocks(d) = &frozen.result(AnalyzerKind::Deadlocks).unwrap().payload else {
            panic!("unexpected payload");
        };
        assert_eq!(d.deadlocks.len(), 1);
        assert_eq!(d.deadlock_free, Some(false));
        assert_eq!(d.deadlocks[0].marking["p1"], 0);
    }

    #[test]
    fn marking_above_capacity_fails_every_analyzer() {
        let model = ring().capacity("p1", 0);
        let outcome = Engine::default().analyze_all(&model, &Selection::All, false);
        let results = outcome.results.unwrap();
        assert_eq!(results.len(), AnalyzerKind::ALL.len());
        for result in results.values() {
            assert!(!result.success);
            assert!(result.errors[0].contains("capacity is 0"));
        }
    }
}
