//! 批处理：并行分析多个模型文件，共用同一缓存。
//!
//! Models run in parallel on the rayon pool. Each model's analyzers run
//! sequentially inside [`Engine::run`], with a per-analyzer budget and
//! retries taken from the job or from [`BatchConfig`](crate::config::BatchConfig).
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use thiserror::Error;

use crate::analysis::{PathQuery, Selection};
use crate::cache::AnalysisCache;
use crate::config::AnalysisConfig;
use crate::engine::{AnalysisRequest, Engine};
use crate::net::io::{self, IoError};
use crate::report::MetadataBundle;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("cannot read model {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: IoError,
    },
    #[error("cannot write report {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: IoError,
    },
}

#[derive(Debug, Clone, Default)]
pub struct BatchJob {
    pub models: Vec<PathBuf>,
    pub selection: Selection,
    pub force: bool,
    /// Per-analyzer budget; falls back to the configured batch timeout.
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    /// Applied to every model; ids missing from a model fail its Paths run.
    pub path_query: Option<PathQuery>,
    pub estimated_states: Option<u64>,
    /// Writes `<model stem>.json` per model when set.
    pub output_dir: Option<PathBuf>,
}

impl BatchJob {
    pub fn single<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            models: vec![path.into()],
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct BatchItem {
    pub path: PathBuf,
    pub outcome: Result<MetadataBundle, BatchError>,
}

impl BatchItem {
    pub fn cached(&self) -> bool {
        self.outcome
            .as_ref()
            .is_ok_and(|bundle| bundle.performance.cached)
    }

    /// Loaded and analyzed with no analyzer in the error state.
    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_ok_and(|bundle| !bundle.has_errors())
    }
}

#[derive(Debug)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.succeeded()).count()
    }

    pub fn cached(&self) -> usize {
        self.items.iter().filter(|item| item.cached()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            match &item.outcome {
                Ok(bundle) => {
                    let warnings = bundle
                        .key_findings
                        .iter()
                        .filter(|finding| finding.severity == crate::report::Severity::Warning)
                        .count();
                    writeln!(
                        f,
                        "{:<40} {} {:>3} warning(s) {:>4} blocked {}",
                        item.path.display(),
                        &bundle.model.hash[..12.min(bundle.model.hash.len())],
                        warnings,
                        bundle.blocked.len(),
                        if bundle.performance.cached {
                            "(cached)"
                        } else if bundle.has_errors() {
                            "(errors)"
                        } else {
                            ""
                        }
                    )?;
                }
                Err(e) => writeln!(f, "{:<40} failed: {e}", item.path.display())?,
            }
        }
        writeln!(
            f,
            "{} model(s): {} ok, {} cached, {} failed in {:?}",
            self.items.len(),
            self.succeeded(),
            self.cached(),
            self.failed(),
            self.elapsed
        )
    }
}

pub struct BatchRunner {
    engine: Engine,
}

impl BatchRunner {
    pub fn new(config: AnalysisConfig, cache: Option<AnalysisCache>) -> Self {
        let engine = Engine::new(config);
        let engine = match cache {
            Some(cache) => engine.with_cache(cache),
            None => engine,
        };
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn run(&self, job: &BatchJob) -> BatchReport {
        let started = Instant::now();
        log::info!("batch: {} model(s)", job.models.len());
        let items = job
            .models
            .par_iter()
            .map(|path| BatchItem {
                path: path.clone(),
                outcome: self.run_one(path, job),
            })
            .collect();
        BatchReport {
            items,
            elapsed: started.elapsed(),
        }
    }

    fn run_one(&self, path: &Path, job: &BatchJob) -> Result<MetadataBundle, BatchError> {
        let model = io::read_model(path).map_err(|source| BatchError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let batch = &self.engine.config().batch;
        let request = AnalysisRequest::new(&model)
            .selection(job.selection.clone())
            .force(job.force)
            .timeout(Some(job.timeout.unwrap_or_else(|| batch.timeout())))
            .retries(job.retries.unwrap_or(batch.retries))
            .path_query(job.path_query.clone())
            .estimated_states(job.estimated_states);
        let outcome = self.engine.run(&request);
        log::debug!(
            "{}: {} (cached: {})",
            path.display(),
            outcome.bundle.model.hash,
            outcome.cached()
        );

        if let Some(dir) = &job.output_dir {
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| outcome.bundle.model.hash.clone());
            let target = dir.join(format!("{stem}.json"));
            io::write_json(&target, &outcome.bundle).map_err(|source| BatchError::Write {
                path: target.clone(),
                source,
            })?;
        }
        Ok(outcome.bundle)
    }
}
