//! Analyze many Petri net models in parallel through the shared cache.
use std::process::ExitCode;

use anyhow::{Context, Result};
use pn_analyzer::batch::{BatchJob, BatchRunner};
use pn_analyzer::cache::AnalysisCache;
use pn_analyzer::config::AnalysisConfig;
use pn_analyzer::options::Options;

fn init_logger() {
    if std::env::var("PN_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("PN_LOG")
            .write_style("PN_LOG_STYLE");
        env_logger::init_from_env(e);
    }
}

fn run(options: &Options) -> Result<bool> {
    let config = AnalysisConfig::load_from_file(&options.config)?;

    if let Some(jobs) = options.jobs {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
        {
            log::debug!("thread pool already initialized: {e}");
        }
    }

    let cache_dir = options.cache_dir.clone().or(config.batch.cache_dir.clone());
    let cache = match (options.no_cache, cache_dir) {
        (false, Some(dir)) => Some(
            AnalysisCache::in_directory(&dir)
                .with_context(|| format!("Failed to open cache directory {:?}", dir))?,
        ),
        _ => None,
    };
    if let Some(dir) = &options.output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
    }

    let job = BatchJob {
        models: options.models.clone(),
        selection: options.selection.clone(),
        force: options.force,
        timeout: options.timeout,
        retries: options.retries,
        path_query: options.path_query.clone(),
        estimated_states: options.estimated_states,
        output_dir: options.output.clone(),
    };
    let report = BatchRunner::new(config, cache).run(&job);
    print!("{report}");
    Ok(report.failed() == 0)
}

fn main() -> ExitCode {
    init_logger();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match Options::parse_with_env(&args) {
        Ok(options) => options,
        Err(e) => {
            if let Some(clap_err) = e.downcast_ref::<clap::Error>() {
                clap_err.exit();
            }
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    log::debug!("PN options: {:?}", options);
    match run(&options) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
