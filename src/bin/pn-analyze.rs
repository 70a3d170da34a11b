//! Analyze one Petri net model and print its metadata bundle.
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use pn_analyzer::cache::AnalysisCache;
use pn_analyzer::config::AnalysisConfig;
use pn_analyzer::engine::{AnalysisRequest, Engine};
use pn_analyzer::net::io;
use pn_analyzer::options::Options;

fn init_logger() {
    if std::env::var("PN_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("PN_LOG")
            .write_style("PN_LOG_STYLE");
        env_logger::init_from_env(e);
    }
}

fn parse_options() -> Options {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match Options::parse_with_env(&args) {
        Ok(options) => options,
        Err(e) => {
            if let Some(clap_err) = e.downcast_ref::<clap::Error>() {
                clap_err.exit();
            }
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    }
}

fn run(options: &Options) -> Result<bool> {
    let [model_path] = options.models.as_slice() else {
        bail!("pn-analyze takes exactly one model; use pn-batch for several");
    };
    let config = AnalysisConfig::load_from_file(&options.config)?;
    let model = io::read_model(model_path)
        .with_context(|| format!("Failed to load model {:?}", model_path))?;

    let mut engine = Engine::new(config.clone());
    let cache_dir = options.cache_dir.clone().or(config.batch.cache_dir.clone());
    if let (false, Some(dir)) = (options.no_cache, cache_dir) {
        let cache = AnalysisCache::in_directory(&dir)
            .with_context(|| format!("Failed to open cache directory {:?}", dir))?;
        engine = engine.with_cache(cache);
    }

    let request = AnalysisRequest::new(&model)
        .selection(options.selection.clone())
        .force(options.force)
        .timeout(options.timeout)
        .retries(options.retries.unwrap_or(0))
        .path_query(options.path_query.clone())
        .estimated_states(options.estimated_states);
    let outcome = engine.run(&request);
    let bundle = &outcome.bundle;

    if options.json {
        println!("{}", serde_json::to_string_pretty(bundle)?);
    } else {
        print!("{bundle}");
    }
    if let Some(output) = &options.output {
        let path = output.to_string_lossy();
        bundle
            .save_to_file(&path)
            .with_context(|| format!("Failed to write report {path}"))?;
        log::info!("report written to {path} and {path}.json");
    }
    Ok(!bundle.has_errors())
}

fn main() -> ExitCode {
    init_logger();
    let options = parse_options();
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
