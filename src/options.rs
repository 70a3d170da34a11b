//! Parsing Options.
//! `--analyzers {list}` or `-a`, comma separated analyzer names or `all`.
//! Extra flags can be passed through the `PN_FLAGS` environment variable.

use clap::{Arg, ArgAction, Command};
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use crate::analysis::{PathQuery, Selection};

pub const DEFAULT_CONFIG_FILE: &str = "pn-analyzer.toml";

fn make_options_parser() -> clap::Command {
    Command::new("pn-analyzer")
        .no_binary_name(true)
        .version("v0.1.0")
        .about("Structural and behavioral analysis of Petri net models")
        .arg(
            Arg::new("models")
                .value_name("MODEL")
                .help("Model files (.json, .ron, .yaml)")
                .num_args(1..)
                .required(true),
        )
        .arg(
            Arg::new("analyzers")
                .short('a')
                .long("analyzers")
                .help("Analyzers to run, `all` or a comma separated list")
                .default_value("all"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Threshold configuration (TOML)")
                .default_value(DEFAULT_CONFIG_FILE),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PATH")
                .help("Report file (pn-analyze) or report directory (pn-batch)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the bundle as JSON instead of text"),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Ignore cached results"),
        )
        .arg(
            Arg::new("cache-dir")
                .long("cache-dir")
                .value_name("DIR")
                .help("Directory of cached bundles"),
        )
        .arg(
            Arg::new("no-cache")
                .long("no-cache")
                .action(ArgAction::SetTrue)
                .conflicts_with("cache-dir")
                .help("Neither read nor write the cache"),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("SECS")
                .value_parser(clap::value_parser!(u64))
                .help("Time budget per analyzer"),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .value_parser(clap::value_parser!(u32))
                .help("Extra attempts for a failing analyzer"),
        )
        .arg(
            Arg::new("source")
                .long("source")
                .value_name("NODE")
                .requires("target")
                .help("Restrict path enumeration to paths starting here"),
        )
        .arg(
            Arg::new("target")
                .long("target")
                .value_name("NODE")
                .requires("source"),
        )
        .arg(
            Arg::new("estimated-states")
                .long("estimated-states")
                .value_parser(clap::value_parser!(u64))
                .help("Expected reachable state count, checked before exploration"),
        )
        .arg(
            Arg::new("jobs")
                .short('j')
                .long("jobs")
                .value_parser(clap::value_parser!(usize))
                .help("Worker threads for batch runs"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub models: Vec<PathBuf>,
    pub selection: Selection,
    pub config: PathBuf,
    pub output: Option<PathBuf>,
    pub json: bool,
    pub force: bool,
    pub cache_dir: Option<PathBuf>,
    pub no_cache: bool,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub path_query: Option<PathQuery>,
    pub estimated_states: Option<u64>,
    pub jobs: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            models: Vec::new(),
            selection: Selection::All,
            config: PathBuf::from(DEFAULT_CONFIG_FILE),
            output: None,
            json: false,
            force: false,
            cache_dir: None,
            no_cache: false,
            timeout: None,
            retries: None,
            path_query: None,
            estimated_states: None,
            jobs: None,
        }
    }
}

impl Options {
    pub fn parse_from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        let flags = shellwords::split(s)?;
        Self::parse_from_args(&flags)
    }

    /// `PN_FLAGS` first, then the command line, so explicit arguments win.
    pub fn parse_with_env(args: &[String]) -> Result<Self, Box<dyn Error>> {
        let mut flags = shellwords::split(&std::env::var("PN_FLAGS").unwrap_or_default())?;
        flags.extend(args.iter().cloned());
        Self::parse_from_args(&flags)
    }

    pub fn parse_from_args(flags: &[String]) -> Result<Self, Box<dyn Error>> {
        let app = make_options_parser();
        let matches = app.try_get_matches_from(flags.iter())?;

        let models = matches
            .get_many::<String>("models")
            .map(|values| values.map(PathBuf::from).collect())
            .unwrap_or_default();
        let selection = match matches.get_one::<String>("analyzers") {
            Some(spec) => Selection::parse(spec)?,
            None => Selection::All,
        };
        let config = matches
            .get_one::<String>("config")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let path_query = match (
            matches.get_one::<String>("source"),
            matches.get_one::<String>("target"),
        ) {
            (Some(source), Some(target)) => Some(PathQuery {
                source: source.clone(),
                target: target.clone(),
            }),
            _ => None,
        };

        Ok(Options {
            models,
            selection,
            config,
            output: matches.get_one::<String>("output").map(PathBuf::from),
            json: matches.get_flag("json"),
            force: matches.get_flag("force"),
            cache_dir: matches.get_one::<String>("cache-dir").map(PathBuf::from),
            no_cache: matches.get_flag("no-cache"),
            timeout: matches
                .get_one::<u64>("timeout")
                .map(|secs| Duration::from_secs(*secs)),
            retries: matches.get_one::<u32>("retries").copied(),
            path_query,
            estimated_states: matches.get_one::<u64>("estimated-states").copied(),
            jobs: matches.get_one::<usize>("jobs").copied(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalyzerKind;

    #[test]
    fn test_parse_from_str() {
        let options =
            Options::parse_from_str("net.json -a siphons,traps --timeout 5 --force").unwrap();
        assert_eq!(options.models, vec![PathBuf::from("net.json")]);
        assert_eq!(
            options.selection.kinds(),
            vec![AnalyzerKind::Siphons, AnalyzerKind::Traps]
        );
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert!(options.force);
        assert!(!options.json);
        assert_eq!(options.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_parse_from_str_err() {
        assert!(Options::parse_from_str("net.json -a unknown").is_err());
        assert!(Options::parse_from_str("-a all").is_err());
        assert!(Options::parse_from_str("net.json --source p1").is_err());
        assert!(Options::parse_from_str("net.json --no-cache --cache-dir x").is_err());
    }

    #[test]
    fn test_path_query() {
        let options = Options::parse_from_args(&[
            "a.ron".to_owned(),
            "b.yaml".to_owned(),
            "--source".to_owned(),
            "p1".to_owned(),
            "--target".to_owned(),
            "t2".to_owned(),
        ])
        .unwrap();
        assert_eq!(options.models.len(), 2);
        assert_eq!(
            options.path_query,
            Some(PathQuery {
                source: "p1".into(),
                target: "t2".into()
            })
        );
    }
}
