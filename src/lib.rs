//! Petri 网结构与行为分析引擎。
//!
//! Hosts build a [`net::NetModel`], hand it to an [`engine::Engine`] and get
//! back a [`report::MetadataBundle`]: per-analyzer results, ranked findings
//! and a per-element view, cached by model content hash.
pub mod aggregate;
pub mod analysis;
pub mod batch;
pub mod cache;
pub mod config;
pub mod engine;
pub mod net;
pub mod options;
pub mod report;

pub use analysis::{AnalysisResult, AnalyzerKind, Selection};
pub use engine::{AnalysisOutcome, AnalysisRequest, Engine};
