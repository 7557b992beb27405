#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Wires the analyzer and the API server into the `doop` binary.

mod analyzer;
mod api;
mod args;
mod config;
mod duration;
mod metrics;
mod server;

pub use self::{
    analyzer::{Analyzer, Target},
    api::Api,
    args::Args,
    config::{Config, StorageConfig},
    metrics::{AnalyzerMetrics, ComplianceMetrics, ComplianceSnapshot},
};
