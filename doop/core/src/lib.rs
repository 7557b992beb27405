//! Policy violation normalization and cross-cluster aggregation.
//!
//! Each cluster collects the violations that Gatekeeper reports for its
//! constraints and groups them once, at collection time:
//!
//! ```text
//! [ Violation ] -> processing rules -> merging rules -> [ ViolationGroup { pattern, instances } ]
//! ```
//!
//! Instances are stored as differences to their group's pattern, so a group
//! of pods that only differ in their name suffix costs little more than the
//! names themselves.
//!
//! The central tier loads one grouped [`Report`] per cluster and merges them
//! into an [`AggregatedReport`] for every query, filtering each level with a
//! [`FilterSet`].

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod aggregate;
pub mod filter;
pub mod identity;
pub mod process;
pub mod report;
pub mod rules;
pub mod violation;

pub use self::{
    aggregate::{aggregate_reports, Aggregator},
    filter::FilterSet,
    identity::{MessageParser, ObjectIdentity, ParsedMessage},
    process::GroupBuilder,
    report::{AggregatedReport, ClusterIdentity, Metadata, Report, ReportForConstraint, ReportForTemplate},
    rules::{InvalidRule, RuleConfig, RuleSet},
    violation::{Violation, ViolationGroup},
};
