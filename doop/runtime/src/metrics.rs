use chrono::{DateTime, Utc};
use doop_core::{aggregate_reports, FilterSet, Report, ReportForConstraint};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric},
    metrics::{counter::Counter, family::Family, gauge::ConstGauge, gauge::Gauge, MetricType},
    registry::Registry,
};
use regex::Regex;
use std::{
    collections::BTreeMap,
    sync::{atomic::AtomicU64, Arc},
};

type Labels = Vec<(String, String)>;

/// Computes compliance gauges from the current set of cluster reports.
#[derive(Clone, Debug)]
pub struct ComplianceMetrics {
    object_identity_keys: Vec<String>,
    object_identity_labels: Vec<String>,
}

/// The compliance gauges for one scrape.
#[derive(Debug, Default)]
pub struct ComplianceSnapshot {
    raw_violations: Vec<(Labels, f64)>,
    grouped_violations: Vec<(Labels, f64)>,
    oldest_audit_age: Vec<(Labels, f64)>,
}

/// Tracks the analyzer's collection cycles.
#[derive(Clone, Debug)]
pub struct AnalyzerMetrics {
    cycles: Family<CycleLabels, Counter>,
    last_success: Gauge<f64, AtomicU64>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CycleLabels {
    result: String,
}

// === impl ComplianceMetrics ===

impl ComplianceMetrics {
    /// `object_identity_keys` become extra labels on the violation gauges.
    /// Characters that are not valid in label names are replaced with `_`.
    pub fn new(object_identity_keys: Vec<String>) -> Self {
        let invalid = Regex::new("[^a-zA-Z0-9]").expect("label sanitizer regex must compile");
        let object_identity_labels = object_identity_keys
            .iter()
            .map(|key| invalid.replace_all(key, "_").into_owned())
            .collect();
        Self {
            object_identity_keys,
            object_identity_labels,
        }
    }

    pub fn snapshot(
        &self,
        reports: &BTreeMap<String, Arc<Report>>,
        now: DateTime<Utc>,
    ) -> ComplianceSnapshot {
        let mut snapshot = ComplianceSnapshot::default();

        for (cluster, report) in reports {
            snapshot.oldest_audit_age.push((
                vec![("cluster".to_string(), cluster.clone())],
                oldest_audit_age(cluster, report, now),
            ));
        }

        let full = aggregate_reports(
            reports.iter().map(|(name, report)| (name.as_str(), &**report)),
            &FilterSet::default(),
        );
        for rt in &full.templates {
            // Constraints with differing metadata appear more than once. Count
            // them together so that no label set is emitted twice.
            let mut by_name = BTreeMap::<&str, Vec<&ReportForConstraint>>::new();
            for rc in &rt.constraints {
                by_name.entry(rc.name.as_str()).or_default().push(rc);
            }
            for (name, rcs) in by_name {
                self.count_constraint(&rt.kind, name, &rcs, &mut snapshot);
            }
        }

        snapshot
    }

    fn count_constraint(
        &self,
        template_kind: &str,
        constraint_name: &str,
        rcs: &[&ReportForConstraint],
        snapshot: &mut ComplianceSnapshot,
    ) {
        let mut grouped = BTreeMap::<(&str, Vec<&str>), u64>::new();
        let mut raw = BTreeMap::<(&str, Vec<&str>, &str), u64>::new();
        for rc in rcs {
            let severity = rc.metadata.severity.as_str();
            for vg in &rc.violation_groups {
                let oid = self
                    .object_identity_keys
                    .iter()
                    .map(|key| vg.pattern.object_identity.get(key))
                    .collect::<Vec<_>>();
                *grouped.entry((severity, oid.clone())).or_default() += 1;
                for v in &vg.instances {
                    *raw.entry((severity, oid.clone(), v.cluster_name.as_str()))
                        .or_default() += 1;
                }
            }
        }

        let constraint_labels = |severity: &str, oid: &[&str]| {
            let mut labels = vec![
                ("template_kind".to_string(), template_kind.to_string()),
                ("constraint_name".to_string(), constraint_name.to_string()),
                ("severity".to_string(), severity.to_string()),
            ];
            labels.extend(
                self.object_identity_labels
                    .iter()
                    .zip(oid)
                    .map(|(label, value)| (label.clone(), value.to_string())),
            );
            labels
        };

        for ((severity, oid), count) in grouped {
            snapshot
                .grouped_violations
                .push((constraint_labels(severity, &oid), count as f64));
        }
        for ((severity, oid, cluster), count) in raw {
            let mut labels = vec![("cluster".to_string(), cluster.to_string())];
            labels.extend(constraint_labels(severity, &oid));
            snapshot.raw_violations.push((labels, count as f64));
        }
    }
}

/// Returns the age in seconds of the oldest audit in `report`.
///
/// Reports without audit timestamps yield `-1`. An unparseable timestamp
/// yields `0` so that staleness alerts fire.
fn oldest_audit_age(cluster: &str, report: &Report, now: DateTime<Utc>) -> f64 {
    let mut oldest = None::<f64>;
    for (_, rc) in report.constraints() {
        let timestamp = &rc.metadata.audit_timestamp;
        if timestamp.is_empty() {
            continue;
        }
        match DateTime::parse_from_rfc3339(timestamp) {
            Ok(t) => {
                let age = (now - t.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0;
                oldest = Some(oldest.map_or(age, |o| o.max(age)));
            }
            Err(error) => {
                tracing::error!(%cluster, %timestamp, %error, "Cannot parse audit timestamp");
                return 0.0;
            }
        }
    }
    oldest.unwrap_or(-1.0)
}

// === impl ComplianceSnapshot ===

impl Collector for ComplianceSnapshot {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let gauges = [
            (
                "doop_raw_violations",
                "Number of raw violations, grouped by constraint, source cluster and selected object identity labels.",
                &self.raw_violations,
            ),
            (
                "doop_grouped_violations",
                "Number of violation groups, grouped by constraint and selected object identity labels.",
                &self.grouped_violations,
            ),
            (
                "doop_oldest_audit_age_seconds",
                "Data age for each source cluster.",
                &self.oldest_audit_age,
            ),
        ];

        for (name, help, samples) in gauges {
            let mut family = encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
            for (labels, value) in samples {
                let gauge = ConstGauge::new(*value);
                gauge.encode(family.encode_family(labels)?)?;
            }
        }
        Ok(())
    }
}

// === impl AnalyzerMetrics ===

impl AnalyzerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let cycles = Family::default();
        reg.register(
            "analyzer_cycles",
            "Count of collection cycles by result",
            cycles.clone(),
        );

        let last_success = Gauge::default();
        reg.register(
            "analyzer_last_success_timestamp_seconds",
            "Unix time of the last successful collection cycle",
            last_success.clone(),
        );

        Self {
            cycles,
            last_success,
        }
    }

    pub fn success(&self, now: DateTime<Utc>) {
        self.cycles
            .get_or_create(&CycleLabels {
                result: "success".to_string(),
            })
            .inc();
        self.last_success
            .set(now.timestamp_millis() as f64 / 1000.0);
    }

    pub fn failure(&self) {
        self.cycles
            .get_or_create(&CycleLabels {
                result: "failure".to_string(),
            })
            .inc();
    }
}
