use crate::violation::{Violation, ViolationGroup};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ClusterIdentity = BTreeMap<String, String>;

/// The snapshot that one cluster emits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Report {
    #[serde(default)]
    pub cluster_identity: ClusterIdentity,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub templates: Vec<ReportForTemplate>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReportForTemplate {
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub constraints: Vec<ReportForConstraint>,
}

/// Before grouping only `violations` is filled; afterwards only
/// `violation_groups` is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReportForConstraint {
    pub name: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violation_groups: Vec<ViolationGroup>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub severity: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template_source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub constraint_source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docstring: String,
    #[serde(default, rename = "auditTimestamp")]
    pub audit_timestamp: String,
}

/// The merged view over many cluster reports. Built per query and never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AggregatedReport {
    pub cluster_identities: BTreeMap<String, ClusterIdentity>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub templates: Vec<ReportForTemplate>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// === impl Report ===

impl Report {
    /// Tags every group instance with the name of the cluster that reported it.
    pub fn set_cluster_name(&mut self, name: &str) {
        let instances = self
            .templates
            .iter_mut()
            .flat_map(|rt| rt.constraints.iter_mut())
            .flat_map(|rc| rc.violation_groups.iter_mut())
            .flat_map(|vg| vg.instances.iter_mut());
        for instance in instances {
            instance.cluster_name = name.to_string();
        }
    }

    pub fn constraints(&self) -> impl Iterator<Item = (&ReportForTemplate, &ReportForConstraint)> {
        self.templates
            .iter()
            .flat_map(|rt| rt.constraints.iter().map(move |rc| (rt, rc)))
    }
}

// === impl Metadata ===

impl Metadata {
    /// Returns the metadata without the cluster-specific audit timestamp, for
    /// comparing constraints across clusters.
    pub fn without_audit_timestamp(&self) -> Metadata {
        Metadata {
            audit_timestamp: String::new(),
            ..self.clone()
        }
    }
}

// === impl AggregatedReport ===

impl AggregatedReport {
    /// Puts every list into a deterministic order.
    pub fn sort(&mut self) {
        self.templates.sort_by(|a, b| a.kind.cmp(&b.kind));
        for rt in &mut self.templates {
            rt.constraints.sort_by(|a, b| {
                a.name
                    .cmp(&b.name)
                    .then_with(|| a.metadata.severity.cmp(&b.metadata.severity))
            });
            for rc in &mut rt.constraints {
                for vg in &mut rc.violation_groups {
                    vg.instances.sort_by(|a, b| a.compare_to(b));
                }
                rc.violation_groups.sort_by(|a, b| {
                    a.pattern
                        .compare_to(&b.pattern)
                        .then_with(|| a.pattern.object_identity.cmp(&b.pattern.object_identity))
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_wire_format() {
        let report: Report = serde_json::from_value(serde_json::json!({
            "cluster_identity": {"number": "one"},
            "templates": [{
                "kind": "GkFirstTemplate",
                "constraints": [{
                    "name": "firstconstraint",
                    "metadata": {"severity": "warning", "auditTimestamp": "2023-01-01T00:00:00Z"},
                    "violation_groups": [{
                        "pattern": {"kind": "Pod", "name": "worker-<variable>"},
                        "instances": [{"name": "worker-abcde"}, {}]
                    }]
                }]
            }]
        }))
        .unwrap();

        let rc = &report.templates[0].constraints[0];
        assert!(rc.violations.is_empty());
        assert_eq!(rc.metadata.audit_timestamp, "2023-01-01T00:00:00Z");
        assert_eq!(rc.violation_groups[0].instances.len(), 2);
    }

    #[test]
    fn tags_instances_only() {
        let mut report = Report {
            templates: vec![ReportForTemplate {
                kind: "GkFirstTemplate".to_string(),
                constraints: vec![ReportForConstraint {
                    name: "firstconstraint".to_string(),
                    violation_groups: vec![ViolationGroup {
                        pattern: Violation::default(),
                        instances: vec![Violation::default(), Violation::default()],
                    }],
                    ..ReportForConstraint::default()
                }],
            }],
            ..Report::default()
        };
        report.set_cluster_name("cluster1");

        let vg = &report.templates[0].constraints[0].violation_groups[0];
        assert_eq!(vg.pattern.cluster_name, "");
        assert!(vg.instances.iter().all(|v| v.cluster_name == "cluster1"));
    }

    #[test]
    fn aggregated_report_keeps_empty_templates_list() {
        let report = AggregatedReport::default();
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({"cluster_identities": {}, "templates": []}),
        );
    }
}
