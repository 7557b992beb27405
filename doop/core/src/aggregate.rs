use crate::{
    filter::FilterSet,
    report::{AggregatedReport, Report, ReportForConstraint, ReportForTemplate},
    violation::ViolationGroup,
};

/// Merges grouped cluster reports into one [`AggregatedReport`].
///
/// Each level (cluster, template, constraint, violation group) is filtered
/// and then merged into an equal entry of the aggregate if there is one.
/// Templates and constraints only appear in the aggregate if something below
/// them survives the filters. Clusters that pass the filter are always listed
/// in `cluster_identities`.
#[derive(Debug)]
pub struct Aggregator<'f> {
    filters: &'f FilterSet,
    target: AggregatedReport,
}

/// Aggregates `(cluster name, report)` pairs under `filters`.
pub fn aggregate_reports<'a>(
    reports: impl IntoIterator<Item = (&'a str, &'a Report)>,
    filters: &FilterSet,
) -> AggregatedReport {
    let mut aggregator = Aggregator::new(filters);
    for (name, report) in reports {
        aggregator.add_cluster(name, report);
    }
    aggregator.finish()
}

// === impl Aggregator ===

impl<'f> Aggregator<'f> {
    pub fn new(filters: &'f FilterSet) -> Self {
        Self {
            filters,
            target: AggregatedReport::default(),
        }
    }

    pub fn add_cluster(&mut self, name: &str, report: &Report) {
        if !self.filters.match_cluster_identity(&report.cluster_identity) {
            tracing::trace!(cluster = %name, "Cluster filtered out");
            return;
        }

        self.target
            .cluster_identities
            .insert(name.to_string(), report.cluster_identity.clone());
        for rt in &report.templates {
            self.visit_template(rt);
        }
    }

    pub fn finish(self) -> AggregatedReport {
        self.target
    }

    fn visit_template(&mut self, rt: &ReportForTemplate) {
        let filters = self.filters;
        if !filters.match_template_kind(&rt.kind) {
            return;
        }

        if let Some(existing) = self
            .target
            .templates
            .iter_mut()
            .find(|candidate| candidate.kind == rt.kind)
        {
            for rc in &rt.constraints {
                visit_constraint(filters, existing, rc);
            }
            return;
        }

        let mut merged = ReportForTemplate {
            kind: rt.kind.clone(),
            constraints: Vec::new(),
        };
        for rc in &rt.constraints {
            visit_constraint(filters, &mut merged, rc);
        }
        if !merged.constraints.is_empty() {
            self.target.templates.push(merged);
        }
    }
}

fn visit_constraint(filters: &FilterSet, target: &mut ReportForTemplate, rc: &ReportForConstraint) {
    if !filters.match_constraint_name(&rc.name) || !filters.match_severity(&rc.metadata.severity) {
        return;
    }

    // The audit timestamp differs per cluster and is not part of the
    // constraint's identity.
    let metadata = rc.metadata.without_audit_timestamp();

    if let Some(existing) = target
        .constraints
        .iter_mut()
        .find(|candidate| candidate.name == rc.name && candidate.metadata == metadata)
    {
        for vg in &rc.violation_groups {
            visit_violation_group(filters, existing, vg);
        }
        return;
    }

    let mut merged = ReportForConstraint {
        name: rc.name.clone(),
        metadata,
        violations: Vec::new(),
        violation_groups: Vec::new(),
    };
    for vg in &rc.violation_groups {
        visit_violation_group(filters, &mut merged, vg);
    }
    if !merged.violation_groups.is_empty() {
        target.constraints.push(merged);
    }
}

fn visit_violation_group(filters: &FilterSet, target: &mut ReportForConstraint, vg: &ViolationGroup) {
    if !filters.match_object_identity(&vg.pattern.object_identity) {
        return;
    }

    match target
        .violation_groups
        .iter_mut()
        .find(|candidate| candidate.pattern == vg.pattern)
    {
        Some(existing) => existing.instances.extend(vg.instances.iter().cloned()),
        None => target.violation_groups.push(vg.clone()),
    }
}
