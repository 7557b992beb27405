#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Builds a cluster's raw violation report from Gatekeeper audit results.

mod client;

pub use self::client::KubePolicySource;
use doop_core::{
    ClusterIdentity, Metadata, MessageParser, Report, ReportForConstraint, ReportForTemplate,
    Violation,
};
use doop_k8s_api::{Constraint, ConstraintTemplate};
use thiserror::Error;
use tracing::{debug, instrument};

/// Lists the Gatekeeper resources of one cluster.
#[async_trait::async_trait]
pub trait PolicySource {
    async fn list_constraint_templates(&self) -> Result<Vec<ConstraintTemplate>, Error>;

    async fn list_constraints(&self, template: &ConstraintTemplate)
        -> Result<Vec<Constraint>, Error>;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot list ConstraintTemplates: {0}")]
    ListTemplates(#[source] kube::Error),

    #[error("cannot list constraints for {kind}: {source}")]
    ListConstraints { kind: String, source: kube::Error },

    #[error("cannot decode constraint of kind {kind}: {source}")]
    Decode {
        kind: String,
        source: serde_json::Error,
    },
}

/// Reads all constraint templates and their constraints into a raw report.
///
/// Constraints without violations are left out, and so are templates that end
/// up without constraints.
#[instrument(skip_all)]
pub async fn gather_report<S>(
    cluster_identity: &ClusterIdentity,
    source: &S,
    parser: &MessageParser,
) -> Result<Report, Error>
where
    S: PolicySource + Sync + ?Sized,
{
    let mut report = Report {
        cluster_identity: cluster_identity.clone(),
        templates: vec![],
    };

    for template in source.list_constraint_templates().await? {
        let constraints = source
            .list_constraints(&template)
            .await?
            .into_iter()
            .map(|c| report_for_constraint(c, parser))
            .filter(|rc| !rc.violations.is_empty())
            .collect::<Vec<_>>();
        debug!(
            kind = %template.constraint_kind(),
            constraints = constraints.len(),
            "Gathered template"
        );
        if !constraints.is_empty() {
            report.templates.push(ReportForTemplate {
                kind: template.constraint_kind().to_string(),
                constraints,
            });
        }
    }

    Ok(report)
}

fn report_for_constraint(c: Constraint, parser: &MessageParser) -> ReportForConstraint {
    let metadata = Metadata {
        severity: c.label("severity").to_string(),
        template_source: c.annotation("template-source").to_string(),
        constraint_source: c.annotation("constraint-source").to_string(),
        docstring: c.annotation("docstring").to_string(),
        audit_timestamp: c.status.audit_timestamp.clone(),
    };

    let violations = c
        .status
        .violations
        .into_iter()
        .map(|v| {
            let parsed = parser.parse(&v.message);
            Violation {
                kind: v.kind,
                name: v.name,
                namespace: v.namespace,
                message: parsed.message,
                object_identity: parsed.object_identity.unwrap_or_default(),
                cluster_name: String::new(),
            }
        })
        .collect();

    ReportForConstraint {
        name: c.metadata.name.unwrap_or_default(),
        metadata,
        violations,
        violation_groups: vec![],
    }
}
