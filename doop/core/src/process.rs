use crate::{
    report::{Report, ReportForConstraint},
    rules::RuleSet,
    violation::ViolationGroup,
};

/// Folds a cluster's raw violations into violation groups.
///
/// Processing rules canonicalize each violation before it is stored. Merging
/// rules are applied to a copy of the violation to derive the pattern that
/// decides which group it belongs to; they never change stored instances.
#[derive(Clone, Debug, Default)]
pub struct GroupBuilder {
    processing: RuleSet,
    merging: RuleSet,
}

// === impl GroupBuilder ===

impl GroupBuilder {
    pub fn new(processing: RuleSet, merging: RuleSet) -> Self {
        Self {
            processing,
            merging,
        }
    }

    /// Groups the violations of every constraint in the report.
    ///
    /// # Panics
    ///
    /// If any constraint has already been grouped.
    pub fn process_report(&self, report: &mut Report) {
        for rt in &mut report.templates {
            for rc in &mut rt.constraints {
                self.process_constraint(rc);
            }
        }
    }

    /// Replaces the constraint's `violations` with `violation_groups`.
    ///
    /// # Panics
    ///
    /// If the constraint has already been grouped. Grouping runs exactly once
    /// per report, so this indicates a wiring bug rather than bad input.
    pub fn process_constraint(&self, rc: &mut ReportForConstraint) {
        assert!(
            rc.violation_groups.is_empty(),
            "constraint {:?} has already been grouped",
            rc.name
        );

        let violations = std::mem::take(&mut rc.violations);
        tracing::trace!(constraint = %rc.name, violations = violations.len(), "Grouping");

        for mut v in violations {
            self.processing.apply(&mut v);

            let mut pattern = v.clone();
            self.merging.apply(&mut pattern);

            match rc
                .violation_groups
                .iter_mut()
                .find(|vg| vg.pattern == pattern)
            {
                Some(vg) => vg.instances.push(v.difference_to(&vg.pattern)),
                None => rc.violation_groups.push(ViolationGroup::new(pattern, &v)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::ObjectIdentity,
        report::{Metadata, ReportForTemplate},
        rules::{ReplaceConfig, RuleConfig},
        violation::Violation,
    };
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn rule(kind: &str, pattern: &str, target: &str) -> RuleConfig {
        RuleConfig {
            description: String::new(),
            match_fields: btreemap! { "kind".to_string() => kind.to_string() },
            replace: ReplaceConfig {
                source: "name".to_string(),
                pattern: pattern.to_string(),
                target: btreemap! { "name".to_string() => target.to_string() },
            },
        }
    }

    fn builder() -> GroupBuilder {
        let processing = RuleSet::compile(
            "processing_rules",
            &[RuleConfig {
                description: "readable Helm 3 secrets".to_string(),
                match_fields: btreemap! { "kind".to_string() => "Secret".to_string() },
                replace: ReplaceConfig {
                    source: "name".to_string(),
                    pattern: r"sh\.helm\.release\.v1\.(.*\.v\d+)".to_string(),
                    target: btreemap! {
                        "kind".to_string() => "Helm 3 release".to_string(),
                        "name".to_string() => "$1".to_string(),
                    },
                },
            }],
        )
        .unwrap();
        let merging = RuleSet::compile(
            "merging_rules",
            &[
                rule("Helm 3 release", r"(.*)\.v\d+", "$1.<variable>"),
                rule("Pod", r"(.*)-[a-z0-9]{5}", "$1-<variable>"),
            ],
        )
        .unwrap();
        GroupBuilder::new(processing, merging)
    }

    fn violation(kind: &str, name: &str, namespace: &str) -> Violation {
        Violation {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            message: "not allowed".to_string(),
            ..Violation::default()
        }
    }

    fn constraint(violations: Vec<Violation>) -> ReportForConstraint {
        ReportForConstraint {
            name: "firstconstraint".to_string(),
            metadata: Metadata {
                severity: "warning".to_string(),
                ..Metadata::default()
            },
            violations,
            violation_groups: vec![],
        }
    }

    #[test]
    fn groups_by_merged_pattern() {
        let mut rc = constraint(vec![
            violation("Pod", "worker-abcde", "default"),
            violation("Pod", "worker-fghij", "default"),
            violation("Pod", "worker-klmno", "kube-system"),
            violation("Secret", "sh.helm.release.v1.foobar.v42", "default"),
            violation("Secret", "sh.helm.release.v1.foobar.v43", "default"),
        ]);
        builder().process_constraint(&mut rc);

        assert!(rc.violations.is_empty());
        assert_eq!(
            rc.violation_groups,
            vec![
                ViolationGroup {
                    pattern: violation("Pod", "worker-<variable>", "default"),
                    instances: vec![
                        Violation {
                            name: "worker-abcde".to_string(),
                            ..Violation::default()
                        },
                        Violation {
                            name: "worker-fghij".to_string(),
                            ..Violation::default()
                        },
                    ],
                },
                ViolationGroup {
                    pattern: violation("Pod", "worker-<variable>", "kube-system"),
                    instances: vec![Violation {
                        name: "worker-klmno".to_string(),
                        ..Violation::default()
                    }],
                },
                ViolationGroup {
                    pattern: violation("Helm 3 release", "foobar.<variable>", "default"),
                    instances: vec![
                        Violation {
                            name: "foobar.v42".to_string(),
                            ..Violation::default()
                        },
                        Violation {
                            name: "foobar.v43".to_string(),
                            ..Violation::default()
                        },
                    ],
                },
            ]
        );
    }

    #[test]
    fn object_identity_is_part_of_the_pattern() {
        let mut prod = violation("Pod", "worker-abcde", "default");
        prod.object_identity = ObjectIdentity::from_iter(Some(("type", "production")));
        let mut qa = violation("Pod", "worker-fghij", "default");
        qa.object_identity = ObjectIdentity::from_iter(Some(("type", "qa")));

        let mut rc = constraint(vec![prod, qa]);
        builder().process_constraint(&mut rc);
        assert_eq!(rc.violation_groups.len(), 2);
        assert!(rc
            .violation_groups
            .iter()
            .all(|vg| vg.instances[0].object_identity.is_empty()));
    }

    #[test]
    fn grouping_is_independent_of_input_order() {
        let violations = vec![
            violation("Pod", "worker-abcde", "default"),
            violation("Pod", "api-zzzzz", "default"),
            violation("Pod", "worker-fghij", "default"),
            violation("ConfigMap", "settings", "default"),
        ];
        let group = |violations: Vec<Violation>| {
            let mut rc = constraint(violations);
            builder().process_constraint(&mut rc);
            let mut groups = rc
                .violation_groups
                .into_iter()
                .map(|mut vg| {
                    vg.instances.sort_by(|a, b| a.compare_to(b));
                    vg
                })
                .collect::<Vec<_>>();
            groups.sort_by(|a, b| a.pattern.compare_to(&b.pattern));
            groups
        };

        let mut reversed = violations.clone();
        reversed.reverse();
        assert_eq!(group(violations), group(reversed));
    }

    #[test]
    fn processes_every_constraint() {
        let mut report = Report {
            cluster_identity: btreemap! { "number".to_string() => "one".to_string() },
            templates: vec![ReportForTemplate {
                kind: "GkFirstTemplate".to_string(),
                constraints: vec![
                    constraint(vec![violation("Pod", "worker-abcde", "default")]),
                    constraint(vec![violation("Pod", "db-0", "default")]),
                ],
            }],
        };
        builder().process_report(&mut report);
        for rc in &report.templates[0].constraints {
            assert!(rc.violations.is_empty());
            assert_eq!(rc.violation_groups.len(), 1);
        }
    }

    #[test]
    #[should_panic(expected = "has already been grouped")]
    fn refuses_to_group_twice() {
        let builder = builder();
        let mut rc = constraint(vec![violation("Pod", "worker-abcde", "default")]);
        builder.process_constraint(&mut rc);
        rc.violations = vec![violation("Pod", "worker-fghij", "default")];
        builder.process_constraint(&mut rc);
    }
}
