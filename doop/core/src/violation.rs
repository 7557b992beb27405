use crate::identity::ObjectIdentity;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single policy violation, or the common pattern of a [`ViolationGroup`].
///
/// Every field may be empty. Inside a group, an empty instance field means
/// that the instance has the same value as the group's pattern.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Violation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "ObjectIdentity::is_empty")]
    pub object_identity: ObjectIdentity,

    /// Only set on group instances inside a report that was loaded by the
    /// central tier.
    #[serde(default, rename = "cluster", skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
}

/// A set of violations that share a common pattern.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ViolationGroup {
    pub pattern: Violation,
    #[serde(default)]
    pub instances: Vec<Violation>,
}

// === impl Violation ===

impl Violation {
    /// Returns a copy of this violation with every field cleared that is
    /// identical to the respective field of `pattern`.
    pub fn difference_to(&self, pattern: &Violation) -> Violation {
        fn diff(value: &str, pattern: &str) -> String {
            if value == pattern {
                String::new()
            } else {
                value.to_string()
            }
        }

        Violation {
            kind: diff(&self.kind, &pattern.kind),
            name: diff(&self.name, &pattern.name),
            namespace: diff(&self.namespace, &pattern.namespace),
            message: diff(&self.message, &pattern.message),
            object_identity: if self.object_identity == pattern.object_identity {
                ObjectIdentity::default()
            } else {
                self.object_identity.clone()
            },
            cluster_name: diff(&self.cluster_name, &pattern.cluster_name),
        }
    }

    /// Reverses [`Violation::difference_to`]: fills every empty field from
    /// `pattern`.
    pub fn overlaid_on(&self, pattern: &Violation) -> Violation {
        fn pick(value: &str, pattern: &str) -> String {
            if value.is_empty() {
                pattern.to_string()
            } else {
                value.to_string()
            }
        }

        Violation {
            kind: pick(&self.kind, &pattern.kind),
            name: pick(&self.name, &pattern.name),
            namespace: pick(&self.namespace, &pattern.namespace),
            message: pick(&self.message, &pattern.message),
            object_identity: if self.object_identity.is_empty() {
                pattern.object_identity.clone()
            } else {
                self.object_identity.clone()
            },
            cluster_name: pick(&self.cluster_name, &pattern.cluster_name),
        }
    }

    /// Orders violations by namespace, name, kind, message and cluster name.
    pub fn compare_to(&self, other: &Violation) -> Ordering {
        self.namespace
            .cmp(&other.namespace)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.message.cmp(&other.message))
            .then_with(|| self.cluster_name.cmp(&other.cluster_name))
    }
}

// === impl ViolationGroup ===

impl ViolationGroup {
    /// Starts a group whose first member is `violation`.
    pub fn new(pattern: Violation, violation: &Violation) -> Self {
        let first = violation.difference_to(&pattern);
        Self {
            pattern,
            instances: vec![first],
        }
    }

    /// Iterates over the fully reconstructed members of this group.
    pub fn expanded(&self) -> impl Iterator<Item = Violation> + '_ {
        self.instances
            .iter()
            .map(move |instance| instance.overlaid_on(&self.pattern))
    }
}
