use crate::{identity::ObjectIdentity, report::ClusterIdentity};
use std::collections::BTreeMap;

/// Describes which clusters, templates, constraints and violation groups to
/// keep when aggregating reports.
///
/// Every dimension is an allow-list. Values given for the same dimension are
/// OR'd, dimensions are AND'd, and an empty allow-list matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterSet {
    cluster_identity: BTreeMap<String, AllowList>,
    template_kind: AllowList,
    constraint_name: AllowList,
    severity: AllowList,
    object_identity: BTreeMap<String, AllowList>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct AllowList(Vec<String>);

// === impl FilterSet ===

impl FilterSet {
    const CLUSTER_IDENTITY_PREFIX: &'static str = "cluster_identity.";
    const OBJECT_IDENTITY_PREFIX: &'static str = "object_identity.";

    /// Adds one query parameter. Unknown parameters are ignored.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        let list = if let Some(key) = key.strip_prefix(Self::CLUSTER_IDENTITY_PREFIX) {
            if key.is_empty() {
                return;
            }
            self.cluster_identity.entry(key.to_string()).or_default()
        } else if let Some(key) = key.strip_prefix(Self::OBJECT_IDENTITY_PREFIX) {
            if key.is_empty() {
                return;
            }
            self.object_identity.entry(key.to_string()).or_default()
        } else {
            match key {
                "template_kind" => &mut self.template_kind,
                "constraint_name" => &mut self.constraint_name,
                "severity" => &mut self.severity,
                _ => {
                    tracing::trace!(%key, "Ignoring unknown filter parameter");
                    return;
                }
            }
        };
        list.0.push(value.into());
    }

    /// Returns true if no dimension restricts anything.
    pub fn is_open(&self) -> bool {
        self == &Self::default()
    }

    pub fn match_cluster_identity(&self, identity: &ClusterIdentity) -> bool {
        self.cluster_identity.iter().all(|(key, allowed)| {
            allowed.matches(identity.get(key).map(String::as_str).unwrap_or_default())
        })
    }

    pub fn match_template_kind(&self, kind: &str) -> bool {
        self.template_kind.matches(kind)
    }

    pub fn match_constraint_name(&self, name: &str) -> bool {
        self.constraint_name.matches(name)
    }

    pub fn match_severity(&self, severity: &str) -> bool {
        self.severity.matches(severity)
    }

    pub fn match_object_identity(&self, identity: &ObjectIdentity) -> bool {
        self.object_identity
            .iter()
            .all(|(key, allowed)| allowed.matches(identity.get(key)))
    }
}

impl<K, V> std::iter::FromIterator<(K, V)> for FilterSet
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut filters = Self::default();
        for (key, value) in iter {
            filters.insert(key.as_ref(), value);
        }
        filters
    }
}

// === impl AllowList ===

impl AllowList {
    fn matches(&self, value: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|allowed| allowed == value)
    }
}
