use kube::{api::ObjectMeta, core::DynamicObject};
use serde::{Deserialize, Serialize};

/// A Gatekeeper constraint of any kind.
///
/// Every template generates its own constraint CRD, so constraints are
/// fetched as [`DynamicObject`]s and only the audit fields are decoded.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Constraint {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default, deserialize_with = "super::null_as_default")]
    pub status: ConstraintStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintStatus {
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub audit_timestamp: String,

    #[serde(default, deserialize_with = "super::null_as_default")]
    pub violations: Vec<ConstraintViolation>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintViolation {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub enforcement_action: String,
}

// === impl Constraint ===

impl Constraint {
    /// Returns the value of the label `key`, or the empty string.
    pub fn label(&self, key: &str) -> &str {
        lookup(self.metadata.labels.as_ref(), key)
    }

    /// Returns the value of the annotation `key`, or the empty string.
    pub fn annotation(&self, key: &str) -> &str {
        lookup(self.metadata.annotations.as_ref(), key)
    }
}

impl TryFrom<DynamicObject> for Constraint {
    type Error = serde_json::Error;

    fn try_from(obj: DynamicObject) -> Result<Self, Self::Error> {
        serde_json::to_value(obj).and_then(serde_json::from_value)
    }
}

fn lookup<'m>(map: Option<&'m std::collections::BTreeMap<String, String>>, key: &str) -> &'m str {
    map.and_then(|m| m.get(key))
        .map(String::as_str)
        .unwrap_or_default()
}
