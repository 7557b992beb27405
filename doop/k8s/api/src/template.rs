use kube::{
    core::{ApiResource, GroupVersionKind},
    CustomResource,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares a Rego policy and the constraint kind that instantiates it.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "templates.gatekeeper.sh",
    version = "v1",
    kind = "ConstraintTemplate",
    status = "ConstraintTemplateStatus"
)]
pub struct ConstraintTemplateSpec {
    #[serde(default)]
    pub crd: Crd,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Crd {
    #[serde(default)]
    pub spec: CrdSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct CrdSpec {
    #[serde(default)]
    pub names: Names,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Names {
    #[serde(default)]
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ConstraintTemplateStatus {
    /// Set once Gatekeeper has created the constraint CRD.
    #[serde(default)]
    pub created: bool,
}

// === impl ConstraintTemplate ===

impl ConstraintTemplate {
    pub const CONSTRAINTS_GROUP: &'static str = "constraints.gatekeeper.sh";
    pub const CONSTRAINTS_VERSION: &'static str = "v1beta1";

    /// The kind of the constraints that instantiate this template.
    pub fn constraint_kind(&self) -> &str {
        &self.spec.crd.spec.names.kind
    }

    /// Constraints can only be listed after their CRD exists.
    pub fn is_created(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.created)
    }

    /// Describes the constraint resource generated for this template.
    ///
    /// Gatekeeper requires the template's name to be the lowercased kind,
    /// which is also the plural of the generated resource.
    pub fn constraint_resource(&self) -> ApiResource {
        let kind = self.constraint_kind();
        let plural = self
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| kind.to_lowercase());
        let gvk = GroupVersionKind::gvk(Self::CONSTRAINTS_GROUP, Self::CONSTRAINTS_VERSION, kind);
        ApiResource::from_gvk_with_plural(&gvk, &plural)
    }
}
