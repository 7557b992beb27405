#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Typed views of the Gatekeeper resources that carry audit results.

pub mod constraint;
pub mod template;

pub use self::{
    constraint::{Constraint, ConstraintStatus, ConstraintViolation},
    template::{ConstraintTemplate, ConstraintTemplateSpec, ConstraintTemplateStatus},
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, ResourceExt},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};

use serde::{Deserialize, Deserializer};

/// Gatekeeper leaves lists and strings as `null` until it has something to
/// report.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
