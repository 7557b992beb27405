use crate::{Error, PolicySource};
use doop_k8s_api::{Api, Client, Constraint, ConstraintTemplate, DynamicObject, ListParams};

/// Reads Gatekeeper resources through the Kubernetes API.
#[derive(Clone)]
pub struct KubePolicySource {
    client: Client,
}

impl KubePolicySource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl PolicySource for KubePolicySource {
    async fn list_constraint_templates(&self) -> Result<Vec<ConstraintTemplate>, Error> {
        let api = Api::<ConstraintTemplate>::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(Error::ListTemplates)?;
        Ok(list.items)
    }

    async fn list_constraints(
        &self,
        template: &ConstraintTemplate,
    ) -> Result<Vec<Constraint>, Error> {
        let kind = template.constraint_kind();
        if !template.is_created() {
            tracing::debug!(%kind, "Skipping template without constraint CRD");
            return Ok(vec![]);
        }

        let ar = template.constraint_resource();
        let api = Api::<DynamicObject>::all_with(self.client.clone(), &ar);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|source| Error::ListConstraints {
                kind: kind.to_string(),
                source,
            })?;

        list.items
            .into_iter()
            .map(|obj| {
                Constraint::try_from(obj).map_err(|source| Error::Decode {
                    kind: kind.to_string(),
                    source,
                })
            })
            .collect()
    }
}
