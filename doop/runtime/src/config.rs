use anyhow::{bail, ensure, Context, Result};
use doop_core::{ClusterIdentity, GroupBuilder, RuleConfig, RuleSet};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// The analyzer's configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Describes this cluster in the aggregated report.
    pub cluster_identity: ClusterIdentity,

    #[serde(default)]
    pub processing_rules: Vec<RuleConfig>,

    #[serde(default)]
    pub merging_rules: Vec<RuleConfig>,

    /// Where processed reports are uploaded. Only needed by `run`.
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub directory: PathBuf,
    pub object_name: String,
}

// === impl Config ===

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("while parsing {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        ensure!(
            !config.cluster_identity.is_empty(),
            "missing required configuration value: cluster_identity"
        );
        if let Some(storage) = &config.storage {
            ensure!(
                !storage.object_name.is_empty(),
                "missing required configuration value: storage.object_name"
            );
        }
        Ok(config)
    }

    /// Compiles both rule sets, reporting every invalid rule at once.
    pub fn group_builder(&self) -> Result<GroupBuilder> {
        let processing = RuleSet::compile("processing_rules", &self.processing_rules);
        let merging = RuleSet::compile("merging_rules", &self.merging_rules);
        match (processing, merging) {
            (Ok(processing), Ok(merging)) => Ok(GroupBuilder::new(processing, merging)),
            (processing, merging) => {
                let errors = processing
                    .err()
                    .into_iter()
                    .chain(merging.err())
                    .flatten()
                    .map(|error| format!("- {error}"))
                    .collect::<Vec<_>>();
                bail!("invalid rules:\n{}", errors.join("\n"))
            }
        }
    }
}
