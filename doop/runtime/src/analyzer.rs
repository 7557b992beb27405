use crate::{config::Config, metrics::AnalyzerMetrics};
use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::Utc;
use doop_core::{ClusterIdentity, GroupBuilder, MessageParser, Report};
use doop_k8s_collect::{gather_report, PolicySource};
use doop_store::ObjectSink;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time;
use tracing::{debug, error, info, instrument};

/// Collects this cluster's violations and groups them into a report.
#[derive(Debug)]
pub struct Analyzer<P> {
    cluster_identity: ClusterIdentity,
    source: P,
    parser: MessageParser,
    groups: Arc<GroupBuilder>,
}

/// Where [`Analyzer::run`] publishes its reports.
#[derive(Debug)]
pub struct Target<K> {
    pub sink: K,
    pub object_name: String,
}

// === impl Analyzer ===

impl<P> Analyzer<P>
where
    P: PolicySource + Send + Sync,
{
    pub fn new(config: &Config, source: P) -> Result<Self> {
        Ok(Self {
            cluster_identity: config.cluster_identity.clone(),
            source,
            parser: MessageParser::new(),
            groups: Arc::new(config.group_builder()?),
        })
    }

    /// Returns the raw report, before any rules are applied.
    pub async fn collect(&self) -> Result<Report> {
        let report = gather_report(&self.cluster_identity, &self.source, &self.parser).await?;
        Ok(report)
    }

    /// Returns the grouped report.
    pub async fn analyze(&self) -> Result<Report> {
        let mut report = self.collect().await?;
        let groups = self.groups.clone();
        let report = tokio::task::spawn_blocking(move || {
            groups.process_report(&mut report);
            report
        })
        .await
        .context("grouping task failed")?;
        Ok(report)
    }

    /// Analyzes the cluster and uploads the grouped report.
    #[instrument(skip_all, fields(object = %target.object_name))]
    pub async fn publish<K>(&self, target: &Target<K>) -> Result<()>
    where
        K: ObjectSink + Sync,
    {
        let report = self.analyze().await?;
        let payload = Bytes::from(serde_json::to_vec(&report)?);
        debug!(bytes = payload.len(), "Uploading report");
        target
            .sink
            .upload(&target.object_name, payload)
            .await
            .with_context(|| format!("cannot upload report {}", target.object_name))?;
        Ok(())
    }

    /// Publishes a report every `interval` until `shutdown` completes.
    ///
    /// Failed cycles are logged and retried on the next tick.
    pub async fn run<K>(
        self,
        target: Target<K>,
        interval: Duration,
        metrics: AnalyzerMetrics,
        shutdown: impl Future<Output = ()>,
    ) where
        K: ObjectSink + Sync,
    {
        let mut timer = time::interval(interval);
        timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                () = &mut shutdown => {
                    info!("Analyzer shutting down");
                    return;
                }
            }

            match self.publish(&target).await {
                Ok(()) => {
                    info!(object = %target.object_name, "Published report");
                    metrics.success(Utc::now());
                }
                Err(error) => {
                    error!(error = %format_args!("{error:#}"), "Analysis failed");
                    metrics.failure();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doop_k8s_api::{Constraint, ConstraintTemplate};
    use doop_k8s_collect::Error;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use prometheus_client::registry::Registry;
    use std::io;
    use tracing::Level;

    const CONFIG: &str = r#"
cluster_identity:
  layer: prod
merging_rules:
  - description: pods from deployments
    match:
      kind: Pod
    replace:
      source: name
      pattern: '(.*)-[a-z0-9]{5}'
      target:
        name: $1-<variable>
"#;

    struct MockPolicies {
        broken: bool,
    }

    #[async_trait::async_trait]
    impl PolicySource for MockPolicies {
        async fn list_constraint_templates(&self) -> Result<Vec<ConstraintTemplate>, Error> {
            let template = serde_json::from_value(serde_json::json!({
                "apiVersion": "templates.gatekeeper.sh/v1",
                "kind": "ConstraintTemplate",
                "metadata": {"name": "gkrequiredlabels"},
                "spec": {"crd": {"spec": {"names": {"kind": "GkRequiredLabels"}}}},
                "status": {"created": true},
            }))
            .expect("template must parse");
            Ok(vec![template])
        }

        async fn list_constraints(
            &self,
            template: &ConstraintTemplate,
        ) -> Result<Vec<Constraint>, Error> {
            if self.broken {
                return Err(Error::Decode {
                    kind: template.constraint_kind().to_string(),
                    source: serde_json::from_str::<Constraint>("not json")
                        .expect_err("input must not decode"),
                });
            }
            let constraint = serde_json::from_value(serde_json::json!({
                "metadata": {"name": "team-label", "labels": {"severity": "warning"}},
                "status": {
                    "auditTimestamp": "2023-01-01T00:00:00Z",
                    "violations": [
                        {"kind": "Pod", "name": "web-abcde", "namespace": "shop", "message": "missing team"},
                        {"kind": "Pod", "name": "web-fghij", "namespace": "shop", "message": "missing team"},
                    ],
                },
            }))
            .expect("constraint must parse");
            Ok(vec![constraint])
        }
    }

    /// Records uploads; clones share the same log.
    #[derive(Clone, Default)]
    struct MemorySink(Arc<Mutex<Vec<(String, Bytes)>>>);

    #[async_trait::async_trait]
    impl ObjectSink for MemorySink {
        async fn upload(&self, name: &str, payload: Bytes) -> io::Result<()> {
            self.0.lock().push((name.to_string(), payload));
            Ok(())
        }
    }

    impl MemorySink {
        fn count(&self) -> usize {
            self.0.lock().len()
        }
    }

    fn analyzer(broken: bool) -> Analyzer<MockPolicies> {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
        let config = Config::from_yaml(CONFIG).expect("config must parse");
        Analyzer::new(&config, MockPolicies { broken }).expect("analyzer must build")
    }

    #[tokio::test]
    async fn collects_raw_violations() {
        let report = analyzer(false).collect().await.expect("collect must succeed");
        let rc = &report.templates[0].constraints[0];
        assert_eq!(rc.violations.len(), 2);
        assert!(rc.violation_groups.is_empty());
        assert_eq!(rc.metadata.severity, "warning");
    }

    #[tokio::test]
    async fn analyzes_into_groups() {
        let report = analyzer(false).analyze().await.expect("analyze must succeed");
        let rc = &report.templates[0].constraints[0];
        assert!(rc.violations.is_empty());
        assert_eq!(rc.violation_groups.len(), 1);
        assert_eq!(rc.violation_groups[0].pattern.name, "web-<variable>");
        assert_eq!(rc.violation_groups[0].instances.len(), 2);
    }

    #[tokio::test]
    async fn publishes_grouped_report() {
        let sink = MemorySink::default();
        let target = Target {
            sink: sink.clone(),
            object_name: "prod".to_string(),
        };
        analyzer(false)
            .publish(&target)
            .await
            .expect("publish must succeed");

        let uploads = sink.0.lock();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "prod");
        let report: Report = serde_json::from_slice(&uploads[0].1).expect("upload must be a report");
        assert_eq!(report.cluster_identity["layer"], "prod");
        assert_eq!(report.templates[0].constraints[0].violation_groups.len(), 1);
    }

    #[tokio::test]
    async fn failed_collection_uploads_nothing() {
        let sink = MemorySink::default();
        let target = Target {
            sink: sink.clone(),
            object_name: "prod".to_string(),
        };
        let err = analyzer(true)
            .publish(&target)
            .await
            .expect_err("publish must fail");
        assert!(
            err.to_string()
                .contains("cannot decode constraint of kind GkRequiredLabels"),
            "{err}"
        );
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn runs_until_shutdown() {
        let sink = MemorySink::default();
        let target = Target {
            sink: sink.clone(),
            object_name: "prod".to_string(),
        };
        let mut registry = Registry::default();
        let metrics = AnalyzerMetrics::register(&mut registry);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(analyzer(false).run(
            target,
            Duration::from_millis(1),
            metrics,
            async move {
                let _ = rx.await;
            },
        ));

        while sink.count() < 2 {
            time::sleep(Duration::from_millis(1)).await;
        }
        tx.send(()).expect("analyzer must be running");
        task.await.expect("analyzer must not panic");

        let mut text = String::new();
        prometheus_client::encoding::text::encode(&mut text, &registry)
            .expect("metrics must encode");
        assert!(
            text.contains(r#"analyzer_cycles_total{result="success"}"#),
            "{text}"
        );
        assert!(!text.contains(r#"result="failure""#), "{text}");
    }
}
