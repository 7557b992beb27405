use crate::{
    analyzer::{Analyzer, Target},
    api::Api,
    config::Config,
    duration::parse_duration,
    metrics::{AnalyzerMetrics, ComplianceMetrics},
    server,
};
use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use doop_k8s_collect::KubePolicySource;
use doop_store::{FsBucket, SnapshotCache};
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "doop",
    about = "Aggregates Gatekeeper policy violations across clusters",
    version
)]
pub struct Args {
    #[clap(long, default_value = "doop=info,warn", env = "DOOP_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Serves the aggregated report and compliance metrics.
    Api(ApiArgs),

    /// Collects and groups the violations of the local cluster.
    Analyzer(AnalyzerArgs),
}

#[derive(Debug, clap::Args)]
struct ApiArgs {
    #[clap(long, default_value = "0.0.0.0:8080", env = "DOOP_API_LISTEN_ADDRESS")]
    listen_addr: SocketAddr,

    /// Directory holding one uploaded report per cluster.
    #[clap(long, env = "DOOP_API_REPORTS_DIR")]
    reports_dir: PathBuf,

    /// Space-separated object identity keys to expose as metric labels.
    #[clap(long, default_value = "", env = "DOOP_API_OBJECT_IDENTITY_LABELS")]
    object_identity_labels: String,
}

#[derive(Debug, clap::Args)]
struct AnalyzerArgs {
    #[clap(long, value_enum, default_value = "run")]
    mode: Mode,

    /// Path to the analyzer's YAML configuration.
    #[clap(long, env = "DOOP_ANALYZER_CONFIG")]
    config: PathBuf,

    /// How often `run` publishes a report.
    #[clap(long, default_value = "5m", value_parser = parse_duration)]
    interval: Duration,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum Mode {
    /// Publishes a grouped report on every interval.
    Run,

    /// Prints the raw report once.
    CollectOnce,

    /// Prints the grouped report once.
    AnalyzeOnce,
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            command,
        } = self;

        match command {
            Command::Api(args) => args.run(log_level, log_format).await,
            Command::Analyzer(args) => args.run(log_level, log_format).await,
        }
    }
}

// === impl ApiArgs ===

impl ApiArgs {
    async fn run(self, log_level: kubert::LogFilter, log_format: kubert::LogFormat) -> Result<()> {
        let Self {
            listen_addr,
            reports_dir,
            object_identity_labels,
        } = self;

        log_format.try_init(log_level)?;
        let (shutdown, watch) = kubert::shutdown::sigint_or_sigterm()?;

        let keys = object_identity_labels
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let cache = Arc::new(SnapshotCache::new(FsBucket::new(reports_dir)));
        let api = Api::new(cache, ComplianceMetrics::new(keys));

        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("cannot bind {listen_addr}"))?;
        info!(addr = %listen_addr, "Serving violations");
        tokio::spawn(server::serve(listener, api, watch.signaled()).instrument(info_span!("api")));

        if shutdown.signaled().await.is_err() {
            bail!("Aborted");
        }
        Ok(())
    }
}

// === impl AnalyzerArgs ===

impl AnalyzerArgs {
    async fn run(self, log_level: kubert::LogFilter, log_format: kubert::LogFormat) -> Result<()> {
        let Self {
            mode,
            config,
            interval,
            client,
            admin,
        } = self;

        let config = Config::load(&config)?;

        if mode != Mode::Run {
            log_format.try_init(log_level)?;
            let client = client.try_client().await?;
            let analyzer = Analyzer::new(&config, KubePolicySource::new(client))?;
            let report = match mode {
                Mode::CollectOnce => analyzer.collect().await?,
                _ => analyzer.analyze().await?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        ensure!(!interval.is_zero(), "--interval must be greater than zero");
        let Some(storage) = config.storage.clone() else {
            bail!("missing required configuration value: storage");
        };

        let mut prom = <Registry>::default();
        let metrics = AnalyzerMetrics::register(prom.sub_registry_with_prefix("doop"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let analyzer = Analyzer::new(&config, KubePolicySource::new(runtime.client()))?;
        let target = Target {
            sink: FsBucket::new(storage.directory),
            object_name: storage.object_name,
        };
        let watch = runtime.shutdown_handle();
        tokio::spawn(
            analyzer
                .run(target, interval, metrics, async move {
                    let _release = watch.signaled().await;
                })
                .instrument(info_span!("analyzer")),
        );

        // Returns once the analyzer has finished its current cycle.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
