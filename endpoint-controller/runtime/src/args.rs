use crate::{
    index::{self, ClusterInfo, ControllerMetrics, EndpointController, Registry, SliceCache},
    Replay, TracingUpdater, Workers,
};
use anyhow::{Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry as Prometheus;
use std::{path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "endpoints", about = "A mesh endpoint aggregation controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "mesh=info,warn",
        env = "MESH_ENDPOINT_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Identifies this cluster in endpoint updates.
    #[clap(long, default_value = "Kubernetes")]
    cluster_id: String,

    #[clap(long, default_value = "cluster.local")]
    cluster_domain: String,

    /// Drops addresses that are not ready instead of publishing them as unhealthy.
    #[clap(long)]
    exclude_unready_endpoints: bool,

    /// The number of workers that apply endpoint events.
    #[clap(long, default_value = "4")]
    workers: usize,

    /// A log of resource changes to replay, one JSON record per line. `-` reads from stdin.
    #[clap(long, default_value = "-")]
    events: PathBuf,

    /// Exits once the event log is exhausted rather than waiting for a shutdown signal.
    #[clap(long)]
    exit_on_eof: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            admin,
            cluster_id,
            cluster_domain,
            exclude_unready_endpoints,
            workers,
            events,
            exit_on_eof,
        } = self;

        log_format.try_init(log_level)?;

        let cluster_info = Arc::new(ClusterInfo {
            cluster_id,
            domain_suffix: cluster_domain,
            include_unready: !exclude_unready_endpoints,
        });
        let registry = Registry::shared(cluster_info.clone());
        let cache = SliceCache::shared();

        let mut prom = <Prometheus>::default();
        let controller_reg = prom.sub_registry_with_prefix("endpoint_controller");
        let metrics = ControllerMetrics::register(controller_reg);
        index::metrics::register_cache(controller_reg, cache.clone());

        let admin = admin.into_builder().with_prometheus(prom);
        let readiness = admin.readiness();
        let admin = admin.bind()?.spawn();
        info!(addr = %admin.local_addr(), "Admin server listening");

        let controller =
            EndpointController::new(registry.clone(), cache.clone(), TracingUpdater, metrics);
        let workers = Workers::spawn(controller, workers);

        let input = open(events).await?;
        let (signal, shutdown) = drain::channel();
        let mut replay = tokio::spawn(
            Replay::new(cluster_info, registry.clone(), workers)
                .run(input, shutdown)
                .instrument(info_span!("replay")),
        );

        // The cache is ready once the log has been fully applied. Then, unless configured to
        // exit, serve the admin endpoints until shutdown is signaled.
        tokio::select! {
            res = &mut replay => {
                let stats = res??;
                info!(applied = stats.applied, failed = stats.failed, "Replay complete");
                {
                    let registry = registry.read();
                    info!(
                        services = registry.services().len(),
                        pods = registry.workloads().len(),
                        nodes = registry.nodes().len(),
                        cached = cache.len(),
                        "Serving endpoints"
                    );
                }
                readiness.set(true);
                if !exit_on_eof {
                    shutdown_signal().await?;
                    info!("Shutting down");
                }
            }

            res = shutdown_signal() => {
                res?;
                info!("Shutting down; draining queued events");
                signal.drain().await;
                let stats = replay.await??;
                info!(applied = stats.applied, failed = stats.failed, "Replay stopped");
            }
        }

        Ok(())
    }
}

async fn open(path: PathBuf) -> Result<Box<dyn AsyncBufRead + Send + Unpin>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Completes when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    Ok(())
}
