//! Replays a log of cluster resource changes into the controller.
//!
//! Each line of the log is a JSON record:
//!
//! ```text
//! {"action": "apply", "object": {"apiVersion": "v1", "kind": "Service", ...}}
//! {"action": "delete", "object": {"apiVersion": "discovery.k8s.io/v1", "kind": "EndpointSlice", ...}}
//! ```
//!
//! Services, pods, and nodes update the registry as they are read. Endpoint resources are decoded
//! and dispatched to the worker pool. Before the registry is updated, the workers are flushed, so
//! every endpoint event is built against the registry as of its position in the log. Blank lines
//! and lines starting with `#` are ignored.

use crate::{
    index::{ClusterInfo, EventKind, Resource, SharedRegistry, SliceEvent},
    k8s::{self, ResourceExt},
    Workers,
};
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::{collections::HashSet, sync::Arc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Apply,
    Delete,
}

/// A decoded replay record.
#[derive(Clone, Debug)]
pub struct Record {
    pub action: Action,
    pub object: Object,
}

#[derive(Clone, Debug)]
pub enum Object {
    Service(k8s::Service),
    Pod(k8s::Pod),
    Node(k8s::Node),
    Endpoints(Resource),
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    action: Action,
    object: serde_json::Value,
}

/// Feeds a replay log to the registry and the worker pool.
#[derive(Debug)]
pub struct Replay {
    cluster_info: Arc<ClusterInfo>,
    registry: SharedRegistry,
    workers: Workers,

    /// Endpoint resources that have been applied and not deleted, by kind, namespace and name.
    live: HashSet<(&'static str, String, String)>,

    /// Set when endpoint events have been dispatched since the workers were last flushed.
    unflushed: bool,

    stats: Stats,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Records that were read and applied.
    pub applied: usize,

    /// Records that could not be parsed or applied.
    pub failed: usize,
}

// === impl Record ===

impl std::str::FromStr for Record {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let RawRecord { action, object } = serde_json::from_str(line)?;
        let kind = object
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| anyhow!("object missing kind"))?
            .to_string();

        let object = match kind.as_str() {
            "Service" => Object::Service(serde_json::from_value(object)?),
            "Pod" => Object::Pod(serde_json::from_value(object)?),
            "Node" => Object::Node(serde_json::from_value(object)?),
            "EndpointSlice" => {
                let es = serde_json::from_value::<k8s::EndpointSlice>(object)?;
                Object::Endpoints(es.into())
            }
            "Endpoints" => {
                let ep = serde_json::from_value::<k8s::Endpoints>(object)?;
                Object::Endpoints(ep.into())
            }
            kind => bail!("unsupported kind {kind}"),
        };

        Ok(Self { action, object })
    }
}

// === impl Replay ===

impl Replay {
    pub fn new(
        cluster_info: Arc<ClusterInfo>,
        registry: SharedRegistry,
        workers: Workers,
    ) -> Self {
        Self {
            cluster_info,
            registry,
            workers,
            live: HashSet::new(),
            unflushed: false,
            stats: Stats::default(),
        }
    }

    /// Reads records until the input is exhausted or shutdown is signaled, and then waits for
    /// all dispatched events to be applied.
    pub async fn run<R>(mut self, input: R, shutdown: drain::Watch) -> Result<Stats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let signaled = shutdown.signaled();
        tokio::pin!(signaled);

        let mut lineno = 0usize;
        loop {
            tokio::select! {
                biased;

                release = &mut signaled => {
                    info!(lines = lineno, "Stopping replay");
                    return Ok(release.release_after(self.finish()).await);
                }

                line = lines.next_line() => {
                    let line = match line.context("failed to read replay input")? {
                        Some(line) => line,
                        None => break,
                    };
                    lineno += 1;

                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }

                    let res = match line.parse::<Record>() {
                        Ok(record) => self.apply(record).await,
                        Err(error) => Err(error),
                    };
                    match res {
                        Ok(()) => self.stats.applied += 1,
                        Err(error) => {
                            warn!(line = lineno, %error, "Skipping record");
                            self.stats.failed += 1;
                        }
                    }
                }
            }
        }

        info!(lines = lineno, "Replay input exhausted");
        Ok(self.finish().await)
    }

    async fn finish(self) -> Stats {
        self.workers.close().await;
        debug!(?self.stats, "Replay complete");
        self.stats
    }

    async fn apply(&mut self, Record { action, object }: Record) -> Result<()> {
        match object {
            Object::Endpoints(resource) => self.dispatch(action, resource).await,
            object => {
                if self.unflushed {
                    self.workers.flush().await;
                    self.unflushed = false;
                }
                self.update_registry(action, object)
            }
        }
    }

    fn update_registry(&self, action: Action, object: Object) -> Result<()> {
        let mut registry = self.registry.write();
        match (action, object) {
            (Action::Apply, Object::Service(svc)) => registry.apply_service(svc),
            (Action::Delete, Object::Service(svc)) => {
                registry.delete_service(&namespace(&svc.metadata)?, &svc.name_any())
            }
            (Action::Apply, Object::Pod(pod)) => registry.apply_pod(pod),
            (Action::Delete, Object::Pod(pod)) => {
                registry.delete_pod(&namespace(&pod.metadata)?, &pod.name_any())
            }
            (Action::Apply, Object::Node(node)) => registry.apply_node(node),
            (Action::Delete, Object::Node(node)) => registry.delete_node(&node.name_any()),
            (_, Object::Endpoints(_)) => bail!("endpoints are not registry objects"),
        }
    }

    /// Decodes an endpoint resource and queues it on its slice's worker.
    ///
    /// The first apply of a resource is an add; later applies are updates.
    async fn dispatch(&mut self, action: Action, resource: Resource) -> Result<()> {
        let key = (
            resource.kind(),
            namespace(resource.metadata())?,
            resource.metadata().name.clone().unwrap_or_default(),
        );
        let kind = match action {
            Action::Delete => EventKind::Delete,
            Action::Apply if self.live.contains(&key) => EventKind::Update,
            Action::Apply => EventKind::Add,
        };
        let event = SliceEvent::decode(kind, resource, &self.cluster_info)?;

        match kind {
            EventKind::Delete => self.live.remove(&key),
            EventKind::Add | EventKind::Update => self.live.insert(key),
        };
        self.workers.dispatch(event).await;
        self.unflushed = true;
        Ok(())
    }
}

fn namespace(meta: &k8s::ObjectMeta) -> Result<String> {
    meta.namespace
        .clone()
        .ok_or_else(|| anyhow!("object missing namespace"))
}
