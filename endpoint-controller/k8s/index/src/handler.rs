use crate::{
    builder::{resolve_owner, EndpointBuilder},
    event::{DecodeError, EventKind, Resource, SliceEvent, Subset},
    ClusterInfo, ControllerMetrics, InstanceQuery, Registry, SharedRegistry, SliceCache,
};
use mesh_endpoint_controller_core::{EdsUpdater, Endpoint, Health};
use std::{
    net::{AddrParseError, IpAddr},
    sync::Arc,
};
use tracing::{debug, info, instrument, trace, warn};

/// Applies endpoint events to the slice cache and pushes the resulting merged views downstream.
///
/// The controller is cheaply cloneable so that events may be processed by many workers
/// concurrently. Events for different slices are independent; an error processing one event
/// never affects the state of any other slice.
#[derive(Clone, Debug)]
pub struct EndpointController<U> {
    cluster_info: Arc<ClusterInfo>,
    registry: SharedRegistry,
    cache: Arc<SliceCache>,
    updater: U,
    metrics: ControllerMetrics,
}

/// Describes how an event was applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The event's service is not yet known. Nothing was updated; a later event for the slice
    /// will populate it.
    Skipped,

    /// The slice was updated and the service's merged view was pushed.
    Pushed {
        /// The number of endpoints in the merged view.
        endpoints: usize,

        /// The number of pod-backed addresses that were dropped because no workload owns them.
        dropped: usize,
    },
}

/// Indicates that an event could not be applied. The cache is unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid address {address:?} in slice {slice} of {hostname}")]
    InvalidAddress {
        hostname: String,
        slice: String,
        address: String,
        #[source]
        source: AddrParseError,
    },
}

// === impl EndpointController ===

impl<U: EdsUpdater> EndpointController<U> {
    pub fn new(
        registry: SharedRegistry,
        cache: Arc<SliceCache>,
        updater: U,
        metrics: ControllerMetrics,
    ) -> Self {
        let cluster_info = registry.read().cluster_info.clone();
        Self {
            cluster_info,
            registry,
            cache,
            updater,
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<SliceCache> {
        &self.cache
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Returns a handle for querying service instances from this controller's state.
    pub fn instances(&self) -> InstanceQuery {
        InstanceQuery::new(
            self.registry.clone(),
            self.cache.clone(),
            self.metrics.clone(),
        )
    }

    /// Decodes and applies an event for an endpoint resource.
    #[instrument(
        skip(self, resource),
        fields(
            resource = resource.kind(),
            ns = ?resource.metadata().namespace,
            name = ?resource.metadata().name,
        )
    )]
    pub fn handle(&self, kind: EventKind, resource: Resource) -> Result<Outcome, Error> {
        let event = SliceEvent::decode(kind, resource, &self.cluster_info)?;
        self.handle_event(event)
    }

    /// Applies a decoded slice event.
    ///
    /// Updates for services that are not yet known are skipped. Deletes are always applied so
    /// that a slice never outlives its service in the cache.
    #[instrument(
        skip_all,
        fields(
            hostname = %event.hostname,
            slice = %event.slice,
            kind = ?event.kind,
        )
    )]
    pub fn handle_event(&self, event: SliceEvent) -> Result<Outcome, Error> {
        let SliceEvent {
            kind,
            hostname,
            namespace,
            slice,
            subsets,
            ..
        } = event;

        let (endpoints, dropped) = {
            let registry = self.registry.read();
            match kind {
                EventKind::Delete => (vec![], 0),
                EventKind::Add | EventKind::Update => {
                    if registry.services.get(&hostname).is_none() {
                        info!("Skipping update; service has not been populated");
                        self.metrics.unknown_service();
                        return Ok(Outcome::Skipped);
                    }
                    self.build_endpoints(&registry, &hostname, &slice, subsets)?
                }
            }
        };

        self.cache.update(&hostname, &slice, endpoints);

        // Push the service's complete view, even if some of this slice's addresses were dropped,
        // so that the addresses that were resolved still propagate.
        let merged = self.cache.get(&hostname);
        let count = merged.len();
        debug!(endpoints = count, dropped, "Pushing endpoints");
        self.updater
            .eds_update(&self.cluster_info.cluster_id, &hostname, &namespace, merged);
        self.metrics.eds_update();

        Ok(Outcome::Pushed {
            endpoints: count,
            dropped,
        })
    }

    /// Builds an endpoint for each address and port of the slice.
    ///
    /// Pod-backed addresses without a known pod are dropped (and counted); the rest of the
    /// slice is still built. Any unparseable address fails the whole slice.
    fn build_endpoints(
        &self,
        registry: &Registry,
        hostname: &str,
        slice: &str,
        subsets: Vec<Subset>,
    ) -> Result<(Vec<Endpoint>, usize), Error> {
        let mut endpoints = Vec::new();
        let mut dropped = 0;

        for Subset { addresses, ports } in subsets.into_iter() {
            for addr in addresses.into_iter() {
                let ip = addr
                    .ip
                    .parse::<IpAddr>()
                    .map_err(|source| Error::InvalidAddress {
                        hostname: hostname.to_string(),
                        slice: slice.to_string(),
                        address: addr.ip.clone(),
                        source,
                    })?;

                if !addr.ready && !self.cluster_info.include_unready {
                    trace!(%ip, "Ignoring endpoint that is not ready");
                    continue;
                }

                let workload = match resolve_owner(&registry.workloads, ip, addr.target.as_ref()) {
                    Ok(workload) => workload,
                    Err(error) => {
                        warn!(%error, "Endpoint without pod");
                        self.metrics.endpoint_no_pod(hostname);
                        dropped += 1;
                        continue;
                    }
                };

                let builder = EndpointBuilder::new(
                    workload.map(|w| &**w),
                    &addr.topology,
                    addr.node_name.as_deref(),
                    &registry.nodes,
                );
                trace!(
                    %ip,
                    locality = %builder.locality(),
                    ports = ports.len(),
                    "Building endpoints"
                );
                let health = Health::from_ready(Some(addr.ready));
                for port in ports.iter() {
                    endpoints.push(builder.build(
                        hostname,
                        ip,
                        port.number.unwrap_or(0),
                        port.name.as_deref(),
                        health,
                    ));
                }
            }
        }

        Ok((endpoints, dropped))
    }
}
