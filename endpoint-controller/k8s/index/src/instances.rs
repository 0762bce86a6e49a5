use crate::{ControllerMetrics, SharedRegistry, SliceCache};
use mesh_endpoint_controller_core::{Labels, Selector, ServiceInstance, ServiceInstances};
use std::{net::IpAddr, sync::Arc};
use tracing::{instrument, trace};

/// Answers service-instance queries against the slice cache and the service registry.
#[derive(Clone, Debug)]
pub struct InstanceQuery {
    registry: SharedRegistry,
    cache: Arc<SliceCache>,
    metrics: ControllerMetrics,
}

// === impl InstanceQuery ===

impl InstanceQuery {
    pub fn new(
        registry: SharedRegistry,
        cache: Arc<SliceCache>,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            registry,
            cache,
            metrics,
        }
    }
}

impl ServiceInstances for InstanceQuery {
    /// Endpoints are matched to service ports by name only; endpoints on unnamed ports, or
    /// without a port number, never match a proxy.
    #[instrument(skip(self), fields(addrs = ?proxy_addrs))]
    fn instances_for_proxy(&self, proxy_addrs: &[IpAddr]) -> Vec<ServiceInstance> {
        let registry = self.registry.read();
        let mut instances = Vec::new();

        self.cache.for_each(|hostname, endpoints| {
            let service = match registry.services.get(hostname) {
                Some(svc) => svc,
                None => return,
            };

            for ep in endpoints {
                if !proxy_addrs.contains(&ep.address) {
                    continue;
                }

                if ep.port == 0 {
                    trace!(%hostname, port = ?ep.port_name, "No endpoint port number");
                    continue;
                }

                let port = match ep.port_name.as_deref().and_then(|n| service.port_by_name(n)) {
                    Some(port) => port,
                    None => {
                        trace!(%hostname, port = ?ep.port_name, "No named service port");
                        continue;
                    }
                };

                if !ep.is_ready() {
                    self.metrics.proxy_endpoint_not_ready();
                }
                instances.push(ServiceInstance {
                    endpoint: ep.clone(),
                    service_port: port.clone(),
                    service: service.clone(),
                });
            }
        });

        instances
    }

    #[instrument(skip(self))]
    fn instances_by_port(
        &self,
        hostname: &str,
        port: u16,
        selector: &Selector,
    ) -> Vec<ServiceInstance> {
        let registry = self.registry.read();
        let service = match registry.services.get(hostname) {
            Some(svc) => svc.clone(),
            None => return vec![],
        };
        let service_port = match service.port_by_number(port) {
            Some(port) => port.clone(),
            None => return vec![],
        };

        // Endpoints without a known workload are matched against empty labels, so they are only
        // selected by the empty selector.
        let unlabeled = Labels::default();

        self.cache
            .get(hostname)
            .into_iter()
            .filter(|ep| {
                let labels = registry
                    .workloads
                    .get_by_ip(ep.address)
                    .map(|w| &w.labels)
                    .unwrap_or(&unlabeled);
                selector.matches(labels)
            })
            .filter(|ep| match ep.port_name.as_deref() {
                None | Some("") => true,
                Some(name) => name == service_port.name,
            })
            .map(|endpoint| ServiceInstance {
                endpoint,
                service_port: service_port.clone(),
                service: service.clone(),
            })
            .collect()
    }
}
