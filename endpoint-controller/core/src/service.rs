use crate::{Endpoint, Labels, Selector};
use std::{net::IpAddr, sync::Arc};

/// Service metadata, as known to the service registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub hostname: String,
    pub name: String,
    pub namespace: String,
    pub ports: Vec<ServicePort>,
    pub labels: Labels,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServicePort {
    /// The port's name. Empty when the service does not name the port.
    pub name: String,
    pub port: u16,
    pub protocol: String,
}

/// An endpoint paired with the service port it serves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInstance {
    pub endpoint: Endpoint,
    pub service_port: ServicePort,
    pub service: Arc<Service>,
}

/// Resolves service instances from the merged endpoint views.
///
/// Both queries are pure reads. Unknown hostnames, unknown ports, and endpoints without a known
/// workload produce empty (or smaller) results rather than errors.
pub trait ServiceInstances {
    /// Returns every instance whose address is one of the proxy's addresses.
    fn instances_for_proxy(&self, proxy_addrs: &[IpAddr]) -> Vec<ServiceInstance>;

    /// Returns the instances of `hostname` on the numbered service `port` whose owning workloads
    /// are selected by `selector`.
    fn instances_by_port(
        &self,
        hostname: &str,
        port: u16,
        selector: &Selector,
    ) -> Vec<ServiceInstance>;
}

// === impl Service ===

impl Service {
    /// Finds a port by name. Unnamed ports are never returned.
    pub fn port_by_name(&self, name: &str) -> Option<&ServicePort> {
        if name.is_empty() {
            return None;
        }
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn port_by_number(&self, port: u16) -> Option<&ServicePort> {
        self.ports.iter().find(|p| p.port == port)
    }
}
