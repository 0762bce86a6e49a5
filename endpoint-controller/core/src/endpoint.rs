use crate::Locality;
use std::net::{IpAddr, SocketAddr};

/// A single network-reachable instance of a service behind one port.
///
/// Within one slice's contribution, the hostname, address and port uniquely identify an
/// endpoint. The locality is resolved once when the endpoint is built; a locality change on the
/// owning workload is reflected by rebuilding the endpoint, never by patching it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// The fully-qualified hostname of the service this endpoint belongs to.
    pub hostname: String,

    pub address: IpAddr,

    /// The target port. Zero when the source did not specify a port number.
    pub port: u16,

    /// The name of the service port this endpoint serves, if the source named it.
    pub port_name: Option<String>,

    pub locality: Locality,

    pub health: Health,

    /// The workload that owns this address. Unset for services without a workload registry
    /// (e.g. selector-less services).
    pub workload: Option<WorkloadRef>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Health {
    #[default]
    Ready,
    NotReady,
}

/// Identifies the workload that owns an endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
    pub service_account: Option<String>,
}

// === impl Endpoint ===

impl Endpoint {
    #[inline]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }
}

// === impl Health ===

impl Health {
    /// Only an explicit not-ready signal marks an endpoint as not ready.
    pub fn from_ready(ready: Option<bool>) -> Self {
        match ready {
            Some(false) => Self::NotReady,
            Some(true) | None => Self::Ready,
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}
