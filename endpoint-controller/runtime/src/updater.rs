use crate::core::{EdsUpdater, Endpoint};
use tracing::{debug, info};

/// Publishes merged endpoint views to the log.
///
/// Stands in for an endpoint-discovery server when the controller runs on its own.
#[derive(Copy, Clone, Debug, Default)]
pub struct TracingUpdater;

impl EdsUpdater for TracingUpdater {
    fn eds_update(
        &self,
        cluster_id: &str,
        hostname: &str,
        namespace: &str,
        endpoints: Vec<Endpoint>,
    ) {
        let ready = endpoints.iter().filter(|ep| ep.is_ready()).count();
        info!(
            cluster = %cluster_id,
            %hostname,
            ns = %namespace,
            endpoints = endpoints.len(),
            ready,
            "Endpoints updated"
        );
        for ep in endpoints.iter() {
            debug!(
                %hostname,
                addr = %ep.socket_addr(),
                port = ?ep.port_name,
                locality = %ep.locality,
                health = ?ep.health,
                workload = ?ep.workload.as_ref().map(|w| format!("{}.{}", w.name, w.namespace)),
            );
        }
    }
}
