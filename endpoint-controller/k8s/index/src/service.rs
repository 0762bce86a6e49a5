use crate::{ClusterInfo, Registry};
use ahash::AHashMap as HashMap;
use anyhow::{anyhow, Result};
use mesh_endpoint_controller_core::{Service, ServicePort};
use mesh_endpoint_controller_k8s_api as k8s;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Indexes service metadata by hostname.
#[derive(Debug, Default)]
pub struct ServiceIndex {
    by_hostname: HashMap<String, Arc<Service>>,
}

// === impl ServiceIndex ===

impl ServiceIndex {
    pub fn get(&self, hostname: &str) -> Option<&Arc<Service>> {
        self.by_hostname.get(hostname)
    }

    pub fn len(&self) -> usize {
        self.by_hostname.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hostname.is_empty()
    }

    fn convert(cluster: &ClusterInfo, svc: k8s::Service) -> Result<Service> {
        let namespace = svc
            .metadata
            .namespace
            .ok_or_else(|| anyhow!("service missing namespace"))?;
        let name = svc
            .metadata
            .name
            .ok_or_else(|| anyhow!("service missing name"))?;

        let ports = svc
            .spec
            .and_then(|spec| spec.ports)
            .into_iter()
            .flatten()
            .map(|p| {
                let port = u16::try_from(p.port)
                    .map_err(|_| anyhow!("invalid port {} for service {name}", p.port))?;
                Ok(ServicePort {
                    name: p.name.unwrap_or_default(),
                    port,
                    protocol: p.protocol.unwrap_or_else(|| "TCP".to_string()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Service {
            hostname: cluster.service_hostname(&name, &namespace),
            name,
            namespace,
            ports,
            labels: svc.metadata.labels.into(),
        })
    }
}

// === impl Registry ===

impl Registry {
    #[instrument(
        skip(self, svc),
        fields(
            ns = ?svc.metadata.namespace,
            name = ?svc.metadata.name,
        )
    )]
    pub fn apply_service(&mut self, svc: k8s::Service) -> Result<()> {
        let svc = ServiceIndex::convert(&self.cluster_info, svc)?;
        if let Some(prior) = self.services.by_hostname.get(&svc.hostname) {
            if **prior == svc {
                trace!("Unchanged");
                return Ok(());
            }
        }
        debug!(hostname = %svc.hostname, ports = svc.ports.len(), "Updating");
        self.services
            .by_hostname
            .insert(svc.hostname.clone(), Arc::new(svc));
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_service(&mut self, namespace: &str, name: &str) -> Result<()> {
        let hostname = self.cluster_info.service_hostname(name, namespace);
        self.services
            .by_hostname
            .remove(&hostname)
            .ok_or_else(|| anyhow!("service {} does not exist", hostname))?;
        debug!(%hostname, "Deleted");
        Ok(())
    }
}
