use crate::Registry;
use ahash::AHashMap as HashMap;
use anyhow::{anyhow, Context, Result};
use mesh_endpoint_controller_core::WorkloadRef;
use mesh_endpoint_controller_k8s_api::{self as k8s, Labels};
use std::{net::IpAddr, sync::Arc};
use tracing::{debug, instrument, trace};

/// Indexes workloads by their addresses so that endpoints can be correlated with the pods that
/// own them.
#[derive(Debug, Default)]
pub struct WorkloadIndex {
    by_ip: HashMap<IpAddr, Arc<Workload>>,
    by_name: HashMap<(String, String), Arc<Workload>>,
}

/// The parts of a pod that endpoints are built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub labels: Labels,
    pub service_account: Option<String>,
    pub node_name: Option<String>,
    pub ip: Option<IpAddr>,
}

// === impl WorkloadIndex ===

impl WorkloadIndex {
    pub fn get_by_ip(&self, ip: IpAddr) -> Option<&Arc<Workload>> {
        self.by_ip.get(&ip)
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&Arc<Workload>> {
        self.by_name.get(&(namespace.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn insert(&mut self, workload: Workload) {
        let key = (workload.namespace.clone(), workload.name.clone());
        self.remove(&key);

        let workload = Arc::new(workload);
        if let Some(ip) = workload.ip {
            // Pods that share an address (e.g. host-networked pods) resolve to the most recently
            // applied pod.
            if let Some(prior) = self.by_ip.insert(ip, workload.clone()) {
                trace!(%ip, prior.ns = %prior.namespace, prior.name = %prior.name, "Address reassigned");
            }
        }
        self.by_name.insert(key, workload);
    }

    fn remove(&mut self, key: &(String, String)) -> Option<Arc<Workload>> {
        let workload = self.by_name.remove(key)?;
        if let Some(ip) = workload.ip {
            // Only unlink the address if it still refers to this workload.
            if self
                .by_ip
                .get(&ip)
                .map(|w| Arc::ptr_eq(w, &workload))
                .unwrap_or(false)
            {
                self.by_ip.remove(&ip);
            }
        }
        Some(workload)
    }
}

// === impl Workload ===

impl Workload {
    pub fn try_from_pod(pod: k8s::Pod) -> Result<Self> {
        let namespace = pod
            .metadata
            .namespace
            .ok_or_else(|| anyhow!("pod missing namespace"))?;
        let name = pod
            .metadata
            .name
            .ok_or_else(|| anyhow!("pod missing name"))?;

        let ip = pod
            .status
            .and_then(|s| s.pod_ip)
            .filter(|ip| !ip.is_empty())
            .map(|ip| {
                ip.parse::<IpAddr>()
                    .with_context(|| format!("invalid pod IP {ip}"))
            })
            .transpose()?;

        let (service_account, node_name) = match pod.spec {
            Some(spec) => (spec.service_account_name, spec.node_name),
            None => (None, None),
        };

        Ok(Self {
            namespace,
            name,
            labels: pod.metadata.labels.into(),
            service_account,
            node_name,
            ip,
        })
    }

    pub fn workload_ref(&self) -> WorkloadRef {
        WorkloadRef {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            service_account: self.service_account.clone(),
        }
    }
}

// === impl Registry ===

impl Registry {
    #[instrument(
        skip(self, pod),
        fields(
            ns = ?pod.metadata.namespace,
            name = ?pod.metadata.name,
        )
    )]
    pub fn apply_pod(&mut self, pod: k8s::Pod) -> Result<()> {
        let workload = Workload::try_from_pod(pod)?;
        if self
            .workloads
            .get(&workload.namespace, &workload.name)
            .map(|w| **w == workload)
            .unwrap_or(false)
        {
            trace!("Unchanged");
            return Ok(());
        }

        debug!(ip = ?workload.ip, "Updating");
        self.workloads.insert(workload);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_pod(&mut self, namespace: &str, name: &str) -> Result<()> {
        self.workloads
            .remove(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| anyhow!("pod {}.{} does not exist", name, namespace))?;
        debug!("Deleted");
        Ok(())
    }
}
