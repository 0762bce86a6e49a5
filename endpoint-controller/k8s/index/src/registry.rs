use crate::{ClusterInfo, NodeIndex, ServiceIndex, WorkloadIndex};
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedRegistry = Arc<RwLock<Registry>>;

/// Holds the service, workload, and node metadata that endpoints are built against.
///
/// The registry is updated by watches on the respective resources. The endpoint controller only
/// ever reads it.
#[derive(Debug, Default)]
pub struct Registry {
    pub(crate) cluster_info: Arc<ClusterInfo>,
    pub(crate) services: ServiceIndex,
    pub(crate) workloads: WorkloadIndex,
    pub(crate) nodes: NodeIndex,
}

// === impl Registry ===

impl Registry {
    pub fn new(cluster_info: impl Into<Arc<ClusterInfo>>) -> Self {
        Self {
            cluster_info: cluster_info.into(),
            services: ServiceIndex::default(),
            workloads: WorkloadIndex::default(),
            nodes: NodeIndex::default(),
        }
    }

    pub fn shared(cluster_info: impl Into<Arc<ClusterInfo>>) -> SharedRegistry {
        Arc::new(RwLock::new(Self::new(cluster_info)))
    }

    pub fn cluster_info(&self) -> &ClusterInfo {
        &self.cluster_info
    }

    pub fn services(&self) -> &ServiceIndex {
        &self.services
    }

    pub fn workloads(&self) -> &WorkloadIndex {
        &self.workloads
    }

    pub fn nodes(&self) -> &NodeIndex {
        &self.nodes
    }
}
