/// Holds cluster metadata.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// Identifies this cluster in endpoint-discovery updates.
    pub cluster_id: String,

    /// E.g. "cluster.local"
    pub domain_suffix: String,

    /// When false, addresses that are explicitly not ready are dropped rather than published
    /// with a not-ready health status.
    pub include_unready: bool,
}

impl ClusterInfo {
    /// Returns the fully-qualified hostname of a service, e.g. `web.emojivoto.svc.cluster.local`.
    pub fn service_hostname(&self, name: &str, ns: &str) -> String {
        format!("{}.{}.svc.{}", name, ns, self.domain_suffix)
    }
}

impl Default for ClusterInfo {
    fn default() -> Self {
        Self {
            cluster_id: "Kubernetes".to_string(),
            domain_suffix: "cluster.local".to_string(),
            include_unready: true,
        }
    }
}
