use crate::Endpoint;
use tokio::sync::mpsc;

/// Receives merged endpoint views for distribution to proxies.
///
/// Updates are fire-and-forget: implementations must not block, and callers neither await nor
/// retry. Implementations must tolerate receiving the same (or an older) view more than once.
pub trait EdsUpdater: Send + Sync {
    fn eds_update(
        &self,
        cluster_id: &str,
        hostname: &str,
        namespace: &str,
        endpoints: Vec<Endpoint>,
    );
}

/// An owned endpoint-discovery update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdsUpdate {
    pub cluster_id: String,
    pub hostname: String,
    pub namespace: String,
    pub endpoints: Vec<Endpoint>,
}

impl EdsUpdater for mpsc::UnboundedSender<EdsUpdate> {
    fn eds_update(
        &self,
        cluster_id: &str,
        hostname: &str,
        namespace: &str,
        endpoints: Vec<Endpoint>,
    ) {
        let update = EdsUpdate {
            cluster_id: cluster_id.to_string(),
            hostname: hostname.to_string(),
            namespace: namespace.to_string(),
            endpoints,
        };
        if self.send(update).is_err() {
            tracing::debug!(%hostname, "EDS update receiver dropped");
        }
    }
}

impl<U: EdsUpdater + ?Sized> EdsUpdater for std::sync::Arc<U> {
    #[inline]
    fn eds_update(
        &self,
        cluster_id: &str,
        hostname: &str,
        namespace: &str,
        endpoints: Vec<Endpoint>,
    ) {
        (**self).eds_update(cluster_id, hostname, namespace, endpoints)
    }
}
