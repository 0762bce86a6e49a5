use crate::{
    event::TargetRef,
    workload::{Workload, WorkloadIndex},
    NodeIndex,
};
use mesh_endpoint_controller_core::{Endpoint, Health, Locality};
use mesh_endpoint_controller_k8s_api::{
    labels::Map, LABEL_LOCALITY, LABEL_TOPOLOGY_REGION, LABEL_TOPOLOGY_SUBZONE,
    LABEL_TOPOLOGY_ZONE,
};
use std::{net::IpAddr, sync::Arc};

/// Builds endpoints for a single address.
///
/// The locality is resolved once, when the builder is created, and shared by every endpoint
/// built for the address (one per port).
#[derive(Debug)]
pub struct EndpointBuilder<'w> {
    workload: Option<&'w Workload>,
    locality: Locality,
}

/// Indicates that a pod-backed address has no known workload.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("no workload found for address {address}")]
pub struct NoOwner {
    pub address: IpAddr,
}

/// Finds the workload that owns `address`.
///
/// Addresses that reference a pod must resolve to a known workload. Other addresses (e.g. those
/// of services without selectors) may have no owner.
pub fn resolve_owner<'w>(
    workloads: &'w WorkloadIndex,
    address: IpAddr,
    target: Option<&TargetRef>,
) -> Result<Option<&'w Arc<Workload>>, NoOwner> {
    match workloads.get_by_ip(address) {
        Some(workload) => Ok(Some(workload)),
        None if target.map(TargetRef::is_pod).unwrap_or(false) => Err(NoOwner { address }),
        None => Ok(None),
    }
}

// === impl EndpointBuilder ===

impl<'w> EndpointBuilder<'w> {
    /// Resolves the locality of an address.
    ///
    /// A workload's explicit locality label takes precedence. Otherwise, the locality is derived
    /// from the topology labels published with the address or, if there are none, from the
    /// labels of the workload's node.
    pub fn new(
        workload: Option<&'w Workload>,
        topology: &Map,
        node_name: Option<&str>,
        nodes: &NodeIndex,
    ) -> Self {
        let locality = workload
            .and_then(|w| w.labels.get(LABEL_LOCALITY))
            .filter(|l| !l.is_empty())
            .map(|l| Locality::parse(&l.replace('.', "/")))
            .or_else(|| {
                let locality = locality_from_topology(topology);
                (!locality.is_empty()).then_some(locality)
            })
            .or_else(|| {
                let node = node_name.or_else(|| workload.and_then(|w| w.node_name.as_deref()))?;
                nodes.topology(node).map(locality_from_topology)
            })
            .unwrap_or_default();

        Self { workload, locality }
    }

    pub fn locality(&self) -> &Locality {
        &self.locality
    }

    pub fn build(
        &self,
        hostname: &str,
        address: IpAddr,
        port: u16,
        port_name: Option<&str>,
        health: Health,
    ) -> Endpoint {
        Endpoint {
            hostname: hostname.to_string(),
            address,
            port,
            port_name: port_name.map(Into::into),
            locality: self.locality.clone(),
            health,
            workload: self.workload.map(Workload::workload_ref),
        }
    }
}

/// Derives a locality from node topology labels, in region, zone, subzone order.
pub fn locality_from_topology(topology: &Map) -> Locality {
    Locality::new(
        topology.get(LABEL_TOPOLOGY_REGION),
        topology.get(LABEL_TOPOLOGY_ZONE),
        topology.get(LABEL_TOPOLOGY_SUBZONE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;
    use maplit::btreemap;
    use mesh_endpoint_controller_k8s_api::{self as k8s, Labels};

    fn mk_workload(labels: Labels, node: Option<&str>) -> Workload {
        Workload {
            namespace: "ns".to_string(),
            name: "pod-0".to_string(),
            labels,
            service_account: Some("sa".to_string()),
            node_name: node.map(Into::into),
            ip: Some("10.0.0.1".parse().unwrap()),
        }
    }

    #[test]
    fn topology_ordering() {
        for (topology, expected) in [
            (Map::new(), ""),
            (
                btreemap! { LABEL_TOPOLOGY_REGION.to_string() => "r".to_string() },
                "r",
            ),
            (
                btreemap! {
                    LABEL_TOPOLOGY_SUBZONE.to_string() => "s".to_string(),
                    LABEL_TOPOLOGY_ZONE.to_string() => "z".to_string(),
                    LABEL_TOPOLOGY_REGION.to_string() => "r".to_string(),
                },
                "r/z/s",
            ),
            (
                btreemap! {
                    LABEL_TOPOLOGY_REGION.to_string() => "r".to_string(),
                    LABEL_TOPOLOGY_SUBZONE.to_string() => "s".to_string(),
                },
                "r/s",
            ),
        ] {
            assert_eq!(locality_from_topology(&topology).to_string(), expected);
        }
    }

    #[test]
    fn locality_label_takes_precedence() {
        let workload = mk_workload(
            Some((LABEL_LOCALITY, "us-west.us-west-2b")).into_iter().collect(),
            None,
        );
        let topology = btreemap! { LABEL_TOPOLOGY_REGION.to_string() => "r".to_string() };
        let builder = EndpointBuilder::new(Some(&workload), &topology, None, &NodeIndex::default());
        assert_eq!(builder.locality().to_string(), "us-west/us-west-2b");

        let ep = builder.build(
            "svc.ns",
            "10.0.0.1".parse().unwrap(),
            80,
            Some("http"),
            Health::Ready,
        );
        assert_eq!(ep.locality.to_string(), "us-west/us-west-2b");
        assert_eq!(ep.workload.as_ref().map(|w| w.name.as_str()), Some("pod-0"));
        assert_eq!(
            ep.workload.and_then(|w| w.service_account),
            Some("sa".to_string())
        );
    }

    #[test]
    fn falls_back_to_node_topology() {
        let mut registry = Registry::default();
        registry
            .apply_node(k8s::Node {
                metadata: k8s::ObjectMeta {
                    name: Some("node-0".to_string()),
                    labels: Some(btreemap! {
                        LABEL_TOPOLOGY_REGION.to_string() => "r".to_string(),
                        LABEL_TOPOLOGY_ZONE.to_string() => "z".to_string(),
                    }),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();

        let workload = mk_workload(Labels::default(), Some("node-0"));
        let builder =
            EndpointBuilder::new(Some(&workload), &Map::new(), None, registry.nodes());
        assert_eq!(builder.locality().to_string(), "r/z");

        // The address's own node is preferred over the workload's.
        let builder = EndpointBuilder::new(None, &Map::new(), Some("node-0"), registry.nodes());
        assert_eq!(builder.locality().to_string(), "r/z");

        // Published topology is preferred over the node's.
        let topology = btreemap! { LABEL_TOPOLOGY_REGION.to_string() => "other".to_string() };
        let builder = EndpointBuilder::new(Some(&workload), &topology, None, registry.nodes());
        assert_eq!(builder.locality().to_string(), "other");
    }

    #[test]
    fn unowned_endpoints() {
        let builder = EndpointBuilder::new(None, &Map::new(), None, &NodeIndex::default());
        let ep = builder.build(
            "svc.ns",
            "10.0.0.1".parse().unwrap(),
            80,
            None,
            Health::NotReady,
        );
        assert!(ep.workload.is_none());
        assert!(ep.port_name.is_none());
        assert!(!ep.is_ready());
        assert!(ep.locality.is_empty());
    }

    #[test]
    fn owner_resolution() {
        let workloads = WorkloadIndex::default();
        let addr = "10.0.0.1".parse().unwrap();
        let pod = TargetRef {
            kind: "Pod".to_string(),
            namespace: Some("ns".to_string()),
            name: Some("pod-0".to_string()),
        };
        let other = TargetRef {
            kind: "ExternalWorkload".to_string(),
            namespace: None,
            name: None,
        };

        assert_eq!(
            resolve_owner(&workloads, addr, Some(&pod)),
            Err(NoOwner { address: addr })
        );
        assert_eq!(resolve_owner(&workloads, addr, Some(&other)), Ok(None));
        assert_eq!(resolve_owner(&workloads, addr, None), Ok(None));
    }
}
