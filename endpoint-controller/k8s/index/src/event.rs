//! Decodes endpoint resources into slice events.
//!
//! Endpoints may be published either as `EndpointSlice`s (many per service) or as a legacy
//! `Endpoints` object (one per service, with the object's name as its slice). Both shapes are
//! decoded into a uniform [`SliceEvent`] once, at the controller's boundary, so nothing past this
//! point needs to know which API the endpoints came from.

use crate::ClusterInfo;
use mesh_endpoint_controller_k8s_api::{
    self as k8s, labels::Map, LABEL_SERVICE_NAME, LABEL_TOPOLOGY_ZONE,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

/// An endpoint resource, as observed by a watch.
#[derive(Clone, Debug)]
pub enum Resource {
    EndpointSlice(k8s::EndpointSlice),
    Endpoints(k8s::Endpoints),
}

/// A decoded change to one slice of a service's endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceEvent {
    pub kind: EventKind,

    /// The fully-qualified hostname of the service.
    pub hostname: String,

    /// The name of the service.
    pub service: String,

    pub namespace: String,

    /// The name of the slice. Unique within a service.
    pub slice: String,

    /// Empty for deletes.
    pub subsets: Vec<Subset>,
}

/// A set of addresses that all expose the same set of ports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subset {
    pub addresses: Vec<SliceAddress>,
    pub ports: Vec<SlicePort>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceAddress {
    /// The address, as published. Parsed by the controller.
    pub ip: String,

    /// False only when the source explicitly marked the address as not ready.
    pub ready: bool,

    pub target: Option<TargetRef>,

    /// The node hosting the address, if known.
    pub node_name: Option<String>,

    /// Topology labels of the address's node, as published with the address.
    pub topology: Map,
}

/// References the object that backs an address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetRef {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlicePort {
    pub name: Option<String>,
    pub number: Option<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{kind} missing {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("endpoint slice {0} is missing the kubernetes.io/service-name label")]
    MissingServiceName(String),

    #[error("invalid port number {0}")]
    InvalidPort(i32),
}

// === impl Resource ===

impl Resource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EndpointSlice(_) => "EndpointSlice",
            Self::Endpoints(_) => "Endpoints",
        }
    }

    pub fn metadata(&self) -> &k8s::ObjectMeta {
        match self {
            Self::EndpointSlice(es) => &es.metadata,
            Self::Endpoints(ep) => &ep.metadata,
        }
    }
}

impl From<k8s::EndpointSlice> for Resource {
    fn from(es: k8s::EndpointSlice) -> Self {
        Self::EndpointSlice(es)
    }
}

impl From<k8s::Endpoints> for Resource {
    fn from(ep: k8s::Endpoints) -> Self {
        Self::Endpoints(ep)
    }
}

// === impl SliceEvent ===

impl SliceEvent {
    pub fn decode(
        kind: EventKind,
        resource: Resource,
        cluster: &ClusterInfo,
    ) -> Result<Self, DecodeError> {
        let res_kind = resource.kind();
        let meta = resource.metadata();
        let namespace = meta.namespace.clone().ok_or(DecodeError::MissingField {
            kind: res_kind,
            field: "namespace",
        })?;
        let slice = meta.name.clone().ok_or(DecodeError::MissingField {
            kind: res_kind,
            field: "name",
        })?;

        let service = match &resource {
            Resource::EndpointSlice(es) => es
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(LABEL_SERVICE_NAME))
                .filter(|s| !s.is_empty())
                .cloned()
                .ok_or_else(|| DecodeError::MissingServiceName(slice.clone()))?,
            // Legacy endpoints share their service's name.
            Resource::Endpoints(_) => slice.clone(),
        };

        let subsets = match (kind, resource) {
            (EventKind::Delete, _) => vec![],
            (_, Resource::EndpointSlice(es)) => vec![Self::slice_subset(es)?],
            (_, Resource::Endpoints(ep)) => Self::legacy_subsets(ep)?,
        };

        Ok(Self {
            kind,
            hostname: cluster.service_hostname(&service, &namespace),
            service,
            namespace,
            slice,
            subsets,
        })
    }

    fn slice_subset(es: k8s::EndpointSlice) -> Result<Subset, DecodeError> {
        let ports = es
            .ports
            .into_iter()
            .flatten()
            .map(|p| {
                Ok(SlicePort {
                    name: p.name,
                    number: p.port.map(decode_port).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;

        let mut addresses = Vec::new();
        for ep in es.endpoints.into_iter() {
            let ready = ep.conditions.and_then(|c| c.ready).unwrap_or(true);
            let target = ep.target_ref.and_then(TargetRef::from_object_ref);

            let mut topology = ep.deprecated_topology.unwrap_or_default();
            if let Some(zone) = ep.zone {
                topology
                    .entry(LABEL_TOPOLOGY_ZONE.to_string())
                    .or_insert(zone);
            }

            for ip in ep.addresses.into_iter() {
                addresses.push(SliceAddress {
                    ip,
                    ready,
                    target: target.clone(),
                    node_name: ep.node_name.clone(),
                    topology: topology.clone(),
                });
            }
        }

        Ok(Subset { addresses, ports })
    }

    fn legacy_subsets(ep: k8s::Endpoints) -> Result<Vec<Subset>, DecodeError> {
        let mut subsets = Vec::new();
        for subset in ep.subsets.into_iter().flatten() {
            let ports = subset
                .ports
                .into_iter()
                .flatten()
                .map(|p| {
                    Ok(SlicePort {
                        name: p.name,
                        number: Some(decode_port(p.port)?),
                    })
                })
                .collect::<Result<Vec<_>, DecodeError>>()?;

            let ready = subset.addresses.into_iter().flatten().map(|a| (a, true));
            let not_ready = subset
                .not_ready_addresses
                .into_iter()
                .flatten()
                .map(|a| (a, false));
            let addresses = ready
                .chain(not_ready)
                .map(|(addr, ready)| SliceAddress {
                    ip: addr.ip,
                    ready,
                    target: addr.target_ref.and_then(TargetRef::from_object_ref),
                    node_name: addr.node_name,
                    topology: Map::new(),
                })
                .collect();

            subsets.push(Subset { addresses, ports });
        }
        Ok(subsets)
    }
}

fn decode_port(port: i32) -> Result<u16, DecodeError> {
    u16::try_from(port).map_err(|_| DecodeError::InvalidPort(port))
}

// === impl TargetRef ===

impl TargetRef {
    fn from_object_ref(r: k8s::ObjectReference) -> Option<Self> {
        Some(Self {
            kind: r.kind?,
            namespace: r.namespace,
            name: r.name,
        })
    }

    /// Pod-backed addresses must resolve to a known workload.
    pub fn is_pod(&self) -> bool {
        self.kind == "Pod"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::api::core::v1 as corev1;
    use maplit::btreemap;

    fn mk_slice(labels: Map) -> k8s::EndpointSlice {
        k8s::EndpointSlice {
            metadata: k8s::ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("svc-abc".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            address_type: "IPv4".to_string(),
            endpoints: vec![
                k8s::Endpoint {
                    addresses: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
                    conditions: Some(k8s::EndpointConditions {
                        ready: Some(false),
                        ..Default::default()
                    }),
                    target_ref: Some(k8s::ObjectReference {
                        kind: Some("Pod".to_string()),
                        name: Some("pod-0".to_string()),
                        namespace: Some("ns".to_string()),
                        ..Default::default()
                    }),
                    zone: Some("z1".to_string()),
                    deprecated_topology: Some(btreemap! {
                        "topology.kubernetes.io/region".to_string() => "r1".to_string(),
                    }),
                    ..Default::default()
                },
                k8s::Endpoint {
                    addresses: vec!["10.0.0.3".to_string()],
                    ..Default::default()
                },
            ],
            ports: Some(vec![k8s::EndpointPort {
                name: Some("http".to_string()),
                port: Some(8080),
                ..Default::default()
            }]),
        }
    }

    #[test]
    fn decodes_endpoint_slice() {
        let slice = mk_slice(btreemap! { LABEL_SERVICE_NAME.to_string() => "svc".to_string() });
        let ev = SliceEvent::decode(EventKind::Add, slice.into(), &ClusterInfo::default())
            .expect("slice must decode");

        assert_eq!(ev.hostname, "svc.ns.svc.cluster.local");
        assert_eq!(ev.service, "svc");
        assert_eq!(ev.slice, "svc-abc");
        assert_eq!(ev.subsets.len(), 1);

        let subset = &ev.subsets[0];
        assert_eq!(
            subset.ports,
            vec![SlicePort {
                name: Some("http".to_string()),
                number: Some(8080),
            }]
        );
        assert_eq!(
            subset
                .addresses
                .iter()
                .map(|a| (a.ip.as_str(), a.ready))
                .collect::<Vec<_>>(),
            vec![("10.0.0.1", false), ("10.0.0.2", false), ("10.0.0.3", true)],
        );
        assert_eq!(
            subset.addresses[0].topology,
            btreemap! {
                "topology.kubernetes.io/region".to_string() => "r1".to_string(),
                "topology.kubernetes.io/zone".to_string() => "z1".to_string(),
            }
        );
        assert!(subset.addresses[0].target.as_ref().unwrap().is_pod());
        assert!(subset.addresses[2].target.is_none());
    }

    #[test]
    fn delete_ignores_payload() {
        let slice = mk_slice(btreemap! { LABEL_SERVICE_NAME.to_string() => "svc".to_string() });
        let ev = SliceEvent::decode(EventKind::Delete, slice.into(), &ClusterInfo::default())
            .expect("slice must decode");
        assert!(ev.subsets.is_empty());
        assert_eq!(ev.slice, "svc-abc");
    }

    #[test]
    fn slice_requires_service_name() {
        let err = SliceEvent::decode(
            EventKind::Update,
            mk_slice(Map::new()).into(),
            &ClusterInfo::default(),
        )
        .expect_err("slice must not decode");
        assert_eq!(err, DecodeError::MissingServiceName("svc-abc".to_string()));
    }

    #[test]
    fn rejects_invalid_ports() {
        let mut slice =
            mk_slice(btreemap! { LABEL_SERVICE_NAME.to_string() => "svc".to_string() });
        slice.ports = Some(vec![k8s::EndpointPort {
            port: Some(-1),
            ..Default::default()
        }]);
        let err = SliceEvent::decode(EventKind::Update, slice.into(), &ClusterInfo::default())
            .expect_err("slice must not decode");
        assert_eq!(err, DecodeError::InvalidPort(-1));
    }

    #[test]
    fn decodes_legacy_endpoints() {
        let ep = k8s::Endpoints {
            metadata: k8s::ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("svc".to_string()),
                ..Default::default()
            },
            subsets: Some(vec![corev1::EndpointSubset {
                addresses: Some(vec![corev1::EndpointAddress {
                    ip: "10.0.0.1".to_string(),
                    node_name: Some("node-0".to_string()),
                    ..Default::default()
                }]),
                not_ready_addresses: Some(vec![corev1::EndpointAddress {
                    ip: "10.0.0.2".to_string(),
                    ..Default::default()
                }]),
                ports: Some(vec![corev1::EndpointPort {
                    name: Some("http".to_string()),
                    port: 80,
                    ..Default::default()
                }]),
            }]),
        };

        let ev = SliceEvent::decode(EventKind::Add, ep.into(), &ClusterInfo::default())
            .expect("endpoints must decode");
        assert_eq!(ev.hostname, "svc.ns.svc.cluster.local");
        assert_eq!(ev.slice, "svc");
        let subset = &ev.subsets[0];
        assert_eq!(
            subset
                .addresses
                .iter()
                .map(|a| (a.ip.as_str(), a.ready, a.node_name.as_deref()))
                .collect::<Vec<_>>(),
            vec![("10.0.0.1", true, Some("node-0")), ("10.0.0.2", false, None)],
        );
        assert_eq!(subset.ports[0].number, Some(80));
    }

    #[test]
    fn requires_namespace() {
        let ep = k8s::Endpoints {
            metadata: k8s::ObjectMeta {
                name: Some("svc".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = SliceEvent::decode(EventKind::Add, ep.into(), &ClusterInfo::default())
            .expect_err("endpoints must not decode");
        assert_eq!(
            err,
            DecodeError::MissingField {
                kind: "Endpoints",
                field: "namespace"
            }
        );
    }
}
