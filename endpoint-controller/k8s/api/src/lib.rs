#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;

pub use self::labels::Labels;
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            EndpointAddress, EndpointSubset, Endpoints, Node, ObjectReference, Pod, PodSpec,
            PodStatus, Service, ServicePort, ServiceSpec,
        },
        discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice},
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
pub use kube::ResourceExt;

/// Names the service an `EndpointSlice` belongs to.
pub const LABEL_SERVICE_NAME: &str = "kubernetes.io/service-name";

/// The region of the node hosting an endpoint.
pub const LABEL_TOPOLOGY_REGION: &str = "topology.kubernetes.io/region";

/// The zone of the node hosting an endpoint.
pub const LABEL_TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";

/// The mesh-specific subzone of the node hosting an endpoint.
pub const LABEL_TOPOLOGY_SUBZONE: &str = "topology.istio.io/subzone";

/// A workload label that overrides the topology-derived locality.
///
/// Label values may not contain `/`, so components are separated by `.` (e.g.
/// `us-east.us-east-1a.rack-1`).
pub const LABEL_LOCALITY: &str = "istio-locality";
