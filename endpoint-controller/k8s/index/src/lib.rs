//! Mesh Endpoint Controller Index
//!
//! The controller aggregates a service's endpoints, which may be partitioned across many
//! independently-updated slices, into a single merged view that is pushed downstream whenever any
//! slice changes. It watches the following cluster resources:
//!
//! - Each `Service` describes a hostname and its ports. Slices for services that are not yet known
//!   are skipped until the service is registered.
//! - Each `Pod` owns an address. Endpoints are enriched with their pod's identity and labels, and
//!   an address that references a pod that is not (yet) known is dropped.
//! - Each `Node` publishes topology labels from which an endpoint's locality may be derived.
//! - Each `EndpointSlice` (or legacy `Endpoints` object) contributes addresses to a service.
//!
//! ```text
//! [ EndpointSlice ] -> [ EndpointBuilder ] -> [ SliceCache ] -> [ EdsUpdater ]
//!                         ^          ^              |
//!                   [ Pod ]       [ Node ]          v
//!                                  [ Service ] -> [ InstanceQuery ]
//! ```
//!
//! Service, pod, and node metadata is held in a shared [`Registry`]. The [`SliceCache`] holds only
//! per-slice contributions; merged views are computed when they are read.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod builder;
mod cluster_info;
pub mod event;
mod handler;
mod instances;
pub mod metrics;
mod node;
mod registry;
mod service;
mod slice_cache;
mod workload;


pub use self::{
    builder::{locality_from_topology, resolve_owner, EndpointBuilder, NoOwner},
    cluster_info::ClusterInfo,
    event::{DecodeError, EventKind, Resource, SliceEvent},
    handler::{EndpointController, Error, Outcome},
    instances::InstanceQuery,
    metrics::ControllerMetrics,
    node::NodeIndex,
    registry::{Registry, SharedRegistry},
    service::ServiceIndex,
    slice_cache::SliceCache,
    workload::{Workload, WorkloadIndex},
};
