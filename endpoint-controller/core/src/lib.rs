#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod eds;
mod endpoint;
mod locality;
pub mod service;

pub use self::{
    eds::{EdsUpdate, EdsUpdater},
    endpoint::{Endpoint, Health, WorkloadRef},
    locality::Locality,
    service::{Service, ServiceInstance, ServiceInstances, ServicePort},
};
pub use mesh_endpoint_controller_k8s_api::labels::{self, Labels, Selector};
