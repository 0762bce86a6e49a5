#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use mesh_endpoint_controller_core as core;
pub use mesh_endpoint_controller_k8s_api as k8s;
pub use mesh_endpoint_controller_k8s_index as index;

mod args;
pub mod replay;
mod updater;
mod workers;

pub use self::{
    args::Args,
    replay::{Replay, Stats},
    updater::TracingUpdater,
    workers::Workers,
};
