#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod agent;
pub mod cilium;
mod error;
pub mod labels;
pub mod policy;

pub use self::{
    cilium::{CiliumEndpoint, CiliumIdentity},
    error::Error,
};
pub use k8s_openapi::api::{
    self,
    core::v1::{Node, Pod, PodSpec, PodStatus},
};
pub use kube::api::{ObjectMeta, ResourceExt};

pub const CILIUM_GROUP: &str = "cilium.io";
pub const CILIUM_VERSION: &str = "v2";
