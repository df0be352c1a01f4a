#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use npv_core as core;
pub use npv_k8s_api as k8s;

mod args;
mod cluster;
mod cmd;
mod output;
mod proxy;

pub use self::{args::Args, proxy::ProxyClient};
