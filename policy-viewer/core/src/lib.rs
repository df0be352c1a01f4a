//! Network policy viewer engine
//!
//! The engine correlates the policy maps that the Cilium agent enforces for an endpoint with
//! cluster-level identity metadata. It is independent of Kubernetes: policy entries, identity
//! labels and endpoint names are handed to it, and per-agent identity lookups go through the
//! [`AgentClient`] trait.
//!
//! ```text
//! [ PolicyEntry ] -> [ Filter ] -> [ enrich ] -> [ Aggregate ] -> output
//!                        \            /
//!                   [ ResolutionContext ] <- [ AgentClient ]
//! ```
//!
//! All caching lives in a [`ResolutionContext`], which is built for a single invocation and
//! discarded with it. Locally-scoped identities are only meaningful relative to the agent that
//! reported them, so they are cached per `(agent, identity)`.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod aggregate;
pub mod cidr;
pub mod enrich;
mod error;
pub mod filter;
pub mod identity;
pub mod label_tree;
pub mod policy;

pub use self::{
    cidr::CidrSet,
    error::Error,
    filter::Filter,
    identity::{AgentClient, AgentHandle, NumericIdentity, ResolutionContext, Resolved, Scope},
    policy::{Direction, PolicyEntry, PolicyEntryDump, Verdict},
};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Label holding the namespace of a workload identity.
pub const LABEL_POD_NAMESPACE: &str = "k8s:io.kubernetes.pod.namespace";

/// Label holding the cluster name of a workload identity.
pub const LABEL_CLUSTER: &str = "k8s:io.cilium.k8s.policy.cluster";

/// Placeholder shown for values that could not be resolved.
pub const UNKNOWN: &str = "-";
