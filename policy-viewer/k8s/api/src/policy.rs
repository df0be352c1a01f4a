//! Cilium network policy resources.
//!
//! Existing policies are only ever read back and printed, so they are fetched as dynamic objects.
//! Generated policies use the typed [`CiliumNetworkPolicy`] below, which covers the subset of the
//! rule language `npv` emits.

use crate::{labels::Selector, Error, CILIUM_GROUP, CILIUM_VERSION};
use kube::{
    api::{ApiResource, DynamicObject, ObjectMeta},
    core::GroupVersionKind,
};
use npv_core::{Direction, NumericIdentity, Verdict};
use serde::{Deserialize, Serialize};

const LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolicyKind {
    CiliumNetworkPolicy,
    CiliumClusterwideNetworkPolicy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiliumNetworkPolicy {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: PolicySpec,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub endpoint_selector: Selector,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<IngressRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress_deny: Vec<IngressRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<EgressRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress_deny: Vec<EgressRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_endpoints: Vec<Selector>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_endpoints: Vec<Selector>,
}

/// One side of a generated policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub namespace: String,
    pub identity: NumericIdentity,
    pub labels: crate::labels::Map,
}

// === impl PolicyKind ===

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CiliumNetworkPolicy => "CiliumNetworkPolicy",
            Self::CiliumClusterwideNetworkPolicy => "CiliumClusterwideNetworkPolicy",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        matches!(self, Self::CiliumNetworkPolicy)
    }

    pub fn api_resource(&self) -> ApiResource {
        let plural = match self {
            Self::CiliumNetworkPolicy => "ciliumnetworkpolicies",
            Self::CiliumClusterwideNetworkPolicy => "ciliumclusterwidenetworkpolicies",
        };
        let gvk = GroupVersionKind::gvk(CILIUM_GROUP, CILIUM_VERSION, self.as_str());
        ApiResource::from_gvk_with_plural(&gvk, plural)
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CiliumNetworkPolicy" => Ok(Self::CiliumNetworkPolicy),
            "CiliumClusterwideNetworkPolicy" => Ok(Self::CiliumClusterwideNetworkPolicy),
            _ => Err(Error::UnknownPolicyKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drops the metadata the API server maintains so that a fetched policy reads like the manifest
/// it was applied from.
pub fn strip_server_metadata(obj: &mut DynamicObject) {
    let meta = &mut obj.metadata;
    if let Some(annotations) = meta.annotations.as_mut() {
        annotations.remove(LAST_APPLIED);
        if annotations.is_empty() {
            meta.annotations = None;
        }
    }
    meta.creation_timestamp = None;
    meta.generation = None;
    meta.managed_fields = None;
    meta.resource_version = None;
    meta.uid = None;
}

/// Name used for a generated policy when none is given, e.g. `egress-allow-1234-5678`.
pub fn default_name(
    direction: Direction,
    verdict: Verdict,
    subject: NumericIdentity,
    object: NumericIdentity,
) -> String {
    format!(
        "{}-{}-{}-{}",
        direction.as_str().to_ascii_lowercase(),
        verdict.to_string().to_ascii_lowercase(),
        subject,
        object,
    )
}

// === impl CiliumNetworkPolicy ===

impl CiliumNetworkPolicy {
    /// Builds a policy that allows or denies traffic from `from` to `to`.
    ///
    /// The policy is owned by the side it is enforced on: the sender for egress rules, the
    /// receiver for ingress rules.
    pub fn generate(
        direction: Direction,
        verdict: Verdict,
        from: &Peer,
        to: &Peer,
        name: Option<String>,
    ) -> Self {
        let (subject, object) = match direction {
            Direction::Egress => (from, to),
            Direction::Ingress => (to, from),
        };
        let name = name.unwrap_or_else(|| {
            default_name(direction, verdict, subject.identity, object.identity)
        });

        let peer = vec![Selector::from_map(object.labels.clone())];
        let mut spec = PolicySpec {
            endpoint_selector: Selector::from_map(subject.labels.clone()),
            ..Default::default()
        };
        match (direction, verdict) {
            (Direction::Egress, Verdict::Allow) => {
                spec.egress.push(EgressRule { to_endpoints: peer })
            }
            (Direction::Egress, Verdict::Deny) => {
                spec.egress_deny.push(EgressRule { to_endpoints: peer })
            }
            (Direction::Ingress, Verdict::Allow) => {
                spec.ingress.push(IngressRule { from_endpoints: peer })
            }
            (Direction::Ingress, Verdict::Deny) => {
                spec.ingress_deny.push(IngressRule { from_endpoints: peer })
            }
        }

        Self {
            api_version: format!("{CILIUM_GROUP}/{CILIUM_VERSION}"),
            kind: PolicyKind::CiliumNetworkPolicy.to_string(),
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(subject.namespace.clone()),
                ..Default::default()
            },
            spec,
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
