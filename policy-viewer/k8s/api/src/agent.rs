//! Payloads of the Cilium agent API, as relayed by `cilium-agent-proxy`.
//!
//! Only the fields read by `npv` are modeled; everything else is ignored on decode.

use npv_core::{aggregate::DerivedFrom, Direction};
use serde::{Deserialize, Serialize};

/// `GET /v1/identity/{id}`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct IdentityResponse {
    pub id: i64,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// `GET /v1/endpoint/{id}`
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EndpointResponse {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub status: EndpointStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EndpointStatus {
    #[serde(default)]
    pub policy: EndpointPolicyStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EndpointPolicyStatus {
    #[serde(default)]
    pub realized: EndpointPolicy,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EndpointPolicy {
    #[serde(default)]
    pub l4: L4Policy,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct L4Policy {
    #[serde(default)]
    pub ingress: Vec<PolicyRule>,
    #[serde(default)]
    pub egress: Vec<PolicyRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub rule: String,
    /// Each element lists the labels of one policy the rule was derived from.
    #[serde(rename = "derived-from-rules", default)]
    pub derived_from_rules: Vec<Vec<String>>,
}

// === impl EndpointResponse ===

impl EndpointResponse {
    /// Label lists of every rule source, tagged with the direction of the rule. The same policy
    /// usually appears several times.
    pub fn derived_from_rules(&self) -> impl Iterator<Item = (Direction, &[String])> + '_ {
        let l4 = &self.status.policy.realized.l4;
        let ingress = l4.ingress.iter().map(|r| (Direction::Ingress, r));
        let egress = l4.egress.iter().map(|r| (Direction::Egress, r));
        ingress.chain(egress).flat_map(|(direction, rule)| {
            rule.derived_from_rules
                .iter()
                .map(move |labels| (direction, labels.as_slice()))
        })
    }

    pub fn derived_from(&self) -> impl Iterator<Item = DerivedFrom> + '_ {
        self.derived_from_rules()
            .map(|(direction, labels)| DerivedFrom::parse(direction, labels))
    }
}
