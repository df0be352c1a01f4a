//! Cilium's own bookkeeping resources.
//!
//! Neither resource follows the spec/status layout that `kube::CustomResource` expects (identities
//! carry their labels at the top level), so `kube::Resource` is implemented by hand.

use crate::{labels, Error, CILIUM_GROUP, CILIUM_VERSION};
use kube::api::ObjectMeta;
use npv_core::{identity::Endpoint, NumericIdentity, LABEL_POD_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// A cluster-wide security identity, named by its numeric ID.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CiliumIdentity {
    pub metadata: ObjectMeta,
    #[serde(rename = "security-labels", default)]
    pub security_labels: Option<labels::Map>,
}

/// The agent's view of a pod.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CiliumEndpoint {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: Option<EndpointStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EndpointStatus {
    /// The endpoint ID, local to the agent.
    pub id: Option<i64>,
    pub identity: Option<EndpointIdentity>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EndpointIdentity {
    pub id: Option<i64>,
    #[serde(default)]
    pub labels: Vec<String>,
}

// === impl CiliumIdentity ===

impl kube::Resource for CiliumIdentity {
    type DynamicType = ();
    type Scope = k8s_openapi::ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "CiliumIdentity".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        CILIUM_GROUP.into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        CILIUM_VERSION.into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "ciliumidentities".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl CiliumIdentity {
    pub fn numeric_identity(&self) -> Result<NumericIdentity, Error> {
        let name = self.metadata.name.as_deref().unwrap_or_default();
        name.parse()
            .map_err(|_| Error::InvalidIdentityName(name.to_string()))
    }

    pub fn labels(&self) -> labels::Map {
        self.security_labels.clone().unwrap_or_default()
    }

    pub fn namespace_label(&self) -> Option<&str> {
        self.security_labels
            .as_ref()?
            .get(LABEL_POD_NAMESPACE)
            .map(String::as_str)
    }
}

// === impl CiliumEndpoint ===

impl kube::Resource for CiliumEndpoint {
    type DynamicType = ();
    type Scope = k8s_openapi::NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "CiliumEndpoint".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        CILIUM_GROUP.into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        CILIUM_VERSION.into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "ciliumendpoints".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl CiliumEndpoint {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(
            self.metadata.namespace.clone().unwrap_or_default(),
            self.metadata.name.clone().unwrap_or_default(),
        )
    }

    /// The ID under which the agent keeps the endpoint's policy map.
    pub fn endpoint_id(&self) -> Result<i64, Error> {
        self.status
            .as_ref()
            .and_then(|s| s.id)
            .ok_or_else(|| {
                let Endpoint { namespace, name } = self.endpoint();
                Error::MissingEndpointId { namespace, name }
            })
    }

    pub fn identity(&self) -> Result<NumericIdentity, Error> {
        let id = self
            .status
            .as_ref()
            .and_then(|s| s.identity.as_ref())
            .and_then(|i| i.id)
            .ok_or_else(|| {
                let Endpoint { namespace, name } = self.endpoint();
                Error::MissingIdentity { namespace, name }
            })?;
        u32::try_from(id).map(NumericIdentity).map_err(|_| {
            let Endpoint { namespace, name } = self.endpoint();
            Error::IdentityOutOfRange { namespace, name, id }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_from_listing() {
        let id: CiliumIdentity = serde_json::from_value(serde_json::json!({
            "apiVersion": "cilium.io/v2",
            "kind": "CiliumIdentity",
            "metadata": { "name": "30210" },
            "security-labels": {
                "k8s:app": "web",
                "k8s:io.kubernetes.pod.namespace": "prod",
            },
        }))
        .unwrap();
        assert_eq!(id.numeric_identity().unwrap(), NumericIdentity(30210));
        assert_eq!(id.namespace_label(), Some("prod"));
        assert_eq!(id.labels().len(), 2);

        let bad = CiliumIdentity {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                ..Default::default()
            },
            security_labels: None,
        };
        assert!(matches!(
            bad.numeric_identity(),
            Err(Error::InvalidIdentityName(_))
        ));
        assert_eq!(bad.namespace_label(), None);
    }

    #[test]
    fn endpoint_status_fields() {
        let ep: CiliumEndpoint = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "web-0", "namespace": "prod" },
            "status": {
                "id": 1021,
                "identity": { "id": 30210, "labels": ["k8s:app=web"] },
                "networking": { "node": "10.0.0.1" },
            },
        }))
        .unwrap();
        assert_eq!(ep.endpoint_id().unwrap(), 1021);
        assert_eq!(ep.identity().unwrap(), NumericIdentity(30210));
        assert_eq!(ep.endpoint().to_string(), "prod/web-0");

        let broken: CiliumEndpoint = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "web-1", "namespace": "prod" },
            "status": {},
        }))
        .unwrap();
        assert!(matches!(
            broken.endpoint_id(),
            Err(Error::MissingEndpointId { .. })
        ));
        assert!(matches!(
            broken.identity(),
            Err(Error::MissingIdentity { .. })
        ));
    }
}
