#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("endpoint resource {namespace}/{name} is broken")]
    MissingEndpointId { namespace: String, name: String },

    #[error("pod {namespace}/{name} does not have security identity")]
    MissingIdentity { namespace: String, name: String },

    #[error("CiliumIdentity name is not numeric: {0:?}")]
    InvalidIdentityName(String),

    #[error("identity {id} of {namespace}/{name} is out of range")]
    IdentityOutOfRange {
        namespace: String,
        name: String,
        id: i64,
    },

    #[error("CiliumIdentity resource should have namespace label: {0}")]
    MissingNamespaceLabel(String),

    #[error("unknown policy kind: {0:?}")]
    UnknownPolicyKind(String),
}
