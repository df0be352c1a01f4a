use crate::NumericIdentity;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not a valid CIDR: {0:?}")]
    InvalidCidr(String),

    #[error("at least one inclusive CIDR rule should be specified")]
    NoInclusiveCidr,

    #[error("failed to get identity {identity} from {agent}")]
    Lookup {
        identity: NumericIdentity,
        agent: String,
        #[source]
        source: anyhow::Error,
    },

    /// A world identity must carry exactly one CIDR label.
    #[error("internal error: identity {identity} has {found} CIDR labels")]
    CidrLabel {
        identity: NumericIdentity,
        found: usize,
    },
}
